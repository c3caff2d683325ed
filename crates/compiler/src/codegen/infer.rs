//! Local type re-derivation for codegen (spec §9: the AST stays one sum
//! type per category with no inline type annotations, so whichever phase
//! needs an expression's type re-derives it from declarations instead of
//! reading it off the node). The type checker already proved the program
//! well-typed; this walk mirrors its rules just enough to pick the right
//! LLVM type, GEP index, or arithmetic path, and is never a source of new
//! diagnostics.

use super::CodeGen;
use crate::ast::{BinOp, Expr, Literal, UnOp};
use crate::types::{PointerKind, Type};

impl CodeGen<'_> {
    pub(super) fn infer_type(&self, expr: &Expr) -> Type {
        match expr {
            Expr::Literal(lit, _) => match lit {
                Literal::Int(_) => Type::SignedInt(32),
                Literal::Float(_) => Type::Float(64),
                Literal::Bool(_) => Type::Bool,
                Literal::String(_) => Type::String,
                Literal::Char(_) => Type::SignedInt(32),
                Literal::Null => Type::Unknown,
            },
            Expr::Identifier(name, _) => self
                .lookup_local(name)
                .map(|l| l.ty.clone())
                .or_else(|| self.env.functions.get(name).map(|s| s.returns.clone()))
                .unwrap_or(Type::Unknown),
            Expr::Binary { op, lhs, rhs, .. } => match op {
                BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::And
                | BinOp::Or => Type::Bool,
                BinOp::Spaceship => Type::SignedInt(32),
                _ => {
                    let l = self.infer_type(lhs);
                    if matches!(l, Type::Unknown) { self.infer_type(rhs) } else { l }
                }
            },
            Expr::Unary { op, operand, .. } => match op {
                UnOp::Not => Type::Bool,
                UnOp::AddressOf => {
                    Type::Pointer { pointee: Box::new(self.infer_type(operand)), kind: PointerKind::Gc }
                }
                UnOp::Pin => {
                    Type::Pointer { pointee: Box::new(self.infer_type(operand)), kind: PointerKind::Pinned }
                }
                _ => self.infer_type(operand),
            },
            Expr::Call { callee, .. } => match callee.as_ref() {
                Expr::Identifier(name, _) => {
                    self.env.functions.get(name).map(|s| s.returns.clone()).unwrap_or(Type::Unknown)
                }
                _ => Type::Unknown,
            },
            Expr::Index { base, .. } => match self.infer_type(base) {
                Type::Array { element, .. } => *element,
                Type::Vector { component, .. } => *component,
                Type::Pointer { pointee, .. } => *pointee,
                _ => Type::Unknown,
            },
            Expr::Member { base, name, .. } => match self.infer_type(base) {
                Type::Struct { fields, .. } => fields
                    .iter()
                    .find(|f| &f.name == name)
                    .map(|f| f.ty.clone())
                    .unwrap_or(Type::Unknown),
                Type::Pointer { pointee, .. } => match *pointee {
                    Type::Struct { fields, .. } => fields
                        .iter()
                        .find(|f| &f.name == name)
                        .map(|f| f.ty.clone())
                        .unwrap_or(Type::Unknown),
                    _ => Type::Unknown,
                },
                _ => Type::Unknown,
            },
            Expr::Ternary { then_branch, .. } => self.infer_type(then_branch),
            Expr::TemplateString(..) => Type::String,
            Expr::ArrayLiteral(elems, _) => {
                let element = elems.first().map(|e| self.infer_type(e)).unwrap_or(Type::Unknown);
                Type::Array { element: Box::new(element), size: Some(elems.len() as u64) }
            }
            Expr::VectorLiteral { constructor, .. } => {
                let dim = constructor.strip_prefix("vec").and_then(|s| s.parse().ok()).unwrap_or(2);
                Type::Vector { component: Box::new(Type::Float(32)), dimension: dim }
            }
            Expr::Unwrap { value, .. } => match self.infer_type(value) {
                Type::Result(inner) => *inner,
                other => other,
            },
            Expr::Await(inner, _) => match self.infer_type(inner) {
                Type::Future(inner) => *inner,
                other => other,
            },
            Expr::Spawn(inner, _) => Type::Future(Box::new(self.infer_type(inner))),
            Expr::Assign { target, .. } => self.infer_type(target),
            Expr::RangeExclusive(..) | Expr::RangeInclusive(..) => Type::Unknown,
            Expr::ObjectLiteral(..) | Expr::Lambda(..) | Expr::Error(_) => Type::Unknown,
        }
    }
}

//! Abstract syntax tree (spec §3.2).
//!
//! Continues the teacher's tagged-variant-tree approach (`ast.rs`'s
//! `Statement`/`Pattern` enums matched exhaustively by the checker and
//! codegen) generalized from Seq's word/quotation grammar to Aria's
//! declaration/expression/statement grammar. Per spec §9's first design
//! note, this is one sum type per AST category rather than a class
//! hierarchy with visitor dispatch.

use aria_core::SourcePosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Stack,
    Gc,
    Wild,
    Wildx,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    Private,
    Pub,
    PubPackage,
    PubSuper,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericParam {
    pub name: String,
    pub bounds: Vec<String>,
}

/// A parsed (but not yet resolved) type expression (spec §3.2 "Types").
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Named(String),
    Pointer(Box<TypeExpr>, StorageClass),
    Array(Box<TypeExpr>, Option<u64>),
    Generic(String, Vec<TypeExpr>),
    Function(Vec<TypeExpr>, Box<TypeExpr>),
    Result(Box<TypeExpr>),
    /// Leading `*` on a function's return type: `auto_wrap` sugar (spec §4.3).
    AutoWrap(Box<TypeExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i128),
    Float(f64),
    Bool(bool),
    String(String),
    Char(char),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Spaceship,
    And,
    Or,
    PipeInto,
    PipeFrom,
    NullCoalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    AddressOf,
    Pin,
    Iterate,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: TypeExpr,
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplatePart {
    pub literal: String,
    /// `None` for the trailing literal segment.
    pub expr: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub return_ty: TypeExpr,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    /// Filled in by the closure analyzer (spec §4.7); empty until then.
    pub captures: Vec<Capture>,
    pub requires_environment: bool,
    pub id: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    ByValue,
    ByReference,
    ByMove,
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub name: String,
    pub mode: CaptureMode,
}

/// A destructuring or matching case for `pick` (spec §3.2, §4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum PickCase {
    Exact(Expr),
    Less(Expr),
    Greater(Expr),
    LessEq(Expr),
    GreaterEq(Expr),
    RangeExclusive(Expr, Expr),
    RangeInclusive(Expr, Expr),
    /// `label:(!)` — compiles to a trap; the author asserts this case cannot occur.
    Unreachable(String),
    Wildcard,
    Destructure(DestructurePattern),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DestructurePattern {
    Array(Vec<String>),
    Object(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickArm {
    pub cases: Vec<PickCase>,
    pub body: Vec<Stmt>,
    pub fallthrough: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal, SourcePosition),
    Identifier(String, SourcePosition),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: SourcePosition,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        pos: SourcePosition,
    },
    Call {
        callee: Box<Expr>,
        type_args: Vec<TypeExpr>,
        args: Vec<Expr>,
        pos: SourcePosition,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        pos: SourcePosition,
    },
    Member {
        base: Box<Expr>,
        name: String,
        arrow: bool,
        safe_navigation: bool,
        pos: SourcePosition,
    },
    Ternary {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
        pos: SourcePosition,
    },
    Lambda(Box<Lambda>, SourcePosition),
    TemplateString(Vec<TemplatePart>, SourcePosition),
    RangeExclusive(Box<Expr>, Box<Expr>, SourcePosition),
    RangeInclusive(Box<Expr>, Box<Expr>, SourcePosition),
    ArrayLiteral(Vec<Expr>, SourcePosition),
    ObjectLiteral(Vec<(String, Expr)>, SourcePosition),
    VectorLiteral {
        constructor: String,
        args: Vec<Expr>,
        pos: SourcePosition,
    },
    Unwrap {
        value: Box<Expr>,
        default: Option<Box<Expr>>,
        pos: SourcePosition,
    },
    Await(Box<Expr>, SourcePosition),
    Spawn(Box<Expr>, SourcePosition),
    Assign {
        target: Box<Expr>,
        op: Option<BinOp>,
        value: Box<Expr>,
        pos: SourcePosition,
    },
    /// Parser recovery sentinel (spec §9: "returns a definitely-an-error
    /// node and records a diagnostic" instead of unwinding via exceptions).
    Error(SourcePosition),
}

impl Expr {
    pub fn pos(&self) -> SourcePosition {
        match self {
            Expr::Literal(_, p)
            | Expr::Identifier(_, p)
            | Expr::Binary { pos: p, .. }
            | Expr::Unary { pos: p, .. }
            | Expr::Call { pos: p, .. }
            | Expr::Index { pos: p, .. }
            | Expr::Member { pos: p, .. }
            | Expr::Ternary { pos: p, .. }
            | Expr::Lambda(_, p)
            | Expr::TemplateString(_, p)
            | Expr::RangeExclusive(_, _, p)
            | Expr::RangeInclusive(_, _, p)
            | Expr::ArrayLiteral(_, p)
            | Expr::ObjectLiteral(_, p)
            | Expr::VectorLiteral { pos: p, .. }
            | Expr::Unwrap { pos: p, .. }
            | Expr::Await(_, p)
            | Expr::Spawn(_, p)
            | Expr::Assign { pos: p, .. }
            | Expr::Error(p) => *p,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Expr::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub is_const: bool,
    pub storage: StorageClass,
    pub ty: TypeExpr,
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub init: Option<Expr>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub is_pub: bool,
    pub is_async: bool,
    pub is_extern: bool,
    pub auto_wrap: bool,
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub return_ty: TypeExpr,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub is_const: bool,
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub fields: Vec<StructField>,
    pub methods: Vec<FuncDecl>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<Param>,
    pub return_ty: TypeExpr,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitDecl {
    pub name: String,
    pub super_traits: Vec<String>,
    pub methods: Vec<MethodSig>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImplDecl {
    pub trait_name: String,
    pub type_name: String,
    pub methods: Vec<FuncDecl>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportSelector {
    Full,
    Selective(Vec<String>),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UseDecl {
    pub path: String,
    pub alias: Option<String>,
    pub selector: ImportSelector,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VarDecl(VarDecl),
    FuncDecl(FuncDecl),
    StructDecl(StructDecl),
    TraitDecl(TraitDecl),
    ImplDecl(ImplDecl),
    Use(UseDecl),
    Return(Option<Expr>, SourcePosition),
    Break(Option<String>, SourcePosition),
    Continue(Option<String>, SourcePosition),
    Defer(Box<Stmt>, SourcePosition),
    Expr(Expr),
    Block(Vec<Stmt>, SourcePosition),
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
        pos: SourcePosition,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        label: Option<String>,
        pos: SourcePosition,
    },
    ForIn {
        binding: String,
        iterable: Expr,
        body: Vec<Stmt>,
        label: Option<String>,
        pos: SourcePosition,
    },
    /// Counted `loop(start, limit, step)` (spec §3.2).
    Loop {
        start: Expr,
        limit: Expr,
        step: Expr,
        body: Vec<Stmt>,
        label: Option<String>,
        pos: SourcePosition,
    },
    /// Counted `till(limit, step)`.
    Till {
        limit: Expr,
        step: Expr,
        body: Vec<Stmt>,
        label: Option<String>,
        pos: SourcePosition,
    },
    /// Tri-state `when(cond) { body } then { .. } end { .. }` (spec §3.2).
    When {
        cond: Expr,
        body: Vec<Stmt>,
        then_branch: Option<Vec<Stmt>>,
        end_branch: Option<Vec<Stmt>>,
        label: Option<String>,
        pos: SourcePosition,
    },
    Pick {
        selector: Expr,
        arms: Vec<PickArm>,
        pos: SourcePosition,
    },
    /// Parser recovery sentinel, mirrors `Expr::Error`.
    Error(SourcePosition),
}

impl Stmt {
    pub fn is_error(&self) -> bool {
        matches!(self, Stmt::Error(_))
    }
}

/// A parsed program: an ordered list of top-level declarations (spec §3.2
/// "Entry point returns a *program* node").
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub uses: Vec<UseDecl>,
    pub items: Vec<Stmt>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn find_function(&self, name: &str) -> Option<&FuncDecl> {
        self.items.iter().find_map(|item| match item {
            Stmt::FuncDecl(f) if f.name == name => Some(f),
            _ => None,
        })
    }
}

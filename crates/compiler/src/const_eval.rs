//! Compile-time function evaluation (spec §4.8).
//!
//! A tree-walking interpreter over the same AST the parser produces,
//! reused rather than lowered to a separate IR first — the teacher's
//! codegen modules walk `ast::Stmt`/`ast::Expr` directly too, and CTFE
//! has no need for SSA or basic blocks. Grounded on
//! `original_source/include/frontend/sema/const_evaluator.h`'s
//! `ComptimeValue`/`ConstEvaluator` shapes (the matching `.cpp` is an
//! unimplemented stub, so the evaluation rules below come from spec
//! §4.8 directly rather than from a reference body).
//!
//! Values are stored as widened `i128`/`f64` rather than the header's
//! `std::variant<int64_t, ...>` — Rust's `i128` covers every signed and
//! unsigned width Aria defines in one representation, so there is no
//! need for the header's separate integer/unsigned discriminants.

use crate::ast::{BinOp, Expr, FuncDecl, Literal, PickCase, Stmt, TypeExpr, UnOp};
use crate::types::Type;
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_INSTRUCTION_LIMIT: usize = 1_000_000;
pub const DEFAULT_STACK_DEPTH_LIMIT: usize = 512;
pub const DEFAULT_HEAP_SIZE_LIMIT: usize = 1024 * 1024 * 1024;

/// A TBB value: either a valid in-range integer or the sticky ERR state.
/// Kept distinct from `Value::Int` since TBB ERR has no analogue in the
/// plain integer types (spec §4.8 "any ERR operand, ERR result").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TbbRaw {
    Valid(i128),
    Err,
}

/// An opaque handle into the virtual heap: `{AllocID, Offset}`, never a
/// raw address (spec §4.8 "Pointer semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerHandle {
    pub alloc_id: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Null,
    Int(i128),
    Uint(u128),
    Tbb { bits: u16, raw: TbbRaw },
    Float(f64),
    Bool(bool),
    Str(String),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Pointer(PointerHandle),
}

impl Value {
    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Uint(n) => Some(*n as i128),
            Value::Tbb { raw: TbbRaw::Valid(n), .. } => Some(*n),
            Value::Bool(b) => Some(*b as i128),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn truthy_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Tbb { raw: TbbRaw::Err, .. }, Value::Tbb { raw: TbbRaw::Err, .. }) => true,
            _ => self == other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstEvalError {
    InstructionLimitExceeded,
    StackDepthExceeded,
    HeapSizeExceeded,
    UnknownIdentifier(String),
    UnknownFunction(String),
    WildxForbidden,
    InvalidAllocation(u32),
    OutOfBounds { alloc_id: u32, offset: u32 },
    IndexOutOfBounds { index: i128, len: usize },
    DivisionByZero,
    ArgumentCountMismatch { name: String, expected: usize, found: usize },
    TypeMismatch(String),
    UnreachableCaseHit(String),
    NotConstEvaluable(&'static str),
}

impl fmt::Display for ConstEvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstEvalError::InstructionLimitExceeded => write!(f, "const evaluation exceeded the instruction limit"),
            ConstEvalError::StackDepthExceeded => write!(f, "const evaluation exceeded the stack depth limit"),
            ConstEvalError::HeapSizeExceeded => write!(f, "const evaluation exceeded the virtual heap size limit"),
            ConstEvalError::UnknownIdentifier(name) => write!(f, "unknown identifier '{name}' in constant expression"),
            ConstEvalError::UnknownFunction(name) => write!(f, "'{name}' is not a registered const-evaluable function"),
            ConstEvalError::WildxForbidden => write!(f, "wildx allocations are forbidden in constant evaluation"),
            ConstEvalError::InvalidAllocation(id) => write!(f, "allocation {id} does not exist or has been freed"),
            ConstEvalError::OutOfBounds { alloc_id, offset } => {
                write!(f, "byte offset {offset} is out of bounds for allocation {alloc_id}")
            }
            ConstEvalError::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} is out of bounds for an array of length {len}")
            }
            ConstEvalError::DivisionByZero => write!(f, "division or modulus by zero in constant expression"),
            ConstEvalError::ArgumentCountMismatch { name, expected, found } => {
                write!(f, "'{name}' expects {expected} argument(s), found {found}")
            }
            ConstEvalError::TypeMismatch(msg) => write!(f, "type mismatch in constant expression: {msg}"),
            ConstEvalError::UnreachableCaseHit(label) => write!(f, "reached case marked unreachable: {label}"),
            ConstEvalError::NotConstEvaluable(what) => write!(f, "{what} is not const-evaluable"),
        }
    }
}

impl std::error::Error for ConstEvalError {}

type EResult<T> = Result<T, ConstEvalError>;

struct Allocation {
    data: Vec<u8>,
    mutable: bool,
}

/// Control-flow signal produced by executing a statement. There is no
/// AST node for "this block exited early"; the interpreter threads it
/// back up through `exec_block` the same way the teacher's codegen
/// threads a `Option<BasicBlock>` terminator back up through nested
/// `if`/`while` lowering.
enum Flow {
    Next,
    Return(Value),
    Break(Option<String>),
    Continue(Option<String>),
}

/// Compile-time interpreter: named constants, a lexical scope stack, a
/// registry of const-evaluable functions, a memoization cache, and a
/// sandboxed virtual heap (spec §4.8).
pub struct ConstEvaluator {
    constants: HashMap<String, Value>,
    scopes: Vec<HashMap<String, Value>>,
    functions: HashMap<String, FuncDecl>,
    memo: HashMap<String, Vec<(Vec<Value>, Value)>>,

    instruction_count: usize,
    instruction_limit: usize,
    stack_depth: usize,
    stack_depth_limit: usize,

    heap: HashMap<u32, Allocation>,
    next_alloc_id: u32,
    heap_used: usize,
    heap_limit: usize,
}

impl Default for ConstEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstEvaluator {
    pub fn new() -> Self {
        ConstEvaluator {
            constants: HashMap::new(),
            scopes: vec![HashMap::new()],
            functions: HashMap::new(),
            memo: HashMap::new(),
            instruction_count: 0,
            instruction_limit: DEFAULT_INSTRUCTION_LIMIT,
            stack_depth: 0,
            stack_depth_limit: DEFAULT_STACK_DEPTH_LIMIT,
            heap: HashMap::new(),
            next_alloc_id: 1,
            heap_used: 0,
            heap_limit: DEFAULT_HEAP_SIZE_LIMIT,
        }
    }

    pub fn with_limits(instruction_limit: usize, stack_depth_limit: usize, heap_limit: usize) -> Self {
        ConstEvaluator {
            instruction_limit,
            stack_depth_limit,
            heap_limit,
            ..Self::new()
        }
    }

    // --- scopes & constants -------------------------------------------------

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: String, value: Value) {
        self.scopes.last_mut().expect("at least one scope").insert(name, value);
    }

    pub fn define_constant(&mut self, name: &str, value: Value) {
        self.constants.insert(name.to_string(), value);
    }

    fn lookup(&self, name: &str) -> EResult<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Ok(v.clone());
            }
        }
        self.constants
            .get(name)
            .cloned()
            .ok_or_else(|| ConstEvalError::UnknownIdentifier(name.to_string()))
    }

    /// Mutates the nearest scope (innermost to outermost) already
    /// holding `name`; const-eval has no notion of implicit global
    /// mutation, so an unknown target is an error rather than a new
    /// top-level binding.
    fn assign(&mut self, name: &str, value: Value) -> EResult<()> {
        for scope in self.scopes.iter_mut().rev() {
            if scope.contains_key(name) {
                scope.insert(name.to_string(), value);
                return Ok(());
            }
        }
        Err(ConstEvalError::UnknownIdentifier(name.to_string()))
    }

    pub fn register_function(&mut self, decl: FuncDecl) {
        self.functions.insert(decl.name.clone(), decl);
    }

    pub fn lookup_function(&self, name: &str) -> Option<&FuncDecl> {
        self.functions.get(name)
    }

    // --- resource limits -----------------------------------------------------

    fn tick(&mut self) -> EResult<()> {
        self.instruction_count += 1;
        if self.instruction_count > self.instruction_limit {
            return Err(ConstEvalError::InstructionLimitExceeded);
        }
        Ok(())
    }

    fn enter_stack_frame(&mut self) -> EResult<()> {
        self.stack_depth += 1;
        if self.stack_depth > self.stack_depth_limit {
            return Err(ConstEvalError::StackDepthExceeded);
        }
        Ok(())
    }

    fn leave_stack_frame(&mut self) {
        self.stack_depth -= 1;
    }

    // --- virtual heap ---------------------------------------------------------

    /// `wildx` allocations are forbidden outright; the caller decides
    /// whether a given `VarDecl`'s storage class routes here at all
    /// (spec §4.8 "Pointer semantics").
    pub fn allocate(&mut self, size: u32, mutable: bool, wildx: bool) -> EResult<Value> {
        if wildx {
            return Err(ConstEvalError::WildxForbidden);
        }
        let size = size as usize;
        if self.heap_used + size > self.heap_limit {
            return Err(ConstEvalError::HeapSizeExceeded);
        }
        let id = self.next_alloc_id;
        self.next_alloc_id += 1;
        self.heap_used += size;
        self.heap.insert(id, Allocation { data: vec![0u8; size], mutable });
        Ok(Value::Pointer(PointerHandle { alloc_id: id, offset: 0 }))
    }

    pub fn deallocate(&mut self, alloc_id: u32) {
        if let Some(alloc) = self.heap.remove(&alloc_id) {
            self.heap_used -= alloc.data.len();
        }
    }

    pub fn read_byte(&self, alloc_id: u32, offset: u32) -> EResult<u8> {
        let alloc = self.heap.get(&alloc_id).ok_or(ConstEvalError::InvalidAllocation(alloc_id))?;
        alloc
            .data
            .get(offset as usize)
            .copied()
            .ok_or(ConstEvalError::OutOfBounds { alloc_id, offset })
    }

    pub fn write_byte(&mut self, alloc_id: u32, offset: u32, value: u8) -> EResult<()> {
        let alloc = self.heap.get_mut(&alloc_id).ok_or(ConstEvalError::InvalidAllocation(alloc_id))?;
        if !alloc.mutable {
            return Err(ConstEvalError::TypeMismatch(format!("allocation {alloc_id} is not mutable")));
        }
        let slot = alloc
            .data
            .get_mut(offset as usize)
            .ok_or(ConstEvalError::OutOfBounds { alloc_id, offset })?;
        *slot = value;
        Ok(())
    }

    // --- memoization -----------------------------------------------------------

    fn memo_lookup(&self, name: &str, args: &[Value]) -> Option<Value> {
        self.memo
            .get(name)?
            .iter()
            .find(|(cached_args, _)| cached_args.as_slice() == args)
            .map(|(_, result)| result.clone())
    }

    fn memo_store(&mut self, name: &str, args: Vec<Value>, result: Value) {
        self.memo.entry(name.to_string()).or_default().push((args, result));
    }

    // --- function calls ---------------------------------------------------------

    pub fn call_function(&mut self, name: &str, args: Vec<Value>) -> EResult<Value> {
        if let Some(cached) = self.memo_lookup(name, &args) {
            return Ok(cached);
        }
        let func = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| ConstEvalError::UnknownFunction(name.to_string()))?;
        if func.params.len() != args.len() {
            return Err(ConstEvalError::ArgumentCountMismatch {
                name: name.to_string(),
                expected: func.params.len(),
                found: args.len(),
            });
        }
        self.enter_stack_frame()?;
        self.push_scope();
        for (param, value) in func.params.iter().zip(args.iter()) {
            let coerced = self.coerce_to_declared(&param.ty, value.clone());
            self.declare(param.name.clone(), coerced);
        }
        let flow = self.exec_block(&func.body);
        self.pop_scope();
        self.leave_stack_frame();
        let result = match flow? {
            Flow::Return(v) => v,
            _ => Value::Void,
        };
        self.memo_store(name, args, result.clone());
        Ok(result)
    }

    // --- statements ------------------------------------------------------------

    fn exec_block(&mut self, stmts: &[Stmt]) -> EResult<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Next => continue,
                other => return Ok(other),
            }
        }
        Ok(Flow::Next)
    }

    fn exec_loop_body(&mut self, body: &[Stmt], label: &Option<String>) -> EResult<Option<Flow>> {
        self.push_scope();
        let flow = self.exec_block(body);
        self.pop_scope();
        match flow? {
            Flow::Break(l) if l.is_none() || l == *label => Ok(Some(Flow::Next)),
            Flow::Continue(l) if l.is_none() || l == *label => Ok(None),
            Flow::Next => Ok(None),
            other => Ok(Some(other)),
        }
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> EResult<Flow> {
        self.tick()?;
        match stmt {
            Stmt::VarDecl(v) => {
                let value = match &v.init {
                    Some(expr) => {
                        let raw = self.eval(expr)?;
                        self.coerce_to_declared(&v.ty, raw)
                    }
                    None => Value::Void,
                };
                self.declare(v.name.clone(), value);
                Ok(Flow::Next)
            }
            Stmt::FuncDecl(f) => {
                self.register_function(f.clone());
                Ok(Flow::Next)
            }
            Stmt::StructDecl(_) | Stmt::TraitDecl(_) | Stmt::ImplDecl(_) | Stmt::Use(_) => Ok(Flow::Next),
            Stmt::Return(expr, _) => {
                let value = match expr {
                    Some(e) => self.eval(e)?,
                    None => Value::Void,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break(label, _) => Ok(Flow::Break(label.clone())),
            Stmt::Continue(label, _) => Ok(Flow::Continue(label.clone())),
            Stmt::Defer(_, _) => Err(ConstEvalError::NotConstEvaluable("defer")),
            Stmt::Expr(e) => {
                self.eval(e)?;
                Ok(Flow::Next)
            }
            Stmt::Block(stmts, _) => {
                self.push_scope();
                let flow = self.exec_block(stmts);
                self.pop_scope();
                flow
            }
            Stmt::If { cond, then_branch, else_branch, .. } => {
                if self.eval_bool(cond)? {
                    self.push_scope();
                    let flow = self.exec_block(then_branch);
                    self.pop_scope();
                    flow
                } else if let Some(else_branch) = else_branch {
                    self.push_scope();
                    let flow = self.exec_block(else_branch);
                    self.pop_scope();
                    flow
                } else {
                    Ok(Flow::Next)
                }
            }
            Stmt::While { cond, body, label, .. } => {
                while self.eval_bool(cond)? {
                    self.tick()?;
                    if let Some(flow) = self.exec_loop_body(body, label)? {
                        return Ok(flow);
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Loop { start, limit, step, body, label, .. } => {
                let start = self.eval_int(start)?;
                let limit = self.eval_int(limit)?;
                let step = self.eval_int(step)?;
                if step == 0 {
                    return Err(ConstEvalError::TypeMismatch("loop step must not be zero".to_string()));
                }
                let mut i = start;
                while (step > 0 && i < limit) || (step < 0 && i > limit) {
                    self.tick()?;
                    self.push_scope();
                    self.declare("__loop_index".to_string(), Value::Int(i));
                    let flow = self.exec_block(body);
                    self.pop_scope();
                    match flow? {
                        Flow::Break(l) if l.is_none() || l == *label => return Ok(Flow::Next),
                        Flow::Continue(l) if l.is_none() || l == *label => {}
                        Flow::Next => {}
                        other => return Ok(other),
                    }
                    i += step;
                }
                Ok(Flow::Next)
            }
            Stmt::Till { limit, step, body, label, .. } => {
                let limit = self.eval_int(limit)?;
                let step = self.eval_int(step)?;
                if step <= 0 {
                    return Err(ConstEvalError::TypeMismatch("till step must be positive".to_string()));
                }
                let mut i: i128 = 0;
                while i < limit {
                    self.tick()?;
                    if let Some(flow) = self.exec_loop_body(body, label)? {
                        return Ok(flow);
                    }
                    i += step;
                }
                Ok(Flow::Next)
            }
            Stmt::ForIn { binding, iterable, body, label, .. } => {
                let Value::Array(items) = self.eval(iterable)? else {
                    return Err(ConstEvalError::TypeMismatch("for-in requires an array".to_string()));
                };
                for item in items {
                    self.tick()?;
                    self.push_scope();
                    self.declare(binding.clone(), item);
                    let flow = self.exec_block(body);
                    self.pop_scope();
                    match flow? {
                        Flow::Break(l) if l.is_none() || l == *label => return Ok(Flow::Next),
                        Flow::Continue(l) if l.is_none() || l == *label => {}
                        Flow::Next => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Next)
            }
            // `when` has no super-clean const-eval analogue to the three-way
            // emit/transition/settle semantics codegen gives it; here it
            // degrades to "body runs if cond holds, then runs then_branch,
            // otherwise end_branch" since CTFE only needs one evaluation pass.
            Stmt::When { cond, body, then_branch, end_branch, .. } => {
                if self.eval_bool(cond)? {
                    self.push_scope();
                    let flow = self.exec_block(body)?;
                    self.pop_scope();
                    if !matches!(flow, Flow::Next) {
                        return Ok(flow);
                    }
                    if let Some(then_branch) = then_branch {
                        self.push_scope();
                        let flow = self.exec_block(then_branch);
                        self.pop_scope();
                        return flow;
                    }
                } else if let Some(end_branch) = end_branch {
                    self.push_scope();
                    let flow = self.exec_block(end_branch);
                    self.pop_scope();
                    return flow;
                }
                Ok(Flow::Next)
            }
            Stmt::Pick { selector, arms, .. } => {
                let selector_value = self.eval(selector)?;
                for arm in arms {
                    for case in &arm.cases {
                        if self.pick_case_matches(case, &selector_value)? {
                            self.push_scope();
                            if let PickCase::Destructure(pattern) = case {
                                self.bind_destructure(pattern, &selector_value)?;
                            }
                            let flow = self.exec_block(&arm.body);
                            self.pop_scope();
                            return flow;
                        }
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Error(_) => Err(ConstEvalError::NotConstEvaluable("a parse-error node")),
        }
    }

    fn pick_case_matches(&mut self, case: &PickCase, selector: &Value) -> EResult<bool> {
        match case {
            PickCase::Wildcard => Ok(true),
            PickCase::Unreachable(label) => Err(ConstEvalError::UnreachableCaseHit(label.clone())),
            PickCase::Exact(e) => Ok(self.eval(e)?.truthy_eq(selector)),
            PickCase::Less(e) => Ok(selector.as_i128() < self.eval(e)?.as_i128()),
            PickCase::Greater(e) => Ok(selector.as_i128() > self.eval(e)?.as_i128()),
            PickCase::LessEq(e) => Ok(selector.as_i128() <= self.eval(e)?.as_i128()),
            PickCase::GreaterEq(e) => Ok(selector.as_i128() >= self.eval(e)?.as_i128()),
            PickCase::RangeExclusive(lo, hi) => {
                let (lo, hi, sel) = (self.eval(lo)?.as_i128(), self.eval(hi)?.as_i128(), selector.as_i128());
                Ok(matches!((lo, hi, sel), (Some(lo), Some(hi), Some(sel)) if sel >= lo && sel < hi))
            }
            PickCase::RangeInclusive(lo, hi) => {
                let (lo, hi, sel) = (self.eval(lo)?.as_i128(), self.eval(hi)?.as_i128(), selector.as_i128());
                Ok(matches!((lo, hi, sel), (Some(lo), Some(hi), Some(sel)) if sel >= lo && sel <= hi))
            }
            PickCase::Destructure(pattern) => Ok(Self::destructure_shape_matches(pattern, selector)),
        }
    }

    /// Whether `selector`'s runtime shape fits `pattern`, without binding
    /// anything yet — binding happens once the arm is actually selected
    /// (`bind_destructure`), since a rejected case must not pollute scope.
    fn destructure_shape_matches(pattern: &crate::ast::DestructurePattern, selector: &Value) -> bool {
        use crate::ast::DestructurePattern;
        match pattern {
            DestructurePattern::Array(names) => {
                matches!(selector, Value::Array(items) if items.len() == names.len())
            }
            DestructurePattern::Object(fields) => matches!(selector, Value::Struct(members)
                if fields.iter().all(|(field, _)| members.iter().any(|(n, _)| n == field))),
        }
    }

    /// Binds a matched destructuring pattern's names into the current
    /// (already pushed) scope, mirroring `codegen_pick_destructure`'s GEP
    /// extraction at the LLVM level.
    fn bind_destructure(&mut self, pattern: &crate::ast::DestructurePattern, selector: &Value) -> EResult<()> {
        use crate::ast::DestructurePattern;
        match pattern {
            DestructurePattern::Array(names) => {
                let Value::Array(items) = selector else {
                    return Err(ConstEvalError::NotConstEvaluable("destructuring a non-array value"));
                };
                for (name, value) in names.iter().zip(items.iter()) {
                    self.declare(name.clone(), value.clone());
                }
            }
            DestructurePattern::Object(fields) => {
                let Value::Struct(members) = selector else {
                    return Err(ConstEvalError::NotConstEvaluable("destructuring a non-struct value"));
                };
                for (field_name, local_name) in fields {
                    let value = members
                        .iter()
                        .find(|(n, _)| n == field_name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| ConstEvalError::UnknownIdentifier(field_name.clone()))?;
                    self.declare(local_name.clone(), value);
                }
            }
        }
        Ok(())
    }

    // --- expressions -------------------------------------------------------------

    pub fn eval(&mut self, expr: &Expr) -> EResult<Value> {
        self.tick()?;
        match expr {
            Expr::Literal(lit, _) => self.eval_literal(lit),
            Expr::Identifier(name, _) => self.lookup(name),
            Expr::Binary { op, lhs, rhs, .. } => self.eval_binary(*op, lhs, rhs),
            Expr::Unary { op, operand, .. } => self.eval_unary(*op, operand),
            Expr::Call { callee, args, .. } => self.eval_call(callee, args),
            Expr::Index { base, index, .. } => self.eval_index(base, index),
            Expr::Member { base, name, .. } => self.eval_member(base, name),
            Expr::Ternary { cond, then_branch, else_branch, .. } => {
                if self.eval_bool(cond)? {
                    self.eval(then_branch)
                } else {
                    self.eval(else_branch)
                }
            }
            Expr::ArrayLiteral(items, _) => Ok(Value::Array(
                items.iter().map(|e| self.eval(e)).collect::<EResult<Vec<_>>>()?,
            )),
            Expr::VectorLiteral { args, .. } => Ok(Value::Array(
                args.iter().map(|e| self.eval(e)).collect::<EResult<Vec<_>>>()?,
            )),
            Expr::Assign { target, op, value, .. } => self.eval_assign(target, *op, value),
            Expr::RangeExclusive(lo, hi, _) | Expr::RangeInclusive(lo, hi, _) => {
                self.eval(lo)?;
                self.eval(hi)?;
                Err(ConstEvalError::NotConstEvaluable("a range expression used as a value"))
            }
            Expr::ObjectLiteral(fields, _) => Ok(Value::Struct(
                fields
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), self.eval(e)?)))
                    .collect::<EResult<Vec<_>>>()?,
            )),
            Expr::Lambda(_, _) => Err(ConstEvalError::NotConstEvaluable("a lambda expression")),
            Expr::TemplateString(_, _) => Err(ConstEvalError::NotConstEvaluable("a template string")),
            Expr::Unwrap { value, default, .. } => {
                let v = self.eval(value)?;
                if v == Value::Null {
                    match default {
                        Some(d) => self.eval(d),
                        None => Err(ConstEvalError::TypeMismatch("unwrap of null with no default".to_string())),
                    }
                } else {
                    Ok(v)
                }
            }
            Expr::Await(_, _) => Err(ConstEvalError::NotConstEvaluable("await")),
            Expr::Spawn(_, _) => Err(ConstEvalError::NotConstEvaluable("spawn")),
            Expr::Error(_) => Err(ConstEvalError::NotConstEvaluable("a parse-error node")),
        }
    }

    fn eval_bool(&mut self, expr: &Expr) -> EResult<bool> {
        self.eval(expr)?
            .as_bool()
            .ok_or_else(|| ConstEvalError::TypeMismatch("expected a bool".to_string()))
    }

    fn eval_int(&mut self, expr: &Expr) -> EResult<i128> {
        self.eval(expr)?
            .as_i128()
            .ok_or_else(|| ConstEvalError::TypeMismatch("expected an integer".to_string()))
    }

    /// Coerces a freshly-evaluated value to the shape its declared type
    /// implies. Integer literals evaluate to plain `Value::Int` regardless
    /// of context, so a `tbb8:x = 100;` declaration needs this step to
    /// wrap the literal into a `Value::Tbb` (and catch the overflow that
    /// makes it ERR) before anything downstream can do TBB arithmetic on
    /// `x`. Only applies at declaration and call-argument boundaries —
    /// once a value is shaped, every operation on it routes through
    /// `apply_binary`'s variant match.
    fn coerce_to_declared(&self, ty: &TypeExpr, value: Value) -> Value {
        let name = match ty {
            TypeExpr::Named(n) => n.as_str(),
            TypeExpr::AutoWrap(inner) => return self.coerce_to_declared(inner, value),
            _ => return value,
        };
        if let Value::Int(n) = value {
            if let Some(bits) = name.strip_prefix("tbb").and_then(|s| s.parse::<u16>().ok()) {
                return Value::Tbb { bits, raw: self.tbb_checked(bits, Some(n)) };
            }
            if name.strip_prefix("uint").and_then(|s| s.parse::<u16>().ok()).is_some() {
                return Value::Uint(n as u128);
            }
        }
        value
    }

    fn eval_literal(&mut self, lit: &Literal) -> EResult<Value> {
        Ok(match lit {
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(f) => Value::Float(*f),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::String(s) => Value::Str(s.clone()),
            Literal::Char(c) => Value::Int(*c as i128),
            Literal::Null => Value::Null,
        })
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> EResult<Value> {
        let Expr::Identifier(name, _) = callee else {
            return Err(ConstEvalError::NotConstEvaluable("an indirect call"));
        };
        let arg_values = args.iter().map(|a| self.eval(a)).collect::<EResult<Vec<_>>>()?;
        match name.as_str() {
            "allocate" => {
                let size = arg_values.first().and_then(Value::as_i128).unwrap_or(0) as u32;
                let mutable = arg_values.get(1).and_then(Value::as_bool).unwrap_or(true);
                let wildx = arg_values.get(2).and_then(Value::as_bool).unwrap_or(false);
                self.allocate(size, mutable, wildx)
            }
            _ => self.call_function(name, arg_values),
        }
    }

    fn eval_index(&mut self, base: &Expr, index: &Expr) -> EResult<Value> {
        let Value::Array(items) = self.eval(base)? else {
            return Err(ConstEvalError::TypeMismatch("indexing a non-array value".to_string()));
        };
        let idx = self.eval_int(index)?;
        if idx < 0 || idx as usize >= items.len() {
            return Err(ConstEvalError::IndexOutOfBounds { index: idx, len: items.len() });
        }
        Ok(items[idx as usize].clone())
    }

    fn eval_member(&mut self, base: &Expr, name: &str) -> EResult<Value> {
        match self.eval(base)? {
            Value::Struct(fields) => fields
                .into_iter()
                .find(|(field, _)| field == name)
                .map(|(_, v)| v)
                .ok_or_else(|| ConstEvalError::UnknownIdentifier(name.to_string())),
            Value::Pointer(handle) if name == "alloc_id" => Ok(Value::Uint(handle.alloc_id as u128)),
            Value::Pointer(handle) if name == "offset" => Ok(Value::Uint(handle.offset as u128)),
            _ => Err(ConstEvalError::TypeMismatch(format!("no field '{name}' on this value"))),
        }
    }

    fn assign_to(&mut self, target: &Expr, value: Value) -> EResult<()> {
        match target {
            Expr::Identifier(name, _) => self.assign(name, value),
            Expr::Index { base, index, .. } => {
                let Expr::Identifier(name, _) = base.as_ref() else {
                    return Err(ConstEvalError::NotConstEvaluable("assignment through a nested index"));
                };
                let idx = self.eval_int(index)?;
                let mut items = match self.lookup(name)? {
                    Value::Array(items) => items,
                    _ => return Err(ConstEvalError::TypeMismatch("indexing a non-array value".to_string())),
                };
                if idx < 0 || idx as usize >= items.len() {
                    return Err(ConstEvalError::IndexOutOfBounds { index: idx, len: items.len() });
                }
                items[idx as usize] = value;
                self.assign(name, Value::Array(items))
            }
            Expr::Member { base, name: field, .. } => {
                let Expr::Identifier(name, _) = base.as_ref() else {
                    return Err(ConstEvalError::NotConstEvaluable("assignment through a nested member"));
                };
                let mut fields = match self.lookup(name)? {
                    Value::Struct(fields) => fields,
                    _ => return Err(ConstEvalError::TypeMismatch("member assignment on a non-struct value".to_string())),
                };
                match fields.iter_mut().find(|(n, _)| n == field) {
                    Some((_, slot)) => *slot = value,
                    None => fields.push((field.clone(), value)),
                }
                self.assign(name, Value::Struct(fields))
            }
            _ => Err(ConstEvalError::NotConstEvaluable("this assignment target")),
        }
    }

    fn eval_assign(&mut self, target: &Expr, op: Option<BinOp>, value: &Expr) -> EResult<Value> {
        let new_value = match op {
            Some(op) => {
                let current = self.eval(target)?;
                let rhs = self.eval(value)?;
                self.apply_binary(op, current, rhs)?
            }
            None => self.eval(value)?,
        };
        self.assign_to(target, new_value.clone())?;
        Ok(new_value)
    }

    fn eval_unary(&mut self, op: UnOp, operand: &Expr) -> EResult<Value> {
        match op {
            UnOp::Neg => match self.eval(operand)? {
                Value::Int(n) => Ok(Value::Int(-n)),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Tbb { bits, raw } => Ok(Value::Tbb { bits, raw: self.tbb_neg(bits, raw) }),
                _ => Err(ConstEvalError::TypeMismatch("negation of a non-numeric value".to_string())),
            },
            UnOp::Not => Ok(Value::Bool(!self.eval_bool(operand)?)),
            UnOp::BitNot => match self.eval(operand)? {
                Value::Int(n) => Ok(Value::Int(!n)),
                Value::Uint(n) => Ok(Value::Uint(!n)),
                _ => Err(ConstEvalError::TypeMismatch("bitwise not of a non-integer value".to_string())),
            },
            UnOp::AddressOf | UnOp::Pin | UnOp::Iterate => {
                Err(ConstEvalError::NotConstEvaluable("address-of, pin, and iterate operators"))
            }
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => {
                let old = self.eval(operand)?;
                let delta = if matches!(op, UnOp::PreInc | UnOp::PostInc) { 1 } else { -1 };
                let new_value = match &old {
                    Value::Int(n) => Value::Int(n + delta),
                    Value::Uint(n) => Value::Uint((*n as i128 + delta) as u128),
                    Value::Float(f) => Value::Float(f + delta as f64),
                    Value::Tbb { bits, raw } => {
                        Value::Tbb { bits: *bits, raw: self.tbb_add(*bits, *raw, TbbRaw::Valid(delta)) }
                    }
                    _ => return Err(ConstEvalError::TypeMismatch("increment/decrement of a non-numeric value".to_string())),
                };
                self.assign_to(operand, new_value.clone())?;
                Ok(if matches!(op, UnOp::PreInc | UnOp::PreDec) { new_value } else { old })
            }
        }
    }

    fn eval_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> EResult<Value> {
        // Short-circuit before evaluating the right-hand side.
        match op {
            BinOp::And => {
                if !self.eval_bool(lhs)? {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(self.eval_bool(rhs)?));
            }
            BinOp::Or => {
                if self.eval_bool(lhs)? {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(self.eval_bool(rhs)?));
            }
            BinOp::NullCoalesce => {
                let l = self.eval(lhs)?;
                return if l == Value::Null { self.eval(rhs) } else { Ok(l) };
            }
            _ => {}
        }
        let l = self.eval(lhs)?;
        let r = self.eval(rhs)?;
        self.apply_binary(op, l, r)
    }

    fn apply_binary(&mut self, op: BinOp, l: Value, r: Value) -> EResult<Value> {
        match (&l, &r) {
            (Value::Tbb { bits, raw: a }, Value::Tbb { bits: b, raw: bv }) if bits == b => {
                self.apply_tbb(op, *bits, *a, *bv)
            }
            (Value::Tbb { .. }, _) | (_, Value::Tbb { .. }) => {
                Err(ConstEvalError::TypeMismatch("tbb values cannot mix with plain integers".to_string()))
            }
            (Value::Float(a), Value::Float(b)) => self.apply_float(op, *a, *b),
            (Value::Bool(a), Value::Bool(b)) => self.apply_bool_compare(op, *a, *b),
            (Value::Str(a), Value::Str(b)) if matches!(op, BinOp::Eq | BinOp::Ne) => {
                Ok(Value::Bool(if op == BinOp::Eq { a == b } else { a != b }))
            }
            _ => {
                let a = l.as_i128().ok_or_else(|| ConstEvalError::TypeMismatch("expected a number".to_string()))?;
                let b = r.as_i128().ok_or_else(|| ConstEvalError::TypeMismatch("expected a number".to_string()))?;
                let result = self.apply_int(op, a, b)?;
                Ok(if matches!(l, Value::Uint(_)) && matches!(r, Value::Uint(_)) {
                    match result {
                        Value::Int(n) => Value::Uint(n as u128),
                        other => other,
                    }
                } else {
                    result
                })
            }
        }
    }

    fn apply_int(&mut self, op: BinOp, a: i128, b: i128) -> EResult<Value> {
        Ok(match op {
            BinOp::Add => Value::Int(a + b),
            BinOp::Sub => Value::Int(a - b),
            BinOp::Mul => Value::Int(a * b),
            BinOp::Div => {
                if b == 0 {
                    return Err(ConstEvalError::DivisionByZero);
                }
                Value::Int(a / b)
            }
            BinOp::Rem => {
                if b == 0 {
                    return Err(ConstEvalError::DivisionByZero);
                }
                Value::Int(a % b)
            }
            BinOp::BitAnd => Value::Int(a & b),
            BinOp::BitOr => Value::Int(a | b),
            BinOp::BitXor => Value::Int(a ^ b),
            BinOp::Shl => Value::Int(a << b),
            BinOp::Shr => Value::Int(a >> b),
            BinOp::Eq => Value::Bool(a == b),
            BinOp::Ne => Value::Bool(a != b),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Le => Value::Bool(a <= b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Ge => Value::Bool(a >= b),
            BinOp::Spaceship => Value::Int(match a.cmp(&b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }),
            BinOp::And | BinOp::Or | BinOp::NullCoalesce => unreachable!("handled before apply_int"),
            BinOp::PipeInto | BinOp::PipeFrom => {
                return Err(ConstEvalError::NotConstEvaluable("pipe operators"));
            }
        })
    }

    fn apply_float(&mut self, op: BinOp, a: f64, b: f64) -> EResult<Value> {
        Ok(match op {
            BinOp::Add => Value::Float(a + b),
            BinOp::Sub => Value::Float(a - b),
            BinOp::Mul => Value::Float(a * b),
            BinOp::Div => Value::Float(a / b),
            BinOp::Rem => Value::Float(a % b),
            BinOp::Eq => Value::Bool(a == b),
            BinOp::Ne => Value::Bool(a != b),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Le => Value::Bool(a <= b),
            BinOp::Gt => Value::Bool(a > b),
            BinOp::Ge => Value::Bool(a >= b),
            _ => return Err(ConstEvalError::TypeMismatch("unsupported operator on floats".to_string())),
        })
    }

    fn apply_bool_compare(&mut self, op: BinOp, a: bool, b: bool) -> EResult<Value> {
        match op {
            BinOp::Eq => Ok(Value::Bool(a == b)),
            BinOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(ConstEvalError::TypeMismatch("only == and != apply to bool".to_string())),
        }
    }

    /// TBB arithmetic (spec §4.8): sticky ERR, widened-accumulator
    /// overflow detection against the symmetric valid range, and
    /// division/modulus by zero both produce ERR rather than aborting.
    fn apply_tbb(&mut self, op: BinOp, bits: u16, a: TbbRaw, b: TbbRaw) -> EResult<Value> {
        let raw = match op {
            BinOp::Add => self.tbb_add(bits, a, b),
            BinOp::Sub => self.tbb_sub(bits, a, b),
            BinOp::Mul => self.tbb_mul(bits, a, b),
            BinOp::Div => self.tbb_div(bits, a, b),
            BinOp::Rem => self.tbb_rem(bits, a, b),
            BinOp::Eq => return Ok(Value::Bool(Value::Tbb { bits, raw: a }.truthy_eq(&Value::Tbb { bits, raw: b }))),
            BinOp::Ne => return Ok(Value::Bool(!Value::Tbb { bits, raw: a }.truthy_eq(&Value::Tbb { bits, raw: b }))),
            _ => return Err(ConstEvalError::TypeMismatch("tbb values only support arithmetic and ==/!=".to_string())),
        };
        Ok(Value::Tbb { bits, raw })
    }

    fn tbb_checked(&self, bits: u16, result: Option<i128>) -> TbbRaw {
        match result {
            None => TbbRaw::Err,
            Some(r) => {
                let (min, max) = Type::tbb_valid_range(bits);
                if r < min || r > max {
                    TbbRaw::Err
                } else {
                    TbbRaw::Valid(r)
                }
            }
        }
    }

    fn tbb_add(&self, bits: u16, a: TbbRaw, b: TbbRaw) -> TbbRaw {
        match (a, b) {
            (TbbRaw::Valid(x), TbbRaw::Valid(y)) => self.tbb_checked(bits, Some(x + y)),
            _ => TbbRaw::Err,
        }
    }

    fn tbb_sub(&self, bits: u16, a: TbbRaw, b: TbbRaw) -> TbbRaw {
        match (a, b) {
            (TbbRaw::Valid(x), TbbRaw::Valid(y)) => self.tbb_checked(bits, Some(x - y)),
            _ => TbbRaw::Err,
        }
    }

    fn tbb_mul(&self, bits: u16, a: TbbRaw, b: TbbRaw) -> TbbRaw {
        match (a, b) {
            (TbbRaw::Valid(x), TbbRaw::Valid(y)) => self.tbb_checked(bits, Some(x * y)),
            _ => TbbRaw::Err,
        }
    }

    fn tbb_div(&self, bits: u16, a: TbbRaw, b: TbbRaw) -> TbbRaw {
        match (a, b) {
            (TbbRaw::Valid(x), TbbRaw::Valid(y)) => self.tbb_checked(bits, if y == 0 { None } else { Some(x / y) }),
            _ => TbbRaw::Err,
        }
    }

    fn tbb_rem(&self, bits: u16, a: TbbRaw, b: TbbRaw) -> TbbRaw {
        match (a, b) {
            (TbbRaw::Valid(x), TbbRaw::Valid(y)) => self.tbb_checked(bits, if y == 0 { None } else { Some(x % y) }),
            _ => TbbRaw::Err,
        }
    }

    fn tbb_neg(&self, bits: u16, a: TbbRaw) -> TbbRaw {
        match a {
            TbbRaw::Valid(x) => self.tbb_checked(bits, Some(-x)),
            TbbRaw::Err => TbbRaw::Err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use aria_core::FileId;

    fn eval_main_return(src: &str) -> EResult<Value> {
        let mut parser = Parser::new(src, FileId(0), true);
        let program = parser.parse();
        let func = program.find_function("main").expect("main").clone();
        let mut evaluator = ConstEvaluator::new();
        for item in &program.items {
            if let Stmt::FuncDecl(f) = item {
                evaluator.register_function(f.clone());
            }
        }
        evaluator.call_function(&func.name, Vec::new())
    }

    #[test]
    fn arithmetic_folds_to_a_constant() {
        let result = eval_main_return("func:main = int32() { return (2 + 3) * 4; }").unwrap();
        assert_eq!(result, Value::Int(20));
    }

    #[test]
    fn tbb_overflow_produces_err() {
        let result = eval_main_return(
            "func:main = tbb8() { tbb8:a = 100; tbb8:b = 100; return a + b; }",
        )
        .unwrap();
        assert_eq!(result, Value::Tbb { bits: 8, raw: TbbRaw::Err });
    }

    #[test]
    fn tbb_err_is_sticky_through_further_arithmetic() {
        let result = eval_main_return(
            "func:main = tbb8() { tbb8:a = 120; tbb8:b = 120; tbb8:c = a + b; tbb8:one = 1; return c + one; }",
        )
        .unwrap();
        assert_eq!(result, Value::Tbb { bits: 8, raw: TbbRaw::Err });
    }

    #[test]
    fn tbb_division_by_zero_is_err_not_a_hard_error() {
        let result = eval_main_return(
            "func:main = tbb16() { tbb16:a = 10; tbb16:b = 0; return a / b; }",
        )
        .unwrap();
        assert_eq!(result, Value::Tbb { bits: 16, raw: TbbRaw::Err });
    }

    #[test]
    fn plain_integer_division_by_zero_is_a_hard_error() {
        let result = eval_main_return("func:main = int32() { int32:a = 10; int32:b = 0; return a / b; }");
        assert_eq!(result, Err(ConstEvalError::DivisionByZero));
    }

    #[test]
    fn repeated_calls_with_identical_arguments_are_memoized() {
        let src = "func:helper = int32(int32:n) { int32:a = n + 1; int32:b = a + 1; int32:c = b + 1; return c; } \
                   func:main = int32() { return helper(1) + helper(1) + helper(1); }";
        let mut evaluator = ConstEvaluator::with_limits(30, DEFAULT_STACK_DEPTH_LIMIT, DEFAULT_HEAP_SIZE_LIMIT);
        let mut parser = Parser::new(src, FileId(0), true);
        let program = parser.parse();
        for item in &program.items {
            if let Stmt::FuncDecl(f) = item {
                evaluator.register_function(f.clone());
            }
        }
        let result = evaluator.call_function("main", Vec::new());
        assert_eq!(result, Ok(Value::Int(12)));
    }

    #[test]
    fn instruction_limit_aborts_a_runaway_evaluation() {
        let src = "func:main = int32() { int32:x = 0; loop(0, 100000, 1) { x = x + 1; } return x; }";
        let mut parser = Parser::new(src, FileId(0), true);
        let program = parser.parse();
        let mut evaluator = ConstEvaluator::with_limits(50, DEFAULT_STACK_DEPTH_LIMIT, DEFAULT_HEAP_SIZE_LIMIT);
        for item in &program.items {
            if let Stmt::FuncDecl(f) = item {
                evaluator.register_function(f.clone());
            }
        }
        let result = evaluator.call_function("main", Vec::new());
        assert_eq!(result, Err(ConstEvalError::InstructionLimitExceeded));
    }

    #[test]
    fn unconditional_recursion_hits_the_stack_depth_limit() {
        let src = "func:spiral = int32(int32:n) { return spiral(n + 1); } func:main = int32() { return spiral(0); }";
        let mut parser = Parser::new(src, FileId(0), true);
        let program = parser.parse();
        let mut evaluator = ConstEvaluator::with_limits(DEFAULT_INSTRUCTION_LIMIT, 8, DEFAULT_HEAP_SIZE_LIMIT);
        for item in &program.items {
            if let Stmt::FuncDecl(f) = item {
                evaluator.register_function(f.clone());
            }
        }
        let result = evaluator.call_function("main", Vec::new());
        assert_eq!(result, Err(ConstEvalError::StackDepthExceeded));
    }

    #[test]
    fn wildx_allocation_is_forbidden() {
        let mut evaluator = ConstEvaluator::new();
        let result = evaluator.allocate(16, true, true);
        assert_eq!(result, Err(ConstEvalError::WildxForbidden));
    }

    #[test]
    fn allocation_byte_access_round_trips() {
        let mut evaluator = ConstEvaluator::new();
        let handle = match evaluator.allocate(4, true, false).unwrap() {
            Value::Pointer(h) => h,
            _ => panic!("expected a pointer"),
        };
        evaluator.write_byte(handle.alloc_id, 2, 42).unwrap();
        assert_eq!(evaluator.read_byte(handle.alloc_id, 2).unwrap(), 42);
    }

    #[test]
    fn reading_past_an_allocations_end_is_an_error() {
        let mut evaluator = ConstEvaluator::new();
        let handle = match evaluator.allocate(4, true, false).unwrap() {
            Value::Pointer(h) => h,
            _ => panic!("expected a pointer"),
        };
        let result = evaluator.read_byte(handle.alloc_id, 10);
        assert_eq!(result, Err(ConstEvalError::OutOfBounds { alloc_id: handle.alloc_id, offset: 10 }));
    }

    #[test]
    fn counted_loop_accumulates_a_sum() {
        let result = eval_main_return(
            "func:main = int32() { int32:total = 0; loop(0, 5, 1) { total = total + 1; } return total; }",
        )
        .unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn pre_increment_mutates_in_place_and_returns_the_new_value() {
        let result = eval_main_return("func:main = int32() { int32:x = 1; int32:y = ++x; return x + y; }").unwrap();
        assert_eq!(result, Value::Int(4));
    }
}

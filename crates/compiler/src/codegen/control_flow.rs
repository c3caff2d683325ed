//! Control-flow statement codegen (spec §3.2, §4.11).
//!
//! Every Aria control-flow form is a statement, not an expression, so none
//! of these need phi nodes to merge a value — only plain branches and
//! labels. `Expr::Ternary` is the one construct that does produce a value;
//! it lives in `expr.rs` and merges through a temporary `alloca` instead.

use super::state::LoopTarget;
use super::types::llvm_type;
use super::CodeGen;
use crate::ast::{PickArm, PickCase, Stmt};
use crate::codegen::error::CodeGenError;
use crate::types::Type;

impl CodeGen<'_> {
    pub(super) fn codegen_if(
        &mut self,
        cond: &crate::ast::Expr,
        then_branch: &[Stmt],
        else_branch: Option<&[Stmt]>,
    ) -> Result<(), CodeGenError> {
        let c = self.codegen_expr(cond)?;
        let then_label = self.new_label("if.then");
        let else_label = self.new_label("if.else");
        let end_label = self.new_label("if.end");
        let else_target = if else_branch.is_some() { else_label.clone() } else { end_label.clone() };
        self.emit(format!("  br i1 {}, label %{then_label}, label %{else_target}", c.reg));
        self.emit(format!("{then_label}:"));
        self.push_scope();
        self.codegen_block(then_branch)?;
        self.emit_block_exit_defers()?;
        self.pop_scope();
        self.emit(format!("  br label %{end_label}"));
        if let Some(else_body) = else_branch {
            self.emit(format!("{else_label}:"));
            self.push_scope();
            self.codegen_block(else_body)?;
            self.emit_block_exit_defers()?;
            self.pop_scope();
            self.emit(format!("  br label %{end_label}"));
        }
        self.emit(format!("{end_label}:"));
        Ok(())
    }

    pub(super) fn codegen_while(
        &mut self,
        cond: &crate::ast::Expr,
        body: &[Stmt],
        label: Option<&str>,
    ) -> Result<(), CodeGenError> {
        let head_label = self.new_label("while.head");
        let body_label = self.new_label("while.body");
        let end_label = self.new_label("while.end");
        self.emit(format!("  br label %{head_label}"));
        self.emit(format!("{head_label}:"));
        let c = self.codegen_expr(cond)?;
        self.emit(format!("  br i1 {}, label %{body_label}, label %{end_label}", c.reg));
        self.emit(format!("{body_label}:"));
        self.loops.push(LoopTarget {
            label: label.map(str::to_string),
            continue_label: head_label.clone(),
            break_label: end_label.clone(),
        });
        self.push_scope();
        self.codegen_block(body)?;
        self.emit_block_exit_defers()?;
        self.pop_scope();
        self.loops.pop();
        self.emit(format!("  br label %{head_label}"));
        self.emit(format!("{end_label}:"));
        Ok(())
    }

    /// Counted `loop(start, limit, step)` (spec §3.2): a classic three-clause
    /// counted loop, lowered with its own induction variable slot rather
    /// than reusing a user binding.
    pub(super) fn codegen_loop(
        &mut self,
        start: &crate::ast::Expr,
        limit: &crate::ast::Expr,
        step: &crate::ast::Expr,
        body: &[Stmt],
        label: Option<&str>,
    ) -> Result<(), CodeGenError> {
        let start_v = self.codegen_expr(start)?;
        let limit_v = self.codegen_expr(limit)?;
        let step_v = self.codegen_expr(step)?;
        let ty = start_v.ty.clone();
        let llty = llvm_type(&ty);
        let slot = self.new_reg();
        self.emit(format!("  {slot} = alloca {llty}"));
        self.emit(format!("  store {llty} {}, ptr {slot}", start_v.reg));

        let head_label = self.new_label("loop.head");
        let body_label = self.new_label("loop.body");
        let step_label = self.new_label("loop.step");
        let end_label = self.new_label("loop.end");
        self.emit(format!("  br label %{head_label}"));
        self.emit(format!("{head_label}:"));
        let current = self.new_reg();
        self.emit(format!("  {current} = load {llty}, ptr {slot}"));
        let cmp = self.new_reg();
        self.emit(format!("  {cmp} = icmp slt {llty} {current}, {}", limit_v.reg));
        self.emit(format!("  br i1 {cmp}, label %{body_label}, label %{end_label}"));
        self.emit(format!("{body_label}:"));
        self.loops.push(LoopTarget {
            label: label.map(str::to_string),
            continue_label: step_label.clone(),
            break_label: end_label.clone(),
        });
        self.push_scope();
        self.declare_local("__loop_var", slot.clone(), ty.clone());
        self.codegen_block(body)?;
        self.emit_block_exit_defers()?;
        self.pop_scope();
        self.loops.pop();
        self.emit(format!("  br label %{step_label}"));
        self.emit(format!("{step_label}:"));
        let before_step = self.new_reg();
        self.emit(format!("  {before_step} = load {llty}, ptr {slot}"));
        let advanced = self.new_reg();
        self.emit(format!("  {advanced} = add {llty} {before_step}, {}", step_v.reg));
        self.emit(format!("  store {llty} {advanced}, ptr {slot}"));
        self.emit(format!("  br label %{head_label}"));
        self.emit(format!("{end_label}:"));
        Ok(())
    }

    /// Counted `till(limit, step)`: same shape as `loop` with an implicit
    /// start of zero.
    pub(super) fn codegen_till(
        &mut self,
        limit: &crate::ast::Expr,
        step: &crate::ast::Expr,
        body: &[Stmt],
        label: Option<&str>,
    ) -> Result<(), CodeGenError> {
        let zero = crate::ast::Expr::Literal(crate::ast::Literal::Int(0), limit.pos());
        self.codegen_loop(&zero, limit, step, body, label)
    }

    /// Tri-state `when(cond) { body } then { .. } end { .. }` (spec §3.2,
    /// §4.11): `body` runs while `cond` holds. `then` and `end` are
    /// mutually exclusive: `then` runs iff the loop entered at least once
    /// and ran to normal completion; `end` runs iff it never entered, or a
    /// `break` cut it short.
    pub(super) fn codegen_when(
        &mut self,
        cond: &crate::ast::Expr,
        body: &[Stmt],
        then_branch: Option<&[Stmt]>,
        end_branch: Option<&[Stmt]>,
        label: Option<&str>,
    ) -> Result<(), CodeGenError> {
        let entered_slot = self.new_reg();
        self.emit(format!("  {entered_slot} = alloca i1"));
        self.emit(format!("  store i1 0, ptr {entered_slot}"));
        let broke_slot = self.new_reg();
        self.emit(format!("  {broke_slot} = alloca i1"));
        self.emit(format!("  store i1 0, ptr {broke_slot}"));

        let head_label = self.new_label("when.head");
        let body_label = self.new_label("when.body");
        let break_label = self.new_label("when.break");
        let decide_label = self.new_label("when.decide");
        let then_label = self.new_label("when.then");
        let end_label = self.new_label("when.end");
        let merge_label = self.new_label("when.merge");
        self.emit(format!("  br label %{head_label}"));
        self.emit(format!("{head_label}:"));
        let c = self.codegen_expr(cond)?;
        self.emit(format!("  br i1 {}, label %{body_label}, label %{decide_label}", c.reg));
        self.emit(format!("{body_label}:"));
        self.emit(format!("  store i1 1, ptr {entered_slot}"));
        self.loops.push(LoopTarget {
            label: label.map(str::to_string),
            continue_label: head_label.clone(),
            break_label: break_label.clone(),
        });
        self.push_scope();
        self.codegen_block(body)?;
        self.emit_block_exit_defers()?;
        self.pop_scope();
        self.loops.pop();
        self.emit(format!("  br label %{head_label}"));

        self.emit(format!("{break_label}:"));
        self.emit(format!("  store i1 1, ptr {broke_slot}"));
        self.emit(format!("  br label %{decide_label}"));

        self.emit(format!("{decide_label}:"));
        let entered = self.new_reg();
        self.emit(format!("  {entered} = load i1, ptr {entered_slot}"));
        let broke = self.new_reg();
        self.emit(format!("  {broke} = load i1, ptr {broke_slot}"));
        let not_broke = self.new_reg();
        self.emit(format!("  {not_broke} = xor i1 {broke}, 1"));
        let run_then = self.new_reg();
        self.emit(format!("  {run_then} = and i1 {entered}, {not_broke}"));
        self.emit(format!("  br i1 {run_then}, label %{then_label}, label %{end_label}"));

        self.emit(format!("{then_label}:"));
        if let Some(then_body) = then_branch {
            self.push_scope();
            self.codegen_block(then_body)?;
            self.emit_block_exit_defers()?;
            self.pop_scope();
        }
        self.emit(format!("  br label %{merge_label}"));

        self.emit(format!("{end_label}:"));
        if let Some(end_body) = end_branch {
            self.push_scope();
            self.codegen_block(end_body)?;
            self.emit_block_exit_defers()?;
            self.pop_scope();
        }
        self.emit(format!("  br label %{merge_label}"));

        self.emit(format!("{merge_label}:"));
        Ok(())
    }

    pub(super) fn codegen_for_in(
        &mut self,
        binding: &str,
        iterable: &crate::ast::Expr,
        body: &[Stmt],
        label: Option<&str>,
    ) -> Result<(), CodeGenError> {
        let iter_ty = self.infer_type(iterable);
        let Type::Array { element, size: Some(n) } = iter_ty else {
            return Err(CodeGenError::Logic(
                "for-in only supports fixed-size arrays; dynamically sized iterables have no bound this emitter can count against".into(),
            ));
        };
        let (base_ptr, _) = self.codegen_lvalue(iterable)?;
        let elem_llvm = llvm_type(&element);
        let array_llvm = format!("[{n} x {elem_llvm}]");

        let idx_slot = self.new_reg();
        self.emit(format!("  {idx_slot} = alloca i64"));
        self.emit(format!("  store i64 0, ptr {idx_slot}"));

        let head_label = self.new_label("forin.head");
        let body_label = self.new_label("forin.body");
        let step_label = self.new_label("forin.step");
        let end_label = self.new_label("forin.end");
        self.emit(format!("  br label %{head_label}"));
        self.emit(format!("{head_label}:"));
        let idx = self.new_reg();
        self.emit(format!("  {idx} = load i64, ptr {idx_slot}"));
        let cmp = self.new_reg();
        self.emit(format!("  {cmp} = icmp slt i64 {idx}, {n}"));
        self.emit(format!("  br i1 {cmp}, label %{body_label}, label %{end_label}"));
        self.emit(format!("{body_label}:"));
        let elem_ptr = self.new_reg();
        self.emit(format!("  {elem_ptr} = getelementptr {array_llvm}, ptr {base_ptr}, i64 0, i64 {idx}"));

        self.loops.push(LoopTarget {
            label: label.map(str::to_string),
            continue_label: step_label.clone(),
            break_label: end_label.clone(),
        });
        self.push_scope();
        self.declare_local(binding, elem_ptr, (*element).clone());
        self.codegen_block(body)?;
        self.emit_block_exit_defers()?;
        self.pop_scope();
        self.loops.pop();
        self.emit(format!("  br label %{step_label}"));
        self.emit(format!("{step_label}:"));
        let next = self.new_reg();
        self.emit(format!("  {next} = add i64 {idx}, 1"));
        self.emit(format!("  store i64 {next}, ptr {idx_slot}"));
        self.emit(format!("  br label %{head_label}"));
        self.emit(format!("{end_label}:"));
        Ok(())
    }

    /// `pick(selector) { cases }` (spec §4.9): the only pattern-matching
    /// construct in the language. Lowered as a linear chain of compares
    /// rather than a jump table, since cases can mix exact values, open
    /// ranges, and destructuring in one arm list.
    pub(super) fn codegen_pick(&mut self, selector: &crate::ast::Expr, arms: &[PickArm]) -> Result<(), CodeGenError> {
        let sel = self.codegen_expr(selector)?;
        let end_label = self.new_label("pick.end");

        let mut arm_labels: Vec<String> = (0..arms.len()).map(|_| self.new_label("pick.arm")).collect();
        arm_labels.push(end_label.clone());
        self.emit(format!("  br label %{}", arm_labels[0]));

        for (i, arm) in arms.iter().enumerate() {
            self.emit(format!("{}:", arm_labels[i]));
            self.codegen_pick_arm(&sel, arm, &arm_labels[i + 1], &end_label)?;
        }
        self.emit(format!("{end_label}:"));
        Ok(())
    }

    fn codegen_pick_arm(
        &mut self,
        sel: &super::expr::Val,
        arm: &PickArm,
        fallthrough_label: &str,
        end_label: &str,
    ) -> Result<(), CodeGenError> {
        let body_label = self.new_label("pick.body");

        for (i, case) in arm.cases.iter().enumerate() {
            let is_last_case = i + 1 == arm.cases.len();
            let next_miss = if is_last_case { fallthrough_label.to_string() } else { self.new_label("pick.miss") };
            self.codegen_pick_case(sel, case, &body_label, &next_miss)?;
            if !is_last_case {
                self.emit(format!("{next_miss}:"));
            }
        }

        self.emit(format!("{body_label}:"));
        self.push_scope();
        self.codegen_block(&arm.body)?;
        self.emit_block_exit_defers()?;
        self.pop_scope();
        match &arm.fallthrough {
            Some(_) => self.emit(format!("  br label %{fallthrough_label}")),
            None => self.emit(format!("  br label %{end_label}")),
        }
        Ok(())
    }

    fn codegen_pick_case(
        &mut self,
        sel: &super::expr::Val,
        case: &PickCase,
        body_label: &str,
        miss_label: &str,
    ) -> Result<(), CodeGenError> {
        let llty = llvm_type(&sel.ty);
        match case {
            PickCase::Wildcard => {
                self.emit(format!("  br label %{body_label}"));
            }
            PickCase::Unreachable(_) => {
                self.emit("  unreachable");
            }
            PickCase::Exact(e) => {
                let v = self.codegen_expr(e)?;
                let cmp = self.new_reg();
                self.emit(format!("  {cmp} = icmp eq {llty} {}, {}", sel.reg, v.reg));
                self.emit(format!("  br i1 {cmp}, label %{body_label}, label %{miss_label}"));
            }
            PickCase::Less(e) => self.emit_pick_cmp(sel, e, "slt", body_label, miss_label)?,
            PickCase::LessEq(e) => self.emit_pick_cmp(sel, e, "sle", body_label, miss_label)?,
            PickCase::Greater(e) => self.emit_pick_cmp(sel, e, "sgt", body_label, miss_label)?,
            PickCase::GreaterEq(e) => self.emit_pick_cmp(sel, e, "sge", body_label, miss_label)?,
            PickCase::RangeExclusive(lo, hi) => {
                let lo_v = self.codegen_expr(lo)?;
                let hi_v = self.codegen_expr(hi)?;
                let above = self.new_reg();
                self.emit(format!("  {above} = icmp sge {llty} {}, {}", sel.reg, lo_v.reg));
                let below = self.new_reg();
                self.emit(format!("  {below} = icmp slt {llty} {}, {}", sel.reg, hi_v.reg));
                let both = self.new_reg();
                self.emit(format!("  {both} = and i1 {above}, {below}"));
                self.emit(format!("  br i1 {both}, label %{body_label}, label %{miss_label}"));
            }
            PickCase::RangeInclusive(lo, hi) => {
                let lo_v = self.codegen_expr(lo)?;
                let hi_v = self.codegen_expr(hi)?;
                let above = self.new_reg();
                self.emit(format!("  {above} = icmp sge {llty} {}, {}", sel.reg, lo_v.reg));
                let below = self.new_reg();
                self.emit(format!("  {below} = icmp sle {llty} {}, {}", sel.reg, hi_v.reg));
                let both = self.new_reg();
                self.emit(format!("  {both} = and i1 {above}, {below}"));
                self.emit(format!("  br i1 {both}, label %{body_label}, label %{miss_label}"));
            }
            PickCase::Destructure(pattern) => self.codegen_pick_destructure(sel, pattern, body_label)?,
        }
        Ok(())
    }

    fn emit_pick_cmp(
        &mut self,
        sel: &super::expr::Val,
        rhs: &crate::ast::Expr,
        pred: &str,
        body_label: &str,
        miss_label: &str,
    ) -> Result<(), CodeGenError> {
        let llty = llvm_type(&sel.ty);
        let v = self.codegen_expr(rhs)?;
        let cmp = self.new_reg();
        self.emit(format!("  {cmp} = icmp {pred} {llty} {}, {}", sel.reg, v.reg));
        self.emit(format!("  br i1 {cmp}, label %{body_label}, label %{miss_label}"));
        Ok(())
    }

    /// Destructuring patterns always match structurally (spec §4.9); this
    /// emitter just binds the named fields/elements into the arm's scope
    /// before jumping to the body, since `push_scope`/`pop_scope` for the
    /// arm body happens in the caller.
    fn codegen_pick_destructure(
        &mut self,
        sel: &super::expr::Val,
        pattern: &crate::ast::DestructurePattern,
        body_label: &str,
    ) -> Result<(), CodeGenError> {
        match pattern {
            crate::ast::DestructurePattern::Array(names) => {
                if let Type::Array { element, size: Some(n) } = &sel.ty {
                    let elem_llvm = llvm_type(element);
                    let array_llvm = format!("[{n} x {elem_llvm}]");
                    for (i, name) in names.iter().enumerate() {
                        let ptr = self.new_reg();
                        self.emit(format!("  {ptr} = getelementptr {array_llvm}, ptr {}, i64 0, i64 {i}", sel.reg));
                        self.declare_local(name, ptr, (**element).clone());
                    }
                }
            }
            crate::ast::DestructurePattern::Object(pairs) => {
                if let Type::Struct { name: struct_name, fields } = &sel.ty {
                    for (field_name, binding_name) in pairs {
                        if let Some(idx) = fields.iter().position(|f| &f.name == field_name) {
                            let ptr = self.new_reg();
                            self.emit(format!(
                                "  {ptr} = getelementptr %struct.{struct_name}, ptr {}, i32 0, i32 {idx}",
                                sel.reg
                            ));
                            self.declare_local(binding_name, ptr, fields[idx].ty.clone());
                        }
                    }
                }
            }
        }
        self.emit(format!("  br label %{body_label}"));
        Ok(())
    }
}

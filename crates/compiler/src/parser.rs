//! Recursive-descent parser with precedence climbing (spec §4.3).
//!
//! Continues the teacher's hand-rolled `Parser { tokens, pos, .. }` shape
//! (`check`/`expect`/`advance` helpers) generalized from Seq's colon-word
//! grammar to Aria's C-like declaration grammar. Differs from the teacher
//! in one deliberate way (spec §9, REDESIGN FLAGS): the teacher's parser
//! aborts on the first `Err(String)`; this one recovers by emitting an
//! `Expr::Error`/`Stmt::Error` sentinel and a diagnostic, then
//! synchronizing to the next statement boundary, so a single parse can
//! produce multiple diagnostics (spec §4.3 "Error recovery").

use crate::ast::*;
use crate::lexer::{tokenize, Token, TokenKind};
use aria_core::{DiagnosticEngine, FileId, SourcePosition};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: FileId,
    strict: bool,
    diagnostics: DiagnosticEngine,
    next_lambda_id: usize,
}

type PResult<T> = Result<T, ()>;

impl Parser {
    pub fn new(source: &str, file: FileId, strict: bool) -> Self {
        Parser {
            tokens: tokenize(source, file),
            pos: 0,
            file,
            strict,
            diagnostics: DiagnosticEngine::new(),
            next_lambda_id: 0,
        }
    }

    pub fn into_diagnostics(self) -> DiagnosticEngine {
        self.diagnostics
    }

    fn here(&self) -> SourcePosition {
        self.tokens
            .get(self.pos)
            .map(|t| t.pos)
            .unwrap_or_else(|| SourcePosition::new(self.file, 0, 0))
    }

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if k == kw)
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), TokenKind::Op(o) if o == op)
    }

    fn is_op_at(&self, offset: usize, op: &str) -> bool {
        matches!(self.peek_at(offset), TokenKind::Op(o) if o == op)
    }

    fn is_punct(&self, c: char) -> bool {
        matches!(self.peek(), TokenKind::Punct(p) if *p == c)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.is_punct(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.diagnostics.error(self.here(), message);
    }

    /// Statement terminator. In strict mode (the default, spec §6.3) a
    /// missing `;` is an error; otherwise it's tolerated like the teacher's
    /// looser scripting-mode grammar.
    fn expect_semi(&mut self) {
        if self.eat_punct(';') {
            return;
        }
        if self.strict && !self.is_punct('}') && !self.is_eof() {
            self.error("expected ';' after statement");
        }
    }

    fn expect_punct(&mut self, c: char) -> PResult<()> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            self.error(format!("expected '{c}'"));
            Err(())
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.advance() {
            TokenKind::Ident(s) => Ok(s),
            other => {
                self.error(format!("expected identifier, found {other:?}"));
                Err(())
            }
        }
    }

    /// Synchronize to the next statement terminator or closing brace
    /// (spec §4.3 "Error recovery").
    fn synchronize(&mut self) {
        while !self.is_eof() {
            if self.is_punct(';') {
                self.advance();
                return;
            }
            if self.is_punct('}') {
                return;
            }
            self.advance();
        }
    }

    pub fn parse(&mut self) -> Program {
        let mut program = Program::new();
        while !self.is_eof() {
            if self.is_keyword("use") {
                match self.parse_use() {
                    Ok(u) => program.uses.push(u),
                    Err(()) => self.synchronize(),
                }
                continue;
            }
            match self.parse_top_level_item() {
                Ok(item) => program.items.push(item),
                Err(()) => {
                    self.synchronize();
                    program.items.push(Stmt::Error(self.here()));
                }
            }
        }
        program
    }

    fn parse_use(&mut self) -> PResult<UseDecl> {
        let pos = self.here();
        self.eat_keyword("use");
        let mut path = String::new();
        loop {
            path.push_str(&self.expect_ident()?);
            if self.eat_punct('.') {
                path.push('.');
                continue;
            }
            break;
        }
        let selector = if self.eat_punct('{') {
            let mut names = Vec::new();
            while !self.is_punct('}') {
                names.push(self.expect_ident()?);
                if !self.eat_punct(',') {
                    break;
                }
            }
            self.expect_punct('}')?;
            ImportSelector::Selective(names)
        } else if self.eat_op("*") {
            ImportSelector::Wildcard
        } else {
            ImportSelector::Full
        };
        let alias = if self.eat_keyword("as") {
            Some(self.expect_ident()?)
        } else {
            None
        };
        self.eat_punct(';');
        Ok(UseDecl {
            path,
            alias,
            selector,
            pos,
        })
    }

    fn parse_top_level_item(&mut self) -> PResult<Stmt> {
        self.parse_statement()
    }

    fn parse_generics(&mut self) -> PResult<Vec<GenericParam>> {
        if !self.eat_op("<") {
            return Ok(Vec::new());
        }
        let mut params = Vec::new();
        while !self.is_op(">") {
            let name = self.expect_ident()?;
            let mut bounds = Vec::new();
            if self.eat_punct(':') {
                bounds.push(self.expect_ident()?);
                while self.eat_op("+") {
                    bounds.push(self.expect_ident()?);
                }
            }
            params.push(GenericParam { name, bounds });
            if !self.eat_punct(',') {
                break;
            }
        }
        self.eat_op(">");
        Ok(params)
    }

    fn parse_type(&mut self) -> PResult<TypeExpr> {
        if self.eat_op("*") {
            return Ok(TypeExpr::AutoWrap(Box::new(self.parse_type()?)));
        }
        let name = self.expect_ident()?;
        let mut ty = if self.eat_op("<") {
            let mut args = Vec::new();
            while !self.is_op(">") {
                args.push(self.parse_type()?);
                if !self.eat_punct(',') {
                    break;
                }
            }
            self.eat_op(">");
            TypeExpr::Generic(name, args)
        } else {
            TypeExpr::Named(name)
        };
        while self.eat_punct('[') {
            let size = if let TokenKind::Int(n) = self.peek().clone() {
                self.advance();
                Some(n as u64)
            } else {
                None
            };
            self.expect_punct(']')?;
            ty = TypeExpr::Array(Box::new(ty), size);
        }
        if self.eat_op("$") {
            ty = TypeExpr::Pointer(Box::new(ty), StorageClass::Gc);
        }
        Ok(ty)
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct('(')?;
        let mut params = Vec::new();
        while !self.is_punct(')') {
            let ty = self.parse_type()?;
            self.expect_punct(':')?;
            let name = self.expect_ident()?;
            let default = if self.eat_op("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param { ty, name, default });
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;
        Ok(params)
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct('{')?;
        let mut stmts = Vec::new();
        while !self.is_punct('}') && !self.is_eof() {
            match self.parse_statement() {
                Ok(s) => stmts.push(s),
                Err(()) => {
                    self.synchronize();
                    stmts.push(Stmt::Error(self.here()));
                }
            }
        }
        self.expect_punct('}')?;
        Ok(stmts)
    }

    fn parse_storage_class(&mut self) -> StorageClass {
        if self.eat_keyword("stack") {
            StorageClass::Stack
        } else if self.eat_keyword("wild") {
            StorageClass::Wild
        } else if self.eat_keyword("wildx") {
            StorageClass::Wildx
        } else {
            self.eat_keyword("gc");
            StorageClass::Gc
        }
    }

    fn looks_like_var_decl(&self) -> bool {
        // `Type : name` — scan ahead past a simple type for the disambiguating colon.
        let mut i = self.pos;
        if matches!(self.peek(), TokenKind::Keyword(k) if k == "const") {
            i += 1;
        }
        if matches!(
            self.tokens.get(i).map(|t| &t.kind),
            Some(TokenKind::Keyword(k)) if ["stack", "gc", "wild", "wildx"].contains(&k.as_str())
        ) {
            i += 1;
        }
        matches!(self.tokens.get(i).map(|t| &t.kind), Some(TokenKind::Ident(_)))
            && matches!(self.tokens.get(i + 1).map(|t| &t.kind), Some(TokenKind::Punct(':')))
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        if self.is_keyword("pub") || self.is_keyword("async") || self.is_keyword("func") {
            return self.parse_func_decl().map(Stmt::FuncDecl);
        }
        if self.is_keyword("struct") || (self.is_keyword("const") && matches!(self.peek_at(3), TokenKind::Keyword(k) if k == "struct")) {
            return self.parse_struct_decl().map(Stmt::StructDecl);
        }
        // `Identifier = struct { ... }` form
        if matches!(self.peek(), TokenKind::Ident(_)) && matches!(self.peek_at(1), TokenKind::Op(o) if o == "=") && matches!(self.peek_at(2), TokenKind::Keyword(k) if k == "struct") {
            return self.parse_struct_decl().map(Stmt::StructDecl);
        }
        if self.is_keyword("trait") {
            return self.parse_trait_decl().map(Stmt::TraitDecl);
        }
        if self.is_keyword("impl") {
            return self.parse_impl_decl().map(Stmt::ImplDecl);
        }
        if self.is_keyword("const") || self.looks_like_var_decl() {
            return self.parse_var_decl().map(Stmt::VarDecl);
        }
        if self.eat_keyword("return") {
            let value = if self.is_punct(';') { None } else { Some(self.parse_expr()?) };
            self.expect_semi();
            return Ok(Stmt::Return(value, pos));
        }
        if self.eat_keyword("break") {
            let label = if let TokenKind::Ident(_) = self.peek() { Some(self.expect_ident()?) } else { None };
            self.expect_semi();
            return Ok(Stmt::Break(label, pos));
        }
        if self.eat_keyword("continue") {
            let label = if let TokenKind::Ident(_) = self.peek() { Some(self.expect_ident()?) } else { None };
            self.expect_semi();
            return Ok(Stmt::Continue(label, pos));
        }
        if self.eat_keyword("defer") {
            let inner = self.parse_statement()?;
            return Ok(Stmt::Defer(Box::new(inner), pos));
        }
        if self.is_keyword("if") {
            return self.parse_if();
        }
        if self.is_keyword("while") {
            return self.parse_while();
        }
        if self.is_keyword("for") {
            return self.parse_for_in();
        }
        if self.is_keyword("loop") {
            return self.parse_loop();
        }
        if self.is_keyword("till") {
            return self.parse_till();
        }
        if self.is_keyword("when") {
            return self.parse_when();
        }
        if self.is_keyword("pick") {
            return self.parse_pick();
        }
        if self.is_punct('{') {
            let body = self.parse_block()?;
            return Ok(Stmt::Block(body, pos));
        }
        let expr = self.parse_expr()?;
        self.expect_semi();
        Ok(Stmt::Expr(expr))
    }

    fn parse_var_decl(&mut self) -> PResult<VarDecl> {
        let pos = self.here();
        let is_const = self.eat_keyword("const");
        let storage = self.parse_storage_class();
        let ty = self.parse_type()?;
        self.expect_punct(':')?;
        let name = self.expect_ident()?;
        let generics = self.parse_generics()?;
        let init = if self.eat_op("=") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        if (is_const || matches!(storage, StorageClass::Wild)) && init.is_none() {
            self.error(format!("'{name}' requires an initializer ('wild'/'const' bindings must be initialized)"));
        }
        self.expect_semi();
        Ok(VarDecl {
            is_const,
            storage,
            ty,
            name,
            generics,
            init,
            pos,
        })
    }

    fn parse_func_decl(&mut self) -> PResult<FuncDecl> {
        let pos = self.here();
        let is_pub = self.eat_keyword("pub");
        let is_async = self.eat_keyword("async");
        self.eat_keyword("func");
        let generics = self.parse_generics()?;
        self.expect_punct(':')?;
        let name = self.expect_ident()?;
        self.eat_op("=");
        let return_ty = self.parse_type()?;
        let auto_wrap = matches!(return_ty, TypeExpr::AutoWrap(_));
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        self.eat_punct(';');
        Ok(FuncDecl {
            is_pub,
            is_async,
            is_extern: false,
            auto_wrap,
            name,
            generics,
            return_ty,
            params,
            body,
            pos,
        })
    }

    fn parse_struct_decl(&mut self) -> PResult<StructDecl> {
        let pos = self.here();
        let is_const = self.eat_keyword("const");
        let name = self.expect_ident()?;
        self.eat_op("=");
        self.eat_keyword("struct");
        let generics = self.parse_generics()?;
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.is_punct('}') && !self.is_eof() {
            if self.is_keyword("func") || self.is_keyword("pub") || self.is_keyword("async") {
                methods.push(self.parse_func_decl()?);
                continue;
            }
            let field_name = self.expect_ident()?;
            self.expect_punct(':')?;
            let ty = self.parse_type()?;
            fields.push(StructField { name: field_name, ty });
            self.eat_punct(';');
            self.eat_punct(',');
        }
        self.expect_punct('}')?;
        self.eat_punct(';');
        Ok(StructDecl {
            is_const,
            name,
            generics,
            fields,
            methods,
            pos,
        })
    }

    fn parse_trait_decl(&mut self) -> PResult<TraitDecl> {
        let pos = self.here();
        self.eat_keyword("trait");
        let name = self.expect_ident()?;
        let mut super_traits = Vec::new();
        if self.eat_punct(':') {
            super_traits.push(self.expect_ident()?);
            while self.eat_punct(',') {
                super_traits.push(self.expect_ident()?);
            }
        }
        self.expect_punct('{')?;
        let mut methods = Vec::new();
        while !self.is_punct('}') && !self.is_eof() {
            let sig_pos = self.here();
            self.eat_keyword("func");
            self.expect_punct(':')?;
            let name = self.expect_ident()?;
            self.eat_op("=");
            let return_ty = self.parse_type()?;
            let params = self.parse_params()?;
            self.eat_punct(';');
            methods.push(MethodSig {
                name,
                params,
                return_ty,
                pos: sig_pos,
            });
        }
        self.expect_punct('}')?;
        self.eat_punct(';');
        Ok(TraitDecl {
            name,
            super_traits,
            methods,
            pos,
        })
    }

    fn parse_impl_decl(&mut self) -> PResult<ImplDecl> {
        let pos = self.here();
        self.eat_keyword("impl");
        let trait_name = self.expect_ident()?;
        self.eat_keyword("for");
        let type_name = self.expect_ident()?;
        self.expect_punct('{')?;
        let mut methods = Vec::new();
        while !self.is_punct('}') && !self.is_eof() {
            methods.push(self.parse_func_decl()?);
        }
        self.expect_punct('}')?;
        self.eat_punct(';');
        Ok(ImplDecl {
            trait_name,
            type_name,
            methods,
            pos,
        })
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        self.eat_keyword("if");
        self.expect_punct('(')?;
        let cond = self.parse_expr()?;
        self.expect_punct(')')?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.eat_keyword("else") {
            if self.is_keyword("if") {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
            pos,
        })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        self.eat_keyword("while");
        self.expect_punct('(')?;
        let cond = self.parse_expr()?;
        self.expect_punct(')')?;
        let body = self.parse_block()?;
        Ok(Stmt::While {
            cond,
            body,
            label: None,
            pos,
        })
    }

    fn parse_for_in(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        self.eat_keyword("for");
        let binding = self.expect_ident()?;
        self.eat_keyword("in");
        let iterable = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::ForIn {
            binding,
            iterable,
            body,
            label: None,
            pos,
        })
    }

    fn parse_loop(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        self.eat_keyword("loop");
        self.expect_punct('(')?;
        let start = self.parse_expr()?;
        self.expect_punct(',')?;
        let limit = self.parse_expr()?;
        self.expect_punct(',')?;
        let step = self.parse_expr()?;
        self.expect_punct(')')?;
        let body = self.parse_block()?;
        Ok(Stmt::Loop {
            start,
            limit,
            step,
            body,
            label: None,
            pos,
        })
    }

    fn parse_till(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        self.eat_keyword("till");
        self.expect_punct('(')?;
        let limit = self.parse_expr()?;
        self.expect_punct(',')?;
        let step = self.parse_expr()?;
        self.expect_punct(')')?;
        let body = self.parse_block()?;
        Ok(Stmt::Till {
            limit,
            step,
            body,
            label: None,
            pos,
        })
    }

    fn parse_when(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        self.eat_keyword("when");
        self.expect_punct('(')?;
        let cond = self.parse_expr()?;
        self.expect_punct(')')?;
        let body = self.parse_block()?;
        let then_branch = if self.eat_keyword("then") {
            Some(self.parse_block()?)
        } else {
            None
        };
        let end_branch = if self.eat_keyword("end") {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Stmt::When {
            cond,
            body,
            then_branch,
            end_branch,
            label: None,
            pos,
        })
    }

    fn parse_pick(&mut self) -> PResult<Stmt> {
        let pos = self.here();
        self.eat_keyword("pick");
        self.expect_punct('(')?;
        let selector = self.parse_expr()?;
        self.expect_punct(')')?;
        self.expect_punct('{')?;
        let mut arms = Vec::new();
        while !self.is_punct('}') && !self.is_eof() {
            let mut cases = vec![self.parse_pick_case()?];
            while self.eat_punct(',') && !self.is_punct(':') {
                cases.push(self.parse_pick_case()?);
            }
            self.expect_punct(':')?;
            let body = self.parse_block()?;
            let fallthrough = if self.eat_keyword("fall") {
                self.expect_punct('(')?;
                let label = self.expect_ident()?;
                self.expect_punct(')')?;
                Some(label)
            } else {
                None
            };
            arms.push(PickArm {
                cases,
                body,
                fallthrough,
            });
        }
        self.expect_punct('}')?;
        Ok(Stmt::Pick { selector, arms, pos })
    }

    fn parse_pick_case(&mut self) -> PResult<PickCase> {
        if self.is_op("*") {
            self.advance();
            return Ok(PickCase::Wildcard);
        }
        if self.is_punct('(') && self.is_op_at(1, "*") && matches!(self.peek_at(2), TokenKind::Punct(')')) {
            self.advance();
            self.advance();
            self.advance();
            return Ok(PickCase::Wildcard);
        }
        if matches!(self.peek(), TokenKind::Ident(_)) && matches!(self.peek_at(1), TokenKind::Punct(':')) {
            let label = self.expect_ident()?;
            self.expect_punct(':')?;
            self.expect_punct('(')?;
            self.eat_op("!");
            self.expect_punct(')')?;
            return Ok(PickCase::Unreachable(label));
        }
        if self.eat_op("<=") {
            return Ok(PickCase::LessEq(self.parse_expr()?));
        }
        if self.eat_op(">=") {
            return Ok(PickCase::GreaterEq(self.parse_expr()?));
        }
        if self.eat_op("<") {
            return Ok(PickCase::Less(self.parse_expr()?));
        }
        if self.eat_op(">") {
            return Ok(PickCase::Greater(self.parse_expr()?));
        }
        let first = self.parse_expr()?;
        if self.eat_op("...") {
            return Ok(PickCase::RangeInclusive(first, self.parse_expr()?));
        }
        if self.eat_op("..") {
            return Ok(PickCase::RangeExclusive(first, self.parse_expr()?));
        }
        Ok(PickCase::Exact(first))
    }

    // --- Expression parsing: precedence climbing (spec §6.1) ---

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let pos = self.here();
        let lhs = self.parse_ternary()?;
        let compound = ["+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>="];
        if self.eat_op("=") {
            let value = self.parse_assignment()?;
            return Ok(Expr::Assign {
                target: Box::new(lhs),
                op: None,
                value: Box::new(value),
                pos,
            });
        }
        for op in compound {
            if self.is_op(op) {
                self.advance();
                let value = self.parse_assignment()?;
                let binop = compound_binop(op);
                return Ok(Expr::Assign {
                    target: Box::new(lhs),
                    op: Some(binop),
                    value: Box::new(value),
                    pos,
                });
            }
        }
        Ok(lhs)
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let pos = self.here();
        let cond = self.parse_null_coalesce()?;
        if self.eat_keyword("is") {
            let then_branch = self.parse_expr()?;
            self.expect_punct(':')?;
            let else_branch = self.parse_ternary()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
                pos,
            });
        }
        if self.eat_op("?") && !self.is_punct(';') {
            // ternary `cond ? then : else` alternate surface form
            let then_branch = self.parse_expr()?;
            self.expect_punct(':')?;
            let else_branch = self.parse_ternary()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
                pos,
            });
        }
        Ok(cond)
    }

    fn parse_null_coalesce(&mut self) -> PResult<Expr> {
        let pos = self.here();
        let mut lhs = self.parse_pipeline()?;
        while self.eat_op("??") {
            let rhs = self.parse_pipeline()?;
            lhs = Expr::Binary {
                op: BinOp::NullCoalesce,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                pos,
            };
        }
        Ok(lhs)
    }

    fn parse_pipeline(&mut self) -> PResult<Expr> {
        let pos = self.here();
        let mut lhs = self.parse_logical_or()?;
        loop {
            if self.eat_op("|>") {
                let rhs = self.parse_logical_or()?;
                lhs = Expr::Binary {
                    op: BinOp::PipeInto,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    pos,
                };
            } else if self.eat_op("<|") {
                let rhs = self.parse_logical_or()?;
                lhs = Expr::Binary {
                    op: BinOp::PipeFrom,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    pos,
                };
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> PResult<Expr> {
        self.parse_binary(&[("||", BinOp::Or)], Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self) -> PResult<Expr> {
        self.parse_binary(&[("&&", BinOp::And)], Self::parse_bit_or)
    }

    fn parse_bit_or(&mut self) -> PResult<Expr> {
        self.parse_binary(&[("|", BinOp::BitOr)], Self::parse_bit_xor)
    }

    fn parse_bit_xor(&mut self) -> PResult<Expr> {
        self.parse_binary(&[("^", BinOp::BitXor)], Self::parse_bit_and)
    }

    fn parse_bit_and(&mut self) -> PResult<Expr> {
        self.parse_binary(&[("&", BinOp::BitAnd)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        self.parse_binary(&[("==", BinOp::Eq), ("!=", BinOp::Ne)], Self::parse_ordering)
    }

    fn parse_ordering(&mut self) -> PResult<Expr> {
        self.parse_binary(
            &[("<=", BinOp::Le), (">=", BinOp::Ge), ("<=>", BinOp::Spaceship), ("<", BinOp::Lt), (">", BinOp::Gt)],
            Self::parse_shift,
        )
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.parse_binary(&[("<<", BinOp::Shl), (">>", BinOp::Shr)], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.parse_binary(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.parse_binary(&[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)], Self::parse_unary)
    }

    /// Generic helper shared by every binary precedence level: try each
    /// `(operator, BinOp)` pair, left-associatively.
    fn parse_binary(
        &mut self,
        ops: &[(&str, BinOp)],
        mut next: impl FnMut(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let pos = self.here();
        let mut lhs = next(self)?;
        'outer: loop {
            for (text, op) in ops {
                if self.is_op(text) {
                    self.advance();
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        pos,
                    };
                    continue 'outer;
                }
            }
            break;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let pos = self.here();
        let op = if self.eat_op("-") {
            Some(UnOp::Neg)
        } else if self.eat_op("!") {
            Some(UnOp::Not)
        } else if self.eat_op("~") {
            Some(UnOp::BitNot)
        } else if self.eat_op("@") {
            Some(UnOp::AddressOf)
        } else if self.eat_op("#") {
            Some(UnOp::Pin)
        } else if self.eat_op("$") {
            Some(UnOp::Iterate)
        } else if self.eat_op("++") {
            Some(UnOp::PreInc)
        } else if self.eat_op("--") {
            Some(UnOp::PreDec)
        } else {
            None
        };
        if let Some(op) = op {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                pos,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let pos = self.here();
            if self.eat_punct('(') {
                let mut args = Vec::new();
                while !self.is_punct(')') {
                    args.push(self.parse_expr()?);
                    if !self.eat_punct(',') {
                        break;
                    }
                }
                self.expect_punct(')')?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    type_args: Vec::new(),
                    args,
                    pos,
                };
            } else if self.eat_punct('[') {
                let index = self.parse_expr()?;
                self.expect_punct(']')?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                    pos,
                };
            } else if self.eat_op("?.") {
                let name = self.expect_ident()?;
                expr = Expr::Member {
                    base: Box::new(expr),
                    name,
                    arrow: false,
                    safe_navigation: true,
                    pos,
                };
            } else if self.eat_op("->") {
                let name = self.expect_ident()?;
                expr = Expr::Member {
                    base: Box::new(expr),
                    name,
                    arrow: true,
                    safe_navigation: false,
                    pos,
                };
            } else if self.eat_punct('.') {
                let name = self.expect_ident()?;
                expr = Expr::Member {
                    base: Box::new(expr),
                    name,
                    arrow: false,
                    safe_navigation: false,
                    pos,
                };
            } else if self.eat_op("++") {
                expr = Expr::Unary {
                    op: UnOp::PostInc,
                    operand: Box::new(expr),
                    pos,
                };
            } else if self.eat_op("--") {
                expr = Expr::Unary {
                    op: UnOp::PostDec,
                    operand: Box::new(expr),
                    pos,
                };
            } else if self.eat_op("?") {
                let default = if self.eat_op(":") {
                    Some(Box::new(self.parse_unary()?))
                } else {
                    None
                };
                expr = Expr::Unwrap {
                    value: Box::new(expr),
                    default,
                    pos,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let pos = self.here();
        match self.peek().clone() {
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(n), pos))
            }
            TokenKind::Float(f) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(f), pos))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(s), pos))
            }
            TokenKind::TemplateStr(raw) => {
                self.advance();
                Ok(Expr::TemplateString(parse_template_parts(&raw), pos))
            }
            TokenKind::Char(c) => {
                self.advance();
                Ok(Expr::Literal(Literal::Char(c), pos))
            }
            TokenKind::Keyword(kw) if kw == "true" => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true), pos))
            }
            TokenKind::Keyword(kw) if kw == "false" => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false), pos))
            }
            TokenKind::Keyword(kw) if kw == "null" => {
                self.advance();
                Ok(Expr::Literal(Literal::Null, pos))
            }
            TokenKind::Keyword(kw) if kw == "await" => {
                self.advance();
                let inner = self.parse_unary()?;
                Ok(Expr::Await(Box::new(inner), pos))
            }
            TokenKind::Keyword(kw) if kw == "spawn" => {
                self.advance();
                let inner = self.parse_unary()?;
                Ok(Expr::Spawn(Box::new(inner), pos))
            }
            TokenKind::Keyword(kw) if kw == "func" => {
                self.advance();
                let return_ty = self.parse_type()?;
                let params = self.parse_params()?;
                let body = self.parse_block()?;
                let id = self.next_lambda_id;
                self.next_lambda_id += 1;
                Ok(Expr::Lambda(
                    Box::new(Lambda {
                        return_ty,
                        params,
                        body,
                        captures: Vec::new(),
                        requires_environment: false,
                        id,
                    }),
                    pos,
                ))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.is_punct('(') && is_vector_constructor(&name) {
                    self.advance();
                    let mut args = Vec::new();
                    while !self.is_punct(')') {
                        args.push(self.parse_expr()?);
                        if !self.eat_punct(',') {
                            break;
                        }
                    }
                    self.expect_punct(')')?;
                    return Ok(Expr::VectorLiteral {
                        constructor: name,
                        args,
                        pos,
                    });
                }
                Ok(Expr::Identifier(name, pos))
            }
            TokenKind::Punct('(') => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_punct(')')?;
                Ok(inner)
            }
            TokenKind::Punct('[') => {
                self.advance();
                let mut elements = Vec::new();
                while !self.is_punct(']') {
                    elements.push(self.parse_expr()?);
                    if !self.eat_punct(',') {
                        break;
                    }
                }
                self.expect_punct(']')?;
                Ok(Expr::ArrayLiteral(elements, pos))
            }
            TokenKind::Punct('{') => {
                self.advance();
                let mut fields = Vec::new();
                while !self.is_punct('}') {
                    let name = self.expect_ident()?;
                    self.expect_punct(':')?;
                    let value = self.parse_expr()?;
                    fields.push((name, value));
                    if !self.eat_punct(',') {
                        break;
                    }
                }
                self.expect_punct('}')?;
                Ok(Expr::ObjectLiteral(fields, pos))
            }
            other => {
                self.error(format!("unexpected token in expression: {other:?}"));
                self.advance();
                Ok(Expr::Error(pos))
            }
        }
    }
}

fn compound_binop(op: &str) -> BinOp {
    match op {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mul,
        "/=" => BinOp::Div,
        "%=" => BinOp::Rem,
        "&=" => BinOp::BitAnd,
        "|=" => BinOp::BitOr,
        "^=" => BinOp::BitXor,
        "<<=" => BinOp::Shl,
        _ => BinOp::Shr,
    }
}

fn is_vector_constructor(name: &str) -> bool {
    name.starts_with("vec") || name.starts_with("mat") || name.starts_with("dmat")
}

fn parse_template_parts(raw: &str) -> Vec<TemplatePart> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if (chars[i] == '$' || chars[i] == '&') && chars.get(i + 1) == Some(&'{') {
            let mut depth = 1;
            let start = i + 2;
            let mut j = start;
            while j < chars.len() && depth > 0 {
                match chars[j] {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                j += 1;
            }
            let inner: String = chars[start..j.saturating_sub(1)].iter().collect();
            let mut sub = Parser::new(&inner, FileId(0), true);
            let expr = sub.parse_expr().unwrap_or(Expr::Error(SourcePosition::new(FileId(0), 0, 0)));
            parts.push(TemplatePart {
                literal: std::mem::take(&mut literal),
                expr: Some(expr),
            });
            i = j;
        } else {
            literal.push(chars[i]);
            i += 1;
        }
    }
    parts.push(TemplatePart { literal, expr: None });
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let mut p = Parser::new(src, FileId(0), true);
        let program = p.parse();
        assert_eq!(p.into_diagnostics().error_count(), 0, "source: {src}");
        program
    }

    #[test]
    fn parses_hello_world() {
        let program = parse_ok("func:main = int32() { return 0; }");
        let f = program.find_function("main").expect("main function");
        assert_eq!(f.return_ty, TypeExpr::Named("int32".to_string()));
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn precedence_climbing_orders_mul_before_add() {
        let mut p = Parser::new("1 + 2 * 3", FileId(0), true);
        let expr = p.parse_expr().unwrap();
        match expr {
            Expr::Binary { op: BinOp::Add, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("expected Add at the top, got {other:?}"),
        }
    }

    #[test]
    fn recovers_from_parse_error_and_keeps_parsing() {
        let mut p = Parser::new("func:bad = ???", FileId(0), true);
        let program = p.parse();
        assert!(p.into_diagnostics().has_errors());
        assert!(!program.items.is_empty());
    }

    #[test]
    fn parses_pick_statement_with_ranges_and_wildcard() {
        let program = parse_ok(
            "func:classify = int32(int32:n) { pick(n) { 0: { return 0; } 1..10: { return 1; } (*): { return 2; } } }",
        );
        assert!(program.find_function("classify").is_some());
    }

    #[test]
    fn auto_wrap_return_type_is_detected() {
        let program = parse_ok("func:safe_div = *int32(int32:a, int32:b) { return a; }");
        let f = program.find_function("safe_div").unwrap();
        assert!(f.auto_wrap);
    }

    #[test]
    fn parses_anonymous_lambda_expression() {
        let program = parse_ok(
            "func:main = int32() { gc int32:callback = func int32(int32:x) { return x; }; return 0; }",
        );
        let main = program.find_function("main").unwrap();
        let decl = main
            .body
            .iter()
            .find_map(|s| match s {
                Stmt::VarDecl(v) => Some(v),
                _ => None,
            })
            .expect("callback var decl");
        match decl.init.as_ref().expect("lambda initializer") {
            Expr::Lambda(lambda, _) => assert_eq!(lambda.params.len(), 1),
            other => panic!("expected lambda, got {other:?}"),
        }
    }
}

//! Recursive-descent parser and semantic analyzer.
//!
//! This is the driver of the whole pipeline: it pulls tokens from the
//! scanner, consults and mutates the identifier table, and emits code, all
//! in one top-to-bottom pass over the source. There is no AST.
//!
//! Failure policy: a syntax mismatch returns `Err(SyntaxAbort)`, which
//! unwinds to the nearest statement or declaration boundary where the
//! caller resynchronizes the token stream and resumes. Name, type, and
//! structural problems are recorded immediately and parsing continues
//! with a best-effort fallback, so independent later errors still surface
//! in the same pass.

use crate::diagnostic::{ErrorCategory, Reporter};
use crate::emitter::{BinOp, CodeEmitter};
use crate::lexer::{Scanner, Token, TokenKind};
use crate::symbols::{
    DataType, Identifier, NameError, ParamDirection, Parameter, Region, Storage, SymbolTable,
};

/// Marker for a syntax failure that unwinds to a recovery point.
#[derive(Debug)]
pub struct SyntaxAbort;

type PResult<T> = Result<T, SyntaxAbort>;

/// Static type and value register of a parsed expression.
#[derive(Debug, Clone, Copy)]
struct ExprInfo {
    ty: DataType,
    reg: u32,
}

pub struct Parser<'a> {
    scanner: Scanner,
    table: SymbolTable,
    emit: &'a mut CodeEmitter,
    diag: &'a mut Reporter,
    current: Token,
}

impl<'a> Parser<'a> {
    pub fn new(
        mut scanner: Scanner,
        table: SymbolTable,
        emit: &'a mut CodeEmitter,
        diag: &'a mut Reporter,
    ) -> Self {
        let current = scanner.next_token(diag);
        Parser {
            scanner,
            table,
            emit,
            diag,
            current,
        }
    }

    /// Parse and compile the whole source.
    pub fn run(&mut self) {
        let finished = self.program().is_ok();
        if finished && self.current.kind != TokenKind::Eof {
            self.diag
                .warning(self.current.line, "text after 'end program' is ignored");
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn advance(&mut self) -> Token {
        let next = self.scanner.next_token(self.diag);
        std::mem::replace(&mut self.current, next)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn accept(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.syntax_error(format!(
                "expected {what}, found {}",
                self.current.describe()
            )))
        }
    }

    /// Discard tokens up to the next statement separator. The separator
    /// itself is consumed; `end` and end-of-file are left in place so the
    /// enclosing construct can close normally.
    fn resynchronize(&mut self) {
        loop {
            match self.current.kind {
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::End | TokenKind::Eof => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Recovery in declaration position additionally stops at `begin`,
    /// so a declaration missing its `;` never swallows the body keyword.
    fn resynchronize_declaration(&mut self) {
        loop {
            match self.current.kind {
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::Begin | TokenKind::End | TokenKind::Eof => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Diagnostic helpers
    // ------------------------------------------------------------------

    fn syntax_error(&mut self, message: String) -> SyntaxAbort {
        self.diag
            .error(ErrorCategory::Syntax, self.current.line, message);
        SyntaxAbort
    }

    fn name_error(&mut self, line: u32, error: NameError) {
        self.diag.error(ErrorCategory::Name, line, error.message());
    }

    fn type_error(&mut self, line: u32, message: impl Into<String>) {
        self.diag.error(ErrorCategory::Type, line, message);
    }

    fn structural_error(&mut self, line: u32, message: impl Into<String>) {
        self.diag.error(ErrorCategory::Structural, line, message);
    }

    // ------------------------------------------------------------------
    // Program and declarations
    // ------------------------------------------------------------------

    fn program(&mut self) -> PResult<()> {
        self.expect(TokenKind::Program, "'program'")?;
        let name_tok = self.expect(TokenKind::Identifier, "program name")?;

        let entry = self.emit.new_label();
        self.emit.set_entry(entry);
        let program_id = Identifier {
            name: name_tok.text.clone(),
            ty: DataType::Program,
            storage: Storage::Label(entry),
            params: Some(Vec::new()),
        };
        if let Err(error) = self.table.add(program_id.clone(), false) {
            self.name_error(name_tok.line, error);
        }
        self.table.push_scope(program_id);
        self.emit.begin_frame();

        self.expect(TokenKind::Is, "'is'")?;
        self.declarations();
        self.expect(TokenKind::Begin, "'begin'")?;
        self.emit.emit_frame_entry(entry, &name_tok.text);
        self.statement_list();
        self.expect(TokenKind::End, "'end'")?;
        self.expect(TokenKind::Program, "'program' after 'end'")?;
        self.emit.emit_program_exit();

        self.emit.end_frame();
        self.table.pop_scope();
        Ok(())
    }

    fn declarations(&mut self) {
        while !matches!(
            self.current.kind,
            TokenKind::Begin | TokenKind::End | TokenKind::Eof
        ) {
            if self.declaration().is_err() {
                self.resynchronize_declaration();
            }
        }
    }

    fn declaration(&mut self) -> PResult<()> {
        let is_global = self.accept(TokenKind::Global).is_some();
        if self.check(TokenKind::Procedure) {
            self.procedure_declaration(is_global)?;
        } else {
            self.variable_declaration(is_global)?;
        }
        self.expect(TokenKind::Semicolon, "';' after declaration")?;
        Ok(())
    }

    /// `type name ['[' bound ']']`, shared by variable declarations and
    /// parameters. Returns (name, type, bound, line).
    fn variable_signature(&mut self) -> PResult<(String, DataType, Option<u32>, u32)> {
        let ty = self.type_mark()?;
        let name_tok = self.expect(TokenKind::Identifier, "a name")?;
        let bound = if self.accept(TokenKind::LBracket).is_some() {
            let bound_tok = self.expect(TokenKind::IntLiteral, "an array bound")?;
            self.expect(TokenKind::RBracket, "']'")?;
            let value: u32 = bound_tok.text.parse().unwrap_or(0);
            if value == 0 {
                self.structural_error(bound_tok.line, "array bound must be a positive integer");
                Some(1)
            } else {
                Some(value)
            }
        } else {
            None
        };
        Ok((name_tok.text, ty, bound, name_tok.line))
    }

    fn type_mark(&mut self) -> PResult<DataType> {
        let ty = match self.current.kind {
            TokenKind::IntegerType => DataType::Integer,
            TokenKind::FloatType => DataType::Float,
            TokenKind::BoolType => DataType::Bool,
            TokenKind::StringType => DataType::Str,
            _ => {
                return Err(self.syntax_error(format!(
                    "expected a type, found {}",
                    self.current.describe()
                )));
            }
        };
        self.advance();
        Ok(ty)
    }

    fn variable_declaration(&mut self, is_global: bool) -> PResult<()> {
        let (name, ty, bound, line) = self.variable_signature()?;
        let size = bound.unwrap_or(1);
        let (region, offset) = if is_global {
            (Region::Global, self.emit.reserve_global(size))
        } else {
            (Region::Local, self.emit.reserve(size, false))
        };
        let storage = match bound {
            Some(len) => Storage::Array { region, offset, len },
            None => Storage::Scalar { region, offset },
        };
        let identifier = Identifier {
            name,
            ty,
            storage,
            params: None,
        };
        if let Err(error) = self.table.add(identifier, is_global) {
            self.name_error(line, error);
        }
        Ok(())
    }

    fn procedure_declaration(&mut self, is_global: bool) -> PResult<()> {
        self.expect(TokenKind::Procedure, "'procedure'")?;
        let name_tok = self.expect(TokenKind::Identifier, "procedure name")?;
        let entry = self.emit.new_label();

        self.emit.begin_frame();
        let params = match self.parameter_list() {
            Ok(params) => params,
            Err(abort) => {
                self.emit.end_frame();
                return Err(abort);
            }
        };

        let procedure_id = Identifier {
            name: name_tok.text.clone(),
            ty: DataType::Procedure,
            storage: Storage::Label(entry),
            params: Some(params.iter().map(|(p, _, _)| p.clone()).collect()),
        };
        if let Err(error) = self.table.add(procedure_id.clone(), is_global) {
            self.name_error(name_tok.line, error);
        }
        self.table.push_scope(procedure_id.clone());
        // The procedure is visible inside its own body for recursion.
        let _ = self.table.add(procedure_id, false);
        for (param, storage, line) in params {
            let identifier = Identifier {
                name: param.name.clone(),
                ty: param.ty,
                storage,
                params: None,
            };
            if let Err(error) = self.table.add(identifier, false) {
                self.name_error(line, error);
            }
        }

        let body = self.procedure_body(entry, &name_tok.text);
        self.table.pop_scope();
        self.emit.end_frame();
        body
    }

    fn parameter_list(&mut self) -> PResult<Vec<(Parameter, Storage, u32)>> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let (name, ty, bound, line) = self.variable_signature()?;
                let direction = if self.accept(TokenKind::In).is_some() {
                    ParamDirection::In
                } else if self.accept(TokenKind::Out).is_some() {
                    ParamDirection::Out
                } else {
                    return Err(self.syntax_error(format!(
                        "expected 'in' or 'out' after parameter, found {}",
                        self.current.describe()
                    )));
                };
                let size = bound.unwrap_or(1);
                let offset = self.emit.reserve(size, true);
                let storage = match bound {
                    Some(len) => Storage::Array {
                        region: Region::Param,
                        offset,
                        len,
                    },
                    None => Storage::Scalar {
                        region: Region::Param,
                        offset,
                    },
                };
                params.push((Parameter { name, ty, direction }, storage, line));
                if self.accept(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(params)
    }

    fn procedure_body(&mut self, entry: u32, name: &str) -> PResult<()> {
        self.declarations();
        self.expect(TokenKind::Begin, "'begin'")?;
        self.emit.emit_frame_entry(entry, name);
        self.statement_list();
        self.expect(TokenKind::End, "'end'")?;
        self.expect(TokenKind::Procedure, "'procedure' after 'end'")?;
        // Implicit return when control falls off the body.
        self.emit.emit_return();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement_list(&mut self) {
        while !matches!(
            self.current.kind,
            TokenKind::End | TokenKind::Else | TokenKind::Eof
        ) {
            if self.statement().is_err() {
                self.resynchronize();
            }
        }
    }

    fn statement(&mut self) -> PResult<()> {
        match self.current.kind {
            TokenKind::If => self.if_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Identifier => self.assignment_or_call(),
            _ => Err(self.syntax_error(format!(
                "expected a statement, found {}",
                self.current.describe()
            ))),
        }
    }

    fn return_statement(&mut self) -> PResult<()> {
        self.advance();
        let in_program = matches!(
            self.table.current_owner().map(|o| o.ty),
            Some(DataType::Program) | None
        );
        if in_program {
            self.emit.emit_program_exit();
        } else {
            self.emit.emit_return();
        }
        self.expect(TokenKind::Semicolon, "';' after 'return'")?;
        Ok(())
    }

    /// One token of look-ahead after the name decides between a procedure
    /// call and an assignment.
    fn assignment_or_call(&mut self) -> PResult<()> {
        let name_tok = self.advance();
        if self.check(TokenKind::LParen) {
            self.call_statement(name_tok)?;
        } else {
            self.assignment_tail(name_tok)?;
        }
        self.expect(TokenKind::Semicolon, "';' after statement")?;
        Ok(())
    }

    /// `['[' expr ']'] ':=' expression`, with the destination name already
    /// consumed. Also used for the `for` header.
    fn assignment_tail(&mut self, name_tok: Token) -> PResult<()> {
        let dest = match self.table.find(&name_tok.text) {
            Ok(id) => Some(id.clone()),
            Err(error) => {
                self.name_error(name_tok.line, error);
                None
            }
        };
        if self.table.direction_of(&name_tok.text) == Some(ParamDirection::In) {
            self.type_error(
                name_tok.line,
                format!("cannot assign to 'in' parameter '{}'", name_tok.text),
            );
        }

        let index = if self.accept(TokenKind::LBracket).is_some() {
            let idx = self.expression()?;
            self.expect(TokenKind::RBracket, "']'")?;
            if idx.ty != DataType::Integer {
                self.type_error(name_tok.line, "array index must be an integer");
            }
            Some(idx.reg)
        } else {
            None
        };

        if let Some(id) = &dest {
            match (&id.storage, index.is_some()) {
                (Storage::Array { .. }, false) => self.structural_error(
                    name_tok.line,
                    format!("array '{}' requires an index", name_tok.text),
                ),
                (Storage::Scalar { .. }, true) => self.structural_error(
                    name_tok.line,
                    format!("'{}' is not an array", name_tok.text),
                ),
                (Storage::Label(_), _) => self.type_error(
                    name_tok.line,
                    format!("cannot assign to {} '{}'", id.ty, name_tok.text),
                ),
                _ => {}
            }
        }

        self.expect(TokenKind::Assign, "':='")?;
        let value = self.expression()?;

        if let Some(id) = &dest {
            if let Some((region, offset)) = data_cell(&id.storage) {
                if id.ty != value.ty {
                    self.type_error(
                        name_tok.line,
                        format!(
                            "cannot assign {} to {} '{}'",
                            value.ty, id.ty, name_tok.text
                        ),
                    );
                }
                self.emit.emit_store(region, offset, index, value.reg);
            }
        }
        Ok(())
    }

    fn call_statement(&mut self, name_tok: Token) -> PResult<()> {
        let callee = match self.table.find(&name_tok.text) {
            Ok(id) => Some(id.clone()),
            Err(error) => {
                self.name_error(name_tok.line, error);
                None
            }
        };
        let callable = match &callee {
            Some(id) if id.ty == DataType::Procedure => true,
            Some(id) => {
                self.type_error(
                    name_tok.line,
                    format!("'{}' is not a procedure", id.name),
                );
                false
            }
            None => false,
        };
        let params: Vec<Parameter> = if callable {
            callee
                .as_ref()
                .and_then(|c| c.params.clone())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        self.expect(TokenKind::LParen, "'('")?;

        let mut pushes: Vec<u32> = Vec::new();
        let mut store_backs: Vec<Option<(Region, u32)>> = Vec::new();
        let mut surplus_reported = false;
        let mut count = 0usize;

        if !self.check(TokenKind::RParen) {
            loop {
                // A surplus argument is reported as soon as it begins.
                if callable && count >= params.len() && !surplus_reported {
                    self.structural_error(
                        self.current.line,
                        format!("too many arguments to '{}'", name_tok.text),
                    );
                    surplus_reported = true;
                }

                match params.get(count) {
                    Some(param) if param.direction == ParamDirection::Out => {
                        let param = param.clone();
                        self.out_argument(&name_tok, count, &param, &mut pushes, &mut store_backs)?;
                    }
                    expected => {
                        let expected = expected.cloned();
                        let value = self.expression()?;
                        if let Some(param) = expected {
                            if value.ty != param.ty {
                                self.type_error(
                                    name_tok.line,
                                    format!(
                                        "argument {} of '{}' has type {}, expected {}",
                                        count + 1,
                                        name_tok.text,
                                        value.ty,
                                        param.ty
                                    ),
                                );
                            }
                        }
                        pushes.push(value.reg);
                        store_backs.push(None);
                    }
                }

                count += 1;
                if self.accept(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;

        // A deficit is reported once all supplied arguments are consumed.
        if callable && count < params.len() {
            self.structural_error(
                name_tok.line,
                format!(
                    "too few arguments to '{}': expected {}, found {}",
                    name_tok.text,
                    params.len(),
                    count
                ),
            );
        }

        if callable {
            if let Some(Storage::Label(entry)) = callee.as_ref().map(|c| c.storage) {
                // Push last parameter first so the first parameter lands
                // nearest the new frame and pops come back in order.
                for reg in pushes.iter().rev() {
                    self.emit.emit_push(*reg);
                }
                let site = self.emit.new_call_site();
                self.emit.emit_call(entry, site, &name_tok.text);
                self.emit.emit_call_epilogue(&store_backs);
            }
        }
        Ok(())
    }

    /// An `out` argument must be a bare identifier: the callee's result
    /// has to have a main-memory home to be copied back into.
    fn out_argument(
        &mut self,
        callee_tok: &Token,
        position: usize,
        param: &Parameter,
        pushes: &mut Vec<u32>,
        store_backs: &mut Vec<Option<(Region, u32)>>,
    ) -> PResult<()> {
        if !self.check(TokenKind::Identifier) {
            self.structural_error(
                self.current.line,
                format!(
                    "'out' parameter {} of '{}' requires a bare identifier",
                    position + 1,
                    callee_tok.text
                ),
            );
            let value = self.expression()?;
            pushes.push(value.reg);
            store_backs.push(None);
            return Ok(());
        }

        let arg_tok = self.advance();

        // A bare identifier is followed directly by ',' or ')'. Anything
        // else means a general expression was written here.
        if !matches!(self.current.kind, TokenKind::Comma | TokenKind::RParen) {
            self.structural_error(
                arg_tok.line,
                format!(
                    "'out' parameter {} of '{}' requires a bare identifier",
                    position + 1,
                    callee_tok.text
                ),
            );
            while !matches!(
                self.current.kind,
                TokenKind::Comma | TokenKind::RParen | TokenKind::Semicolon | TokenKind::Eof
            ) {
                self.advance();
            }
            let reg = self.emit.emit_load_int(0);
            pushes.push(reg);
            store_backs.push(None);
            return Ok(());
        }

        let binding = match self.table.find(&arg_tok.text) {
            Ok(id) => Some(id.clone()),
            Err(error) => {
                self.name_error(arg_tok.line, error);
                None
            }
        };
        if self.table.direction_of(&arg_tok.text) == Some(ParamDirection::In) {
            self.type_error(
                arg_tok.line,
                format!("cannot assign to 'in' parameter '{}'", arg_tok.text),
            );
        }

        match binding {
            Some(id) => {
                if let Some((region, offset)) = data_cell(&id.storage) {
                    if matches!(id.storage, Storage::Array { .. }) {
                        self.structural_error(
                            arg_tok.line,
                            format!("array '{}' requires an index", arg_tok.text),
                        );
                    }
                    if id.ty != param.ty {
                        self.type_error(
                            arg_tok.line,
                            format!(
                                "argument {} of '{}' has type {}, expected {}",
                                position + 1,
                                callee_tok.text,
                                id.ty,
                                param.ty
                            ),
                        );
                    }
                    self.emit.emit_load(region, offset, None);
                    pushes.push(self.emit.last_register());
                    store_backs.push(Some((region, offset)));
                } else {
                    self.type_error(
                        arg_tok.line,
                        format!("'{}' cannot receive an 'out' result", arg_tok.text),
                    );
                    let reg = self.emit.emit_load_int(0);
                    pushes.push(reg);
                    store_backs.push(None);
                }
            }
            None => {
                let reg = self.emit.emit_load_int(0);
                pushes.push(reg);
                store_backs.push(None);
            }
        }
        Ok(())
    }

    fn if_statement(&mut self) -> PResult<()> {
        let if_tok = self.advance();
        self.expect(TokenKind::LParen, "'('")?;
        let cond = self.expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        if !cond.ty.is_logical() {
            self.type_error(
                if_tok.line,
                format!("'if' condition must be integer or bool, not {}", cond.ty),
            );
        }
        self.expect(TokenKind::Then, "'then'")?;

        let else_label = self.emit.new_label();
        self.emit.emit_branch_if_false(cond.reg, else_label);
        self.statement_list();

        if self.accept(TokenKind::Else).is_some() {
            let end_label = self.emit.new_label();
            self.emit.emit_jump(end_label);
            self.emit.emit_label(else_label);
            self.statement_list();
            self.emit.emit_label(end_label);
        } else {
            self.emit.emit_label(else_label);
        }

        self.expect(TokenKind::End, "'end'")?;
        self.expect(TokenKind::If, "'if' after 'end'")?;
        self.expect(TokenKind::Semicolon, "';' after 'end if'")?;
        Ok(())
    }

    /// The header assignment runs once; the condition is re-evaluated
    /// before every iteration, including the first.
    fn for_statement(&mut self) -> PResult<()> {
        let for_tok = self.advance();
        self.expect(TokenKind::LParen, "'('")?;
        let name_tok = self.expect(TokenKind::Identifier, "an assignment")?;
        self.assignment_tail(name_tok)?;
        self.expect(TokenKind::Semicolon, "';' in 'for' header")?;

        let top = self.emit.new_label();
        let exit_label = self.emit.new_label();
        self.emit.emit_label(top);
        let cond = self.expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        if !cond.ty.is_logical() {
            self.type_error(
                for_tok.line,
                format!("'for' condition must be integer or bool, not {}", cond.ty),
            );
        }
        self.emit.emit_branch_if_false(cond.reg, exit_label);

        self.statement_list();
        self.emit.emit_jump(top);
        self.emit.emit_label(exit_label);

        self.expect(TokenKind::End, "'end'")?;
        self.expect(TokenKind::For, "'for' after 'end'")?;
        self.expect(TokenKind::Semicolon, "';' after 'end for'")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions (precedence low to high)
    // ------------------------------------------------------------------

    /// `['not'] arith_op (('&'|'|') arith_op)*`; `not` applies to the
    /// first operand.
    fn expression(&mut self) -> PResult<ExprInfo> {
        let not_tok = self.accept(TokenKind::Not);
        let mut lhs = self.arith_op()?;
        if let Some(not_tok) = not_tok {
            if !lhs.ty.is_logical() {
                self.type_error(
                    not_tok.line,
                    format!("operand of 'not' must be integer or bool, not {}", lhs.ty),
                );
            }
            let reg = self.emit.emit_not(lhs.reg, lhs.ty);
            lhs = ExprInfo { ty: lhs.ty, reg };
        }

        while matches!(self.current.kind, TokenKind::Amp | TokenKind::Pipe) {
            let op_tok = self.advance();
            let rhs = self.arith_op()?;
            if !lhs.ty.is_logical() || !rhs.ty.is_logical() {
                self.type_error(
                    op_tok.line,
                    format!("operands of '{}' must be integer or bool", op_tok.text),
                );
            }
            let ty = if lhs.ty == DataType::Bool && rhs.ty == DataType::Bool {
                DataType::Bool
            } else {
                DataType::Integer
            };
            let op = if op_tok.kind == TokenKind::Amp {
                BinOp::And
            } else {
                BinOp::Or
            };
            let reg = self.emit.emit_binary_op(lhs.reg, lhs.ty, rhs.reg, rhs.ty, op);
            lhs = ExprInfo { ty, reg };
        }
        Ok(lhs)
    }

    /// `relation (('+'|'-') relation)*`; float infects the result type.
    fn arith_op(&mut self) -> PResult<ExprInfo> {
        let mut lhs = self.relation()?;
        while matches!(self.current.kind, TokenKind::Plus | TokenKind::Minus) {
            let op_tok = self.advance();
            let rhs = self.relation()?;
            if !lhs.ty.is_numeric() || !rhs.ty.is_numeric() {
                self.type_error(
                    op_tok.line,
                    format!("operands of '{}' must be integer or float", op_tok.text),
                );
            }
            let ty = if lhs.ty == DataType::Float || rhs.ty == DataType::Float {
                DataType::Float
            } else {
                DataType::Integer
            };
            let op = if op_tok.kind == TokenKind::Plus {
                BinOp::Add
            } else {
                BinOp::Sub
            };
            let reg = self.emit.emit_binary_op(lhs.reg, lhs.ty, rhs.reg, rhs.ty, op);
            lhs = ExprInfo { ty, reg };
        }
        Ok(lhs)
    }

    /// `term (relop term)*`; relations require integer-or-bool operands
    /// and produce bool.
    fn relation(&mut self) -> PResult<ExprInfo> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Less => BinOp::Less,
                TokenKind::LessEq => BinOp::LessEq,
                TokenKind::Greater => BinOp::Greater,
                TokenKind::GreaterEq => BinOp::GreaterEq,
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::NotEq,
                _ => break,
            };
            let op_tok = self.advance();
            let rhs = self.term()?;
            if !lhs.ty.is_logical() || !rhs.ty.is_logical() {
                self.type_error(
                    op_tok.line,
                    format!("operands of '{}' must be integer or bool", op_tok.text),
                );
            }
            let reg = self.emit.emit_binary_op(lhs.reg, lhs.ty, rhs.reg, rhs.ty, op);
            lhs = ExprInfo {
                ty: DataType::Bool,
                reg,
            };
        }
        Ok(lhs)
    }

    /// `factor (('*'|'/') factor)*`.
    fn term(&mut self) -> PResult<ExprInfo> {
        let mut lhs = self.factor()?;
        while matches!(self.current.kind, TokenKind::Star | TokenKind::Slash) {
            let op_tok = self.advance();
            let rhs = self.factor()?;
            if !lhs.ty.is_numeric() || !rhs.ty.is_numeric() {
                self.type_error(
                    op_tok.line,
                    format!("operands of '{}' must be integer or float", op_tok.text),
                );
            }
            let ty = if lhs.ty == DataType::Float || rhs.ty == DataType::Float {
                DataType::Float
            } else {
                DataType::Integer
            };
            let op = if op_tok.kind == TokenKind::Star {
                BinOp::Mul
            } else {
                BinOp::Div
            };
            let reg = self.emit.emit_binary_op(lhs.reg, lhs.ty, rhs.reg, rhs.ty, op);
            lhs = ExprInfo { ty, reg };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> PResult<ExprInfo> {
        match self.current.kind {
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Minus => {
                let minus_tok = self.advance();
                match self.current.kind {
                    TokenKind::IntLiteral => {
                        let tok = self.advance();
                        let value = self.parse_int(&tok, true);
                        let reg = self.emit.emit_load_int(value);
                        Ok(ExprInfo {
                            ty: DataType::Integer,
                            reg,
                        })
                    }
                    TokenKind::FloatLiteral => {
                        let tok = self.advance();
                        let value = parse_float(&tok);
                        let reg = self.emit.emit_load_float(-value);
                        Ok(ExprInfo {
                            ty: DataType::Float,
                            reg,
                        })
                    }
                    TokenKind::Identifier => {
                        let info = self.name_factor()?;
                        if !info.ty.is_numeric() {
                            self.type_error(
                                minus_tok.line,
                                format!(
                                    "operand of unary '-' must be integer or float, not {}",
                                    info.ty
                                ),
                            );
                            return Ok(info);
                        }
                        let reg = self.emit.emit_negate(info.reg, info.ty);
                        Ok(ExprInfo { ty: info.ty, reg })
                    }
                    _ => Err(self.syntax_error(format!(
                        "expected a name or number after '-', found {}",
                        self.current.describe()
                    ))),
                }
            }
            TokenKind::IntLiteral => {
                let tok = self.advance();
                let value = self.parse_int(&tok, false);
                let reg = self.emit.emit_load_int(value);
                Ok(ExprInfo {
                    ty: DataType::Integer,
                    reg,
                })
            }
            TokenKind::FloatLiteral => {
                let tok = self.advance();
                let value = parse_float(&tok);
                let reg = self.emit.emit_load_float(value);
                Ok(ExprInfo {
                    ty: DataType::Float,
                    reg,
                })
            }
            TokenKind::StringLiteral => {
                let tok = self.advance();
                let base = self.emit.intern_string(&tok.text);
                let reg = self.emit.emit_load_string(base);
                Ok(ExprInfo {
                    ty: DataType::Str,
                    reg,
                })
            }
            TokenKind::True | TokenKind::False => {
                let tok = self.advance();
                let reg = self.emit.emit_load_bool(tok.kind == TokenKind::True);
                Ok(ExprInfo {
                    ty: DataType::Bool,
                    reg,
                })
            }
            TokenKind::Identifier => self.name_factor(),
            _ => Err(self.syntax_error(format!(
                "expected an expression, found {}",
                self.current.describe()
            ))),
        }
    }

    /// A name used as a value, with an optional array index.
    fn name_factor(&mut self) -> PResult<ExprInfo> {
        let name_tok = self.advance();
        let id = match self.table.find(&name_tok.text) {
            Ok(id) => Some(id.clone()),
            Err(error) => {
                self.name_error(name_tok.line, error);
                None
            }
        };
        if self.table.direction_of(&name_tok.text) == Some(ParamDirection::Out) {
            self.type_error(
                name_tok.line,
                format!("cannot read 'out' parameter '{}'", name_tok.text),
            );
        }

        let index = if self.accept(TokenKind::LBracket).is_some() {
            let idx = self.expression()?;
            self.expect(TokenKind::RBracket, "']'")?;
            if idx.ty != DataType::Integer {
                self.type_error(name_tok.line, "array index must be an integer");
            }
            Some(idx.reg)
        } else {
            None
        };

        let Some(id) = id else {
            // Unknown name: carry on with a placeholder value.
            let reg = self.emit.emit_load_int(0);
            return Ok(ExprInfo {
                ty: DataType::Integer,
                reg,
            });
        };

        match (id.storage, index) {
            (Storage::Label(_), _) => {
                self.type_error(
                    name_tok.line,
                    format!("'{}' cannot appear in an expression", name_tok.text),
                );
                let reg = self.emit.emit_load_int(0);
                Ok(ExprInfo {
                    ty: DataType::Integer,
                    reg,
                })
            }
            (Storage::Array { region, offset, .. }, Some(idx)) => {
                let reg = self.emit.emit_load(region, offset, Some(idx));
                Ok(ExprInfo { ty: id.ty, reg })
            }
            (Storage::Array { region, offset, .. }, None) => {
                self.structural_error(
                    name_tok.line,
                    format!("array '{}' requires an index", name_tok.text),
                );
                let reg = self.emit.emit_load(region, offset, None);
                Ok(ExprInfo { ty: id.ty, reg })
            }
            (Storage::Scalar { region, offset }, None) => {
                let reg = self.emit.emit_load(region, offset, None);
                Ok(ExprInfo { ty: id.ty, reg })
            }
            (Storage::Scalar { region, offset }, Some(_)) => {
                self.structural_error(
                    name_tok.line,
                    format!("'{}' is not an array", name_tok.text),
                );
                let reg = self.emit.emit_load(region, offset, None);
                Ok(ExprInfo { ty: id.ty, reg })
            }
        }
    }

    /// Parse an integer literal, folding an optional leading minus into
    /// the value so the most negative integer round-trips.
    fn parse_int(&mut self, tok: &Token, negative: bool) -> i32 {
        let magnitude: i64 = tok.text.parse().unwrap_or(i64::MAX);
        let value = if negative { -magnitude } else { magnitude };
        match i32::try_from(value) {
            Ok(value) => value,
            Err(_) => {
                self.diag
                    .warning(tok.line, format!("integer literal '{}' is out of range", tok.text));
                0
            }
        }
    }
}

fn parse_float(tok: &Token) -> f32 {
    tok.text.parse::<f32>().unwrap_or(0.0)
}

/// Region and offset of a data identifier; `None` for callable kinds.
fn data_cell(storage: &Storage) -> Option<(Region, u32)> {
    match storage {
        Storage::Scalar { region, offset } | Storage::Array { region, offset, .. } => {
            Some((*region, *offset))
        }
        Storage::Label(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::diagnostic::Diagnostic;

    /// Run the full front end over `source` and return the recorded
    /// diagnostics plus the artifact (None when errors were recorded).
    fn check(source: &str) -> (Vec<Diagnostic>, Option<String>) {
        let lines: Vec<String> = source.lines().map(str::to_string).collect();
        let mut reporter = Reporter::new("test.adl", &lines);
        let mut emitter = CodeEmitter::new(false);
        let mut table = SymbolTable::new();
        builtins::install(&mut table, &mut emitter);
        let scanner = Scanner::new(lines);
        let mut parser = Parser::new(scanner, table, &mut emitter, &mut reporter);
        parser.run();
        let artifact = emitter.commit(reporter.has_errors());
        (reporter.into_diagnostics(), artifact)
    }

    fn errors_of(diagnostics: &[Diagnostic], category: ErrorCategory) -> usize {
        diagnostics
            .iter()
            .filter(|d| d.category == Some(category))
            .count()
    }

    fn error_count(diagnostics: &[Diagnostic]) -> usize {
        diagnostics.iter().filter(|d| d.category.is_some()).count()
    }

    #[test]
    fn minimal_program_compiles_clean() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             integer x;\n\
             begin\n\
             x := 1 + 2;\n\
             end program",
        );
        assert_eq!(error_count(&diagnostics), 0, "{diagnostics:?}");
        let text = artifact.expect("artifact is produced");
        assert!(text.contains("exit(0);"));
    }

    #[test]
    fn string_to_integer_assignment_is_one_type_error() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             integer x;\n\
             begin\n\
             x := \"oops\";\n\
             end program",
        );
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Type), 1);
        assert_eq!(error_count(&diagnostics), 1);
        assert!(artifact.is_none(), "artifact must be withheld");
    }

    #[test]
    fn missing_semicolon_recovers_at_next_separator() {
        let (diagnostics, _) = check(
            "program p is\n\
             integer x;\n\
             integer y;\n\
             begin\n\
             x := 1\n\
             y := 2;\n\
             y := \"also checked\";\n\
             end program",
        );
        // One syntax error for the missing ';', and the type error further
        // down is still found in the same pass.
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Syntax), 1);
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Type), 1);
    }

    #[test]
    fn declaration_missing_its_semicolon_does_not_swallow_begin() {
        // Recovery must stop at the body keyword, not loop at 'end'.
        let (diagnostics, artifact) = check(
            "program p is\n\
             integer x\n\
             begin\n\
             end program",
        );
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Syntax), 1);
        assert!(artifact.is_none());
    }

    #[test]
    fn body_is_still_checked_after_a_malformed_declaration() {
        let (diagnostics, _) = check(
            "program p is\n\
             integer x\n\
             begin\n\
             x := 1;\n\
             x := \"still checked\";\n\
             end program",
        );
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Syntax), 1);
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Type), 1);
    }

    #[test]
    fn array_without_index_is_structural() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             integer a[10];\n\
             integer x;\n\
             begin\n\
             x := a;\n\
             a[2] := x;\n\
             end program",
        );
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Structural), 1);
        assert!(artifact.is_none());
    }

    #[test]
    fn duplicate_declaration_is_a_name_error() {
        let (diagnostics, _) = check(
            "program p is\n\
             integer x;\n\
             float x;\n\
             begin\n\
             x := 1;\n\
             end program",
        );
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Name), 1);
    }

    #[test]
    fn unknown_identifier_is_a_name_error() {
        let (diagnostics, _) = check(
            "program p is\n\
             begin\n\
             y := 1;\n\
             end program",
        );
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Name), 1);
    }

    #[test]
    fn argument_count_is_checked_both_ways() {
        let source_deficit = "program p is\n\
             procedure two(integer a in, integer b in)\n\
             begin\n\
             end procedure;\n\
             begin\n\
             two(1);\n\
             end program";
        let (diagnostics, _) = check(source_deficit);
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Structural), 1);

        let source_surplus = "program p is\n\
             procedure two(integer a in, integer b in)\n\
             begin\n\
             end procedure;\n\
             begin\n\
             two(1, 2, 3);\n\
             end program";
        let (diagnostics, _) = check(source_surplus);
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Structural), 1);

        let source_exact = "program p is\n\
             procedure two(integer a in, integer b in)\n\
             begin\n\
             end procedure;\n\
             begin\n\
             two(1, 2);\n\
             end program";
        let (diagnostics, artifact) = check(source_exact);
        assert_eq!(error_count(&diagnostics), 0, "{diagnostics:?}");
        assert!(artifact.is_some());
    }

    #[test]
    fn out_argument_must_be_a_bare_identifier() {
        let (diagnostics, _) = check(
            "program p is\n\
             integer a;\n\
             procedure inc(integer n in, integer r out)\n\
             begin\n\
             r := n + 1;\n\
             end procedure;\n\
             begin\n\
             inc(1, a + 1);\n\
             end program",
        );
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Structural), 1);
    }

    #[test]
    fn wrong_direction_references_are_type_errors() {
        let (diagnostics, _) = check(
            "program p is\n\
             procedure inc(integer n in, integer r out)\n\
             integer t;\n\
             begin\n\
             t := r;\n\
             n := 1;\n\
             r := n + 1;\n\
             end procedure;\n\
             begin\n\
             end program",
        );
        // Reading the out parameter and writing the in parameter.
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Type), 2);
    }

    #[test]
    fn two_call_sites_get_distinct_return_labels() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             procedure nop()\n\
             begin\n\
             end procedure;\n\
             begin\n\
             nop();\n\
             nop();\n\
             end program",
        );
        assert_eq!(error_count(&diagnostics), 0, "{diagnostics:?}");
        let text = artifact.expect("artifact");
        assert!(text.contains("CS0:;"));
        assert!(text.contains("CS1:;"));
        assert!(text.contains("case 0: goto CS0;"));
        assert!(text.contains("case 1: goto CS1;"));
    }

    #[test]
    fn float_expressions_use_the_scratch_cells() {
        let (_, artifact) = check(
            "program p is\n\
             float f;\n\
             begin\n\
             f := 1.5 + 2;\n\
             end program",
        );
        let text = artifact.expect("artifact");
        assert!(text.contains("F1 = (float)R["));
        assert!(text.contains("FTOI(F0 + F1)"));
    }

    #[test]
    fn pure_integer_program_never_touches_scratch_cells() {
        let (_, artifact) = check(
            "program p is\n\
             integer x;\n\
             bool b;\n\
             begin\n\
             x := 1 + 2 * 3;\n\
             b := x < 10;\n\
             end program",
        );
        let text = artifact.expect("artifact");
        // Register operands routed through the scratch cells would show
        // up as conversions from R[..]; the builtin routines only ever
        // convert from main memory.
        assert!(!text.contains("ITOF(R["));
        assert!(!text.contains("(float)R["));
    }

    #[test]
    fn global_declarations_are_visible_in_procedures() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             global integer g;\n\
             procedure touch()\n\
             begin\n\
             g := 7;\n\
             end procedure;\n\
             begin\n\
             touch();\n\
             end program",
        );
        assert_eq!(error_count(&diagnostics), 0, "{diagnostics:?}");
        let text = artifact.expect("artifact");
        assert!(text.contains("MM[MM_SIZE - 1 - 0]"));
    }

    #[test]
    fn misplaced_global_is_a_name_error() {
        let (diagnostics, _) = check(
            "program p is\n\
             procedure q()\n\
             global integer g;\n\
             begin\n\
             end procedure;\n\
             begin\n\
             end program",
        );
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Name), 1);
    }

    #[test]
    fn program_locals_are_invisible_inside_procedures() {
        let (diagnostics, _) = check(
            "program p is\n\
             integer hidden;\n\
             procedure q()\n\
             begin\n\
             hidden := 1;\n\
             end procedure;\n\
             begin\n\
             hidden := 0;\n\
             end program",
        );
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Name), 1);
    }

    #[test]
    fn most_negative_integer_literal_round_trips() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             integer x;\n\
             begin\n\
             x := -2147483648;\n\
             end program",
        );
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let text = artifact.expect("artifact");
        assert!(text.contains("= -2147483648;"), "{text}");
    }

    #[test]
    fn out_of_range_integer_literal_warns_and_loads_zero() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             integer x;\n\
             begin\n\
             x := 2147483648;\n\
             end program",
        );
        assert_eq!(error_count(&diagnostics), 0);
        assert_eq!(diagnostics.len(), 1);
        assert!(artifact.is_some());
    }

    #[test]
    fn trailing_text_is_a_warning_not_an_error() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             begin\n\
             end program\n\
             leftover",
        );
        assert_eq!(error_count(&diagnostics), 0);
        assert_eq!(diagnostics.len(), 1);
        assert!(artifact.is_some());
    }

    #[test]
    fn if_else_and_for_emit_label_structure() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             integer i;\n\
             integer total;\n\
             begin\n\
             total := 0;\n\
             for (i := 0; i < 10)\n\
             total := total + i;\n\
             i := i + 1;\n\
             end for;\n\
             if (total > 20) then\n\
             total := 20;\n\
             else\n\
             total := 0;\n\
             end if;\n\
             end program",
        );
        assert_eq!(error_count(&diagnostics), 0, "{diagnostics:?}");
        let text = artifact.expect("artifact");
        assert!(text.contains("if (R["));
        assert!(text.contains("goto L"));
    }

    #[test]
    fn recursive_calls_are_legal() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             procedure again(integer n in)\n\
             begin\n\
             again(n - 1);\n\
             end procedure;\n\
             begin\n\
             again(3);\n\
             end program",
        );
        assert_eq!(error_count(&diagnostics), 0, "{diagnostics:?}");
        assert!(artifact.is_some());
    }

    #[test]
    fn builtins_are_callable_like_user_procedures() {
        let (diagnostics, artifact) = check(
            "program p is\n\
             integer x;\n\
             begin\n\
             getInteger(x);\n\
             putInteger(x);\n\
             end program",
        );
        assert_eq!(error_count(&diagnostics), 0, "{diagnostics:?}");
        assert!(artifact.is_some());
    }

    #[test]
    fn calling_a_variable_is_a_type_error() {
        let (diagnostics, _) = check(
            "program p is\n\
             integer x;\n\
             begin\n\
             x(1);\n\
             end program",
        );
        assert_eq!(errors_of(&diagnostics, ErrorCategory::Type), 1);
    }
}

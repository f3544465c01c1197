use crate::ast::*;
use crate::error::{LexError, ParseError};
use crate::lexer::{Lexer, Mode, Token, TokenKind};
use crate::source::{SourceMap, Span};

pub struct Parser<'a> {
    source: &'a SourceMap,
    lexer: Lexer<'a>,
    cur: Token,
}

type PResult<T> = Result<T, ParseError>;

const STMT_TERMINATORS: &[TokenKind] = &[
    TokenKind::Newline,
    TokenKind::Semi,
    TokenKind::Eof,
    TokenKind::RBrace,
];

impl<'a> Parser<'a> {
    pub fn new(source: &'a SourceMap) -> Self {
        let mut lexer = Lexer::new(source.text());
        let cur = lexer.next_token();
        Parser { source, lexer, cur }
    }

    fn err_mismatch(&self, expected: &str) -> ParseError {
        ParseError::TokenMismatch {
            pos: self.source.position_at(self.cur.span.start),
            expected: expected.to_string(),
            found: format!("{:?}", self.cur.kind),
        }
    }

    fn err_no_alt(&self) -> ParseError {
        ParseError::NoViableAlter { pos: self.source.position_at(self.cur.span.start) }
    }

    /// Rejects the current token up front if the lexer couldn't make sense
    /// of it, so a malformed token surfaces as a `LexError` instead of
    /// falling through to a confusing `TokenMismatch`/`NoViableAlter`.
    fn check_lex(&self) -> PResult<()> {
        if self.cur.kind == TokenKind::Invalid {
            return Err(ParseError::Lex(LexError::InvalidToken {
                pos: self.source.position_at(self.cur.span.start),
                text: self.text(self.cur.span).to_string(),
            }));
        }
        Ok(())
    }

    fn text(&self, span: Span) -> &str {
        self.source.slice(span)
    }

    fn bump(&mut self) -> Token {
        let t = self.cur;
        self.cur = self.lexer.next_token();
        t
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.cur.kind == kind
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        if self.cur.kind == kind {
            Ok(self.bump())
        } else {
            Err(self.err_mismatch(what))
        }
    }

    fn skip_terminators(&mut self) {
        while self.at(TokenKind::Newline) || self.at(TokenKind::Semi) {
            self.bump();
        }
    }

    /// Pushes `mode` and fetches the token *after* the current one. Use
    /// this when `self.cur` is a keyword/delimiter already dispatched on
    /// and meant to be discarded (the upcoming token is what should be
    /// read under `mode`).
    fn push_mode(&mut self, mode: Mode) {
        self.lexer.push_mode(mode);
        self.cur = self.lexer.next_token();
    }

    /// Pushes `mode` and retokenizes `self.cur`'s own text under it. Use
    /// this when `self.cur` already holds real content that was lexed
    /// under the wrong (outer) mode.
    fn refetch_mode(&mut self, mode: Mode) {
        let start = self.cur.span.start;
        self.cur = self.lexer.refetch(start, mode);
    }

    /// Pops back to the enclosing mode and retokenizes `self.cur`'s own
    /// text under it, since it was lexed under the mode we're leaving.
    fn pop_mode(&mut self) {
        let start = self.cur.span.start;
        self.cur = self.lexer.pop_and_refetch(start);
    }

    // ---------------------------------------------------------------
    // Toplevel
    // ---------------------------------------------------------------

    pub fn parse_script(&mut self) -> PResult<Script> {
        let mut statements = Vec::new();
        self.skip_terminators();
        while !self.at(TokenKind::Eof) {
            statements.push(self.parse_stmt()?);
            if !self.at(TokenKind::Eof) && !STMT_TERMINATORS.contains(&self.cur.kind) {
                return Err(self.err_mismatch("statement separator"));
            }
            self.skip_terminators();
        }
        Ok(Script { statements })
    }

    fn parse_block(&mut self) -> PResult<Block> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut body = Vec::new();
        self.skip_terminators();
        while !self.at(TokenKind::RBrace) {
            body.push(self.parse_stmt()?);
            self.skip_terminators();
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(body)
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        self.check_lex()?;
        let start = self.cur.span.start;
        let kind = match self.cur.kind {
            TokenKind::KwVar | TokenKind::KwLet => self.parse_var_decl()?,
            TokenKind::KwFunction => self.parse_function_decl()?,
            TokenKind::KwIf => self.parse_if()?,
            TokenKind::KwFor => self.parse_for()?,
            TokenKind::KwWhile => self.parse_while()?,
            TokenKind::KwCase => self.parse_case()?,
            TokenKind::KwTry => self.parse_try()?,
            TokenKind::KwThrow => {
                self.bump();
                let e = self.parse_expr()?;
                StmtKind::Throw(e)
            }
            TokenKind::KwBreak => {
                self.bump();
                let e = self.parse_opt_jump_value()?;
                StmtKind::Jump(JumpKind::Break, e)
            }
            TokenKind::KwContinue => {
                self.bump();
                StmtKind::Jump(JumpKind::Continue, None)
            }
            TokenKind::KwReturn => {
                self.bump();
                let e = self.parse_opt_jump_value()?;
                StmtKind::Jump(JumpKind::Return, e)
            }
            TokenKind::KwAssert => {
                self.bump();
                let cond = self.parse_expr()?;
                let msg = if self.at(TokenKind::Colon) {
                    self.bump();
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                StmtKind::Assert(cond, msg)
            }
            TokenKind::KwSource => self.parse_source()?,
            TokenKind::KwImportEnv => self.parse_import_env()?,
            TokenKind::KwExportEnv => self.parse_export_env()?,
            TokenKind::KwType => self.parse_type_alias()?,
            TokenKind::KwInterface => self.parse_interface()?,
            TokenKind::LBrace => StmtKind::Block(self.parse_block()?),
            TokenKind::Identifier if self.ident_starts_call() || self.ident_starts_assign() => {
                self.parse_expr_or_assign_stmt()?
            }
            _ if self.starts_expr() => self.parse_expr_or_assign_stmt()?,
            _ => self.parse_pipeline_stmt()?,
        };
        let end = self.cur.span.start;
        Ok(Stmt::new(Span::new(start, end.max(start)), kind))
    }

    fn parse_opt_jump_value(&mut self) -> PResult<Option<Expr>> {
        if STMT_TERMINATORS.contains(&self.cur.kind) {
            Ok(None)
        } else {
            Ok(Some(self.parse_expr()?))
        }
    }

    /// A bareword immediately followed by `(` (no space) is a function-call
    /// expression statement, not a command pipeline.
    fn ident_starts_call(&self) -> bool {
        self.source.text().as_bytes().get(self.cur.span.end) == Some(&b'(')
    }

    /// A bareword that resolves to an assignment (`name = ...`, `name[i] =
    /// ...`, `name.field = ...`) rather than a command pipeline. Looks past
    /// inline whitespace for the telltale `=`/`[`/`.` without consuming.
    fn ident_starts_assign(&self) -> bool {
        let bytes = self.source.text().as_bytes();
        let mut i = self.cur.span.end;
        while matches!(bytes.get(i), Some(b' ') | Some(b'\t')) {
            i += 1;
        }
        match bytes.get(i) {
            Some(b'[') | Some(b'.') => true,
            Some(b'=') => bytes.get(i + 1) != Some(&b'='),
            Some(b'+') | Some(b'-') | Some(b'*') | Some(b'/') | Some(b'%') => bytes.get(i + 1) == Some(&b'='),
            _ => false,
        }
    }

    fn starts_expr(&self) -> bool {
        matches!(
            self.cur.kind,
            TokenKind::DollarName
                | TokenKind::DollarBraceOpen
                | TokenKind::DollarParen
                | TokenKind::IntLiteral
                | TokenKind::FloatLiteral
                | TokenKind::StringLiteral
                | TokenKind::DStringOpen
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::KwNew
                | TokenKind::KwTrue
                | TokenKind::KwFalse
                | TokenKind::KwTypeof
                | TokenKind::Bang
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Tilde
        )
    }

    fn parse_expr_or_assign_stmt(&mut self) -> PResult<StmtKind> {
        let e = self.parse_expr()?;
        let is_assignable = matches!(e.kind, ExprKind::Var(_) | ExprKind::Access(..) | ExprKind::Index(..));
        if self.at(TokenKind::Assign) && is_assignable {
            self.bump();
            let value = self.parse_expr()?;
            Ok(StmtKind::Assign { target: Box::new(e), value })
        } else if is_assignable {
            if let Some(op) = compound_assign_op(self.cur.kind) {
                self.bump();
                let value = self.parse_expr()?;
                return Ok(match e.kind {
                    ExprKind::Index(base, index) => {
                        StmtKind::ElementSelfAssign { target: base, index, op, value: Box::new(value) }
                    }
                    _ => {
                        let span = e.span;
                        let rhs = Expr::new(span, ExprKind::Binary(op, Box::new(e.clone()), Box::new(value)));
                        StmtKind::Assign { target: Box::new(e), value: rhs }
                    }
                });
            }
            Ok(StmtKind::Expr(e))
        } else {
            Ok(StmtKind::Expr(e))
        }
    }

    fn parse_var_decl(&mut self) -> PResult<StmtKind> {
        let mutable = self.at(TokenKind::KwVar);
        self.push_mode(Mode::Name);
        let name_tok = self.expect(TokenKind::Identifier, "identifier")?;
        let name = self.text(name_tok.span).to_string();
        let ty = self.parse_opt_type_annotation()?;
        self.expect(TokenKind::Assign, "'='")?;
        let init = self.parse_expr()?;
        Ok(StmtKind::VarDecl { name, ty, mutable, init })
    }

    fn parse_opt_type_annotation(&mut self) -> PResult<Option<String>> {
        if self.at(TokenKind::Colon) {
            self.push_mode(Mode::Type);
            let ty = self.parse_type_name()?;
            Ok(Some(ty))
        } else {
            Ok(None)
        }
    }

    /// Entry point: called once, right after the caller's own
    /// `push_mode(Mode::Type)`. Pops that mode back off on the way out, so
    /// callers never need to balance the push themselves.
    fn parse_type_name(&mut self) -> PResult<String> {
        let name = self.parse_type_atom_opt()?;
        self.pop_mode();
        Ok(name)
    }

    /// `parse_type_atom` plus a trailing `?`. This is the recursive form
    /// used for generic args, array/map elements, and tuple members — it
    /// manages no mode state of its own, unlike `parse_type_name`.
    fn parse_type_atom_opt(&mut self) -> PResult<String> {
        let base = self.parse_type_atom()?;
        if self.at(TokenKind::Question) {
            self.bump();
            Ok(format!("{base}?"))
        } else {
            Ok(base)
        }
    }

    /// One production of spec.md line 93's type grammar, minus the
    /// optional-suffix handling (`parse_type_atom_opt` adds that): a
    /// base name with optional `<...>` generics, `typeof(expr)`, a tuple
    /// `(T,U,...)`, an array `[T]`, or a map `[K:V]`.
    fn parse_type_atom(&mut self) -> PResult<String> {
        match self.cur.kind {
            TokenKind::LBracket => {
                self.bump();
                let first = self.parse_type_atom_opt()?;
                if self.at(TokenKind::Colon) {
                    self.bump();
                    let value = self.parse_type_atom_opt()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    Ok(format!("Map<{first},{value}>"))
                } else {
                    self.expect(TokenKind::RBracket, "']'")?;
                    Ok(format!("Array<{first}>"))
                }
            }
            TokenKind::LParen => {
                self.bump();
                let mut elems = Vec::new();
                if !self.at(TokenKind::RParen) {
                    elems.push(self.parse_type_atom_opt()?);
                    while self.at(TokenKind::Comma) {
                        self.bump();
                        elems.push(self.parse_type_atom_opt()?);
                    }
                }
                self.expect(TokenKind::RParen, "')'")?;
                Ok(format!("Tuple<{}>", elems.join(",")))
            }
            TokenKind::Identifier => {
                let tok = self.bump();
                let name = self.text(tok.span).to_string();
                if name == "typeof" {
                    return self.parse_typeof_type();
                }
                if self.at(TokenKind::Lt) {
                    self.parse_generic_args(&name)
                } else {
                    Ok(name)
                }
            }
            _ => Err(self.err_mismatch("type name")),
        }
    }

    /// `head<...>` where `self.cur` is the `<`. `Func` gets a dedicated
    /// shape (`Func<Ret,[P1,P2,...]>`) since its parameter list is itself
    /// bracketed, distinct from the general `[T]` array-type sugar.
    fn parse_generic_args(&mut self, head: &str) -> PResult<String> {
        self.bump();
        if head == "Func" {
            let ret = self.parse_type_atom_opt()?;
            self.expect(TokenKind::Comma, "','")?;
            self.expect(TokenKind::LBracket, "'['")?;
            let mut params = Vec::new();
            if !self.at(TokenKind::RBracket) {
                params.push(self.parse_type_atom_opt()?);
                while self.at(TokenKind::Comma) {
                    self.bump();
                    params.push(self.parse_type_atom_opt()?);
                }
            }
            self.expect(TokenKind::RBracket, "']'")?;
            self.expect(TokenKind::Gt, "'>'")?;
            let mut parts = vec![ret];
            parts.extend(params);
            Ok(format!("Func<{}>", parts.join(",")))
        } else {
            let mut args = vec![self.parse_type_atom_opt()?];
            while self.at(TokenKind::Comma) {
                self.bump();
                args.push(self.parse_type_atom_opt()?);
            }
            self.expect(TokenKind::Gt, "'>'")?;
            Ok(format!("{}<{}>", head, args.join(",")))
        }
    }

    /// `typeof(expr)` in type position. `self.cur` is the `(` that follows
    /// the already-consumed `typeof` identifier, still lexed under
    /// `Mode::Type`; only a bare variable reference resolves to a real
    /// type (the variable's own binding), anything else falls back to
    /// `Any`.
    fn parse_typeof_type(&mut self) -> PResult<String> {
        if !self.at(TokenKind::LParen) {
            return Err(self.err_mismatch("'('"));
        }
        self.push_mode(Mode::Expr);
        let inner = self.parse_ternary()?;
        self.pop_mode();
        self.expect(TokenKind::RParen, "')'")?;
        match &inner.kind {
            ExprKind::Var(name) => Ok(format!("typeof({name})")),
            _ => Ok("Any".to_string()),
        }
    }

    fn parse_function_decl(&mut self) -> PResult<StmtKind> {
        self.push_mode(Mode::Name);
        let name_tok = self.expect(TokenKind::Identifier, "function name")?;
        let name = self.text(name_tok.span).to_string();
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.at(TokenKind::RParen) {
            let p_name_tok = self.expect(TokenKind::Identifier, "parameter name")?;
            let p_name = self.text(p_name_tok.span).to_string();
            if !self.at(TokenKind::Colon) {
                return Err(self.err_mismatch("':'"));
            }
            self.push_mode(Mode::Type);
            let p_ty = self.parse_type_name()?;
            params.push(Param { name: p_name, ty: p_ty });
            if self.at(TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let ret = self.parse_opt_type_annotation()?;
        let body = self.parse_block()?;
        Ok(StmtKind::Function { name, params, ret, body })
    }

    fn parse_if(&mut self) -> PResult<StmtKind> {
        self.bump();
        let mut clauses = Vec::new();
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        clauses.push((cond, body));
        let mut else_body = None;
        loop {
            if self.at(TokenKind::KwElif) {
                self.bump();
                let c = self.parse_expr()?;
                let b = self.parse_block()?;
                clauses.push((c, b));
            } else if self.at(TokenKind::KwElse) {
                self.bump();
                if self.at(TokenKind::KwIf) {
                    if let StmtKind::If { clauses: inner_clauses, else_body: inner_else } = self.parse_if()? {
                        clauses.extend(inner_clauses);
                        else_body = inner_else;
                    }
                } else {
                    else_body = Some(self.parse_block()?);
                }
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { clauses, else_body })
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        self.bump();
        let has_paren = self.at(TokenKind::LParen);
        if has_paren {
            self.bump();
        }
        let var_tok = self.expect(TokenKind::Identifier, "loop variable")?;
        let var = self.text(var_tok.span).to_string();
        self.expect(TokenKind::KwIn, "'in'")?;
        let iter = self.parse_expr()?;
        if has_paren {
            self.expect(TokenKind::RParen, "')'")?;
        }
        let body = self.parse_block()?;
        Ok(StmtKind::For { var, iter, body })
    }

    fn parse_while(&mut self) -> PResult<StmtKind> {
        self.bump();
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(StmtKind::Loop { cond: Some(cond), body, is_do_while: false })
    }

    fn parse_case(&mut self) -> PResult<StmtKind> {
        self.bump();
        let subject = self.parse_expr()?;
        self.expect(TokenKind::LBrace, "'{'")?;
        self.skip_terminators();
        let mut arms = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let mut patterns = vec![self.parse_expr()?];
            while self.at(TokenKind::Comma) {
                self.bump();
                patterns.push(self.parse_expr()?);
            }
            let body = self.parse_block()?;
            arms.push(CaseArm { patterns, body });
            self.skip_terminators();
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(StmtKind::Case { subject, arms })
    }

    fn parse_try(&mut self) -> PResult<StmtKind> {
        self.bump();
        let body = self.parse_block()?;
        let mut catches = Vec::new();
        while self.at(TokenKind::KwCatch) {
            self.push_mode(Mode::Name);
            let name_tok = self.expect(TokenKind::Identifier, "catch variable")?;
            let name = self.text(name_tok.span).to_string();
            let ty = self.parse_opt_type_annotation()?;
            let cbody = self.parse_block()?;
            catches.push(Catch { name, ty, body: cbody });
        }
        let finally = if self.at(TokenKind::KwFinally) {
            self.bump();
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(StmtKind::Try { body, catches, finally })
    }

    fn parse_source(&mut self) -> PResult<StmtKind> {
        self.push_mode(Mode::Cmd);
        let path = self.parse_cmd_arg()?;
        self.pop_mode();
        let (as_name, is_list) = if self.at(TokenKind::KwAs) {
            self.push_mode(Mode::Name);
            let tok = self.expect(TokenKind::Identifier, "module alias")?;
            (Some(self.text(tok.span).to_string()), true)
        } else {
            (None, false)
        };
        Ok(StmtKind::Source { path, as_name, is_list })
    }

    fn parse_import_env(&mut self) -> PResult<StmtKind> {
        self.push_mode(Mode::Name);
        let tok = self.expect(TokenKind::Identifier, "environment variable name")?;
        let name = self.text(tok.span).to_string();
        let default = if self.at(TokenKind::Colon) {
            self.bump();
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(StmtKind::ImportEnv { name, default })
    }

    fn parse_export_env(&mut self) -> PResult<StmtKind> {
        self.push_mode(Mode::Name);
        let tok = self.expect(TokenKind::Identifier, "environment variable name")?;
        let name = self.text(tok.span).to_string();
        self.expect(TokenKind::Assign, "'='")?;
        let value = self.parse_expr()?;
        Ok(StmtKind::ExportEnv { name, value })
    }

    fn parse_type_alias(&mut self) -> PResult<StmtKind> {
        self.push_mode(Mode::Name);
        let tok = self.expect(TokenKind::Identifier, "type alias name")?;
        let name = self.text(tok.span).to_string();
        if !self.at(TokenKind::Assign) {
            return Err(self.err_mismatch("'='"));
        }
        self.push_mode(Mode::Type);
        let target = self.parse_type_name()?;
        Ok(StmtKind::TypeAlias { name, target })
    }

    fn parse_interface(&mut self) -> PResult<StmtKind> {
        // Retained for parsing-surface compatibility with abandoned D-Bus
        // interface declarations (§9 open question (i)); rejected at
        // typecheck with `Unsupported`.
        self.push_mode(Mode::Name);
        let tok = self.expect(TokenKind::Identifier, "interface name")?;
        let name = self.text(tok.span).to_string();
        let _ = self.parse_block()?;
        Ok(StmtKind::Interface { name })
    }

    // ---------------------------------------------------------------
    // Pipelines / commands (C10 surface, parsed here)
    // ---------------------------------------------------------------

    fn parse_pipeline_stmt(&mut self) -> PResult<StmtKind> {
        let pipeline = self.parse_pipeline()?;
        Ok(StmtKind::Pipeline(pipeline))
    }

    fn parse_pipeline(&mut self) -> PResult<Pipeline> {
        let start = self.cur.span.start;
        self.refetch_mode(Mode::Cmd);
        let mut commands = vec![self.parse_command()?];
        while self.at(TokenKind::Pipe) || self.at(TokenKind::PipeAmp) {
            self.bump();
            commands.push(self.parse_command()?);
        }
        let fork = if self.at(TokenKind::AmpBang) {
            self.bump();
            Some(ForkKind::Disown)
        } else if self.at(TokenKind::AmpPipe) {
            self.bump();
            Some(ForkKind::PipeBg)
        } else if self.at(TokenKind::Amp) {
            self.bump();
            Some(ForkKind::Background)
        } else {
            None
        };
        let end = self.cur.span.start;
        self.pop_mode();
        Ok(Pipeline { span: Span::new(start, end), commands, fork })
    }

    fn parse_command(&mut self) -> PResult<Command> {
        let start = self.cur.span.start;
        let name = self.parse_cmd_arg()?;
        let mut args = Vec::new();
        let mut redirs = Vec::new();
        loop {
            if let Some(op) = redir_op(self.cur.kind) {
                self.bump();
                let target = if self.cmd_arg_follows() {
                    Some(self.parse_cmd_arg()?)
                } else {
                    None
                };
                redirs.push(Redir { span: Span::new(start, self.cur.span.start), op, target });
                continue;
            }
            if self.cmd_arg_follows() {
                args.push(self.parse_cmd_arg()?);
                continue;
            }
            break;
        }
        let end = self.cur.span.start;
        Ok(Command { span: Span::new(start, end), name, args, redirs })
    }

    fn cmd_arg_follows(&self) -> bool {
        matches!(
            self.cur.kind,
            TokenKind::CmdWord
                | TokenKind::DollarName
                | TokenKind::DollarBraceOpen
                | TokenKind::DollarParen
                | TokenKind::StringLiteral
                | TokenKind::DStringOpen
        )
    }

    fn parse_cmd_arg(&mut self) -> PResult<CmdArg> {
        let start = self.cur.span.start;
        let mut segments = Vec::new();
        loop {
            match self.cur.kind {
                TokenKind::CmdWord => {
                    let tok = self.bump();
                    let text = self.text(tok.span).to_string();
                    if let Some(rest) = text.strip_prefix('~') {
                        segments.push(Expr::new(tok.span, ExprKind::Tilde(
                            if rest.is_empty() { None } else { Some(rest.to_string()) },
                        )));
                    } else {
                        segments.push(Expr::new(tok.span, ExprKind::StringLiteral(text)));
                    }
                }
                TokenKind::StringLiteral => {
                    let tok = self.bump();
                    let raw = self.text(tok.span);
                    let inner = &raw[1..raw.len() - 1];
                    segments.push(Expr::new(tok.span, ExprKind::StringLiteral(inner.to_string())));
                }
                TokenKind::DollarName => {
                    let tok = self.bump();
                    let name = self.text(tok.span)[1..].to_string();
                    segments.push(Expr::new(tok.span, ExprKind::Var(name)));
                }
                TokenKind::DollarBraceOpen => {
                    let tok = self.bump();
                    let e = self.parse_expr()?;
                    self.expect(TokenKind::RBrace, "'}'")?;
                    let _ = tok;
                    segments.push(e);
                }
                TokenKind::DollarParen => {
                    let tok = self.bump();
                    let inner = self.parse_pipeline()?;
                    self.expect(TokenKind::RParen, "')'")?;
                    segments.push(Expr::new(tok.span, ExprKind::CmdSubst(Box::new(inner))));
                }
                TokenKind::DStringOpen => {
                    self.bump();
                    let mut parts = Vec::new();
                    loop {
                        match self.cur.kind {
                            TokenKind::StrElement => {
                                let tok = self.bump();
                                parts.push(Expr::new(tok.span, ExprKind::StringLiteral(self.text(tok.span).to_string())));
                            }
                            TokenKind::DollarName => {
                                let tok = self.bump();
                                let name = self.text(tok.span)[1..].to_string();
                                parts.push(Expr::new(tok.span, ExprKind::Var(name)));
                            }
                            TokenKind::DollarBraceOpen => {
                                self.bump();
                                let e = self.parse_expr()?;
                                self.expect(TokenKind::RBrace, "'}'")?;
                                parts.push(e);
                            }
                            TokenKind::DollarParen => {
                                let tok = self.bump();
                                let inner = self.parse_pipeline()?;
                                self.expect(TokenKind::RParen, "')'")?;
                                parts.push(Expr::new(tok.span, ExprKind::CmdSubst(Box::new(inner))));
                            }
                            TokenKind::DStringClose => {
                                self.bump();
                                break;
                            }
                            _ => return Err(self.err_no_alt()),
                        }
                    }
                    segments.push(Expr::new(Span::new(start, self.cur.span.start), ExprKind::StringInterp(parts)));
                }
                _ => return Err(self.err_no_alt()),
            }
            if !self.at(TokenKind::CmdWord)
                && !self.at(TokenKind::StringLiteral)
                && !self.at(TokenKind::DollarName)
                && !self.at(TokenKind::DollarBraceOpen)
                && !self.at(TokenKind::DollarParen)
                && !self.at(TokenKind::DStringOpen)
            {
                break;
            }
            if self.lexer.prev_was_space() {
                break;
            }
        }
        Ok(CmdArg { span: Span::new(start, self.cur.span.start), segments })
    }

    // ---------------------------------------------------------------
    // Expressions — precedence climbing (§4.2 precedence table)
    // ---------------------------------------------------------------

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.refetch_mode(Mode::Expr);
        let e = self.parse_ternary()?;
        self.pop_mode();
        Ok(e)
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let cond = self.parse_binary(0)?;
        if self.at(TokenKind::Question) {
            let start = cond.span.start;
            self.bump();
            let then_e = self.parse_binary(0)?;
            self.expect(TokenKind::Colon, "':'")?;
            let else_e = self.parse_ternary()?;
            let span = Span::new(start, else_e.span.end);
            Ok(Expr::new(span, ExprKind::Ternary(Box::new(cond), Box::new(then_e), Box::new(else_e))))
        } else {
            Ok(cond)
        }
    }

    fn binding_power(kind: TokenKind) -> Option<(u8, BinaryOp)> {
        use TokenKind::*;
        Some(match kind {
            OrOr => (1, BinaryOp::Or),
            AndAnd => (2, BinaryOp::And),
            Pipe => (3, BinaryOp::BitOr),
            Caret => (4, BinaryOp::BitXor),
            Amp => (5, BinaryOp::BitAnd),
            EqEq => (6, BinaryOp::Eq),
            NotEq => (6, BinaryOp::Ne),
            Lt => (7, BinaryOp::Lt),
            Gt => (7, BinaryOp::Gt),
            Le => (7, BinaryOp::Le),
            Ge => (7, BinaryOp::Ge),
            DotDot => (8, BinaryOp::Range),
            Plus => (9, BinaryOp::Add),
            Minus => (9, BinaryOp::Sub),
            Star => (10, BinaryOp::Mul),
            Slash => (10, BinaryOp::Div),
            Percent => (10, BinaryOp::Mod),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_bp: u8) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            if self.at(TokenKind::KwIs) {
                self.bump();
                self.push_mode(Mode::Type);
                let ty = self.parse_type_name()?;
                let span = Span::new(lhs.span.start, self.cur.span.start);
                lhs = Expr::new(span, ExprKind::InstanceOf(Box::new(lhs), ty));
                continue;
            }
            if self.at(TokenKind::KwAs) {
                self.bump();
                self.push_mode(Mode::Type);
                let ty = self.parse_type_name()?;
                let span = Span::new(lhs.span.start, self.cur.span.start);
                lhs = Expr::new(span, ExprKind::Cast(Box::new(lhs), ty));
                continue;
            }
            let Some((bp, op)) = Self::binding_power(self.cur.kind) else { break };
            if bp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_binary(bp + 1)?;
            let span = Span::new(lhs.span.start, rhs.span.end);
            lhs = Expr::new(span, ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let start = self.cur.span.start;
        let op = match self.cur.kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_unary()?;
            let span = Span::new(start, operand.span.end);
            Ok(Expr::new(span, ExprKind::Unary(op, Box::new(operand))))
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut e = self.parse_primary()?;
        loop {
            match self.cur.kind {
                TokenKind::Dot => {
                    self.bump();
                    self.refetch_mode(Mode::Name);
                    let tok = self.expect(TokenKind::Identifier, "field or method name")?;
                    let name = self.text(tok.span).to_string();
                    if self.at(TokenKind::LParen) {
                        self.bump();
                        let args = self.parse_expr_list(TokenKind::RParen)?;
                        self.expect(TokenKind::RParen, "')'")?;
                        let span = Span::new(e.span.start, self.cur.span.start);
                        e = Expr::new(span, ExprKind::MethodCall(Box::new(e), name, args));
                    } else {
                        let span = Span::new(e.span.start, self.cur.span.start);
                        e = Expr::new(span, ExprKind::Access(Box::new(e), name));
                    }
                }
                TokenKind::LBracket => {
                    self.bump();
                    let idx = self.parse_ternary()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    let span = Span::new(e.span.start, self.cur.span.start);
                    e = Expr::new(span, ExprKind::Index(Box::new(e), Box::new(idx)));
                }
                TokenKind::LParen => {
                    self.bump();
                    let args = self.parse_expr_list(TokenKind::RParen)?;
                    self.expect(TokenKind::RParen, "')'")?;
                    let span = Span::new(e.span.start, self.cur.span.start);
                    e = Expr::new(span, ExprKind::Apply(Box::new(e), args));
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn parse_expr_list(&mut self, end: TokenKind) -> PResult<Vec<Expr>> {
        let mut out = Vec::new();
        if self.at(end) {
            return Ok(out);
        }
        out.push(self.parse_ternary()?);
        while self.at(TokenKind::Comma) {
            self.bump();
            out.push(self.parse_ternary()?);
        }
        Ok(out)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        self.check_lex()?;
        let start = self.cur.span.start;
        match self.cur.kind {
            TokenKind::IntLiteral => {
                let tok = self.bump();
                let text = self.text(tok.span);
                let v = parse_int_literal(text);
                Ok(Expr::new(tok.span, ExprKind::IntLiteral(v)))
            }
            TokenKind::FloatLiteral => {
                let tok = self.bump();
                let v: f64 = self.text(tok.span).parse().unwrap_or(0.0);
                Ok(Expr::new(tok.span, ExprKind::FloatLiteral(v)))
            }
            TokenKind::StringLiteral => {
                let tok = self.bump();
                let raw = self.text(tok.span);
                let inner = &raw[1..raw.len() - 1];
                Ok(Expr::new(tok.span, ExprKind::StringLiteral(inner.to_string())))
            }
            TokenKind::DStringOpen => {
                self.bump();
                let mut parts = Vec::new();
                loop {
                    match self.cur.kind {
                        TokenKind::StrElement => {
                            let tok = self.bump();
                            parts.push(Expr::new(tok.span, ExprKind::StringLiteral(self.text(tok.span).to_string())));
                        }
                        TokenKind::DollarName => {
                            let tok = self.bump();
                            let name = self.text(tok.span)[1..].to_string();
                            parts.push(Expr::new(tok.span, ExprKind::Var(name)));
                        }
                        TokenKind::DollarBraceOpen => {
                            self.bump();
                            let e = self.parse_expr()?;
                            self.expect(TokenKind::RBrace, "'}'")?;
                            parts.push(e);
                        }
                        TokenKind::DStringClose => {
                            self.bump();
                            break;
                        }
                        _ => return Err(self.err_no_alt()),
                    }
                }
                Ok(Expr::new(Span::new(start, self.cur.span.start), ExprKind::StringInterp(parts)))
            }
            TokenKind::KwTrue => {
                let tok = self.bump();
                Ok(Expr::new(tok.span, ExprKind::BoolLiteral(true)))
            }
            TokenKind::KwFalse => {
                let tok = self.bump();
                Ok(Expr::new(tok.span, ExprKind::BoolLiteral(false)))
            }
            TokenKind::DollarName => {
                let tok = self.bump();
                let name = self.text(tok.span)[1..].to_string();
                Ok(Expr::new(tok.span, ExprKind::Var(name)))
            }
            TokenKind::Identifier => {
                let tok = self.bump();
                let name = self.text(tok.span).to_string();
                Ok(Expr::new(tok.span, ExprKind::Var(name)))
            }
            TokenKind::DollarBraceOpen => {
                self.bump();
                let e = self.parse_expr()?;
                self.expect(TokenKind::RBrace, "'}'")?;
                Ok(e)
            }
            TokenKind::DollarParen => {
                let tok = self.bump();
                let inner = self.parse_pipeline()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::new(tok.span, ExprKind::CmdSubst(Box::new(inner))))
            }
            TokenKind::LParen => {
                self.bump();
                let mut elems = vec![self.parse_ternary()?];
                let mut is_tuple = false;
                while self.at(TokenKind::Comma) {
                    is_tuple = true;
                    self.bump();
                    elems.push(self.parse_ternary()?);
                }
                self.expect(TokenKind::RParen, "')'")?;
                let span = Span::new(start, self.cur.span.start);
                if is_tuple {
                    Ok(Expr::new(span, ExprKind::TupleLiteral(elems)))
                } else {
                    Ok(elems.into_iter().next().unwrap())
                }
            }
            TokenKind::LBracket => {
                self.bump();
                if self.at(TokenKind::Colon) {
                    // empty map literal `[:]`
                    self.bump();
                    self.expect(TokenKind::RBracket, "']'")?;
                    let span = Span::new(start, self.cur.span.start);
                    return Ok(Expr::new(span, ExprKind::MapLiteral(Vec::new())));
                }
                if self.at(TokenKind::RBracket) {
                    self.bump();
                    let span = Span::new(start, self.cur.span.start);
                    return Ok(Expr::new(span, ExprKind::ArrayLiteral(Vec::new())));
                }
                let first = self.parse_ternary()?;
                if self.at(TokenKind::Colon) {
                    self.bump();
                    let first_val = self.parse_ternary()?;
                    let mut pairs = vec![(first, first_val)];
                    while self.at(TokenKind::Comma) {
                        self.bump();
                        let k = self.parse_ternary()?;
                        self.expect(TokenKind::Colon, "':'")?;
                        let v = self.parse_ternary()?;
                        pairs.push((k, v));
                    }
                    self.expect(TokenKind::RBracket, "']'")?;
                    let span = Span::new(start, self.cur.span.start);
                    Ok(Expr::new(span, ExprKind::MapLiteral(pairs)))
                } else {
                    let mut elems = vec![first];
                    while self.at(TokenKind::Comma) {
                        self.bump();
                        elems.push(self.parse_ternary()?);
                    }
                    self.expect(TokenKind::RBracket, "']'")?;
                    let span = Span::new(start, self.cur.span.start);
                    Ok(Expr::new(span, ExprKind::ArrayLiteral(elems)))
                }
            }
            TokenKind::KwNew => {
                self.bump();
                self.push_mode(Mode::Type);
                let ty = self.parse_type_name()?;
                self.expect(TokenKind::LParen, "'('")?;
                let args = self.parse_expr_list(TokenKind::RParen)?;
                self.expect(TokenKind::RParen, "')'")?;
                let span = Span::new(start, self.cur.span.start);
                Ok(Expr::new(span, ExprKind::New(ty, args)))
            }
            TokenKind::KwTypeof => {
                self.bump();
                self.expect(TokenKind::LParen, "'('")?;
                let inner = self.parse_ternary()?;
                self.expect(TokenKind::RParen, "')'")?;
                let span = Span::new(start, self.cur.span.start);
                Ok(Expr::new(span, ExprKind::TypeOf(Box::new(inner))))
            }
            _ => Err(self.err_no_alt()),
        }
    }
}

fn compound_assign_op(kind: TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::PlusEq => BinaryOp::Add,
        TokenKind::MinusEq => BinaryOp::Sub,
        TokenKind::StarEq => BinaryOp::Mul,
        TokenKind::SlashEq => BinaryOp::Div,
        TokenKind::PercentEq => BinaryOp::Mod,
        _ => return None,
    })
}

fn redir_op(kind: TokenKind) -> Option<RedirOp> {
    use TokenKind::*;
    Some(match kind {
        Less => RedirOp::In,
        Great => RedirOp::Out,
        DGreat => RedirOp::Append,
        FdGreat => RedirOp::ErrOut,
        FdDGreat => RedirOp::ErrAppend,
        AmpGreat => RedirOp::OutErr,
        AmpDGreat => RedirOp::OutErrApp,
        FdGreatAmp => RedirOp::DupErr,
        TLess => RedirOp::HereString,
        _ => return None,
    })
}

fn parse_int_literal(text: &str) -> i64 {
    let trimmed = text.trim_end_matches(|c| matches!(c, 'u' | 'l' | 'b' | 's'));
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).unwrap_or(0)
    } else if let Some(oct) = trimmed.strip_prefix("0o").or_else(|| trimmed.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8).unwrap_or(0)
    } else if let Some(bin) = trimmed.strip_prefix("0b").or_else(|| trimmed.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).unwrap_or(0)
    } else {
        trimmed.parse().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Script {
        let sm = SourceMap::new("<test>", src);
        super::super::parse(&sm).unwrap_or_else(|e| panic!("parse error: {e} in {src:?}"))
    }

    #[test]
    fn parses_var_decl_and_echo() {
        let script = parse_ok("var x = [1,2,3]\necho $x");
        assert_eq!(script.statements.len(), 2);
    }

    #[test]
    fn parses_pipeline() {
        let script = parse_ok("echo hello | tr a-z A-Z");
        match &script.statements[0].kind {
            StmtKind::Pipeline(p) => assert_eq!(p.commands.len(), 2),
            other => panic!("expected pipeline, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_try_for() {
        parse_ok("if true { echo yes }");
        parse_ok("try { 1/0 } catch e { echo caught }");
        parse_ok("for i in 1..3 { if $i == 2 { break 99 } }");
    }

    #[test]
    fn parses_function_decl() {
        parse_ok("function f(n: Int): Int { if $n <= 1 { return 1 } return $n }");
    }

    #[test]
    fn invalid_token_is_a_lex_error() {
        let sm = SourceMap::new("<test>", "var x = 0123");
        let err = super::super::parse(&sm).unwrap_err();
        assert!(matches!(err, ParseError::Lex(LexError::InvalidToken { .. })), "got: {err:?}");
    }
}

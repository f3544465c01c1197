//! Type checker (C6).
//!
//! Single-pass walk over the parsed AST: resolves names against a scope
//! stack, assigns `computed_type` on every expression, validates operator
//! legality against the type pool's method tables, and checks structural
//! rules (break/continue/return context, assignment targets, duplicate
//! declarations). Builtin types have no user-overridable method bodies, so
//! `checker` only needs to validate `__OP__` resolution; the VM executes
//! arithmetic/comparison natively rather than through a dynamic dispatch
//! table.

mod resolve;
mod scope;

use crate::ast::*;
use crate::error::TypeError;
use crate::source::Position;
use crate::source::SourceMap;
use crate::types::{Coercion, TypeId, TypePool};

use resolve::resolve_type_name;
use scope::{FuncSig, Scopes};

pub struct CheckedScript {
    pub script: Script,
    pub pool: TypePool,
    pub functions: std::collections::HashMap<String, FuncSig>,
}

pub fn check(source: &SourceMap, mut script: Script) -> Result<CheckedScript, TypeError> {
    let mut pool = TypePool::new();
    let mut scopes = Scopes::new();
    let mut checker = Checker { source, pool: &mut pool, scopes: &mut scopes, loop_depth: 0, func_depth: 0 };
    checker.collect_functions(&script.statements)?;
    for stmt in &mut script.statements {
        checker.check_stmt(stmt)?;
    }
    let functions = scopes.functions.clone();
    Ok(CheckedScript { script, pool, functions })
}

struct Checker<'a> {
    source: &'a SourceMap,
    pool: &'a mut TypePool,
    scopes: &'a mut Scopes,
    loop_depth: u32,
    func_depth: u32,
}

impl<'a> Checker<'a> {
    fn pos(&self, offset: usize) -> Position {
        self.source.position_at(offset)
    }

    /// Resolves a type-annotation string to a `TypeId`, same as
    /// `resolve_type_name`, but additionally recognizes the
    /// `typeof(name)` form the parser emits for spec.md line 93's
    /// `typeof(expr)` type production: it looks `name` up in the current
    /// scope and returns its type rather than treating `typeof(...)` as
    /// a type-pool head name. Only supported as the whole annotation, not
    /// nested inside a generic argument (`Array<typeof(x)>` is not
    /// resolvable this way).
    fn resolve_type_annotation(&mut self, name: &str) -> Result<TypeId, ()> {
        if let Some(inner) = name.strip_prefix("typeof(").and_then(|s| s.strip_suffix(')')) {
            return self.scopes.lookup(inner).map(|b| b.ty).ok_or(());
        }
        resolve_type_name(self.pool, name)
    }

    fn collect_functions(&mut self, stmts: &[Stmt]) -> Result<(), TypeError> {
        for stmt in stmts {
            if let StmtKind::Function { name, params, ret, .. } = &stmt.kind {
                let param_types = params
                    .iter()
                    .map(|p| self.resolve_type_annotation(&p.ty))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| TypeError::UndefinedType { pos: self.pos(stmt.span.start), name: name.clone() })?;
                let ret_type = match ret {
                    Some(t) => self
                        .resolve_type_annotation(t)
                        .map_err(|_| TypeError::UndefinedType { pos: self.pos(stmt.span.start), name: t.clone() })?,
                    None => self.pool.builtin.void,
                };
                if self.scopes.functions.contains_key(name) {
                    return Err(TypeError::DefinedSymbol { pos: self.pos(stmt.span.start), name: name.clone() });
                }
                self.scopes.functions.insert(
                    name.clone(),
                    FuncSig { params: param_types, param_names: params.iter().map(|p| p.name.clone()).collect(), ret: ret_type },
                );
            }
        }
        Ok(())
    }

    fn check_block(&mut self, block: &mut Block) -> Result<(), TypeError> {
        self.scopes.push();
        for stmt in block {
            self.check_stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn check_stmt(&mut self, stmt: &mut Stmt) -> Result<(), TypeError> {
        let pos = self.pos(stmt.span.start);
        match &mut stmt.kind {
            StmtKind::Expr(e) => {
                self.check_expr(e)?;
            }
            StmtKind::Block(b) => self.check_block(b)?,
            StmtKind::Loop { cond, body, .. } => {
                if let Some(c) = cond {
                    self.check_expr(c)?;
                }
                self.loop_depth += 1;
                self.check_block(body)?;
                self.loop_depth -= 1;
            }
            StmtKind::For { var, iter, body } => {
                self.check_expr(iter)?;
                let elem = self.iter_elem_type(iter);
                self.scopes.push();
                self.scopes.declare(var.clone(), elem, true);
                self.loop_depth += 1;
                for s in body.iter_mut() {
                    self.check_stmt(s)?;
                }
                self.loop_depth -= 1;
                self.scopes.pop();
            }
            StmtKind::Case { subject, arms } => {
                self.check_expr(subject)?;
                for arm in arms {
                    for p in &mut arm.patterns {
                        self.check_expr(p)?;
                    }
                    self.check_block(&mut arm.body)?;
                }
            }
            StmtKind::Jump(kind, value) => {
                if let Some(v) = value {
                    self.check_expr(v)?;
                }
                match kind {
                    JumpKind::Break | JumpKind::Continue if self.loop_depth == 0 => {
                        return Err(TypeError::InsideLoop { pos });
                    }
                    JumpKind::Return if self.func_depth == 0 => {
                        return Err(TypeError::InsideFunc { pos });
                    }
                    _ => {}
                }
            }
            StmtKind::Try { body, catches, finally } => {
                self.check_block(body)?;
                for c in catches {
                    let ty = match &c.ty {
                        Some(t) => self
                            .resolve_type_annotation(t)
                            .map_err(|_| TypeError::UndefinedType { pos, name: t.clone() })?,
                        None => self.pool.builtin.error,
                    };
                    self.scopes.push();
                    self.scopes.declare(c.name.clone(), ty, true);
                    for s in c.body.iter_mut() {
                        self.check_stmt(s)?;
                    }
                    self.scopes.pop();
                }
                if let Some(f) = finally {
                    self.check_block(f)?;
                }
            }
            StmtKind::Assert(cond, msg) => {
                self.check_expr(cond)?;
                if let Some(m) = msg {
                    self.check_expr(m)?;
                }
            }
            StmtKind::VarDecl { name, ty, mutable, init } => {
                self.check_expr(init)?;
                let init_ty = init.computed_type.unwrap();
                let declared = match ty {
                    Some(t) => self.resolve_type_annotation(t).map_err(|_| TypeError::UndefinedType { pos, name: t.clone() })?,
                    None => init_ty,
                };
                if declared != init_ty && !self.pool.is_subtype_of(init_ty, declared) {
                    match crate::types::coercion_of(self.pool, declared, init_ty) {
                        Some(c) => self.wrap_coercion(init, c, declared),
                        None => {
                            return Err(TypeError::Required {
                                pos,
                                expected: self.pool.get(declared).display_name(),
                                actual: self.pool.get(init_ty).display_name(),
                            })
                        }
                    }
                }
                self.scopes.declare(name.clone(), declared, *mutable);
            }
            StmtKind::Assign { target, value } => {
                self.check_expr(target)?;
                self.check_expr(value)?;
                if !matches!(target.kind, ExprKind::Var(_) | ExprKind::Access(..) | ExprKind::Index(..)) {
                    return Err(TypeError::Assignable { pos });
                }
                if let ExprKind::Var(name) = &target.kind {
                    if let Some(binding) = self.scopes.lookup(name) {
                        if !binding.mutable {
                            return Err(TypeError::ReadOnly { pos, name: name.clone() });
                        }
                    }
                }
            }
            StmtKind::ElementSelfAssign { target, index, op, value } => {
                self.check_expr(target)?;
                self.check_expr(index)?;
                self.check_expr(value)?;
                let recv = target.computed_type.unwrap();
                let info = self.pool.get(recv);
                let elem_ty = match info.template {
                    Some(crate::types::TemplateKind::Array) => info.type_args[0],
                    Some(crate::types::TemplateKind::Map) => info.type_args[1],
                    _ => return Err(TypeError::Unsupported { pos }),
                };
                let mut elem = Expr::new(index.span, ExprKind::Var(String::new()));
                elem.computed_type = Some(elem_ty);
                self.check_binary(pos, *op, &elem, value)?;
            }
            StmtKind::ImportEnv { name: _, default } => {
                if let Some(d) = default {
                    self.check_expr(d)?;
                }
            }
            StmtKind::ExportEnv { name: _, value } => {
                self.check_expr(value)?;
            }
            StmtKind::TypeAlias { name, target } => {
                let resolved = self
                    .resolve_type_annotation(target)
                    .map_err(|_| TypeError::UndefinedType { pos, name: target.clone() })?;
                self.scopes.type_aliases.insert(name.clone(), resolved);
            }
            StmtKind::Function { params, body, .. } => {
                self.scopes.push();
                self.func_depth += 1;
                for p in params.iter() {
                    let ty = self
                        .resolve_type_annotation(&p.ty)
                        .map_err(|_| TypeError::UndefinedType { pos, name: p.ty.clone() })?;
                    self.scopes.declare(p.name.clone(), ty, true);
                }
                for s in body.iter_mut() {
                    self.check_stmt(s)?;
                }
                self.func_depth -= 1;
                self.scopes.pop();
            }
            StmtKind::Interface { .. } => return Err(TypeError::Unsupported { pos }),
            StmtKind::UserDefinedCmd { body, .. } => {
                self.check_block(body)?;
            }
            StmtKind::Source { path, .. } => {
                self.check_cmd_arg(path)?;
            }
            StmtKind::Pipeline(p) => self.check_pipeline(p)?,
            StmtKind::Throw(e) => {
                self.check_expr(e)?;
            }
            StmtKind::If { clauses, else_body } => {
                for (cond, body) in clauses {
                    self.check_expr(cond)?;
                    self.check_block(body)?;
                }
                if let Some(b) = else_body {
                    self.check_block(b)?;
                }
            }
        }
        Ok(())
    }

    fn check_pipeline(&mut self, p: &mut Pipeline) -> Result<(), TypeError> {
        for cmd in &mut p.commands {
            self.check_cmd_arg(&mut cmd.name)?;
            for a in &mut cmd.args {
                self.check_cmd_arg(a)?;
            }
            for r in &mut cmd.redirs {
                if let Some(t) = &mut r.target {
                    self.check_cmd_arg(t)?;
                }
            }
        }
        Ok(())
    }

    fn check_cmd_arg(&mut self, arg: &mut CmdArg) -> Result<(), TypeError> {
        for seg in &mut arg.segments {
            self.check_expr(seg)?;
        }
        Ok(())
    }

    fn iter_elem_type(&mut self, iter: &Expr) -> TypeId {
        let ty = iter.computed_type.unwrap_or(self.pool.builtin.any);
        let info = self.pool.get(ty);
        if info.template == Some(crate::types::TemplateKind::Array) {
            info.type_args[0]
        } else if ty == self.pool.builtin.int {
            self.pool.builtin.int
        } else {
            self.pool.builtin.any
        }
    }

    fn wrap_coercion(&self, e: &mut Expr, c: Coercion, to: TypeId) {
        let inner = e.clone();
        let span = inner.span;
        *e = Expr::new(span, ExprKind::TypeOp(c, Box::new(inner)));
        e.computed_type = Some(to);
    }

    fn check_expr(&mut self, e: &mut Expr) -> Result<(), TypeError> {
        let pos = self.pos(e.span.start);
        let b = self.pool.builtin;
        e.computed_type = Some(match &mut e.kind {
            ExprKind::IntLiteral(_) => b.int,
            ExprKind::FloatLiteral(_) => b.float,
            ExprKind::StringLiteral(_) => b.string,
            ExprKind::RegexLiteral(_) => b.regex,
            ExprKind::SignalLiteral(_) => b.signal,
            ExprKind::BoolLiteral(_) => b.boolean,
            ExprKind::ArrayLiteral(items) => {
                for i in items.iter_mut() {
                    self.check_expr(i)?;
                }
                let elem_types: Vec<TypeId> = items.iter().map(|i| i.computed_type.unwrap()).collect();
                let elem = if elem_types.is_empty() { b.any } else { self.pool.common_super_type(&elem_types) };
                self.pool.array_of(elem)
            }
            ExprKind::MapLiteral(pairs) => {
                for (k, v) in pairs.iter_mut() {
                    self.check_expr(k)?;
                    self.check_expr(v)?;
                }
                if pairs.is_empty() {
                    self.pool.map_of(b.any, b.any)
                } else {
                    let k_types: Vec<TypeId> = pairs.iter().map(|(k, _)| k.computed_type.unwrap()).collect();
                    let v_types: Vec<TypeId> = pairs.iter().map(|(_, v)| v.computed_type.unwrap()).collect();
                    let k = self.pool.common_super_type(&k_types);
                    let v = self.pool.common_super_type(&v_types);
                    self.pool.map_of(k, v)
                }
            }
            ExprKind::TupleLiteral(items) => {
                for i in items.iter_mut() {
                    self.check_expr(i)?;
                }
                let types: Vec<TypeId> = items.iter().map(|i| i.computed_type.unwrap()).collect();
                self.pool.tuple_of(types)
            }
            ExprKind::Var(name) => match self.scopes.lookup(name) {
                Some(binding) => binding.ty,
                None if name == "RANDOM" => self.pool.builtin.int,
                None => match self.scopes.functions.get(name).cloned() {
                    Some(sig) => self.pool.func_of(sig.ret, sig.params.clone()),
                    None => return Err(TypeError::UndefinedSymbol { pos, name: name.clone() }),
                },
            },
            ExprKind::Access(base, field) => {
                self.check_expr(base)?;
                let recv = base.computed_type.unwrap();
                match self.pool.lookup_field(recv, field) {
                    Some(f) => f.declared_type,
                    None => return Err(TypeError::UndefinedField { pos, name: field.clone() }),
                }
            }
            ExprKind::Index(base, idx) => {
                self.check_expr(base)?;
                self.check_expr(idx)?;
                let recv = base.computed_type.unwrap();
                let info = self.pool.get(recv);
                match info.template {
                    Some(crate::types::TemplateKind::Array) => info.type_args[0],
                    Some(crate::types::TemplateKind::Map) => info.type_args[1],
                    Some(crate::types::TemplateKind::Tuple) => {
                        if let ExprKind::IntLiteral(n) = idx.kind {
                            *info.type_args.get(n as usize).unwrap_or(&b.any)
                        } else {
                            b.any
                        }
                    }
                    _ => b.any,
                }
            }
            ExprKind::Apply(callee, args) => {
                for a in args.iter_mut() {
                    self.check_expr(a)?;
                }
                if let ExprKind::Var(name) = &callee.kind {
                    if let Some(sig) = self.scopes.functions.get(name).cloned() {
                        if sig.params.len() != args.len() {
                            return Err(TypeError::Required {
                                pos,
                                expected: format!("{} argument(s)", sig.params.len()),
                                actual: format!("{} argument(s)", args.len()),
                            });
                        }
                        sig.ret
                    } else {
                        return Err(TypeError::UndefinedSymbol { pos, name: name.clone() });
                    }
                } else {
                    self.check_expr(callee)?;
                    b.any
                }
            }
            ExprKind::MethodCall(recv, name, args) => {
                self.check_expr(recv)?;
                for a in args.iter_mut() {
                    self.check_expr(a)?;
                }
                let recv_ty = recv.computed_type.unwrap();
                match self.pool.lookup_method(recv_ty, name) {
                    Some(m) => m.return_type,
                    None => return Err(TypeError::UndefinedMethod { pos, name: name.clone() }),
                }
            }
            ExprKind::New(ty_name, args) => {
                for a in args.iter_mut() {
                    self.check_expr(a)?;
                }
                self.resolve_type_annotation(ty_name).map_err(|_| TypeError::UndefinedType { pos, name: ty_name.clone() })?
            }
            ExprKind::Unary(op, inner) => {
                self.check_expr(inner)?;
                let it = inner.computed_type.unwrap();
                match op {
                    UnaryOp::Not => b.boolean,
                    _ if it == b.int || it == b.float => it,
                    _ => return Err(TypeError::Unacceptable { pos, ty: self.pool.get(it).display_name() }),
                }
            }
            ExprKind::Binary(op, l, r) => {
                self.check_expr(l)?;
                self.check_expr(r)?;
                self.check_binary(pos, *op, l, r)?
            }
            ExprKind::Cast(inner, ty_name) => {
                self.check_expr(inner)?;
                self.resolve_type_annotation(ty_name).map_err(|_| TypeError::UndefinedType { pos, name: ty_name.clone() })?
            }
            ExprKind::InstanceOf(inner, ty_name) => {
                self.check_expr(inner)?;
                self.resolve_type_annotation(ty_name).map_err(|_| TypeError::UndefinedType { pos, name: ty_name.clone() })?;
                b.boolean
            }
            ExprKind::Ternary(cond, then_e, else_e) => {
                self.check_expr(cond)?;
                self.check_expr(then_e)?;
                self.check_expr(else_e)?;
                let types = [then_e.computed_type.unwrap(), else_e.computed_type.unwrap()];
                self.pool.common_super_type(&types)
            }
            ExprKind::TypeOp(_, inner) => {
                self.check_expr(inner)?;
                inner.computed_type.unwrap()
            }
            ExprKind::TypeOf(inner) => {
                self.check_expr(inner)?;
                b.string
            }
            ExprKind::CmdSubst(p) | ExprKind::ProcSubst(p) => {
                self.check_pipeline(p)?;
                b.string
            }
            ExprKind::Tilde(_) => b.string,
            ExprKind::StringInterp(parts) => {
                for p in parts.iter_mut() {
                    self.check_expr(p)?;
                }
                b.string
            }
        });
        Ok(())
    }

    fn check_binary(&mut self, pos: Position, op: BinaryOp, l: &Expr, r: &Expr) -> Result<TypeId, TypeError> {
        let b = self.pool.builtin;
        let lt = l.computed_type.unwrap();
        let rt = r.computed_type.unwrap();
        match op {
            BinaryOp::And | BinaryOp::Or => Ok(b.boolean),
            BinaryOp::Range => Ok(self.pool.array_of(b.int)),
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if lt == b.int && rt == b.int {
                    Ok(b.int)
                } else {
                    Err(TypeError::Required { pos, expected: "Int".into(), actual: self.pool.get(lt).display_name() })
                }
            }
            _ => {
                if lt == b.string || rt == b.string {
                    if op == BinaryOp::Add || op == BinaryOp::Eq || op == BinaryOp::Ne {
                        return Ok(if op == BinaryOp::Add { b.string } else { b.boolean });
                    }
                }
                let name = op.method_name().ok_or(TypeError::Unsupported { pos })?;
                match self.pool.lookup_method(lt, name) {
                    Some(m) => {
                        let expects = m.param_types[0];
                        if rt != expects && !self.pool.is_subtype_of(rt, expects) {
                            return Err(TypeError::Required {
                                pos,
                                expected: self.pool.get(expects).display_name(),
                                actual: self.pool.get(rt).display_name(),
                            });
                        }
                        Ok(m.return_type)
                    }
                    None => Err(TypeError::UndefinedMethod { pos, name: name.to_string() }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check_src(src: &str) -> Result<CheckedScript, TypeError> {
        let sm = SourceMap::new("<test>", src);
        let script = parse(&sm).unwrap();
        check(&sm, script)
    }

    #[test]
    fn var_decl_infers_array_type() {
        let checked = check_src("var x = [1,2,3]").unwrap();
        let decl = &checked.script.statements[0];
        if let StmtKind::VarDecl { init, .. } = &decl.kind {
            let ty = init.computed_type.unwrap();
            assert!(checked.pool.get(ty).name.starts_with("Array"));
        } else {
            panic!("expected var decl");
        }
    }

    #[test]
    fn undefined_var_is_an_error() {
        assert!(check_src("echo $nope").is_err() || matches!(check_src("var y = $nope"), Err(TypeError::UndefinedSymbol { .. })));
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        assert!(matches!(check_src("break"), Err(TypeError::InsideLoop { .. })));
    }

    #[test]
    fn function_call_arity_mismatch_is_rejected() {
        let src = "function f(n: Int): Int { return $n }\nf(1, 2)";
        assert!(check_src(src).is_err());
    }
}

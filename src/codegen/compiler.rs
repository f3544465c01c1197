use std::collections::HashMap;

use crate::ast::*;
use crate::source::Position;
use crate::typecheck::CheckedScript;
use crate::types::TypePool;
use crate::value::Value;

use super::{Chunk, ExceptionEntry, Op, Program};

type FnTable = HashMap<String, (Vec<String>, Block)>;

pub fn compile(checked: &CheckedScript) -> Program {
    let mut functions: FnTable = HashMap::new();
    let mut commands: FnTable = HashMap::new();
    collect_decls(&checked.script.statements, &mut functions, &mut commands);

    let mut main = Chunk::new();
    {
        let mut c = FnCompiler::new(&mut main, &functions, &commands, &checked.pool);
        c.compile_block_flat(&checked.script.statements);
        c.emit(Op::PushVoid);
        c.emit(Op::Return);
    }

    let mut out_functions = HashMap::new();
    for (name, (params, body)) in &functions {
        let mut chunk = Chunk::new();
        chunk.param_names = params.clone();
        let mut c = FnCompiler::new(&mut chunk, &functions, &commands, &checked.pool);
        for p in params {
            c.declare(p);
        }
        c.compile_block_flat(body);
        c.emit(Op::PushVoid);
        c.emit(Op::ReturnV);
        out_functions.insert(name.clone(), chunk);
    }

    let mut out_commands = HashMap::new();
    for (name, (params, body)) in &commands {
        let mut chunk = Chunk::new();
        chunk.param_names = params.clone();
        let mut c = FnCompiler::new(&mut chunk, &functions, &commands, &checked.pool);
        for p in params {
            c.declare(p);
        }
        c.compile_block_flat(body);
        c.emit(Op::PushVoid);
        c.emit(Op::ReturnV);
        out_commands.insert(name.clone(), chunk);
    }

    Program { main, functions: out_functions, commands: out_commands }
}

fn collect_decls(stmts: &[Stmt], functions: &mut FnTable, commands: &mut FnTable) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Function { name, params, body, .. } => {
                functions.insert(name.clone(), (params.iter().map(|p| p.name.clone()).collect(), body.clone()));
            }
            StmtKind::UserDefinedCmd { name, params, body } => {
                commands.insert(name.clone(), (params.clone(), body.clone()));
            }
            _ => {}
        }
    }
}

struct LoopCtx {
    break_patches: Vec<usize>,
    continue_patches: Vec<usize>,
}

struct FnCompiler<'a> {
    chunk: &'a mut Chunk,
    functions: &'a FnTable,
    commands: &'a FnTable,
    pool: &'a TypePool,
    scopes: Vec<HashMap<String, u32>>,
    loops: Vec<LoopCtx>,
    finally_stack: Vec<&'a Block>,
}

impl<'a> FnCompiler<'a> {
    fn new(chunk: &'a mut Chunk, functions: &'a FnTable, commands: &'a FnTable, pool: &'a TypePool) -> Self {
        FnCompiler { chunk, functions, commands, pool, scopes: vec![HashMap::new()], loops: Vec::new(), finally_stack: Vec::new() }
    }

    fn declare(&mut self, name: &str) -> u32 {
        let slot = self.chunk.num_locals;
        self.chunk.num_locals += 1;
        self.chunk.local_names.push(name.to_string());
        self.scopes.last_mut().unwrap().insert(name.to_string(), slot);
        slot
    }

    fn resolve(&self, name: &str) -> Option<u32> {
        for scope in self.scopes.iter().rev() {
            if let Some(&slot) = scope.get(name) {
                return Some(slot);
            }
        }
        None
    }

    fn emit(&mut self, op: Op) -> usize {
        self.chunk.code.push(op);
        self.chunk.source_pos.push(Position::default());
        self.chunk.code.len() - 1
    }

    fn here(&self) -> usize {
        self.chunk.code.len()
    }

    fn patch_jump(&mut self, at: usize, target: usize) {
        match &mut self.chunk.code[at] {
            Op::Branch(t) | Op::BranchFalse(t) | Op::Goto(t) => *t = target,
            other => unreachable!("patch_jump on non-jump op {other:?}"),
        }
    }

    fn push_const(&mut self, v: Value) -> u32 {
        self.chunk.consts.push(v);
        (self.chunk.consts.len() - 1) as u32
    }

    fn push_pipeline(&mut self, p: Pipeline) -> usize {
        self.chunk.pipelines.push(p);
        self.chunk.pipelines.len() - 1
    }

    fn compile_block_flat(&mut self, stmts: &'a [Stmt]) {
        self.scopes.push(HashMap::new());
        for s in stmts {
            self.compile_stmt(s);
        }
        self.scopes.pop();
    }

    fn run_pending_finallys(&mut self) {
        let blocks: Vec<&Block> = self.finally_stack.clone();
        for block in blocks.into_iter().rev() {
            for s in block {
                self.compile_stmt(s);
            }
        }
    }

    fn compile_stmt(&mut self, stmt: &'a Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.compile_expr(e);
                self.emit(Op::Pop);
            }
            StmtKind::Block(b) => self.compile_block_flat(b),
            StmtKind::Loop { cond, body, is_do_while } => {
                let start = self.here();
                self.loops.push(LoopCtx { break_patches: Vec::new(), continue_patches: Vec::new() });
                let mut head_jf = None;
                if !*is_do_while {
                    if let Some(c) = cond {
                        self.compile_expr(c);
                        head_jf = Some(self.emit(Op::BranchFalse(0)));
                    }
                }
                self.compile_block_flat(body);
                let continue_target = self.here();
                if let Some(c) = cond {
                    self.compile_expr(c);
                    self.emit(Op::Branch(start));
                } else {
                    self.emit(Op::Goto(start));
                }
                let end = self.here();
                if let Some(jf) = head_jf {
                    self.patch_jump(jf, end);
                }
                let ctx = self.loops.pop().unwrap();
                for p in ctx.break_patches {
                    self.patch_jump(p, end);
                }
                for p in ctx.continue_patches {
                    self.patch_jump(p, continue_target);
                }
            }
            StmtKind::For { iter, body, var } => {
                self.compile_expr(iter);
                let arr_slot = self.declare("%for_arr");
                self.emit(Op::StoreLocal(arr_slot));
                let zero = self.push_const(Value::Int(0));
                let one = self.push_const(Value::Int(1));
                let idx_slot = self.declare("%for_idx");
                self.emit(Op::LoadConst(zero));
                self.emit(Op::StoreLocal(idx_slot));
                let var_slot = self.declare(var);
                let start = self.here();
                self.emit(Op::LoadLocal(idx_slot));
                self.emit(Op::LoadLocal(arr_slot));
                self.emit(Op::CallMethod("size".into(), 0));
                self.emit(Op::BinaryOp(crate::ast::BinaryOp::Lt));
                let exit = self.emit(Op::BranchFalse(0));
                self.emit(Op::LoadLocal(arr_slot));
                self.emit(Op::LoadLocal(idx_slot));
                self.emit(Op::Index);
                self.emit(Op::StoreLocal(var_slot));
                self.loops.push(LoopCtx { break_patches: Vec::new(), continue_patches: Vec::new() });
                self.compile_block_flat(body);
                let continue_target = self.here();
                self.emit(Op::LoadLocal(idx_slot));
                self.emit(Op::LoadConst(one));
                self.emit(Op::BinaryOp(crate::ast::BinaryOp::Add));
                self.emit(Op::StoreLocal(idx_slot));
                self.emit(Op::Goto(start));
                let end = self.here();
                self.patch_jump(exit, end);
                let ctx = self.loops.pop().unwrap();
                for p in ctx.break_patches {
                    self.patch_jump(p, end);
                }
                for p in ctx.continue_patches {
                    self.patch_jump(p, continue_target);
                }
            }
            StmtKind::Case { subject, arms } => {
                let subj_slot = self.declare("%case_subject");
                self.compile_expr(subject);
                self.emit(Op::StoreLocal(subj_slot));
                let mut end_patches = Vec::new();
                for arm in arms {
                    let mut body_patches = Vec::new();
                    for pat in &arm.patterns {
                        self.emit(Op::LoadLocal(subj_slot));
                        self.compile_expr(pat);
                        self.emit(Op::BinaryOp(crate::ast::BinaryOp::Eq));
                        body_patches.push(self.emit(Op::Branch(0)));
                    }
                    let skip = self.emit(Op::Goto(0));
                    let body_start = self.here();
                    for p in body_patches {
                        self.patch_jump(p, body_start);
                    }
                    self.compile_block_flat(&arm.body);
                    end_patches.push(self.emit(Op::Goto(0)));
                    let after = self.here();
                    self.patch_jump(skip, after);
                }
                let end = self.here();
                for p in end_patches {
                    self.patch_jump(p, end);
                }
            }
            StmtKind::Jump(kind, value) => match kind {
                JumpKind::Break => {
                    self.run_pending_finallys();
                    let p = self.emit(Op::Goto(0));
                    self.loops.last_mut().expect("checker rejects break outside loop").break_patches.push(p);
                }
                JumpKind::Continue => {
                    self.run_pending_finallys();
                    let p = self.emit(Op::Goto(0));
                    self.loops.last_mut().expect("checker rejects continue outside loop").continue_patches.push(p);
                }
                JumpKind::Return => {
                    if let Some(v) = value {
                        self.compile_expr(v);
                    } else {
                        self.emit(Op::PushVoid);
                    }
                    self.run_pending_finallys();
                    self.emit(Op::ReturnV);
                }
            },
            StmtKind::Try { body, catches, finally } => self.compile_try(body, catches, finally),
            StmtKind::Assert(cond, msg) => {
                self.compile_expr(cond);
                if let Some(m) = msg {
                    self.compile_expr(m);
                } else {
                    let idx = self.push_const(Value::string("assertion failed"));
                    self.emit(Op::LoadConst(idx));
                }
                self.emit(Op::Assert);
            }
            StmtKind::VarDecl { name, init, .. } => {
                self.compile_expr(init);
                let slot = self.declare(name);
                self.emit(Op::StoreLocal(slot));
            }
            StmtKind::Assign { target, value } => self.compile_assign(target, value),
            StmtKind::ElementSelfAssign { target, index, op, value } => {
                self.compile_expr(target);
                let base_slot = self.declare("%selfassign_base");
                self.emit(Op::StoreLocal(base_slot));
                self.compile_expr(index);
                let idx_slot = self.declare("%selfassign_idx");
                self.emit(Op::StoreLocal(idx_slot));
                self.emit(Op::LoadLocal(base_slot));
                self.emit(Op::LoadLocal(idx_slot));
                self.emit(Op::Index);
                self.compile_expr(value);
                self.emit(Op::BinaryOp(*op));
                let result_slot = self.declare("%selfassign_result");
                self.emit(Op::StoreLocal(result_slot));
                self.emit(Op::LoadLocal(base_slot));
                self.emit(Op::LoadLocal(idx_slot));
                self.emit(Op::LoadLocal(result_slot));
                self.emit(Op::SetIndex);
            }
            StmtKind::ImportEnv { name, default } => {
                if let Some(d) = default {
                    self.compile_expr(d);
                } else {
                    self.emit(Op::PushVoid);
                }
                self.emit(Op::ImportEnv(name.clone()));
                let slot = self.declare(name);
                self.emit(Op::StoreLocal(slot));
            }
            StmtKind::ExportEnv { name, value } => {
                self.compile_expr(value);
                self.emit(Op::ExportEnv(name.clone()));
            }
            StmtKind::TypeAlias { .. } => {}
            StmtKind::Function { .. } => {}
            StmtKind::Interface { .. } => {}
            StmtKind::UserDefinedCmd { .. } => {}
            StmtKind::Source { .. } => {}
            StmtKind::Pipeline(p) => {
                let idx = self.push_pipeline(p.clone());
                self.emit(Op::RunPipeline(idx));
            }
            StmtKind::Throw(e) => {
                self.compile_expr(e);
                self.emit(Op::Throw);
            }
            StmtKind::If { clauses, else_body } => {
                let mut end_patches = Vec::new();
                for (cond, body) in clauses {
                    self.compile_expr(cond);
                    let jf = self.emit(Op::BranchFalse(0));
                    self.compile_block_flat(body);
                    end_patches.push(self.emit(Op::Goto(0)));
                    let next = self.here();
                    self.patch_jump(jf, next);
                }
                if let Some(b) = else_body {
                    self.compile_block_flat(b);
                }
                let end = self.here();
                for p in end_patches {
                    self.patch_jump(p, end);
                }
            }
        }
        let _ = (&self.functions, &self.commands);
    }

    fn compile_try(&mut self, body: &'a Block, catches: &'a [Catch], finally: &'a Option<Block>) {
        if let Some(f) = finally {
            self.finally_stack.push(f);
        }
        let try_start = self.here();
        self.compile_block_flat(body);
        let try_end = self.here();
        if finally.is_some() {
            self.finally_stack.pop();
            self.run_pending_finally_block(finally.as_ref().unwrap());
        }
        let goto_end = self.emit(Op::Goto(0));

        let mut catch_entries = Vec::new();
        for catch in catches {
            let handler_pc = self.here();
            let catch_type = catch.ty.as_deref().map(|t| resolve_catch_type(self.pool, t));
            let slot = self.declare(&catch.name);
            self.emit(Op::StoreLocal(slot));
            self.compile_block_flat(&catch.body);
            if let Some(f) = finally {
                self.run_pending_finally_block(f);
            }
            let p = self.emit(Op::Goto(0));
            catch_entries.push((try_start, try_end, handler_pc, catch_type, slot, p));
        }
        let after_catches = self.here();
        self.patch_jump(goto_end, after_catches);
        for (.., p) in &catch_entries {
            self.patch_jump(*p, after_catches);
        }

        if let Some(f) = finally {
            let rethrow_handler = self.here();
            let slot = self.declare("%finally_exc");
            self.emit(Op::StoreLocal(slot));
            self.compile_block_flat(f);
            self.emit(Op::LoadLocal(slot));
            self.emit(Op::Throw);
            for (start, end, handler, ty, slot, _) in catch_entries {
                self.chunk.exceptions.push(ExceptionEntry { start, end, handler, catch_type: ty, local_slot: Some(slot) });
            }
            self.chunk.exceptions.push(ExceptionEntry {
                start: try_start,
                end: rethrow_handler,
                handler: rethrow_handler,
                catch_type: None,
                local_slot: None,
            });
        } else {
            for (start, end, handler, ty, slot, _) in catch_entries {
                self.chunk.exceptions.push(ExceptionEntry { start, end, handler, catch_type: ty, local_slot: Some(slot) });
            }
        }
    }

    fn run_pending_finally_block(&mut self, f: &'a Block) {
        for s in f {
            self.compile_stmt(s);
        }
    }

    fn compile_assign(&mut self, target: &'a Expr, value: &'a Expr) {
        match &target.kind {
            ExprKind::Var(name) => {
                self.compile_expr(value);
                let slot = self.resolve(name).unwrap_or_else(|| self.declare(name));
                self.emit(Op::StoreLocal(slot));
            }
            ExprKind::Index(base, idx) => {
                self.compile_expr(base);
                self.compile_expr(idx);
                self.compile_expr(value);
                self.emit(Op::SetIndex);
            }
            ExprKind::Access(base, field) => {
                self.compile_expr(base);
                self.compile_expr(value);
                self.emit(Op::StoreField(field.clone()));
            }
            _ => {
                self.compile_expr(value);
                self.emit(Op::Pop);
            }
        }
    }

    fn compile_expr(&mut self, e: &'a Expr) {
        match &e.kind {
            ExprKind::IntLiteral(n) => {
                let idx = self.push_const(Value::Int(*n));
                self.emit(Op::LoadConst(idx));
            }
            ExprKind::FloatLiteral(n) => {
                let idx = self.push_const(Value::Float(*n));
                self.emit(Op::LoadConst(idx));
            }
            ExprKind::StringLiteral(s) => {
                let idx = self.push_const(Value::string(s.clone()));
                self.emit(Op::LoadConst(idx));
            }
            ExprKind::RegexLiteral(s) => {
                let idx = self.push_const(Value::Regex(std::rc::Rc::new(s.clone())));
                self.emit(Op::LoadConst(idx));
            }
            ExprKind::SignalLiteral(_s) => {
                let idx = self.push_const(Value::Signal(0));
                self.emit(Op::LoadConst(idx));
            }
            ExprKind::BoolLiteral(b) => {
                self.emit(if *b { Op::PushTrue } else { Op::PushFalse });
            }
            ExprKind::ArrayLiteral(items) => {
                for i in items {
                    self.compile_expr(i);
                }
                self.emit(Op::NewArray(items.len()));
            }
            ExprKind::MapLiteral(pairs) => {
                for (k, v) in pairs {
                    self.compile_expr(k);
                    self.compile_expr(v);
                }
                self.emit(Op::NewMap(pairs.len()));
            }
            ExprKind::TupleLiteral(items) => {
                for i in items {
                    self.compile_expr(i);
                }
                self.emit(Op::NewTuple(items.len()));
            }
            ExprKind::Var(name) => match self.resolve(name) {
                Some(slot) => {
                    self.emit(Op::LoadLocal(slot));
                }
                None => match self.functions.get(name) {
                    Some((params, body)) => {
                        let f = Value::Func(std::rc::Rc::new(crate::value::FuncValue {
                            name: name.clone(),
                            params: params.clone(),
                            body: std::rc::Rc::new(body.clone()),
                            captured: None,
                        }));
                        let idx = self.push_const(f);
                        self.emit(Op::LoadConst(idx));
                    }
                    None if name == "RANDOM" => {
                        self.emit(Op::LoadRandom);
                    }
                    None => {
                        self.emit(Op::PushVoid);
                    }
                },
            },
            ExprKind::Access(base, field) => {
                self.compile_expr(base);
                self.emit(Op::LoadField(field.clone()));
            }
            ExprKind::Index(base, idx) => {
                self.compile_expr(base);
                self.compile_expr(idx);
                self.emit(Op::Index);
            }
            ExprKind::Apply(callee, args) => {
                if let ExprKind::Var(name) = &callee.kind {
                    if self.resolve(name).is_none() && self.functions.contains_key(name) {
                        for a in args {
                            self.compile_expr(a);
                        }
                        self.emit(Op::CallFunc(name.clone(), args.len()));
                        return;
                    }
                }
                self.compile_expr(callee);
                for a in args {
                    self.compile_expr(a);
                }
                self.emit(Op::CallValue(args.len()));
            }
            ExprKind::MethodCall(recv, name, args) => {
                self.compile_expr(recv);
                for a in args {
                    self.compile_expr(a);
                }
                self.emit(Op::CallMethod(name.clone(), args.len()));
            }
            ExprKind::New(_ty, args) => {
                for a in args {
                    self.compile_expr(a);
                }
                self.emit(Op::New(e.computed_type.unwrap_or(0), args.len()));
            }
            ExprKind::Unary(op, inner) => {
                self.compile_expr(inner);
                self.emit(Op::UnaryOp(*op));
            }
            ExprKind::Binary(op, l, r) => match op {
                crate::ast::BinaryOp::And => {
                    self.compile_expr(l);
                    self.emit(Op::Dup);
                    let jf = self.emit(Op::BranchFalse(0));
                    self.emit(Op::Pop);
                    self.compile_expr(r);
                    let end = self.here();
                    self.patch_jump(jf, end);
                }
                crate::ast::BinaryOp::Or => {
                    self.compile_expr(l);
                    self.emit(Op::Dup);
                    let jt = self.emit(Op::Branch(0));
                    self.emit(Op::Pop);
                    self.compile_expr(r);
                    let end = self.here();
                    self.patch_jump(jt, end);
                }
                _ => {
                    self.compile_expr(l);
                    self.compile_expr(r);
                    self.emit(Op::BinaryOp(*op));
                }
            },
            ExprKind::Cast(inner, _ty) => {
                self.compile_expr(inner);
                self.emit(Op::CheckCast(e.computed_type.unwrap_or(0)));
            }
            ExprKind::InstanceOf(inner, _ty) => {
                self.compile_expr(inner);
                self.emit(Op::InstanceOf(inner.computed_type.unwrap_or(0)));
            }
            ExprKind::Ternary(cond, then_e, else_e) => {
                self.compile_expr(cond);
                let jf = self.emit(Op::BranchFalse(0));
                self.compile_expr(then_e);
                let jend = self.emit(Op::Goto(0));
                let else_start = self.here();
                self.patch_jump(jf, else_start);
                self.compile_expr(else_e);
                let end = self.here();
                self.patch_jump(jend, end);
            }
            ExprKind::TypeOp(c, inner) => {
                self.compile_expr(inner);
                match c {
                    crate::types::Coercion::ToVoid => self.emit(Op::ToVoidOp),
                    crate::types::Coercion::NumCast => self.emit(Op::NumCast),
                    crate::types::Coercion::ToString => self.emit(Op::ToStringOp),
                    crate::types::Coercion::ToBool => self.emit(Op::ToBoolOp),
                    _ => self.emit(Op::Nop),
                };
            }
            ExprKind::TypeOf(inner) => {
                self.compile_expr(inner);
                self.emit(Op::TypeOfOp);
            }
            ExprKind::CmdSubst(p) | ExprKind::ProcSubst(p) => {
                let idx = self.push_pipeline((**p).clone());
                self.emit(Op::RunPipelineCapture(idx));
            }
            ExprKind::Tilde(suffix) => {
                let idx = self.push_const(Value::string(suffix.clone().unwrap_or_default()));
                self.emit(Op::LoadConst(idx));
                self.emit(Op::TildeExpand);
            }
            ExprKind::StringInterp(parts) => {
                for p in parts {
                    self.compile_expr(p);
                    self.emit(Op::ToStringOp);
                }
                self.emit(Op::Concat(parts.len()));
            }
        }
    }
}

fn resolve_catch_type(pool: &TypePool, name: &str) -> crate::types::TypeId {
    pool.by_name(name).unwrap_or(pool.builtin.error)
}

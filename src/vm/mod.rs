//! Stack-based bytecode VM (C9).
//!
//! Each chunk (main script, function body, or user-defined command body)
//! executes on its own operand stack and locals vector; calls recurse on
//! the Rust call stack rather than maintaining an explicit frame vector,
//! so exceptions unwind the same way Rust's own `?` does — a thrown value
//! that finds no matching entry in the current chunk's exception table
//! returns as `Err` to the caller, which re-checks its own table at the
//! call-site program counter.

mod methods;
mod pipeline_eval;

use crate::codegen::{Chunk, Op, Program};
use crate::error::{RuntimeErrorKind, TypeError};
use crate::exec::ExecCtx;
use crate::ast::{BinaryOp, Pipeline, UnaryOp};
use crate::types::TypePool;
use crate::value::{ErrorValue, Value};

/// `Ok` carries the chunk's return value; `Err` carries a thrown `Value`
/// that escaped every handler in this chunk.
type ExecResult = Result<Value, Value>;

pub struct Vm<'a> {
    pub program: &'a Program,
    pub pool: &'a TypePool,
    pub ctx: ExecCtx,
}

impl<'a> Vm<'a> {
    pub fn new(program: &'a Program, pool: &'a TypePool) -> Self {
        Vm { program, pool, ctx: ExecCtx::new() }
    }

    /// Runs the script's main chunk to completion, returning the process
    /// exit status (last pipeline/assert status, or 0).
    pub fn run(&mut self) -> i32 {
        match self.exec_chunk(&self.program.main, Vec::new()) {
            Ok(_) => self.ctx.last_status,
            Err(thrown) => {
                if let Some(code) = shell_exit_code(&thrown) {
                    code
                } else {
                    eprintln!("{}", describe_uncaught_typed(&thrown, self.pool));
                    1
                }
            }
        }
    }

    /// `exit [N]` invoked as a pipeline command doesn't terminate the
    /// process directly (that would skip any `finally` blocks in scope).
    /// Instead it throws the `_ShellExit` sentinel carrying the requested
    /// code, which unwinds through `finally` handlers like any other
    /// exception (it is deliberately not an `Error` subtype, so ordinary
    /// `catch` blocks can't intercept it) until `run`/`try_run_as_callable`
    /// see it reach the top and stop. The code rides in the message rather
    /// than `ctx.last_status`, since a `finally` block can run its own
    /// commands (resetting `last_status`) before the rethrow reaches here.
    fn try_exit(&mut self, pipeline: &Pipeline, resolved: &[Vec<String>]) -> Option<StepResult> {
        if pipeline.commands.len() != 1 {
            return None;
        }
        let argv = resolved.first()?;
        if argv.first().map(String::as_str) != Some("exit") {
            return None;
        }
        let code: i32 = argv.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
        self.ctx.last_status = code;
        Some(StepResult::Thrown(self.typed_error_value(self.pool.builtin.shell_exit, format!("%shell_exit%:{code}"))))
    }

    /// A single, unforked pipeline command whose name matches a declared
    /// `function` or user-defined command runs in-process against that
    /// chunk (bash-style: functions double as commands) instead of
    /// resolving through PATH/builtins. Returns the command's display
    /// text (for substitution capture) and an exit status derived from
    /// its return value.
    fn try_run_as_callable(&mut self, pipeline: &Pipeline, resolved: &[Vec<String>]) -> Option<(String, i32)> {
        if pipeline.commands.len() != 1 || pipeline.fork.is_some() {
            return None;
        }
        let argv = resolved.first()?;
        let name = argv.first()?;
        let chunk = self.program.commands.get(name).or_else(|| self.program.functions.get(name))?;
        let args: Vec<Value> = argv[1..].iter().map(|s| coerce_cmd_arg(s)).collect();
        Some(match self.exec_chunk(chunk, args) {
            Ok(v) => {
                let status = match &v {
                    Value::Int(n) => *n as i32,
                    _ => 0,
                };
                self.ctx.last_status = status;
                (v.to_display_string(), status)
            }
            Err(thrown) => {
                let status = if let Some(code) = shell_exit_code(&thrown) {
                    code
                } else {
                    eprintln!("{}", describe_uncaught_typed(&thrown, self.pool));
                    1
                };
                (String::new(), status)
            }
        })
    }

    fn exec_chunk(&mut self, chunk: &Chunk, args: Vec<Value>) -> ExecResult {
        let mut locals = args;
        locals.resize(chunk.num_locals as usize, Value::Void);
        let mut stack: Vec<Value> = Vec::new();
        let mut pc: usize = 0;

        loop {
            crate::exec::reap_jobs(&mut self.ctx);
            if pc >= chunk.code.len() {
                return Ok(Value::Void);
            }
            let op = &chunk.code[pc];
            let outcome = self.step(chunk, op, &mut stack, &mut locals, &mut pc);
            match outcome {
                StepResult::Continue => pc += 1,
                StepResult::Jump(target) => pc = target,
                StepResult::Return(v) => return Ok(v),
                StepResult::Thrown(v) => {
                    if let Some(target) = self.find_handler(chunk, pc, &v) {
                        stack.clear();
                        stack.push(v);
                        pc = target;
                    } else {
                        return Err(v);
                    }
                }
            }
        }
    }

    fn find_handler(&self, chunk: &Chunk, pc: usize, thrown: &Value) -> Option<usize> {
        let thrown_ty = match thrown {
            Value::Error(e) => Some(e.ty),
            _ => None,
        };
        for entry in &chunk.exceptions {
            if pc < entry.start || pc >= entry.end {
                continue;
            }
            match (entry.catch_type, thrown_ty) {
                (None, _) => return Some(entry.handler),
                (Some(want), Some(have)) if self.pool.is_subtype_of(have, want) => return Some(entry.handler),
                _ => {}
            }
        }
        None
    }

    fn step(
        &mut self,
        chunk: &Chunk,
        op: &Op,
        stack: &mut Vec<Value>,
        locals: &mut [Value],
        pc: &mut usize,
    ) -> StepResult {
        macro_rules! push {
            ($v:expr) => {{
                stack.push($v);
                StepResult::Continue
            }};
        }
        macro_rules! pop {
            () => {
                stack.pop().expect("operand stack underflow")
            };
        }

        let result = match op {
            Op::Nop => StepResult::Continue,
            Op::Pop => {
                pop!();
                StepResult::Continue
            }
            Op::Dup => {
                let v = stack.last().cloned().expect("dup on empty stack");
                push!(v)
            }
            Op::PushVoid => push!(Value::Void),
            Op::PushTrue => push!(Value::Bool(true)),
            Op::PushFalse => push!(Value::Bool(false)),
            Op::LoadConst(idx) => push!(chunk.consts[*idx as usize].clone()),
            Op::LoadLocal(slot) => push!(locals[*slot as usize].clone()),
            Op::StoreLocal(slot) => {
                locals[*slot as usize] = pop!();
                StepResult::Continue
            }
            Op::LoadField(field) => {
                let recv = pop!();
                push!(methods::load_field(&recv, field))
            }
            Op::StoreField(field) => {
                let value = pop!();
                let base = pop!();
                let _ = (&base, &value);
                match methods::store_field(field) {
                    Ok(()) => StepResult::Continue,
                    Err(()) => StepResult::Thrown(self.typed_error_value(
                        self.pool.builtin.type_cast_error,
                        RuntimeErrorKind::FieldNotAssignable { field: field.clone() },
                    )),
                }
            }
            Op::NewArray(n) => {
                let items = pop_n(stack, *n);
                push!(Value::array(items))
            }
            Op::NewMap(n) => {
                let flat = pop_n(stack, 2 * n);
                let pairs = flat.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
                push!(Value::map(pairs))
            }
            Op::NewTuple(n) => {
                let items = pop_n(stack, *n);
                push!(Value::Tuple(std::rc::Rc::new(items)))
            }
            Op::Index => {
                let idx = pop!();
                let base = pop!();
                match methods::index(&base, &idx) {
                    Ok(v) => push!(v),
                    Err(e) => StepResult::Thrown(self.index_error_value(e)),
                }
            }
            Op::SetIndex => {
                let value = pop!();
                let idx = pop!();
                let base = pop!();
                match methods::set_index(&base, &idx, value) {
                    Ok(()) => StepResult::Continue,
                    Err(e) => StepResult::Thrown(self.index_error_value(e)),
                }
            }
            Op::MakeRange => StepResult::Continue,
            Op::Concat(n) => {
                let parts = pop_n(stack, *n);
                let joined: String = parts.iter().map(Value::to_display_string).collect();
                push!(Value::string(joined))
            }
            Op::UnaryOp(op) => {
                let v = pop!();
                push!(eval_unary(*op, v))
            }
            Op::BinaryOp(op) => {
                let r = pop!();
                let l = pop!();
                match eval_binary(*op, l, r) {
                    Ok(v) => push!(v),
                    Err(e) => StepResult::Thrown(self.typed_error_value(self.pool.builtin.arithmetic_error, e)),
                }
            }
            Op::InstanceOf(ty) => {
                let v = pop!();
                push!(Value::Bool(methods::runtime_type_matches(self.pool, &v, *ty)))
            }
            Op::CheckCast(ty) => {
                let v = pop!();
                if methods::runtime_type_matches(self.pool, &v, *ty) {
                    push!(v)
                } else {
                    StepResult::Thrown(self.error_value(RuntimeErrorKind::CastFailed {
                        value: v.to_display_string(),
                        ty: self.pool.get(*ty).display_name(),
                    }))
                }
            }
            Op::NumCast => {
                let v = pop!();
                push!(Value::Float(v.as_float()))
            }
            Op::ToStringOp => {
                let v = pop!();
                push!(Value::string(v.to_display_string()))
            }
            Op::ToBoolOp => {
                let v = pop!();
                push!(Value::Bool(v.truthy()))
            }
            Op::ToVoidOp => {
                pop!();
                push!(Value::Void)
            }
            Op::CallFunc(name, argc) => {
                let args = pop_n(stack, *argc);
                let Some(target) = self.program.functions.get(name) else {
                    return StepResult::Thrown(self.error_value(RuntimeErrorKind::UndefinedFunction { name: name.clone() }));
                };
                match self.exec_chunk(target, args) {
                    Ok(v) => push!(v),
                    Err(e) => StepResult::Thrown(e),
                }
            }
            Op::CallValue(argc) => {
                let args = pop_n(stack, *argc);
                let callee = pop!();
                match &callee {
                    Value::Func(f) => {
                        let Some(target) = self.program.functions.get(&f.name) else {
                            return StepResult::Thrown(self.error_value(RuntimeErrorKind::UndefinedFunction { name: f.name.clone() }));
                        };
                        match self.exec_chunk(target, args) {
                            Ok(v) => push!(v),
                            Err(e) => StepResult::Thrown(e),
                        }
                    }
                    _ => StepResult::Thrown(
                        self.error_value(RuntimeErrorKind::NotCallable { ty: methods::runtime_type_name(self.pool, &callee) }),
                    ),
                }
            }
            Op::TypeOfOp => {
                let v = pop!();
                push!(Value::string(methods::runtime_type_name(self.pool, &v)))
            }
            Op::CallMethod(name, argc) => {
                let args = pop_n(stack, *argc);
                let recv = pop!();
                match methods::call(&recv, name, &args) {
                    Ok(v) => push!(v),
                    Err(e) => StepResult::Thrown(self.error_value(e)),
                }
            }
            Op::New(ty, argc) => {
                let args = pop_n(stack, *argc);
                push!(self.construct(*ty, args))
            }
            Op::Branch(target) => {
                if pop!().truthy() {
                    StepResult::Jump(*target)
                } else {
                    StepResult::Continue
                }
            }
            Op::BranchFalse(target) => {
                if pop!().truthy() {
                    StepResult::Continue
                } else {
                    StepResult::Jump(*target)
                }
            }
            Op::Goto(target) => StepResult::Jump(*target),
            Op::Return => StepResult::Return(Value::Void),
            Op::ReturnV => StepResult::Return(pop!()),
            Op::Throw => {
                let v = pop!();
                StepResult::Thrown(v)
            }
            Op::Assert => {
                let msg = pop!();
                let cond = pop!();
                if cond.truthy() || self.ctx.assertions_disabled {
                    StepResult::Continue
                } else {
                    StepResult::Thrown(self.error_value(RuntimeErrorKind::AssertionFailed { message: msg.to_display_string() }))
                }
            }
            Op::RunPipeline(idx) => {
                let pipeline = chunk.pipelines[*idx].clone();
                let env = pipeline_eval::frame_env(chunk, locals);
                let argvs = pipeline_eval::resolve_argv(self, &pipeline, &env);
                if let Some(thrown) = self.try_exit(&pipeline, &argvs) {
                    return thrown;
                }
                let status = match self.try_run_as_callable(&pipeline, &argvs) {
                    Some((_, status)) => status,
                    None => {
                        let redirs = pipeline_eval::resolve_redirs(self, &pipeline, &env);
                        crate::exec::run_pipeline(&mut self.ctx, &pipeline, &argvs, &redirs)
                    }
                };
                push!(Value::Int(status as i64))
            }
            Op::RunPipelineCapture(idx) => {
                let pipeline = chunk.pipelines[*idx].clone();
                let env = pipeline_eval::frame_env(chunk, locals);
                let argvs = pipeline_eval::resolve_argv(self, &pipeline, &env);
                if let Some(thrown) = self.try_exit(&pipeline, &argvs) {
                    return thrown;
                }
                let (out, status) = match self.try_run_as_callable(&pipeline, &argvs) {
                    Some(r) => r,
                    None => {
                        let redirs = pipeline_eval::resolve_redirs(self, &pipeline, &env);
                        crate::exec::capture_pipeline(&mut self.ctx, &pipeline, &argvs, &redirs)
                    }
                };
                self.ctx.last_status = status;
                push!(Value::string(out))
            }
            Op::ImportEnv(name) => {
                let default = pop!();
                let value = std::env::var(name).unwrap_or_else(|_| default.to_display_string());
                push!(Value::string(value))
            }
            Op::ExportEnv(name) => {
                let v = pop!();
                std::env::set_var(name, v.to_display_string());
                StepResult::Continue
            }
            Op::TildeExpand => {
                let suffix = pop!();
                let home = std::env::var("HOME").unwrap_or_default();
                let s = suffix.to_display_string();
                let expanded = if s.is_empty() { home } else { format!("{home}/{s}") };
                push!(Value::string(expanded))
            }
            Op::LoadRandom => push!(Value::Int(rand::random::<u16>() as i64 % 32768)),
        };
        let _ = pc;
        result
    }

    fn construct(&self, ty: crate::types::TypeId, args: Vec<Value>) -> Value {
        if self.pool.is_subtype_of(ty, self.pool.builtin.error) {
            let message = args.first().map(Value::to_display_string).unwrap_or_default();
            let type_name = self.pool.get(ty).name.clone();
            Value::Error(std::rc::Rc::new(ErrorValue { ty, type_name, message, stack_trace: Vec::new() }))
        } else {
            Value::Void
        }
    }

    fn error_value(&self, message: impl Into<String>) -> Value {
        self.typed_error_value(self.pool.builtin.error, message)
    }

    fn typed_error_value(&self, ty: crate::types::TypeId, message: impl Into<String>) -> Value {
        let type_name = self.pool.get(ty).name.clone();
        Value::Error(std::rc::Rc::new(ErrorValue { ty, type_name, message: message.into(), stack_trace: Vec::new() }))
    }

    fn index_error_value(&self, e: methods::IndexError) -> Value {
        match e {
            methods::IndexError::OutOfRange { index } => {
                self.typed_error_value(self.pool.builtin.out_of_range_error, RuntimeErrorKind::OutOfRange { index })
            }
            methods::IndexError::KeyNotFound { key } => {
                self.typed_error_value(self.pool.builtin.key_not_found_error, RuntimeErrorKind::KeyNotFound { key })
            }
            methods::IndexError::NotIndexable { ty } => {
                self.typed_error_value(self.pool.builtin.type_cast_error, RuntimeErrorKind::NotIndexable { ty })
            }
        }
    }
}

enum StepResult {
    Continue,
    Jump(usize),
    Return(Value),
    Thrown(Value),
}

fn pop_n(stack: &mut Vec<Value>, n: usize) -> Vec<Value> {
    let start = stack.len() - n;
    stack.split_off(start)
}

fn eval_unary(op: UnaryOp, v: Value) -> Value {
    match op {
        UnaryOp::Not => Value::Bool(!v.truthy()),
        UnaryOp::Neg => match v {
            Value::Int(i) => Value::Int(-i),
            Value::Float(f) => Value::Float(-f),
            other => other,
        },
        UnaryOp::Plus => v,
        UnaryOp::BitNot => match v {
            Value::Int(i) => Value::Int(!i),
            other => other,
        },
    }
}

fn eval_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, String> {
    use BinaryOp::*;
    Ok(match op {
        Add => match (&l, &r) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Value::string(format!("{}{}", l.to_display_string(), r.to_display_string()))
            }
            (Value::Float(_), _) | (_, Value::Float(_)) => Value::Float(l.as_float() + r.as_float()),
            _ => Value::Int(l.as_int() + r.as_int()),
        },
        Sub => numeric(l, r, |a, b| a - b, |a, b| a - b),
        Mul => numeric(l, r, |a, b| a * b, |a, b| a * b),
        Div => {
            if r.as_int() == 0 && !matches!(r, Value::Float(_)) {
                return Err("division by zero".into());
            }
            numeric(l, r, |a, b| a / b, |a, b| a / b)
        }
        Mod => {
            if r.as_int() == 0 {
                return Err("division by zero".into());
            }
            Value::Int(l.as_int() % r.as_int())
        }
        Eq => Value::Bool(l.value_eq(&r)),
        Ne => Value::Bool(!l.value_eq(&r)),
        Lt => Value::Bool(l.partial_cmp_numeric(&r).map(|o| o.is_lt()).unwrap_or(false)),
        Gt => Value::Bool(l.partial_cmp_numeric(&r).map(|o| o.is_gt()).unwrap_or(false)),
        Le => Value::Bool(l.partial_cmp_numeric(&r).map(|o| o.is_le()).unwrap_or(false)),
        Ge => Value::Bool(l.partial_cmp_numeric(&r).map(|o| o.is_ge()).unwrap_or(false)),
        Range => {
            let (a, b) = (l.as_int(), r.as_int());
            Value::array((a..=b).map(Value::Int).collect())
        }
        And => Value::Bool(l.truthy() && r.truthy()),
        Or => Value::Bool(l.truthy() || r.truthy()),
        BitAnd => Value::Int(l.as_int() & r.as_int()),
        BitOr => Value::Int(l.as_int() | r.as_int()),
        BitXor => Value::Int(l.as_int() ^ r.as_int()),
    })
}

fn numeric(l: Value, r: Value, fi: fn(i64, i64) -> i64, ff: fn(f64, f64) -> f64) -> Value {
    if matches!(l, Value::Float(_)) || matches!(r, Value::Float(_)) {
        Value::Float(ff(l.as_float(), r.as_float()))
    } else {
        Value::Int(fi(l.as_int(), r.as_int()))
    }
}

/// Best-effort string -> `Value` coercion for argv handed to a
/// function/command invoked via pipeline syntax, where the caller only
/// has text, not a typed expression.
fn coerce_cmd_arg(s: &str) -> Value {
    if let Ok(n) = s.parse::<i64>() {
        Value::Int(n)
    } else if let Ok(f) = s.parse::<f64>() {
        Value::Float(f)
    } else if s == "true" || s == "false" {
        Value::Bool(s == "true")
    } else {
        Value::string(s.to_string())
    }
}

fn shell_exit_code(v: &Value) -> Option<i32> {
    match v {
        Value::Error(e) => e.message.strip_prefix("%shell_exit%:").and_then(|s| s.parse().ok()),
        _ => None,
    }
}

fn describe_uncaught_typed(v: &Value, pool: &TypePool) -> String {
    match v {
        Value::Error(e) => format!("uncaught {}: {}", pool.get(e.ty).name, e.message),
        other => format!("uncaught: {}", other.to_display_string()),
    }
}

pub fn type_error_as_value(pool: &TypePool, e: &TypeError) -> Value {
    let ty = pool.builtin.error;
    Value::Error(std::rc::Rc::new(ErrorValue {
        ty,
        type_name: pool.get(ty).name.clone(),
        message: e.to_string(),
        stack_trace: Vec::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::compile;
    use crate::parser::parse;
    use crate::source::SourceMap;

    fn run_src(src: &str) -> i32 {
        let sm = SourceMap::new("<test>", src);
        let script = parse(&sm).unwrap();
        let checked = crate::typecheck::check(&sm, script).unwrap();
        let program = compile(&checked);
        let mut vm = Vm::new(&program, &checked.pool);
        vm.run()
    }

    #[test]
    fn arithmetic_assert_passes() {
        assert_eq!(run_src("assert 1 + 2 == 3"), 0);
    }

    #[test]
    fn function_call_returns_value() {
        assert_eq!(
            run_src("function double(n: Int): Int { return $n * 2 }\nassert double(21) == 42"),
            0
        );
    }

    #[test]
    fn for_loop_sums_array() {
        assert_eq!(
            run_src("var total = 0\nfor (x in [1,2,3,4]) { total = total + x }\nassert total == 10"),
            0
        );
    }

    #[test]
    fn random_var_is_in_range() {
        assert_eq!(run_src("var r = $RANDOM\nassert r >= 0\nassert r < 32768"), 0);
    }
}

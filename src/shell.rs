//! Top-level driver (C1-C9 glue): wires lexer -> parser -> typecheck ->
//! codegen -> VM for one source unit, and exposes the pieces the CLI and
//! the `eval`/`source` builtins need.

use crate::codegen::compile;
use crate::error::CompileError;
use crate::exec::ExecCtx;
use crate::parser::parse;
use crate::source::SourceMap;
use crate::vm::Vm;

/// Runs `source` as a fresh script against a fresh interpreter state,
/// returning its exit status. Used by the `eval` builtin and `-c`.
pub fn run_source(ctx: &mut ExecCtx, source: &str) -> i32 {
    match run(source) {
        Ok(status) => {
            ctx.last_status = status;
            status
        }
        Err(e) => {
            eprintln!("rash: {e}");
            2
        }
    }
}

pub fn run(source: &str) -> Result<i32, CompileError> {
    let sm = SourceMap::new("<shell>", source);
    let script = parse(&sm)?;
    let checked = crate::typecheck::check(&sm, script)?;
    let program = compile(&checked);
    let mut vm = Vm::new(&program, &checked.pool);
    Ok(vm.run())
}

/// Reads `path` and runs it as a script (the `source`/`.` statement and
/// non-interactive file invocation both funnel through here).
pub fn run_file(path: &str) -> Result<i32, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
    run(&text).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_minimal_script() {
        assert_eq!(run("assert 1 == 1").unwrap(), 0);
    }
}

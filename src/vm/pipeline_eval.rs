//! Expands a `Pipeline`'s `CmdArg`s into `argv` strings at the point a
//! `RunPipeline` instruction fires.
//!
//! Command arguments reference the enclosing chunk's locals by name
//! (`ExprKind::Var`), not by the slot index the rest of the VM uses, so
//! expansion works against a name -> value snapshot of the current frame
//! rather than the operand-stack/slot machinery `step` uses for ordinary
//! expressions.

use std::collections::HashMap;

use crate::ast::{CmdArg, Expr, ExprKind, Pipeline};
use crate::codegen::Chunk;
use crate::value::Value;

use super::Vm;

pub fn frame_env(chunk: &Chunk, locals: &[Value]) -> HashMap<String, Value> {
    chunk
        .local_names
        .iter()
        .enumerate()
        .filter_map(|(slot, name)| locals.get(slot).map(|v| (name.clone(), v.clone())))
        .collect()
}

pub fn resolve_argv(vm: &mut Vm, pipeline: &Pipeline, env: &HashMap<String, Value>) -> Vec<Vec<String>> {
    pipeline
        .commands
        .iter()
        .map(|cmd| {
            let mut argv = expand_glob(arg_text(vm, &cmd.name, env));
            for a in &cmd.args {
                argv.extend(expand_glob(arg_text(vm, a, env)));
            }
            argv
        })
        .collect()
}

/// Expands a resolved argument against the filesystem when it contains glob
/// metacharacters (`*`, `?`, `[`), per spec.md line 166. Passes the text
/// through literally if it matches nothing (no NULLGLOB support).
fn expand_glob(arg: String) -> Vec<String> {
    if !arg.contains(['*', '?', '[']) {
        return vec![arg];
    }
    let Ok(paths) = glob::glob(&arg) else {
        return vec![arg];
    };
    let mut matches: Vec<String> = paths.filter_map(Result::ok).map(|p| p.to_string_lossy().into_owned()).collect();
    if matches.is_empty() {
        return vec![arg];
    }
    matches.sort();
    matches
}

/// Resolves every command's redirection targets the same way `argv` is
/// resolved: variables, interpolation and command substitution all work
/// in a redirection target (`echo x > $file`), not just string literals,
/// since by the time the forked child applies redirections it can no
/// longer safely touch `Rc`-based `Value`s shared with the parent.
pub fn resolve_redirs(vm: &mut Vm, pipeline: &Pipeline, env: &HashMap<String, Value>) -> Vec<Vec<Option<String>>> {
    pipeline
        .commands
        .iter()
        .map(|cmd| cmd.redirs.iter().map(|r| r.target.as_ref().map(|t| arg_text(vm, t, env))).collect())
        .collect()
}

fn arg_text(vm: &mut Vm, arg: &CmdArg, env: &HashMap<String, Value>) -> String {
    arg.segments.iter().map(|e| eval(vm, e, env).to_display_string()).collect()
}

fn eval(vm: &mut Vm, e: &Expr, env: &HashMap<String, Value>) -> Value {
    match &e.kind {
        ExprKind::StringLiteral(s) => Value::string(s.clone()),
        ExprKind::IntLiteral(n) => Value::Int(*n),
        ExprKind::FloatLiteral(n) => Value::Float(*n),
        ExprKind::BoolLiteral(b) => Value::Bool(*b),
        ExprKind::Var(name) if name == "RANDOM" => Value::Int(rand::random::<u16>() as i64 % 32768),
        ExprKind::Var(name) => env.get(name).cloned().unwrap_or(Value::Void),
        ExprKind::StringInterp(parts) => {
            Value::string(parts.iter().map(|p| eval(vm, p, env).to_display_string()).collect::<String>())
        }
        ExprKind::Tilde(suffix) => {
            let home = std::env::var("HOME").unwrap_or_default();
            match suffix {
                Some(s) => Value::string(format!("{home}/{s}")),
                None => Value::string(home),
            }
        }
        ExprKind::Access(base, field) => {
            let b = eval(vm, base, env);
            super::methods::load_field(&b, field)
        }
        ExprKind::Index(base, idx) => {
            let b = eval(vm, base, env);
            let i = eval(vm, idx, env);
            super::methods::index(&b, &i).unwrap_or(Value::Void)
        }
        ExprKind::MethodCall(recv, name, args) => {
            let r = eval(vm, recv, env);
            let a: Vec<Value> = args.iter().map(|x| eval(vm, x, env)).collect();
            super::methods::call(&r, name, &a).unwrap_or(Value::Void)
        }
        ExprKind::CmdSubst(p) | ExprKind::ProcSubst(p) => {
            let argvs = resolve_argv(vm, p, env);
            let (out, status) = match vm.try_run_as_callable(p, &argvs) {
                Some(r) => r,
                None => {
                    let redirs = resolve_redirs(vm, p, env);
                    crate::exec::capture_pipeline(&mut vm.ctx, p, &argvs, &redirs)
                }
            };
            vm.ctx.last_status = status;
            Value::string(out)
        }
        _ => Value::Void,
    }
}

#[cfg(test)]
mod tests {
    use super::expand_glob;

    #[test]
    fn literal_without_wildcards_passes_through() {
        assert_eq!(expand_glob("hello.txt".to_string()), vec!["hello.txt".to_string()]);
    }

    #[test]
    fn unmatched_pattern_passes_through_literally() {
        assert_eq!(expand_glob("/no/such/dir/*.nope".to_string()), vec!["/no/such/dir/*.nope".to_string()]);
    }

    #[test]
    fn matching_pattern_expands_to_sorted_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        let pattern = dir.path().join("*.txt").to_string_lossy().into_owned();
        let matches = expand_glob(pattern);
        assert_eq!(matches.len(), 2);
        assert!(matches[0].ends_with("a.txt"));
        assert!(matches[1].ends_with("b.txt"));
    }
}

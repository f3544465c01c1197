//! End-to-end scenarios run against the built `rash` binary: each drives a
//! full source unit through lex -> parse -> typecheck -> codegen -> VM and
//! checks observable process behavior (stdout, stderr, exit status), the
//! way a user invoking the interpreter would see it.

use std::process::{Command, Output};

fn run(script: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rash"))
        .arg("-c")
        .arg(script)
        .output()
        .expect("failed to run rash binary")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn pipeline_through_external_filter() {
    let out = run("echo hello | tr a-z A-Z");
    assert_eq!(stdout(&out), "HELLO\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn array_indexing_and_size_method() {
    let out = run("var x = [1,2,3]; assert $x.size() == 3; echo ${x[1]}");
    assert_eq!(stdout(&out), "2\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn caught_division_by_zero_recovers() {
    let out = run("try { 1/0 } catch e { echo caught }");
    assert_eq!(stdout(&out), "caught\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn uncaught_division_by_zero_exits_nonzero_with_typed_error() {
    let out = run("1/0");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("ArithmeticError"), "stderr was: {}", stderr(&out));
}

#[test]
fn recursive_function_invoked_as_command_substitution() {
    // `$(($n - 1))`-style nested arithmetic substitution has no literal
    // syntax here; `${...}` is this language's general-expression
    // substitution and plays the equivalent role inside a command argument.
    let out = run(
        r#"
        function f(n: Int): Int {
            if $n <= 1 { return 1 }
            return $n * f($n - 1)
        }
        echo $(f 5)
        "#,
    );
    assert_eq!(stdout(&out), "120\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn loop_break_value_is_discarded_in_statement_position() {
    let out = run("for i in 1..3 { if $i == 2 { break 99 } }; echo done");
    assert_eq!(stdout(&out), "done\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn exit_runs_finally_blocks_before_terminating_with_status() {
    let out = run(
        r#"
        try {
            exit 7
        } finally {
            echo fin
        }
        "#,
    );
    assert_eq!(stdout(&out), "fin\n");
    assert_eq!(out.status.code(), Some(7));
}

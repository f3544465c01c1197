//! `rash` CLI entry point (§6 external interfaces).

use clap::Parser;
use rash_core::codegen::compile;
use rash_core::parser::parse;
use rash_core::source::SourceMap;
use rash_core::vm::Vm;

#[derive(Parser, Debug)]
#[command(name = "rash", version, about = "A statically-typed, bytecode-compiled shell.")]
struct Cli {
    /// Evaluate STR as a script and exit.
    #[arg(short = 'c', value_name = "STR")]
    command: Option<String>,

    /// Run the builtin named CMD directly, bypassing script parsing.
    #[arg(short = 'e', value_name = "CMD")]
    exec_builtin: Option<String>,

    /// Read the script from stdin.
    #[arg(short = 's')]
    stdin: bool,

    /// Force interactive mode even when stdin isn't a tty.
    #[arg(short = 'i')]
    interactive: bool,

    /// Compile (lex+parse+typecheck+codegen) but don't run.
    #[arg(short = 'n', long = "compile-only")]
    compile_only: bool,

    #[arg(long = "parse-only")]
    parse_only: bool,

    #[arg(long = "check-only")]
    check_only: bool,

    #[arg(long = "disable-assertion")]
    disable_assertion: bool,

    #[arg(long = "trace-exit")]
    trace_exit: bool,

    #[arg(long = "rcfile", value_name = "PATH")]
    rcfile: Option<String>,

    #[arg(long = "norc")]
    norc: bool,

    #[arg(long = "quiet")]
    quiet: bool,

    #[arg(long = "status-log", value_name = "PATH")]
    status_log: Option<String>,

    #[arg(long = "dump-untyped-ast", value_name = "PATH", num_args = 0..=1, default_missing_value = "-")]
    dump_untyped_ast: Option<String>,

    #[arg(long = "dump-ast", value_name = "PATH", num_args = 0..=1, default_missing_value = "-")]
    dump_ast: Option<String>,

    #[arg(long = "dump-code", value_name = "PATH", num_args = 0..=1, default_missing_value = "-")]
    dump_code: Option<String>,

    /// Print the list of compiled-in optional features and exit.
    #[arg(long = "feature")]
    feature: bool,

    /// Script file to run, with any trailing positional args.
    #[arg(trailing_var_arg = true)]
    script_args: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = run(&cli);
    std::process::exit(code);
}

/// Optional compiled-in features this build advertises via `--feature`
/// (ydsh's `USE_LOGGING`/`USE_SAFE_CAST` equivalent). None yet.
const FEATURES: &[&str] = &[];

fn run(cli: &Cli) -> i32 {
    if cli.feature {
        for f in FEATURES {
            println!("{f}");
        }
        return 0;
    }

    if let Some(name) = &cli.exec_builtin {
        let mut ctx = rash_core::exec::ExecCtx::new();
        let table = rash_core::builtins::table();
        return table.get(name.as_str()).map(|f| f(&mut ctx, &cli.script_args)).unwrap_or(127);
    }

    if cli.interactive && !cli.quiet {
        eprintln!("rash {}", env!("CARGO_PKG_VERSION"));
    }

    let (file_name, mut source) = if let Some(s) = &cli.command {
        ("-c".to_string(), s.clone())
    } else if cli.stdin {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).unwrap_or(0);
        ("<stdin>".to_string(), buf)
    } else if let Some(path) = cli.script_args.first() {
        match std::fs::read_to_string(path) {
            Ok(s) => (path.clone(), s),
            Err(e) => {
                if !cli.quiet {
                    eprintln!("rash: {path}: {e}");
                }
                write_status_log(cli, 1, 0, "FileError", path);
                return 127;
            }
        }
    } else {
        if !cli.quiet {
            eprintln!("rash: no script provided (use -c, -s, or a file argument)");
        }
        return 2;
    };

    if cli.interactive && !cli.norc {
        let rc_path = cli.rcfile.clone().unwrap_or_else(default_rc_path);
        if let Ok(rc_source) = std::fs::read_to_string(&rc_path) {
            source = format!("{rc_source}\n{source}");
        }
    }

    let sm = SourceMap::new(&file_name, source);
    let script = match parse(&sm) {
        Ok(s) => s,
        Err(e) => {
            if !cli.quiet {
                eprintln!("rash: parse error: {e}");
            }
            write_status_log(cli, 2, error_line(&e.to_string()), "ParseError", &file_name);
            return 2;
        }
    };
    if let Some(path) = &cli.dump_untyped_ast {
        write_dump(path, &format!("{script:#?}"));
    }
    if cli.parse_only {
        return 0;
    }

    let checked = match rash_core::typecheck::check(&sm, script) {
        Ok(c) => c,
        Err(e) => {
            if !cli.quiet {
                eprintln!("rash: type error: {e}");
            }
            write_status_log(cli, 3, error_line(&e.to_string()), "TypeError", &file_name);
            return 2;
        }
    };
    if let Some(path) = &cli.dump_ast {
        write_dump(path, "<checked ast, see codegen dump for a textual form>");
    }
    if cli.check_only {
        return 0;
    }

    let program = compile(&checked);
    if let Some(path) = &cli.dump_code {
        write_dump(path, &program.main.disassemble("main"));
    }
    if cli.compile_only {
        return 0;
    }

    let mut vm = Vm::new(&program, &checked.pool);
    vm.ctx.assertions_disabled = cli.disable_assertion;
    let status = vm.run();
    if cli.trace_exit && !cli.quiet {
        eprintln!("rash: exit {status}");
    }
    write_status_log(cli, 0, 0, "", &file_name);
    status
}

fn default_rc_path() -> String {
    std::env::var("HOME").map(|home| format!("{home}/.rashrc")).unwrap_or_else(|_| ".rashrc".to_string())
}

/// Pulls the `line: N` out of a `Position`'s `Debug` rendering embedded in
/// an error's display text, for the status log's `lineNum` field. Falls
/// back to `0` if the error carries no position.
fn error_line(message: &str) -> i32 {
    message
        .split("line: ")
        .nth(1)
        .and_then(|rest| rest.split(|c: char| !c.is_ascii_digit()).next())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// Writes the `--status-log` line (spec.md §6): `kind=<int> lineNum=<int>
/// name="<escaped>" fileName="<escaped>"`.
fn write_status_log(cli: &Cli, kind: i32, line_num: i32, name: &str, file_name: &str) {
    let Some(path) = &cli.status_log else { return };
    let line = format!("kind={kind} lineNum={line_num} name={} fileName={}\n", escape(name), escape(file_name));
    let _ = std::fs::write(path, line);
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn write_dump(path: &str, text: &str) {
    if path == "-" {
        println!("{text}");
    } else if let Err(e) = std::fs::write(path, text) {
        eprintln!("rash: failed to write dump to {path}: {e}");
    }
}

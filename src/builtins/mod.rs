//! Builtin command table (C11): the closed set of commands the executor
//! resolves before falling back to `$PATH`.

use std::collections::HashMap;

use crate::exec::ExecCtx;

pub type BuiltinFn = fn(&mut ExecCtx, &[String]) -> i32;

pub fn table() -> HashMap<&'static str, BuiltinFn> {
    let mut m: HashMap<&'static str, BuiltinFn> = HashMap::new();
    m.insert(":", noop);
    m.insert("true", true_cmd);
    m.insert("false", false_cmd);
    m.insert("cd", cd);
    m.insert("pwd", pwd);
    m.insert("echo", echo);
    m.insert("exit", exit);
    m.insert("test", test_cmd);
    m.insert("[", test_cmd);
    m.insert("read", read_cmd);
    m.insert("kill", kill);
    m.insert("setenv", setenv);
    m.insert("unsetenv", unsetenv);
    m.insert("umask", umask);
    m.insert("command", command);
    m.insert("eval", eval);
    m.insert("__puts", puts_builtin);
    m.insert("__gets", gets_builtin);
    m.insert("hash", hash);
    m.insert("help", help);
    m.insert("ulimit", ulimit);
    m.insert("shctl", shctl);
    m.insert("exec", exec_builtin);
    m.insert("fg", fg);
    m.insert("bg", bg);
    m
}

fn noop(_ctx: &mut ExecCtx, _args: &[String]) -> i32 {
    0
}

fn true_cmd(_ctx: &mut ExecCtx, _args: &[String]) -> i32 {
    0
}

fn false_cmd(_ctx: &mut ExecCtx, _args: &[String]) -> i32 {
    1
}

fn cd(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    let target = args.first().cloned().unwrap_or_else(|| std::env::var("HOME").unwrap_or_else(|_| "/".into()));
    match std::env::set_current_dir(&target) {
        Ok(()) => {
            ctx.pwd = std::env::current_dir().unwrap_or_default().to_string_lossy().into_owned();
            0
        }
        Err(e) => {
            tracing::error!(target = %target, error = %e, "cd failed");
            1
        }
    }
}

fn pwd(ctx: &mut ExecCtx, _args: &[String]) -> i32 {
    println!("{}", ctx.pwd);
    0
}

fn echo(_ctx: &mut ExecCtx, args: &[String]) -> i32 {
    println!("{}", args.join(" "));
    0
}

fn exit(_ctx: &mut ExecCtx, args: &[String]) -> i32 {
    let code: i32 = args.first().and_then(|s| s.parse().ok()).unwrap_or(0);
    std::process::exit(code);
}

fn test_cmd(_ctx: &mut ExecCtx, args: &[String]) -> i32 {
    crate::builtins::test_impl::eval(args)
}

fn read_cmd(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
        return 1;
    }
    let line = line.trim_end_matches('\n');
    if let Some(name) = args.first() {
        ctx.env.insert(name.clone(), line.to_string());
    }
    0
}

fn kill(_ctx: &mut ExecCtx, args: &[String]) -> i32 {
    let Some(pid_arg) = args.last() else { return 1 };
    let Ok(pid) = pid_arg.trim_start_matches('%').parse::<i32>() else { return 1 };
    let sig = if args.len() > 1 { parse_signal(&args[0]) } else { libc::SIGTERM };
    unsafe { libc::kill(pid, sig) };
    0
}

fn parse_signal(s: &str) -> i32 {
    let s = s.trim_start_matches('-');
    s.strip_prefix("SIG").unwrap_or(s).parse().unwrap_or(libc::SIGTERM)
}

fn setenv(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    if let [name, value] = args {
        std::env::set_var(name, value);
        ctx.env.insert(name.clone(), value.clone());
    }
    0
}

fn unsetenv(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    if let Some(name) = args.first() {
        std::env::remove_var(name);
        ctx.env.remove(name);
    }
    0
}

fn umask(_ctx: &mut ExecCtx, args: &[String]) -> i32 {
    if let Some(mask) = args.first().and_then(|s| u32::from_str_radix(s, 8).ok()) {
        unsafe { libc::umask(mask) };
    }
    0
}

fn command(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    let Some((name, rest)) = args.split_first() else { return 0 };
    crate::exec::run_external(ctx, name, rest)
}

fn eval(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    let src = args.join(" ");
    crate::shell::run_source(ctx, &src)
}

/// `printf`-less raw write: joins its arguments with spaces and writes
/// them with no trailing newline, the primitive `echo` is built on top of
/// in a full implementation.
fn puts_builtin(_ctx: &mut ExecCtx, args: &[String]) -> i32 {
    use std::io::Write;
    print!("{}", args.join(" "));
    let _ = std::io::stdout().flush();
    0
}

/// `printf`-less raw read: one line from stdin into the named variable
/// (`REPLY` if none given). Returns `1` on EOF, same convention as `read`.
fn gets_builtin(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
        return 1;
    }
    let line = line.trim_end_matches('\n');
    let name = args.first().map(String::as_str).unwrap_or("REPLY");
    ctx.env.insert(name.to_string(), line.to_string());
    0
}

fn which(name: &str) -> Option<String> {
    if name.contains('/') {
        return std::path::Path::new(name).is_file().then(|| name.to_string());
    }
    let path = std::env::var("PATH").ok()?;
    path.split(':').map(|dir| std::path::Path::new(dir).join(name)).find(|p| p.is_file()).map(|p| p.to_string_lossy().into_owned())
}

/// Reports the resolved path of each named command (a real PATH cache
/// with eviction is out of scope — this always searches fresh).
fn hash(_ctx: &mut ExecCtx, args: &[String]) -> i32 {
    if args.is_empty() {
        println!("hash: no commands hashed");
        return 0;
    }
    let mut ok = true;
    for name in args {
        match which(name) {
            Some(path) => println!("{path}"),
            None => {
                eprintln!("hash: {name}: not found");
                ok = false;
            }
        }
    }
    i32::from(!ok)
}

fn help(_ctx: &mut ExecCtx, _args: &[String]) -> i32 {
    let mut names: Vec<&str> = table().into_keys().collect();
    names.sort_unstable();
    println!("built-in commands: {}", names.join(", "));
    0
}

fn rlimit_of(resource: u32) -> libc::rlimit {
    let mut lim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    unsafe { libc::getrlimit(resource, &mut lim) };
    lim
}

fn format_rlim(v: libc::rlim_t) -> String {
    if v == libc::RLIM_INFINITY {
        "unlimited".to_string()
    } else {
        v.to_string()
    }
}

fn ulimit_resource(flag: &str) -> Option<u32> {
    Some(match flag {
        "-n" => libc::RLIMIT_NOFILE,
        "-f" => libc::RLIMIT_FSIZE,
        "-u" => libc::RLIMIT_NPROC,
        "-s" => libc::RLIMIT_STACK,
        _ => return None,
    })
}

fn ulimit(_ctx: &mut ExecCtx, args: &[String]) -> i32 {
    if args.first().map(String::as_str) == Some("-a") {
        for flag in ["-n", "-f", "-u", "-s"] {
            let resource = ulimit_resource(flag).unwrap();
            println!("{flag}\t{}", format_rlim(rlimit_of(resource).rlim_cur));
        }
        return 0;
    }
    let flag = args.first().map(String::as_str).unwrap_or("-f");
    let Some(resource) = ulimit_resource(flag) else { return 1 };
    match args.get(1) {
        Some(v) => {
            let cur = rlimit_of(resource);
            let Some(new_cur) = (if v == "unlimited" { Some(libc::RLIM_INFINITY) } else { v.parse().ok() }) else {
                return 1;
            };
            let lim = libc::rlimit { rlim_cur: new_cur, rlim_max: cur.rlim_max };
            i32::from(unsafe { libc::setrlimit(resource, &lim) } != 0)
        }
        None => {
            println!("{}", format_rlim(rlimit_of(resource).rlim_cur));
            0
        }
    }
}

/// Shell-option introspection/toggling (`shctl get|set|unset NAME`, or no
/// arguments to dump every option that has been touched this session).
fn shctl(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    match args {
        [] => {
            for (name, value) in &ctx.options {
                println!("{name}\t{value}");
            }
            0
        }
        [sub, name] if sub == "get" => i32::from(!*ctx.options.get(name).unwrap_or(&false)),
        [sub, name] if sub == "set" => {
            ctx.options.insert(name.clone(), true);
            0
        }
        [sub, name] if sub == "unset" => {
            ctx.options.insert(name.clone(), false);
            0
        }
        _ => 1,
    }
}

/// Without an operand, a full implementation would apply the current
/// command's redirection list in place; builtins don't currently see
/// their invoking `Command`'s redirs, so this treats a bare `exec` as a
/// no-op. With an operand, replaces the current process via `execvp`.
fn exec_builtin(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    let Some((name, rest)) = args.split_first() else { return 0 };
    let mut argv = vec![name.clone()];
    argv.extend(rest.iter().cloned());
    crate::exec::exec_in_place(&argv);
    ctx.last_status = 127;
    127
}

fn resolve_job_id(ctx: &ExecCtx, args: &[String]) -> Option<u32> {
    match args.first() {
        Some(s) => s.trim_start_matches('%').parse().ok(),
        None => ctx.jobs.all().iter().map(|j| j.job_id).max(),
    }
}

fn fg(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    let Some(id) = resolve_job_id(ctx, args) else { return 1 };
    let Some(pgid) = ctx.jobs.find(id).map(|j| j.pgid) else { return 1 };
    unsafe { libc::kill(-pgid, libc::SIGCONT) };
    ctx.jobs.update_status(id, crate::exec::JobState::Running);
    match ctx.jobs.wait_and_detach(id) {
        Some(code) => {
            ctx.last_status = code;
            code
        }
        None => 1,
    }
}

fn bg(ctx: &mut ExecCtx, args: &[String]) -> i32 {
    let Some(id) = resolve_job_id(ctx, args) else { return 1 };
    let Some(pgid) = ctx.jobs.find(id).map(|j| j.pgid) else { return 1 };
    unsafe { libc::kill(-pgid, libc::SIGCONT) };
    ctx.jobs.update_status(id, crate::exec::JobState::Running);
    println!("[{id}] {pgid}");
    0
}

mod test_impl {
    pub fn eval(args: &[String]) -> i32 {
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match refs.as_slice() {
            [a] => i32::from(a.is_empty()),
            [a, op, b] => {
                let pass = match *op {
                    "=" => a == b,
                    "!=" => a != b,
                    "-eq" => a.parse::<i64>().ok() == b.parse::<i64>().ok(),
                    "-ne" => a.parse::<i64>().ok() != b.parse::<i64>().ok(),
                    "-lt" => a.parse::<i64>().unwrap_or(0) < b.parse::<i64>().unwrap_or(0),
                    "-gt" => a.parse::<i64>().unwrap_or(0) > b.parse::<i64>().unwrap_or(0),
                    "-le" => a.parse::<i64>().unwrap_or(0) <= b.parse::<i64>().unwrap_or(0),
                    "-ge" => a.parse::<i64>().unwrap_or(0) >= b.parse::<i64>().unwrap_or(0),
                    _ => false,
                };
                i32::from(!pass)
            }
            ["-z", a] => i32::from(!a.is_empty()),
            ["-n", a] => i32::from(a.is_empty()),
            ["-f", a] => i32::from(!std::path::Path::new(a).is_file()),
            ["-d", a] => i32::from(!std::path::Path::new(a).is_dir()),
            ["-e", a] => i32::from(!std::path::Path::new(a).exists()),
            _ => 1,
        }
    }
}

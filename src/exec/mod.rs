//! Process/pipeline executor (C10).
//!
//! Runs a parsed `Pipeline` against real POSIX processes: `fork`+`pipe`+
//! `execvp`+`waitpid` via `libc`, with redirections applied in the child
//! before `exec`. Background pipelines (`&`) are tracked in a job table so
//! `fg`/`bg`/`kill %N` can find them again.

mod job;
mod redir;

pub use job::{Job, JobState, JobTable};

use std::collections::HashMap;
use std::ffi::CString;

use crate::ast::{Command, ForkKind, Pipeline, RedirOp};
use crate::value::{JobHandle, JobStatus};

/// Shared state threaded through command execution: the working directory,
/// process-local environment overlay, the job table, and the `shctl`
/// option set (`errexit`, `nounset`, `xtrace`, ... — unset names read as
/// `false`).
pub struct ExecCtx {
    pub pwd: String,
    pub env: HashMap<String, String>,
    pub jobs: JobTable,
    pub last_status: i32,
    pub options: HashMap<String, bool>,
    /// Set by `--disable-assertion` (§6); when true, `assert` statements
    /// evaluate their condition but never throw on failure.
    pub assertions_disabled: bool,
}

impl ExecCtx {
    pub fn new() -> Self {
        ExecCtx {
            pwd: std::env::current_dir().unwrap_or_default().to_string_lossy().into_owned(),
            env: std::env::vars().collect(),
            jobs: JobTable::new(),
            last_status: 0,
            options: HashMap::new(),
            assertions_disabled: false,
        }
    }
}

impl Default for ExecCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a pipeline to completion (or backgrounds it), returning the exit
/// status that should become the pipeline expression's value.
pub fn run_pipeline(ctx: &mut ExecCtx, pipeline: &Pipeline, resolved: &[Vec<String>], redirs: &[Vec<Option<String>>]) -> i32 {
    let n = pipeline.commands.len();
    if n == 0 {
        return 0;
    }

    let builtins = crate::builtins::table();
    if n == 1 && pipeline.fork.is_none() {
        if let Some(f) = builtins.get(resolved[0][0].as_str()) {
            let status = f(ctx, &resolved[0][1..]);
            ctx.last_status = status;
            return status;
        }
    }

    let mut pipes = Vec::with_capacity(n.saturating_sub(1));
    for _ in 0..n.saturating_sub(1) {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return 127;
        }
        pipes.push(fds);
    }

    let pgid_holder = std::cell::Cell::new(0i32);
    let mut pids = Vec::with_capacity(n);
    let mut errfds = Vec::with_capacity(n);
    for (i, (cmd, argv)) in pipeline.commands.iter().zip(resolved.iter()).enumerate() {
        let read_end = if i > 0 { Some(pipes[i - 1][0]) } else { None };
        let write_end = if i < n - 1 { Some(pipes[i][1]) } else { None };
        let mut errpipe = [0i32; 2];
        if unsafe { libc::pipe2(errpipe.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return 127;
        }
        match unsafe { libc::fork() } {
            -1 => return 127,
            0 => {
                unsafe { libc::close(errpipe[0]) };
                let pid = unsafe { libc::getpid() };
                let pgid = if pgid_holder.get() == 0 { pid } else { pgid_holder.get() };
                unsafe { libc::setpgid(0, pgid) };
                wire_pipes(read_end, write_end, &pipes);
                if apply_redirs(cmd, &redirs[i], errpipe[1]) {
                    exec_external(argv, errpipe[1]);
                }
                unsafe { libc::_exit(1) };
            }
            pid => {
                unsafe { libc::close(errpipe[1]) };
                if pgid_holder.get() == 0 {
                    pgid_holder.set(pid);
                }
                unsafe { libc::setpgid(pid, pgid_holder.get()) };
                pids.push(pid);
                errfds.push(errpipe[0]);
            }
        }
    }
    for fds in &pipes {
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
    for (i, errfd) in errfds.iter().enumerate() {
        if let Some(report) = redir::read_error(*errfd) {
            report_child_error(&resolved[i], &pipeline.commands[i], &redirs[i], report);
        }
        unsafe { libc::close(*errfd) };
    }

    if pipeline.fork.is_some() {
        let job = ctx.jobs.register(pgid_holder.get(), pids.clone());
        if matches!(pipeline.fork, Some(ForkKind::Background) | Some(ForkKind::PipeBg)) {
            println!("[{}] {}", job.job_id, pgid_holder.get());
        }
        return 0;
    }

    let mut status = 0;
    for pid in pids {
        let mut wstatus = 0;
        unsafe { libc::waitpid(pid, &mut wstatus, 0) };
        status = exit_code_of(wstatus);
    }
    ctx.last_status = status;
    status
}

/// Prints a diagnostic for a child's self-pipe error report, naming the
/// failing redirection (or the command itself, for an `execvp` failure)
/// and its errno — the same information `report` carries (§4.8).
fn report_child_error(argv: &[String], cmd: &Command, redirs: &[Option<String>], report: redir::ErrReport) {
    let msg = std::io::Error::from_raw_os_error(report.errno);
    if report.redir_index < 0 {
        let name = argv.first().map(String::as_str).unwrap_or("?");
        eprintln!("{name}: {msg}");
    } else if let (Some(redir), Some(target)) =
        (cmd.redirs.get(report.redir_index as usize), redirs.get(report.redir_index as usize).and_then(|t| t.as_deref()))
    {
        eprintln!("{:?} {target}: {msg}", redir.op);
    }
}

/// Runs `pipeline` with its stdout captured rather than inherited, for
/// `$(...)`/`@(...)` substitution. Forks a supervisor around the normal
/// `run_pipeline` so the pipeline's own internal forking is untouched;
/// trailing newlines are stripped from the captured text per shell
/// command-substitution convention.
pub fn capture_pipeline(
    ctx: &mut ExecCtx,
    pipeline: &Pipeline,
    resolved: &[Vec<String>],
    redirs: &[Vec<Option<String>>],
) -> (String, i32) {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return (String::new(), 127);
    }
    match unsafe { libc::fork() } {
        -1 => (String::new(), 127),
        0 => {
            unsafe {
                libc::close(fds[0]);
                libc::dup2(fds[1], 1);
                libc::close(fds[1]);
            }
            let status = run_pipeline(ctx, pipeline, resolved, redirs);
            unsafe { libc::_exit(status) };
        }
        pid => {
            unsafe { libc::close(fds[1]) };
            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];
            loop {
                let n = unsafe { libc::read(fds[0], tmp.as_mut_ptr() as *mut libc::c_void, tmp.len()) };
                if n <= 0 {
                    break;
                }
                buf.extend_from_slice(&tmp[..n as usize]);
            }
            unsafe { libc::close(fds[0]) };
            let mut wstatus = 0;
            unsafe { libc::waitpid(pid, &mut wstatus, 0) };
            let status = exit_code_of(wstatus);
            let mut out = String::from_utf8_lossy(&buf).into_owned();
            while out.ends_with('\n') {
                out.pop();
            }
            (out, status)
        }
    }
}

fn wire_pipes(read_end: Option<i32>, write_end: Option<i32>, pipes: &[[i32; 2]]) {
    if let Some(fd) = read_end {
        unsafe {
            libc::dup2(fd, 0);
        }
    }
    if let Some(fd) = write_end {
        unsafe {
            libc::dup2(fd, 1);
        }
    }
    for fds in pipes {
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}

/// Applies `cmd`'s redirection list in order, using the already-resolved
/// target text in `targets` (same order as `cmd.redirs`; `None` for
/// redirections with no target, e.g. `2>&1`). On the first failure,
/// reports `{errno, redirIndex}` through `errfd` and returns `false` so
/// the caller skips `exec` (§4.8); returns `true` if every redirection
/// applied cleanly.
fn apply_redirs(cmd: &Command, targets: &[Option<String>], errfd: i32) -> bool {
    for (i, redir) in cmd.redirs.iter().enumerate() {
        let path = targets.get(i).and_then(|t| t.as_deref()).unwrap_or("");
        let result = match redir.op {
            RedirOp::In | RedirOp::HereString => redir::dup_onto(path, libc::O_RDONLY, 0, 0),
            RedirOp::Out => redir::dup_onto(path, libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o644, 1),
            RedirOp::Append => redir::dup_onto(path, libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND, 0o644, 1),
            RedirOp::ErrOut => redir::dup_onto(path, libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o644, 2),
            RedirOp::ErrAppend => redir::dup_onto(path, libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND, 0o644, 2),
            RedirOp::OutErr => redir::dup_onto(path, libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o644, 1).map(|_| unsafe {
                libc::dup2(1, 2);
            }),
            RedirOp::OutErrApp => redir::dup_onto(path, libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND, 0o644, 1).map(|_| unsafe {
                libc::dup2(1, 2);
            }),
            RedirOp::DupErr => {
                unsafe { libc::dup2(2, 1) };
                Ok(())
            }
            RedirOp::DupOut => {
                unsafe { libc::dup2(1, 2) };
                Ok(())
            }
        };
        if let Err(errno) = result {
            redir::report_error(errfd, redir::ErrReport::redir_failed(i, errno));
            return false;
        }
    }
    true
}

/// `errfd < 0` means there is no self-pipe to report through (the
/// standalone `run_external` path, outside pipeline execution).
fn exec_external(argv: &[String], errfd: i32) {
    let Some(prog) = argv.first() else { return };
    let Ok(cprog) = CString::new(prog.as_bytes()) else { return };
    let cargs: Vec<CString> = argv.iter().filter_map(|a| CString::new(a.as_bytes()).ok()).collect();
    let mut raw: Vec<*const libc::c_char> = cargs.iter().map(|a| a.as_ptr()).collect();
    raw.push(std::ptr::null());
    unsafe {
        libc::execvp(cprog.as_ptr(), raw.as_ptr());
    }
    if errfd >= 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        redir::report_error(errfd, redir::ErrReport::exec_failed(errno));
    }
}

/// Runs `name argv...` bypassing builtin resolution (used by the `command`
/// builtin to force external lookup).
pub fn run_external(ctx: &mut ExecCtx, name: &str, args: &[String]) -> i32 {
    let mut argv = vec![name.to_string()];
    argv.extend(args.iter().cloned());
    match unsafe { libc::fork() } {
        -1 => 127,
        0 => {
            exec_external(&argv, -1);
            unsafe { libc::_exit(127) };
        }
        pid => {
            let mut wstatus = 0;
            unsafe { libc::waitpid(pid, &mut wstatus, 0) };
            let status = exit_code_of(wstatus);
            ctx.last_status = status;
            status
        }
    }
}

/// `execvp`s in the *current* process (no fork), for the `exec` builtin
/// with a command operand (§4.8). Only returns on failure, having printed
/// a diagnostic; the caller is responsible for an exit status.
pub fn exec_in_place(argv: &[String]) {
    let Some(prog) = argv.first() else { return };
    let Ok(cprog) = CString::new(prog.as_bytes()) else { return };
    let cargs: Vec<CString> = argv.iter().filter_map(|a| CString::new(a.as_bytes()).ok()).collect();
    let mut raw: Vec<*const libc::c_char> = cargs.iter().map(|a| a.as_ptr()).collect();
    raw.push(std::ptr::null());
    unsafe {
        libc::execvp(cprog.as_ptr(), raw.as_ptr());
    }
    eprintln!("exec: {prog}: {}", std::io::Error::last_os_error());
}

fn exit_code_of(wstatus: i32) -> i32 {
    {
        if libc::WIFEXITED(wstatus) {
            libc::WEXITSTATUS(wstatus)
        } else if libc::WIFSIGNALED(wstatus) {
            128 + libc::WTERMSIG(wstatus)
        } else {
            1
        }
    }
}

/// Polls background jobs for state transitions without blocking, updating
/// the job table (called at VM instruction boundaries alongside signals).
pub fn reap_jobs(ctx: &mut ExecCtx) {
    ctx.jobs.reap();
}

pub fn handle_to_value(job: &Job) -> JobHandle {
    JobHandle {
        job_id: job.job_id,
        pgid: job.pgid,
        pids: job.pids.clone(),
        status: std::cell::RefCell::new(match job.status {
            job::JobState::Running => JobStatus::Running,
            job::JobState::Stopped => JobStatus::Stopped,
            job::JobState::Done(code) => JobStatus::Done(code),
        }),
    }
}

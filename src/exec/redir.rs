//! Redirection fd-opening helpers, used in the forked child before
//! `execvp` (§4.10), and the self-pipe `{errno, redirIndex}` wire format
//! used to report child-side failures back to the parent.

use std::ffi::CString;

/// Opens `path` and `dup2`s it onto `target_fd`. Returns the OS errno on
/// failure instead of silently leaving `target_fd` untouched, so the
/// caller can report it through the self-pipe.
pub fn dup_onto(path: &str, flags: i32, mode: u32, target_fd: i32) -> Result<(), i32> {
    let Ok(cpath) = CString::new(path) else {
        return Err(libc::EINVAL);
    };
    let fd = unsafe { libc::open(cpath.as_ptr(), flags, mode as libc::c_int) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(0));
    }
    unsafe {
        libc::dup2(fd, target_fd);
        libc::close(fd);
    }
    Ok(())
}

/// A child-to-parent error report: the failing redirection's index in
/// `Command::redirs`, or `-1` if the failure was `execvp` itself; and the
/// OS errno. Written to the self-pipe's write end right before `_exit(1)`.
#[derive(Debug, Clone, Copy)]
pub struct ErrReport {
    pub redir_index: i32,
    pub errno: i32,
}

impl ErrReport {
    pub fn exec_failed(errno: i32) -> Self {
        ErrReport { redir_index: -1, errno }
    }

    pub fn redir_failed(index: usize, errno: i32) -> Self {
        ErrReport { redir_index: index as i32, errno }
    }

    fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.redir_index.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.errno.to_ne_bytes());
        buf
    }

    fn from_bytes(buf: [u8; 8]) -> Self {
        ErrReport {
            redir_index: i32::from_ne_bytes(buf[0..4].try_into().unwrap()),
            errno: i32::from_ne_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

/// Writes an error report to the self-pipe's write end. Called from the
/// child right before `_exit(1)`; best-effort since the process is about
/// to die either way.
pub fn report_error(write_fd: i32, report: ErrReport) {
    let bytes = report.to_bytes();
    unsafe {
        libc::write(write_fd, bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

/// Reads an error report from the self-pipe's read end, if the child
/// wrote one before exiting. Returns `None` if the child `exec`'d
/// successfully (the write end closes on `exec` since it's opened
/// close-on-exec, so the read returns EOF with no bytes).
pub fn read_error(read_fd: i32) -> Option<ErrReport> {
    let mut buf = [0u8; 8];
    let mut got = 0usize;
    while got < buf.len() {
        let n = unsafe {
            libc::read(read_fd, buf[got..].as_mut_ptr() as *mut libc::c_void, buf.len() - got)
        };
        if n <= 0 {
            break;
        }
        got += n as usize;
    }
    if got == buf.len() {
        Some(ErrReport::from_bytes(buf))
    } else {
        None
    }
}

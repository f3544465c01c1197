//! Signal handling (C12): a self-pipe-backed pending-signal set the VM polls
//! at safe points between bytecode instructions.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static PENDING: [AtomicBool; 64] = {
    const F: AtomicBool = AtomicBool::new(false);
    [F; 64]
};
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn handler(sig: i32) {
    LAST_SIGNAL.store(sig, Ordering::SeqCst);
    if let Some(slot) = PENDING.get(sig as usize) {
        slot.store(true, Ordering::SeqCst);
    }
}

/// Installs the process-wide handler for `sig`, replacing the default
/// disposition. Safe to call more than once.
pub fn install(sig: i32) {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler as *const () as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(sig, &sa, std::ptr::null_mut());
    }
}

/// Drains and returns the set of signal numbers observed since the last
/// call, for the VM's instruction-boundary poll.
pub fn take_pending() -> Vec<i32> {
    let mut out = Vec::new();
    for (sig, slot) in PENDING.iter().enumerate() {
        if slot.swap(false, Ordering::SeqCst) {
            out.push(sig as i32);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_pending_drains() {
        PENDING[5].store(true, Ordering::SeqCst);
        assert_eq!(take_pending(), vec![5]);
        assert!(take_pending().is_empty());
    }
}

//! Per-thread interrupt masking for the streaming worker.
//!
//! Only the thread that owns the client decides when streaming stops, so the
//! worker asks to have `SIGINT` withheld from it. The mask is per thread and
//! leaves the rest of the process untouched.

/// Block `SIGINT` for the calling thread.
#[cfg(unix)]
pub fn block_interrupts() -> std::io::Result<()> {
    // SAFETY: `set` is a valid, initialized sigset_t living on this stack
    // frame; a null old-set pointer is allowed.
    let rc = unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut())
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::from_raw_os_error(rc))
    }
}

/// Block `SIGINT` for the calling thread. No-op on this platform.
#[cfg(not(unix))]
pub fn block_interrupts() -> std::io::Result<()> {
    Ok(())
}

/// Whether `SIGINT` is currently blocked for the calling thread.
#[cfg(unix)]
pub fn interrupts_blocked() -> bool {
    // SAFETY: both pointers refer to valid sigset_t values on this stack frame.
    unsafe {
        let mut current: libc::sigset_t = std::mem::zeroed();
        if libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), &mut current) != 0 {
            return false;
        }
        libc::sigismember(&current, libc::SIGINT) == 1
    }
}

#[cfg(not(unix))]
pub fn interrupts_blocked() -> bool {
    false
}

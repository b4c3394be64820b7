//! Process-wide shutdown flag raised by SIGINT/SIGTERM.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Only touches an atomic, which is async-signal-safe.
#[cfg(unix)]
extern "C" fn handle_shutdown(_: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the shutdown flag.
#[cfg(unix)]
pub fn install_shutdown_handler() -> std::io::Result<()> {
    for sig in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: handle_shutdown is an extern "C" handler whose only effect
        // is storing to a static atomic.
        let prev = unsafe { libc::signal(sig, handle_shutdown as *const () as libc::sighandler_t) };
        if prev == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_shutdown_handler() -> std::io::Result<()> {
    log::warn!("signal handling unsupported on this platform; stop the process externally");
    Ok(())
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

//! Scoped redirection of standard output.
//!
//! Standard output carries frames, so anything a speech engine prints while
//! it runs must land somewhere else. `StdoutRedirect` points file descriptor 1
//! at standard error for as long as the guard lives and restores it on drop,
//! whether the guarded call succeeded, failed or panicked.

use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

/// Only one redirection may be active at a time, otherwise an inner guard
/// could save and later restore the redirected descriptor.
static REDIRECT_LOCK: Mutex<()> = Mutex::new(());

pub struct StdoutRedirect {
    #[cfg(unix)]
    saved_fd: libc::c_int,
    _lock: MutexGuard<'static, ()>,
}

impl StdoutRedirect {
    /// Redirect standard output to standard error until the guard drops.
    pub fn to_stderr() -> io::Result<Self> {
        let lock = REDIRECT_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        io::stdout().flush()?;

        #[cfg(unix)]
        {
            // SAFETY: dup/dup2/close on the process's standard descriptors;
            // every return value is checked and the saved descriptor is owned
            // by the guard.
            let saved_fd = unsafe { libc::dup(libc::STDOUT_FILENO) };
            if saved_fd < 0 {
                return Err(io::Error::last_os_error());
            }
            if unsafe { libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) } < 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(saved_fd) };
                return Err(err);
            }
            Ok(Self {
                saved_fd,
                _lock: lock,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self { _lock: lock })
        }
    }
}

impl Drop for StdoutRedirect {
    fn drop(&mut self) {
        let _ = io::stdout().flush();

        #[cfg(unix)]
        {
            // SAFETY: saved_fd was obtained from dup in to_stderr and is
            // closed exactly once here.
            unsafe {
                if libc::dup2(self.saved_fd, libc::STDOUT_FILENO) < 0 {
                    tracing::error!(
                        target: "redirect",
                        error = %io::Error::last_os_error(),
                        "Failed to restore standard output"
                    );
                }
                libc::close(self.saved_fd);
            }
        }
    }
}

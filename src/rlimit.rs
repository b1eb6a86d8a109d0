// src/rlimit.rs

//! Open-file limit tuning.
//!
//! Every watched directory holds a descriptor on some platforms, so large
//! trees exhaust the usual soft limit of 1024 quickly.

use std::io;

use tracing::{debug, warn};

/// Soft `RLIMIT_NOFILE` requested at startup.
pub const DESIRED_OPEN_FILES: u64 = 50 * 1024;

/// Raise the soft open-file limit towards [`DESIRED_OPEN_FILES`], capped by
/// the hard limit. Failure is logged, not fatal.
pub fn raise_fd_limit() {
    match try_raise(DESIRED_OPEN_FILES) {
        Ok(limit) => debug!(limit, "open file limit"),
        Err(err) => warn!(error = %err, "could not raise open file limit"),
    }
}

fn try_raise(desired: u64) -> io::Result<u64> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid, writable rlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let target = (desired as libc::rlim_t).min(limit.rlim_max);
    if limit.rlim_cur >= target {
        return Ok(limit.rlim_cur as u64);
    }

    limit.rlim_cur = target;
    // SAFETY: `limit` is a valid rlimit with cur <= max.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(target as u64)
}

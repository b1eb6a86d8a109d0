// src/exec/pty.rs

//! Pseudo-terminal allocation.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

/// A master/slave pseudo-terminal pair.
///
/// The child gets the slave end as stdin, stdout and stderr so it behaves
/// as if attached to an interactive terminal (line-buffered output). The
/// supervisor reads the master end.
#[derive(Debug)]
pub struct Pty {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

impl Pty {
    pub fn open() -> io::Result<Self> {
        let mut master: libc::c_int = -1;
        let mut slave: libc::c_int = -1;

        // SAFETY: out-pointers are valid for writes; name/termios/winsize may
        // be null.
        let rc = unsafe {
            libc::openpty(
                &mut master,
                &mut slave,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: openpty succeeded, both descriptors are open and owned by us.
        let (master, slave) = unsafe { (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)) };

        set_cloexec(&master)?;
        set_cloexec(&slave)?;

        Ok(Self { master, slave })
    }
}

/// Async reader over the master end.
///
/// Reads are driven by the runtime's reactor rather than the blocking pool,
/// so dropping the reader (or the task holding it) closes the descriptor at
/// once, even while a read is pending.
#[derive(Debug)]
pub struct PtyReader {
    fd: AsyncFd<OwnedFd>,
}

impl PtyReader {
    /// Must be called inside the Tokio runtime.
    pub fn new(master: OwnedFd) -> io::Result<Self> {
        set_nonblocking(&master)?;
        Ok(Self {
            fd: AsyncFd::with_interest(master, Interest::READABLE)?,
        })
    }

    /// Read into `buf`. `Ok(0)` is end of file; Linux reports a closed slave
    /// side as `EIO` instead.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            let attempt = guard.try_io(|fd| {
                // SAFETY: `buf` is valid for `buf.len()` bytes of writes and
                // the descriptor stays open while `fd` is borrowed.
                let n = unsafe {
                    libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match attempt {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is a valid open descriptor for the duration of the call.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Keep the descriptors out of unrelated children; the one that should see
/// the slave gets a dup.
fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is a valid open descriptor for the duration of the call.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

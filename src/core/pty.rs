//! Pseudo-terminal wrapper.
//!
//! Owns one pty master and the shell process attached to the slave side.
//! The master is non-blocking; reads distinguish "no data" from end-of-life
//! (EOF or `EIO`, which the kernel reports once the shell exits), and writes
//! go through a bounded-retry full-write loop because dropped input would
//! corrupt shell state.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to spawn pty pair: {0}")]
    Spawn(#[source] io::Error),

    #[error("shell path contains a NUL byte: {0:?}")]
    BadShell(String),

    #[error("write to pty master failed: {0}")]
    Write(#[source] io::Error),

    #[error("pty master blocked for too long, giving up")]
    WriteStalled,

    #[error("window size update failed: {0}")]
    Resize(#[source] io::Error),
}

/// Outcome of one non-blocking read from the master.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// Nothing buffered right now.
    WouldBlock,
    /// The shell exited; the master is dead.
    Eof,
}

const MAX_BLOCKED_RETRIES: u32 = 50;
const WRITE_POLL_TIMEOUT_MS: libc::c_int = 100;

pub struct Pty {
    master: OwnedFd,
    child: libc::pid_t,
}

impl Pty {
    /// Fork a shell on a fresh pty pair, transmitting the pixel-exact window
    /// size for kernel bookkeeping. The master comes back non-blocking and
    /// close-on-exec.
    pub fn spawn(
        shell: &str,
        rows: u16,
        cols: u16,
        cell_w: i32,
        cell_h: i32,
    ) -> Result<Self, PtyError> {
        let shell_c =
            CString::new(shell).map_err(|_| PtyError::BadShell(shell.to_string()))?;
        let ws = window_size(rows, cols, cell_w, cell_h);

        let mut master: libc::c_int = -1;
        let pid = unsafe {
            libc::forkpty(&mut master, std::ptr::null_mut(), std::ptr::null(), &ws)
        };
        if pid < 0 {
            return Err(PtyError::Spawn(io::Error::last_os_error()));
        }
        if pid == 0 {
            // Child. Only async-signal-safe calls between fork and exec.
            unsafe {
                let argv = [shell_c.as_ptr(), std::ptr::null()];
                libc::execvp(shell_c.as_ptr(), argv.as_ptr());
                libc::_exit(1);
            }
        }

        let master = unsafe { OwnedFd::from_raw_fd(master) };
        unsafe {
            let fd = master.as_raw_fd();
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags >= 0 {
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }

        info!(
            "shell spawned (pid {pid}, master fd {}, {cols}x{rows} cells)",
            master.as_raw_fd()
        );
        Ok(Self { master, child: pid })
    }

    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    pub fn child_pid(&self) -> libc::pid_t {
        self.child
    }

    /// One non-blocking read from the master.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        loop {
            let n = unsafe {
                libc::read(
                    self.master.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n > 0 {
                return Ok(ReadOutcome::Data(n as usize));
            }
            if n == 0 {
                return Ok(ReadOutcome::Eof);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => return Ok(ReadOutcome::WouldBlock),
                // EIO on a pty master means the slave side is gone.
                Some(libc::EIO) => return Ok(ReadOutcome::Eof),
                _ => return Err(err),
            }
        }
    }

    /// Write every byte, retrying short writes, `EINTR`, and `EAGAIN`.
    pub fn write_all(&self, buf: &[u8]) -> Result<(), PtyError> {
        write_all_fd(self.master.as_raw_fd(), buf)
    }

    /// Propagate a new cell and pixel geometry to the kernel.
    pub fn resize(
        &self,
        rows: u16,
        cols: u16,
        cell_w: i32,
        cell_h: i32,
    ) -> Result<(), PtyError> {
        let ws = window_size(rows, cols, cell_w, cell_h);
        let rc = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if rc < 0 {
            return Err(PtyError::Resize(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // Non-blocking reap; the master fd closes when `master` drops.
        unsafe {
            libc::waitpid(self.child, std::ptr::null_mut(), libc::WNOHANG);
        }
    }
}

fn window_size(rows: u16, cols: u16, cell_w: i32, cell_h: i32) -> libc::winsize {
    libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: (cols as i32 * cell_w) as u16,
        ws_ypixel: (rows as i32 * cell_h) as u16,
    }
}

/// Full-write loop shared by the pane path and tests.
///
/// `EAGAIN` waits up to 100 ms for writability and retries, bounded at 50
/// consecutive blocked attempts; `EINTR` retries immediately.
pub fn write_all_fd(fd: RawFd, mut buf: &[u8]) -> Result<(), PtyError> {
    let mut blocked: u32 = 0;
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 {
            blocked = 0;
            buf = &buf[n as usize..];
            continue;
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EAGAIN) => {
                blocked += 1;
                if blocked > MAX_BLOCKED_RETRIES {
                    return Err(PtyError::WriteStalled);
                }
                let mut pfd = libc::pollfd {
                    fd,
                    events: libc::POLLOUT,
                    revents: 0,
                };
                unsafe {
                    libc::poll(&mut pfd, 1, WRITE_POLL_TIMEOUT_MS);
                }
            }
            _ => return Err(PtyError::Write(err)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_size_carries_pixels() {
        let ws = window_size(44, 192, 10, 24);
        assert_eq!(ws.ws_row, 44);
        assert_eq!(ws.ws_col, 192);
        assert_eq!(ws.ws_xpixel, 1920);
        assert_eq!(ws.ws_ypixel, 1056);
    }

    #[test]
    fn write_all_fd_writes_every_byte() {
        let mut fds = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let payload = b"echo hello\r";
        write_all_fd(fds[1], payload).unwrap();

        let mut out = [0u8; 32];
        let n = unsafe {
            libc::read(fds[0], out.as_mut_ptr() as *mut libc::c_void, out.len())
        };
        assert_eq!(n as usize, payload.len());
        assert_eq!(&out[..payload.len()], payload);
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}

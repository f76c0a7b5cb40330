//! Console arbiter: raw mode, virtual-console handoff, signal flags.
//!
//! The kernel tells us to give up or re-take the physical console through a
//! signal pair installed with `VT_SETMODE`. The handlers run in signal
//! context, so everything they reach lives in process-wide atomics: the
//! shutdown and display-active flags plus the raw fds needed for the two
//! acknowledgement ioctls and the DRM master toggle. Nothing else in the
//! process is touched from signal context.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("tcgetattr failed: {0}")]
    GetAttr(#[source] io::Error),

    #[error("tcsetattr failed: {0}")]
    SetAttr(#[source] io::Error),
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);
static DISPLAY_ACTIVE: AtomicBool = AtomicBool::new(true);
static DRM_FD: AtomicI32 = AtomicI32::new(-1);
static TTY_FD: AtomicI32 = AtomicI32::new(-1);

// linux/vt.h
const VT_GETMODE: libc::c_ulong = 0x5601;
const VT_SETMODE: libc::c_ulong = 0x5602;
const VT_RELDISP: libc::c_ulong = 0x5605;
const VT_ACKACQ: libc::c_ulong = 0x02;
const VT_PROCESS: libc::c_char = 0x01;

// drm.h: _IO('d', 0x1e) / _IO('d', 0x1f)
const DRM_IOCTL_SET_MASTER: libc::c_ulong = 0x641e;
const DRM_IOCTL_DROP_MASTER: libc::c_ulong = 0x641f;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct VtModeIoctl {
    mode: libc::c_char,
    waitv: libc::c_char,
    relsig: libc::c_short,
    acqsig: libc::c_short,
    frsig: libc::c_short,
}

extern "C" fn on_terminate(sig: libc::c_int) {
    LAST_SIGNAL.store(sig, Ordering::SeqCst);
    SHUTDOWN.store(true, Ordering::SeqCst);
}

extern "C" fn on_vt_release(_sig: libc::c_int) {
    DISPLAY_ACTIVE.store(false, Ordering::SeqCst);
    let drm = DRM_FD.load(Ordering::SeqCst);
    if drm >= 0 {
        unsafe {
            libc::ioctl(drm, DRM_IOCTL_DROP_MASTER);
        }
    }
    let tty = TTY_FD.load(Ordering::SeqCst);
    if tty >= 0 {
        unsafe {
            libc::ioctl(tty, VT_RELDISP, 1 as libc::c_long);
        }
    }
}

extern "C" fn on_vt_acquire(_sig: libc::c_int) {
    let drm = DRM_FD.load(Ordering::SeqCst);
    if drm >= 0 {
        unsafe {
            libc::ioctl(drm, DRM_IOCTL_SET_MASTER);
        }
    }
    let tty = TTY_FD.load(Ordering::SeqCst);
    if tty >= 0 {
        unsafe {
            libc::ioctl(tty, VT_RELDISP, VT_ACKACQ as libc::c_long);
        }
    }
    DISPLAY_ACTIVE.store(true, Ordering::SeqCst);
}

/// Install termination and VT switch handlers.
pub fn install_signal_handlers() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = on_terminate as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
            libc::sigaction(sig, &sa, std::ptr::null_mut());
        }

        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = on_vt_release as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGUSR1, &sa, std::ptr::null_mut());

        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = on_vt_acquire as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGUSR2, &sa, std::ptr::null_mut());
    }
}

/// Make the DRM device reachable from the release/acquire handlers.
pub fn register_drm_fd(fd: RawFd) {
    DRM_FD.store(fd, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

pub fn last_signal() -> i32 {
    LAST_SIGNAL.load(Ordering::SeqCst)
}

/// False while the user is switched away from our console.
pub fn display_active() -> bool {
    DISPLAY_ACTIVE.load(Ordering::SeqCst)
}

/// Process-controlled VT switching for the lifetime of the guard.
///
/// Setup failure (no controlling console, ioctls unsupported) is not fatal:
/// the engine simply runs without VT arbitration, as when started over ssh.
pub struct VtGuard {
    tty: File,
    saved: VtModeIoctl,
}

impl VtGuard {
    pub fn setup() -> Option<Self> {
        let tty = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/tty")
            .ok()?;
        let fd = tty.as_raw_fd();

        let mut saved = VtModeIoctl::default();
        if unsafe { libc::ioctl(fd, VT_GETMODE, &mut saved) } < 0 {
            warn!("VT_GETMODE failed: {}", io::Error::last_os_error());
            return None;
        }

        let vtm = VtModeIoctl {
            mode: VT_PROCESS,
            waitv: 0,
            relsig: libc::SIGUSR1 as libc::c_short,
            acqsig: libc::SIGUSR2 as libc::c_short,
            frsig: 0,
        };
        if unsafe { libc::ioctl(fd, VT_SETMODE, &vtm) } < 0 {
            warn!("VT_SETMODE failed: {}", io::Error::last_os_error());
            return None;
        }

        TTY_FD.store(fd, Ordering::SeqCst);
        info!("VT_PROCESS mode enabled");
        Some(Self { tty, saved })
    }
}

impl Drop for VtGuard {
    fn drop(&mut self) {
        TTY_FD.store(-1, Ordering::SeqCst);
        unsafe {
            libc::ioctl(self.tty.as_raw_fd(), VT_SETMODE, &self.saved);
        }
    }
}

/// Raw line discipline on the controlling terminal for the lifetime of the
/// guard: no canonical mode, no echo, no signal generation, no output
/// post-processing, 8-bit, `VMIN=0 VTIME=0`.
pub struct RawMode {
    fd: RawFd,
    saved: libc::termios,
}

impl RawMode {
    pub fn enable(fd: RawFd) -> Result<Self, ConsoleError> {
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } < 0 {
            return Err(ConsoleError::GetAttr(io::Error::last_os_error()));
        }

        let mut raw = saved;
        raw.c_iflag &= !(libc::BRKINT | libc::ICRNL | libc::INPCK | libc::ISTRIP | libc::IXON);
        raw.c_oflag &= !libc::OPOST;
        raw.c_cflag |= libc::CS8;
        raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::ISIG | libc::IEXTEN);
        raw.c_cc[libc::VMIN] = 0;
        raw.c_cc[libc::VTIME] = 0;

        if unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, &raw) } < 0 {
            return Err(ConsoleError::SetAttr(io::Error::last_os_error()));
        }

        info!("raw mode enabled");
        Ok(Self { fd, saved })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSAFLUSH, &self.saved);
        }
        info!("restored original termios");
    }
}

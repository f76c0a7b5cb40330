//! Control socket: remote commands from a second invocation of the binary.
//!
//! Protocol: one client connection per command. The client writes the
//! long-form token (no newline required); the server reads at most 63 bytes
//! within 200 ms, applies the command, and closes.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

const READ_TIMEOUT: Duration = Duration::from_millis(200);
const MAX_COMMAND_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("failed to bind control socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Topology commands accepted over the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NewTab,
    Next,
    Prev,
    SplitV,
    FocusLeft,
    FocusRight,
}

impl Command {
    /// Parse a long or short token.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "--new-tab" | "-nt" => Some(Command::NewTab),
            "--next" | "-n" => Some(Command::Next),
            "--prev" | "-p" => Some(Command::Prev),
            "--split-v" | "-s" => Some(Command::SplitV),
            "--left" | "-l" => Some(Command::FocusLeft),
            "--right" | "-r" => Some(Command::FocusRight),
            _ => None,
        }
    }

    /// The normalised (long-form) wire token.
    pub fn token(&self) -> &'static str {
        match self {
            Command::NewTab => "--new-tab",
            Command::Next => "--next",
            Command::Prev => "--prev",
            Command::SplitV => "--split-v",
            Command::FocusLeft => "--left",
            Command::FocusRight => "--right",
        }
    }
}

/// Per-user socket path.
pub fn socket_path() -> PathBuf {
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/drmux_{uid}.sock"))
}

/// The listening side, owned by the server process.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Bind and listen, replacing any stale socket file.
    pub fn bind() -> Result<Self, IpcError> {
        let path = socket_path();
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).map_err(|source| IpcError::Bind {
            path: path.clone(),
            source,
        })?;
        let _ = listener.set_nonblocking(true);
        info!("control socket listening on {}", path.display());
        Ok(Self { listener, path })
    }

    /// Fd for the event loop's poll set.
    pub fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    /// Accept one client and read its command, if any.
    ///
    /// Never blocks longer than the read timeout. Protocol violations are
    /// logged and dropped; the server stays up.
    pub fn accept_command(&self) -> Option<Command> {
        let (mut stream, _) = self.listener.accept().ok()?;
        let _ = stream.set_read_timeout(Some(READ_TIMEOUT));

        let mut buf = [0u8; MAX_COMMAND_LEN];
        match stream.read(&mut buf) {
            Ok(0) => {
                warn!("control client sent no data");
                None
            }
            Ok(n) => {
                let token = String::from_utf8_lossy(&buf[..n]);
                let token = token.trim_matches(|c: char| c == '\0' || c.is_whitespace());
                match Command::parse(token) {
                    Some(cmd) => Some(cmd),
                    None => {
                        warn!("unknown control command {token:?}");
                        None
                    }
                }
            }
            Err(e) => {
                warn!("control client read failed within {READ_TIMEOUT:?}: {e}");
                None
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Try to run as a control client.
///
/// Returns the process exit code when this invocation was handled as a
/// client (help text, dispatched command, or usage error), or `None` when no
/// server is reachable and the caller should continue into server mode.
pub fn try_client(args: &[String]) -> Option<i32> {
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Some(0);
    }

    let mut stream = UnixStream::connect(socket_path()).ok()?;

    let Some(arg) = args.first() else {
        eprintln!("drmux: server already running.");
        eprintln!("Use --new-tab (-nt), --next (-n), --prev (-p),");
        eprintln!("    --left (-l), --right (-r),");
        eprintln!("    --split-v (-s), or --help (-h).");
        return Some(1);
    };

    match Command::parse(arg) {
        Some(cmd) => {
            if stream.write_all(cmd.token().as_bytes()).is_err() {
                eprintln!("drmux: failed to send command");
                return Some(1);
            }
            Some(0)
        }
        None => {
            eprintln!("drmux: unknown command '{arg}'");
            eprintln!("Use --help (-h) to see available commands.");
            Some(1)
        }
    }
}

fn print_help() {
    println!(
        "drmux -- Bare-metal DRM terminal multiplexer\n\
         \n\
         Usage:\n\
         \x20 sudo drmux             Start the terminal (server mode)\n\
         \x20 drmux <command>        Send a command to the running server\n\
         \n\
         Commands:\n\
         \x20 --new-tab, -nt         Open a new tab\n\
         \x20 --next,    -n          Switch to the next tab\n\
         \x20 --prev,    -p          Switch to the previous tab\n\
         \x20 --split-v, -s          Split the active tab vertically\n\
         \x20 --left,    -l          Focus the left pane\n\
         \x20 --right,   -r          Focus the right pane\n\
         \x20 --help,    -h          Show this help message\n\
         \n\
         Log: /tmp/drmux.log\n\
         Socket: {}",
        socket_path().display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_and_short_tokens_normalise_identically() {
        let pairs = [
            ("--new-tab", "-nt", Command::NewTab),
            ("--next", "-n", Command::Next),
            ("--prev", "-p", Command::Prev),
            ("--split-v", "-s", Command::SplitV),
            ("--left", "-l", Command::FocusLeft),
            ("--right", "-r", Command::FocusRight),
        ];
        for (long, short, cmd) in pairs {
            assert_eq!(Command::parse(long), Some(cmd));
            assert_eq!(Command::parse(short), Some(cmd));
            assert_eq!(cmd.token(), long);
        }
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert_eq!(Command::parse("--bogus"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("new-tab"), None);
    }

    #[test]
    fn socket_path_is_per_user() {
        let path = socket_path();
        let uid = unsafe { libc::getuid() };
        assert_eq!(
            path,
            PathBuf::from(format!("/tmp/drmux_{uid}.sock"))
        );
    }

    #[test]
    fn command_round_trips_through_wire_token() {
        for cmd in [
            Command::NewTab,
            Command::Next,
            Command::Prev,
            Command::SplitV,
            Command::FocusLeft,
            Command::FocusRight,
        ] {
            assert_eq!(Command::parse(cmd.token()), Some(cmd));
        }
    }
}

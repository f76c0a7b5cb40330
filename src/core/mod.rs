//! Core terminal emulation components.
//!
//! - **pty**: Linux pseudo-terminal pair and shell process
//! - **term**: terminal state and ANSI escape sequence parser
//! - **session**: one shell session combining pty + terminal state
//!
//! ```text
//! Session
//! ├── Pty (master fd + child process)
//! └── TerminalState
//!     ├── ScreenBuffer (cell grid + attributes)
//!     ├── Cursor
//!     └── VtParser (escape sequences)
//! ```

pub mod pty;
pub mod session;
pub mod term;

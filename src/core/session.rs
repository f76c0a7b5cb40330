//! Session management.
//!
//! A session couples one pty (shell process) with one terminal emulation
//! state. Bytes read from the master are decoded as a UTF-8 stream and fed
//! to the parser in arrival order; parser responses (cursor position
//! reports, device attributes) are written straight back to the master.

use std::os::fd::RawFd;

use tracing::{info, warn};

use super::pty::{Pty, PtyError, ReadOutcome};
use super::term::{TerminalState, VtParser};
use crate::config::Rgb;

/// Result of draining the master once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Nothing was buffered.
    Quiet,
    /// At least one chunk reached the emulator.
    Output,
    /// The shell exited; the session should be closed.
    Eof,
}

/// A shell session.
pub struct Session {
    pty: Option<Pty>,
    parser: VtParser,
    pub term: TerminalState,
    /// Tail bytes of an incomplete UTF-8 sequence, kept across feeds.
    utf8_pending: Vec<u8>,
}

impl Session {
    /// Spawn a shell sized to `(rows, cols)` with the configured default
    /// colours installed in the emulator.
    pub fn spawn(
        shell: &str,
        rows: u16,
        cols: u16,
        cell_w: i32,
        cell_h: i32,
        default_fg: Rgb,
        default_bg: Rgb,
    ) -> Result<Self, PtyError> {
        let pty = Pty::spawn(shell, rows, cols, cell_w, cell_h)?;
        Ok(Self {
            pty: Some(pty),
            parser: VtParser::new(),
            term: TerminalState::new(cols, rows, default_fg, default_bg),
            utf8_pending: Vec::new(),
        })
    }

    pub fn master_fd(&self) -> Option<RawFd> {
        self.pty.as_ref().map(Pty::master_fd)
    }

    #[allow(dead_code)]
    pub fn is_open(&self) -> bool {
        self.pty.is_some()
    }

    /// Feed raw shell output into the emulator.
    pub fn feed(&mut self, bytes: &[u8]) {
        let data: Vec<u8> = if self.utf8_pending.is_empty() {
            bytes.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.utf8_pending);
            joined.extend_from_slice(bytes);
            joined
        };

        let mut responses = Vec::new();
        let mut i = 0;
        while i < data.len() {
            let b = data[i];
            if b < 0x80 {
                if let Some(response) = self.parser.feed(b, &mut self.term) {
                    responses.push(response);
                }
                i += 1;
                continue;
            }

            let len = utf8_sequence_len(b);
            if len == 0 {
                // Stray continuation or invalid lead byte.
                i += 1;
                continue;
            }
            if i + len > data.len() {
                // Incomplete sequence at the end of the chunk; finish it on
                // the next feed.
                self.utf8_pending = data[i..].to_vec();
                break;
            }
            match std::str::from_utf8(&data[i..i + len]) {
                Ok(s) => {
                    for ch in s.chars() {
                        self.parser.feed_char(ch, &mut self.term);
                    }
                    i += len;
                }
                Err(_) => {
                    i += 1;
                }
            }
        }

        for response in responses {
            if let Some(pty) = &self.pty {
                if let Err(e) = pty.write_all(&response.to_bytes()) {
                    warn!("failed to answer terminal query: {e}");
                }
            }
        }
    }

    /// Drain the master with non-blocking reads until it runs dry.
    pub fn drain(&mut self) -> Drain {
        let mut buf = [0u8; 4096];
        let mut produced = false;
        loop {
            let outcome = match &self.pty {
                Some(pty) => pty.read(&mut buf),
                None => return Drain::Eof,
            };
            match outcome {
                Ok(ReadOutcome::Data(n)) => {
                    produced = true;
                    self.feed(&buf[..n]);
                }
                Ok(ReadOutcome::WouldBlock) => {
                    return if produced { Drain::Output } else { Drain::Quiet };
                }
                Ok(ReadOutcome::Eof) => return Drain::Eof,
                Err(e) => {
                    warn!("pty read failed: {e}");
                    return Drain::Eof;
                }
            }
        }
    }

    /// Push keystroke bytes to the shell.
    pub fn write(&self, bytes: &[u8]) -> Result<(), PtyError> {
        match &self.pty {
            Some(pty) => pty.write_all(bytes),
            None => Ok(()),
        }
    }

    /// Resize the emulator and propagate the new geometry to the kernel.
    pub fn resize(&mut self, rows: u16, cols: u16, cell_w: i32, cell_h: i32) {
        self.term.resize(cols, rows);
        if let Some(pty) = &self.pty {
            if let Err(e) = pty.resize(rows, cols, cell_w, cell_h) {
                warn!("window size update failed: {e}");
            }
        }
    }

    /// Close the master and reap the child. Idempotent.
    pub fn close(&mut self) {
        if let Some(pty) = self.pty.take() {
            info!("session closed (pid {})", pty.child_pid());
        }
    }
}

/// Expected length of a UTF-8 sequence from its lead byte; 0 if invalid.
fn utf8_sequence_len(lead: u8) -> usize {
    if lead & 0xE0 == 0xC0 {
        2
    } else if lead & 0xF0 == 0xE0 {
        3
    } else if lead & 0xF8 == 0xF0 {
        4
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::Cell;

    /// A session with no pty behind it, for exercising the decode path.
    fn offline_session(cols: u16, rows: u16) -> Session {
        Session {
            pty: None,
            parser: VtParser::new(),
            term: TerminalState::new(cols, rows, Rgb::new(255, 255, 255), Rgb::new(0, 0, 0)),
            utf8_pending: Vec::new(),
        }
    }

    #[test]
    fn split_utf8_sequence_survives_chunk_boundary() {
        let mut session = offline_session(20, 4);
        let encoded = "é".as_bytes(); // 2 bytes
        session.feed(&encoded[..1]);
        assert_eq!(session.utf8_pending, &encoded[..1]);
        session.feed(&encoded[1..]);
        assert!(session.utf8_pending.is_empty());
        assert!(matches!(
            session.term.cell(0, 0),
            Some(Cell::Glyph { ch: 'é', .. })
        ));
    }

    #[test]
    fn ascii_and_controls_flow_through_parser() {
        let mut session = offline_session(20, 4);
        session.feed(b"AB\r\nC");
        assert_eq!(
            (session.term.cursor().row, session.term.cursor().col),
            (1, 1)
        );
    }

    #[test]
    fn invalid_lead_bytes_are_skipped() {
        let mut session = offline_session(20, 4);
        session.feed(&[0x80, 0xFF, b'x']);
        assert!(matches!(
            session.term.cell(0, 0),
            Some(Cell::Glyph { ch: 'x', .. })
        ));
    }
}

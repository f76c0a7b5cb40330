//! Pane: one terminal session occupying a horizontal slice of a tab.

use std::os::fd::RawFd;

use tracing::info;

use crate::config::Config;
use crate::core::pty::PtyError;
use crate::core::session::{Drain, Session};

/// Pane lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneState {
    /// Shell running, master open.
    Running,
    /// EOF observed on the master; waiting to be closed.
    Draining,
    /// Master closed, child reaped.
    Closed,
}

pub struct Pane {
    pub session: Session,
    /// Columns this pane spans.
    pub term_cols: u16,
    /// Pixel x at which column 0 begins.
    pub start_col_px: i32,
    state: PaneState,
}

impl Pane {
    /// Spawn a shell covering `cols` columns with pixel origin
    /// `start_col_px`.
    pub fn spawn(
        cfg: &Config,
        rows: u16,
        cols: u16,
        start_col_px: i32,
        cell_w: i32,
        cell_h: i32,
    ) -> Result<Self, PtyError> {
        let session = Session::spawn(
            &cfg.shell,
            rows,
            cols,
            cell_w,
            cell_h,
            cfg.palette.default_fg,
            cfg.palette.default_bg,
        )?;
        info!("pane spawned: {cols} cols, pixel origin {start_col_px}");
        Ok(Self {
            session,
            term_cols: cols,
            start_col_px,
            state: PaneState::Running,
        })
    }

    #[allow(dead_code)]
    pub fn state(&self) -> PaneState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == PaneState::Running
    }

    pub fn master_fd(&self) -> Option<RawFd> {
        self.session.master_fd()
    }

    /// Drain the master; an EOF moves the pane to `Draining`.
    pub fn drain(&mut self) -> Drain {
        let outcome = self.session.drain();
        if outcome == Drain::Eof && self.state == PaneState::Running {
            self.state = PaneState::Draining;
        }
        outcome
    }

    /// Close the master and reap the child.
    pub fn close(&mut self) {
        self.session.close();
        self.state = PaneState::Closed;
    }
}

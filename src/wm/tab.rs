//! Tab: one or two panes laid out side by side.

use thiserror::Error;
use tracing::{info, warn};

use super::pane::Pane;
use crate::config::Config;
use crate::core::pty::PtyError;

/// Pane arrangement within a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Single,
    Split,
}

#[derive(Debug, Error)]
pub enum TabError {
    #[error("grid too small: {cols}x{rows}")]
    GridTooSmall { cols: i64, rows: i64 },

    #[error("tab is already split")]
    AlreadySplit,

    #[error("not enough columns to split ({0})")]
    TooNarrow(u16),

    #[error(transparent)]
    Pty(#[from] PtyError),
}

/// Column/row budget for a content area of `width_px` by `height_px`; one
/// row is reserved for the tab bar.
pub fn grid_size(width_px: u32, height_px: u32, cell_w: i32, cell_h: i32) -> Option<(u16, u16)> {
    if cell_w <= 0 || cell_h <= 0 {
        return None;
    }
    let cols = width_px as i64 / cell_w as i64;
    let rows = height_px as i64 / cell_h as i64 - 1;
    if cols < 1 || rows < 1 {
        return None;
    }
    Some((cols as u16, rows as u16))
}

/// 50/50 split of a column budget. Both halves must keep at least two
/// columns.
pub fn split_columns(cols: u16) -> Option<(u16, u16)> {
    let left = cols / 2;
    let right = cols - left;
    if left < 2 || right < 2 {
        return None;
    }
    Some((left, right))
}

pub struct Tab {
    pub panes: Vec<Pane>,
    pub layout: Layout,
    pub active_pane: usize,
    pub term_rows: u16,
    /// False once every pane's shell has exited.
    pub alive: bool,
}

impl Tab {
    /// Create a tab with a single full-width pane.
    pub fn new(
        cfg: &Config,
        width_px: u32,
        height_px: u32,
        cell_w: i32,
        cell_h: i32,
    ) -> Result<Self, TabError> {
        let (total_cols, rows) =
            grid_size(width_px, height_px, cell_w, cell_h).ok_or(TabError::GridTooSmall {
                cols: width_px as i64 / cell_w.max(1) as i64,
                rows: height_px as i64 / cell_h.max(1) as i64 - 1,
            })?;
        info!("grid: {total_cols} cols x {rows} rows");

        let pane = Pane::spawn(cfg, rows, total_cols, 0, cell_w, cell_h)?;
        Ok(Self {
            panes: vec![pane],
            layout: Layout::Single,
            active_pane: 0,
            term_rows: rows,
            alive: true,
        })
    }

    /// Split into two side-by-side panes, focusing the new right pane.
    ///
    /// On spawn failure the left pane's width is restored; the tab is left
    /// exactly as before.
    pub fn split_vertical(
        &mut self,
        cfg: &Config,
        cell_w: i32,
        cell_h: i32,
    ) -> Result<(), TabError> {
        if self.layout == Layout::Split {
            return Err(TabError::AlreadySplit);
        }
        let old_cols = self.panes[0].term_cols;
        let (left_cols, right_cols) =
            split_columns(old_cols).ok_or(TabError::TooNarrow(old_cols))?;

        self.panes[0].term_cols = left_cols;
        self.panes[0]
            .session
            .resize(self.term_rows, left_cols, cell_w, cell_h);

        let origin = left_cols as i32 * cell_w;
        match Pane::spawn(cfg, self.term_rows, right_cols, origin, cell_w, cell_h) {
            Ok(pane) => {
                self.panes.push(pane);
                self.layout = Layout::Split;
                self.active_pane = 1;
                info!("vertical split: pane0={left_cols} cols, pane1={right_cols} cols");
                Ok(())
            }
            Err(e) => {
                warn!("split failed, restoring pane 0 to {old_cols} cols");
                self.panes[0].term_cols = old_cols;
                self.panes[0]
                    .session
                    .resize(self.term_rows, old_cols, cell_w, cell_h);
                Err(e.into())
            }
        }
    }

    /// Focus changes are only meaningful on a split tab. Returns true when
    /// the active pane actually moved.
    pub fn focus_left(&mut self) -> bool {
        if self.layout == Layout::Split && self.active_pane != 0 {
            self.active_pane = 0;
            true
        } else {
            false
        }
    }

    pub fn focus_right(&mut self) -> bool {
        if self.layout == Layout::Split && self.active_pane != 1 {
            self.active_pane = 1;
            true
        } else {
            false
        }
    }

    /// Recompute liveness after a pane closed.
    ///
    /// Note that when the right pane of a split dies, the left pane keeps
    /// its half width; the layout does not reflow.
    pub fn refresh_alive(&mut self) {
        self.alive = self.panes.iter().any(Pane::is_live);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_reserves_tab_bar_row() {
        // 1920x1080 at cw=10, ch=24: 192 cols, 44 rows (45 minus tab bar).
        assert_eq!(grid_size(1920, 1080, 10, 24), Some((192, 44)));
    }

    #[test]
    fn tiny_display_is_rejected() {
        assert_eq!(grid_size(8, 1080, 10, 24), None); // width/cw < 1
        assert_eq!(grid_size(1920, 40, 10, 24), None); // height/ch - 1 < 1
        assert_eq!(grid_size(1920, 1080, 0, 24), None);
    }

    #[test]
    fn split_is_fifty_fifty() {
        assert_eq!(split_columns(192), Some((96, 96)));
        assert_eq!(split_columns(191), Some((95, 96)));
        assert_eq!(split_columns(5), Some((2, 3)));
    }

    #[test]
    fn narrow_split_is_rejected() {
        assert_eq!(split_columns(4), Some((2, 2)));
        assert_eq!(split_columns(3), None); // left side would get 1 column
        assert_eq!(split_columns(2), None);
        assert_eq!(split_columns(0), None);
    }
}

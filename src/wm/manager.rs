//! Window manager: up to eight tab slots and the active-tab pointer.
//!
//! Tab slots are never reused: a tab that dies stays in its slot (and keeps
//! its number on the tab bar) until the process exits. The application shuts
//! down once every slot is dead.

use std::os::fd::RawFd;

use tracing::{info, warn};

use super::tab::{Tab, TabError};
use crate::config::Config;
use crate::core::session::Drain;
use crate::ipc::Command;

pub const MAX_TABS: usize = 8;

pub struct WindowManager {
    tabs: Vec<Tab>,
    active_tab: usize,
    width_px: u32,
    height_px: u32,
    cell_w: i32,
    cell_h: i32,
    cfg: Config,
}

impl WindowManager {
    /// Create the manager with its first tab.
    pub fn new(
        cfg: Config,
        width_px: u32,
        height_px: u32,
        cell_w: i32,
        cell_h: i32,
    ) -> Result<Self, TabError> {
        let first = Tab::new(&cfg, width_px, height_px, cell_w, cell_h)?;
        Ok(Self {
            tabs: vec![first],
            active_tab: 0,
            width_px,
            height_px,
            cell_w,
            cell_h,
            cfg,
        })
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_index(&self) -> usize {
        self.active_tab
    }

    pub fn active(&self) -> &Tab {
        &self.tabs[self.active_tab]
    }

    pub fn any_alive(&self) -> bool {
        self.tabs.iter().any(|t| t.alive)
    }

    /// Apply one control command. Returns true when a render is due, i.e.
    /// the command actually mutated topology or focus.
    pub fn apply(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::NewTab => self.new_tab(),
            Command::Next => self.cycle_tab(false),
            Command::Prev => self.cycle_tab(true),
            Command::SplitV => self.split_active(),
            Command::FocusLeft => {
                let idx = self.active_tab;
                let tab = &mut self.tabs[idx];
                if tab.alive && tab.focus_left() {
                    info!("focus left pane (tab {idx})");
                    true
                } else {
                    false
                }
            }
            Command::FocusRight => {
                let idx = self.active_tab;
                let tab = &mut self.tabs[idx];
                if tab.alive && tab.focus_right() {
                    info!("focus right pane (tab {idx})");
                    true
                } else {
                    false
                }
            }
        }
    }

    fn new_tab(&mut self) -> bool {
        if self.tabs.len() >= MAX_TABS {
            warn!("max tabs ({MAX_TABS}) reached");
            return false;
        }
        match Tab::new(
            &self.cfg,
            self.width_px,
            self.height_px,
            self.cell_w,
            self.cell_h,
        ) {
            Ok(tab) => {
                self.tabs.push(tab);
                self.active_tab = self.tabs.len() - 1;
                info!("new tab {} created", self.active_tab);
                true
            }
            Err(e) => {
                warn!("new tab failed: {e}");
                false
            }
        }
    }

    fn cycle_tab(&mut self, backwards: bool) -> bool {
        let alive: Vec<bool> = self.tabs.iter().map(|t| t.alive).collect();
        match cycle_alive(&alive, self.active_tab, backwards) {
            Some(next) if next != self.active_tab => {
                self.active_tab = next;
                info!("switched to tab {}", self.active_tab);
                true
            }
            _ => false,
        }
    }

    fn split_active(&mut self) -> bool {
        let idx = self.active_tab;
        let tab = &mut self.tabs[idx];
        if !tab.alive {
            return false;
        }
        match tab.split_vertical(&self.cfg, self.cell_w, self.cell_h) {
            Ok(()) => {
                info!("split tab {idx} vertically");
                true
            }
            Err(e) => {
                warn!("split of tab {idx} rejected: {e}");
                false
            }
        }
    }

    /// `(tab, pane, fd)` for every open master, across all live tabs.
    pub fn live_masters(&self) -> Vec<(usize, usize, RawFd)> {
        let mut out = Vec::new();
        for (t, tab) in self.tabs.iter().enumerate() {
            if !tab.alive {
                continue;
            }
            for (p, pane) in tab.panes.iter().enumerate() {
                if let Some(fd) = pane.master_fd() {
                    if pane.is_live() {
                        out.push((t, p, fd));
                    }
                }
            }
        }
        out
    }

    pub fn drain_pane(&mut self, tab: usize, pane: usize) -> Drain {
        self.tabs[tab].panes[pane].drain()
    }

    /// Close a dead pane and cascade: the tab dies with its last pane, the
    /// active tab moves to the first remaining live slot. Returns true when
    /// no live tab remains and the process should shut down.
    pub fn handle_pane_eof(&mut self, tab_idx: usize, pane_idx: usize) -> bool {
        info!("tab {tab_idx} pane {pane_idx} shell exited");
        let tab = &mut self.tabs[tab_idx];
        tab.panes[pane_idx].close();
        tab.refresh_alive();

        if !self.tabs[tab_idx].alive && tab_idx == self.active_tab {
            if let Some(next) = self.tabs.iter().position(|t| t.alive) {
                self.active_tab = next;
            }
        }
        !self.any_alive()
    }

    /// Forward input bytes verbatim to the active pane of the active tab.
    pub fn forward_input(&mut self, bytes: &[u8]) {
        let tab = &self.tabs[self.active_tab];
        if !tab.alive {
            return;
        }
        let pane = &tab.panes[tab.active_pane];
        if pane.is_live() {
            if let Err(e) = pane.session.write(bytes) {
                warn!("input write to pane failed: {e}");
            }
        }
    }
}

/// Next live slot in cyclic order, skipping dead slots.
fn cycle_alive(alive: &[bool], from: usize, backwards: bool) -> Option<usize> {
    let n = alive.len();
    if n == 0 {
        return None;
    }
    for k in 1..=n {
        let idx = if backwards {
            (from + n - (k % n)) % n
        } else {
            (from + k) % n
        };
        if alive[idx] {
            return Some(idx);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycling_wraps_both_directions() {
        let alive = [true, true];
        assert_eq!(cycle_alive(&alive, 0, false), Some(1));
        assert_eq!(cycle_alive(&alive, 1, false), Some(0));
        assert_eq!(cycle_alive(&alive, 0, true), Some(1));
        assert_eq!(cycle_alive(&alive, 1, true), Some(0));
    }

    #[test]
    fn cycling_skips_dead_slots() {
        let alive = [true, false, true];
        assert_eq!(cycle_alive(&alive, 0, false), Some(2));
        assert_eq!(cycle_alive(&alive, 2, false), Some(0));
        assert_eq!(cycle_alive(&alive, 0, true), Some(2));
    }

    #[test]
    fn cycling_with_one_slot_stays_put() {
        assert_eq!(cycle_alive(&[true], 0, false), Some(0));
        assert_eq!(cycle_alive(&[false], 0, false), None);
        assert_eq!(cycle_alive(&[], 0, false), None);
    }
}

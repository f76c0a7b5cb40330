//! VT escape-sequence parser.
//!
//! A byte-at-a-time state machine that drives [`TerminalState`]. Some
//! sequences (cursor position report, device attributes) require an answer
//! on the pty; those are returned as [`Response`] values for the session to
//! write back.

use super::state::{AttrFlags, Color, TerminalState};

/// Data owed to the application on the other side of the pty.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// CPR: `ESC [ row ; col R`.
    CursorPosition(u16, u16),
    /// Primary device attributes (VT220).
    DeviceAttributes,
    /// Secondary device attributes.
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => {
                format!("\x1b[{};{}R", row, col).into_bytes()
            }
            Response::DeviceAttributes => b"\x1b[?62;c".to_vec(),
            Response::SecondaryDeviceAttributes => b"\x1b[>1;10;0c".to_vec(),
        }
    }
}

#[derive(Clone, Copy, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    /// ESC seen inside an OSC string; waiting for the `\` of ST.
    EscapeInOsc,
}

/// Parser state machine.
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    intermediates: Vec<u8>,
    current_param: Option<u16>,
    osc_string: String,
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            osc_string: String::new(),
        }
    }

    /// Feed a single byte (C0 controls, ASCII, and escape machinery).
    pub fn feed(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        // C0 controls act anywhere except inside OSC strings.
        if byte < 0x20
            && self.state != ParserState::OscString
            && self.state != ParserState::EscapeInOsc
        {
            match byte {
                0x1B => {
                    self.enter_escape();
                }
                0x08 => state.backspace(),
                0x09 => state.horizontal_tab(),
                0x0A | 0x0B | 0x0C => state.linefeed(),
                0x0D => state.carriage_return(),
                _ => {}
            }
            return None;
        }

        match self.state {
            ParserState::Ground => self.ground(byte, state),
            ParserState::Escape => self.escape(byte, state),
            ParserState::EscapeIntermediate => self.escape_intermediate(byte),
            ParserState::CsiEntry => self.csi_entry(byte, state),
            ParserState::CsiParam => self.csi_param(byte, state),
            ParserState::CsiIntermediate => self.csi_intermediate(byte, state),
            ParserState::OscString => self.osc_string_state(byte, state),
            ParserState::EscapeInOsc => self.escape_in_osc(byte, state),
        }
    }

    /// Feed an already-decoded non-ASCII character.
    pub fn feed_char(&mut self, ch: char, state: &mut TerminalState) {
        match self.state {
            ParserState::Ground => state.put_char(ch),
            ParserState::OscString => self.osc_string.push(ch),
            // Mid-sequence multibyte input is malformed; drop it.
            _ => {}
        }
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn ground(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        if (0x20..0x7F).contains(&byte) {
            state.put_char(byte as char);
        }
        None
    }

    fn escape(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            b'[' => {
                self.state = ParserState::CsiEntry;
                self.params.clear();
                self.intermediates.clear();
                self.current_param = None;
            }
            b']' => {
                self.state = ParserState::OscString;
                self.osc_string.clear();
            }
            b'7' => {
                state.save_cursor();
                self.state = ParserState::Ground;
            }
            b'8' => {
                state.restore_cursor();
                self.state = ParserState::Ground;
            }
            b'D' => {
                state.index();
                self.state = ParserState::Ground;
            }
            b'E' => {
                state.carriage_return();
                state.linefeed();
                self.state = ParserState::Ground;
            }
            b'M' => {
                state.reverse_index();
                self.state = ParserState::Ground;
            }
            b'c' => {
                state.reset();
                self.state = ParserState::Ground;
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::EscapeIntermediate;
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn escape_intermediate(&mut self, byte: u8) -> Option<Response> {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
            }
            // Final byte; charset selections and friends are ignored.
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_entry(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            b'0'..=b'9' => {
                self.current_param = Some((byte - b'0') as u16);
                self.state = ParserState::CsiParam;
            }
            b';' => {
                self.params.push(0);
                self.state = ParserState::CsiParam;
            }
            b'?' | b'>' | b'!' | b'=' => {
                self.intermediates.push(byte);
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => {
                return self.execute_csi(byte, state);
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_param(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            // Subparameter ':' is treated like a regular separator.
            b';' | b':' => {
                self.params.push(self.current_param.take().unwrap_or(0));
            }
            0x20..=0x2F => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                return self.execute_csi(byte, state);
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_intermediate(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
            }
            0x40..=0x7E => {
                return self.execute_csi(byte, state);
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn osc_string_state(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            0x07 => {
                self.execute_osc(state);
                self.state = ParserState::Ground;
            }
            0x1B => {
                self.state = ParserState::EscapeInOsc;
            }
            0x9C => {
                self.execute_osc(state);
                self.state = ParserState::Ground;
            }
            _ => {
                self.osc_string.push(byte as char);
            }
        }
        None
    }

    fn escape_in_osc(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        if byte == b'\\' {
            self.execute_osc(state);
            self.state = ParserState::Ground;
            None
        } else {
            // Not ST: terminate the OSC and reprocess as a fresh escape.
            self.execute_osc(state);
            self.enter_escape();
            self.escape(byte, state)
        }
    }

    fn execute_csi(&mut self, final_byte: u8, state: &mut TerminalState) -> Option<Response> {
        let is_private = self.intermediates.contains(&b'?');
        let is_gt = self.intermediates.contains(&b'>');
        let params = std::mem::take(&mut self.params);
        let p1 = |def: u16| params.first().copied().unwrap_or(def);

        let response = match (is_private, is_gt, final_byte) {
            (false, false, b'A') => {
                state.cursor_up(p1(1).max(1));
                None
            }
            (false, false, b'B') => {
                state.cursor_down(p1(1).max(1));
                None
            }
            (false, false, b'C') => {
                state.cursor_forward(p1(1).max(1));
                None
            }
            (false, false, b'D') => {
                state.cursor_backward(p1(1).max(1));
                None
            }
            (false, false, b'E') => {
                state.cursor_down(p1(1).max(1));
                state.carriage_return();
                None
            }
            (false, false, b'F') => {
                state.cursor_up(p1(1).max(1));
                state.carriage_return();
                None
            }
            (false, false, b'G') => {
                let col = p1(1);
                state.cursor_position(state.cursor().row + 1, col);
                None
            }
            (false, false, b'H') | (false, false, b'f') => {
                let row = p1(1);
                let col = params.get(1).copied().unwrap_or(1);
                state.cursor_position(row, col);
                None
            }
            (false, false, b'd') => {
                let row = p1(1);
                state.cursor_position(row, state.cursor().col + 1);
                None
            }
            (false, false, b'J') => {
                state.erase_in_display(p1(0));
                None
            }
            (false, false, b'K') => {
                state.erase_in_line(p1(0));
                None
            }
            (false, false, b'L') => {
                state.insert_lines(p1(1).max(1));
                None
            }
            (false, false, b'M') => {
                state.delete_lines(p1(1).max(1));
                None
            }
            (false, false, b'@') => {
                state.insert_chars(p1(1).max(1));
                None
            }
            (false, false, b'P') => {
                state.delete_chars(p1(1).max(1));
                None
            }
            (false, false, b'X') => {
                state.erase_chars(p1(1).max(1));
                None
            }
            (false, false, b'S') => {
                state.scroll_up(p1(1).max(1));
                None
            }
            (false, false, b'T') => {
                state.scroll_down(p1(1).max(1));
                None
            }
            (false, false, b'r') => {
                let top = p1(1);
                let bottom = params.get(1).copied().unwrap_or(state.rows);
                state.set_scroll_region(top, bottom);
                state.cursor_position(1, 1);
                None
            }
            (false, false, b'm') => {
                execute_sgr(&params, state);
                None
            }
            (false, false, b's') => {
                state.save_cursor();
                None
            }
            (false, false, b'u') => {
                state.restore_cursor();
                None
            }
            (false, false, b'n') => match params.first().copied() {
                Some(6) => {
                    let c = state.cursor();
                    Some(Response::CursorPosition(c.row + 1, c.col + 1))
                }
                _ => None,
            },
            (false, false, b'c') => Some(Response::DeviceAttributes),
            (false, true, b'c') => Some(Response::SecondaryDeviceAttributes),
            (true, false, b'h') => {
                for &p in &params {
                    state.set_private_mode(p, true);
                }
                None
            }
            (true, false, b'l') => {
                for &p in &params {
                    state.set_private_mode(p, false);
                }
                None
            }
            (false, false, b'h') => {
                for &p in &params {
                    match p {
                        4 => state.modes.insert_mode = true,
                        20 => state.modes.linefeed_newline = true,
                        _ => {}
                    }
                }
                None
            }
            (false, false, b'l') => {
                for &p in &params {
                    match p {
                        4 => state.modes.insert_mode = false,
                        20 => state.modes.linefeed_newline = false,
                        _ => {}
                    }
                }
                None
            }
            _ => {
                tracing::debug!(
                    "unknown CSI: intermediates={:?}, params={:?}, final={:?}",
                    self.intermediates,
                    params,
                    final_byte as char
                );
                None
            }
        };

        self.state = ParserState::Ground;
        response
    }

    fn execute_osc(&mut self, state: &mut TerminalState) {
        // "code;text"
        if let Some(pos) = self.osc_string.find(';') {
            let code = &self.osc_string[..pos];
            let text = &self.osc_string[pos + 1..];
            if matches!(code, "0" | "1" | "2") {
                state.title = text.to_string();
            }
        }
    }
}

fn execute_sgr(params: &[u16], state: &mut TerminalState) {
    if params.is_empty() {
        state.current_attrs.reset();
        return;
    }

    let mut iter = params.iter();
    while let Some(&param) = iter.next() {
        match param {
            0 => state.current_attrs.reset(),
            1 => state.current_attrs.flags |= AttrFlags::BOLD,
            2 => state.current_attrs.flags |= AttrFlags::DIM,
            3 => state.current_attrs.flags |= AttrFlags::ITALIC,
            4 => state.current_attrs.flags |= AttrFlags::UNDERLINE,
            5 => state.current_attrs.flags |= AttrFlags::BLINK,
            7 => state.current_attrs.flags |= AttrFlags::INVERSE,
            8 => state.current_attrs.flags |= AttrFlags::HIDDEN,
            9 => state.current_attrs.flags |= AttrFlags::STRIKETHROUGH,

            22 => state.current_attrs.flags &= !(AttrFlags::BOLD | AttrFlags::DIM),
            23 => state.current_attrs.flags &= !AttrFlags::ITALIC,
            24 => state.current_attrs.flags &= !AttrFlags::UNDERLINE,
            25 => state.current_attrs.flags &= !AttrFlags::BLINK,
            27 => state.current_attrs.flags &= !AttrFlags::INVERSE,
            28 => state.current_attrs.flags &= !AttrFlags::HIDDEN,
            29 => state.current_attrs.flags &= !AttrFlags::STRIKETHROUGH,

            30..=37 => state.current_attrs.fg = Color::Indexed((param - 30) as u8),
            38 => {
                if let Some(color) = extended_color(&mut iter) {
                    state.current_attrs.fg = color;
                }
            }
            39 => state.current_attrs.fg = Color::Default,

            40..=47 => state.current_attrs.bg = Color::Indexed((param - 40) as u8),
            48 => {
                if let Some(color) = extended_color(&mut iter) {
                    state.current_attrs.bg = color;
                }
            }
            49 => state.current_attrs.bg = Color::Default,

            90..=97 => state.current_attrs.fg = Color::Indexed((param - 90 + 8) as u8),
            100..=107 => state.current_attrs.bg = Color::Indexed((param - 100 + 8) as u8),

            _ => {}
        }
    }
}

/// `38;5;n`, `38;2;r;g;b` (and the 48 equivalents).
fn extended_color<'a, I>(iter: &mut I) -> Option<Color>
where
    I: Iterator<Item = &'a u16>,
{
    match iter.next().copied() {
        Some(5) => iter.next().map(|&n| Color::Indexed(n as u8)),
        Some(2) => {
            let r = iter.next().copied().unwrap_or(0) as u8;
            let g = iter.next().copied().unwrap_or(0) as u8;
            let b = iter.next().copied().unwrap_or(0) as u8;
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Rgb;

    fn state(cols: u16, rows: u16) -> TerminalState {
        TerminalState::new(cols, rows, Rgb::new(255, 255, 255), Rgb::new(0, 0, 0))
    }

    fn feed_all(parser: &mut VtParser, state: &mut TerminalState, bytes: &[u8]) -> Vec<Response> {
        bytes
            .iter()
            .filter_map(|&b| parser.feed(b, state))
            .collect()
    }

    #[test]
    fn cursor_movement() {
        let mut st = state(80, 24);
        let mut parser = VtParser::new();
        feed_all(&mut parser, &mut st, b"\x1b[5;10H");
        assert_eq!(st.cursor().row, 4);
        assert_eq!(st.cursor().col, 9);
    }

    #[test]
    fn sgr_colors() {
        let mut st = state(80, 24);
        let mut parser = VtParser::new();
        feed_all(&mut parser, &mut st, b"\x1b[31m");
        assert_eq!(st.current_attrs.fg, Color::Indexed(1));
        feed_all(&mut parser, &mut st, b"\x1b[38;2;10;20;30m");
        assert_eq!(st.current_attrs.fg, Color::Rgb(10, 20, 30));
        feed_all(&mut parser, &mut st, b"\x1b[48;5;226m");
        assert_eq!(st.current_attrs.bg, Color::Indexed(226));
        feed_all(&mut parser, &mut st, b"\x1b[0m");
        assert_eq!(st.current_attrs, Default::default());
    }

    #[test]
    fn echoed_line_lands_in_the_grid() {
        let mut st = state(80, 24);
        let mut parser = VtParser::new();
        feed_all(&mut parser, &mut st, b"AB\r\nC");
        assert!(matches!(
            st.cell(0, 0),
            Some(super::super::state::Cell::Glyph { ch: 'A', .. })
        ));
        assert!(matches!(
            st.cell(0, 1),
            Some(super::super::state::Cell::Glyph { ch: 'B', .. })
        ));
        assert_eq!((st.cursor().row, st.cursor().col), (1, 1));
    }

    #[test]
    fn cursor_position_report() {
        let mut st = state(80, 24);
        let mut parser = VtParser::new();
        feed_all(&mut parser, &mut st, b"\x1b[3;7H");
        let responses = feed_all(&mut parser, &mut st, b"\x1b[6n");
        assert_eq!(responses, vec![Response::CursorPosition(3, 7)]);
        assert_eq!(responses[0].to_bytes(), b"\x1b[3;7R");
    }

    #[test]
    fn osc_title_with_bel_and_st() {
        let mut st = state(80, 24);
        let mut parser = VtParser::new();
        feed_all(&mut parser, &mut st, b"\x1b]0;hello\x07");
        assert_eq!(st.title, "hello");
        feed_all(&mut parser, &mut st, b"\x1b]2;world\x1b\\");
        assert_eq!(st.title, "world");
    }

    #[test]
    fn inverse_flag_round_trip() {
        let mut st = state(80, 24);
        let mut parser = VtParser::new();
        feed_all(&mut parser, &mut st, b"\x1b[7m");
        assert!(st.current_attrs.flags.contains(AttrFlags::INVERSE));
        feed_all(&mut parser, &mut st, b"\x1b[27m");
        assert!(!st.current_attrs.flags.contains(AttrFlags::INVERSE));
    }

    #[test]
    fn scroll_region_clamps_linefeed() {
        let mut st = state(10, 10);
        let mut parser = VtParser::new();
        feed_all(&mut parser, &mut st, b"\x1b[2;5r");
        // DECSTBM homes the cursor.
        assert_eq!((st.cursor().row, st.cursor().col), (0, 0));
    }
}

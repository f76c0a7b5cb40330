//! Terminal state: screen buffers, cursor, and attributes.
//!
//! The state is a plain cell grid sized to the pane. Cells are a tagged
//! shape: a glyph with attributes, the continuation half of a double-width
//! glyph, or a blank carrying only erase attributes.

use bitflags::bitflags;
use unicode_width::UnicodeWidthChar;

use crate::config::Rgb;

/// One grid position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cell {
    /// A printable codepoint occupying one or two columns.
    Glyph { ch: char, width: u8, attrs: CellAttrs },
    /// Right half of a double-width glyph; never rendered directly.
    Continuation,
    /// Nothing written, or erased with these attributes.
    Blank { attrs: CellAttrs },
}

impl Default for Cell {
    fn default() -> Self {
        Cell::Blank {
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    /// Width in columns: 1 or 2 for glyphs, 0 for continuations.
    pub fn width(&self) -> u8 {
        match self {
            Cell::Glyph { width, .. } => *width,
            Cell::Continuation => 0,
            Cell::Blank { .. } => 1,
        }
    }

    /// Attributes, for everything except continuation halves.
    pub fn attrs(&self) -> Option<&CellAttrs> {
        match self {
            Cell::Glyph { attrs, .. } | Cell::Blank { attrs } => Some(attrs),
            Cell::Continuation => None,
        }
    }
}

/// Cell attributes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Colour as reported by the emulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    /// Resolve to RGB; `Default` falls back to the supplied colour.
    pub fn to_rgb(self, default: Rgb) -> Rgb {
        match self {
            Color::Default => default,
            Color::Rgb(r, g, b) => Rgb::new(r, g, b),
            Color::Indexed(n) => xterm_palette(n),
        }
    }
}

/// The standard xterm 256-colour palette.
fn xterm_palette(n: u8) -> Rgb {
    const BASE: [(u8, u8, u8); 16] = [
        (0, 0, 0),
        (205, 0, 0),
        (0, 205, 0),
        (205, 205, 0),
        (0, 0, 238),
        (205, 0, 205),
        (0, 205, 205),
        (229, 229, 229),
        (127, 127, 127),
        (255, 0, 0),
        (0, 255, 0),
        (255, 255, 0),
        (92, 92, 255),
        (255, 0, 255),
        (0, 255, 255),
        (255, 255, 255),
    ];
    match n {
        0..=15 => {
            let (r, g, b) = BASE[n as usize];
            Rgb::new(r, g, b)
        }
        16..=231 => {
            let idx = n - 16;
            let level = |v: u8| if v == 0 { 0 } else { 55 + 40 * v };
            Rgb::new(
                level(idx / 36),
                level((idx / 6) % 6),
                level(idx % 6),
            )
        }
        232..=255 => {
            let v = 8 + 10 * (n - 232);
            Rgb::new(v, v, v)
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}

/// Cursor state.
#[derive(Clone)]
pub struct CursorState {
    pub col: u16,
    pub row: u16,
    pub visible: bool,
    pub saved: Option<SavedCursor>,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            col: 0,
            row: 0,
            visible: true,
            saved: None,
        }
    }
}

#[derive(Clone)]
pub struct SavedCursor {
    pub col: u16,
    pub row: u16,
    pub attrs: CellAttrs,
}

/// Terminal modes.
#[derive(Clone)]
pub struct TerminalModes {
    pub application_cursor: bool,
    pub auto_wrap: bool,
    pub insert_mode: bool,
    pub linefeed_newline: bool,
    pub bracketed_paste: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            auto_wrap: true,
            insert_mode: false,
            linefeed_newline: false,
            bracketed_paste: false,
        }
    }
}

/// One row of cells.
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
        }
    }

    pub fn resize(&mut self, new_cols: u16) {
        self.cells.resize(new_cols as usize, Cell::default());
    }

    pub fn clear(&mut self, attrs: CellAttrs) {
        for cell in &mut self.cells {
            *cell = Cell::Blank { attrs };
        }
    }
}

/// A screen: the visible cell grid.
pub struct ScreenBuffer {
    pub rows: Vec<Row>,
}

impl ScreenBuffer {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows: (0..rows).map(|_| Row::new(cols)).collect(),
        }
    }

    pub fn resize(&mut self, new_cols: u16, new_rows: u16) {
        while self.rows.len() < new_rows as usize {
            self.rows.push(Row::new(new_cols));
        }
        self.rows.truncate(new_rows as usize);
        for row in &mut self.rows {
            row.resize(new_cols);
        }
    }
}

/// Terminal state holding all screen data.
pub struct TerminalState {
    pub cols: u16,
    pub rows: u16,
    primary_screen: ScreenBuffer,
    alternate_screen: ScreenBuffer,
    using_alternate: bool,
    primary_cursor: CursorState,
    alternate_cursor: CursorState,
    pub current_attrs: CellAttrs,
    pub modes: TerminalModes,
    pub title: String,
    /// Scroll region (top, bottom), 0-indexed inclusive.
    scroll_region: (u16, u16),
    default_fg: Rgb,
    default_bg: Rgb,
}

impl TerminalState {
    pub fn new(cols: u16, rows: u16, default_fg: Rgb, default_bg: Rgb) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            primary_screen: ScreenBuffer::new(cols, rows),
            alternate_screen: ScreenBuffer::new(cols, rows),
            using_alternate: false,
            primary_cursor: CursorState::default(),
            alternate_cursor: CursorState::default(),
            current_attrs: CellAttrs::default(),
            modes: TerminalModes::default(),
            title: String::new(),
            scroll_region: (0, rows - 1),
            default_fg,
            default_bg,
        }
    }

    /// Full reset (RIS), keeping geometry and default colours.
    pub fn reset(&mut self) {
        *self = Self::new(self.cols, self.rows, self.default_fg, self.default_bg);
    }

    pub fn default_fg(&self) -> Rgb {
        self.default_fg
    }

    pub fn default_bg(&self) -> Rgb {
        self.default_bg
    }

    pub fn screen(&self) -> &ScreenBuffer {
        if self.using_alternate {
            &self.alternate_screen
        } else {
            &self.primary_screen
        }
    }

    pub fn screen_mut(&mut self) -> &mut ScreenBuffer {
        if self.using_alternate {
            &mut self.alternate_screen
        } else {
            &mut self.primary_screen
        }
    }

    pub fn cursor(&self) -> &CursorState {
        if self.using_alternate {
            &self.alternate_cursor
        } else {
            &self.primary_cursor
        }
    }

    pub fn cursor_mut(&mut self) -> &mut CursorState {
        if self.using_alternate {
            &mut self.alternate_cursor
        } else {
            &mut self.primary_cursor
        }
    }

    /// Cell at `(row, col)` on the active screen.
    pub fn cell(&self, row: u16, col: u16) -> Option<&Cell> {
        self.screen()
            .rows
            .get(row as usize)
            .and_then(|r| r.cells.get(col as usize))
    }

    /// Resize both screens, clamping cursors into the new grid.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        self.cols = cols;
        self.rows = rows;
        self.primary_screen.resize(cols, rows);
        self.alternate_screen.resize(cols, rows);
        self.scroll_region = (0, rows - 1);

        let max_col = cols - 1;
        let max_row = rows - 1;
        self.primary_cursor.col = self.primary_cursor.col.min(max_col);
        self.primary_cursor.row = self.primary_cursor.row.min(max_row);
        self.alternate_cursor.col = self.alternate_cursor.col.min(max_col);
        self.alternate_cursor.row = self.alternate_cursor.row.min(max_row);
    }

    /// Put a character at the cursor, advancing it by the character width.
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0) as u16;
        if width == 0 {
            // Combining marks have no cell of their own.
            return;
        }

        let (cursor_row, cursor_col) = {
            let c = self.cursor();
            (c.row, c.col)
        };

        // Wrap only once the cursor has moved past the right edge.
        if cursor_col >= self.cols {
            if self.modes.auto_wrap {
                self.cursor_mut().col = 0;
                self.linefeed();
            } else {
                self.cursor_mut().col = self.cols - 1;
            }
        }

        let (row, col) = {
            let c = self.cursor();
            (c.row as usize, c.col as usize)
        };
        if col >= self.cols as usize {
            return;
        }

        self.fix_wide_overwrite(row, col);

        let attrs = self.current_attrs;
        let cols = self.cols as usize;
        let screen = self.screen_mut();
        screen.rows[row].cells[col] = Cell::Glyph {
            ch,
            width: width as u8,
            attrs,
        };
        if width == 2 && col + 1 < cols {
            screen.rows[row].cells[col + 1] = Cell::Continuation;
        }

        self.cursor_mut().col += width;
    }

    /// Overwriting either half of a double-width glyph blanks the other half.
    fn fix_wide_overwrite(&mut self, row: usize, col: usize) {
        let attrs = self.current_attrs;
        let cols = self.cols as usize;
        let screen = self.screen_mut();
        let cells = &mut screen.rows[row].cells;

        if col > 0 && matches!(cells[col], Cell::Continuation) {
            cells[col - 1] = Cell::Blank { attrs };
        }
        if matches!(cells[col], Cell::Glyph { width: 2, .. }) && col + 1 < cols {
            cells[col + 1] = Cell::Blank { attrs };
        }
    }

    pub fn carriage_return(&mut self) {
        self.cursor_mut().col = 0;
    }

    /// Line feed: move down, scrolling at the bottom of the scroll region.
    pub fn linefeed(&mut self) {
        let cursor_row = self.cursor().row;
        let bottom = self.scroll_region.1;
        if cursor_row >= bottom {
            self.scroll_up(1);
        } else if cursor_row < self.rows - 1 {
            self.cursor_mut().row += 1;
        }
    }

    pub fn backspace(&mut self) {
        let cursor = self.cursor_mut();
        if cursor.col > 0 {
            cursor.col -= 1;
        }
    }

    /// Move to the next 8-column tab stop.
    pub fn horizontal_tab(&mut self) {
        let cols = self.cols;
        let cursor = self.cursor_mut();
        cursor.col = ((cursor.col / 8) + 1) * 8;
        if cursor.col >= cols {
            cursor.col = cols - 1;
        }
    }

    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;
        let screen = self.screen_mut();
        for _ in 0..n {
            if (top as usize) < screen.rows.len() && (bottom as usize) < screen.rows.len() {
                screen.rows.remove(top as usize);
                screen.rows.insert(bottom as usize, Row::new(cols));
            }
        }
    }

    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;
        let screen = self.screen_mut();
        for _ in 0..n {
            if (bottom as usize) < screen.rows.len() {
                screen.rows.remove(bottom as usize);
                screen.rows.insert(top as usize, Row::new(cols));
            }
        }
    }

    pub fn cursor_up(&mut self, n: u16) {
        let cursor = self.cursor_mut();
        cursor.row = cursor.row.saturating_sub(n);
    }

    pub fn cursor_down(&mut self, n: u16) {
        let rows = self.rows;
        let cursor = self.cursor_mut();
        cursor.row = (cursor.row + n).min(rows - 1);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        let cols = self.cols;
        let cursor = self.cursor_mut();
        cursor.col = (cursor.col + n).min(cols - 1);
    }

    pub fn cursor_backward(&mut self, n: u16) {
        let cursor = self.cursor_mut();
        cursor.col = cursor.col.saturating_sub(n);
    }

    /// Set cursor position (1-indexed parameters).
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        let rows = self.rows;
        let cols = self.cols;
        let cursor = self.cursor_mut();
        cursor.row = row.saturating_sub(1).min(rows - 1);
        cursor.col = col.saturating_sub(1).min(cols - 1);
    }

    /// ED: erase in display.
    pub fn erase_in_display(&mut self, mode: u16) {
        match mode {
            0 => {
                self.erase_in_line(0);
                let from = self.cursor().row as usize + 1;
                let attrs = self.current_attrs;
                let screen = self.screen_mut();
                for r in from..screen.rows.len() {
                    screen.rows[r].clear(attrs);
                }
            }
            1 => {
                let to = self.cursor().row as usize;
                let attrs = self.current_attrs;
                {
                    let screen = self.screen_mut();
                    for r in 0..to {
                        screen.rows[r].clear(attrs);
                    }
                }
                self.erase_in_line(1);
            }
            2 | 3 => {
                let attrs = self.current_attrs;
                let screen = self.screen_mut();
                for row in &mut screen.rows {
                    row.clear(attrs);
                }
            }
            _ => {}
        }
    }

    /// EL: erase in line.
    pub fn erase_in_line(&mut self, mode: u16) {
        let (row, col) = {
            let c = self.cursor();
            (c.row as usize, c.col as usize)
        };
        let attrs = self.current_attrs;
        let screen = self.screen_mut();
        let Some(cells) = screen.rows.get_mut(row).map(|r| &mut r.cells) else {
            return;
        };
        let end = cells.len();
        let range = match mode {
            0 => col.min(end)..end,
            1 => 0..(col + 1).min(end),
            2 => 0..end,
            _ => return,
        };
        for cell in &mut cells[range] {
            *cell = Cell::Blank { attrs };
        }
    }

    /// IL: insert blank lines at the cursor.
    pub fn insert_lines(&mut self, n: u16) {
        let row = self.cursor().row as usize;
        let total = self.rows as usize;
        let cols = self.cols;
        let screen = self.screen_mut();
        for _ in 0..n {
            if row < screen.rows.len() {
                screen.rows.insert(row, Row::new(cols));
                if screen.rows.len() > total {
                    screen.rows.pop();
                }
            }
        }
    }

    /// DL: delete lines at the cursor.
    pub fn delete_lines(&mut self, n: u16) {
        let row = self.cursor().row as usize;
        let cols = self.cols;
        let screen = self.screen_mut();
        for _ in 0..n {
            if row < screen.rows.len() {
                screen.rows.remove(row);
                screen.rows.push(Row::new(cols));
            }
        }
    }

    /// ICH: insert blank characters, shifting the tail right.
    pub fn insert_chars(&mut self, n: u16) {
        let (row, col) = {
            let c = self.cursor();
            (c.row as usize, c.col as usize)
        };
        let attrs = self.current_attrs;
        let screen = self.screen_mut();
        let Some(cells) = screen.rows.get_mut(row).map(|r| &mut r.cells) else {
            return;
        };
        for _ in 0..n {
            if col < cells.len() {
                cells.pop();
                cells.insert(col, Cell::Blank { attrs });
            }
        }
    }

    /// DCH: delete characters, shifting the tail left.
    pub fn delete_chars(&mut self, n: u16) {
        let (row, col) = {
            let c = self.cursor();
            (c.row as usize, c.col as usize)
        };
        let attrs = self.current_attrs;
        let screen = self.screen_mut();
        let Some(cells) = screen.rows.get_mut(row).map(|r| &mut r.cells) else {
            return;
        };
        for _ in 0..n {
            if col < cells.len() {
                cells.remove(col);
                cells.push(Cell::Blank { attrs });
            }
        }
    }

    /// ECH: erase characters in place.
    pub fn erase_chars(&mut self, n: u16) {
        let (row, col) = {
            let c = self.cursor();
            (c.row as usize, c.col as usize)
        };
        let attrs = self.current_attrs;
        let screen = self.screen_mut();
        let Some(cells) = screen.rows.get_mut(row).map(|r| &mut r.cells) else {
            return;
        };
        for i in 0..n as usize {
            if col + i < cells.len() {
                cells[col + i] = Cell::Blank { attrs };
            }
        }
    }

    /// DECSTBM: set scroll region (1-indexed, inclusive).
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let max = self.rows - 1;
        let top = top.saturating_sub(1).min(max);
        let bottom = bottom.saturating_sub(1).min(max);
        if top < bottom {
            self.scroll_region = (top, bottom);
        }
    }

    pub fn save_cursor(&mut self) {
        let (col, row) = {
            let c = self.cursor();
            (c.col, c.row)
        };
        let attrs = self.current_attrs;
        self.cursor_mut().saved = Some(SavedCursor { col, row, attrs });
    }

    pub fn restore_cursor(&mut self) {
        if let Some(saved) = self.cursor().saved.clone() {
            let cursor = self.cursor_mut();
            cursor.col = saved.col;
            cursor.row = saved.row;
            self.current_attrs = saved.attrs;
        }
    }

    /// DEC private mode set/reset.
    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.modes.application_cursor = enable,
            7 => self.modes.auto_wrap = enable,
            25 => self.cursor_mut().visible = enable,
            47 | 1047 => {
                if enable {
                    self.using_alternate = true;
                    self.alternate_screen = ScreenBuffer::new(self.cols, self.rows);
                } else {
                    self.using_alternate = false;
                }
            }
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    self.save_cursor();
                    self.using_alternate = true;
                    self.alternate_screen = ScreenBuffer::new(self.cols, self.rows);
                    self.alternate_cursor = CursorState::default();
                } else {
                    self.using_alternate = false;
                    self.restore_cursor();
                }
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => {}
        }
    }

    /// RI: cursor up, scrolling at the top of the region.
    pub fn reverse_index(&mut self) {
        if self.cursor().row == self.scroll_region.0 {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    /// IND.
    pub fn index(&mut self) {
        self.linefeed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(cols: u16, rows: u16) -> TerminalState {
        TerminalState::new(
            cols,
            rows,
            Rgb::new(0xD8, 0xDE, 0xE9),
            Rgb::new(0x2E, 0x34, 0x40),
        )
    }

    #[test]
    fn put_char_advances_cursor() {
        let mut st = state(80, 24);
        st.put_char('A');
        st.put_char('B');
        assert_eq!(st.cursor().col, 2);
        assert!(matches!(
            st.cell(0, 0),
            Some(Cell::Glyph { ch: 'A', width: 1, .. })
        ));
        assert!(matches!(
            st.cell(0, 1),
            Some(Cell::Glyph { ch: 'B', width: 1, .. })
        ));
    }

    #[test]
    fn wide_char_writes_continuation() {
        let mut st = state(80, 24);
        st.put_char('漢');
        assert!(matches!(
            st.cell(0, 0),
            Some(Cell::Glyph { ch: '漢', width: 2, .. })
        ));
        assert!(matches!(st.cell(0, 1), Some(Cell::Continuation)));
        assert_eq!(st.cursor().col, 2);
    }

    #[test]
    fn overwriting_wide_half_blanks_the_other() {
        let mut st = state(80, 24);
        st.put_char('漢');
        st.cursor_position(1, 2); // on the continuation half
        st.put_char('x');
        assert!(matches!(st.cell(0, 0), Some(Cell::Blank { .. })));
        assert!(matches!(st.cell(0, 1), Some(Cell::Glyph { ch: 'x', .. })));
    }

    #[test]
    fn linefeed_scrolls_at_bottom() {
        let mut st = state(10, 3);
        st.put_char('a');
        st.cursor_position(3, 1);
        st.put_char('z');
        st.linefeed(); // at the last row: scrolls
        assert_eq!(st.cursor().row, 2);
        // Row 0 ('a') scrolled out, 'z' moved up one row.
        assert!(matches!(st.cell(1, 0), Some(Cell::Glyph { ch: 'z', .. })));
        assert!(matches!(st.cell(0, 0), Some(Cell::Blank { .. })));
    }

    #[test]
    fn wrap_only_past_right_edge() {
        let mut st = state(3, 2);
        st.put_char('a');
        st.put_char('b');
        st.put_char('c');
        assert_eq!(st.cursor().row, 0);
        st.put_char('d'); // wraps first
        assert_eq!(st.cursor().row, 1);
        assert!(matches!(st.cell(1, 0), Some(Cell::Glyph { ch: 'd', .. })));
    }

    #[test]
    fn resize_is_idempotent() {
        let mut st = state(80, 24);
        st.cursor_position(24, 80);
        st.resize(40, 12);
        let after_once = (st.cols, st.rows, st.cursor().col, st.cursor().row);
        st.resize(40, 12);
        let after_twice = (st.cols, st.rows, st.cursor().col, st.cursor().row);
        assert_eq!(after_once, after_twice);
        assert_eq!(after_once, (40, 12, 39, 11));
    }

    #[test]
    fn erase_in_line_from_cursor() {
        let mut st = state(5, 2);
        for ch in "abcde".chars() {
            st.put_char(ch);
        }
        st.cursor_position(1, 3);
        st.erase_in_line(0);
        assert!(matches!(st.cell(0, 1), Some(Cell::Glyph { ch: 'b', .. })));
        assert!(matches!(st.cell(0, 2), Some(Cell::Blank { .. })));
        assert!(matches!(st.cell(0, 4), Some(Cell::Blank { .. })));
    }

    #[test]
    fn palette_resolution() {
        let default = Rgb::new(1, 2, 3);
        assert_eq!(Color::Default.to_rgb(default), default);
        assert_eq!(Color::Rgb(9, 8, 7).to_rgb(default), Rgb::new(9, 8, 7));
        assert_eq!(Color::Indexed(15).to_rgb(default), Rgb::new(255, 255, 255));
        // Cube corner 16 is black, 231 is white.
        assert_eq!(Color::Indexed(16).to_rgb(default), Rgb::new(0, 0, 0));
        assert_eq!(Color::Indexed(231).to_rgb(default), Rgb::new(255, 255, 255));
        // Grayscale ramp.
        assert_eq!(Color::Indexed(232).to_rgb(default), Rgb::new(8, 8, 8));
        assert_eq!(Color::Indexed(255).to_rgb(default), Rgb::new(238, 238, 238));
    }

    #[test]
    fn alternate_screen_round_trip() {
        let mut st = state(10, 4);
        st.put_char('p');
        st.set_private_mode(1049, true);
        assert!(matches!(st.cell(0, 0), Some(Cell::Blank { .. })));
        st.put_char('q');
        st.set_private_mode(1049, false);
        assert!(matches!(st.cell(0, 0), Some(Cell::Glyph { ch: 'p', .. })));
    }
}

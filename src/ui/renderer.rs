//! Compositor: rasterises the active tab into the shadow buffer.
//!
//! Rendering is two-pass per frame: every cell background first, then every
//! glyph. The ordering is load-bearing: a glyph's bearings may reach into a
//! neighbouring cell, and painting that neighbour's background afterwards
//! would erase the overhang. The frame reaches the scan-out buffer only
//! through the final bulk copy.

use crate::config::{Palette, Rgb};
use crate::core::term::{AttrFlags, Cell, CellAttrs, TerminalState};
use crate::drm::Display;
use crate::font::FontRaster;
use crate::wm::tab::{Layout, Tab};
use crate::wm::WindowManager;

/// Render one frame of the active tab and commit it.
pub fn render(display: &mut Display, font: &FontRaster, wm: &WindowManager, palette: &Palette) {
    let width = display.width();
    let height = display.height();
    let stride = display.stride();
    let tab = wm.active();
    let num_tabs = wm.tabs().len();
    let active_idx = wm.active_index();

    {
        let shadow = display.shadow_mut();
        draw_tab(shadow, stride, width, height, font, tab, palette);
        draw_tab_bar(
            shadow, stride, width, height, font, num_tabs, active_idx, palette,
        );
    }
    display.commit();
}

fn draw_tab(
    shadow: &mut [u8],
    stride: u32,
    width: u32,
    height: u32,
    font: &FontRaster,
    tab: &Tab,
    palette: &Palette,
) {
    let rows = tab.term_rows;
    let cw = font.cell_w();
    let ch = font.cell_h();
    let asc = font.ascender();

    // Background pass over every pane.
    for (p, pane) in tab.panes.iter().enumerate() {
        let term = &pane.session.term;
        let cursor = cursor_cell(term, p == tab.active_pane);
        for r in 0..rows {
            for c in 0..pane.term_cols {
                let Some(cell) = term.cell(r, c) else { continue };
                let cell_w_cols = cell.width();
                if cell_w_cols == 0 {
                    continue;
                }
                let Some(attrs) = cell.attrs() else { continue };
                let is_cursor = cursor == Some((r, c));
                let (_, bg) = resolve_colors(term, attrs, palette, is_cursor);
                fill_rect(
                    shadow,
                    stride,
                    width,
                    height,
                    pane.start_col_px + c as i32 * cw,
                    r as i32 * ch,
                    cell_w_cols as i32 * cw,
                    ch,
                    bg.pack(),
                );
            }
        }
    }

    // Foreground pass over every pane.
    for (p, pane) in tab.panes.iter().enumerate() {
        let term = &pane.session.term;
        let cursor = cursor_cell(term, p == tab.active_pane);
        for r in 0..rows {
            for c in 0..pane.term_cols {
                let Some(cell) = term.cell(r, c) else { continue };
                let Cell::Glyph { ch: glyph_ch, width: cell_w_cols, attrs } = cell else {
                    continue;
                };
                if *glyph_ch == ' ' {
                    continue;
                }
                let is_cursor = cursor == Some((r, c));
                let (fg, bg) = resolve_colors(term, attrs, palette, is_cursor);
                let Ok(glyph) = font.raster(*glyph_ch) else { continue };

                let full_px_w = *cell_w_cols as i32 * cw;
                let x_offset = ((full_px_w - glyph.advance_px) / 2).max(0);
                blend_coverage(
                    shadow,
                    stride,
                    width,
                    height,
                    pane.start_col_px + c as i32 * cw + x_offset + glyph.left,
                    r as i32 * ch + asc - glyph.top,
                    glyph.bitmap.buffer(),
                    glyph.bitmap.width(),
                    glyph.bitmap.rows(),
                    glyph.bitmap.pitch(),
                    fg,
                    bg,
                );
            }
        }
    }

    // Splitter between the panes of a split tab.
    if tab.layout == Layout::Split && tab.panes.len() == 2 {
        let mut x = tab.panes[1].start_col_px;
        if x > 0 {
            x -= 1;
        }
        fill_rect(
            shadow,
            stride,
            width,
            height,
            x,
            0,
            1,
            rows as i32 * ch,
            palette.tabbar_fg.pack(),
        );
    }
}

/// Cursor cell of this pane, when it should be painted.
fn cursor_cell(term: &TerminalState, is_active_pane: bool) -> Option<(u16, u16)> {
    let cursor = term.cursor();
    (is_active_pane && cursor.visible).then_some((cursor.row, cursor.col))
}

/// Resolve a cell's colours: defaults filled in, inverse applied, cursor
/// overrides last.
fn resolve_colors(
    term: &TerminalState,
    attrs: &CellAttrs,
    palette: &Palette,
    is_cursor: bool,
) -> (Rgb, Rgb) {
    let mut fg = attrs.fg.to_rgb(term.default_fg());
    let mut bg = attrs.bg.to_rgb(term.default_bg());
    if attrs.flags.contains(AttrFlags::INVERSE) {
        std::mem::swap(&mut fg, &mut bg);
    }
    if is_cursor {
        fg = palette.cursor_fg;
        bg = palette.cursor_bg;
    }
    (fg, bg)
}

#[allow(clippy::too_many_arguments)]
fn draw_tab_bar(
    shadow: &mut [u8],
    stride: u32,
    width: u32,
    height: u32,
    font: &FontRaster,
    num_tabs: usize,
    active_idx: usize,
    palette: &Palette,
) {
    let cw = font.cell_w();
    let ch = font.cell_h();
    let bar_y = height as i32 - ch;

    fill_rect(
        shadow,
        stride,
        width,
        height,
        0,
        bar_y,
        width as i32,
        ch,
        palette.tabbar_bg.pack(),
    );

    let mut pen_x = cw / 2;
    for i in 0..num_tabs {
        let label = format!(" {} ", i + 1);
        let (fg, bg) = if i == active_idx {
            (palette.cursor_fg, palette.tabbar_active)
        } else {
            (palette.tabbar_fg, palette.tabbar_bg)
        };

        let label_px_w = label.len() as i32 * cw;
        fill_rect(
            shadow, stride, width, height, pen_x, bar_y, label_px_w, ch, bg.pack(),
        );
        draw_text(shadow, stride, width, height, font, pen_x, bar_y, &label, fg, bg);
        pen_x += label_px_w + cw / 2;
    }
}

/// Draw a short UI string, advancing the pen by each glyph's advance.
#[allow(clippy::too_many_arguments)]
fn draw_text(
    shadow: &mut [u8],
    stride: u32,
    width: u32,
    height: u32,
    font: &FontRaster,
    pen_x: i32,
    pen_y: i32,
    text: &str,
    fg: Rgb,
    bg: Rgb,
) {
    let asc = font.ascender();
    let mut pen = pen_x;
    for ch in text.chars() {
        let Ok(glyph) = font.raster(ch) else { continue };
        blend_coverage(
            shadow,
            stride,
            width,
            height,
            pen + glyph.left,
            pen_y + asc - glyph.top,
            glyph.bitmap.buffer(),
            glyph.bitmap.width(),
            glyph.bitmap.rows(),
            glyph.bitmap.pitch(),
            fg,
            bg,
        );
        pen += glyph.advance_px;
    }
}

/// Fill a rectangle, clipped to the surface, addressing rows by stride.
#[allow(clippy::too_many_arguments)]
fn fill_rect(
    buf: &mut [u8],
    stride: u32,
    surface_w: u32,
    surface_h: u32,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    color: u32,
) {
    let bytes = color.to_le_bytes();
    for dy in 0..h {
        let sy = y + dy;
        if sy < 0 || sy >= surface_h as i32 {
            continue;
        }
        for dx in 0..w {
            let sx = x + dx;
            if sx < 0 || sx >= surface_w as i32 {
                continue;
            }
            let off = sy as usize * stride as usize + sx as usize * 4;
            if off + 4 <= buf.len() {
                buf[off..off + 4].copy_from_slice(&bytes);
            }
        }
    }
}

/// Blend an 8-bit coverage grid over `bg` towards `fg`.
///
/// Fully transparent pixels leave the destination untouched, so glyph boxes
/// never stamp their background over neighbouring cells.
#[allow(clippy::too_many_arguments)]
fn blend_coverage(
    buf: &mut [u8],
    stride: u32,
    surface_w: u32,
    surface_h: u32,
    pen_x: i32,
    pen_y: i32,
    coverage: &[u8],
    cov_w: i32,
    cov_h: i32,
    cov_pitch: i32,
    fg: Rgb,
    bg: Rgb,
) {
    if cov_pitch <= 0 {
        return;
    }
    for row in 0..cov_h {
        let sy = pen_y + row;
        if sy < 0 || sy >= surface_h as i32 {
            continue;
        }
        for col in 0..cov_w {
            let sx = pen_x + col;
            if sx < 0 || sx >= surface_w as i32 {
                continue;
            }
            let a = coverage
                .get((row * cov_pitch + col) as usize)
                .copied()
                .unwrap_or(0);
            if a == 0 {
                continue;
            }
            let pixel = blend(fg, bg, a).pack().to_le_bytes();
            let off = sy as usize * stride as usize + sx as usize * 4;
            if off + 4 <= buf.len() {
                buf[off..off + 4].copy_from_slice(&pixel);
            }
        }
    }
}

/// Per-channel `round((fg*a + bg*(255-a)) / 255)`.
fn blend(fg: Rgb, bg: Rgb, a: u8) -> Rgb {
    let mix = |f: u8, b: u8| -> u8 {
        let sum = f as u32 * a as u32 + b as u32 * (255 - a as u32);
        ((sum + 127) / 255) as u8
    };
    Rgb::new(mix(fg.r, bg.r), mix(fg.g, bg.g), mix(fg.b, bg.b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::Color;

    #[test]
    fn blend_endpoints_and_midpoint() {
        let fg = Rgb::new(255, 255, 255);
        let bg = Rgb::new(0, 0, 0);
        assert_eq!(blend(fg, bg, 255), fg);
        assert_eq!(blend(fg, bg, 0), bg);
        // round(255*128/255) = 128
        assert_eq!(blend(fg, bg, 128), Rgb::new(128, 128, 128));
    }

    #[test]
    fn fill_rect_honours_stride_and_clipping() {
        // 4x3 surface with an oversized stride of 24 bytes (4*4 = 16 used).
        let mut buf = vec![0u8; 24 * 3];
        fill_rect(&mut buf, 24, 4, 3, -1, -1, 3, 3, 0x00FF0000);

        // (0,0) and (1,1) covered; the rect extends off the top-left corner.
        assert_eq!(&buf[0..4], &0x00FF0000u32.to_le_bytes());
        assert_eq!(&buf[24 + 4..24 + 8], &0x00FF0000u32.to_le_bytes());
        // (2,0) untouched, padding bytes untouched.
        assert_eq!(&buf[8..12], &[0, 0, 0, 0]);
        assert_eq!(&buf[16..24], &[0u8; 8]);
    }

    #[test]
    fn fill_rect_never_writes_past_the_buffer() {
        let mut buf = vec![0u8; 16 * 2];
        fill_rect(&mut buf, 16, 4, 2, 2, 1, 10, 10, 0x00123456);
        // No panic, and the last in-bounds pixel was written.
        assert_eq!(&buf[16 + 12..16 + 16], &0x00123456u32.to_le_bytes());
    }

    #[test]
    fn zero_coverage_leaves_destination_untouched() {
        let mut buf = vec![0xAAu8; 16];
        let cov = [0u8, 255, 0, 255];
        blend_coverage(
            &mut buf,
            16,
            4,
            1,
            0,
            0,
            &cov,
            4,
            1,
            4,
            Rgb::new(255, 0, 0),
            Rgb::new(0, 0, 0),
        );
        // a=0 pixels keep the old bytes.
        assert_eq!(&buf[0..4], &[0xAA; 4]);
        assert_eq!(&buf[4..8], &0x00FF0000u32.to_le_bytes());
        assert_eq!(&buf[8..12], &[0xAA; 4]);
    }

    #[test]
    fn coverage_respects_its_own_pitch() {
        let mut buf = vec![0u8; 16];
        // Two rows of width 1 with pitch 3: only bytes 0 and 3 are real.
        let cov = [255u8, 9, 9, 255, 9, 9];
        blend_coverage(
            &mut buf,
            8,
            2,
            2,
            0,
            0,
            &cov,
            1,
            2,
            3,
            Rgb::new(1, 2, 3),
            Rgb::new(0, 0, 0),
        );
        assert_eq!(&buf[0..4], &0x00010203u32.to_le_bytes());
        assert_eq!(&buf[8..12], &0x00010203u32.to_le_bytes());
    }

    #[test]
    fn cursor_overrides_resolved_colors() {
        let term = TerminalState::new(10, 4, Rgb::new(1, 1, 1), Rgb::new(2, 2, 2));
        let palette = Palette::default();
        let attrs = CellAttrs::default();

        let (fg, bg) = resolve_colors(&term, &attrs, &palette, false);
        assert_eq!(fg, Rgb::new(1, 1, 1));
        assert_eq!(bg, Rgb::new(2, 2, 2));

        let (fg, bg) = resolve_colors(&term, &attrs, &palette, true);
        assert_eq!(fg, palette.cursor_fg);
        assert_eq!(bg, palette.cursor_bg);
    }

    #[test]
    fn inverse_swaps_before_cursor_override() {
        let term = TerminalState::new(10, 4, Rgb::new(10, 0, 0), Rgb::new(0, 10, 0));
        let palette = Palette::default();
        let attrs = CellAttrs {
            fg: Color::Rgb(7, 7, 7),
            bg: Color::Default,
            flags: AttrFlags::INVERSE,
        };
        let (fg, bg) = resolve_colors(&term, &attrs, &palette, false);
        assert_eq!(fg, Rgb::new(0, 10, 0));
        assert_eq!(bg, Rgb::new(7, 7, 7));
    }
}

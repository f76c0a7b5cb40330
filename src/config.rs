//! Configuration for drmux.
//!
//! All settings have compiled-in defaults so the binary runs with no config
//! file at all. An optional `~/.config/drmux/config.toml` can override the
//! font, the shell, and the colour palette:
//!
//! ```toml
//! font_size = 22
//! shell = "/bin/zsh"
//! font = "/usr/share/fonts/TTF/Hack-Regular.ttf"
//!
//! [colors]
//! default_bg = "#1D2021"
//! default_fg = "#EBDBB2"
//! ```
//!
//! A missing or malformed file silently falls back to the defaults.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

/// A 24-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pack into the XR24 scan-out format: one little-endian 32-bit word,
    /// `0x00RRGGBB`.
    pub fn pack(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | (self.b as u32)
    }
}

impl FromStr for Rgb {
    type Err = ();

    /// Parses `#RRGGBB`.
    fn from_str(s: &str) -> Result<Self, ()> {
        let hex = s.strip_prefix('#').ok_or(())?;
        if hex.len() != 6 {
            return Err(());
        }
        let n = u32::from_str_radix(hex, 16).map_err(|_| ())?;
        Ok(Self::new((n >> 16) as u8, (n >> 8) as u8, n as u8))
    }
}

/// Colour roles used by the compositor.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub default_bg: Rgb,
    pub default_fg: Rgb,
    pub cursor_bg: Rgb,
    pub cursor_fg: Rgb,
    pub tabbar_bg: Rgb,
    pub tabbar_fg: Rgb,
    pub tabbar_active: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            default_bg: Rgb::new(0x2E, 0x34, 0x40),
            default_fg: Rgb::new(0xD8, 0xDE, 0xE9),
            cursor_bg: Rgb::new(0xD8, 0xDE, 0xE9),
            cursor_fg: Rgb::new(0x2E, 0x34, 0x40),
            tabbar_bg: Rgb::new(0x3B, 0x42, 0x52),
            tabbar_fg: Rgb::new(0xD8, 0xDE, 0xE9),
            tabbar_active: Rgb::new(0x88, 0xC0, 0xD0),
        }
    }
}

/// Ordered fallback list searched when no font is configured.
pub const FONT_FALLBACKS: &[&str] = &[
    "/usr/share/fonts/TTF/JetBrainsMonoNerdFont-Regular.ttf",
    "/usr/share/fonts/truetype/jetbrains-mono/JetBrainsMono-Regular.ttf",
    "/usr/share/fonts/TTF/FiraCodeNerdFont-Regular.ttf",
    "/usr/share/fonts/truetype/firacode/FiraCode-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/LiberationMono-Regular.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
];

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Font pixel size.
    pub font_size: u32,
    /// Shell spawned in every pane.
    pub shell: String,
    /// Explicit font path, tried before the fallback list.
    pub font: Option<PathBuf>,
    pub palette: Palette,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            font_size: 20,
            shell: "/bin/bash".to_string(),
            font: None,
            palette: Palette::default(),
        }
    }
}

/// Raw on-disk representation; every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    font_size: Option<u32>,
    shell: Option<String>,
    font: Option<PathBuf>,
    colors: ColorOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ColorOverrides {
    default_bg: Option<String>,
    default_fg: Option<String>,
    cursor_bg: Option<String>,
    cursor_fg: Option<String>,
    tabbar_bg: Option<String>,
    tabbar_fg: Option<String>,
    tabbar_active: Option<String>,
}

impl Config {
    /// Load configuration, merging the optional config file over the
    /// compiled-in defaults.
    pub fn load() -> Self {
        let mut config = Self::default();
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(file) = toml::from_str::<ConfigFile>(&content) {
                    config.merge(file);
                }
            }
        }
        config
    }

    fn merge(&mut self, file: ConfigFile) {
        if let Some(size) = file.font_size {
            if size > 0 {
                self.font_size = size;
            }
        }
        if let Some(shell) = file.shell {
            self.shell = shell;
        }
        if file.font.is_some() {
            self.font = file.font;
        }
        let c = file.colors;
        merge_color(&mut self.palette.default_bg, c.default_bg);
        merge_color(&mut self.palette.default_fg, c.default_fg);
        merge_color(&mut self.palette.cursor_bg, c.cursor_bg);
        merge_color(&mut self.palette.cursor_fg, c.cursor_fg);
        merge_color(&mut self.palette.tabbar_bg, c.tabbar_bg);
        merge_color(&mut self.palette.tabbar_fg, c.tabbar_fg);
        merge_color(&mut self.palette.tabbar_active, c.tabbar_active);
    }

    fn config_path() -> Option<PathBuf> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("drmux").join("config.toml"))
    }
}

fn merge_color(slot: &mut Rgb, value: Option<String>) {
    if let Some(s) = value {
        if let Ok(rgb) = s.parse() {
            *slot = rgb;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_is_xr24() {
        assert_eq!(Rgb::new(0x2E, 0x34, 0x40).pack(), 0x002E3440);
        assert_eq!(Rgb::new(0xFF, 0x00, 0x00).pack(), 0x00FF0000);
    }

    #[test]
    fn parse_hex_color() {
        assert_eq!("#88C0D0".parse(), Ok(Rgb::new(0x88, 0xC0, 0xD0)));
        assert!("88C0D0".parse::<Rgb>().is_err());
        assert!("#88C0".parse::<Rgb>().is_err());
        assert!("#88C0ZZ".parse::<Rgb>().is_err());
    }

    #[test]
    fn defaults_match_builtin_palette() {
        let cfg = Config::default();
        assert_eq!(cfg.font_size, 20);
        assert_eq!(cfg.shell, "/bin/bash");
        assert_eq!(cfg.palette.default_bg.pack(), 0x002E3440);
        assert_eq!(cfg.palette.tabbar_active.pack(), 0x0088C0D0);
    }

    #[test]
    fn toml_overrides_merge() {
        let mut cfg = Config::default();
        let file: ConfigFile = toml::from_str(
            r##"
            font_size = 24
            shell = "/bin/sh"
            [colors]
            default_bg = "#101010"
            cursor_fg = "not-a-color"
            "##,
        )
        .unwrap();
        cfg.merge(file);
        assert_eq!(cfg.font_size, 24);
        assert_eq!(cfg.shell, "/bin/sh");
        assert_eq!(cfg.palette.default_bg, Rgb::new(0x10, 0x10, 0x10));
        // Bad colour strings leave the default in place.
        assert_eq!(cfg.palette.cursor_fg, Rgb::new(0x2E, 0x34, 0x40));
    }
}

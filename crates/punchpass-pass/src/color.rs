//! Card colour parsing and legible text colour selection.

use std::fmt;

/// Background used when a template colour is missing or malformed.
pub const DEFAULT_BACKGROUND: Rgb = Rgb::new(0x1F, 0x29, 0x37);

/// Text colour on light backgrounds.
pub const DARK_TEXT: Rgb = Rgb::new(0x11, 0x11, 0x11);

/// Text colour on dark backgrounds.
pub const LIGHT_TEXT: Rgb = Rgb::new(0xFF, 0xFF, 0xFF);

/// Luminance above this fraction counts as a light background.
const LIGHT_THRESHOLD_PER_MILLE: u32 = 600;

/// An opaque 8-bit RGB colour.
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

    /// Parse `#rgb`, `#rrggbb` or the same without the leading hash.
    pub fn parse_hex(raw: &str) -> Option<Self> {
        let hex = raw.trim().trim_start_matches('#');
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let digit = |i: usize| u8::from_str_radix(hex.get(i..=i)?, 16).ok();
        let pair = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            3 => Some(Self::new(digit(0)? * 17, digit(1)? * 17, digit(2)? * 17)),
            6 => Some(Self::new(pair(0)?, pair(2)?, pair(4)?)),
            _ => None,
        }
    }

    /// Relative luminance `0.299R + 0.587G + 0.114B` scaled to per-mille of
    /// full white, computed in integers so boundary colours are stable.
    pub fn luminance_per_mille(self) -> u32 {
        let weighted = 299 * u32::from(self.r) + 587 * u32::from(self.g) + 114 * u32::from(self.b);
        weighted / 255
    }

    /// Relative luminance in `[0, 1]`.
    pub fn luminance(self) -> f64 {
        f64::from(self.luminance_per_mille()) / 1000.0
    }

    pub fn is_light(self) -> bool {
        let weighted = 299 * u32::from(self.r) + 587 * u32::from(self.g) + 114 * u32::from(self.b);
        weighted > LIGHT_THRESHOLD_PER_MILLE * 255
    }

    /// Pick a text colour that stays legible on this background.
    pub fn contrasting_text(self) -> Self {
        if self.is_light() { DARK_TEXT } else { LIGHT_TEXT }
    }

    /// CSS-style `rgb(r, g, b)` string used by `pass.json`.
    pub fn css(self) -> String {
        format!("rgb({}, {}, {})", self.r, self.g, self.b)
    }

    pub const fn with_alpha(self, a: u8) -> [u8; 4] {
        [self.r, self.g, self.b, a]
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Background and foreground chosen for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: Rgb,
    pub foreground: Rgb,
}

impl Palette {
    /// Resolve a template colour, falling back to [`DEFAULT_BACKGROUND`].
    pub fn resolve(card_color: Option<&str>) -> Self {
        let background = card_color
            .and_then(Rgb::parse_hex)
            .unwrap_or(DEFAULT_BACKGROUND);
        Self {
            background,
            foreground: background.contrasting_text(),
        }
    }
}

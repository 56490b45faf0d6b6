//! Stamp-grid hero image.
//!
//! Lays out one mark per available stamp on a hero canvas: filled marks for
//! stamps earned, faded marks for the rest. Caller supplied stamp icons are
//! fit-scaled into each cell; otherwise circles are drawn.

use image::{Rgba, RgbaImage};

use crate::artwork::{Align, blend_onto, fill_circle, fit_within};
use crate::color::Palette;

/// Hero canvas used by wallet object patches.
pub const HERO_WIDTH: u32 = 1032;
pub const HERO_HEIGHT: u32 = 336;

/// Alpha applied to marks for stamps not yet earned.
const UNFILLED_ALPHA: u8 = 70;
/// Upper bound on columns so marks stay recognisable on narrow screens.
const MAX_COLUMNS: u32 = 10;

/// What to draw.
pub struct HeroSpec<'a> {
    pub width: u32,
    pub height: u32,
    pub palette: Palette,
    pub stamps: u32,
    pub max_stamps: u32,
    pub filled_icon: Option<&'a RgbaImage>,
    pub unfilled_icon: Option<&'a RgbaImage>,
}

/// Column/row counts for `total` marks.
pub fn grid_for(total: u32) -> (u32, u32) {
    let total = total.max(1);
    let cols = if total <= 5 {
        total
    } else {
        total.div_ceil(2).min(MAX_COLUMNS)
    };
    (cols, total.div_ceil(cols))
}

/// Render the stamp grid.
pub fn render_stamp_hero(hero: &HeroSpec<'_>) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(
        hero.width,
        hero.height,
        Rgba(hero.palette.background.with_alpha(255)),
    );
    let total = hero.max_stamps.max(1);
    let filled = hero.stamps.min(total);
    let (cols, rows) = grid_for(total);

    let cell = (hero.width / cols).min(hero.height / rows);
    if cell == 0 {
        return canvas;
    }
    let mark = cell * 7 / 10;
    let grid_w = cell * cols;
    let grid_h = cell * rows;
    let origin_x = (hero.width - grid_w) / 2;
    let origin_y = (hero.height - grid_h) / 2;

    for i in 0..total {
        let col = i % cols;
        let row = i / cols;
        let cx = origin_x + col * cell + cell / 2;
        let cy = origin_y + row * cell + cell / 2;
        let earned = i < filled;

        let icon = if earned { hero.filled_icon } else { hero.unfilled_icon };
        let stamp = icon.map_or_else(
            || circle_mark(mark, hero.palette, earned),
            |src| fit_within(src, mark, mark, Align::Center),
        );
        blend_onto(&mut canvas, &stamp, cx - mark / 2, cy - mark / 2);
    }
    canvas
}

fn circle_mark(size: u32, palette: Palette, earned: bool) -> RgbaImage {
    let mut img = RgbaImage::new(size, size);
    let alpha = if earned { 255 } else { UNFILLED_ALPHA };
    let half = f64::from(size) / 2.0;
    fill_circle(
        &mut img,
        half,
        half,
        half,
        Rgba(palette.foreground.with_alpha(alpha)),
    );
    img
}

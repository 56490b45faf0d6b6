//! Raster helpers for pass artwork.
//!
//! Everything here works on straight-alpha RGBA8 buffers. Scaling is
//! nearest-neighbour, compositing is Porter-Duff source-over with results
//! rounded to the nearest channel value.

use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};

use crate::color::Palette;
use crate::error::PassError;

/// Where a fitted image sits inside its canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Center,
    /// Pinned to the top-left corner. Used for logos, whose row is shared
    /// with other pass chrome.
    TopLeft,
}

/// Nearest-neighbour resize to exactly `width` x `height`.
pub fn resize_nearest(src: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (sw, sh) = src.dimensions();
    if sw == 0 || sh == 0 || width == 0 || height == 0 {
        return RgbaImage::new(width, height);
    }
    RgbaImage::from_fn(width, height, |x, y| {
        let sx = scale_coord(x, sw, width);
        let sy = scale_coord(y, sh, height);
        *src.get_pixel(sx, sy)
    })
}

/// Map a destination coordinate back into the source axis.
fn scale_coord(d: u32, src_len: u32, dst_len: u32) -> u32 {
    let s = u64::from(d) * u64::from(src_len) / u64::from(dst_len);
    u32::try_from(s).unwrap_or(src_len - 1).min(src_len - 1)
}

/// Resize preserving aspect ratio so the image fits inside the box, then
/// place it on a transparent canvas of exactly `width` x `height`.
pub fn fit_within(src: &RgbaImage, width: u32, height: u32, align: Align) -> RgbaImage {
    let mut canvas = RgbaImage::new(width, height);
    let (sw, sh) = src.dimensions();
    if sw == 0 || sh == 0 || width == 0 || height == 0 {
        return canvas;
    }

    let scale = (f64::from(width) / f64::from(sw)).min(f64::from(height) / f64::from(sh));
    let nw = scaled_len(sw, scale, width);
    let nh = scaled_len(sh, scale, height);
    let scaled = resize_nearest(src, nw, nh);

    let (ox, oy) = match align {
        Align::Center => ((width - nw) / 2, (height - nh) / 2),
        Align::TopLeft => (0, 0),
    };
    blend_onto(&mut canvas, &scaled, ox, oy);
    canvas
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn scaled_len(len: u32, scale: f64, max: u32) -> u32 {
    let v = (f64::from(len) * scale).round();
    (v.max(1.0) as u32).min(max)
}

/// Composite one straight-alpha pixel over another (source-over).
pub fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = f64::from(src[3]) / 255.0;
    let da = f64::from(dst[3]) / 255.0;
    let oa = sa + da * (1.0 - sa);
    if oa <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let mix = |s: u8, d: u8| {
        let v = (f64::from(s) * sa + f64::from(d) * da * (1.0 - sa)) / oa;
        to_channel(v)
    };
    Rgba([
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        to_channel(oa * 255.0),
    ])
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_channel(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Paint `src` over `dst` with its top-left corner at (`x`, `y`), clipping
/// anything that falls outside `dst`.
pub fn blend_onto(dst: &mut RgbaImage, src: &RgbaImage, x: u32, y: u32) {
    let (dw, dh) = dst.dimensions();
    for (sx, sy, px) in src.enumerate_pixels() {
        let (Some(tx), Some(ty)) = (x.checked_add(sx), y.checked_add(sy)) else {
            continue;
        };
        if tx >= dw || ty >= dh {
            continue;
        }
        let below = *dst.get_pixel(tx, ty);
        dst.put_pixel(tx, ty, blend_pixel(below, *px));
    }
}

/// Fill a circle of radius `r` centred on (`cx`, `cy`).
pub fn fill_circle(img: &mut RgbaImage, cx: f64, cy: f64, r: f64, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    let r2 = r * r;
    for y in 0..h {
        for x in 0..w {
            let dx = f64::from(x) + 0.5 - cx;
            let dy = f64::from(y) + 0.5 - cy;
            if dx * dx + dy * dy <= r2 {
                let below = *img.get_pixel(x, y);
                img.put_pixel(x, y, blend_pixel(below, color));
            }
        }
    }
}

/// Flat background with a centred circular mark in the foreground colour.
///
/// Used whenever a source image is missing or unusable so a bundle can
/// always be built.
pub fn fallback_art(width: u32, height: u32, palette: Palette) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(width, height, Rgba(palette.background.with_alpha(255)));
    let radius = f64::from(width.min(height)) * 0.3;
    fill_circle(
        &mut img,
        f64::from(width) / 2.0,
        f64::from(height) / 2.0,
        radius,
        Rgba(palette.foreground.with_alpha(255)),
    );
    img
}

/// Decode PNG/JPEG bytes into RGBA8.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage, PassError> {
    let img = image::load_from_memory(bytes).map_err(|e| PassError::Image(e.to_string()))?;
    Ok(img.to_rgba8())
}

/// Encode RGBA8 as PNG.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, PassError> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| PassError::Image(e.to_string()))?;
    Ok(out.into_inner())
}

//! Tile planning and extraction: cover an oversized image with
//! fixed-size, overlapping sub-rectangles.
//!
//! The detection model consumes square tiles of side `tile_size`.
//! Adjacent tiles overlap by `overlap` pixels so a defect straddling a
//! tile boundary is fully contained in at least one tile; the merger
//! later removes the resulting duplicates. Edge tiles whose source
//! region is smaller than the tile are zero-padded at the bottom/right.

use image::RgbImage;

/// Default tile side in pixels, matching the detection model input.
pub const DEFAULT_TILE_SIZE: u32 = 960;

/// Default overlap between adjacent tiles in pixels.
pub const DEFAULT_OVERLAP: u32 = 64;

/// The un-padded source region of one tile, in image coordinates.
///
/// `width`/`height` are the clipped extent actually read from the
/// image; both equal the tile size except at the bottom/right edges of
/// an image smaller than the tile along that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    /// Left edge of the source region.
    pub x: u32,
    /// Top edge of the source region.
    pub y: u32,
    /// Clipped source width.
    pub width: u32,
    /// Clipped source height.
    pub height: u32,
}

/// One extracted tile: its source region plus a square pixel buffer.
#[derive(Debug, Clone)]
pub struct Tile {
    /// Where the tile came from in the image.
    pub rect: TileRect,
    /// Exactly `tile_size` x `tile_size` pixels; zero-padded where the
    /// source region is smaller.
    pub pixels: RgbImage,
}

/// Compute the covering tile plan for an image extent.
///
/// If both dimensions fit within `tile_size`, the plan is a single tile
/// at the origin. Otherwise origins advance by `max(1, tile_size -
/// overlap)` along each axis, plus a final origin anchored at
/// `dimension - tile_size` whenever the stride does not land there
/// exactly, so the plan covers every pixel even when the stride does
/// not divide the remaining distance. The corner anchor arises from the
/// product of the two per-axis origin sets. No origin appears twice.
///
/// A zero `tile_size` or a zero image dimension yields an empty plan.
#[must_use]
pub fn plan(width: u32, height: u32, tile_size: u32, overlap: u32) -> Vec<TileRect> {
    if tile_size == 0 || width == 0 || height == 0 {
        return Vec::new();
    }
    if width <= tile_size && height <= tile_size {
        return vec![TileRect {
            x: 0,
            y: 0,
            width,
            height,
        }];
    }

    let step = tile_size.saturating_sub(overlap).max(1);
    let xs = axis_origins(width, tile_size, step);
    let ys = axis_origins(height, tile_size, step);

    let mut rects = Vec::with_capacity(xs.len() * ys.len());
    for &y in &ys {
        for &x in &xs {
            rects.push(TileRect {
                x,
                y,
                width: tile_size.min(width - x),
                height: tile_size.min(height - y),
            });
        }
    }
    rects
}

/// Tile origins along one axis: the regular stride, plus the far-edge
/// anchor when the stride does not already end there.
fn axis_origins(dim: u32, tile_size: u32, step: u32) -> Vec<u32> {
    if dim <= tile_size {
        return vec![0];
    }
    let last = dim - tile_size;
    let mut origins: Vec<u32> = (0..=last).step_by(step as usize).collect();
    if last % step != 0 {
        origins.push(last);
    }
    origins
}

/// Plan and extract all tiles of an image.
///
/// Each tile's pixel buffer is exactly `tile_size` square; source
/// regions smaller than that (bottom/right edges of a small image) are
/// copied into the top-left of a zero-filled buffer.
#[must_use]
pub fn extract(image: &RgbImage, tile_size: u32, overlap: u32) -> Vec<Tile> {
    let (width, height) = image.dimensions();
    plan(width, height, tile_size, overlap)
        .into_iter()
        .map(|rect| Tile {
            rect,
            pixels: copy_region(image, rect, tile_size),
        })
        .collect()
}

/// Copy `rect` out of `image` into the top-left of a zero-filled
/// `tile_size` square buffer.
fn copy_region(image: &RgbImage, rect: TileRect, tile_size: u32) -> RgbImage {
    let mut canvas = RgbImage::new(tile_size, tile_size);
    for dy in 0..rect.height {
        for dx in 0..rect.width {
            canvas.put_pixel(dx, dy, *image.get_pixel(rect.x + dx, rect.y + dy));
        }
    }
    canvas
}

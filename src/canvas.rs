use std::fmt;
use std::sync::Arc;

use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// TILED IMAGE – sparse 64×64 chunk storage (Vec-indexed for speed)
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;
const CHUNK_BYTES: usize = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;

/// Hard cap on a single buffer, larger requests are clamped to 1×1.
const MAX_PIXELS: u64 = 256_000_000;

/// A pixel with zero alpha, returned by reference for missing chunks.
static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Sparse tiled RGBA8 image backed by a flat `Vec<Option<Arc<RgbaImage>>>`.
///
/// Chunks are wrapped in `Arc` for copy-on-write semantics: `clone()` only
/// bumps reference counts, and mutations go through `Arc::make_mut` so only
/// the touched chunk is copied. A clone is therefore a value-independent copy
/// of the pixels, which is what layer duplication and history snapshots rely on.
#[derive(Clone)]
pub struct TiledImage {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl fmt::Debug for TiledImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiledImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("chunks", &self.chunk_count())
            .finish()
    }
}

impl TiledImage {
    // ---- construction -------------------------------------------------------

    /// Create an empty (fully transparent) tiled image.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = {
            let total = (width as u64) * (height as u64);
            if total > MAX_PIXELS || width == 0 || height == 0 {
                warn!(width, height, "TiledImage::new: invalid dimensions, clamped to 1x1");
                (1, 1)
            } else {
                (width, height)
            }
        };
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; (chunks_per_row * chunks_per_col) as usize],
        }
    }

    /// Fill the entire image with `color`. A transparent fill costs nothing.
    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut img = Self::new(width, height);
        if color[3] > 0 {
            img.fill(color);
        }
        img
    }

    /// Import from a flat `RgbaImage`. Only non-transparent chunks are stored.
    /// Chunk conversion is parallelised with rayon.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let width = src.width();
        let height = src.height();
        let mut img = Self::new(width, height);
        if img.width != width || img.height != height {
            return img;
        }

        let chunks_x = img.chunks_per_row as usize;
        let total_chunks = img.chunks.len();
        let src_raw = src.as_raw();

        let chunk_results: Vec<(usize, Option<Arc<RgbaImage>>)> = (0..total_chunks)
            .into_par_iter()
            .map(|flat| {
                let base_x = (flat % chunks_x) as u32 * CHUNK_SIZE;
                let base_y = (flat / chunks_x) as u32 * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(width - base_x);
                let ch = CHUNK_SIZE.min(height - base_y);
                let chunk_stride = CHUNK_SIZE as usize * 4;
                let mut chunk_data = vec![0u8; chunk_stride * CHUNK_SIZE as usize];
                let mut has_content = false;

                for ly in 0..ch {
                    let src_start = ((base_y + ly) * width + base_x) as usize * 4;
                    let dst_start = ly as usize * chunk_stride;
                    let byte_len = cw as usize * 4;
                    let row = &src_raw[src_start..src_start + byte_len];
                    chunk_data[dst_start..dst_start + byte_len].copy_from_slice(row);
                    if !has_content {
                        has_content = row.chunks_exact(4).any(|p| p[3] != 0);
                    }
                }

                if has_content {
                    let chunk = RgbaImage::from_raw(CHUNK_SIZE, CHUNK_SIZE, chunk_data)
                        .map(Arc::new);
                    (flat, chunk)
                } else {
                    (flat, None)
                }
            })
            .collect();

        for (idx, chunk) in chunk_results {
            img.chunks[idx] = chunk;
        }
        img
    }

    /// Flatten into a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let out_stride = self.width as usize * 4;
        let chunk_stride = CHUNK_SIZE as usize * 4;
        let raw: &mut [u8] = &mut out;
        for (cx, cy) in self.chunk_keys().collect::<Vec<_>>() {
            let Some(chunk) = self.get_chunk(cx, cy) else { continue };
            let base_x = cx * CHUNK_SIZE;
            let base_y = cy * CHUNK_SIZE;
            let cw = CHUNK_SIZE.min(self.width - base_x) as usize;
            let ch = CHUNK_SIZE.min(self.height - base_y);
            let chunk_raw = chunk.as_raw();
            for ly in 0..ch {
                let dst = (base_y + ly) as usize * out_stride + base_x as usize * 4;
                let src = ly as usize * chunk_stride;
                raw[dst..dst + cw * 4].copy_from_slice(&chunk_raw[src..src + cw * 4]);
            }
        }
        out
    }

    // ---- coordinate helpers -------------------------------------------------

    #[inline]
    fn flat_index(&self, cx: u32, cy: u32) -> usize {
        (cy * self.chunks_per_row + cx) as usize
    }

    #[inline]
    fn chunk_coord(x: u32, y: u32) -> (u32, u32) {
        (x / CHUNK_SIZE, y / CHUNK_SIZE)
    }

    #[inline]
    fn local(x: u32, y: u32) -> (u32, u32) {
        (x % CHUNK_SIZE, y % CHUNK_SIZE)
    }

    #[inline]
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel. Out-of-bounds reads and missing chunks are transparent.
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height {
            return &TRANSPARENT_PIXEL;
        }
        let (cx, cy) = Self::chunk_coord(x, y);
        match &self.chunks[self.flat_index(cx, cy)] {
            Some(chunk) => {
                let (lx, ly) = Self::local(x, y);
                chunk.get_pixel(lx, ly)
            }
            None => &TRANSPARENT_PIXEL,
        }
    }

    /// Write a pixel. Out-of-bounds writes are ignored; writing transparent
    /// into a missing chunk does not allocate it.
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let (cx, cy) = Self::chunk_coord(x, y);
        if pixel[3] == 0 && self.chunks[self.flat_index(cx, cy)].is_none() {
            return;
        }
        let (lx, ly) = Self::local(x, y);
        self.ensure_chunk_mut(cx, cy).put_pixel(lx, ly, pixel);
    }

    /// Mutable access to a pixel, allocating its chunk if needed.
    pub fn get_pixel_mut(&mut self, x: u32, y: u32) -> Option<&mut Rgba<u8>> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        Some(self.ensure_chunk_mut(cx, cy).get_pixel_mut(lx, ly))
    }

    pub fn get_chunk(&self, cx: u32, cy: u32) -> Option<&RgbaImage> {
        if cx >= self.chunks_per_row {
            return None;
        }
        self.chunks
            .get(self.flat_index(cx, cy))
            .and_then(|c| c.as_deref())
    }

    /// Get or create a chunk. COW-safe: a shared chunk is cloned first.
    pub fn ensure_chunk_mut(&mut self, cx: u32, cy: u32) -> &mut RgbaImage {
        let idx = self.flat_index(cx, cy);
        let slot = self.chunks[idx]
            .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(slot)
    }

    /// Iterate over populated chunk coordinates.
    pub fn chunk_keys(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let per_row = self.chunks_per_row;
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .map(move |(i, _)| (i as u32 % per_row, i as u32 / per_row))
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    // ---- bulk operations ----------------------------------------------------

    /// Fill every pixel with `color`. All chunks share one allocation until written.
    pub fn fill(&mut self, color: Rgba<u8>) {
        if color[3] == 0 {
            self.clear();
            return;
        }
        let shared = Arc::new(RgbaImage::from_pixel(CHUNK_SIZE, CHUNK_SIZE, color));
        for chunk in &mut self.chunks {
            *chunk = Some(Arc::clone(&shared));
        }
    }

    pub fn clear(&mut self) {
        for chunk in &mut self.chunks {
            *chunk = None;
        }
    }

    /// Clear the half-open region `[min_x, max_x) × [min_y, max_y)` to transparent.
    pub fn clear_region(&mut self, min_x: u32, min_y: u32, max_x: u32, max_y: u32) {
        let max_x = max_x.min(self.width);
        let max_y = max_y.min(self.height);
        for y in min_y..max_y {
            for x in min_x..max_x {
                let (cx, cy) = Self::chunk_coord(x, y);
                if self.chunks[self.flat_index(cx, cy)].is_some() {
                    let (lx, ly) = Self::local(x, y);
                    self.ensure_chunk_mut(cx, cy).put_pixel(lx, ly, TRANSPARENT_PIXEL);
                }
            }
        }
    }

    /// Copy the `width × height` window starting at `(x, y)` into a new image.
    /// The window may extend past the edges; those pixels come out transparent.
    pub fn crop(&self, x: i64, y: i64, width: u32, height: u32) -> TiledImage {
        let mut out = TiledImage::new(width, height);
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + out.width as i64).min(self.width as i64);
        let y1 = (y + out.height as i64).min(self.height as i64);
        for sy in y0..y1 {
            for sx in x0..x1 {
                let px = *self.get_pixel(sx as u32, sy as u32);
                if px[3] > 0 {
                    out.put_pixel((sx - x) as u32, (sy - y) as u32, px);
                }
            }
        }
        out
    }

    /// Resample to a new size (bilinear).
    pub fn resized(&self, width: u32, height: u32) -> TiledImage {
        if width == self.width && height == self.height {
            return self.clone();
        }
        if width == 0 || height == 0 {
            return TiledImage::new(width, height);
        }
        let flat = self.to_rgba_image();
        let out = imageops::resize(&flat, width, height, imageops::FilterType::Triangle);
        TiledImage::from_rgba_image(&out)
    }

    /// Rotate clockwise by `quarter_turns × 90°`; odd turns swap width and height.
    pub fn rotated_quarter(&self, quarter_turns: u32) -> TiledImage {
        match quarter_turns % 4 {
            0 => self.clone(),
            turns => {
                let flat = self.to_rgba_image();
                let out = match turns {
                    1 => imageops::rotate90(&flat),
                    2 => imageops::rotate180(&flat),
                    _ => imageops::rotate270(&flat),
                };
                TiledImage::from_rgba_image(&out)
            }
        }
    }

    /// Overwrite pixels with `src` placed at `(dst_x, dst_y)`; clipped to bounds.
    pub fn blit_rgba_at(&mut self, dst_x: i64, dst_y: i64, src: &RgbaImage) {
        for (sx, sy, px) in src.enumerate_pixels() {
            let tx = dst_x + sx as i64;
            let ty = dst_y + sy as i64;
            if self.in_bounds(tx, ty) {
                self.put_pixel(tx as u32, ty as u32, *px);
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Approximate memory held by populated chunks (shared chunks counted once per image).
    pub fn memory_bytes(&self) -> usize {
        self.chunk_count() * CHUNK_BYTES
    }

    /// Bytes held by chunks that `base` does not share with this image.
    /// With no base, or a base of another size, every chunk counts.
    pub fn unshared_bytes(&self, base: Option<&TiledImage>) -> usize {
        let Some(base) = base.filter(|b| b.width == self.width && b.height == self.height) else {
            return self.memory_bytes();
        };
        self.chunks
            .iter()
            .zip(&base.chunks)
            .filter(|(ours, theirs)| match (ours, theirs) {
                (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
                (Some(_), None) => true,
                (None, _) => false,
            })
            .count()
            * CHUNK_BYTES
    }

    /// Pixel-for-pixel equality, ignoring chunk layout.
    pub fn same_pixels(&self, other: &TiledImage) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.to_rgba_image().as_raw() == other.to_rgba_image().as_raw()
    }
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Additive,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
            BlendMode::Additive,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::Additive => "Additive",
        }
    }

    fn mix_channel(self, base: f32, top: f32) -> f32 {
        match self {
            BlendMode::Normal => top,
            BlendMode::Multiply => base * top,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
            BlendMode::Overlay => hard_light(top, base),
            BlendMode::Darken => base.min(top),
            BlendMode::Lighten => base.max(top),
            BlendMode::ColorDodge => {
                if top >= 1.0 {
                    1.0
                } else {
                    (base / (1.0 - top)).min(1.0)
                }
            }
            BlendMode::ColorBurn => {
                if top <= 0.0 {
                    0.0
                } else {
                    (1.0 - (1.0 - base) / top).max(0.0)
                }
            }
            BlendMode::HardLight => hard_light(base, top),
            BlendMode::SoftLight => {
                if top <= 0.5 {
                    base - (1.0 - 2.0 * top) * base * (1.0 - base)
                } else {
                    let d = if base <= 0.25 {
                        ((16.0 * base - 12.0) * base + 4.0) * base
                    } else {
                        base.sqrt()
                    };
                    base + (2.0 * top - 1.0) * (d - base)
                }
            }
            BlendMode::Difference => (base - top).abs(),
            BlendMode::Exclusion => base + top - 2.0 * base * top,
            BlendMode::Additive => (base + top).min(1.0),
        }
    }
}

fn hard_light(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

/// Composite `top` over `base` (straight alpha) with a blend mode and an
/// extra opacity multiplier in `[0, 1]`.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let base_a = base[3] as f32 / 255.0;
    let top_a = top[3] as f32 / 255.0 * opacity;

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let b = base[c] as f32 / 255.0;
        let t = top[c] as f32 / 255.0;
        // Blend only where the backdrop exists; elsewhere the source colour shows.
        let mixed = mode.mix_channel(b, t) * base_a + t * (1.0 - base_a);
        let v = (mixed * top_a + b * base_a * (1.0 - top_a)) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_chunks_read_transparent() {
        let img = TiledImage::new(100, 100);
        assert_eq!(*img.get_pixel(10, 10), Rgba([0, 0, 0, 0]));
        assert_eq!(*img.get_pixel(500, 500), Rgba([0, 0, 0, 0]));
        assert_eq!(img.chunk_count(), 0);
    }

    #[test]
    fn unshared_bytes_counts_only_copied_chunks() {
        let base = TiledImage::new_filled(200, 130, Rgba([9, 9, 9, 255]));
        let mut edited = base.clone();
        assert_eq!(edited.unshared_bytes(Some(&base)), 0);

        edited.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
        edited.put_pixel(150, 100, Rgba([0, 0, 0, 255]));
        assert_eq!(edited.unshared_bytes(Some(&base)), 2 * CHUNK_BYTES);
        assert_eq!(edited.unshared_bytes(None), edited.memory_bytes());
    }

    #[test]
    fn zero_size_is_clamped() {
        let img = TiledImage::new(0, 10);
        assert_eq!((img.width(), img.height()), (1, 1));
    }

    #[test]
    fn clone_is_copy_on_write() {
        let mut a = TiledImage::new_filled(70, 70, Rgba([1, 2, 3, 255]));
        let b = a.clone();
        a.put_pixel(5, 5, Rgba([9, 9, 9, 255]));
        assert_eq!(*b.get_pixel(5, 5), Rgba([1, 2, 3, 255]));
        assert_eq!(*a.get_pixel(5, 5), Rgba([9, 9, 9, 255]));
        assert_eq!(*a.get_pixel(69, 69), Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn flat_round_trip_keeps_pixels() {
        let mut a = TiledImage::new(130, 65);
        a.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        a.put_pixel(129, 64, Rgba([0, 255, 0, 128]));
        let b = TiledImage::from_rgba_image(&a.to_rgba_image());
        assert!(a.same_pixels(&b));
        assert_eq!(b.chunk_count(), 2);
    }

    #[test]
    fn crop_handles_offsets_outside() {
        let a = TiledImage::new_filled(10, 10, Rgba([7, 7, 7, 255]));
        let c = a.crop(-5, -5, 10, 10);
        assert_eq!(c.get_pixel(0, 0)[3], 0);
        assert_eq!(*c.get_pixel(5, 5), Rgba([7, 7, 7, 255]));
        assert_eq!(*c.get_pixel(9, 9), Rgba([7, 7, 7, 255]));
    }

    #[test]
    fn quarter_rotation_swaps_dimensions() {
        let mut a = TiledImage::new(4, 2);
        a.put_pixel(0, 0, Rgba([1, 1, 1, 255]));
        let r = a.rotated_quarter(1);
        assert_eq!((r.width(), r.height()), (2, 4));
        // Top-left moves to top-right under a clockwise turn.
        assert_eq!(r.get_pixel(1, 0)[3], 255);
        assert!(a.same_pixels(&r.rotated_quarter(3)));
    }

    #[test]
    fn clear_region_is_half_open() {
        let mut a = TiledImage::new_filled(8, 8, Rgba([5, 5, 5, 255]));
        a.clear_region(2, 2, 4, 4);
        assert_eq!(a.get_pixel(2, 2)[3], 0);
        assert_eq!(a.get_pixel(3, 3)[3], 0);
        assert_eq!(a.get_pixel(4, 4)[3], 255);
    }

    #[test]
    fn normal_blend_over_opaque() {
        let base = Rgba([0, 0, 0, 255]);
        let top = Rgba([255, 255, 255, 255]);
        assert_eq!(blend_pixel(base, top, BlendMode::Normal, 1.0), top);
        let half = blend_pixel(base, top, BlendMode::Normal, 0.5);
        assert_eq!(half[3], 255);
        assert!((127..=128).contains(&half[0]));
    }

    #[test]
    fn multiply_darkens() {
        let base = Rgba([200, 200, 200, 255]);
        let top = Rgba([128, 128, 128, 255]);
        let out = blend_pixel(base, top, BlendMode::Multiply, 1.0);
        assert!(out[0] < 200);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn blend_over_transparent_keeps_source_colour() {
        let out = blend_pixel(Rgba([0, 0, 0, 0]), Rgba([10, 20, 30, 100]), BlendMode::Multiply, 1.0);
        assert_eq!(out, Rgba([10, 20, 30, 100]));
    }

    #[test]
    fn blend_mode_serde_names() {
        let json = serde_json::to_string(&BlendMode::ColorDodge).unwrap();
        assert_eq!(json, "\"color-dodge\"");
    }
}

use image::{Rgba, RgbaImage, imageops};
use kurbo::{Affine, Point, Rect};
use rayon::prelude::*;

use crate::canvas::{BlendMode, TiledImage, blend_pixel};
use crate::layer::{Layer, LayerId};
use crate::layers::LayerStack;
use crate::mask::AlphaMask;

// ============================================================================
// SCRATCH BUFFER – reused temp storage for masked compositing
// ============================================================================

/// Lazily sized RGBA8 scratch area owned by a [`Compositor`].
///
/// The backing allocation only ever grows; `prepare` hands out a zeroed
/// `width × height` window of it.
#[derive(Debug, Default)]
pub struct ScratchBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl ScratchBuffer {
    pub fn prepare(&mut self, width: u32, height: u32) -> &mut [u8] {
        let len = width as usize * height as usize * 4;
        self.data.clear();
        self.data.resize(len, 0);
        self.width = width;
        self.height = height;
        &mut self.data
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn capacity_bytes(&self) -> usize {
        self.data.capacity()
    }
}

/// Live transform preview: these layers are drawn through `affine`
/// (canvas space → canvas space) on top of their own placement.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformPreview {
    pub layers: Vec<LayerId>,
    pub affine: Affine,
}

// ============================================================================
// COMPOSITOR
// ============================================================================

#[derive(Debug, Default)]
pub struct Compositor {
    scratch: ScratchBuffer,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scratch(&self) -> &ScratchBuffer {
        &self.scratch
    }

    /// Draw a layer buffer at integer offset `(x, y)` of `dest`.
    ///
    /// Without a mask the buffer is blended straight in. With a mask the
    /// pixels are copied into the scratch buffer, multiplied by the mask
    /// (destination-in), and the scratch is blended. `pixels` is never written.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_layer_with_optional_alpha_mask(
        &mut self,
        dest: &mut RgbaImage,
        pixels: &TiledImage,
        mask: Option<&AlphaMask>,
        x: i64,
        y: i64,
        opacity: f32,
        blend: BlendMode,
    ) {
        let Some(clip) = clip_rect(dest, pixels, x, y) else { return };
        let (x0, y0, x1, y1) = clip;
        let dest_w = dest.width() as usize;
        let span = (x1 - x0) as usize;

        match mask {
            None => {
                let raw: &mut [u8] = dest;
                raw.par_chunks_mut(dest_w * 4)
                    .enumerate()
                    .skip(y0 as usize)
                    .take((y1 - y0) as usize)
                    .for_each(|(dy, row)| {
                        let sy = (dy as i64 - y) as u32;
                        for dx in x0..x1 {
                            let top = *pixels.get_pixel((dx - x) as u32, sy);
                            blend_into(row, dx as usize, top, blend, opacity);
                        }
                    });
            }
            Some(mask) => {
                let rows = (y1 - y0) as usize;
                let scratch = self.scratch.prepare(span as u32, rows as u32);
                scratch
                    .par_chunks_mut(span * 4)
                    .enumerate()
                    .for_each(|(ry, row)| {
                        let sy = (y0 + ry as i64 - y) as u32;
                        for rx in 0..span {
                            let sx = (x0 + rx as i64 - x) as u32;
                            let mut p = *pixels.get_pixel(sx, sy);
                            p[3] = mul_u8(p[3], mask.get(sx, sy));
                            row[rx * 4..rx * 4 + 4].copy_from_slice(&p.0);
                        }
                    });

                let scratch: &[u8] = scratch;
                let raw: &mut [u8] = dest;
                raw.par_chunks_mut(dest_w * 4)
                    .enumerate()
                    .skip(y0 as usize)
                    .take(rows)
                    .for_each(|(dy, row)| {
                        let ry = dy - y0 as usize;
                        let src_row = &scratch[ry * span * 4..(ry + 1) * span * 4];
                        for rx in 0..span {
                            let i = rx * 4;
                            let top = Rgba([src_row[i], src_row[i + 1], src_row[i + 2], src_row[i + 3]]);
                            blend_into(row, x0 as usize + rx, top, blend, opacity);
                        }
                    });
            }
        }
    }

    /// Layer pixels with the mask applied, as a flat image.
    pub fn effective_pixels(pixels: &TiledImage, mask: Option<&AlphaMask>) -> RgbaImage {
        let mut out = pixels.to_rgba_image();
        if let Some(mask) = mask {
            let w = out.width() as usize;
            let raw: &mut [u8] = &mut out;
            raw.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    px[3] = mul_u8(px[3], mask.get(x as u32, y as u32));
                }
            });
        }
        out
    }

    /// Draw `layer` into `dest`, where `dest`'s top-left sits at `dest_origin`
    /// in canvas space. `extra` is applied after the layer's own placement.
    pub fn draw_layer(
        &mut self,
        dest: &mut RgbaImage,
        dest_origin: Point,
        layer: &Layer,
        mask: Option<&AlphaMask>,
        extra: Option<Affine>,
    ) {
        if !layer.visible || layer.opacity == 0 {
            return;
        }
        let opacity = layer.opacity_f32();

        if extra.is_none() && layer.is_axis_aligned_unscaled() && dest_origin.x.fract() == 0.0 && dest_origin.y.fract() == 0.0 {
            let x = (layer.position.x - dest_origin.x) as i64;
            let y = (layer.position.y - dest_origin.y) as i64;
            self.draw_layer_with_optional_alpha_mask(dest, &layer.pixels, mask, x, y, opacity, layer.blend_mode);
            return;
        }

        let to_dest = Affine::translate(-dest_origin.to_vec2())
            * extra.unwrap_or(Affine::IDENTITY)
            * layer.canvas_affine();
        if to_dest.determinant().abs() < 1e-12 {
            return;
        }
        let src = Self::effective_pixels(&layer.pixels, mask);
        draw_affine(dest, &src, to_dest, opacity, layer.blend_mode);
    }

    /// Composite every visible layer of `stack` (bottom first) onto a
    /// transparent `width × height` canvas.
    pub fn render(&mut self, stack: &LayerStack, width: u32, height: u32) -> RgbaImage {
        self.render_region(stack, Point::ZERO, width, height, None)
    }

    /// Like [`render`](Self::render), drawing the preview's layers through its live affine.
    pub fn render_with_preview(
        &mut self,
        stack: &LayerStack,
        width: u32,
        height: u32,
        preview: &TransformPreview,
    ) -> RgbaImage {
        self.render_region(stack, Point::ZERO, width, height, Some(preview))
    }

    /// Composite into a buffer whose top-left is `origin` in canvas space.
    pub fn render_region(
        &mut self,
        stack: &LayerStack,
        origin: Point,
        width: u32,
        height: u32,
        preview: Option<&TransformPreview>,
    ) -> RgbaImage {
        let mut dest = RgbaImage::new(width.max(1), height.max(1));
        for layer in stack.layers() {
            let extra = preview
                .filter(|p| p.layers.contains(&layer.id))
                .map(|p| p.affine);
            self.draw_layer(&mut dest, origin, layer, stack.masks().get_mask(layer.id), extra);
        }
        dest
    }

    /// Downsampled effective pixels, longest edge at most `max_edge`.
    pub fn thumbnail(layer: &Layer, mask: Option<&AlphaMask>, max_edge: u32) -> RgbaImage {
        let full = Self::effective_pixels(&layer.pixels, mask);
        let (w, h) = full.dimensions();
        let max_edge = max_edge.max(1);
        if w <= max_edge && h <= max_edge {
            return full;
        }
        let ratio = max_edge as f64 / w.max(h) as f64;
        let tw = ((w as f64 * ratio).round() as u32).max(1);
        let th = ((h as f64 * ratio).round() as u32).max(1);
        imageops::thumbnail(&full, tw, th)
    }
}

// ---- helpers ----------------------------------------------------------------

/// Destination rows/cols `[x0, x1) × [y0, y1)` covered by a buffer at `(x, y)`.
fn clip_rect(dest: &RgbaImage, pixels: &TiledImage, x: i64, y: i64) -> Option<(i64, i64, i64, i64)> {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + pixels.width() as i64).min(dest.width() as i64);
    let y1 = (y + pixels.height() as i64).min(dest.height() as i64);
    (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
}

#[inline]
fn mul_u8(a: u8, b: u8) -> u8 {
    ((a as u16 * b as u16 + 127) / 255) as u8
}

#[inline]
fn blend_into(row: &mut [u8], x: usize, top: Rgba<u8>, mode: BlendMode, opacity: f32) {
    if top[3] == 0 {
        return;
    }
    let i = x * 4;
    let base = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
    let out = blend_pixel(base, top, mode, opacity);
    row[i..i + 4].copy_from_slice(&out.0);
}

/// Inverse-map every covered destination pixel centre into `src` and blend a
/// bilinear sample. Rows run in parallel.
fn draw_affine(dest: &mut RgbaImage, src: &RgbaImage, to_dest: Affine, opacity: f32, mode: BlendMode) {
    let (sw, sh) = src.dimensions();
    let bounds = to_dest.transform_rect_bbox(Rect::new(0.0, 0.0, sw as f64, sh as f64));
    let dw = dest.width() as i64;
    let dh = dest.height() as i64;
    let x0 = (bounds.x0.floor() as i64).clamp(0, dw);
    let x1 = (bounds.x1.ceil() as i64).clamp(0, dw);
    let y0 = (bounds.y0.floor() as i64).clamp(0, dh);
    let y1 = (bounds.y1.ceil() as i64).clamp(0, dh);
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    let inv = to_dest.inverse();
    let raw: &mut [u8] = dest;
    raw.par_chunks_mut(dw as usize * 4)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(dy, row)| {
            for dx in x0..x1 {
                let local = inv * Point::new(dx as f64 + 0.5, dy as f64 + 0.5);
                if let Some(top) = sample_bilinear(src, local.x - 0.5, local.y - 0.5) {
                    blend_into(row, dx as usize, top, mode, opacity);
                }
            }
        });
}

/// Premultiplied bilinear sample; outside the image counts as transparent.
pub(crate) fn sample_bilinear(src: &RgbaImage, fx: f64, fy: f64) -> Option<Rgba<u8>> {
    let (w, h) = (src.width() as i64, src.height() as i64);
    let x0 = fx.floor() as i64;
    let y0 = fy.floor() as i64;
    if x0 < -1 || y0 < -1 || x0 >= w || y0 >= h {
        return None;
    }
    let tx = (fx - x0 as f64) as f32;
    let ty = (fy - y0 as f64) as f32;

    let fetch = |x: i64, y: i64| -> [f32; 4] {
        if x < 0 || y < 0 || x >= w || y >= h {
            return [0.0; 4];
        }
        let p = src.get_pixel(x as u32, y as u32);
        let a = p[3] as f32 / 255.0;
        [p[0] as f32 * a, p[1] as f32 * a, p[2] as f32 * a, p[3] as f32]
    };

    let tl = fetch(x0, y0);
    let tr = fetch(x0 + 1, y0);
    let bl = fetch(x0, y0 + 1);
    let br = fetch(x0 + 1, y0 + 1);

    let mut acc = [0f32; 4];
    for c in 0..4 {
        let top = tl[c] + (tr[c] - tl[c]) * tx;
        let bot = bl[c] + (br[c] - bl[c]) * tx;
        acc[c] = top + (bot - top) * ty;
    }
    let alpha = acc[3];
    if alpha < 0.5 {
        return None;
    }
    let a = alpha / 255.0;
    Some(Rgba([
        (acc[0] / a).round().clamp(0.0, 255.0) as u8,
        (acc[1] / a).round().clamp(0.0, 255.0) as u8,
        (acc[2] / a).round().clamp(0.0, 255.0) as u8,
        alpha.round().clamp(0.0, 255.0) as u8,
    ]))
}

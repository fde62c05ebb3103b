use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use image::Rgba;
use kurbo::{Affine, Point, Rect, Vec2};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::{BlendMode, TiledImage};

/// Smallest scale factor a layer may carry on either axis.
pub const MIN_LAYER_SCALE: f64 = 0.001;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Process-wide generation stamp. Never repeats, so a stamp restored from
/// history can not collide with one handed out for a later edit.
pub fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Stable layer identity. Survives reordering, snapshots and persistence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What produced the layer's pixels. Carried as metadata only; every kind
/// is edited and composited as raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    #[default]
    Raster,
    Text,
    Shape,
}

/// A single layer: one RGBA buffer sized to its own box, plus placement.
///
/// The buffer is the only place colour lives. Erasing never writes here; it
/// goes through the layer's alpha mask in [`crate::mask::AlphaMaskStore`].
#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub locked: bool,
    /// 0–100
    pub opacity: u8,
    pub blend_mode: BlendMode,
    /// Paint order, lower first. Kept equal to the index in the stack.
    pub z_index: usize,
    /// Canvas-space top-left of the scaled, unrotated box.
    pub position: Point,
    pub scale: Vec2,
    /// Degrees clockwise about the box centre.
    pub rotation: f64,
    pub pixels: TiledImage,
    /// Restamped from [`next_generation`] on every pixel or geometry mutation.
    pub generation: u64,
}

impl Layer {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            kind: LayerKind::Raster,
            visible: true,
            locked: false,
            opacity: 100,
            blend_mode: BlendMode::Normal,
            z_index: 0,
            position: Point::ZERO,
            scale: Vec2::new(1.0, 1.0),
            rotation: 0.0,
            pixels: TiledImage::new(width, height),
            generation: next_generation(),
        }
    }

    pub fn new_filled(name: impl Into<String>, width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut layer = Self::new(name, width, height);
        layer.pixels = TiledImage::new_filled(width, height, color);
        layer
    }

    /// Size of the backing buffer (`originalSize`).
    pub fn original_size(&self) -> (u32, u32) {
        (self.pixels.width(), self.pixels.height())
    }

    pub fn opacity_f32(&self) -> f32 {
        self.opacity.min(100) as f32 / 100.0
    }

    pub fn touch(&mut self) {
        self.generation = next_generation();
    }

    /// True when the layer maps to the canvas by an integer translation only.
    pub fn is_axis_aligned_unscaled(&self) -> bool {
        self.rotation.rem_euclid(360.0) == 0.0
            && self.scale == Vec2::new(1.0, 1.0)
            && self.position.x.fract() == 0.0
            && self.position.y.fract() == 0.0
    }

    /// Local pixel space → canvas space.
    pub fn canvas_affine(&self) -> Affine {
        let (w, h) = self.original_size();
        let sx = clamp_scale(self.scale.x);
        let sy = clamp_scale(self.scale.y);
        let center = Vec2::new(w as f64 * sx / 2.0, h as f64 * sy / 2.0);
        Affine::translate(self.position.to_vec2() + center)
            * Affine::rotate(self.rotation.to_radians())
            * Affine::translate(-center)
            * Affine::scale_non_uniform(sx, sy)
    }

    /// Axis-aligned canvas-space bounding box of the transformed buffer.
    pub fn canvas_bounds(&self) -> Rect {
        let (w, h) = self.original_size();
        self.canvas_affine()
            .transform_rect_bbox(Rect::new(0.0, 0.0, w as f64, h as f64))
    }

    /// Canvas point → local buffer coordinates (unrounded).
    pub fn canvas_to_local(&self, p: Point) -> Point {
        self.canvas_affine().inverse() * p
    }

    /// Move the box so its canvas bounding box starts at `min`.
    pub fn move_bounds_to(&mut self, min: Point) {
        let bounds = self.canvas_bounds();
        self.position += min - bounds.origin();
        self.touch();
    }
}

fn clamp_scale(s: f64) -> f64 {
    if s.abs() < MIN_LAYER_SCALE {
        MIN_LAYER_SCALE.copysign(if s == 0.0 { 1.0 } else { s })
    } else {
        s
    }
}

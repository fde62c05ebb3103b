//! Screen ↔ image coordinate mapping under fit scale, zoom, pan and view rotation.

use kurbo::{Affine, Point, Size, Vec2};
use serde::{Deserialize, Serialize};

pub const MIN_ZOOM: f64 = 0.05;
pub const MAX_ZOOM: f64 = 32.0;

/// View state owned by the host. `scale` is the fit-to-container base scale,
/// `zoom` and `pan` are user controlled.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub scale: f64,
    pub zoom: f64,
    pub pan: Vec2,
    /// Display rotation of the whole view, degrees clockwise.
    pub rotation_deg: f64,
    pub image_size: Size,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            zoom: 1.0,
            pan: Vec2::ZERO,
            rotation_deg: 0.0,
            image_size: Size::new(1.0, 1.0),
        }
    }
}

impl ViewTransform {
    pub fn new(image_size: Size) -> Self {
        Self {
            image_size,
            ..Self::default()
        }
    }

    /// Effective pixels-per-image-pixel.
    #[inline]
    pub fn effective_scale(&self) -> f64 {
        let s = self.scale * self.zoom;
        if s.abs() < f64::EPSILON { 1.0 } else { s }
    }

    /// Image space → screen space for a viewport whose top-left is `rect_origin`.
    pub fn to_affine(&self, rect_origin: Point) -> Affine {
        let s = self.effective_scale();
        let center = Vec2::new(self.image_size.width * s / 2.0, self.image_size.height * s / 2.0);
        let base = Affine::translate(rect_origin.to_vec2() + self.pan);
        if self.rotation_deg == 0.0 {
            return base * Affine::scale(s);
        }
        base * Affine::translate(center)
            * Affine::rotate(self.rotation_deg.to_radians())
            * Affine::translate(-center)
            * Affine::scale(s)
    }

    /// Screen → image, rounded to the nearest pixel.
    pub fn screen_to_image(&self, screen: Point, rect_origin: Point) -> Point {
        self.screen_to_image_precise(screen, rect_origin).round()
    }

    /// Screen → image without rounding, for sub-pixel dab placement.
    pub fn screen_to_image_precise(&self, screen: Point, rect_origin: Point) -> Point {
        if self.rotation_deg == 0.0 {
            let v = screen - rect_origin - self.pan;
            return (v / self.effective_scale()).to_point();
        }
        self.to_affine(rect_origin).inverse() * screen
    }

    /// Image → screen. Not rounded; overlays draw at sub-pixel positions.
    pub fn image_to_screen(&self, image: Point, rect_origin: Point) -> Point {
        self.to_affine(rect_origin) * image
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Multiply zoom by `factor`, keeping the image point under `screen` fixed.
    pub fn zoom_about(&mut self, screen: Point, rect_origin: Point, factor: f64) {
        let anchor = self.screen_to_image_precise(screen, rect_origin);
        self.set_zoom(self.zoom * factor);
        let moved = self.image_to_screen(anchor, rect_origin);
        self.pan += screen - moved;
    }

    /// Largest scale at which `image` fits inside `container`.
    pub fn fit_scale(container: Size, image: Size) -> f64 {
        if image.width <= 0.0 || image.height <= 0.0 || container.is_zero_area() {
            return 1.0;
        }
        (container.width / image.width).min(container.height / image.height)
    }
}

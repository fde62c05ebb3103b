use kurbo::{Point, Rect, Size, Vec2};
use tracing::debug;

use super::handles::{Handle, handle_cursor, hit_test_handle};
use super::{DragState, Effects, PointerEvent, PointerPhase};
use crate::tools::Cursor;

pub const DEFAULT_CROP_MIN_SIZE: f64 = 10.0;
pub const DEFAULT_HANDLE_HIT_RADIUS: f64 = 8.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CropMode {
    #[default]
    None,
    Create,
    Resize(Handle),
    Move,
}

/// Crop rectangle editor: `None → Create → (Resize | Move) → None`.
///
/// Every drag works from the rectangle captured at pointer-down plus the
/// total pointer offset, so repeated moves never accumulate rounding drift.
#[derive(Clone, Debug)]
pub struct CropSession {
    mode: CropMode,
    crop_area: Option<Rect>,
    /// Rectangle at the start of the current move/resize.
    original: Option<Rect>,
    anchor: Point,
    drag: DragState,
    canvas: Size,
    /// Width / height lock. `None` is free-form.
    pub aspect_ratio: Option<f64>,
    /// Allow the rectangle to extend past the canvas.
    pub expand_mode: bool,
    /// Rectangles narrower or shorter than this are discarded on release.
    pub min_size: f64,
    /// Handle hit radius in screen pixels.
    pub hit_radius: f64,
}

impl CropSession {
    pub fn new(canvas: Size) -> Self {
        Self {
            mode: CropMode::None,
            crop_area: None,
            original: None,
            anchor: Point::ZERO,
            drag: DragState::default(),
            canvas,
            aspect_ratio: None,
            expand_mode: false,
            min_size: DEFAULT_CROP_MIN_SIZE,
            hit_radius: DEFAULT_HANDLE_HIT_RADIUS,
        }
    }

    pub fn mode(&self) -> CropMode {
        self.mode
    }

    pub fn crop_area(&self) -> Option<Rect> {
        self.crop_area
    }

    pub fn set_crop_area(&mut self, area: Option<Rect>) {
        self.crop_area = area.map(|r| r.abs());
    }

    pub fn set_canvas(&mut self, canvas: Size) {
        self.canvas = canvas;
    }

    pub fn is_dragging(&self) -> bool {
        self.mode != CropMode::None
    }

    /// Drop the rectangle and any drag in progress.
    pub fn cancel(&mut self) -> Effects {
        let had_area = self.crop_area.is_some();
        self.mode = CropMode::None;
        self.crop_area = None;
        self.original = None;
        self.drag.end();
        Effects {
            request_render: had_area,
            discarded: had_area,
            ..Effects::none()
        }
    }

    /// Single transition function. `view_scale` converts the screen-space
    /// hit radius into image pixels.
    pub fn handle_event(&mut self, event: &PointerEvent, view_scale: f64) -> Effects {
        match event.phase {
            PointerPhase::Down => self.on_down(event.position, view_scale),
            PointerPhase::Move => self.on_move(event, view_scale),
            PointerPhase::Up => self.on_up(event),
        }
    }

    fn hit_radius_image(&self, view_scale: f64) -> f64 {
        self.hit_radius / view_scale.abs().max(1e-6)
    }

    fn canvas_rect(&self) -> Rect {
        self.canvas.to_rect()
    }

    fn clamp_point(&self, p: Point) -> Point {
        if self.expand_mode {
            p
        } else {
            Point::new(p.x.clamp(0.0, self.canvas.width), p.y.clamp(0.0, self.canvas.height))
        }
    }

    fn on_down(&mut self, p: Point, view_scale: f64) -> Effects {
        if let Some(rect) = self.crop_area {
            if let Some(handle) = hit_test_handle(rect, p, self.hit_radius_image(view_scale)) {
                self.mode = CropMode::Resize(handle);
                self.original = Some(rect);
                self.drag.start(p);
                return Effects::render().with_cursor(handle_cursor(handle));
            }
            if rect.contains(p) {
                self.mode = CropMode::Move;
                self.original = Some(rect);
                self.drag.start(p);
                return Effects::render().with_cursor(Cursor::Grabbing);
            }
        }

        let anchor = self.clamp_point(p);
        self.mode = CropMode::Create;
        self.anchor = anchor;
        self.original = None;
        self.crop_area = Some(Rect::from_points(anchor, anchor));
        self.drag.start(p);
        Effects::render().with_cursor(Cursor::Crosshair)
    }

    fn on_move(&mut self, event: &PointerEvent, view_scale: f64) -> Effects {
        let p = event.position;
        let Some(offset) = self.drag.total_offset(p) else {
            return Effects::none().with_cursor(self.hover_cursor(p, view_scale));
        };
        let ratio = self
            .aspect_ratio
            .or(event.shift.then_some(1.0))
            .filter(|r| *r > 0.0 && r.is_finite());

        let next = match (self.mode, self.original) {
            (CropMode::Create, _) => self.create_rect(p, ratio),
            (CropMode::Move, Some(original)) => self.moved_rect(original, offset),
            (CropMode::Resize(handle), Some(original)) => self.resized_rect(original, handle, offset, ratio),
            _ => return Effects::none(),
        };
        self.crop_area = Some(next);
        let cursor = match self.mode {
            CropMode::Resize(h) => handle_cursor(h),
            CropMode::Move => Cursor::Grabbing,
            _ => Cursor::Crosshair,
        };
        Effects::render().with_cursor(cursor)
    }

    fn on_up(&mut self, event: &PointerEvent) -> Effects {
        if self.mode == CropMode::None {
            return Effects::none();
        }
        self.mode = CropMode::None;
        self.original = None;
        self.drag.end();

        if let Some(rect) = self.crop_area
            && (rect.width() < self.min_size || rect.height() < self.min_size)
        {
            debug!(w = rect.width(), h = rect.height(), at = ?event.position, "crop area too small, discarded");
            self.crop_area = None;
            return Effects {
                request_render: true,
                discarded: true,
                ..Effects::none()
            };
        }
        Effects::render().with_cursor(Cursor::Crosshair)
    }

    fn hover_cursor(&self, p: Point, view_scale: f64) -> Cursor {
        match self.crop_area {
            Some(rect) => match hit_test_handle(rect, p, self.hit_radius_image(view_scale)) {
                Some(h) => handle_cursor(h),
                None if rect.contains(p) => Cursor::Move,
                None => Cursor::Crosshair,
            },
            None => Cursor::Crosshair,
        }
    }

    fn create_rect(&self, p: Point, ratio: Option<f64>) -> Rect {
        let anchor = self.anchor;
        let p = self.clamp_point(p);
        let mut dx = p.x - anchor.x;
        let mut dy = p.y - anchor.y;

        if let Some(r) = ratio {
            let (w, h) = (dx.abs(), dy.abs());
            let (w, h) = if w / r >= h { (w, w / r) } else { (h * r, h) };
            dx = w.copysign(dx);
            dy = h.copysign(dy);

            if !self.expand_mode {
                let room_x = if dx >= 0.0 { self.canvas.width - anchor.x } else { anchor.x };
                let room_y = if dy >= 0.0 { self.canvas.height - anchor.y } else { anchor.y };
                let mut fit = 1.0f64;
                if w > 0.0 {
                    fit = fit.min(room_x / w);
                }
                if h > 0.0 {
                    fit = fit.min(room_y / h);
                }
                dx *= fit;
                dy *= fit;
            }
        }
        Rect::from_points(anchor, anchor + Vec2::new(dx, dy))
    }

    fn moved_rect(&self, original: Rect, offset: Vec2) -> Rect {
        let mut moved = original + offset;
        if !self.expand_mode {
            let max_x = (self.canvas.width - original.width()).max(0.0);
            let max_y = (self.canvas.height - original.height()).max(0.0);
            let x0 = moved.x0.clamp(0.0, max_x);
            let y0 = moved.y0.clamp(0.0, max_y);
            moved = Rect::from_origin_size(Point::new(x0, y0), original.size());
        }
        moved
    }

    fn resized_rect(&self, original: Rect, handle: Handle, offset: Vec2, ratio: Option<f64>) -> Rect {
        let (xd, yd) = (handle.x_dir(), handle.y_dir());
        let rect = match ratio {
            None => {
                let mut r = original;
                if xd < 0.0 {
                    r.x0 += offset.x;
                } else if xd > 0.0 {
                    r.x1 += offset.x;
                }
                if yd < 0.0 {
                    r.y0 += offset.y;
                } else if yd > 0.0 {
                    r.y1 += offset.y;
                }
                r.abs()
            }
            Some(ratio) => {
                let anchor = handle.opposite().position(original);
                let grow_x = xd * offset.x;
                let grow_y = yd * offset.y;
                let (w, h) = if handle.is_corner() {
                    if grow_x.abs() >= grow_y.abs() {
                        let w = (original.width() + grow_x).max(0.0);
                        (w, w / ratio)
                    } else {
                        let h = (original.height() + grow_y).max(0.0);
                        (h * ratio, h)
                    }
                } else if xd != 0.0 {
                    let w = (original.width() + grow_x).max(0.0);
                    (w, w / ratio)
                } else {
                    let h = (original.height() + grow_y).max(0.0);
                    (h * ratio, h)
                };
                // Corners grow away from the opposite corner; edges also stay
                // centred on the perpendicular axis.
                let (w, h) = if self.expand_mode {
                    (w, h)
                } else {
                    // Shrink both sides together so the ratio survives the clamp.
                    let room_x = room(xd, anchor.x, self.canvas.width);
                    let room_y = room(yd, anchor.y, self.canvas.height);
                    let mut fit = 1.0f64;
                    if w > 0.0 {
                        fit = fit.min(room_x / w);
                    }
                    if h > 0.0 {
                        fit = fit.min(room_y / h);
                    }
                    (w * fit, h * fit)
                };
                let x0 = match xd {
                    d if d > 0.0 => anchor.x,
                    d if d < 0.0 => anchor.x - w,
                    _ => anchor.x - w / 2.0,
                };
                let y0 = match yd {
                    d if d > 0.0 => anchor.y,
                    d if d < 0.0 => anchor.y - h,
                    _ => anchor.y - h / 2.0,
                };
                return Rect::from_origin_size(Point::new(x0, y0), Size::new(w, h));
            }
        };
        if self.expand_mode {
            rect
        } else {
            rect.intersect(self.canvas_rect())
        }
    }
}

/// Canvas space available from `anchor` in the direction a handle grows.
/// A centred edge grows both ways, so it gets twice the nearer side.
fn room(dir: f64, anchor: f64, extent: f64) -> f64 {
    let room = match dir {
        d if d > 0.0 => extent - anchor,
        d if d < 0.0 => anchor,
        _ => 2.0 * anchor.min(extent - anchor),
    };
    room.max(0.0)
}

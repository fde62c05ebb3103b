use kurbo::{Affine, Point, Rect, Vec2};

use super::handles::{Handle, handle_cursor, hit_test_handle};
use super::{DragState, Effects, PointerEvent, PointerPhase};
use crate::compositor::TransformPreview;
use crate::layer::{Layer, LayerId};
use crate::layers::LayerStack;
use crate::mask::AlphaMask;
use crate::tools::Cursor;

/// Rotation snap step while shift is held.
const ROTATION_SNAP_DEG: f64 = 15.0;
const MIN_EXTENT: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum TransformDrag {
    #[default]
    None,
    Move,
    Scale(Handle),
    Rotate,
}

/// Live affine edit of one or more layers.
///
/// The untouched layers (and their masks) are captured when the session
/// starts. Pointer events only change the session's affine; the renderer
/// shows it through [`preview`](Self::preview). Applying or cancelling is up
/// to the document, which uses the captured originals.
#[derive(Clone, Debug)]
pub struct TransformSession {
    layers: Vec<LayerId>,
    /// Canvas-space union of the layers' bounds at start.
    bounds: Rect,
    originals: Vec<Layer>,
    original_masks: Vec<(LayerId, Option<AlphaMask>)>,
    is_selection_based: bool,
    is_active: bool,
    translation: Vec2,
    scale: Vec2,
    rotation_deg: f64,
    drag: TransformDrag,
    drag_state: DragState,
    /// (translation, scale, rotation) when the current drag began.
    drag_origin: (Vec2, Vec2, f64),
    /// Handle hit radius in screen pixels.
    pub hit_radius: f64,
}

impl TransformSession {
    /// Capture `ids` (unknown and locked layers are skipped). `None` if
    /// nothing is left to transform.
    pub fn start(stack: &LayerStack, ids: &[LayerId], is_selection_based: bool) -> Option<Self> {
        let originals: Vec<Layer> = ids
            .iter()
            .filter_map(|id| stack.layer(*id))
            .filter(|l| !l.locked)
            .cloned()
            .collect();
        let bounds = originals
            .iter()
            .map(Layer::canvas_bounds)
            .reduce(|a, b| a.union(b))?;
        let layers: Vec<LayerId> = originals.iter().map(|l| l.id).collect();
        let original_masks = layers
            .iter()
            .map(|id| (*id, stack.masks().get_mask(*id).cloned()))
            .collect();
        Some(Self {
            layers,
            bounds,
            originals,
            original_masks,
            is_selection_based,
            is_active: true,
            translation: Vec2::ZERO,
            scale: Vec2::new(1.0, 1.0),
            rotation_deg: 0.0,
            drag: TransformDrag::None,
            drag_state: DragState::default(),
            drag_origin: (Vec2::ZERO, Vec2::new(1.0, 1.0), 0.0),
            hit_radius: super::crop::DEFAULT_HANDLE_HIT_RADIUS,
        })
    }

    pub fn layers(&self) -> &[LayerId] {
        &self.layers
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn originals(&self) -> &[Layer] {
        &self.originals
    }

    pub fn original_masks(&self) -> &[(LayerId, Option<AlphaMask>)] {
        &self.original_masks
    }

    pub fn is_selection_based(&self) -> bool {
        self.is_selection_based
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.drag = TransformDrag::None;
        self.drag_state.end();
    }

    pub fn drag(&self) -> TransformDrag {
        self.drag
    }

    pub fn translation(&self) -> Vec2 {
        self.translation
    }

    pub fn scale(&self) -> Vec2 {
        self.scale
    }

    pub fn rotation_deg(&self) -> f64 {
        self.rotation_deg
    }

    pub fn set_translation(&mut self, t: Vec2) {
        self.translation = t;
    }

    pub fn set_scale(&mut self, s: Vec2) {
        self.scale = Vec2::new(s.x.max(1e-3), s.y.max(1e-3));
    }

    pub fn set_rotation_deg(&mut self, deg: f64) {
        self.rotation_deg = deg;
    }

    fn affine_with(&self, translation: Vec2, scale: Vec2, rotation_deg: f64) -> Affine {
        let c = self.bounds.center().to_vec2();
        Affine::translate(c + translation)
            * Affine::rotate(rotation_deg.to_radians())
            * Affine::scale_non_uniform(scale.x, scale.y)
            * Affine::translate(-c)
    }

    /// Canvas → canvas mapping of the session: scale and rotate about the
    /// original bounds centre, then translate.
    pub fn affine(&self) -> Affine {
        self.affine_with(self.translation, self.scale, self.rotation_deg)
    }

    pub fn is_identity(&self) -> bool {
        self.translation == Vec2::ZERO
            && self.scale == Vec2::new(1.0, 1.0)
            && self.rotation_deg.rem_euclid(360.0) == 0.0
    }

    pub fn current_bounds(&self) -> Rect {
        self.affine().transform_rect_bbox(self.bounds)
    }

    pub fn preview(&self) -> TransformPreview {
        TransformPreview {
            layers: self.layers.clone(),
            affine: self.affine(),
        }
    }

    pub fn handle_event(&mut self, event: &PointerEvent, view_scale: f64) -> Effects {
        if !self.is_active {
            return Effects::none();
        }
        match event.phase {
            PointerPhase::Down => self.on_down(event.position, view_scale),
            PointerPhase::Move => self.on_move(event, view_scale),
            PointerPhase::Up => {
                if self.drag == TransformDrag::None {
                    return Effects::none();
                }
                self.drag = TransformDrag::None;
                self.drag_state.end();
                Effects::render()
            }
        }
    }

    /// Hit-test in the untransformed bounds: handle → scale, inside → move,
    /// outside → rotate.
    fn classify(&self, p: Point, view_scale: f64) -> TransformDrag {
        let local = self.affine().inverse() * p;
        let mean_scale = ((self.scale.x.abs() + self.scale.y.abs()) / 2.0).max(1e-3);
        let radius = self.hit_radius / view_scale.abs().max(1e-6) / mean_scale;
        if let Some(h) = hit_test_handle(self.bounds, local, radius) {
            TransformDrag::Scale(h)
        } else if self.bounds.contains(local) {
            TransformDrag::Move
        } else {
            TransformDrag::Rotate
        }
    }

    fn cursor_for(drag: TransformDrag) -> Cursor {
        match drag {
            TransformDrag::None => Cursor::Default,
            TransformDrag::Move => Cursor::Move,
            TransformDrag::Scale(h) => handle_cursor(h),
            TransformDrag::Rotate => Cursor::Rotate,
        }
    }

    fn on_down(&mut self, p: Point, view_scale: f64) -> Effects {
        self.drag = self.classify(p, view_scale);
        self.drag_state.start(p);
        self.drag_origin = (self.translation, self.scale, self.rotation_deg);
        Effects::render().with_cursor(Self::cursor_for(self.drag))
    }

    fn on_move(&mut self, event: &PointerEvent, view_scale: f64) -> Effects {
        let p = event.position;
        let Some(offset) = self.drag_state.total_offset(p) else {
            return Effects::none().with_cursor(Self::cursor_for(self.classify(p, view_scale)));
        };
        let (t0, s0, r0) = self.drag_origin;

        match self.drag {
            TransformDrag::None => return Effects::none(),
            TransformDrag::Move => {
                let offset = if event.shift {
                    if offset.x.abs() >= offset.y.abs() {
                        Vec2::new(offset.x, 0.0)
                    } else {
                        Vec2::new(0.0, offset.y)
                    }
                } else {
                    offset
                };
                self.translation = t0 + offset;
            }
            TransformDrag::Scale(handle) => {
                let (w, h) = (self.bounds.width().max(MIN_EXTENT), self.bounds.height().max(MIN_EXTENT));
                let d = (Affine::rotate(-r0.to_radians()) * offset.to_point()).to_vec2();
                let w0 = w * s0.x;
                let h0 = h * s0.y;
                let mut new_w = w0 + handle.x_dir() * d.x;
                let mut new_h = h0 + handle.y_dir() * d.y;
                if event.shift && handle.is_corner() {
                    let f = (new_w / w0).max(new_h / h0);
                    new_w = w0 * f;
                    new_h = h0 * f;
                }
                let scale = Vec2::new(new_w.max(MIN_EXTENT) / w, new_h.max(MIN_EXTENT) / h);

                // Keep the opposite handle fixed on the canvas.
                let anchor = handle.opposite().position(self.bounds);
                let before = self.affine_with(t0, s0, r0) * anchor;
                let after = self.affine_with(t0, scale, r0) * anchor;
                self.scale = scale;
                self.translation = t0 + (before - after);
            }
            TransformDrag::Rotate => {
                let centre = self.bounds.center() + t0;
                let start = p - offset;
                let a0 = (start - centre).atan2();
                let a1 = (p - centre).atan2();
                let mut deg = r0 + (a1 - a0).to_degrees();
                if event.shift {
                    deg = (deg / ROTATION_SNAP_DEG).round() * ROTATION_SNAP_DEG;
                }
                self.rotation_deg = deg;
            }
        }
        Effects::render().with_cursor(Self::cursor_for(self.drag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Point, b: Point) -> bool {
        (a - b).hypot() < 1e-9
    }

    fn one_layer() -> (LayerStack, LayerId) {
        let mut stack = LayerStack::new();
        let id = stack.add_layer("L", 40, 40);
        (stack, id)
    }

    #[test]
    fn start_requires_a_live_unlocked_layer() {
        let (mut stack, id) = one_layer();
        assert!(TransformSession::start(&stack, &[LayerId::new()], false).is_none());
        stack.set_locked(id, true).unwrap();
        assert!(TransformSession::start(&stack, &[id], false).is_none());
        stack.set_locked(id, false).unwrap();
        let s = TransformSession::start(&stack, &[id], true).unwrap();
        assert!(s.is_active() && s.is_selection_based() && s.is_identity());
        assert_eq!(s.bounds(), Rect::new(0.0, 0.0, 40.0, 40.0));
    }

    #[test]
    fn move_drag_translates() {
        let (stack, id) = one_layer();
        let mut s = TransformSession::start(&stack, &[id], false).unwrap();
        s.handle_event(&PointerEvent::down(20.0, 20.0), 1.0);
        assert_eq!(s.drag(), TransformDrag::Move);
        s.handle_event(&PointerEvent::moved(30.0, 25.0), 1.0);
        s.handle_event(&PointerEvent::up(30.0, 25.0), 1.0);
        assert_eq!(s.translation(), Vec2::new(10.0, 5.0));
        assert!(approx(s.affine() * Point::ZERO, Point::new(10.0, 5.0)));
        assert_eq!(s.preview().layers, vec![id]);
    }

    #[test]
    fn corner_scale_keeps_opposite_corner() {
        let (stack, id) = one_layer();
        let mut s = TransformSession::start(&stack, &[id], false).unwrap();
        s.handle_event(&PointerEvent::down(40.0, 40.0), 1.0);
        assert_eq!(s.drag(), TransformDrag::Scale(Handle::SE));
        s.handle_event(&PointerEvent::moved(80.0, 60.0), 1.0);
        assert!((s.scale() - Vec2::new(2.0, 1.5)).hypot() < 1e-9);
        assert!(approx(s.affine() * Point::ZERO, Point::ZERO));
        assert!(approx(s.affine() * Point::new(40.0, 40.0), Point::new(80.0, 60.0)));

        s.handle_event(&PointerEvent::moved(80.0, 60.0).with_shift(true), 1.0);
        assert!((s.scale() - Vec2::new(2.0, 2.0)).hypot() < 1e-9);
    }

    #[test]
    fn outside_drag_rotates_about_centre() {
        let (stack, id) = one_layer();
        let mut s = TransformSession::start(&stack, &[id], false).unwrap();
        s.handle_event(&PointerEvent::down(60.0, 20.0), 1.0);
        assert_eq!(s.drag(), TransformDrag::Rotate);
        s.handle_event(&PointerEvent::moved(20.0, 60.0), 1.0);
        assert!((s.rotation_deg() - 90.0).abs() < 1e-9);
        assert!(approx(s.affine() * Point::new(20.0, 20.0), Point::new(20.0, 20.0)));

        // 50 degrees snaps to 45 with shift.
        let a = 50f64.to_radians();
        let p = Point::new(20.0 + 40.0 * a.cos(), 20.0 + 40.0 * a.sin());
        s.handle_event(&PointerEvent::up(20.0, 60.0), 1.0);
        s.set_rotation_deg(0.0);
        s.handle_event(&PointerEvent::down(60.0, 20.0), 1.0);
        s.handle_event(&PointerEvent::moved(p.x, p.y).with_shift(true), 1.0);
        assert!((s.rotation_deg() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn inactive_session_ignores_events() {
        let (stack, id) = one_layer();
        let mut s = TransformSession::start(&stack, &[id], false).unwrap();
        s.deactivate();
        let fx = s.handle_event(&PointerEvent::down(20.0, 20.0), 1.0);
        assert_eq!(fx, Effects::none());
    }
}

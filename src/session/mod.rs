//! Pointer-driven interaction sessions.
//!
//! Each session is an explicit state machine with one transition function,
//! `handle_event(&PointerEvent, view_scale) -> Effects`, so it can be driven
//! from tests without an event loop. Positions are already in image space.

pub mod crop;
pub mod handles;
pub mod transform;

use kurbo::{Point, Vec2};

use crate::tools::Cursor;

pub use crop::{CropMode, CropSession};
pub use handles::{Handle, handle_cursor, hit_test_handle};
pub use transform::{TransformDrag, TransformSession};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
}

/// Normalized pointer sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub position: Point,
    /// 0–1, 1.0 for devices without pressure.
    pub pressure: f32,
    /// Constrain (aspect lock, angle snap).
    pub shift: bool,
    pub alt: bool,
}

impl PointerEvent {
    pub fn new(phase: PointerPhase, position: Point) -> Self {
        Self {
            phase,
            position,
            pressure: 1.0,
            shift: false,
            alt: false,
        }
    }

    pub fn down(x: f64, y: f64) -> Self {
        Self::new(PointerPhase::Down, Point::new(x, y))
    }

    pub fn moved(x: f64, y: f64) -> Self {
        Self::new(PointerPhase::Move, Point::new(x, y))
    }

    pub fn up(x: f64, y: f64) -> Self {
        Self::new(PointerPhase::Up, Point::new(x, y))
    }

    pub fn with_shift(self, shift: bool) -> Self {
        Self { shift, ..self }
    }

    pub fn with_pressure(self, pressure: f32) -> Self {
        Self { pressure, ..self }
    }
}

/// What a transition asks of its caller.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Effects {
    pub request_render: bool,
    /// A history-worthy edit finished.
    pub committed: bool,
    /// The pending edit was thrown away.
    pub discarded: bool,
    pub cursor: Option<Cursor>,
}

impl Effects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn render() -> Self {
        Self {
            request_render: true,
            ..Self::default()
        }
    }

    pub fn with_cursor(self, cursor: Cursor) -> Self {
        Self {
            cursor: Some(cursor),
            ..self
        }
    }

    /// Union of two effect sets; the later cursor wins.
    pub fn merge(self, other: Effects) -> Effects {
        Effects {
            request_render: self.request_render || other.request_render,
            committed: self.committed || other.committed,
            discarded: self.discarded || other.discarded,
            cursor: other.cursor.or(self.cursor),
        }
    }
}

/// Start point of a drag; deltas are always taken from here, never summed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DragState {
    pub start_pos: Option<Point>,
}

impl DragState {
    pub fn start(&mut self, pos: Point) {
        self.start_pos = Some(pos);
    }

    pub fn total_offset(&self, current: Point) -> Option<Vec2> {
        self.start_pos.map(|start| current - start)
    }

    pub fn is_dragging(&self) -> bool {
        self.start_pos.is_some()
    }

    pub fn end(&mut self) {
        self.start_pos = None;
    }
}

use kurbo::{Point, Rect};

use crate::tools::Cursor;

/// Resize handle on a rectangle: four corners and four edge midpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Handle {
    N,
    S,
    E,
    W,
    NE,
    NW,
    SE,
    SW,
}

impl Handle {
    pub const CORNERS: [Handle; 4] = [Handle::NW, Handle::NE, Handle::SE, Handle::SW];
    pub const EDGES: [Handle; 4] = [Handle::N, Handle::E, Handle::S, Handle::W];

    pub fn is_corner(self) -> bool {
        matches!(self, Handle::NE | Handle::NW | Handle::SE | Handle::SW)
    }

    /// Horizontal direction the handle moves: -1 left edge, 1 right edge, 0 neither.
    pub fn x_dir(self) -> f64 {
        match self {
            Handle::W | Handle::NW | Handle::SW => -1.0,
            Handle::E | Handle::NE | Handle::SE => 1.0,
            Handle::N | Handle::S => 0.0,
        }
    }

    /// Vertical direction: -1 top edge, 1 bottom edge, 0 neither.
    pub fn y_dir(self) -> f64 {
        match self {
            Handle::N | Handle::NE | Handle::NW => -1.0,
            Handle::S | Handle::SE | Handle::SW => 1.0,
            Handle::E | Handle::W => 0.0,
        }
    }

    pub fn position(self, rect: Rect) -> Point {
        let c = rect.center();
        let x = match self.x_dir() {
            d if d < 0.0 => rect.x0,
            d if d > 0.0 => rect.x1,
            _ => c.x,
        };
        let y = match self.y_dir() {
            d if d < 0.0 => rect.y0,
            d if d > 0.0 => rect.y1,
            _ => c.y,
        };
        Point::new(x, y)
    }

    /// The point that stays fixed while this handle is dragged.
    pub fn opposite(self) -> Handle {
        match self {
            Handle::N => Handle::S,
            Handle::S => Handle::N,
            Handle::E => Handle::W,
            Handle::W => Handle::E,
            Handle::NE => Handle::SW,
            Handle::NW => Handle::SE,
            Handle::SE => Handle::NW,
            Handle::SW => Handle::NE,
        }
    }
}

/// First handle within `radius` of `p`, corners before edges.
pub fn hit_test_handle(rect: Rect, p: Point, radius: f64) -> Option<Handle> {
    let radius_sq = radius * radius;
    Handle::CORNERS
        .iter()
        .chain(Handle::EDGES.iter())
        .copied()
        .find(|h| (h.position(rect) - p).hypot2() <= radius_sq)
}

pub fn handle_cursor(handle: Handle) -> Cursor {
    match handle {
        Handle::N | Handle::S => Cursor::ResizeVertical,
        Handle::E | Handle::W => Cursor::ResizeHorizontal,
        Handle::NW | Handle::SE => Cursor::ResizeNwSe,
        Handle::NE | Handle::SW => Cursor::ResizeNeSw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_win_over_edges() {
        // A tiny rect puts corner and edge handles within one radius.
        let rect = Rect::new(0.0, 0.0, 4.0, 4.0);
        assert_eq!(hit_test_handle(rect, Point::new(1.0, 0.5), 3.0), Some(Handle::NW));
    }

    #[test]
    fn edges_and_misses() {
        let rect = Rect::new(0.0, 0.0, 100.0, 50.0);
        assert_eq!(hit_test_handle(rect, Point::new(50.0, 2.0), 5.0), Some(Handle::N));
        assert_eq!(hit_test_handle(rect, Point::new(97.0, 25.0), 5.0), Some(Handle::E));
        assert_eq!(hit_test_handle(rect, Point::new(50.0, 25.0), 5.0), None);
    }

    #[test]
    fn opposite_handles_are_symmetric() {
        for h in Handle::CORNERS.iter().chain(Handle::EDGES.iter()) {
            assert_eq!(h.opposite().opposite(), *h);
            assert_eq!(h.opposite().x_dir(), -h.x_dir());
        }
    }
}

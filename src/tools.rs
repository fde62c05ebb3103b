use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::brush::{BrushEngine, CloneSource, StrokeKind};
use crate::layer::LayerId;
use crate::layers::LayerStack;
use crate::session::{CropSession, Effects, PointerEvent, TransformSession};
use crate::viewport::ViewTransform;

// ============================================================================
// TOOL MODE & CURSORS
// ============================================================================

/// Tool chosen by the host UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ToolMode {
    #[default]
    Brush,
    Eraser,
    CloneStamp,
    Crop,
    Transform,
    Pan,
}

impl ToolMode {
    pub fn all() -> &'static [ToolMode] {
        &[
            ToolMode::Brush,
            ToolMode::Eraser,
            ToolMode::CloneStamp,
            ToolMode::Crop,
            ToolMode::Transform,
            ToolMode::Pan,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ToolMode::Brush => "Brush",
            ToolMode::Eraser => "Eraser",
            ToolMode::CloneStamp => "Clone Stamp",
            ToolMode::Crop => "Crop",
            ToolMode::Transform => "Transform",
            ToolMode::Pan => "Pan",
        }
    }
}

/// Cursor shape the host should show.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Cursor {
    #[default]
    Default,
    Crosshair,
    Move,
    Grab,
    Grabbing,
    ResizeHorizontal,
    ResizeVertical,
    ResizeNwSe,
    ResizeNeSw,
    Rotate,
    NotAllowed,
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Everything a tool may touch during one event. Borrowed from the document
/// for the duration of a single call.
pub struct ToolContext<'a> {
    pub stack: &'a mut LayerStack,
    pub brush: &'a mut BrushEngine,
    pub crop: &'a mut CropSession,
    pub transform: &'a mut Option<TransformSession>,
    pub view: &'a mut ViewTransform,
    pub clone_source: &'a mut Option<CloneSource>,
    /// Pointer position before the screen → image mapping.
    pub screen: Point,
}

/// Result of one tool callback.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ToolOutcome {
    pub effects: Effects,
    /// History label when the gesture finished an undoable edit.
    pub commit: Option<&'static str>,
}

impl ToolOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    fn effects(effects: Effects) -> Self {
        Self { effects, commit: None }
    }
}

/// Capabilities every tool provides. Event positions are in image space.
pub trait ToolBehavior {
    fn on_start(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome;
    fn on_move(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome;
    fn on_end(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome;
    fn cursor(&self) -> Cursor;
}

/// Tool instance for one interaction, built from the mode on pointer down.
#[derive(Clone, Debug, PartialEq)]
pub enum ActiveTool {
    Paint(PaintTool),
    Crop(CropTool),
    Transform(TransformTool),
    Pan(PanTool),
}

impl ActiveTool {
    pub fn for_mode(mode: ToolMode) -> Self {
        match mode {
            ToolMode::Brush => ActiveTool::Paint(PaintTool::new(PaintKind::Brush)),
            ToolMode::Eraser => ActiveTool::Paint(PaintTool::new(PaintKind::Eraser)),
            ToolMode::CloneStamp => ActiveTool::Paint(PaintTool::new(PaintKind::Clone)),
            ToolMode::Crop => ActiveTool::Crop(CropTool),
            ToolMode::Transform => ActiveTool::Transform(TransformTool),
            ToolMode::Pan => ActiveTool::Pan(PanTool::default()),
        }
    }

    fn behavior(&mut self) -> &mut dyn ToolBehavior {
        match self {
            ActiveTool::Paint(t) => t,
            ActiveTool::Crop(t) => t,
            ActiveTool::Transform(t) => t,
            ActiveTool::Pan(t) => t,
        }
    }
}

impl ToolBehavior for ActiveTool {
    fn on_start(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        self.behavior().on_start(ctx, event)
    }

    fn on_move(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        self.behavior().on_move(ctx, event)
    }

    fn on_end(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        self.behavior().on_end(ctx, event)
    }

    fn cursor(&self) -> Cursor {
        match self {
            ActiveTool::Paint(t) => t.cursor(),
            ActiveTool::Crop(t) => t.cursor(),
            ActiveTool::Transform(t) => t.cursor(),
            ActiveTool::Pan(t) => t.cursor(),
        }
    }
}

// ============================================================================
// PAINT (brush, eraser, clone stamp)
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaintKind {
    Brush,
    Eraser,
    Clone,
}

/// Drives a [`BrushEngine`] stroke on the active layer.
///
/// Clone stamp: alt + press sets the source point on the active layer
/// instead of painting. Pressing without a source does nothing.
#[derive(Clone, Debug, PartialEq)]
pub struct PaintTool {
    kind: PaintKind,
    layer: Option<LayerId>,
}

impl PaintTool {
    pub fn new(kind: PaintKind) -> Self {
        Self { kind, layer: None }
    }

    pub fn kind(&self) -> PaintKind {
        self.kind
    }

    fn local(stack: &LayerStack, layer: LayerId, p: Point) -> Option<Point> {
        stack.layer(layer).map(|l| l.canvas_to_local(p))
    }
}

impl ToolBehavior for PaintTool {
    fn on_start(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        let Some(layer) = ctx.stack.active() else {
            debug!("paint: no active layer");
            return ToolOutcome::none();
        };
        let Some(local) = Self::local(ctx.stack, layer, event.position) else {
            return ToolOutcome::none();
        };

        let stroke_kind = match self.kind {
            PaintKind::Brush => StrokeKind::Paint,
            PaintKind::Eraser => StrokeKind::Erase,
            PaintKind::Clone if event.alt => {
                *ctx.clone_source = Some(CloneSource { layer, point: local });
                return ToolOutcome::effects(Effects::none().with_cursor(Cursor::Crosshair));
            }
            PaintKind::Clone => match *ctx.clone_source {
                Some(source) => StrokeKind::Clone(source),
                None => {
                    return ToolOutcome::effects(Effects::none().with_cursor(Cursor::NotAllowed));
                }
            },
        };

        let placed = ctx
            .brush
            .begin_stroke(ctx.stack, layer, stroke_kind, local, event.pressure);
        if placed == 0 {
            return ToolOutcome::none();
        }
        self.layer = Some(layer);
        ToolOutcome::effects(Effects::render())
    }

    fn on_move(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        let Some(layer) = self.layer else {
            return ToolOutcome::none();
        };
        let Some(local) = Self::local(ctx.stack, layer, event.position) else {
            return ToolOutcome::none();
        };
        if ctx.brush.continue_stroke(ctx.stack, local, event.pressure) > 0 {
            ToolOutcome::effects(Effects::render())
        } else {
            ToolOutcome::none()
        }
    }

    fn on_end(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        if self.layer.is_none() {
            return ToolOutcome::none();
        }
        let moved = self.on_move(ctx, event);
        self.layer = None;
        match ctx.brush.end_stroke() {
            Some(summary) if summary.dabs > 0 => ToolOutcome {
                effects: Effects {
                    committed: true,
                    ..moved.effects.merge(Effects::render())
                },
                commit: Some(summary.kind.label()),
            },
            _ => moved,
        }
    }

    fn cursor(&self) -> Cursor {
        Cursor::Crosshair
    }
}

// ============================================================================
// CROP / TRANSFORM / PAN
// ============================================================================

/// Forwards events to the document's [`CropSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CropTool;

impl CropTool {
    fn forward(ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        let scale = ctx.view.effective_scale();
        ToolOutcome::effects(ctx.crop.handle_event(event, scale))
    }
}

impl ToolBehavior for CropTool {
    fn on_start(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        Self::forward(ctx, event)
    }

    fn on_move(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        Self::forward(ctx, event)
    }

    fn on_end(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        Self::forward(ctx, event)
    }

    fn cursor(&self) -> Cursor {
        Cursor::Crosshair
    }
}

/// Starts a [`TransformSession`] on first press (selected layers, else the
/// active layer) and forwards events to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TransformTool;

impl TransformTool {
    fn forward(ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        let scale = ctx.view.effective_scale();
        match ctx.transform.as_mut() {
            Some(session) => ToolOutcome::effects(session.handle_event(event, scale)),
            None => ToolOutcome::none(),
        }
    }
}

impl ToolBehavior for TransformTool {
    fn on_start(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        if ctx.transform.as_ref().is_none_or(|s| !s.is_active()) {
            let selected = ctx.stack.selected().to_vec();
            let (ids, from_selection) = if selected.is_empty() {
                (ctx.stack.active().into_iter().collect::<Vec<_>>(), false)
            } else {
                (selected, true)
            };
            *ctx.transform = TransformSession::start(ctx.stack, &ids, from_selection);
            if ctx.transform.is_none() {
                debug!("transform: nothing to transform");
                return ToolOutcome::effects(Effects::none().with_cursor(Cursor::NotAllowed));
            }
        }
        Self::forward(ctx, event)
    }

    fn on_move(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        Self::forward(ctx, event)
    }

    fn on_end(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        Self::forward(ctx, event)
    }

    fn cursor(&self) -> Cursor {
        Cursor::Move
    }
}

/// Drags the view. Works in screen space since the image mapping moves
/// with the pan.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct PanTool {
    start: Option<(Point, Vec2)>,
}

impl ToolBehavior for PanTool {
    fn on_start(&mut self, ctx: &mut ToolContext<'_>, _event: &PointerEvent) -> ToolOutcome {
        self.start = Some((ctx.screen, ctx.view.pan));
        ToolOutcome::effects(Effects::none().with_cursor(Cursor::Grabbing))
    }

    fn on_move(&mut self, ctx: &mut ToolContext<'_>, _event: &PointerEvent) -> ToolOutcome {
        let Some((screen, pan)) = self.start else {
            return ToolOutcome::effects(Effects::none().with_cursor(Cursor::Grab));
        };
        ctx.view.pan = pan + (ctx.screen - screen);
        ToolOutcome::effects(Effects::render().with_cursor(Cursor::Grabbing))
    }

    fn on_end(&mut self, ctx: &mut ToolContext<'_>, event: &PointerEvent) -> ToolOutcome {
        let out = self.on_move(ctx, event);
        self.start = None;
        ToolOutcome::effects(out.effects.with_cursor(Cursor::Grab))
    }

    fn cursor(&self) -> Cursor {
        if self.start.is_some() { Cursor::Grabbing } else { Cursor::Grab }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use kurbo::Size;

    struct Fixture {
        stack: LayerStack,
        brush: BrushEngine,
        crop: CropSession,
        transform: Option<TransformSession>,
        view: ViewTransform,
        clone_source: Option<CloneSource>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                stack: LayerStack::with_background(64, 64, Rgba([255, 255, 255, 255])),
                brush: BrushEngine::default(),
                crop: CropSession::new(Size::new(64.0, 64.0)),
                transform: None,
                view: ViewTransform::new(Size::new(64.0, 64.0)),
                clone_source: None,
            }
        }

        fn ctx(&mut self, screen: Point) -> ToolContext<'_> {
            ToolContext {
                stack: &mut self.stack,
                brush: &mut self.brush,
                crop: &mut self.crop,
                transform: &mut self.transform,
                view: &mut self.view,
                clone_source: &mut self.clone_source,
                screen,
            }
        }
    }

    #[test]
    fn brush_stroke_commits_once_at_end() {
        let mut fx = Fixture::new();
        let mut tool = ActiveTool::for_mode(ToolMode::Brush);
        let p = Point::new(10.0, 10.0);
        let start = tool.on_start(&mut fx.ctx(p), &PointerEvent::down(10.0, 10.0));
        assert!(start.effects.request_render);
        assert_eq!(start.commit, None);
        let mv = tool.on_move(&mut fx.ctx(p), &PointerEvent::moved(30.0, 10.0));
        assert_eq!(mv.commit, None);
        let end = tool.on_end(&mut fx.ctx(p), &PointerEvent::up(30.0, 10.0));
        assert_eq!(end.commit, Some("Brush Stroke"));
        assert!(end.effects.committed);
        let id = fx.stack.layers()[0].id;
        assert_eq!(*fx.stack.layer(id).unwrap().pixels.get_pixel(20, 10), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn clone_needs_a_source() {
        let mut fx = Fixture::new();
        let mut tool = ActiveTool::for_mode(ToolMode::CloneStamp);
        let out = tool.on_start(&mut fx.ctx(Point::ZERO), &PointerEvent::down(5.0, 5.0));
        assert_eq!(out.effects.cursor, Some(Cursor::NotAllowed));

        let mut alt = PointerEvent::down(8.0, 9.0);
        alt.alt = true;
        tool.on_start(&mut fx.ctx(Point::ZERO), &alt);
        let source = fx.clone_source.unwrap();
        assert_eq!(source.point, Point::new(8.0, 9.0));
        let end = tool.on_end(&mut fx.ctx(Point::ZERO), &PointerEvent::up(8.0, 9.0));
        assert_eq!(end.commit, None);
    }

    #[test]
    fn transform_tool_starts_session_on_active_layer() {
        let mut fx = Fixture::new();
        let mut tool = ActiveTool::for_mode(ToolMode::Transform);
        tool.on_start(&mut fx.ctx(Point::ZERO), &PointerEvent::down(32.0, 32.0));
        tool.on_move(&mut fx.ctx(Point::ZERO), &PointerEvent::moved(40.0, 32.0));
        tool.on_end(&mut fx.ctx(Point::ZERO), &PointerEvent::up(40.0, 32.0));
        let session = fx.transform.as_ref().unwrap();
        assert!(!session.is_selection_based());
        assert_eq!(session.translation(), Vec2::new(8.0, 0.0));
    }

    #[test]
    fn pan_follows_screen_delta() {
        let mut fx = Fixture::new();
        let mut tool = ActiveTool::for_mode(ToolMode::Pan);
        let ev = PointerEvent::down(0.0, 0.0);
        tool.on_start(&mut fx.ctx(Point::new(100.0, 100.0)), &ev);
        assert_eq!(tool.cursor(), Cursor::Grabbing);
        tool.on_move(&mut fx.ctx(Point::new(130.0, 90.0)), &ev);
        assert_eq!(fx.view.pan, Vec2::new(30.0, -10.0));
        tool.on_end(&mut fx.ctx(Point::new(130.0, 90.0)), &ev);
        assert_eq!(tool.cursor(), Cursor::Grab);
    }
}

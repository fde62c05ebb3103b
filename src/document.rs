use std::fmt;

use image::{Rgba, RgbaImage};
use kurbo::{Affine, Point, Rect, Size, Vec2};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::brush::{BrushEngine, CloneSource};
use crate::canvas::{BlendMode, TiledImage};
use crate::compositor::Compositor;
use crate::error::{EditorError, EditorResult};
use crate::history::{HistoryManager, HistorySnapshot};
use crate::io::DocumentFile;
use crate::layer::LayerId;
use crate::layers::LayerStack;
use crate::mask::AlphaMask;
use crate::session::{CropSession, Effects, PointerEvent, PointerPhase, TransformSession};
use crate::settings::EditorSettings;
use crate::tools::{ActiveTool, ToolBehavior, ToolContext, ToolMode};
use crate::viewport::ViewTransform;

// ============================================================================
// REQUESTS & DECISIONS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolRequest {
    Switched,
    /// A transform is pending; call [`Document::resolve_pending`].
    NeedsDecision,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryRequest {
    Applied,
    /// Nothing to undo or redo.
    Boundary,
    /// A transform is pending; call [`Document::resolve_pending`].
    NeedsDecision,
}

/// Answer to a pending-transform decision point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingDecision {
    /// Rasterize the transform, then carry out the deferred action.
    Apply,
    /// Restore the original layers, then carry out the deferred action.
    Discard,
    /// Keep transforming; the deferred action is dropped.
    Cancel,
}

/// Action deferred until the pending transform is resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingAction {
    SwitchTool(ToolMode),
    Undo,
    Redo,
}

// ============================================================================
// ASYNC COLLABORATORS
// ============================================================================

/// Captured when an off-thread job starts. The result is only applied if the
/// layer still exists at the same generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AsyncTicket {
    pub layer: LayerId,
    pub generation: u64,
}

/// Full replacement for one layer, produced outside the core.
#[derive(Clone, Debug)]
pub struct CollaboratorResult {
    pub label: String,
    pub pixels: RgbaImage,
    /// `None` leaves the layer without a mask.
    pub mask: Option<AlphaMask>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsyncOutcome {
    Applied,
    /// The layer was deleted or edited since the ticket was issued.
    Stale,
    Failed(String),
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// One open image and all of its editing state.
pub struct Document {
    pub id: Uuid,
    pub name: String,
    pub is_dirty: bool,
    width: u32,
    height: u32,
    /// Degrees clockwise, one of 0/90/180/270.
    rotation: u32,
    stack: LayerStack,
    history: HistoryManager,
    pub brush: BrushEngine,
    compositor: Compositor,
    pub view: ViewTransform,
    settings: EditorSettings,
    tool: ToolMode,
    active_tool: Option<ActiveTool>,
    crop: CropSession,
    transform: Option<TransformSession>,
    clone_source: Option<CloneSource>,
    pending: Option<PendingAction>,
    render_hook: Option<Box<dyn FnMut()>>,
    render_requests: u64,
    status: Option<String>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &(self.width, self.height))
            .field("rotation", &self.rotation)
            .field("layers", &self.stack.len())
            .field("history", &self.history.len())
            .field("tool", &self.tool)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Document {
    /// New document with one white background layer.
    pub fn new(width: u32, height: u32, settings: EditorSettings) -> Self {
        let stack = LayerStack::with_background(width, height, Rgba([255, 255, 255, 255]));
        Self::from_stack(stack, width, height, 0, settings, "New Document")
    }

    fn from_stack(
        stack: LayerStack,
        width: u32,
        height: u32,
        rotation: u32,
        settings: EditorSettings,
        base_label: &str,
    ) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let size = Size::new(width as f64, height as f64);

        let mut crop = CropSession::new(size);
        crop.min_size = settings.crop_min_size;
        crop.hit_radius = settings.handle_hit_radius;

        let mut history = HistoryManager::new(settings.max_history)
            .with_memory_limit(settings.max_history_memory_bytes());
        history.push(HistorySnapshot::capture(base_label, &stack, width, height, rotation));

        info!(width, height, layers = stack.len(), "document opened");
        Self {
            id: Uuid::new_v4(),
            name: "Untitled".to_string(),
            is_dirty: false,
            width,
            height,
            rotation,
            stack,
            history,
            brush: BrushEngine::new(settings.brush, settings.pressure),
            compositor: Compositor::new(),
            view: ViewTransform::new(size),
            settings,
            tool: ToolMode::default(),
            active_tool: None,
            crop,
            transform: None,
            clone_source: None,
            pending: None,
            render_hook: None,
            render_requests: 0,
            status: None,
        }
    }

    // ---- queries --------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn canvas_size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }

    pub fn rotation(&self) -> u32 {
        self.rotation
    }

    pub fn stack(&self) -> &LayerStack {
        &self.stack
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn tool(&self) -> ToolMode {
        self.tool
    }

    pub fn crop(&self) -> &CropSession {
        &self.crop
    }

    pub fn crop_mut(&mut self) -> &mut CropSession {
        &mut self.crop
    }

    pub fn transform(&self) -> Option<&TransformSession> {
        self.transform.as_ref()
    }

    pub fn has_pending_transform(&self) -> bool {
        self.transform.as_ref().is_some_and(TransformSession::is_active)
    }

    pub fn pending_action(&self) -> Option<PendingAction> {
        self.pending
    }

    pub fn clone_source(&self) -> Option<CloneSource> {
        self.clone_source
    }

    pub fn set_clone_source(&mut self, source: Option<CloneSource>) {
        self.clone_source = source;
    }

    /// Last status message from a failed or refused operation.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ---- render hook ------------------------------------------------------------

    pub fn set_render_hook(&mut self, hook: Box<dyn FnMut()>) {
        self.render_hook = Some(hook);
    }

    /// Number of render requests issued so far.
    pub fn render_requests(&self) -> u64 {
        self.render_requests
    }

    fn request_render(&mut self) {
        self.render_requests += 1;
        if let Some(hook) = self.render_hook.as_mut() {
            hook();
        }
    }

    /// Composite of all visible layers, including a live transform preview.
    pub fn render(&mut self) -> RgbaImage {
        match self.transform.as_ref().filter(|t| t.is_active()) {
            Some(session) => {
                let preview = session.preview();
                self.compositor
                    .render_with_preview(&self.stack, self.width, self.height, &preview)
            }
            None => self.compositor.render(&self.stack, self.width, self.height),
        }
    }

    // ---- history --------------------------------------------------------------

    fn commit(&mut self, label: &str) {
        self.history.push(HistorySnapshot::capture(
            label,
            &self.stack,
            self.width,
            self.height,
            self.rotation,
        ));
        self.is_dirty = true;
    }

    fn apply_snapshot(&mut self, snapshot: &HistorySnapshot) {
        snapshot.restore_into(&mut self.stack);
        self.width = snapshot.canvas_width;
        self.height = snapshot.canvas_height;
        self.rotation = snapshot.canvas_rotation;
        self.sync_canvas_size();
        self.is_dirty = true;
    }

    fn sync_canvas_size(&mut self) {
        let size = self.canvas_size();
        self.view.image_size = size;
        self.crop.set_canvas(size);
        self.crop.cancel();
    }

    pub fn undo(&mut self) -> HistoryRequest {
        if self.has_pending_transform() {
            self.pending = Some(PendingAction::Undo);
            return HistoryRequest::NeedsDecision;
        }
        self.finish_interaction();
        match self.history.undo() {
            Some(snapshot) => {
                debug!(label = %snapshot.label, "undo");
                self.apply_snapshot(&snapshot);
                self.request_render();
                HistoryRequest::Applied
            }
            None => HistoryRequest::Boundary,
        }
    }

    pub fn redo(&mut self) -> HistoryRequest {
        if self.has_pending_transform() {
            self.pending = Some(PendingAction::Redo);
            return HistoryRequest::NeedsDecision;
        }
        self.finish_interaction();
        match self.history.redo() {
            Some(snapshot) => {
                debug!(label = %snapshot.label, "redo");
                self.apply_snapshot(&snapshot);
                self.request_render();
                HistoryRequest::Applied
            }
            None => HistoryRequest::Boundary,
        }
    }

    /// Drop a half-finished gesture; a running stroke is committed first.
    fn finish_interaction(&mut self) {
        self.active_tool = None;
        if let Some(summary) = self.brush.end_stroke()
            && summary.dabs > 0
        {
            self.commit(summary.kind.label());
        }
    }

    // ---- tools ------------------------------------------------------------------

    /// Switch tools. While a transform is pending the switch is deferred
    /// until [`resolve_pending`](Self::resolve_pending) is called.
    pub fn request_tool(&mut self, mode: ToolMode) -> ToolRequest {
        if mode == self.tool {
            return ToolRequest::Switched;
        }
        if self.has_pending_transform() {
            self.pending = Some(PendingAction::SwitchTool(mode));
            return ToolRequest::NeedsDecision;
        }
        self.switch_tool(mode);
        ToolRequest::Switched
    }

    fn switch_tool(&mut self, mode: ToolMode) {
        self.finish_interaction();
        if self.tool == ToolMode::Crop && self.crop.crop_area().is_some() {
            self.crop.cancel();
            self.request_render();
        }
        debug!(from = ?self.tool, to = ?mode, "tool switched");
        self.tool = mode;
    }

    /// Settle the pending transform. Returns the action that was carried out,
    /// if any.
    pub fn resolve_pending(&mut self, decision: PendingDecision) -> Option<PendingAction> {
        let action = self.pending.take()?;
        match decision {
            PendingDecision::Cancel => return None,
            PendingDecision::Apply => {
                self.apply_transform();
            }
            PendingDecision::Discard => {
                self.cancel_transform();
            }
        }
        match action {
            PendingAction::SwitchTool(mode) => self.switch_tool(mode),
            PendingAction::Undo => {
                self.undo();
            }
            PendingAction::Redo => {
                self.redo();
            }
        }
        Some(action)
    }

    /// Feed one pointer event in viewport coordinates. `rect_origin` is the
    /// viewport's top-left on screen.
    pub fn handle_pointer(&mut self, event: PointerEvent, rect_origin: Point) -> Effects {
        let screen = event.position;
        // Paint would land on layers the pending transform can still restore,
        // so their input drives the transform session instead.
        let mode = match self.tool {
            ToolMode::Brush | ToolMode::Eraser | ToolMode::CloneStamp if self.has_pending_transform() => {
                ToolMode::Transform
            }
            mode => mode,
        };
        let image = match mode {
            ToolMode::Brush | ToolMode::Eraser | ToolMode::CloneStamp => {
                self.view.screen_to_image_precise(screen, rect_origin)
            }
            _ => self.view.screen_to_image(screen, rect_origin),
        };
        let event = PointerEvent { position: image, ..event };

        if event.phase == PointerPhase::Down {
            self.finish_interaction();
        }
        // Moves without a gesture in progress are hover updates.
        let (mut tool, gesture) = match (event.phase, self.active_tool.take()) {
            (PointerPhase::Down, _) => (ActiveTool::for_mode(mode), true),
            (_, Some(tool)) => (tool, true),
            (PointerPhase::Move, None) => (ActiveTool::for_mode(mode), false),
            (PointerPhase::Up, None) => return Effects::none(),
        };

        let mut ctx = ToolContext {
            stack: &mut self.stack,
            brush: &mut self.brush,
            crop: &mut self.crop,
            transform: &mut self.transform,
            view: &mut self.view,
            clone_source: &mut self.clone_source,
            screen,
        };
        let outcome = match event.phase {
            PointerPhase::Down => tool.on_start(&mut ctx, &event),
            PointerPhase::Move => tool.on_move(&mut ctx, &event),
            PointerPhase::Up => tool.on_end(&mut ctx, &event),
        };
        let cursor = tool.cursor();
        if gesture && event.phase != PointerPhase::Up {
            self.active_tool = Some(tool);
        }

        if let Some(label) = outcome.commit {
            self.commit(label);
        }
        if outcome.effects.request_render {
            self.request_render();
        }
        Effects {
            cursor: outcome.effects.cursor.or(Some(cursor)),
            ..outcome.effects
        }
    }

    // ---- crop -----------------------------------------------------------------

    /// Crop every layer to the current crop rectangle. Returns false when
    /// there is no crop area.
    pub fn apply_crop(&mut self) -> bool {
        if self.has_pending_transform() {
            self.status = Some(EditorError::PendingTransform.to_string());
            return false;
        }
        let Some(area) = self.crop.crop_area() else {
            return false;
        };
        let x0 = area.x0.round() as i64;
        let y0 = area.y0.round() as i64;
        let w = (area.x1.round() as i64 - x0).max(0) as u32;
        let h = (area.y1.round() as i64 - y0).max(0) as u32;
        if w == 0 || h == 0 {
            self.crop.cancel();
            return false;
        }

        let origin = Vec2::new(x0 as f64, y0 as f64);
        let (layers, masks) = self.stack.layers_and_masks_mut();
        for layer in layers.iter_mut() {
            if layer.is_axis_aligned_unscaled() {
                let lx = x0 - layer.position.x as i64;
                let ly = y0 - layer.position.y as i64;
                layer.pixels = layer.pixels.crop(lx, ly, w, h);
                if let Some(mask) = masks.get_mask_mut(layer.id) {
                    *mask = mask.cropped(lx, ly, w, h);
                }
                layer.position = Point::ZERO;
            } else {
                layer.position -= origin;
            }
            layer.touch();
        }

        info!(x = x0, y = y0, width = w, height = h, "crop applied");
        self.width = w;
        self.height = h;
        self.sync_canvas_size();
        self.commit("Crop");
        self.request_render();
        true
    }

    pub fn cancel_crop(&mut self) -> Effects {
        let fx = self.crop.cancel();
        if fx.request_render {
            self.request_render();
        }
        fx
    }

    // ---- transform --------------------------------------------------------------

    /// Start a transform of `ids` without a pointer gesture.
    pub fn start_transform(&mut self, ids: &[LayerId]) -> EditorResult<()> {
        if self.has_pending_transform() {
            return Err(EditorError::PendingTransform);
        }
        self.finish_interaction();
        self.transform = TransformSession::start(&self.stack, ids, ids.len() > 1);
        if self.transform.is_none() {
            return Err(EditorError::geometry("no transformable layer"));
        }
        Ok(())
    }

    pub fn transform_mut(&mut self) -> Option<&mut TransformSession> {
        self.transform.as_mut()
    }

    /// Rasterize the session's affine into its layers and push one snapshot.
    /// Returns false when no transform is active.
    pub fn apply_transform(&mut self) -> bool {
        let Some(session) = self.transform.take() else {
            return false;
        };
        self.active_tool = None;
        if session.is_identity() {
            self.request_render();
            return true;
        }

        let extra = session.affine();
        for &id in session.layers() {
            self.bake_layer_affine(id, extra);
        }
        info!(layers = session.layers().len(), "transform applied");
        self.commit("Transform");
        self.request_render();
        true
    }

    /// Resample one layer through `extra` into a fresh axis-aligned buffer.
    /// Opacity and blend mode are kept as layer properties; the mask is baked.
    fn bake_layer_affine(&mut self, id: LayerId, extra: Affine) {
        let Some(layer) = self.stack.layer(id) else {
            warn!(layer = %id, "transform target vanished");
            return;
        };
        let (w, h) = layer.original_size();
        let to_canvas = extra * layer.canvas_affine();
        let bounds = to_canvas.transform_rect_bbox(Rect::new(0.0, 0.0, w as f64, h as f64));
        let origin = Point::new(bounds.x0.floor(), bounds.y0.floor());
        let out_w = (bounds.x1.ceil() - origin.x).max(1.0) as u32;
        let out_h = (bounds.y1.ceil() - origin.y).max(1.0) as u32;

        let mut flat = layer.clone();
        flat.visible = true;
        flat.opacity = 100;
        flat.blend_mode = BlendMode::Normal;
        let mut out = RgbaImage::new(out_w, out_h);
        self.compositor
            .draw_layer(&mut out, origin, &flat, self.stack.masks().get_mask(id), Some(extra));

        if let Some(layer) = self.stack.layer_mut(id) {
            layer.pixels = TiledImage::from_rgba_image(&out);
            layer.position = origin;
            layer.scale = Vec2::new(1.0, 1.0);
            layer.rotation = 0.0;
            layer.touch();
        }
        self.stack.masks_mut().clear_mask(id);
    }

    /// Throw the session away, putting back the layers captured at its start.
    pub fn cancel_transform(&mut self) -> Effects {
        let Some(session) = self.transform.take() else {
            return Effects::none();
        };
        self.active_tool = None;
        for original in session.originals() {
            if let Some(layer) = self.stack.layer_mut(original.id) {
                let z_index = layer.z_index;
                *layer = original.clone();
                layer.z_index = z_index;
            }
        }
        for (id, mask) in session.original_masks() {
            match mask {
                Some(mask) => self.stack.masks_mut().insert(*id, mask.clone()),
                None => {
                    self.stack.masks_mut().clear_mask(*id);
                }
            }
        }
        debug!("transform cancelled");
        self.request_render();
        Effects {
            discarded: true,
            ..Effects::render()
        }
    }

    // ---- canvas & layer edits ----------------------------------------------------

    /// Rotate the canvas clockwise by `quarter_turns × 90°`, carrying every
    /// layer (buffer, mask and placement) along.
    pub fn rotate_canvas(&mut self, quarter_turns: i32) -> EditorResult<()> {
        if self.has_pending_transform() {
            return Err(EditorError::PendingTransform);
        }
        let turns = quarter_turns.rem_euclid(4) as u32;
        if turns == 0 {
            return Ok(());
        }
        let (cw, ch) = (self.width as f64, self.height as f64);

        let (layers, masks) = self.stack.layers_and_masks_mut();
        for layer in layers.iter_mut() {
            let (w, h) = layer.original_size();
            let bw = w as f64 * layer.scale.x;
            let bh = h as f64 * layer.scale.y;
            let (px, py) = (layer.position.x, layer.position.y);
            layer.position = match turns {
                1 => Point::new(ch - (py + bh), px),
                2 => Point::new(cw - (px + bw), ch - (py + bh)),
                _ => Point::new(py, cw - (px + bw)),
            };
            if turns % 2 == 1 {
                layer.scale = Vec2::new(layer.scale.y, layer.scale.x);
            }
            layer.pixels = layer.pixels.rotated_quarter(turns);
            masks.rotate_mask(layer.id, 90 * turns as i32);
            layer.touch();
        }

        if turns % 2 == 1 {
            std::mem::swap(&mut self.width, &mut self.height);
        }
        self.rotation = (self.rotation + 90 * turns) % 360;
        self.sync_canvas_size();
        self.commit("Rotate Canvas");
        self.request_render();
        Ok(())
    }

    pub fn resize_layer(&mut self, id: LayerId, width: u32, height: u32) -> EditorResult<()> {
        self.edit_layers("Resize Layer", |stack, _| stack.resize_layer(id, width, height))
    }

    /// Drop a layer's mask, revealing everything that was erased. Returns
    /// false when the layer had no mask.
    pub fn clear_layer_alpha_mask(&mut self, id: LayerId) -> bool {
        if !self.stack.masks_mut().clear_mask(id) {
            return false;
        }
        if let Some(layer) = self.stack.layer_mut(id) {
            layer.touch();
        }
        self.commit("Clear Alpha Mask");
        self.request_render();
        true
    }

    /// Run one structural edit and record it as a single undo step. Nothing
    /// is recorded when `edit` fails.
    pub fn edit_layers<R>(
        &mut self,
        label: &str,
        edit: impl FnOnce(&mut LayerStack, &mut Compositor) -> EditorResult<R>,
    ) -> EditorResult<R> {
        if self.has_pending_transform() {
            return Err(EditorError::PendingTransform);
        }
        self.finish_interaction();
        match edit(&mut self.stack, &mut self.compositor) {
            Ok(value) => {
                self.commit(label);
                self.request_render();
                Ok(value)
            }
            Err(e) => {
                self.status = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn add_layer(&mut self, name: &str) -> EditorResult<LayerId> {
        let (w, h) = (self.width, self.height);
        self.edit_layers("New Layer", |stack, _| Ok(stack.add_layer(name, w, h)))
    }

    pub fn delete_layer(&mut self, id: LayerId) -> EditorResult<()> {
        self.edit_layers("Delete Layer", |stack, _| stack.delete_layer(id).map(|_| ()))
    }

    pub fn duplicate_layer(&mut self, id: LayerId) -> EditorResult<LayerId> {
        self.edit_layers("Duplicate Layer", |stack, _| stack.duplicate_layer(id))
    }

    pub fn merge_down(&mut self, id: LayerId) -> EditorResult<LayerId> {
        self.edit_layers("Merge Down", |stack, comp| stack.merge_down(id, comp))
    }

    pub fn flatten(&mut self) -> EditorResult<LayerId> {
        let (w, h) = (self.width, self.height);
        self.edit_layers("Flatten", |stack, comp| Ok(stack.flatten(comp, w, h)))
    }

    // ---- async collaborators -----------------------------------------------------

    pub fn begin_async(&self, layer: LayerId) -> Option<AsyncTicket> {
        self.stack.layer(layer).map(|l| AsyncTicket {
            layer,
            generation: l.generation,
        })
    }

    /// Apply an off-thread result atomically with one history push, unless
    /// the layer changed in the meantime. Failures leave the stack untouched.
    pub fn apply_async_result(
        &mut self,
        ticket: AsyncTicket,
        result: Result<CollaboratorResult, String>,
    ) -> AsyncOutcome {
        let result = match result {
            Ok(result) => result,
            Err(status) => {
                warn!(layer = %ticket.layer, "collaborator failed: {status}");
                self.status = Some(status.clone());
                return AsyncOutcome::Failed(status);
            }
        };

        let in_transform = self
            .transform
            .as_ref()
            .is_some_and(|t| t.layers().contains(&ticket.layer));
        let current = self.stack.layer(ticket.layer).map(|l| l.generation);
        if in_transform || current != Some(ticket.generation) {
            debug!(layer = %ticket.layer, "stale collaborator result dropped");
            return AsyncOutcome::Stale;
        }

        let (w, h) = result.pixels.dimensions();
        if w == 0 || h == 0 {
            let status = "collaborator returned an empty image".to_string();
            self.status = Some(status.clone());
            return AsyncOutcome::Failed(status);
        }

        if let Some(layer) = self.stack.layer_mut(ticket.layer) {
            layer.pixels = TiledImage::from_rgba_image(&result.pixels);
            layer.touch();
        }
        match result.mask {
            Some(mask) => {
                let mask = if (mask.width(), mask.height()) == (w, h) {
                    mask
                } else {
                    mask.resized(w, h)
                };
                self.stack.masks_mut().insert(ticket.layer, mask);
            }
            None => {
                self.stack.masks_mut().clear_mask(ticket.layer);
            }
        }
        self.commit(&result.label);
        self.request_render();
        AsyncOutcome::Applied
    }

    // ---- persistence -------------------------------------------------------------

    pub fn to_file_bytes(&self) -> EditorResult<Vec<u8>> {
        DocumentFile::from_stack(&self.stack, self.width, self.height, self.rotation)?.to_bytes()
    }

    pub fn from_file_bytes(raw: &[u8], settings: EditorSettings) -> EditorResult<Self> {
        let file = DocumentFile::from_bytes(raw)?;
        let (width, height, rotation) = (file.width, file.height, file.rotation);
        let stack = file.into_stack()?;
        Ok(Self::from_stack(stack, width, height, rotation, settings, "Open"))
    }
}

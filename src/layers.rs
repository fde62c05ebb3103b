use image::Rgba;
use kurbo::{Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::brush::StrokeTarget;
use crate::canvas::{BlendMode, TiledImage};
use crate::compositor::Compositor;
use crate::error::{EditorError, EditorResult};
use crate::layer::{next_generation, Layer, LayerId};
use crate::mask::AlphaMaskStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alignment {
    Left,
    HorizontalCenter,
    Right,
    Top,
    VerticalCenter,
    Bottom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributeAxis {
    Horizontal,
    Vertical,
}

/// Ordered layers, bottom first, plus their alpha masks and the
/// active/selected ids.
///
/// After every public call: `z_index` equals array index, `active` is a
/// member or `None`, and every selected id is a member.
#[derive(Clone, Debug, Default)]
pub struct LayerStack {
    layers: Vec<Layer>,
    masks: AlphaMaskStore,
    active: Option<LayerId>,
    selected: Vec<LayerId>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// One opaque (or transparent, if `color` has zero alpha) canvas-sized layer.
    pub fn with_background(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut stack = Self::new();
        stack.insert_layer(Layer::new_filled("Background", width, height, color), 0);
        stack
    }

    // ---- queries --------------------------------------------------------------

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn masks(&self) -> &AlphaMaskStore {
        &self.masks
    }

    pub fn masks_mut(&mut self) -> &mut AlphaMaskStore {
        &mut self.masks
    }

    /// Split borrow for operations that rewrite buffers and masks together.
    pub fn layers_and_masks_mut(&mut self) -> (&mut [Layer], &mut AlphaMaskStore) {
        (&mut self.layers, &mut self.masks)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn active(&self) -> Option<LayerId> {
        self.active
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active.and_then(|id| self.layer(id))
    }

    pub fn selected(&self) -> &[LayerId] {
        &self.selected
    }

    /// Paintable view of one layer. `None` for unknown or locked layers.
    pub fn stroke_target(&mut self, id: LayerId) -> Option<StrokeTarget<'_>> {
        let layer = self.layers.iter_mut().find(|l| l.id == id)?;
        if layer.locked {
            return None;
        }
        Some(StrokeTarget {
            layer: id,
            pixels: &mut layer.pixels,
            masks: &mut self.masks,
            generation: &mut layer.generation,
        })
    }

    fn require(&self, id: LayerId) -> EditorResult<usize> {
        self.index_of(id).ok_or(EditorError::LayerNotFound(id))
    }

    fn renumber(&mut self) {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.z_index = i;
        }
    }

    /// True when every structural invariant holds.
    pub fn invariants_hold(&self) -> bool {
        let z_ok = self.layers.iter().enumerate().all(|(i, l)| l.z_index == i);
        let active_ok = self.active.is_none_or(|id| self.index_of(id).is_some());
        let selected_ok = self.selected.iter().all(|id| self.index_of(*id).is_some());
        let masks_ok = self.masks.ids().all(|id| self.index_of(id).is_some());
        z_ok && active_ok && selected_ok && masks_ok
    }

    // ---- add / insert / delete ------------------------------------------------

    /// New transparent layer directly above the active one (or on top), made active.
    pub fn add_layer(&mut self, name: impl Into<String>, width: u32, height: u32) -> LayerId {
        let index = self
            .active
            .and_then(|id| self.index_of(id))
            .map_or(self.layers.len(), |i| i + 1);
        self.insert_layer(Layer::new(name, width, height), index)
    }

    /// Insert at `index` (clamped) and make it active.
    pub fn insert_layer(&mut self, layer: Layer, index: usize) -> LayerId {
        let id = layer.id;
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self.active = Some(id);
        self.renumber();
        id
    }

    /// Remove a layer and its mask. The last remaining layer cannot be deleted.
    pub fn delete_layer(&mut self, id: LayerId) -> EditorResult<Layer> {
        let index = self.require(id)?;
        if self.layers.len() <= 1 {
            return Err(EditorError::MinimumOneLayer);
        }
        let removed = self.layers.remove(index);
        self.masks.remove(id);
        self.selected.retain(|s| *s != id);
        if self.active == Some(id) {
            let fallback = index.min(self.layers.len() - 1);
            self.active = self.layers.get(fallback).map(|l| l.id);
        }
        self.renumber();
        debug!(layer = %id, "layer deleted");
        Ok(removed)
    }

    // ---- reorder --------------------------------------------------------------

    pub fn move_layer(&mut self, id: LayerId, to_index: usize) -> EditorResult<()> {
        let from = self.require(id)?;
        self.reorder(from, to_index)
    }

    /// Towards the top (paints later).
    pub fn move_up(&mut self, id: LayerId) -> EditorResult<()> {
        let from = self.require(id)?;
        self.reorder(from, from + 1)
    }

    pub fn move_down(&mut self, id: LayerId) -> EditorResult<()> {
        let from = self.require(id)?;
        self.reorder(from, from.saturating_sub(1))
    }

    pub fn reorder(&mut self, from: usize, to: usize) -> EditorResult<()> {
        if from >= self.layers.len() {
            return Err(EditorError::geometry(format!("layer index {from} out of range")));
        }
        let to = to.min(self.layers.len() - 1);
        if from != to {
            let layer = self.layers.remove(from);
            self.layers.insert(to, layer);
            self.renumber();
        }
        Ok(())
    }

    // ---- merge / duplicate / flatten ------------------------------------------

    /// Composite `id` onto the layer below it and remove `id`.
    ///
    /// The lower layer's new buffer covers the union of both canvas bounds,
    /// has an identity transform, and has its mask baked in.
    pub fn merge_down(&mut self, id: LayerId, compositor: &mut Compositor) -> EditorResult<LayerId> {
        let index = self.require(id)?;
        if index == 0 {
            return Err(EditorError::NoLayerBelow(id));
        }
        let lower_id = self.layers[index - 1].id;
        if self.layers[index - 1].locked {
            return Err(EditorError::LayerLocked(lower_id));
        }

        let upper = &self.layers[index];
        let lower = &self.layers[index - 1];
        let union = lower.canvas_bounds().union(upper.canvas_bounds());
        let origin = Point::new(union.x0.floor(), union.y0.floor());
        let width = (union.x1.ceil() - origin.x).max(1.0) as u32;
        let height = (union.y1.ceil() - origin.y).max(1.0) as u32;

        // The lower layer keeps its own opacity and blend mode after merging.
        let mut base = lower.clone();
        base.visible = true;
        base.opacity = 100;
        base.blend_mode = BlendMode::Normal;

        // A hidden upper layer is still baked in rather than dropped.
        let mut top = upper.clone();
        top.visible = true;

        let mut merged = image::RgbaImage::new(width, height);
        compositor.draw_layer(&mut merged, origin, &base, self.masks.get_mask(lower_id), None);
        compositor.draw_layer(&mut merged, origin, &top, self.masks.get_mask(id), None);

        let lower = &mut self.layers[index - 1];
        lower.pixels = TiledImage::from_rgba_image(&merged);
        lower.position = origin;
        lower.scale = Vec2::new(1.0, 1.0);
        lower.rotation = 0.0;
        lower.touch();
        self.masks.clear_mask(lower_id);

        self.layers.remove(index);
        self.masks.remove(id);
        self.selected.retain(|s| *s != id);
        self.active = Some(lower_id);
        self.renumber();
        Ok(lower_id)
    }

    /// Deep copy (pixels + mask) inserted directly above, made active.
    pub fn duplicate_layer(&mut self, id: LayerId) -> EditorResult<LayerId> {
        let index = self.require(id)?;
        let mut dup = self.layers[index].clone();
        dup.id = LayerId::new();
        dup.name = format!("{} copy", dup.name);
        dup.generation = next_generation();
        let new_id = dup.id;
        self.masks.copy_mask(id, new_id);
        self.insert_layer(dup, index + 1);
        Ok(new_id)
    }

    /// Replace every layer with one canvas-sized layer holding the composite.
    pub fn flatten(&mut self, compositor: &mut Compositor, width: u32, height: u32) -> LayerId {
        let image = compositor.render(self, width, height);
        let mut layer = Layer::new("Flattened", width, height);
        layer.pixels = TiledImage::from_rgba_image(&image);
        self.layers.clear();
        self.masks = AlphaMaskStore::new();
        self.selected.clear();
        self.insert_layer(layer, 0)
    }

    // ---- selection ------------------------------------------------------------

    pub fn set_active(&mut self, id: LayerId) -> EditorResult<()> {
        self.require(id)?;
        self.active = Some(id);
        Ok(())
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Replace the selection with `id`.
    pub fn select(&mut self, id: LayerId) -> EditorResult<()> {
        self.require(id)?;
        self.selected = vec![id];
        Ok(())
    }

    pub fn toggle_selected(&mut self, id: LayerId) -> EditorResult<()> {
        self.require(id)?;
        if let Some(pos) = self.selected.iter().position(|s| *s == id) {
            self.selected.remove(pos);
        } else {
            self.selected.push(id);
        }
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    // ---- property setters -----------------------------------------------------

    fn with_layer(&mut self, id: LayerId, f: impl FnOnce(&mut Layer)) -> EditorResult<()> {
        let layer = self.layer_mut(id).ok_or(EditorError::LayerNotFound(id))?;
        f(layer);
        Ok(())
    }

    pub fn set_visible(&mut self, id: LayerId, visible: bool) -> EditorResult<()> {
        self.with_layer(id, |l| l.visible = visible)
    }

    pub fn set_locked(&mut self, id: LayerId, locked: bool) -> EditorResult<()> {
        self.with_layer(id, |l| l.locked = locked)
    }

    /// Clamped to 0–100.
    pub fn set_opacity(&mut self, id: LayerId, opacity: u8) -> EditorResult<()> {
        self.with_layer(id, |l| l.opacity = opacity.min(100))
    }

    pub fn set_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> EditorResult<()> {
        self.with_layer(id, |l| l.blend_mode = mode)
    }

    pub fn rename(&mut self, id: LayerId, name: impl Into<String>) -> EditorResult<()> {
        let name = name.into();
        self.with_layer(id, |l| l.name = name)
    }

    /// Resample a layer's buffer and mask together.
    pub fn resize_layer(&mut self, id: LayerId, width: u32, height: u32) -> EditorResult<()> {
        if width == 0 || height == 0 {
            return Err(EditorError::geometry(format!("cannot resize layer to {width}x{height}")));
        }
        let layer = self.layer_mut(id).ok_or(EditorError::LayerNotFound(id))?;
        if layer.locked {
            return Err(EditorError::LayerLocked(id));
        }
        layer.pixels = layer.pixels.resized(width, height);
        layer.touch();
        self.masks.resize_mask(id, width, height);
        Ok(())
    }

    // ---- align / distribute ---------------------------------------------------

    /// Selected, unlocked layers in stack order (falls back to the active layer).
    fn arrange_targets(&self) -> Vec<LayerId> {
        let ids: Vec<LayerId> = if self.selected.is_empty() {
            self.active.into_iter().collect()
        } else {
            self.layers
                .iter()
                .filter(|l| self.selected.contains(&l.id))
                .map(|l| l.id)
                .collect()
        };
        ids.into_iter()
            .filter(|id| self.layer(*id).is_some_and(|l| !l.locked))
            .collect()
    }

    /// Align the selected layers to the union of their bounds, or to the
    /// canvas when fewer than two layers are selected.
    pub fn align(&mut self, alignment: Alignment, canvas: Size) {
        let targets = self.arrange_targets();
        if targets.is_empty() {
            return;
        }
        let reference = if targets.len() < 2 {
            canvas.to_rect()
        } else {
            targets
                .iter()
                .filter_map(|id| self.layer(*id))
                .map(Layer::canvas_bounds)
                .reduce(|a, b| a.union(b))
                .unwrap_or_else(|| canvas.to_rect())
        };

        for id in targets {
            let Some(layer) = self.layer_mut(id) else { continue };
            let b = layer.canvas_bounds();
            let delta = match alignment {
                Alignment::Left => Vec2::new(reference.x0 - b.x0, 0.0),
                Alignment::Right => Vec2::new(reference.x1 - b.x1, 0.0),
                Alignment::HorizontalCenter => Vec2::new(reference.center().x - b.center().x, 0.0),
                Alignment::Top => Vec2::new(0.0, reference.y0 - b.y0),
                Alignment::Bottom => Vec2::new(0.0, reference.y1 - b.y1),
                Alignment::VerticalCenter => Vec2::new(0.0, reference.center().y - b.center().y),
            };
            if delta != Vec2::ZERO {
                layer.position += delta;
                layer.touch();
            }
        }
    }

    /// Equalise the gaps between three or more selected layers; the outermost
    /// two stay put.
    pub fn distribute(&mut self, axis: DistributeAxis) -> EditorResult<()> {
        let targets = self.arrange_targets();
        if targets.len() < 3 {
            return Err(EditorError::geometry("distribute needs at least three layers"));
        }
        let mut boxes: Vec<(LayerId, Rect)> = targets
            .iter()
            .filter_map(|id| self.layer(*id).map(|l| (*id, l.canvas_bounds())))
            .collect();
        let lead = |r: &Rect| match axis {
            DistributeAxis::Horizontal => r.x0,
            DistributeAxis::Vertical => r.y0,
        };
        let extent = |r: &Rect| match axis {
            DistributeAxis::Horizontal => r.width(),
            DistributeAxis::Vertical => r.height(),
        };
        boxes.sort_by(|a, b| lead(&a.1).total_cmp(&lead(&b.1)));

        let (Some(first), Some(last)) = (boxes.first(), boxes.last()) else {
            return Ok(());
        };
        let start = lead(&first.1);
        let end = lead(&last.1) + extent(&last.1);
        let total: f64 = boxes.iter().map(|(_, r)| extent(r)).sum();
        let gap = (end - start - total) / (boxes.len() - 1) as f64;

        let mut cursor = start;
        for (id, rect) in boxes {
            let shift = cursor - lead(&rect);
            if let Some(layer) = self.layer_mut(id)
                && shift != 0.0
            {
                layer.position += match axis {
                    DistributeAxis::Horizontal => Vec2::new(shift, 0.0),
                    DistributeAxis::Vertical => Vec2::new(0.0, shift),
                };
                layer.touch();
            }
            cursor += extent(&rect) + gap;
        }
        Ok(())
    }

    // ---- snapshot support -----------------------------------------------------

    /// Replace the whole state, repairing ids that no longer exist.
    pub fn restore(
        &mut self,
        layers: Vec<Layer>,
        masks: AlphaMaskStore,
        active: Option<LayerId>,
        selected: Vec<LayerId>,
    ) {
        self.layers = layers;
        self.masks = masks;
        self.renumber();
        let alive: Vec<LayerId> = self.layers.iter().map(|l| l.id).collect();
        self.masks.retain_layers(|id| alive.contains(&id));
        self.active = active.filter(|id| alive.contains(id));
        self.selected = selected.into_iter().filter(|id| alive.contains(id)).collect();
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.pixels.memory_bytes()).sum::<usize>() + self.masks.memory_bytes()
    }
}

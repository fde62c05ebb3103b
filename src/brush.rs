use image::Rgba;
use kurbo::Point;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::canvas::TiledImage;
use crate::layer::{next_generation, LayerId};
use crate::layers::LayerStack;
use crate::mask::{AlphaMask, AlphaMaskStore};

// ============================================================================
// BRUSH SETTINGS & PRESSURE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushSettings {
    /// Diameter in image pixels.
    pub size: f32,
    /// 0 = fully soft falloff, 1 = hard disc.
    pub hardness: f32,
    pub opacity: f32,
    pub flow: f32,
    /// Dab spacing as a fraction of the diameter.
    pub spacing: f32,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            size: 10.0,
            hardness: 0.75,
            opacity: 1.0,
            flow: 1.0,
            spacing: 0.25,
        }
    }
}

impl BrushSettings {
    /// Arc-length between dabs, never below 1 px.
    pub fn spacing_px(&self) -> f32 {
        (self.size * self.spacing).max(1.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PressureCurve {
    #[default]
    Linear,
    Soft,
    Firm,
    Gamma(f32),
}

impl PressureCurve {
    pub fn apply(self, pressure: f32) -> f32 {
        let p = pressure.clamp(0.0, 1.0);
        match self {
            PressureCurve::Linear => p,
            PressureCurve::Soft => p.sqrt(),
            PressureCurve::Firm => p * p,
            PressureCurve::Gamma(g) if g > 0.0 => p.powf(g),
            PressureCurve::Gamma(_) => p,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureSettings {
    pub enabled: bool,
    pub affects_size: bool,
    pub affects_flow: bool,
    pub curve: PressureCurve,
    /// Smallest fraction of the nominal size reached at zero pressure.
    pub min_size_ratio: f32,
}

impl Default for PressureSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            affects_size: true,
            affects_flow: false,
            curve: PressureCurve::Linear,
            min_size_ratio: 0.1,
        }
    }
}

impl PressureSettings {
    pub fn size_factor(&self, pressure: f32) -> f32 {
        if !(self.enabled && self.affects_size) {
            return 1.0;
        }
        let min = self.min_size_ratio.clamp(0.0, 1.0);
        min + (1.0 - min) * self.curve.apply(pressure)
    }

    pub fn flow_factor(&self, pressure: f32) -> f32 {
        if !(self.enabled && self.affects_flow) {
            return 1.0;
        }
        self.curve.apply(pressure)
    }
}

// ============================================================================
// DAB & TARGET
// ============================================================================

/// One circular mark.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dab {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub hardness: f32,
    pub color: Rgba<u8>,
    pub alpha: f32,
    pub is_eraser: bool,
}

impl Dab {
    pub fn at(self, x: f32, y: f32) -> Self {
        Self { x, y, ..self }
    }
}

/// Mutable view of one layer's buffer and the mask store, borrowed for the
/// duration of a single paint call. Obtained from [`LayerStack::stroke_target`].
pub struct StrokeTarget<'a> {
    pub layer: LayerId,
    pub pixels: &'a mut TiledImage,
    pub masks: &'a mut AlphaMaskStore,
    pub generation: &'a mut u64,
}

/// Where a clone stroke reads from, in the source layer's local pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CloneSource {
    pub layer: LayerId,
    pub point: Point,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StrokeKind {
    Paint,
    Erase,
    Clone(CloneSource),
}

impl StrokeKind {
    pub fn label(&self) -> &'static str {
        match self {
            StrokeKind::Paint => "Brush Stroke",
            StrokeKind::Erase => "Eraser Stroke",
            StrokeKind::Clone(_) => "Clone Stamp",
        }
    }
}

/// Returned by [`BrushEngine::end_stroke`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeSummary {
    pub layer: LayerId,
    pub kind: StrokeKind,
    pub dabs: usize,
}

/// Source pixels captured once at stroke start.
#[derive(Debug)]
struct CloneStamp {
    pixels: TiledImage,
    mask: Option<AlphaMask>,
    offset: (f32, f32),
}

impl CloneStamp {
    fn sample(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        let sx = (x as f32 + self.offset.0).round();
        let sy = (y as f32 + self.offset.1).round();
        if sx < 0.0 || sy < 0.0 {
            return None;
        }
        let (sx, sy) = (sx as u32, sy as u32);
        if sx >= self.pixels.width() || sy >= self.pixels.height() {
            return None;
        }
        let mut p = *self.pixels.get_pixel(sx, sy);
        if let Some(mask) = &self.mask {
            p[3] = ((p[3] as u16 * mask.get(sx, sy) as u16 + 127) / 255) as u8;
        }
        (p[3] > 0).then_some(p)
    }
}

#[derive(Debug)]
struct ActiveStroke {
    layer: LayerId,
    kind: StrokeKind,
    last: (f32, f32),
    last_pressure: f32,
    /// Distance travelled since the last dab.
    distance_remainder: f32,
    dabs: usize,
    clone: Option<CloneStamp>,
}

// ============================================================================
// DAB RASTERIZER – LUT falloff + per-stroke coverage carry
// ============================================================================

#[derive(Debug)]
struct DabRaster {
    /// `lut[i]` = coverage for `dist_sq / radius_sq == i / 255`.
    lut: [u8; 256],
    lut_params: (f32, f32),
    /// Highest coverage each pixel has received in the current stroke.
    carry: Vec<u8>,
    carry_size: (u32, u32),
}

impl Default for DabRaster {
    fn default() -> Self {
        Self {
            lut: [0u8; 256],
            lut_params: (-1.0, -1.0),
            carry: Vec::new(),
            carry_size: (0, 0),
        }
    }
}

/// Linear radial falloff: solid inside `hardness * radius`, zero at `radius`.
fn falloff(dist: f32, radius: f32, hardness: f32) -> f32 {
    let solid = radius * hardness.clamp(0.0, 1.0);
    if dist <= solid {
        1.0
    } else if dist >= radius {
        0.0
    } else {
        (radius - dist) / (radius - solid)
    }
}

/// Straight-alpha source-over of `rgb` at coverage `a`.
fn paint_over(base: Rgba<u8>, rgb: [u8; 3], a: f32) -> Rgba<u8> {
    let ba = base[3] as f32 / 255.0;
    let out_a = a + ba * (1.0 - a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (rgb[c] as f32 * a + base[c] as f32 * ba * (1.0 - a)) / out_a;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

impl DabRaster {
    fn rebuild_lut(&mut self, radius: f32, hardness: f32) {
        let params = (radius, hardness);
        if params == self.lut_params {
            return;
        }
        self.lut_params = params;
        for (i, slot) in self.lut.iter_mut().enumerate() {
            let dist = (i as f32 / 255.0).sqrt() * radius;
            *slot = (falloff(dist, radius, hardness) * 255.0).round().min(255.0) as u8;
        }
    }

    fn reset_carry(&mut self, width: u32, height: u32) {
        self.carry.clear();
        self.carry.resize(width as usize * height as usize, 0);
        self.carry_size = (width, height);
    }

    /// Rasterize one dab. Returns whether any pixel or mask value changed.
    fn stamp(
        &mut self,
        target: &mut StrokeTarget<'_>,
        dab: &Dab,
        is_start: bool,
        clone: Option<&CloneStamp>,
    ) -> bool {
        let (w, h) = (target.pixels.width(), target.pixels.height());
        if is_start || self.carry_size != (w, h) {
            self.reset_carry(w, h);
        }
        let radius = dab.radius;
        if !(radius > 0.0) || !(dab.alpha > 0.0) {
            return false;
        }
        self.rebuild_lut(radius, dab.hardness);

        // Centres may sit half a radius outside so soft edges still reach the border.
        let half = radius / 2.0;
        let cx = dab.x.clamp(-half, w as f32 + half);
        let cy = dab.y.clamp(-half, h as f32 + half);
        let radius_sq = radius * radius;
        let inv_radius_sq = 1.0 / radius_sq;

        let min_x = (cx - radius).floor().max(0.0) as i64;
        let min_y = (cy - radius).floor().max(0.0) as i64;
        let max_x = ((cx + radius).ceil() as i64).min(w as i64 - 1);
        let max_y = ((cy + radius).ceil() as i64).min(h as i64 - 1);
        if min_x > max_x || min_y > max_y {
            return false;
        }

        let strength = if dab.is_eraser {
            dab.alpha.min(1.0)
        } else {
            dab.alpha.min(1.0) * dab.color[3] as f32 / 255.0
        };

        let mut mask = if dab.is_eraser {
            Some(target.masks.ensure_mask(target.layer, w, h))
        } else {
            target.masks.get_mask_mut(target.layer)
        };

        let rgb = [dab.color[0], dab.color[1], dab.color[2]];
        let mut changed = false;

        for py in min_y as u32..=max_y as u32 {
            let dy = py as f32 - cy;
            let dy_sq = dy * dy;
            for px in min_x as u32..=max_x as u32 {
                let dx = px as f32 - cx;
                let dist_sq = dx * dx + dy_sq;
                if dist_sq > radius_sq {
                    continue;
                }
                let lut_idx = (dist_sq * inv_radius_sq * 255.0).min(255.0) as usize;
                let geom = self.lut[lut_idx];
                if geom == 0 {
                    continue;
                }

                let cover = ((geom as f32 / 255.0) * strength * 255.0).round() as u8;
                let ci = py as usize * w as usize + px as usize;
                let acc = self.carry[ci];
                if cover <= acc {
                    continue;
                }

                // Only the coverage gained over the stroke so far is applied.
                let acc_f = acc as f32 / 255.0;
                let inc = (cover as f32 / 255.0 - acc_f) / (1.0 - acc_f);

                if dab.is_eraser {
                    self.carry[ci] = cover;
                    if let Some(m) = mask.as_deref_mut() {
                        let old = m.get(px, py);
                        let new = (old as f32 * (1.0 - inc)).round() as u8;
                        if new != old {
                            m.set(px, py, new);
                            changed = true;
                        }
                    }
                    continue;
                }

                let (color, a) = match clone {
                    Some(stamp) => match stamp.sample(px, py) {
                        Some(src) => ([src[0], src[1], src[2]], inc * src[3] as f32 / 255.0),
                        None => continue,
                    },
                    None => (rgb, inc),
                };
                self.carry[ci] = cover;

                let base = *target.pixels.get_pixel(px, py);
                let out = paint_over(base, color, a);
                if out != base {
                    target.pixels.put_pixel(px, py, out);
                    changed = true;
                }
                // New paint shows through earlier erasure.
                if let Some(m) = mask.as_deref_mut() {
                    let old = m.get(px, py);
                    let new = (old as f32 + (255.0 - old as f32) * a).round().min(255.0) as u8;
                    if new != old {
                        m.set(px, py, new);
                        changed = true;
                    }
                }
            }
        }

        if changed {
            *target.generation = next_generation();
        }
        changed
    }
}

// ============================================================================
// BRUSH ENGINE
// ============================================================================

/// Stroke rasterizer for paint, erase and clone strokes.
///
/// Low-level calls (`draw_dab`, `draw_line`, `erase_*`) work on a borrowed
/// [`StrokeTarget`]. The stroke API (`begin_stroke` → `continue_stroke`* →
/// `end_stroke`) looks the layer up in a [`LayerStack`] on every call; a
/// missing or locked layer turns the call into a no-op.
#[derive(Debug)]
pub struct BrushEngine {
    pub settings: BrushSettings,
    pub pressure: PressureSettings,
    pub color: Rgba<u8>,
    raster: DabRaster,
    stroke: Option<ActiveStroke>,
    stamp_counter: u32,
}

impl Default for BrushEngine {
    fn default() -> Self {
        Self::new(BrushSettings::default(), PressureSettings::default())
    }
}

impl BrushEngine {
    pub fn new(settings: BrushSettings, pressure: PressureSettings) -> Self {
        Self {
            settings,
            pressure,
            color: Rgba([0, 0, 0, 255]),
            raster: DabRaster::default(),
            stroke: None,
            stamp_counter: 0,
        }
    }

    /// Total dabs rasterized by this engine.
    pub fn stamp_count(&self) -> u32 {
        self.stamp_counter
    }

    pub fn is_stroking(&self) -> bool {
        self.stroke.is_some()
    }

    // ---- single dabs & lines ------------------------------------------------

    /// Paint one dab. `is_start` resets the stroke coverage carry.
    /// Eraser dabs are routed to [`erase_dab_linear`](Self::erase_dab_linear).
    pub fn draw_dab(&mut self, target: &mut StrokeTarget<'_>, dab: &Dab, is_start: bool) -> bool {
        self.stamp_counter = self.stamp_counter.wrapping_add(1);
        self.raster.stamp(target, dab, is_start, None)
    }

    /// Interpolate dabs along `(from, to]` so that consecutive centres are at
    /// most `spacing` apart. Returns the number of dabs placed,
    /// `max(1, ceil(distance / spacing))`.
    pub fn draw_line(
        &mut self,
        target: &mut StrokeTarget<'_>,
        from: (f32, f32),
        to: (f32, f32),
        spacing: f32,
        dab: &Dab,
    ) -> usize {
        let spacing = spacing.max(1.0);
        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let distance = (dx * dx + dy * dy).sqrt();
        let steps = ((distance / spacing).ceil() as usize).max(1);
        for i in 1..=steps {
            let t = i as f32 / steps as f32;
            let d = dab.at(from.0 + dx * t, from.1 + dy * t);
            self.draw_dab(target, &d, false);
        }
        steps
    }

    /// Attenuate the layer's mask under one dab; colour is never touched.
    pub fn erase_dab_linear(&mut self, target: &mut StrokeTarget<'_>, dab: &Dab, is_start: bool) -> bool {
        let dab = Dab { is_eraser: true, ..*dab };
        self.draw_dab(target, &dab, is_start)
    }

    pub fn erase_line_linear(
        &mut self,
        target: &mut StrokeTarget<'_>,
        from: (f32, f32),
        to: (f32, f32),
        spacing: f32,
        dab: &Dab,
    ) -> usize {
        let dab = Dab { is_eraser: true, ..*dab };
        self.draw_line(target, from, to, spacing, &dab)
    }

    // ---- stroke API ---------------------------------------------------------

    /// Dab template for the current settings at `pressure`.
    pub fn dab_for(&self, kind: &StrokeKind, pressure: f32) -> Dab {
        dab_template(&self.settings, &self.pressure, self.color, kind, pressure)
    }

    /// Start a stroke on `layer` at `at` (layer-local pixels) and place the
    /// first dab. Any unfinished stroke is dropped.
    pub fn begin_stroke(
        &mut self,
        stack: &mut LayerStack,
        layer: LayerId,
        kind: StrokeKind,
        at: Point,
        pressure: f32,
    ) -> usize {
        self.stroke = None;
        let at = (at.x as f32, at.y as f32);

        let clone = match kind {
            StrokeKind::Clone(source) => {
                let Some(src) = stack.layer(source.layer) else {
                    warn!(layer = %source.layer, "clone source layer missing");
                    return 0;
                };
                Some(CloneStamp {
                    pixels: src.pixels.clone(),
                    mask: stack.masks().get_mask(source.layer).cloned(),
                    offset: (source.point.x as f32 - at.0, source.point.y as f32 - at.1),
                })
            }
            _ => None,
        };

        let Some(mut target) = stack.stroke_target(layer) else {
            debug!(layer = %layer, "begin_stroke: no paintable target");
            return 0;
        };

        let dab = self.dab_for(&kind, pressure).at(at.0, at.1);
        self.stamp_counter = self.stamp_counter.wrapping_add(1);
        self.raster.stamp(&mut target, &dab, true, clone.as_ref());

        self.stroke = Some(ActiveStroke {
            layer,
            kind,
            last: at,
            last_pressure: pressure,
            distance_remainder: 0.0,
            dabs: 1,
            clone,
        });
        1
    }

    /// Extend the stroke to `at`. Dabs fall every `spacing_px` of travel,
    /// carrying leftover distance across calls, so samples closer than the
    /// spacing place nothing.
    pub fn continue_stroke(&mut self, stack: &mut LayerStack, at: Point, pressure: f32) -> usize {
        let Self { settings, pressure: pressure_cfg, color, raster, stroke, stamp_counter } = self;
        let Some(stroke) = stroke.as_mut() else { return 0 };
        let Some(mut target) = stack.stroke_target(stroke.layer) else { return 0 };

        let at = (at.x as f32, at.y as f32);
        let (dx, dy) = (at.0 - stroke.last.0, at.1 - stroke.last.1);
        let distance = (dx * dx + dy * dy).sqrt();
        if distance <= 0.0 {
            return 0;
        }

        let spacing = settings.spacing_px();
        let mut travelled = spacing - stroke.distance_remainder;
        let mut placed = 0;
        while travelled <= distance {
            let t = travelled / distance;
            let p = stroke.last_pressure + (pressure - stroke.last_pressure) * t;
            let dab = dab_template(settings, pressure_cfg, *color, &stroke.kind, p)
                .at(stroke.last.0 + dx * t, stroke.last.1 + dy * t);
            *stamp_counter = stamp_counter.wrapping_add(1);
            raster.stamp(&mut target, &dab, false, stroke.clone.as_ref());
            placed += 1;
            travelled += spacing;
        }

        stroke.distance_remainder = distance - (travelled - spacing);
        stroke.last = at;
        stroke.last_pressure = pressure;
        stroke.dabs += placed;
        placed
    }

    /// Finish the current stroke, if any.
    pub fn end_stroke(&mut self) -> Option<StrokeSummary> {
        self.stroke.take().map(|s| StrokeSummary {
            layer: s.layer,
            kind: s.kind,
            dabs: s.dabs,
        })
    }
}

fn dab_template(
    settings: &BrushSettings,
    pressure_cfg: &PressureSettings,
    color: Rgba<u8>,
    kind: &StrokeKind,
    pressure: f32,
) -> Dab {
    Dab {
        x: 0.0,
        y: 0.0,
        radius: settings.size / 2.0 * pressure_cfg.size_factor(pressure),
        hardness: settings.hardness,
        color,
        alpha: settings.opacity.clamp(0.0, 1.0)
            * settings.flow.clamp(0.0, 1.0)
            * pressure_cfg.flow_factor(pressure),
        is_eraser: matches!(kind, StrokeKind::Erase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn stack_with(w: u32, h: u32, color: Rgba<u8>) -> (LayerStack, LayerId) {
        let mut stack = LayerStack::new();
        let id = stack.insert_layer(Layer::new_filled("Base", w, h, color), 0);
        (stack, id)
    }

    fn dab(radius: f32, hardness: f32, alpha: f32) -> Dab {
        Dab { x: 0.0, y: 0.0, radius, hardness, color: RED, alpha, is_eraser: false }
    }

    #[test]
    fn hard_dab_paints_exact_colour_inside_radius_only() {
        let (mut stack, id) = stack_with(100, 100, WHITE);
        let mut engine = BrushEngine::default();
        let mut t = stack.stroke_target(id).unwrap();
        assert!(engine.draw_dab(&mut t, &dab(10.0, 1.0, 1.0).at(50.0, 50.0), true));
        assert_eq!(*t.pixels.get_pixel(50, 50), RED);
        assert_eq!(*t.pixels.get_pixel(50, 65), WHITE);
        assert_eq!(*t.pixels.get_pixel(50, 60), RED);
        assert_eq!(*t.pixels.get_pixel(50, 61), WHITE);
    }

    #[test]
    fn soft_dab_falls_off() {
        let (mut stack, id) = stack_with(40, 40, Rgba([0, 0, 0, 0]));
        let mut engine = BrushEngine::default();
        let mut t = stack.stroke_target(id).unwrap();
        engine.draw_dab(&mut t, &dab(10.0, 0.0, 1.0).at(20.0, 20.0), true);
        let centre = t.pixels.get_pixel(20, 20)[3];
        let mid = t.pixels.get_pixel(25, 20)[3];
        let edge = t.pixels.get_pixel(29, 20)[3];
        assert_eq!(centre, 255);
        assert!(mid > edge && mid < centre);
    }

    #[test]
    fn carry_prevents_double_darkening_within_a_stroke() {
        let (mut stack, id) = stack_with(20, 20, Rgba([0, 0, 0, 0]));
        let mut engine = BrushEngine::default();
        let d = dab(5.0, 1.0, 0.5).at(10.0, 10.0);

        let mut t = stack.stroke_target(id).unwrap();
        engine.draw_dab(&mut t, &d, true);
        let once = t.pixels.get_pixel(10, 10)[3];
        engine.draw_dab(&mut t, &d, false);
        assert_eq!(t.pixels.get_pixel(10, 10)[3], once);

        // A new stroke accumulates on top.
        engine.draw_dab(&mut t, &d, true);
        assert!(t.pixels.get_pixel(10, 10)[3] > once);
    }

    #[test]
    fn line_places_expected_dab_count() {
        let (mut stack, id) = stack_with(200, 50, WHITE);
        let mut engine = BrushEngine::default();
        let mut t = stack.stroke_target(id).unwrap();
        let d = dab(2.0, 1.0, 1.0);
        assert_eq!(engine.draw_line(&mut t, (10.0, 10.0), (110.0, 10.0), 7.0, &d), 15);
        assert_eq!(engine.draw_line(&mut t, (10.0, 10.0), (10.0, 10.0), 7.0, &d), 1);
        // Spacing below 1 px is floored.
        assert_eq!(engine.draw_line(&mut t, (0.0, 0.0), (5.0, 0.0), 0.1, &d), 5);
    }

    #[test]
    fn eraser_only_touches_mask() {
        let (mut stack, id) = stack_with(30, 30, RED);
        let mut engine = BrushEngine::default();
        let mut t = stack.stroke_target(id).unwrap();
        engine.erase_dab_linear(&mut t, &dab(4.0, 1.0, 1.0).at(15.0, 15.0), true);
        assert_eq!(*t.pixels.get_pixel(15, 15), RED);
        let mask = t.masks.get_mask(id).unwrap();
        assert_eq!(mask.get(15, 15), 0);
        assert_eq!(mask.get(0, 0), 255);
    }

    #[test]
    fn paint_restores_mask_under_new_colour() {
        let (mut stack, id) = stack_with(30, 30, WHITE);
        let mut engine = BrushEngine::default();
        let mut t = stack.stroke_target(id).unwrap();
        engine.erase_dab_linear(&mut t, &dab(6.0, 1.0, 1.0).at(15.0, 15.0), true);
        engine.draw_dab(&mut t, &dab(2.0, 1.0, 1.0).at(15.0, 15.0), true);
        let mask = t.masks.get_mask(id).unwrap();
        assert_eq!(mask.get(15, 15), 255);
        assert_eq!(mask.get(19, 15), 0);
    }

    #[test]
    fn locked_or_missing_layer_is_a_no_op() {
        let (mut stack, id) = stack_with(10, 10, WHITE);
        let mut engine = BrushEngine::default();
        stack.set_locked(id, true).unwrap();
        assert_eq!(engine.begin_stroke(&mut stack, id, StrokeKind::Paint, Point::new(5.0, 5.0), 1.0), 0);
        assert!(!engine.is_stroking());
        assert_eq!(engine.begin_stroke(&mut stack, LayerId::new(), StrokeKind::Paint, Point::ZERO, 1.0), 0);
        assert_eq!(*stack.layer(id).unwrap().pixels.get_pixel(5, 5), WHITE);
    }

    #[test]
    fn stroke_remainder_suppresses_dense_samples() {
        let (mut stack, id) = stack_with(100, 20, WHITE);
        let mut engine = BrushEngine::default();
        engine.settings.size = 8.0;
        engine.settings.spacing = 0.5; // 4 px
        engine.begin_stroke(&mut stack, id, StrokeKind::Paint, Point::new(10.0, 10.0), 1.0);
        let mut placed = 0;
        for i in 1..=20 {
            placed += engine.continue_stroke(&mut stack, Point::new(10.0 + i as f64 * 0.5, 10.0), 1.0);
        }
        assert_eq!(placed, 2);
        let summary = engine.end_stroke().unwrap();
        assert_eq!(summary.dabs, 3);
        assert_eq!(summary.layer, id);
        assert!(engine.end_stroke().is_none());
    }

    #[test]
    fn pressure_scales_radius() {
        let mut engine = BrushEngine::default();
        engine.pressure.enabled = true;
        engine.pressure.min_size_ratio = 0.0;
        let full = engine.dab_for(&StrokeKind::Paint, 1.0);
        let half = engine.dab_for(&StrokeKind::Paint, 0.5);
        assert_eq!(full.radius, 5.0);
        assert_eq!(half.radius, 2.5);
        engine.pressure.enabled = false;
        assert_eq!(engine.dab_for(&StrokeKind::Paint, 0.1).radius, 5.0);
    }

    #[test]
    fn pressure_curves() {
        assert_eq!(PressureCurve::Linear.apply(0.25), 0.25);
        assert_eq!(PressureCurve::Soft.apply(0.25), 0.5);
        assert_eq!(PressureCurve::Firm.apply(0.5), 0.25);
        assert_eq!(PressureCurve::Gamma(2.0).apply(2.0), 1.0);
    }

    #[test]
    fn clone_stamp_reads_frozen_source() {
        let mut stack = LayerStack::new();
        let mut src = Layer::new("Src", 40, 10);
        for x in 0..40 {
            src.pixels.put_pixel(x, 5, Rgba([x as u8 * 5, 0, 0, 255]));
        }
        let id = stack.insert_layer(src, 0);
        let mut engine = BrushEngine::default();
        engine.settings.size = 2.0;
        engine.settings.hardness = 1.0;
        engine.settings.spacing = 0.5;

        let source = CloneSource { layer: id, point: Point::new(5.0, 5.0) };
        engine.begin_stroke(&mut stack, id, StrokeKind::Clone(source), Point::new(10.0, 5.0), 1.0);
        engine.continue_stroke(&mut stack, Point::new(20.0, 5.0), 1.0);
        engine.end_stroke();

        // Destination x reads source x - 5 from the snapshot, not the live buffer.
        let layer = stack.layer(id).unwrap();
        assert_eq!(layer.pixels.get_pixel(10, 5)[0], 25);
        assert_eq!(layer.pixels.get_pixel(15, 5)[0], 50);
        assert_eq!(layer.pixels.get_pixel(20, 5)[0], 75);
    }
}

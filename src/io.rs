use std::io::Cursor;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::canvas::{BlendMode, TiledImage};
use crate::error::{EditorError, EditorResult};
use crate::layer::{next_generation, Layer, LayerId, LayerKind};
use crate::layers::LayerStack;
use crate::mask::{AlphaMask, AlphaMaskStore};

// ============================================================================
// PNG PAYLOADS
// ============================================================================

pub fn encode_png(img: &RgbaImage) -> EditorResult<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)
        .map_err(|e| EditorError::encode(format!("png: {e}")))?;
    Ok(out)
}

pub fn decode_png(bytes: &[u8]) -> EditorResult<RgbaImage> {
    image::load(Cursor::new(bytes), ImageFormat::Png)
        .map(|img| img.to_rgba8())
        .map_err(|e| EditorError::decode(format!("png: {e}")))
}

// ============================================================================
// LAYER RECORD
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalSize {
    pub width: u32,
    pub height: u32,
}

/// The field set an external store must round-trip for one layer.
///
/// `paint` and `alpha_mask` are PNG bytes; the mask is stored as opaque
/// white with the mask value in the alpha channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRecord {
    pub id: LayerId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    pub visible: bool,
    pub locked: bool,
    pub opacity: u8,
    pub z_index: usize,
    pub position: Point,
    pub scale: Vec2,
    pub rotation: f64,
    pub original_size: OriginalSize,
    pub blend_mode: BlendMode,
    pub paint: Vec<u8>,
    pub alpha_mask: Option<Vec<u8>>,
}

impl LayerRecord {
    pub fn from_layer(layer: &Layer, mask: Option<&AlphaMask>) -> EditorResult<Self> {
        let (width, height) = layer.original_size();
        let alpha_mask = mask.map(|m| encode_png(&m.to_rgba())).transpose()?;
        Ok(Self {
            id: layer.id,
            name: layer.name.clone(),
            kind: layer.kind,
            visible: layer.visible,
            locked: layer.locked,
            opacity: layer.opacity.min(100),
            z_index: layer.z_index,
            position: layer.position,
            scale: layer.scale,
            rotation: layer.rotation,
            original_size: OriginalSize { width, height },
            blend_mode: layer.blend_mode,
            paint: encode_png(&layer.pixels.to_rgba_image())?,
            alpha_mask,
        })
    }

    /// Rebuild the layer and its mask. The paint payload must match
    /// `original_size`; a mask of another size is resampled to fit.
    pub fn into_layer(self) -> EditorResult<(Layer, Option<AlphaMask>)> {
        let OriginalSize { width, height } = self.original_size;
        let paint = decode_png(&self.paint)?;
        if paint.dimensions() != (width, height) {
            return Err(EditorError::decode(format!(
                "layer '{}' paint is {}x{}, expected {width}x{height}",
                self.name,
                paint.width(),
                paint.height()
            )));
        }

        let mask = match &self.alpha_mask {
            Some(bytes) => {
                let mask = AlphaMask::from_rgba(&decode_png(bytes)?);
                if (mask.width(), mask.height()) == (width, height) {
                    Some(mask)
                } else {
                    warn!(layer = %self.id, "alpha mask size mismatch, resampling");
                    Some(mask.resized(width, height))
                }
            }
            None => None,
        };

        let layer = Layer {
            id: self.id,
            name: self.name,
            kind: self.kind,
            visible: self.visible,
            locked: self.locked,
            opacity: self.opacity.min(100),
            blend_mode: self.blend_mode,
            z_index: self.z_index,
            position: self.position,
            scale: self.scale,
            rotation: self.rotation,
            pixels: TiledImage::from_rgba_image(&paint),
            generation: next_generation(),
        };
        Ok((layer, mask))
    }
}

// ============================================================================
// DOCUMENT FILE
// ============================================================================

/// Magic header of the binary document format.
pub const DOCUMENT_MAGIC: &str = "PCD1";
pub const DOCUMENT_VERSION: u32 = 1;

/// Per-axis canvas limit; guards against crafted files.
const MAX_CANVAS_DIM: u32 = 32_768;
const MAX_LAYERS: usize = 256;

/// Whole-document payload, written with bincode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentFile {
    pub magic: String,
    pub version: u32,
    pub width: u32,
    pub height: u32,
    /// Degrees clockwise, one of 0/90/180/270.
    pub rotation: u32,
    pub layers: Vec<LayerRecord>,
    pub active: Option<LayerId>,
    pub selected: Vec<LayerId>,
}

impl DocumentFile {
    pub fn from_stack(stack: &LayerStack, width: u32, height: u32, rotation: u32) -> EditorResult<Self> {
        let layers = stack
            .layers()
            .iter()
            .map(|l| LayerRecord::from_layer(l, stack.masks().get_mask(l.id)))
            .collect::<EditorResult<Vec<_>>>()?;
        Ok(Self {
            magic: DOCUMENT_MAGIC.to_string(),
            version: DOCUMENT_VERSION,
            width,
            height,
            rotation,
            layers,
            active: stack.active(),
            selected: stack.selected().to_vec(),
        })
    }

    /// Rebuild the stack, ordering layers by their stored z-index.
    pub fn into_stack(self) -> EditorResult<LayerStack> {
        let mut records = self.layers;
        records.sort_by_key(|r| r.z_index);

        let mut layers = Vec::with_capacity(records.len());
        let mut masks = AlphaMaskStore::new();
        for record in records {
            let (layer, mask) = record.into_layer()?;
            if let Some(mask) = mask {
                masks.insert(layer.id, mask);
            }
            layers.push(layer);
        }

        let mut stack = LayerStack::new();
        stack.restore(layers, masks, self.active, self.selected);
        Ok(stack)
    }

    pub fn to_bytes(&self) -> EditorResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| EditorError::serde(e.to_string()))
    }

    pub fn from_bytes(raw: &[u8]) -> EditorResult<Self> {
        if raw.len() < 12 {
            return Err(EditorError::decode("file too small"));
        }
        // bincode writes a String as an 8-byte length then the UTF-8 bytes.
        let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
        if magic != DOCUMENT_MAGIC {
            return Err(EditorError::decode(format!("unknown magic '{magic}'")));
        }

        let file: DocumentFile =
            bincode::deserialize(raw).map_err(|e| EditorError::serde(e.to_string()))?;

        if file.width == 0 || file.height == 0 {
            return Err(EditorError::decode("canvas dimensions cannot be zero"));
        }
        if file.width > MAX_CANVAS_DIM || file.height > MAX_CANVAS_DIM {
            return Err(EditorError::decode(format!(
                "canvas size {}x{} exceeds maximum allowed {MAX_CANVAS_DIM}x{MAX_CANVAS_DIM}",
                file.width, file.height
            )));
        }
        if file.layers.is_empty() {
            return Err(EditorError::decode("document contains no layers"));
        }
        if file.layers.len() > MAX_LAYERS {
            return Err(EditorError::decode(format!(
                "document contains {} layers, which exceeds the maximum of {MAX_LAYERS}",
                file.layers.len()
            )));
        }
        if file.rotation % 90 != 0 || file.rotation >= 360 {
            return Err(EditorError::decode(format!("invalid canvas rotation {}", file.rotation)));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn painted_layer() -> (Layer, AlphaMask) {
        let mut layer = Layer::new_filled("Ink", 6, 4, Rgba([10, 20, 30, 255]));
        layer.pixels.put_pixel(1, 2, Rgba([200, 0, 0, 128]));
        layer.opacity = 60;
        layer.position = Point::new(3.0, -2.0);
        layer.scale = Vec2::new(2.0, 0.5);
        layer.rotation = 30.0;
        layer.blend_mode = BlendMode::Screen;
        layer.kind = LayerKind::Text;
        let mut mask = AlphaMask::new_opaque(6, 4);
        mask.set(0, 0, 17);
        (layer, mask)
    }

    #[test]
    fn layer_record_keeps_every_field() {
        let (layer, mask) = painted_layer();
        let record = LayerRecord::from_layer(&layer, Some(&mask)).unwrap();
        let (back, back_mask) = record.clone().into_layer().unwrap();

        assert_eq!(back.id, layer.id);
        assert_eq!(back.name, "Ink");
        assert_eq!(back.kind, LayerKind::Text);
        assert_eq!(back.opacity, 60);
        assert_eq!(back.position, layer.position);
        assert_eq!(back.scale, layer.scale);
        assert_eq!(back.rotation, 30.0);
        assert_eq!(back.blend_mode, BlendMode::Screen);
        assert!(back.pixels.same_pixels(&layer.pixels));
        assert_eq!(back_mask.unwrap().get(0, 0), 17);
    }

    #[test]
    fn layer_record_json_field_names() {
        let (layer, _) = painted_layer();
        let record = LayerRecord::from_layer(&layer, None).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        for key in [
            "id", "name", "type", "visible", "locked", "opacity", "zIndex", "position", "scale",
            "rotation", "originalSize", "blendMode", "paint", "alphaMask",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["type"], "text");
        assert_eq!(json["blendMode"], "screen");
        assert!(json["alphaMask"].is_null());
    }

    #[test]
    fn paint_size_mismatch_is_rejected() {
        let (layer, _) = painted_layer();
        let mut record = LayerRecord::from_layer(&layer, None).unwrap();
        record.original_size = OriginalSize { width: 7, height: 4 };
        assert!(matches!(record.into_layer(), Err(EditorError::Decode(_))));
    }

    #[test]
    fn document_file_round_trip() {
        let mut stack = LayerStack::with_background(8, 8, Rgba([0, 0, 0, 255]));
        let top = stack.add_layer("Top", 8, 8);
        stack.masks_mut().ensure_mask(top, 8, 8).set(3, 3, 0);
        stack.select(top).unwrap();

        let bytes = DocumentFile::from_stack(&stack, 8, 8, 90).unwrap().to_bytes().unwrap();
        let file = DocumentFile::from_bytes(&bytes).unwrap();
        assert_eq!(file.rotation, 90);
        let back = file.into_stack().unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.layers()[1].id, top);
        assert_eq!(back.active(), Some(top));
        assert_eq!(back.selected(), &[top]);
        assert_eq!(back.masks().get_mask(top).unwrap().get(3, 3), 0);
        assert!(back.invariants_hold());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(DocumentFile::from_bytes(b"short").is_err());
        assert!(DocumentFile::from_bytes(&[0u8; 64]).is_err());
    }
}

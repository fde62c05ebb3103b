use std::collections::HashMap;

use image::{GrayImage, Luma, Rgba, RgbaImage, imageops};
use tracing::{debug, warn};

use crate::layer::LayerId;

// ============================================================================
// ALPHA MASK – per-layer erase sidecar
// ============================================================================

/// Visibility mask for one layer buffer. 255 = fully visible, 0 = erased.
///
/// Same size as the layer buffer. Erase strokes lower values here instead of
/// touching colour, so removing the mask restores every erased pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct AlphaMask {
    alpha: GrayImage,
}

impl AlphaMask {
    pub fn new_opaque(width: u32, height: u32) -> Self {
        Self {
            alpha: GrayImage::from_pixel(width.max(1), height.max(1), Luma([255])),
        }
    }

    pub fn from_gray(alpha: GrayImage) -> Self {
        Self { alpha }
    }

    /// Read the alpha channel of an opaque-white RGBA mask payload.
    pub fn from_rgba(img: &RgbaImage) -> Self {
        let alpha = GrayImage::from_fn(img.width(), img.height(), |x, y| {
            Luma([img.get_pixel(x, y)[3]])
        });
        Self { alpha }
    }

    /// Opaque white with the mask value in the alpha channel.
    pub fn to_rgba(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width(), self.height(), |x, y| {
            Rgba([255, 255, 255, self.alpha.get_pixel(x, y)[0]])
        })
    }

    pub fn width(&self) -> u32 {
        self.alpha.width()
    }

    pub fn height(&self) -> u32 {
        self.alpha.height()
    }

    /// Out-of-range reads are fully visible.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        if x < self.alpha.width() && y < self.alpha.height() {
            self.alpha.get_pixel(x, y)[0]
        } else {
            255
        }
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        if x < self.alpha.width() && y < self.alpha.height() {
            self.alpha.put_pixel(x, y, Luma([value]));
        }
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.alpha
    }

    pub fn is_fully_opaque(&self) -> bool {
        self.alpha.as_raw().iter().all(|&a| a == 255)
    }

    pub fn resized(&self, width: u32, height: u32) -> Self {
        if width == self.width() && height == self.height() {
            return self.clone();
        }
        Self {
            alpha: imageops::resize(&self.alpha, width, height, imageops::FilterType::Triangle),
        }
    }

    /// Clockwise quarter turns.
    pub fn rotated_quarter(&self, quarter_turns: u32) -> Self {
        let alpha = match quarter_turns % 4 {
            0 => return self.clone(),
            1 => imageops::rotate90(&self.alpha),
            2 => imageops::rotate180(&self.alpha),
            _ => imageops::rotate270(&self.alpha),
        };
        Self { alpha }
    }

    /// Window `[x, x+w) × [y, y+h)`; parts outside the mask read fully visible.
    pub fn cropped(&self, x: i64, y: i64, width: u32, height: u32) -> Self {
        let alpha = GrayImage::from_fn(width.max(1), height.max(1), |dx, dy| {
            let sx = x + dx as i64;
            let sy = y + dy as i64;
            if sx < 0 || sy < 0 {
                Luma([255])
            } else {
                Luma([self.get(sx as u32, sy as u32)])
            }
        });
        Self { alpha }
    }

    pub fn memory_bytes(&self) -> usize {
        self.alpha.as_raw().len()
    }
}

// ============================================================================
// ALPHA MASK STORE
// ============================================================================

/// Explicit layer id → mask map. A missing entry means "fully opaque".
///
/// Owned by the layer stack; deleting a layer must call [`remove`](Self::remove).
#[derive(Clone, Debug, Default)]
pub struct AlphaMaskStore {
    masks: HashMap<LayerId, AlphaMask>,
}

impl AlphaMaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_mask(&self, id: LayerId) -> Option<&AlphaMask> {
        self.masks.get(&id)
    }

    pub fn get_mask_mut(&mut self, id: LayerId) -> Option<&mut AlphaMask> {
        self.masks.get_mut(&id)
    }

    pub fn has_mask(&self, id: LayerId) -> bool {
        self.masks.contains_key(&id)
    }

    /// Create a fully opaque mask if absent. An existing mask of the wrong
    /// size is resampled to `width × height`.
    pub fn ensure_mask(&mut self, id: LayerId, width: u32, height: u32) -> &mut AlphaMask {
        let mask = self.masks.entry(id).or_insert_with(|| {
            debug!(layer = %id, width, height, "creating alpha mask");
            AlphaMask::new_opaque(width, height)
        });
        if mask.width() != width || mask.height() != height {
            *mask = mask.resized(width.max(1), height.max(1));
        }
        mask
    }

    /// Back to "absent = fully opaque". Returns whether a mask was dropped.
    pub fn clear_mask(&mut self, id: LayerId) -> bool {
        self.masks.remove(&id).is_some()
    }

    /// Give `dst` an independent copy of `src`'s mask (or its absence).
    pub fn copy_mask(&mut self, src: LayerId, dst: LayerId) {
        match self.masks.get(&src).cloned() {
            Some(mask) => {
                self.masks.insert(dst, mask);
            }
            None => {
                self.masks.remove(&dst);
            }
        }
    }

    pub fn resize_mask(&mut self, id: LayerId, width: u32, height: u32) {
        if width == 0 || height == 0 {
            warn!(layer = %id, width, height, "resize_mask: zero size ignored");
            return;
        }
        if let Some(mask) = self.masks.get_mut(&id) {
            *mask = mask.resized(width, height);
        }
    }

    /// Rotate by 0/90/180/270 degrees clockwise. Other angles are ignored.
    pub fn rotate_mask(&mut self, id: LayerId, degrees: i32) {
        let turns = match degrees.rem_euclid(360) {
            0 => return,
            90 => 1,
            180 => 2,
            270 => 3,
            other => {
                warn!(layer = %id, degrees = other, "rotate_mask: unsupported angle");
                return;
            }
        };
        if let Some(mask) = self.masks.get_mut(&id) {
            *mask = mask.rotated_quarter(turns);
        }
    }

    pub fn insert(&mut self, id: LayerId, mask: AlphaMask) {
        self.masks.insert(id, mask);
    }

    pub fn remove(&mut self, id: LayerId) -> Option<AlphaMask> {
        self.masks.remove(&id)
    }

    /// Drop masks that no longer attenuate anything.
    pub fn prune_opaque(&mut self) -> usize {
        let before = self.masks.len();
        self.masks.retain(|_, m| !m.is_fully_opaque());
        before - self.masks.len()
    }

    /// Keep only masks whose layer is still alive.
    pub fn retain_layers(&mut self, alive: impl Fn(LayerId) -> bool) {
        self.masks.retain(|id, _| alive(*id));
    }

    pub fn ids(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.masks.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn memory_bytes(&self) -> usize {
        self.masks.values().map(AlphaMask::memory_bytes).sum()
    }
}

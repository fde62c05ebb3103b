use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::brush::{BrushSettings, PressureSettings};
use crate::error::{EditorError, EditorResult};

/// Tunables of one editing session, stored as JSON.
///
/// Every field has a default and unknown fields are ignored, so files written
/// by older or newer builds still load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    pub max_history: usize,
    /// `None` disables the memory cap.
    pub max_history_memory_mb: Option<usize>,
    /// Crop rectangles smaller than this on either axis are discarded.
    pub crop_min_size: f64,
    /// Handle hit radius in screen pixels.
    pub handle_hit_radius: f64,
    pub brush: BrushSettings,
    pub pressure: PressureSettings,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            max_history: 50,
            max_history_memory_mb: Some(512),
            crop_min_size: 10.0,
            handle_hit_radius: 8.0,
            brush: BrushSettings::default(),
            pressure: PressureSettings::default(),
        }
    }
}

impl EditorSettings {
    pub fn max_history_memory_bytes(&self) -> Option<usize> {
        self.max_history_memory_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }

    pub fn from_json_str(json: &str) -> EditorResult<Self> {
        serde_json::from_str(json).map_err(|e| EditorError::serde(format!("parse settings JSON: {e}")))
    }

    pub fn to_json_string(&self) -> EditorResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EditorError::serde(format!("write settings JSON: {e}")))
    }

    /// Read settings from `path`. A missing or unreadable file yields the
    /// defaults.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                info!(path = %path.display(), "no settings file ({e}), using defaults");
                return Self::default();
            }
        };
        Self::from_json_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), "{e}; using defaults");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> EditorResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

use crate::layer::LayerId;

/// Convenience result type used across the editing core.
pub type EditorResult<T> = Result<T, EditorError>;

/// Errors surfaced by structural editing operations.
///
/// Pointer-driven paths (dabs, session events, compositing) never return
/// these; they degrade to a silent no-op instead.
#[derive(thiserror::Error, Debug)]
pub enum EditorError {
    #[error("layer {0} not found")]
    LayerNotFound(LayerId),

    #[error("minimum one layer required")]
    MinimumOneLayer,

    #[error("layer {0} is locked")]
    LayerLocked(LayerId),

    #[error("layer {0} has no layer below it")]
    NoLayerBelow(LayerId),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("a transform is still pending; apply or discard it first")]
    PendingTransform,

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EditorError {
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

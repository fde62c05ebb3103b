//! Non-destructive raster editing core.
//!
//! Layers own their colour buffers; erasing only ever writes an alpha mask
//! kept beside the layer, so every edit can be undone, re-applied or
//! revealed again by dropping the mask. [`Document`] ties the pieces
//! together behind a pointer-event API for a host UI.

pub mod brush;
pub mod canvas;
pub mod compositor;
pub mod document;
pub mod error;
pub mod history;
pub mod io;
pub mod layer;
pub mod layers;
pub mod logger;
pub mod mask;
pub mod session;
pub mod settings;
pub mod tools;
pub mod viewport;

pub use brush::{BrushEngine, BrushSettings, CloneSource, Dab, PressureCurve, PressureSettings};
pub use canvas::{BlendMode, TiledImage};
pub use compositor::{Compositor, TransformPreview};
pub use document::{
    AsyncOutcome, AsyncTicket, CollaboratorResult, Document, HistoryRequest, PendingAction,
    PendingDecision, ToolRequest,
};
pub use error::{EditorError, EditorResult};
pub use history::{HistoryManager, HistorySnapshot};
pub use layer::{Layer, LayerId, LayerKind};
pub use layers::{Alignment, DistributeAxis, LayerStack};
pub use mask::{AlphaMask, AlphaMaskStore};
pub use session::{CropSession, Effects, PointerEvent, PointerPhase, TransformSession};
pub use settings::EditorSettings;
pub use tools::{Cursor, ToolMode};
pub use viewport::ViewTransform;

pub mod config;
pub mod decode;
pub mod editor;
pub mod error;
pub mod frames;
pub mod generative;
pub mod history;
pub mod layer;
pub mod mask;
pub mod processing;
pub mod session;
pub mod state;
pub mod viewport;

pub use config::EngineConfig;
pub use editor::EditorEngine;
pub use error::{EngineError, Result};
pub use frames::{Frame, FrameScope};
pub use layer::{BlendMode, Layer, LayerId, LayerStack, LayerUpdate};
pub use mask::Point;
pub use state::{FilterParameters, ToneLut};

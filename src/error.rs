//! Request-level error taxonomy. Every variant is terminal for the request.

use crate::assets::AssetImportError;
use crate::persist::PersistenceError;
use crate::render::RenderBackendError;
use crate::scene::serialization::SerializationError;
use crate::scene::SceneError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("{field} must be finite, got {value}")]
    NonFinite { field: String, value: f32 },
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: String, value: f64 },
    #[error("{field} must not be zero")]
    ZeroScale { field: String },
    #[error("{field} must not be empty")]
    EmptyPath { field: &'static str },
    #[error("base scene file does not exist: {}", .0.display())]
    MissingBaseScene(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("room asset: {0}")]
    Room(#[source] AssetImportError),
    #[error("object {index} ({}): {source}", path.display())]
    Object {
        index: usize,
        path: PathBuf,
        #[source]
        source: AssetImportError,
    },
    #[error("scene graph: {0}")]
    Scene(#[from] SceneError),
    #[error("base scene {}: {source}", path.display())]
    BaseScene {
        path: PathBuf,
        #[source]
        source: SerializationError,
    },
    #[error(transparent)]
    Render(#[from] RenderBackendError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ComposeError {
    /// Whether the request was rejected before the scene was touched.
    pub fn is_validation(&self) -> bool {
        matches!(self, ComposeError::Validation(_))
    }
}

//! Composer options that differ between deployments.
//!
//! Layering, later wins: built-in defaults, a JSON file (`--config` or the
//! `ROOMSTAGE_CONFIG` environment variable), then individual command-line flags.

use crate::error::ValidationError;
use crate::scene::RenderEngine;
use std::path::Path;

pub const CONFIG_ENV_VAR: &str = "ROOMSTAGE_CONFIG";

/// How the trailing process arguments encode the scene request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentEncoding {
    /// Nine ordered arguments describing one object.
    Positional,
    /// One JSON object argument.
    #[default]
    JsonBlob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneMode {
    /// Start from an empty store.
    Fresh,
    /// Reopen the request's scene file and add to it.
    Continuation,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Camera lens in millimetres.
    pub focal_length: f32,
    pub sensor_width: f32,
    pub light_location: [f32; 3],
    /// Point light power in watts.
    pub light_energy: f32,
    pub light_softness: f32,
    pub light_color: [f32; 3],
    /// Radius of the points the room scan is converted to.
    pub point_radius: f32,
    pub argument_encoding: ArgumentEncoding,
    /// `None` picks continuation when the request's scene file exists.
    pub scene_mode: Option<SceneMode>,
    pub film_transparent: bool,
    /// Engine switched to when a room asset is imported.
    pub room_engine: RenderEngine,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            focal_length: 23.0,
            sensor_width: 36.0,
            light_location: [2.0, 2.0, 5.0],
            light_energy: 4000.0,
            light_softness: 11.0,
            light_color: [1.0, 1.0, 1.0],
            point_radius: 0.01,
            argument_encoding: ArgumentEncoding::default(),
            scene_mode: None,
            film_transparent: true,
            room_engine: RenderEngine::PathTraced,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Json {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ComposerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, overlaid by the file named in `explicit` or, failing that, in
    /// `ROOMSTAGE_CONFIG`.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV_VAR).map(std::path::PathBuf::from);
        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                log::info!("Loading composer config from {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        positive("focal_length", self.focal_length)?;
        positive("sensor_width", self.sensor_width)?;
        positive("point_radius", self.point_radius)?;
        finite3("light_location", self.light_location)?;
        finite3("light_color", self.light_color)?;
        finite("light_energy", self.light_energy)?;
        finite("light_softness", self.light_softness)?;
        if self.light_energy < 0.0 {
            return Err(ValidationError::NotPositive {
                field: "light_energy".to_string(),
                value: self.light_energy as f64,
            });
        }
        if self.light_softness < 0.0 {
            return Err(ValidationError::NotPositive {
                field: "light_softness".to_string(),
                value: self.light_softness as f64,
            });
        }
        Ok(())
    }
}

pub(crate) fn finite(field: &str, value: f32) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite {
            field: field.to_string(),
            value,
        })
    }
}

pub(crate) fn finite3(field: &str, values: [f32; 3]) -> Result<(), ValidationError> {
    for (axis, value) in ["x", "y", "z"].iter().zip(values) {
        finite(&format!("{field}.{axis}"), value)?;
    }
    Ok(())
}

fn positive(field: &str, value: f32) -> Result<(), ValidationError> {
    finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::NotPositive {
            field: field.to_string(),
            value: value as f64,
        })
    }
}

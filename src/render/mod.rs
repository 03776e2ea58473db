mod camera;
mod raster;

pub use raster::SoftwareRasterizer;

use crate::scene::{SceneContext, SceneError};
use image::RgbaImage;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Largest accepted edge length in pixels.
pub const MAX_RESOLUTION: u32 = 16_384;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Png,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorMode {
    #[default]
    Rgba,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    pub resolution_x: u32,
    pub resolution_y: u32,
    pub format: OutputFormat,
    pub color_mode: ColorMode,
    /// Render the world background as fully transparent.
    pub film_transparent: bool,
}

impl RenderSettings {
    /// PNG, RGBA, transparent film.
    pub fn new(resolution_x: u32, resolution_y: u32) -> Self {
        Self {
            resolution_x,
            resolution_y,
            format: OutputFormat::Png,
            color_mode: ColorMode::Rgba,
            film_transparent: true,
        }
    }

    pub fn validate(&self) -> Result<(), RenderBackendError> {
        let valid = |value: u32| (1..=MAX_RESOLUTION).contains(&value);
        if valid(self.resolution_x) && valid(self.resolution_y) {
            Ok(())
        } else {
            Err(RenderBackendError::InvalidResolution {
                x: self.resolution_x,
                y: self.resolution_y,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderBackendError {
    #[error("unsupported resolution {x}x{y}, each side must be between 1 and 16384")]
    InvalidResolution { x: u32, y: u32 },
    #[error("scene has no active camera")]
    NoActiveCamera,
    #[error("scene cannot be rendered: {0}")]
    Scene(#[from] SceneError),
    #[error("{backend} backend produced a {actual:?} image, expected {expected:?}")]
    SizeMismatch {
        backend: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Something that turns a composed scene into pixels. Blocking, one frame per
/// call.
pub trait RenderBackend {
    fn name(&self) -> &str;
    fn render(
        &self,
        ctx: &SceneContext,
        settings: &RenderSettings,
    ) -> Result<RgbaImage, RenderBackendError>;
}

#[derive(Debug, Clone)]
pub struct RenderResult {
    pub image: RgbaImage,
    /// Where the image is to be written.
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the raw RGBA buffer.
    pub digest: String,
}

impl RenderResult {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

pub struct RenderInvoker {
    backend: Box<dyn RenderBackend>,
}

impl Default for RenderInvoker {
    fn default() -> Self {
        Self::new(SoftwareRasterizer)
    }
}

impl RenderInvoker {
    pub fn new(backend: impl RenderBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Renders one frame synchronously. Nothing is written to disk here.
    pub fn render(
        &self,
        ctx: &SceneContext,
        settings: &RenderSettings,
        output_path: &Path,
    ) -> Result<RenderResult, RenderBackendError> {
        settings.validate()?;
        log::info!(
            "Rendering {}x{} {:?}/{:?} with the {} backend ({:?} engine)",
            settings.resolution_x,
            settings.resolution_y,
            settings.format,
            settings.color_mode,
            self.backend_name(),
            ctx.engine()
        );

        let image = self.backend.render(ctx, settings)?;
        let expected = (settings.resolution_x, settings.resolution_y);
        if image.dimensions() != expected {
            return Err(RenderBackendError::SizeMismatch {
                backend: self.backend.name().to_string(),
                expected,
                actual: image.dimensions(),
            });
        }

        let digest = hex_digest(image.as_raw());
        log::info!("Render finished, digest {}", digest);
        Ok(RenderResult {
            image,
            path: output_path.to_path_buf(),
            digest,
        })
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

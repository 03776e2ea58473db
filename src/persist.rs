//! Writing the rendered image and the reusable scene state.
//!
//! Images are encoded next to their destination and renamed into place, so the
//! destination only ever holds a complete file from a successful run.

use crate::scene::serialization::{save_scene_to_file, SerializationError};
use crate::scene::SceneContext;
use image::RgbaImage;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed creating directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed encoding image for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed moving image into {}: {source}", path.display())]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed saving scene state to {}: {source}", path.display())]
    SceneState {
        path: PathBuf,
        #[source]
        source: SerializationError,
    },
}

/// A fully encoded PNG waiting next to its destination.
///
/// Dropping it without [`commit`](StagedImage::commit) deletes the temporary
/// file and leaves the destination untouched.
#[derive(Debug)]
pub struct StagedImage {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedImage {
    pub fn stage(image: &RgbaImage, target: &Path) -> Result<Self, PersistenceError> {
        ensure_parent(target)?;
        let temp = temp_sibling(target);
        let staged = Self {
            temp,
            target: target.to_path_buf(),
            committed: false,
        };
        write_image(image, &staged.temp)?;
        log::debug!("Staged image at {}", staged.temp.display());
        Ok(staged)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(mut self) -> Result<PathBuf, PersistenceError> {
        std::fs::rename(&self.temp, &self.target).map_err(|source| PersistenceError::Commit {
            path: self.target.clone(),
            source,
        })?;
        self.committed = true;
        log::info!("Wrote image {}", self.target.display());
        Ok(self.target.clone())
    }
}

impl Drop for StagedImage {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

/// Encodes `image` as an RGBA PNG at `path`, creating missing parent
/// directories. Not atomic; go through [`StagedImage`] for final outputs.
pub fn write_image(image: &RgbaImage, path: &Path) -> Result<(), PersistenceError> {
    ensure_parent(path)?;
    image::save_buffer_with_format(
        path,
        image.as_raw(),
        image.width(),
        image.height(),
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|source| PersistenceError::Encode {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_scene_state(ctx: &SceneContext, path: &Path) -> Result<(), PersistenceError> {
    ensure_parent(path)?;
    save_scene_to_file(ctx, path).map_err(|source| PersistenceError::SceneState {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!(
        "Saved scene state ({} objects, {} collections) to {}",
        ctx.object_count(),
        ctx.collections().len(),
        path.display()
    );
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "render".to_string());
    target.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

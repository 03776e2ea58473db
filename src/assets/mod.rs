mod obj;
mod ply;

use crate::materials::MaterialDefinition;
use crate::scene::serialization::load_scene_from_file;
use crate::scene::{
    MeshData, NodeId, ObjectData, SceneContext, SceneError, SceneObject, Transform,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One object produced by a format loader, before it is linked into a scene.
#[derive(Debug, Clone)]
pub struct LoadedObject {
    pub name: String,
    pub mesh: MeshData,
    /// Native materials, bound to the object's slots in order.
    pub materials: Vec<MaterialDefinition>,
    pub transform: Transform,
}

/// A backend that turns a file into loose objects. Errors are the backend's
/// own diagnostic text.
pub trait AssetLoader {
    fn load(&self, path: &Path) -> Result<Vec<LoadedObject>, String>;
}

impl<F> AssetLoader for F
where
    F: Fn(&Path) -> Result<Vec<LoadedObject>, String>,
{
    fn load(&self, path: &Path) -> Result<Vec<LoadedObject>, String> {
        self(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssetImportError {
    #[error("asset not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("unsupported asset format '{extension}': {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },
    #[error("failed to import {}: {diagnostic}", path.display())]
    Backend { path: PathBuf, diagnostic: String },
    #[error("failed to link objects from {}: {source}", path.display())]
    Scene {
        path: PathBuf,
        #[source]
        source: SceneError,
    },
}

/// Imports asset files into a [`SceneContext`], dispatching on file extension.
pub struct AssetImporter {
    loaders: BTreeMap<String, Box<dyn AssetLoader>>,
}

impl Default for AssetImporter {
    fn default() -> Self {
        Self::with_default_loaders()
    }
}

impl AssetImporter {
    pub fn new() -> Self {
        Self {
            loaders: BTreeMap::new(),
        }
    }

    /// OBJ meshes, PLY meshes/point clouds and saved scene files.
    pub fn with_default_loaders() -> Self {
        let mut importer = Self::new();
        importer.register("obj", obj::load_obj);
        importer.register("ply", ply::load_ply);
        importer.register("json", load_scene_objects);
        importer
    }

    pub fn register(&mut self, extension: &str, loader: impl AssetLoader + 'static) {
        self.loaders
            .insert(extension.to_ascii_lowercase(), Box::new(loader));
    }

    /// Imports `path` and returns exactly the top-level objects this call
    /// created, in load order. Nothing is added to the scene on failure.
    pub fn import(
        &self,
        ctx: &mut SceneContext,
        path: &Path,
    ) -> Result<Vec<NodeId>, AssetImportError> {
        if !path.is_file() {
            return Err(AssetImportError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let extension = extension_of(path).unwrap_or_default();
        let loader =
            self.loaders
                .get(&extension)
                .ok_or_else(|| AssetImportError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    extension: extension.clone(),
                })?;

        let loaded = loader
            .load(path)
            .map_err(|diagnostic| AssetImportError::Backend {
                path: path.to_path_buf(),
                diagnostic,
            })?;
        for object in &loaded {
            check_geometry(&object.mesh).map_err(|diagnostic| AssetImportError::Backend {
                path: path.to_path_buf(),
                diagnostic: format!("object '{}': {}", object.name, diagnostic),
            })?;
        }
        if loaded.is_empty() {
            log::warn!("{} contained no objects", path.display());
        }

        let collection = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("Imported")
            .to_string();
        let mut created = Vec::with_capacity(loaded.len());
        for object in loaded {
            let mesh = ctx.add_mesh(object.mesh);
            let mut scene_object = SceneObject::new(object.name, ObjectData::Mesh(mesh))
                .with_transform(object.transform);
            scene_object.material_slots = object
                .materials
                .into_iter()
                .map(|material| ctx.add_material(material))
                .collect();
            let id = ctx.add_root(scene_object);
            ctx.link_to_collection(&collection, id)
                .map_err(|source| AssetImportError::Scene {
                    path: path.to_path_buf(),
                    source,
                })?;
            created.push(id);
        }
        log::info!(
            "Imported {} object(s) from {}",
            created.len(),
            path.display()
        );
        Ok(created)
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

fn check_geometry(mesh: &MeshData) -> Result<(), String> {
    if mesh
        .positions
        .iter()
        .flatten()
        .any(|value| !value.is_finite())
    {
        return Err("non-finite vertex position".to_string());
    }
    let count = mesh.positions.len() as u32;
    if let Some(triangle) = mesh
        .triangles
        .iter()
        .find(|triangle| triangle.iter().any(|&index| index >= count))
    {
        return Err(format!(
            "triangle {:?} indexes past {} vertices",
            triangle, count
        ));
    }
    Ok(())
}

/// Reads a saved scene file as an interchange asset: every mesh object comes in
/// with its world transform baked into the vertices.
fn load_scene_objects(path: &Path) -> Result<Vec<LoadedObject>, String> {
    let scene = load_scene_from_file(path).map_err(|err| err.to_string())?;
    let mut objects = Vec::new();
    for (id, object) in scene.objects() {
        let Some(mesh_id) = object.mesh() else {
            continue;
        };
        let mut mesh = scene
            .mesh(mesh_id)
            .cloned()
            .ok_or_else(|| format!("{id} references missing {mesh_id}"))?;
        let world = scene.world_matrix(id).map_err(|err| err.to_string())?;
        let normal_matrix = glam::Mat3::from_mat4(world).inverse().transpose();
        for position in &mut mesh.positions {
            *position = world
                .transform_point3(glam::Vec3::from_array(*position))
                .to_array();
        }
        for normal in &mut mesh.normals {
            *normal = (normal_matrix * glam::Vec3::from_array(*normal))
                .normalize_or_zero()
                .to_array();
        }
        let materials = object
            .material_slots
            .iter()
            .filter_map(|material| scene.material(*material).cloned())
            .collect();
        objects.push(LoadedObject {
            name: object.name.clone(),
            mesh,
            materials,
            transform: Transform::IDENTITY,
        });
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::serialization::save_scene_to_file;
    use crate::test_support::{TempDir, ROOM_PLY, SQUARE_OBJ};
    use glam::Vec3;

    #[test]
    fn import_returns_only_newly_created_objects() {
        let dir = TempDir::new("import_scoped");
        let square = dir.write("square.obj", SQUARE_OBJ);
        let importer = AssetImporter::with_default_loaders();
        let mut ctx = SceneContext::new();

        let first = importer.import(&mut ctx, &square).unwrap();
        let second = importer.import(&mut ctx, &square).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first, second);
        assert_eq!(ctx.object_count(), 2);
        assert_eq!(ctx.collections().len(), 1);
        assert_eq!(ctx.collections()[0].objects.len(), 2);
        let mesh = ctx.object_mesh(first[0]).unwrap();
        assert!(mesh.color_attribute("Col").is_some());
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let dir = TempDir::new("import_missing");
        let path = dir.path().join("nope.obj");
        let mut ctx = SceneContext::new();
        let err = AssetImporter::with_default_loaders()
            .import(&mut ctx, &path)
            .unwrap_err();
        match err {
            AssetImportError::NotFound { path: missing } => assert_eq!(missing, path),
            other => panic!("unexpected {other:?}"),
        }
        assert!(ctx.is_empty());
    }

    #[test]
    fn unsupported_extension_and_backend_failure() {
        let dir = TempDir::new("import_bad");
        let usd = dir.write("chair.usd", "#usda 1.0");
        let broken = dir.write("room.ply", "ply\nformat ascii 1.0\nelement vertex 2\n");
        let importer = AssetImporter::with_default_loaders();
        let mut ctx = SceneContext::new();
        assert!(matches!(
            importer.import(&mut ctx, &usd),
            Err(AssetImportError::UnsupportedFormat { ref extension, .. }) if extension == "usd"
        ));
        assert!(matches!(
            importer.import(&mut ctx, &broken),
            Err(AssetImportError::Backend { .. })
        ));
        assert!(ctx.is_empty());
    }

    #[test]
    fn custom_loader_can_be_registered() {
        let dir = TempDir::new("import_custom");
        let path = dir.write("thing.xyz", "");
        let mut importer = AssetImporter::new();
        assert!(matches!(
            importer.import(&mut SceneContext::new(), &path),
            Err(AssetImportError::UnsupportedFormat { .. })
        ));
        importer.register("XYZ", |_: &Path| {
            Ok(vec![LoadedObject {
                name: "Thing".to_string(),
                mesh: MeshData::new("Thing"),
                materials: vec![MaterialDefinition::new("Red", [1.0, 0.0, 0.0, 1.0])],
                transform: Transform::IDENTITY,
            }])
        });
        let mut ctx = SceneContext::new();
        let ids = importer.import(&mut ctx, &path).unwrap();
        let object = ctx.object(ids[0]).unwrap();
        assert_eq!(object.material_slots.len(), 1);
        assert_eq!(ctx.material(object.material_slots[0]).unwrap().name, "Red");
    }

    #[test]
    fn scene_files_import_with_baked_world_transforms() {
        let dir = TempDir::new("import_scene");
        let ply = dir.write("room.ply", ROOM_PLY);
        let importer = AssetImporter::with_default_loaders();
        let mut source = SceneContext::new();
        let ids = importer.import(&mut source, &ply).unwrap();
        let group = source.add_root(SceneObject::empty("Furniture").with_transform(
            Transform::from_location_rotation(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO),
        ));
        source.set_parent(ids[0], Some(group)).unwrap();
        let saved = dir.path().join("saved.json");
        save_scene_to_file(&source, &saved).unwrap();

        let mut ctx = SceneContext::new();
        let imported = importer.import(&mut ctx, &saved).unwrap();
        assert_eq!(imported.len(), 1);
        let mesh = ctx.object_mesh(imported[0]).unwrap();
        assert_eq!(mesh.positions[0], [-2.0, 3.0, 9.0]);
        assert_eq!(ctx.world_matrix(imported[0]).unwrap(), glam::Mat4::IDENTITY);
    }
}

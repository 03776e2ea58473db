use crate::materials::MaterialDefinition;
use crate::scene::{
    Collection, MaterialId, MeshData, MeshId, NodeId, RenderEngine, SceneContext, SceneObject,
    World,
};
use std::collections::BTreeSet;
use std::path::Path;

pub const SCENE_FILE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported scene file version {found} (expected {SCENE_FILE_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("scene file is inconsistent: {0}")]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, SerializationError>;

#[derive(serde::Serialize, serde::Deserialize)]
struct Entry<K, V> {
    id: K,
    data: V,
}

/// On-disk form of a [`SceneContext`].
#[derive(serde::Serialize, serde::Deserialize)]
struct SceneDocument {
    version: u32,
    next_id: u64,
    engine: RenderEngine,
    world: Option<World>,
    active_camera: Option<NodeId>,
    objects: Vec<Entry<NodeId, SceneObject>>,
    meshes: Vec<Entry<MeshId, MeshData>>,
    materials: Vec<Entry<MaterialId, MaterialDefinition>>,
    collections: Vec<Collection>,
}

impl SceneDocument {
    fn capture(scene: &SceneContext) -> Self {
        Self {
            version: SCENE_FILE_VERSION,
            next_id: scene.next_id,
            engine: scene.engine,
            world: scene.world.clone(),
            active_camera: scene.active_camera,
            objects: scene
                .objects
                .iter()
                .map(|(id, data)| Entry {
                    id: *id,
                    data: data.clone(),
                })
                .collect(),
            meshes: scene
                .meshes
                .iter()
                .map(|(id, data)| Entry {
                    id: *id,
                    data: data.clone(),
                })
                .collect(),
            materials: scene
                .materials
                .iter()
                .map(|(id, data)| Entry {
                    id: *id,
                    data: data.clone(),
                })
                .collect(),
            collections: scene.collections.clone(),
        }
    }

    fn restore(self) -> Result<SceneContext> {
        if self.version != SCENE_FILE_VERSION {
            return Err(SerializationError::UnsupportedVersion {
                found: self.version,
            });
        }
        let scene = SceneContext {
            next_id: self.next_id,
            objects: self.objects.into_iter().map(|e| (e.id, e.data)).collect(),
            meshes: self.meshes.into_iter().map(|e| (e.id, e.data)).collect(),
            materials: self.materials.into_iter().map(|e| (e.id, e.data)).collect(),
            collections: self.collections,
            world: self.world,
            active_camera: self.active_camera,
            engine: self.engine,
        };
        check_references(&scene)?;
        Ok(scene)
    }
}

fn check_references(scene: &SceneContext) -> Result<()> {
    let max_id = scene
        .objects
        .keys()
        .map(|id| id.0)
        .chain(scene.meshes.keys().map(|id| id.0))
        .chain(scene.materials.keys().map(|id| id.0))
        .max();
    if let Some(max_id) = max_id {
        if max_id >= scene.next_id {
            return Err(SerializationError::Inconsistent(format!(
                "id counter {} is not past highest id {}",
                scene.next_id, max_id
            )));
        }
    }

    for (id, object) in &scene.objects {
        if let Some(parent) = object.parent {
            if !scene.objects.contains_key(&parent) {
                return Err(SerializationError::Inconsistent(format!(
                    "{id} has missing parent {parent}"
                )));
            }
        }
        if let Some(mesh) = object.mesh() {
            if !scene.meshes.contains_key(&mesh) {
                return Err(SerializationError::Inconsistent(format!(
                    "{id} references missing {mesh}"
                )));
            }
        }
        let materials = object.material_slots.iter().copied().chain(
            object
                .modifiers
                .iter()
                .flat_map(|modifier| modifier.referenced_materials()),
        );
        for material in materials {
            if !scene.materials.contains_key(&material) {
                return Err(SerializationError::Inconsistent(format!(
                    "{id} references missing {material}"
                )));
            }
        }
    }

    for id in scene.objects.keys() {
        let mut seen = BTreeSet::new();
        let mut cursor = Some(*id);
        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(SerializationError::Inconsistent(format!(
                    "parent chain of {id} loops"
                )));
            }
            cursor = scene.objects.get(&current).and_then(|o| o.parent);
        }
    }

    if let Some(camera) = scene.active_camera {
        let is_camera = scene
            .objects
            .get(&camera)
            .is_some_and(|object| object.camera().is_some());
        if !is_camera {
            return Err(SerializationError::Inconsistent(format!(
                "active camera {camera} is not a camera object"
            )));
        }
    }
    Ok(())
}

pub fn scene_to_string(scene: &SceneContext) -> Result<String> {
    Ok(serde_json::to_string_pretty(&SceneDocument::capture(scene))?)
}

pub fn scene_from_str(json: &str) -> Result<SceneContext> {
    let document: SceneDocument = serde_json::from_str(json)?;
    document.restore()
}

pub fn save_scene_to_file(scene: &SceneContext, path: &Path) -> Result<()> {
    let json = scene_to_string(scene)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_scene_from_file(path: &Path) -> Result<SceneContext> {
    let json = std::fs::read_to_string(path)?;
    scene_from_str(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::{bind_to_geometry_pipeline, create_vertex_color_material};
    use crate::scene::{CameraData, LightData, ObjectData, Transform};
    use glam::Vec3;

    fn sample_scene() -> SceneContext {
        let mut scene = SceneContext::new();
        let mut mesh = MeshData::new("room");
        mesh.positions = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        mesh.triangles = vec![[0, 1, 2]];
        mesh.color_attributes
            .insert("Col".to_string(), vec![[1.0, 0.0, 0.0, 1.0]; 3]);
        let mesh = scene.add_mesh(mesh);
        let room = scene.add_root(SceneObject::new("room", ObjectData::Mesh(mesh)));
        let material = scene.add_material(create_vertex_color_material("Material"));
        bind_to_geometry_pipeline(&mut scene, room, material, 0.01).unwrap();

        let camera = scene.add_root(
            SceneObject::new("Camera", ObjectData::Camera(CameraData::default()))
                .with_transform(Transform::from_location_rotation(
                    Vec3::new(0.0, -5.0, 1.0),
                    Vec3::new(1.2, 0.0, 0.0),
                )),
        );
        scene.set_active_camera(camera).unwrap();
        scene.add_root(SceneObject::new(
            "PointLight",
            ObjectData::Light(LightData {
                energy: 4000.0,
                color: [1.0, 1.0, 1.0],
                soft_size: 11.0,
            }),
        ));
        let group = scene.add_root(SceneObject::empty("Furniture"));
        scene.set_parent(room, Some(group)).unwrap();
        scene.link_to_collection("room", room).unwrap();
        scene.set_engine(RenderEngine::PathTraced);
        scene
    }

    #[test]
    fn test_empty_scene_serialization() {
        let scene = SceneContext::new();
        let json = scene_to_string(&scene).unwrap();
        let loaded = scene_from_str(&json).unwrap();
        assert_eq!(loaded.object_count(), 0);
        assert_eq!(loaded, scene);
    }

    #[test]
    fn test_populated_scene_restores_exactly() {
        let scene = sample_scene();
        let json = scene_to_string(&scene).unwrap();
        let loaded = scene_from_str(&json).unwrap();
        assert_eq!(loaded, scene);
        assert_eq!(loaded.engine(), RenderEngine::PathTraced);
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let json = scene_to_string(&SceneContext::new())
            .unwrap()
            .replace("\"version\": 1", "\"version\": 99");
        assert!(matches!(
            scene_from_str(&json),
            Err(SerializationError::UnsupportedVersion { found: 99 })
        ));
    }

    #[test]
    fn test_dangling_parent_is_rejected() {
        let mut scene = SceneContext::new();
        let group = scene.add_root(SceneObject::empty("Furniture"));
        let child = scene.add_root(SceneObject::empty("Child"));
        scene.set_parent(child, Some(group)).unwrap();
        scene.objects.remove(&group);
        let json = scene_to_string(&scene).unwrap();
        assert!(matches!(
            scene_from_str(&json),
            Err(SerializationError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_save_load_loop_via_file() {
        let mut scene = sample_scene();

        let mut path = std::env::temp_dir();
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        path.push(format!(
            "roomstage_scene_loop_{}_{}.json",
            std::process::id(),
            nonce
        ));

        let expected = scene.clone();
        for _ in 0..10 {
            save_scene_to_file(&scene, &path).unwrap();
            scene = load_scene_from_file(&path).unwrap();
            assert_eq!(scene, expected);
        }

        let _ = std::fs::remove_file(path);
    }
}

pub mod serialization;
mod transform;

pub use transform::Transform;

use crate::materials::{GeometryNodes, MaterialDefinition};
use glam::Mat4;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

macro_rules! scene_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

scene_id!(NodeId, "node");
scene_id!(MeshId, "mesh");
scene_id!(MaterialId, "material");

/// Geometry data block. Shared by reference from mesh objects.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MeshData {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    /// Per-vertex normals; empty when the source had none.
    #[serde(default)]
    pub normals: Vec<[f32; 3]>,
    /// Triangle list. Empty for point clouds.
    #[serde(default)]
    pub triangles: Vec<[u32; 3]>,
    /// Named per-vertex RGBA colour layers.
    #[serde(default)]
    pub color_attributes: BTreeMap<String, Vec<[f32; 4]>>,
}

impl MeshData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty() && self.normals.len() == self.positions.len()
    }

    /// Colour layer with exactly one entry per vertex, if present.
    pub fn color_attribute(&self, name: &str) -> Option<&[[f32; 4]]> {
        self.color_attributes
            .get(name)
            .filter(|colors| colors.len() == self.positions.len())
            .map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CameraData {
    /// Lens focal length in millimetres.
    pub focal_length: f32,
    pub sensor_width: f32,
    pub clip_start: f32,
    pub clip_end: f32,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            focal_length: 50.0,
            sensor_width: 36.0,
            clip_start: 0.1,
            clip_end: 1000.0,
        }
    }
}

/// Point light.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LightData {
    /// Radiant power in watts.
    pub energy: f32,
    pub color: [f32; 3],
    /// Soft shadow radius.
    pub soft_size: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ObjectData {
    Empty,
    Mesh(MeshId),
    Camera(CameraData),
    Light(LightData),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SceneObject {
    pub name: String,
    pub transform: Transform,
    pub parent: Option<NodeId>,
    pub data: ObjectData,
    #[serde(default)]
    pub material_slots: Vec<MaterialId>,
    #[serde(default)]
    pub modifiers: Vec<GeometryNodes>,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, data: ObjectData) -> Self {
        Self {
            name: name.into(),
            transform: Transform::IDENTITY,
            parent: None,
            data,
            material_slots: Vec::new(),
            modifiers: Vec::new(),
        }
    }

    /// Geometry-less grouping node.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, ObjectData::Empty)
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn mesh(&self) -> Option<MeshId> {
        match self.data {
            ObjectData::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn camera(&self) -> Option<&CameraData> {
        match &self.data {
            ObjectData::Camera(camera) => Some(camera),
            _ => None,
        }
    }

    pub fn light(&self) -> Option<&LightData> {
        match &self.data {
            ObjectData::Light(light) => Some(light),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderEngine {
    #[default]
    Raster,
    PathTraced,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct World {
    pub name: String,
    pub color: [f32; 3],
    pub strength: f32,
}

impl Default for World {
    fn default() -> Self {
        Self {
            name: "World".to_string(),
            color: [0.05, 0.05, 0.05],
            strength: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Collection {
    pub name: String,
    pub objects: Vec<NodeId>,
}

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("{0} is not in the scene")]
    UnknownNode(NodeId),
    #[error("{0} is not in the scene")]
    UnknownMaterial(MaterialId),
    #[error("parenting {child} under {parent} would create a cycle")]
    ParentCycle { child: NodeId, parent: NodeId },
    #[error("{0} is not a camera")]
    NotACamera(NodeId),
    #[error("{0} has no mesh geometry")]
    NotAMesh(NodeId),
    #[error("{0} references missing {1}")]
    DanglingMesh(NodeId, MeshId),
    #[error("{0} cannot take a non-finite transform")]
    NonFiniteTransform(NodeId),
}

/// The scene graph store for one render request.
///
/// Every component receives the context explicitly; nothing reads an ambient
/// "current scene". Node, mesh and material ids come from one counter and are
/// never reused until `reset`.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneContext {
    next_id: u64,
    objects: BTreeMap<NodeId, SceneObject>,
    meshes: BTreeMap<MeshId, MeshData>,
    materials: BTreeMap<MaterialId, MaterialDefinition>,
    collections: Vec<Collection>,
    world: Option<World>,
    active_camera: Option<NodeId>,
    engine: RenderEngine,
}

impl Default for SceneContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneContext {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            objects: BTreeMap::new(),
            meshes: BTreeMap::new(),
            materials: BTreeMap::new(),
            collections: Vec::new(),
            world: Some(World::default()),
            active_camera: None,
            engine: RenderEngine::default(),
        }
    }

    /// Removes every object, collection and data block and recreates the
    /// default world. Safe to call on an already empty store.
    pub fn reset(&mut self) {
        let removed = self.objects.len();
        self.objects.clear();
        self.collections.clear();
        self.active_camera = None;
        self.world = None;
        let purged = self.purge_orphans();
        self.world = Some(World::default());
        self.engine = RenderEngine::default();
        self.next_id = 0;
        debug_assert!(self.is_empty());
        log::debug!(
            "Scene reset: removed {} objects, purged {} data blocks",
            removed,
            purged
        );
    }

    /// Drops meshes and materials that no object references any more.
    /// Returns the number of data blocks removed.
    pub fn purge_orphans(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let used_meshes: BTreeSet<MeshId> =
                self.objects.values().filter_map(SceneObject::mesh).collect();
            let used_materials: BTreeSet<MaterialId> = self
                .objects
                .values()
                .flat_map(|object| {
                    object.material_slots.iter().copied().chain(
                        object
                            .modifiers
                            .iter()
                            .flat_map(GeometryNodes::referenced_materials),
                    )
                })
                .collect();

            let before = self.meshes.len() + self.materials.len();
            self.meshes.retain(|id, _| used_meshes.contains(id));
            self.materials.retain(|id, _| used_materials.contains(id));
            let pass = before - (self.meshes.len() + self.materials.len());
            if pass == 0 {
                return removed;
            }
            removed += pass;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
            && self.meshes.is_empty()
            && self.materials.is_empty()
            && self.collections.is_empty()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Registers a top-level node.
    pub fn add_root(&mut self, mut object: SceneObject) -> NodeId {
        object.parent = None;
        let id = NodeId(self.allocate_id());
        log::debug!("Add {} '{}'", id, object.name);
        self.objects.insert(id, object);
        id
    }

    pub fn add_mesh(&mut self, mesh: MeshData) -> MeshId {
        let id = MeshId(self.allocate_id());
        self.meshes.insert(id, mesh);
        id
    }

    pub fn add_material(&mut self, material: MaterialDefinition) -> MaterialId {
        let id = MaterialId(self.allocate_id());
        self.materials.insert(id, material);
        id
    }

    pub fn object(&self, id: NodeId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn object_mut(&mut self, id: NodeId) -> Result<&mut SceneObject, SceneError> {
        self.objects.get_mut(&id).ok_or(SceneError::UnknownNode(id))
    }

    pub fn objects(&self) -> impl Iterator<Item = (NodeId, &SceneObject)> {
        self.objects.iter().map(|(id, object)| (*id, object))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn mesh(&self, id: MeshId) -> Option<&MeshData> {
        self.meshes.get(&id)
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn material(&self, id: MaterialId) -> Option<&MaterialDefinition> {
        self.materials.get(&id)
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn engine(&self) -> RenderEngine {
        self.engine
    }

    pub fn set_engine(&mut self, engine: RenderEngine) {
        if self.engine != engine {
            log::info!("Render engine switched to {:?}", engine);
        }
        self.engine = engine;
    }

    pub fn active_camera(&self) -> Option<NodeId> {
        self.active_camera
    }

    pub fn set_active_camera(&mut self, id: NodeId) -> Result<(), SceneError> {
        let object = self.object(id).ok_or(SceneError::UnknownNode(id))?;
        if object.camera().is_none() {
            return Err(SceneError::NotACamera(id));
        }
        self.active_camera = Some(id);
        Ok(())
    }

    pub fn set_transform(&mut self, id: NodeId, transform: Transform) -> Result<(), SceneError> {
        if !transform.is_finite() {
            return Err(SceneError::NonFiniteTransform(id));
        }
        self.object_mut(id)?.transform = transform;
        Ok(())
    }

    /// Parents `child` under `parent`. The child's transform is kept as is and
    /// becomes relative to the parent.
    pub fn set_parent(&mut self, child: NodeId, parent: Option<NodeId>) -> Result<(), SceneError> {
        if !self.objects.contains_key(&child) {
            return Err(SceneError::UnknownNode(child));
        }
        if let Some(parent) = parent {
            let mut cursor = Some(parent);
            while let Some(current) = cursor {
                if current == child {
                    return Err(SceneError::ParentCycle { child, parent });
                }
                cursor = self
                    .objects
                    .get(&current)
                    .ok_or(SceneError::UnknownNode(current))?
                    .parent;
            }
        }
        self.object_mut(child)?.parent = parent;
        Ok(())
    }

    pub fn children(&self, parent: NodeId) -> Vec<NodeId> {
        self.objects
            .iter()
            .filter(|(_, object)| object.parent == Some(parent))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Removes one object. Its children become roots; data blocks stay until
    /// the next purge.
    pub fn remove_object(&mut self, id: NodeId) -> Result<SceneObject, SceneError> {
        let object = self.objects.remove(&id).ok_or(SceneError::UnknownNode(id))?;
        for child in self.objects.values_mut() {
            if child.parent == Some(id) {
                child.parent = None;
            }
        }
        for collection in &mut self.collections {
            collection.objects.retain(|member| *member != id);
        }
        if self.active_camera == Some(id) {
            self.active_camera = None;
        }
        Ok(object)
    }

    pub fn link_to_collection(&mut self, name: &str, id: NodeId) -> Result<(), SceneError> {
        if !self.objects.contains_key(&id) {
            return Err(SceneError::UnknownNode(id));
        }
        match self.collections.iter_mut().find(|c| c.name == name) {
            Some(collection) => {
                if !collection.objects.contains(&id) {
                    collection.objects.push(id);
                }
            }
            None => self.collections.push(Collection {
                name: name.to_string(),
                objects: vec![id],
            }),
        }
        Ok(())
    }

    /// Object-to-world matrix: every ancestor's transform applied in turn.
    pub fn world_matrix(&self, id: NodeId) -> Result<Mat4, SceneError> {
        let mut matrix = Mat4::IDENTITY;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let object = self
                .objects
                .get(&current)
                .ok_or(SceneError::UnknownNode(current))?;
            matrix = object.transform.matrix() * matrix;
            cursor = object.parent;
        }
        Ok(matrix)
    }

    /// Mesh data block of a mesh object.
    pub fn object_mesh(&self, id: NodeId) -> Result<&MeshData, SceneError> {
        let object = self.object(id).ok_or(SceneError::UnknownNode(id))?;
        let mesh_id = object.mesh().ok_or(SceneError::NotAMesh(id))?;
        self.mesh(mesh_id)
            .ok_or(SceneError::DanglingMesh(id, mesh_id))
    }
}

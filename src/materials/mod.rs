mod graph;

pub use graph::{EvaluatedGeometry, GeometryNodes, MeshToPointsMaterialGraph, Primitive};

use crate::scene::{MaterialId, NodeId, SceneContext, SceneError};

/// Per-vertex colour layer written by scanners and PLY/OBJ importers.
pub const VERTEX_COLOR_ATTRIBUTE: &str = "Col";

/// Surface colour used when nothing else provides one.
pub const DEFAULT_BASE_COLOR: [f32; 4] = [0.8, 0.8, 0.8, 1.0];

pub const GEOMETRY_NODES_NAME: &str = "Geometry Nodes";

/// Where a material's base colour comes from.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ColorSource {
    BaseColor,
    /// Named per-vertex colour layer, falling back to `base_color` when the
    /// geometry does not carry it.
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MaterialDefinition {
    pub name: String,
    pub base_color: [f32; 4],
    pub color_source: ColorSource,
}

impl MaterialDefinition {
    /// Flat-coloured material, as carried by imported assets.
    pub fn new(name: impl Into<String>, base_color: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            base_color,
            color_source: ColorSource::BaseColor,
        }
    }

    pub fn color_attribute(&self) -> Option<&str> {
        match &self.color_source {
            ColorSource::Attribute(name) => Some(name),
            ColorSource::BaseColor => None,
        }
    }
}

/// A material whose base colour reads the `Col` vertex colour layer.
pub fn create_vertex_color_material(name: &str) -> MaterialDefinition {
    MaterialDefinition {
        name: name.to_string(),
        base_color: DEFAULT_BASE_COLOR,
        color_source: ColorSource::Attribute(VERTEX_COLOR_ATTRIBUTE.to_string()),
    }
}

/// Attaches an empty (pass-through) geometry-nodes modifier to a mesh object.
pub fn add_geometry_nodes_modifier(ctx: &mut SceneContext, node: NodeId) -> Result<(), SceneError> {
    ctx.object_mesh(node)?;
    ctx.object_mut(node)?
        .modifiers
        .push(GeometryNodes::new(GEOMETRY_NODES_NAME));
    Ok(())
}

/// Fills the object's geometry-nodes modifier (adding one if it has none) with
/// the mesh-to-points / set-material chain.
///
/// Geometry without the material's colour layer still binds; it renders with
/// the material's base colour.
pub fn bind_to_geometry_pipeline(
    ctx: &mut SceneContext,
    node: NodeId,
    material: MaterialId,
    point_radius: f32,
) -> Result<MeshToPointsMaterialGraph, SceneError> {
    let attribute = ctx
        .material(material)
        .ok_or(SceneError::UnknownMaterial(material))?
        .color_attribute()
        .map(str::to_string);
    let mesh = ctx.object_mesh(node)?;
    if let Some(attribute) = attribute {
        if mesh.color_attribute(&attribute).is_none() {
            log::warn!(
                "{} '{}' has no '{}' colour layer; it will render with the base colour",
                node,
                mesh.name,
                attribute
            );
        }
    }

    let object = ctx.object_mut(node)?;
    if object.modifiers.is_empty() {
        object.modifiers.push(GeometryNodes::new(GEOMETRY_NODES_NAME));
    }
    let last = object.modifiers.len() - 1;
    let nodes = &mut object.modifiers[last];
    let graph = MeshToPointsMaterialGraph::build(nodes, point_radius, material);
    log::debug!(
        "Bound {} to {} via {} stage(s), points of radius {:?}",
        material,
        node,
        nodes.stages().len(),
        nodes.stage(graph.mesh_to_points).map(|stage| stage.radius)
    );
    Ok(graph)
}

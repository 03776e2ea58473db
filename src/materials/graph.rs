//! Typed geometry-processing graphs attached to mesh objects as modifiers.
//!
//! A [`GeometryNodes`] modifier is an ordered chain of stages between the
//! object's mesh (input) and what gets rendered (output). An empty chain passes
//! the mesh through untouched. Stages are reached through [`StageHandle`]s that
//! remember the stage type, so callers never look stages up by name.

use crate::scene::{MaterialId, MeshData};
use std::fmt;
use std::marker::PhantomData;

/// Converts the incoming mesh to one point per vertex.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MeshToPoints {
    /// Point radius, which is also the minimum spacing between neighbouring points.
    pub radius: f32,
}

/// Assigns a material to everything flowing through the stage.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SetMaterial {
    pub material: Option<MaterialId>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum GeometryStage {
    MeshToPoints(MeshToPoints),
    SetMaterial(SetMaterial),
}

impl From<MeshToPoints> for GeometryStage {
    fn from(stage: MeshToPoints) -> Self {
        GeometryStage::MeshToPoints(stage)
    }
}

impl From<SetMaterial> for GeometryStage {
    fn from(stage: SetMaterial) -> Self {
        GeometryStage::SetMaterial(stage)
    }
}

pub trait Stage: Into<GeometryStage> {
    fn from_stage(stage: &GeometryStage) -> Option<&Self>;
}

impl Stage for MeshToPoints {
    fn from_stage(stage: &GeometryStage) -> Option<&Self> {
        match stage {
            GeometryStage::MeshToPoints(inner) => Some(inner),
            _ => None,
        }
    }
}

impl Stage for SetMaterial {
    fn from_stage(stage: &GeometryStage) -> Option<&Self> {
        match stage {
            GeometryStage::SetMaterial(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Position of a stage of type `S` inside one [`GeometryNodes`] chain.
pub struct StageHandle<S> {
    index: usize,
    marker: PhantomData<fn() -> S>,
}

impl<S> Clone for StageHandle<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for StageHandle<S> {}

impl<S> PartialEq for StageHandle<S> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<S> fmt::Debug for StageHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageHandle<{}>({})", std::any::type_name::<S>(), self.index)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeometryNodes {
    pub name: String,
    stages: Vec<GeometryStage>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Triangles,
    Points { radius: f32 },
}

/// Output of a modifier chain for one mesh.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatedGeometry<'a> {
    pub mesh: &'a MeshData,
    pub primitive: Primitive,
    pub material: Option<MaterialId>,
}

impl GeometryNodes {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn push<S: Stage>(&mut self, stage: S) -> StageHandle<S> {
        self.stages.push(stage.into());
        StageHandle {
            index: self.stages.len() - 1,
            marker: PhantomData,
        }
    }

    pub fn stage<S: Stage>(&self, handle: StageHandle<S>) -> Option<&S> {
        self.stages.get(handle.index).and_then(S::from_stage)
    }

    pub fn stages(&self) -> &[GeometryStage] {
        &self.stages
    }

    pub fn clear(&mut self) {
        self.stages.clear();
    }

    pub fn referenced_materials(&self) -> Vec<MaterialId> {
        self.stages
            .iter()
            .filter_map(|stage| match stage {
                GeometryStage::SetMaterial(SetMaterial { material }) => *material,
                _ => None,
            })
            .collect()
    }

    /// Runs the chain over `input`, where `material` is what the object's
    /// own slots would render with.
    pub fn evaluate<'a>(&self, input: EvaluatedGeometry<'a>) -> EvaluatedGeometry<'a> {
        self.stages.iter().fold(input, |mut geometry, stage| {
            match stage {
                GeometryStage::MeshToPoints(MeshToPoints { radius }) => {
                    geometry.primitive = Primitive::Points { radius: *radius };
                }
                GeometryStage::SetMaterial(SetMaterial {
                    material: Some(material),
                }) => {
                    geometry.material = Some(*material);
                }
                GeometryStage::SetMaterial(SetMaterial { material: None }) => {}
            }
            geometry
        })
    }
}

/// Mesh -> points -> set material, the chain applied to scanned room geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshToPointsMaterialGraph {
    pub mesh_to_points: StageHandle<MeshToPoints>,
    pub set_material: StageHandle<SetMaterial>,
}

impl MeshToPointsMaterialGraph {
    /// Replaces whatever `nodes` held with the two-stage chain.
    pub fn build(nodes: &mut GeometryNodes, radius: f32, material: MaterialId) -> Self {
        nodes.clear();
        let mesh_to_points = nodes.push(MeshToPoints { radius });
        let set_material = nodes.push(SetMaterial {
            material: Some(material),
        });
        Self {
            mesh_to_points,
            set_material,
        }
    }
}

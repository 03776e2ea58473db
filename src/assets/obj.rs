use crate::assets::LoadedObject;
use crate::materials::{MaterialDefinition, DEFAULT_BASE_COLOR, VERTEX_COLOR_ATTRIBUTE};
use crate::scene::{MeshData, Transform};
use std::path::Path;

/// Loads every model of a Wavefront OBJ file, with its MTL diffuse colours.
pub fn load_obj(path: &Path) -> Result<Vec<LoadedObject>, String> {
    let (models, materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|err| err.to_string())?;

    let materials = materials.unwrap_or_else(|err| {
        log::warn!(
            "No usable MTL for {} ({}); using default materials",
            path.display(),
            err
        );
        Vec::new()
    });

    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("obj");

    let mut objects = Vec::with_capacity(models.len());
    for (index, model) in models.iter().enumerate() {
        let source = &model.mesh;
        let name = if model.name.is_empty() {
            format!("{stem}.{index:03}")
        } else {
            model.name.clone()
        };

        let mut mesh = MeshData::new(name.clone());
        mesh.positions = source
            .positions
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2]])
            .collect();
        if source.normals.len() == source.positions.len() {
            mesh.normals = source
                .normals
                .chunks_exact(3)
                .map(|n| [n[0], n[1], n[2]])
                .collect();
        }
        if source.vertex_color.len() == source.positions.len() {
            mesh.color_attributes.insert(
                VERTEX_COLOR_ATTRIBUTE.to_string(),
                source
                    .vertex_color
                    .chunks_exact(3)
                    .map(|c| [c[0], c[1], c[2], 1.0])
                    .collect(),
            );
        }
        mesh.triangles = source
            .indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();

        let material = source.material_id.and_then(|id| materials.get(id)).map(|mtl| {
            let diffuse = mtl.diffuse.unwrap_or([
                DEFAULT_BASE_COLOR[0],
                DEFAULT_BASE_COLOR[1],
                DEFAULT_BASE_COLOR[2],
            ]);
            MaterialDefinition::new(
                if mtl.name.is_empty() {
                    format!("{name}.material")
                } else {
                    mtl.name.clone()
                },
                [diffuse[0], diffuse[1], diffuse[2], mtl.dissolve.unwrap_or(1.0)],
            )
        });

        objects.push(LoadedObject {
            name,
            mesh,
            materials: material.into_iter().collect(),
            transform: Transform::IDENTITY,
        });
    }
    Ok(objects)
}

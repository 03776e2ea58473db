//! The scene composer: request in, rendered and persisted scene out.

mod placement;

pub use placement::{place_camera, place_light, LightParams};

use crate::app::StageTiming;
use crate::assets::AssetImporter;
use crate::config::{ComposerConfig, SceneMode};
use crate::error::{ComposeError, ValidationError};
use crate::materials::{
    add_geometry_nodes_modifier, bind_to_geometry_pipeline, create_vertex_color_material,
};
use crate::persist::{save_scene_state, StagedImage};
use crate::render::{RenderInvoker, RenderResult, RenderSettings};
use crate::request::SceneSpecification;
use crate::scene::serialization::load_scene_from_file;
use crate::scene::{CameraData, NodeId, SceneContext, SceneObject, Transform};

/// Display name shared by every object grouping node.
pub const FURNITURE_GROUP_NAME: &str = "Furniture";
/// Name of the vertex-colour material bound to room geometry.
pub const ROOM_MATERIAL_NAME: &str = "Material";

/// Nodes created by one composition.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub mode: SceneMode,
    pub room: Vec<NodeId>,
    pub camera: NodeId,
    pub light: NodeId,
    /// One grouping node per placed object, in request order.
    pub groups: Vec<NodeId>,
}

pub struct SceneComposer {
    config: ComposerConfig,
    importer: AssetImporter,
    invoker: RenderInvoker,
}

impl SceneComposer {
    /// Default loaders and the built-in software backend.
    pub fn new(config: ComposerConfig) -> Self {
        Self::with_parts(config, AssetImporter::default(), RenderInvoker::default())
    }

    pub fn with_parts(
        config: ComposerConfig,
        importer: AssetImporter,
        invoker: RenderInvoker,
    ) -> Self {
        Self {
            config,
            importer,
            invoker,
        }
    }

    /// Compose, render and persist in one go, timing each stage.
    pub fn run(
        &self,
        ctx: &mut SceneContext,
        spec: &SceneSpecification,
        timing: &mut StageTiming,
    ) -> Result<RenderResult, ComposeError> {
        timing.measure("compose", || self.compose(ctx, spec))?;
        let result = timing.measure("render", || self.render(ctx, spec))?;
        timing.measure("persist", || self.persist(ctx, spec, &result))?;
        Ok(result)
    }

    /// Which base scene a request starts from. Checked before any mutation.
    pub fn scene_mode(&self, spec: &SceneSpecification) -> Result<SceneMode, ValidationError> {
        let base = spec.scene_file_path.as_deref();
        match (self.config.scene_mode, base) {
            (Some(SceneMode::Fresh), _) => Ok(SceneMode::Fresh),
            (Some(SceneMode::Continuation), Some(path)) if path.is_file() => {
                Ok(SceneMode::Continuation)
            }
            (Some(SceneMode::Continuation), Some(path)) => {
                Err(ValidationError::MissingBaseScene(path.to_path_buf()))
            }
            (Some(SceneMode::Continuation), None) => {
                Err(ValidationError::MissingArgument("blend_file_path"))
            }
            (None, Some(path)) if path.is_file() => Ok(SceneMode::Continuation),
            (None, _) => Ok(SceneMode::Fresh),
        }
    }

    /// Builds the render-ready scene. Any failure leaves nothing rendered or
    /// written.
    pub fn compose(
        &self,
        ctx: &mut SceneContext,
        spec: &SceneSpecification,
    ) -> Result<Composition, ComposeError> {
        self.config.validate()?;
        spec.validate()?;
        let mode = self.scene_mode(spec)?;

        match (mode, spec.scene_file_path.as_deref()) {
            (SceneMode::Continuation, Some(path)) => {
                *ctx = load_scene_from_file(path).map_err(|source| ComposeError::BaseScene {
                    path: path.to_path_buf(),
                    source,
                })?;
                log::info!(
                    "Reopened base scene {} ({} objects, {} meshes, {} materials)",
                    path.display(),
                    ctx.object_count(),
                    ctx.mesh_count(),
                    ctx.material_count()
                );
            }
            _ => {
                ctx.reset();
                log::info!("Starting from an empty scene");
            }
        }

        let room = match &spec.room_asset_path {
            Some(path) => self.import_room(ctx, path)?,
            None => Vec::new(),
        };

        let camera = place_camera(
            ctx,
            spec.camera_location,
            spec.camera_angles,
            CameraData {
                focal_length: self.config.focal_length,
                sensor_width: self.config.sensor_width,
                ..CameraData::default()
            },
        )?;
        let light = place_light(ctx, LightParams::from_config(&self.config))?;

        let mut groups = Vec::with_capacity(spec.objects.len());
        for (index, object) in spec.objects.iter().enumerate() {
            let imported = self
                .importer
                .import(ctx, &object.asset_path)
                .map_err(|source| ComposeError::Object {
                    index,
                    path: object.asset_path.clone(),
                    source,
                })?;
            let group = ctx.add_root(SceneObject::empty(FURNITURE_GROUP_NAME));
            for child in &imported {
                ctx.set_parent(*child, Some(group))?;
            }
            ctx.set_transform(
                group,
                Transform::new(object.offset, object.angles, object.scale),
            )?;
            log::info!(
                "Placed object {} ({}) as {} with {} child(ren)",
                index,
                object.asset_path.display(),
                group,
                ctx.children(group).len()
            );
            groups.push(group);
        }

        Ok(Composition {
            mode,
            room,
            camera,
            light,
            groups,
        })
    }

    fn import_room(
        &self,
        ctx: &mut SceneContext,
        path: &std::path::Path,
    ) -> Result<Vec<NodeId>, ComposeError> {
        let room = self.importer.import(ctx, path).map_err(ComposeError::Room)?;
        ctx.set_engine(self.config.room_engine);
        let material = ctx.add_material(create_vertex_color_material(ROOM_MATERIAL_NAME));
        for id in &room {
            add_geometry_nodes_modifier(ctx, *id)?;
            bind_to_geometry_pipeline(ctx, *id, material, self.config.point_radius)?;
        }
        log::info!(
            "Room {} imported as {} object(s)",
            path.display(),
            room.len()
        );
        Ok(room)
    }

    pub fn render(
        &self,
        ctx: &SceneContext,
        spec: &SceneSpecification,
    ) -> Result<RenderResult, ComposeError> {
        let settings = RenderSettings {
            film_transparent: self.config.film_transparent,
            ..RenderSettings::new(spec.resolution_x, spec.resolution_y)
        };
        Ok(self.invoker.render(ctx, &settings, &spec.render_path)?)
    }

    /// Stages the image, saves the scene state if requested, then moves the
    /// image into place. A failed save discards the staged image.
    pub fn persist(
        &self,
        ctx: &SceneContext,
        spec: &SceneSpecification,
        result: &RenderResult,
    ) -> Result<(), ComposeError> {
        let staged = StagedImage::stage(&result.image, &result.path)?;
        log::debug!("Render staged for {}", staged.target().display());
        if let Some(path) = &spec.scene_file_path {
            save_scene_state(ctx, path)?;
        }
        staged.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetImportError, LoadedObject};
    use crate::request::PlacedObject;
    use crate::scene::MeshData;
    use crate::test_support::{TempDir, ROOM_PLY, SQUARE_OBJ};
    use glam::Vec3;
    use std::path::{Path, PathBuf};

    fn spec(dir: &Path, objects: Vec<PlacedObject>) -> SceneSpecification {
        SceneSpecification {
            camera_location: Vec3::new(0.0, 0.0, 5.0),
            camera_angles: Vec3::ZERO,
            resolution_x: 64,
            resolution_y: 64,
            render_path: dir.join("render.png"),
            room_asset_path: None,
            scene_file_path: None,
            objects,
        }
    }

    fn placed(path: &Path, offset: Vec3) -> PlacedObject {
        PlacedObject {
            asset_path: path.to_path_buf(),
            offset,
            angles: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }

    #[test]
    fn composing_twice_after_reset_is_pixel_identical() {
        let dir = TempDir::new("compose_determinism");
        let square = dir.write("square.obj", SQUARE_OBJ);
        let room = dir.write("room.ply", ROOM_PLY);
        let mut request = spec(dir.path(), vec![placed(&square, Vec3::new(0.5, 0.0, 0.0))]);
        request.room_asset_path = Some(room);
        let composer = SceneComposer::new(ComposerConfig::default());

        let mut ctx = SceneContext::new();
        composer.compose(&mut ctx, &request).unwrap();
        let first = composer.render(&ctx, &request).unwrap();
        composer.compose(&mut ctx, &request).unwrap();
        let second = composer.render(&ctx, &request).unwrap();
        assert_eq!(first.digest, second.digest);
        assert_eq!(first.image, second.image);
    }

    #[test]
    fn group_transforms_match_input_exactly() {
        let dir = TempDir::new("compose_isolation");
        let square = dir.write("square.obj", SQUARE_OBJ);
        let mut second = placed(&square, Vec3::new(-1.0, 0.0, 0.0));
        second.angles = Vec3::new(0.0, 0.0, 0.75);
        second.scale = Vec3::new(2.0, 2.0, 2.0);
        let request = spec(
            dir.path(),
            vec![placed(&square, Vec3::new(1.0, 0.0, 0.0)), second.clone()],
        );
        let composer = SceneComposer::new(ComposerConfig::default());
        let mut ctx = SceneContext::new();
        let composition = composer.compose(&mut ctx, &request).unwrap();

        assert_eq!(composition.groups.len(), 2);
        let (a, b) = (composition.groups[0], composition.groups[1]);
        assert_ne!(a, b);
        assert_eq!(
            ctx.object(a).unwrap().transform,
            Transform::new(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO, Vec3::ONE)
        );
        assert_eq!(
            ctx.object(b).unwrap().transform,
            Transform::new(second.offset, second.angles, second.scale)
        );
        for group in [a, b] {
            let object = ctx.object(group).unwrap();
            assert_eq!(object.name, FURNITURE_GROUP_NAME);
            assert_eq!(object.parent, None);
        }

        let children_a = ctx.children(a);
        let children_b = ctx.children(b);
        assert_eq!(children_a.len(), 1);
        assert_eq!(children_b.len(), 1);
        assert!(children_a.iter().all(|child| !children_b.contains(child)));
        assert_eq!(ctx.object(children_a[0]).unwrap().transform, Transform::IDENTITY);
    }

    #[test]
    fn empty_objects_render_at_requested_size() {
        let dir = TempDir::new("compose_empty");
        let mut request = spec(dir.path(), Vec::new());
        request.resolution_x = 512;
        request.resolution_y = 512;
        let composer = SceneComposer::new(ComposerConfig::default());
        let mut ctx = SceneContext::new();
        let result = composer.run(&mut ctx, &request, &mut StageTiming::new()).unwrap();
        assert_eq!(ctx.object_count(), 2);

        let decoded = image::open(&result.path).unwrap();
        assert_eq!(decoded.width(), 512);
        assert_eq!(decoded.height(), 512);
        assert_eq!(decoded.color(), image::ColorType::Rgba8);
    }

    #[test]
    fn missing_object_aborts_before_render() {
        let dir = TempDir::new("compose_missing");
        let square = dir.write("square.obj", SQUARE_OBJ);
        let request = spec(
            dir.path(),
            vec![
                placed(&square, Vec3::ZERO),
                placed(&dir.path().join("gone.obj"), Vec3::ZERO),
            ],
        );
        let composer = SceneComposer::new(ComposerConfig::default());
        let mut ctx = SceneContext::new();
        match composer.run(&mut ctx, &request, &mut StageTiming::new()) {
            Err(ComposeError::Object {
                index,
                path,
                source: AssetImportError::NotFound { .. },
            }) => {
                assert_eq!(index, 1);
                assert_eq!(path, dir.path().join("gone.obj"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!request.render_path.exists());
    }

    #[test]
    fn failed_run_keeps_previous_render() {
        let dir = TempDir::new("compose_stale");
        let previous = dir.write("render.png", "previous");
        let request = spec(dir.path(), vec![placed(&dir.path().join("gone.obj"), Vec3::ZERO)]);
        let composer = SceneComposer::new(ComposerConfig::default());
        assert!(composer.run(&mut SceneContext::new(), &request, &mut StageTiming::new()).is_err());
        assert_eq!(std::fs::read_to_string(previous).unwrap(), "previous");
    }

    #[test]
    fn failed_scene_save_discards_the_render() {
        let dir = TempDir::new("compose_save_fails");
        let previous = dir.write("render.png", "previous");
        let blocker = dir.write("blocker", "");
        let mut request = spec(dir.path(), Vec::new());
        request.scene_file_path = Some(blocker.join("scene.json"));
        let composer = SceneComposer::new(ComposerConfig::default());

        let err = composer
            .run(&mut SceneContext::new(), &request, &mut StageTiming::new())
            .unwrap_err();
        assert!(matches!(
            err,
            ComposeError::Persistence(crate::persist::PersistenceError::CreateDir { .. })
        ));
        assert_eq!(std::fs::read_to_string(&previous).unwrap(), "previous");
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["blocker", "render.png"]);
    }

    #[test]
    fn invalid_request_does_not_touch_the_scene() {
        let dir = TempDir::new("compose_invalid");
        let square = dir.write("square.obj", SQUARE_OBJ);
        let mut bad = placed(&square, Vec3::ZERO);
        bad.scale = Vec3::new(1.0, 0.0, 1.0);
        let request = spec(dir.path(), vec![bad]);
        let composer = SceneComposer::new(ComposerConfig::default());

        let mut ctx = SceneContext::new();
        let marker = ctx.add_root(SceneObject::empty("Existing"));
        let err = composer.compose(&mut ctx, &request).unwrap_err();
        assert!(err.is_validation());
        assert!(ctx.object(marker).is_some());
    }

    #[test]
    fn room_gets_point_cloud_material_and_path_traced_engine() {
        let dir = TempDir::new("compose_room");
        let room = dir.write("room.ply", ROOM_PLY);
        let mut request = spec(dir.path(), Vec::new());
        request.room_asset_path = Some(room);
        let composer = SceneComposer::new(ComposerConfig::default());
        let mut ctx = SceneContext::new();
        let composition = composer.compose(&mut ctx, &request).unwrap();

        assert_eq!(ctx.engine(), crate::scene::RenderEngine::PathTraced);
        assert_eq!(composition.room.len(), 1);
        let room = ctx.object(composition.room[0]).unwrap();
        assert_eq!(room.modifiers.len(), 1);
        let materials = room.modifiers[0].referenced_materials();
        assert_eq!(materials.len(), 1);
        let material = ctx.material(materials[0]).unwrap();
        assert_eq!(material.name, ROOM_MATERIAL_NAME);
        assert_eq!(material.color_attribute(), Some("Col"));
    }

    #[test]
    fn missing_room_is_a_room_error() {
        let dir = TempDir::new("compose_room_missing");
        let mut request = spec(dir.path(), Vec::new());
        request.room_asset_path = Some(dir.path().join("room.ply"));
        let composer = SceneComposer::new(ComposerConfig::default());
        assert!(matches!(
            composer.compose(&mut SceneContext::new(), &request),
            Err(ComposeError::Room(AssetImportError::NotFound { .. }))
        ));
    }

    #[test]
    fn saved_scene_is_reopened_and_extended() {
        let dir = TempDir::new("compose_continuation");
        let square = dir.write("square.obj", SQUARE_OBJ);
        let scene_path = dir.path().join("scene.json");
        let mut request = spec(dir.path(), vec![placed(&square, Vec3::new(1.0, 0.0, 0.0))]);
        request.scene_file_path = Some(scene_path.clone());
        let composer = SceneComposer::new(ComposerConfig::default());

        assert_eq!(composer.scene_mode(&request).unwrap(), SceneMode::Fresh);
        composer.run(&mut SceneContext::new(), &request, &mut StageTiming::new()).unwrap();
        assert!(scene_path.is_file());
        assert_eq!(composer.scene_mode(&request).unwrap(), SceneMode::Continuation);

        request.objects = vec![placed(&square, Vec3::new(-1.0, 0.0, 0.0))];
        let mut ctx = SceneContext::new();
        let composition = composer.compose(&mut ctx, &request).unwrap();
        assert_eq!(composition.mode, SceneMode::Continuation);
        let groups = ctx
            .objects()
            .filter(|(_, object)| object.name == FURNITURE_GROUP_NAME)
            .count();
        assert_eq!(groups, 2);
        let cameras = ctx.objects().filter(|(_, o)| o.camera().is_some()).count();
        assert_eq!(cameras, 1);
    }

    #[test]
    fn custom_importer_and_config_are_used() {
        let dir = TempDir::new("compose_parts");
        let asset = dir.write("chair.xyz", "");
        let mut importer = AssetImporter::new();
        importer.register("xyz", |_: &Path| {
            Ok(vec![LoadedObject {
                name: "Chair".to_string(),
                mesh: MeshData::new("Chair"),
                materials: Vec::new(),
                transform: Transform::IDENTITY,
            }])
        });
        let composer = SceneComposer::with_parts(
            ComposerConfig {
                focal_length: 50.0,
                ..ComposerConfig::default()
            },
            importer,
            RenderInvoker::default(),
        );
        let mut ctx = SceneContext::new();
        let request = spec(dir.path(), vec![placed(&asset, Vec3::ONE)]);
        let composition = composer.compose(&mut ctx, &request).unwrap();
        let camera = ctx.object(composition.camera).unwrap();
        assert_eq!(camera.camera().unwrap().focal_length, 50.0);
        assert_eq!(ctx.children(composition.groups[0]).len(), 1);
    }

    #[test]
    fn forced_continuation_needs_an_existing_file() {
        let dir = TempDir::new("compose_forced");
        let mut request = spec(dir.path(), Vec::new());
        let composer = SceneComposer::new(ComposerConfig {
            scene_mode: Some(SceneMode::Continuation),
            ..ComposerConfig::default()
        });
        assert!(matches!(
            composer.scene_mode(&request),
            Err(ValidationError::MissingArgument(_))
        ));
        let path: PathBuf = dir.path().join("absent.json");
        request.scene_file_path = Some(path.clone());
        match composer.scene_mode(&request) {
            Err(ValidationError::MissingBaseScene(missing)) => assert_eq!(missing, path),
            other => panic!("unexpected {other:?}"),
        }
    }
}

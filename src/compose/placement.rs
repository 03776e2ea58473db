use crate::config::{finite, finite3, ComposerConfig};
use crate::error::ComposeError;
use crate::scene::{CameraData, LightData, NodeId, ObjectData, SceneContext, SceneObject, Transform};
use glam::Vec3;

pub const CAMERA_NAME: &str = "Camera";
pub const LIGHT_NAME: &str = "Light";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightParams {
    pub location: Vec3,
    /// Watts.
    pub energy: f32,
    pub color: [f32; 3],
    /// Soft shadow radius.
    pub softness: f32,
}

impl LightParams {
    pub fn from_config(config: &ComposerConfig) -> Self {
        Self {
            location: Vec3::from_array(config.light_location),
            energy: config.light_energy,
            color: config.light_color,
            softness: config.light_softness,
        }
    }
}

/// Adds a camera at the given pose and makes it the active camera. A camera
/// that was active before is removed.
pub fn place_camera(
    ctx: &mut SceneContext,
    location: Vec3,
    angles: Vec3,
    lens: CameraData,
) -> Result<NodeId, ComposeError> {
    finite3("camera_location", location.to_array())?;
    finite3("camera_angles", angles.to_array())?;
    finite("focal_length", lens.focal_length)?;
    finite("sensor_width", lens.sensor_width)?;

    if let Some(previous) = ctx.active_camera() {
        ctx.remove_object(previous)?;
        log::debug!("Replaced active camera {}", previous);
    }
    let camera = ctx.add_root(
        SceneObject::new(CAMERA_NAME, ObjectData::Camera(lens))
            .with_transform(Transform::from_location_rotation(location, angles)),
    );
    ctx.set_active_camera(camera)?;
    log::info!(
        "Placed camera {} at {:?}, angles {:?}, lens {} mm",
        camera,
        location.to_array(),
        angles.to_array(),
        lens.focal_length
    );
    Ok(camera)
}

/// Adds the key point light. Lights this function placed earlier (by name)
/// are replaced so reopened scenes keep a single key light.
pub fn place_light(ctx: &mut SceneContext, params: LightParams) -> Result<NodeId, ComposeError> {
    finite3("light_location", params.location.to_array())?;
    finite3("light_color", params.color)?;
    finite("light_energy", params.energy)?;
    finite("light_softness", params.softness)?;

    let previous: Vec<NodeId> = ctx
        .objects()
        .filter(|(_, object)| object.name == LIGHT_NAME && object.light().is_some())
        .map(|(id, _)| id)
        .collect();
    for id in previous {
        ctx.remove_object(id)?;
    }

    let light = ctx.add_root(
        SceneObject::new(
            LIGHT_NAME,
            ObjectData::Light(LightData {
                energy: params.energy,
                color: params.color,
                soft_size: params.softness,
            }),
        )
        .with_transform(Transform::from_location_rotation(params.location, Vec3::ZERO)),
    );
    log::info!(
        "Placed light {} at {:?}, {} W",
        light,
        params.location.to_array(),
        params.energy
    );
    Ok(light)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens() -> CameraData {
        CameraData {
            focal_length: 23.0,
            ..CameraData::default()
        }
    }

    #[test]
    fn camera_becomes_the_only_active_camera() {
        let mut ctx = SceneContext::new();
        let first = place_camera(&mut ctx, Vec3::ZERO, Vec3::ZERO, lens()).unwrap();
        let second =
            place_camera(&mut ctx, Vec3::new(0.0, -5.0, 1.0), Vec3::new(1.4, 0.0, 0.0), lens())
                .unwrap();
        assert_ne!(first, second);
        assert_eq!(ctx.active_camera(), Some(second));
        assert!(ctx.object(first).is_none());
        let cameras = ctx.objects().filter(|(_, o)| o.camera().is_some()).count();
        assert_eq!(cameras, 1);
        let camera = ctx.object(second).unwrap();
        assert_eq!(camera.transform.location, Vec3::new(0.0, -5.0, 1.0));
        assert_eq!(camera.camera().unwrap().focal_length, 23.0);
    }

    #[test]
    fn non_finite_pose_is_rejected_before_mutation() {
        let mut ctx = SceneContext::new();
        let before = ctx.clone();
        let err = place_camera(&mut ctx, Vec3::new(f32::NAN, 0.0, 0.0), Vec3::ZERO, lens())
            .unwrap_err();
        assert!(err.is_validation());
        let mut params = LightParams::from_config(&ComposerConfig::default());
        params.energy = f32::INFINITY;
        assert!(place_light(&mut ctx, params).unwrap_err().is_validation());
        assert_eq!(ctx, before);
    }

    #[test]
    fn light_uses_configured_defaults_and_replaces_itself() {
        let mut ctx = SceneContext::new();
        let params = LightParams::from_config(&ComposerConfig::default());
        place_light(&mut ctx, params).unwrap();
        let light = place_light(&mut ctx, params).unwrap();
        assert_eq!(ctx.object_count(), 1);
        let object = ctx.object(light).unwrap();
        assert_eq!(object.transform.location, Vec3::new(2.0, 2.0, 5.0));
        let data = object.light().unwrap();
        assert_eq!(data.energy, 4000.0);
        assert_eq!(data.soft_size, 11.0);
        assert_eq!(data.color, [1.0, 1.0, 1.0]);
    }
}

use crate::scene::CameraData;
use glam::{Mat4, Vec3, Vec4};

/// View and projection for one camera at one output resolution.
///
/// Cameras look down their local -Z axis with +Y up. The sensor spans the
/// larger image dimension.
#[derive(Debug, Clone, Copy)]
pub struct CameraProjection {
    view: Mat4,
    projection: Mat4,
    eye: Vec3,
    width: f32,
    height: f32,
}

/// A point projected into pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
    /// Normalized depth, 0 at the near plane and 1 at the far plane.
    pub depth: f32,
    /// Clip-space w, the view-space distance along the view axis.
    pub w: f32,
}

impl CameraProjection {
    pub fn new(camera_world: Mat4, lens: &CameraData, width: u32, height: u32) -> Self {
        let width = width.max(1) as f32;
        let height = height.max(1) as f32;
        let aspect = width / height;
        let half_sensor = lens.sensor_width * 0.5 / lens.focal_length;
        let fov_y = if width >= height {
            2.0 * (half_sensor / aspect).atan()
        } else {
            2.0 * half_sensor.atan()
        };
        Self {
            view: camera_world.inverse(),
            projection: Mat4::perspective_rh(fov_y, aspect, lens.clip_start, lens.clip_end),
            eye: camera_world.transform_point3(Vec3::ZERO),
            width,
            height,
        }
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    /// Pixels per world unit at view distance 1.
    pub fn pixel_scale(&self) -> f32 {
        self.projection.y_axis.y * self.height * 0.5
    }

    /// Projects a world-space point. `None` when it lies behind the near plane.
    pub fn project(&self, world: Vec3) -> Option<ScreenPoint> {
        let clip: Vec4 = self.projection * self.view * world.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        if ndc.z < 0.0 {
            return None;
        }
        Some(ScreenPoint {
            x: (ndc.x * 0.5 + 0.5) * self.width,
            y: (0.5 - ndc.y * 0.5) * self.height,
            depth: ndc.z,
            w: clip.w,
        })
    }
}

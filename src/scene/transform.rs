use glam::{Mat4, Vec3};

/// Location, XYZ Euler rotation (radians) and scale of a scene node.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transform {
    pub location: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        location: Vec3::ZERO,
        rotation: Vec3::ZERO,
        scale: Vec3::ONE,
    };

    pub fn new(location: Vec3, rotation: Vec3, scale: Vec3) -> Self {
        Self {
            location,
            rotation,
            scale,
        }
    }

    pub fn from_location_rotation(location: Vec3, rotation: Vec3) -> Self {
        Self::new(location, rotation, Vec3::ONE)
    }

    /// Local-to-parent matrix: translation * Rz * Ry * Rx * scale.
    pub fn matrix(&self) -> Mat4 {
        compose_transform_matrix(self.location, self.rotation, self.scale)
    }

    pub fn is_finite(&self) -> bool {
        self.location.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

pub fn compose_transform_matrix(location: Vec3, rotation: Vec3, scale: Vec3) -> Mat4 {
    // X is applied first, then Y, then Z.
    let rotation = Mat4::from_rotation_z(rotation.z)
        * Mat4::from_rotation_y(rotation.y)
        * Mat4::from_rotation_x(rotation.x);
    Mat4::from_translation(location) * rotation * Mat4::from_scale(scale)
}

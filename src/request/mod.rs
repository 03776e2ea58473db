//! The scene request: wire decoding and the validated [`SceneSpecification`].

use crate::config::{finite3, ArgumentEncoding};
use crate::error::ValidationError;
use glam::Vec3;
use std::path::{Path, PathBuf};

/// Number of trailing arguments in the positional encoding.
pub const POSITIONAL_ARGUMENT_COUNT: usize = 9;

/// One asset to place. Angles are XYZ Euler radians.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedObject {
    pub asset_path: PathBuf,
    pub offset: Vec3,
    pub angles: Vec3,
    pub scale: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneSpecification {
    pub camera_location: Vec3,
    pub camera_angles: Vec3,
    pub resolution_x: u32,
    pub resolution_y: u32,
    pub render_path: PathBuf,
    pub room_asset_path: Option<PathBuf>,
    /// Base scene to reopen and, when present, where the composed scene is saved.
    pub scene_file_path: Option<PathBuf>,
    pub objects: Vec<PlacedObject>,
}

#[derive(Debug, serde::Deserialize)]
struct ObjectPayload {
    obj_path: String,
    obj_offsets: [f32; 3],
    obj_angles: [f32; 3],
    obj_scale: [f32; 3],
}

#[derive(Debug, serde::Deserialize)]
struct ScenePayload {
    camera_location: [f32; 3],
    camera_angles: [f32; 3],
    resolution_x: i64,
    resolution_y: i64,
    render_path: String,
    #[serde(default)]
    room_point_cloud_path: Option<String>,
    #[serde(default)]
    blend_file_path: Option<String>,
    objects: Vec<ObjectPayload>,
}

impl SceneSpecification {
    /// Decodes the trailing process arguments in the given encoding.
    pub fn decode(encoding: ArgumentEncoding, args: &[String]) -> Result<Self, ValidationError> {
        let spec = match encoding {
            ArgumentEncoding::JsonBlob => Self::from_json_blob(args)?,
            ArgumentEncoding::Positional => Self::from_positional(args)?,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn from_json_blob(args: &[String]) -> Result<Self, ValidationError> {
        let blob = match args {
            [] => return Err(ValidationError::MissingArgument("scene JSON")),
            [blob] => blob,
            _ => {
                return Err(ValidationError::Malformed(format!(
                    "expected one JSON argument, got {}",
                    args.len()
                )))
            }
        };
        let payload: ScenePayload = serde_json::from_str(blob)
            .map_err(|err| ValidationError::Malformed(format!("scene JSON: {err}")))?;

        let objects = payload
            .objects
            .into_iter()
            .map(|object| {
                Ok(PlacedObject {
                    asset_path: absolute(&object.obj_path)?,
                    offset: Vec3::from_array(object.obj_offsets),
                    angles: Vec3::from_array(object.obj_angles),
                    scale: Vec3::from_array(object.obj_scale),
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(Self {
            camera_location: Vec3::from_array(payload.camera_location),
            camera_angles: Vec3::from_array(payload.camera_angles),
            resolution_x: resolution("resolution_x", payload.resolution_x)?,
            resolution_y: resolution("resolution_y", payload.resolution_y)?,
            render_path: PathBuf::from(payload.render_path),
            room_asset_path: optional_path(payload.room_point_cloud_path),
            scene_file_path: optional_path(payload.blend_file_path),
            objects,
        })
    }

    /// `obj_angles obj_scale obj_offsets camera_angles camera_location
    /// resolution_x resolution_y obj_path render_path`, numbers JSON-encoded.
    fn from_positional(args: &[String]) -> Result<Self, ValidationError> {
        let [obj_angles, obj_scale, obj_offsets, camera_angles, camera_location, resolution_x, resolution_y, obj_path, render_path] =
            args
        else {
            return Err(ValidationError::Malformed(format!(
                "expected {} positional arguments, got {}",
                POSITIONAL_ARGUMENT_COUNT,
                args.len()
            )));
        };

        Ok(Self {
            camera_location: vector("camera_location", camera_location)?,
            camera_angles: vector("camera_angles", camera_angles)?,
            resolution_x: resolution("resolution_x", integer("resolution_x", resolution_x)?)?,
            resolution_y: resolution("resolution_y", integer("resolution_y", resolution_y)?)?,
            render_path: PathBuf::from(render_path),
            room_asset_path: None,
            scene_file_path: None,
            objects: vec![PlacedObject {
                asset_path: absolute(obj_path)?,
                offset: vector("obj_offsets", obj_offsets)?,
                angles: vector("obj_angles", obj_angles)?,
                scale: vector("obj_scale", obj_scale)?,
            }],
        })
    }

    /// Checks every invariant the composer relies on. Runs before any scene
    /// mutation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        finite3("camera_location", self.camera_location.to_array())?;
        finite3("camera_angles", self.camera_angles.to_array())?;
        for (name, value) in [
            ("resolution_x", self.resolution_x),
            ("resolution_y", self.resolution_y),
        ] {
            if value == 0 {
                return Err(ValidationError::NotPositive {
                    field: name.to_string(),
                    value: 0.0,
                });
            }
        }
        if self.render_path.as_os_str().is_empty() {
            return Err(ValidationError::EmptyPath {
                field: "render_path",
            });
        }
        for (index, object) in self.objects.iter().enumerate() {
            if object.asset_path.as_os_str().is_empty() {
                return Err(ValidationError::EmptyPath { field: "obj_path" });
            }
            finite3(&format!("objects[{index}].obj_offsets"), object.offset.to_array())?;
            finite3(&format!("objects[{index}].obj_angles"), object.angles.to_array())?;
            finite3(&format!("objects[{index}].obj_scale"), object.scale.to_array())?;
            if object.scale.cmpeq(Vec3::ZERO).any() {
                return Err(ValidationError::ZeroScale {
                    field: format!("objects[{index}].obj_scale"),
                });
            }
        }
        Ok(())
    }
}

fn optional_path(path: Option<String>) -> Option<PathBuf> {
    path.filter(|path| !path.is_empty()).map(PathBuf::from)
}

fn absolute(path: &str) -> Result<PathBuf, ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::EmptyPath { field: "obj_path" });
    }
    let path = Path::new(path);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| ValidationError::Malformed(format!("cannot resolve {}: {err}", path.display())))
}

fn vector(field: &str, text: &str) -> Result<Vec3, ValidationError> {
    let values: [f32; 3] = serde_json::from_str(text)
        .map_err(|err| ValidationError::Malformed(format!("{field}: {err}")))?;
    Ok(Vec3::from_array(values))
}

fn integer(field: &str, text: &str) -> Result<i64, ValidationError> {
    serde_json::from_str(text).map_err(|err| ValidationError::Malformed(format!("{field}: {err}")))
}

fn resolution(field: &str, value: i64) -> Result<u32, ValidationError> {
    u32::try_from(value)
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| ValidationError::NotPositive {
            field: field.to_string(),
            value: value as f64,
        })
}

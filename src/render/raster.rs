//! Built-in software backend: a z-buffered rasterizer with point-light shading.

use super::camera::{CameraProjection, ScreenPoint};
use super::{ColorMode, RenderBackend, RenderBackendError, RenderSettings};
use crate::materials::{EvaluatedGeometry, Primitive, DEFAULT_BASE_COLOR};
use crate::scene::{LightData, MeshData, NodeId, RenderEngine, SceneContext};
use glam::{Mat3, Mat4, Vec3, Vec4};
use image::{Rgba, RgbaImage};

/// Scales watts at the light into display radiance.
const EXPOSURE: f32 = 0.05;
const GAMMA: f32 = 1.0 / 2.2;
/// Smallest on-screen point radius, so every visible point covers its pixel.
const MIN_POINT_RADIUS_PX: f32 = 0.5;

#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareRasterizer;

struct PointLight {
    position: Vec3,
    data: LightData,
}

struct Shading {
    engine: RenderEngine,
    ambient: Vec3,
    lights: Vec<PointLight>,
    eye: Vec3,
}

impl Shading {
    /// Lambert sum over point lights. The path-traced engine wraps the
    /// falloff by each light's soft size, brightening grazing surfaces.
    fn shade(&self, position: Vec3, normal: Vec3, albedo: Vec4) -> Vec4 {
        let mut normal = normal.normalize_or_zero();
        if normal.dot(self.eye - position) < 0.0 {
            normal = -normal;
        }
        let mut radiance = self.ambient;
        for light in &self.lights {
            let to_light = light.position - position;
            let distance_sq = to_light.length_squared().max(1e-6);
            let distance = distance_sq.sqrt();
            let mut cosine = if normal == Vec3::ZERO {
                1.0
            } else {
                normal.dot(to_light / distance)
            };
            if self.engine == RenderEngine::PathTraced && light.data.soft_size > 0.0 {
                let wrap = light.data.soft_size / (light.data.soft_size + distance);
                cosine = (cosine + wrap) / (1.0 + wrap);
            }
            let irradiance = light.data.energy * cosine.max(0.0)
                / (4.0 * std::f32::consts::PI * distance_sq)
                * EXPOSURE;
            radiance += Vec3::from_array(light.data.color) * irradiance;
        }
        (albedo.truncate() * radiance).extend(albedo.w)
    }
}

struct Framebuffer {
    width: u32,
    height: u32,
    color: Vec<Vec4>,
    depth: Vec<f32>,
}

impl Framebuffer {
    fn new(width: u32, height: u32, background: Vec4) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![background; len],
            depth: vec![f32::INFINITY; len],
        }
    }

    /// Depth test. Returns the pixel index when the fragment is nearer.
    fn test(&mut self, x: u32, y: u32, depth: f32) -> Option<usize> {
        let index = y as usize * self.width as usize + x as usize;
        if depth < self.depth[index] {
            self.depth[index] = depth;
            Some(index)
        } else {
            None
        }
    }
}

/// World-space vertex attributes of one mesh instance.
struct Instance {
    positions: Vec<Vec3>,
    normals: Option<Vec<Vec3>>,
    colors: Option<Vec<Vec4>>,
    base_color: Vec4,
}

impl Instance {
    fn color(&self, vertex: usize) -> Vec4 {
        self.colors
            .as_ref()
            .and_then(|colors| colors.get(vertex).copied())
            .unwrap_or(self.base_color)
    }
}

impl RenderBackend for SoftwareRasterizer {
    fn name(&self) -> &str {
        "software"
    }

    fn render(
        &self,
        ctx: &SceneContext,
        settings: &RenderSettings,
    ) -> Result<RgbaImage, RenderBackendError> {
        let camera_id = ctx
            .active_camera()
            .ok_or(RenderBackendError::NoActiveCamera)?;
        let lens = ctx
            .object(camera_id)
            .and_then(|object| object.camera().copied())
            .ok_or(RenderBackendError::NoActiveCamera)?;
        let projection = CameraProjection::new(
            ctx.world_matrix(camera_id)?,
            &lens,
            settings.resolution_x,
            settings.resolution_y,
        );

        let world_color = ctx
            .world()
            .map(|world| Vec3::from_array(world.color) * world.strength)
            .unwrap_or(Vec3::ZERO);
        let mut lights = Vec::new();
        for (id, object) in ctx.objects() {
            if let Some(light) = object.light() {
                lights.push(PointLight {
                    position: ctx.world_matrix(id)?.transform_point3(Vec3::ZERO),
                    data: *light,
                });
            }
        }
        let shading = Shading {
            engine: ctx.engine(),
            ambient: world_color,
            lights,
            eye: projection.eye(),
        };

        let background = if settings.film_transparent {
            Vec4::ZERO
        } else {
            world_color.extend(1.0)
        };
        let mut frame = Framebuffer::new(settings.resolution_x, settings.resolution_y, background);

        let mut drawn = 0usize;
        for (id, object) in ctx.objects() {
            let Some(mesh_id) = object.mesh() else {
                continue;
            };
            let mesh = ctx
                .mesh(mesh_id)
                .ok_or(crate::scene::SceneError::DanglingMesh(id, mesh_id))?;
            let geometry = object.modifiers.iter().fold(
                EvaluatedGeometry {
                    mesh,
                    primitive: Primitive::Triangles,
                    material: object.material_slots.first().copied(),
                },
                |geometry, modifier| modifier.evaluate(geometry),
            );
            let instance = world_instance(ctx, id, &geometry)?;
            match geometry.primitive {
                Primitive::Triangles => {
                    draw_triangles(&mut frame, &projection, &shading, mesh, &instance)
                }
                Primitive::Points { radius } => {
                    draw_points(&mut frame, &projection, &shading, &instance, radius)
                }
            }
            drawn += 1;
        }
        log::debug!(
            "Rasterized {} object(s) under {} light(s)",
            drawn,
            shading.lights.len()
        );

        Ok(resolve(&frame, settings.color_mode))
    }
}

fn world_instance(
    ctx: &SceneContext,
    id: NodeId,
    geometry: &EvaluatedGeometry<'_>,
) -> Result<Instance, RenderBackendError> {
    let world: Mat4 = ctx.world_matrix(id)?;
    let normal_matrix = Mat3::from_mat4(world).inverse().transpose();
    let mesh = geometry.mesh;

    let material = geometry.material.and_then(|material| ctx.material(material));
    let base_color = Vec4::from_array(
        material
            .map(|material| material.base_color)
            .unwrap_or(DEFAULT_BASE_COLOR),
    );
    let colors = material
        .and_then(|material| material.color_attribute())
        .and_then(|name| mesh.color_attribute(name))
        .filter(|colors| colors.len() == mesh.vertex_count())
        .map(|colors| colors.iter().copied().map(Vec4::from_array).collect());

    Ok(Instance {
        positions: mesh
            .positions
            .iter()
            .map(|p| world.transform_point3(Vec3::from_array(*p)))
            .collect(),
        normals: mesh.has_normals().then(|| {
            mesh.normals
                .iter()
                .map(|n| normal_matrix * Vec3::from_array(*n))
                .collect()
        }),
        colors,
        base_color,
    })
}

fn draw_triangles(
    frame: &mut Framebuffer,
    projection: &CameraProjection,
    shading: &Shading,
    mesh: &MeshData,
    instance: &Instance,
) {
    let projected: Vec<Option<ScreenPoint>> = instance
        .positions
        .iter()
        .map(|p| projection.project(*p))
        .collect();

    for triangle in &mesh.triangles {
        let [a, b, c] = triangle.map(|index| index as usize);
        if a.max(b).max(c) >= projected.len() {
            continue;
        }
        let (Some(pa), Some(pb), Some(pc)) = (projected[a], projected[b], projected[c]) else {
            continue;
        };
        let area = edge(pa, pb, pc.x, pc.y);
        if area.abs() < f32::EPSILON {
            continue;
        }
        let face_normal = (instance.positions[b] - instance.positions[a])
            .cross(instance.positions[c] - instance.positions[a]);

        let min_x = pa.x.min(pb.x).min(pc.x).floor().max(0.0) as u32;
        let min_y = pa.y.min(pb.y).min(pc.y).floor().max(0.0) as u32;
        let max_x = (pa.x.max(pb.x).max(pc.x).ceil() as u32).min(frame.width);
        let max_y = (pa.y.max(pb.y).max(pc.y).ceil() as u32).min(frame.height);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(pb, pc, px, py) / area;
                let w1 = edge(pc, pa, px, py) / area;
                let w2 = edge(pa, pb, px, py) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let depth = w0 * pa.depth + w1 * pb.depth + w2 * pc.depth;
                if depth > 1.0 {
                    continue;
                }
                let Some(index) = frame.test(x, y, depth) else {
                    continue;
                };

                // Perspective-correct weights.
                let (p0, p1, p2) = (w0 / pa.w, w1 / pb.w, w2 / pc.w);
                let sum = p0 + p1 + p2;
                let (p0, p1, p2) = (p0 / sum, p1 / sum, p2 / sum);
                let position = instance.positions[a] * p0
                    + instance.positions[b] * p1
                    + instance.positions[c] * p2;
                let normal = match &instance.normals {
                    Some(normals) => normals[a] * p0 + normals[b] * p1 + normals[c] * p2,
                    None => face_normal,
                };
                let albedo =
                    instance.color(a) * p0 + instance.color(b) * p1 + instance.color(c) * p2;
                frame.color[index] = shading.shade(position, normal, albedo);
            }
        }
    }
}

fn draw_points(
    frame: &mut Framebuffer,
    projection: &CameraProjection,
    shading: &Shading,
    instance: &Instance,
    radius: f32,
) {
    for (vertex, position) in instance.positions.iter().enumerate() {
        let Some(center) = projection.project(*position) else {
            continue;
        };
        if center.depth > 1.0 {
            continue;
        }
        let radius_px = (radius * projection.pixel_scale() / center.w).max(MIN_POINT_RADIUS_PX);
        let normal = instance
            .normals
            .as_ref()
            .map(|normals| normals[vertex])
            .unwrap_or(shading.eye - *position);
        let color = shading.shade(*position, normal, instance.color(vertex));

        let min_x = (center.x - radius_px).floor().max(0.0) as u32;
        let min_y = (center.y - radius_px).floor().max(0.0) as u32;
        let max_x = ((center.x + radius_px).ceil().max(0.0) as u32).min(frame.width);
        let max_y = ((center.y + radius_px).ceil().max(0.0) as u32).min(frame.height);
        for y in min_y..max_y {
            for x in min_x..max_x {
                let dx = x as f32 + 0.5 - center.x;
                let dy = y as f32 + 0.5 - center.y;
                if dx * dx + dy * dy > radius_px * radius_px {
                    continue;
                }
                if let Some(index) = frame.test(x, y, center.depth) {
                    frame.color[index] = color;
                }
            }
        }
    }
}

fn edge(a: ScreenPoint, b: ScreenPoint, x: f32, y: f32) -> f32 {
    (b.x - a.x) * (y - a.y) - (b.y - a.y) * (x - a.x)
}

fn resolve(frame: &Framebuffer, mode: ColorMode) -> RgbaImage {
    let mut image = RgbaImage::new(frame.width, frame.height);
    for (pixel, color) in image.pixels_mut().zip(&frame.color) {
        let encode = |value: f32| (value.clamp(0.0, 1.0).powf(GAMMA) * 255.0).round() as u8;
        let alpha = match mode {
            ColorMode::Rgba => (color.w.clamp(0.0, 1.0) * 255.0).round() as u8,
        };
        *pixel = Rgba([encode(color.x), encode(color.y), encode(color.z), alpha]);
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::{bind_to_geometry_pipeline, create_vertex_color_material, MaterialDefinition};
    use crate::scene::{CameraData, ObjectData, SceneObject, Transform};

    fn quad(color: [f32; 4]) -> MeshData {
        let mut mesh = MeshData::new("quad");
        mesh.positions = vec![
            [-1.0, -1.0, 0.0],
            [1.0, -1.0, 0.0],
            [1.0, 1.0, 0.0],
            [-1.0, 1.0, 0.0],
        ];
        mesh.triangles = vec![[0, 1, 2], [0, 2, 3]];
        mesh.color_attributes
            .insert("Col".to_string(), vec![color; 4]);
        mesh
    }

    fn staged_scene() -> SceneContext {
        let mut ctx = SceneContext::new();
        let camera = ctx.add_root(
            SceneObject::new(
                "Camera",
                ObjectData::Camera(CameraData {
                    focal_length: 23.0,
                    ..CameraData::default()
                }),
            )
            .with_transform(Transform::from_location_rotation(
                Vec3::new(0.0, 0.0, 5.0),
                Vec3::ZERO,
            )),
        );
        ctx.set_active_camera(camera).unwrap();
        ctx.add_root(
            SceneObject::new(
                "Light",
                ObjectData::Light(LightData {
                    energy: 4000.0,
                    color: [1.0, 1.0, 1.0],
                    soft_size: 11.0,
                }),
            )
            .with_transform(Transform::from_location_rotation(
                Vec3::new(2.0, 2.0, 5.0),
                Vec3::ZERO,
            )),
        );
        ctx
    }

    fn settings(size: u32) -> RenderSettings {
        RenderSettings::new(size, size)
    }

    #[test]
    fn empty_scene_is_transparent() {
        let ctx = staged_scene();
        let image = SoftwareRasterizer.render(&ctx, &settings(32)).unwrap();
        assert_eq!(image.dimensions(), (32, 32));
        assert!(image.pixels().all(|pixel| pixel.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn opaque_film_shows_world_colour() {
        let ctx = staged_scene();
        let mut settings = settings(8);
        settings.film_transparent = false;
        let image = SoftwareRasterizer.render(&ctx, &settings).unwrap();
        let pixel = image.get_pixel(0, 0).0;
        assert_eq!(pixel[3], 255);
        assert!(pixel[0] > 0);
    }

    #[test]
    fn material_base_colour_shades_the_quad() {
        let mut ctx = staged_scene();
        let mesh = ctx.add_mesh(quad([0.0, 1.0, 0.0, 1.0]));
        let red = ctx.add_material(MaterialDefinition::new("Red", [1.0, 0.0, 0.0, 1.0]));
        let mut object = SceneObject::new("Quad", ObjectData::Mesh(mesh));
        object.material_slots.push(red);
        ctx.add_root(object);

        let image = SoftwareRasterizer.render(&ctx, &settings(64)).unwrap();
        let center = image.get_pixel(32, 32).0;
        assert_eq!(center[3], 255);
        assert!(center[0] > 100);
        assert_eq!(center[1], 0);
        assert_eq!(image.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn vertex_colour_material_reads_col() {
        let mut ctx = staged_scene();
        let mesh = ctx.add_mesh(quad([0.0, 0.0, 1.0, 1.0]));
        let material = ctx.add_material(create_vertex_color_material("Material"));
        let mut object = SceneObject::new("Quad", ObjectData::Mesh(mesh));
        object.material_slots.push(material);
        ctx.add_root(object);

        let image = SoftwareRasterizer.render(&ctx, &settings(64)).unwrap();
        let center = image.get_pixel(32, 32).0;
        assert!(center[2] > 100);
        assert_eq!(center[0], 0);
    }

    #[test]
    fn point_cloud_draws_only_near_vertices() {
        let mut ctx = staged_scene();
        let mesh = ctx.add_mesh(quad([1.0, 1.0, 1.0, 1.0]));
        let room = ctx.add_root(SceneObject::new("Room", ObjectData::Mesh(mesh)));
        let material = ctx.add_material(create_vertex_color_material("Material"));
        bind_to_geometry_pipeline(&mut ctx, room, material, 0.05).unwrap();

        let image = SoftwareRasterizer.render(&ctx, &settings(64)).unwrap();
        // The quad's interior is empty once it is a point cloud.
        assert_eq!(image.get_pixel(32, 32).0[3], 0);
        let covered = image.pixels().filter(|pixel| pixel.0[3] == 255).count();
        assert!(covered >= 4);
        assert!(covered < 64);
    }

    #[test]
    fn path_traced_wrap_lighting_is_brighter() {
        let mut ctx = staged_scene();
        let mesh = ctx.add_mesh(quad([1.0, 1.0, 1.0, 1.0]));
        ctx.add_root(SceneObject::new("Quad", ObjectData::Mesh(mesh)));
        let raster = SoftwareRasterizer.render(&ctx, &settings(32)).unwrap();
        ctx.set_engine(RenderEngine::PathTraced);
        let traced = SoftwareRasterizer.render(&ctx, &settings(32)).unwrap();
        assert!(traced.get_pixel(16, 16).0[0] > raster.get_pixel(16, 16).0[0]);
    }

    #[test]
    fn missing_camera_is_an_error() {
        let ctx = SceneContext::new();
        assert!(matches!(
            SoftwareRasterizer.render(&ctx, &settings(8)),
            Err(RenderBackendError::NoActiveCamera)
        ));
    }
}

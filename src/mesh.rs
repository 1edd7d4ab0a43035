use cgmath::{Angle, Rad};
use wgpu::util::DeviceExt;

use crate::config::{SceneConfig, Shape};

/// Upper bound on circle segments; keeps both buffers a few MiB at most.
pub const MAX_SEGMENTS: u32 = 1 << 18;

pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PositionVertex {
    pub position: [f32; 3],
}

impl Vertex for PositionVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<PositionVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            }],
        }
    }
}

impl From<[f32; 3]> for PositionVertex {
    fn from(position: [f32; 3]) -> Self {
        Self { position }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeshError {
    TooFewSegments(u32),
    TooManySegments(u32),
    InvalidRadius(f32),
    IndexOutOfRange { index: u32, vertex_count: usize },
    IncompleteTriangle(usize),
    TooManyIndices(usize),
    BufferTooLarge { buffer: &'static str, bytes: u64, limit: u64 },
}

impl std::fmt::Display for MeshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshError::TooFewSegments(n) => {
                write!(f, "a circle needs at least 3 segments, got {}", n)
            }
            MeshError::TooManySegments(n) => write!(
                f,
                "a circle may have at most {} segments, got {}",
                MAX_SEGMENTS, n
            ),
            MeshError::InvalidRadius(r) => {
                write!(f, "circle radius must be positive and finite, got {}", r)
            }
            MeshError::IndexOutOfRange {
                index,
                vertex_count,
            } => write!(
                f,
                "index {} references a vertex outside the buffer ({} vertices)",
                index, vertex_count
            ),
            MeshError::IncompleteTriangle(count) => {
                write!(f, "{} indices do not form whole triangles", count)
            }
            MeshError::TooManyIndices(count) => {
                write!(f, "{} indices do not fit a 32-bit draw count", count)
            }
            MeshError::BufferTooLarge {
                buffer,
                bytes,
                limit,
            } => write!(
                f,
                "{} buffer needs {} bytes, the device allows {}",
                buffer, bytes, limit
            ),
        }
    }
}

impl std::error::Error for MeshError {}

/// CPU-side geometry: positions plus a triangle-list index buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<PositionVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn triangle() -> Self {
        Self {
            vertices: vec![
                [-0.5, -0.5, 0.0].into(),
                [0.5, -0.5, 0.0].into(),
                [0.0, 0.5, 0.0].into(),
            ],
            indices: vec![0, 1, 2],
        }
    }

    /// Fan-triangulated disc in the z = 0 plane.
    ///
    /// Vertex 0 is the centre, vertices `1..=segments` sit on the rim in
    /// counter-clockwise order starting on the +x axis. Each triangle is
    /// `(centre, rim[i], rim[(i + 1) % segments])`.
    pub fn circle(segments: u32, radius: f32) -> Result<Self, MeshError> {
        if segments < 3 {
            return Err(MeshError::TooFewSegments(segments));
        }
        if segments > MAX_SEGMENTS {
            return Err(MeshError::TooManySegments(segments));
        }
        if !radius.is_finite() || radius <= 0.0 {
            return Err(MeshError::InvalidRadius(radius));
        }

        let mut vertices = Vec::with_capacity(segments as usize + 1);
        vertices.push(PositionVertex::from([0.0, 0.0, 0.0]));

        for i in 0..segments {
            let angle = Rad::<f32>::full_turn() * (i as f32 / segments as f32);
            let (sin, cos) = angle.sin_cos();
            vertices.push([radius * cos, radius * sin, 0.0].into());
        }

        let indices = (0..segments)
            .flat_map(|i| [0, i + 1, (i + 1) % segments + 1])
            .collect();

        Ok(Self { vertices, indices })
    }

    pub fn from_scene(scene: &SceneConfig) -> Result<Self, MeshError> {
        let mesh = match scene.shape {
            Shape::Triangle => Self::triangle(),
            Shape::Circle => Self::circle(scene.circle.segments, scene.circle.radius)?,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if self.indices.len() % 3 != 0 {
            return Err(MeshError::IncompleteTriangle(self.indices.len()));
        }
        match self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.vertices.len())
        {
            Some(&index) => Err(MeshError::IndexOutOfRange {
                index,
                vertex_count: self.vertices.len(),
            }),
            None => Ok(()),
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_bytes(&self) -> u64 {
        std::mem::size_of_val(self.vertices.as_slice()) as u64
    }

    pub fn index_bytes(&self) -> u64 {
        std::mem::size_of_val(self.indices.as_slice()) as u64
    }

    /// Checks both buffers against a device's `max_buffer_size`.
    pub fn check_buffer_sizes(&self, max_buffer_size: u64) -> Result<(), MeshError> {
        for (buffer, bytes) in [("vertex", self.vertex_bytes()), ("index", self.index_bytes())] {
            if bytes > max_buffer_size {
                return Err(MeshError::BufferTooLarge {
                    buffer,
                    bytes,
                    limit: max_buffer_size,
                });
            }
        }
        Ok(())
    }

    pub fn index_count(&self) -> Result<u32, MeshError> {
        u32::try_from(self.indices.len()).map_err(|_| MeshError::TooManyIndices(self.indices.len()))
    }
}

pub struct GpuMesh {
    pub name: String,
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn upload(device: &wgpu::Device, name: &str, mesh: &MeshData) -> Result<Self, MeshError> {
        let index_count = mesh.index_count()?;
        mesh.check_buffer_sizes(device.limits().max_buffer_size)?;

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(format!("{} vertex buffer", name).as_str()),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(format!("{} index buffer", name).as_str()),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        Ok(Self {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            index_count,
        })
    }
}

pub trait DrawMesh {
    fn draw_mesh(&mut self, mesh: &GpuMesh, frame_bind_group: &wgpu::BindGroup);
}

impl DrawMesh for wgpu::RenderPass<'_> {
    fn draw_mesh(&mut self, mesh: &GpuMesh, frame_bind_group: &wgpu::BindGroup) {
        self.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        self.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        self.set_bind_group(0, frame_bind_group, &[]);

        self.draw_indexed(0..mesh.index_count, 0, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircleConfig;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn triangle_is_one_ccw_face() {
        let mesh = MeshData::triangle();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.triangle_count(), 1);

        // signed area > 0 means counter-clockwise
        let [a, b, c] = [0, 1, 2].map(|i| mesh.vertices[i].position);
        let area = (b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1]);
        assert!(area > 0.0);
    }

    #[test]
    fn circle_has_centre_plus_rim() {
        let mesh = MeshData::circle(10, 0.5).unwrap();
        assert_eq!(mesh.vertices.len(), 11);
        assert_eq!(mesh.indices.len(), 30);
        assert_eq!(mesh.vertices[0].position, [0.0, 0.0, 0.0]);

        for v in &mesh.vertices[1..] {
            let [x, y, z] = v.position;
            assert!(close((x * x + y * y).sqrt(), 0.5));
            assert_eq!(z, 0.0);
        }

        let first = mesh.vertices[1].position;
        assert!(close(first[0], 0.5) && close(first[1], 0.0));
    }

    #[test]
    fn circle_fan_wraps_to_first_rim_vertex() {
        let mesh = MeshData::circle(4, 1.0).unwrap();
        assert_eq!(
            mesh.indices,
            vec![0, 1, 2, 0, 2, 3, 0, 3, 4, 0, 4, 1]
        );
        mesh.validate().unwrap();
    }

    #[test]
    fn circle_quarter_turns() {
        let mesh = MeshData::circle(4, 2.0).unwrap();
        let expected = [[2.0, 0.0], [0.0, 2.0], [-2.0, 0.0], [0.0, -2.0]];
        for (v, e) in mesh.vertices[1..].iter().zip(expected) {
            assert!(close(v.position[0], e[0]), "{:?} vs {:?}", v.position, e);
            assert!(close(v.position[1], e[1]), "{:?} vs {:?}", v.position, e);
        }
    }

    #[test]
    fn circle_rejects_degenerate_input() {
        assert_eq!(MeshData::circle(2, 0.5), Err(MeshError::TooFewSegments(2)));
        assert_eq!(MeshData::circle(0, 0.5), Err(MeshError::TooFewSegments(0)));
        assert_eq!(MeshData::circle(8, 0.0), Err(MeshError::InvalidRadius(0.0)));
        assert_eq!(
            MeshData::circle(MAX_SEGMENTS + 1, 0.5),
            Err(MeshError::TooManySegments(MAX_SEGMENTS + 1))
        );
        assert_eq!(
            MeshData::circle(u32::MAX, 0.5),
            Err(MeshError::TooManySegments(u32::MAX))
        );
        assert!(matches!(
            MeshData::circle(8, f32::NAN),
            Err(MeshError::InvalidRadius(_))
        ));
    }

    #[test]
    fn validate_catches_bad_indices() {
        let mut mesh = MeshData::triangle();
        mesh.indices = vec![0, 1, 3];
        assert_eq!(
            mesh.validate(),
            Err(MeshError::IndexOutOfRange {
                index: 3,
                vertex_count: 3
            })
        );

        mesh.indices = vec![0, 1];
        assert_eq!(mesh.validate(), Err(MeshError::IncompleteTriangle(2)));
    }

    #[test]
    fn largest_circle_fits_default_buffer_limit() {
        let mesh = MeshData::circle(MAX_SEGMENTS, 0.5).unwrap();
        assert_eq!(mesh.index_count().unwrap(), 3 * MAX_SEGMENTS);
        mesh.check_buffer_sizes(wgpu::Limits::default().max_buffer_size)
            .unwrap();
    }

    #[test]
    fn buffer_limit_is_enforced() {
        let mesh = MeshData::circle(10, 0.5).unwrap();
        assert_eq!(mesh.vertex_bytes(), 11 * 12);
        assert_eq!(mesh.index_bytes(), 30 * 4);

        assert_eq!(
            mesh.check_buffer_sizes(100),
            Err(MeshError::BufferTooLarge {
                buffer: "vertex",
                bytes: 132,
                limit: 100
            })
        );
        assert!(mesh.check_buffer_sizes(132).is_ok());
    }

    #[test]
    fn oversized_scene_is_an_error() {
        let scene = SceneConfig {
            shape: Shape::Circle,
            circle: CircleConfig {
                segments: 25_000_000,
                radius: 0.5,
            },
        };
        assert_eq!(
            MeshData::from_scene(&scene),
            Err(MeshError::TooManySegments(25_000_000))
        );
    }

    #[test]
    fn from_scene_picks_shape() {
        let mut scene = SceneConfig {
            shape: Shape::Triangle,
            circle: CircleConfig::default(),
        };
        assert_eq!(MeshData::from_scene(&scene).unwrap(), MeshData::triangle());

        scene.shape = Shape::Circle;
        scene.circle.segments = 32;
        let mesh = MeshData::from_scene(&scene).unwrap();
        assert_eq!(mesh.triangle_count(), 32);

        scene.circle.segments = 1;
        assert!(MeshData::from_scene(&scene).is_err());
    }

    #[test]
    fn vertex_layout_matches_struct() {
        let desc = PositionVertex::desc();
        assert_eq!(desc.array_stride, 12);
        assert_eq!(desc.attributes.len(), 1);
        assert_eq!(desc.attributes[0].shader_location, 0);
    }
}

use crate::error::Error;
use wgpu::util::DeviceExt;

/// Indexed triangle geometry: positions, a vec4 of per-vertex data the
/// material interprets (colors by default), and triangle indices. GPU
/// buffers are created lazily on the first draw.
pub struct Geometry {
    positions: Vec<f32>,
    vertex_data: Vec<f32>,
    indices: Vec<u32>,
    buffers: Option<GeometryBuffers>,
}

struct GeometryBuffers {
    positions: wgpu::Buffer,
    vertex_data: wgpu::Buffer,
    indices: wgpu::Buffer,
}

impl Geometry {
    pub fn new(positions: Vec<f32>, vertex_data: Vec<f32>, indices: Vec<u32>) -> Result<Self, Error> {
        if positions.len() % 3 != 0 {
            return Err(Error::config("geometry positions length is not a multiple of 3"));
        }
        if vertex_data.len() % 4 != 0 {
            return Err(Error::config("geometry vertexData length is not a multiple of 4"));
        }
        if positions.len() / 3 != vertex_data.len() / 4 {
            return Err(Error::config(format!(
                "geometry has {} positions but {} vertexData entries",
                positions.len() / 3,
                vertex_data.len() / 4
            )));
        }
        if indices.len() % 3 != 0 {
            return Err(Error::config("geometry indices length is not a multiple of 3"));
        }
        let vertex_count = (positions.len() / 3) as u32;
        if let Some(oob) = indices.iter().find(|&&i| i >= vertex_count) {
            return Err(Error::config(format!(
                "geometry index {oob} out of range, {vertex_count} vertices"
            )));
        }
        Ok(Self {
            positions,
            vertex_data,
            indices,
            buffers: None,
        })
    }

    /// An axis-aligned cube with side length 1 centered at the origin,
    /// corner colors spanning the RGB cube.
    pub fn unit_cube() -> Self {
        #[rustfmt::skip]
        let positions = vec![
            // front
            -0.5, -0.5, -0.5,
             0.5, -0.5, -0.5,
             0.5,  0.5, -0.5,
            -0.5,  0.5, -0.5,
            // back
            -0.5, -0.5,  0.5,
             0.5, -0.5,  0.5,
             0.5,  0.5,  0.5,
            -0.5,  0.5,  0.5,
        ];
        #[rustfmt::skip]
        let colors = vec![
            0.0, 0.0, 0.0, 1.0,
            1.0, 0.0, 0.0, 1.0,
            1.0, 1.0, 0.0, 1.0,
            0.0, 1.0, 0.0, 1.0,
            0.0, 0.0, 1.0, 1.0,
            1.0, 0.0, 1.0, 1.0,
            1.0, 1.0, 1.0, 1.0,
            0.0, 1.0, 1.0, 1.0,
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 1, 2,  2, 3, 0, // front
            1, 5, 6,  6, 2, 1, // top
            7, 6, 5,  5, 4, 7, // back
            4, 0, 3,  3, 7, 4, // bottom
            4, 5, 1,  1, 0, 4, // left
            3, 2, 6,  6, 7, 3, // right
        ];
        Self {
            positions,
            vertex_data: colors,
            indices,
            buffers: None,
        }
    }

    pub fn vertex_count(&self) -> u32 { (self.positions.len() / 3) as u32 }

    pub fn index_count(&self) -> u32 { self.indices.len() as u32 }

    /// Uploads the vertex and index buffers if they do not exist yet.
    pub fn prepare(&mut self, device: &wgpu::Device) {
        if self.buffers.is_some() {
            return;
        }
        self.buffers = Some(GeometryBuffers {
            positions: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("geometry_positions"),
                contents: bytemuck::cast_slice(&self.positions),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            vertex_data: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("geometry_vertex_data"),
                contents: bytemuck::cast_slice(&self.vertex_data),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            indices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("geometry_indices"),
                contents: bytemuck::cast_slice(&self.indices),
                usage: wgpu::BufferUsages::INDEX,
            }),
        });
    }

    /// Binds the buffers and issues the indexed draw. `prepare` must have
    /// run first.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        let buffers = self
            .buffers
            .as_ref()
            .expect("geometry drawn without prepare");
        pass.set_vertex_buffer(0, buffers.positions.slice(..));
        pass.set_vertex_buffer(1, buffers.vertex_data.slice(..));
        pass.set_index_buffer(buffers.indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.index_count(), 0, 0..1);
    }

    /// Vertex buffer layouts matching the scene shaders: position vec3 at
    /// location 0, per-vertex data vec4 at location 1.
    pub fn buffer_layouts() -> [wgpu::VertexBufferLayout<'static>; 2] {
        [
            wgpu::VertexBufferLayout {
                array_stride: 12,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &[wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x3,
                    offset: 0,
                    shader_location: 0,
                }],
            },
            wgpu::VertexBufferLayout {
                array_stride: 16,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &[wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x4,
                    offset: 0,
                    shader_location: 1,
                }],
            },
        ]
    }
}

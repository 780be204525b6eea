//! Cube capture: renders the static scene into a six-face color/depth cube
//! from one observation point per draw call.

mod geometry;
mod material;
mod observation;

pub use geometry::Geometry;
pub use material::Material;
pub use observation::{Observation, ObservationRecord, OBSERVATION_RECORD_SIZE, OBSERVATION_RECORD_STRIDE};

use crate::gfx::{CubeImage, GpuContext, Usage};
use glam::Mat4;
use std::{collections::HashMap, num::NonZeroU32};
use wgpu::util::DeviceExt;

/// A static scene entry: geometry, its material, and the model matrix pushed
/// before its draw.
pub struct SceneObject {
    pub geometry: Geometry,
    pub material: Material,
    pub model_matrix: Mat4,
}

struct MaterialGroup {
    pipeline: wgpu::RenderPipeline,
    /// Indices into the renderer's object list.
    objects: Vec<usize>,
}

/// Renders the scene into the six faces of a cube image in a single pass.
/// One draw call feeds all six faces: the pipelines render with multiview
/// factor 6 and the vertex shader picks the face view-projection by its view
/// index.
///
/// The color and depth cubes are reused in place across observations.
pub struct CubeRenderer {
    width: u32,
    height: u32,

    color: CubeImage,
    depth: CubeImage,

    scene_objects: Vec<SceneObject>,
    observations: Vec<Observation>,

    dirty_scene: bool,
    dirty_observations: bool,

    /// Pipeline per distinct material name, rebuilt when the scene changes.
    material_cache: HashMap<&'static str, MaterialGroup>,
    pipeline_compiles: usize,

    view_bind_group_layout: wgpu::BindGroupLayout,
    view_bind_group: Option<wgpu::BindGroup>,
    observation_buffer: Option<wgpu::Buffer>,
}

impl CubeRenderer {
    pub fn new(ctx: &GpuContext, width: u32, height: u32) -> Self {
        assert!(
            width > 0 && height > 0 && width % 16 == 0 && height % 16 == 0,
            "render dimensions must be positive multiples of 16"
        );

        let color = CubeImage::new(ctx, Usage::ColorAttachment, width, height);
        let depth = CubeImage::new(ctx, Usage::DepthAttachment, width, height);

        let view_bind_group_layout =
            ctx.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("observation_bind_group_layout"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: wgpu::BufferSize::new(OBSERVATION_RECORD_SIZE),
                        },
                        count: None,
                    }],
                });

        Self {
            width,
            height,
            color,
            depth,
            scene_objects: Vec::new(),
            observations: Vec::new(),
            dirty_scene: true,
            dirty_observations: true,
            material_cache: HashMap::new(),
            pipeline_compiles: 0,
            view_bind_group_layout,
            view_bind_group: None,
            observation_buffer: None,
        }
    }

    pub fn add_scene_object(&mut self, object: SceneObject) {
        self.dirty_scene = true;
        self.scene_objects.push(object);
    }

    /// Replaces the observation list wholesale and invalidates the uploaded
    /// records.
    pub fn set_observations(&mut self, observations: Vec<Observation>) {
        self.dirty_observations = true;
        self.observations = observations;
    }

    pub fn observations(&self) -> &[Observation] { &self.observations }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    /// Number of render pipelines compiled so far. One per distinct material
    /// name per scene rebuild.
    pub fn pipeline_compiles(&self) -> usize { self.pipeline_compiles }

    pub fn color_cube_mut(&mut self) -> &mut CubeImage { &mut self.color }

    /// Renders the scene from observation `index` into the color cube.
    pub fn draw(&mut self, ctx: &GpuContext, index: usize) {
        assert!(index < self.observations.len(), "observation index out of range");

        if self.dirty_scene {
            self.rebuild_scene(ctx);
            self.dirty_scene = false;
        }

        if self.dirty_observations {
            self.upload_observations(ctx);
            self.dirty_observations = false;
        }

        self.color.prepare_for_render();
        self.depth.prepare_for_render();

        let view_bind_group = self
            .view_bind_group
            .as_ref()
            .expect("observation records not uploaded");
        let dynamic_offset = (index as u64 * OBSERVATION_RECORD_STRIDE) as u32;

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("cube_capture_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("cube_capture_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: self.color.attachment_view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.0,
                            g: 0.0,
                            b: 0.0,
                            a: 0.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: self.depth.attachment_view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for group in self.material_cache.values() {
                pass.set_pipeline(&group.pipeline);
                pass.set_bind_group(0, view_bind_group, &[dynamic_offset]);

                for &obj_idx in &group.objects {
                    let object = &self.scene_objects[obj_idx];
                    if let Some(material_bind_group) = object.material.bind_group() {
                        pass.set_bind_group(1, material_bind_group, &[]);
                    }
                    pass.set_push_constants(
                        wgpu::ShaderStages::VERTEX,
                        0,
                        bytemuck::cast_slice(&object.model_matrix.to_cols_array()),
                    );
                    object.geometry.draw(&mut pass);
                }
            }
        }
        ctx.queue.submit(Some(encoder.finish()));
        ctx.device.poll(wgpu::Maintain::Wait);
    }

    fn rebuild_scene(&mut self, ctx: &GpuContext) {
        log::debug!(
            "Rebuilding scene buffers and pipelines for {} object(s)",
            self.scene_objects.len()
        );

        self.material_cache.clear();
        let mut layouts: HashMap<&'static str, Option<wgpu::BindGroupLayout>> = HashMap::new();

        for (idx, object) in self.scene_objects.iter_mut().enumerate() {
            object.geometry.prepare(&ctx.device);

            let name = object.material.name();
            if !self.material_cache.contains_key(name) {
                let material_layout = object.material.bind_group_layout(&ctx.device);
                let pipeline = Self::create_material_pipeline(
                    ctx,
                    &self.view_bind_group_layout,
                    material_layout.as_ref(),
                    &object.material,
                );
                self.pipeline_compiles += 1;
                layouts.insert(name, material_layout);
                self.material_cache.insert(
                    name,
                    MaterialGroup {
                        pipeline,
                        objects: Vec::new(),
                    },
                );
            }

            object.material.prepare(ctx, layouts[name].as_ref());
            self.material_cache
                .get_mut(name)
                .expect("material group just inserted")
                .objects
                .push(idx);
        }
    }

    fn create_material_pipeline(
        ctx: &GpuContext,
        view_layout: &wgpu::BindGroupLayout,
        material_layout: Option<&wgpu::BindGroupLayout>,
        material: &Material,
    ) -> wgpu::RenderPipeline {
        let module = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(material.name()),
                source: material.shader_source(),
            });

        let mut bind_group_layouts = vec![view_layout];
        if let Some(layout) = material_layout {
            bind_group_layouts.push(layout);
        }
        let pipeline_layout = ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("cube_capture_pipeline_layout"),
                bind_group_layouts: &bind_group_layouts,
                push_constant_ranges: &[wgpu::PushConstantRange {
                    stages: wgpu::ShaderStages::VERTEX,
                    range: 0..64,
                }],
            });

        ctx.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("cube_capture_pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    buffers: &Geometry::buffer_layouts(),
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: wgpu::TextureFormat::Depth32Float,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::Rgba32Float,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: NonZeroU32::new(6),
                cache: None,
            })
    }

    fn upload_observations(&mut self, ctx: &GpuContext) {
        log::debug!("Uploading {} observation record(s)", self.observations.len());

        let records: Vec<ObservationRecord> = self
            .observations
            .iter()
            .map(|obs| ObservationRecord::new(obs, self.width, self.height))
            .collect();

        let buffer = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("observation_records"),
                contents: bytemuck::cast_slice(&records),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        self.view_bind_group = Some(ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("observation_bind_group"),
            layout: &self.view_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(OBSERVATION_RECORD_SIZE),
                }),
            }],
        }));
        self.observation_buffer = Some(buffer);
    }
}

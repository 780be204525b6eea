//! Staged GPU reduction: chained compute kernels that fold a rendered cube
//! image into per-observation metric values.

pub mod stages;

pub use stages::StageKind;

use crate::{
    error::Error,
    gfx::{CubeImage, GpuContext},
    img::HostImage,
};

/// Description of one compute stage in a chain.
#[derive(Debug, Clone)]
pub struct StageDesc {
    pub label: &'static str,
    /// WGSL module shared by the chain.
    pub source: &'static str,
    pub entry_point: &'static str,
    /// Workgroup counts for the dispatch.
    pub dispatch: (u32, u32, u32),
    /// Bytes read from the stage's input buffer (binding 2), 0 for none.
    pub input_size: u64,
    /// Bytes written to the stage's output buffer (binding 3), 0 for none.
    pub output_size: u64,
    /// Whether the stage reads the color cube (binding 0).
    pub binds_cube: bool,
    pub has_params: bool,
    /// Bytes copied back to the host after the chain ran, 0 for none.
    pub retrieve_size: u64,
}

/// Where a stage's input and output bindings point inside the arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSlots {
    pub input: Option<usize>,
    pub output: Option<usize>,
}

/// The buffer arena for a stage chain, planned without touching the GPU.
///
/// Adjacent stages share one allocation sized to the larger of the producer's
/// output and the consumer's input; the boundary is a single allocation
/// handed to both neighbors by index.
#[derive(Debug, Clone, Default)]
pub struct BufferPlan {
    /// Allocation sizes in bytes.
    pub allocations: Vec<u64>,
    /// Per-stage arena indices.
    pub slots: Vec<StageSlots>,
}

impl BufferPlan {
    pub fn new(stages: &[StageDesc]) -> Self {
        let mut plan = BufferPlan {
            allocations: Vec::new(),
            slots: vec![StageSlots::default(); stages.len()],
        };
        if stages.is_empty() {
            return plan;
        }

        if stages[0].input_size > 0 {
            plan.slots[0].input = Some(plan.alloc(stages[0].input_size));
        }

        for i in 0..stages.len() - 1 {
            let size = stages[i].output_size.max(stages[i + 1].input_size);
            if size == 0 {
                continue;
            }
            let idx = plan.alloc(size);
            if stages[i].output_size > 0 {
                plan.slots[i].output = Some(idx);
            }
            if stages[i + 1].input_size > 0 {
                plan.slots[i + 1].input = Some(idx);
            }
        }

        if let Some(last) = stages.last() {
            if last.output_size > 0 {
                let idx = plan.alloc(last.output_size);
                plan.slots[stages.len() - 1].output = Some(idx);
            }
        }

        plan
    }

    fn alloc(&mut self, size: u64) -> usize {
        self.allocations.push(size);
        self.allocations.len() - 1
    }

    pub fn allocation_count(&self) -> usize { self.allocations.len() }
}

/// What a stage chain produced for one observation: metric values, a
/// retrieved image, or (for an empty chain) neither.
#[derive(Default)]
pub struct ComputeResult {
    pub values: Vec<f32>,
    pub image: Option<HostImage>,
}

struct StagePipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    /// Mapped-readback buffer, present when the stage retrieves.
    readback: Option<wgpu::Buffer>,
}

/// Owns the compiled pipelines and the materialized arena of one stage
/// chain. Built once per configured metric, reused for every observation.
pub struct StagedComputeEngine {
    stages: Vec<StageDesc>,
    pipelines: Vec<StagePipeline>,
    buffers: Vec<wgpu::Buffer>,
    plan: BufferPlan,
    params_size: u32,
}

impl StagedComputeEngine {
    pub fn new(ctx: &GpuContext, stages: Vec<StageDesc>, params_size: u32) -> Self {
        let plan = BufferPlan::new(&stages);

        let buffers = plan
            .allocations
            .iter()
            .map(|&size| {
                ctx.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("stage_chain_buffer"),
                    size,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let pipelines = stages
            .iter()
            .map(|stage| Self::create_stage_pipeline(ctx, stage, params_size))
            .collect();

        Self {
            stages,
            pipelines,
            buffers,
            plan,
            params_size,
        }
    }

    pub fn plan(&self) -> &BufferPlan { &self.plan }

    fn create_stage_pipeline(
        ctx: &GpuContext,
        stage: &StageDesc,
        params_size: u32,
    ) -> StagePipeline {
        let module = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(stage.label),
                source: wgpu::ShaderSource::Wgsl(stage.source.into()),
            });

        // Bindings are sparse to mirror the kernel interface: cube at 0,
        // input buffer at 2, output buffer at 3.
        let mut entries = Vec::new();
        if stage.binds_cube {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2Array,
                    multisampled: false,
                },
                count: None,
            });
        }
        if stage.input_size > 0 {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(stage.input_size),
                },
                count: None,
            });
        }
        if stage.output_size > 0 {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(stage.output_size),
                },
                count: None,
            });
        }
        let bind_group_layout =
            ctx.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(stage.label),
                    entries: &entries,
                });

        let push_constant_ranges = if stage.has_params {
            vec![wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: 0..params_size,
            }]
        } else {
            Vec::new()
        };
        let pipeline_layout = ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(stage.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &push_constant_ranges,
            });

        let pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(stage.label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: stage.entry_point,
                compilation_options: Default::default(),
                cache: None,
            });

        let readback = (stage.retrieve_size > 0).then(|| {
            ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("stage_chain_readback"),
                size: stage.retrieve_size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        });

        StagePipeline {
            pipeline,
            bind_group_layout,
            readback,
        }
    }

    /// Runs the whole chain against `cube`, blocking until the retrieved
    /// values are on the host. An empty chain yields an empty result without
    /// touching the GPU.
    ///
    /// Each stage dispatches in its own compute pass; the pass boundary
    /// orders the write and the read on the buffer shared by adjacent
    /// stages.
    pub fn compute_all_stages(
        &mut self,
        ctx: &GpuContext,
        cube: &mut CubeImage,
        params: &[u8],
    ) -> Result<ComputeResult, Error> {
        let mut result = ComputeResult::default();
        if self.stages.is_empty() {
            return Ok(result);
        }
        debug_assert_eq!(params.len() as u32, self.params_size);

        let cube_view = cube.compute_view(ctx);

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stage_chain_encoder"),
            });

        for (i, stage) in self.stages.iter().enumerate() {
            let pipeline = &self.pipelines[i];
            let slots = self.plan.slots[i];

            let mut entries = Vec::new();
            if stage.binds_cube {
                entries.push(wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(cube_view),
                });
            }
            if let Some(idx) = slots.input {
                entries.push(wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.buffers[idx].as_entire_binding(),
                });
            }
            if let Some(idx) = slots.output {
                entries.push(wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.buffers[idx].as_entire_binding(),
                });
            }
            let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(stage.label),
                layout: &pipeline.bind_group_layout,
                entries: &entries,
            });

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(stage.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            if stage.has_params {
                pass.set_push_constants(0, params);
            }
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(stage.dispatch.0, stage.dispatch.1, stage.dispatch.2);
        }

        for (i, stage) in self.stages.iter().enumerate() {
            if let Some(readback) = &self.pipelines[i].readback {
                let src = self.plan.slots[i]
                    .output
                    .expect("retrieving stage without an output buffer");
                encoder.copy_buffer_to_buffer(
                    &self.buffers[src],
                    0,
                    readback,
                    0,
                    stage.retrieve_size,
                );
            }
        }

        ctx.queue.submit(Some(encoder.finish()));

        for pipeline in &self.pipelines {
            if let Some(readback) = &pipeline.readback {
                result
                    .values
                    .extend(crate::gfx::read_buffer_f32(&ctx.device, readback));
            }
        }

        Ok(result)
    }
}

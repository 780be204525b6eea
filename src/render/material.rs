use crate::gfx::{CubeImage, GpuContext};

/// How an object is shaded during capture. A closed set: the renderer keys
/// its pipeline cache on [`Material::name`].
pub enum Material {
    /// Writes the per-vertex color, alpha replaced by the distance to the
    /// observation point.
    VertexColor,
    /// Samples an uploaded cube map by the per-vertex direction encoded in
    /// the vertex color, alpha again the distance.
    EnvCube(EnvCubeMaterial),
}

pub struct EnvCubeMaterial {
    cube: CubeImage,
    bind_group: Option<wgpu::BindGroup>,
}

impl Material {
    pub fn env_cube(cube: CubeImage) -> Self {
        Material::EnvCube(EnvCubeMaterial {
            cube,
            bind_group: None,
        })
    }

    /// Cache key for the renderer's pipeline cache.
    pub fn name(&self) -> &'static str {
        match self {
            Material::VertexColor => "vertex_color",
            Material::EnvCube(_) => "env_cube",
        }
    }

    /// The WGSL module containing `vs_main` and `fs_main` for this
    /// material.
    pub fn shader_source(&self) -> wgpu::ShaderSource<'static> {
        match self {
            Material::VertexColor => wgpu::ShaderSource::Wgsl(include_str!("../shaders/scene.wgsl").into()),
            Material::EnvCube(_) => wgpu::ShaderSource::Wgsl(include_str!("../shaders/env.wgsl").into()),
        }
    }

    /// Layout of the material's own bind group, if it has one. Must agree
    /// for all materials sharing a [`Material::name`].
    pub fn bind_group_layout(&self, device: &wgpu::Device) -> Option<wgpu::BindGroupLayout> {
        match self {
            Material::VertexColor => None,
            Material::EnvCube(_) => Some(device.create_bind_group_layout(
                &wgpu::BindGroupLayoutDescriptor {
                    label: Some("env_cube_bind_group_layout"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                                view_dimension: wgpu::TextureViewDimension::Cube,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                            count: None,
                        },
                    ],
                },
            )),
        }
    }

    /// One-time setup before the first draw using this material.
    pub fn prepare(&mut self, ctx: &GpuContext, layout: Option<&wgpu::BindGroupLayout>) {
        if let Material::EnvCube(env) = self {
            if env.bind_group.is_some() {
                return;
            }
            let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("env_cube_sampler"),
                address_mode_u: wgpu::AddressMode::Repeat,
                address_mode_v: wgpu::AddressMode::Repeat,
                address_mode_w: wgpu::AddressMode::Repeat,
                mag_filter: wgpu::FilterMode::Nearest,
                min_filter: wgpu::FilterMode::Nearest,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            });
            let layout = layout.expect("env cube material prepared without its layout");
            env.bind_group = Some(ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("env_cube_bind_group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(env.cube.sample_view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&sampler),
                    },
                ],
            }));
        }
    }

    /// The bind group to attach at group 1 before drawing, if any.
    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        match self {
            Material::VertexColor => None,
            Material::EnvCube(env) => env.bind_group.as_ref(),
        }
    }
}

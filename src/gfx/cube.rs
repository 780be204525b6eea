use crate::{
    error::Error,
    gfx::GpuContext,
    img::{FlattenLayout, HostImage},
};

/// Role of a [`CubeImage`]. The role fixes the texture format, the wgpu usage
/// flags, and which state transitions are legal for the lifetime of the
/// image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// Render target for the six color faces, readable by the reduction
    /// kernels afterwards.
    ColorAttachment,
    /// Depth target for the capture pass. Reduction kernels see it through a
    /// resolved two-channel float copy.
    DepthAttachment,
    /// A cube texture uploaded from the host and sampled while rendering
    /// (environment maps).
    ColorTexture,
}

impl Usage {
    fn format(&self) -> wgpu::TextureFormat {
        match self {
            Usage::ColorAttachment | Usage::ColorTexture => wgpu::TextureFormat::Rgba32Float,
            Usage::DepthAttachment => wgpu::TextureFormat::Depth32Float,
        }
    }

    fn texture_usages(&self) -> wgpu::TextureUsages {
        match self {
            Usage::ColorAttachment => {
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
            }
            Usage::DepthAttachment => {
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
            }
            Usage::ColorTexture => {
                wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC
            }
        }
    }
}

/// Access state of a [`CubeImage`]. There is exactly one mutation path,
/// [`CubeImage::transition_to`]; wgpu emits the physical barriers at
/// submission, this machine is the authority on the current role and rejects
/// role/usage combinations that can never be valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    RenderTarget,
    ShaderReadable,
    TransferSrc,
    TransferDst,
}

fn state_allowed(usage: Usage, state: ImageState) -> bool {
    match usage {
        Usage::ColorAttachment => !matches!(state, ImageState::TransferDst),
        Usage::DepthAttachment => {
            matches!(state, ImageState::RenderTarget | ImageState::ShaderReadable)
        }
        Usage::ColorTexture => !matches!(state, ImageState::RenderTarget),
    }
}

/// Resolves the depth cube into a storage-writable two-channel float copy.
/// Depth formats cannot be bound where the reduction kernels read, so the
/// copy is what compute sees.
struct DepthResolve {
    view: wgpu::TextureView,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
}

/// A 6-layer 2-D array texture holding one face of the capture per layer,
/// face order front/back/right/left/up/down.
pub struct CubeImage {
    usage: Usage,
    state: ImageState,
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    /// Full array view over all six layers.
    array_view: wgpu::TextureView,
    /// Cube-dimension view for sampling, `ColorTexture` usage only.
    sample_view: Option<wgpu::TextureView>,
    resolve: Option<DepthResolve>,
}

impl CubeImage {
    /// Bytes per pixel of the color formats used for readback.
    const COLOR_PIXEL_BYTES: u32 = 16;

    pub fn new(ctx: &GpuContext, usage: Usage, width: u32, height: u32) -> Self {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("cube_image"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: usage.format(),
            usage: usage.texture_usages(),
            view_formats: &[],
        });
        let array_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("cube_image_array_view"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        let sample_view = matches!(usage, Usage::ColorTexture).then(|| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("cube_image_sample_view"),
                dimension: Some(wgpu::TextureViewDimension::Cube),
                ..Default::default()
            })
        });

        let resolve = matches!(usage, Usage::DepthAttachment)
            .then(|| Self::create_depth_resolve(ctx, &array_view, width, height));

        let state = match usage {
            Usage::ColorAttachment | Usage::DepthAttachment => ImageState::RenderTarget,
            Usage::ColorTexture => ImageState::TransferDst,
        };

        Self {
            usage,
            state,
            width,
            height,
            texture,
            array_view,
            sample_view,
            resolve,
        }
    }

    fn create_depth_resolve(
        ctx: &GpuContext,
        depth_view: &wgpu::TextureView,
        width: u32,
        height: u32,
    ) -> DepthResolve {
        let staging = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("cube_image_depth_resolve"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rg32Float,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = staging.create_view(&wgpu::TextureViewDescriptor {
            label: Some("cube_image_depth_resolve_view"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        let module = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("depth_resolve_shader"),
                source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/depth_resolve.wgsl").into()),
            });
        let bind_group_layout =
            ctx.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("depth_resolve_bind_group_layout"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Depth,
                                view_dimension: wgpu::TextureViewDimension::D2Array,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::StorageTexture {
                                access: wgpu::StorageTextureAccess::WriteOnly,
                                format: wgpu::TextureFormat::Rg32Float,
                                view_dimension: wgpu::TextureViewDimension::D2Array,
                            },
                            count: None,
                        },
                    ],
                });
        let pipeline_layout = ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("depth_resolve_pipeline_layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
        let pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("depth_resolve_pipeline"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: "resolve",
                compilation_options: Default::default(),
                cache: None,
            });
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("depth_resolve_bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(depth_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
            ],
        });

        DepthResolve {
            view,
            pipeline,
            bind_group,
        }
    }

    pub fn usage(&self) -> Usage { self.usage }

    pub fn state(&self) -> ImageState { self.state }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    /// The array view, for use as a 6-layer multiview render attachment.
    pub fn attachment_view(&self) -> &wgpu::TextureView { &self.array_view }

    /// The cube-dimension view a fragment shader samples from. Marks the
    /// image shader-readable.
    pub fn sample_view(&mut self) -> &wgpu::TextureView {
        assert_eq!(self.usage, Usage::ColorTexture, "only cube textures are sampled");
        self.transition_to(ImageState::ShaderReadable);
        self.sample_view.as_ref().unwrap()
    }

    /// Records a role change. A no-op when the image is already in `state`;
    /// panics on a role the image's usage can never take.
    pub fn transition_to(&mut self, state: ImageState) {
        assert!(
            state_allowed(self.usage, state),
            "cube image with usage {:?} cannot enter state {:?}",
            self.usage,
            state
        );
        if self.state != state {
            log::trace!("cube image transition {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Makes the image attachable, before a render pass uses it.
    pub fn prepare_for_render(&mut self) {
        assert!(
            matches!(self.usage, Usage::ColorAttachment | Usage::DepthAttachment),
            "only attachment cube images can be rendered to"
        );
        self.transition_to(ImageState::RenderTarget);
    }

    /// Uploads six host faces into the cube layers. All faces must share the
    /// cube's dimensions.
    pub fn upload_faces(&mut self, ctx: &GpuContext, faces: &[HostImage; 6]) {
        assert_eq!(self.usage, Usage::ColorTexture, "only cube textures are uploaded");
        for (i, face) in faces.iter().enumerate() {
            assert!(
                face.width == self.width && face.height == self.height,
                "face {i} is {}x{}, cube is {}x{}",
                face.width,
                face.height,
                self.width,
                self.height
            );
        }

        self.transition_to(ImageState::TransferDst);
        for (i, face) in faces.iter().enumerate() {
            ctx.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &self.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: i as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(&face.pixels),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.width * Self::COLOR_PIXEL_BYTES),
                    rows_per_image: Some(self.height),
                },
                wgpu::Extent3d {
                    width: self.width,
                    height: self.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.transition_to(ImageState::ShaderReadable);
    }

    /// Returns the view the reduction kernels read. For color cubes this is
    /// the image itself; a depth cube is first resolved into its two-channel
    /// float copy.
    pub fn compute_view(&mut self, ctx: &GpuContext) -> &wgpu::TextureView {
        self.transition_to(ImageState::ShaderReadable);
        match &self.resolve {
            None => &self.array_view,
            Some(resolve) => {
                let mut encoder = ctx
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("depth_resolve_encoder"),
                    });
                {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("depth_resolve_pass"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(&resolve.pipeline);
                    pass.set_bind_group(0, &resolve.bind_group, &[]);
                    pass.dispatch_workgroups(
                        self.width.div_ceil(8),
                        self.height.div_ceil(8),
                        6,
                    );
                }
                ctx.queue.submit(Some(encoder.finish()));
                &resolve.view
            }
        }
    }

    /// Reads all six faces back into one flattened host image. Color cubes
    /// only; depth cubes are reduced on the GPU and never retrieved.
    pub fn retrieve(&mut self, ctx: &GpuContext, layout: FlattenLayout) -> Result<HostImage, Error> {
        assert_ne!(self.usage, Usage::DepthAttachment, "depth cubes are not retrieved");
        self.transition_to(ImageState::TransferSrc);

        let (tx, ty) = layout.tiles();
        let (flat_w, flat_h) = (tx * self.width, ty * self.height);
        let bytes_per_row = flat_w * Self::COLOR_PIXEL_BYTES;
        debug_assert_eq!(bytes_per_row % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);

        let readback = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cube_image_readback"),
            size: (bytes_per_row * flat_h) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("cube_image_readback_encoder"),
            });
        for face in 0..6u32 {
            let (ox, oy) = layout.face_offset(face, self.width, self.height);
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture: &self.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x: 0, y: 0, z: face },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &readback,
                    layout: wgpu::ImageDataLayout {
                        offset: ((oy * flat_w + ox) * Self::COLOR_PIXEL_BYTES)
                            as wgpu::BufferAddress,
                        bytes_per_row: Some(bytes_per_row),
                        rows_per_image: Some(self.height),
                    },
                },
                wgpu::Extent3d {
                    width: self.width,
                    height: self.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        ctx.queue.submit(Some(encoder.finish()));

        let pixels = super::read_buffer_f32(&ctx.device, &readback);
        Ok(HostImage::from_pixels(flat_w, flat_h, pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachments_never_accept_uploads() {
        assert!(!state_allowed(Usage::ColorAttachment, ImageState::TransferDst));
        assert!(!state_allowed(Usage::DepthAttachment, ImageState::TransferDst));
        assert!(state_allowed(Usage::ColorTexture, ImageState::TransferDst));
    }

    #[test]
    fn textures_are_never_render_targets() {
        assert!(!state_allowed(Usage::ColorTexture, ImageState::RenderTarget));
        assert!(state_allowed(Usage::ColorAttachment, ImageState::RenderTarget));
        assert!(state_allowed(Usage::DepthAttachment, ImageState::RenderTarget));
    }

    #[test]
    fn depth_is_only_rendered_or_read() {
        assert!(state_allowed(Usage::DepthAttachment, ImageState::ShaderReadable));
        assert!(!state_allowed(Usage::DepthAttachment, ImageState::TransferSrc));
    }
}

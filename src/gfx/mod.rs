//! GPU plumbing: the offscreen device context and the six-layer cube image
//! resource everything else renders into and reduces from.

mod context;
mod cube;

pub use context::{GpuConfig, GpuContext};
pub use cube::{CubeImage, ImageState, Usage};

/// Blocks until `buffer` is mapped for reading and returns its contents as
/// f32 values. The buffer is unmapped before returning.
pub(crate) fn read_buffer_f32(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Vec<f32> {
    let data = {
        let slice = buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).unwrap();
        });
        device.poll(wgpu::Maintain::Wait);
        pollster::block_on(async {
            receiver.receive().await.unwrap().unwrap();
        });

        let buffer_view = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, f32>(&buffer_view).to_vec()
    };
    buffer.unmap();
    data
}

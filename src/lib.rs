//! Offscreen spherical-view capture and reduction.
//!
//! A run renders the configured scene into a six-face cube image from each
//! observation point, then folds the cube into metric values (visible solid
//! angle, per-bucket visibility, sky luminance) or saves it as a flattened
//! image. Everything is driven by a JSON run description.

pub mod app;
pub mod compute;
pub mod config;
pub mod error;
pub mod gfx;
pub mod img;
pub mod math;
pub mod render;
pub mod service;

pub use error::Error;

use crate::{
    app::CubevisArgs,
    config::RunDescription,
    gfx::{GpuConfig, GpuContext},
    service::Service,
};

/// Executes a whole run from parsed command line arguments.
pub fn run(args: CubevisArgs) -> Result<(), Error> {
    let desc = RunDescription::load(&args.input_path)?;
    log::info!("Loaded run '{}' from {}", desc.header.name, args.input_path.display());

    let gpu_config = GpuConfig {
        adapter_index: args.adapter,
        ..Default::default()
    };
    let ctx = pollster::block_on(GpuContext::offscreen(gpu_config))?;

    let mut service = Service::new(&ctx, desc, args.output_path)?;
    service.run(&ctx)?;
    service.save_output()?;
    Ok(())
}

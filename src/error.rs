use std::path::PathBuf;

/// All the ways a run can fail. Every failure is fatal: the tool is an
/// offline batch analysis, there is no partial-failure recovery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid run description: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("no suitable GPU adapter found")]
    NoSuitableAdapter,

    #[error("failed to acquire GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("failed to save image to '{path}': {reason}")]
    ImageSave { path: PathBuf, reason: String },
}

impl Error {
    /// Shorthand for configuration errors built from format strings.
    pub fn config(msg: impl Into<String>) -> Self { Error::Config(msg.into()) }
}

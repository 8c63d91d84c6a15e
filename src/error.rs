use thiserror::Error;

/// Malformed scene payloads. Terminal for the request that produced them.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("payload truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("header length {0} exceeds limit")]
    HeaderTooLarge(usize),

    #[error("invalid header: {0}")]
    InvalidHeader(#[from] serde_json::Error),

    #[error("header declares {declared} points but payload carries {actual}")]
    CountMismatch { declared: usize, actual: usize },

    #[error("point {index} has category id {id} (max {max})")]
    InvalidCategory { index: usize, id: u8, max: u8 },

    #[error("cloud arrays differ: {positions} positions, {colors} colors, {categories} ids")]
    CloudShape {
        positions: usize,
        colors: usize,
        categories: usize,
    },
}

#[derive(Error, Debug)]
pub enum SceneError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("scene server request failed: {0}")]
    Transport(String),

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("scene worker is not running")]
    WorkerGone,

    #[error("{width}x{height} map cannot hold {len} values")]
    MapSize {
        width: usize,
        height: usize,
        len: usize,
    },
}

/// GPU failures. None of these stop the frame loop.
#[derive(Error, Debug, Clone)]
pub enum RenderError {
    #[error("no compatible GPU adapter: {0}")]
    NoAdapter(String),

    #[error("device request failed: {0}")]
    DeviceRequest(String),

    #[error("{stage} shader failed to compile: {message}")]
    ShaderCompilation { stage: &'static str, message: String },

    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    #[error("frame readback failed: {0}")]
    Readback(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no audio device available: {0}")]
    NoDevice(String),

    #[error("audio device refused access: {0}")]
    PermissionDenied(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("cannot decode audio file: {0}")]
    Decode(#[from] hound::Error),
}

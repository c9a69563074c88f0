use thiserror::Error;

/// All errors produced by cadence-core.
///
/// None of these are raised on the real-time render path; the render engine
/// handles every condition in-band and reports it through events.
#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("PCM16 payload has odd byte length {len}")]
    OddPcmLength { len: usize },

    #[error("render engine has already been handed off")]
    EngineTaken,

    #[error("render engine channel disconnected")]
    ChannelClosed,

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("config file not found: {path}")]
    ConfigNotFound { path: std::path::PathBuf },

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CadenceError>;

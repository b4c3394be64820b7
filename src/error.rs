/// Failure to open or run the audio input device. Fatal when raised by
/// [`AudioSource::start`](crate::AudioSource::start).
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no input device available")]
    NoInputDevice,

    #[error("input device '{0}' not found")]
    DeviceNotFound(String),

    #[error("failed to query device configs: {0}")]
    DeviceConfig(String),

    #[error("device does not support {0}")]
    UnsupportedConfig(String),

    #[error("failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("failed to start audio stream: {0}")]
    StreamStart(String),

    #[error("capture thread error: {0}")]
    CaptureThread(String),
}

/// Failure to load the model or to run one inference cycle.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("failed to load model: {0}")]
    Load(String),

    #[error("model signature mismatch: {0}")]
    Signature(String),

    #[error("invalid label order: {0}")]
    LabelOrder(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("malformed model output: expected {expected} scores, got {got}")]
    MalformedOutput { expected: usize, got: usize },
}

/// Failure to read or write the controlled brightness level.
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("backlight io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no backlight device found under {0}")]
    NoBacklight(String),

    #[error("unreadable backlight value '{0}'")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("failed to spawn processing thread: {0}")]
    Spawn(#[from] std::io::Error),
}

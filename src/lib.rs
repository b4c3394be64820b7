use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod actuator;
pub use actuator::{
    clamp_level, Actuator, Brightness, MemoryBacklight, SysfsBacklight, SYSFS_BACKLIGHT_ROOT,
};

mod classifier;
pub use classifier::{Classifier, Confidences, Label, LabelOrder, OnnxClassifier};

mod decider;
pub use decider::{decide, Command, Debouncer, Decider};

pub mod error;

mod join;
pub use error::{ActuatorError, ClassifierError, ConfigError, DeviceError, PipelineError};

mod pipeline;
pub use pipeline::{CycleOutcome, PipelineController, Processor, StopHandle};

mod preprocess;
pub use preprocess::{prepare, PreprocessedWindow, NORMALIZE_EPSILON};

mod sampler;
pub use sampler::{list_input_devices, AudioSource, FrameSink, Sampler};

pub mod signal;

mod window;
pub use window::{SlidingWindow, WINDOW_SAMPLES};

/// A fixed-size run of contiguous mono audio samples, as delivered by the
/// capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: u64,
    pub samples: Box<[f32]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    /// Label carried by each output index of the model, in order.
    pub labels: Vec<Label>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/keywords.onnx"),
            labels: vec![Label::Decrease, Label::Background, Label::Increase],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; the system default when unset.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub chunk_size: usize,
    /// Frames buffered between capture and processing before the oldest
    /// are dropped.
    pub queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 16000,
            chunk_size: 1024,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub threshold: f32,
    /// Minimum time between two dispatched commands. 0 disables debouncing.
    pub refractory_ms: u64,
    /// Log every cycle's confidences at info level.
    pub log_probabilities: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            refractory_ms: 1000,
            log_probabilities: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacklightBackend {
    Sysfs,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightnessConfig {
    pub backend: BacklightBackend,
    /// Backlight device name under /sys/class/backlight; first found when unset.
    pub device: Option<String>,
    pub step: u8,
    /// Level assumed when the current one cannot be read at startup.
    pub fallback_level: u8,
}

impl Default for BrightnessConfig {
    fn default() -> Self {
        Self {
            backend: BacklightBackend::Sysfs,
            device: None,
            step: 1,
            fallback_level: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long the processing loop waits for a frame before re-checking
    /// whether it should keep running.
    pub poll_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            shutdown_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub audio: AudioConfig,
    pub detection: DetectionConfig,
    pub brightness: BrightnessConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return invalid(format!(
                "detection.threshold must be within [0, 1], got {}",
                self.detection.threshold
            ));
        }
        if self.audio.sample_rate == 0 {
            return invalid("audio.sample_rate must be positive".into());
        }
        if self.audio.chunk_size == 0 || self.audio.chunk_size > WINDOW_SAMPLES {
            return invalid(format!(
                "audio.chunk_size must be within 1..={}, got {}",
                WINDOW_SAMPLES, self.audio.chunk_size
            ));
        }
        if self.audio.queue_capacity == 0 {
            return invalid("audio.queue_capacity must be at least 1".into());
        }
        if self.brightness.step == 0 || self.brightness.step > 100 {
            return invalid(format!(
                "brightness.step must be within 1..=100, got {}",
                self.brightness.step
            ));
        }
        if self.brightness.fallback_level > 100 {
            return invalid(format!(
                "brightness.fallback_level must be within 0..=100, got {}",
                self.brightness.fallback_level
            ));
        }
        if self.pipeline.poll_interval_ms == 0 {
            return invalid("pipeline.poll_interval_ms must be positive".into());
        }
        self.label_order()?;
        Ok(())
    }

    pub fn label_order(&self) -> Result<LabelOrder, ConfigError> {
        LabelOrder::new(self.model.labels.clone())
            .map_err(|e| ConfigError::Invalid(format!("model.labels: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.chunk_size, 1024);
        assert_eq!(config.detection.threshold, 0.7);
        assert_eq!(config.pipeline.poll_interval_ms, 100);
        assert_eq!(config.pipeline.shutdown_timeout_ms, 1000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_yaml(
            "detection:\n  threshold: 0.8\nbrightness:\n  backend: memory\n  step: 5\n",
        )
        .unwrap();
        assert_eq!(config.detection.threshold, 0.8);
        assert_eq!(config.detection.refractory_ms, 1000);
        assert_eq!(config.brightness.backend, BacklightBackend::Memory);
        assert_eq!(config.brightness.step, 5);
        assert_eq!(config.brightness.fallback_level, 50);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn bundled_example_matches_defaults() {
        let config = Config::from_yaml(include_str!("../kws-brightness.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn probability_logging_is_opt_in() {
        assert!(!Config::default().detection.log_probabilities);
        let config = Config::from_yaml("detection:\n  log_probabilities: true\n").unwrap();
        assert!(config.detection.log_probabilities);
        assert_eq!(config.detection.threshold, 0.7);
    }

    #[test]
    fn yaml_round_trip_is_stable() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        assert_eq!(Config::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            Config::from_yaml("detection:\n  threshold: 1.5\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(Config::from_yaml("audio:\n  chunk_size: 0\n").is_err());
        assert!(Config::from_yaml("audio:\n  queue_capacity: 0\n").is_err());
        assert!(Config::from_yaml("brightness:\n  step: 0\n").is_err());
        assert!(Config::from_yaml("brightness:\n  fallback_level: 101\n").is_err());
    }

    #[test]
    fn rejects_incomplete_label_order() {
        let err = Config::from_yaml("model:\n  labels: [increase, decrease]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_labels() {
        assert!(matches!(
            Config::from_yaml("model:\n  labels: [up, down, noise]\n"),
            Err(ConfigError::Yaml(_))
        ));
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

pub mod error;
pub use error::{
    AlertSinkError, CameraError, CaptureError, ClassifierError, ConfigError, InitializationError,
    LoadError, SessionError,
};

pub mod logging;

mod stop;
pub use stop::StopHandle;

mod camera;
pub use camera::{FfmpegCamera, FrameSource};

mod embedder;
pub use embedder::{Embedding, EmbeddingProvider, OnnxEmbedder, Pipeline};

mod classifier;
pub use classifier::{Classifier, KnnClassifier, Label, Prediction};

mod alert;
pub use alert::{AlertDecision, AlertGate, AlertSink, Alerter, AudioState, CommandAlertSink};

mod trainer;
pub use trainer::{progress_percent, TrainingController, TrainingReport};

mod runner;
pub use runner::{Cycle, InferenceLoop, RunSummary};

mod session;
pub use session::{SessionController, SessionEvent, SessionState};

#[cfg(test)]
pub(crate) mod test_support;

/// A single RGB24 video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub command: String,
    pub format: String,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub frame_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: "ffmpeg".into(),
            format: "v4l2".into(),
            device: "/dev/video0".into(),
            width: 224,
            height: 224,
            frame_timeout_ms: 2000,
        }
    }
}

impl CameraConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
    pub layout: TensorLayout,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "mobilenet.onnx".into(),
            layout: TensorLayout::Nchw,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub k: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { k: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub examples_per_label: usize,
    pub inter_sample_delay_ms: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            examples_per_label: 50,
            inter_sample_delay_ms: 100,
        }
    }
}

impl TrainingConfig {
    pub fn inter_sample_delay(&self) -> Duration {
        Duration::from_millis(self.inter_sample_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub poll_interval_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
        }
    }
}

impl InferenceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub player: String,
    pub sound: String,
    pub notifier: String,
    pub title: String,
    pub body: String,
    pub cooldown_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            player: "aplay".into(),
            sound: "alert.wav".into(),
            notifier: "notify-send".into(),
            title: "Put your hand off".into(),
            body: "You just touched your face :)".into(),
            cooldown_ms: 3000,
        }
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfig {
    pub name: Label,
    /// Detecting this label raises an alert.
    #[serde(default)]
    pub undesired: bool,
    /// Shown to the user while examples for this label are collected.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl LabelConfig {
    pub fn prompt(&self) -> String {
        self.prompt
            .clone()
            .unwrap_or_else(|| format!("Show me \"{}\"", self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub model: ModelConfig,
    pub classifier: ClassifierConfig,
    pub training: TrainingConfig,
    pub inference: InferenceConfig,
    pub alert: AlertConfig,
    pub labels: Vec<LabelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            model: ModelConfig::default(),
            classifier: ClassifierConfig::default(),
            training: TrainingConfig::default(),
            inference: InferenceConfig::default(),
            alert: AlertConfig::default(),
            labels: vec![
                LabelConfig {
                    name: Label::new("not_touch"),
                    undesired: false,
                    prompt: Some("Don't touch your face!".into()),
                },
                LabelConfig {
                    name: Label::new("touched"),
                    undesired: true,
                    prompt: Some("Touch your face!".into()),
                },
            ],
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.labels.len() < 2 {
            return invalid("at least two labels are required");
        }
        let mut seen = BTreeSet::new();
        for label in &self.labels {
            if label.name.as_str().trim().is_empty() {
                return invalid("label names must not be empty");
            }
            if !seen.insert(&label.name) {
                return Err(ConfigError::Invalid(format!(
                    "label {} is listed twice",
                    label.name
                )));
            }
        }
        if !self.labels.iter().any(|l| l.undesired) {
            return invalid("at least one label must be undesired");
        }
        if self.labels.iter().all(|l| l.undesired) {
            return invalid("at least one label must not be undesired");
        }
        if self.training.examples_per_label == 0 {
            return invalid("training.examples_per_label must be positive");
        }
        if self.inference.poll_interval_ms == 0 {
            return invalid("inference.poll_interval_ms must be positive");
        }
        if self.classifier.k == 0 {
            return invalid("classifier.k must be positive");
        }
        if self.camera.frame_timeout_ms == 0 {
            return invalid("camera.frame_timeout_ms must be positive");
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return invalid("camera width and height must be positive");
        }
        if self.model.std.iter().any(|s| *s == 0.0) {
            return invalid("model.std must not contain zero");
        }
        Ok(())
    }

    pub fn undesired_labels(&self) -> BTreeSet<Label> {
        self.labels
            .iter()
            .filter(|l| l.undesired)
            .map(|l| l.name.clone())
            .collect()
    }
}

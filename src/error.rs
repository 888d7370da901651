use std::path::PathBuf;
use std::time::Duration;

use crate::{Label, SessionState};

/// The camera could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("capture device {0} does not exist")]
    NoDevice(PathBuf),
    #[error("failed to spawn capture command {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("capture command {command} exited before producing a frame")]
    Exited { command: String },
    #[error("capture command {command} produced no frame within {timeout:?}")]
    NoFrame { command: String, timeout: Duration },
}

/// The embedding model could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("model file {0} does not exist")]
    Missing(PathBuf),
    #[error("failed to load model {path}: {message}")]
    Model { path: PathBuf, message: String },
}

/// Fatal to session start: camera or model unavailable.
#[derive(Debug, thiserror::Error)]
pub enum InitializationError {
    #[error("camera unavailable: {0}")]
    Camera(#[from] CameraError),
    #[error("embedding model unavailable: {0}")]
    Model(#[from] LoadError),
}

/// Acquiring a frame or its embedding failed.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("frame source has not been opened")]
    NotOpen,
    #[error("embedding model has not been loaded")]
    ModelNotLoaded,
    #[error("no frame arrived within {0:?}")]
    Timeout(Duration),
    #[error("capture stream closed")]
    StreamClosed,
    #[error("frame is {got} bytes, expected {expected}")]
    InvalidFrame { expected: usize, got: usize },
    #[error("embedding failed: {0}")]
    Embedding(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier has no examples")]
    Empty,
    #[error("embedding has {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Audio or notification dispatch failed. Never fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum AlertSinkError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Initialization(#[from] InitializationError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("cannot {command} while {state}")]
    InvalidTransition {
        state: SessionState,
        command: &'static str,
    },
    #[error("unknown label {0:?}")]
    UnknownLabel(String),
    #[error("label {0} has no training examples")]
    UntrainedLabel(Label),
    #[error("example count must be positive")]
    NoExamplesRequested,
}

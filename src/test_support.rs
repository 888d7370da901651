use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::{AlertSinkError, CameraError, CaptureError, LoadError};
use crate::{
    AlertSink, Classifier, Config, EmbeddingProvider, Frame, FrameSource, KnnClassifier, Pipeline,
    SessionController, StopHandle,
};

pub const NOT_TOUCHED_PIXEL: [u8; 3] = [255, 0, 0];
pub const TOUCHED_PIXEL: [u8; 3] = [0, 0, 255];

#[derive(Debug, Default)]
struct CameraScript {
    pixel: [u8; 3],
    deny_open: bool,
    /// Frames left before the stream closes; `None` streams forever.
    remaining: Option<usize>,
    /// Frames left before the handle is stopped.
    stop_after: Option<(usize, StopHandle)>,
    served: u64,
}

/// Lets a test steer a StubCamera after it has been boxed away.
#[derive(Clone, Debug)]
pub struct CameraHandle(Arc<Mutex<CameraScript>>);

impl CameraHandle {
    pub fn show(&self, pixel: [u8; 3]) {
        self.0.lock().unwrap().pixel = pixel;
    }

    pub fn fail_after(&self, frames: usize) {
        self.0.lock().unwrap().remaining = Some(frames);
    }

    /// Stops `stop` once `frames` more frames have been served.
    pub fn stop_after(&self, frames: usize, stop: StopHandle) {
        self.0.lock().unwrap().stop_after = Some((frames, stop));
    }

    pub fn deny_open(&self) {
        self.0.lock().unwrap().deny_open = true;
    }
}

/// A one-pixel camera.
pub struct StubCamera {
    script: Arc<Mutex<CameraScript>>,
    open: bool,
}

impl StubCamera {
    pub fn showing(pixel: [u8; 3]) -> (Self, CameraHandle) {
        let script = Arc::new(Mutex::new(CameraScript {
            pixel,
            ..CameraScript::default()
        }));
        let camera = Self {
            script: script.clone(),
            open: false,
        };
        (camera, CameraHandle(script))
    }
}

impl FrameSource for StubCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        if self.script.lock().unwrap().deny_open {
            return Err(CameraError::NoDevice("/dev/video0".into()));
        }
        self.open = true;
        Ok(())
    }

    fn current_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::NotOpen);
        }
        let mut script = self.script.lock().unwrap();
        match script.remaining.as_mut() {
            Some(0) => return Err(CaptureError::StreamClosed),
            Some(n) => *n -= 1,
            None => {}
        }
        script.served += 1;
        let tripped = match script.stop_after.as_mut() {
            Some((left, _)) => {
                *left = left.saturating_sub(1);
                *left == 0
            }
            None => false,
        };
        if tripped {
            if let Some((_, stop)) = script.stop_after.take() {
                stop.stop();
            }
        }
        Ok(Frame {
            id: script.served,
            width: 1,
            height: 1,
            pixels: script.pixel.to_vec(),
        })
    }
}

/// Uses the raw pixel values as the embedding.
#[derive(Debug, Default)]
pub struct StubEmbedder {
    loaded: bool,
    missing: bool,
}

impl StubEmbedder {
    pub fn unloadable() -> Self {
        Self {
            loaded: false,
            missing: true,
        }
    }
}

impl EmbeddingProvider for StubEmbedder {
    fn load(&mut self) -> Result<(), LoadError> {
        if self.missing {
            return Err(LoadError::Missing(PathBuf::from("stub.onnx")));
        }
        self.loaded = true;
        Ok(())
    }

    fn infer(&self, frame: &Frame) -> Result<crate::Embedding, CaptureError> {
        if !self.loaded {
            return Err(CaptureError::ModelNotLoaded);
        }
        Ok(frame
            .pixels
            .iter()
            .map(|p| *p as f32 / 255.0)
            .collect::<Vec<_>>()
            .into())
    }
}

#[derive(Debug, Default)]
pub struct SinkLog {
    pub audio_cues: usize,
    pub notifications: Vec<(String, String)>,
    pub fail_audio: bool,
    playback_done: bool,
}

impl SinkLog {
    /// Simulates the audio cue reaching its end.
    pub fn finish_playback(&mut self) {
        self.playback_done = true;
    }
}

pub struct RecordingSink(Arc<Mutex<SinkLog>>);

impl RecordingSink {
    pub fn new() -> (Self, Arc<Mutex<SinkLog>>) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        (Self(log.clone()), log)
    }
}

impl AlertSink for RecordingSink {
    fn play_audio_cue(&mut self) -> Result<(), AlertSinkError> {
        let mut log = self.0.lock().unwrap();
        if log.fail_audio {
            return Err(AlertSinkError::Spawn {
                command: "aplay".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        log.audio_cues += 1;
        Ok(())
    }

    fn poll_playback_completed(&mut self) -> bool {
        std::mem::take(&mut self.0.lock().unwrap().playback_done)
    }

    fn send_notification(&mut self, title: &str, body: &str) -> Result<(), AlertSinkError> {
        self.0
            .lock()
            .unwrap()
            .notifications
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}

pub fn pipeline(camera: StubCamera) -> Pipeline {
    Pipeline::init(Box::new(camera), Box::new(StubEmbedder::default())).unwrap()
}

/// Five examples of each default label, built from the stub pixels.
pub fn trained_classifier() -> KnnClassifier {
    let mut knn = KnnClassifier::new(3);
    let embed = |pixel: [u8; 3]| pixel.iter().map(|p| *p as f32 / 255.0).collect::<Vec<_>>();
    for _ in 0..5 {
        knn.add_example(embed(NOT_TOUCHED_PIXEL).into(), "not_touch".into())
            .unwrap();
        knn.add_example(embed(TOUCHED_PIXEL).into(), "touched".into())
            .unwrap();
    }
    knn
}

pub fn session_with(
    config: &Config,
) -> (SessionController, CameraHandle, Arc<Mutex<SinkLog>>) {
    let (camera, handle) = StubCamera::showing(NOT_TOUCHED_PIXEL);
    let (sink, log) = RecordingSink::new();
    let session = SessionController::init(
        config,
        Box::new(camera),
        Box::new(StubEmbedder::default()),
        Box::new(KnnClassifier::new(config.classifier.k)),
        Box::new(sink),
    )
    .unwrap();
    (session, handle, log)
}

pub fn session() -> (SessionController, CameraHandle, Arc<Mutex<SinkLog>>) {
    session_with(&Config::default())
}

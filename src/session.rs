use std::collections::BTreeSet;
use std::fmt;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::time::Duration;

use crate::error::{ClassifierError, InitializationError, SessionError};
use crate::{
    AlertDecision, AlertSink, Alerter, Classifier, CommandAlertSink, Config, EmbeddingProvider,
    FfmpegCamera, FrameSource, InferenceLoop, KnnClassifier, Label, LabelConfig, OnnxEmbedder,
    Pipeline, RunSummary, StopHandle, TrainingController, TrainingReport,
};

const EVENT_BACKLOG: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Camera and model are ready; nothing to run yet.
    Idle,
    Training { label: Label, progress: u8 },
    /// At least one training run has finished.
    Ready,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Training { label, progress } => {
                write!(f, "training {label} ({progress}%)")
            }
            SessionState::Ready => f.write_str("ready"),
            SessionState::Running => f.write_str("running"),
            SessionState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Signals published for whatever renders the session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    TrainingProgress { label: Label, percent: u8 },
    Classified {
        label: Label,
        confidence: f32,
        undesired: bool,
    },
    Alerted(AlertDecision),
    Failed(String),
}

/// SessionController owns the collaborators and drives the
/// Idle → Training → Ready → Running state machine.
pub struct SessionController {
    labels: Vec<LabelConfig>,
    undesired: BTreeSet<Label>,
    examples_per_label: usize,
    inter_sample_delay: Duration,
    poll_interval: Duration,
    pipeline: Pipeline,
    classifier: Box<dyn Classifier>,
    alerter: Alerter,
    state: SessionState,
    stop: StopHandle,
    events: SyncSender<SessionEvent>,
    recv: Option<Receiver<SessionEvent>>,
}

impl SessionController {
    /// Builds a session on the stock adapters: ffmpeg capture, an ONNX
    /// embedder, k-NN classification and command-line alerts.
    pub fn from_config(config: &Config) -> Result<Self, InitializationError> {
        let camera = FfmpegCamera::new(config.camera.clone());
        let embedder = OnnxEmbedder::new(
            config.model.clone(),
            config.camera.width,
            config.camera.height,
        );
        Self::init(
            config,
            Box::new(camera),
            Box::new(embedder),
            Box::new(KnnClassifier::new(config.classifier.k)),
            Box::new(CommandAlertSink::new(config.alert.clone())),
        )
    }

    /// Opens the camera and loads the model. The session starts in `Idle`.
    pub fn init(
        config: &Config,
        source: Box<dyn FrameSource>,
        embedder: Box<dyn EmbeddingProvider>,
        classifier: Box<dyn Classifier>,
        sink: Box<dyn AlertSink>,
    ) -> Result<Self, InitializationError> {
        tracing::info!("init...");
        let pipeline = Pipeline::init(source, embedder)?;
        let (events, recv) = sync_channel(EVENT_BACKLOG);

        let session = Self {
            labels: config.labels.clone(),
            undesired: config.undesired_labels(),
            examples_per_label: config.training.examples_per_label,
            inter_sample_delay: config.training.inter_sample_delay(),
            poll_interval: config.inference.poll_interval(),
            pipeline,
            classifier,
            alerter: Alerter::new(&config.alert, sink),
            state: SessionState::Idle,
            stop: StopHandle::new(),
            events,
            recv: Some(recv),
        };
        tracing::info!("setup done");
        publish(&session.events, SessionEvent::StateChanged(SessionState::Idle));
        Ok(session)
    }

    pub fn take_receiver(&mut self) -> Option<Receiver<SessionEvent>> {
        self.recv.take()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn labels(&self) -> &[LabelConfig] {
        &self.labels
    }

    pub fn example_count(&self, label: &Label) -> usize {
        self.classifier.example_count(label)
    }

    /// A handle other threads can use to end a running training or
    /// inference phase. Each call to `train`, `train_with` or `run` is one
    /// phase, refused calls included.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Collects the configured number of examples for `label`.
    pub fn train(&mut self, label: &str) -> Result<TrainingReport, SessionError> {
        self.train_with(label, self.examples_per_label, self.inter_sample_delay)
    }

    pub fn train_with(
        &mut self,
        label: &str,
        count: usize,
        delay: Duration,
    ) -> Result<TrainingReport, SessionError> {
        let _phase = self.stop.begin_phase();
        if !matches!(self.state, SessionState::Idle | SessionState::Ready) {
            return Err(self.invalid("train"));
        }
        let label = self.lookup(label)?;
        if count == 0 {
            return Err(SessionError::NoExamplesRequested);
        }

        self.set_state(SessionState::Training {
            label: label.clone(),
            progress: 0,
        });

        let state = &mut self.state;
        let events = &self.events;
        let result = TrainingController::new(&mut self.pipeline, &self.stop).train(
            self.classifier.as_mut(),
            &label,
            count,
            delay,
            |percent| {
                *state = SessionState::Training {
                    label: label.clone(),
                    progress: percent,
                };
                publish(
                    events,
                    SessionEvent::TrainingProgress {
                        label: label.clone(),
                        percent,
                    },
                );
            },
        );

        self.settle();
        if let Err(e) = &result {
            self.fail("training", e);
        }
        result
    }

    /// Classifies the feed until the stop handle fires, then returns to
    /// `Ready`.
    pub fn run(&mut self) -> Result<RunSummary, SessionError> {
        let _phase = self.stop.begin_phase();
        if self.state != SessionState::Ready {
            return Err(self.invalid("run"));
        }
        if self.classifier.is_empty() {
            return Err(ClassifierError::Empty.into());
        }
        if let Some(untrained) = self
            .labels
            .iter()
            .find(|l| self.classifier.example_count(&l.name) == 0)
        {
            return Err(SessionError::UntrainedLabel(untrained.name.clone()));
        }

        self.set_state(SessionState::Running);

        let events = &self.events;
        let result = InferenceLoop::new(
            &mut self.pipeline,
            self.classifier.as_ref(),
            &mut self.alerter,
            &self.undesired,
            self.poll_interval,
            &self.stop,
        )
        .run(|cycle| {
            publish(
                events,
                SessionEvent::Classified {
                    label: cycle.prediction.label.clone(),
                    confidence: cycle.prediction.confidence(),
                    undesired: cycle.undesired,
                },
            );
            if cycle.alert != AlertDecision::default() {
                publish(events, SessionEvent::Alerted(cycle.alert));
            }
        });

        self.settle();
        if let Err(e) = &result {
            self.fail("inference", e);
        }
        result
    }

    /// Ends the session for good.
    pub fn shutdown(&mut self) {
        self.stop.stop();
        self.set_state(SessionState::Stopped);
    }

    fn lookup(&self, name: &str) -> Result<Label, SessionError> {
        self.labels
            .iter()
            .find(|l| l.name.as_str() == name)
            .map(|l| l.name.clone())
            .ok_or_else(|| SessionError::UnknownLabel(name.to_string()))
    }

    fn invalid(&self, command: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            state: self.state.clone(),
            command,
        }
    }

    /// Returns to the recoverable state matching what the classifier holds.
    fn settle(&mut self) {
        if self.classifier.is_empty() {
            self.set_state(SessionState::Idle);
        } else {
            self.set_state(SessionState::Ready);
        }
    }

    fn fail(&self, phase: &str, error: &SessionError) {
        tracing::error!("{phase} aborted: {error}");
        publish(&self.events, SessionEvent::Failed(error.to_string()));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::info!("session {} -> {}", self.state, state);
        }
        self.state = state.clone();
        publish(&self.events, SessionEvent::StateChanged(state));
    }
}

fn publish(events: &SyncSender<SessionEvent>, event: SessionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            tracing::trace!("event backlog full, dropping {event:?}");
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

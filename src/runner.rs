use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::error::{ClassifierError, SessionError};
use crate::{AlertDecision, Alerter, Classifier, Label, Pipeline, Prediction, StopHandle};

/// The result of one embed-classify-alert cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Cycle {
    pub prediction: Prediction,
    pub undesired: bool,
    pub alert: AlertDecision,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub undesired_cycles: u64,
    pub audio_cues: u64,
    pub notifications: u64,
}

impl RunSummary {
    fn record(&mut self, cycle: &Cycle) {
        self.cycles += 1;
        self.undesired_cycles += cycle.undesired as u64;
        self.audio_cues += cycle.alert.audio as u64;
        self.notifications += cycle.alert.notification as u64;
    }
}

/// InferenceLoop classifies the live feed until stopped and hands every
/// result to the alerter.
pub struct InferenceLoop<'a> {
    pipeline: &'a mut Pipeline,
    classifier: &'a dyn Classifier,
    alerter: &'a mut Alerter,
    undesired: &'a BTreeSet<Label>,
    poll_interval: Duration,
    stop: &'a StopHandle,
}

impl<'a> InferenceLoop<'a> {
    pub fn new(
        pipeline: &'a mut Pipeline,
        classifier: &'a dyn Classifier,
        alerter: &'a mut Alerter,
        undesired: &'a BTreeSet<Label>,
        poll_interval: Duration,
        stop: &'a StopHandle,
    ) -> Self {
        Self {
            pipeline,
            classifier,
            alerter,
            undesired,
            poll_interval,
            stop,
        }
    }

    /// Runs a single cycle.
    pub fn step(&mut self, now: Instant) -> Result<Cycle, SessionError> {
        let embedding = self.pipeline.embed_current()?;
        let prediction = self.classifier.predict(&embedding)?;
        let undesired = self.undesired.contains(&prediction.label);
        let alert = self.alerter.observe(undesired, now);

        tracing::debug!(
            label = %prediction.label,
            confidence = prediction.confidence(),
            undesired,
            "classified frame"
        );
        Ok(Cycle {
            prediction,
            undesired,
            alert,
        })
    }

    /// Loops until the stop handle fires or a cycle fails. `on_cycle` sees
    /// every completed cycle.
    pub fn run(&mut self, mut on_cycle: impl FnMut(&Cycle)) -> Result<RunSummary, SessionError> {
        if self.classifier.is_empty() {
            return Err(ClassifierError::Empty.into());
        }
        tracing::info!("inference running every {:?}", self.poll_interval);

        let mut summary = RunSummary::default();
        while !self.stop.is_stopped() {
            let cycle = self.step(Instant::now())?;
            summary.record(&cycle);
            on_cycle(&cycle);

            if !self.stop.sleep(self.poll_interval) {
                break;
            }
        }

        tracing::info!(
            "inference stopped after {} cycles ({} undesired, {} audio cues, {} notifications)",
            summary.cycles,
            summary.undesired_cycles,
            summary.audio_cues,
            summary.notifications
        );
        Ok(summary)
    }
}

use std::time::Duration;

use crate::error::SessionError;
use crate::{Classifier, Label, Pipeline, StopHandle};

/// Outcome of one training run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainingReport {
    pub label: Label,
    pub requested: usize,
    pub collected: usize,
}

impl TrainingReport {
    /// False when the run was stopped before every example was captured.
    pub fn completed(&self) -> bool {
        self.collected == self.requested
    }
}

/// Percentage of a run that is done, rounded to the nearest integer.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 200 + total) / (2 * total)).min(100) as u8
}

/// TrainingController captures a fixed number of labeled examples from the
/// live feed, strictly one after another.
pub struct TrainingController<'a> {
    pipeline: &'a mut Pipeline,
    stop: &'a StopHandle,
}

impl<'a> TrainingController<'a> {
    pub fn new(pipeline: &'a mut Pipeline, stop: &'a StopHandle) -> Self {
        Self { pipeline, stop }
    }

    /// Appends `count` examples of `label`, reporting progress after each.
    ///
    /// A capture failure aborts the run; examples already appended stay in
    /// the classifier.
    pub fn train(
        &mut self,
        classifier: &mut dyn Classifier,
        label: &Label,
        count: usize,
        delay: Duration,
        mut progress: impl FnMut(u8),
    ) -> Result<TrainingReport, SessionError> {
        if count == 0 {
            return Err(SessionError::NoExamplesRequested);
        }
        tracing::info!("[{label}] is training ({count} examples)");

        let mut report = TrainingReport {
            label: label.clone(),
            requested: count,
            collected: 0,
        };
        for i in 0..count {
            let keep_going = if i == 0 {
                !self.stop.is_stopped()
            } else {
                self.stop.sleep(delay)
            };
            if !keep_going {
                tracing::info!("[{label}] training stopped after {} examples", report.collected);
                return Ok(report);
            }

            let embedding = self.pipeline.embed_current()?;
            classifier.add_example(embedding, label.clone())?;
            report.collected += 1;

            let pct = progress_percent(i + 1, count);
            tracing::debug!("[{label}] progress {pct}%");
            progress(pct);
        }

        tracing::info!("[{label}] training done");
        Ok(report)
    }
}

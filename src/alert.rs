use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::AlertSinkError;
use crate::AlertConfig;

/// Where alerts end up: an audio cue and a desktop notification.
pub trait AlertSink {
    fn play_audio_cue(&mut self) -> Result<(), AlertSinkError>;

    /// Reports each finished audio cue exactly once.
    fn poll_playback_completed(&mut self) -> bool;

    fn send_notification(&mut self, title: &str, body: &str) -> Result<(), AlertSinkError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioState {
    Armed,
    Suppressed,
}

/// What an undesired detection was allowed to trigger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlertDecision {
    pub audio: bool,
    pub notification: bool,
}

/// AlertGate debounces the audio cue and rate-limits notifications.
///
/// Audio fires on the edge into the undesired state and stays suppressed
/// until the cue reports playback completion. Notifications are gated only
/// by the cooldown since the last one.
#[derive(Clone, Debug)]
pub struct AlertGate {
    audio: AudioState,
    cooldown: Duration,
    last_notification: Option<Instant>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            audio: AudioState::Armed,
            cooldown,
            last_notification: None,
        }
    }

    pub fn audio_state(&self) -> AudioState {
        self.audio
    }

    pub fn undesired_detected(&mut self, now: Instant) -> AlertDecision {
        let audio = match self.audio {
            AudioState::Armed => {
                self.audio = AudioState::Suppressed;
                true
            }
            AudioState::Suppressed => false,
        };

        let notification = match self.last_notification {
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
            None => true,
        };
        if notification {
            self.last_notification = Some(now);
        }

        AlertDecision {
            audio,
            notification,
        }
    }

    pub fn playback_completed(&mut self) {
        self.audio = AudioState::Armed;
    }
}

/// Alerter couples an AlertGate to the sink that carries out its decisions.
pub struct Alerter {
    gate: AlertGate,
    sink: Box<dyn AlertSink>,
    title: String,
    body: String,
}

impl Alerter {
    pub fn new(config: &AlertConfig, sink: Box<dyn AlertSink>) -> Self {
        Self {
            gate: AlertGate::new(config.cooldown()),
            sink,
            title: config.title.clone(),
            body: config.body.clone(),
        }
    }

    pub fn gate(&self) -> &AlertGate {
        &self.gate
    }

    /// Feeds one classification result through the gate. Sink failures are
    /// logged and never returned.
    pub fn observe(&mut self, undesired: bool, now: Instant) -> AlertDecision {
        if self.sink.poll_playback_completed() {
            self.gate.playback_completed();
        }
        if !undesired {
            return AlertDecision::default();
        }

        let mut decision = self.gate.undesired_detected(now);
        if decision.audio {
            if let Err(e) = self.sink.play_audio_cue() {
                tracing::warn!("audio cue failed: {e}");
                // A cue that never started will never complete.
                self.gate.playback_completed();
                decision.audio = false;
            }
        }
        if decision.notification {
            if let Err(e) = self.sink.send_notification(&self.title, &self.body) {
                tracing::warn!("notification failed: {e}");
                decision.notification = false;
            }
        }
        decision
    }
}

/// CommandAlertSink plays the cue with an external player (aplay by default)
/// and notifies through an external notifier (notify-send by default).
pub struct CommandAlertSink {
    config: AlertConfig,
    player: Option<Child>,
    notifiers: Vec<Child>,
}

impl CommandAlertSink {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            player: None,
            notifiers: Vec::new(),
        }
    }

    fn spawn(command: &str, args: &[&str]) -> Result<Child, AlertSinkError> {
        Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| AlertSinkError::Spawn {
                command: command.to_string(),
                source,
            })
    }
}

impl AlertSink for CommandAlertSink {
    fn play_audio_cue(&mut self) -> Result<(), AlertSinkError> {
        if let Some(mut previous) = self.player.take() {
            previous.kill().ok();
            previous.wait().ok();
        }
        let child = Self::spawn(&self.config.player, &[&self.config.sound])?;
        tracing::debug!("playing {} with {}", self.config.sound, self.config.player);
        self.player = Some(child);
        Ok(())
    }

    fn poll_playback_completed(&mut self) -> bool {
        self.notifiers
            .retain_mut(|child| matches!(child.try_wait(), Ok(None)));

        let Some(player) = self.player.as_mut() else {
            return false;
        };
        match player.try_wait() {
            Ok(None) => false,
            Ok(Some(_)) | Err(_) => {
                self.player = None;
                true
            }
        }
    }

    fn send_notification(&mut self, title: &str, body: &str) -> Result<(), AlertSinkError> {
        let child = Self::spawn(&self.config.notifier, &[title, body])?;
        self.notifiers.push(child);
        Ok(())
    }
}

impl Drop for CommandAlertSink {
    fn drop(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.kill().ok();
            player.wait().ok();
        }
        for child in self.notifiers.iter_mut() {
            child.wait().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;

    const COOLDOWN: Duration = Duration::from_millis(3000);

    #[test]
    fn audio_fires_once_per_undesired_run() {
        let mut gate = AlertGate::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(gate.undesired_detected(t0).audio);
        for i in 1..10 {
            let d = gate.undesired_detected(t0 + Duration::from_millis(200 * i));
            assert!(!d.audio);
        }
        assert_eq!(gate.audio_state(), AudioState::Suppressed);

        gate.playback_completed();
        assert_eq!(gate.audio_state(), AudioState::Armed);
        assert!(gate.undesired_detected(t0 + Duration::from_secs(3)).audio);
    }

    #[test]
    fn notifications_respect_cooldown() {
        let mut gate = AlertGate::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(gate.undesired_detected(t0).notification);
        assert!(
            !gate
                .undesired_detected(t0 + Duration::from_millis(2999))
                .notification
        );
        assert!(
            gate.undesired_detected(t0 + Duration::from_millis(3000))
                .notification
        );
    }

    #[test]
    fn notification_far_apart_fire_twice() {
        let mut gate = AlertGate::new(COOLDOWN);
        let t0 = Instant::now();
        let first = gate.undesired_detected(t0);
        let second = gate.undesired_detected(t0 + Duration::from_millis(3500));
        assert!(first.notification && second.notification);
    }

    #[test]
    fn alerter_rearms_on_completion_event() {
        let (sink, log) = RecordingSink::new();
        let mut alerter = Alerter::new(&AlertConfig::default(), Box::new(sink));
        let t0 = Instant::now();

        alerter.observe(true, t0);
        alerter.observe(true, t0 + Duration::from_millis(200));
        alerter.observe(false, t0 + Duration::from_millis(400));
        alerter.observe(true, t0 + Duration::from_millis(600));
        assert_eq!(log.lock().unwrap().audio_cues, 1);

        log.lock().unwrap().finish_playback();
        let d = alerter.observe(true, t0 + Duration::from_millis(800));
        assert!(d.audio);
        assert_eq!(log.lock().unwrap().audio_cues, 2);
        assert_eq!(log.lock().unwrap().notifications.len(), 1);
    }

    #[test]
    fn desired_state_triggers_nothing() {
        let (sink, log) = RecordingSink::new();
        let mut alerter = Alerter::new(&AlertConfig::default(), Box::new(sink));
        let d = alerter.observe(false, Instant::now());
        assert_eq!(d, AlertDecision::default());
        assert_eq!(log.lock().unwrap().audio_cues, 0);
    }

    #[test]
    fn failed_cue_keeps_gate_armed() {
        let (sink, log) = RecordingSink::new();
        log.lock().unwrap().fail_audio = true;
        let mut alerter = Alerter::new(&AlertConfig::default(), Box::new(sink));

        let d = alerter.observe(true, Instant::now());
        assert!(!d.audio);
        assert!(d.notification);
        assert_eq!(alerter.gate().audio_state(), AudioState::Armed);
    }

    #[test]
    fn missing_player_is_a_sink_error() {
        let mut sink = CommandAlertSink::new(AlertConfig {
            player: "hands-off-no-such-player".into(),
            ..AlertConfig::default()
        });
        assert!(matches!(
            sink.play_audio_cue(),
            Err(AlertSinkError::Spawn { .. })
        ));
        assert!(!sink.poll_playback_completed());
    }
}

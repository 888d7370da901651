use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// StopHandle is a cloneable cooperative stop signal. Training and inference
/// check it at every suspension point.
///
/// Stops are aimed at phases, numbered from 1 in the order they start. A stop
/// sent while a phase is active ends that phase; one sent between phases ends
/// the next phase as soon as it starts. Either way it is spent once that
/// phase is over.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<StopState>);

#[derive(Debug, Default)]
struct StopState {
    /// Number of the latest phase times two, plus one while it is active.
    phase: AtomicU64,
    /// Phases told to stop that have not ended yet.
    stopped: Mutex<BTreeSet<u64>>,
}

/// Marks a phase active until dropped.
#[derive(Debug)]
pub(crate) struct PhaseGuard(StopHandle);

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        let state = &(self.0).0;
        let ended = state.phase.load(Ordering::SeqCst) / 2;
        state
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|p| *p > ended);
        state.phase.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the active phase, or the next one if none is running.
    pub fn stop(&self) {
        self.stop_phase(self.target());
    }

    /// Stops phase number `phase` only. Phase 0 names nothing.
    pub fn stop_phase(&self, phase: u64) {
        if phase > 0 {
            self.stopped().insert(phase);
        }
    }

    pub fn is_stopped(&self) -> bool {
        let target = self.target();
        self.stopped().contains(&target)
    }

    fn stopped(&self) -> MutexGuard<'_, BTreeSet<u64>> {
        self.0.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn begin_phase(&self) -> PhaseGuard {
        // 2n (idle after phase n) -> 2(n + 1) + 1 (phase n + 1 active)
        self.0.phase.fetch_add(3, Ordering::SeqCst);
        PhaseGuard(self.clone())
    }

    /// The active phase, or the next one.
    fn target(&self) -> u64 {
        let phase = self.0.phase.load(Ordering::SeqCst);
        if phase & 1 == 1 {
            phase / 2
        } else {
            phase / 2 + 1
        }
    }

    /// Sleeps for `duration`, waking early if stopped. Returns false if the
    /// stop signal was seen.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

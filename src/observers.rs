// Observers the firmware registers with the OTA manager

use std::sync::atomic::{AtomicU32, Ordering};

use ota_core::{LastError, OtaState, ProgressObserver, StateObserver};

/// Minimum change in percent before another progress line is logged
const PROGRESS_STEP: u32 = 5;

pub struct ProgressLogger {
    last_logged: AtomicU32,
}

impl ProgressLogger {
    pub fn new() -> Self {
        Self {
            last_logged: AtomicU32::new(0),
        }
    }

    /// Returns the percentage to log, if this report should be logged
    fn should_log(&self, progress: u32, total: u32) -> Option<u32> {
        if total == 0 {
            return None;
        }
        let percent = progress.saturating_mul(100) / total;
        let last = self.last_logged.load(Ordering::Relaxed);

        // A new download starts again from zero
        if percent < last {
            self.last_logged.store(percent, Ordering::Relaxed);
            return None;
        }
        if percent >= last + PROGRESS_STEP || progress == total {
            self.last_logged.store(percent, Ordering::Relaxed);
            return Some(percent);
        }
        None
    }
}

impl Default for ProgressLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ProgressLogger {
    fn on_progress(&self, progress: u32, total: u32) {
        if let Some(percent) = self.should_log(progress, total) {
            log::info!("OTA progress: {}% ({}/{})", percent, progress, total);
        }
    }
}

pub struct StateLogger {
    restart_on_complete: bool,
}

impl StateLogger {
    pub fn new(restart_on_complete: bool) -> Self {
        Self { restart_on_complete }
    }
}

impl StateObserver for StateLogger {
    fn on_state(&self, state: OtaState, error: LastError) {
        match state {
            OtaState::Error => log::error!("OTA state: {} ({})", state, error),
            OtaState::Complete => {
                log::info!("OTA update complete");
                if self.restart_on_complete {
                    crate::platform::restart();
                }
            }
            _ => log::info!("OTA state: {}", state),
        }
    }
}

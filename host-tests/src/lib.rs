//! Host-based tests for the OTA manager
//! These run the manager, scheduler and commands against the simulated
//! platform on the development machine, not on the ESP32

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use ota_core::sim::{quick_config, SimPlatform};
use ota_core::{LastError, OtaConfig, OtaManager, OtaState};

/// Records every observer call in order
#[derive(Clone, Default)]
pub struct Recorder {
    pub states: Arc<Mutex<Vec<(OtaState, LastError)>>>,
    pub progress: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl Recorder {
    /// Register both observers on the manager
    pub fn attach(&self, manager: &OtaManager) {
        let states = self.states.clone();
        manager.set_state_observer(move |state: OtaState, error: LastError| {
            states
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((state, error));
        });
        let progress = self.progress.clone();
        manager.set_progress_observer(move |done: u32, total: u32| {
            progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((done, total));
        });
    }

    pub fn states(&self) -> Vec<OtaState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(state, _)| *state)
            .collect()
    }

    pub fn progress(&self) -> Vec<(u32, u32)> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A sim platform and a manager built on it with `config`
pub fn setup_with(config: OtaConfig) -> (SimPlatform, OtaManager) {
    let sim = SimPlatform::new();
    let manager = match OtaManager::new(config, sim.platform()) {
        Ok(manager) => manager,
        Err(e) => panic!("manager setup failed: {e}"),
    };
    (sim, manager)
}

pub fn setup() -> (SimPlatform, OtaManager) {
    setup_with(quick_config())
}

/// Poll `done` for up to two seconds
pub fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[cfg(test)]
mod check_scenarios;
#[cfg(test)]
mod command_scenarios;
#[cfg(test)]
mod scheduler_scenarios;
#[cfg(test)]
mod update_scenarios;
#[cfg(test)]
mod version_properties;

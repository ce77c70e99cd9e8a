//! OTA manager: owns the update state machine and drives the network
//! pipeline, the certificate selector and the installer.
//!
//! `OtaManager` is a cheap cloneable handle. Every read-modify-write of the
//! state happens under one mutex that is never held across a network wait,
//! and observers are always called with the lock released. A second check or
//! update started while one is in flight is rejected with [`OtaError::Busy`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};

use crate::address::DottedAddress;
use crate::certs;
use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::pipeline::{self, PROGRESS_TOTAL};
use crate::platform::Platform;
use crate::scheduler::TaskHandle;
use crate::state::{LastError, ManagerState, OtaState, VersionString};
use crate::version::{self, VersionOrdering};

/// Receives `(progress, total)` while a download is in flight
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: u32, total: u32);
}

impl<F> ProgressObserver for F
where
    F: Fn(u32, u32) + Send + Sync,
{
    fn on_progress(&self, progress: u32, total: u32) {
        self(progress, total)
    }
}

/// Receives every `(state, error)` transition
pub trait StateObserver: Send + Sync {
    fn on_state(&self, state: OtaState, error: LastError);
}

impl<F> StateObserver for F
where
    F: Fn(OtaState, LastError) + Send + Sync,
{
    fn on_state(&self, state: OtaState, error: LastError) {
        self(state, error)
    }
}

/// Result of a version check that reached a valid comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    UpdateAvailable(VersionString),
    UpToDate,
    /// Running firmware is newer than the published one
    CurrentIsNewer(VersionString),
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Inner {
    pub(crate) config: OtaConfig,
    pub(crate) platform: Platform,
    state: Mutex<ManagerState>,
    progress_observer: Mutex<Option<Arc<dyn ProgressObserver>>>,
    state_observer: Mutex<Option<Arc<dyn StateObserver>>>,
    busy: AtomicBool,
    trust_anchor_loaded: AtomicBool,
    pub(crate) task: Mutex<Option<TaskHandle>>,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct OtaManager {
    pub(crate) inner: Arc<Inner>,
}

impl OtaManager {
    pub fn new(config: OtaConfig, platform: Platform) -> Result<Self, OtaError> {
        config.validate().map_err(OtaError::InvalidConfig)?;
        let state = ManagerState::new(&config.current_version)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                platform,
                state: Mutex::new(state),
                progress_observer: Mutex::new(None),
                state_observer: Mutex::new(None),
                busy: AtomicBool::new(false),
                trust_anchor_loaded: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        })
    }

    /// Reset the manager state. Rejected while the background task runs.
    pub fn init(&self) -> Result<(), OtaError> {
        if self.is_task_running() {
            warn!("OTA manager init requested while the task is running");
            return Err(OtaError::AlreadyExists);
        }

        let fresh = ManagerState::new(&self.inner.config.current_version)?;
        *lock(&self.inner.state) = fresh;

        info!(
            "OTA manager initialized, current version {}",
            self.inner.config.current_version
        );
        Ok(())
    }

    pub fn config(&self) -> &OtaConfig {
        &self.inner.config
    }

    fn try_begin(&self) -> Result<BusyGuard<'_>, OtaError> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| OtaError::Busy)?;
        Ok(BusyGuard(&self.inner.busy))
    }

    fn notify_state(&self, state: OtaState, error: LastError) {
        let observer = lock(&self.inner.state_observer).clone();
        if let Some(observer) = observer {
            observer.on_state(state, error);
        }
    }

    fn set_state(&self, state: OtaState, error: LastError) {
        lock(&self.inner.state).transition(state, error);
        debug!("OTA state -> {} ({})", state, error);
        self.notify_state(state, error);
    }

    /// Record a state-changing failure and hand the error back.
    fn fail(&self, e: OtaError) -> OtaError {
        if let Some(kind) = e.last_error() {
            self.set_state(OtaState::Error, kind);
        }
        e
    }

    fn report_progress(&self, progress: u32, total: u32) {
        {
            let mut state = lock(&self.inner.state);
            state.download_progress = progress;
            state.total_size = total;
        }
        let observer = lock(&self.inner.progress_observer).clone();
        if let Some(observer) = observer {
            observer.on_progress(progress, total);
        }
    }

    fn require_connectivity(&self) -> Result<(), OtaError> {
        if self.inner.platform.connectivity.is_connected() {
            Ok(())
        } else {
            warn!("Network not connected");
            Err(self.fail(OtaError::Network))
        }
    }

    /// Fetch the remote version and compare it with the running one.
    pub fn check_for_updates(&self) -> Result<CheckOutcome, OtaError> {
        let _guard = self.try_begin()?;
        self.run_check()
    }

    fn run_check(&self) -> Result<CheckOutcome, OtaError> {
        info!("Checking for firmware updates...");

        self.require_connectivity()?;
        self.set_state(OtaState::CheckingVersion, LastError::None);

        let remote = match pipeline::fetch_version_token(&self.inner.platform, &self.inner.config) {
            Ok(remote) => remote,
            Err(e) => {
                if matches!(e, OtaError::VersionParse(_)) {
                    self.mark_checked();
                }
                error!("Version check failed: {}", e);
                return Err(self.fail(e));
            }
        };

        let now = self.inner.platform.clock.now_secs();
        let (outcome, state, error) = {
            let mut state = lock(&self.inner.state);
            state.last_check_time_secs = now;

            let ordering = version::compare(&state.current_version, &remote);
            info!(
                "Current version: {}, remote version: {} ({})",
                state.current_version,
                remote,
                ordering.as_str()
            );

            let outcome = match ordering {
                VersionOrdering::Older => Ok(CheckOutcome::UpdateAvailable(remote.clone())),
                VersionOrdering::Same => Ok(CheckOutcome::UpToDate),
                VersionOrdering::Newer => Ok(CheckOutcome::CurrentIsNewer(remote.clone())),
                VersionOrdering::Invalid => Err(OtaError::VersionParse(format!(
                    "cannot compare '{}' with '{}'",
                    state.current_version, remote
                ))),
            };

            match &outcome {
                Ok(found) => {
                    state.latest_version = remote;
                    state.transition(OtaState::Idle, LastError::None);
                    state.update_available = matches!(found, CheckOutcome::UpdateAvailable(_));
                }
                Err(_) => {
                    state.update_available = false;
                    state.transition(OtaState::Error, LastError::VersionParse);
                }
            }
            (outcome, state.current_state, state.last_error)
        };
        self.notify_state(state, error);

        match &outcome {
            Ok(CheckOutcome::UpdateAvailable(v)) => info!("New firmware available: {}", v),
            Ok(CheckOutcome::UpToDate) => info!("Firmware is up to date"),
            Ok(CheckOutcome::CurrentIsNewer(v)) => {
                info!("Running firmware is newer than published {}", v)
            }
            Err(e) => error!("{}", e),
        }
        outcome
    }

    fn mark_checked(&self) {
        let now = self.inner.platform.clock.now_secs();
        lock(&self.inner.state).last_check_time_secs = now;
    }

    /// Check now, regardless of when the last check ran.
    pub fn force_check(&self) -> Result<CheckOutcome, OtaError> {
        let _guard = self.try_begin()?;
        lock(&self.inner.state).last_check_time_secs = 0;
        self.run_check()
    }

    /// Download and install the pending update.
    pub fn start_update(&self) -> Result<(), OtaError> {
        let _guard = self.try_begin()?;

        if !self.is_update_available() {
            warn!("No update available to install");
            return Err(OtaError::NotAvailable);
        }

        self.require_connectivity()?;

        if self.inner.config.https() {
            self.ensure_trust_anchor()?;
        }

        info!("Starting firmware update to {}", self.latest_version());
        {
            let mut state = lock(&self.inner.state);
            state.transition(OtaState::Downloading, LastError::None);
            state.download_progress = 0;
            state.total_size = PROGRESS_TOTAL;
        }
        self.notify_state(OtaState::Downloading, LastError::None);

        let mut report = |progress, total| self.report_progress(progress, total);
        if let Err(e) =
            pipeline::download_firmware(&self.inner.platform, &self.inner.config, &mut report)
        {
            error!("Firmware download failed: {}", e);
            return Err(self.fail(e));
        }

        self.set_state(OtaState::Installing, LastError::None);
        if let Err(e) = self
            .inner
            .platform
            .installer
            .finish(self.inner.config.settle_delay())
        {
            error!("Firmware install failed: {:#}", e);
            return Err(self.fail(OtaError::InstallFailed(format!("{e:#}"))));
        }

        self.set_state(OtaState::Complete, LastError::None);
        info!("Firmware update complete, restart to boot the new image");
        Ok(())
    }

    /// Select the configured trust anchor and install it into the slot.
    pub fn load_certificates(&self) -> Result<(), OtaError> {
        let config = &self.inner.config;
        let descriptor = certs::select(
            self.inner.platform.anchors.as_ref(),
            config.trust_anchor,
            config.credential_slot,
        )?;
        certs::load_certificate(self.inner.platform.trust_store.as_ref(), &descriptor)?;
        self.inner.trust_anchor_loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_trust_anchor(&self) -> Result<(), OtaError> {
        if self.inner.trust_anchor_loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        self.load_certificates().map_err(|e| {
            error!("Cannot start secure download: {}", e);
            e
        })
    }

    /// Resolve the distribution host without touching the state.
    pub fn test_connection(&self) -> Result<DottedAddress, OtaError> {
        if !self.inner.platform.connectivity.is_connected() {
            return Err(OtaError::Network);
        }
        pipeline::test_connection(&self.inner.platform, &self.inner.config)
    }

    pub fn set_progress_observer<O>(&self, observer: O) -> Option<Arc<dyn ProgressObserver>>
    where
        O: ProgressObserver + 'static,
    {
        lock(&self.inner.progress_observer).replace(Arc::new(observer))
    }

    pub fn clear_progress_observer(&self) -> Option<Arc<dyn ProgressObserver>> {
        lock(&self.inner.progress_observer).take()
    }

    pub fn set_state_observer<O>(&self, observer: O) -> Option<Arc<dyn StateObserver>>
    where
        O: StateObserver + 'static,
    {
        lock(&self.inner.state_observer).replace(Arc::new(observer))
    }

    pub fn clear_state_observer(&self) -> Option<Arc<dyn StateObserver>> {
        lock(&self.inner.state_observer).take()
    }

    pub fn set_auto_check(&self, enabled: bool) {
        lock(&self.inner.state).auto_check_enabled = enabled;
        info!("Auto update check {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn auto_check_enabled(&self) -> bool {
        lock(&self.inner.state).auto_check_enabled
    }

    pub fn current_state(&self) -> OtaState {
        lock(&self.inner.state).current_state
    }

    pub fn last_error(&self) -> LastError {
        lock(&self.inner.state).last_error
    }

    pub fn current_version(&self) -> VersionString {
        lock(&self.inner.state).current_version.clone()
    }

    pub fn latest_version(&self) -> VersionString {
        lock(&self.inner.state).latest_version.clone()
    }

    pub fn is_update_available(&self) -> bool {
        lock(&self.inner.state).update_available
    }

    /// `(progress, total)` of the current or last download
    pub fn download_progress(&self) -> (u32, u32) {
        let state = lock(&self.inner.state);
        (state.download_progress, state.total_size)
    }

    pub fn last_check_time_secs(&self) -> u64 {
        lock(&self.inner.state).last_check_time_secs
    }

    /// Consistent copy of the whole state
    pub fn snapshot(&self) -> ManagerState {
        lock(&self.inner.state).clone()
    }

    /// Whether the scheduler should run a check now
    pub(crate) fn check_due(&self) -> bool {
        let now = self.inner.platform.clock.now_secs();
        let state = lock(&self.inner.state);
        state.auto_check_enabled
            && now.saturating_sub(state.last_check_time_secs) >= self.inner.config.check_interval_secs
    }

    /// Bring the manager up the way the firmware does at boot: init,
    /// observers, certificates, background task, then auto check.
    pub fn bring_up<P, S>(&self, progress: P, state: S) -> Result<(), OtaError>
    where
        P: ProgressObserver + 'static,
        S: StateObserver + 'static,
    {
        self.init()?;
        self.set_progress_observer(progress);
        self.set_state_observer(state);

        if self.inner.config.https() {
            self.load_certificates()?;
        } else {
            info!("Plain HTTP transport, skipping certificate load");
        }

        self.start_task()?;
        self.set_auto_check(true);
        info!("OTA manager ready");
        Ok(())
    }
}

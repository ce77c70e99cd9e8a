// Background task running periodic update checks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::error::OtaError;
use crate::manager::{lock, Inner, OtaManager};
use crate::state::OtaState;

pub(crate) struct TaskHandle {
    wake: Sender<()>,
    stop: Arc<AtomicBool>,
    exited: Receiver<()>,
    thread: JoinHandle<()>,
}

impl OtaManager {
    pub fn start_task(&self) -> Result<(), OtaError> {
        let mut task = lock(&self.inner.task);
        if task.as_ref().is_some_and(|handle| !handle.thread.is_finished()) {
            return Err(OtaError::AlreadyExists);
        }

        let (wake_tx, wake_rx) = mpsc::channel();
        let (exited_tx, exited_rx) = mpsc::sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));

        let weak = Arc::downgrade(&self.inner);
        let stop_flag = stop.clone();
        let thread = thread::Builder::new()
            .name("ota_task".into())
            .stack_size(self.inner.config.task_stack_size)
            .spawn(move || run(weak, wake_rx, stop_flag, exited_tx))
            .map_err(|e| {
                error!("Failed to spawn OTA task: {}", e);
                OtaError::Allocation("OTA task")
            })?;

        *task = Some(TaskHandle {
            wake: wake_tx,
            stop,
            exited: exited_rx,
            thread,
        });
        info!(
            "OTA task started, checking every {} s",
            self.inner.config.check_interval_secs
        );
        Ok(())
    }

    /// Stop the background task. An in-flight check is not cancelled; if the
    /// task does not exit within the grace period it is detached and left to
    /// finish on its own.
    pub fn stop_task(&self) -> Result<(), OtaError> {
        let handle = lock(&self.inner.task)
            .take()
            .ok_or(OtaError::NotInitialized)?;

        handle.stop.store(true, Ordering::Release);
        // A task that already exited has dropped its receiver
        let _ = handle.wake.send(());

        let grace = self.inner.config.stop_grace();
        match handle.exited.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.thread.join().is_err() {
                    error!("OTA task panicked");
                }
                info!("OTA task stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "OTA task did not exit within {} ms, detaching it",
                    grace.as_millis()
                );
            }
        }
        Ok(())
    }

    /// Wake the background task so it re-evaluates the check interval now.
    pub fn wake_task(&self) -> Result<(), OtaError> {
        let task = lock(&self.inner.task);
        let handle = task.as_ref().ok_or(OtaError::NotInitialized)?;
        handle.wake.send(()).map_err(|_| OtaError::NotInitialized)
    }

    pub fn is_task_running(&self) -> bool {
        lock(&self.inner.task)
            .as_ref()
            .is_some_and(|handle| !handle.thread.is_finished())
    }

    /// One pass of the scheduler loop
    pub(crate) fn tick(&self) {
        let snapshot = self.snapshot();
        if snapshot.update_available && snapshot.current_state == OtaState::Idle {
            info!(
                "Update {} available, waiting for user action",
                snapshot.latest_version
            );
        }

        if !self.check_due() {
            debug!("Update check not due");
            return;
        }

        match self.check_for_updates() {
            Ok(outcome) => debug!("Scheduled check finished: {:?}", outcome),
            Err(OtaError::Busy) => debug!("Scheduled check skipped, another operation is running"),
            Err(e) => warn!("Scheduled check failed: {}", e),
        }
    }
}

fn run(manager: Weak<Inner>, wake: Receiver<()>, stop: Arc<AtomicBool>, exited: SyncSender<()>) {
    debug!("OTA task loop running");

    loop {
        let Some(interval) = manager.upgrade().map(|inner| inner.config.check_interval()) else {
            break;
        };

        match wake.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if stop.load(Ordering::Acquire) {
            break;
        }

        let Some(inner) = manager.upgrade() else {
            break;
        };
        OtaManager { inner }.tick();
    }

    debug!("OTA task loop exiting");
    let _ = exited.send(());
}

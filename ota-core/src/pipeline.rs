//! Network acquisition shared by the version check and the firmware download:
//! bounded DNS retries, the version token fetch, and the wait on the
//! transport's completion signal with estimated progress.

use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::address::{self, DottedAddress};
use crate::config::OtaConfig;
use crate::error::OtaError;
use crate::platform::{
    DownloadRequest, Endpoint, Platform, Resolver, TransferOutcome, TransportCode,
};
use crate::state::{version_string, VersionString, MAX_VERSION_LEN};

/// Estimated progress never claims more than this before the transport signals
pub const MAX_ESTIMATED_PROGRESS: u32 = 95;
pub const PROGRESS_TOTAL: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    /// Fixed pause between failed attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &OtaConfig) -> Self {
        Self {
            attempts: config.dns_attempts,
            timeout: config.dns_timeout(),
            backoff: config.dns_backoff(),
        }
    }
}

pub fn resolve_with_retry(
    resolver: &dyn Resolver,
    host: &str,
    policy: &RetryPolicy,
) -> Result<Ipv4Addr, OtaError> {
    for attempt in 1..=policy.attempts {
        debug!("Resolving {} (attempt {}/{})", host, attempt, policy.attempts);

        match resolver.resolve(host, policy.timeout) {
            Ok(addr) => {
                info!("Resolved {} -> {}", host, addr);
                return Ok(addr);
            }
            Err(e) => {
                warn!("DNS attempt {}/{} for {} failed: {}", attempt, policy.attempts, host, e);
                if attempt < policy.attempts {
                    thread::sleep(policy.backoff);
                }
            }
        }
    }

    error!("Failed to resolve {} after {} attempts", host, policy.attempts);
    Err(OtaError::DnsResolve {
        host: host.to_string(),
        attempts: policy.attempts,
    })
}

/// Trim whitespace and control bytes from both ends of a fetched body.
pub fn parse_version_token(raw: &str) -> Result<VersionString, OtaError> {
    let token = raw.trim_matches(|c: char| c.is_whitespace() || c.is_control());

    if token.is_empty() {
        return Err(OtaError::VersionParse("empty version token".into()));
    }

    version_string(token).ok_or_else(|| {
        OtaError::VersionParse(format!(
            "version token is {} bytes, limit is {}",
            token.len(),
            MAX_VERSION_LEN
        ))
    })
}

/// Resolve the distribution host and fetch the remote version token.
pub fn fetch_version_token(
    platform: &Platform,
    config: &OtaConfig,
) -> Result<VersionString, OtaError> {
    let addr = resolve_with_retry(
        platform.resolver.as_ref(),
        &config.host,
        &RetryPolicy::from_config(config),
    )?;
    let dotted = address::dotted(addr);

    let endpoint = Endpoint {
        address: &dotted,
        port: config.port,
        host: &config.host,
        resource: &config.version_resource,
        flags: config.transport_flags,
    };

    info!(
        "Fetching version from {}://{}/{}",
        config.scheme(),
        config.host,
        config.version_resource
    );

    let body = platform
        .version_source
        .fetch(&endpoint)
        .map_err(|e| OtaError::HttpRequest(format!("version fetch: {e:#}")))?;

    parse_version_token(&body)
}

/// Resolve the host and report the address, without fetching anything.
pub fn test_connection(platform: &Platform, config: &OtaConfig) -> Result<DottedAddress, OtaError> {
    info!("Testing connection to {}", config.host);
    let addr = resolve_with_retry(
        platform.resolver.as_ref(),
        &config.host,
        &RetryPolicy::from_config(config),
    )?;
    let dotted = address::dotted(addr);
    info!("Connection test OK: {} -> {}", config.host, dotted);
    Ok(dotted)
}

/// Sending half of the one-shot completion signal. Safe to call from any
/// thread; only the first call is delivered.
pub struct CompletionSender {
    tx: Mutex<Option<SyncSender<TransferOutcome>>>,
}

impl CompletionSender {
    /// Returns false if the signal was already raised or the waiter is gone.
    pub fn complete(&self, outcome: TransferOutcome) -> bool {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => tx.try_send(outcome).is_ok(),
            None => false,
        }
    }
}

pub struct CompletionWaiter {
    rx: Receiver<TransferOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wait {
    Done(TransferOutcome),
    Pending,
    /// The sender was dropped without signalling
    Abandoned,
}

impl CompletionWaiter {
    pub fn wait(&self, timeout: Duration) -> Wait {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Wait::Done(outcome),
            Err(RecvTimeoutError::Timeout) => Wait::Pending,
            Err(RecvTimeoutError::Disconnected) => Wait::Abandoned,
        }
    }
}

pub fn completion_signal() -> (CompletionSender, CompletionWaiter) {
    let (tx, rx) = mpsc::sync_channel(1);
    (
        CompletionSender {
            tx: Mutex::new(Some(tx)),
        },
        CompletionWaiter { rx },
    )
}

/// Time-based progress estimate, capped below completion.
pub fn estimate_progress(elapsed: Duration, timeout: Duration) -> u32 {
    let timeout_ms = timeout.as_millis().max(1);
    let percent = elapsed.as_millis().saturating_mul(100) / timeout_ms;
    percent.min(MAX_ESTIMATED_PROGRESS as u128) as u32
}

#[derive(Debug, Clone, Copy)]
pub struct WaitTiming {
    pub timeout: Duration,
    pub progress_interval: Duration,
    pub log_interval: Duration,
}

impl WaitTiming {
    pub fn from_config(config: &OtaConfig) -> Self {
        Self {
            timeout: config.download_timeout(),
            progress_interval: config.progress_interval(),
            log_interval: config.progress_log_interval(),
        }
    }
}

/// Block until the transport signals or the overall timeout passes,
/// reporting estimated progress on every progress interval.
pub fn await_completion(
    waiter: &CompletionWaiter,
    timing: &WaitTiming,
    report: &mut dyn FnMut(u32, u32),
) -> Result<(), OtaError> {
    let progress_interval = timing.progress_interval.max(Duration::from_millis(1));
    let log_interval = timing.log_interval.max(Duration::from_millis(1));

    let started = Instant::now();
    let mut next_report = progress_interval;
    let mut next_log = log_interval;

    loop {
        let elapsed = started.elapsed();
        if elapsed >= timing.timeout {
            error!("Download timed out after {} s", timing.timeout.as_secs());
            return Err(OtaError::Timeout {
                waited_ms: elapsed.as_millis() as u64,
            });
        }

        let next_event = next_report.min(next_log).min(timing.timeout);
        match waiter.wait(next_event.saturating_sub(elapsed)) {
            Wait::Done(TransferOutcome::Success) => {
                info!("Download completed in {} ms", started.elapsed().as_millis());
                report(PROGRESS_TOTAL, PROGRESS_TOTAL);
                return Ok(());
            }
            Wait::Done(TransferOutcome::Failed(reason)) => {
                error!("Transport reported failure: {}", reason);
                return Err(OtaError::DownloadFailed(reason));
            }
            Wait::Abandoned => {
                error!("Transport dropped the completion handler without signalling");
                return Err(OtaError::DownloadFailed("completion handler dropped".into()));
            }
            Wait::Pending => {}
        }

        let elapsed = started.elapsed();
        if elapsed >= timing.timeout {
            continue;
        }
        if elapsed >= next_report {
            report(estimate_progress(elapsed, timing.timeout), PROGRESS_TOTAL);
            while next_report <= elapsed {
                next_report += progress_interval;
            }
        }
        if elapsed >= next_log {
            info!(
                "Download in progress... {} s elapsed of {} s",
                elapsed.as_secs(),
                timing.timeout.as_secs()
            );
            while next_log <= elapsed {
                next_log += log_interval;
            }
        }
    }
}

fn log_start_failure(e: &anyhow::Error) {
    error!("Failed to start firmware download: {:#}", e);

    let tls_verify = e
        .chain()
        .filter_map(|cause| cause.downcast_ref::<TransportCode>())
        .any(|code| *code == TransportCode::TLS_VERIFY_FAILED);
    if tls_verify {
        error!("Server certificate verification failed. Possible causes:");
        error!("  - the configured trust anchor does not match the server chain");
        error!("  - the certificate was not loaded into the credential slot");
        error!("  - the device clock is far off and the chain looks expired");
    }
}

/// Resolve the firmware host, start the transfer and wait for it to finish.
///
/// A transport that refuses to start is an `HttpRequest` error; a transfer
/// that starts and later fails is `DownloadFailed`; no signal in time is
/// `Timeout`.
pub fn download_firmware(
    platform: &Platform,
    config: &OtaConfig,
    report: &mut dyn FnMut(u32, u32),
) -> Result<(), OtaError> {
    let addr = resolve_with_retry(
        platform.resolver.as_ref(),
        &config.host,
        &RetryPolicy::from_config(config),
    )?;
    let dotted = address::dotted(addr);

    let (sender, waiter) = completion_signal();
    platform
        .downloader
        .set_completion_handler(Box::new(move |outcome| {
            if !sender.complete(outcome) {
                debug!("Late or duplicate completion ignored");
            }
        }))
        .map_err(|e| OtaError::HttpRequest(format!("completion handler: {e:#}")))?;

    let request = DownloadRequest {
        endpoint: Endpoint {
            address: &dotted,
            port: config.port,
            host: &config.host,
            resource: &config.firmware_resource,
            flags: config.transport_flags,
        },
        trust_slot: config.credential_slot,
        extended_header: config.extended_header.as_deref(),
        username: config.username.as_deref(),
        password: config.password.as_deref(),
    };

    info!(
        "Starting download of {}://{}:{}/{} via {}",
        config.scheme(),
        config.host,
        config.port,
        config.firmware_resource,
        dotted
    );

    if let Err(e) = platform.downloader.begin(&request) {
        log_start_failure(&e);
        return Err(OtaError::HttpRequest(format!("download start: {e:#}")));
    }

    await_completion(&waiter, &WaitTiming::from_config(config), report)
}

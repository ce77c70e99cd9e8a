//! Scripted in-memory platform.
//!
//! Every capability records how it was driven so tests can assert on
//! attempt counts, and can be told to fail in the ways the real transport
//! does. The host firmware build runs on top of this as well.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::certs::TrustAnchorId;
use crate::config::OtaConfig;
use crate::platform::{
    Clock, CompletionHandler, Connectivity, DownloadRequest, Downloader, Endpoint, Installer,
    Platform, Resolver, StoreError, TransferOutcome, TransportCode, TrustAnchorSource, TrustStore,
    VersionSource,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Config with millisecond-scale waits so scenarios finish quickly
pub fn quick_config() -> OtaConfig {
    OtaConfig {
        host: "firmware.sim.local".to_string(),
        dns_attempts: 3,
        dns_timeout_ms: 50,
        dns_backoff_ms: 5,
        download_timeout_ms: 400,
        progress_interval_ms: 40,
        progress_log_interval_ms: 100,
        settle_delay_ms: 10,
        stop_grace_ms: 500,
        task_stack_size: 256 * 1024,
        ..OtaConfig::default()
    }
}

pub struct SimNetwork {
    connected: AtomicBool,
}

impl SimNetwork {
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Connectivity for SimNetwork {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub struct SimResolver {
    address: Mutex<Ipv4Addr>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
    delay: Mutex<Duration>,
}

impl SimResolver {
    pub fn set_address(&self, address: Ipv4Addr) {
        *lock(&self.address) = address;
    }

    /// Fail the next `count` lookups
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Make every lookup take this long, capped at the caller's timeout
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn fail_always(&self) {
        self.fail_next(u32::MAX);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }
}

impl Resolver for SimResolver {
    fn resolve(&self, host: &str, timeout: Duration) -> Result<Ipv4Addr> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            thread::sleep(delay.min(timeout));
            if delay > timeout {
                bail!("DNS query for {host} timed out");
            }
        }

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            }
            bail!("DNS query for {host} timed out");
        }

        Ok(*lock(&self.address))
    }
}

/// Fetch target as seen by a sim transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEndpoint {
    pub address: String,
    pub port: u16,
    pub host: String,
    pub resource: String,
}

impl From<&Endpoint<'_>> for RecordedEndpoint {
    fn from(endpoint: &Endpoint<'_>) -> Self {
        Self {
            address: endpoint.address.to_string(),
            port: endpoint.port,
            host: endpoint.host.to_string(),
            resource: endpoint.resource.to_string(),
        }
    }
}

pub struct SimVersionSource {
    body: Mutex<Result<String, String>>,
    fetches: AtomicU32,
    last_endpoint: Mutex<Option<RecordedEndpoint>>,
}

impl SimVersionSource {
    /// Serve `body` as the version file
    pub fn serve(&self, body: &str) {
        *lock(&self.body) = Ok(body.to_string());
    }

    pub fn fail_with(&self, reason: &str) {
        *lock(&self.body) = Err(reason.to_string());
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn last_endpoint(&self) -> Option<RecordedEndpoint> {
        lock(&self.last_endpoint).clone()
    }
}

impl VersionSource for SimVersionSource {
    fn fetch(&self, endpoint: &Endpoint<'_>) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_endpoint) = Some(endpoint.into());
        lock(&self.body).clone().map_err(|reason| anyhow!(reason))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadScript {
    /// Signal success from a transport thread after the delay
    Succeed { after: Duration },
    /// Signal failure from a transport thread after the delay
    Fail { after: Duration, reason: String },
    /// Refuse to start with the given transport status
    RejectStart(u32),
    /// Start, then never signal
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDownload {
    pub endpoint: RecordedEndpoint,
    pub trust_slot: u8,
    pub flags: u32,
    pub username: Option<String>,
}

type SharedHandler = Arc<dyn Fn(TransferOutcome) + Send + Sync>;

pub struct SimDownloader {
    script: Mutex<DownloadScript>,
    handler: Mutex<Option<SharedHandler>>,
    begins: AtomicU32,
    last_request: Mutex<Option<RecordedDownload>>,
}

impl SimDownloader {
    pub fn script(&self, script: DownloadScript) {
        *lock(&self.script) = script;
    }

    pub fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<RecordedDownload> {
        lock(&self.last_request).clone()
    }
}

impl Downloader for SimDownloader {
    fn set_completion_handler(&self, handler: CompletionHandler) -> Result<()> {
        *lock(&self.handler) = Some(Arc::from(handler));
        Ok(())
    }

    fn begin(&self, request: &DownloadRequest<'_>) -> Result<()> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_request) = Some(RecordedDownload {
            endpoint: (&request.endpoint).into(),
            trust_slot: request.trust_slot,
            flags: request.endpoint.flags,
            username: request.username.map(str::to_string),
        });

        let handler = lock(&self.handler)
            .clone()
            .ok_or_else(|| anyhow!("no completion handler registered"))?;

        let outcome = match lock(&self.script).clone() {
            DownloadScript::RejectStart(code) => {
                return Err(anyhow::Error::new(TransportCode(code)).context("HTTP OTAF start failed"));
            }
            DownloadScript::Hang => return Ok(()),
            DownloadScript::Succeed { after } => (after, TransferOutcome::Success),
            DownloadScript::Fail { after, reason } => (after, TransferOutcome::Failed(reason)),
        };

        thread::Builder::new()
            .name("sim_transport".into())
            .spawn(move || {
                let (after, outcome) = outcome;
                thread::sleep(after);
                (*handler)(outcome);
            })?;

        Ok(())
    }
}

pub struct SimTrustStore {
    slots: Mutex<Vec<(u8, Vec<u8>)>>,
    reject_set: Mutex<Option<StoreError>>,
    delete_error: Mutex<Option<StoreError>>,
    sets: AtomicU32,
}

impl SimTrustStore {
    pub fn slot(&self, slot: u8) -> Option<Vec<u8>> {
        lock(&self.slots)
            .iter()
            .find(|(index, _)| *index == slot)
            .map(|(_, material)| material.clone())
    }

    /// Preload a slot as if an earlier boot had installed it
    pub fn preload(&self, slot: u8, material: &[u8]) {
        let mut slots = lock(&self.slots);
        slots.retain(|(index, _)| *index != slot);
        slots.push((slot, material.to_vec()));
    }

    pub fn reject_sets_with(&self, error: Option<StoreError>) {
        *lock(&self.reject_set) = error;
    }

    pub fn fail_deletes_with(&self, error: Option<StoreError>) {
        *lock(&self.delete_error) = error;
    }

    pub fn sets(&self) -> u32 {
        self.sets.load(Ordering::SeqCst)
    }
}

impl TrustStore for SimTrustStore {
    fn delete(&self, slot: u8) -> Result<(), StoreError> {
        if let Some(error) = lock(&self.delete_error).clone() {
            return Err(error);
        }
        let mut slots = lock(&self.slots);
        let before = slots.len();
        slots.retain(|(index, _)| *index != slot);
        if slots.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn set(&self, slot: u8, material: &[u8]) -> Result<(), StoreError> {
        if let Some(error) = lock(&self.reject_set).clone() {
            return Err(error);
        }
        self.sets.fetch_add(1, Ordering::SeqCst);
        let mut slots = lock(&self.slots);
        slots.retain(|(index, _)| *index != slot);
        slots.push((slot, material.to_vec()));
        Ok(())
    }
}

pub struct SimAnchors {
    anchors: Vec<(TrustAnchorId, Vec<u8>)>,
}

impl SimAnchors {
    pub fn empty() -> Self {
        Self { anchors: Vec::new() }
    }

    pub fn with(mut self, id: TrustAnchorId, material: &[u8]) -> Self {
        self.anchors.retain(|(known, _)| *known != id);
        self.anchors.push((id, material.to_vec()));
        self
    }

    /// Placeholder PEM blocks for both known anchors
    pub fn placeholders() -> Self {
        Self::empty()
            .with(
                TrustAnchorId::StarfieldServicesRootCa,
                b"-----BEGIN CERTIFICATE-----\nU0lNIFNUQVJGSUVMRA==\n-----END CERTIFICATE-----\n",
            )
            .with(
                TrustAnchorId::AmazonRootCa1,
                b"-----BEGIN CERTIFICATE-----\nU0lNIEFNQVpPTg==\n-----END CERTIFICATE-----\n",
            )
    }
}

impl TrustAnchorSource for SimAnchors {
    fn material(&self, id: TrustAnchorId) -> Option<&[u8]> {
        self.anchors
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, material)| material.as_slice())
    }
}

pub struct SimInstaller {
    failure: Mutex<Option<String>>,
    finishes: AtomicU32,
}

impl SimInstaller {
    pub fn fail_with(&self, reason: Option<&str>) {
        *lock(&self.failure) = reason.map(str::to_string);
    }

    pub fn finishes(&self) -> u32 {
        self.finishes.load(Ordering::SeqCst)
    }
}

impl Installer for SimInstaller {
    fn finish(&self, settle: Duration) -> Result<()> {
        self.finishes.fetch_add(1, Ordering::SeqCst);
        thread::sleep(settle);
        match lock(&self.failure).clone() {
            Some(reason) => Err(anyhow!(reason)),
            None => Ok(()),
        }
    }
}

/// Clock that only moves when told to
pub struct FakeClock {
    now: AtomicU64,
}

impl FakeClock {
    pub fn set(&self, secs: u64) {
        self.now.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Handles to every sim capability, kept by the test for assertions
#[derive(Clone)]
pub struct SimPlatform {
    pub network: Arc<SimNetwork>,
    pub resolver: Arc<SimResolver>,
    pub version_source: Arc<SimVersionSource>,
    pub downloader: Arc<SimDownloader>,
    pub trust_store: Arc<SimTrustStore>,
    pub anchors: Arc<SimAnchors>,
    pub installer: Arc<SimInstaller>,
    pub clock: Arc<FakeClock>,
}

impl SimPlatform {
    /// Connected, resolving to 52.219.100.5, serving version 1.1.0, with
    /// downloads that succeed after 20 ms
    pub fn new() -> Self {
        Self::with_anchors(SimAnchors::placeholders())
    }

    pub fn with_anchors(anchors: SimAnchors) -> Self {
        Self {
            network: Arc::new(SimNetwork {
                connected: AtomicBool::new(true),
            }),
            resolver: Arc::new(SimResolver {
                address: Mutex::new(Ipv4Addr::new(52, 219, 100, 5)),
                failures_remaining: AtomicU32::new(0),
                attempts: AtomicU32::new(0),
                delay: Mutex::new(Duration::ZERO),
            }),
            version_source: Arc::new(SimVersionSource {
                body: Mutex::new(Ok("1.1.0\r\n".to_string())),
                fetches: AtomicU32::new(0),
                last_endpoint: Mutex::new(None),
            }),
            downloader: Arc::new(SimDownloader {
                script: Mutex::new(DownloadScript::Succeed {
                    after: Duration::from_millis(20),
                }),
                handler: Mutex::new(None),
                begins: AtomicU32::new(0),
                last_request: Mutex::new(None),
            }),
            trust_store: Arc::new(SimTrustStore {
                slots: Mutex::new(Vec::new()),
                reject_set: Mutex::new(None),
                delete_error: Mutex::new(None),
                sets: AtomicU32::new(0),
            }),
            anchors: Arc::new(anchors),
            installer: Arc::new(SimInstaller {
                failure: Mutex::new(None),
                finishes: AtomicU32::new(0),
            }),
            clock: Arc::new(FakeClock {
                now: AtomicU64::new(0),
            }),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform {
            connectivity: self.network.clone(),
            resolver: self.resolver.clone(),
            version_source: self.version_source.clone(),
            downloader: self.downloader.clone(),
            trust_store: self.trust_store.clone(),
            anchors: self.anchors.clone(),
            installer: self.installer.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

//! Capabilities the OTA manager drives but does not implement.
//!
//! The device build backs these with ESP-IDF services; host builds and tests
//! use the scripted implementations in [`crate::sim`].

use core::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::certs::TrustAnchorId;

/// Link-level connectivity (WiFi associated and addressed)
pub trait Connectivity: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// One hostname lookup, bounded by `timeout`. Retries are the caller's job.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str, timeout: Duration) -> Result<Ipv4Addr>;
}

/// Where a plain fetch should go
#[derive(Debug, Clone, Copy)]
pub struct Endpoint<'a> {
    /// Resolved address in dotted form
    pub address: &'a str,
    pub port: u16,
    /// Virtual host sent with the request
    pub host: &'a str,
    pub resource: &'a str,
    pub flags: u32,
}

/// Fetches the version token as text
pub trait VersionSource: Send + Sync {
    fn fetch(&self, endpoint: &Endpoint<'_>) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    Failed(String),
}

/// Numeric status code from the vendor transport, attached to start errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCode(pub u32);

impl TransportCode {
    /// SSL/TLS server certificate verification failed
    pub const TLS_VERIFY_FAILED: TransportCode = TransportCode(0x1_BB49);
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport status 0x{:x}", self.0)
    }
}

impl std::error::Error for TransportCode {}

/// Raised by the transport from its own execution context when the transfer ends.
pub type CompletionHandler = Box<dyn Fn(TransferOutcome) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest<'a> {
    pub endpoint: Endpoint<'a>,
    pub trust_slot: u8,
    pub extended_header: Option<&'a str>,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
}

/// Binary transfer of the firmware image. Reports completion only through
/// the registered handler; no byte counts are available.
pub trait Downloader: Send + Sync {
    fn set_completion_handler(&self, handler: CompletionHandler) -> Result<()>;

    /// Start the transfer. An error here means it never started.
    fn begin(&self, request: &DownloadRequest<'_>) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    InvalidParameter,
    Allocation,
    InvalidCredentials,
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::InvalidParameter => write!(f, "invalid certificate parameter or format"),
            Self::Allocation => write!(f, "failed to allocate memory for certificate"),
            Self::InvalidCredentials => write!(f, "certificate format is invalid"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Credential slots for TLS server verification
pub trait TrustStore: Send + Sync {
    fn delete(&self, slot: u8) -> Result<(), StoreError>;
    fn set(&self, slot: u8, material: &[u8]) -> Result<(), StoreError>;
}

/// Certificate bytes for each known trust anchor
pub trait TrustAnchorSource: Send + Sync {
    fn material(&self, id: TrustAnchorId) -> Option<&[u8]>;
}

/// Stands in for the flash-write/activate step after a completed transfer
pub trait Installer: Send + Sync {
    fn finish(&self, settle: Duration) -> Result<()>;
}

/// Seconds since boot, used for the check interval
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

pub struct MonotonicClock {
    boot: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { boot: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_secs(&self) -> u64 {
        self.boot.elapsed().as_secs()
    }
}

/// Waits out the settle delay; used where the transport already wrote flash
pub struct SettleInstaller;

impl Installer for SettleInstaller {
    fn finish(&self, settle: Duration) -> Result<()> {
        log::info!("Waiting {} ms for installation to settle", settle.as_millis());
        std::thread::sleep(settle);
        Ok(())
    }
}

/// Everything the manager needs from the outside world
#[derive(Clone)]
pub struct Platform {
    pub connectivity: Arc<dyn Connectivity>,
    pub resolver: Arc<dyn Resolver>,
    pub version_source: Arc<dyn VersionSource>,
    pub downloader: Arc<dyn Downloader>,
    pub trust_store: Arc<dyn TrustStore>,
    pub anchors: Arc<dyn TrustAnchorSource>,
    pub installer: Arc<dyn Installer>,
    pub clock: Arc<dyn Clock>,
}

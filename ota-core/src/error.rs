use core::fmt;

use crate::platform::StoreError;
use crate::state::LastError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    /// No connectivity when the operation started
    Network,
    /// Every resolution attempt failed
    DnsResolve { host: String, attempts: u32 },
    /// Version fetch failed, or the transport refused to start a transfer
    HttpRequest(String),
    /// Version token was empty, too long or not a version
    VersionParse(String),
    /// Transport reported failure after the transfer started
    DownloadFailed(String),
    InstallFailed(String),
    /// No completion signal within the overall download timeout
    Timeout { waited_ms: u64 },
    Allocation(&'static str),
    Credentials(CredentialError),
    InvalidConfig(String),
    /// Start requested with no pending update
    NotAvailable,
    AlreadyExists,
    NotInitialized,
    /// Another check or download is already in flight
    Busy,
}

impl OtaError {
    /// Error kind persisted in the manager state when this failure ends an
    /// attempt. Setup and lifecycle errors leave the state alone.
    pub fn last_error(&self) -> Option<LastError> {
        match self {
            OtaError::Network => Some(LastError::Network),
            OtaError::DnsResolve { .. } => Some(LastError::DnsResolve),
            OtaError::HttpRequest(_) => Some(LastError::HttpRequest),
            OtaError::VersionParse(_) => Some(LastError::VersionParse),
            OtaError::DownloadFailed(_) => Some(LastError::DownloadFailed),
            OtaError::InstallFailed(_) => Some(LastError::InstallFailed),
            OtaError::Timeout { .. } => Some(LastError::Timeout),
            OtaError::Allocation(_)
            | OtaError::Credentials(_)
            | OtaError::InvalidConfig(_)
            | OtaError::NotAvailable
            | OtaError::AlreadyExists
            | OtaError::NotInitialized
            | OtaError::Busy => None,
        }
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network not connected"),
            Self::DnsResolve { host, attempts } => {
                write!(f, "failed to resolve {host} after {attempts} attempts")
            }
            Self::HttpRequest(msg) => write!(f, "HTTP request failed: {msg}"),
            Self::VersionParse(msg) => write!(f, "invalid version: {msg}"),
            Self::DownloadFailed(msg) => write!(f, "firmware download failed: {msg}"),
            Self::InstallFailed(msg) => write!(f, "firmware install failed: {msg}"),
            Self::Timeout { waited_ms } => {
                write!(f, "no download completion after {} seconds", waited_ms / 1000)
            }
            Self::Allocation(what) => write!(f, "failed to allocate {what}"),
            Self::Credentials(e) => write!(f, "credential error: {e}"),
            Self::InvalidConfig(msg) => write!(f, "invalid OTA configuration: {msg}"),
            Self::NotAvailable => write!(f, "no update available"),
            Self::AlreadyExists => write!(f, "OTA task already running"),
            Self::NotInitialized => write!(f, "OTA task is not running"),
            Self::Busy => write!(f, "another OTA operation is in progress"),
        }
    }
}

impl std::error::Error for OtaError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Trust anchor source has no material for the selected anchor
    EmptyMaterial(&'static str),
    /// Trust store refused the certificate
    Rejected(StoreError),
    Allocation,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMaterial(label) => write!(f, "certificate '{label}' is empty"),
            Self::Rejected(e) => write!(f, "trust store rejected certificate: {e}"),
            Self::Allocation => write!(f, "no memory for certificate"),
        }
    }
}

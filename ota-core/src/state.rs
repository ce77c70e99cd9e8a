// OTA manager state shared between the background task and callers

use core::fmt;

use crate::error::OtaError;

/// Longest version string the manager stores
pub const MAX_VERSION_LEN: usize = 31;

pub type VersionString = heapless::String<MAX_VERSION_LEN>;

pub(crate) fn version_string(text: &str) -> Option<VersionString> {
    let mut version = VersionString::new();
    version.push_str(text).ok()?;
    Some(version)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OtaState {
    #[default]
    Idle,
    CheckingVersion,
    Downloading,
    Installing,
    Complete,
    Error,
}

impl OtaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtaState::Idle => "IDLE",
            OtaState::CheckingVersion => "CHECKING_VERSION",
            OtaState::Downloading => "DOWNLOADING",
            OtaState::Installing => "INSTALLING",
            OtaState::Complete => "COMPLETE",
            OtaState::Error => "ERROR",
        }
    }

    /// Longer text for the status command
    pub fn description(&self) -> &'static str {
        match self {
            OtaState::Idle => "IDLE - Ready for operations",
            OtaState::CheckingVersion => "CHECKING_VERSION - Checking for updates",
            OtaState::Downloading => "DOWNLOADING - Downloading firmware",
            OtaState::Installing => "INSTALLING - Installing firmware",
            OtaState::Complete => "COMPLETE - Update completed",
            OtaState::Error => "ERROR - Error occurred",
        }
    }
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error kind recorded alongside the state on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastError {
    #[default]
    None,
    Network,
    DnsResolve,
    HttpRequest,
    VersionParse,
    DownloadFailed,
    InstallFailed,
    Timeout,
}

impl LastError {
    pub fn as_str(&self) -> &'static str {
        match self {
            LastError::None => "NONE",
            LastError::Network => "NETWORK",
            LastError::DnsResolve => "DNS_RESOLVE",
            LastError::HttpRequest => "HTTP_REQUEST",
            LastError::VersionParse => "VERSION_PARSE",
            LastError::DownloadFailed => "DOWNLOAD_FAILED",
            LastError::InstallFailed => "INSTALL_FAILED",
            LastError::Timeout => "TIMEOUT",
        }
    }

    pub fn is_error(&self) -> bool {
        *self != LastError::None
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerState {
    pub current_state: OtaState,
    pub last_error: LastError,
    pub current_version: VersionString,
    pub latest_version: VersionString,
    pub last_check_time_secs: u64,
    pub download_progress: u32,
    pub total_size: u32,
    pub auto_check_enabled: bool,
    pub update_available: bool,
}

impl ManagerState {
    pub fn new(current_version: &str) -> Result<Self, OtaError> {
        let current_version =
            version_string(current_version).ok_or(OtaError::Allocation("current version buffer"))?;

        Ok(Self {
            current_state: OtaState::Idle,
            last_error: LastError::None,
            current_version,
            latest_version: VersionString::new(),
            last_check_time_secs: 0,
            download_progress: 0,
            total_size: 0,
            auto_check_enabled: true,
            update_available: false,
        })
    }

    /// Move to a new state. The pending-update flag only survives in IDLE.
    pub(crate) fn transition(&mut self, state: OtaState, error: LastError) {
        self.current_state = state;
        self.last_error = error;
        if state != OtaState::Idle {
            self.update_available = false;
        }
    }
}

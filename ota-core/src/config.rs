/// OTA configuration that can be tested independently of the device
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::certs::TrustAnchorId;
use crate::state::MAX_VERSION_LEN;

/// Transport flag bits handed to the download transport
pub mod flags {
    pub const HTTPS: u32 = 1 << 0;
    pub const IPV6: u32 = 1 << 3;
    pub const POST_DATA: u32 = 1 << 5;
    pub const HTTP_1_1: u32 = 1 << 6;
    pub const USER_DEFINED_CONTENT_TYPE: u32 = 1 << 7;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtaConfig {
    // Remote distribution endpoint
    pub host: String,
    pub version_resource: String,
    pub firmware_resource: String,
    pub port: u16,
    pub transport_flags: u32,
    pub extended_header: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,

    // Name resolution
    pub dns_timeout_ms: u64,
    pub dns_attempts: u32,
    pub dns_backoff_ms: u64,

    // Download
    pub download_timeout_ms: u64,
    pub progress_interval_ms: u64,
    pub progress_log_interval_ms: u64,
    pub settle_delay_ms: u64,

    // Trust anchor
    pub credential_slot: u8,
    pub trust_anchor: TrustAnchorId,

    // Scheduling
    pub check_interval_secs: u64,
    pub stop_grace_ms: u64,
    pub task_stack_size: usize,

    // Build value, overridden by the firmware at startup
    pub current_version: String,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            host: "cat-firmware-bucket-001.s3.us-east-2.amazonaws.com".to_string(),
            version_resource: "firmware/version.txt".to_string(),
            firmware_resource: "firmware/yq-catcollar-mainboard.bin".to_string(),
            port: 443,
            transport_flags: flags::HTTPS,
            extended_header: None,
            username: None,
            password: None,
            dns_timeout_ms: 20_000,
            dns_attempts: 5,
            dns_backoff_ms: 2_000,
            download_timeout_ms: 600_000,
            progress_interval_ms: 5_000,
            progress_log_interval_ms: 10_000,
            settle_delay_ms: 5_000,
            credential_slot: 0,
            trust_anchor: TrustAnchorId::default(),
            check_interval_secs: 3_600,
            stop_grace_ms: 1_000,
            task_stack_size: 16_384,
            current_version: "1.0.0".to_string(),
        }
    }
}

impl OtaConfig {
    /// Reject values that would make the pipeline spin or never finish
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty".into());
        }
        if self.version_resource.is_empty() || self.firmware_resource.is_empty() {
            return Err("resource paths must not be empty".into());
        }
        if self.dns_attempts == 0 {
            return Err("dns_attempts must be at least 1".into());
        }
        if self.dns_timeout_ms == 0 || self.download_timeout_ms == 0 {
            return Err("timeouts must be non-zero".into());
        }
        if self.progress_interval_ms == 0 || self.progress_log_interval_ms == 0 {
            return Err("progress intervals must be non-zero".into());
        }
        if self.check_interval_secs == 0 {
            return Err("check_interval_secs must be non-zero".into());
        }
        if self.current_version.len() > MAX_VERSION_LEN {
            return Err(format!(
                "current_version '{}' exceeds {} bytes",
                self.current_version, MAX_VERSION_LEN
            ));
        }
        Ok(())
    }

    pub fn https(&self) -> bool {
        self.transport_flags & flags::HTTPS != 0
    }

    pub fn scheme(&self) -> &'static str {
        if self.https() {
            "https"
        } else {
            "http"
        }
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub fn dns_backoff(&self) -> Duration {
        Duration::from_millis(self.dns_backoff_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn progress_log_interval(&self) -> Duration {
        Duration::from_millis(self.progress_log_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

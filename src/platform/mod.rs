//! Device capabilities behind the OTA manager.
//!
//! The ESP-IDF build talks to WiFi, lwIP, the HTTP client and the OTA
//! partitions; the host build runs the same firmware on the simulated
//! platform from `ota-core`.

#[cfg(target_os = "espidf")]
mod esp;
#[cfg(target_os = "espidf")]
pub use esp::{restart, Board};

#[cfg(not(target_os = "espidf"))]
mod host;
#[cfg(not(target_os = "espidf"))]
pub use host::{restart, Board};

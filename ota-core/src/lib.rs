//! OTA Core - Hardware-independent firmware update logic
//!
//! The update state machine, version comparison, network acquisition
//! pipeline, certificate selection and background scheduler. Everything the
//! device provides is reached through the traits in [`platform`], so the
//! whole crate runs and is tested on the host.

pub mod address;
pub mod certs;
pub mod commands;
pub mod config;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod platform;
pub mod scheduler;
pub mod state;
pub mod version;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use config::OtaConfig;
pub use error::{CredentialError, OtaError};
pub use manager::{CheckOutcome, OtaManager, ProgressObserver, StateObserver};
pub use state::{LastError, ManagerState, OtaState};
pub use version::{compare, VersionOrdering};

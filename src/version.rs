// Centralized version information

// Firmware version the OTA manager compares against the published one.
// Set from CURRENT_FIRMWARE_VERSION at build time, else the Cargo version.
pub const CURRENT_VERSION: &str = env!("OTA_CURRENT_VERSION");

// Cargo package version from Cargo.toml
pub const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

// Version info string for logging
pub fn version_info() -> String {
    if CURRENT_VERSION == CARGO_VERSION {
        format!("Firmware: {}", CURRENT_VERSION)
    } else {
        format!("Firmware: {}, Cargo: {}", CURRENT_VERSION, CARGO_VERSION)
    }
}

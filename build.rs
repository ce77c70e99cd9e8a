use std::env;

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF; host builds run against the simulated platform
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();

        // Add crash log helper for better panic diagnostics
        println!("cargo:rustc-link-arg=-Wl,--undefined=esp_backtrace_print_app_description");
    }

    // Version the OTA manager compares against the published one
    println!("cargo:rerun-if-env-changed=CURRENT_FIRMWARE_VERSION");
    let version = match env::var("CURRENT_FIRMWARE_VERSION") {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => env::var("CARGO_PKG_VERSION")?,
    };
    if version.len() > 31 {
        println!("cargo:warning=CURRENT_FIRMWARE_VERSION '{}' is longer than 31 bytes", version);
    }
    println!("cargo:rustc-env=OTA_CURRENT_VERSION={}", version);

    Ok(())
}

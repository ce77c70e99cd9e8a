use anyhow::Result;
use log::{error, info, LevelFilter};
use std::io::{self, BufRead, Write};

use ota_core::{commands, OtaManager};

#[cfg(target_os = "espidf")]
use esp_idf_sys as _; // Binstart

// Generate ESP-IDF app descriptor
#[cfg(target_os = "espidf")]
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod logging;
mod observers;
mod platform;
mod version;

use crate::observers::{ProgressLogger, StateLogger};

fn main() -> Result<()> {
    let level = std::env::var("OTA_LOG_LEVEL")
        .ok()
        .and_then(|level| logging::parse_level(&level))
        .unwrap_or(LevelFilter::Info);
    logging::init_logger(level).map_err(|e| anyhow::anyhow!("Failed to initialize logger: {e}"))?;

    info!("OTA firmware starting - {}", version::version_info());

    let mut board = platform::Board::take()?;
    let mut store = board.config_store()?;
    let config = config::load_or_default(&mut store);
    info!(
        "Update source: {}://{}/{} (every {} s)",
        config.scheme(),
        config.host,
        config.firmware_resource,
        config.check_interval_secs
    );

    let platform = board.start(&config)?;
    let manager = OtaManager::new(config, platform)?;

    // The device reboots into the new image as soon as an update completes
    let restart_on_complete = cfg!(target_os = "espidf");
    if let Err(e) = manager.bring_up(ProgressLogger::new(), StateLogger::new(restart_on_complete)) {
        error!("Failed to initialize OTA system: {}", e);
        return Err(e.into());
    }
    info!("Current firmware version: {}", manager.current_version());

    run_console(&manager)?;

    // Serial console closed; keep the background checks running
    #[cfg(target_os = "espidf")]
    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }

    #[cfg(not(target_os = "espidf"))]
    {
        manager.stop_task()?;
        info!("OTA firmware stopped");
        Ok(())
    }
}

/// Read commands line by line until the input closes or `quit` is entered
fn run_console(manager: &OtaManager) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    print!("ota> ");
    stdout.flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();

        match line {
            "" => {}
            "quit" | "exit" => break,
            _ => {
                if let Some(level) = line.strip_prefix("log ") {
                    if logging::set_max_level_from_str(level) {
                        println!("Log level set to {}", level.trim());
                    } else {
                        println!("Unknown log level '{}'", level.trim());
                    }
                } else {
                    print!("{}", commands::execute(manager, line));
                }
            }
        }

        print!("ota> ");
        stdout.flush()?;
    }
    Ok(())
}

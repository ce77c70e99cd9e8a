//! Text commands for a shell or serial console.

use core::fmt::Write;

use crate::error::OtaError;
use crate::manager::{CheckOutcome, OtaManager};
use crate::state::{LastError, OtaState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Check,
    Update,
    Status,
    TestConnection,
    AutoCheck(bool),
    Help,
}

impl Command {
    /// Parse one command line. The `ota_` prefix is optional.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let name = words.next()?;
        let name = name.strip_prefix("ota_").unwrap_or(name);

        let command = match name {
            "check" => Command::Check,
            "update" => Command::Update,
            "status" => Command::Status,
            "test" => Command::TestConnection,
            "help" => Command::Help,
            "auto" => match words.next()? {
                "on" => Command::AutoCheck(true),
                "off" => Command::AutoCheck(false),
                _ => return None,
            },
            _ => return None,
        };

        if words.next().is_some() {
            return None;
        }
        Some(command)
    }
}

const HELP: &str = "Commands:\n\
    \x20 check        check for a firmware update now\n\
    \x20 update       download and install the pending update\n\
    \x20 status       show OTA state\n\
    \x20 test         resolve the update server\n\
    \x20 auto on|off  enable or disable periodic checks\n";

/// Run one command line against the manager and return its output.
pub fn execute(manager: &OtaManager, line: &str) -> String {
    match Command::parse(line) {
        Some(command) => run(manager, command),
        None => format!("Unknown command '{}'\n{}", line.trim(), HELP),
    }
}

pub fn run(manager: &OtaManager, command: Command) -> String {
    match command {
        Command::Check => check(manager),
        Command::Update => update(manager),
        Command::Status => status(manager),
        Command::TestConnection => match manager.test_connection() {
            Ok(addr) => format!("{} resolves to {}\n", manager.config().host, addr),
            Err(e) => format!("Connection test failed: {}\n", e),
        },
        Command::AutoCheck(enabled) => {
            manager.set_auto_check(enabled);
            format!("Auto check {}\n", if enabled { "enabled" } else { "disabled" })
        }
        Command::Help => HELP.to_string(),
    }
}

fn check(manager: &OtaManager) -> String {
    match manager.force_check() {
        Ok(CheckOutcome::UpdateAvailable(latest)) => format!(
            "New firmware version available: {}\nCurrent version: {}\nUse 'update' to start the update\n",
            latest,
            manager.current_version()
        ),
        Ok(_) => "Firmware is up to date\n".to_string(),
        Err(e) => format!("Failed to check for updates: {}\n", e),
    }
}

fn update(manager: &OtaManager) -> String {
    if !manager.is_update_available() {
        return "No firmware update available. Check for updates first.\n".to_string();
    }

    let from = manager.current_version();
    let to = manager.latest_version();
    match manager.start_update() {
        Ok(()) => format!("Updated from {} to {}, restart to run it\n", from, to),
        Err(OtaError::NotAvailable) => {
            "No firmware update available. Check for updates first.\n".to_string()
        }
        Err(e) => format!("Firmware update from {} to {} failed: {}\n", from, to, e),
    }
}

pub fn status(manager: &OtaManager) -> String {
    let state = manager.snapshot();
    let mut out = String::new();

    let _ = writeln!(out, "=== OTA Status ===");
    let _ = writeln!(out, "Current State: {}", state.current_state.description());
    let _ = writeln!(out, "Current Version: {}", state.current_version);
    let _ = writeln!(out, "Latest Version: {}", state.latest_version);
    let _ = writeln!(
        out,
        "Update Available: {}",
        if state.update_available { "Yes" } else { "No" }
    );
    if state.last_error != LastError::None {
        let _ = writeln!(out, "Last Error: {}", state.last_error);
    }
    if state.current_state == OtaState::Downloading {
        let percent = if state.total_size > 0 {
            state.download_progress * 100 / state.total_size
        } else {
            0
        };
        let _ = writeln!(
            out,
            "Download Progress: {}/{} ({}%)",
            state.download_progress, state.total_size, percent
        );
    }
    let _ = writeln!(out, "==================");
    out
}

use std::time::Duration;

use ota_core::commands::{execute, status};
use ota_core::sim::DownloadScript;
use ota_core::OtaState;

use crate::{setup, wait_until};

#[test]
fn test_check_update_status_flow() {
    let (sim, ota) = setup();
    sim.version_source.serve("1.4.2");

    let out = execute(&ota, "check");
    assert!(out.contains("New firmware version available: 1.4.2"));
    assert!(out.contains("Current version: 1.0.0"));

    let out = execute(&ota, "status");
    assert!(out.contains("Current State: IDLE - Ready for operations"));
    assert!(out.contains("Latest Version: 1.4.2"));
    assert!(out.contains("Update Available: Yes"));
    assert!(!out.contains("Last Error"));

    let out = execute(&ota, "update");
    assert!(out.contains("Updated from 1.0.0 to 1.4.2"));
}

#[test]
fn test_status_shows_progress_while_downloading() {
    let (sim, ota) = setup();
    sim.downloader.script(DownloadScript::Succeed {
        after: Duration::from_millis(300),
    });
    ota.check_for_updates().unwrap();

    let worker = ota.clone();
    let update = std::thread::spawn(move || worker.start_update());
    assert!(wait_until(|| ota.current_state() == OtaState::Downloading));

    let out = status(&ota);
    assert!(out.contains("DOWNLOADING - Downloading firmware"));
    assert!(out.contains("Download Progress: "));
    assert!(out.contains("/100 ("));

    assert_eq!(update.join().unwrap(), Ok(()));
}

#[test]
fn test_up_to_date_check() {
    let (sim, ota) = setup();
    sim.version_source.serve("1.0.0");
    assert_eq!(execute(&ota, "ota_check"), "Firmware is up to date\n");
}

#[test]
fn test_failed_check_reports_error() {
    let (sim, ota) = setup();
    sim.resolver.fail_always();

    let out = execute(&ota, "check");
    assert!(out.starts_with("Failed to check for updates: failed to resolve"));
    assert!(execute(&ota, "status").contains("Last Error: DNS_RESOLVE"));
}

#[test]
fn test_auto_and_test_commands() {
    let (_sim, ota) = setup();

    assert_eq!(execute(&ota, "auto off"), "Auto check disabled\n");
    assert!(!ota.auto_check_enabled());
    assert!(execute(&ota, "test").contains("resolves to 52.219.100.5"));
}

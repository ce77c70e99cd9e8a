use ota_core::sim::quick_config;
use ota_core::{CheckOutcome, LastError, OtaConfig, OtaError, OtaState};

use crate::{setup, setup_with, Recorder};

#[test]
fn test_newer_remote_is_offered() {
    let (sim, ota) = setup();
    sim.version_source.serve("2.0.0");

    assert!(matches!(ota.check_for_updates(), Ok(CheckOutcome::UpdateAvailable(_))));
    assert_eq!(ota.current_state(), OtaState::Idle);
    assert_eq!(ota.last_error(), LastError::None);
    assert!(ota.is_update_available());
    assert_eq!(ota.latest_version().as_str(), "2.0.0");
}

#[test]
fn test_dns_exhaustion_counts_every_attempt() {
    let config = OtaConfig {
        dns_attempts: 4,
        ..quick_config()
    };
    let (sim, ota) = setup_with(config);
    sim.resolver.fail_always();

    let err = ota.check_for_updates().unwrap_err();
    assert!(matches!(err, OtaError::DnsResolve { attempts: 4, .. }));
    assert_eq!(sim.resolver.attempts(), 4);
    assert_eq!(ota.current_state(), OtaState::Error);
    assert_eq!(ota.last_error(), LastError::DnsResolve);
    assert_eq!(sim.version_source.fetches(), 0);
}

#[test]
fn test_transient_dns_failure_recovers_within_one_call() {
    let (sim, ota) = setup();
    sim.resolver.fail_next(2);

    assert!(ota.check_for_updates().is_ok());
    assert_eq!(sim.resolver.attempts(), 3);
    assert_eq!(ota.last_error(), LastError::None);
}

#[test]
fn test_error_state_recovers_on_next_check() {
    let (sim, ota) = setup();
    sim.resolver.fail_always();
    assert!(ota.check_for_updates().is_err());
    assert_eq!(ota.current_state(), OtaState::Error);

    sim.resolver.fail_next(0);
    assert!(ota.check_for_updates().is_ok());
    assert_eq!(ota.current_state(), OtaState::Idle);
    assert_eq!(ota.last_error(), LastError::None);
}

#[test]
fn test_last_check_time_rules() {
    let (sim, ota) = setup();

    // Offline: the pipeline never ran
    sim.clock.set(100);
    sim.network.set_connected(false);
    assert_eq!(ota.check_for_updates(), Err(OtaError::Network));
    assert_eq!(ota.last_check_time_secs(), 0);

    // Unparseable token: the pipeline completed
    sim.network.set_connected(true);
    sim.clock.set(200);
    sim.version_source.serve("   \r\n");
    assert!(matches!(ota.check_for_updates(), Err(OtaError::VersionParse(_))));
    assert_eq!(ota.last_check_time_secs(), 200);

    // Same version: completed, nothing to do
    sim.clock.set(300);
    sim.version_source.serve("1.0.0");
    assert_eq!(ota.check_for_updates(), Ok(CheckOutcome::UpToDate));
    assert_eq!(ota.last_check_time_secs(), 300);
}

#[test]
fn test_fetch_failure_is_http_error() {
    let (sim, ota) = setup();
    sim.version_source.fail_with("HTTP 403 from version endpoint");

    assert!(matches!(ota.check_for_updates(), Err(OtaError::HttpRequest(_))));
    assert_eq!(ota.last_error(), LastError::HttpRequest);
}

#[test]
fn test_check_transitions_are_observed() {
    let (sim, ota) = setup();
    let recorder = Recorder::default();
    recorder.attach(&ota);

    sim.version_source.serve("1.0.1");
    ota.check_for_updates().unwrap();
    sim.version_source.serve("nonsense");
    let _ = ota.check_for_updates();

    let seen = recorder.states.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (OtaState::CheckingVersion, LastError::None),
            (OtaState::Idle, LastError::None),
            (OtaState::CheckingVersion, LastError::None),
            (OtaState::Error, LastError::VersionParse),
        ]
    );
    assert!(!ota.is_update_available());
}

#[test]
fn test_force_check_ignores_interval() {
    let (sim, ota) = setup();
    sim.clock.set(10);

    ota.force_check().unwrap();
    ota.force_check().unwrap();
    assert_eq!(sim.version_source.fetches(), 2);
}

#[test]
fn test_instances_are_independent() {
    let (sim_a, ota_a) = setup();
    let (sim_b, ota_b) = setup();
    sim_a.version_source.serve("3.0.0");
    sim_b.network.set_connected(false);

    assert!(ota_a.check_for_updates().is_ok());
    assert!(ota_b.check_for_updates().is_err());
    assert!(ota_a.is_update_available());
    assert_eq!(ota_b.last_error(), LastError::Network);
    assert_eq!(ota_a.last_error(), LastError::None);
}

#[test]
fn test_connection_test_leaves_state_alone() {
    let (sim, ota) = setup();

    assert_eq!(ota.test_connection().unwrap().as_str(), "52.219.100.5");
    sim.network.set_connected(false);
    assert_eq!(ota.test_connection(), Err(OtaError::Network));
    assert_eq!(ota.current_state(), OtaState::Idle);
    assert_eq!(ota.last_error(), LastError::None);
}

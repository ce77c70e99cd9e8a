use std::thread;
use std::time::{Duration, Instant};

use ota_core::sim::quick_config;
use ota_core::{OtaConfig, OtaError, OtaState};

use crate::{setup, setup_with, wait_until, Recorder};

#[test]
fn test_periodic_path_respects_interval() {
    let (sim, ota) = setup();
    ota.start_task().unwrap();

    sim.clock.set(3_599);
    ota.wake_task().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(sim.version_source.fetches(), 0);

    sim.clock.set(3_600);
    ota.wake_task().unwrap();
    assert!(wait_until(|| sim.version_source.fetches() == 1));

    // Just checked: not due again until another interval passes
    sim.clock.set(3_700);
    ota.wake_task().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(sim.version_source.fetches(), 1);

    ota.stop_task().unwrap();
}

#[test]
fn test_interval_elapses_without_wake() {
    let config = OtaConfig {
        check_interval_secs: 1,
        ..quick_config()
    };
    let (sim, ota) = setup_with(config);
    sim.clock.set(5);
    ota.start_task().unwrap();

    // The loop wakes on its own once per interval
    let deadline = Instant::now() + Duration::from_secs(3);
    while sim.version_source.fetches() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(sim.version_source.fetches() >= 1);
    ota.stop_task().unwrap();
}

#[test]
fn test_auto_check_toggle() {
    let (sim, ota) = setup();
    ota.set_auto_check(false);
    ota.start_task().unwrap();

    sim.clock.set(7_200);
    ota.wake_task().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(sim.version_source.fetches(), 0);

    ota.set_auto_check(true);
    ota.wake_task().unwrap();
    assert!(wait_until(|| sim.version_source.fetches() == 1));
    ota.stop_task().unwrap();
}

#[test]
fn test_scheduler_leaves_download_to_caller() {
    let (sim, ota) = setup();
    sim.version_source.serve("5.0.0");
    ota.start_task().unwrap();

    sim.clock.set(3_600);
    ota.wake_task().unwrap();
    assert!(wait_until(|| ota.is_update_available()));

    for _ in 0..3 {
        ota.wake_task().unwrap();
    }
    thread::sleep(Duration::from_millis(100));
    assert_eq!(sim.downloader.begins(), 0);
    assert_eq!(ota.current_state(), OtaState::Idle);

    ota.start_update().unwrap();
    assert_eq!(ota.current_state(), OtaState::Complete);
    ota.stop_task().unwrap();
}

#[test]
fn test_stop_detaches_task_stuck_in_check() {
    let config = OtaConfig {
        dns_attempts: 1,
        dns_timeout_ms: 1_500,
        stop_grace_ms: 100,
        ..quick_config()
    };
    let (sim, ota) = setup_with(config);
    sim.resolver.set_delay(Duration::from_millis(1_000));
    ota.start_task().unwrap();

    sim.clock.set(3_600);
    ota.wake_task().unwrap();
    assert!(wait_until(|| sim.resolver.attempts() == 1));

    let started = Instant::now();
    ota.stop_task().unwrap();
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(!ota.is_task_running());

    // The in-flight check still runs to its own end
    assert!(wait_until(|| ota.current_state() == OtaState::Idle
        && sim.version_source.fetches() == 1));
}

#[test]
fn test_bring_up_sequence() {
    let (sim, ota) = setup();
    let recorder = Recorder::default();
    let states = recorder.states.clone();

    ota.set_auto_check(false);
    ota.bring_up(
        |_: u32, _: u32| {},
        move |state: OtaState, error: ota_core::LastError| {
            states.lock().unwrap().push((state, error))
        },
    )
    .unwrap();

    assert!(ota.is_task_running());
    assert!(ota.auto_check_enabled());
    assert!(sim.trust_store.slot(0).is_some());
    assert_eq!(ota.bring_up(|_: u32, _: u32| {}, |_: OtaState, _: ota_core::LastError| {}),
        Err(OtaError::AlreadyExists));

    ota.stop_task().unwrap();
    assert_eq!(ota.stop_task(), Err(OtaError::NotInitialized));
}

#[test]
fn test_bring_up_fails_without_certificate() {
    let sim = ota_core::sim::SimPlatform::with_anchors(ota_core::sim::SimAnchors::empty());
    let ota = ota_core::OtaManager::new(quick_config(), sim.platform()).unwrap();

    let err = ota
        .bring_up(|_: u32, _: u32| {}, |_: OtaState, _: ota_core::LastError| {})
        .unwrap_err();
    assert!(matches!(err, OtaError::Credentials(_)));
    assert!(!ota.is_task_running());
}

#[test]
fn test_busy_check_is_skipped_by_scheduler() {
    // The lookup outlasts the wake below but stays inside the DNS timeout
    let config = OtaConfig {
        dns_attempts: 1,
        dns_timeout_ms: 1_000,
        ..quick_config()
    };
    let (sim, ota) = setup_with(config);
    sim.resolver.set_delay(Duration::from_millis(300));
    ota.start_task().unwrap();

    let manual = ota.clone();
    let check = thread::spawn(move || manual.force_check());
    assert!(wait_until(|| sim.resolver.attempts() == 1));

    sim.clock.set(3_600);
    ota.wake_task().unwrap();
    thread::sleep(Duration::from_millis(50));

    // Woken scheduler saw the check as due but found the manager busy
    assert!(ota.is_task_running());
    assert_eq!(sim.resolver.attempts(), 1);

    assert!(check.join().unwrap().is_ok());
    // Only the manual check reached the resolver
    assert_eq!(sim.resolver.attempts(), 1);
    assert_eq!(ota.last_check_time_secs(), 3_600);
    ota.stop_task().unwrap();
}

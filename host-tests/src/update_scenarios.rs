use std::time::Duration;

use ota_core::pipeline::MAX_ESTIMATED_PROGRESS;
use ota_core::platform::{StoreError, TransportCode};
use ota_core::sim::{quick_config, DownloadScript, SimAnchors, SimPlatform};
use ota_core::{CredentialError, LastError, OtaConfig, OtaError, OtaManager, OtaState};

use crate::{setup, Recorder};

#[test]
fn test_start_before_check_is_not_available() {
    let (sim, ota) = setup();
    let recorder = Recorder::default();
    recorder.attach(&ota);

    assert_eq!(ota.start_update(), Err(OtaError::NotAvailable));
    assert_eq!(ota.current_state(), OtaState::Idle);
    assert_eq!(ota.last_error(), LastError::None);
    assert!(recorder.states().is_empty());
    assert_eq!(sim.downloader.begins(), 0);
}

#[test]
fn test_successful_update_reaches_complete() {
    let (sim, ota) = setup();
    sim.downloader.script(DownloadScript::Succeed {
        after: Duration::from_millis(150),
    });
    ota.check_for_updates().unwrap();

    let recorder = Recorder::default();
    recorder.attach(&ota);
    ota.start_update().unwrap();

    assert_eq!(
        recorder.states(),
        vec![OtaState::Downloading, OtaState::Installing, OtaState::Complete]
    );
    let progress = recorder.progress();
    let (done, total) = *progress.last().unwrap();
    assert_eq!(done, total);
    assert_eq!(progress.iter().filter(|(p, t)| p == t).count(), 1);
    assert_eq!(sim.installer.finishes(), 1);
    assert_eq!(ota.download_progress(), (100, 100));
}

#[test]
fn test_hung_transfer_times_out() {
    let (sim, ota) = setup();
    sim.downloader.script(DownloadScript::Hang);
    ota.check_for_updates().unwrap();

    let recorder = Recorder::default();
    recorder.attach(&ota);
    let err = ota.start_update().unwrap_err();

    assert!(matches!(err, OtaError::Timeout { .. }));
    assert_eq!(ota.current_state(), OtaState::Error);
    assert_eq!(ota.last_error(), LastError::Timeout);
    let progress = recorder.progress();
    assert!(!progress.is_empty());
    assert!(progress.iter().all(|(p, _)| *p <= MAX_ESTIMATED_PROGRESS));
    assert_eq!(sim.installer.finishes(), 0);
}

#[test]
fn test_async_failure_differs_from_start_failure() {
    let (sim, ota) = setup();

    sim.downloader.script(DownloadScript::Fail {
        after: Duration::from_millis(20),
        reason: "connection reset".into(),
    });
    ota.check_for_updates().unwrap();
    assert!(matches!(ota.start_update(), Err(OtaError::DownloadFailed(_))));
    assert_eq!(ota.last_error(), LastError::DownloadFailed);

    sim.downloader.script(DownloadScript::RejectStart(TransportCode::TLS_VERIFY_FAILED.0));
    ota.check_for_updates().unwrap();
    assert!(matches!(ota.start_update(), Err(OtaError::HttpRequest(_))));
    assert_eq!(ota.last_error(), LastError::HttpRequest);
}

#[test]
fn test_failed_download_needs_a_new_check() {
    let (sim, ota) = setup();
    sim.downloader.script(DownloadScript::Fail {
        after: Duration::from_millis(5),
        reason: "closed".into(),
    });
    ota.check_for_updates().unwrap();
    assert!(ota.start_update().is_err());

    assert!(!ota.is_update_available());
    assert_eq!(ota.start_update(), Err(OtaError::NotAvailable));

    sim.downloader.script(DownloadScript::Succeed {
        after: Duration::from_millis(5),
    });
    ota.check_for_updates().unwrap();
    assert_eq!(ota.start_update(), Ok(()));
}

#[test]
fn test_offline_start_is_network_error() {
    let (sim, ota) = setup();
    ota.check_for_updates().unwrap();
    sim.network.set_connected(false);

    assert_eq!(ota.start_update(), Err(OtaError::Network));
    assert_eq!(ota.current_state(), OtaState::Error);
    assert_eq!(ota.last_error(), LastError::Network);
    assert_eq!(sim.downloader.begins(), 0);
}

#[test]
fn test_empty_certificate_leaves_slot_unchanged() {
    let sim = SimPlatform::with_anchors(
        SimAnchors::empty().with(ota_core::certs::TrustAnchorId::StarfieldServicesRootCa, b""),
    );
    sim.trust_store.preload(0, b"factory anchor");
    let ota = OtaManager::new(quick_config(), sim.platform()).unwrap();

    let err = ota.load_certificates().unwrap_err();
    assert!(matches!(err, OtaError::Credentials(CredentialError::EmptyMaterial(_))));
    assert_eq!(sim.trust_store.slot(0).as_deref(), Some(&b"factory anchor"[..]));
    assert_eq!(sim.trust_store.sets(), 0);
}

#[test]
fn test_selected_anchor_is_installed_in_configured_slot() {
    let sim = SimPlatform::new();
    let config = OtaConfig {
        trust_anchor: ota_core::certs::TrustAnchorId::AmazonRootCa1,
        credential_slot: 2,
        ..quick_config()
    };
    let ota = OtaManager::new(config, sim.platform()).unwrap();
    ota.load_certificates().unwrap();

    let expected = SimAnchors::placeholders();
    let expected = ota_core::platform::TrustAnchorSource::material(
        &expected,
        ota_core::certs::TrustAnchorId::AmazonRootCa1,
    )
    .map(<[u8]>::to_vec);
    assert_eq!(sim.trust_store.slot(2), expected);
    assert_eq!(sim.trust_store.slot(0), None);
}

#[test]
fn test_store_rejection_stops_update_before_download() {
    let (sim, ota) = setup();
    sim.trust_store.reject_sets_with(Some(StoreError::InvalidParameter));
    ota.check_for_updates().unwrap();

    let err = ota.start_update().unwrap_err();
    assert_eq!(
        err,
        OtaError::Credentials(CredentialError::Rejected(StoreError::InvalidParameter))
    );
    assert_eq!(ota.current_state(), OtaState::Idle);
    assert_eq!(sim.downloader.begins(), 0);
}

#[test]
fn test_plain_http_skips_certificates() {
    let sim = SimPlatform::with_anchors(SimAnchors::empty());
    let config = OtaConfig {
        transport_flags: ota_core::config::flags::HTTP_1_1,
        port: 80,
        ..quick_config()
    };
    let ota = OtaManager::new(config, sim.platform()).unwrap();

    ota.check_for_updates().unwrap();
    assert_eq!(ota.start_update(), Ok(()));
    assert_eq!(sim.trust_store.sets(), 0);
    let request = sim.downloader.last_request().unwrap();
    assert_eq!(request.endpoint.port, 80);
    assert_eq!(request.flags & ota_core::config::flags::HTTPS, 0);
}

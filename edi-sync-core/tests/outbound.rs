mod common;

use common::*;
use edi_sync_core::config::{DocumentSettings, DocumentType};
use edi_sync_core::error::{SyncError, TransferOp};
use edi_sync_core::outbound::{send_837_files, OutboundReport};

const OUTBOUND_ROOT: &str = "inbound/tenant-1/generated_837_selective_grouped";

fn clearing_house(name: &str, enabled: bool) -> edi_sync_core::config::ConnectionDescriptor {
    descriptor(
        name,
        vec![(
            DocumentType::Edi837,
            DocumentSettings {
                enabled,
                destination_key: Some(format!("{name}-837-destination")),
                ..DocumentSettings::default()
            },
        )],
    )
}

fn secrets() -> StaticSecrets {
    StaticSecrets::with(&[
        ("waystar-host", "sftp.waystar"),
        ("waystar-837-destination", "/claims/in"),
        ("availity-host", "sftp.availity"),
        ("availity-837-destination", "/upload"),
    ])
}

#[tokio::test]
async fn run_files_land_in_per_batch_directory() {
    let network = FakeNetwork::default();
    network.add_host("sftp.waystar", &[]);
    let store = MemoryStore::default();
    store.insert("edi", &format!("{OUTBOUND_ROOT}/20240808/run-1/waystar/c1.837"), "claim one");
    store.insert("edi", &format!("{OUTBOUND_ROOT}/20240808/run-1/waystar/c2.837"), "claim two");
    // Another run's file must not be sent.
    store.insert("edi", &format!("{OUTBOUND_ROOT}/20240808/run-2/waystar/x.837"), "other");
    let services = services(secrets(), &network, &store, idle_trigger());
    let config = app_config(vec![clearing_house("waystar", true)]);

    let reports = send_837_files(
        &services,
        &config,
        "run-1",
        "20240808",
        &["Waystar".to_string()],
        None,
    )
    .await
    .expect("send should succeed");

    assert_eq!(
        reports,
        vec![OutboundReport {
            clearing_house: "waystar".into(),
            files_sent: Some(2),
        }]
    );
    network.with_host("sftp.waystar", |h| {
        assert!(h.dirs.contains("/claims/in/Waystar20240808"));
        assert_eq!(
            h.files.get("/claims/in/Waystar20240808/c1.837").map(Vec::as_slice),
            Some(&b"claim one"[..])
        );
        assert!(h.files.contains_key("/claims/in/Waystar20240808/c2.837"));
        assert_eq!(h.files.len(), 2);
        assert_eq!(h.closed, 1);
    });
}

#[tokio::test]
async fn disabled_clearing_house_reports_none_without_connecting() {
    let network = FakeNetwork::default();
    let store = MemoryStore::default();
    let services = services(secrets(), &network, &store, idle_trigger());
    let config = app_config(vec![clearing_house("availity", false)]);

    let reports = send_837_files(&services, &config, "run-1", "20240808", &["availity".into()], None)
        .await
        .unwrap();

    assert_eq!(reports[0].files_sent, None);
    assert_eq!(network.sessions_created(), 0);
}

#[tokio::test]
async fn unknown_clearing_house_is_a_config_error() {
    let network = FakeNetwork::default();
    let store = MemoryStore::default();
    let services = services(secrets(), &network, &store, idle_trigger());
    let config = app_config(vec![clearing_house("waystar", true)]);

    let err = send_837_files(&services, &config, "run-1", "20240808", &["change".into()], None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Config(m) if m.contains("change")));
}

#[tokio::test]
async fn one_failing_clearing_house_does_not_stop_the_others() {
    let network = FakeNetwork::default();
    network.add_host("sftp.waystar", &[]);
    network.add_host("sftp.availity", &[]);
    network.with_host("sftp.availity", |h| h.fail_connect = true);
    let store = MemoryStore::default();
    store.insert("edi", &format!("{OUTBOUND_ROOT}/20240808/run-1/waystar/c1.837"), "claim");
    let services = services(secrets(), &network, &store, idle_trigger());
    let config = app_config(vec![
        clearing_house("availity", true),
        clearing_house("waystar", true),
    ]);

    let err = send_837_files(
        &services,
        &config,
        "run-1",
        "20240808",
        &["availity".into(), "waystar".into()],
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SyncError::Connection(_)));
    assert!(network.with_host("sftp.waystar", |h| h
        .files
        .contains_key("/claims/in/Waystar20240808/c1.837")));
}

#[tokio::test]
async fn empty_run_creates_directory_and_sends_nothing() {
    let network = FakeNetwork::default();
    network.add_host("sftp.waystar", &[]);
    let store = MemoryStore::default();
    let services = services(secrets(), &network, &store, idle_trigger());
    let config = app_config(vec![clearing_house("waystar", true)]);

    let reports = send_837_files(&services, &config, "run-9", "20240808", &["waystar".into()], None)
        .await
        .unwrap();

    assert_eq!(reports[0].files_sent, Some(0));
    assert!(network.with_host("sftp.waystar", |h| h.dirs.contains("/claims/in/Waystar20240808")));
}

#[tokio::test]
async fn missing_blob_surfaces_as_read_error() {
    use edi_sync_core::contract::{BlobEntry, MockObjectStore, Services};
    use std::sync::Arc;

    let network = FakeNetwork::default();
    network.add_host("sftp.waystar", &[]);
    let mut store = MockObjectStore::new();
    store.expect_list_with_prefix().times(1).returning(|_, _| {
        Ok(vec![BlobEntry {
            name: format!("{OUTBOUND_ROOT}/20240808/run-1/waystar/gone.837"),
        }])
    });
    store
        .expect_read_bytes()
        .times(1)
        .returning(|_, _| Err("blob not found".into()));
    let services = Services {
        secrets: Arc::new(secrets()),
        transports: Arc::new(network.clone()),
        store: Arc::new(store),
        trigger: Arc::new(idle_trigger()),
    };
    let config = app_config(vec![clearing_house("waystar", true)]);

    let err = send_837_files(&services, &config, "run-1", "20240808", &["waystar".into()], None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Transfer(t) if t.operation == TransferOp::Read));
    assert_eq!(network.with_host("sftp.waystar", |h| h.closed), 1);
}

use std::fs::{create_dir_all, write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Writes a config with one connection whose 999 files come from a mounted host.
fn write_config(dir: &Path) -> std::path::PathBuf {
    let yaml = format!(
        r#"
sync:
  tenant_id: tenant-1
  container: edi
  connections:
    - name: waystar
      host_key: waystar-sftp-hostname
      username_key: waystar-sftp-username
      password_key: waystar-sftp-password
      documents:
        "999":
          enabled: true
          source_key: waystar-999-source-path
          storage_destination: "inbound/999/{{0}}/{{1}}"
          file_format: ".999"
  retry:
    initial_delay_ms: 0
adapters:
  storage_root: {store}
  mount_root: {mounts}
"#,
        store = dir.join("store").display(),
        mounts = dir.join("mounts").display(),
    );
    let path = dir.join("config.yaml");
    write(&path, yaml).expect("Writing temp config failed");
    path
}

#[test]
fn help_lists_every_subcommand() {
    let mut cmd = Command::cargo_bin("edi-sync").expect("Binary exists");
    cmd.arg("--help");
    cmd.assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("send837"))
            .and(predicate::str::contains("relay"))
            .and(predicate::str::contains("fetch")),
    );
}

#[test]
fn run_fails_on_missing_config() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("edi-sync").expect("Binary exists");
    cmd.arg("run")
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .arg("--doc-type")
        .arg("835");
    cmd.assert().failure();
}

#[test]
fn unknown_document_type_is_rejected_by_the_parser() {
    let mut cmd = Command::cargo_bin("edi-sync").expect("Binary exists");
    cmd.args(["run", "--config", "x.yaml", "--doc-type", "834"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unknown document type"));
}

#[test]
fn fetch_copies_mounted_files_into_the_store() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let outbox = dir.path().join("mounts/sftp.waystar/outbox");
    create_dir_all(&outbox).unwrap();
    write(outbox.join("ack.999"), "ISA*00~").unwrap();
    write(outbox.join("notes.txt"), "ignored").unwrap();

    let mut cmd = Command::cargo_bin("edi-sync").expect("Binary exists");
    cmd.args(["fetch", "--connection", "waystar", "--doc-type", "999"])
        .args(["--batch-id", "20240808", "--run-id", "run-1"])
        .arg("--config")
        .arg(&config)
        .env("WAYSTAR_SFTP_HOSTNAME", "sftp.waystar")
        .env("WAYSTAR_999_SOURCE_PATH", "/outbox");

    cmd.assert().success();
    let stored = dir.path().join("store/edi/inbound/999/20240808/run-1");
    assert_eq!(
        std::fs::read_to_string(stored.join("ack.999")).unwrap(),
        "ISA*00~"
    );
    assert!(!stored.join("notes.txt").exists());
    // Not deleted remotely unless configured.
    assert!(outbox.join("ack.999").exists());
}

#[test]
fn fetch_fails_for_unknown_connection() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let mut cmd = Command::cargo_bin("edi-sync").expect("Binary exists");
    cmd.args(["fetch", "--connection", "availity", "--doc-type", "999"])
        .arg("--config")
        .arg(&config);

    cmd.assert().failure();
}

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use edi_sync::cli::{run, Cli, Commands};
    use edi_sync_core::config::DocumentType;

    let cli = Cli {
        command: Commands::Run {
            config: std::path::PathBuf::from("dummy.yaml"),
            doc_type: DocumentType::Edi835,
            run_id: None,
            batch_id: None,
            manual: false,
            timeout_secs: None,
        },
    };

    let result = run(cli).await;

    assert!(result.is_err());
    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}

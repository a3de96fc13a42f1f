use edi_sync_core::config::{AppConfig, DocumentType, RetryPolicy};

const YAML: &str = r#"
tenant_id: tenant-1
container: edi
storage_835_destination_path: inbound/835
outbound_837_path: inbound/tenant-1/generated_837_selective_grouped
connections:
  - name: waystar
    host_key: waystar-sftp-hostname
    username_key: waystar-sftp-username
    password_key: waystar-sftp-password
    documents:
      "835":
        enabled: true
        source_key: waystar-835-source-path
        storage_destination: "inbound/835/{0}/{1}/sftp"
        file_format: ".835"
      "837":
        enabled: true
        destination_key: waystar-837-destination-path
  - name: availity
    host_key: availity-host
    username_key: availity-user
    password_key: availity-password
    port: 2222
manual_remittance:
  host_key: matrix-host
  username_key: matrix-user
  password_key: matrix-password
pipelines:
  resource_group: rg-edi
  factory: adf-edi
  names:
    "835": pl_edi_835
retry:
  max_attempts: 5
"#;

#[test]
fn yaml_config_fills_defaults() {
    let config: AppConfig = serde_yaml::from_str(YAML).expect("valid config");

    let waystar = config.connection("waystar").expect("waystar configured");
    assert_eq!(waystar.port, 22);
    assert!(waystar.is_enabled(DocumentType::Edi835));
    assert!(waystar.is_enabled(DocumentType::Edi837));
    assert!(!waystar.is_enabled(DocumentType::Edi277));
    let s835 = waystar.settings(DocumentType::Edi835).unwrap();
    assert!(!s835.delete_after_read);
    assert_eq!(s835.file_format.as_deref(), Some(".835"));

    let availity = config.connection("availity").unwrap();
    assert_eq!(availity.port, 2222);
    assert!(availity.documents.is_empty());

    assert_eq!(config.manual_remittance.unwrap().port, 22);
    assert_eq!(
        config.pipelines.names.get(&DocumentType::Edi835).map(String::as_str),
        Some("pl_edi_835")
    );
    assert_eq!(
        config.retry,
        RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        }
    );
    assert!(config.relays.is_empty());
    assert!(config.scratch_dir.is_none());
}

#[test]
fn unknown_document_type_is_rejected() {
    let yaml = YAML.replace("\"837\":", "\"834\":");
    assert!(serde_yaml::from_str::<AppConfig>(&yaml).is_err());
}

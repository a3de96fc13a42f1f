//! Loads the static YAML config file into [`CliConfig`].
//!
//! The file holds secret *names* only. Secret values come from the environment at
//! run time through [`crate::adapters::EnvSecretResolver`].
//!
//! ```yaml
//! sync:
//!   tenant_id: tenant-1
//!   container: edi
//!   storage_835_destination_path: inbound/835
//!   connections:
//!     - name: waystar
//!       host_key: waystar-sftp-hostname
//!       username_key: waystar-sftp-username
//!       password_key: waystar-sftp-password
//!       documents:
//!         "835":
//!           enabled: true
//!           source_key: waystar-835-source-path
//!           storage_destination: "inbound/835/{0}/{1}/sftp"
//!           file_format: ".835"
//! adapters:
//!   storage_root: ./data
//!   transport: sftp        # or `mounted` with a `mount_root`
//!   sftp_timeout_secs: 30
//! ```
use anyhow::Result;
use edi_sync_core::config::AppConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

use crate::adapters::AdapterSettings;

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub sync: AppConfig,
    pub adapters: AdapterSettings,
}

/// Reads and parses the config file, logging what was loaded.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    config.sync.trace_loaded();
    Ok(config)
}

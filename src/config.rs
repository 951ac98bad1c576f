// ⚙️ Import configuration (TOML)
//
// Every key is optional. CLI flags override the file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ImportError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// SQLite file holding pricing, catalog and audit tables.
    pub database_path: PathBuf,
    /// Audit lease terms of RMS-sourced pricing against the catalog.
    pub detect_lease_term_mismatches: bool,
    /// Also warn about catalog terms the feed did not price.
    pub alert_reva_term_mismatches: bool,
    /// Price internal imports as five weekly windows, +20% each.
    pub simulate_decaying_availability: bool,
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset.
    pub log_filter: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            database_path: PathBuf::from("rms_pricing.db"),
            detect_lease_term_mismatches: true,
            alert_reva_term_mismatches: false,
            simulate_decaying_availability: false,
            log_filter: "info".to_string(),
        }
    }
}

impl ImportConfig {
    pub fn from_toml(input: &str) -> Result<Self, ImportError> {
        toml::from_str(input).map_err(|e| ImportError::ConfigParse(e.to_string()))
    }

    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ImportError> {
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ImportError::FileNotFound(path.to_path_buf()));
                }
                let content = std::fs::read_to_string(path)?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }
}

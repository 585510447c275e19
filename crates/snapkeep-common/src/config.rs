//! Configuration types for Snapkeep
//!
//! This module defines the daemon configuration structure. Values come from
//! CLI flags and environment variables; the defaults here are the contract.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for the snapkeep daemon
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the registry and per-dataset store files
    pub data_dir: PathBuf,
    /// Seconds between inventory refresh passes in daemon mode
    pub refresh_interval_secs: u64,
    /// Prefix for snapshots created through snapkeep
    pub snapshot_prefix: String,
    /// ZFS user property carrying the declared policy set
    pub policy_property: String,
    /// ZFS user property carrying the persisted dataset identity
    pub id_property: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/snapkeep"),
            refresh_interval_secs: 600,
            snapshot_prefix: "sk_auto_".to_string(),
            policy_property: "com.snapkeep:policies".to_string(),
            id_property: "com.snapkeep:id".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/snapkeep"));
        assert_eq!(config.refresh_interval_secs, 600);
        assert!(config.id_property.starts_with("com.snapkeep:"));
    }
}

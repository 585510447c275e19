//! Dataset inventory via `zfs list`.
//!
//! One listing pass returns every dataset with its declared policy set and
//! any previously persisted identity, parsed line by line. Malformed lines
//! are logged and skipped so one bad property never hides the rest of the
//! pool.

use crate::error::ZfsResult;
use crate::exec;
use serde::Serialize;
use snapkeep_common::{
    Config, DatasetDescriptor, DatasetId, DatasetKind, DatasetName, PolicyDeclaration,
    parse_policy_set,
};
use std::collections::HashSet;
use tracing::warn;

/// Columns requested from `zfs list`, in order. The identity and policy
/// user properties are appended at runtime.
const LIST_COLUMNS: &str = "guid,type,name,creation,used,available,refer";

/// Handle for zfs command-line operations, parameterized by the user
/// properties snapkeep owns.
pub struct Zfs {
    id_property: String,
    policy_property: String,
}

impl Zfs {
    #[must_use]
    pub fn new(id_property: impl Into<String>, policy_property: impl Into<String>) -> Self {
        Self {
            id_property: id_property.into(),
            policy_property: policy_property.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.id_property, &config.policy_property)
    }

    /// List every dataset in every imported pool.
    ///
    /// Runs `zfs list -t all -p -H` with the column set above; `-H` output is
    /// tab-separated, which keeps property values containing spaces intact.
    pub fn inventory(&self) -> ZfsResult<Vec<Dataset>> {
        let columns = format!(
            "{LIST_COLUMNS},{},{}",
            self.id_property, self.policy_property
        );
        let stdout = exec::run("zfs", &["list", "-t", "all", "-p", "-H", "-o", &columns])?;

        let mut datasets = Vec::new();
        for line in stdout.lines() {
            if line.is_empty() {
                continue;
            }
            if let Some(dataset) = Dataset::parse_line(line) {
                datasets.push(dataset);
            }
        }
        Ok(datasets)
    }

    /// Persist a freshly allocated identity onto a dataset.
    ///
    /// Second half of the two-step identity protocol: the registry allocates
    /// the id, this writes it back so the next inventory pass observes it.
    pub fn assign_id(&self, name: &DatasetName, id: DatasetId) -> ZfsResult<()> {
        let property = format!("{}={id}", self.id_property);
        exec::run("zfs", &["set", &property, &name.to_string()])?;
        Ok(())
    }

    /// Take a snapshot of a dataset, optionally recursively.
    pub fn take_snapshot(
        &self,
        name: &DatasetName,
        snapshot: &str,
        recursive: bool,
    ) -> ZfsResult<()> {
        let full = name.with_snapshot(snapshot).to_string();
        if recursive {
            exec::run("zfs", &["snap", "-r", &full])?;
        } else {
            exec::run("zfs", &["snap", &full])?;
        }
        Ok(())
    }
}

/// One dataset as reported by `zfs list`.
#[derive(Clone, Debug, Serialize)]
pub struct Dataset {
    /// ZFS-native guid (stable per dataset but not portable across send/recv)
    pub guid: String,
    pub kind: DatasetKind,
    pub name: DatasetName,
    /// Creation time, epoch seconds
    pub creation: u64,
    pub used: Option<u64>,
    pub available: Option<u64>,
    pub referenced: Option<u64>,
    /// Persisted snapkeep identity, absent until the dataset is tagged
    pub id: Option<DatasetId>,
    /// Declared policy set, absent when the property is unset
    pub policies: Option<HashSet<PolicyDeclaration>>,
}

impl Dataset {
    /// Parse one tab-separated `zfs list -p -H` line.
    ///
    /// Returns `None` (after logging) for lines that do not match the
    /// requested column set.
    fn parse_line(line: &str) -> Option<Self> {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != 9 {
            warn!(columns = columns.len(), line, "unexpected zfs list column count");
            return None;
        }

        let guid = columns[0].to_owned();

        let kind: DatasetKind = match columns[1].parse() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(line, error = %e, "unparseable dataset type");
                return None;
            }
        };

        let name: DatasetName = match columns[2].parse() {
            Ok(name) => name,
            Err(e) => {
                warn!(line, error = %e, "unparseable dataset name");
                return None;
            }
        };

        let creation: u64 = match columns[3].parse() {
            Ok(creation) => creation,
            Err(_) => {
                warn!(line, "unparseable creation time");
                return None;
            }
        };

        let used = parse_size(columns[4]);
        let available = parse_size(columns[5]);
        let referenced = parse_size(columns[6]);

        let id = match columns[7] {
            "-" | "" => None,
            raw => match raw.parse::<DatasetId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(dataset = %name, value = raw, error = %e,
                        "ignoring malformed identity property, dataset treated as untagged");
                    None
                }
            },
        };

        let policies = match columns[8] {
            "-" | "" => None,
            raw => {
                let set = parse_policy_set(raw);
                if set.is_empty() {
                    warn!(dataset = %name, value = raw, "policy property parsed to nothing");
                    None
                } else {
                    Some(set)
                }
            }
        };

        Some(Self {
            guid,
            kind,
            name,
            creation,
            used,
            available,
            referenced,
            id,
            policies,
        })
    }

    /// Registration input for this dataset, `None` while untagged.
    #[must_use]
    pub fn to_descriptor(&self) -> Option<DatasetDescriptor> {
        let id = self.id?;
        Some(DatasetDescriptor {
            kind: self.kind,
            id,
            name: self.name.clone(),
            policies: self.policies.clone(),
        })
    }
}

/// `-p` sizes are plain byte counts; `-` marks a property without a value
/// for this dataset kind.
fn parse_size(raw: &str) -> Option<u64> {
    match raw {
        "-" | "" => None,
        value => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(fields: &[&str]) -> String {
        fields.join("\t")
    }

    #[test]
    fn test_parse_tagged_filesystem_with_policies() {
        let raw = line(&[
            "1234567890",
            "filesystem",
            "tank/vm",
            "1700000000",
            "4096",
            "1073741824",
            "4096",
            "6c0f4d49-9a0b-4c8e-b0a3-5a1f3f3c0d11",
            "[hourly](1h:24);[daily](1d:7)",
        ]);
        let dataset = Dataset::parse_line(&raw).unwrap();
        assert_eq!(dataset.kind, DatasetKind::Filesystem);
        assert_eq!(dataset.name.to_string(), "tank/vm");
        assert_eq!(dataset.creation, 1_700_000_000);
        assert_eq!(dataset.used, Some(4096));
        assert!(dataset.id.is_some());
        assert_eq!(dataset.policies.as_ref().unwrap().len(), 2);

        let descriptor = dataset.to_descriptor().unwrap();
        assert_eq!(descriptor.name.to_string(), "tank/vm");
    }

    #[test]
    fn test_parse_untagged_dataset_has_no_descriptor() {
        let raw = line(&[
            "987",
            "volume",
            "tank/swap",
            "1700000000",
            "4096",
            "-",
            "4096",
            "-",
            "-",
        ]);
        let dataset = Dataset::parse_line(&raw).unwrap();
        assert!(dataset.id.is_none());
        assert!(dataset.policies.is_none());
        assert!(dataset.available.is_none());
        assert!(dataset.to_descriptor().is_none());
    }

    #[test]
    fn test_parse_malformed_identity_treated_as_untagged() {
        let raw = line(&[
            "987",
            "filesystem",
            "tank/data",
            "1700000000",
            "0",
            "0",
            "0",
            "not-a-uuid",
            "-",
        ]);
        let dataset = Dataset::parse_line(&raw).unwrap();
        assert!(dataset.id.is_none());
    }

    #[test]
    fn test_parse_rejects_short_line() {
        assert!(Dataset::parse_line("tank\tfilesystem").is_none());
    }

    #[test]
    fn test_parse_snapshot_line() {
        let raw = line(&[
            "555",
            "snapshot",
            "tank/vm@sk_auto_2026-01-01_00:00:00",
            "1700000001",
            "0",
            "-",
            "4096",
            "-",
            "-",
        ]);
        let dataset = Dataset::parse_line(&raw).unwrap();
        assert_eq!(dataset.kind, DatasetKind::Snapshot);
        assert_eq!(
            dataset.name.snapshot(),
            Some("sk_auto_2026-01-01_00:00:00")
        );
    }
}

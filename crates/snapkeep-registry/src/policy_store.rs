//! Per-dataset policy store.
//!
//! Each registered dataset identity owns one environment file holding its
//! declared policy set, keyed by content fingerprint. `reconcile` converges
//! the stored set to a freshly observed declaration set in one transaction;
//! everything else is read surface for the scheduler plus the append-only
//! snapshot association table.

use crate::env;
use crate::error::RegistryResult;
use crate::fingerprint::{self, FINGERPRINT_LEN};
use crate::tables;
use redb::{Database, ReadableTable, Table};
use serde::Serialize;
use snapkeep_common::{DatasetId, PolicyDeclaration, PolicyId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// File name of a dataset's policy environment inside the data directory.
#[must_use]
pub(crate) fn store_file_name(id: DatasetId) -> String {
    format!("ds_{id}.redb")
}

/// One stored policy with its allocated id and attributes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredPolicy {
    pub id: PolicyId,
    pub label: String,
    pub interval_seconds: f64,
    pub keep: Option<u64>,
}

/// Policy store for a single dataset identity.
pub struct DatasetPolicyStore {
    id: DatasetId,
    path: PathBuf,
    env: Database,
}

impl DatasetPolicyStore {
    /// Open (or create) the policy environment for `id` under `dir`.
    ///
    /// All tables are created eagerly so later read transactions never
    /// fail, and the schema version is written on first creation. Safe to
    /// call again after a partially-run prior attempt.
    pub fn open(dir: &Path, id: DatasetId) -> RegistryResult<Self> {
        let path = dir.join(store_file_name(id));
        let env = env::open_env(&path)?;

        let write_txn = env.begin_write()?;
        {
            let _t = write_txn.open_table(tables::HASH_TO_POLICY_ID)?;
            let _t = write_txn.open_table(tables::POLICY_LABEL)?;
            let _t = write_txn.open_table(tables::POLICY_INTERVAL_SECS)?;
            let _t = write_txn.open_table(tables::POLICY_KEEP)?;
            let _t = write_txn.open_table(tables::SNAPSHOT_POLICY)?;
            let mut meta = write_txn.open_table(tables::DS_META)?;
            env::ensure_schema_version(&mut meta)?;
        }
        write_txn.commit()?;

        Ok(Self { id, path, env })
    }

    /// Identity this store belongs to
    #[must_use]
    pub const fn id(&self) -> DatasetId {
        self.id
    }

    /// Path of the backing environment file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Converge the stored policy set to exactly `declared`.
    ///
    /// One write transaction. Newly declared policies get a fresh id and
    /// fail-if-exists attribute writes; policies no longer declared lose
    /// their fingerprint and attribute entries; policies present in both
    /// sets keep their id untouched, with only the keep count converged in
    /// place. Calling this twice with an unchanged set mutates nothing on
    /// the second call. The snapshot association table is never touched.
    pub fn reconcile(&self, declared: &HashSet<PolicyDeclaration>) -> RegistryResult<()> {
        let write_txn = self.env.begin_write()?;
        {
            let mut hashes = write_txn.open_table(tables::HASH_TO_POLICY_ID)?;
            let mut labels = write_txn.open_table(tables::POLICY_LABEL)?;
            let mut intervals = write_txn.open_table(tables::POLICY_INTERVAL_SECS)?;
            let mut keeps = write_txn.open_table(tables::POLICY_KEEP)?;

            let mut declared_digests: HashSet<[u8; FINGERPRINT_LEN]> =
                HashSet::with_capacity(declared.len());

            for policy in declared {
                let digest = fingerprint::fingerprint(policy);
                declared_digests.insert(digest);

                let existing = hashes
                    .get(digest.as_slice())?
                    .map(|guard| guard.value().to_owned());
                match existing {
                    Some(policy_id) => {
                        // Structurally unchanged: id and attributes stay put,
                        // only the keep count may move.
                        let stored_keep = keeps.get(policy_id.as_str())?.map(|g| g.value());
                        if stored_keep != policy.keep {
                            debug!(dataset = %self.id, policy = %policy_id,
                                old = ?stored_keep, new = ?policy.keep, "keep count changed");
                            match policy.keep {
                                Some(keep) => {
                                    keeps.insert(policy_id.as_str(), keep)?;
                                }
                                None => {
                                    keeps.remove(policy_id.as_str())?;
                                }
                            }
                        }
                    }
                    None => {
                        let policy_id = fresh_policy_id(&labels)?;
                        let id_str = policy_id.to_string();
                        debug!(dataset = %self.id, policy = %policy_id,
                            declaration = %policy, "storing new policy");

                        env::insert_new_digest(&mut hashes, "hash_to_policy_id", &digest, &id_str)?;
                        env::insert_new(&mut labels, "policy_label", &id_str, policy.label.as_str())?;
                        env::insert_new(
                            &mut intervals,
                            "policy_interval_secs",
                            &id_str,
                            policy.interval_seconds(),
                        )?;
                        if let Some(keep) = policy.keep {
                            env::insert_new(&mut keeps, "policy_keep", &id_str, keep)?;
                        }
                    }
                }
            }

            // Deletion pass: collect stale entries first, then remove.
            let mut stale: Vec<(Vec<u8>, String)> = Vec::new();
            for entry in hashes.iter()? {
                let (digest, policy_id) = entry?;
                let known = <[u8; FINGERPRINT_LEN]>::try_from(digest.value())
                    .is_ok_and(|d| declared_digests.contains(&d));
                if !known {
                    stale.push((digest.value().to_vec(), policy_id.value().to_owned()));
                }
            }
            for (digest, policy_id) in stale {
                debug!(dataset = %self.id, policy = %policy_id, "removing undeclared policy");
                hashes.remove(digest.as_slice())?;
                labels.remove(policy_id.as_str())?;
                intervals.remove(policy_id.as_str())?;
                // keep entry may be absent when the policy kept without limit
                keeps.remove(policy_id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Every stored policy with its attributes.
    pub fn policies(&self) -> RegistryResult<Vec<StoredPolicy>> {
        let read_txn = self.env.begin_read()?;
        let labels = read_txn.open_table(tables::POLICY_LABEL)?;
        let intervals = read_txn.open_table(tables::POLICY_INTERVAL_SECS)?;
        let keeps = read_txn.open_table(tables::POLICY_KEEP)?;

        let mut result = Vec::new();
        for entry in labels.iter()? {
            let (key, label) = entry?;
            let id_str = key.value();
            let id: PolicyId = match id_str.parse() {
                Ok(id) => id,
                Err(e) => {
                    error!(dataset = %self.id, key = id_str, error = %e, "malformed policy id key");
                    continue;
                }
            };
            let Some(interval_seconds) = intervals.get(id_str)?.map(|g| g.value()) else {
                // Lock-step invariant breach; surface loudly but keep listing.
                error!(dataset = %self.id, policy = %id, "policy has no stored interval");
                continue;
            };
            let keep = keeps.get(id_str)?.map(|g| g.value());
            result.push(StoredPolicy {
                id,
                label: label.value().to_owned(),
                interval_seconds,
                keep,
            });
        }
        Ok(result)
    }

    /// One stored policy by id.
    pub fn policy(&self, id: PolicyId) -> RegistryResult<Option<StoredPolicy>> {
        Ok(self.policies()?.into_iter().find(|p| p.id == id))
    }

    /// Record which policy produced a snapshot.
    ///
    /// This is the append-only association written by the snapshot-creation
    /// workflow, not by reconciliation. Re-recording the same snapshot is
    /// harmless (last write wins).
    pub fn record_snapshot(&self, snapshot_guid: &str, policy: PolicyId) -> RegistryResult<()> {
        let write_txn = self.env.begin_write()?;
        {
            let mut associations = write_txn.open_table(tables::SNAPSHOT_POLICY)?;
            associations.insert(snapshot_guid, policy.to_string().as_str())?;
        }
        write_txn.commit()?;
        debug!(dataset = %self.id, snapshot = snapshot_guid, policy = %policy, "snapshot recorded");
        Ok(())
    }

    /// Every snapshot→policy association.
    pub fn snapshot_associations(&self) -> RegistryResult<Vec<(String, PolicyId)>> {
        let read_txn = self.env.begin_read()?;
        let associations = read_txn.open_table(tables::SNAPSHOT_POLICY)?;

        let mut result = Vec::new();
        for entry in associations.iter()? {
            let (guid, policy_id) = entry?;
            match policy_id.value().parse() {
                Ok(id) => result.push((guid.value().to_owned(), id)),
                Err(e) => {
                    warn!(dataset = %self.id, snapshot = guid.value(), error = %e,
                        "skipping association with malformed policy id");
                }
            }
        }
        Ok(result)
    }

    /// Associations whose policy has since been deleted.
    ///
    /// Such entries are retained rather than cascaded on policy deletion;
    /// this lists them for callers that want to clean up or audit.
    pub fn orphaned_associations(&self) -> RegistryResult<Vec<(String, PolicyId)>> {
        let live: HashSet<PolicyId> = self.policies()?.into_iter().map(|p| p.id).collect();
        Ok(self
            .snapshot_associations()?
            .into_iter()
            .filter(|(_, id)| !live.contains(id))
            .collect())
    }
}

/// Allocate a policy id guaranteed absent from this store's keyspace.
///
/// Collision odds are negligible at 128 bits, but correctness does not
/// depend on that: the id is re-checked before use.
fn fresh_policy_id(labels: &Table<'_, &'static str, &'static str>) -> RegistryResult<PolicyId> {
    loop {
        let id = PolicyId::new();
        if labels.get(id.to_string().as_str())?.is_none() {
            return Ok(id);
        }
    }
}

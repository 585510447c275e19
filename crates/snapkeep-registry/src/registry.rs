//! Identity registry and registration reconciler.
//!
//! The registry owns the bijective name↔id mapping, the exclusivity lock,
//! the schema version, and the lifecycle of every per-dataset policy store.
//! All mutating entry points serialize behind one process-wide write
//! barrier; that barrier is the only thing giving the physically separate
//! environment files the appearance of a single consistent write path.

use crate::env;
use crate::error::{RegistryError, RegistryResult};
use crate::policy_store::{DatasetPolicyStore, store_file_name};
use crate::tables;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, Table};
use snapkeep_common::{DatasetDescriptor, DatasetId};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// File name of the registry environment inside the data directory.
const APPLICATION_FILE: &str = "application.redb";

/// Identity registry: one instance per data directory.
///
/// Read-only lookups may run concurrently; every mutating operation holds
/// the write barrier for its full duration, including policy-store work in
/// other environment files.
pub struct IdentityRegistry {
    env: Database,
    dir: PathBuf,
    /// Live policy-store handles, one per known identity. The lock doubles
    /// as the process-wide write barrier.
    stores: RwLock<HashMap<DatasetId, Arc<DatasetPolicyStore>>>,
}

impl IdentityRegistry {
    /// Open (or create) the registry at `dir`.
    ///
    /// With `acquire_lock`, refuses to start while another live process on
    /// this host holds the exclusivity marker; a marker left by a dead
    /// process is overwritten. The startup transaction also bootstraps the
    /// schema version and scans `id_to_name` so every known dataset's
    /// policy store is open before the registry is handed out.
    pub fn open(dir: impl Into<PathBuf>, acquire_lock: bool) -> RegistryResult<Self> {
        let dir = dir.into();
        let env = env::open_env(&dir.join(APPLICATION_FILE))?;

        let write_txn = env.begin_write()?;
        let mut ids = Vec::new();
        let version;
        {
            let _t = write_txn.open_table(tables::NAME_TO_ID)?;
            let id_to_name = write_txn.open_table(tables::ID_TO_NAME)?;
            let mut meta = write_txn.open_table(tables::META)?;

            if acquire_lock {
                let holder = meta.get(tables::PID_LOCK_KEY)?.map(|guard| guard.value());
                if let Some(pid) = holder {
                    if process_alive(pid) {
                        return Err(RegistryError::ProcessAlreadyRunning { pid });
                    }
                    warn!(stale_pid = pid, "replacing exclusivity marker left by dead process");
                }
                meta.insert(tables::PID_LOCK_KEY, std::process::id())?;
            }

            version = env::ensure_schema_version(&mut meta)?;

            for entry in id_to_name.iter()? {
                let (key, _name) = entry?;
                match key.value().parse::<DatasetId>() {
                    Ok(id) => ids.push(id),
                    Err(e) => {
                        error!(key = key.value(), error = %e, "skipping malformed id in registry")
                    }
                }
            }
        }
        write_txn.commit()?;

        let mut stores = HashMap::with_capacity(ids.len());
        for id in ids {
            let store = DatasetPolicyStore::open(&dir, id)?;
            stores.insert(id, Arc::new(store));
        }

        info!(
            datasets = stores.len(),
            schema_version = version,
            path = %dir.display(),
            "identity registry opened"
        );
        Ok(Self {
            env,
            dir,
            stores: RwLock::new(stores),
        })
    }

    /// Idempotently allocate an id for `name`.
    ///
    /// A pre-existing mapping is returned as-is; otherwise a fresh id is
    /// generated, re-checked against `id_to_name`, and both directions of
    /// the bijection are written in one transaction.
    pub fn allocate_id(&self, name: &str) -> RegistryResult<DatasetId> {
        let _barrier = self.stores.write();

        let write_txn = self.env.begin_write()?;
        let id = {
            let mut name_to_id = write_txn.open_table(tables::NAME_TO_ID)?;
            let mut id_to_name = write_txn.open_table(tables::ID_TO_NAME)?;
            allocate_in_txn(&mut name_to_id, &mut id_to_name, name)?
        };
        write_txn.commit()?;
        Ok(id)
    }

    /// Batch form of [`Self::allocate_id`]: every input name appears in the
    /// output, newly allocated or pre-existing, all inside one transaction.
    pub fn allocate_ids<'a, I>(&self, names: I) -> RegistryResult<HashMap<String, DatasetId>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let _barrier = self.stores.write();

        let write_txn = self.env.begin_write()?;
        let allocated = {
            let mut name_to_id = write_txn.open_table(tables::NAME_TO_ID)?;
            let mut id_to_name = write_txn.open_table(tables::ID_TO_NAME)?;
            let mut allocated = HashMap::new();
            for name in names {
                let id = allocate_in_txn(&mut name_to_id, &mut id_to_name, name)?;
                allocated.insert(name.to_owned(), id);
            }
            allocated
        };
        write_txn.commit()?;
        Ok(allocated)
    }

    /// Id currently mapped to `name`, if any.
    pub fn lookup_id(&self, name: &str) -> RegistryResult<Option<DatasetId>> {
        let _shared = self.stores.read();
        let read_txn = self.env.begin_read()?;
        let name_to_id = read_txn.open_table(tables::NAME_TO_ID)?;
        let Some(raw) = name_to_id.get(name)?.map(|g| g.value().to_owned()) else {
            return Ok(None);
        };
        let id = raw.parse().map_err(|_| RegistryError::MalformedId {
            key: name.to_owned(),
            value: raw,
        })?;
        Ok(Some(id))
    }

    /// Name currently mapped to `id`, if any.
    pub fn lookup_name(&self, id: DatasetId) -> RegistryResult<Option<String>> {
        let _shared = self.stores.read();
        let read_txn = self.env.begin_read()?;
        let id_to_name = read_txn.open_table(tables::ID_TO_NAME)?;
        Ok(id_to_name
            .get(id.to_string().as_str())?
            .map(|g| g.value().to_owned()))
    }

    /// Register one observed inventory batch.
    ///
    /// The whole batch is rejected up front if any descriptor is a snapshot
    /// or bookmark; nothing is committed in that case. Otherwise one
    /// registry transaction resolves every descriptor: consistent mappings
    /// are reused, a rename rewrites both directions (last observed wins,
    /// stale inverse edges deleted), unknown pairs are inserted. Still
    /// under the barrier, missing policy stores are then created and each
    /// descriptor's declared policies are forwarded to its store.
    pub fn register_all(&self, descriptors: &[DatasetDescriptor]) -> RegistryResult<()> {
        for descriptor in descriptors {
            if !descriptor.kind.is_registrable() {
                error!(dataset = %descriptor.name, kind = %descriptor.kind,
                    "rejecting registration batch");
                return Err(RegistryError::InvalidDatasetKind {
                    kind: descriptor.kind,
                    name: descriptor.name.to_string(),
                });
            }
        }

        let mut stores = self.stores.write();

        let write_txn = self.env.begin_write()?;
        {
            let mut name_to_id = write_txn.open_table(tables::NAME_TO_ID)?;
            let mut id_to_name = write_txn.open_table(tables::ID_TO_NAME)?;

            for descriptor in descriptors {
                let id_str = descriptor.id.to_string();
                let name_str = descriptor.name.to_string();

                let bound_name = id_to_name
                    .get(id_str.as_str())?
                    .map(|g| g.value().to_owned());
                let bound_id = name_to_id
                    .get(name_str.as_str())?
                    .map(|g| g.value().to_owned());

                let consistent = bound_name.as_deref() == Some(name_str.as_str())
                    && bound_id.as_deref() == Some(id_str.as_str());
                if consistent {
                    debug!(dataset = %descriptor.name, id = %descriptor.id, "already registered");
                } else {
                    if bound_name.is_none() && bound_id.is_none() {
                        info!(dataset = %descriptor.name, id = %descriptor.id, "registering new dataset");
                    } else {
                        info!(dataset = %descriptor.name, id = %descriptor.id,
                            previous_name = ?bound_name, "dataset renamed");
                    }
                    // Drop stale inverse edges before rewriting the pair so
                    // the bijection holds at commit.
                    if let Some(old_name) = &bound_name {
                        if old_name != &name_str {
                            name_to_id.remove(old_name.as_str())?;
                        }
                    }
                    if let Some(old_id) = &bound_id {
                        if old_id != &id_str {
                            id_to_name.remove(old_id.as_str())?;
                        }
                    }
                    id_to_name.insert(id_str.as_str(), name_str.as_str())?;
                    name_to_id.insert(name_str.as_str(), id_str.as_str())?;
                }
            }
        }
        write_txn.commit()?;

        // Still under the barrier: bring up stores for identities first seen
        // in this batch. Creation is idempotent, so a crash between the
        // commit above and here is repaired by the next registration pass.
        for descriptor in descriptors {
            if !stores.contains_key(&descriptor.id) {
                let store = DatasetPolicyStore::open(&self.dir, descriptor.id)?;
                stores.insert(descriptor.id, Arc::new(store));
            }
        }

        for descriptor in descriptors {
            if let Some(policies) = &descriptor.policies {
                match stores.get(&descriptor.id) {
                    Some(store) => store.reconcile(policies)?,
                    None => error!(id = %descriptor.id, "policy store missing after registration"),
                }
            }
        }

        Ok(())
    }

    /// Remove an identity, its bijection entries, and its policy store.
    ///
    /// Identities are never garbage-collected implicitly: a dataset that
    /// disappears from the inventory keeps its id and store until an
    /// operator prunes it. Returns whether the identity existed.
    pub fn prune_identity(&self, id: DatasetId) -> RegistryResult<bool> {
        let mut stores = self.stores.write();

        let write_txn = self.env.begin_write()?;
        let name = {
            let mut name_to_id = write_txn.open_table(tables::NAME_TO_ID)?;
            let mut id_to_name = write_txn.open_table(tables::ID_TO_NAME)?;

            let name = id_to_name
                .remove(id.to_string().as_str())?
                .map(|g| g.value().to_owned());
            if let Some(name) = &name {
                name_to_id.remove(name.as_str())?;
            }
            name
        };
        write_txn.commit()?;

        let had_store = stores.remove(&id).is_some();

        let path = self.dir.join(store_file_name(id));
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let existed = name.is_some() || had_store;
        if existed {
            info!(%id, name = ?name, "identity pruned");
        }
        Ok(existed)
    }

    /// Handle to a dataset's policy store.
    #[must_use]
    pub fn policy_store(&self, id: DatasetId) -> Option<Arc<DatasetPolicyStore>> {
        self.stores.read().get(&id).cloned()
    }

    /// Every identity currently known to this registry.
    #[must_use]
    pub fn dataset_ids(&self) -> Vec<DatasetId> {
        self.stores.read().keys().copied().collect()
    }

    /// On-disk schema version.
    pub fn schema_version(&self) -> RegistryResult<u32> {
        let _shared = self.stores.read();
        let read_txn = self.env.begin_read()?;
        let meta = read_txn.open_table(tables::META)?;
        Ok(meta
            .get(tables::SCHEMA_VERSION_KEY)?
            .map_or(env::SCHEMA_VERSION, |g| g.value()))
    }

    /// Data directory this registry lives in.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.dir
    }
}

/// Allocate-or-return for one name inside an already-open transaction.
fn allocate_in_txn(
    name_to_id: &mut Table<'_, &'static str, &'static str>,
    id_to_name: &mut Table<'_, &'static str, &'static str>,
    name: &str,
) -> RegistryResult<DatasetId> {
    let existing = name_to_id.get(name)?.map(|g| g.value().to_owned());
    if let Some(raw) = existing {
        return raw.parse().map_err(|_| RegistryError::MalformedId {
            key: name.to_owned(),
            value: raw,
        });
    }

    let id = fresh_id(id_to_name)?;
    let id_str = id.to_string();
    env::insert_new(name_to_id, "name_to_id", name, id_str.as_str())?;
    env::insert_new(id_to_name, "id_to_name", &id_str, name)?;
    debug!(dataset = name, %id, "allocated id");
    Ok(id)
}

/// Draw ids until one is absent from `id_to_name`.
///
/// Collision odds are negligible at 128 bits, but correctness does not
/// depend on that: the registry always re-checks before committing.
fn fresh_id(id_to_name: &Table<'_, &'static str, &'static str>) -> RegistryResult<DatasetId> {
    loop {
        let id = DatasetId::new();
        if id_to_name.get(id.to_string().as_str())?.is_none() {
            return Ok(id);
        }
    }
}

/// Liveness probe for the exclusivity marker: signal 0 to the pid.
/// EPERM means the process exists but belongs to someone else, so alive.
fn process_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapkeep_common::DatasetKind;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn descriptor(id: DatasetId, name: &str, policies: &[&str]) -> DatasetDescriptor {
        descriptor_of_kind(DatasetKind::Filesystem, id, name, policies)
    }

    fn descriptor_of_kind(
        kind: DatasetKind,
        id: DatasetId,
        name: &str,
        policies: &[&str],
    ) -> DatasetDescriptor {
        let policies: HashSet<_> = policies.iter().map(|p| p.parse().unwrap()).collect();
        DatasetDescriptor {
            kind,
            id,
            name: name.parse().unwrap(),
            policies: if policies.is_empty() {
                None
            } else {
                Some(policies)
            },
        }
    }

    fn write_pid_marker(dir: &Path, pid: u32) {
        let db = Database::create(dir.join(APPLICATION_FILE)).unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut meta = txn.open_table(tables::META).unwrap();
            meta.insert(tables::PID_LOCK_KEY, pid).unwrap();
        }
        txn.commit().unwrap();
    }

    fn read_pid_marker(dir: &Path) -> Option<u32> {
        let db = Database::create(dir.join(APPLICATION_FILE)).unwrap();
        let txn = db.begin_read().unwrap();
        let meta = txn.open_table(tables::META).unwrap();
        let pid = meta.get(tables::PID_LOCK_KEY).unwrap().map(|g| g.value());
        pid
    }

    /// Pid of a process that has already exited and been reaped.
    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_allocate_id_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();

        let first = registry.allocate_id("tank/data").unwrap();
        let second = registry.allocate_id("tank/data").unwrap();
        assert_eq!(first, second);

        let other = registry.allocate_id("tank/other").unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_allocation_survives_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let registry = IdentityRegistry::open(dir.path(), false).unwrap();
            registry.allocate_id("tank/data").unwrap()
        };
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();
        assert_eq!(registry.allocate_id("tank/data").unwrap(), id);
        assert_eq!(registry.lookup_name(id).unwrap().as_deref(), Some("tank/data"));
    }

    #[test]
    fn test_allocate_ids_batch_covers_every_name() {
        let dir = tempdir().unwrap();
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();

        let existing = registry.allocate_id("tank/a").unwrap();
        let allocated = registry.allocate_ids(["tank/a", "tank/b", "tank/c"]).unwrap();
        assert_eq!(allocated.len(), 3);
        assert_eq!(allocated["tank/a"], existing);
        assert_ne!(allocated["tank/b"], allocated["tank/c"]);
    }

    #[test]
    fn test_bijection_holds_after_registration() {
        let dir = tempdir().unwrap();
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();

        let id = DatasetId::new();
        registry
            .register_all(&[descriptor(id, "tank/a", &[])])
            .unwrap();

        assert_eq!(registry.lookup_id("tank/a").unwrap(), Some(id));
        assert_eq!(registry.lookup_name(id).unwrap().as_deref(), Some("tank/a"));
    }

    #[test]
    fn test_rename_rewrites_both_directions() {
        let dir = tempdir().unwrap();
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();

        let id = DatasetId::new();
        registry
            .register_all(&[descriptor(id, "tank/a", &["[hourly](1h:24)"])])
            .unwrap();
        let policy_ids: Vec<_> = registry
            .policy_store(id)
            .unwrap()
            .policies()
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();

        registry
            .register_all(&[descriptor(id, "tank/b", &["[hourly](1h:24)"])])
            .unwrap();

        assert_eq!(registry.lookup_name(id).unwrap().as_deref(), Some("tank/b"));
        assert_eq!(registry.lookup_id("tank/b").unwrap(), Some(id));
        assert_eq!(registry.lookup_id("tank/a").unwrap(), None);

        // The policy store rides along with the identity across the rename.
        let after: Vec<_> = registry
            .policy_store(id)
            .unwrap()
            .policies()
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(policy_ids, after);
    }

    #[test]
    fn test_name_reassigned_to_new_identity_drops_old_edge() {
        let dir = tempdir().unwrap();
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();

        let old = DatasetId::new();
        let new = DatasetId::new();
        registry.register_all(&[descriptor(old, "tank/a", &[])]).unwrap();
        registry.register_all(&[descriptor(new, "tank/a", &[])]).unwrap();

        assert_eq!(registry.lookup_id("tank/a").unwrap(), Some(new));
        assert_eq!(registry.lookup_name(old).unwrap(), None);
        assert_eq!(registry.lookup_name(new).unwrap().as_deref(), Some("tank/a"));
    }

    #[test]
    fn test_snapshot_in_batch_rejects_everything() {
        let dir = tempdir().unwrap();
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();

        let valid = DatasetId::new();
        let result = registry.register_all(&[
            descriptor(valid, "tank/ok", &["[hourly](1h:24)"]),
            descriptor_of_kind(DatasetKind::Snapshot, DatasetId::new(), "tank/ok@snap", &[]),
        ]);
        assert!(matches!(
            result,
            Err(RegistryError::InvalidDatasetKind { kind: DatasetKind::Snapshot, .. })
        ));

        // Not even the valid leading descriptor was applied.
        assert_eq!(registry.lookup_id("tank/ok").unwrap(), None);
        assert!(registry.dataset_ids().is_empty());
        assert!(registry.policy_store(valid).is_none());
    }

    #[test]
    fn test_registration_creates_store_and_reconciles() {
        let dir = tempdir().unwrap();
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();

        let id = DatasetId::new();
        registry
            .register_all(&[descriptor(id, "tank/a", &["[hourly](1h:24)", "[daily](1d)"])])
            .unwrap();

        let store = registry.policy_store(id).unwrap();
        let mut policies = store.policies().unwrap();
        policies.sort_by(|a, b| a.label.cmp(&b.label));
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].label, "daily");
        assert_eq!(policies[1].label, "hourly");
        assert_eq!(policies[1].keep, Some(24));
    }

    #[test]
    fn test_reopen_loads_existing_policy_stores() {
        let dir = tempdir().unwrap();
        let id = DatasetId::new();
        {
            let registry = IdentityRegistry::open(dir.path(), false).unwrap();
            registry
                .register_all(&[descriptor(id, "tank/a", &["[hourly](1h:24)"])])
                .unwrap();
        }
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();
        assert_eq!(registry.dataset_ids(), vec![id]);
        let store = registry.policy_store(id).unwrap();
        assert_eq!(store.policies().unwrap().len(), 1);
    }

    #[test]
    fn test_live_marker_blocks_startup() {
        let dir = tempdir().unwrap();
        write_pid_marker(dir.path(), std::process::id());

        let result = IdentityRegistry::open(dir.path(), true);
        assert!(matches!(
            result,
            Err(RegistryError::ProcessAlreadyRunning { .. })
        ));
    }

    #[test]
    fn test_dead_marker_is_replaced() {
        let dir = tempdir().unwrap();
        let stale = dead_pid();
        write_pid_marker(dir.path(), stale);

        {
            let _registry = IdentityRegistry::open(dir.path(), true).unwrap();
        }
        assert_eq!(read_pid_marker(dir.path()), Some(std::process::id()));
    }

    #[test]
    fn test_open_without_lock_ignores_marker() {
        let dir = tempdir().unwrap();
        write_pid_marker(dir.path(), std::process::id());

        let registry = IdentityRegistry::open(dir.path(), false).unwrap();
        assert_eq!(registry.schema_version().unwrap(), 0);
    }

    #[test]
    fn test_prune_identity_removes_everything() {
        let dir = tempdir().unwrap();
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();

        let id = DatasetId::new();
        registry
            .register_all(&[descriptor(id, "tank/a", &["[hourly](1h:24)"])])
            .unwrap();
        let store_path = dir.path().join(store_file_name(id));
        assert!(store_path.exists());

        assert!(registry.prune_identity(id).unwrap());
        assert_eq!(registry.lookup_id("tank/a").unwrap(), None);
        assert_eq!(registry.lookup_name(id).unwrap(), None);
        assert!(registry.policy_store(id).is_none());
        assert!(!store_path.exists());

        // Second prune is a no-op.
        assert!(!registry.prune_identity(id).unwrap());
    }

    #[test]
    fn test_registration_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = IdentityRegistry::open(dir.path(), false).unwrap();

        let id = DatasetId::new();
        let batch = [descriptor(id, "tank/a", &["[hourly](1h:24)"])];
        registry.register_all(&batch).unwrap();
        let before: Vec<_> = registry.policy_store(id).unwrap().policies().unwrap();
        registry.register_all(&batch).unwrap();
        let after: Vec<_> = registry.policy_store(id).unwrap().policies().unwrap();
        assert_eq!(before, after);
    }
}

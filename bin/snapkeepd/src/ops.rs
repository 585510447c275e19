//! Operator workflows wiring the inventory feed to the registry.

use anyhow::{Context, Result, anyhow, bail};
use snapkeep_common::{Config, DatasetDescriptor, DatasetId, DatasetKind, DatasetName};
use snapkeep_registry::{IdentityRegistry, StoredPolicy};
use snapkeep_zfs::Zfs;
use tracing::{info, warn};

/// Outcome of one sync pass.
pub struct SyncSummary {
    /// Datasets of any kind reported by the inventory
    pub seen: usize,
    /// Filesystems/volumes registered this pass
    pub registered: usize,
    /// Datasets that received a fresh identity this pass
    pub tagged: usize,
}

/// One full pass: list the inventory, tag every untagged filesystem or
/// volume, and register the whole observed set.
///
/// Tagging is the two-step identity protocol: the registry allocates the
/// id (idempotently, so a crash between allocate and assign retries
/// cleanly), then the id is persisted onto the dataset as a user property.
pub fn sync_once(registry: &IdentityRegistry, zfs: &Zfs) -> Result<SyncSummary> {
    let inventory = zfs.inventory().context("listing datasets")?;

    let mut tagged = 0usize;
    let mut descriptors: Vec<DatasetDescriptor> = Vec::new();
    for dataset in &inventory {
        if !dataset.kind.is_registrable() {
            continue;
        }
        if let Some(descriptor) = dataset.to_descriptor() {
            descriptors.push(descriptor);
        } else {
            let name = dataset.name.to_string();
            let id = registry.allocate_id(&name)?;
            zfs.assign_id(&dataset.name, id)
                .with_context(|| format!("tagging {name}"))?;
            info!(dataset = %dataset.name, %id, "tagged dataset");
            tagged += 1;
            descriptors.push(DatasetDescriptor {
                kind: dataset.kind,
                id,
                name: dataset.name.clone(),
                policies: dataset.policies.clone(),
            });
        }
    }

    registry
        .register_all(&descriptors)
        .context("registering inventory batch")?;

    Ok(SyncSummary {
        seen: inventory.len(),
        registered: descriptors.len(),
        tagged,
    })
}

/// Tag untagged filesystems/volumes without registering anything.
pub fn tag_once(registry: &IdentityRegistry, zfs: &Zfs) -> Result<usize> {
    let inventory = zfs.inventory().context("listing datasets")?;

    let mut tagged = 0usize;
    for dataset in &inventory {
        if !dataset.kind.is_registrable() || dataset.id.is_some() {
            continue;
        }
        let name = dataset.name.to_string();
        let id = registry.allocate_id(&name)?;
        zfs.assign_id(&dataset.name, id)
            .with_context(|| format!("tagging {name}"))?;
        info!(dataset = %dataset.name, %id, "tagged dataset");
        tagged += 1;
    }
    Ok(tagged)
}

/// Stored policy set for a dataset name.
pub fn stored_policies(registry: &IdentityRegistry, dataset: &str) -> Result<Vec<StoredPolicy>> {
    let id = registry
        .lookup_id(dataset)?
        .ok_or_else(|| anyhow!("no identity registered for '{dataset}'"))?;
    let store = registry
        .policy_store(id)
        .ok_or_else(|| anyhow!("no policy store for '{dataset}'"))?;
    Ok(store.policies()?)
}

/// Take one snapshot per stored policy and record which policy produced it.
///
/// This is the manual entry point of the snapshot-creation workflow; the
/// association it writes is what later lets retention relate snapshots back
/// to the policy that produced them.
pub fn snap_dataset(
    registry: &IdentityRegistry,
    zfs: &Zfs,
    config: &Config,
    dataset: &str,
    recursive: bool,
) -> Result<usize> {
    let name: DatasetName = dataset
        .parse()
        .with_context(|| format!("parsing dataset name '{dataset}'"))?;
    let id = registry
        .lookup_id(&name.to_string())?
        .ok_or_else(|| anyhow!("no identity registered for '{dataset}'"))?;
    let store = registry
        .policy_store(id)
        .ok_or_else(|| anyhow!("no policy store for '{dataset}'"))?;

    let policies = store.policies()?;
    if policies.is_empty() {
        bail!("no policies stored for '{dataset}'");
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H:%M:%S");
    let mut created = Vec::new();
    for policy in &policies {
        let snap_name = format!("{}{}_{}", config.snapshot_prefix, policy.label, timestamp);
        zfs.take_snapshot(&name, &snap_name, recursive)
            .with_context(|| format!("snapshotting {dataset}@{snap_name}"))?;
        info!(dataset = %name, snapshot = snap_name, policy = %policy.id, "snapshot taken");
        created.push((snap_name, policy.id));
    }

    // One listing pass resolves the guids zfs assigned to the new snapshots.
    let inventory = zfs.inventory().context("listing snapshots")?;
    for (snap_name, policy_id) in created {
        let full = name.with_snapshot(snap_name.as_str());
        match inventory
            .iter()
            .find(|d| d.kind == DatasetKind::Snapshot && d.name == full)
        {
            Some(snapshot) => store.record_snapshot(&snapshot.guid, policy_id)?,
            None => warn!(snapshot = %full, "snapshot missing from inventory, association not recorded"),
        }
    }

    Ok(policies.len())
}

/// Prune an identity given a dataset name or a rendered id.
pub fn prune_target(registry: &IdentityRegistry, target: &str) -> Result<bool> {
    let id = if let Ok(id) = target.parse::<DatasetId>() {
        id
    } else {
        match registry.lookup_id(target)? {
            Some(id) => id,
            None => return Ok(false),
        }
    };
    Ok(registry.prune_identity(id)?)
}

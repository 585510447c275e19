//! Redb table definitions for the registry and per-dataset environments.

use redb::TableDefinition;

// Identity registry environment (application.redb)
pub const NAME_TO_ID: TableDefinition<&str, &str> = TableDefinition::new("name_to_id");
pub const ID_TO_NAME: TableDefinition<&str, &str> = TableDefinition::new("id_to_name");
pub const META: TableDefinition<&str, u32> = TableDefinition::new("metadata");

// Per-dataset policy environment (ds_<id>.redb)
// Key: 32-byte policy fingerprint, Value: policy id
pub const HASH_TO_POLICY_ID: TableDefinition<&[u8], &str> =
    TableDefinition::new("hash_to_policy_id");
pub const POLICY_LABEL: TableDefinition<&str, &str> = TableDefinition::new("policy_label");
pub const POLICY_INTERVAL_SECS: TableDefinition<&str, f64> =
    TableDefinition::new("policy_interval_secs");
// Sparse: absent when the policy keeps snapshots without limit
pub const POLICY_KEEP: TableDefinition<&str, u64> = TableDefinition::new("policy_keep");
// Key: snapshot guid, Value: policy id. Append-only from outside the
// reconciliation path; never touched by reconcile.
pub const SNAPSHOT_POLICY: TableDefinition<&str, &str> = TableDefinition::new("snapshot_policy");
pub const DS_META: TableDefinition<&str, u32> = TableDefinition::new("metadata");

// Metadata keys
pub const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const PID_LOCK_KEY: &str = "daemon_pid_lock";

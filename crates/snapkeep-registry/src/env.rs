//! Helpers shared by the registry and per-dataset environments.
//!
//! Each environment is one redb file with its own transaction domain. There
//! is no cross-environment transaction anywhere in this crate; callers
//! compensate with ordering under the registry's write barrier.

use crate::error::{RegistryError, RegistryResult};
use crate::tables;
use redb::{Database, ReadableTable, Table};
use std::fs;
use std::path::Path;

/// Current on-disk schema version, written once when an environment is
/// first created and never overwritten after that.
pub(crate) const SCHEMA_VERSION: u32 = 0;

/// Open or create an environment file, creating parent directories.
pub(crate) fn open_env(path: &Path) -> RegistryResult<Database> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(Database::create(path)?)
}

/// Insert with fail-if-exists semantics.
///
/// redb's `insert` overwrites and hands back the previous value; a previous
/// value here means the caller was about to clobber state it believed fresh.
pub(crate) fn insert_new<'v, V>(
    table: &mut Table<'_, &'static str, V>,
    table_name: &'static str,
    key: &str,
    value: impl std::borrow::Borrow<V::SelfType<'v>>,
) -> RegistryResult<()>
where
    V: redb::Value + 'static,
{
    if table.insert(key, value)?.is_some() {
        return Err(RegistryError::KeyExists {
            table: table_name,
            key: key.to_owned(),
        });
    }
    Ok(())
}

/// Fail-if-exists insert for the fingerprint table (byte-slice keys).
pub(crate) fn insert_new_digest(
    table: &mut Table<'_, &'static [u8], &'static str>,
    table_name: &'static str,
    digest: &[u8],
    value: &str,
) -> RegistryResult<()> {
    if table.insert(digest, value)?.is_some() {
        return Err(RegistryError::KeyExists {
            table: table_name,
            key: hex::encode(digest),
        });
    }
    Ok(())
}

/// Read the schema version, writing the initial version only when the key
/// is absent. An existing version is never overwritten.
pub(crate) fn ensure_schema_version(
    meta: &mut Table<'_, &'static str, u32>,
) -> RegistryResult<u32> {
    let existing = meta.get(tables::SCHEMA_VERSION_KEY)?.map(|guard| guard.value());
    match existing {
        Some(version) => Ok(version),
        None => {
            meta.insert(tables::SCHEMA_VERSION_KEY, SCHEMA_VERSION)?;
            Ok(SCHEMA_VERSION)
        }
    }
}

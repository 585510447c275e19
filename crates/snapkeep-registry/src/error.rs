//! Error type for registry operations

use snapkeep_common::DatasetKind;

/// Error type for identity registry and policy store operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Another live process on this host holds the exclusivity marker.
    /// Fatal to startup; not retried.
    #[error("another snapkeep process (pid {pid}) already owns this store")]
    ProcessAlreadyRunning { pid: u32 },

    /// A registration batch contained a snapshot or bookmark. The whole
    /// batch is rejected; nothing is committed.
    #[error("dataset '{name}' has unregistrable kind '{kind}'")]
    InvalidDatasetKind { kind: DatasetKind, name: String },

    /// A fail-if-exists write found the key already present. This is an
    /// invariant breach, not an expected branch.
    #[error("key already exists in {table}: {key}")]
    KeyExists { table: &'static str, key: String },

    /// A stored id failed to parse back. Only possible through external
    /// modification of the store files.
    #[error("malformed id stored for '{key}': {value}")]
    MalformedId { key: String, value: String },

    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for RegistryError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

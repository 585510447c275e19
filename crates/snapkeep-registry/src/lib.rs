//! Snapkeep Registry - persistent identity and policy store
//!
//! Gives each dataset a stable identity that survives renames and durably
//! tracks the snapshot policies declared on it. Backed by redb: one
//! environment file for the name↔id registry, one per dataset identity for
//! its policy set. The environments are independently transactional; a
//! process-wide write barrier provides the single consistent write path
//! across them.

mod env;
mod tables;

pub mod error;
pub mod fingerprint;
pub mod policy_store;
pub mod registry;

// Re-exports
pub use error::{RegistryError, RegistryResult};
pub use policy_store::{DatasetPolicyStore, StoredPolicy};
pub use registry::IdentityRegistry;

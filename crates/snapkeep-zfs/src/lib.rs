//! Snapkeep ZFS - dataset inventory feed
//!
//! Thin synchronous shell-out layer over the `zfs`/`zpool` command-line
//! tools. Produces the dataset descriptors the identity registry consumes;
//! no libzfs bindings, the CLI output format is the contract.

mod exec;

pub mod error;
pub mod inventory;
pub mod pool;

pub use error::ZfsError;
pub use inventory::{Dataset, Zfs};
pub use pool::{Pool, PoolHealth, pools};

//! Policy fingerprint codec.
//!
//! A policy's storage identity is the SHA-256 of its canonical rendered
//! form. The canonical form covers label, multiplier, and unit only; the
//! keep count is deliberately excluded, so editing retention on an
//! otherwise-identical policy keeps its id while any structural edit
//! (including relabeling) allocates a new one.

use sha2::{Digest, Sha256};
use snapkeep_common::PolicyDeclaration;

/// Width of a policy fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// Canonical textual form of a policy's structural fields.
///
/// This is the declaration's rendered form minus any `:keep` suffix.
#[must_use]
pub fn canonical_form(policy: &PolicyDeclaration) -> String {
    format!("[{}]({}{})", policy.label, policy.multiplier, policy.unit)
}

/// Content fingerprint of a policy's structural fields.
#[must_use]
pub fn fingerprint(policy: &PolicyDeclaration) -> [u8; FINGERPRINT_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(canonical_form(policy).as_bytes());
    hasher.finalize().into()
}

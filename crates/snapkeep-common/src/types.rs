//! Core type definitions for Snapkeep
//!
//! This module defines the fundamental value types used throughout the
//! system: stable identifiers, dataset naming, and the snapshot-policy
//! declaration mini-language.

use crate::error::{KindParseError, NameParseError, PolicyParseError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

/// Stable opaque identifier for a dataset.
///
/// Assigned once when a dataset is first registered and persisted back onto
/// the dataset itself as a user property, so it survives renames.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(Uuid);

impl DatasetId {
    /// Generate a new random dataset ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DatasetId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for DatasetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Debug for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetId({})", self.0)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a stored policy, scoped to one dataset's policy store.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display, derive_more::From,
)]
pub struct PolicyId(Uuid);

impl PolicyId {
    /// Generate a new random policy ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PolicyId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for PolicyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Debug for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PolicyId({})", self.0)
    }
}

/// The four kinds of ZFS dataset.
///
/// Only filesystems and volumes are eligible for identity registration;
/// snapshots and bookmarks are derived objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Filesystem,
    Volume,
    Snapshot,
    Bookmark,
}

impl DatasetKind {
    /// Whether this kind may be registered in the identity registry
    #[must_use]
    pub const fn is_registrable(self) -> bool {
        matches!(self, Self::Filesystem | Self::Volume)
    }
}

impl FromStr for DatasetKind {
    type Err = KindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "filesystem" => Ok(Self::Filesystem),
            "volume" => Ok(Self::Volume),
            "snapshot" => Ok(Self::Snapshot),
            "bookmark" => Ok(Self::Bookmark),
            other => Err(KindParseError(other.to_owned())),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Filesystem => "filesystem",
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
            Self::Bookmark => "bookmark",
        };
        f.write_str(s)
    }
}

/// A parsed hierarchical dataset name.
///
/// `pool/path/to/dataset`, optionally suffixed with `@snapshot` or
/// `#bookmark`. The rendered (consolidated) form is the `Display` impl.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatasetName {
    components: Vec<String>,
    snapshot: Option<String>,
    bookmark: Option<String>,
}

impl DatasetName {
    /// Pool the dataset lives in (first path component)
    #[must_use]
    pub fn pool(&self) -> &str {
        &self.components[0]
    }

    /// Path components, pool first
    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Snapshot suffix, if this names a snapshot
    #[must_use]
    pub fn snapshot(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    /// Bookmark suffix, if this names a bookmark
    #[must_use]
    pub fn bookmark(&self) -> Option<&str> {
        self.bookmark.as_deref()
    }

    /// The same name with any snapshot/bookmark suffix stripped
    #[must_use]
    pub fn base(&self) -> Self {
        Self {
            components: self.components.clone(),
            snapshot: None,
            bookmark: None,
        }
    }

    /// The same name pointing at the given snapshot
    #[must_use]
    pub fn with_snapshot(&self, snapshot: impl Into<String>) -> Self {
        Self {
            components: self.components.clone(),
            snapshot: Some(snapshot.into()),
            bookmark: None,
        }
    }
}

impl FromStr for DatasetName {
    type Err = NameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(NameParseError::Empty);
        }

        let mut base = s;
        let mut snapshot = None;
        let mut bookmark = None;

        if let Some((head, snap)) = base.split_once('@') {
            if snap.contains('@') {
                return Err(NameParseError::MultipleSnapshotDelimiters(s.to_owned()));
            }
            base = head;
            snapshot = Some(snap.to_owned());
        }
        if let Some((head, mark)) = base.split_once('#') {
            if mark.contains('#') {
                return Err(NameParseError::MultipleBookmarkDelimiters(s.to_owned()));
            }
            base = head;
            bookmark = Some(mark.to_owned());
        }
        if snapshot.is_some() && bookmark.is_some() {
            return Err(NameParseError::SnapshotAndBookmark(s.to_owned()));
        }

        let components: Vec<String> = base.split('/').map(str::to_owned).collect();
        if components.iter().any(String::is_empty) {
            return Err(NameParseError::EmptyComponent(s.to_owned()));
        }

        Ok(Self {
            components,
            snapshot,
            bookmark,
        })
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))?;
        if let Some(snap) = &self.snapshot {
            write!(f, "@{snap}")?;
        }
        if let Some(mark) = &self.bookmark {
            write!(f, "#{mark}")?;
        }
        Ok(())
    }
}

impl Serialize for DatasetName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Base unit of a policy's snapshot interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl IntervalUnit {
    /// Fixed seconds-per-unit conversion table
    #[must_use]
    pub const fn seconds(self) -> f64 {
        match self {
            Self::Month => 2_629_800.0,
            Self::Day => 86_400.0,
            Self::Hour => 3_600.0,
            Self::Minute => 60.0,
            Self::Second => 1.0,
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = KindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mo" => Ok(Self::Month),
            "d" => Ok(Self::Day),
            "h" => Ok(Self::Hour),
            "m" | "mi" => Ok(Self::Minute),
            "s" => Ok(Self::Second),
            other => Err(KindParseError(other.to_owned())),
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Month => "mo",
            Self::Day => "d",
            Self::Hour => "h",
            Self::Minute => "mi",
            Self::Second => "s",
        };
        f.write_str(s)
    }
}

/// One declared snapshot policy: a labeled cadence plus an optional
/// retention count.
///
/// Written by operators as `[label](interval[:keep])`, e.g. `[hourly](1h:24)`
/// for "snapshot every hour, keep the last 24".
///
/// Equality and hashing cover the *structural* fields only (label, unit,
/// multiplier); `keep` is an attribute of the policy, not part of its
/// identity. Relabeling therefore produces a different policy while changing
/// only the keep count does not.
#[derive(Clone, Debug, Serialize)]
pub struct PolicyDeclaration {
    /// Operator-chosen label, embedded in snapshot names
    pub label: String,
    /// Base unit of the snapshot interval
    pub unit: IntervalUnit,
    /// Multiplier applied to the unit (`2.5` in `2.5h`)
    pub multiplier: f64,
    /// Maximum number of snapshots to retain, unlimited when absent
    pub keep: Option<u64>,
}

impl PolicyDeclaration {
    /// The declared cadence as an absolute duration in seconds
    #[must_use]
    pub fn interval_seconds(&self) -> f64 {
        self.multiplier * self.unit.seconds()
    }
}

impl PartialEq for PolicyDeclaration {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.unit == other.unit
            && self.multiplier.to_bits() == other.multiplier.to_bits()
    }
}

impl Eq for PolicyDeclaration {}

impl Hash for PolicyDeclaration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.label.hash(state);
        self.unit.hash(state);
        self.multiplier.to_bits().hash(state);
    }
}

impl fmt::Display for PolicyDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]({}{}", self.label, self.multiplier, self.unit)?;
        if let Some(keep) = self.keep {
            write!(f, ":{keep}")?;
        }
        f.write_str(")")
    }
}

impl FromStr for PolicyDeclaration {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let rest = s.strip_prefix('[').ok_or(PolicyParseError::MissingLabel)?;
        let (label, rest) = rest
            .split_once("](")
            .ok_or(PolicyParseError::MissingLabel)?;
        let body = rest
            .strip_suffix(')')
            .ok_or(PolicyParseError::MissingInterval)?;

        let (interval, keep) = match body.split_once(':') {
            Some((interval, keep_str)) => {
                let keep = keep_str
                    .parse::<u64>()
                    .map_err(|_| PolicyParseError::InvalidKeep(keep_str.to_owned()))?;
                (interval, Some(keep))
            }
            None => (body, None),
        };

        let unit_at = interval
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| PolicyParseError::InvalidInterval(interval.to_owned()))?;
        let (value, unit) = interval.split_at(unit_at);
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(PolicyParseError::InvalidInterval(interval.to_owned()));
        }
        let multiplier: f64 = value
            .parse()
            .map_err(|_| PolicyParseError::InvalidInterval(interval.to_owned()))?;
        let unit: IntervalUnit = unit
            .parse()
            .map_err(|_| PolicyParseError::InvalidInterval(interval.to_owned()))?;

        Ok(Self {
            label: label.to_owned(),
            unit,
            multiplier,
            keep,
        })
    }
}

/// Parse a `;`-separated property value into a policy set.
///
/// Malformed members are logged and skipped; a property carrying any valid
/// declaration still contributes those.
#[must_use]
pub fn parse_policy_set(raw: &str) -> HashSet<PolicyDeclaration> {
    let mut set = HashSet::new();
    for member in raw.split(';') {
        if member.trim().is_empty() {
            continue;
        }
        match member.parse::<PolicyDeclaration>() {
            Ok(policy) => {
                set.insert(policy);
            }
            Err(e) => warn!(member, error = %e, "skipping malformed policy declaration"),
        }
    }
    set
}

/// One dataset as observed by the inventory feed, ready for registration.
///
/// Only produced for datasets that already carry a persisted identity;
/// untagged datasets go through the allocate-then-tag protocol first.
#[derive(Clone, Debug)]
pub struct DatasetDescriptor {
    /// Dataset kind; only filesystems and volumes are registrable
    pub kind: DatasetKind,
    /// The stable identity persisted on the dataset
    pub id: DatasetId,
    /// Hierarchical name at observation time
    pub name: DatasetName,
    /// Declared policy set, absent when the dataset declares none
    pub policies: Option<HashSet<PolicyDeclaration>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_name_round_trip() {
        let name: DatasetName = "tank/vm/disk0".parse().unwrap();
        assert_eq!(name.pool(), "tank");
        assert_eq!(name.components().len(), 3);
        assert_eq!(name.to_string(), "tank/vm/disk0");

        let snap: DatasetName = "tank/vm@nightly".parse().unwrap();
        assert_eq!(snap.snapshot(), Some("nightly"));
        assert_eq!(snap.base().to_string(), "tank/vm");
        assert_eq!(snap.to_string(), "tank/vm@nightly");

        let mark: DatasetName = "tank/vm#head".parse().unwrap();
        assert_eq!(mark.bookmark(), Some("head"));
    }

    #[test]
    fn test_dataset_name_rejects_malformed() {
        assert!("".parse::<DatasetName>().is_err());
        assert!("tank//child".parse::<DatasetName>().is_err());
        assert!("tank@a@b".parse::<DatasetName>().is_err());
        assert!("tank@snap#mark".parse::<DatasetName>().is_err());
    }

    #[test]
    fn test_policy_parse_with_keep() {
        let policy: PolicyDeclaration = "[hourly](1h:24)".parse().unwrap();
        assert_eq!(policy.label, "hourly");
        assert_eq!(policy.unit, IntervalUnit::Hour);
        assert_eq!(policy.multiplier, 1.0);
        assert_eq!(policy.keep, Some(24));
        assert_eq!(policy.interval_seconds(), 3600.0);
    }

    #[test]
    fn test_policy_parse_fractional_without_keep() {
        let policy: PolicyDeclaration = "[often](2.5s)".parse().unwrap();
        assert_eq!(policy.unit, IntervalUnit::Second);
        assert_eq!(policy.multiplier, 2.5);
        assert_eq!(policy.keep, None);
        assert_eq!(policy.interval_seconds(), 2.5);
    }

    #[test]
    fn test_policy_parse_rejects_malformed() {
        assert!("hourly](1h)".parse::<PolicyDeclaration>().is_err());
        assert!("[hourly](1h".parse::<PolicyDeclaration>().is_err());
        assert!("[hourly](h)".parse::<PolicyDeclaration>().is_err());
        assert!("[hourly](-1h)".parse::<PolicyDeclaration>().is_err());
        assert!("[hourly](1x)".parse::<PolicyDeclaration>().is_err());
        assert!("[hourly](1h:lots)".parse::<PolicyDeclaration>().is_err());
    }

    #[test]
    fn test_policy_display_round_trip() {
        for raw in ["[hourly](1h:24)", "[monthly](1.5mo)", "[fast](30s:100)"] {
            let policy: PolicyDeclaration = raw.parse().unwrap();
            assert_eq!(policy.to_string(), raw);
        }
    }

    #[test]
    fn test_policy_identity_excludes_keep() {
        let a: PolicyDeclaration = "[hourly](1h:24)".parse().unwrap();
        let b: PolicyDeclaration = "[hourly](1h:48)".parse().unwrap();
        let c: PolicyDeclaration = "[hourly2](1h:24)".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_parse_policy_set_skips_malformed_members() {
        let set = parse_policy_set("[hourly](1h:24);garbage;[daily](1d)");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_interval_unit_short_forms() {
        assert_eq!("mo".parse::<IntervalUnit>().unwrap(), IntervalUnit::Month);
        assert_eq!("m".parse::<IntervalUnit>().unwrap(), IntervalUnit::Minute);
        assert_eq!("mi".parse::<IntervalUnit>().unwrap(), IntervalUnit::Minute);
        assert_eq!(IntervalUnit::Month.seconds(), 2_629_800.0);
        assert!("w".parse::<IntervalUnit>().is_err());
    }

    #[test]
    fn test_dataset_kind_registrable() {
        assert!(DatasetKind::Filesystem.is_registrable());
        assert!(DatasetKind::Volume.is_registrable());
        assert!(!"snapshot".parse::<DatasetKind>().unwrap().is_registrable());
        assert!(!"bookmark".parse::<DatasetKind>().unwrap().is_registrable());
    }

    #[test]
    fn test_dataset_id_round_trip() {
        let id = DatasetId::new();
        let parsed: DatasetId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<DatasetId>().is_err());
    }
}

//! Parse error types for Snapkeep value types.

use thiserror::Error;

/// Failure to parse a dataset name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameParseError {
    #[error("empty dataset name")]
    Empty,

    #[error("empty path component in dataset name: {0}")]
    EmptyComponent(String),

    #[error("more than one '@' in dataset name: {0}")]
    MultipleSnapshotDelimiters(String),

    #[error("more than one '#' in dataset name: {0}")]
    MultipleBookmarkDelimiters(String),

    #[error("dataset name carries both a snapshot and a bookmark suffix: {0}")]
    SnapshotAndBookmark(String),
}

/// Failure to parse a single policy declaration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyParseError {
    #[error("no [label] found in policy declaration")]
    MissingLabel,

    #[error("no (interval) found in policy declaration")]
    MissingInterval,

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid keep count: {0}")]
    InvalidKeep(String),
}

/// Failure to parse a dataset kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized dataset kind: {0}")]
pub struct KindParseError(pub String);

//! Core types for snapm: snapshot status, identities and mount specifications

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use uuid::{uuid, Uuid};

/// Namespace for snapshot set identities
pub const NAMESPACE_SNAPSHOT_SET: Uuid = uuid!("952f0e38-24a1-406d-adf6-0e9fb3c707d8");

/// Namespace for snapshot identities
pub const NAMESPACE_SNAPSHOT: Uuid = uuid!("c17d07c7-1482-43b7-9b3c-12d490622d93");

/// Characters that may not appear in a snapshot set name.
///
/// `_` is reserved as the field separator of encoded snapshot names.
const INVALID_SNAPSET_CHARS: [char; 4] = ['/', '\\', '_', ' '];

/// Derive the UUID of a snapshot set from its name and timestamp
pub fn snapset_uuid(name: &str, timestamp: u64) -> Uuid {
    Uuid::new_v5(
        &NAMESPACE_SNAPSHOT_SET,
        format!("{}{}", name, timestamp).as_bytes(),
    )
}

/// Derive the UUID of a snapshot from its backend name
pub fn snapshot_uuid(name: &str) -> Uuid {
    Uuid::new_v5(&NAMESPACE_SNAPSHOT, name.as_bytes())
}

/// Check that `name` is usable as a snapshot set name
pub fn validate_snapset_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier(
            "Snapshot set name cannot be empty".to_string(),
        ));
    }
    if let Some(c) = name.chars().find(|c| INVALID_SNAPSET_CHARS.contains(c)) {
        return Err(Error::InvalidIdentifier(format!(
            "Snapshot set name cannot include '{}'",
            c
        )));
    }
    Ok(())
}

/// Status of a snapshot or snapshot set
///
/// Variants are ordered from best to worst, so the status of a group is the
/// maximum of its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SnapStatus {
    Active,
    Inactive,
    Invalid,
}

impl SnapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapStatus::Active => "Active",
            SnapStatus::Inactive => "Inactive",
            SnapStatus::Invalid => "Invalid",
        }
    }
}

impl fmt::Display for SnapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque size policy handed to the provider that snapshots a mount point
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SizePolicy(String);

impl SizePolicy {
    pub fn new(policy: impl Into<String>) -> Self {
        SizePolicy(policy.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mount point to include in a new snapshot set, with an optional size policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub mount_point: PathBuf,
    pub size_policy: Option<SizePolicy>,
}

impl MountSpec {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        MountSpec {
            mount_point: mount_point.into(),
            size_policy: None,
        }
    }

    pub fn with_policy(mount_point: impl Into<PathBuf>, policy: impl Into<String>) -> Self {
        MountSpec {
            mount_point: mount_point.into(),
            size_policy: Some(SizePolicy::new(policy)),
        }
    }
}

impl FromStr for MountSpec {
    type Err = Error;

    /// Parse `MOUNT_POINT[:SIZE_POLICY]`
    fn from_str(s: &str) -> Result<Self> {
        let (mount_point, policy) = match s.split_once(':') {
            Some((mp, policy)) => (mp, Some(policy)),
            None => (s, None),
        };
        if mount_point.is_empty() {
            return Err(Error::Path(format!("Empty mount point in '{}'", s)));
        }
        match policy {
            Some("") => Err(Error::InvalidIdentifier(format!(
                "Empty size policy in '{}'",
                s
            ))),
            Some(policy) => Ok(MountSpec::with_policy(mount_point, policy)),
            None => Ok(MountSpec::new(mount_point)),
        }
    }
}

/// Lexically normalise a path: collapse repeated separators, drop `.` and
/// resolve `..` without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Result of a best-effort operation fanned out over many snapshots.
///
/// Member failures are collected rather than aborting the batch.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Number of objects the operation succeeded on
    pub affected: usize,
    /// Failures encountered along the way
    pub errors: Vec<Error>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no member failed
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Count a success or keep the error
    pub fn record(&mut self, result: Result<()>) {
        match result {
            Ok(()) => self.affected += 1,
            Err(e) => self.errors.push(e),
        }
    }
}

/// Format an epoch timestamp as local time
pub fn format_time(timestamp: u64) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetDateTime::from_unix_timestamp(timestamp as i64)
        .ok()
        .and_then(|t| t.to_offset(offset).format(&format).ok())
        .unwrap_or_else(|| timestamp.to_string())
}

//! Selection criteria for snapshot sets and snapshots

use crate::error::{Error, Result};
use crate::snapshot::{Snapshot, SnapshotSet};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Partial-match criteria for snapshot sets and snapshots.
///
/// Unset fields impose no constraint, so `Selection::default()` matches
/// everything. Set-level fields apply to snapshot sets; snapshot-level
/// fields apply to the members of a set, which must also satisfy the
/// set-level fields through their owning set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    // Snapshot set fields
    pub name: Option<String>,
    pub uuid: Option<Uuid>,
    pub timestamp: Option<u64>,
    pub nr_snapshots: Option<usize>,
    pub mount_points: Option<Vec<PathBuf>>,

    // Snapshot fields
    pub origin: Option<String>,
    pub mount_point: Option<PathBuf>,
    pub snapshot_name: Option<String>,
    pub snapshot_uuid: Option<Uuid>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Selection {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_uuid(uuid: Uuid) -> Self {
        Selection {
            uuid: Some(uuid),
            ..Self::default()
        }
    }

    /// Build a selection from a free-form identifier: a string that parses
    /// as a UUID selects by uuid, anything else selects by name.
    pub fn from_identifier(identifier: &str) -> Self {
        match Uuid::parse_str(identifier) {
            Ok(uuid) => Self::by_uuid(uuid),
            Err(_) => Self::by_name(identifier),
        }
    }

    /// Parse a UUID given explicitly by the user
    pub fn parse_uuid(value: &str) -> Result<Uuid> {
        Uuid::parse_str(value)
            .map_err(|_| Error::InvalidIdentifier(format!("Invalid UUID: '{}'", value)))
    }

    fn set_fields(&self) -> [(&'static str, bool); 5] {
        [
            ("name", self.name.is_some()),
            ("uuid", self.uuid.is_some()),
            ("timestamp", self.timestamp.is_some()),
            ("nr_snapshots", self.nr_snapshots.is_some()),
            ("mount_points", self.mount_points.is_some()),
        ]
    }

    fn snapshot_fields(&self) -> [(&'static str, bool); 4] {
        [
            ("origin", self.origin.is_some()),
            ("mount_point", self.mount_point.is_some()),
            ("snapshot_name", self.snapshot_name.is_some()),
            ("snapshot_uuid", self.snapshot_uuid.is_some()),
        ]
    }

    /// True if no criteria are set
    pub fn is_null(&self) -> bool {
        !self
            .set_fields()
            .iter()
            .chain(self.snapshot_fields().iter())
            .any(|(_, set)| *set)
    }

    /// True if this selection identifies a single snapshot set
    pub fn is_single(&self) -> bool {
        self.name.is_some() || self.uuid.is_some()
    }

    /// Reject criteria that do not apply to the requested object types
    pub fn check_valid_selection(&self, snapshot_set: bool, snapshot: bool) -> Result<()> {
        let mut invalid = Vec::new();
        if !snapshot_set {
            invalid.extend(self.set_fields().iter().filter(|(_, s)| *s).map(|(n, _)| *n));
        }
        if !snapshot {
            invalid.extend(
                self.snapshot_fields()
                    .iter()
                    .filter(|(_, s)| *s)
                    .map(|(n, _)| *n),
            );
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidIdentifier(format!(
                "Invalid criteria for selection type: {}",
                invalid.join(", ")
            )))
        }
    }

    /// Test a snapshot set against the set-level criteria
    pub fn matches_snapshot_set(&self, snapset: &SnapshotSet) -> bool {
        if let Some(name) = &self.name {
            if name != snapset.name() {
                return false;
            }
        }
        if let Some(uuid) = &self.uuid {
            if *uuid != snapset.uuid() {
                return false;
            }
        }
        if let Some(timestamp) = self.timestamp {
            if timestamp != snapset.timestamp() {
                return false;
            }
        }
        if let Some(nr) = self.nr_snapshots {
            if nr != snapset.nr_snapshots() {
                return false;
            }
        }
        if let Some(mount_points) = &self.mount_points {
            let mut wanted: Vec<&Path> = mount_points.iter().map(PathBuf::as_path).collect();
            let mut have: Vec<&Path> = snapset.mount_points();
            wanted.sort();
            have.sort();
            if wanted != have {
                return false;
            }
        }
        true
    }

    /// Test a member of `snapset` against both the set-level and the
    /// snapshot-level criteria.
    ///
    /// Fails only if the origin criterion is set and the provider cannot
    /// resolve the snapshot's origin.
    pub fn matches_snapshot(&self, snapset: &SnapshotSet, snapshot: &Snapshot) -> Result<bool> {
        if !self.matches_snapshot_set(snapset) {
            return Ok(false);
        }
        if let Some(uuid) = &self.snapshot_uuid {
            if *uuid != snapshot.uuid() {
                return Ok(false);
            }
        }
        if let Some(name) = &self.snapshot_name {
            if name != snapshot.name() {
                return Ok(false);
            }
        }
        if let Some(mount_point) = &self.mount_point {
            if mount_point.as_path() != snapshot.mount_point() {
                return Ok(false);
            }
        }
        if let Some(origin) = &self.origin {
            if *origin != snapshot.origin()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(v) = &self.name {
            parts.push(format!("name='{}'", v));
        }
        if let Some(v) = &self.uuid {
            parts.push(format!("uuid='{}'", v));
        }
        if let Some(v) = &self.timestamp {
            parts.push(format!("timestamp='{}'", v));
        }
        if let Some(v) = &self.nr_snapshots {
            parts.push(format!("nr_snapshots='{}'", v));
        }
        if let Some(v) = &self.mount_points {
            let mps: Vec<String> = v.iter().map(|p| p.display().to_string()).collect();
            parts.push(format!("mount_points='{}'", mps.join(", ")));
        }
        if let Some(v) = &self.origin {
            parts.push(format!("origin='{}'", v));
        }
        if let Some(v) = &self.mount_point {
            parts.push(format!("mount_point='{}'", v.display()));
        }
        if let Some(v) = &self.snapshot_name {
            parts.push(format!("snapshot_name='{}'", v));
        }
        if let Some(v) = &self.snapshot_uuid {
            parts.push(format!("snapshot_uuid='{}'", v));
        }
        write!(f, "{}", parts.join(", "))
    }
}

//! Snapshots and snapshot sets

use crate::boot::BootEntry;
use crate::error::{Error, Result};
use crate::provider::{Provider, SnapshotRecord};
use crate::types::{format_time, snapset_uuid, snapshot_uuid, Outcome, SnapStatus};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::error;
use uuid::Uuid;

/// One backend-managed snapshot of one mount point.
///
/// Only backend-independent fields are stored here. Everything else is read
/// through the provider that owns the snapshot.
#[derive(Clone)]
pub struct Snapshot {
    name: String,
    uuid: Uuid,
    snapset_name: String,
    timestamp: u64,
    mount_point: PathBuf,
    provider: Rc<dyn Provider>,
}

impl Snapshot {
    pub fn new(record: SnapshotRecord, provider: Rc<dyn Provider>) -> Self {
        Snapshot {
            uuid: snapshot_uuid(&record.name),
            name: record.name,
            snapset_name: record.snapset_name,
            timestamp: record.timestamp,
            mount_point: record.mount_point,
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn snapset_name(&self) -> &str {
        &self.snapset_name
    }

    /// UUID of the snapshot set this snapshot belongs to
    pub fn snapset_uuid(&self) -> Uuid {
        snapset_uuid(&self.snapset_name, self.timestamp)
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn time(&self) -> String {
        format_time(self.timestamp)
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Name of the provider managing this snapshot
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn provider(&self) -> &Rc<dyn Provider> {
        &self.provider
    }

    // === Provider reads ===

    pub fn origin(&self) -> Result<String> {
        self.provider.origin(&self.name)
    }

    pub fn origin_options(&self) -> Result<String> {
        self.provider.origin_options(&self.name)
    }

    pub fn devpath(&self) -> Result<String> {
        self.provider.devpath(&self.name)
    }

    pub fn status(&self) -> Result<SnapStatus> {
        self.provider.status(&self.name)
    }

    pub fn autoactivate(&self) -> Result<bool> {
        self.provider.autoactivate(&self.name)
    }

    // === Provider operations ===

    pub fn delete(&self) -> Result<()> {
        self.provider.delete_snapshot(&self.name)?;
        self.provider.invalidate_cache(&self.name);
        Ok(())
    }

    /// Rename this snapshot into the set `new_snapset_name`, returning the
    /// renamed snapshot
    pub fn rename(&self, new_snapset_name: &str) -> Result<Snapshot> {
        let origin = self.origin()?;
        let record = self.provider.rename_snapshot(
            &self.name,
            &origin,
            new_snapset_name,
            self.timestamp,
            &self.mount_point,
        )?;
        self.provider.invalidate_cache(&self.name);
        Ok(Snapshot::new(record, self.provider.clone()))
    }

    /// Request a rollback of the origin to this snapshot.
    ///
    /// The backend may defer the revert until the next activation.
    pub fn rollback(&self) -> Result<()> {
        self.provider.rollback_snapshot(&self.name)?;
        self.provider.invalidate_cache(&self.name);
        Ok(())
    }

    pub fn activate(&self) -> Result<()> {
        self.provider.activate_snapshot(&self.name)?;
        self.provider.invalidate_cache(&self.name);
        Ok(())
    }

    pub fn deactivate(&self) -> Result<()> {
        self.provider.deactivate_snapshot(&self.name)?;
        self.provider.invalidate_cache(&self.name);
        Ok(())
    }

    pub fn set_autoactivate(&self, auto: bool) -> Result<()> {
        self.provider.set_autoactivate(&self.name, auto)?;
        self.provider.invalidate_cache(&self.name);
        Ok(())
    }

    /// Multi-line description of this snapshot
    pub fn show(&self) -> Result<String> {
        Ok(format!(
            "Name:           {}\n\
             SnapsetName:    {}\n\
             Origin:         {}\n\
             Time:           {}\n\
             MountPoint:     {}\n\
             Provider:       {}\n\
             UUID:           {}\n\
             Status:         {}\n\
             Autoactivate:   {}\n\
             DevicePath:     {}",
            self.name,
            self.snapset_name,
            self.origin()?,
            self.time(),
            self.mount_point.display(),
            self.provider_name(),
            self.uuid,
            self.status()?,
            if self.autoactivate()? { "yes" } else { "no" },
            self.devpath()?
        ))
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("name", &self.name)
            .field("snapset_name", &self.snapset_name)
            .field("timestamp", &self.timestamp)
            .field("mount_point", &self.mount_point)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// A named set of snapshots taken together at one point in time
#[derive(Debug, Clone)]
pub struct SnapshotSet {
    name: String,
    timestamp: u64,
    uuid: Uuid,
    snapshots: Vec<Snapshot>,
    by_mount_point: HashMap<PathBuf, usize>,
    boot_entry: Option<BootEntry>,
    rollback_entry: Option<BootEntry>,
}

impl SnapshotSet {
    /// Build a set from its members.
    ///
    /// Mount points are expected to be unique; if not, the last member with
    /// a given mount point is the one indexed.
    pub fn new(name: impl Into<String>, timestamp: u64, snapshots: Vec<Snapshot>) -> Self {
        let name = name.into();
        let by_mount_point = snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.mount_point.clone(), i))
            .collect();
        SnapshotSet {
            uuid: snapset_uuid(&name, timestamp),
            name,
            timestamp,
            snapshots,
            by_mount_point,
            boot_entry: None,
            rollback_entry: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn time(&self) -> String {
        format_time(self.timestamp)
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn nr_snapshots(&self) -> usize {
        self.snapshots.len()
    }

    /// Mount points of the members, in set order
    pub fn mount_points(&self) -> Vec<&Path> {
        self.snapshots.iter().map(|s| s.mount_point()).collect()
    }

    pub fn snapshot_by_mount_point(&self, mount_point: &Path) -> Result<&Snapshot> {
        self.by_mount_point
            .get(mount_point)
            .map(|&i| &self.snapshots[i])
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Mount point {} not found in snapset {}",
                    mount_point.display(),
                    self.name
                ))
            })
    }

    /// Aggregate status: the worst status of any member
    pub fn status(&self) -> Result<SnapStatus> {
        let mut status = SnapStatus::Active;
        for snapshot in &self.snapshots {
            status = status.max(snapshot.status()?);
        }
        Ok(status)
    }

    /// True only if every member is set to autoactivate
    pub fn autoactivate(&self) -> Result<bool> {
        for snapshot in &self.snapshots {
            if !snapshot.autoactivate()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Apply an autoactivation setting to every member.
    ///
    /// Member failures are logged and collected; the remaining members are
    /// still updated.
    pub fn set_autoactivate(&self, auto: bool) -> Outcome {
        let mut outcome = Outcome::new();
        for snapshot in &self.snapshots {
            let result = snapshot.set_autoactivate(auto);
            if let Err(e) = &result {
                error!(
                    "Failed to set autoactivation for snapshot set member {}: {}",
                    snapshot.name(),
                    e
                );
            }
            outcome.record(result);
        }
        outcome
    }

    pub fn boot_entry(&self) -> Option<&BootEntry> {
        self.boot_entry.as_ref()
    }

    pub fn rollback_entry(&self) -> Option<&BootEntry> {
        self.rollback_entry.as_ref()
    }

    pub fn set_boot_entry(&mut self, entry: Option<BootEntry>) {
        self.boot_entry = entry;
    }

    pub fn set_rollback_entry(&mut self, entry: Option<BootEntry>) {
        self.rollback_entry = entry;
    }

    /// Multi-line description of this snapshot set
    pub fn show(&self) -> Result<String> {
        let mount_points: Vec<String> = self
            .mount_points()
            .iter()
            .map(|mp| mp.display().to_string())
            .collect();
        let mut out = format!(
            "SnapsetName:    {}\n\
             MountPoints:    {}\n\
             NrSnapshots:    {}\n\
             Time:           {}\n\
             UUID:           {}\n\
             Status:         {}",
            self.name,
            mount_points.join(", "),
            self.nr_snapshots(),
            self.time(),
            self.uuid,
            self.status()?
        );
        if let Some(entry) = &self.boot_entry {
            out.push_str(&format!("\nBoot entry:     {}", entry.disp_boot_id()));
        }
        if let Some(entry) = &self.rollback_entry {
            out.push_str(&format!("\nRollback entry: {}", entry.disp_boot_id()));
        }
        Ok(out)
    }
}

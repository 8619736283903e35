//! Snapshot set orchestration
//!
//! The [`Manager`] rebuilds snapshot sets from the snapshots each provider
//! reports, and fans set-level operations out over the set members. State is
//! never persisted; a fresh manager learns everything again through
//! [`Manager::discover_snapshot_sets`].

use crate::boot::{self, BootIndex, BootStore};
use crate::error::{Error, Result};
use crate::mounts::MountTable;
use crate::provider::{Provider, ProviderRegistry};
use crate::selection::Selection;
use crate::snapshot::{Snapshot, SnapshotSet};
use crate::types::{
    normalize_path, validate_snapset_name, MountSpec, Outcome, SizePolicy, SnapStatus,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A mount point resolved to the provider that will snapshot it
struct CreateTarget {
    mount_point: PathBuf,
    size_policy: Option<SizePolicy>,
    provider: Rc<dyn Provider>,
    origin: String,
}

/// High level interface to snapshot sets
pub struct Manager {
    providers: ProviderRegistry,
    boot_store: Rc<dyn BootStore>,
    mounts: Rc<dyn MountTable>,
    snapshot_sets: Vec<SnapshotSet>,
}

impl Manager {
    /// Create a manager with no known snapshot sets.
    ///
    /// Call [`Manager::discover_snapshot_sets`] to populate it.
    pub fn new(
        providers: ProviderRegistry,
        boot_store: Rc<dyn BootStore>,
        mounts: Rc<dyn MountTable>,
    ) -> Self {
        Manager {
            providers,
            boot_store,
            mounts,
            snapshot_sets: Vec::new(),
        }
    }

    // === Discovery ===

    /// Rebuild the snapshot sets from the snapshots reported by every
    /// provider and re-attach their boot entries
    pub fn discover_snapshot_sets(&mut self) -> Result<()> {
        self.snapshot_sets.clear();
        let boot_index = BootIndex::load(&*self.boot_store)?;

        debug!("Discovering snapshot sets for {} providers", self.providers.len());
        let mut grouped: BTreeMap<(String, u64), Vec<Snapshot>> = BTreeMap::new();
        for provider in self.providers.iter() {
            for record in provider.discover_snapshots()? {
                let key = (record.snapset_name.clone(), record.timestamp);
                grouped
                    .entry(key)
                    .or_default()
                    .push(Snapshot::new(record, provider.clone()));
            }
        }

        let mut last_name: Option<&str> = None;
        for (name, _) in grouped.keys() {
            if last_name == Some(name.as_str()) {
                warn!("Snapshot set '{}' has inconsistent timestamps", name);
            }
            last_name = Some(name.as_str());
        }

        for ((name, timestamp), snapshots) in grouped {
            let mut snapset = SnapshotSet::new(name, timestamp, snapshots);
            snapset.set_boot_entry(boot_index.boot_entry(&snapset.uuid()).cloned());
            snapset.set_rollback_entry(boot_index.rollback_entry(&snapset.uuid()).cloned());
            self.snapshot_sets.push(snapset);
        }

        debug!("Discovered {} snapshot sets", self.snapshot_sets.len());
        Ok(())
    }

    pub fn snapshot_sets(&self) -> &[SnapshotSet] {
        &self.snapshot_sets
    }

    fn matching_set_indices(&self, selection: &Selection) -> Result<Vec<usize>> {
        selection.check_valid_selection(true, false)?;
        debug!("Finding snapshot sets for {}", selection);
        Ok(self
            .snapshot_sets
            .iter()
            .enumerate()
            .filter(|(_, set)| selection.matches_snapshot_set(set))
            .map(|(i, _)| i)
            .collect())
    }

    fn require_matching_sets(&self, selection: &Selection) -> Result<Vec<usize>> {
        let indices = self.matching_set_indices(selection)?;
        if indices.is_empty() {
            return Err(Error::NotFound(format!(
                "Could not find snapshot sets matching {}",
                selection
            )));
        }
        Ok(indices)
    }

    /// Find snapshot sets matching `selection`
    pub fn find_snapshot_sets(&self, selection: &Selection) -> Result<Vec<&SnapshotSet>> {
        let matches: Vec<&SnapshotSet> = self
            .matching_set_indices(selection)?
            .into_iter()
            .map(|i| &self.snapshot_sets[i])
            .collect();
        debug!("Found {} snapshot sets", matches.len());
        Ok(matches)
    }

    /// Find snapshots matching `selection`, in set order
    pub fn find_snapshots(&self, selection: &Selection) -> Result<Vec<&Snapshot>> {
        selection.check_valid_selection(true, true)?;
        debug!("Finding snapshots for {}", selection);
        let mut matches = Vec::new();
        for snapset in &self.snapshot_sets {
            for snapshot in snapset.snapshots() {
                if selection.matches_snapshot(snapset, snapshot)? {
                    matches.push(snapshot);
                }
            }
        }
        debug!("Found {} snapshots", matches.len());
        Ok(matches)
    }

    fn insert_set(&mut self, snapset: SnapshotSet) -> usize {
        let key = (snapset.name().to_string(), snapset.timestamp());
        let idx = self
            .snapshot_sets
            .partition_point(|s| (s.name(), s.timestamp()) < (key.0.as_str(), key.1));
        self.snapshot_sets.insert(idx, snapset);
        idx
    }

    fn check_new_name(&self, name: &str) -> Result<()> {
        validate_snapset_name(name)?;
        if self.snapshot_sets.iter().any(|s| s.name() == name) {
            return Err(Error::Exists(format!(
                "Snapshot set named '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    // === Snapshot set lifecycle ===

    /// Create a snapshot set named `name` from the given mount points.
    ///
    /// Every member is checked before any is created. If creating a member
    /// fails, the members already created are removed again.
    pub fn create_snapshot_set(
        &mut self,
        name: &str,
        mount_specs: &[MountSpec],
    ) -> Result<&SnapshotSet> {
        self.check_new_name(name)?;
        if mount_specs.is_empty() {
            return Err(Error::InvalidIdentifier(
                "A snapshot set needs at least one mount point".to_string(),
            ));
        }

        let mut targets: Vec<CreateTarget> = Vec::with_capacity(mount_specs.len());
        for spec in mount_specs {
            let mount_point = normalize_path(&spec.mount_point);
            if targets.iter().any(|t| t.mount_point == mount_point) {
                return Err(Error::InvalidIdentifier(format!(
                    "Duplicate mount point: {}",
                    mount_point.display()
                )));
            }
            if !self.mounts.is_mount_point(&mount_point)? {
                return Err(Error::Path(format!(
                    "Path '{}' is not a mount point",
                    mount_point.display()
                )));
            }
            let provider = self.providers.for_mount_point(&mount_point)?;
            targets.push(CreateTarget {
                mount_point,
                size_policy: spec.size_policy.clone(),
                provider,
                origin: String::new(),
            });
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Snapm(format!("System clock error: {}", e)))?
            .as_secs();

        for target in &mut targets {
            target.origin = target.provider.origin_from_mount_point(&target.mount_point)?;
            target.provider.check_create_snapshot(
                &target.origin,
                name,
                timestamp,
                &target.mount_point,
                target.size_policy.as_ref(),
            )?;
        }

        let mut snapshots: Vec<Snapshot> = Vec::with_capacity(targets.len());
        for target in &targets {
            let created = target.provider.create_snapshot(
                &target.origin,
                name,
                timestamp,
                &target.mount_point,
                target.size_policy.as_ref(),
            );
            match created {
                Ok(record) => snapshots.push(Snapshot::new(record, target.provider.clone())),
                Err(e) => {
                    error!("Error creating snapshot set member {}: {}", name, e);
                    for snapshot in snapshots.iter().rev() {
                        if let Err(e) = snapshot.delete() {
                            error!("Failed to clean up snapshot {}: {}", snapshot.name(), e);
                        }
                    }
                    return Err(e);
                }
            }
        }

        let snapset = SnapshotSet::new(name, timestamp, snapshots);
        info!("Created snapshot set {} ({})", snapset.name(), snapset.uuid());
        let idx = self.insert_set(snapset);
        Ok(&self.snapshot_sets[idx])
    }

    /// Resolve a set by name, or else by uuid; it must match exactly one set
    fn resolve_single_set(&self, name: Option<&str>, uuid: Option<Uuid>) -> Result<usize> {
        let selection = match (name, uuid) {
            (Some(name), _) => Selection::by_name(name),
            (None, Some(uuid)) => Selection::by_uuid(uuid),
            (None, None) => {
                return Err(Error::NotFound(
                    "A snapshot set name or UUID is required".to_string(),
                ))
            }
        };
        let indices = self.matching_set_indices(&selection)?;
        match indices.as_slice() {
            [idx] => Ok(*idx),
            [] => Err(Error::NotFound(format!(
                "Could not find snapshot set matching {}",
                selection
            ))),
            many => Err(Error::NotFound(format!(
                "{} snapshot sets match {}",
                many.len(),
                selection
            ))),
        }
    }

    /// Create and attach a boot entry for the set named `name` (or with
    /// `uuid`), enabling autoactivation on its members first
    pub fn create_snapshot_set_boot_entry(
        &mut self,
        name: Option<&str>,
        uuid: Option<Uuid>,
    ) -> Result<()> {
        let idx = self.resolve_single_set(name, uuid)?;
        let snapset = &mut self.snapshot_sets[idx];
        if let Some(entry) = snapset.boot_entry() {
            return Err(Error::Exists(format!(
                "Boot entry {} already associated with snapshot set {}",
                entry.disp_boot_id(),
                snapset.name()
            )));
        }
        let outcome = snapset.set_autoactivate(true);
        if let Some(e) = outcome.errors.into_iter().next() {
            error!(
                "Failed to enable autoactivation for snapshot set {}: {}",
                snapset.name(),
                e
            );
            return Err(e);
        }
        if !snapset.autoactivate()? {
            return Err(Error::Snapm(format!(
                "Could not enable autoactivation for all snapshots in snapshot set {}",
                snapset.name()
            )));
        }
        boot::create_snapset_boot_entry(&*self.boot_store, &*self.mounts, snapset)
    }

    /// Create and attach a rollback entry for the set named `name` (or with
    /// `uuid`)
    pub fn create_snapshot_set_rollback_entry(
        &mut self,
        name: Option<&str>,
        uuid: Option<Uuid>,
    ) -> Result<()> {
        let idx = self.resolve_single_set(name, uuid)?;
        let snapset = &mut self.snapshot_sets[idx];
        if let Some(entry) = snapset.rollback_entry() {
            return Err(Error::Exists(format!(
                "Rollback entry {} already associated with snapshot set {}",
                entry.disp_boot_id(),
                snapset.name()
            )));
        }
        boot::create_snapset_rollback_entry(&*self.boot_store, &*self.mounts, snapset)
    }

    /// Delete every set matching `selection`, with its boot entries.
    ///
    /// A set whose boot or rollback entry cannot be removed is kept whole,
    /// so the entry never outlives the snapshots it boots. Member failures
    /// do not stop the deletion; a set keeps only the members that could
    /// not be removed. `affected` counts sets removed completely.
    pub fn delete_snapshot_sets(&mut self, selection: &Selection) -> Result<Outcome> {
        let indices = self.require_matching_sets(selection)?;
        let mut outcome = Outcome::new();
        let mut kept = Vec::with_capacity(self.snapshot_sets.len());

        for (i, mut snapset) in std::mem::take(&mut self.snapshot_sets).into_iter().enumerate() {
            if !indices.contains(&i) {
                kept.push(snapset);
                continue;
            }
            let mut entries_removed = true;
            for result in [
                boot::delete_snapset_boot_entry(&*self.boot_store, &mut snapset),
                boot::delete_snapset_rollback_entry(&*self.boot_store, &mut snapset),
            ] {
                if let Err(e) = result {
                    error!("Failed to delete boot entry for {}: {}", snapset.name(), e);
                    outcome.errors.push(e);
                    entries_removed = false;
                }
            }
            if !entries_removed {
                warn!(
                    "Keeping snapshot set {} while it still has boot entries",
                    snapset.name()
                );
                kept.push(snapset);
                continue;
            }

            let mut survivors = Vec::new();
            for snapshot in snapset.snapshots() {
                if let Err(e) = snapshot.delete() {
                    error!("Failed to delete snapshot set member {}: {}", snapshot.name(), e);
                    survivors.push(snapshot.clone());
                    outcome.errors.push(e);
                }
            }

            if survivors.is_empty() {
                info!("Deleted snapshot set {} ({})", snapset.name(), snapset.uuid());
                outcome.affected += 1;
            } else {
                kept.push(SnapshotSet::new(snapset.name(), snapset.timestamp(), survivors));
            }
        }

        self.snapshot_sets = kept;
        Ok(outcome)
    }

    /// Rename the set `old_name` to `new_name`.
    ///
    /// If a member cannot be renamed, members already renamed are renamed
    /// back and the set keeps its old name. A set with a boot entry must be
    /// active, since the entry is rebuilt from the renamed members.
    pub fn rename_snapshot_set(&mut self, old_name: &str, new_name: &str) -> Result<&SnapshotSet> {
        let idx = self
            .snapshot_sets
            .iter()
            .position(|s| s.name() == old_name)
            .ok_or_else(|| {
                Error::NotFound(format!("Cannot find snapshot set named {}", old_name))
            })?;
        self.check_new_name(new_name)?;
        let snapset = &self.snapshot_sets[idx];
        if snapset.boot_entry().is_some() && snapset.status()? != SnapStatus::Active {
            return Err(Error::Snapm(format!(
                "Snapshot set {} must be active to move its boot entry",
                old_name
            )));
        }

        let mut renamed: Vec<Snapshot> = Vec::new();
        for snapshot in self.snapshot_sets[idx].snapshots() {
            match snapshot.rename(new_name) {
                Ok(new_snapshot) => renamed.push(new_snapshot),
                Err(e) => {
                    error!("Failed to rename snapshot {}: {}", snapshot.name(), e);
                    for new_snapshot in &renamed {
                        if let Err(e) = new_snapshot.rename(old_name) {
                            error!(
                                "Failed to revert snapshot rename on {}: {}",
                                new_snapshot.name(),
                                e
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        let mut old_set = self.snapshot_sets.remove(idx);
        let mut new_set = SnapshotSet::new(new_name, old_set.timestamp(), renamed);
        info!("Renamed snapshot set {} to {}", old_name, new_name);

        let moved = self.move_boot_entries(&mut old_set, &mut new_set);
        let idx = self.insert_set(new_set);
        match moved.errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(&self.snapshot_sets[idx]),
        }
    }

    /// Replace the entries tagged with the old set uuid by entries for the
    /// renamed set. Each entry is moved independently; the old entry is
    /// removed even when its replacement cannot be created, since it names
    /// devices that no longer exist.
    fn move_boot_entries(&self, old_set: &mut SnapshotSet, new_set: &mut SnapshotSet) -> Outcome {
        let store = &*self.boot_store;
        let mut outcome = Outcome::new();
        if old_set.boot_entry().is_some() {
            outcome.record(boot::create_snapset_boot_entry(store, &*self.mounts, new_set));
            outcome.record(boot::delete_snapset_boot_entry(store, old_set));
        }
        if old_set.rollback_entry().is_some() {
            outcome.record(boot::create_snapset_rollback_entry(store, &*self.mounts, new_set));
            outcome.record(boot::delete_snapset_rollback_entry(store, old_set));
        }
        for e in &outcome.errors {
            error!("Failed to move boot entry for {}: {}", new_set.name(), e);
        }
        outcome
    }

    // === Fan-out operations ===

    fn for_each_set_member<F>(&self, indices: &[usize], action: &str, op: F) -> Outcome
    where
        F: Fn(&Snapshot) -> Result<()>,
    {
        let mut outcome = Outcome::new();
        for &i in indices {
            for snapshot in self.snapshot_sets[i].snapshots() {
                let result = op(snapshot);
                if let Err(e) = &result {
                    error!("Failed to {} snapshot set member {}: {}", action, snapshot.name(), e);
                }
                outcome.record(result);
            }
        }
        outcome
    }

    fn for_each_snapshot<F>(&self, selection: &Selection, action: &str, op: F) -> Result<Outcome>
    where
        F: Fn(&Snapshot) -> Result<()>,
    {
        let snapshots = self.find_snapshots(selection)?;
        if snapshots.is_empty() {
            return Err(Error::NotFound(format!(
                "Could not find snapshots matching {}",
                selection
            )));
        }
        let mut outcome = Outcome::new();
        for snapshot in snapshots {
            let result = op(snapshot);
            if let Err(e) = &result {
                error!("Failed to {} snapshot {}: {}", action, snapshot.name(), e);
            }
            outcome.record(result);
        }
        Ok(outcome)
    }

    /// Request a rollback of the single set matching `selection`
    pub fn rollback_snapshot_sets(&self, selection: &Selection) -> Result<Outcome> {
        let indices = self.require_matching_sets(selection)?;
        if indices.len() > 1 {
            return Err(Error::NotFound(format!(
                "Rollback needs a single snapshot set but {} match {}",
                indices.len(),
                selection
            )));
        }
        Ok(self.for_each_set_member(&indices, "roll back", Snapshot::rollback))
    }

    pub fn activate_snapshot_sets(&self, selection: &Selection) -> Result<Outcome> {
        let indices = self.require_matching_sets(selection)?;
        Ok(self.for_each_set_member(&indices, "activate", Snapshot::activate))
    }

    pub fn deactivate_snapshot_sets(&self, selection: &Selection) -> Result<Outcome> {
        let indices = self.require_matching_sets(selection)?;
        Ok(self.for_each_set_member(&indices, "deactivate", Snapshot::deactivate))
    }

    /// Set autoactivation for every member of the sets matching `selection`
    pub fn set_autoactivate(&self, selection: &Selection, auto: bool) -> Result<Outcome> {
        let indices = self.require_matching_sets(selection)?;
        Ok(self.for_each_set_member(&indices, "set autoactivation for", |s| {
            s.set_autoactivate(auto)
        }))
    }

    pub fn activate_snapshots(&self, selection: &Selection) -> Result<Outcome> {
        self.for_each_snapshot(selection, "activate", Snapshot::activate)
    }

    pub fn deactivate_snapshots(&self, selection: &Selection) -> Result<Outcome> {
        self.for_each_snapshot(selection, "deactivate", Snapshot::deactivate)
    }

    pub fn set_snapshot_autoactivate(&self, selection: &Selection, auto: bool) -> Result<Outcome> {
        self.for_each_snapshot(selection, "set autoactivation for", |s| {
            s.set_autoactivate(auto)
        })
    }
}

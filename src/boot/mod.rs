//! Boot integration for snapshot sets
//!
//! A snapshot set can carry two boot entries: one that boots the system
//! with the snapshots mounted in place of their origins, and one that boots
//! the origins so that a pending rollback is applied. Entries are tagged with
//! the set uuid on the kernel command line, which is how discovery finds them
//! again.

pub mod bls;

pub use bls::BlsBootStore;

use crate::error::{Error, Result};
use crate::mounts::MountTable;
use crate::snapshot::SnapshotSet;
use crate::types::SnapStatus;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Kernel argument naming the set a snapshot boot entry belongs to
pub const SNAPSET_ARG: &str = "snapm.snapset";

/// Kernel argument naming the set a rollback boot entry belongs to
pub const ROLLBACK_ARG: &str = "snapm.rollback";

/// A boot loader entry as held by a [`BootStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    pub boot_id: String,
    pub title: String,
    pub version: String,
    pub machine_id: String,
    pub linux: String,
    pub initrd: String,
    pub options: String,
}

impl BootEntry {
    /// Short form of the boot id for display
    pub fn disp_boot_id(&self) -> &str {
        match self.boot_id.char_indices().nth(7) {
            Some((end, _)) => &self.boot_id[..end],
            None => &self.boot_id,
        }
    }

    /// Set uuid tagged on a snapshot boot entry
    pub fn snapset_uuid(&self) -> Option<Uuid> {
        tagged_uuid(&self.options, SNAPSET_ARG)
    }

    /// Set uuid tagged on a rollback boot entry
    pub fn rollback_uuid(&self) -> Option<Uuid> {
        tagged_uuid(&self.options, ROLLBACK_ARG)
    }
}

/// Value of `key=value` in a kernel command line
pub fn option_value<'a>(options: &'a str, key: &str) -> Option<&'a str> {
    options
        .split_whitespace()
        .filter_map(|arg| arg.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

fn tagged_uuid(options: &str, key: &str) -> Option<Uuid> {
    option_value(options, key).and_then(|v| Uuid::parse_str(v).ok())
}

/// Content of a boot entry to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntrySpec {
    pub title: String,
    pub version: String,
    pub linux: String,
    pub initrd: String,
    pub options: String,
}

/// Storage for boot loader entries
pub trait BootStore {
    /// All entries currently in the store
    fn entries(&self) -> Result<Vec<BootEntry>>;

    fn create_entry(&self, spec: &BootEntrySpec) -> Result<BootEntry>;

    fn delete_entry(&self, boot_id: &str) -> Result<()>;

    /// Release of the running kernel
    fn uts_release(&self) -> Result<String>;

    fn machine_id(&self) -> Result<String>;
}

/// Snapshot and rollback entries indexed by the set uuid they are tagged with
#[derive(Debug, Default)]
pub struct BootIndex {
    boot: HashMap<Uuid, BootEntry>,
    rollback: HashMap<Uuid, BootEntry>,
}

impl BootIndex {
    pub fn load(store: &dyn BootStore) -> Result<Self> {
        let mut index = BootIndex::default();
        for entry in store.entries()? {
            if let Some(uuid) = entry.snapset_uuid() {
                debug!("Found boot entry {} for snapset {}", entry.disp_boot_id(), uuid);
                index.boot.insert(uuid, entry);
            } else if let Some(uuid) = entry.rollback_uuid() {
                debug!("Found rollback entry {} for snapset {}", entry.disp_boot_id(), uuid);
                index.rollback.insert(uuid, entry);
            }
        }
        Ok(index)
    }

    pub fn boot_entry(&self, uuid: &Uuid) -> Option<&BootEntry> {
        self.boot.get(uuid)
    }

    pub fn rollback_entry(&self, uuid: &Uuid) -> Option<&BootEntry> {
        self.rollback.get(uuid)
    }
}

pub fn kernel_image(version: &str) -> String {
    format!("/vmlinuz-{}", version)
}

pub fn initramfs_image(version: &str) -> String {
    format!("/initramfs-{}.img", version)
}

/// Which device each member contributes to a boot entry
#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Snapshot,
    Rollback,
}

/// Build the kernel command line for a snapshot or rollback entry
fn build_options(
    mounts: &dyn MountTable,
    snapset: &SnapshotSet,
    kind: EntryKind,
) -> Result<String> {
    let root = Path::new("/");
    let mut root_device = None;
    let mut root_flags = String::new();
    let mut extra = Vec::new();

    for snapshot in snapset.snapshots() {
        let device = match kind {
            EntryKind::Snapshot => snapshot.devpath()?,
            EntryKind::Rollback => snapshot.origin()?,
        };
        if device.is_empty() {
            return Err(Error::Snapm(format!(
                "Snapshot {} has no device path",
                snapshot.name()
            )));
        }
        if snapshot.mount_point() == root {
            if kind == EntryKind::Rollback {
                root_flags = snapshot.origin_options()?;
            }
            root_device = Some(device);
            continue;
        }
        let (fstype, options) = match mounts.fstab_entry(snapshot.mount_point())? {
            Some(entry) => (entry.fstype, entry.options),
            None => ("auto".to_string(), "defaults".to_string()),
        };
        extra.push(format!(
            "systemd.mount-extra={}:{}:{}:{}",
            device,
            snapshot.mount_point().display(),
            fstype,
            options
        ));
    }

    let root_device = match root_device {
        Some(device) => device,
        None => mounts
            .fstab_entry(root)?
            .map(|entry| entry.device)
            .ok_or_else(|| Error::NotFound("Could not find root device in fstab".to_string()))?,
    };

    let mut args = vec![format!("root={}", root_device), "ro".to_string()];
    if !root_flags.is_empty() {
        args.push(format!("rootflags={}", root_flags));
    }
    args.extend(extra);
    let tag = match kind {
        EntryKind::Snapshot => SNAPSET_ARG,
        EntryKind::Rollback => ROLLBACK_ARG,
    };
    args.push(format!("{}={}", tag, snapset.uuid()));
    Ok(args.join(" "))
}

fn build_spec(
    store: &dyn BootStore,
    mounts: &dyn MountTable,
    snapset: &SnapshotSet,
    kind: EntryKind,
) -> Result<BootEntrySpec> {
    let version = store.uts_release()?;
    let label = match kind {
        EntryKind::Snapshot => "Snapshot",
        EntryKind::Rollback => "Rollback",
    };
    Ok(BootEntrySpec {
        title: format!("{} {} {} ({})", label, snapset.name(), snapset.time(), version),
        linux: kernel_image(&version),
        initrd: initramfs_image(&version),
        options: build_options(mounts, snapset, kind)?,
        version,
    })
}

/// Create a boot entry that mounts the members of `snapset` in place of
/// their origins and attach it to the set
pub fn create_snapset_boot_entry(
    store: &dyn BootStore,
    mounts: &dyn MountTable,
    snapset: &mut SnapshotSet,
) -> Result<()> {
    if snapset.status()? != SnapStatus::Active {
        return Err(Error::Snapm(format!(
            "Snapshot set {} is not active",
            snapset.name()
        )));
    }
    let spec = build_spec(store, mounts, snapset, EntryKind::Snapshot)?;
    let entry = store.create_entry(&spec)?;
    info!(
        "Created boot entry {} for snapshot set {}",
        entry.disp_boot_id(),
        snapset.name()
    );
    snapset.set_boot_entry(Some(entry));
    Ok(())
}

/// Create a boot entry that boots the origins of `snapset`, applying a
/// pending rollback, and attach it to the set
pub fn create_snapset_rollback_entry(
    store: &dyn BootStore,
    mounts: &dyn MountTable,
    snapset: &mut SnapshotSet,
) -> Result<()> {
    let spec = build_spec(store, mounts, snapset, EntryKind::Rollback)?;
    let entry = store.create_entry(&spec)?;
    info!(
        "Created rollback entry {} for snapshot set {}",
        entry.disp_boot_id(),
        snapset.name()
    );
    snapset.set_rollback_entry(Some(entry));
    Ok(())
}

pub fn delete_snapset_boot_entry(store: &dyn BootStore, snapset: &mut SnapshotSet) -> Result<()> {
    if let Some(entry) = snapset.boot_entry() {
        store.delete_entry(&entry.boot_id)?;
        debug!("Deleted boot entry {}", entry.disp_boot_id());
        snapset.set_boot_entry(None);
    }
    Ok(())
}

pub fn delete_snapset_rollback_entry(
    store: &dyn BootStore,
    snapset: &mut SnapshotSet,
) -> Result<()> {
    if let Some(entry) = snapset.rollback_entry() {
        store.delete_entry(&entry.boot_id)?;
        debug!("Deleted rollback entry {}", entry.disp_boot_id());
        snapset.set_rollback_entry(None);
    }
    Ok(())
}

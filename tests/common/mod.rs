//! Test utilities for snapm integration tests
//!
//! In-memory implementations of the provider, boot store and mount table
//! traits, with failure injection for the best-effort paths.

#![allow(dead_code)]

use snapm::provider::{encode_mount_point, format_snapshot_name, parse_snapshot_name};
use snapm::{
    BootEntry, BootEntrySpec, BootStore, Error, Manager, MountEntry, MountTable, Provider,
    ProviderRegistry, Result, SizePolicy, SnapStatus, SnapshotRecord,
};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const KERNEL_VERSION: &str = "6.8.0-test";

// =============================================================================
// Provider
// =============================================================================

#[derive(Debug, Clone)]
struct MockSnapshot {
    origin: String,
    snapset_name: String,
    timestamp: u64,
    mount_point: PathBuf,
    active: bool,
    autoactivate: bool,
    rollback_pending: bool,
    invalid: bool,
}

/// Operations that can be made to fail for a given mount point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Delete,
    Rename,
    Rollback,
    Activate,
    Deactivate,
    Autoactivate,
}

/// Provider keeping its snapshots in memory
pub struct MockProvider {
    name: String,
    /// Mount points this provider can snapshot, with their origins
    origins: HashMap<PathBuf, String>,
    snapshots: RefCell<BTreeMap<String, MockSnapshot>>,
    failures: RefCell<HashSet<(Op, PathBuf)>>,
    created: Cell<usize>,
}

impl MockProvider {
    pub fn new(name: &str, mounts: &[(&str, &str)]) -> Self {
        MockProvider {
            name: name.to_string(),
            origins: mounts
                .iter()
                .map(|(mp, origin)| (PathBuf::from(mp), origin.to_string()))
                .collect(),
            snapshots: RefCell::new(BTreeMap::new()),
            failures: RefCell::new(HashSet::new()),
            created: Cell::new(0),
        }
    }

    /// Seed an existing snapshot, as if created by an earlier run
    pub fn add_snapshot(&self, snapset_name: &str, timestamp: u64, mount_point: &str) -> String {
        let mount_point = PathBuf::from(mount_point);
        let origin = self.origins[&mount_point].clone();
        let name = format_snapshot_name(
            &origin,
            snapset_name,
            timestamp,
            &encode_mount_point(&mount_point),
        );
        self.snapshots.borrow_mut().insert(
            name.clone(),
            MockSnapshot {
                origin,
                snapset_name: snapset_name.to_string(),
                timestamp,
                mount_point,
                active: true,
                autoactivate: false,
                rollback_pending: false,
                invalid: false,
            },
        );
        name
    }

    pub fn fail(&self, op: Op, mount_point: &str) {
        self.failures.borrow_mut().insert((op, PathBuf::from(mount_point)));
    }

    pub fn clear_failures(&self) {
        self.failures.borrow_mut().clear();
    }

    pub fn snapshot_names(&self) -> Vec<String> {
        self.snapshots.borrow().keys().cloned().collect()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.snapshots.borrow().get(name).map(|s| s.active).unwrap_or(false)
    }

    pub fn is_rollback_pending(&self, name: &str) -> bool {
        self.snapshots
            .borrow()
            .get(name)
            .map(|s| s.rollback_pending)
            .unwrap_or(false)
    }

    pub fn set_active(&self, name: &str, active: bool) {
        if let Some(s) = self.snapshots.borrow_mut().get_mut(name) {
            s.active = active;
        }
    }

    /// Mark a snapshot invalid, as an overflowed CoW snapshot would be
    pub fn set_invalid(&self, name: &str) {
        if let Some(s) = self.snapshots.borrow_mut().get_mut(name) {
            s.invalid = true;
        }
    }

    /// Number of snapshots created through the provider interface
    pub fn created(&self) -> usize {
        self.created.get()
    }

    fn check(&self, op: Op, mount_point: &Path) -> Result<()> {
        if self.failures.borrow().contains(&(op, mount_point.to_path_buf())) {
            return Err(Error::Callout {
                command: format!("mock {:?} {}", op, mount_point.display()),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn with_snapshot<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut MockSnapshot) -> Result<T>,
    ) -> Result<T> {
        let mut snapshots = self.snapshots.borrow_mut();
        let snapshot = snapshots
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("No snapshot {}", name)))?;
        f(snapshot)
    }

    fn mutate(&self, op: Op, name: &str, f: impl FnOnce(&mut MockSnapshot)) -> Result<()> {
        self.with_snapshot(name, |s| {
            self.check(op, &s.mount_point)?;
            f(s);
            Ok(())
        })
    }

    fn record(name: &str, s: &MockSnapshot) -> SnapshotRecord {
        SnapshotRecord {
            name: name.to_string(),
            snapset_name: s.snapset_name.clone(),
            origin: s.origin.clone(),
            timestamp: s.timestamp,
            mount_point: s.mount_point.clone(),
        }
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn discover_snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        Ok(self
            .snapshots
            .borrow()
            .iter()
            .filter(|(name, s)| parse_snapshot_name(name, &s.origin).is_some())
            .map(|(name, s)| Self::record(name, s))
            .collect())
    }

    fn can_snapshot(&self, mount_point: &Path) -> Result<bool> {
        Ok(self.origins.contains_key(mount_point))
    }

    fn origin_from_mount_point(&self, mount_point: &Path) -> Result<String> {
        self.origins
            .get(mount_point)
            .cloned()
            .ok_or_else(|| Error::Path(format!("{} is not mocked", mount_point.display())))
    }

    fn check_create_snapshot(
        &self,
        origin: &str,
        snapset_name: &str,
        timestamp: u64,
        mount_point: &Path,
        _size_policy: Option<&SizePolicy>,
    ) -> Result<()> {
        let name = format_snapshot_name(
            origin,
            snapset_name,
            timestamp,
            &encode_mount_point(mount_point),
        );
        if self.snapshots.borrow().contains_key(&name) {
            return Err(Error::Exists(name));
        }
        Ok(())
    }

    fn create_snapshot(
        &self,
        origin: &str,
        snapset_name: &str,
        timestamp: u64,
        mount_point: &Path,
        _size_policy: Option<&SizePolicy>,
    ) -> Result<SnapshotRecord> {
        self.check(Op::Create, mount_point)?;
        let name = format_snapshot_name(
            origin,
            snapset_name,
            timestamp,
            &encode_mount_point(mount_point),
        );
        let snapshot = MockSnapshot {
            origin: origin.to_string(),
            snapset_name: snapset_name.to_string(),
            timestamp,
            mount_point: mount_point.to_path_buf(),
            active: false,
            autoactivate: false,
            rollback_pending: false,
            invalid: false,
        };
        let record = Self::record(&name, &snapshot);
        self.snapshots.borrow_mut().insert(name, snapshot);
        self.created.set(self.created.get() + 1);
        Ok(record)
    }

    fn delete_snapshot(&self, name: &str) -> Result<()> {
        self.with_snapshot(name, |s| self.check(Op::Delete, &s.mount_point))?;
        self.snapshots.borrow_mut().remove(name);
        Ok(())
    }

    fn rename_snapshot(
        &self,
        old_name: &str,
        origin: &str,
        snapset_name: &str,
        timestamp: u64,
        mount_point: &Path,
    ) -> Result<SnapshotRecord> {
        self.with_snapshot(old_name, |s| self.check(Op::Rename, &s.mount_point))?;
        let mut snapshots = self.snapshots.borrow_mut();
        let mut snapshot = snapshots
            .remove(old_name)
            .ok_or_else(|| Error::NotFound(old_name.to_string()))?;
        snapshot.snapset_name = snapset_name.to_string();
        let origin = origin.trim_start_matches("/dev/mock/");
        let name = format_snapshot_name(
            origin,
            snapset_name,
            timestamp,
            &encode_mount_point(mount_point),
        );
        let record = Self::record(&name, &snapshot);
        snapshots.insert(name, snapshot);
        Ok(record)
    }

    fn rollback_snapshot(&self, name: &str) -> Result<()> {
        self.mutate(Op::Rollback, name, |s| s.rollback_pending = true)
    }

    fn activate_snapshot(&self, name: &str) -> Result<()> {
        self.mutate(Op::Activate, name, |s| s.active = true)
    }

    fn deactivate_snapshot(&self, name: &str) -> Result<()> {
        self.mutate(Op::Deactivate, name, |s| s.active = false)
    }

    fn set_autoactivate(&self, name: &str, auto: bool) -> Result<()> {
        self.mutate(Op::Autoactivate, name, |s| s.autoactivate = auto)
    }

    fn status(&self, name: &str) -> Result<SnapStatus> {
        self.with_snapshot(name, |s| {
            Ok(if s.invalid {
                SnapStatus::Invalid
            } else if s.active {
                SnapStatus::Active
            } else {
                SnapStatus::Inactive
            })
        })
    }

    fn autoactivate(&self, name: &str) -> Result<bool> {
        self.with_snapshot(name, |s| Ok(s.autoactivate))
    }

    fn devpath(&self, name: &str) -> Result<String> {
        self.with_snapshot(name, |s| {
            Ok(if s.active {
                format!("/dev/mock/{}", name)
            } else {
                String::new()
            })
        })
    }

    fn origin(&self, name: &str) -> Result<String> {
        self.with_snapshot(name, |s| Ok(format!("/dev/mock/{}", s.origin)))
    }

    fn origin_options(&self, _name: &str) -> Result<String> {
        Ok(String::new())
    }

    fn invalidate_cache(&self, _name: &str) {}
}

// =============================================================================
// Boot store
// =============================================================================

/// Boot store holding its entries in memory
#[derive(Default)]
pub struct MockBootStore {
    entries: RefCell<Vec<BootEntry>>,
    next_id: Cell<u32>,
    fail_create: Cell<bool>,
    fail_delete: Cell<bool>,
}

impl MockBootStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.set(fail);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.set(fail);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn all(&self) -> Vec<BootEntry> {
        self.entries.borrow().clone()
    }

    /// Add an entry directly, bypassing `create_entry`
    pub fn insert(&self, entry: BootEntry) {
        self.entries.borrow_mut().push(entry);
    }
}

impl BootStore for MockBootStore {
    fn entries(&self) -> Result<Vec<BootEntry>> {
        Ok(self.entries.borrow().clone())
    }

    fn create_entry(&self, spec: &BootEntrySpec) -> Result<BootEntry> {
        if self.fail_create.get() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only boot store",
            )));
        }
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        let entry = BootEntry {
            boot_id: format!("{:040x}", id),
            title: spec.title.clone(),
            version: spec.version.clone(),
            machine_id: "0123456789abcdef".to_string(),
            linux: spec.linux.clone(),
            initrd: spec.initrd.clone(),
            options: spec.options.clone(),
        };
        self.entries.borrow_mut().push(entry.clone());
        Ok(entry)
    }

    fn delete_entry(&self, boot_id: &str) -> Result<()> {
        if self.fail_delete.get() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only boot store",
            )));
        }
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|e| e.boot_id != boot_id);
        if entries.len() == before {
            return Err(Error::NotFound(format!("No boot entry {}", boot_id)));
        }
        Ok(())
    }

    fn uts_release(&self) -> Result<String> {
        Ok(KERNEL_VERSION.to_string())
    }

    fn machine_id(&self) -> Result<String> {
        Ok("0123456789abcdef".to_string())
    }
}

// =============================================================================
// Mount table
// =============================================================================

/// Mount table with a fixed set of mount points and fstab entries
#[derive(Default)]
pub struct MockMounts {
    mount_points: HashSet<PathBuf>,
    fstab: HashMap<PathBuf, MountEntry>,
}

impl MockMounts {
    pub fn new(mount_points: &[&str]) -> Self {
        MockMounts {
            mount_points: mount_points.iter().map(PathBuf::from).collect(),
            fstab: HashMap::new(),
        }
    }

    pub fn with_fstab(
        mut self,
        device: &str,
        mount_point: &str,
        fstype: &str,
        options: &str,
    ) -> Self {
        self.fstab.insert(
            PathBuf::from(mount_point),
            MountEntry {
                device: device.to_string(),
                mount_point: PathBuf::from(mount_point),
                fstype: fstype.to_string(),
                options: options.to_string(),
            },
        );
        self
    }
}

impl MountTable for MockMounts {
    fn is_mount_point(&self, path: &Path) -> Result<bool> {
        Ok(self.mount_points.contains(path))
    }

    fn device_for_mount_point(&self, path: &Path) -> Result<Option<String>> {
        Ok(self.fstab.get(path).map(|e| e.device.clone()))
    }

    fn fstab_entry(&self, path: &Path) -> Result<Option<MountEntry>> {
        Ok(self.fstab.get(path).cloned())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A manager over one mock provider snapshotting `/`, `/home` and `/var`
pub struct Fixture {
    pub provider: Rc<MockProvider>,
    pub boot: Rc<MockBootStore>,
    pub mounts: Rc<MockMounts>,
}

impl Fixture {
    pub fn new() -> Self {
        let provider = Rc::new(MockProvider::new(
            "mock",
            &[("/", "root"), ("/home", "home"), ("/var", "var")],
        ));
        let mounts = Rc::new(
            MockMounts::new(&["/", "/home", "/var", "/srv"])
                .with_fstab("/dev/vg0/root", "/", "xfs", "defaults")
                .with_fstab("/dev/vg0/home", "/home", "ext4", "defaults,noatime")
                .with_fstab("/dev/vg0/var", "/var", "xfs", "defaults"),
        );
        Fixture {
            provider,
            boot: Rc::new(MockBootStore::new()),
            mounts,
        }
    }

    /// Build a manager and run discovery
    pub fn manager(&self) -> Manager {
        let mut registry = ProviderRegistry::new();
        registry
            .register(self.provider.clone())
            .expect("Failed to register provider");
        let mut manager = Manager::new(registry, self.boot.clone(), self.mounts.clone());
        manager
            .discover_snapshot_sets()
            .expect("Failed to discover snapshot sets");
        manager
    }
}

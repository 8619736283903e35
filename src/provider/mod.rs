//! Snapshot provider trait, provider registry and snapshot naming

pub mod lvm2;

pub use lvm2::{Lvm2Kind, Lvm2Provider};

use crate::error::{Error, Result};
use crate::types::{SizePolicy, SnapStatus};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// A snapshot as reported by the provider that manages it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// Backend identifier of the snapshot
    pub name: String,
    pub snapset_name: String,
    /// Origin volume, as the backend names it
    pub origin: String,
    pub timestamp: u64,
    pub mount_point: PathBuf,
}

/// Trait defining the snapshot backend contract
///
/// One implementation exists per backend kind. Snapshots are addressed by
/// their backend name; the orchestration layer never reaches a backend
/// except through this trait.
pub trait Provider {
    /// Provider name, e.g. `lvm2-cow`
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    // === Discovery ===

    /// List every snapshot this provider manages
    fn discover_snapshots(&self) -> Result<Vec<SnapshotRecord>>;

    /// Check if this provider can snapshot the file system at `mount_point`
    fn can_snapshot(&self, mount_point: &Path) -> Result<bool>;

    /// Resolve the origin volume backing `mount_point`
    fn origin_from_mount_point(&self, mount_point: &Path) -> Result<String>;

    // === Snapshot Management ===

    /// Check that a snapshot could be created, without creating it
    fn check_create_snapshot(
        &self,
        origin: &str,
        snapset_name: &str,
        timestamp: u64,
        mount_point: &Path,
        size_policy: Option<&SizePolicy>,
    ) -> Result<()>;

    /// Create a snapshot of `origin` as a member of `snapset_name`
    fn create_snapshot(
        &self,
        origin: &str,
        snapset_name: &str,
        timestamp: u64,
        mount_point: &Path,
        size_policy: Option<&SizePolicy>,
    ) -> Result<SnapshotRecord>;

    fn delete_snapshot(&self, name: &str) -> Result<()>;

    /// Rename a snapshot to belong to `snapset_name`
    fn rename_snapshot(
        &self,
        old_name: &str,
        origin: &str,
        snapset_name: &str,
        timestamp: u64,
        mount_point: &Path,
    ) -> Result<SnapshotRecord>;

    /// Request that the origin be reverted to the snapshot content.
    ///
    /// May not take effect until the origin is next activated.
    fn rollback_snapshot(&self, name: &str) -> Result<()>;

    // === Activation ===

    fn activate_snapshot(&self, name: &str) -> Result<()>;

    fn deactivate_snapshot(&self, name: &str) -> Result<()>;

    fn set_autoactivate(&self, name: &str, auto: bool) -> Result<()>;

    // === Snapshot Properties ===

    fn status(&self, name: &str) -> Result<SnapStatus>;

    fn autoactivate(&self, name: &str) -> Result<bool>;

    /// Device path of the snapshot, empty if it is not active
    fn devpath(&self, name: &str) -> Result<String>;

    fn origin(&self, name: &str) -> Result<String>;

    /// Mount options needed to address the origin
    fn origin_options(&self, name: &str) -> Result<String>;

    /// Drop any cached state held for `name`
    fn invalidate_cache(&self, name: &str);
}

/// Registered providers, in priority order
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Rc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider; names must be unique
    pub fn register(&mut self, provider: Rc<dyn Provider>) -> Result<()> {
        if self.providers.iter().any(|p| p.name() == provider.name()) {
            return Err(Error::Exists(format!(
                "Provider '{}' is already registered",
                provider.name()
            )));
        }
        debug!("Registered provider {} version {}", provider.name(), provider.version());
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Rc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| Error::NoProvider(format!("No provider named '{}'", name)))
    }

    /// Find the first provider able to snapshot `mount_point`
    pub fn for_mount_point(&self, mount_point: &Path) -> Result<Rc<dyn Provider>> {
        for provider in &self.providers {
            if provider.can_snapshot(mount_point)? {
                debug!("Provider {} selected for {}", provider.name(), mount_point.display());
                return Ok(provider.clone());
            }
        }
        Err(Error::NoProvider(format!(
            "Could not find snapshot provider for {}",
            mount_point.display()
        )))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<dyn Provider>> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Separator between an origin name and the snapshot set fields
const SNAPSET_TAG: &str = "-snapset_";

/// Encode a mount point for use inside a snapshot name.
///
/// `/` becomes `-`; elsewhere `-` is doubled and each `/` becomes `-`.
pub fn encode_mount_point(mount_point: &Path) -> String {
    let path = mount_point.to_string_lossy();
    if path == "/" {
        return "-".to_string();
    }
    path.replace('-', "--").replace('/', "-")
}

/// Reverse of [`encode_mount_point`]
pub fn decode_mount_point(encoded: &str) -> PathBuf {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '-' {
            if chars.peek() == Some(&'-') {
                chars.next();
                out.push('-');
            } else {
                out.push('/');
            }
        } else {
            out.push(c);
        }
    }
    PathBuf::from(out)
}

/// Build the backend name of a snapshot set member
pub fn format_snapshot_name(
    origin: &str,
    snapset_name: &str,
    timestamp: u64,
    encoded_mount_point: &str,
) -> String {
    format!(
        "{}{}{}_{}_{}",
        origin, SNAPSET_TAG, snapset_name, timestamp, encoded_mount_point
    )
}

/// Split a snapshot name into `(snapset_name, timestamp, mount_point)`.
///
/// Returns `None` for names that are not snapshot set members of `origin`.
pub fn parse_snapshot_name(name: &str, origin: &str) -> Option<(String, u64, PathBuf)> {
    let rest = name.strip_prefix(origin)?.strip_prefix(SNAPSET_TAG)?;
    let mut fields = rest.splitn(3, '_');
    let snapset_name = fields.next().filter(|s| !s.is_empty())?;
    let timestamp = fields.next()?.parse::<u64>().ok()?;
    let mount_point = fields.next().filter(|s| !s.is_empty())?;
    Some((
        snapset_name.to_string(),
        timestamp,
        decode_mount_point(mount_point),
    ))
}

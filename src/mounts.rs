//! Mount table access: mounted file systems and /etc/fstab

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::sys::stat::stat;
use nix::sys::statvfs::statvfs;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROC_MOUNTS: &str = "/proc/self/mounts";
pub const ETC_FSTAB: &str = "/etc/fstab";

/// One line of a mount table (fstab or /proc/self/mounts)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fstype: String,
    pub options: String,
}

/// Parse a table in fstab(5) format, skipping comments and short lines
pub fn parse_mount_table(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            Some(MountEntry {
                device: unescape(parts[0]),
                mount_point: PathBuf::from(unescape(parts[1])),
                fstype: parts[2].to_string(),
                options: parts.get(3).copied().unwrap_or("defaults").to_string(),
            })
        })
        .collect()
}

/// Decode the octal escapes (`\040` etc.) used in mount tables
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let code = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(code) = code {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Read access to the system mount configuration
pub trait MountTable {
    /// Check if `path` is the root of a mounted file system
    fn is_mount_point(&self, path: &Path) -> Result<bool>;

    /// Device currently mounted at `path`, if any
    fn device_for_mount_point(&self, path: &Path) -> Result<Option<String>>;

    /// The fstab entry for `path`, if any
    fn fstab_entry(&self, path: &Path) -> Result<Option<MountEntry>>;
}

/// Mount table backed by the running system
#[derive(Debug, Clone)]
pub struct SystemMounts {
    proc_mounts: PathBuf,
    fstab: PathBuf,
}

impl SystemMounts {
    pub fn new() -> Self {
        Self::with_paths(PROC_MOUNTS, ETC_FSTAB)
    }

    pub fn with_paths(proc_mounts: impl Into<PathBuf>, fstab: impl Into<PathBuf>) -> Self {
        SystemMounts {
            proc_mounts: proc_mounts.into(),
            fstab: fstab.into(),
        }
    }

    fn read_table(&self, path: &Path) -> Result<Vec<MountEntry>> {
        let content = fs::read_to_string(path)?;
        Ok(parse_mount_table(&content))
    }
}

impl Default for SystemMounts {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable for SystemMounts {
    fn is_mount_point(&self, path: &Path) -> Result<bool> {
        let st = match stat(path) {
            Ok(st) => st,
            Err(Errno::ENOENT) | Err(Errno::ENOTDIR) => return Ok(false),
            Err(e) => return Err(Error::Io(e.into())),
        };
        let parent = stat(&path.join("..")).map_err(|e| Error::Io(e.into()))?;
        // A different device, or the same inode (/), marks a mount point
        Ok(st.st_dev != parent.st_dev || st.st_ino == parent.st_ino)
    }

    fn device_for_mount_point(&self, path: &Path) -> Result<Option<String>> {
        // Later entries shadow earlier ones mounted at the same place
        Ok(self
            .read_table(&self.proc_mounts)?
            .into_iter()
            .rev()
            .find(|m| m.mount_point == path)
            .map(|m| m.device))
    }

    fn fstab_entry(&self, path: &Path) -> Result<Option<MountEntry>> {
        if !self.fstab.exists() {
            return Ok(None);
        }
        Ok(self
            .read_table(&self.fstab)?
            .into_iter()
            .find(|m| m.mount_point == path))
    }
}

/// Bytes in use on the file system mounted at `mount_point`
pub fn space_used(mount_point: &Path) -> Result<u64> {
    let st = statvfs(mount_point).map_err(|e| Error::Io(e.into()))?;
    let used_blocks = st.blocks().saturating_sub(st.blocks_free());
    Ok(used_blocks as u64 * st.fragment_size() as u64)
}

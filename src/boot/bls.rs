//! Boot Loader Specification entry store

use super::{BootEntry, BootEntrySpec, BootStore};
use crate::error::{Error, Result};
use nix::sys::utsname::uname;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::{uuid, Uuid};

pub const DEFAULT_ENTRIES_DIR: &str = "/boot/loader/entries";
pub const DEFAULT_MACHINE_ID: &str = "/etc/machine-id";

/// Namespace for boot ids derived from entry content
const NAMESPACE_BOOT_ENTRY: Uuid = uuid!("6e3a8e2c-5f14-4b8d-9a62-2c0f7d1b94e5");

/// Length of the boot id embedded in entry file names
const BOOT_ID_LEN: usize = 7;

/// Boot entries stored as BLS snippets in `loader/entries`
#[derive(Debug, Clone)]
pub struct BlsBootStore {
    entries_dir: PathBuf,
    machine_id_path: PathBuf,
    /// Prefix for kernel and initramfs paths, for /boot on the root fs
    boot_prefix: String,
}

impl BlsBootStore {
    pub fn new(
        entries_dir: impl Into<PathBuf>,
        machine_id_path: impl Into<PathBuf>,
        boot_prefix: impl Into<String>,
    ) -> Self {
        BlsBootStore {
            entries_dir: entries_dir.into(),
            machine_id_path: machine_id_path.into(),
            boot_prefix: boot_prefix.into(),
        }
    }

    pub fn entries_dir(&self) -> &Path {
        &self.entries_dir
    }

    fn entry_path(&self, machine_id: &str, boot_id: &str, version: &str) -> PathBuf {
        self.entries_dir
            .join(format!("{}-{}-{}.conf", machine_id, boot_id, version))
    }

    /// Find the file holding the entry with `boot_id`
    fn find_entry_file(&self, boot_id: &str) -> Result<Option<PathBuf>> {
        if !self.entries_dir.exists() {
            return Ok(None);
        }
        for dirent in fs::read_dir(&self.entries_dir)? {
            let path = dirent?.path();
            if let Some((_, id, _)) = split_entry_file_name(&path) {
                if id == boot_id || id.starts_with(boot_id) {
                    return Ok(Some(path));
                }
            }
        }
        Ok(None)
    }
}

impl Default for BlsBootStore {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRIES_DIR, DEFAULT_MACHINE_ID, "")
    }
}

/// Split `<machine_id>-<boot_id>-<version>.conf`
fn split_entry_file_name(path: &Path) -> Option<(String, String, String)> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix(".conf")?;
    let mut parts = stem.splitn(3, '-');
    let machine_id = parts.next().filter(|s| !s.is_empty())?;
    let boot_id = parts.next().filter(|s| !s.is_empty())?;
    let version = parts.next().filter(|s| !s.is_empty())?;
    Some((machine_id.to_string(), boot_id.to_string(), version.to_string()))
}

/// Render the body of an entry file
fn render_entry(entry: &BootEntry) -> String {
    format!(
        "title {}\nversion {}\nmachine-id {}\nlinux {}\ninitrd {}\noptions {}\n",
        entry.title, entry.version, entry.machine_id, entry.linux, entry.initrd, entry.options
    )
}

/// Parse an entry file body; unknown keys are ignored
fn parse_entry(boot_id: &str, content: &str) -> BootEntry {
    let mut entry = BootEntry {
        boot_id: boot_id.to_string(),
        title: String::new(),
        version: String::new(),
        machine_id: String::new(),
        linux: String::new(),
        initrd: String::new(),
        options: String::new(),
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim().to_string()),
            None => (line, String::new()),
        };
        match key {
            "title" => entry.title = value,
            "version" => entry.version = value,
            "machine-id" => entry.machine_id = value,
            "linux" => entry.linux = value,
            "initrd" => entry.initrd = value,
            "options" => entry.options = value,
            _ => {}
        }
    }
    entry
}

/// Derive a boot id from the rendered entry body
fn boot_id_for(body: &str) -> String {
    let hex = Uuid::new_v5(&NAMESPACE_BOOT_ENTRY, body.as_bytes())
        .simple()
        .to_string();
    hex[..BOOT_ID_LEN].to_string()
}

impl BootStore for BlsBootStore {
    fn entries(&self) -> Result<Vec<BootEntry>> {
        if !self.entries_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.entries_dir)? {
            let path = dirent?.path();
            let Some((_, boot_id, _)) = split_entry_file_name(&path) else {
                debug!("Skipping non-entry file {}", path.display());
                continue;
            };
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    warn!("Skipping unreadable boot entry {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            entries.push(parse_entry(&boot_id, &content));
        }
        entries.sort_by(|a, b| a.boot_id.cmp(&b.boot_id));
        Ok(entries)
    }

    fn create_entry(&self, spec: &BootEntrySpec) -> Result<BootEntry> {
        let machine_id = self.machine_id()?;
        let mut entry = BootEntry {
            boot_id: String::new(),
            title: spec.title.clone(),
            version: spec.version.clone(),
            machine_id: machine_id.clone(),
            linux: format!("{}{}", self.boot_prefix, spec.linux),
            initrd: format!("{}{}", self.boot_prefix, spec.initrd),
            options: spec.options.clone(),
        };
        let body = render_entry(&entry);
        entry.boot_id = boot_id_for(&body);

        let path = self.entry_path(&machine_id, &entry.boot_id, &entry.version);
        if path.exists() {
            return Err(Error::Exists(format!(
                "Boot entry {} already exists",
                entry.boot_id
            )));
        }
        fs::create_dir_all(&self.entries_dir)?;
        fs::write(&path, body)?;
        debug!("Wrote boot entry {}", path.display());
        Ok(entry)
    }

    fn delete_entry(&self, boot_id: &str) -> Result<()> {
        let path = self
            .find_entry_file(boot_id)?
            .ok_or_else(|| Error::NotFound(format!("Boot entry {} not found", boot_id)))?;
        fs::remove_file(&path)?;
        debug!("Removed boot entry {}", path.display());
        Ok(())
    }

    fn uts_release(&self) -> Result<String> {
        let uts = uname().map_err(|e| Error::Io(e.into()))?;
        Ok(uts.release().to_string_lossy().into_owned())
    }

    fn machine_id(&self) -> Result<String> {
        let machine_id = fs::read_to_string(&self.machine_id_path)?.trim().to_string();
        if machine_id.is_empty() {
            return Err(Error::NotFound(format!(
                "No machine id in {}",
                self.machine_id_path.display()
            )));
        }
        Ok(machine_id)
    }
}

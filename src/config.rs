//! snapm configuration file

use crate::boot::bls::{BlsBootStore, DEFAULT_ENTRIES_DIR, DEFAULT_MACHINE_ID};
use crate::error::{Error, Result};
use crate::mounts::{MountTable, SystemMounts, ETC_FSTAB, PROC_MOUNTS};
use crate::provider::{Lvm2Kind, Lvm2Provider, ProviderRegistry};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/snapm/snapm.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// The logging filter to use.
    ///
    /// Can be any `EnvFilter` directive string. `-v` on the command line
    /// and the `RUST_LOG` environment variable take precedence.
    ///
    /// Defaults to "warn".
    pub log_level: String,
    /// fstab used to find file system types and options for boot entries
    pub fstab: PathBuf,
    /// Table of currently mounted file systems
    pub proc_mounts: PathBuf,
    pub boot: BootConfig,
    pub lvm2: Lvm2Config,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BootConfig {
    /// Directory holding BLS entry files
    pub entries_dir: PathBuf,
    pub machine_id: PathBuf,
    /// Prefix for kernel paths in new entries.
    ///
    /// Empty when /boot is a separate file system, `/boot` otherwise.
    pub boot_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Lvm2Config {
    pub enable_cow: bool,
    pub enable_thin: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "warn".into(),
            fstab: ETC_FSTAB.into(),
            proc_mounts: PROC_MOUNTS.into(),
            boot: BootConfig::default(),
            lvm2: Lvm2Config::default(),
        }
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            entries_dir: DEFAULT_ENTRIES_DIR.into(),
            machine_id: DEFAULT_MACHINE_ID.into(),
            boot_prefix: String::new(),
        }
    }
}

impl Default for Lvm2Config {
    fn default() -> Self {
        Self {
            enable_cow: true,
            enable_thin: true,
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Load the configuration.
    ///
    /// An explicit `path` must exist and parse. Without one, the default
    /// file is used when present and the built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if !required && e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Config(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn mount_table(&self) -> SystemMounts {
        SystemMounts::with_paths(&self.proc_mounts, &self.fstab)
    }

    pub fn boot_store(&self) -> BlsBootStore {
        BlsBootStore::new(
            &self.boot.entries_dir,
            &self.boot.machine_id,
            self.boot.boot_prefix.clone(),
        )
    }

    /// Register the enabled providers, in priority order
    pub fn providers(&self, mounts: Rc<dyn MountTable>) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        if self.lvm2.enable_cow {
            registry.register(Rc::new(Lvm2Provider::new(Lvm2Kind::Cow, mounts.clone())))?;
        }
        if self.lvm2.enable_thin {
            registry.register(Rc::new(Lvm2Provider::new(Lvm2Kind::Thin, mounts)))?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn parses_kebab_case_keys() {
        let config = Config::from_toml(
            r#"
log-level = "snapm=debug"
fstab = "/tmp/fstab"

[boot]
entries-dir = "/efi/loader/entries"
boot-prefix = "/boot"

[lvm2]
enable-thin = false
"#,
        )
        .unwrap();
        assert_eq!(config.log_level, "snapm=debug");
        assert_eq!(config.fstab, PathBuf::from("/tmp/fstab"));
        assert_eq!(config.proc_mounts, PathBuf::from(PROC_MOUNTS));
        assert_eq!(config.boot.entries_dir, PathBuf::from("/efi/loader/entries"));
        assert_eq!(config.boot.machine_id, PathBuf::from(DEFAULT_MACHINE_ID));
        assert_eq!(config.boot.boot_prefix, "/boot");
        assert!(config.lvm2.enable_cow);
        assert!(!config.lvm2.enable_thin);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        assert!(matches!(
            Config::from_toml("log-level = "),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("snapm.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(Error::Config(_))));

        let mut file = fs::File::create(&missing).unwrap();
        writeln!(file, "log-level = \"info\"").unwrap();
        assert_eq!(Config::load(Some(&missing)).unwrap().log_level, "info");
    }

    #[test]
    fn providers_follow_lvm2_switches() {
        let mounts: Rc<dyn MountTable> = Rc::new(SystemMounts::new());
        let mut config = Config::default();
        assert_eq!(config.providers(mounts.clone()).unwrap().len(), 2);
        config.lvm2.enable_cow = false;
        let registry = config.providers(mounts).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("lvm2-thin").is_ok());
    }
}

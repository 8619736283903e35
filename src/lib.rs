//! snapm: Manage snapshot sets
//!
//! A snapshot set is a group of snapshots of several mounted file systems
//! taken at the same moment. Snapshots are created and managed by providers
//! (LVM2 copy-on-write and thin snapshots) behind the [`Provider`] trait; the
//! [`Manager`] groups them into sets, selects them, and ties them to boot
//! entries so a system can be booted into a snapshot set or rolled back to it.

pub mod boot;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod mounts;
pub mod provider;
pub mod report;
pub mod selection;
pub mod snapshot;
pub mod types;

pub use boot::{BootEntry, BootEntrySpec, BootStore};
pub use error::{Error, Result};
pub use manager::Manager;
pub use mounts::{MountEntry, MountTable};
pub use provider::{Provider, ProviderRegistry, SnapshotRecord};
pub use selection::Selection;
pub use snapshot::{Snapshot, SnapshotSet};
pub use types::{MountSpec, Outcome, SizePolicy, SnapStatus};

//! Procedural interface used by the `snapm` command
//!
//! Wraps [`Manager`] operations with the policy the command line needs:
//! creation with boot entries that is undone as a whole on failure, single
//! target checks for destructive operations, and the `show` and `list`
//! output formats.

use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::report::{FieldType, FieldValue, Report, ReportOpts};
use crate::selection::Selection;
use crate::snapshot::{Snapshot, SnapshotSet};
use crate::types::{MountSpec, Outcome};
use tracing::{error, info};

pub const DEFAULT_SNAPSET_FIELDS: &str = "name,time,nr_snapshots,status,mountpoints";
pub const VERBOSE_SNAPSET_FIELDS: &str =
    "name,time,nr_snapshots,status,mountpoints,autoactivate,uuid";
pub const DEFAULT_SNAPSHOT_FIELDS: &str =
    "snapshot_name,origin,mountpoint,status,autoactivate,devpath";
pub const VERBOSE_SNAPSHOT_FIELDS: &str =
    "snapshot_name,origin,mountpoint,status,autoactivate,devpath,provider,snapshot_uuid";

/// An object in a snapshot set or snapshot report
pub struct ReportObj<'a> {
    pub snapset: &'a SnapshotSet,
    pub snapshot: Option<&'a Snapshot>,
}

impl<'a> ReportObj<'a> {
    fn snapshot(&self) -> Result<&'a Snapshot> {
        self.snapshot
            .ok_or_else(|| Error::Snapm("Snapshot field used in a snapshot set report".to_string()))
    }
}

fn yes_no(value: bool) -> FieldValue {
    FieldValue::str(if value { "yes" } else { "no" })
}

/// Fields describing snapshot sets
pub fn snapset_fields<'a>() -> Vec<FieldType<ReportObj<'a>>> {
    vec![
        FieldType {
            name: "name",
            heading: "SnapsetName",
            description: "Snapshot set name",
            width: 12,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::str(o.snapset.name())),
        },
        FieldType {
            name: "uuid",
            heading: "SnapsetUuid",
            description: "Snapshot set UUID",
            width: 37,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::str(o.snapset.uuid().to_string())),
        },
        FieldType {
            name: "timestamp",
            heading: "Timestamp",
            description: "Snapshot set creation time as a UNIX epoch value",
            width: 10,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::Num(o.snapset.timestamp())),
        },
        FieldType {
            name: "time",
            heading: "Time",
            description: "Snapshot set creation time",
            width: 20,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::str(o.snapset.time())),
        },
        FieldType {
            name: "nr_snapshots",
            heading: "NrSnapshots",
            description: "Number of snapshots",
            width: 11,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::Num(o.snapset.nr_snapshots() as u64)),
        },
        FieldType {
            name: "mountpoints",
            heading: "MountPoints",
            description: "Snapshot set mount points",
            width: 24,
            accessor: |o: &ReportObj<'a>| {
                let mount_points: Vec<String> = o
                    .snapset
                    .mount_points()
                    .iter()
                    .map(|mp| mp.display().to_string())
                    .collect();
                Ok(FieldValue::str(mount_points.join(", ")))
            },
        },
        FieldType {
            name: "status",
            heading: "Status",
            description: "Snapshot set status",
            width: 7,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::str(o.snapset.status()?.to_string())),
        },
        FieldType {
            name: "autoactivate",
            heading: "Autoactivate",
            description: "Autoactivation status",
            width: 12,
            accessor: |o: &ReportObj<'a>| Ok(yes_no(o.snapset.autoactivate()?)),
        },
        FieldType {
            name: "bootentry",
            heading: "BootEntry",
            description: "Snapshot set boot entry",
            width: 10,
            accessor: |o: &ReportObj<'a>| {
                Ok(FieldValue::str(
                    o.snapset.boot_entry().map(|e| e.disp_boot_id()).unwrap_or(""),
                ))
            },
        },
        FieldType {
            name: "rollbackentry",
            heading: "RollbackEntry",
            description: "Snapshot set rollback boot entry",
            width: 13,
            accessor: |o: &ReportObj<'a>| {
                Ok(FieldValue::str(
                    o.snapset.rollback_entry().map(|e| e.disp_boot_id()).unwrap_or(""),
                ))
            },
        },
    ]
}

/// Fields describing snapshots, followed by the fields of their sets
pub fn snapshot_fields<'a>() -> Vec<FieldType<ReportObj<'a>>> {
    let mut fields = vec![
        FieldType {
            name: "snapshot_name",
            heading: "SnapshotName",
            description: "Snapshot name",
            width: 24,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::str(o.snapshot()?.name())),
        },
        FieldType {
            name: "snapshot_uuid",
            heading: "SnapshotUuid",
            description: "Snapshot UUID",
            width: 37,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::str(o.snapshot()?.uuid().to_string())),
        },
        FieldType {
            name: "origin",
            heading: "Origin",
            description: "Snapshot origin",
            width: 16,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::str(o.snapshot()?.origin()?)),
        },
        FieldType {
            name: "mountpoint",
            heading: "MountPoint",
            description: "Snapshot mount point",
            width: 16,
            accessor: |o: &ReportObj<'a>| {
                Ok(FieldValue::str(o.snapshot()?.mount_point().display().to_string()))
            },
        },
        FieldType {
            name: "devpath",
            heading: "DevPath",
            description: "Snapshot device path",
            width: 8,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::str(o.snapshot()?.devpath()?)),
        },
        FieldType {
            name: "provider",
            heading: "Provider",
            description: "Snapshot provider plugin",
            width: 8,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::str(o.snapshot()?.provider_name())),
        },
        FieldType {
            name: "status",
            heading: "Status",
            description: "Snapshot status",
            width: 7,
            accessor: |o: &ReportObj<'a>| Ok(FieldValue::str(o.snapshot()?.status()?.to_string())),
        },
        FieldType {
            name: "autoactivate",
            heading: "Autoactivate",
            description: "Autoactivation status",
            width: 12,
            accessor: |o: &ReportObj<'a>| Ok(yes_no(o.snapshot()?.autoactivate()?)),
        },
    ];
    // Set fields sharing a name with a snapshot field are shadowed
    fields.extend(
        snapset_fields()
            .into_iter()
            .filter(|f| f.name != "status" && f.name != "autoactivate"),
    );
    fields
}

/// Expand a user field list: empty means the defaults, a leading `+`
/// appends to them
pub fn expand_fields(default_fields: &str, output_fields: Option<&str>) -> String {
    match output_fields {
        None | Some("") => default_fields.to_string(),
        Some(fields) => match fields.strip_prefix('+') {
            Some(extra) => format!("{},{}", default_fields, extra),
            None => fields.to_string(),
        },
    }
}

fn first_error(outcome: Outcome) -> Result<()> {
    match outcome.errors.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn provision_boot(
    manager: &mut Manager,
    select: &Selection,
    boot: bool,
    rollback: bool,
) -> Result<()> {
    // Snapshot sets must be active to create boot entries
    first_error(manager.activate_snapshot_sets(select)?)?;
    let uuid = select.uuid;
    if boot {
        manager.create_snapshot_set_boot_entry(None, uuid)?;
    }
    if rollback {
        manager.create_snapshot_set_rollback_entry(None, uuid)?;
    }
    Ok(())
}

/// Create a snapshot set, optionally with boot and rollback entries.
///
/// If activation or entry creation fails, the set is deleted again and the
/// error returned.
pub fn create_snapset(
    manager: &mut Manager,
    name: &str,
    mount_specs: &[MountSpec],
    boot: bool,
    rollback: bool,
) -> Result<SnapshotSet> {
    let uuid = manager.create_snapshot_set(name, mount_specs)?.uuid();
    let select = Selection::by_uuid(uuid);

    if boot || rollback {
        if let Err(e) = provision_boot(manager, &select, boot, rollback) {
            error!("Failed to create boot entries for snapshot set {}: {}", name, e);
            match manager.delete_snapshot_sets(&select) {
                Ok(outcome) => {
                    for cleanup in outcome.errors {
                        error!("Error cleaning up snapshot set {}: {}", name, cleanup);
                    }
                }
                Err(cleanup) => error!("Error cleaning up snapshot set {}: {}", name, cleanup),
            }
            return Err(e);
        }
    }

    manager
        .find_snapshot_sets(&select)?
        .into_iter()
        .next()
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("Snapshot set {} disappeared", name)))
}

/// Delete the single snapshot set identified by `selection`
pub fn delete_snapset(manager: &mut Manager, selection: &Selection) -> Result<Outcome> {
    if !selection.is_single() {
        return Err(Error::InvalidIdentifier(
            "Delete requires unique selection criteria".to_string(),
        ));
    }
    manager.delete_snapshot_sets(selection)
}

pub fn rename_snapset(
    manager: &mut Manager,
    old_name: &str,
    new_name: &str,
) -> Result<SnapshotSet> {
    let snapset = manager.rename_snapshot_set(old_name, new_name)?;
    info!("Renamed {} to {}", old_name, new_name);
    Ok(snapset.clone())
}

/// Roll back the single snapshot set identified by `selection`
pub fn rollback_snapset(manager: &Manager, selection: &Selection) -> Result<Outcome> {
    if !selection.is_single() {
        return Err(Error::InvalidIdentifier(
            "Roll back requires unique selection criteria".to_string(),
        ));
    }
    manager.rollback_snapshot_sets(selection)
}

fn indent(text: &str, by: usize) -> String {
    let pad = " ".repeat(by);
    text.lines()
        .map(|line| format!("{}{}", pad, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Multi-line descriptions of the matching snapshot sets, optionally
/// followed by their members
pub fn show_snapsets(manager: &Manager, selection: &Selection, members: bool) -> Result<String> {
    let mut out = String::new();
    for snapset in manager.find_snapshot_sets(selection)? {
        out.push_str(&snapset.show()?);
        out.push('\n');
        if members {
            out.push_str("Snapshots:\n");
            for snapshot in snapset.snapshots() {
                out.push_str(&indent(&snapshot.show()?, 4));
                out.push_str("\n\n");
            }
        }
        out.push('\n');
    }
    Ok(out)
}

/// Multi-line descriptions of the matching snapshots
pub fn show_snapshots(manager: &Manager, selection: &Selection) -> Result<String> {
    let mut out = String::new();
    for snapshot in manager.find_snapshots(selection)? {
        out.push_str(&snapshot.show()?);
        out.push_str("\n\n");
    }
    Ok(out)
}

/// Report on the matching snapshot sets
pub fn print_snapsets(
    manager: &Manager,
    selection: &Selection,
    output_fields: Option<&str>,
    opts: &ReportOpts,
    sort_keys: Option<&str>,
) -> Result<String> {
    let fields = expand_fields(DEFAULT_SNAPSET_FIELDS, output_fields);
    let table = snapset_fields();
    let mut report = Report::new(&table, &fields, opts.clone(), sort_keys)?;
    for snapset in manager.find_snapshot_sets(selection)? {
        report.report_object(&ReportObj {
            snapset,
            snapshot: None,
        })?;
    }
    Ok(report.output())
}

/// Report on the matching snapshots
pub fn print_snapshots(
    manager: &Manager,
    selection: &Selection,
    output_fields: Option<&str>,
    opts: &ReportOpts,
    sort_keys: Option<&str>,
) -> Result<String> {
    let fields = expand_fields(DEFAULT_SNAPSHOT_FIELDS, output_fields);
    let table = snapshot_fields();
    let mut report = Report::new(&table, &fields, opts.clone(), sort_keys)?;
    for snapshot in manager.find_snapshots(selection)? {
        let snapset = manager
            .snapshot_sets()
            .iter()
            .find(|s| s.uuid() == snapshot.snapset_uuid())
            .ok_or_else(|| {
                Error::NotFound(format!("No snapshot set for snapshot {}", snapshot.name()))
            })?;
        report.report_object(&ReportObj {
            snapset,
            snapshot: Some(snapshot),
        })?;
    }
    Ok(report.output())
}

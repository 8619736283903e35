//! LVM2 snapshot provider
//!
//! Drives the LVM2 command line tools. Two flavours share one implementation:
//! copy-on-write snapshots of ordinary logical volumes (`lvm2-cow`) and
//! snapshots of thin volumes (`lvm2-thin`).

use super::{
    encode_mount_point, format_snapshot_name, parse_snapshot_name, Provider, SnapshotRecord,
};
use crate::error::{Error, Result};
use crate::mounts::{space_used, MountTable};
use crate::types::{SizePolicy, SnapStatus};
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::debug;

const LVM_MAX_NAME_LEN: usize = 127;
const LVS_FIELD_OPTIONS: &str =
    "vg_name,lv_name,lv_attr,origin,pool_lv,lv_size,data_percent,lv_role";
const VGS_FIELD_OPTIONS: &str = "vg_name,vg_free";
const LVM_UUID_PREFIX: &str = "LVM-";
const DEV_MAPPER_PREFIX: &str = "/dev/mapper/";

/// Index of the state flag in `lv_attr`
const LV_STATE_ATTR_IDX: usize = 4;
/// Index of the activation skip flag in `lv_attr`
const LV_SKIP_ACTIVATION_IDX: usize = 9;

/// Smallest CoW snapshot we create (512MiB)
const MIN_COW_SNAPSHOT_SIZE: u64 = 512 * 1024 * 1024;

/// How long an `lvs` report for one volume stays valid
const LVS_CACHE_VALID: Duration = Duration::from_secs(5);

/// Which kind of LVM2 snapshot a provider manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lvm2Kind {
    Cow,
    Thin,
}

impl Lvm2Kind {
    pub fn provider_name(&self) -> &'static str {
        match self {
            Lvm2Kind::Cow => "lvm2-cow",
            Lvm2Kind::Thin => "lvm2-thin",
        }
    }

    /// Test an `lv_attr` / `lv_role` pair for a snapshot of this kind
    fn is_snapshot(&self, lv: &LvReport) -> bool {
        let (attr, role) = match self {
            Lvm2Kind::Cow => ('s', "thicksnapshot"),
            Lvm2Kind::Thin => ('V', "thinsnapshot"),
        };
        lv.lv_attr.starts_with(attr) && lv.lv_role.contains(role) && !lv.origin.is_empty()
    }

    /// Test whether a volume with this `lv_attr` can be snapshotted
    fn can_snapshot_attr(&self, lv_attr: &str) -> bool {
        let volume_type = lv_attr.chars().next();
        match self {
            Lvm2Kind::Cow => matches!(volume_type, Some('-') | Some('o')),
            Lvm2Kind::Thin => volume_type == Some('V'),
        }
    }
}

// === lvs / vgs JSON reports ===

#[derive(Debug, Deserialize)]
struct LvsReport {
    report: Vec<LvsSection>,
}

#[derive(Debug, Deserialize)]
struct LvsSection {
    #[serde(default)]
    lv: Vec<LvReport>,
}

/// One logical volume as reported by `lvs`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LvReport {
    pub vg_name: String,
    pub lv_name: String,
    pub lv_attr: String,
    pub origin: String,
    pub pool_lv: String,
    pub lv_size: String,
    pub data_percent: String,
    pub lv_role: String,
}

impl LvReport {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.vg_name, self.lv_name)
    }

    fn attr_at(&self, idx: usize) -> Option<char> {
        self.lv_attr.chars().nth(idx)
    }

    pub fn status(&self) -> SnapStatus {
        match self.attr_at(LV_STATE_ATTR_IDX) {
            Some('a') => SnapStatus::Active,
            Some('I') => SnapStatus::Invalid,
            _ => SnapStatus::Inactive,
        }
    }

    pub fn autoactivate(&self) -> bool {
        self.attr_at(LV_SKIP_ACTIVATION_IDX) != Some('k')
    }

    pub fn size(&self) -> Result<u64> {
        parse_bytes(&self.lv_size)
    }

    /// Free space in a thin pool, from its size and data usage
    pub fn pool_free(&self) -> Result<u64> {
        let size = self.size()?;
        let data_percent: f64 = self.data_percent.trim().parse().map_err(|_| {
            Error::Snapm(format!(
                "Invalid data_percent '{}' for {}",
                self.data_percent,
                self.full_name()
            ))
        })?;
        let used = (size as f64 * data_percent / 100.0).floor() as u64;
        Ok(size.saturating_sub(used))
    }
}

#[derive(Debug, Deserialize)]
struct VgsReport {
    report: Vec<VgsSection>,
}

#[derive(Debug, Deserialize)]
struct VgsSection {
    #[serde(default)]
    vg: Vec<VgReport>,
}

#[derive(Debug, Deserialize)]
struct VgReport {
    vg_name: String,
    vg_free: String,
}

/// Parse the logical volumes out of `lvs --reportformat json` output
pub fn parse_lvs_report(output: &str) -> Result<Vec<LvReport>> {
    let report: LvsReport = serde_json::from_str(output)?;
    Ok(report.report.into_iter().flat_map(|s| s.lv).collect())
}

/// Free bytes of `vg_name` from `vgs --reportformat json` output
fn parse_vg_free(output: &str, vg_name: &str) -> Result<u64> {
    let report: VgsReport = serde_json::from_str(output)?;
    report
        .report
        .into_iter()
        .flat_map(|s| s.vg)
        .find(|vg| vg.vg_name == vg_name)
        .ok_or_else(|| Error::NotFound(format!("Volume group {} not found", vg_name)))
        .and_then(|vg| parse_bytes(&vg.vg_free))
}

/// Parse an lvm byte count such as `1073741824B`
fn parse_bytes(value: &str) -> Result<u64> {
    value
        .trim()
        .trim_end_matches('B')
        .parse()
        .map_err(|_| Error::Snapm(format!("Invalid size value '{}'", value)))
}

/// Parse size strings like "1.5G", "500M", "10K"
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('T') {
        (n, 1024u64 * 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1024u64 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024u64 * 1024)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1024u64)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s, 1)
    };

    num_str
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| (n * multiplier as f64) as u64)
}

/// A parsed size policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeRequest {
    /// Percentage of the free space in the VG or thin pool
    PercentFree(f64),
    /// Percentage of the space used on the mounted file system
    PercentUsed(f64),
    /// Percentage of the origin volume size
    PercentSize(f64),
    /// A fixed number of bytes
    Fixed(u64),
}

impl SizeRequest {
    pub fn parse(policy: &SizePolicy) -> Result<Self> {
        let s = policy.as_str().trim();
        let invalid = || Error::InvalidIdentifier(format!("Invalid size policy: '{}'", policy));

        if let Some((percent, basis)) = s.split_once('%') {
            let percent: f64 = percent.parse().map_err(|_| invalid())?;
            if !percent.is_finite() || percent <= 0.0 {
                return Err(invalid());
            }
            return match basis.to_ascii_uppercase().as_str() {
                "FREE" if percent <= 100.0 => Ok(SizeRequest::PercentFree(percent)),
                "USED" => Ok(SizeRequest::PercentUsed(percent)),
                "SIZE" if percent <= 100.0 => Ok(SizeRequest::PercentSize(percent)),
                _ => Err(invalid()),
            };
        }
        parse_size(s).map(SizeRequest::Fixed).ok_or_else(invalid)
    }

    /// Resolve the request to bytes given the free, used and origin sizes
    pub fn bytes(&self, free: u64, used: u64, origin_size: u64) -> u64 {
        let percent_of = |percent: f64, total: u64| (total as f64 * percent / 100.0) as u64;
        match *self {
            SizeRequest::PercentFree(p) => percent_of(p, free),
            SizeRequest::PercentUsed(p) => percent_of(p, used),
            SizeRequest::PercentSize(p) => percent_of(p, origin_size),
            SizeRequest::Fixed(n) => n,
        }
    }
}

/// Fail if `vg_name/lv_name` is already in the report
fn check_name_free(lvs: &[LvReport], vg_name: &str, lv_name: &str) -> Result<()> {
    if lvs.iter().any(|lv| lv.vg_name == vg_name && lv.lv_name == lv_name) {
        return Err(Error::Exists(format!(
            "Logical volume {}/{} already exists",
            vg_name, lv_name
        )));
    }
    Ok(())
}

/// Split `vg/lv`
fn split_vg_lv(name: &str) -> Result<(&str, &str)> {
    name.split_once('/')
        .filter(|(vg, lv)| !vg.is_empty() && !lv.is_empty() && !lv.contains('/'))
        .ok_or_else(|| Error::InvalidIdentifier(format!("Invalid LVM2 volume name '{}'", name)))
}

/// Split a `/dev/vg/lv` origin device path
fn split_origin_path(origin: &str) -> Result<(&str, &str)> {
    origin
        .strip_prefix("/dev/")
        .ok_or_else(|| Error::InvalidIdentifier(format!("Invalid LVM2 origin '{}'", origin)))
        .and_then(split_vg_lv)
}

/// Run an LVM2 or device-mapper tool and return its stdout
fn run_command(program: &str, args: &[&str]) -> Result<String> {
    debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program).args(args).output()?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(Error::Callout {
            command: format!("{} {}", program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn lvs(target: Option<&str>) -> Result<Vec<LvReport>> {
    let mut args = vec![
        "--reportformat",
        "json",
        "--units",
        "b",
        "--options",
        LVS_FIELD_OPTIONS,
    ];
    args.extend(target);
    parse_lvs_report(&run_command("lvs", &args)?)
}

fn lvs_one(vg_lv: &str) -> Result<LvReport> {
    lvs(Some(vg_lv))?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("Logical volume {} not found", vg_lv)))
}

fn vg_free_space(vg_name: &str) -> Result<u64> {
    let output = run_command(
        "vgs",
        &[
            "--reportformat",
            "json",
            "--units",
            "b",
            "--options",
            VGS_FIELD_OPTIONS,
            vg_name,
        ],
    )?;
    parse_vg_free(&output, vg_name)
}

/// Check whether the device-mapper device at `devpath` belongs to LVM2
fn is_lvm_device(devpath: &str) -> Result<bool> {
    let Some(dm_name) = devpath.strip_prefix(DEV_MAPPER_PREFIX) else {
        return Ok(false);
    };
    let uuid = run_command(
        "dmsetup",
        &["info", "--columns", "--noheadings", "-ouuid", dm_name],
    )?;
    Ok(uuid.trim().starts_with(LVM_UUID_PREFIX))
}

/// Resolve `/dev/mapper/<dm name>` to `vg/lv`
fn vg_lv_from_device_path(devpath: &str) -> Result<String> {
    let dm_name = devpath.trim_start_matches(DEV_MAPPER_PREFIX);
    let output = run_command(
        "dmsetup",
        &["splitname", "--noheadings", "-ovg_name,lv_name", dm_name, "LVM"],
    )?;
    match output.trim().split(':').collect::<Vec<_>>()[..] {
        [vg, lv, ..] if !vg.is_empty() && !lv.is_empty() => Ok(format!("{}/{}", vg, lv)),
        _ => Err(Error::Snapm(format!(
            "Could not split device-mapper name '{}'",
            dm_name
        ))),
    }
}

/// Snapshot provider for LVM2 logical volumes
pub struct Lvm2Provider {
    kind: Lvm2Kind,
    mounts: Rc<dyn MountTable>,
    cache: RefCell<HashMap<String, (Instant, LvReport)>>,
}

impl Lvm2Provider {
    pub fn new(kind: Lvm2Kind, mounts: Rc<dyn MountTable>) -> Self {
        Lvm2Provider {
            kind,
            mounts,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Report for `vg/lv`, refreshed when the cached copy is stale
    fn lv(&self, name: &str) -> Result<LvReport> {
        if let Some((at, lv)) = self.cache.borrow().get(name) {
            if at.elapsed() < LVS_CACHE_VALID {
                return Ok(lv.clone());
            }
        }
        let lv = lvs_one(name)?;
        self.cache
            .borrow_mut()
            .insert(name.to_string(), (Instant::now(), lv.clone()));
        Ok(lv)
    }

    /// The `vg/lv` of the LVM2 device mounted at `mount_point`, if any
    fn mounted_lv(&self, mount_point: &Path) -> Result<Option<String>> {
        let Some(device) = self.mounts.device_for_mount_point(mount_point)? else {
            return Ok(None);
        };
        if !is_lvm_device(&device)? {
            return Ok(None);
        }
        vg_lv_from_device_path(&device).map(Some)
    }

    fn check_name_length(vg_name: &str, lv_name: &str) -> Result<()> {
        let full_name = format!("{}/{}", vg_name, lv_name);
        if full_name.len() > LVM_MAX_NAME_LEN {
            return Err(Error::InvalidIdentifier(format!(
                "Logical volume name {} exceeds maximum LVM2 name length",
                full_name
            )));
        }
        Ok(())
    }

    /// Check free space for a snapshot of `origin` and return the size to
    /// request from `lvcreate` (CoW only)
    fn check_free_space(
        &self,
        origin: &str,
        mount_point: &Path,
        size_policy: Option<&SizePolicy>,
    ) -> Result<Option<u64>> {
        let (vg_name, _) = split_vg_lv(origin)?;
        let request = size_policy.map(SizeRequest::parse).transpose()?;
        let used = space_used(mount_point)?;

        match self.kind {
            Lvm2Kind::Cow => {
                let free = vg_free_space(vg_name)?;
                let size = match request {
                    Some(request) => {
                        let origin_size = self.lv(origin)?.size()?;
                        request.bytes(free, used, origin_size).max(MIN_COW_SNAPSHOT_SIZE)
                    }
                    None => used.max(MIN_COW_SNAPSHOT_SIZE),
                };
                if free < size {
                    return Err(Error::NoSpace(format!(
                        "Volume group {} has insufficient free space to snapshot {}",
                        vg_name,
                        mount_point.display()
                    )));
                }
                Ok(Some(size))
            }
            Lvm2Kind::Thin => {
                let origin_lv = self.lv(origin)?;
                let pool_name = format!("{}/{}", vg_name, origin_lv.pool_lv);
                let free = lvs_one(&pool_name)?.pool_free()?;
                let needed = match request {
                    Some(request) => request.bytes(free, used, origin_lv.size()?),
                    None => used,
                };
                if free < needed {
                    return Err(Error::NoSpace(format!(
                        "Volume group thin pool {} has insufficient free space to snapshot {}",
                        pool_name,
                        mount_point.display()
                    )));
                }
                Ok(None)
            }
        }
    }

    fn set_active(&self, name: &str, active: bool) -> Result<()> {
        run_command(
            "lvchange",
            &[
                "--yes",
                "--ignoreactivationskip",
                "--activate",
                if active { "y" } else { "n" },
                name,
            ],
        )?;
        Ok(())
    }
}

impl Provider for Lvm2Provider {
    fn name(&self) -> &str {
        self.kind.provider_name()
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn discover_snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        let mut records = Vec::new();
        let now = Instant::now();
        for lv in lvs(None)? {
            if !self.kind.is_snapshot(&lv) {
                continue;
            }
            let Some((snapset_name, timestamp, mount_point)) =
                parse_snapshot_name(&lv.lv_name, &lv.origin)
            else {
                continue;
            };
            let name = lv.full_name();
            debug!("Found {} snapshot: {}", self.name(), name);
            records.push(SnapshotRecord {
                name: name.clone(),
                snapset_name,
                origin: lv.origin.clone(),
                timestamp,
                mount_point,
            });
            self.cache.borrow_mut().insert(name, (now, lv));
        }
        Ok(records)
    }

    fn can_snapshot(&self, mount_point: &Path) -> Result<bool> {
        let Some(vg_lv) = self.mounted_lv(mount_point)? else {
            return Ok(false);
        };
        let lv = self.lv(&vg_lv)?;
        Ok(self.kind.can_snapshot_attr(&lv.lv_attr))
    }

    fn origin_from_mount_point(&self, mount_point: &Path) -> Result<String> {
        self.mounted_lv(mount_point)?.ok_or_else(|| {
            Error::Path(format!(
                "{} is not mounted from an LVM2 device",
                mount_point.display()
            ))
        })
    }

    fn check_create_snapshot(
        &self,
        origin: &str,
        snapset_name: &str,
        timestamp: u64,
        mount_point: &Path,
        size_policy: Option<&SizePolicy>,
    ) -> Result<()> {
        let (vg_name, lv_name) = split_vg_lv(origin)?;
        let encoded = encode_mount_point(mount_point);
        let snapshot_name = format_snapshot_name(lv_name, snapset_name, timestamp, &encoded);
        Self::check_name_length(vg_name, &snapshot_name)?;
        check_name_free(&lvs(Some(vg_name))?, vg_name, &snapshot_name)?;
        self.check_free_space(origin, mount_point, size_policy)?;
        Ok(())
    }

    fn create_snapshot(
        &self,
        origin: &str,
        snapset_name: &str,
        timestamp: u64,
        mount_point: &Path,
        size_policy: Option<&SizePolicy>,
    ) -> Result<SnapshotRecord> {
        let (vg_name, lv_name) = split_vg_lv(origin)?;
        debug!(
            "Creating {} snapshot for {} mounted at {}",
            self.name(),
            origin,
            mount_point.display()
        );
        let encoded = encode_mount_point(mount_point);
        let snapshot_name = format_snapshot_name(lv_name, snapset_name, timestamp, &encoded);
        Self::check_name_length(vg_name, &snapshot_name)?;
        check_name_free(&lvs(Some(vg_name))?, vg_name, &snapshot_name)?;
        let size = self.check_free_space(origin, mount_point, size_policy)?;

        let size_arg = size.map(|s| format!("{}b", s));
        let mut args = vec!["--snapshot", "--name", snapshot_name.as_str()];
        if let Some(size_arg) = &size_arg {
            args.extend(["--size", size_arg.as_str()]);
        }
        args.push(origin);
        run_command("lvcreate", &args)?;

        Ok(SnapshotRecord {
            name: format!("{}/{}", vg_name, snapshot_name),
            snapset_name: snapset_name.to_string(),
            origin: lv_name.to_string(),
            timestamp,
            mount_point: mount_point.to_path_buf(),
        })
    }

    fn delete_snapshot(&self, name: &str) -> Result<()> {
        run_command("lvremove", &["--yes", name])?;
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
        let (vg_name, origin_lv) = split_origin_path(origin)?;
        let (_, old_lv) = split_vg_lv(old_name)?;
        let encoded = encode_mount_point(mount_point);
        let new_lv = format_snapshot_name(origin_lv, snapset_name, timestamp, &encoded);
        Self::check_name_length(vg_name, &new_lv)?;
        run_command("lvrename", &[vg_name, old_lv, &new_lv])?;

        Ok(SnapshotRecord {
            name: format!("{}/{}", vg_name, new_lv),
            snapset_name: snapset_name.to_string(),
            origin: origin_lv.to_string(),
            timestamp,
            mount_point: mount_point.to_path_buf(),
        })
    }

    fn rollback_snapshot(&self, name: &str) -> Result<()> {
        run_command("lvconvert", &["--merge", name])?;
        Ok(())
    }

    fn activate_snapshot(&self, name: &str) -> Result<()> {
        debug!("Activating snapshot {}", name);
        self.set_active(name, true)
    }

    fn deactivate_snapshot(&self, name: &str) -> Result<()> {
        debug!("Deactivating snapshot {}", name);
        // lvm refuses to deactivate volumes that are in use
        if let Err(e) = self.set_active(name, false) {
            debug!("Ignoring deactivation failure for {}: {}", name, e);
        }
        Ok(())
    }

    fn set_autoactivate(&self, name: &str, auto: bool) -> Result<()> {
        run_command(
            "lvchange",
            &["--setactivationskip", if auto { "n" } else { "y" }, name],
        )?;
        Ok(())
    }

    fn status(&self, name: &str) -> Result<SnapStatus> {
        Ok(self.lv(name)?.status())
    }

    fn autoactivate(&self, name: &str) -> Result<bool> {
        Ok(self.lv(name)?.autoactivate())
    }

    fn devpath(&self, name: &str) -> Result<String> {
        let lv = self.lv(name)?;
        if lv.status() != SnapStatus::Active {
            return Ok(String::new());
        }
        Ok(format!("/dev/{}/{}", lv.vg_name, lv.lv_name))
    }

    fn origin(&self, name: &str) -> Result<String> {
        let lv = self.lv(name)?;
        Ok(format!("/dev/{}/{}", lv.vg_name, lv.origin))
    }

    fn origin_options(&self, _name: &str) -> Result<String> {
        // Block snapshots need no file system options
        Ok(String::new())
    }

    fn invalidate_cache(&self, name: &str) {
        self.cache.borrow_mut().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LVS_JSON: &str = r#"{
      "report": [
          {
              "lv": [
                  {
                      "vg_name":"fedora",
                      "lv_name":"root",
                      "lv_attr":"owi-aos---",
                      "origin":"",
                      "pool_lv":"",
                      "lv_size":"10737418240B",
                      "data_percent":"",
                      "lv_role":"public,origin,thickorigin"
                  },
                  {
                      "vg_name":"fedora",
                      "lv_name":"root-snapset_before--upgrade_1707923080_-",
                      "lv_attr":"swi-a-s---",
                      "origin":"root",
                      "pool_lv":"",
                      "lv_size":"2147483648B",
                      "data_percent":"0.01",
                      "lv_role":"public,snapshot,thicksnapshot"
                  },
                  {
                      "vg_name":"fedora",
                      "lv_name":"pool0",
                      "lv_attr":"twi-aotz--",
                      "origin":"",
                      "pool_lv":"",
                      "lv_size":"21474836480B",
                      "data_percent":"25.00",
                      "lv_role":"private"
                  },
                  {
                      "vg_name":"fedora",
                      "lv_name":"home",
                      "lv_attr":"Vwi-aotz--",
                      "origin":"",
                      "pool_lv":"pool0",
                      "lv_size":"5368709120B",
                      "data_percent":"40.00",
                      "lv_role":"public"
                  },
                  {
                      "vg_name":"fedora",
                      "lv_name":"home-snapset_before--upgrade_1707923080_-home",
                      "lv_attr":"Vwi---tz-k",
                      "origin":"home",
                      "pool_lv":"pool0",
                      "lv_size":"5368709120B",
                      "data_percent":"40.00",
                      "lv_role":"public,snapshot,thinsnapshot"
                  }
              ]
          }
      ]
    }"#;

    const VGS_JSON: &str = r#"{
      "report": [
          {
              "vg": [
                  {"vg_name":"fedora", "vg_free":"4294967296B"},
                  {"vg_name":"data", "vg_free":"0B"}
              ]
          }
      ]
    }"#;

    #[test]
    fn parses_lvs_report() {
        let lvs = parse_lvs_report(LVS_JSON).unwrap();
        assert_eq!(lvs.len(), 5);
        assert_eq!(lvs[1].full_name(), "fedora/root-snapset_before--upgrade_1707923080_-");
        assert_eq!(lvs[1].size().unwrap(), 2147483648);
    }

    #[test]
    fn filters_snapshots_by_kind() {
        let lvs = parse_lvs_report(LVS_JSON).unwrap();
        let cow: Vec<_> = lvs.iter().filter(|lv| Lvm2Kind::Cow.is_snapshot(lv)).collect();
        let thin: Vec<_> = lvs.iter().filter(|lv| Lvm2Kind::Thin.is_snapshot(lv)).collect();
        assert_eq!(cow.len(), 1);
        assert_eq!(cow[0].origin, "root");
        assert_eq!(thin.len(), 1);
        assert_eq!(thin[0].origin, "home");
    }

    #[test]
    fn snapshot_volume_types() {
        assert!(Lvm2Kind::Cow.can_snapshot_attr("-wi-ao----"));
        assert!(Lvm2Kind::Cow.can_snapshot_attr("owi-aos---"));
        assert!(!Lvm2Kind::Cow.can_snapshot_attr("Vwi-aotz--"));
        assert!(Lvm2Kind::Thin.can_snapshot_attr("Vwi-aotz--"));
        assert!(!Lvm2Kind::Thin.can_snapshot_attr("-wi-ao----"));
    }

    #[test]
    fn status_and_autoactivate_from_attr() {
        let lvs = parse_lvs_report(LVS_JSON).unwrap();
        assert_eq!(lvs[1].status(), SnapStatus::Active);
        assert!(lvs[1].autoactivate());
        assert_eq!(lvs[4].status(), SnapStatus::Inactive);
        assert!(!lvs[4].autoactivate());

        let invalid = LvReport {
            lv_attr: "swi-I-s---".to_string(),
            ..LvReport::default()
        };
        assert_eq!(invalid.status(), SnapStatus::Invalid);
    }

    #[test]
    fn thin_pool_free_space() {
        let lvs = parse_lvs_report(LVS_JSON).unwrap();
        // 20GiB pool at 25% full
        assert_eq!(lvs[2].pool_free().unwrap(), 16106127360);
    }

    #[test]
    fn vg_free_from_report() {
        assert_eq!(parse_vg_free(VGS_JSON, "fedora").unwrap(), 4294967296);
        assert_eq!(parse_vg_free(VGS_JSON, "data").unwrap(), 0);
        assert!(matches!(parse_vg_free(VGS_JSON, "nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn parses_size_policies() {
        let parse = |s: &str| SizeRequest::parse(&SizePolicy::new(s));
        assert_eq!(parse("25%FREE").unwrap(), SizeRequest::PercentFree(25.0));
        assert_eq!(parse("200%USED").unwrap(), SizeRequest::PercentUsed(200.0));
        assert_eq!(parse("50%size").unwrap(), SizeRequest::PercentSize(50.0));
        assert_eq!(parse("2G").unwrap(), SizeRequest::Fixed(2 * 1024 * 1024 * 1024));
        assert_eq!(parse("1.5M").unwrap(), SizeRequest::Fixed(1572864));
        for bad in ["", "lots", "150%FREE", "10%BOGUS", "-5%USED", "0G"] {
            assert!(
                matches!(parse(bad), Err(Error::InvalidIdentifier(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn size_requests_resolve_to_bytes() {
        assert_eq!(SizeRequest::PercentFree(50.0).bytes(1000, 10, 100), 500);
        assert_eq!(SizeRequest::PercentUsed(200.0).bytes(1000, 10, 100), 20);
        assert_eq!(SizeRequest::PercentSize(10.0).bytes(1000, 10, 100), 10);
        assert_eq!(SizeRequest::Fixed(4096).bytes(0, 0, 0), 4096);
    }

    #[test]
    fn volume_names() {
        assert_eq!(split_vg_lv("vg0/root").unwrap(), ("vg0", "root"));
        assert!(split_vg_lv("root").is_err());
        assert!(split_vg_lv("vg0/").is_err());
        assert_eq!(split_origin_path("/dev/vg0/root").unwrap(), ("vg0", "root"));
        assert!(split_origin_path("vg0/root").is_err());

        let long = "x".repeat(LVM_MAX_NAME_LEN);
        assert!(Lvm2Provider::check_name_length("vg0", &long).is_err());
        assert!(Lvm2Provider::check_name_length("vg0", "root").is_ok());
    }

    #[test]
    fn existing_snapshot_name_is_taken() {
        let lvs = parse_lvs_report(LVS_JSON).unwrap();
        let name = "root-snapset_before--upgrade_1707923080_-";
        assert!(matches!(
            check_name_free(&lvs, "fedora", name),
            Err(Error::Exists(_))
        ));
        assert!(check_name_free(&lvs, "data", name).is_ok());

        let later = format_snapshot_name("root", "before", 1707923081, "-");
        assert!(check_name_free(&lvs, "fedora", &later).is_ok());
    }
}

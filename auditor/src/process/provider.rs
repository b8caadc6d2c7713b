//! Snapshot collection from procfs.

use super::facts::{ProbeFailure, ProcessFacts, Snapshot};
use super::name::normalize;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Seccomp mode reported by `/proc/<pid>/status` for filter mode.
const SECCOMP_MODE_FILTER: u32 = 2;

/// Source of process snapshots.
pub trait SnapshotProvider {
    /// Capture facts for every live process in one pass.
    fn snapshot(&self) -> Result<Snapshot>;
}

/// Reads process facts from a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcfsProvider {
    root: PathBuf,
    test_mount_prefixes: Vec<String>,
}

impl Default for ProcfsProvider {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            test_mount_prefixes: Vec::new(),
        }
    }

    /// Mount points whose presence marks a process as still seeing the
    /// test image's mount table.
    pub fn with_test_mount_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.test_mount_prefixes = prefixes;
        self
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    /// Read the facts for a single process.
    pub fn read_facts(&self, pid: u32) -> std::result::Result<ProcessFacts, String> {
        let dir = self.pid_dir(pid);

        let status = std::fs::read_to_string(dir.join("status"))
            .map_err(|e| format!("failed to read status: {}", e))?;
        let status = parse_status(&status)?;

        let pid_ns = read_ns(&dir, "pid")?;
        let mnt_ns = read_ns(&dir, "mnt")?;

        let exe = std::fs::read_link(dir.join("exe"))
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        let test_image_mounts = if self.test_mount_prefixes.is_empty() {
            false
        } else {
            let mountinfo = std::fs::read_to_string(dir.join("mountinfo"))
                .map_err(|e| format!("failed to read mountinfo: {}", e))?;
            has_test_image_mounts(&mountinfo, &self.test_mount_prefixes)
        };

        Ok(ProcessFacts {
            pid,
            ppid: status.ppid,
            name: normalize(&status.name),
            exe,
            euid: status.euid,
            egid: status.egid,
            pid_ns,
            mnt_ns,
            cap_eff: status.cap_eff,
            no_new_privs: status.no_new_privs,
            seccomp: status.seccomp_mode == SECCOMP_MODE_FILTER,
            test_image_mounts,
        })
    }

    /// Whether a process still exists and is not a zombie.
    pub fn is_alive(&self, pid: u32) -> bool {
        std::fs::read_to_string(self.pid_dir(pid).join("stat"))
            .ok()
            .map(|stat| {
                // Format: pid (comm) state ...
                stat.rsplit_once(')')
                    .and_then(|(_, rest)| rest.trim_start().chars().next())
                    .map(|state| state != 'Z' && state != 'X')
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    fn list_pids(&self) -> Result<Vec<u32>> {
        let mut pids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }
}

impl SnapshotProvider for ProcfsProvider {
    fn snapshot(&self) -> Result<Snapshot> {
        let pids = self.list_pids().map_err(|e| {
            Error::snapshot(format!("failed to list {}: {}", self.root.display(), e))
        })?;

        let mut snapshot = Snapshot::new();
        for pid in pids {
            match self.read_facts(pid) {
                Ok(facts) => snapshot.insert(facts),
                Err(reason) => {
                    let alive = self.is_alive(pid);
                    if alive {
                        tracing::warn!("Failed to read facts for live pid {}: {}", pid, reason);
                    } else {
                        tracing::debug!("Skipping pid {} - process exited: {}", pid, reason);
                    }
                    snapshot.push_failure(ProbeFailure { pid, reason, alive });
                }
            }
        }

        tracing::info!(
            "Captured {} processes ({} probe failures) from {}",
            snapshot.len(),
            snapshot.failures().len(),
            self.root.display()
        );
        Ok(snapshot)
    }
}

/// Fields of `/proc/<pid>/status` the auditor needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFields {
    pub name: String,
    pub ppid: u32,
    pub euid: u32,
    pub egid: u32,
    pub cap_eff: u64,
    pub no_new_privs: bool,
    pub seccomp_mode: u32,
}

/// Parse the contents of `/proc/<pid>/status`.
///
/// `NoNewPrivs` and `Seccomp` are absent on old kernels and default to off.
pub fn parse_status(contents: &str) -> std::result::Result<StatusFields, String> {
    let mut name = None;
    let mut ppid = None;
    let mut euid = None;
    let mut egid = None;
    let mut cap_eff = None;
    let mut no_new_privs = false;
    let mut seccomp_mode = 0;

    for line in contents.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Name" => name = Some(value.to_string()),
            "PPid" => ppid = value.parse().ok(),
            // Format: real effective saved fs
            "Uid" => euid = value.split_whitespace().nth(1).and_then(|s| s.parse().ok()),
            "Gid" => egid = value.split_whitespace().nth(1).and_then(|s| s.parse().ok()),
            "CapEff" => cap_eff = u64::from_str_radix(value, 16).ok(),
            "NoNewPrivs" => no_new_privs = value == "1",
            "Seccomp" => seccomp_mode = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    Ok(StatusFields {
        name: name.ok_or("missing Name")?,
        ppid: ppid.ok_or("missing or invalid PPid")?,
        euid: euid.ok_or("missing or invalid Uid")?,
        egid: egid.ok_or("missing or invalid Gid")?,
        cap_eff: cap_eff.ok_or("missing or invalid CapEff")?,
        no_new_privs,
        seccomp_mode,
    })
}

/// Parse a namespace link target such as `pid:[4026531836]`.
pub fn parse_ns_link(target: &str) -> Option<u64> {
    target
        .split_once(":[")
        .and_then(|(_, rest)| rest.strip_suffix(']'))
        .and_then(|id| id.parse().ok())
}

fn read_ns(dir: &Path, kind: &str) -> std::result::Result<u64, String> {
    let target = std::fs::read_link(dir.join("ns").join(kind))
        .map_err(|e| format!("failed to read {} namespace: {}", kind, e))?;
    let target = target.to_string_lossy();
    parse_ns_link(&target).ok_or_else(|| format!("invalid {} namespace link '{}'", kind, target))
}

/// Whether any mount point in `/proc/<pid>/mountinfo` is one of `prefixes`
/// or lies beneath one.
pub fn has_test_image_mounts(mountinfo: &str, prefixes: &[String]) -> bool {
    mountinfo
        .lines()
        // Field 5 is the mount point relative to the process's root.
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|mount_point| {
            prefixes.iter().any(|prefix| {
                mount_point == prefix
                    || mount_point
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
        })
}

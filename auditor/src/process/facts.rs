//! Per-process security facts and the snapshot they are collected into.

use super::name::normalize;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// PID of the init process, used as the reference for namespace and
/// capability comparisons.
pub const INIT_PID: u32 = 1;

/// Security-relevant facts about one process, captured at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessFacts {
    pub pid: u32,
    pub ppid: u32,
    /// Normalized comm name.
    pub name: String,
    /// Executable path; empty for kernel threads or when unreadable.
    #[serde(default)]
    pub exe: String,
    pub euid: u32,
    pub egid: u32,
    /// PID namespace inode.
    pub pid_ns: u64,
    /// Mount namespace inode.
    pub mnt_ns: u64,
    /// Effective capability set.
    pub cap_eff: u64,
    #[serde(default)]
    pub no_new_privs: bool,
    /// Seccomp filter mode active.
    #[serde(default)]
    pub seccomp: bool,
    /// Whether the mount table exposes paths that only exist on test images.
    #[serde(default)]
    pub test_image_mounts: bool,
}

impl ProcessFacts {
    /// Creates facts for a process; the name is normalized.
    pub fn new(pid: u32, ppid: u32, name: &str) -> Self {
        Self {
            pid,
            ppid,
            name: normalize(name),
            exe: String::new(),
            euid: 0,
            egid: 0,
            pid_ns: 0,
            mnt_ns: 0,
            cap_eff: 0,
            no_new_privs: false,
            seccomp: false,
            test_image_mounts: false,
        }
    }

    pub fn with_exe(mut self, exe: impl Into<String>) -> Self {
        self.exe = exe.into();
        self
    }

    pub fn with_ids(mut self, euid: u32, egid: u32) -> Self {
        self.euid = euid;
        self.egid = egid;
        self
    }

    pub fn with_namespaces(mut self, pid_ns: u64, mnt_ns: u64) -> Self {
        self.pid_ns = pid_ns;
        self.mnt_ns = mnt_ns;
        self
    }

    pub fn with_cap_eff(mut self, cap_eff: u64) -> Self {
        self.cap_eff = cap_eff;
        self
    }

    pub fn with_no_new_privs(mut self, no_new_privs: bool) -> Self {
        self.no_new_privs = no_new_privs;
        self
    }

    pub fn with_seccomp(mut self, seccomp: bool) -> Self {
        self.seccomp = seccomp;
        self
    }

    pub fn with_test_image_mounts(mut self, test_image_mounts: bool) -> Self {
        self.test_image_mounts = test_image_mounts;
        self
    }

    pub fn is_root(&self) -> bool {
        self.euid == 0
    }
}

/// A PID whose facts could not be collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub pid: u32,
    pub reason: String,
    /// Whether the process was still running (and not a zombie) after the
    /// failure. Failures for exited processes are expected races.
    pub alive: bool,
}

/// One atomic view of every process on the system.
///
/// Never mutated once the provider hands it over, so all comparisons within
/// one audit see the same init process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SnapshotFile", into = "SnapshotFile")]
pub struct Snapshot {
    processes: HashMap<u32, ProcessFacts>,
    failures: Vec<ProbeFailure>,
    taken_at: DateTime<Utc>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            processes: HashMap::new(),
            failures: Vec::new(),
            taken_at: Utc::now(),
        }
    }

    pub fn from_processes(processes: impl IntoIterator<Item = ProcessFacts>) -> Self {
        let mut snapshot = Self::new();
        for facts in processes {
            snapshot.insert(facts);
        }
        snapshot
    }

    pub fn insert(&mut self, facts: ProcessFacts) {
        self.processes.insert(facts.pid, facts);
    }

    pub fn push_failure(&mut self, failure: ProbeFailure) {
        self.failures.push(failure);
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessFacts> {
        self.processes.get(&pid)
    }

    /// The init process every other process is compared against.
    pub fn root(&self) -> Result<&ProcessFacts> {
        self.get(INIT_PID).ok_or(Error::RootProcessMissing)
    }

    pub fn processes(&self) -> impl Iterator<Item = &ProcessFacts> {
        self.processes.values()
    }

    pub fn failures(&self) -> &[ProbeFailure] {
        &self.failures
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

/// On-disk form of a [`Snapshot`]: processes as a PID-sorted list.
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    taken_at: DateTime<Utc>,
    processes: Vec<ProcessFacts>,
    #[serde(default)]
    failures: Vec<ProbeFailure>,
}

impl From<SnapshotFile> for Snapshot {
    fn from(file: SnapshotFile) -> Self {
        Self {
            processes: file
                .processes
                .into_iter()
                .map(|mut p| {
                    p.name = normalize(&p.name);
                    (p.pid, p)
                })
                .collect(),
            failures: file.failures,
            taken_at: file.taken_at,
        }
    }
}

impl From<Snapshot> for SnapshotFile {
    fn from(snapshot: Snapshot) -> Self {
        let mut processes: Vec<ProcessFacts> = snapshot.processes.into_values().collect();
        processes.sort_by_key(|p| p.pid);
        Self {
            taken_at: snapshot.taken_at,
            processes,
            failures: snapshot.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facts_builder() {
        let facts = ProcessFacts::new(42, 1, "powerd")
            .with_exe("/usr/bin/powerd")
            .with_ids(228, 228)
            .with_namespaces(100, 200)
            .with_cap_eff(0x10)
            .with_no_new_privs(true)
            .with_seccomp(true);

        assert_eq!(facts.pid, 42);
        assert_eq!(facts.ppid, 1);
        assert_eq!(facts.exe, "/usr/bin/powerd");
        assert_eq!(facts.euid, 228);
        assert_eq!(facts.cap_eff, 0x10);
        assert!(facts.no_new_privs);
        assert!(facts.seccomp);
        assert!(!facts.test_image_mounts);
        assert!(!facts.is_root());
    }

    #[test]
    fn test_facts_name_normalized() {
        let facts = ProcessFacts::new(7, 1, "a-very-long-daemon-name");
        assert_eq!(facts.name, "a-very-long-dae");
    }

    #[test]
    fn test_snapshot_root() {
        let snapshot = Snapshot::from_processes([
            ProcessFacts::new(1, 0, "init"),
            ProcessFacts::new(2, 1, "child"),
        ]);
        assert_eq!(snapshot.root().unwrap().name, "init");
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_snapshot_root_missing() {
        let snapshot = Snapshot::from_processes([ProcessFacts::new(2, 1, "orphan")]);
        assert!(matches!(snapshot.root(), Err(Error::RootProcessMissing)));
    }

    #[test]
    fn test_snapshot_json_sorted_by_pid() {
        let snapshot = Snapshot::from_processes([
            ProcessFacts::new(30, 1, "c"),
            ProcessFacts::new(1, 0, "init"),
            ProcessFacts::new(12, 1, "b"),
        ]);

        let json = serde_json::to_value(&snapshot).unwrap();
        let pids: Vec<u64> = json["processes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["pid"].as_u64().unwrap())
            .collect();
        assert_eq!(pids, vec![1, 12, 30]);
    }

    #[test]
    fn test_snapshot_deserialize_defaults_and_normalizes() {
        let json = r#"{
            "taken_at": "2024-05-01T12:00:00Z",
            "processes": [
                {"pid": 1, "ppid": 0, "name": "init", "euid": 0, "egid": 0,
                 "pid_ns": 100, "mnt_ns": 200, "cap_eff": 65535},
                {"pid": 9, "ppid": 1, "name": "extremely-long-name", "euid": 5, "egid": 5,
                 "pid_ns": 100, "mnt_ns": 201, "cap_eff": 0, "seccomp": true}
            ],
            "failures": [{"pid": 77, "reason": "status unreadable", "alive": false}]
        }"#;

        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.len(), 2);
        let long = snapshot.get(9).unwrap();
        assert_eq!(long.name, "extremely-long-");
        assert!(long.seccomp);
        assert!(!long.no_new_privs);
        assert_eq!(long.exe, "");
        assert_eq!(snapshot.failures().len(), 1);
        assert!(!snapshot.failures()[0].alive);
    }
}

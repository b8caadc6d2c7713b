//! Compliance evaluation of a process snapshot against the baseline.

use super::baseline::{BaselineIndex, Feature, NameSet, Requirement};
use crate::error::Result;
use crate::process::{has_ignored_ancestor, IdentityResolver, ProcessFacts, Snapshot, INIT_PID};
use crate::report::{AuditOutcome, ErrorKind, EvaluationError, ViolationRecord};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// A single way a process deviates from its baseline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// Root process with no baseline entry.
    UnexpectedRoot,
    UidMismatch { actual: u32, expected: u32 },
    GidMismatch { actual: u32, expected: u32 },
    MissingPidNamespace,
    MissingMountNamespace,
    /// Own mount namespace, but test-image mounts are still visible.
    NoPivotRoot,
    UnrestrictedCapabilities,
    MissingNoNewPrivs,
    MissingSeccomp,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::UnexpectedRoot => f.write_str("unexpected root process outside baseline"),
            Problem::UidMismatch { actual, expected } => {
                write!(f, "euid {} (expected {})", actual, expected)
            }
            Problem::GidMismatch { actual, expected } => {
                write!(f, "egid {} (expected {})", actual, expected)
            }
            Problem::MissingPidNamespace => f.write_str("missing PID namespace"),
            Problem::MissingMountNamespace => f.write_str("missing mount namespace"),
            Problem::NoPivotRoot => f.write_str("did not call pivot_root"),
            Problem::UnrestrictedCapabilities => f.write_str("no restricted capabilities"),
            Problem::MissingNoNewPrivs => f.write_str("missing no_new_privs"),
            Problem::MissingSeccomp => f.write_str("seccomp filter disabled"),
        }
    }
}

impl Serialize for Problem {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Run-level switches that apply to every process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditOptions {
    /// Memory-sanitizer builds run without seccomp filters.
    pub skip_seccomp: bool,
}

/// Outcome of checking one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Excluded,
    IgnoredAncestor,
    /// Ancestry could not be determined; the process is skipped.
    AncestryUnknown,
    /// Non-root process with no baseline entry.
    Unlisted,
    Compliant,
    NonCompliant(Vec<Problem>),
    /// The selected entry's user or group could not be resolved.
    LookupFailed(String),
}

/// Cached resolution of every user and group named in the baseline.
#[derive(Default)]
struct ResolvedIds {
    users: HashMap<String, std::result::Result<u32, String>>,
    groups: HashMap<String, std::result::Result<u32, String>>,
}

impl ResolvedIds {
    fn user(&self, user: &str) -> std::result::Result<u32, String> {
        self.users
            .get(user)
            .cloned()
            .unwrap_or_else(|| Err(format!("user '{}' not resolved", user)))
    }

    fn group(&self, group: &str) -> std::result::Result<u32, String> {
        self.groups
            .get(group)
            .cloned()
            .unwrap_or_else(|| Err(format!("group '{}' not resolved", group)))
    }
}

/// Evaluates snapshots against a baseline.
pub struct ComplianceEvaluator<'a> {
    baseline: &'a BaselineIndex,
    exclusions: &'a NameSet,
    ignored_ancestors: &'a NameSet,
    identities: &'a dyn IdentityResolver,
    options: AuditOptions,
}

impl<'a> ComplianceEvaluator<'a> {
    pub fn new(
        baseline: &'a BaselineIndex,
        exclusions: &'a NameSet,
        ignored_ancestors: &'a NameSet,
        identities: &'a dyn IdentityResolver,
    ) -> Self {
        Self {
            baseline,
            exclusions,
            ignored_ancestors,
            identities,
            options: AuditOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AuditOptions) -> Self {
        self.options = options;
        self
    }

    /// Evaluate every process in the snapshot.
    ///
    /// Only a missing init process is fatal. Everything else is collected
    /// into the outcome, which is sorted by PID.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Result<AuditOutcome> {
        let root = snapshot.root()?;
        let ids = self.resolve_ids(snapshot);

        if self.options.skip_seccomp {
            tracing::info!("Memory sanitizer build: seccomp checks disabled for this run");
        }

        let mut outcome = AuditOutcome::default();

        for failure in snapshot.failures() {
            if failure.alive {
                outcome.errors.push(EvaluationError {
                    pid: failure.pid,
                    name: String::new(),
                    kind: ErrorKind::ProbeFailed(failure.reason.clone()),
                });
            } else {
                tracing::debug!(
                    "pid {} exited during snapshot: {}",
                    failure.pid,
                    failure.reason
                );
            }
        }

        for process in snapshot.processes() {
            if process.pid == INIT_PID {
                continue;
            }
            outcome.processes_checked += 1;

            match self.check_with(process, root, snapshot, &ids) {
                Verdict::NonCompliant(problems) => {
                    tracing::debug!(
                        "pid {} ({}) has {} problems",
                        process.pid,
                        process.name,
                        problems.len()
                    );
                    outcome.records.push(ViolationRecord {
                        pid: process.pid,
                        name: process.name.clone(),
                        exe: process.exe.clone(),
                        problems,
                    });
                }
                Verdict::LookupFailed(reason) => {
                    outcome.errors.push(EvaluationError {
                        pid: process.pid,
                        name: process.name.clone(),
                        kind: ErrorKind::IdentityLookup(reason),
                    });
                }
                verdict => {
                    tracing::trace!("pid {} ({}): {:?}", process.pid, process.name, verdict);
                }
            }
        }

        outcome.records.sort_by_key(|r| r.pid);
        outcome.errors.sort_by_key(|e| e.pid);
        Ok(outcome)
    }

    /// Check one process against the baseline, with `root` as the reference
    /// for namespace and capability comparisons.
    pub fn check(&self, process: &ProcessFacts, root: &ProcessFacts, snapshot: &Snapshot) -> Verdict {
        let ids = self.resolve_ids(snapshot);
        self.check_with(process, root, snapshot, &ids)
    }

    fn check_with(
        &self,
        process: &ProcessFacts,
        root: &ProcessFacts,
        snapshot: &Snapshot,
        ids: &ResolvedIds,
    ) -> Verdict {
        if self.exclusions.contains(&process.name) {
            return Verdict::Excluded;
        }

        if self.ignored_ancestors.contains(&process.name) {
            return Verdict::IgnoredAncestor;
        }
        match has_ignored_ancestor(process.pid, self.ignored_ancestors, snapshot) {
            Ok(true) => return Verdict::IgnoredAncestor,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    "Skipping pid {} ({}): ancestry unavailable: {}",
                    process.pid,
                    process.name,
                    e
                );
                return Verdict::AncestryUnknown;
            }
        }

        let candidates = self.baseline.lookup(&process.name);
        let Some(requirement) = select_requirement(candidates, process.euid, ids) else {
            if process.is_root() {
                return Verdict::NonCompliant(vec![Problem::UnexpectedRoot]);
            }
            return Verdict::Unlisted;
        };

        let expected_uid = match ids.user(&requirement.user) {
            Ok(uid) => uid,
            Err(reason) => return Verdict::LookupFailed(reason),
        };
        let expected_gid = match ids.group(&requirement.group) {
            Ok(gid) => gid,
            Err(reason) => return Verdict::LookupFailed(reason),
        };

        let problems = self.compare(process, root, requirement, expected_uid, expected_gid);
        if problems.is_empty() {
            Verdict::Compliant
        } else {
            Verdict::NonCompliant(problems)
        }
    }

    fn compare(
        &self,
        process: &ProcessFacts,
        root: &ProcessFacts,
        requirement: &Requirement,
        expected_uid: u32,
        expected_gid: u32,
    ) -> Vec<Problem> {
        let mut problems = Vec::new();
        let features = requirement.features;

        if process.euid != expected_uid {
            problems.push(Problem::UidMismatch {
                actual: process.euid,
                expected: expected_uid,
            });
        }
        if process.egid != expected_gid {
            problems.push(Problem::GidMismatch {
                actual: process.egid,
                expected: expected_gid,
            });
        }

        // Namespace and capability IDs have no absolute meaning; only
        // inequality with init's values does.
        let own_pid_ns = process.pid_ns != root.pid_ns;
        let own_mnt_ns = process.mnt_ns != root.mnt_ns;
        let own_caps = process.cap_eff != root.cap_eff;

        if features.contains(Feature::OwnPidNamespace) && !own_pid_ns {
            problems.push(Problem::MissingPidNamespace);
        }
        if features.requires_mount_namespace() && !own_mnt_ns {
            problems.push(Problem::MissingMountNamespace);
        }
        if features.contains(Feature::OwnMountNamespace) && own_mnt_ns && process.test_image_mounts
        {
            problems.push(Problem::NoPivotRoot);
        }
        if features.contains(Feature::RestrictedCapabilities) && !own_caps {
            problems.push(Problem::UnrestrictedCapabilities);
        }
        if features.contains(Feature::NoNewPrivileges) && !process.no_new_privs {
            problems.push(Problem::MissingNoNewPrivs);
        }
        if features.contains(Feature::SeccompFilter)
            && !self.options.skip_seccomp
            && !process.seccomp
        {
            problems.push(Problem::MissingSeccomp);
        }

        problems
    }

    fn resolve_ids(&self, snapshot: &Snapshot) -> ResolvedIds {
        let mut ids = ResolvedIds::default();
        for process in snapshot.processes() {
            for requirement in self.baseline.lookup(&process.name) {
                ids.users
                    .entry(requirement.user.clone())
                    .or_insert_with(|| {
                        self.identities
                            .user_id(&requirement.user)
                            .map_err(|e| e.to_string())
                    });
                ids.groups
                    .entry(requirement.group.clone())
                    .or_insert_with(|| {
                        self.identities
                            .group_id(&requirement.group)
                            .map_err(|e| e.to_string())
                    });
            }
        }
        ids
    }
}

/// Prefer the entry whose user is the process's euid, else the first entry.
fn select_requirement<'r>(
    candidates: &'r [Requirement],
    euid: u32,
    ids: &ResolvedIds,
) -> Option<&'r Requirement> {
    candidates
        .iter()
        .find(|r| ids.user(&r.user) == Ok(euid))
        .or_else(|| candidates.first())
}

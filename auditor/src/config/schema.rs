//! Configuration schema definitions.

use crate::error::{Error, Result};
use crate::process::{normalize, IdentityTable};
use crate::rules::{AuditOptions, BaselineIndex, Feature, Features, NameSet, Requirement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Environment variable whose presence marks a memory-sanitizer build.
pub const MSAN_ENV: &str = "MSAN_OPTIONS";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Process names that are never audited.
    #[serde(default)]
    pub exclusions: Vec<String>,

    /// Process names whose descendants (and themselves) are never audited.
    #[serde(default)]
    pub ignored_ancestors: Vec<String>,

    /// Auditor runtime settings.
    #[serde(default)]
    pub auditor: AuditorConfig,

    /// User and group ID overrides.
    #[serde(default)]
    pub identities: IdentityConfig,

    /// Expected sandboxing per process name.
    #[serde(default)]
    pub baseline: Vec<Requirement>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auditor: AuditorConfig {
                test_image_mounts: Some(default_test_image_mounts()),
                ..AuditorConfig::default()
            },
            identities: IdentityConfig::default(),
            exclusions: default_exclusions(),
            ignored_ancestors: default_ignored_ancestors(),
            baseline: default_baseline(),
        }
    }
}

impl Config {
    /// A config with no compiled-in tables.
    pub fn empty() -> Self {
        Self {
            exclusions: Vec::new(),
            ignored_ancestors: Vec::new(),
            baseline: Vec::new(),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.auditor.log_level.as_str()) {
            return Err(Error::config(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.auditor.log_level, valid_levels
            )));
        }

        if self.auditor.snapshot_timeout_secs == 0 {
            return Err(Error::config("snapshot_timeout_secs must be greater than 0"));
        }

        for (idx, requirement) in self.baseline.iter().enumerate() {
            if let Err(msg) = requirement.validate() {
                return Err(Error::config(format!("Baseline entry #{}: {}", idx + 1, msg)));
            }
        }

        // Duplicate (name, user) pairs are fatal.
        self.baseline_index()?;
        Ok(())
    }

    /// Merge another config into this one.
    /// Scalar settings from `other` win when they differ from the defaults;
    /// baseline entries replace entries with the same name and user.
    pub fn merge(&mut self, other: Config) {
        if !other.auditor.inherit_defaults {
            self.exclusions.clear();
            self.ignored_ancestors.clear();
            self.baseline.clear();
            self.auditor.test_image_mounts = Some(Vec::new());
        }

        let defaults = AuditorConfig::default();
        if other.auditor.log_level != defaults.log_level {
            self.auditor.log_level = other.auditor.log_level;
        }
        if other.auditor.proc_root != defaults.proc_root {
            self.auditor.proc_root = other.auditor.proc_root;
        }
        if other.auditor.snapshot_timeout_secs != defaults.snapshot_timeout_secs {
            self.auditor.snapshot_timeout_secs = other.auditor.snapshot_timeout_secs;
        }
        if other.auditor.memory_sanitizer {
            self.auditor.memory_sanitizer = true;
        }
        // An explicit list replaces the inherited one.
        if let Some(mounts) = other.auditor.test_image_mounts {
            self.auditor.test_image_mounts = Some(mounts);
        }

        if !other.identities.system_lookup {
            self.identities.system_lookup = false;
        }
        self.identities.users.extend(other.identities.users);
        self.identities.groups.extend(other.identities.groups);

        for name in other.exclusions {
            if !self.exclusions.contains(&name) {
                self.exclusions.push(name);
            }
        }
        for name in other.ignored_ancestors {
            if !self.ignored_ancestors.contains(&name) {
                self.ignored_ancestors.push(name);
            }
        }

        for requirement in other.baseline {
            let key = normalize(&requirement.name);
            match self
                .baseline
                .iter_mut()
                .find(|r| normalize(&r.name) == key && r.user == requirement.user)
            {
                Some(existing) => *existing = requirement,
                None => self.baseline.push(requirement),
            }
        }
    }

    pub fn baseline_index(&self) -> Result<BaselineIndex> {
        BaselineIndex::build(self.baseline.clone())
    }

    pub fn exclusion_set(&self) -> NameSet {
        self.exclusions.iter().collect()
    }

    pub fn ignored_ancestor_set(&self) -> NameSet {
        self.ignored_ancestors.iter().collect()
    }

    pub fn identity_table(&self) -> IdentityTable {
        let mut table = IdentityTable::new().with_system_lookup(self.identities.system_lookup);
        table.extend_users(self.identities.users.clone());
        table.extend_groups(self.identities.groups.clone());
        table
    }

    /// Run-level options, taking the memory-sanitizer environment into account.
    pub fn audit_options(&self) -> AuditOptions {
        AuditOptions {
            skip_seccomp: self.auditor.memory_sanitizer || std::env::var_os(MSAN_ENV).is_some(),
        }
    }
}

/// Auditor runtime settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditorConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Where procfs is mounted.
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Upper bound on snapshot collection.
    #[serde(default = "default_snapshot_timeout_secs")]
    pub snapshot_timeout_secs: u64,

    /// Seccomp is disabled system-wide on memory-sanitizer builds.
    #[serde(default)]
    pub memory_sanitizer: bool,

    /// Mount points that only exist on test images. A process that still
    /// sees them never called pivot_root. Unset means the built-in list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_image_mounts: Option<Vec<String>>,

    /// Whether the compiled-in baseline and name lists are kept.
    #[serde(default = "default_true")]
    pub inherit_defaults: bool,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            proc_root: default_proc_root(),
            snapshot_timeout_secs: default_snapshot_timeout_secs(),
            memory_sanitizer: false,
            test_image_mounts: None,
            inherit_defaults: true,
        }
    }
}

impl AuditorConfig {
    /// Effective test-image mount prefixes.
    pub fn test_image_mounts(&self) -> Vec<String> {
        self.test_image_mounts
            .clone()
            .unwrap_or_else(default_test_image_mounts)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_snapshot_timeout_secs() -> u64 {
    30
}

fn default_test_image_mounts() -> Vec<String> {
    vec![
        "/usr/local".to_string(),
        "/var/db/pkg".to_string(),
        "/var/lib/portage".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

/// Identity overrides consulted before the system databases.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Fall back to getpwnam/getgrnam for names not listed here.
    #[serde(default = "default_true")]
    pub system_lookup: bool,

    #[serde(default)]
    pub users: BTreeMap<String, u32>,

    #[serde(default)]
    pub groups: BTreeMap<String, u32>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            system_lookup: true,
            users: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }
}

fn default_exclusions() -> Vec<String> {
    [
        "agetty",
        "bash",
        "dash",
        "flock",
        "less",
        "logger",
        "ps",
        "sh",
        "sleep",
        "tail",
        "timeout",
        "top",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_ignored_ancestors() -> Vec<String> {
    ["kthreadd", "sshd", "local_test_runner"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Baseline shipped with the auditor for common system daemons.
fn default_baseline() -> Vec<Requirement> {
    use Feature::*;

    let sandboxed: Features = [
        OwnMountNamespace,
        RestrictedCapabilities,
        NoNewPrivileges,
        SeccompFilter,
    ]
    .into_iter()
    .collect();

    vec![
        Requirement::new("udevd", "root", "root", Features::empty()),
        Requirement::new("systemd-journal", "root", "root", Features::empty()),
        Requirement::new("dbus-daemon", "messagebus", "messagebus", RestrictedCapabilities),
        Requirement::new("rsyslogd", "syslog", "syslog", sandboxed),
        Requirement::new("powerd", "power", "power", RestrictedCapabilities | NoNewPrivileges),
        Requirement::new("cras", "cras", "cras", sandboxed | OwnPidNamespace),
        Requirement::new("avahi-daemon", "avahi", "avahi", RestrictedCapabilities),
        Requirement::new("chronyd", "chrony", "chrony", RestrictedCapabilities | NoNewPrivileges),
        Requirement::new(
            "wpa_supplicant",
            "wpa",
            "wpa",
            RestrictedCapabilities | NoNewPrivileges | SeccompFilter,
        ),
        Requirement::new("cupsd", "root", "lp", OwnMountNamespaceNoPivot | OwnPidNamespace),
        Requirement::new("cupsd", "lp", "lp", sandboxed),
        Requirement::new(
            "systemd-resolved",
            "systemd-resolve",
            "systemd-resolve",
            RestrictedCapabilities | NoNewPrivileges | SeccompFilter,
        ),
        Requirement::new(
            "systemd-timesyncd",
            "systemd-timesync",
            "systemd-timesync",
            RestrictedCapabilities | NoNewPrivileges | SeccompFilter,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auditor.log_level, "info");
        assert_eq!(config.auditor.proc_root, PathBuf::from("/proc"));
        assert!(config.auditor.inherit_defaults);
        assert!(config.identities.system_lookup);
    }

    #[test]
    fn test_default_baseline_has_multi_user_entry() {
        let index = Config::default().baseline_index().unwrap();
        assert_eq!(index.lookup("cupsd").len(), 2);
        assert_eq!(index.lookup("systemd-journal").len(), 1);
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.baseline, Config::default().baseline);
        assert_eq!(parsed.exclusions, Config::default().exclusions);
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.auditor.log_level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.auditor.snapshot_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_baseline_entry() {
        let mut config = Config::empty();
        config.baseline = vec![
            Requirement::new("powerd", "power", "power", Features::empty()),
            Requirement::new("powerd", "power", "power", Feature::SeccompFilter),
        ];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::DuplicateBaselineEntry { .. }));
    }

    #[test]
    fn test_validate_empty_user() {
        let mut config = Config::empty();
        config.baseline = vec![Requirement::new("powerd", "", "power", Features::empty())];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Baseline entry #1"));
    }

    #[test]
    fn test_merge_replaces_same_name_and_user() {
        let mut config = Config::default();
        let mut other = Config::empty();
        other.baseline = vec![
            Requirement::new("powerd", "power", "power", Feature::SeccompFilter),
            Requirement::new("powerd", "root", "root", Features::empty()),
        ];
        let before = config.baseline.len();
        config.merge(other);

        assert_eq!(config.baseline.len(), before + 1);
        let index = config.baseline_index().unwrap();
        let powerd = index.lookup("powerd");
        assert_eq!(powerd.len(), 2);
        assert_eq!(powerd[0].features, Features::from(Feature::SeccompFilter));
        assert_eq!(powerd[1].user, "root");
    }

    #[test]
    fn test_merge_name_lists_dedup() {
        let mut config = Config::default();
        let mut other = Config::empty();
        other.exclusions = vec!["sleep".to_string(), "vim".to_string()];
        other.ignored_ancestors = vec!["sshd".to_string(), "tast".to_string()];
        let exclusions = config.exclusions.len();
        let ignored = config.ignored_ancestors.len();
        config.merge(other);

        assert_eq!(config.exclusions.len(), exclusions + 1);
        assert_eq!(config.ignored_ancestors.len(), ignored + 1);
        assert!(config.exclusion_set().contains("vim"));
        assert!(config.ignored_ancestor_set().contains("tast"));
    }

    #[test]
    fn test_merge_without_defaults() {
        let mut config = Config::default();
        let mut other = Config::empty();
        other.auditor.inherit_defaults = false;
        other.baseline = vec![Requirement::new("only", "1", "1", Features::empty())];
        config.merge(other);

        assert_eq!(config.baseline.len(), 1);
        assert!(config.exclusions.is_empty());
        assert!(config.ignored_ancestors.is_empty());
    }

    #[test]
    fn test_merge_test_image_mounts_replaced() {
        let mut config = Config::default();
        let other: Config =
            toml::from_str("[auditor]\ntest_image_mounts = [\"/opt/test\"]\n").unwrap();
        config.merge(other);
        assert_eq!(config.auditor.test_image_mounts(), vec!["/opt/test".to_string()]);

        // A later file that leaves the list unset keeps it.
        config.merge(toml::from_str("[auditor]\nlog_level = \"debug\"\n").unwrap());
        assert_eq!(config.auditor.test_image_mounts(), vec!["/opt/test".to_string()]);
    }

    #[test]
    fn test_merge_without_defaults_clears_test_image_mounts() {
        let mut config = Config::default();
        config.merge(toml::from_str("[auditor]\ninherit_defaults = false\n").unwrap());
        assert!(config.auditor.test_image_mounts().is_empty());

        let mut config = Config::default();
        config.merge(
            toml::from_str("[auditor]\ninherit_defaults = false\ntest_image_mounts = [\"/opt/test\"]\n")
                .unwrap(),
        );
        assert_eq!(config.auditor.test_image_mounts(), vec!["/opt/test".to_string()]);
    }

    #[test]
    fn test_unset_test_image_mounts_uses_builtin_list() {
        let auditor = AuditorConfig::default();
        assert!(auditor.test_image_mounts.is_none());
        assert_eq!(auditor.test_image_mounts().len(), 3);
        assert_eq!(Config::default().auditor.test_image_mounts(), auditor.test_image_mounts());
    }

    #[test]
    fn test_merge_scalars_and_identities() {
        let mut config = Config::default();
        let mut other = Config::empty();
        other.auditor.log_level = "debug".to_string();
        other.auditor.snapshot_timeout_secs = 5;
        other.auditor.memory_sanitizer = true;
        other.identities.system_lookup = false;
        other.identities.users.insert("power".to_string(), 228);
        config.merge(other);

        assert_eq!(config.auditor.log_level, "debug");
        assert_eq!(config.auditor.snapshot_timeout_secs, 5);
        assert!(config.auditor.memory_sanitizer);
        assert!(config.audit_options().skip_seccomp);
        assert!(!config.identities.system_lookup);

        use crate::process::IdentityResolver;
        let table = config.identity_table();
        assert_eq!(table.user_id("power").unwrap(), 228);
        assert!(table.user_id("root").is_err());
    }
}

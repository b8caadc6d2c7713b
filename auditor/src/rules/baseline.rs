//! Declarative sandboxing baseline and its lookup index.

use crate::error::{Error, Result};
use crate::process::{normalize, IdentityResolver};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::BitOr;

/// A single sandboxing feature a process can be required to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Runs in a PID namespace other than init's.
    OwnPidNamespace,
    /// Runs in its own mount namespace and has pivoted its root.
    OwnMountNamespace,
    /// Runs in its own mount namespace; pivot_root is not required.
    OwnMountNamespaceNoPivot,
    /// Effective capabilities differ from init's.
    RestrictedCapabilities,
    /// `no_new_privs` is set.
    NoNewPrivileges,
    /// A seccomp filter is installed.
    SeccompFilter,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::OwnPidNamespace,
        Feature::OwnMountNamespace,
        Feature::OwnMountNamespaceNoPivot,
        Feature::RestrictedCapabilities,
        Feature::NoNewPrivileges,
        Feature::SeccompFilter,
    ];

    const fn bit(self) -> u32 {
        match self {
            Feature::OwnPidNamespace => 1 << 0,
            Feature::OwnMountNamespace => 1 << 1,
            Feature::OwnMountNamespaceNoPivot => 1 << 2,
            Feature::RestrictedCapabilities => 1 << 3,
            Feature::NoNewPrivileges => 1 << 4,
            Feature::SeccompFilter => 1 << 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::OwnPidNamespace => "own_pid_namespace",
            Feature::OwnMountNamespace => "own_mount_namespace",
            Feature::OwnMountNamespaceNoPivot => "own_mount_namespace_no_pivot",
            Feature::RestrictedCapabilities => "restricted_capabilities",
            Feature::NoNewPrivileges => "no_new_privileges",
            Feature::SeccompFilter => "seccomp_filter",
        }
    }
}

/// A set of required [`Feature`]s, stored as a bitmask.
///
/// Serialized as a list of feature names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "Vec<Feature>", into = "Vec<Feature>")]
pub struct Features(u32);

impl Features {
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn contains(self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Feature> {
        Feature::ALL.into_iter().filter(move |f| self.contains(*f))
    }

    /// Whether either mount namespace variant is required.
    pub fn requires_mount_namespace(self) -> bool {
        self.contains(Feature::OwnMountNamespace) || self.contains(Feature::OwnMountNamespaceNoPivot)
    }
}

impl From<Feature> for Features {
    fn from(feature: Feature) -> Self {
        Self(feature.bit())
    }
}

impl BitOr for Feature {
    type Output = Features;

    fn bitor(self, rhs: Feature) -> Features {
        Features(self.bit() | rhs.bit())
    }
}

impl BitOr<Feature> for Features {
    type Output = Features;

    fn bitor(self, rhs: Feature) -> Features {
        Features(self.0 | rhs.bit())
    }
}

impl FromIterator<Feature> for Features {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Features::empty(), |acc, feature| acc | feature)
    }
}

impl From<Vec<Feature>> for Features {
    fn from(features: Vec<Feature>) -> Self {
        features.into_iter().collect()
    }
}

impl From<Features> for Vec<Feature> {
    fn from(features: Features) -> Self {
        features.iter().collect()
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(Feature::as_str).collect();
        f.write_str(&names.join(", "))
    }
}

/// One baseline entry: the expected identity and sandboxing of a process name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Requirement {
    /// Process comm name.
    pub name: String,
    /// Expected effective user, numeric or symbolic.
    pub user: String,
    /// Expected effective group, numeric or symbolic.
    pub group: String,
    #[serde(default)]
    pub features: Features,
}

impl Requirement {
    pub fn new(
        name: impl Into<String>,
        user: impl Into<String>,
        group: impl Into<String>,
        features: impl Into<Features>,
    ) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            group: group.into(),
            features: features.into(),
        }
    }

    /// Validate the entry. Returns an error message if invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("baseline entry must have a 'name'".to_string());
        }
        if self.user.trim().is_empty() {
            return Err(format!("baseline entry '{}' must have a 'user'", self.name));
        }
        if self.group.trim().is_empty() {
            return Err(format!("baseline entry '{}' must have a 'group'", self.name));
        }
        Ok(())
    }
}

/// A set of normalized process names.
///
/// Used for both the exclusion set and the ignored-ancestor set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameSet(HashSet<String>);

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str) -> bool {
        self.0.insert(normalize(name))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(&normalize(name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names in sorted order.
    pub fn sorted(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.0.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<S: AsRef<str>> FromIterator<S> for NameSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = NameSet::new();
        for name in iter {
            set.insert(name.as_ref());
        }
        set
    }
}

/// Baseline requirements grouped by normalized process name.
#[derive(Debug, Clone, Default)]
pub struct BaselineIndex {
    by_name: HashMap<String, Vec<Requirement>>,
    len: usize,
}

impl BaselineIndex {
    /// Build the index, rejecting two entries for the same name and user.
    ///
    /// Declaration order within a name is kept; it decides which entry is
    /// used when no entry matches a process's user.
    pub fn build(requirements: Vec<Requirement>) -> Result<Self> {
        let mut by_name: HashMap<String, Vec<Requirement>> = HashMap::new();
        let mut len = 0;

        for mut requirement in requirements {
            requirement.name = normalize(&requirement.name);
            let group = by_name.entry(requirement.name.clone()).or_default();
            if group.iter().any(|r| r.user == requirement.user) {
                return Err(Error::DuplicateBaselineEntry {
                    name: requirement.name,
                    user: requirement.user,
                });
            }
            group.push(requirement);
            len += 1;
        }

        tracing::debug!(
            "Baseline index built: {} entries for {} process names",
            len,
            by_name.len()
        );
        Ok(Self { by_name, len })
    }

    /// Reject two entries for one name whose users resolve to the same ID,
    /// e.g. `"0"` and `"root"`. Users that do not resolve are skipped here;
    /// the evaluator reports them per process.
    pub fn check_identities(&self, identities: &dyn IdentityResolver) -> Result<()> {
        for (name, group) in &self.by_name {
            let mut seen: HashMap<u32, &str> = HashMap::new();
            for requirement in group {
                let Ok(uid) = identities.user_id(&requirement.user) else {
                    continue;
                };
                if let Some(first) = seen.insert(uid, &requirement.user) {
                    tracing::debug!(
                        "'{}': users '{}' and '{}' both resolve to uid {}",
                        name,
                        first,
                        requirement.user,
                        uid
                    );
                    return Err(Error::DuplicateBaselineEntry {
                        name: name.clone(),
                        user: requirement.user.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Requirements for a process name, in declaration order.
    pub fn lookup(&self, name: &str) -> &[Requirement] {
        self.by_name
            .get(&normalize(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of requirements in the index.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_bitmask() {
        let features = Feature::RestrictedCapabilities | Feature::NoNewPrivileges;
        assert!(features.contains(Feature::RestrictedCapabilities));
        assert!(features.contains(Feature::NoNewPrivileges));
        assert!(!features.contains(Feature::SeccompFilter));
        assert!(!features.requires_mount_namespace());

        let features = features | Feature::OwnMountNamespaceNoPivot;
        assert!(features.requires_mount_namespace());
        assert!(!features.contains(Feature::OwnMountNamespace));
    }

    #[test]
    fn test_features_display() {
        assert_eq!(Features::empty().to_string(), "none");
        let features = Feature::SeccompFilter | Feature::OwnPidNamespace;
        assert_eq!(features.to_string(), "own_pid_namespace, seccomp_filter");
    }

    #[test]
    fn test_features_serde_as_names() {
        let req: Requirement = toml::from_str(
            r#"
name = "cras"
user = "cras"
group = "cras"
features = ["own_mount_namespace", "no_new_privileges", "seccomp_filter"]
"#,
        )
        .unwrap();
        assert!(req.features.contains(Feature::OwnMountNamespace));
        assert!(req.features.contains(Feature::NoNewPrivileges));
        assert!(req.features.contains(Feature::SeccompFilter));
        assert!(!req.features.contains(Feature::OwnPidNamespace));

        let json = serde_json::to_value(req.features).unwrap();
        assert_eq!(
            json,
            serde_json::json!(["own_mount_namespace", "no_new_privileges", "seccomp_filter"])
        );
    }

    #[test]
    fn test_features_unknown_name_rejected() {
        let result: std::result::Result<Requirement, _> = toml::from_str(
            r#"
name = "x"
user = "x"
group = "x"
features = ["teleportation"]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_requirement_validate() {
        assert!(Requirement::new("powerd", "power", "power", Features::empty())
            .validate()
            .is_ok());
        let err = Requirement::new("powerd", "", "power", Features::empty())
            .validate()
            .unwrap_err();
        assert!(err.contains("user"));
        assert!(Requirement::new(" ", "a", "b", Features::empty())
            .validate()
            .is_err());
    }

    #[test]
    fn test_name_set_normalizes() {
        let set: NameSet = ["a-very-long-process-name", "sleep"].into_iter().collect();
        assert!(set.contains("a-very-long-pro"));
        assert!(set.contains("a-very-long-process-name-other-suffix"));
        assert!(set.contains("sleep"));
        assert!(!set.contains("sleeper"));
        assert_eq!(set.sorted(), vec!["a-very-long-pro", "sleep"]);
    }

    #[test]
    fn test_index_lookup_preserves_order() {
        let index = BaselineIndex::build(vec![
            Requirement::new("tcsd", "tss", "tss", Feature::NoNewPrivileges),
            Requirement::new("powerd", "power", "power", Feature::RestrictedCapabilities),
            Requirement::new("tcsd", "root", "root", Features::empty()),
        ])
        .unwrap();

        assert_eq!(index.len(), 3);
        let tcsd = index.lookup("tcsd");
        assert_eq!(tcsd.len(), 2);
        assert_eq!(tcsd[0].user, "tss");
        assert_eq!(tcsd[1].user, "root");
        assert!(index.lookup("unknown").is_empty());
    }

    #[test]
    fn test_index_normalizes_names() {
        let index = BaselineIndex::build(vec![Requirement::new(
            "trunks_send_helper",
            "trunks",
            "trunks",
            Features::empty(),
        )])
        .unwrap();

        assert_eq!(index.lookup("trunks_send_hel").len(), 1);
        assert_eq!(index.lookup("trunks_send_helper").len(), 1);
        assert_eq!(index.lookup("trunks_send_hel")[0].name, "trunks_send_hel");
    }

    #[test]
    fn test_index_rejects_duplicate_user() {
        let result = BaselineIndex::build(vec![
            Requirement::new("powerd", "power", "power", Features::empty()),
            Requirement::new("powerd", "power", "root", Feature::SeccompFilter),
        ]);
        match result {
            Err(Error::DuplicateBaselineEntry { name, user }) => {
                assert_eq!(name, "powerd");
                assert_eq!(user, "power");
            }
            other => panic!("expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn test_index_rejects_users_resolving_to_same_id() {
        use crate::process::IdentityTable;

        let identities = IdentityTable::new().with_user("root", 0).with_user("tss", 59);
        let index = BaselineIndex::build(vec![
            Requirement::new("tcsd", "0", "root", Features::empty()),
            Requirement::new("tcsd", "root", "root", Feature::SeccompFilter),
        ])
        .unwrap();
        match index.check_identities(&identities) {
            Err(Error::DuplicateBaselineEntry { name, user }) => {
                assert_eq!(name, "tcsd");
                assert_eq!(user, "root");
            }
            other => panic!("expected duplicate error, got {:?}", other),
        }

        let index = BaselineIndex::build(vec![
            Requirement::new("tcsd", "tss", "tss", Features::empty()),
            Requirement::new("tcsd", "root", "root", Features::empty()),
            Requirement::new("tcsd", "unknown", "unknown", Features::empty()),
            Requirement::new("powerd", "0", "0", Features::empty()),
        ])
        .unwrap();
        assert!(index.check_identities(&identities).is_ok());
    }

    #[test]
    fn test_index_duplicate_after_truncation() {
        let result = BaselineIndex::build(vec![
            Requirement::new("long-daemon-name-one", "u", "g", Features::empty()),
            Requirement::new("long-daemon-name-two", "u", "g", Features::empty()),
        ]);
        assert!(matches!(result, Err(Error::DuplicateBaselineEntry { .. })));
    }
}

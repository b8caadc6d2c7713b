//! Audit runs: configuration in, outcome out.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::{IdentityTable, Snapshot, SnapshotProvider};
use crate::report::AuditOutcome;
use crate::rules::{AuditOptions, BaselineIndex, ComplianceEvaluator, NameSet};
use std::path::Path;
use std::time::Duration;

/// Everything an evaluation needs, built once from a [`Config`].
#[derive(Debug)]
pub struct Auditor {
    baseline: BaselineIndex,
    exclusions: NameSet,
    ignored_ancestors: NameSet,
    identities: IdentityTable,
    options: AuditOptions,
}

impl Auditor {
    pub fn from_config(config: &Config) -> Result<Self> {
        let baseline = config.baseline_index()?;
        let identities = config.identity_table();
        baseline.check_identities(&identities)?;

        Ok(Self {
            baseline,
            exclusions: config.exclusion_set(),
            ignored_ancestors: config.ignored_ancestor_set(),
            identities,
            options: config.audit_options(),
        })
    }

    /// Override the run options derived from the config.
    pub fn with_options(mut self, options: AuditOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> AuditOptions {
        self.options
    }

    pub fn baseline(&self) -> &BaselineIndex {
        &self.baseline
    }

    pub fn run(&self, snapshot: &Snapshot) -> Result<AuditOutcome> {
        tracing::info!(
            "Auditing {} processes against {} baseline entries",
            snapshot.len(),
            self.baseline.len()
        );
        ComplianceEvaluator::new(
            &self.baseline,
            &self.exclusions,
            &self.ignored_ancestors,
            &self.identities,
        )
        .with_options(self.options)
        .evaluate(snapshot)
    }
}

/// Run `provider` on the blocking pool, giving up after `timeout`.
///
/// A timed-out read keeps its blocking thread. The runtime driving this
/// future must be shut down without waiting for blocking tasks
/// (`Runtime::shutdown_background`), or the process will not exit.
pub async fn collect_snapshot<P>(provider: P, timeout: Duration) -> Result<Snapshot>
where
    P: SnapshotProvider + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || provider.snapshot());
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::snapshot(format!("snapshot task failed: {}", e))),
        Err(_) => {
            tracing::error!("Snapshot collection exceeded {}s", timeout.as_secs());
            Err(Error::SnapshotTimeout(timeout.as_secs()))
        }
    }
}

/// Read a snapshot previously written by [`save_snapshot`].
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let contents = std::fs::read_to_string(path)?;
    let snapshot: Snapshot = serde_json::from_str(&contents)?;
    if snapshot.get(crate::process::INIT_PID).is_none() {
        return Err(Error::snapshot(format!(
            "{} does not contain pid 1",
            path.display()
        )));
    }
    tracing::info!(
        "Loaded snapshot of {} processes taken at {}",
        snapshot.len(),
        snapshot.taken_at()
    );
    Ok(snapshot)
}

pub fn save_snapshot(snapshot: &Snapshot, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)?;
    tracing::info!("Wrote snapshot of {} processes to {}", snapshot.len(), path.display());
    Ok(())
}

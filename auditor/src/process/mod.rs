//! Process facts, snapshots and ancestry.

pub mod facts;
pub mod identity;
pub mod name;
pub mod provider;
pub mod tree;

pub use facts::{ProbeFailure, ProcessFacts, Snapshot, INIT_PID};
pub use identity::{IdentityResolver, IdentityTable};
pub use name::{normalize, COMM_NAME_MAX};
pub use provider::{ProcfsProvider, SnapshotProvider};
pub use tree::has_ignored_ancestor;

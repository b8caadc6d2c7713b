//! Sandboxing baseline and compliance evaluation.

pub mod baseline;
pub mod engine;

pub use baseline::{BaselineIndex, Feature, Features, NameSet, Requirement};
pub use engine::{AuditOptions, ComplianceEvaluator, Problem, Verdict};

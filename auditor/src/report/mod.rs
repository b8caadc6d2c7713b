//! Audit outcome types and the sinks that present them.

use crate::rules::Problem;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::io::Write;

/// All problems found for one non-compliant process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationRecord {
    pub pid: u32,
    pub name: String,
    pub exe: String,
    pub problems: Vec<Problem>,
}

/// Why a process could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum ErrorKind {
    /// The baseline entry's user or group did not resolve.
    IdentityLookup(String),
    /// Facts could not be read although the process is still alive.
    ProbeFailed(String),
}

/// A fault in the audit itself, distinct from a policy violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationError {
    pub pid: u32,
    pub name: String,
    #[serde(flatten)]
    pub kind: ErrorKind,
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::IdentityLookup(reason) => {
                write!(f, "pid {} ({}): {}", self.pid, self.name, reason)
            }
            ErrorKind::ProbeFailed(reason) => {
                write!(f, "pid {}: failed to read live process: {}", self.pid, reason)
            }
        }
    }
}

/// Everything one audit run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditOutcome {
    pub processes_checked: usize,
    pub records: Vec<ViolationRecord>,
    pub errors: Vec<EvaluationError>,
}

impl AuditOutcome {
    /// A run fails on any violation or evaluation error.
    pub fn is_failure(&self) -> bool {
        !self.records.is_empty() || !self.errors.is_empty()
    }

    pub fn summary(&self) -> AuditSummary {
        AuditSummary {
            generated_at: Utc::now(),
            processes_checked: self.processes_checked,
            violations: self.records.len(),
            errors: self.errors.len(),
        }
    }
}

/// Final counts handed to a sink after all records.
#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub generated_at: DateTime<Utc>,
    pub processes_checked: usize,
    pub violations: usize,
    pub errors: usize,
}

/// Receives the outcome of an audit.
pub trait ReportSink {
    fn record(&mut self, record: &ViolationRecord) -> std::io::Result<()>;
    fn error(&mut self, error: &EvaluationError) -> std::io::Result<()>;
    fn summary(&mut self, summary: &AuditSummary) -> std::io::Result<()>;
}

/// Feed an outcome to a sink: records, then errors, then the summary.
pub fn publish(outcome: &AuditOutcome, sink: &mut dyn ReportSink) -> std::io::Result<()> {
    for record in &outcome.records {
        sink.record(record)?;
    }
    for error in &outcome.errors {
        sink.error(error)?;
    }
    sink.summary(&outcome.summary())
}

/// Reports through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn record(&mut self, record: &ViolationRecord) -> std::io::Result<()> {
        let problems: Vec<String> = record.problems.iter().map(ToString::to_string).collect();
        tracing::warn!(
            "{} (pid {}, exe '{}'): {}",
            record.name,
            record.pid,
            record.exe,
            problems.join(", ")
        );
        Ok(())
    }

    fn error(&mut self, error: &EvaluationError) -> std::io::Result<()> {
        tracing::error!("{}", error);
        Ok(())
    }

    fn summary(&mut self, summary: &AuditSummary) -> std::io::Result<()> {
        tracing::info!(
            "Checked {} processes: {} non-compliant, {} errors",
            summary.processes_checked,
            summary.violations,
            summary.errors
        );
        Ok(())
    }
}

/// Human-readable report.
pub struct TextSink<W: Write> {
    out: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for TextSink<W> {
    fn record(&mut self, record: &ViolationRecord) -> std::io::Result<()> {
        let exe = if record.exe.is_empty() {
            "-"
        } else {
            record.exe.as_str()
        };
        writeln!(self.out, "✗ {} (pid {}) {}", record.name, record.pid, exe)?;
        for problem in &record.problems {
            writeln!(self.out, "    - {}", problem)?;
        }
        Ok(())
    }

    fn error(&mut self, error: &EvaluationError) -> std::io::Result<()> {
        writeln!(self.out, "! {}", error)
    }

    fn summary(&mut self, summary: &AuditSummary) -> std::io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "Processes checked: {}", summary.processes_checked)?;
        writeln!(self.out, "Non-compliant: {}", summary.violations)?;
        writeln!(self.out, "Errors: {}", summary.errors)?;
        self.out.flush()
    }
}

/// Collects the outcome and writes a single JSON document on `summary`.
pub struct JsonSink<W: Write> {
    out: W,
    records: Vec<ViolationRecord>,
    errors: Vec<EvaluationError>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    summary: &'a AuditSummary,
    records: &'a [ViolationRecord],
    errors: &'a [EvaluationError],
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            records: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for JsonSink<W> {
    fn record(&mut self, record: &ViolationRecord) -> std::io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn error(&mut self, error: &EvaluationError) -> std::io::Result<()> {
        self.errors.push(error.clone());
        Ok(())
    }

    fn summary(&mut self, summary: &AuditSummary) -> std::io::Result<()> {
        let report = JsonReport {
            summary,
            records: &self.records,
            errors: &self.errors,
        };
        serde_json::to_writer_pretty(&mut self.out, &report)?;
        writeln!(self.out)?;
        self.out.flush()
    }
}

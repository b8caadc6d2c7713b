//! sandbox-audit - Sandboxing compliance auditor.

mod cli;

use crate::cli::{Args, Command, ReportFormat};
use sandbox_audit::audit::{self, Auditor};
use sandbox_audit::config::{self, Config};
use sandbox_audit::process::{ProcfsProvider, Snapshot};
use sandbox_audit::report::{self, JsonSink, LogSink, TextSink};
use sandbox_audit::rules::AuditOptions;
use sandbox_audit::{Error, Result};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Some(Command::Version) = &args.command {
        print_version();
        return Ok(());
    }

    // Load configuration early so we can use its log_level
    let config = config::load_or_default(args.config.as_deref())?;
    init_logging(&args, &config.auditor.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;
    let result = runtime.block_on(run(&args, &config));
    // A timed-out snapshot leaves a blocking read behind; do not wait for it.
    runtime.shutdown_background();
    result
}

async fn run(args: &Args, config: &Config) -> Result<()> {
    match &args.command {
        Some(Command::Validate { detailed }) => validate_config(config, *detailed),
        Some(Command::ListBaseline { detailed }) => list_baseline(config, *detailed),
        Some(Command::ShowConfig { format }) => show_config(config, format),
        Some(Command::Snapshot { output }) => {
            let snapshot = take_snapshot(config).await?;
            write_snapshot(&snapshot, output.as_deref())
        }
        Some(Command::Audit {
            snapshot,
            format,
            output,
        }) => run_audit(args, config, snapshot.as_deref(), *format, output.as_deref()).await,
        None => run_audit(args, config, None, ReportFormat::Text, None).await,
        Some(Command::Version) => Ok(()),
    }
}

async fn run_audit(
    args: &Args,
    config: &Config,
    snapshot_path: Option<&Path>,
    format: ReportFormat,
    output: Option<&Path>,
) -> Result<()> {
    tracing::info!("sandbox-audit v{} starting", VERSION);

    let mut auditor = Auditor::from_config(config)?;
    if args.msan {
        auditor = auditor.with_options(AuditOptions { skip_seccomp: true });
    }

    let snapshot = match snapshot_path {
        Some(path) => audit::load_snapshot(path)?,
        None => take_snapshot(config).await?,
    };

    let outcome = auditor.run(&snapshot)?;

    report::publish(&outcome, &mut LogSink)?;
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            publish_as(&outcome, format, file)?;
            tracing::info!("Report written to {}", path.display());
        }
        None => publish_as(&outcome, format, std::io::stdout().lock())?,
    }

    if outcome.is_failure() {
        return Err(Error::AuditFailed {
            violations: outcome.records.len(),
            errors: outcome.errors.len(),
        });
    }
    tracing::info!("All {} processes compliant", outcome.processes_checked);
    Ok(())
}

fn publish_as<W: Write>(
    outcome: &report::AuditOutcome,
    format: ReportFormat,
    out: W,
) -> Result<()> {
    match format {
        ReportFormat::Text => report::publish(outcome, &mut TextSink::new(out))?,
        ReportFormat::Json => report::publish(outcome, &mut JsonSink::new(out))?,
    }
    Ok(())
}

/// Capture a live snapshot on the blocking pool, bounded by the configured timeout.
async fn take_snapshot(config: &Config) -> Result<Snapshot> {
    if !cfg!(target_os = "linux") {
        return Err(Error::UnsupportedPlatform(std::env::consts::OS.to_string()));
    }

    let provider = ProcfsProvider::new(config.auditor.proc_root.clone())
        .with_test_mount_prefixes(config.auditor.test_image_mounts());
    let timeout = Duration::from_secs(config.auditor.snapshot_timeout_secs);
    audit::collect_snapshot(provider, timeout).await
}

fn write_snapshot(snapshot: &Snapshot, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => audit::save_snapshot(snapshot, path),
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, snapshot)?;
            writeln!(stdout)?;
            Ok(())
        }
    }
}

fn print_version() {
    println!("sandbox-audit {}", VERSION);
    println!();
    println!("Build info:");
    println!("  Target: {}", std::env::consts::ARCH);
    println!("  OS: {}", std::env::consts::OS);
    println!("  Process source: procfs");
}

fn print_check(name: &str, ok: bool, note: Option<&str>) {
    let status = if ok { "OK" } else { "FAIL" };
    let symbol = if ok { "✓" } else { "✗" };
    print!("  {} {} {}", symbol, status, name);
    if let Some(n) = note {
        print!(" ({})", n);
    }
    println!();
}

fn validate_config(config: &Config, detailed: bool) -> Result<()> {
    println!("Validating configuration...\n");

    let auditor = match Auditor::from_config(config) {
        Ok(a) => {
            print_check("Configuration loaded", true, None);
            a
        }
        Err(e) => {
            print_check("Configuration loaded", false, Some(&e.to_string()));
            return Err(e);
        }
    };

    print_check(
        &format!("procfs root ({})", config.auditor.proc_root.display()),
        config.auditor.proc_root.exists(),
        Some("Required for live audits"),
    );

    println!("\nConfiguration summary:");
    println!("  Auditor:");
    println!("    Log level: {}", config.auditor.log_level);
    println!("    Snapshot timeout: {}s", config.auditor.snapshot_timeout_secs);
    println!(
        "    Seccomp checks: {}",
        if auditor.options().skip_seccomp {
            "skipped (memory sanitizer)"
        } else {
            "enabled"
        }
    );
    println!(
        "    Test image mounts: {}",
        config.auditor.test_image_mounts().join(", ")
    );
    println!("  Baseline: {} entries", auditor.baseline().len());
    println!("  Exclusions: {} names", config.exclusions.len());
    println!("  Ignored ancestors: {} names", config.ignored_ancestors.len());

    if detailed {
        println!("\nBaseline entries:");
        for requirement in &config.baseline {
            println!(
                "  {} ({}:{}): {}",
                requirement.name, requirement.user, requirement.group, requirement.features
            );
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

fn list_baseline(config: &Config, detailed: bool) -> Result<()> {
    println!("Sandboxing baseline:\n");

    let mut requirements: Vec<_> = config.baseline.iter().collect();
    requirements.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.user.cmp(&b.user)));
    for requirement in requirements {
        println!("[{}] user={} group={}", requirement.name, requirement.user, requirement.group);
        println!("  {}", requirement.features);
    }

    if detailed {
        println!("\nExcluded processes:");
        for name in config.exclusion_set().sorted() {
            println!("  {}", name);
        }
        println!("\nIgnored ancestors:");
        for name in config.ignored_ancestor_set().sorted() {
            println!("  {}", name);
        }
    }

    Ok(())
}

fn show_config(config: &Config, format: &str) -> Result<()> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        _ => {
            // Default to TOML format
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| Error::config(e.to_string()))?
            );
        }
    }

    Ok(())
}

fn init_logging(args: &Args, config_log_level: &str) {
    // CLI flags take precedence, then config, then default to info
    let filter = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        match config_log_level {
            "trace" | "debug" | "info" | "warn" | "error" => config_log_level,
            _ => "info",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Reports go to stdout; keep logs off it.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use keel_config::KeelConfig;
use keel_core::prelude::*;
use keel_core::selftest;
use keel_telemetry::{EventLogger, MetricsRecorder};
use tracing::info;

#[derive(Parser)]
#[command(name = "keel", version, about)]
pub struct Cli {
    /// Configuration file; defaults to `config/keel.yaml` plus `KEEL_ENV` overrides
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Verify accounting and violation detection on this target
    Selftest,
    /// Run a sample scoped workload and print per-pool statistics
    Stats(StatsArgs),
    /// Print the fully resolved configuration
    CheckConfig,
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Number of temporary stack frames the workload opens
    #[arg(long, default_value_t = 8)]
    pub frames: usize,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Yaml,
    Prometheus,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<KeelConfig> {
    let config = match path {
        Some(path) => KeelConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => KeelConfig::load().context("loading layered configuration")?,
    };
    Ok(config)
}

/// Runs the selected command. Returns `false` when the command ran but failed.
pub fn run_command(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(cli.config.as_ref())?;

    if let Commands::CheckConfig = cli.command {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(true);
    }

    EventLogger::init(&config.logging)?;
    runtime::init(&config.memory)?;
    info!(
        level = ?config.memory.diagnostic_level,
        tier = ?config.memory.release_tier,
        enabled = config.memory.enabled,
        "memory manager initialized"
    );

    let passed = match cli.command {
        Commands::Selftest => run_selftest()?,
        Commands::Stats(args) => run_stats(&args)?,
        Commands::CheckConfig => true,
    };
    runtime::shutdown()?;
    Ok(passed)
}

fn run_selftest() -> anyhow::Result<bool> {
    let report = runtime::with_context(selftest::run)?;
    for check in &report.checks {
        let status = if check.passed { "ok" } else { "FAILED" };
        println!("{:<32} {:<6} {}", check.name, status, check.detail);
    }
    println!(
        "{} of {} checks passed",
        report.checks.iter().filter(|check| check.passed).count(),
        report.checks.len()
    );
    Ok(report.passed())
}

fn run_stats(args: &StatsArgs) -> anyhow::Result<bool> {
    runtime::with_context(|ctx| sample_workload(ctx, args.frames))??;
    let reports = runtime::manager()?.reports();

    match args.format {
        OutputFormat::Text => {
            println!(
                "{:<16} {:>12} {:>14} {:>10} {:>12} {:>12}",
                "pool", "allocations", "bytes", "live", "live_bytes", "used"
            );
            for report in &reports {
                println!(
                    "{:<16} {:>12} {:>14} {:>10} {:>12} {:>12}",
                    report.pool.name(),
                    report.stats.allocation_count,
                    report.stats.bytes_allocated,
                    report.stats.live_count,
                    report.stats.live_bytes,
                    report.used_bytes
                );
            }
        }
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&reports)?),
        OutputFormat::Prometheus => {
            let metrics = MetricsRecorder::new()?;
            metrics.record_reports(&reports);
            print!("{}", metrics.gather_metrics()?);
        }
    }
    Ok(true)
}

/// Long-lived tables in the permanent pool, per-frame scratch on the
/// temporary stack and a few heap blocks that outlive their scope.
fn sample_workload(ctx: &ThreadContext, frames: usize) -> Result<(), MemoryError> {
    {
        let _boot = ctx.enter_scope(PoolId::Permanent);
        for size in [4096, 1024, 256] {
            ctx.allocate(size)?;
        }
    }

    let mut kept = Vec::new();
    for frame in 0..frames {
        let _frame = ctx.enter_scope(PoolId::TemporaryStack);
        let scratch = ctx.allocate(512 + frame * 16)?;
        {
            let _heap = ctx.enter_scope(PoolId::Heap);
            let message = ctx.allocate(64)?;
            if frame % 2 == 0 {
                kept.push(message);
            } else {
                // SAFETY: allocated above and not yet released.
                unsafe { ctx.release(message)? };
            }
        }
        // SAFETY: allocated in this frame and on top of the stack.
        unsafe { ctx.release(scratch)? };
    }

    info!(kept = kept.len(), "sample workload finished");
    for block in kept {
        // SAFETY: each block was allocated above and released only here.
        unsafe { ctx.release(block)? };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::MemoryConfig;
    use std::sync::Arc;

    #[test]
    fn parses_global_config_flag() {
        let cli = Cli::parse_from(["keel", "stats", "--format", "yaml", "-c", "custom.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
        match cli.command {
            Commands::Stats(args) => {
                assert_eq!(args.format, OutputFormat::Yaml);
                assert_eq!(args.frames, 8);
            }
            _ => panic!("expected stats"),
        }
    }

    #[test]
    fn sample_workload_is_balanced() {
        let manager = Arc::new(MemoryManager::with_handler(
            &MemoryConfig::default(),
            Arc::new(PanicHandler),
        ));
        let ctx = manager.context();
        sample_workload(&ctx, 4).unwrap();

        let stack = manager.stats(PoolId::TemporaryStack);
        assert_eq!(stack.allocation_count, 4);
        assert_eq!(stack.live_count, 0);
        let heap = manager.stats(PoolId::Heap);
        assert_eq!(heap.allocation_count, 4);
        assert_eq!(heap.live_count, 0);
        assert_eq!(manager.stats(PoolId::Permanent).live_count, 3);
        assert_eq!(ctx.depth(), 0);
    }
}

//! Thin CLI shell: wires discovery, fixture resolution, and scheduling
//! together and reports a human-readable (or JSON) summary. No argument,
//! config-file, or plugin surface is specified beyond what's here; this is
//! a minimal, honest wiring layer, not a pytest-compatible front end.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{ArgAction, Parser, ValueEnum};
use colored::*;

use fastest_core::{
    default_cache_path, discover_with_cache, DiscoveryCache, Fixture, FixtureRegistry, Outcome,
    TestItem,
};
use fastest_execution::{is_successful, Scheduler, SchedulerConfig};

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Parser)]
#[command(name = "fastest")]
#[command(about = "A fast, pytest-compatible test runner core")]
struct Cli {
    /// Test files or directories to discover tests in
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Only run tests whose id contains this substring
    #[arg(short = 'k', long = "keyword", value_name = "EXPR")]
    keyword: Option<String>,

    /// Only discover tests, don't run them
    #[arg(long = "collect-only")]
    collect_only: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Quiet output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Output format
    #[arg(short = 'o', long = "output-format", value_enum, default_value = "pretty")]
    output_format: OutputFormat,

    /// Path to the worker binary (defaults to a sibling `fastest-worker`)
    #[arg(long = "worker-bin")]
    worker_bin: Option<PathBuf>,

    /// Disable the on-disk discovery cache
    #[arg(long = "no-cache")]
    no_cache: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let paths = if cli.paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        cli.paths.clone()
    };

    let started = Instant::now();
    let mut tests: Vec<TestItem> = Vec::new();
    let mut fixtures: Vec<Fixture> = Vec::new();

    let cache_path = default_cache_path();
    let mut cache = if cli.no_cache {
        None
    } else {
        Some(DiscoveryCache::load(&cache_path).unwrap_or_default())
    };

    for path in &paths {
        let result = match cache.as_mut() {
            Some(cache) => discover_with_cache(path, cache),
            None => fastest_core::discover(path),
        };
        for diagnostic in &result.diagnostics {
            if cli.verbose > 0 {
                eprintln!(
                    "{} {}: {}",
                    "warning:".yellow(),
                    diagnostic.path.display(),
                    diagnostic.reason
                );
            }
        }
        tests.extend(result.tests);
        fixtures.extend(result.fixtures);
    }

    if let Some(cache) = &cache {
        if let Err(e) = cache.save(&cache_path) {
            if cli.verbose > 0 {
                eprintln!("{} failed to save discovery cache: {e}", "warning:".yellow());
            }
        }
    }

    if let Some(keyword) = &cli.keyword {
        tests.retain(|t| t.id.contains(keyword.as_str()));
    }

    let discovery_elapsed = started.elapsed();

    if !cli.quiet && !matches!(cli.output_format, OutputFormat::Json) {
        println!(
            "Found {} tests in {:.3}s",
            tests.len(),
            discovery_elapsed.as_secs_f64()
        );
    }

    if cli.collect_only {
        if matches!(cli.output_format, OutputFormat::Json) {
            println!("{}", serde_json::to_string_pretty(&tests)?);
        } else {
            for test in &tests {
                println!("  {} {}", "\u{25cf}".green(), test.id);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    if tests.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    let registry = FixtureRegistry::new(fixtures);
    let worker_bin = cli
        .worker_bin
        .clone()
        .unwrap_or_else(default_worker_bin_path);
    let discovery_root = paths[0].clone();

    let scheduler = Scheduler::new(SchedulerConfig::new(worker_bin, discovery_root));
    let results = scheduler.run(tests, &registry)?;

    let elapsed = started.elapsed();

    if matches!(cli.output_format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            let (symbol, label) = match result.outcome {
                Outcome::Passed => ("\u{2713}".green(), "PASSED".green()),
                Outcome::Failed => ("\u{2717}".red(), "FAILED".red()),
                Outcome::Error => ("\u{2717}".red(), "ERROR".red()),
                Outcome::Skipped => ("s".yellow(), "SKIPPED".yellow()),
                Outcome::Xfailed => ("x".cyan(), "XFAIL".cyan()),
                Outcome::Xpassed => ("X".red(), "XPASS".red()),
            };
            if !matches!(result.outcome, Outcome::Passed) || cli.verbose > 0 {
                println!("{symbol} {} {label}", result.id);
            }
        }

        let passed = results.iter().filter(|r| r.outcome == Outcome::Passed).count();
        let failed = results
            .iter()
            .filter(|r| {
                matches!(r.outcome, Outcome::Failed | Outcome::Error)
                    || (r.outcome == Outcome::Xpassed && r.xfail_strict)
            })
            .count();
        let skipped = results
            .iter()
            .filter(|r| {
                matches!(r.outcome, Outcome::Skipped | Outcome::Xfailed)
                    || (r.outcome == Outcome::Xpassed && !r.xfail_strict)
            })
            .count();

        println!(
            "\n{} passed, {} failed, {} skipped in {:.2}s",
            passed.to_string().green(),
            failed.to_string().red(),
            skipped.to_string().yellow(),
            elapsed.as_secs_f64()
        );
    }

    Ok(if is_successful(&results) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn default_worker_bin_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("fastest"));
    path.set_file_name(if cfg!(windows) {
        "fastest-worker.exe"
    } else {
        "fastest-worker"
    });
    path
}

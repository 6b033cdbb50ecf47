//! CLI entrypoint for the enclavelibc stress harness.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use enclavelibc_core::DomainConfig;
use enclavelibc_harness::structured_log::{LogEmitter, validate_log_file};
use enclavelibc_harness::{Scenario, StressConfig, run_suite};

/// Stress and conformance tooling for enclavelibc.
#[derive(Debug, Parser)]
#[command(name = "enclavelibc-harness")]
#[command(about = "Stress and conformance harness for enclavelibc")]
struct Cli {
    /// Increase log verbosity. `-v` warnings, `-vv` info, `-vvv` debug,
    /// `-vvvv` trace.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run stress scenarios and write a JSON report.
    Stress {
        /// Scenarios to run (default: all).
        #[arg(long, value_enum)]
        scenario: Vec<Scenario>,
        /// Worker threads per scenario.
        #[arg(long, default_value_t = 8)]
        threads: usize,
        /// Iterations per worker.
        #[arg(long, default_value_t = 500)]
        iterations: usize,
        /// Domain configuration JSON (if omitted, read from the environment).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Structured JSONL log output path.
        #[arg(long, default_value = "target/conformance/stress.log.jsonl")]
        log: PathBuf,
        /// Output report path (if omitted, prints to stdout).
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print the effective domain configuration as JSON.
    Config {
        /// Domain configuration JSON (if omitted, read from the environment).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
}

fn verbosity_level(count: u8) -> log::LevelFilter {
    match count {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<DomainConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(DomainConfig::from_json(&std::fs::read_to_string(path)?)?),
        None => Ok(DomainConfig::from_env()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    env_logger::Builder::from_default_env()
        .filter_level(verbosity_level(cli.verbose))
        .init();

    match cli.command {
        Command::Stress {
            scenario,
            threads,
            iterations,
            config,
            log,
            report,
        } => {
            let cfg = StressConfig {
                threads,
                iterations,
                domain: load_config(config.as_ref())?,
            };
            let scenarios = if scenario.is_empty() {
                Scenario::ALL.to_vec()
            } else {
                scenario
            };
            if let Some(parent) = log.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut emitter = LogEmitter::to_file(&log, "stress")?;
            let suite = run_suite(&scenarios, &cfg, &mut emitter)?;
            let json = serde_json::to_string_pretty(&suite)?;
            match report {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    eprintln!("Wrote report to {}", path.display());
                }
                None => println!("{json}"),
            }
            if !suite.ok {
                return Err("stress invariants violated".into());
            }
        }
        Command::Config { config } => {
            let cfg = load_config(config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        Command::ValidateLog { log } => match validate_log_file(&log) {
            Ok(count) => eprintln!("{}: {count} valid entries", log.display()),
            Err(errors) => {
                for e in &errors {
                    eprintln!("line {}: {}: {}", e.line_number, e.field, e.message);
                }
                return Err(format!("{} invalid log lines", errors.len()).into());
            }
        },
    }
    Ok(())
}

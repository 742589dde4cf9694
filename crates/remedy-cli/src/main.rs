//! `remedy` command line
//!
//! - `simulate`: run the engine against seeded random collaborators
//! - `validate-log`: verify an exported audit trail
//! - `check-config`: load and validate an engine config file

mod simulator;
mod validate;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use remedy_core::EngineConfig;
use simulator::{run_simulation, simulation_engine_config, SimulatorConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

fn cli() -> Command {
    Command::new("remedy")
        .version(remedy_engine::VERSION)
        .about("Autonomous remediation orchestrator")
        .subcommand_required(true)
        .arg(
            Arg::new("json-log")
                .long("json-log")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the remediation simulator")
                .arg(
                    Arg::new("components")
                        .long("components")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Number of simulated components"),
                )
                .arg(
                    Arg::new("ticks")
                        .long("ticks")
                        .default_value("50")
                        .value_parser(value_parser!(u32))
                        .help("Monitor passes to drive"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("max-concurrent")
                        .long("max-concurrent")
                        .value_parser(value_parser!(usize))
                        .help("Override the concurrency limit"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.3")
                        .value_parser(value_parser!(f64))
                        .help("Chance that an executor attempt fails"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Engine config (TOML) instead of the simulation defaults"),
                )
                .arg(
                    Arg::new("export")
                        .long("export")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the resulting audit trail to this file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("validate-log")
                .about("Verify an exported audit trail")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the JSON Lines export"),
                )
                .arg(
                    Arg::new("digest")
                        .long("digest")
                        .help("Expected head digest (hex)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate an engine config")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the TOML config"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(error) = result {
        eprintln!("tracing already initialised: {error}");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-log"));

    let result = match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await,
        Some(("validate-log", args)) => validate_log(args),
        Some(("check-config", args)) => check_config(args),
        _ => Ok(true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(2)
        }
    }
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<bool> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => validate::check_config(path)?,
        None => simulation_engine_config(),
    };
    if let Some(max) = args.get_one::<usize>("max-concurrent") {
        config = config.with_max_concurrent(*max);
    }

    let sim = SimulatorConfig {
        seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
        components: args.get_one::<usize>("components").copied().unwrap_or(8),
        ticks: args.get_one::<u32>("ticks").copied().unwrap_or(50),
        executor_failure_rate: args.get_one::<f64>("failure-rate").copied().unwrap_or(0.3),
        settle_timeout: Duration::from_secs(30),
        ..SimulatorConfig::default()
    };

    let export = args.get_one::<PathBuf>("export").cloned();
    let (report, audit) = run_simulation(config, sim).await?;
    if let Some(path) = export {
        audit
            .export_to_path(&path)
            .with_context(|| format!("failed to export audit trail to {}", path.display()))?;
    }

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

fn validate_log(args: &ArgMatches) -> anyhow::Result<bool> {
    let path = args
        .get_one::<PathBuf>("path")
        .context("--path is required")?;
    let digest = args.get_one::<String>("digest").map(String::as_str);
    let report = validate::validate_log(path, digest)?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validating audit trail at: {}", path.display());
        println!("Records: {}", report.records);
        println!("Faults: {}", report.faults);
        println!("Components: {}", report.components);
        for (outcome, count) in &report.outcomes {
            println!("  {outcome}: {count}");
        }
        println!("Head digest: {}", report.head_digest);
        for problem in &report.problems {
            println!("problem: {problem}");
        }
        println!(
            "Audit trail: {}",
            if report.valid() { "VALID" } else { "INVALID" }
        );
    }
    Ok(report.valid())
}

fn check_config(args: &ArgMatches) -> anyhow::Result<bool> {
    let path = args
        .get_one::<PathBuf>("path")
        .context("--path is required")?;
    let config: EngineConfig = validate::check_config(path)?;

    println!("Config OK: {}", path.display());
    println!("  max_concurrent: {}", config.max_concurrent);
    println!("  monitor_interval: {:?}", config.monitor_interval());
    println!(
        "  retry: {} attempts, base {}ms, cap {}ms",
        config.retry.max_attempts, config.retry.base_delay_ms, config.retry.max_delay_ms
    );
    println!("  default timeout: {}ms", config.timeouts.default_ms);
    println!("  components: {}", config.components.len());
    for component in &config.components {
        println!("    {} ({})", component.id, component.name);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn simulate_defaults_parse() {
        let matches = cli().get_matches_from(["remedy", "simulate", "--seed", "9"]);
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "simulate");
        assert_eq!(args.get_one::<u64>("seed"), Some(&9));
        assert_eq!(args.get_one::<u32>("ticks"), Some(&50));
        assert!(args.get_one::<usize>("max-concurrent").is_none());
    }

    #[test]
    fn validate_log_requires_path() {
        assert!(cli().try_get_matches_from(["remedy", "validate-log"]).is_err());
    }
}

//! Run an auction-allocation scenario with simulated robots and write a JSON summary

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use mrauction::auction::logging as auction_log;
use mrauction::auction::mechanism::MechanismKind;
use mrauction::config::{AuctioneerConfig, load_config};
use mrauction::logger;
use mrauction::sim::{
    build_report, generate_random_scenario, load_scenario, resolve_scenario_path, run_simulation,
    save_scenario, write_report_json,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (.pkl, .json, .yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scenario file or directory (overrides config)
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Scenario id inside the scenario directory (overrides config)
    #[arg(long)]
    scenario_id: Option<String>,

    /// greedy, sequential or round_robin (overrides config)
    #[arg(long)]
    mechanism: Option<MechanismKind>,

    /// Enable periodic reallocation audits (overrides config)
    #[arg(long, default_value_t = false)]
    reallocate: bool,

    /// Output directory (overrides config)
    #[arg(long)]
    output: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AuctioneerConfig::default(),
    };
    if let Some(scenario) = cli.scenario {
        config.scenario_file = scenario;
    }
    if cli.scenario_id.is_some() {
        config.scenario_id = cli.scenario_id;
    }
    if let Some(mechanism) = cli.mechanism {
        config.mechanism = mechanism;
    }
    if cli.reallocate {
        config.reallocate = true;
    }
    if let Some(output) = cli.output {
        config.sim.output_dir = output;
    }
    config.validate()?;

    let result_dir = if config.sim.use_timestamp {
        let date_str = Local::now().format(&config.sim.timestamp_fmt).to_string();
        Path::new(&config.sim.output_dir).join(date_str)
    } else {
        Path::new(&config.sim.output_dir).to_path_buf()
    };
    std::fs::create_dir_all(&result_dir)
        .with_context(|| format!("Failed to create result dir {}", result_dir.display()))?;

    let _guard = logger::init(result_dir.join("simulation.log"), &config.sim.log_level)?;
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }
    info!("Results will be saved to: {}", result_dir.display());

    let scenario = match &config.sim.random_scenario {
        Some(params) => {
            info!("Generating random scenario with {} items", params.items);
            let scenario = generate_random_scenario(params);
            save_scenario(&scenario, &result_dir.join("scenario.yaml"))?;
            scenario
        }
        None => {
            let path = resolve_scenario_path(&config.scenario_file, config.scenario_id.as_deref())?;
            info!("Loading scenario from file: {}", path.display());
            if let Err(e) = std::fs::copy(&path, result_dir.join("scenario.yaml")) {
                warn!("Failed to copy scenario file: {}", e);
            }
            load_scenario(&path)?
        }
    };

    let wall_start = Instant::now();
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run_simulation(&config, &scenario))?;

    auction_log::log_agendas(&result.final_agendas);
    auction_log::log_assignment_table(&result.completed, &result.outstanding);
    if !result.drained {
        warn!("{} items still outstanding at the horizon", result.outstanding.len());
    }

    let report = build_report(&config, &scenario, result, wall_start);
    let summary_path = write_report_json(&report, &result_dir)?;
    info!("JSON summary saved to {}", summary_path.display());

    Ok(())
}

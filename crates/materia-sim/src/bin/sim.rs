#![forbid(unsafe_code)]

use std::env;

use anyhow::{Result, bail};
use clap::Parser;
use materia_sim::{CampaignConfig, replay_seed, run_campaign};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "materia-sim: randomized session testing for the selection engine",
    long_about = None
)]
struct Cli {
    /// First seed to run.
    #[arg(long, default_value_t = 0)]
    seed_start: u64,

    /// Number of consecutive seeds to run.
    #[arg(long, default_value_t = 100)]
    seeds: u64,

    /// Event-loop steps per session.
    #[arg(long, default_value_t = 120)]
    steps: u64,

    /// Replay a single seed with its full trace instead of a campaign.
    #[arg(long)]
    replay: Option<u64>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn campaign_config(&self) -> CampaignConfig {
        CampaignConfig {
            seed_range: self.seed_start..self.seed_start.saturating_add(self.seeds),
            steps: self.steps,
            ..CampaignConfig::default()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MATERIA_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "materia_core=debug,materia_sim=debug,info"
        } else {
            "materia_core=info,materia_sim=info,warn"
        })
    });

    let format = env::var("MATERIA_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry.with(fmt::layer().json().with_ansi(false)).init();
        }
        _ => {
            registry.with(fmt::layer().compact()).init();
        }
    }
}

fn run_replay(seed: u64, config: &CampaignConfig, json: bool) -> Result<()> {
    let report = replay_seed(seed, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        println!(
            "replay complete: seed={} steps={} version={} trace_events={} echoes_applied={}",
            report.result.seed,
            report.result.steps_run,
            report.result.final_version,
            report.result.trace.len(),
            report.result.counts.echoes_applied,
        );
        for violation in &report.violations {
            println!("  violation: {violation}");
        }
    }

    if !report.passed() {
        bail!(
            "seed {seed} violated {} invariant(s)",
            report.violations.len()
        );
    }
    Ok(())
}

fn run_full_campaign(config: &CampaignConfig, json: bool) -> Result<()> {
    let report = run_campaign(config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "campaign complete: seeds={} passed={} contended={} echoes_applied={} saves={}",
            report.seeds_run,
            report.seeds_passed,
            report.seeds_with_contention,
            report.echoes_applied,
            report.saves_completed,
        );
        for failure in &report.failures {
            println!("seed {} failed:", failure.seed);
            for violation in &failure.violations {
                println!("  {violation}");
            }
        }
    }

    if let Some(seed) = report.first_failure {
        bail!("campaign failed; replay with --replay {seed}");
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.campaign_config();

    match cli.replay {
        Some(seed) => run_replay(seed, &config, cli.json),
        None => run_full_campaign(&config, cli.json),
    }
}

//! qnet Simulator CLI
//!
//! Run the reference quantum network protocols and report their outcome.

use clap::Parser;
use qnet_sim::scenarios::ScenarioId;
use qnet_sim::{JournalExport, ScenarioResult, ScenarioRunner, SimConfig};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// qnet discrete-event simulator
#[derive(Parser, Debug)]
#[command(name = "qnet-sim")]
#[command(about = "Run discrete-event quantum network simulations", long_about = None)]
struct Args {
    /// Master seed for device randomness
    #[arg(short, long)]
    seed: Option<u64>,

    /// Trials per scenario
    #[arg(short, long)]
    trials: Option<usize>,

    /// Scenario to run (superdense, teleportation, ping_pong, lossy_link, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Dump journals and device counters after each trial
    #[arg(short, long)]
    monitor: bool,

    /// Receive timeout in milliseconds (0 = wait forever)
    #[arg(long)]
    receive_timeout_ms: Option<u64>,

    /// JSON configuration file; flags given on the command line win
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export every trial's journal to a JSON file
    #[arg(long)]
    export: Option<String>,
}

impl Args {
    /// Layers command line flags over the configuration file.
    fn config(&self) -> qnet_env::Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_json_file(path)?,
            None => SimConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(trials) = self.trials {
            config.trials = trials;
        }
        if self.monitor {
            config.monitor = true;
        }
        if let Some(ms) = self.receive_timeout_ms {
            config.receive_timeout_ms = if ms == 0 { None } else { Some(ms) };
        }
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = args.config().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    });

    if !args.json {
        info!("qnet simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: superdense, teleportation, ping_pong, lossy_link, all");
            std::process::exit(2);
        })]
    };

    if args.export.is_some() && scenarios.len() > 1 {
        eprintln!("Error: --export only supports a single scenario, not 'all'");
        std::process::exit(2);
    }

    let runner = ScenarioRunner::from_config(&config);
    let mut all_results: Vec<ScenarioResult> = Vec::new();

    for scenario in &scenarios {
        let result = match &args.export {
            Some(path) => {
                let (result, outcomes) = runner.run_with_outcomes(*scenario);
                let export = JournalExport::from_run(&result, &outcomes);
                match export.write_to_file(path) {
                    Ok(()) => info!("Exported {} trials to {}", export.trials.len(), path),
                    Err(e) => error!("Failed to write export: {}", e),
                }
                result
            }
            None => runner.run(*scenario),
        };

        if !args.json {
            if result.passed {
                info!(
                    "✓ {} (seed={}, trials={}) PASSED in {:.6e}s simulated",
                    scenario.name(),
                    result.seed,
                    result.trials,
                    result.final_time_secs
                );
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }

        all_results.push(result);
    }

    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "trials": r.trials,
                    "time_secs": r.final_time_secs,
                    "lost_qubits": r.lost_qubits,
                    "instructions": r.instructions,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("All {} scenario runs passed", total);
        } else {
            error!("{}/{} scenario runs failed", failed_count, total);
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}

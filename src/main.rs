use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genoracle::scenario::Scenario;
use genoracle::{Monitor, Oracle, OracleConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "genoracle")]
#[command(author, version, about = "Generator controller fault diagnosis", long_about = None)]
struct Cli {
    /// Oracle configuration (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Knowledge base to use instead of the built-in one
    #[arg(short, long)]
    knowledge_base: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the knowledge base
    Check,
    /// List controller profiles
    Profiles,
    /// List fault codes
    Faults {
        /// Only codes applicable to this controller
        #[arg(long)]
        controller: Option<String>,
    },
    /// Classify a single value
    Classify {
        parameter: String,
        value: f64,
        /// Apply this controller's threshold overrides
        #[arg(long)]
        controller: Option<String>,
    },
    /// Replay a scripted session and print the results as JSON
    Replay {
        scenario: PathBuf,
        #[arg(long)]
        pretty: bool,
    },
    /// Load a scenario's readings, then evaluate periodically until Ctrl-C
    Monitor { scenario: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    genoracle::init()?;
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => OracleConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => OracleConfig::default(),
    };
    if cli.knowledge_base.is_some() {
        config.knowledge_base = cli.knowledge_base.clone();
    }

    let mut oracle = Oracle::from_config(config).context("loading knowledge base")?;

    match cli.command {
        Commands::Check => {
            let kb = oracle.knowledge_base();
            println!(
                "Knowledge base {}: {} parameters, {} controllers, {} fault codes",
                kb.version,
                kb.parameters.len(),
                kb.controllers.len(),
                kb.faults.len()
            );
        }
        Commands::Profiles => {
            println!("{:<26} {:<12} {:<22} {}", "ID", "MAKER", "MODEL", "FIRMWARE");
            for profile in oracle.knowledge_base().controllers.iter() {
                let firmware: Vec<String> = profile
                    .firmware
                    .iter()
                    .map(|fw| {
                        let methods: Vec<String> = fw.reset_methods.iter().map(|m| m.to_string()).collect();
                        format!("{} [{}]", fw.version, methods.join(","))
                    })
                    .collect();
                println!(
                    "{:<26} {:<12} {:<22} {}",
                    profile.id,
                    profile.manufacturer,
                    profile.model,
                    firmware.join(" ")
                );
            }
        }
        Commands::Faults { controller } => {
            let faults = match controller.as_deref() {
                Some(id) => oracle.faults_for(id)?,
                None => oracle.knowledge_base().faults.iter().collect(),
            };
            for fault in faults {
                println!("{:<18} {:<9} {}", fault.code, fault.severity, fault.title);
            }
        }
        Commands::Classify {
            parameter,
            value,
            controller,
        } => {
            let c = oracle.classify(&parameter, value, controller.as_deref())?;
            match c.side {
                Some(side) => println!("{} ({:?})", c.status, side),
                None => println!("{}", c.status),
            }
        }
        Commands::Replay { scenario, pretty } => {
            let scenario = Scenario::from_file(&scenario)
                .with_context(|| format!("loading scenario {}", scenario.display()))?;
            let entries = scenario.replay(&oracle)?;
            let json = if pretty {
                serde_json::to_string_pretty(&entries)?
            } else {
                serde_json::to_string(&entries)?
            };
            println!("{}", json);
        }
        Commands::Monitor { scenario } => {
            let scenario = Scenario::from_file(&scenario)
                .with_context(|| format!("loading scenario {}", scenario.display()))?;

            let (tx, mut rx) = mpsc::channel(1000);
            oracle.set_event_channel(tx);
            let oracle = Arc::new(oracle);
            scenario.replay(&oracle)?;

            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => error!("Event encoding failed: {}", e),
                    }
                }
            });

            let monitor = Monitor::new(oracle.clone());
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    monitor.stop();
                }
                res = monitor.run() => {
                    if let Err(e) = res {
                        error!("Monitor error: {}", e);
                        std::process::exit(1);
                    }
                }
            }

            let stats = oracle.stats();
            info!(
                "Final stats: {} diagnoses, {} open alarms, {} feedback records",
                stats.diagnoses, stats.open_alarms, stats.feedback_records
            );
        }
    }

    Ok(())
}

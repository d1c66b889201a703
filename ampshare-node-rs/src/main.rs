//! AmpShare Node - CLI for the charge current arbiter
//!
//! Runs the arbiter against a simulated fleet described in a JSON file.
//!
//! # Usage
//!
//! ```bash
//! # Two vehicles sharing a 32 A circuit
//! ampshare-node --fleet ampshare-node-rs/fleet.json
//!
//! # Larger circuit, higher floor
//! ampshare-node --fleet fleet.json --budget 48 --min-current 6
//! ```
//!
//! # Demo Scenario
//!
//! 1. `plug car2` while car1 is charging
//! 2. car1 is parked at the minimum until car2's telemetry settles
//! 3. One run splits the budget by energy need
//! 4. `limit car1 100` triggers a fresh split

use std::error::Error;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;

use ampshare_core::{
    Arbiter, ArbiterConfig, Attribute, Device, SimulatedFleet, Telemetry, Trigger,
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Shared charging circuit arbiter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fleet description (JSON array of vehicles)
    #[arg(short, long)]
    fleet: String,

    /// Circuit budget in amps
    #[arg(short, long, default_value = "32")]
    budget: i32,

    /// Minimum current while plugged in at home
    #[arg(long, default_value = "5")]
    min_current: i32,

    /// Notification title
    #[arg(long, default_value = "Charge current allocation")]
    title: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// One line typed on stdin
#[derive(Debug, Clone, PartialEq)]
enum NodeCommand {
    Plug(String),
    Unplug(String),
    Limit(String, u32),
    Run,
    State,
    Dump(String),
    Quit,
}

impl NodeCommand {
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let command = match parts.as_slice() {
            [] => return Ok(None),
            ["plug", id] => Self::Plug(id.to_string()),
            ["unplug", id] => Self::Unplug(id.to_string()),
            ["limit", id, pct] => {
                let pct: u32 = pct
                    .parse()
                    .map_err(|_| format!("Invalid limit '{}' (must be 0-100)", pct))?;
                if pct > 100 {
                    return Err(format!("Invalid limit '{}' (must be 0-100)", pct));
                }
                Self::Limit(id.to_string(), pct)
            }
            ["run"] => Self::Run,
            ["state"] => Self::State,
            ["dump", id] => Self::Dump(id.to_string()),
            ["quit"] | ["exit"] => Self::Quit,
            _ => return Err(format!("Unknown command '{}'", line.trim())),
        };
        Ok(Some(command))
    }
}

fn load_fleet(path: impl AsRef<Path>) -> Result<SimulatedFleet, Box<dyn Error>> {
    let json = std::fs::read_to_string(path.as_ref())?;
    let fleet = SimulatedFleet::from_json(&json)?;
    if fleet.device_ids().is_empty() {
        return Err(format!("{}: fleet is empty", path.as_ref().display()).into());
    }
    Ok(fleet)
}

fn build_config(args: &Args, fleet: &SimulatedFleet) -> Result<ArbiterConfig, Box<dyn Error>> {
    let config = ArbiterConfig::new(fleet.device_ids(), args.budget)
        .with_min_current(args.min_current)
        .with_title(&args.title);
    config.validate()?;
    Ok(config)
}

async fn print_state(fleet: &SimulatedFleet, min_current: i32) {
    for id in fleet.device_ids() {
        match fleet.snapshot(&id).await {
            Ok(snapshot) => println!("  {}", Device::from_snapshot(&snapshot, min_current)),
            Err(e) => println!("  {}: {}", id, e),
        }
    }
}

async fn dump(fleet: &SimulatedFleet, id: &str) -> Result<(), Box<dyn Error>> {
    let snapshot = fleet.snapshot(&id.to_string()).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let fleet = load_fleet(&args.fleet)?;
    let config = build_config(&args, &fleet)?;

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            AmpShare Node - Shared Circuit Arbiter            ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Fleet:    {:<50} ║", truncate(&args.fleet, 50));
    println!("║  Vehicles: {:<50} ║", truncate(&config.devices.join(", "), 50));
    println!("║  Budget:   {:<50} ║", format!("{} A", config.budget_amps));
    println!("║  Minimum:  {:<50} ║", format!("{} A", config.min_current_amps));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let min_current = config.min_current_amps;
    let arbiter = Arc::new(Arbiter::new(config, Arc::new(fleet.clone())));
    let mut driver = tokio::spawn(Arc::clone(&arbiter).drive());

    let (command_tx, mut command_rx) = mpsc::channel::<NodeCommand>(16);

    std::thread::spawn(move || {
        println!("Commands:");
        println!("  plug <id>          - Plug a vehicle in");
        println!("  unplug <id>        - Pull a vehicle's cable");
        println!("  limit <id> <pct>   - Change a charge limit");
        println!("  run                - Force an allocation run");
        println!("  state              - Show every vehicle");
        println!("  dump <id>          - Show raw telemetry");
        println!("  quit               - Exit\n");

        let stdin = io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            match NodeCommand::parse(&line) {
                Ok(Some(command)) => {
                    let quit = command == NodeCommand::Quit;
                    if command_tx.blocking_send(command).is_err() || quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{}", e),
            }
        }
    });

    info!("Arbiter running");

    loop {
        tokio::select! {
            result = &mut driver => {
                match result {
                    Ok(Ok(())) => info!("Event loop finished"),
                    Ok(Err(e)) => error!("Event loop stopped: {}", e),
                    Err(e) => error!("Event loop panicked: {}", e),
                }
                break;
            }

            command = command_rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    NodeCommand::Plug(id) => {
                        if fleet.plug_in(&id).is_none() {
                            warn!("Unknown vehicle {}", id);
                        }
                    }
                    NodeCommand::Unplug(id) => {
                        if fleet.unplug(&id).is_none() {
                            warn!("Unknown vehicle {}", id);
                        }
                    }
                    NodeCommand::Limit(id, pct) => {
                        if fleet.report(&id, Attribute::ChargeLimit, pct.to_string()).is_none() {
                            warn!("Unknown vehicle {}", id);
                        }
                    }
                    NodeCommand::Run => {
                        let arbiter = Arc::clone(&arbiter);
                        tokio::spawn(async move {
                            let outcome = arbiter.handle(Trigger::Recompute).await;
                            info!("Manual run: {:?}", outcome);
                        });
                    }
                    NodeCommand::State => print_state(&fleet, min_current).await,
                    NodeCommand::Dump(id) => {
                        if let Err(e) = dump(&fleet, &id).await {
                            println!("{}", e);
                        }
                    }
                    NodeCommand::Quit => break,
                }
            }
        }
    }

    driver.abort();
    info!("Shutting down");
    Ok(())
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

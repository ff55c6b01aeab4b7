//! CXL Memory Link Simulator CLI.
//!
//! The main executable for the simulator. It parses the command line, loads
//! the TOML configuration, builds the link, runs the synthetic host workload
//! until the link drains and prints the collected statistics.
//!
//! # Usage
//!
//! ```text
//! cxl-memsim --config configs/default.toml --requests 10000 --read-percent 50
//! ```
//!
//! Logging is controlled by the `CXL_LOG` environment variable, e.g.
//! `CXL_LOG=debug` or `CXL_LOG=cxl_memsim::soc::relay=trace`.

use std::{fs, process};

use clap::Parser;
use log::error;

use cxl_memsim::config::{AccessPattern, Config};
use cxl_memsim::sim::StopReason;
use cxl_memsim::Simulator;

/// Command-line arguments for the CXL memory link simulator.
///
/// Workload options override the matching `[workload]` and `[general]`
/// entries of the configuration file.
#[derive(Parser, Debug)]
#[command(author, version, about = "CXL Memory-Expansion Link Timing Simulator")]
struct Args {
    #[arg(short, long, default_value = "configs/default.toml")]
    config: String,

    /// Number of requests the host issues.
    #[arg(short, long)]
    requests: Option<u64>,

    /// Share of reads among the requests, in percent.
    #[arg(long)]
    read_percent: Option<u32>,

    /// Address pattern: linear or random.
    #[arg(long)]
    pattern: Option<AccessPattern>,

    #[arg(long)]
    seed: Option<u64>,

    /// Drain the link after the last request (true or false).
    #[arg(long)]
    drain: Option<bool>,

    /// Write the statistics as JSON to this file.
    #[arg(long)]
    stats_json: Option<String>,

    /// Stop the simulation at this tick.
    #[arg(long)]
    max_ticks: Option<u64>,
}

fn load_config(args: &Args) -> Result<Config, cxl_memsim::common::SimError> {
    let mut config = Config::from_file(&args.config)?;
    if let Some(n) = args.requests {
        config.workload.requests = n;
    }
    if let Some(p) = args.read_percent {
        config.workload.read_percent = p;
    }
    if let Some(p) = args.pattern {
        config.workload.pattern = p;
    }
    if let Some(s) = args.seed {
        config.workload.seed = s;
    }
    if let Some(d) = args.drain {
        config.general.drain = d;
    }
    if let Some(t) = args.max_ticks {
        config.general.max_ticks = t;
    }
    config.validate()?;
    Ok(config)
}

fn print_config(config: &Config) {
    println!("Global Configuration");
    println!("--------------------");
    println!("General:");
    println!("  Clock Period:       {} ps", config.general.clock);
    println!("  Drain At End:       {}", config.general.drain);
    println!("Link:");
    println!(
        "  CXL Range:          {:#x} (+{} MiB)",
        config.bridge.cxl_base,
        config.bridge.cxl_size >> 20
    );
    println!("  Bridge Latency:     {} ps", config.bridge.bridge_lat);
    println!("  Bridge Protocol:    {} ps", config.bridge.proto_lat);
    println!(
        "  Bridge FIFOs:       {} req / {} resp",
        config.bridge.req_fifo_depth, config.bridge.resp_fifo_depth
    );
    println!("  Device Protocol:    {} ps", config.device.proto_lat);
    println!(
        "  Device FIFOs:       {} req / {} resp",
        config.device.req_fifo_depth, config.device.resp_fifo_depth
    );
    println!("Controller:");
    println!(
        "  Buffers:            {} read / {} write",
        config.controller.read_buffer_size, config.controller.write_buffer_size
    );
    println!(
        "  Write Thresholds:   {}% high / {}% low",
        config.controller.write_high_thresh_perc, config.controller.write_low_thresh_perc
    );
    println!("  Priorities:         {}", config.controller.priorities);
    println!("  Turn Policy:        {:?}", config.controller.turn_policy);
    println!("  Medium:             {:?}", config.medium.kind);
    println!("Workload:");
    println!("  Requests:           {}", config.workload.requests);
    println!("  Size:               {} B", config.workload.size);
    println!("  Reads:              {}%", config.workload.read_percent);
    println!("  Pattern:            {:?}", config.workload.pattern);
    println!("--------------------");
}

/// Main entry point for the CXL memory link simulator.
///
/// # Behavior
///
/// 1. **Configuration**: Parses command-line arguments and loads the TOML configuration file.
/// 2. **Initialization**: Builds the bridge, the device, the controller and the medium.
/// 3. **Simulation Loop**: Runs events until the link drains, the tick limit is reached
///    or a fault is raised.
/// 4. **Teardown**: Prints statistics and optionally writes them as JSON.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("CXL_LOG", "info")).init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    print_config(&config);

    let mut sim = match Simulator::new(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let outcome = sim.run();
    sim.stats.print(sim.now());

    if let Some(path) = &args.stats_json {
        match sim.stats.to_json() {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    error!("failed to write statistics to '{}': {}", path, e);
                }
            }
            Err(e) => error!("failed to serialise statistics: {}", e),
        }
    }

    match outcome {
        Ok(StopReason::Drained) => println!("\n[*] Link drained at tick {}", sim.now()),
        Ok(StopReason::TickLimit) => println!("\n[*] Tick limit reached at {}", sim.now()),
        Ok(StopReason::Idle) => println!("\n[*] No events left at tick {}", sim.now()),
        Err(e) => {
            eprintln!("\n[!] FATAL: {}", e);
            process::exit(1);
        }
    }
}

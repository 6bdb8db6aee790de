//! V2G-OCPP Node - CLI for the charge point fleet
//!
//! Runs N simulated ISO 15118 charge points, each bridged to an OCPP 2.0.1
//! CSMS over its own connection.
//!
//! # Usage
//!
//! ```bash
//! # One charge point against a local CSMS
//! v2g-ocpp-node --count 1
//!
//! # Ten charge points rotating over the default port range 2910-2920
//! v2g-ocpp-node --count 10 --station-prefix CP
//!
//! # Fleet experiment across generated subnet addresses
//! v2g-ocpp-node --count 10 --octet-low 20 --octet-high 30 \
//!     --port-base 2914 --port-ceiling 2914
//! ```

use std::net::Ipv4Addr;
use std::time::Duration;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use v2g_adapter_ocpp::{BridgeConfig, FleetRunner, SimSessionConfig};

/// ISO 15118 / OCPP 2.0.1 bridge charge point fleet
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of simulated charge points
    #[arg(short, long, default_value = "1")]
    count: usize,

    /// Station identity prefix (identities become PREFIX001, PREFIX002, ...)
    #[arg(long, default_value = "CP")]
    station_prefix: String,

    /// Preferred CSMS address, tried before generated subnet addresses
    #[arg(long, default_value = "127.0.0.1")]
    csms_address: Ipv4Addr,

    /// First CSMS listener port
    #[arg(long, default_value = "2910")]
    port_base: u16,

    /// Last CSMS listener port (inclusive)
    #[arg(long, default_value = "2920")]
    port_ceiling: u16,

    /// Lower bound of the generated-address octet window
    #[arg(long, default_value = "20")]
    octet_low: u8,

    /// Upper bound of the generated-address octet window
    #[arg(long, default_value = "30")]
    octet_high: u8,

    /// Vendor name
    #[arg(long, default_value = "Elektrokombinacija")]
    vendor: String,

    /// Model name
    #[arg(long, default_value = "EK3-V2G")]
    model: String,

    /// Delay between connection attempts, in milliseconds
    #[arg(long, default_value = "1000")]
    retry_delay_ms: u64,

    /// Average EV arrivals per second for the simulated sessions
    #[arg(long, default_value = "0.1")]
    arrival_rate: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║          V2G-OCPP Node - ISO 15118 Charge Point Fleet        ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Charge points: {:<45} ║", args.count);
    println!("║  CSMS address:  {:<45} ║", args.csms_address);
    println!(
        "║  Port range:    {:<45} ║",
        format!("{}-{}", args.port_base, args.port_ceiling)
    );
    println!(
        "║  Octet window:  {:<45} ║",
        format!("{}-{}", args.octet_low, args.octet_high)
    );
    println!("║  Vendor/Model:  {:<45} ║", format!("{}/{}", args.vendor, args.model));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // Build base configuration shared by the fleet
    let base = BridgeConfig::default()
        .with_vendor(&args.vendor, &args.model)
        .with_preferred(vec![args.csms_address])
        .with_port_range(args.port_base, args.port_ceiling)
        .with_octet_window(args.octet_low, args.octet_high)
        .with_retry_delay(Duration::from_millis(args.retry_delay_ms));

    let sim = SimSessionConfig {
        arrival_rate: args.arrival_rate,
        ..Default::default()
    };

    info!("starting fleet of {} charge points...", args.count);

    let fleet = FleetRunner::simulated(base, &args.station_prefix, args.count, sim);
    fleet.run().await;

    Ok(())
}

//! Integration tests for the temperature/humidity BLE firmware.
//!
//! Run after flashing the firmware, with the sensor attached and the device
//! in range of this host's Bluetooth adapter.

mod ble_client;

use std::time::Duration;

use clap::Parser;
use colored::Colorize;

use ble_client::SensorClient;
use tests::{print_results, run_all_tests, Options};

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "Integration tests for the temperature/humidity BLE firmware")]
struct Args {
    /// Advertised device name
    #[arg(short, long, default_value = "TempHum")]
    name: String,

    /// Scan timeout in seconds
    #[arg(short, long, default_value = "10")]
    scan_timeout: u64,

    /// Notification observation window in seconds
    #[arg(short, long, default_value = "5")]
    observe: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!("{}", "TempHum Integration Tests".bold());
    println!("Device: {}", args.name);
    println!();

    let options = Options {
        name: args.name,
        scan_timeout: Duration::from_secs(args.scan_timeout),
        observe: Duration::from_secs(args.observe),
    };

    println!("Scanning for device...");
    let client = SensorClient::connect_by_name(&options.name, options.scan_timeout).await?;
    println!("{}", "Connected!".green());

    println!("\nRunning tests...\n");

    let (results, client) = run_all_tests(client, &options).await;
    if let Some(client) = client {
        client.disconnect().await.ok();
    }

    print_results(&results);

    // Exit with error code if any tests failed
    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

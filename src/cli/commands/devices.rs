//! Devices command - list attached devices and their lock state

use crate::cli::args::{DevicesArgs, OutputFormat};
use crate::config::Config;
use crate::device::{group_by_soc, AdbBridge, DeviceBridge};
use crate::error::{DevfarmError, DevfarmResult};
use crate::lock::DeviceLockManager;
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct DeviceRow {
    serial: String,
    soc: String,
    model: String,
    abis: Vec<String>,
    locked: bool,
}

/// Execute the devices command
pub async fn execute(args: DevicesArgs, config: &Config) -> DevfarmResult<()> {
    let bridge = AdbBridge::new(config.device.bridge.clone());
    if !bridge.is_available().await {
        return Err(DevfarmError::BridgeNotFound(config.device.bridge.clone()));
    }
    let locks = DeviceLockManager::from_config(&config.lock);

    let mut rows = Vec::new();
    for (soc, devices) in group_by_soc(&bridge).await? {
        for device in devices {
            rows.push(DeviceRow {
                locked: locks.is_locked(&device.serial)?,
                soc: soc.clone(),
                model: device.props.model().unwrap_or("unknown").to_string(),
                abis: device.props.abis(),
                serial: device.serial,
            });
        }
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Plain => {
            for row in &rows {
                println!("{}", row.serial);
            }
        }
        OutputFormat::Table => print_table(&rows, bridge.bridge_name()),
    }
    Ok(())
}

fn print_table(rows: &[DeviceRow], bridge_name: &str) {
    let ctx = UiContext::detect();
    if rows.is_empty() {
        ui::step_info(&ctx, &format!("No devices attached ({})", bridge_name));
        return;
    }

    println!(
        "{:<24} {:<12} {:<24} {}",
        style("SERIAL").bold(),
        style("SOC").bold(),
        style("MODEL").bold(),
        style("LOCK").bold()
    );
    for row in rows {
        let lock = if row.locked {
            style("locked").yellow()
        } else {
            style("free").green()
        };
        println!("{:<24} {:<12} {:<24} {}", row.serial, row.soc, row.model, lock);
    }

    println!();
    println!("{} device(s)", rows.len());
}

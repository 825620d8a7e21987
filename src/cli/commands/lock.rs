//! Lock command - inspect device locks or run a command under one

use crate::cli::args::{LockAction, LockArgs, OutputFormat};
use crate::config::{secs_to_duration, Config};
use crate::error::{DevfarmError, DevfarmResult};
use crate::lock::{DeviceLock, DeviceLockManager, LockHolder, LockStatus};
use crate::ui::{TaskSpinner, UiContext};
use console::style;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Execute the lock command
pub async fn execute(args: LockArgs, config: &Config) -> DevfarmResult<()> {
    let locks = DeviceLockManager::from_config(&config.lock);
    debug!("Lock directory: {}", locks.lock_dir().display());

    match args.action {
        LockAction::Status { devices, format } => status(&locks, &devices, format),
        LockAction::Run {
            device,
            timeout,
            purpose,
            command,
        } => {
            let timeout = timeout.map_or_else(|| config.lock.timeout(), secs_to_duration);
            let purpose = purpose.unwrap_or_else(|| command.join(" "));
            run_locked(&locks.with_purpose(purpose), &device, timeout, &command).await
        }
    }
}

#[derive(Debug, Serialize)]
struct DeviceLockState {
    device: String,
    locked: bool,
    holder: Option<LockHolder>,
}

fn status(locks: &DeviceLockManager, devices: &[String], format: OutputFormat) -> DevfarmResult<()> {
    let states = devices
        .iter()
        .map(|device| -> DevfarmResult<DeviceLockState> {
            let (locked, holder) = match locks.status(device)? {
                LockStatus::Free => (false, None),
                LockStatus::Locked(holder) => (true, holder),
            };
            Ok(DeviceLockState {
                device: device.clone(),
                locked,
                holder,
            })
        })
        .collect::<DevfarmResult<Vec<_>>>()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&states)?),
        OutputFormat::Plain => {
            for state in &states {
                let label = if state.locked { "locked" } else { "free" };
                println!("{}\t{}", state.device, label);
            }
        }
        OutputFormat::Table => print_table(&states),
    }
    Ok(())
}

fn print_table(states: &[DeviceLockState]) {
    println!(
        "{:<24} {:<8} {:<8} {:<18} {}",
        style("DEVICE").bold(),
        style("STATE").bold(),
        style("PID").bold(),
        style("SINCE").bold(),
        style("PURPOSE").bold()
    );

    for state in states {
        let label = if state.locked {
            style("locked").yellow()
        } else {
            style("free").green()
        };
        let (pid, since, purpose) = match &state.holder {
            Some(h) => (
                h.pid.to_string(),
                h.acquired_at.format("%Y-%m-%d %H:%M").to_string(),
                h.purpose.clone().unwrap_or_default(),
            ),
            None => ("-".to_string(), "-".to_string(), String::new()),
        };
        println!(
            "{:<24} {:<8} {:<8} {:<18} {}",
            state.device, label, pid, since, purpose
        );
    }
}

/// Wait for the device lock, showing a spinner only when it is contended
pub(crate) async fn acquire_with_spinner(
    ctx: &UiContext,
    locks: &DeviceLockManager,
    device: &str,
    timeout: Duration,
) -> DevfarmResult<DeviceLock> {
    if let Some(lock) = locks.try_acquire(device)? {
        return Ok(lock);
    }

    let mut spinner = TaskSpinner::new(ctx);
    spinner.start(&format!("Waiting for lock on device {}...", device));
    match locks.acquire_async(device, timeout).await {
        Ok(lock) => {
            spinner.stop(&format!("Locked device {}", device));
            Ok(lock)
        }
        Err(e) => {
            spinner.stop_error(&format!("Device {} is still busy", device));
            Err(e)
        }
    }
}

async fn run_locked(
    locks: &DeviceLockManager,
    device: &str,
    timeout: Duration,
    command: &[String],
) -> DevfarmResult<()> {
    let ctx = UiContext::detect();
    let (program, args) = command
        .split_first()
        .ok_or_else(|| DevfarmError::User("no command given".to_string()))?;

    let _lock = acquire_with_spinner(&ctx, locks, device, timeout).await?;
    debug!("Running {:?} while holding lock on {}", command, device);

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| DevfarmError::command_failed(command.join(" "), e))?;

    if status.success() {
        Ok(())
    } else {
        Err(DevfarmError::CommandExit {
            command: command.join(" "),
            code: status.code().unwrap_or(-1),
        })
    }
}

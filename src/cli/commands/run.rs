//! Run command - push a binary to a device and run it under the device lock

use crate::cli::args::RunArgs;
use crate::config::{secs_to_duration, Config};
use crate::device::{AdbBridge, DeviceBridge, DeviceRunner};
use crate::error::{DevfarmError, DevfarmResult};
use crate::lock::DeviceLockManager;
use crate::ui::{self, UiContext};
use tracing::debug;

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config) -> DevfarmResult<()> {
    let ctx = UiContext::detect();

    let bridge = AdbBridge::new(config.device.bridge.clone());
    if !bridge.is_available().await {
        return Err(DevfarmError::BridgeNotFound(config.device.bridge.clone()));
    }
    debug!("Using device bridge: {}", bridge.bridge_name());

    let locks = DeviceLockManager::from_config(&config.lock)
        .with_purpose(format!("devfarm run {}", args.binary.display()));
    let mut runner = DeviceRunner::new(&bridge, &locks, config);
    if let Some(secs) = args.timeout {
        runner = runner.with_lock_timeout(secs_to_duration(secs));
    }

    let echo = |line: String| println!("{}", line);
    match args.collect {
        Some(dest) => {
            let file_name = args
                .file_name
                .unwrap_or_else(|| config.cache.compiled_program_file.clone());
            let (_, local) = runner
                .run_and_collect(
                    &args.serial,
                    &args.binary,
                    &args.args,
                    &echo,
                    &file_name,
                    &dest,
                )
                .await?;
            ui::step_ok(&ctx, &format!("Run on {} succeeded", args.serial));
            ui::step_ok_detail(&ctx, "Collected compiled cache", &local.display().to_string());
        }
        None => {
            runner.run(&args.serial, &args.binary, &args.args, &echo).await?;
            ui::step_ok(&ctx, &format!("Run on {} succeeded", args.serial));
        }
    }
    Ok(())
}

//! `adb` device bridge
//!
//! Implements the DeviceBridge trait by shelling out to the Android Debug
//! Bridge. Every per-device call is pinned with `-s <serial>`.

use crate::device::bridge::{DeviceBridge, DeviceProps};
use crate::error::{DevfarmError, DevfarmResult};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Device bridge backed by the `adb` executable
pub struct AdbBridge {
    program: String,
}

impl AdbBridge {
    /// Create a bridge running `program` (usually `adb`)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    fn spawn_error(&self, args: &[&str], e: io::Error) -> DevfarmError {
        if e.kind() == io::ErrorKind::NotFound {
            DevfarmError::BridgeNotFound(self.program.clone())
        } else {
            DevfarmError::command_failed(self.describe(args), e)
        }
    }

    /// Execute an adb command and return the output, failing on nonzero exit
    async fn exec(&self, args: &[&str]) -> DevfarmResult<Output> {
        debug!("Executing: {}", self.describe(args));

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(args, e))?;

        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DevfarmError::command_exec(
                self.describe(args),
                stderr.trim().to_string(),
            ))
        }
    }

    fn shell_args<'a>(serial: &'a str, command: &'a [String]) -> Vec<&'a str> {
        let mut args = vec!["-s", serial, "shell"];
        args.extend(command.iter().map(String::as_str));
        args
    }
}

impl Default for AdbBridge {
    fn default() -> Self {
        Self::new("adb")
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn devices(&self) -> DevfarmResult<Vec<String>> {
        let output = self.exec(&["devices"]).await?;
        Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn getprop(&self, serial: &str) -> DevfarmResult<DeviceProps> {
        let output = self.exec(&["-s", serial, "shell", "getprop"]).await?;
        Ok(DeviceProps::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn shell(&self, serial: &str, command: &[String]) -> DevfarmResult<String> {
        let output = self.exec(&Self::shell_args(serial, command)).await?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(combined)
    }

    async fn shell_streaming(
        &self,
        serial: &str,
        command: &[String],
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> DevfarmResult<String> {
        let args = Self::shell_args(serial, command);
        debug!("Executing with streamed output: {}", self.describe(&args));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(&args, e))?;

        let lines = stream_child_output(&mut child, on_output).await;
        let status = child
            .wait()
            .await
            .map_err(|e| DevfarmError::command_failed(self.describe(&args), e))?;

        let combined = lines.join("\n");
        if status.success() {
            Ok(combined)
        } else {
            Err(DevfarmError::command_exec(
                self.describe(&args),
                tail(&combined, 50),
            ))
        }
    }

    async fn push(&self, serial: &str, src: &Path, dst: &str) -> DevfarmResult<()> {
        info!("Push {} to {}", src.display(), dst);
        let src = src.to_string_lossy();
        self.exec(&["-s", serial, "push", src.as_ref(), dst]).await?;
        Ok(())
    }

    async fn pull(&self, serial: &str, src: &str, dst: &Path) -> DevfarmResult<()> {
        info!("Pull {} to {}", src, dst.display());
        let dst = dst.to_string_lossy();
        self.exec(&["-s", serial, "pull", src, dst.as_ref()]).await?;
        Ok(())
    }

    fn bridge_name(&self) -> &'static str {
        "adb"
    }
}

/// Serials from `adb devices` output that are in the `device` state.
/// Offline, unauthorized and recovery entries are skipped.
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            (state == "device").then(|| serial.to_string())
        })
        .collect()
}

/// Last `max_lines` lines of `text`
fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns all collected output lines.
async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let mut all_output = Vec::new();
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return all_output;
    };

    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !stdout_done || !stderr_done {
        tokio::select! {
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
        }
    }

    all_output
}

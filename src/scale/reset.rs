// USB device reset through an external command, e.g. `pnputil /restart-device`
// on Windows or `usbreset` on Linux. It does what replugging the adapter does.

use crate::config::ResetParameters;
use crate::error::ScaleError;
use log::{debug, info};
use std::process::Command;
use std::time::Duration;

const PORT_PLACEHOLDER: &str = "{port}";

pub struct DeviceReset {
    parameters: ResetParameters,
}

impl DeviceReset {
    pub fn new(parameters: &ResetParameters) -> DeviceReset {
        DeviceReset {
            parameters: parameters.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.parameters.command.is_some()
    }

    pub fn before_open(&self) -> bool {
        self.is_configured() && self.parameters.before_open
    }

    pub fn after_close(&self) -> bool {
        self.is_configured() && self.parameters.after_close
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.parameters.settle_msec)
    }

    /// The command with the port name filled in.
    pub fn command_line(&self, port_name: &str) -> Option<Vec<String>> {
        self.parameters.command.as_ref().map(|command| {
            command
                .iter()
                .map(|arg| arg.replace(PORT_PLACEHOLDER, port_name))
                .collect()
        })
    }

    /// Runs the reset command. Returns false when there is nothing to run.
    pub fn reset(&self, port_name: &str) -> Result<bool, ScaleError> {
        let Some(command_line) = self.command_line(port_name) else {
            debug!("No reset command configured for {}", port_name);
            return Ok(false);
        };
        let (program, args) = command_line
            .split_first()
            .ok_or_else(|| ScaleError::Reset("empty reset command".to_string()))?;

        info!("Resetting device {} with {:?}", port_name, command_line);
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ScaleError::Reset(format!("cannot run {}: {}", program, e)))?;
        if !output.status.success() {
            return Err(ScaleError::Reset(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(
            "Reset output: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(true)
    }
}

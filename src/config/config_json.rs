use serde::{Deserialize, Serialize};
use serial::{BaudRate, CharSize, FlowControl, Parity, PortSettings, StopBits};
use std::time::Duration;

use super::ConfigError;
use crate::scale::frame::FrameFormat;
use crate::scale::port::SignalSequence;

fn default_baud_rate() -> u32 {
    9600
}
fn default_char_size() -> u32 {
    8
}
fn default_parity() -> String {
    "None".to_string()
}
fn default_stop_bits() -> u32 {
    1
}
fn default_flow_control() -> String {
    "None".to_string()
}
fn default_timeout_msec() -> u64 {
    5000
}
fn default_probe_baud_rates() -> Vec<u32> {
    vec![9600, 4800, 19200, 2400, 38400, 115200]
}

/// The root configuration structure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScaleConfig {
    pub port_parameters: PortParameters,
    #[serde(default)]
    pub read: ReadParameters,
    #[serde(default)]
    pub reset: ResetParameters,
    #[serde(default = "default_probe_baud_rates")]
    pub probe_baud_rates: Vec<u32>,
}

impl ScaleConfig {
    /// Default configuration for a port, used when there is no configuration file.
    pub fn with_port(port_name: &str) -> ScaleConfig {
        ScaleConfig {
            port_parameters: PortParameters::new(port_name),
            read: ReadParameters::default(),
            reset: ResetParameters::default(),
            probe_baud_rates: default_probe_baud_rates(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.port_parameters.settings()?;
        if self.read.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "read.max_attempts",
                value: "0".to_string(),
            });
        }
        if let Some(command) = &self.reset.command {
            if command.is_empty() || command[0].is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "reset.command",
                    value: format!("{:?}", command),
                });
            }
        }
        if let Some(rate) = self.probe_baud_rates.iter().find(|rate| **rate == 0) {
            return Err(ConfigError::InvalidValue {
                field: "probe_baud_rates",
                value: rate.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PortParameters {
    pub port_name: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_char_size")]
    pub char_size: u32,
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u32,
    #[serde(default = "default_flow_control")]
    pub flow_control: String,
    #[serde(default = "default_timeout_msec")]
    pub timeout_msec: u64,
}

impl PortParameters {
    /// 9600 8N1, no handshake, 5 second timeout.
    pub fn new(port_name: &str) -> PortParameters {
        PortParameters {
            port_name: port_name.to_string(),
            baud_rate: default_baud_rate(),
            char_size: default_char_size(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            flow_control: default_flow_control(),
            timeout_msec: default_timeout_msec(),
        }
    }

    /// Decodes the textual settings into the serial port settings.
    pub fn settings(&self) -> Result<PortSettings, ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "baud_rate",
                value: "0".to_string(),
            });
        }
        Ok(PortSettings {
            baud_rate: BaudRate::from_speed(self.baud_rate as usize),
            char_size: decode_char_size(self.char_size)?,
            parity: decode_parity(&self.parity)?,
            stop_bits: decode_stop_bits(self.stop_bits)?,
            flow_control: decode_flow_control(&self.flow_control)?,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_msec)
    }
}

/// How a weight is read once the port is open.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ReadParameters {
    pub frame_format: FrameFormat,
    pub max_attempts: u32,
    pub retry_delay_msec: u64,
    /// Pause after opening, the CH340 drops the first bytes otherwise.
    pub open_settle_msec: u64,
    pub close_settle_msec: u64,
    pub reopen_on_error: bool,
    pub close_after_read: bool,
    pub signals: SignalSequence,
    pub signal_pulse_msec: u64,
}

impl Default for ReadParameters {
    fn default() -> Self {
        ReadParameters {
            frame_format: FrameFormat::Marker,
            max_attempts: 10,
            retry_delay_msec: 500,
            open_settle_msec: 200,
            close_settle_msec: 100,
            reopen_on_error: true,
            close_after_read: true,
            signals: SignalSequence::Leave,
            signal_pulse_msec: 50,
        }
    }
}

impl ReadParameters {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_msec)
    }
    pub fn open_settle(&self) -> Duration {
        Duration::from_millis(self.open_settle_msec)
    }
    pub fn close_settle(&self) -> Duration {
        Duration::from_millis(self.close_settle_msec)
    }
    pub fn signal_pulse(&self) -> Duration {
        Duration::from_millis(self.signal_pulse_msec)
    }
}

/// External command that resets the USB device, `{port}` is replaced by the port name.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ResetParameters {
    pub command: Option<Vec<String>>,
    pub before_open: bool,
    pub after_close: bool,
    pub settle_msec: u64,
}

impl Default for ResetParameters {
    fn default() -> Self {
        ResetParameters {
            command: None,
            before_open: false,
            after_close: false,
            settle_msec: 200,
        }
    }
}

pub fn decode_char_size(char_size: u32) -> Result<CharSize, ConfigError> {
    match char_size {
        5 => Ok(CharSize::Bits5),
        6 => Ok(CharSize::Bits6),
        7 => Ok(CharSize::Bits7),
        8 => Ok(CharSize::Bits8),
        _ => Err(ConfigError::InvalidValue {
            field: "char_size",
            value: char_size.to_string(),
        }),
    }
}

pub fn decode_parity(parity: &str) -> Result<Parity, ConfigError> {
    match parity.to_ascii_lowercase().as_str() {
        "none" => Ok(Parity::ParityNone),
        "odd" => Ok(Parity::ParityOdd),
        "even" => Ok(Parity::ParityEven),
        _ => Err(ConfigError::InvalidValue {
            field: "parity",
            value: parity.to_string(),
        }),
    }
}

pub fn decode_stop_bits(stop_bits: u32) -> Result<StopBits, ConfigError> {
    match stop_bits {
        1 => Ok(StopBits::Stop1),
        2 => Ok(StopBits::Stop2),
        _ => Err(ConfigError::InvalidValue {
            field: "stop_bits",
            value: stop_bits.to_string(),
        }),
    }
}

pub fn decode_flow_control(flow_control: &str) -> Result<FlowControl, ConfigError> {
    match flow_control.to_ascii_lowercase().as_str() {
        "none" => Ok(FlowControl::FlowNone),
        "software" | "xonxoff" => Ok(FlowControl::FlowSoftware),
        "hardware" | "rtscts" => Ok(FlowControl::FlowHardware),
        _ => Err(ConfigError::InvalidValue {
            field: "flow_control",
            value: flow_control.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_8n1() {
        let settings = PortParameters::new("COM2").settings().unwrap();
        assert_eq!(settings.baud_rate, BaudRate::Baud9600);
        assert_eq!(settings.char_size, CharSize::Bits8);
        assert_eq!(settings.parity, Parity::ParityNone);
        assert_eq!(settings.stop_bits, StopBits::Stop1);
        assert_eq!(settings.flow_control, FlowControl::FlowNone);
    }

    #[test]
    fn test_decoders_reject_unknown_values() {
        assert!(decode_char_size(9).is_err());
        assert!(decode_stop_bits(3).is_err());
        assert!(decode_flow_control("dsr").is_err());
        assert_eq!(decode_parity("ODD").unwrap(), Parity::ParityOdd);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = ScaleConfig::with_port("COM2");
        config.read.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_standard_baud_rate() {
        let mut parameters = PortParameters::new("COM2");
        parameters.baud_rate = 250000;
        let settings = parameters.settings().unwrap();
        assert_eq!(settings.baud_rate, BaudRate::BaudOther(250000));
    }
}

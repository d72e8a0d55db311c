pub mod connection;
pub mod frame;
pub mod monitor;
pub mod port;
pub mod probe;
pub mod reset;

use chrono::{DateTime, Local};
use serde::Serialize;

/// One weight read from the scale.
#[derive(Clone, Debug, Serialize)]
pub struct Reading {
    pub weight: frame::Weight,
    /// The frame text the weight was parsed from.
    pub raw: String,
    pub port_name: String,
    pub baud_rate: u32,
    pub timestamp: DateTime<Local>,
}

impl Reading {
    pub fn new(frame: frame::Frame, port_name: &str, baud_rate: u32) -> Reading {
        Reading {
            weight: frame.weight,
            raw: frame.raw,
            port_name: port_name.to_string(),
            baud_rate,
            timestamp: Local::now(),
        }
    }
}

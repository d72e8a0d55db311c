//! Errors raised while talking to the scale.

use crate::config::ConfigError;
use crate::scale::frame::FrameError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScaleError {
    #[error("serial port error: {0}")]
    Serial(#[from] serial::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("serial port {0} is not open")]
    NotOpen(String),

    #[error("no weight received after {attempts} attempts")]
    NoData { attempts: u32 },

    #[error("device reset failed: {0}")]
    Reset(String),
}

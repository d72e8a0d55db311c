//! Reads weights from a Bascol scale connected through a CH340 USB-serial adapter.

pub mod config;
pub mod error;
pub mod scale;

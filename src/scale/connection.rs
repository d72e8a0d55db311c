use crate::config::{PortParameters, ReadParameters, ScaleConfig};
use crate::error::ScaleError;
use crate::scale::frame::FrameScanner;
use crate::scale::port::{self, ControlLines, PortOpener, ScalePort};
use crate::scale::reset::DeviceReset;
use crate::scale::Reading;
use log::{debug, info, trace, warn};
use std::io::Read;
use std::thread;
use std::time::Duration;

const READ_CHUNK: usize = 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(20);

/// A serial connection to the scale. Holds at most one open port.
pub struct ScaleConnection<O: PortOpener> {
    opener: O,
    port_parameters: PortParameters,
    read: ReadParameters,
    reset: DeviceReset,
    port: Option<O::Port>,
    lines: ControlLines,
}

impl<O: PortOpener> ScaleConnection<O> {
    pub fn new(opener: O, config: &ScaleConfig) -> ScaleConnection<O> {
        ScaleConnection {
            opener,
            port_parameters: config.port_parameters.clone(),
            read: config.read.clone(),
            reset: DeviceReset::new(&config.reset),
            port: None,
            lines: ControlLines::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn port_name(&self) -> &str {
        &self.port_parameters.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.port_parameters.baud_rate
    }

    pub fn control_lines(&self) -> ControlLines {
        self.lines
    }

    pub fn reopen_on_error(&self) -> bool {
        self.read.reopen_on_error
    }

    /// Changes the baud rate, an open port is closed first.
    pub fn set_baud_rate(&mut self, baud_rate: u32) {
        if self.is_open() {
            debug!("Closing {} to change the baud rate", self.port_name());
            self.close();
        }
        self.port_parameters.baud_rate = baud_rate;
    }

    pub fn open(&mut self) -> Result<(), ScaleError> {
        info!(
            "Opening port {} at {} baud",
            self.port_name(),
            self.baud_rate()
        );
        if self.is_open() {
            info!("Port {} is already open, closing first", self.port_name());
            self.close();
        }
        if self.reset.before_open() {
            self.run_reset();
        }

        let mut port = self.opener.open(&self.port_parameters)?;
        let lines = self
            .read
            .signals
            .apply(&mut port, self.read.signal_pulse())?;
        thread::sleep(self.read.open_settle());

        self.port = Some(port);
        self.lines = lines;
        info!(
            "Port {} open at {} baud, {}",
            self.port_name(),
            self.baud_rate(),
            self.lines
        );
        Ok(())
    }

    /// Lowers DTR and RTS, empties the input buffer and releases the port. Failures
    /// along the way are logged, the port is released regardless.
    pub fn close(&mut self) {
        let Some(mut port) = self.port.take() else {
            trace!("Port {} is not open", self.port_name());
            return;
        };
        info!("Closing port {}", self.port_name());

        if let Err(e) = port.set_dtr(false) {
            warn!("Failed to lower DTR on {}: {}", self.port_name(), e);
        }
        if let Err(e) = port.set_rts(false) {
            warn!("Failed to lower RTS on {}: {}", self.port_name(), e);
        }
        match port::discard_input(&mut port, DRAIN_TIMEOUT) {
            Ok(0) => {}
            Ok(count) => debug!("Discarded {} pending bytes", count),
            Err(e) => warn!("Failed to discard input on {}: {}", self.port_name(), e),
        }
        thread::sleep(self.read.close_settle());
        drop(port);
        self.lines = ControlLines::default();

        if self.reset.after_close() {
            thread::sleep(self.reset.settle());
            self.run_reset();
        }
    }

    /// Waits for a weight frame, opening the port if needed.
    pub fn read_weight(&mut self) -> Result<Reading, ScaleError> {
        let result = self.read_weight_from_port();
        if self.read.close_after_read {
            self.close();
        }
        result
    }

    fn read_weight_from_port(&mut self) -> Result<Reading, ScaleError> {
        if !self.is_open() {
            self.open()?;
        }
        let port_name = self.port_name().to_string();
        let max_attempts = self.read.max_attempts;
        info!("Waiting for data from the scale on {}", port_name);

        let mut scanner = FrameScanner::new(self.read.frame_format);
        let mut buffer = [0u8; READ_CHUNK];
        for attempt in 1..=max_attempts {
            let port = self
                .port
                .as_mut()
                .ok_or_else(|| ScaleError::NotOpen(port_name.clone()))?;
            match port.read(&mut buffer) {
                Ok(0) => debug!("Attempt {}: no data", attempt),
                Ok(count) => {
                    let chunk = &buffer[..count];
                    debug!(
                        "Attempt {}: received {:?}",
                        attempt,
                        String::from_utf8_lossy(chunk)
                    );
                    scanner.push(chunk);
                    if let Some(frame) = scanner.next_frame()? {
                        let reading = Reading::new(frame, &port_name, self.baud_rate());
                        info!(
                            "Weight {} from {} ({:?})",
                            reading.weight, port_name, reading.raw
                        );
                        return Ok(reading);
                    }
                }
                Err(e) if port::is_timeout(&e) => debug!("Attempt {}: read timed out", attempt),
                Err(e) => {
                    if !self.read.reopen_on_error {
                        return Err(e.into());
                    }
                    warn!(
                        "Attempt {}: read from {} failed ({}), reopening",
                        attempt, port_name, e
                    );
                    self.close();
                    self.open()?;
                    scanner.clear();
                }
            }
            if attempt < max_attempts {
                thread::sleep(self.read.retry_delay());
            }
        }

        warn!(
            "No data received from {} after {} attempts",
            port_name, max_attempts
        );
        Err(ScaleError::NoData {
            attempts: max_attempts,
        })
    }

    fn run_reset(&self) {
        match self.reset.reset(self.port_name()) {
            Ok(true) => info!("Device {} reset", self.port_name()),
            Ok(false) => {}
            Err(e) => warn!("Ignoring failed reset of {}: {}", self.port_name(), e),
        }
    }
}

impl<O: PortOpener> Drop for ScaleConnection<O> {
    fn drop(&mut self) {
        self.close();
    }
}

use crate::config::PortParameters;
use crate::error::ScaleError;
use clap::ValueEnum;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serial::{self, SerialPort};
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bounds on draining a port that keeps streaming.
const MAX_DISCARD: usize = 4096;
const MAX_DISCARD_TIME: Duration = Duration::from_millis(100);

/// The part of a serial port the scale code needs.
pub trait ScalePort: Read + Write {
    fn set_dtr(&mut self, level: bool) -> serial::Result<()>;
    fn set_rts(&mut self, level: bool) -> serial::Result<()>;
    fn set_timeout(&mut self, timeout: Duration) -> serial::Result<()>;
    fn timeout(&self) -> Duration;
}

impl ScalePort for serial::SystemPort {
    fn set_dtr(&mut self, level: bool) -> serial::Result<()> {
        SerialPort::set_dtr(self, level)
    }
    fn set_rts(&mut self, level: bool) -> serial::Result<()> {
        SerialPort::set_rts(self, level)
    }
    fn set_timeout(&mut self, timeout: Duration) -> serial::Result<()> {
        SerialPort::set_timeout(self, timeout)
    }
    fn timeout(&self) -> Duration {
        SerialPort::timeout(self)
    }
}

/// Opens ports for a connection, so the connection logic can run without hardware.
pub trait PortOpener {
    type Port: ScalePort;

    fn open(&self, parameters: &PortParameters) -> Result<Self::Port, ScaleError>;
}

pub struct SystemOpener;

impl PortOpener for SystemOpener {
    type Port = serial::SystemPort;

    fn open(&self, parameters: &PortParameters) -> Result<serial::SystemPort, ScaleError> {
        serial_port(parameters)
    }
}

/// Creates a serial port from the configuration.
pub fn serial_port(parameters: &PortParameters) -> Result<serial::SystemPort, ScaleError> {
    let settings = parameters.settings()?;
    trace!("Opening {} with {:?}", parameters.port_name, settings);

    let mut port = serial::open(&parameters.port_name)?;
    port.configure(&settings)?;
    SerialPort::set_timeout(&mut port, parameters.timeout())?;
    Ok(port)
}

pub fn is_timeout(error: &io::Error) -> bool {
    matches!(error.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Last levels written to the modem control lines, the port cannot report them back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlLines {
    pub dtr: Option<bool>,
    pub rts: Option<bool>,
}

impl fmt::Display for ControlLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn level(line: Option<bool>) -> &'static str {
            match line {
                Some(true) => "high",
                Some(false) => "low",
                None => "untouched",
            }
        }
        write!(f, "DTR {}, RTS {}", level(self.dtr), level(self.rts))
    }
}

/// Order in which DTR and RTS are driven after opening. Some CH340 adapters
/// only start passing data after one of these.
#[derive(Serialize, Deserialize, ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignalSequence {
    #[default]
    Leave,
    AssertDtrRts,
    AssertRtsDtr,
    Deassert,
    PulseDtr,
    PulseRts,
}

impl SignalSequence {
    /// Drives the lines, `pulse` is the low time for the pulse variants.
    pub fn apply<P: ScalePort + ?Sized>(
        self,
        port: &mut P,
        pulse: Duration,
    ) -> serial::Result<ControlLines> {
        let mut lines = ControlLines::default();
        match self {
            SignalSequence::Leave => {}
            SignalSequence::AssertDtrRts => {
                drive_dtr(port, &mut lines, true)?;
                drive_rts(port, &mut lines, true)?;
            }
            SignalSequence::AssertRtsDtr => {
                drive_rts(port, &mut lines, true)?;
                drive_dtr(port, &mut lines, true)?;
            }
            SignalSequence::Deassert => {
                drive_dtr(port, &mut lines, false)?;
                drive_rts(port, &mut lines, false)?;
            }
            SignalSequence::PulseDtr => {
                drive_dtr(port, &mut lines, false)?;
                thread::sleep(pulse);
                drive_dtr(port, &mut lines, true)?;
            }
            SignalSequence::PulseRts => {
                drive_rts(port, &mut lines, false)?;
                thread::sleep(pulse);
                drive_rts(port, &mut lines, true)?;
            }
        }
        Ok(lines)
    }
}

fn drive_dtr<P: ScalePort + ?Sized>(
    port: &mut P,
    lines: &mut ControlLines,
    level: bool,
) -> serial::Result<()> {
    debug!("Setting DTR {}", level);
    port.set_dtr(level)?;
    lines.dtr = Some(level);
    Ok(())
}

fn drive_rts<P: ScalePort + ?Sized>(
    port: &mut P,
    lines: &mut ControlLines,
    level: bool,
) -> serial::Result<()> {
    debug!("Setting RTS {}", level);
    port.set_rts(level)?;
    lines.rts = Some(level);
    Ok(())
}

/// Reads and drops whatever is waiting in the input buffer. `serial` has no purge call,
/// so this reads with a short timeout until the port goes quiet. A scale that never
/// pauses is cut off after `MAX_DISCARD_TIME`.
pub fn discard_input<P: ScalePort + ?Sized>(
    port: &mut P,
    drain_timeout: Duration,
) -> io::Result<usize> {
    let original = port.timeout();
    port.set_timeout(drain_timeout)?;

    let deadline = Instant::now() + MAX_DISCARD_TIME;
    let mut buffer = [0u8; 256];
    let mut discarded = 0;
    let result = loop {
        match port.read(&mut buffer) {
            Ok(0) => break Ok(discarded),
            Ok(count) => {
                discarded += count;
                if discarded >= MAX_DISCARD || Instant::now() >= deadline {
                    trace!("Port still streaming, stopped after {} bytes", discarded);
                    break Ok(discarded);
                }
            }
            Err(e) if is_timeout(&e) => break Ok(discarded),
            Err(e) => break Err(e),
        }
    };

    port.set_timeout(original)?;
    result
}

#[cfg(test)]
pub mod mock {
    // In-memory port for exercising connection logic.
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    pub enum MockRead {
        Data(Vec<u8>),
        Timeout,
        Fail(ErrorKind),
    }

    #[derive(Default)]
    pub struct MockState {
        pub reads: VecDeque<MockRead>,
        pub written: Vec<u8>,
        pub dtr: Vec<bool>,
        pub rts: Vec<bool>,
        pub opened: usize,
        pub dropped: usize,
        pub flushed: usize,
        pub baud_rates: Vec<u32>,
        pub fail_open: bool,
    }

    impl MockState {
        pub fn script(reads: Vec<MockRead>) -> Rc<RefCell<MockState>> {
            Rc::new(RefCell::new(MockState {
                reads: reads.into(),
                ..Default::default()
            }))
        }
    }

    pub struct MockPort {
        state: Rc<RefCell<MockState>>,
        timeout: Duration,
    }

    impl MockPort {
        pub fn new(state: Rc<RefCell<MockState>>) -> MockPort {
            MockPort {
                state,
                timeout: Duration::from_millis(5000),
            }
        }
    }

    impl Drop for MockPort {
        fn drop(&mut self) {
            self.state.borrow_mut().dropped += 1;
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.state.borrow_mut();
            match state.reads.pop_front() {
                Some(MockRead::Data(mut data)) => {
                    let count = data.len().min(buf.len());
                    buf[..count].copy_from_slice(&data[..count]);
                    if count < data.len() {
                        let rest = data.split_off(count);
                        state.reads.push_front(MockRead::Data(rest));
                    }
                    Ok(count)
                }
                Some(MockRead::Fail(kind)) => Err(io::Error::new(kind, "mock failure")),
                Some(MockRead::Timeout) | None => {
                    Err(io::Error::new(ErrorKind::TimedOut, "mock timeout"))
                }
            }
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.state.borrow_mut().written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            self.state.borrow_mut().flushed += 1;
            Ok(())
        }
    }

    impl ScalePort for MockPort {
        fn set_dtr(&mut self, level: bool) -> serial::Result<()> {
            self.state.borrow_mut().dtr.push(level);
            Ok(())
        }
        fn set_rts(&mut self, level: bool) -> serial::Result<()> {
            self.state.borrow_mut().rts.push(level);
            Ok(())
        }
        fn set_timeout(&mut self, timeout: Duration) -> serial::Result<()> {
            self.timeout = timeout;
            Ok(())
        }
        fn timeout(&self) -> Duration {
            self.timeout
        }
    }

    pub struct MockOpener {
        pub state: Rc<RefCell<MockState>>,
    }

    impl PortOpener for MockOpener {
        type Port = MockPort;

        fn open(&self, parameters: &PortParameters) -> Result<MockPort, ScaleError> {
            let mut state = self.state.borrow_mut();
            if state.fail_open {
                return Err(serial::Error::new(
                    serial::ErrorKind::NoDevice,
                    "mock port is missing",
                )
                .into());
            }
            state.opened += 1;
            state.baud_rates.push(parameters.baud_rate);
            Ok(MockPort::new(self.state.clone()))
        }
    }
}

// Repeated readings from one connection.

use crate::error::ScaleError;
use crate::scale::connection::ScaleConnection;
use crate::scale::port::PortOpener;
use crate::scale::Reading;
use log::warn;
use std::thread;
use std::time::Duration;

/// Reads weights until `count` have arrived, or forever when `count` is 0, and hands
/// each one to `on_reading`. Failed reads are logged and retried after `interval`,
/// except I/O errors when the connection does not reopen on errors.
/// Returns the number of readings taken.
pub fn monitor<O, F>(
    connection: &mut ScaleConnection<O>,
    count: u32,
    interval: Duration,
    mut on_reading: F,
) -> Result<u32, ScaleError>
where
    O: PortOpener,
    F: FnMut(&Reading) -> Result<(), ScaleError>,
{
    let mut read = 0;
    while count == 0 || read < count {
        match connection.read_weight() {
            Ok(reading) => {
                on_reading(&reading)?;
                read += 1;
            }
            Err(ScaleError::Io(e)) if !connection.reopen_on_error() => {
                return Err(ScaleError::Io(e))
            }
            Err(e) => warn!("No reading: {}", e),
        }
        if count == 0 || read < count {
            thread::sleep(interval);
        }
    }
    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScaleConfig;
    use crate::scale::frame::Weight;
    use crate::scale::port::mock::{MockOpener, MockRead, MockState};
    use std::io::ErrorKind;

    fn test_config() -> ScaleConfig {
        let mut config = ScaleConfig::with_port("COM2");
        config.read.max_attempts = 1;
        config.read.retry_delay_msec = 0;
        config.read.open_settle_msec = 0;
        config.read.close_settle_msec = 0;
        config.read.close_after_read = false;
        config
    }

    fn monitor_script(
        config: &ScaleConfig,
        reads: Vec<MockRead>,
        count: u32,
    ) -> (Result<u32, ScaleError>, Vec<Weight>) {
        let opener = MockOpener {
            state: MockState::script(reads),
        };
        let mut connection = ScaleConnection::new(opener, config);
        let mut weights = Vec::new();
        let result = monitor(&mut connection, count, Duration::ZERO, |reading| {
            weights.push(reading.weight);
            Ok(())
        });
        (result, weights)
    }

    #[test]
    fn test_monitor_stops_after_count() {
        let (result, weights) = monitor_script(
            &test_config(),
            vec![
                MockRead::Data(b"W:1___".to_vec()),
                MockRead::Data(b"W:2___".to_vec()),
                MockRead::Data(b"W:3___".to_vec()),
            ],
            2,
        );
        assert_eq!(result.unwrap(), 2);
        assert_eq!(weights, vec![Weight::new(1, 0), Weight::new(2, 0)]);
    }

    #[test]
    fn test_monitor_continues_after_failed_read() {
        let (result, weights) = monitor_script(
            &test_config(),
            vec![
                MockRead::Timeout,
                MockRead::Data(b"W:5___".to_vec()),
            ],
            1,
        );
        assert_eq!(result.unwrap(), 1);
        assert_eq!(weights, vec![Weight::new(5, 0)]);
    }

    #[test]
    fn test_monitor_stops_on_io_error_without_reopen() {
        let mut config = test_config();
        config.read.reopen_on_error = false;
        let (result, weights) = monitor_script(
            &config,
            vec![
                MockRead::Fail(ErrorKind::BrokenPipe),
                MockRead::Data(b"W:5___".to_vec()),
            ],
            0,
        );
        assert!(matches!(result, Err(ScaleError::Io(_))));
        assert!(weights.is_empty());
    }

    #[test]
    fn test_monitor_stops_when_output_fails() {
        let opener = MockOpener {
            state: MockState::script(vec![MockRead::Data(b"W:1___".to_vec())]),
        };
        let mut connection = ScaleConnection::new(opener, &test_config());
        let result = monitor(&mut connection, 0, Duration::ZERO, |_| {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "stdout closed").into())
        });
        assert!(matches!(result, Err(ScaleError::Io(_))));
    }
}

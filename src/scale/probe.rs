// Tries to read a weight at each of a list of baud rates.

use crate::config::ScaleConfig;
use crate::scale::connection::ScaleConnection;
use crate::scale::port::PortOpener;
use crate::scale::Reading;
use log::{info, warn};

#[derive(Debug)]
pub struct ProbeOutcome {
    pub baud_rate: u32,
    pub result: Result<Reading, String>,
}

impl ProbeOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

pub fn probe<O: PortOpener>(
    config: &ScaleConfig,
    opener: O,
    baud_rates: &[u32],
) -> Vec<ProbeOutcome> {
    let mut connection = ScaleConnection::new(opener, config);
    let mut outcomes = Vec::with_capacity(baud_rates.len());
    for &baud_rate in baud_rates {
        connection.set_baud_rate(baud_rate);
        info!("Probing {} at {} baud", connection.port_name(), baud_rate);
        let result = connection.read_weight().map_err(|e| e.to_string());
        connection.close();
        match &result {
            Ok(reading) => info!("{} baud: weight {}", baud_rate, reading.weight),
            Err(e) => warn!("{} baud: {}", baud_rate, e),
        }
        outcomes.push(ProbeOutcome { baud_rate, result });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::frame::Weight;
    use crate::scale::port::mock::{MockOpener, MockRead, MockState};

    #[test]
    fn test_probe_each_rate_on_a_fresh_port() {
        let mut config = ScaleConfig::with_port("/dev/ttyUSB0");
        config.read.max_attempts = 2;
        config.read.retry_delay_msec = 0;
        config.read.open_settle_msec = 0;
        config.read.close_settle_msec = 0;
        config.read.close_after_read = false;

        let state = MockState::script(vec![
            // 9600: nothing, then the drain on close.
            MockRead::Data(b"\xff\xfe".to_vec()),
            MockRead::Timeout,
            MockRead::Timeout,
            // 4800: a weight.
            MockRead::Data(b"W:120___".to_vec()),
        ]);
        let opener = MockOpener {
            state: state.clone(),
        };

        let outcomes = probe(&config, opener, &[9600, 4800]);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].baud_rate, 9600);
        assert!(!outcomes[0].succeeded());
        assert!(outcomes[0]
            .result
            .as_ref()
            .unwrap_err()
            .contains("no weight received"));
        assert_eq!(outcomes[1].baud_rate, 4800);
        assert_eq!(
            outcomes[1].result.as_ref().unwrap().weight,
            Weight::new(120, 0)
        );

        let state = state.borrow();
        assert_eq!(state.baud_rates, vec![9600, 4800]);
        assert_eq!(state.dropped, 2);
    }
}

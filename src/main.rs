use clap::{ArgAction, Parser, Subcommand};
use log::{error, info, trace, warn};
use simplelog::{CombinedLogger, Config, LevelFilter, SharedLogger, WriteLogger};
use std::error::Error;
use std::fs::File;
use std::io::{self, Stderr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use bascol_cargo::config::{self, ConfigError, ScaleConfig};
use bascol_cargo::error::ScaleError;
use bascol_cargo::scale::connection::ScaleConnection;
use bascol_cargo::scale::frame::FrameFormat;
use bascol_cargo::scale::port::{SignalSequence, SystemOpener};
use bascol_cargo::scale::reset::DeviceReset;
use bascol_cargo::scale::{monitor, probe, Reading};

// Command line arguments
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// 0 is off, 5 logs every byte.
    #[arg(short, long, default_value = "3")]
    verbosity: u8,

    #[arg(short, long, default_value_t = true, action = ArgAction::Set)]
    logtostderr: bool,

    #[arg(long, default_value = "bascol.log")]
    log_file: PathBuf,

    /// Overrides the port from the configuration, e.g. COM2 or /dev/ttyUSB0.
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long)]
    baud: Option<u32>,

    #[arg(short, long, value_enum)]
    format: Option<FrameFormat>,

    /// DTR/RTS sequence applied after opening the port.
    #[arg(short, long, value_enum)]
    signals: Option<SignalSequence>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Reads one weight.
    Read {
        #[arg(long)]
        json: bool,
    },
    /// Reads weights until stopped, or `count` of them.
    Monitor {
        #[arg(long, default_value = "0")]
        count: u32,
        #[arg(long, default_value = "1000")]
        interval_msec: u64,
        #[arg(long)]
        json: bool,
    },
    /// Tries to read a weight at several baud rates.
    Probe {
        #[arg(long, value_delimiter = ',')]
        baud_rates: Vec<u32>,
    },
    /// Runs the configured device reset command.
    Reset,
}

fn log_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

// All levels go to stderr, stdout carries only readings.
fn stderr_logger(log_level: LevelFilter) -> Box<WriteLogger<Stderr>> {
    WriteLogger::new(log_level, Config::default(), io::stderr())
}

/// Whether errors logged with these settings reach the terminal.
fn errors_reach_stderr(verbosity: u8, logtostderr: bool) -> bool {
    logtostderr && log_level(verbosity) >= LevelFilter::Error
}

fn init_logging(
    verbosity: u8,
    logtostderr: bool,
    log_file: &Path,
) -> Result<(), Box<dyn Error>> {
    let log_level = log_level(verbosity);
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![WriteLogger::new(
        log_level,
        Config::default(),
        File::create(log_file)?,
    )];
    if logtostderr {
        loggers.push(stderr_logger(log_level));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

/// Reads the configuration file and applies the command line overrides. Without a
/// file, `--port` alone is enough to run with defaults.
fn load_configuration(args: &Cli) -> Result<ScaleConfig, ConfigError> {
    let mut config = match (args.config.exists(), &args.port) {
        (false, Some(port)) => {
            info!(
                "No configuration at {}, using defaults",
                args.config.display()
            );
            ScaleConfig::with_port(port)
        }
        _ => config::read_configuration(&args.config)?,
    };
    if let Some(port) = &args.port {
        config.port_parameters.port_name = port.clone();
    }
    if let Some(baud) = args.baud {
        config.port_parameters.baud_rate = baud;
    }
    if let Some(format) = args.format {
        config.read.frame_format = format;
    }
    if let Some(signals) = args.signals {
        config.read.signals = signals;
    }
    config.validate()?;
    Ok(config)
}

fn print_reading(reading: &Reading, json: bool) -> Result<(), ScaleError> {
    if json {
        println!("{}", serde_json::to_string(reading).map_err(std::io::Error::from)?);
    } else {
        println!(
            "{} {}",
            reading.timestamp.format("%Y-%m-%d %H:%M:%S"),
            reading.weight
        );
    }
    Ok(())
}

fn run(command: &Command, config: &ScaleConfig) -> Result<(), ScaleError> {
    match command {
        Command::Read { json } => {
            let mut connection = ScaleConnection::new(SystemOpener, config);
            let reading = connection.read_weight()?;
            print_reading(&reading, *json)
        }
        Command::Monitor {
            count,
            interval_msec,
            json,
        } => {
            let mut connection = ScaleConnection::new(SystemOpener, config);
            let read = monitor::monitor(
                &mut connection,
                *count,
                Duration::from_millis(*interval_msec),
                |reading| print_reading(reading, *json),
            )?;
            info!("Took {} readings", read);
            Ok(())
        }
        Command::Probe { baud_rates } => {
            let baud_rates = if baud_rates.is_empty() {
                &config.probe_baud_rates
            } else {
                baud_rates
            };
            let outcomes = probe::probe(config, SystemOpener, baud_rates);
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(reading) => println!(
                        "{:>7} baud: {} ({:?})",
                        outcome.baud_rate, reading.weight, reading.raw
                    ),
                    Err(e) => println!("{:>7} baud: {}", outcome.baud_rate, e),
                }
            }
            if !outcomes.iter().any(|outcome| outcome.succeeded()) {
                warn!("No baud rate produced a weight");
            }
            Ok(())
        }
        Command::Reset => {
            let port_name = &config.port_parameters.port_name;
            if DeviceReset::new(&config.reset).reset(port_name)? {
                println!("Device {} reset", port_name);
            } else {
                println!("No reset command configured");
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(e) = init_logging(args.verbosity, args.logtostderr, &args.log_file) {
        eprintln!("Failed to set up logging: {}", e);
        return ExitCode::FAILURE;
    }
    trace!("Starting up");

    let show_errors = !errors_reach_stderr(args.verbosity, args.logtostderr);

    let config = match load_configuration(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(
                "Failed to read configuration {}: {}",
                args.config.display(),
                e
            );
            if show_errors {
                eprintln!("{}", e);
            }
            return ExitCode::FAILURE;
        }
    };
    trace!("Configuration loaded: {:?}", config);

    let command = args.command.unwrap_or(Command::Read { json: false });
    match run(&command, &config) {
        Ok(()) => {
            info!("Successfully stopping");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed {}", e);
            if show_errors {
                eprintln!("{}", e);
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_stderr_logger_takes_every_level() {
        let logger = stderr_logger(LevelFilter::Trace);
        assert_eq!(logger.level(), LevelFilter::Trace);
        let logger = stderr_logger(log_level(3));
        assert_eq!(logger.level(), LevelFilter::Info);
    }

    #[test]
    fn test_errors_reach_stderr() {
        assert!(errors_reach_stderr(3, true));
        assert!(errors_reach_stderr(1, true));
        assert!(!errors_reach_stderr(0, true));
        assert!(!errors_reach_stderr(3, false));
    }

    #[test]
    fn test_cli_defaults() {
        let args = Cli::try_parse_from(["bascol"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert!(args.logtostderr);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_cli_probe_rates() {
        let args = Cli::try_parse_from([
            "bascol",
            "--port",
            "COM3",
            "--logtostderr",
            "false",
            "probe",
            "--baud-rates",
            "9600,2400",
        ])
        .unwrap();
        assert!(!args.logtostderr);
        match args.command {
            Some(Command::Probe { baud_rates }) => assert_eq!(baud_rates, vec![9600, 2400]),
            _ => panic!("expected the probe command"),
        }
    }

    #[test]
    fn test_port_without_configuration_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.json");
        let args = Cli::try_parse_from([
            "bascol",
            "--config",
            missing.to_str().unwrap(),
            "--port",
            "COM3",
            "--format",
            "legacy",
            "--signals",
            "pulse-dtr",
        ])
        .unwrap();
        let config = load_configuration(&args).unwrap();
        assert_eq!(config.port_parameters.port_name, "COM3");
        assert_eq!(config.read.frame_format, FrameFormat::Legacy);
        assert_eq!(config.read.signals, SignalSequence::PulseDtr);
    }

    #[test]
    fn test_overrides_apply_to_configuration_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"port_parameters": {"port_name": "COM2", "baud_rate": 4800}}"#)
            .unwrap();
        let args = Cli::try_parse_from([
            "bascol",
            "--config",
            file.path().to_str().unwrap(),
            "--baud",
            "19200",
        ])
        .unwrap();
        let config = load_configuration(&args).unwrap();
        assert_eq!(config.port_parameters.port_name, "COM2");
        assert_eq!(config.port_parameters.baud_rate, 19200);
    }

    #[test]
    fn test_missing_configuration_without_port() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.json");
        let args =
            Cli::try_parse_from(["bascol", "--config", missing.to_str().unwrap()]).unwrap();
        assert!(matches!(
            load_configuration(&args),
            Err(ConfigError::Io(_))
        ));
    }
}

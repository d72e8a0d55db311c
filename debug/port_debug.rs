// A simple application to poke the scale port: optionally send a hex sequence,
// then dump whatever comes back.

use bascol_cargo::config::PortParameters;
use bascol_cargo::scale::port::{self, ScalePort};
use clap::{ArgAction, Parser};
use std::error::Error;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,

    #[arg(long, default_value = "9600")]
    baud: u32,

    /// Bytes to send, e.g. 0d0a.
    #[arg(long)]
    hex_string: Option<String>,

    #[arg(long, default_value = "3000")]
    listen_msec: u64,

    #[arg(long, action = ArgAction::Set)]
    dtr: Option<bool>,

    #[arg(long, action = ArgAction::Set)]
    rts: Option<bool>,
}

fn parse_hex_string(in_str: &str) -> Result<Vec<u8>, String> {
    let in_str: String = in_str.chars().filter(|c| !c.is_whitespace()).collect();
    if in_str.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {}", in_str));
    }
    let mut bytes = Vec::with_capacity(in_str.len() / 2);
    for i in (0..in_str.len()).step_by(2) {
        let pair = in_str
            .get(i..i + 2)
            .ok_or_else(|| format!("not a hex string: {}", in_str))?;
        let byte = u8::from_str_radix(pair, 16).map_err(|e| format!("{} in {:?}", e, pair))?;
        bytes.push(byte);
    }
    Ok(bytes)
}

fn dump_line(bytes: &[u8]) -> String {
    let hex: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    let ascii: String = bytes
        .iter()
        .map(|b| {
            if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '.'
            }
        })
        .collect();
    format!("{:<48} {}", hex.join(" "), ascii)
}

fn run(args: &Cli) -> Result<(), Box<dyn Error>> {
    let mut parameters = PortParameters::new(&args.port);
    parameters.baud_rate = args.baud;
    parameters.timeout_msec = 100;

    let mut port = port::serial_port(&parameters)?;
    if let Some(level) = args.dtr {
        ScalePort::set_dtr(&mut port, level)?;
    }
    if let Some(level) = args.rts {
        ScalePort::set_rts(&mut port, level)?;
    }

    if let Some(hex_string) = &args.hex_string {
        let bytes = parse_hex_string(hex_string)?;
        port.write_all(&bytes)?;
        port.flush()?;
        println!("Sent {} bytes", bytes.len());
    }

    let deadline = Instant::now() + Duration::from_millis(args.listen_msec);
    let mut buffer = [0u8; 16];
    let mut total = 0;
    while Instant::now() < deadline {
        match port.read(&mut buffer) {
            Ok(count) if count > 0 => {
                println!("{}", dump_line(&buffer[..count]));
                total += count;
            }
            Ok(_) => {}
            Err(e) if port::is_timeout(&e) => {}
            Err(e) => return Err(e.into()),
        }
    }
    println!("Received {} bytes", total);
    Ok(())
}

fn main() {
    let args = Cli::parse();
    if let Err(e) = run(&args) {
        println!("Error {} on {}", e, args.port);
        std::process::exit(1);
    }
}

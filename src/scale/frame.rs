// Weight frames sent by the scale.
//
// Current firmware sends `W:<number>___`, older units send `p` followed by
// seven characters, the last six being the weight.

use clap::ValueEnum;
use log::{debug, trace};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

const MARKER: &[u8] = b"W:";
const TERMINATOR: &[u8] = b"___";
const LEGACY_FRAME_LEN: usize = 8;
const LEGACY_WEIGHT_OFFSET: usize = 2;
const SCANNER_CAPACITY: usize = 1024;
const MAX_DECIMALS: u32 = 18;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty weight")]
    Empty,

    #[error("invalid weight {0:?}")]
    InvalidNumber(String),

    #[error("negative weight {0:?}")]
    NegativeWeight(String),

    #[error("frame marker not found")]
    MissingMarker,

    #[error("frame terminator not found")]
    MissingTerminator,

    #[error("frame has {actual} characters, expected {expected}")]
    BadLength { expected: usize, actual: usize },
}

#[derive(Serialize, Deserialize, ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameFormat {
    /// `W:<number>___`
    #[default]
    Marker,
    /// `p` and seven characters, integer weight.
    Legacy,
}

/// A non-negative decimal weight, kept exactly as the scale sent it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Weight {
    units: u64,
    decimals: u32,
}

impl Weight {
    pub fn new(units: u64, decimals: u32) -> Weight {
        Weight { units, decimals }
    }

    /// The weight in the smallest unit the frame carried, `12.50` is 1250.
    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn as_f64(&self) -> f64 {
        self.units as f64 / 10f64.powi(self.decimals as i32)
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.decimals == 0 {
            return write!(f, "{}", self.units);
        }
        let Some(divisor) = 10u64.checked_pow(self.decimals) else {
            return write!(f, "{}", self.as_f64());
        };
        write!(
            f,
            "{}.{:0width$}",
            self.units / divisor,
            self.units % divisor,
            width = self.decimals as usize
        )
    }
}

impl Serialize for Weight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses a decimal number with an optional fraction. Signs are rejected.
pub fn parse_weight(text: &str) -> Result<Weight, FrameError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(FrameError::Empty);
    }
    if text.starts_with('-') {
        return Err(FrameError::NegativeWeight(text.to_string()));
    }
    let invalid = || FrameError::InvalidNumber(text.to_string());

    let mut units: u64 = 0;
    let mut digits = 0;
    let mut decimals: Option<u32> = None;
    for c in text.chars() {
        match c {
            '0'..='9' => {
                let digit = u64::from(c as u8 - b'0');
                units = units
                    .checked_mul(10)
                    .and_then(|u| u.checked_add(digit))
                    .ok_or_else(invalid)?;
                digits += 1;
                if let Some(count) = decimals.as_mut() {
                    *count += 1;
                }
            }
            '.' if decimals.is_none() => decimals = Some(0),
            _ => return Err(invalid()),
        }
    }
    let decimals = decimals.unwrap_or(0);
    if digits == 0 || decimals > MAX_DECIMALS {
        return Err(invalid());
    }
    Ok(Weight::new(units, decimals))
}

/// Parses a single complete frame.
pub fn parse_frame(text: &str, format: FrameFormat) -> Result<Weight, FrameError> {
    let text = text.trim();
    match format {
        FrameFormat::Marker => {
            let start = text.find("W:").ok_or(FrameError::MissingMarker)?;
            let body = &text[start + MARKER.len()..];
            let end = body.find("___").ok_or(FrameError::MissingTerminator)?;
            parse_weight(&body[..end])
        }
        FrameFormat::Legacy => {
            let start = text
                .rfind(|c: char| c == 'p' || c == 'P')
                .ok_or(FrameError::MissingMarker)?;
            let frame = &text[start..];
            if frame.len() != LEGACY_FRAME_LEN {
                return Err(FrameError::BadLength {
                    expected: LEGACY_FRAME_LEN,
                    actual: frame.len(),
                });
            }
            let body = frame
                .get(LEGACY_WEIGHT_OFFSET..)
                .ok_or_else(|| FrameError::InvalidNumber(frame.to_string()))?;
            let weight = parse_weight(body)?;
            if weight.decimals() != 0 {
                return Err(FrameError::InvalidNumber(body.to_string()));
            }
            Ok(weight)
        }
    }
}

/// A weight together with the frame text it was parsed from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub weight: Weight,
    pub raw: String,
}

/// Collects bytes from the port and picks out the most recent complete frame.
pub struct FrameScanner {
    format: FrameFormat,
    buffer: Vec<u8>,
}

impl FrameScanner {
    pub fn new(format: FrameFormat) -> FrameScanner {
        FrameScanner {
            format,
            buffer: Vec::with_capacity(SCANNER_CAPACITY),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > SCANNER_CAPACITY {
            let excess = self.buffer.len() - SCANNER_CAPACITY;
            trace!("Dropping {} old bytes from the frame buffer", excess);
            self.buffer.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `Ok(None)` while no complete frame has arrived yet.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        match self.format {
            FrameFormat::Marker => self.next_marker_frame(),
            FrameFormat::Legacy => self.next_legacy_frame(),
        }
    }

    fn next_marker_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let Some(last) = rfind(&self.buffer, MARKER) else {
            // A trailing 'W' may be the start of the next marker.
            let keep = usize::from(self.buffer.last() == Some(&MARKER[0]));
            let discard = self.buffer.len() - keep;
            if discard > 0 {
                debug!(
                    "Discarding {:?}, no frame marker",
                    String::from_utf8_lossy(&self.buffer[..discard])
                );
                self.buffer.drain(..discard);
            }
            return Ok(None);
        };

        if let Some(raw) = terminated_frame(&self.buffer[last..]) {
            self.buffer.clear();
            return frame_from_raw(raw, FrameFormat::Marker).map(Some);
        }

        // The newest frame is still arriving, an older one may be complete.
        let previous = rfind(&self.buffer[..last], MARKER)
            .and_then(|start| terminated_frame(&self.buffer[start..last]));
        self.buffer.drain(..last);
        match previous {
            Some(raw) => frame_from_raw(raw, FrameFormat::Marker).map(Some),
            None => Ok(None),
        }
    }

    fn next_legacy_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let Some(start) = self
            .buffer
            .iter()
            .rposition(|b| *b == b'p' || *b == b'P')
        else {
            self.buffer.clear();
            return Ok(None);
        };
        let frame = trim_ascii_end(&self.buffer[start..]);
        if frame.len() < LEGACY_FRAME_LEN {
            // The newest frame is still arriving, an older one may be complete.
            let previous = self.buffer[..start]
                .iter()
                .rposition(|b| *b == b'p' || *b == b'P')
                .map(|prev| trim_ascii_end(&self.buffer[prev..start]))
                .filter(|prev| prev.len() == LEGACY_FRAME_LEN)
                .map(|prev| String::from_utf8_lossy(prev).into_owned());
            self.buffer.drain(..start);
            return match previous {
                Some(raw) => frame_from_raw(raw, FrameFormat::Legacy).map(Some),
                None => Ok(None),
            };
        }
        let raw = String::from_utf8_lossy(frame).into_owned();
        self.buffer.clear();
        if raw.len() != LEGACY_FRAME_LEN {
            debug!("Ignoring {:?}, not a {} character frame", raw, LEGACY_FRAME_LEN);
            return Ok(None);
        }
        frame_from_raw(raw, FrameFormat::Legacy).map(Some)
    }
}

fn frame_from_raw(raw: String, format: FrameFormat) -> Result<Frame, FrameError> {
    let weight = parse_frame(&raw, format)?;
    Ok(Frame { weight, raw })
}

/// Text from a marker up to and including the first terminator after it.
fn terminated_frame(bytes: &[u8]) -> Option<String> {
    let end = find(&bytes[MARKER.len()..], TERMINATOR)? + MARKER.len() + TERMINATOR.len();
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

fn trim_ascii_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

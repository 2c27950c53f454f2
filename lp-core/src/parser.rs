//! Line parser for synchronization process output
//!
//! Maps one line of ptp4l / phc2sys / ts2phc output to at most one decoded
//! sample. The grammar is a fixed set of literal markers per process type:
//!
//! ```text
//! phc2sys[1823126.732]: [ptp4l.0.config] CLOCK_REALTIME phc offset -10 s2 freq +8956 delay 508
//! ts2phc[1896327.319]: [ts2phc.0.config] ens2f0 master offset -1 s2 freq -2
//! phc2sys[1823130.001]: [ptp4l.0.config] CLOCK_REALTIME rms 4 max 6 freq -8953 +/- 4 delay 504 +/- 1
//! ptp4l[5196819.100]: [ptp4l.0.config] CLOCK_CLASS_CHANGE 248
//! ```
//!
//! Lines that match no marker are skipped without error. A matched field with
//! unparsable numeric content is logged and the whole line is dropped.

use serde::Serialize;
use tracing::warn;

use crate::constants::process as proc_const;
use crate::process::ProcessKind;
use crate::{PtpError, Result};

/// Discrete clock quality reported by a synchronization process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Freerun,
    Holdover,
    Locked,
}

impl SyncState {
    /// Value exported on the clock state gauge
    pub fn gauge_value(self) -> f64 {
        match self {
            SyncState::Freerun => 0.0,
            SyncState::Locked => 1.0,
            SyncState::Holdover => 2.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Freerun => "FREERUN",
            SyncState::Holdover => "HOLDOVER",
            SyncState::Locked => "LOCKED",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every discrete-state token the parser recognizes. Case-sensitive.
pub const STATE_TOKENS: &[(&str, SyncState)] = &[
    ("s0", SyncState::Freerun),
    ("s1", SyncState::Holdover),
    ("s2", SyncState::Locked),
    ("FREERUN", SyncState::Freerun),
    ("HOLDOVER", SyncState::Holdover),
    ("LOCKED", SyncState::Locked),
];

/// Look up a discrete-state token in [`STATE_TOKENS`]
pub fn state_from_token(token: &str) -> Option<SyncState> {
    STATE_TOKENS
        .iter()
        .find(|(t, _)| *t == token)
        .map(|(_, state)| *state)
}

/// Whether a sample describes the local clock or the remote reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    Phc,
    Master,
}

impl ClockSource {
    /// Value of the `from` metric label
    pub fn label(self) -> &'static str {
        match self {
            ClockSource::Phc => "phc",
            ClockSource::Master => "master",
        }
    }
}

/// Offset, frequency and delay decoded from one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetSample {
    pub process: String,
    pub interface: String,
    pub source: ClockSource,
    pub offset: i64,
    pub max_offset: i64,
    pub frequency_adjustment: i64,
    /// Zero when the line carries no delay field
    pub delay: i64,
    /// Literal discrete-state token, always a key of [`STATE_TOKENS`]
    pub state_token: Option<String>,
}

impl OffsetSample {
    pub fn state(&self) -> Option<SyncState> {
        self.state_token.as_deref().and_then(state_from_token)
    }
}

/// One decoded unit of telemetry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricSample {
    Offset(OffsetSample),
    /// Clock class announced by a process (per process, not per interface)
    ClockClass { process: String, clock_class: u8 },
}

impl MetricSample {
    pub fn process(&self) -> &str {
        match self {
            MetricSample::Offset(s) => &s.process,
            MetricSample::ClockClass { process, .. } => process,
        }
    }
}

/// Parse one line of output from `process`.
///
/// Returns `None` for lines that match no marker of the process's grammar
/// and for lines whose numeric fields fail to decode (the latter is logged).
pub fn parse(process: &str, line: &str) -> Option<MetricSample> {
    let kind = ProcessKind::from_name(process);
    let tokens = payload_tokens(line);
    if tokens.is_empty() {
        return None;
    }

    let result = if kind.emits_clock_class() && tokens.contains(&proc_const::CLOCK_CLASS_CHANGE) {
        parse_clock_class(process, &tokens)
    } else if tokens.contains(&"offset") {
        parse_offset_line(process, kind, &tokens)
    } else if tokens.contains(&"rms") && tokens.contains(&"max") {
        parse_summary_line(process, kind, &tokens)
    } else {
        return None;
    };

    match result {
        Ok(sample) => sample,
        Err(e) => {
            warn!(process = %process, line = %line, "Dropping sample: {}", e);
            None
        }
    }
}

/// Strip the `name[timestamp]:` prefix and `[tag]` from the front of a line
fn payload_tokens(line: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = line.split_whitespace().collect();
    let mut skip = 0;
    for token in &tokens {
        let is_prefix = token.ends_with(':') && token.contains('[');
        let is_tag = token.starts_with('[') && token.ends_with(']');
        if is_prefix || is_tag {
            skip += 1;
        } else {
            break;
        }
    }
    tokens.drain(..skip);
    tokens
}

/// `[iface] <marker> offset <n> [state] freq <n> [path] [delay <n>]`
fn parse_offset_line(process: &str, kind: ProcessKind, tokens: &[&str]) -> Result<Option<MetricSample>> {
    let Some(idx) = tokens.iter().position(|t| *t == "offset") else {
        return Ok(None);
    };
    if idx == 0 {
        return Ok(None);
    }

    let marker = tokens[idx - 1];
    let Some(source) = kind.source_for_marker(marker) else {
        return Ok(None);
    };
    let interface = if idx >= 2 { tokens[idx - 2] } else { marker };

    let Some(offset_str) = tokens.get(idx + 1) else {
        return Ok(None);
    };

    let mut cursor = idx + 2;
    let state_token = match tokens.get(cursor) {
        Some(token) if state_from_token(token).is_some() => {
            cursor += 1;
            Some(token.to_string())
        }
        _ => None,
    };

    if tokens.get(cursor) != Some(&"freq") {
        return Ok(None);
    }
    let Some(freq_str) = tokens.get(cursor + 1) else {
        return Ok(None);
    };

    let offset = decode_i64("offset", offset_str)?;
    let frequency_adjustment = decode_i64("freq", freq_str)?;
    let delay = decode_optional_field(tokens, cursor + 2, "delay")?;

    Ok(Some(MetricSample::Offset(OffsetSample {
        process: process.to_string(),
        interface: interface.to_string(),
        source,
        offset,
        max_offset: offset,
        frequency_adjustment,
        delay,
        state_token,
    })))
}

/// `[iface] rms <n> max <n> freq <n> +/- <n> [delay <n> +/- <n>]`
fn parse_summary_line(process: &str, kind: ProcessKind, tokens: &[&str]) -> Result<Option<MetricSample>> {
    let Some(source) = kind.summary_source() else {
        return Ok(None);
    };
    let Some(idx) = tokens.iter().position(|t| *t == "rms") else {
        return Ok(None);
    };
    if tokens.get(idx + 2) != Some(&"max") {
        return Ok(None);
    }
    let interface = if idx >= 1 { tokens[idx - 1] } else { proc_const::MASTER };

    let (Some(rms_str), Some(max_str)) = (tokens.get(idx + 1), tokens.get(idx + 3)) else {
        return Ok(None);
    };
    let Some(freq_idx) = tokens.iter().skip(idx + 4).position(|t| *t == "freq").map(|p| p + idx + 4) else {
        return Ok(None);
    };
    let Some(freq_str) = tokens.get(freq_idx + 1) else {
        return Ok(None);
    };

    let offset = decode_i64("rms", rms_str)?;
    let max_offset = decode_i64("max", max_str)?;
    let frequency_adjustment = decode_i64("freq", freq_str)?;
    let delay = decode_optional_field(tokens, freq_idx + 2, "delay")?;

    Ok(Some(MetricSample::Offset(OffsetSample {
        process: process.to_string(),
        interface: interface.to_string(),
        source,
        offset,
        max_offset,
        frequency_adjustment,
        delay,
        state_token: None,
    })))
}

/// `CLOCK_CLASS_CHANGE <n>`
fn parse_clock_class(process: &str, tokens: &[&str]) -> Result<Option<MetricSample>> {
    let Some(idx) = tokens.iter().position(|t| *t == proc_const::CLOCK_CLASS_CHANGE) else {
        return Ok(None);
    };
    let Some(value) = tokens.get(idx + 1) else {
        return Ok(None);
    };

    let parsed: f64 = value.parse().map_err(|e: std::num::ParseFloatError| PtpError::Decode {
        field: "clock_class",
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if !parsed.is_finite() || parsed.fract() != 0.0 || !(0.0..=255.0).contains(&parsed) {
        return Err(PtpError::Decode {
            field: "clock_class",
            value: value.to_string(),
            reason: "not a clock class in 0..=255".to_string(),
        });
    }

    Ok(Some(MetricSample::ClockClass {
        process: process.to_string(),
        clock_class: parsed as u8,
    }))
}

/// Value of `<name> <n>` searched from `start`; 0 when the field is absent
fn decode_optional_field(tokens: &[&str], start: usize, name: &'static str) -> Result<i64> {
    let found = tokens
        .iter()
        .skip(start)
        .position(|t| *t == name)
        .and_then(|p| tokens.get(start + p + 1));
    match found {
        Some(value) => decode_i64(name, value),
        None => Ok(0),
    }
}

fn decode_i64(field: &'static str, value: &str) -> Result<i64> {
    value.parse::<i64>().map_err(|e| PtpError::Decode {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

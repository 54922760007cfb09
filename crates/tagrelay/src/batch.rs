// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch text format.
//!
//! One record per line, comma separated:
//! ```text
//! timestamp,tag_id,measurements,hci,rssi
//! ```
//!
//! Consecutive records of the same tag leave `tag_id` empty after the first:
//! ```text
//! 1539206911,d5bb5cb30c1c,7f03a503c4ffa907,0,-66
//! 1539206912,,7f03a503c4ffa907,0,-65
//! 1539206911,f2461fbda1d4,4c036100bdff0f08,1,-71
//! ```
//!
//! Lines are joined with `\n` with no trailing newline.

use crate::codec;
use crate::reading::QueueRecord;
use std::fmt;
use thiserror::Error;

/// Batch text parse errors. `line` is 1-based.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("line {line}: expected 5 fields, found {found}")]
    FieldCount { line: usize, found: usize },

    #[error("line {line}: invalid {field} {value:?}")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: empty tag_id with no previous tag")]
    MissingTag { line: usize },
}

/// One parsed line with its tag reconstructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLine {
    pub timestamp: i64,
    pub tag_id: String,
    pub measurements: String,
    pub hci: u32,
    pub rssi: i32,
}

impl fmt::Display for BatchLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.timestamp, self.tag_id, self.measurements, self.hci, self.rssi
        )
    }
}

impl From<&QueueRecord> for BatchLine {
    fn from(record: &QueueRecord) -> Self {
        Self {
            timestamp: record.reading.timestamp,
            tag_id: record.reading.tag_id.clone(),
            measurements: record.reading.measurement.fields_hex(),
            hci: record.radio_index,
            rssi: record.reading.rssi,
        }
    }
}

/// Serialize records in the given order, compacting repeated tags.
pub fn serialize(records: &[QueueRecord]) -> String {
    let mut out = String::with_capacity(records.len() * 48);
    let mut last_tag: Option<&str> = None;

    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let tag = record.reading.tag_id.as_str();
        let mut line = BatchLine::from(record);
        if last_tag == Some(tag) {
            line.tag_id.clear();
        }
        last_tag = Some(tag);

        out.push_str(&line.to_string());
    }

    out
}

/// Parse a batch payload, reconstructing omitted tags.
///
/// Blank lines are skipped.
pub fn parse(text: &str) -> Result<Vec<BatchLine>, FormatError> {
    let mut lines = Vec::new();
    let mut last_tag: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let raw = raw.trim_end_matches('\r');
        if raw.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = raw.split(',').collect();
        if fields.len() != 5 {
            return Err(FormatError::FieldCount {
                line,
                found: fields.len(),
            });
        }

        let tag_id = if fields[1].is_empty() {
            last_tag.clone().ok_or(FormatError::MissingTag { line })?
        } else {
            fields[1].to_string()
        };
        last_tag = Some(tag_id.clone());

        lines.push(BatchLine {
            timestamp: parse_field(line, "timestamp", fields[0])?,
            tag_id,
            measurements: parse_measurements(line, fields[2])?,
            hci: parse_field(line, "hci", fields[3])?,
            rssi: parse_field(line, "rssi", fields[4])?,
        });
    }

    Ok(lines)
}

fn parse_measurements(line: usize, value: &str) -> Result<String, FormatError> {
    match codec::decode_fields(value) {
        Some(_) => Ok(value.to_string()),
        None => Err(FormatError::InvalidField {
            line,
            field: "measurements",
            value: value.to_string(),
        }),
    }
}

fn parse_field<T: std::str::FromStr>(
    line: usize,
    field: &'static str,
    value: &str,
) -> Result<T, FormatError> {
    value.parse().map_err(|_| FormatError::InvalidField {
        line,
        field,
        value: value.to_string(),
    })
}

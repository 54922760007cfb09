// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Beacon payload codec
//!
//! Decodes the manufacturer-specific data field of a sensor tag
//! advertisement into temperature and 3-axis acceleration.
//!
//! # Layout
//!
//! ```text
//! 010003000300 7F03 A503 C4FF A907
//! ^ signature  ^ T  ^ X  ^ Y  ^ Z
//! ```
//!
//! Each field is a little-endian signed 16-bit integer written as four hex
//! characters. Anything that does not match this layout exactly is not one
//! of our tags and decodes to `None`.

use serde::{Deserialize, Serialize};

/// Device-type signature at the start of every tag payload (6 bytes).
pub const SIGNATURE: &str = "010003000300";

/// Hex characters in the measurement block following the signature.
pub const FIELDS_HEX_LEN: usize = 16;

/// Hex characters in a complete payload.
pub const PAYLOAD_HEX_LEN: usize = SIGNATURE.len() + FIELDS_HEX_LEN;

const TEMPERATURE_DIVISOR: f64 = 333.87;
const TEMPERATURE_OFFSET_C: f64 = 21.0;
const ACCELERATION_DIVISOR: f64 = 2048.0;

/// Decoded sensor measurement.
///
/// Keeps the raw fields so the measurement can be re-encoded bit-exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Temperature in degrees Fahrenheit
    pub temperature: f64,
    /// X acceleration in g
    pub x_acc: f64,
    /// Y acceleration in g
    pub y_acc: f64,
    /// Z acceleration in g
    pub z_acc: f64,
    raw: [i16; 4],
}

impl Measurement {
    /// Build a measurement from raw field values (temperature, x, y, z).
    pub fn from_raw(raw: [i16; 4]) -> Self {
        Self {
            temperature: temperature_from_raw(raw[0]),
            x_acc: acceleration_from_raw(raw[1]),
            y_acc: acceleration_from_raw(raw[2]),
            z_acc: acceleration_from_raw(raw[3]),
            raw,
        }
    }

    /// Raw field values as transmitted (temperature, x, y, z).
    pub fn raw(&self) -> [i16; 4] {
        self.raw
    }

    /// The 16-character measurement block, lowercase hex.
    pub fn fields_hex(&self) -> String {
        self.raw.iter().map(|v| encode_field(*v)).collect()
    }
}

/// Decode a manufacturer data payload.
///
/// Returns `None` when the payload does not start with [`SIGNATURE`] or does
/// not carry exactly [`FIELDS_HEX_LEN`] hex characters after it.
pub fn decode(payload: &str) -> Option<Measurement> {
    if payload.len() != PAYLOAD_HEX_LEN {
        return None;
    }
    let prefix = payload.get(..SIGNATURE.len())?;
    if !prefix.eq_ignore_ascii_case(SIGNATURE) {
        return None;
    }
    decode_fields(payload.get(SIGNATURE.len()..)?)
}

/// Decode a bare 16-character measurement block.
pub fn decode_fields(fields: &str) -> Option<Measurement> {
    if fields.len() != FIELDS_HEX_LEN || !fields.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let mut raw = [0i16; 4];
    for (i, slot) in raw.iter_mut().enumerate() {
        *slot = decode_field(&fields[i * 4..i * 4 + 4])?;
    }
    Some(Measurement::from_raw(raw))
}

/// Encode a measurement as a complete payload (signature + fields).
pub fn encode(measurement: &Measurement) -> String {
    format!("{}{}", SIGNATURE, measurement.fields_hex())
}

/// Byte-swapped two's-complement 16-bit field.
fn decode_field(hex4: &str) -> Option<i16> {
    let value = u16::from_str_radix(hex4, 16).ok()?;
    Some(value.swap_bytes() as i16)
}

fn encode_field(value: i16) -> String {
    format!("{:04x}", (value as u16).swap_bytes())
}

fn temperature_from_raw(raw: i16) -> f64 {
    let celsius = f64::from(raw) / TEMPERATURE_DIVISOR + TEMPERATURE_OFFSET_C;
    celsius * 9.0 / 5.0 + 32.0
}

fn acceleration_from_raw(raw: i16) -> f64 {
    f64::from(raw) / ACCELERATION_DIVISOR
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Advertisement extraction
//!
//! Turns a scanned advertisement into a [`Reading`] when it carries a tag
//! payload. The radio layer itself lives outside this crate.

use crate::codec::{self, SIGNATURE};
use crate::reading::Reading;
use serde::{Deserialize, Serialize};

/// AD type of the manufacturer specific data field.
pub const MANUFACTURER_DATA_AD_TYPE: u8 = 0xFF;

/// Company identifier some scanners report in front of the payload
/// (0x0059, little-endian).
pub const COMPANY_ID_PREFIX: &str = "5900";

/// One `(adtype, description, value)` entry of an advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub adtype: u8,
    #[serde(default)]
    pub description: String,
    pub value: String,
}

/// A raw advertisement as delivered by the radio layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Device address (`aa:bb:cc:dd:ee:ff`)
    pub address: String,
    /// Signal strength (dBm)
    pub rssi: i32,
    /// Scan data entries
    pub entries: Vec<ScanEntry>,
}

impl Advertisement {
    /// Value of the last manufacturer data entry, if any.
    pub fn manufacturer_data(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.adtype == MANUFACTURER_DATA_AD_TYPE)
            .map(|e| e.value.as_str())
    }
}

/// Extracts readings from advertisements.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    min_rssi: Option<i32>,
}

impl Extractor {
    /// Create an extractor accepting every signal strength.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard advertisements weaker than `min_rssi` dBm.
    pub fn with_min_rssi(mut self, min_rssi: Option<i32>) -> Self {
        self.min_rssi = min_rssi;
        self
    }

    /// Extract a reading captured at `timestamp` (Unix seconds).
    pub fn extract(&self, adv: &Advertisement, timestamp: i64) -> Option<Reading> {
        if let Some(min) = self.min_rssi {
            if adv.rssi < min {
                tracing::trace!("Dropping {} (rssi {} < {})", adv.address, adv.rssi, min);
                return None;
            }
        }

        let payload = strip_company_id(adv.manufacturer_data()?);
        let Some(measurement) = codec::decode(payload) else {
            tracing::debug!("Ignoring non-tag payload from {}", adv.address);
            return None;
        };

        let reading = Reading::new(&adv.address, adv.rssi, timestamp, measurement);
        if reading.is_none() {
            tracing::debug!("Ignoring malformed device address {:?}", adv.address);
        }
        reading
    }
}

fn strip_company_id(payload: &str) -> &str {
    match payload.get(COMPANY_ID_PREFIX.len()..) {
        Some(rest)
            if payload[..COMPANY_ID_PREFIX.len()].eq_ignore_ascii_case(COMPANY_ID_PREFIX)
                && rest
                    .get(..SIGNATURE.len())
                    .is_some_and(|p| p.eq_ignore_ascii_case(SIGNATURE)) =>
        {
            rest
        }
        _ => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adv(rssi: i32, value: &str) -> Advertisement {
        Advertisement {
            address: "d5:bb:5c:b3:0c:1c".to_string(),
            rssi,
            entries: vec![
                ScanEntry {
                    adtype: 1,
                    description: "Flags".to_string(),
                    value: "04".to_string(),
                },
                ScanEntry {
                    adtype: MANUFACTURER_DATA_AD_TYPE,
                    description: "Manufacturer".to_string(),
                    value: value.to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_extract_tag_reading() {
        let reading = Extractor::new()
            .extract(&adv(-66, "0100030003007F03A503C4FFA907"), 1000)
            .unwrap();

        assert_eq!(reading.tag_id, "d5bb5cb30c1c");
        assert_eq!(reading.rssi, -66);
        assert_eq!(reading.timestamp, 1000);
        assert_eq!(reading.measurement.fields_hex(), "7f03a503c4ffa907");
    }

    #[test]
    fn test_extract_strips_company_id() {
        let reading = Extractor::new()
            .extract(&adv(-63, "5900010003000300910370003f0030f8"), 1000)
            .unwrap();
        assert_eq!(reading.measurement.fields_hex(), "910370003f0030f8");
    }

    #[test]
    fn test_extract_ignores_other_devices() {
        let extractor = Extractor::new();
        assert!(extractor.extract(&adv(-60, "4c000215"), 1000).is_none());

        let mut no_mfr = adv(-60, "");
        no_mfr.entries.truncate(1);
        assert!(extractor.extract(&no_mfr, 1000).is_none());
    }

    #[test]
    fn test_extract_rssi_floor() {
        let extractor = Extractor::new().with_min_rssi(Some(-70));
        assert!(extractor
            .extract(&adv(-80, "0100030003007F03A503C4FFA907"), 1)
            .is_none());
        assert!(extractor
            .extract(&adv(-70, "0100030003007F03A503C4FFA907"), 1)
            .is_some());
    }

    #[test]
    fn test_advertisement_json_line() {
        let line = r#"{"address":"D5:BB:5C:B3:0C:1C","rssi":-66,"entries":[{"adtype":255,"value":"0100030003007F03A503C4FFA907"}]}"#;
        let adv: Advertisement = serde_json::from_str(line).unwrap();
        assert_eq!(adv.manufacturer_data(), Some("0100030003007F03A503C4FFA907"));
    }
}

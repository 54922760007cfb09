// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reading and queue record types

use crate::codec::Measurement;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery batch identifier. `0` is reserved for unassigned records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(pub i64);

impl BatchId {
    /// Marker for records not yet claimed by any batch.
    pub const UNASSIGNED: BatchId = BatchId(0);

    /// Returns true if this id names a claimed batch.
    pub fn is_assigned(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One decoded sensor observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Tag address, lowercase hex without separators
    pub tag_id: String,
    /// Signal strength (dBm)
    pub rssi: i32,
    /// Capture time (Unix seconds, producer clock)
    pub timestamp: i64,
    /// Decoded sensor values
    pub measurement: Measurement,
}

impl Reading {
    /// Create a reading, normalizing the tag address.
    ///
    /// Returns `None` if the address is not a hex device address.
    pub fn new(tag_id: &str, rssi: i32, timestamp: i64, measurement: Measurement) -> Option<Self> {
        Some(Self {
            tag_id: normalize_tag_id(tag_id)?,
            rssi,
            timestamp,
            measurement,
        })
    }

    /// Temperature (°F)
    pub fn temperature(&self) -> f64 {
        self.measurement.temperature
    }

    /// Acceleration (g) on x, y, z
    pub fn acceleration(&self) -> (f64, f64, f64) {
        (
            self.measurement.x_acc,
            self.measurement.y_acc,
            self.measurement.z_acc,
        )
    }
}

/// A reading persisted in the batch store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    /// The stored reading
    pub reading: Reading,
    /// Owning batch (0 = unassigned)
    pub batch_id: BatchId,
    /// Local radio interface that captured the reading (hciN)
    pub radio_index: u32,
}

/// Normalize a device address to lowercase hex with no separators.
///
/// `D5:BB:5C:B3:0C:1C` becomes `d5bb5cb30c1c`.
pub fn normalize_tag_id(address: &str) -> Option<String> {
    let normalized: String = address
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn test_normalize_tag_id() {
        assert_eq!(
            normalize_tag_id("D5:BB:5C:B3:0C:1C").as_deref(),
            Some("d5bb5cb30c1c")
        );
        assert_eq!(
            normalize_tag_id("d5-bb-5c-b3-0c-1c").as_deref(),
            Some("d5bb5cb30c1c")
        );
        assert!(normalize_tag_id("").is_none());
        assert!(normalize_tag_id("::").is_none());
        assert!(normalize_tag_id("not-a-mac").is_none());
    }

    #[test]
    fn test_reading_accessors() {
        let m = codec::decode("0100030003007F03A503C4FFA907").unwrap();
        let reading = Reading::new("D5:BB:5C:B3:0C:1C", -66, 1_539_206_911, m).unwrap();

        assert_eq!(reading.tag_id, "d5bb5cb30c1c");
        assert_eq!(reading.temperature(), m.temperature);
        assert_eq!(reading.acceleration(), (m.x_acc, m.y_acc, m.z_acc));
    }

    #[test]
    fn test_batch_id() {
        assert!(!BatchId::UNASSIGNED.is_assigned());
        assert!(BatchId(3).is_assigned());
        assert_eq!(BatchId(3).to_string(), "3");
    }
}

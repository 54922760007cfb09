// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport envelope
//!
//! The batch text travels as opaque bytes (base64 on the wire). Fixed
//! metadata such as the gateway identity rides along as attributes instead
//! of being repeated on every line.

use crate::batch;
use crate::reading::{BatchId, QueueRecord};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Attribute carrying the gateway identity.
pub const ATTR_HUB_ID: &str = "hub_id";
/// Attribute carrying the local batch id (diagnostics only).
pub const ATTR_BATCH_ID: &str = "batch_id";
/// Attribute carrying the number of records (diagnostics only).
pub const ATTR_RECORD_COUNT: &str = "record_count";

/// Envelope decoding errors.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// A transport-ready batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Batch text bytes
    pub data: Vec<u8>,
    /// Out-of-band attributes
    pub attributes: BTreeMap<String, String>,
}

impl Envelope {
    /// Build the envelope for a claimed batch.
    pub fn for_batch(hub_id: &str, batch_id: BatchId, records: &[QueueRecord]) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_HUB_ID.to_string(), hub_id.to_string());
        attributes.insert(ATTR_BATCH_ID.to_string(), batch_id.to_string());
        attributes.insert(ATTR_RECORD_COUNT.to_string(), records.len().to_string());

        Self {
            data: batch::serialize(records).into_bytes(),
            attributes,
        }
    }

    /// Rebuild an envelope received as base64 data plus attributes.
    pub fn from_base64(
        data: &str,
        attributes: BTreeMap<String, String>,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            data: STANDARD.decode(data.trim())?,
            attributes,
        })
    }

    /// Data as base64 (standard alphabet, padded).
    pub fn encoded_data(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// Data as batch text.
    pub fn text(&self) -> Result<&str, EnvelopeError> {
        Ok(std::str::from_utf8(&self.data)?)
    }

    /// Gateway identity, if present.
    pub fn hub_id(&self) -> Option<&str> {
        self.attributes.get(ATTR_HUB_ID).map(String::as_str)
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers for the push endpoint.

use crate::ingest::IngestError;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tagrelay::envelope::Envelope;

/// Pub/Sub push request body.
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

/// Message part of a push request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl ApiError {
    fn bad_request(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
            code: 400,
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self {
            code: if err.is_permanent() { 400 } else { 500 },
            error: err.to_string(),
        }
    }
}

/// Acknowledged push outcome.
///
/// Push delivery treats any non-2xx status as a nack, so envelopes that can
/// never be ingested are acknowledged with 200 and the error as body.
#[derive(Debug)]
pub enum PushAck {
    /// Every row reached the warehouse (204)
    Ingested,
    /// Dropped as undeliverable (200 with the error body)
    Rejected(ApiError),
}

impl IntoResponse for PushAck {
    fn into_response(self) -> Response {
        match self {
            PushAck::Ingested => StatusCode::NO_CONTENT.into_response(),
            PushAck::Rejected(err) => (StatusCode::OK, Json(err)).into_response(),
        }
    }
}

/// Drain counters reported by the health endpoint.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub status: String,
    pub envelopes: u64,
    pub rows: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// POST /push
///
/// 204 once every row is in the warehouse. 200 with an error body for
/// envelopes that can never succeed, so they are not redelivered. 500 for
/// everything else, so the messaging layer redelivers.
pub async fn push(State(state): State<Arc<AppState>>, body: Bytes) -> Result<PushAck, ApiError> {
    let envelope = match decode_push(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            state.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Rejecting push request: {}", e.error);
            return Ok(PushAck::Rejected(e));
        }
    };

    match state.consumer.ingest(&envelope).await {
        Ok(report) => {
            state.envelopes.fetch_add(1, Ordering::Relaxed);
            state.rows.fetch_add(report.rows as u64, Ordering::Relaxed);
            Ok(PushAck::Ingested)
        }
        Err(e) if e.is_permanent() => {
            state.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Dropping undeliverable envelope: {}", e);
            Ok(PushAck::Rejected(e.into()))
        }
        Err(e) => {
            state.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Ingestion failed, awaiting redelivery: {}", e);
            Err(e.into())
        }
    }
}

/// GET /healthz
pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        envelopes: state.envelopes.load(Ordering::Relaxed),
        rows: state.rows.load(Ordering::Relaxed),
        rejected: state.rejected.load(Ordering::Relaxed),
        failed: state.failed.load(Ordering::Relaxed),
    })
}

fn decode_push(body: &[u8]) -> Result<Envelope, ApiError> {
    let request: PushRequest = serde_json::from_slice(body).map_err(ApiError::bad_request)?;
    if let Some(id) = &request.message.message_id {
        tracing::debug!("Push message {}", id);
    }
    Envelope::from_base64(&request.message.data, request.message.attributes)
        .map_err(ApiError::bad_request)
}

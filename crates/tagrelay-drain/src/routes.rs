// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route definitions.

use crate::handlers;
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Push and health routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/push", post(handlers::push))
        .route("/healthz", get(handlers::healthz))
}

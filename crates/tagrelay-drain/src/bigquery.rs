// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! BigQuery streaming insert client (`tabledata.insertAll`).

use crate::config::{ConfigError, WarehouseConfig};
use crate::warehouse::{InsertError, Warehouse, WarehouseError, WarehouseRow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    kind: &'static str,
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: Vec<InsertAllRow<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRow<'a> {
    insert_id: String,
    json: &'a WarehouseRow,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowErrors>,
}

#[derive(Debug, Deserialize)]
struct RowErrors {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

impl From<RowErrors> for InsertError {
    fn from(row: RowErrors) -> Self {
        let reason = row
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.reason, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        InsertError {
            index: row.index,
            reason,
        }
    }
}

/// BigQuery table sink.
pub struct BigQueryWarehouse {
    client: Client,
    url: String,
    token_env: String,
}

impl BigQueryWarehouse {
    pub fn new(config: &WarehouseConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!(
                "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
                config.endpoint.trim_end_matches('/'),
                config.project,
                config.dataset,
                config.table
            ),
            token_env: config.token_env.clone(),
        })
    }

    /// Full `insertAll` URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn token(&self) -> Result<Option<String>, WarehouseError> {
        if self.token_env.is_empty() {
            return Ok(None);
        }
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(Some(token.trim().to_string())),
            _ => Err(WarehouseError::Credentials(format!(
                "environment variable {} is not set",
                self.token_env
            ))),
        }
    }
}

fn request_body(rows: &[WarehouseRow]) -> InsertAllRequest<'_> {
    InsertAllRequest {
        kind: "bigquery#tableDataInsertAllRequest",
        skip_invalid_rows: false,
        ignore_unknown_values: false,
        rows: rows
            .iter()
            .map(|row| InsertAllRow {
                insert_id: row.insert_id(),
                json: row,
            })
            .collect(),
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<Vec<InsertError>, WarehouseError> {
        let mut request = self.client.post(&self.url).json(&request_body(rows));
        if let Some(token) = self.token()? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: InsertAllResponse = response.json().await?;
        Ok(reply.insert_errors.into_iter().map(InsertError::from).collect())
    }
}

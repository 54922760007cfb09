// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Google Cloud Pub/Sub transport (REST `topics.publish`).

use crate::config::{ConfigError, TransportConfig};
use crate::envelope::Envelope;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    messages: Vec<PubsubMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct PubsubMessage<'a> {
    data: String,
    attributes: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Pub/Sub publisher over HTTPS.
pub struct PubSubTransport {
    client: Client,
    url: String,
    token_env: String,
}

impl PubSubTransport {
    /// Create a transport for the configured topic.
    ///
    /// `request_timeout` bounds one HTTP exchange; the publisher applies its
    /// own overall timeout on top.
    pub fn new(config: &TransportConfig, request_timeout: Duration) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: publish_url(config),
            token_env: config.token_env.clone(),
        })
    }

    /// Full `:publish` URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn token(&self) -> Result<Option<String>, TransportError> {
        if self.token_env.is_empty() {
            return Ok(None);
        }
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(Some(token.trim().to_string())),
            _ => Err(TransportError::Credentials(format!(
                "environment variable {} is not set",
                self.token_env
            ))),
        }
    }
}

fn publish_url(config: &TransportConfig) -> String {
    format!(
        "{}/v1/projects/{}/topics/{}:publish",
        config.endpoint.trim_end_matches('/'),
        config.project,
        config.topic
    )
}

#[async_trait]
impl Transport for PubSubTransport {
    async fn publish(&self, envelope: &Envelope) -> Result<Option<String>, TransportError> {
        let body = PublishRequest {
            messages: vec![PubsubMessage {
                data: envelope.encoded_data(),
                attributes: &envelope.attributes,
            }],
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = self.token()? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: PublishResponse = response.json().await?;
        tracing::trace!("Pub/Sub returned {} message ids", reply.message_ids.len());
        Ok(reply.message_ids.into_iter().next())
    }
}

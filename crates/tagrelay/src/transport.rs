// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound transport abstraction
//!
//! The publisher only relies on one contract: publishing an envelope either
//! yields a message id (delivered) or it does not (retry later).
//!
//! # Implementations
//!
//! - `PubSubTransport` -- Google Cloud Pub/Sub REST API
//! - `MockTransport` -- scripted outcomes for tests

use crate::envelope::Envelope;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("publish rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("{0}")]
    Other(String),
}

/// Outbound publish contract.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish one envelope.
    ///
    /// `Ok(Some(id))` with a non-empty id means delivered. `Ok(None)` means
    /// the service accepted the call but returned no id.
    async fn publish(&self, envelope: &Envelope) -> Result<Option<String>, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn publish(&self, envelope: &Envelope) -> Result<Option<String>, TransportError> {
        (**self).publish(envelope).await
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Scripted result of one mock publish.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Delivered with this message id
    Delivered(String),
    /// Accepted without a message id
    NoMessageId,
    /// Transport error
    Fail(String),
}

/// Mock transport for testing without network access
///
/// Pops one scripted outcome per publish; once the script is exhausted
/// every publish is delivered with a sequential id.
pub struct MockTransport {
    script: Mutex<VecDeque<MockOutcome>>,
    sent: Mutex<Vec<Envelope>>,
}

impl MockTransport {
    /// Create a mock that delivers everything.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes for the next publishes.
    pub fn with_script(outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        let mock = Self::new();
        mock.lock_script().extend(outcomes);
        mock
    }

    /// Envelopes passed to `publish`, in order (including failed ones).
    pub fn sent(&self) -> Vec<Envelope> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<MockOutcome>> {
        match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(&self, envelope: &Envelope) -> Result<Option<String>, TransportError> {
        let attempt = {
            let mut sent = match self.sent.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            sent.push(envelope.clone());
            sent.len()
        };

        match self.lock_script().pop_front() {
            Some(MockOutcome::Delivered(id)) => Ok(Some(id)),
            Some(MockOutcome::NoMessageId) => Ok(None),
            Some(MockOutcome::Fail(msg)) => Err(TransportError::Other(msg)),
            None => {
                tracing::debug!("MockTransport: delivered envelope #{}", attempt);
                Ok(Some(format!("mock-{}", attempt)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn envelope() -> Envelope {
        Envelope {
            data: b"1,aa,7f03a503c4ffa907,0,-60".to_vec(),
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_mock_transport_script() {
        let mock = MockTransport::with_script([
            MockOutcome::Fail("unreachable".into()),
            MockOutcome::NoMessageId,
            MockOutcome::Delivered("42".into()),
        ]);

        assert!(mock.publish(&envelope()).await.is_err());
        assert_eq!(mock.publish(&envelope()).await.unwrap(), None);
        assert_eq!(mock.publish(&envelope()).await.unwrap().as_deref(), Some("42"));
        assert_eq!(mock.publish(&envelope()).await.unwrap().as_deref(), Some("mock-4"));
        assert_eq!(mock.sent().len(), 4);
    }
}

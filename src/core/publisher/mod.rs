//! Shared publishing handle.
//!
//! A [`Publisher`] is cheap to clone and can be handed to every handler that
//! needs to emit messages, instead of each one opening its own channel.

use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::broker::BrokerShared;
use crate::core::error::BrokerError;
use crate::core::message::JSON_CONTENT_TYPE;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Fail with `Unroutable` instead of dropping a message no queue takes.
    pub mandatory: bool,
    pub persistent: bool,
    pub content_type: Option<String>,
}

impl PublishOptions {
    pub fn mandatory() -> Self {
        Self {
            mandatory: true,
            ..Self::default()
        }
    }

    /// What the order services send: persistent JSON, not mandatory.
    pub fn persistent_json() -> Self {
        Self {
            mandatory: false,
            persistent: true,
            content_type: Some(JSON_CONTENT_TYPE.to_owned()),
        }
    }
}

#[derive(Clone)]
pub struct Publisher {
    broker: Arc<BrokerShared>,
}

impl Publisher {
    pub(crate) fn new(broker: Arc<BrokerShared>) -> Self {
        Self { broker }
    }

    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<(), BrokerError> {
        self.broker
            .publish(exchange, routing_key, payload.into(), options)
    }

    /// Serializes `value` as JSON and publishes it persistently.
    pub fn publish_json<T: serde::Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> anyhow::Result<()> {
        let body = serde_json::to_vec(value)?;
        debug!(exchange, routing_key, bytes = body.len(), "publishing JSON");
        self.publish(exchange, routing_key, body, PublishOptions::persistent_json())?;
        Ok(())
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").finish_non_exhaustive()
    }
}

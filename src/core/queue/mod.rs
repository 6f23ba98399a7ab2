//! Queues and the delivery/acknowledgment tracker behind them.
//!
//! Each queue owns its own lock, so publishers and consumers working on
//! different queues never contend. Within a queue:
//! - ready messages are FIFO; requeued messages go back to the head
//! - dispatch round-robins over consumers with spare prefetch capacity
//! - manual-ack deliveries stay tracked until acked, nacked, or their
//!   consumer goes away (then they are requeued)
//! - auto-ack deliveries are settled the moment they are handed out

pub mod consumer;
pub(crate) mod tracker;

pub use consumer::{ConsumeOptions, Consumer};

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::core::channel::{ChannelId, ChannelShared};
use crate::core::connection::ConnectionId;
use crate::core::delivery::Delivery;
use crate::core::error::BrokerError;
use crate::core::message::Message;
use crate::metrics::Stats;
use tracker::{ConsumerSlot, QueueState, Unacked};

/// Declaration attributes. Redeclaring a queue must repeat them exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    /// Owned by the declaring connection and deleted when it closes.
    pub exclusive: bool,
    /// Deleted once its last consumer cancels.
    pub auto_delete: bool,
    /// Ready-message limit; the oldest ready message is dropped on overflow.
    pub max_length: Option<usize>,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
}

impl QueueOptions {
    pub fn durable() -> Self {
        Self {
            durable: true,
            ..Self::default()
        }
    }

    /// The anonymous, connection-scoped queue subscribers declare for themselves.
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            ..Self::default()
        }
    }

    /// Describes the first attribute that differs from `other`.
    pub(crate) fn mismatch(&self, other: &QueueOptions) -> Option<String> {
        if self.durable != other.durable {
            return Some(format!("durable={}", self.durable));
        }
        if self.exclusive != other.exclusive {
            return Some(format!("exclusive={}", self.exclusive));
        }
        if self.auto_delete != other.auto_delete {
            return Some(format!("auto_delete={}", self.auto_delete));
        }
        if self.max_length != other.max_length {
            return Some(format!("max_length={:?}", self.max_length));
        }
        if self.dead_letter_exchange != other.dead_letter_exchange
            || self.dead_letter_routing_key != other.dead_letter_routing_key
        {
            return Some("a different dead-letter target".to_string());
        }
        None
    }
}

/// Point-in-time view of a queue, as listed by the monitoring tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    pub name: String,
    /// Ready messages waiting for a consumer.
    pub messages: usize,
    pub unacked: usize,
    pub consumers: usize,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

pub struct Queue {
    name: String,
    options: QueueOptions,
    owner: Option<ConnectionId>,
    stats: Arc<Stats>,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("owner", &self.owner)
            .finish()
    }
}

impl Queue {
    pub(crate) fn new(
        name: String,
        options: QueueOptions,
        owner: Option<ConnectionId>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            name,
            options,
            owner,
            stats,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn owner(&self) -> Option<ConnectionId> {
        self.owner
    }

    /// `true` when `connection` may use this queue.
    pub(crate) fn accessible_from(&self, connection: Option<ConnectionId>) -> bool {
        match self.owner {
            Some(owner) => connection == Some(owner),
            None => true,
        }
    }

    /// Number of ready messages.
    pub fn len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a message and dispatches. Returns messages pushed out of the
    /// head by `max_length`, for the caller to dead-letter.
    pub(crate) fn enqueue(self: &Arc<Self>, message: Arc<Message>) -> Vec<Arc<Message>> {
        let mut state = self.state.lock();
        if state.deleted {
            return Vec::new();
        }

        state.push_back(message);
        let delivered = state.dispatch(self);
        self.stats.record_delivered(delivered);

        let mut overflow = Vec::new();
        if let Some(max) = self.options.max_length {
            while state.ready.len() > max {
                match state.ready.pop_front() {
                    Some(entry) => overflow.push(entry.message),
                    None => break,
                }
            }
        }
        overflow
    }

    pub(crate) fn add_consumer(self: &Arc<Self>, slot: ConsumerSlot) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if state.deleted {
            return Err(BrokerError::queue_not_found(&self.name));
        }
        state.consumers.push(slot);
        let delivered = state.dispatch(self);
        self.stats.record_delivered(delivered);
        Ok(())
    }

    /// Removes a consumer, requeueing its outstanding deliveries. Returns `true`
    /// when the queue is auto-delete and just lost its last consumer.
    pub(crate) fn cancel(self: &Arc<Self>, consumer_tag: &str) -> bool {
        let mut state = self.state.lock();
        let Some(requeued) = state.cancel(consumer_tag) else {
            return false;
        };
        self.stats.record_requeued(requeued);
        let delivered = state.dispatch(self);
        self.stats.record_delivered(delivered);
        self.options.auto_delete && !state.deleted && state.consumers.is_empty()
    }

    pub(crate) fn release_channel(self: &Arc<Self>, channel: ChannelId) {
        let mut state = self.state.lock();
        let requeued = state.release_channel(channel);
        self.stats.record_requeued(requeued);
        let delivered = state.dispatch(self);
        self.stats.record_delivered(delivered);
    }

    pub(crate) fn ack(self: &Arc<Self>, channel: ChannelId, tag: u64) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state
            .settle(channel, tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))?;
        self.stats.record_acked();
        let delivered = state.dispatch(self);
        self.stats.record_delivered(delivered);
        Ok(())
    }

    /// Negative acknowledgment. With `requeue` the message goes back to the
    /// head; without it the message is handed back for dead-lettering.
    pub(crate) fn nack(
        self: &Arc<Self>,
        channel: ChannelId,
        tag: u64,
        requeue: bool,
    ) -> Result<Option<Arc<Message>>, BrokerError> {
        let mut state = self.state.lock();
        let Unacked { entry, .. } = state
            .settle(channel, tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))?;

        let rejected = if requeue {
            state.requeue(vec![entry]);
            self.stats.record_requeued(1);
            None
        } else {
            Some(entry.message)
        };

        let delivered = state.dispatch(self);
        self.stats.record_delivered(delivered);
        Ok(rejected)
    }

    /// Pops the head message for a pull-style fetch.
    pub(crate) fn get(self: &Arc<Self>, channel: &Arc<ChannelShared>, auto_ack: bool) -> Option<Delivery> {
        let mut state = self.state.lock();
        let entry = state.ready.pop_front()?;
        let tag = channel.next_tag();
        let delivery = Delivery::new(tag, None, &self.name, &entry, Arc::clone(channel));

        if !auto_ack {
            channel.track(tag, Arc::clone(self));
            state.unacked.insert(
                (channel.id(), tag),
                Unacked {
                    consumer: None,
                    channel: Arc::clone(channel),
                    entry,
                },
            );
        }
        self.stats.record_delivered(1);
        Some(delivery)
    }

    /// Drops every ready message. Outstanding deliveries are untouched.
    pub(crate) fn purge(&self) -> usize {
        let mut state = self.state.lock();
        let purged = state.ready.len();
        state.ready.clear();
        purged
    }

    /// Marks the queue deleted and ends its consumers. Returns the number of
    /// ready messages thrown away.
    pub(crate) fn close(&self) -> usize {
        self.state.lock().close()
    }

    pub fn info(&self) -> QueueInfo {
        let state = self.state.lock();
        QueueInfo {
            name: self.name.clone(),
            messages: state.ready.len(),
            unacked: state.unacked.len(),
            consumers: state.consumers.len(),
            durable: self.options.durable,
            exclusive: self.options.exclusive,
            auto_delete: self.options.auto_delete,
        }
    }

    /// Payloads of the ready messages in delivery order.
    pub fn peek_payloads(&self) -> Vec<bytes::Bytes> {
        self.state
            .lock()
            .ready
            .iter()
            .map(|entry| entry.message.payload.clone())
            .collect()
    }
}

//! Channels: the handle consumers and publishers work through.
//!
//! Delivery tags are allocated per channel. A channel remembers which queue
//! every unsettled tag came from, so `ack(tag)`/`nack(tag)` find their way back.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

use crate::broker::BrokerShared;
use crate::core::connection::ConnectionId;
use crate::core::delivery::Delivery;
use crate::core::error::BrokerError;
use crate::core::message::DeathReason;
use crate::core::publisher::PublishOptions;
use crate::core::queue::tracker::ConsumerSlot;
use crate::core::queue::{ConsumeOptions, Consumer, Queue, QueueOptions};
use crate::core::topology::ExchangeKind;

pub type ChannelId = u64;

pub(crate) struct ChannelShared {
    id: ChannelId,
    connection: ConnectionId,
    next_tag: AtomicU64,
    prefetch: AtomicU16,
    /// Unsettled delivery tag → queue it came from.
    pending: Mutex<HashMap<u64, Arc<Queue>>>,
    consumers: Mutex<Vec<(String, Arc<Queue>)>>,
    closed: AtomicBool,
    broker: Weak<BrokerShared>,
}

impl ChannelShared {
    pub(crate) fn new(
        id: ChannelId,
        connection: ConnectionId,
        prefetch: u16,
        broker: Weak<BrokerShared>,
    ) -> Self {
        Self {
            id,
            connection,
            next_tag: AtomicU64::new(1),
            prefetch: AtomicU16::new(prefetch),
            pending: Mutex::new(HashMap::new()),
            consumers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            broker,
        }
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    pub(crate) fn next_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn track(&self, tag: u64, queue: Arc<Queue>) {
        self.pending.lock().insert(tag, queue);
    }

    pub(crate) fn untrack(&self, tag: u64) {
        self.pending.lock().remove(&tag);
    }

    pub(crate) fn forget_consumer(&self, consumer_tag: &str) {
        self.consumers.lock().retain(|(tag, _)| tag != consumer_tag);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }

    fn take_pending(&self, tag: u64) -> Result<Arc<Queue>, BrokerError> {
        self.ensure_open()?;
        self.pending
            .lock()
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))
    }

    pub(crate) fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        let queue = self.take_pending(tag)?;
        queue.ack(self.id, tag)
    }

    pub(crate) fn nack(&self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let queue = self.take_pending(tag)?;
        let rejected = queue.nack(self.id, tag, requeue)?;

        if let Some(message) = rejected {
            match self.broker.upgrade() {
                Some(broker) => broker.dead_letter(&queue, message, DeathReason::Rejected),
                None => debug!(queue = queue.name(), "broker gone, rejected message dropped"),
            }
        }
        Ok(())
    }

    /// Cancels every consumer on the channel and requeues whatever it still
    /// holds unsettled.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let consumers = std::mem::take(&mut *self.consumers.lock());
        let broker = self.broker.upgrade();
        for (tag, queue) in consumers {
            if queue.cancel(&tag) {
                if let Some(broker) = &broker {
                    broker.remove_queue(&queue);
                }
            }
        }

        // Whatever is left came from `get`.
        let mut queues: Vec<Arc<Queue>> = Vec::new();
        for queue in self.pending.lock().values() {
            if !queues.iter().any(|q| Arc::ptr_eq(q, queue)) {
                queues.push(Arc::clone(queue));
            }
        }
        for queue in queues {
            queue.release_channel(self.id);
        }
        self.pending.lock().clear();

        debug!(channel = self.id, connection = self.connection, "channel closed");
    }
}

/// A channel on a [`Connection`](crate::core::connection::Connection).
///
/// Dropping the channel closes it: its consumers are cancelled and their
/// unacknowledged deliveries requeued.
pub struct Channel {
    shared: Arc<ChannelShared>,
    broker: Arc<BrokerShared>,
}

impl Channel {
    pub(crate) fn new(shared: Arc<ChannelShared>, broker: Arc<BrokerShared>) -> Self {
        Self { shared, broker }
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Default prefetch for consumers started on this channel afterwards.
    /// 0 means unlimited.
    pub fn qos(&self, prefetch: u16) -> Result<(), BrokerError> {
        self.shared.ensure_open()?;
        self.shared.prefetch.store(prefetch, Ordering::Relaxed);
        Ok(())
    }

    pub fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.shared.ensure_open()?;
        self.broker.topology.declare_exchange(name, kind, durable)
    }

    /// Declares a queue; an empty name asks for a generated one. Exclusive
    /// queues belong to this channel's connection.
    pub fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String, BrokerError> {
        self.shared.ensure_open()?;
        self.broker
            .topology
            .declare_queue(name, options, Some(self.shared.connection))
    }

    pub fn bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.shared.ensure_open()?;
        self.check_access(queue)?;
        self.broker.topology.bind(queue, exchange, routing_key)
    }

    pub fn unbind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.shared.ensure_open()?;
        self.check_access(queue)?;
        self.broker.topology.unbind(queue, exchange, routing_key)
    }

    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<bytes::Bytes>,
        options: PublishOptions,
    ) -> Result<(), BrokerError> {
        self.shared.ensure_open()?;
        self.broker.publish(exchange, routing_key, payload.into(), options)
    }

    /// Registers a consumer on `queue`.
    pub fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<Consumer, BrokerError> {
        self.shared.ensure_open()?;
        let queue = self.check_access(queue)?;

        let tag = format!("ctag-{}.{}", self.shared.id, self.broker.next_consumer_id());
        let prefetch = options
            .prefetch
            .unwrap_or_else(|| self.shared.prefetch.load(Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));

        let slot = ConsumerSlot {
            tag: tag.clone(),
            channel: Arc::clone(&self.shared),
            auto_ack: options.auto_ack,
            prefetch,
            outstanding: 0,
            active: Arc::clone(&active),
            sender,
        };

        self.shared
            .consumers
            .lock()
            .push((tag.clone(), Arc::clone(&queue)));
        if let Err(e) = queue.add_consumer(slot) {
            self.shared.forget_consumer(&tag);
            return Err(e);
        }

        debug!(
            queue = queue.name(),
            consumer = %tag,
            auto_ack = options.auto_ack,
            prefetch,
            "consumer registered"
        );

        Ok(Consumer::new(
            tag,
            queue,
            Arc::clone(&self.shared),
            Arc::clone(&self.broker),
            active,
            receiver,
        ))
    }

    /// Fetches the head message of `queue`, if any.
    pub fn get(&self, queue: &str, auto_ack: bool) -> Result<Option<Delivery>, BrokerError> {
        self.shared.ensure_open()?;
        let queue = self.check_access(queue)?;
        Ok(queue.get(&self.shared, auto_ack))
    }

    pub fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        self.shared.ack(tag)
    }

    pub fn nack(&self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.shared.nack(tag, requeue)
    }

    pub fn close(&self) {
        self.shared.close();
    }

    fn check_access(&self, queue: &str) -> Result<Arc<Queue>, BrokerError> {
        let queue = self
            .broker
            .topology
            .queue(queue)
            .ok_or_else(|| BrokerError::queue_not_found(queue))?;
        if !queue.accessible_from(Some(self.shared.connection)) {
            return Err(BrokerError::ResourceLocked(queue.name().to_owned()));
        }
        Ok(queue)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shared.close();
    }
}

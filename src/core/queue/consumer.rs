use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::broker::BrokerShared;
use crate::core::channel::ChannelShared;
use crate::core::delivery::Delivery;
use crate::core::queue::Queue;

/// Options for [`Channel::consume`](crate::core::channel::Channel::consume).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeOptions {
    /// Settle each message the moment it is handed out (at-most-once).
    pub auto_ack: bool,
    /// Overrides the channel's QoS prefetch. 0 means unlimited.
    pub prefetch: Option<u16>,
}

impl ConsumeOptions {
    pub fn auto_ack() -> Self {
        Self {
            auto_ack: true,
            prefetch: None,
        }
    }

    pub fn manual(prefetch: u16) -> Self {
        Self {
            auto_ack: false,
            prefetch: Some(prefetch),
        }
    }
}

/// A consumer registration and the stream of its deliveries.
///
/// Dropping it (or calling [`cancel`](Consumer::cancel)) stops dispatch to it
/// immediately and requeues its unacknowledged deliveries.
pub struct Consumer {
    tag: String,
    queue: Arc<Queue>,
    channel: Arc<ChannelShared>,
    broker: Arc<BrokerShared>,
    active: Arc<AtomicBool>,
    receiver: UnboundedReceiver<Delivery>,
    cancelled: bool,
}

impl Consumer {
    pub(crate) fn new(
        tag: String,
        queue: Arc<Queue>,
        channel: Arc<ChannelShared>,
        broker: Arc<BrokerShared>,
        active: Arc<AtomicBool>,
        receiver: UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            tag,
            queue,
            channel,
            broker,
            active,
            receiver,
            cancelled: false,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn queue(&self) -> &str {
        self.queue.name()
    }

    /// Waits for the next delivery. `None` once the consumer was cancelled,
    /// its channel closed, or its queue deleted.
    pub async fn recv(&mut self) -> Option<Delivery> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        let delivery = self.receiver.recv().await?;
        // Cancelled while parked: anything still buffered was already requeued.
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        Some(delivery)
    }

    /// Non-blocking variant of [`recv`](Consumer::recv).
    pub fn try_recv(&mut self) -> Option<Delivery> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    pub fn cancel(mut self) {
        self.cancel_inner();
    }

    fn cancel_inner(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.channel.forget_consumer(&self.tag);

        let emptied = self.queue.cancel(&self.tag);
        self.receiver.close();
        if emptied {
            debug!(queue = self.queue.name(), "auto-delete queue lost its last consumer");
            self.broker.remove_queue(&self.queue);
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("tag", &self.tag)
            .field("queue", &self.queue.name())
            .field("channel", &self.channel.id())
            .finish()
    }
}

impl Stream for Consumer {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.active.load(Ordering::Acquire) {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            // Same race as `recv`: cancelled between the check and the poll.
            Poll::Ready(Some(_)) if !self.active.load(Ordering::Acquire) => Poll::Ready(None),
            other => other,
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.cancel_inner();
    }
}

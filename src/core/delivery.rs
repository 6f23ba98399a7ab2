use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::core::channel::ChannelShared;
use crate::core::error::BrokerError;
use crate::core::message::Message;
use crate::core::queue::tracker::QueuedMessage;

/// A message handed to one consumer from one queue.
///
/// The delivery tag is unique within the channel that received it. Manual-ack
/// deliveries must be settled with [`ack`](Delivery::ack) or
/// [`nack`](Delivery::nack); auto-ack deliveries are already settled and
/// acking them fails with `UnknownDeliveryTag`.
pub struct Delivery {
    tag: u64,
    consumer_tag: Option<String>,
    queue: String,
    redelivered: bool,
    message: Arc<Message>,
    channel: Arc<ChannelShared>,
}

impl Delivery {
    pub(crate) fn new(
        tag: u64,
        consumer_tag: Option<String>,
        queue: &str,
        entry: &QueuedMessage,
        channel: Arc<ChannelShared>,
    ) -> Self {
        Self {
            tag,
            consumer_tag,
            queue: queue.to_owned(),
            redelivered: entry.redelivered,
            message: Arc::clone(&entry.message),
            channel,
        }
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// `None` for messages fetched with `get`.
    pub fn consumer_tag(&self) -> Option<&str> {
        self.consumer_tag.as_deref()
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The message was delivered before and then requeued.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    pub fn payload(&self) -> &Bytes {
        &self.message.payload
    }

    pub fn routing_key(&self) -> &str {
        &self.message.routing_key
    }

    pub fn ack(&self) -> Result<(), BrokerError> {
        self.channel.ack(self.tag)
    }

    pub fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.channel.nack(self.tag, requeue)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("consumer_tag", &self.consumer_tag)
            .field("queue", &self.queue)
            .field("redelivered", &self.redelivered)
            .field("message_id", &self.message.id)
            .finish()
    }
}

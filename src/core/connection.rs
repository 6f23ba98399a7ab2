use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::broker::BrokerShared;
use crate::core::channel::{Channel, ChannelShared};
use crate::core::error::BrokerError;

pub type ConnectionId = u64;

/// A client session with the broker. Owns its channels and the exclusive
/// queues it declared.
///
/// Closing (or dropping) the connection closes every channel on it, requeueing
/// their unacknowledged deliveries, and deletes its exclusive queues.
pub struct Connection {
    id: ConnectionId,
    broker: Arc<BrokerShared>,
    channels: Mutex<Vec<Weak<ChannelShared>>>,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, broker: Arc<BrokerShared>) -> Self {
        debug!(connection = id, "connection opened");
        Self {
            id,
            broker,
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn open_channel(&self) -> Result<Channel, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ConnectionClosed);
        }

        let shared = Arc::new(ChannelShared::new(
            self.broker.next_channel_id(),
            self.id,
            self.broker.settings.default_prefetch,
            Arc::downgrade(&self.broker),
        ));

        let mut channels = self.channels.lock();
        channels.retain(|c| c.strong_count() > 0);
        channels.push(Arc::downgrade(&shared));
        drop(channels);

        Ok(Channel::new(shared, Arc::clone(&self.broker)))
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let channels = std::mem::take(&mut *self.channels.lock());
        for channel in channels.iter().filter_map(Weak::upgrade) {
            channel.close();
        }

        let removed = self.broker.remove_exclusive(self.id);
        info!(
            connection = self.id,
            exclusive_queues_removed = removed,
            "connection closed"
        );
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

//! Per-queue delivery state: the ready FIFO, registered consumers and the
//! deliveries that are out but not yet settled.
//!
//! Everything in here runs under the owning queue's lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::core::channel::{ChannelId, ChannelShared};
use crate::core::delivery::Delivery;
use crate::core::message::Message;
use crate::core::queue::Queue;

/// A message sitting in one queue. `seq` is the queue-local enqueue order and
/// decides where requeued messages go back in.
#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    pub(crate) message: Arc<Message>,
    pub(crate) seq: u64,
    pub(crate) redelivered: bool,
}

/// A registered consumer as the queue sees it.
pub(crate) struct ConsumerSlot {
    pub(crate) tag: String,
    pub(crate) channel: Arc<ChannelShared>,
    pub(crate) auto_ack: bool,
    /// 0 means unlimited.
    pub(crate) prefetch: u16,
    pub(crate) outstanding: usize,
    pub(crate) active: Arc<AtomicBool>,
    pub(crate) sender: UnboundedSender<Delivery>,
}

impl ConsumerSlot {
    fn has_capacity(&self) -> bool {
        self.auto_ack || self.prefetch == 0 || self.outstanding < usize::from(self.prefetch)
    }
}

pub(crate) struct Unacked {
    /// `None` for messages fetched with `get`.
    pub(crate) consumer: Option<String>,
    pub(crate) channel: Arc<ChannelShared>,
    pub(crate) entry: QueuedMessage,
}

#[derive(Default)]
pub(crate) struct QueueState {
    pub(crate) ready: VecDeque<QueuedMessage>,
    pub(crate) consumers: Vec<ConsumerSlot>,
    pub(crate) unacked: HashMap<(ChannelId, u64), Unacked>,
    /// Round-robin position into `consumers`.
    cursor: usize,
    next_seq: u64,
    pub(crate) deleted: bool,
}

impl QueueState {
    pub(crate) fn push_back(&mut self, message: Arc<Message>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ready.push_back(QueuedMessage {
            message,
            seq,
            redelivered: false,
        });
    }

    /// Puts messages back at the head, ahead of everything not yet delivered,
    /// keeping their original relative order.
    pub(crate) fn requeue(&mut self, mut entries: Vec<QueuedMessage>) {
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        for mut entry in entries {
            entry.redelivered = true;
            self.ready.push_front(entry);
        }
    }

    /// Hands ready messages to consumers with spare prefetch capacity,
    /// round-robin, until either side runs out. Returns how many went out.
    pub(crate) fn dispatch(&mut self, queue: &Arc<Queue>) -> usize {
        let mut delivered = 0;

        while !self.ready.is_empty() {
            let Some(idx) = self.next_available() else {
                break;
            };
            let Some(entry) = self.ready.pop_front() else {
                break;
            };

            let slot = &mut self.consumers[idx];
            let tag = slot.channel.next_tag();
            let delivery = Delivery::new(
                tag,
                Some(slot.tag.clone()),
                queue.name(),
                &entry,
                Arc::clone(&slot.channel),
            );

            // Track before sending: the consumer may ack as soon as it receives.
            if !slot.auto_ack {
                slot.channel.track(tag, Arc::clone(queue));
            }

            if slot.sender.send(delivery).is_err() {
                // Stream dropped without cancelling.
                if !slot.auto_ack {
                    slot.channel.untrack(tag);
                }
                let tag = slot.tag.clone();
                self.ready.push_front(entry);
                self.cancel(&tag);
                continue;
            }

            delivered += 1;
            if !slot.auto_ack {
                slot.outstanding += 1;
                let consumer = Some(slot.tag.clone());
                let channel = Arc::clone(&slot.channel);
                self.unacked.insert(
                    (channel.id(), tag),
                    Unacked {
                        consumer,
                        channel,
                        entry,
                    },
                );
            }
        }

        delivered
    }

    fn next_available(&mut self) -> Option<usize> {
        let n = self.consumers.len();
        for offset in 0..n {
            let idx = (self.cursor + offset) % n;
            if self.consumers[idx].has_capacity() {
                self.cursor = (idx + 1) % n;
                return Some(idx);
            }
        }
        None
    }

    /// Removes an outstanding delivery and frees its consumer's capacity.
    pub(crate) fn settle(&mut self, channel: ChannelId, tag: u64) -> Option<Unacked> {
        let unacked = self.unacked.remove(&(channel, tag))?;
        if let Some(consumer) = unacked.consumer.as_deref() {
            if let Some(slot) = self.consumers.iter_mut().find(|s| s.tag == consumer) {
                slot.outstanding = slot.outstanding.saturating_sub(1);
            }
        }
        Some(unacked)
    }

    /// Drops the consumer and requeues everything it still held.
    /// Returns the number of requeued messages, or `None` for an unknown tag.
    pub(crate) fn cancel(&mut self, consumer_tag: &str) -> Option<usize> {
        let idx = self.consumers.iter().position(|s| s.tag == consumer_tag)?;
        let slot = self.consumers.remove(idx);
        slot.active.store(false, Ordering::Release);
        if self.cursor > idx {
            self.cursor -= 1;
        }
        if self.cursor >= self.consumers.len() {
            self.cursor = 0;
        }

        let requeued = self.take_unacked(|u| u.consumer.as_deref() == Some(consumer_tag));
        debug!(
            consumer = consumer_tag,
            requeued, "consumer cancelled"
        );
        Some(requeued)
    }

    /// Requeues deliveries a channel fetched with `get` and never settled.
    pub(crate) fn release_channel(&mut self, channel: ChannelId) -> usize {
        self.take_unacked(|u| u.consumer.is_none() && u.channel.id() == channel)
    }

    fn take_unacked(&mut self, select: impl Fn(&Unacked) -> bool) -> usize {
        let keys: Vec<(ChannelId, u64)> = self
            .unacked
            .iter()
            .filter(|(_, u)| select(u))
            .map(|(key, _)| *key)
            .collect();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(unacked) = self.unacked.remove(&key) {
                unacked.channel.untrack(key.1);
                entries.push(unacked.entry);
            }
        }

        let count = entries.len();
        self.requeue(entries);
        count
    }

    /// Tears the state down for a deleted queue. Consumer streams end once
    /// their slots (and senders) are gone.
    pub(crate) fn close(&mut self) -> usize {
        self.deleted = true;
        for slot in self.consumers.drain(..) {
            slot.active.store(false, Ordering::Release);
        }
        for ((_, tag), unacked) in self.unacked.drain() {
            unacked.channel.untrack(tag);
        }
        let dropped = self.ready.len();
        self.ready.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::MessageProperties;
    use crate::core::queue::QueueOptions;
    use crate::metrics::Stats;
    use std::sync::Weak;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn message(id: u64) -> Arc<Message> {
        Arc::new(Message::new(
            id,
            "",
            "q",
            format!("m{id}"),
            MessageProperties::default(),
        ))
    }

    fn queue() -> Arc<Queue> {
        Arc::new(Queue::new(
            "q".into(),
            QueueOptions::default(),
            None,
            Arc::new(Stats::default()),
        ))
    }

    fn slot(
        tag: &str,
        channel: &Arc<ChannelShared>,
        prefetch: u16,
    ) -> (ConsumerSlot, UnboundedReceiver<Delivery>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let slot = ConsumerSlot {
            tag: tag.into(),
            channel: Arc::clone(channel),
            auto_ack: false,
            prefetch,
            outstanding: 0,
            active: Arc::new(AtomicBool::new(true)),
            sender,
        };
        (slot, receiver)
    }

    fn channel(id: ChannelId) -> Arc<ChannelShared> {
        Arc::new(ChannelShared::new(id, 1, 0, Weak::new()))
    }

    fn ids(state: &QueueState) -> Vec<u64> {
        state.ready.iter().map(|e| e.message.id).collect()
    }

    #[test]
    fn requeue_goes_to_head_in_original_order() {
        let mut state = QueueState::default();
        for id in 1..=4 {
            state.push_back(message(id));
        }
        let taken: Vec<QueuedMessage> = state.ready.drain(..2).collect();
        state.requeue(taken.into_iter().rev().collect());

        assert_eq!(ids(&state), [1, 2, 3, 4]);
        assert!(state.ready[0].redelivered);
        assert!(!state.ready[2].redelivered);
    }

    #[test]
    fn dispatch_round_robins_within_prefetch() {
        let q = queue();
        let ch = channel(1);
        let mut state = QueueState::default();
        let (a, mut rx_a) = slot("a", &ch, 1);
        let (b, mut rx_b) = slot("b", &ch, 2);
        state.consumers.push(a);
        state.consumers.push(b);
        for id in 1..=5 {
            state.push_back(message(id));
        }

        assert_eq!(state.dispatch(&q), 3);
        assert_eq!(ids(&state), [4, 5]);
        assert_eq!(rx_a.try_recv().unwrap().message().id, 1);
        assert_eq!(rx_b.try_recv().unwrap().message().id, 2);
        assert_eq!(rx_b.try_recv().unwrap().message().id, 3);
        assert_eq!(state.unacked.len(), 3);

        // Settling the first delivery frees exactly one slot.
        assert!(state.settle(1, 1).is_some());
        assert!(state.settle(1, 1).is_none());
        assert_eq!(state.dispatch(&q), 1);
        assert_eq!(rx_a.try_recv().unwrap().message().id, 4);
    }

    #[test]
    fn cancel_requeues_what_the_consumer_held() {
        let q = queue();
        let ch = channel(7);
        let mut state = QueueState::default();
        let (a, _rx) = slot("a", &ch, 0);
        state.consumers.push(a);
        for id in 1..=3 {
            state.push_back(message(id));
        }
        assert_eq!(state.dispatch(&q), 3);
        assert!(state.ready.is_empty());

        assert_eq!(state.cancel("a"), Some(3));
        assert_eq!(state.cancel("a"), None);
        assert_eq!(ids(&state), [1, 2, 3]);
        assert!(state.ready.iter().all(|e| e.redelivered));
        assert!(state.unacked.is_empty());
    }

    #[test]
    fn dropped_stream_is_skipped() {
        let q = queue();
        let ch = channel(1);
        let mut state = QueueState::default();
        let (gone, rx_gone) = slot("gone", &ch, 0);
        let (live, mut rx_live) = slot("live", &ch, 0);
        drop(rx_gone);
        state.consumers.push(gone);
        state.consumers.push(live);
        state.push_back(message(1));

        assert_eq!(state.dispatch(&q), 1);
        assert_eq!(state.consumers.len(), 1);
        assert_eq!(rx_live.try_recv().unwrap().message().id, 1);
    }
}

//! Routing: which queues a published message reaches, and getting it there.
//!
//! - direct: binding key equals the routing key
//! - fanout: every bound queue, key ignored
//! - topic: binding pattern matches the routing key (see [`pattern`])
//!
//! A queue matched through several bindings receives one copy.

pub mod pattern;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::error::BrokerError;
use crate::core::message::{DeathReason, Message};
use crate::core::queue::Queue;
use crate::core::topology::{TopologyRegistry, DEFAULT_EXCHANGE};
use crate::metrics::Stats;

#[derive(Debug)]
pub struct Router {
    stats: Arc<Stats>,
    next_id: AtomicU64,
    warn_on_unroutable: bool,
}

impl Router {
    pub(crate) fn new(stats: Arc<Stats>, warn_on_unroutable: bool) -> Self {
        Self {
            stats,
            next_id: AtomicU64::new(1),
            warn_on_unroutable,
        }
    }

    pub(crate) fn next_message_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The queues `routing_key` selects on `exchange`, each at most once.
    pub fn route(
        &self,
        topology: &TopologyRegistry,
        exchange: &str,
        routing_key: &str,
    ) -> Result<Vec<Arc<Queue>>, BrokerError> {
        if exchange == DEFAULT_EXCHANGE {
            return Ok(topology.queue(routing_key).into_iter().collect());
        }

        let entry = topology
            .exchange(exchange)
            .ok_or_else(|| BrokerError::exchange_not_found(exchange))?;
        Ok(entry
            .matching_queues(routing_key)
            .iter()
            .filter_map(|name| topology.queue(name))
            .collect())
    }

    /// Routes and enqueues `message`. Returns the number of queues reached.
    ///
    /// A message that reaches no queue fails with [`BrokerError::Unroutable`]
    /// when `mandatory`, and is otherwise dropped (and counted).
    pub(crate) fn publish(
        &self,
        topology: &TopologyRegistry,
        message: Message,
        mandatory: bool,
    ) -> Result<usize, BrokerError> {
        self.stats.record_published();
        let queues = self.route(topology, &message.exchange, &message.routing_key)?;

        if queues.is_empty() {
            if mandatory {
                self.stats.record_unroutable_returned();
                return Err(BrokerError::Unroutable {
                    exchange: message.exchange,
                    routing_key: message.routing_key,
                });
            }
            self.stats.record_unroutable_dropped();
            if self.warn_on_unroutable {
                warn!(
                    exchange = %message.exchange,
                    routing_key = %message.routing_key,
                    "message matched no queue, dropped"
                );
            } else {
                debug!(
                    exchange = %message.exchange,
                    routing_key = %message.routing_key,
                    "message matched no queue, dropped"
                );
            }
            return Ok(0);
        }

        let reached = queues.len();
        let mut dead = Vec::new();
        self.enqueue(Arc::new(message), &queues, &mut dead);
        self.drain(topology, dead);
        Ok(reached)
    }

    /// Takes a message that left `queue` unacknowledged: republishes it to
    /// the queue's dead-letter exchange, or discards it when there is none.
    pub(crate) fn dead_letter(
        &self,
        topology: &TopologyRegistry,
        queue: &Queue,
        message: Arc<Message>,
        reason: DeathReason,
    ) {
        let mut dead = Vec::new();
        self.kill(queue, &message, reason, &mut dead);
        self.drain(topology, dead);
    }

    fn enqueue(&self, message: Arc<Message>, queues: &[Arc<Queue>], dead: &mut Vec<Message>) {
        self.stats.record_routed(queues.len());
        for queue in queues {
            for overflow in queue.enqueue(Arc::clone(&message)) {
                self.kill(queue, &overflow, DeathReason::MaxLength, dead);
            }
        }
    }

    fn kill(&self, queue: &Queue, message: &Message, reason: DeathReason, dead: &mut Vec<Message>) {
        let options = queue.options();
        let Some(exchange) = options.dead_letter_exchange.as_deref() else {
            self.stats.record_discarded(1);
            debug!(queue = queue.name(), ?reason, message_id = message.id, "message discarded");
            return;
        };

        // Overflowing out of a queue it already overflowed from means the
        // dead-letter topology loops.
        if reason == DeathReason::MaxLength && message.died_in(queue.name(), reason) {
            self.stats.record_discarded(1);
            warn!(
                queue = queue.name(),
                message_id = message.id,
                "dead-letter cycle detected, message dropped"
            );
            return;
        }

        self.stats.record_dead_lettered();
        dead.push(message.dead_lettered(
            self.next_message_id(),
            queue.name(),
            reason,
            exchange,
            options.dead_letter_routing_key.as_deref(),
        ));
    }

    /// Republishes dead-lettered copies until nothing more dies.
    fn drain(&self, topology: &TopologyRegistry, mut dead: Vec<Message>) {
        while let Some(message) = dead.pop() {
            let queues = match self.route(topology, &message.exchange, &message.routing_key) {
                Ok(queues) => queues,
                Err(e) => {
                    self.stats.record_discarded(1);
                    warn!(error = %e, message_id = message.id, "dead-letter exchange unavailable");
                    continue;
                }
            };
            if queues.is_empty() {
                self.stats.record_discarded(1);
                debug!(
                    exchange = %message.exchange,
                    routing_key = %message.routing_key,
                    "dead-lettered message matched no queue"
                );
                continue;
            }
            self.enqueue(Arc::new(message), &queues, &mut dead);
        }
    }
}

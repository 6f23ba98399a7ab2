//! # Broker
//!
//! The in-process broker: one topology registry, one router and the per-queue
//! delivery trackers, shared by every connection opened on it.
//!
//! Independent `Broker` values never share state, so each test can create its
//! own. Cloning a `Broker` yields another handle to the same instance.

pub mod definitions;

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::core::connection::{Connection, ConnectionId};
use crate::core::error::BrokerError;
use crate::core::message::{current_timestamp, DeathReason, Message, MessageProperties};
use crate::core::publisher::{PublishOptions, Publisher};
use crate::core::queue::{Queue, QueueInfo, QueueOptions};
use crate::core::router::Router;
use crate::core::topology::{Binding, Exchange, ExchangeKind, TopologyRegistry};
use crate::metrics::{BrokerStats, Stats};
use definitions::{BindingDefinition, Definitions, ExchangeDefinition, QueueDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Prefetch for channels that never call `qos`. 0 means unlimited.
    pub default_prefetch: u16,
    pub warn_on_unroutable: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            default_prefetch: 0,
            warn_on_unroutable: true,
        }
    }
}

pub(crate) struct BrokerShared {
    pub(crate) topology: TopologyRegistry,
    pub(crate) router: Router,
    pub(crate) stats: Arc<Stats>,
    pub(crate) settings: BrokerSettings,
    next_connection: AtomicU64,
    next_channel: AtomicU64,
    next_consumer: AtomicU64,
}

impl BrokerShared {
    fn new(settings: BrokerSettings) -> Self {
        let stats = Arc::new(Stats::default());
        Self {
            topology: TopologyRegistry::with_stats(Arc::clone(&stats)),
            router: Router::new(Arc::clone(&stats), settings.warn_on_unroutable),
            stats,
            settings,
            next_connection: AtomicU64::new(1),
            next_channel: AtomicU64::new(1),
            next_consumer: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_channel_id(&self) -> u64 {
        self.next_channel.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_consumer_id(&self) -> u64 {
        self.next_consumer.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), BrokerError> {
        let message = Message::new(
            self.router.next_message_id(),
            exchange,
            routing_key,
            payload,
            MessageProperties {
                content_type: options.content_type,
                persistent: options.persistent,
                timestamp: current_timestamp(),
            },
        );
        let reached = self
            .router
            .publish(&self.topology, message, options.mandatory)?;
        debug!(exchange, routing_key, queues = reached, "published");
        Ok(())
    }

    pub(crate) fn dead_letter(&self, queue: &Queue, message: Arc<Message>, reason: DeathReason) {
        self.router
            .dead_letter(&self.topology, queue, message, reason);
    }

    /// Unregisters `queue` and tears it down. Returns the number of ready
    /// messages dropped with it, or `None` if it was already gone.
    pub(crate) fn remove_queue(&self, queue: &Arc<Queue>) -> Option<usize> {
        if !self.topology.remove_queue_if(queue) {
            return None;
        }
        let dropped = queue.close();
        self.stats.record_discarded(dropped);
        Some(dropped)
    }

    /// Deletes the exclusive queues `connection` owns. Returns how many.
    pub(crate) fn remove_exclusive(&self, connection: ConnectionId) -> usize {
        self.topology
            .queues_owned_by(connection)
            .iter()
            .filter_map(|queue| self.remove_queue(queue))
            .count()
    }
}

/// Handle to an in-process broker.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<BrokerShared>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::with_settings(BrokerSettings::default())
    }

    pub fn with_settings(settings: BrokerSettings) -> Self {
        Self {
            shared: Arc::new(BrokerShared::new(settings)),
        }
    }

    /// Builds a broker from the `[broker]` settings and declares the
    /// `[topology]` section.
    pub fn from_config(config: &Config) -> Result<Self, BrokerError> {
        let broker = Self::with_settings(BrokerSettings::from(&config.broker));
        broker.apply(&config.topology)?;
        Ok(broker)
    }

    pub fn settings(&self) -> BrokerSettings {
        self.shared.settings
    }

    pub fn connect(&self) -> Connection {
        let id = self.shared.next_connection.fetch_add(1, Ordering::Relaxed);
        Connection::new(id, Arc::clone(&self.shared))
    }

    /// A shareable publishing handle, independent of any connection.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(Arc::clone(&self.shared))
    }

    pub fn topology(&self) -> &TopologyRegistry {
        &self.shared.topology
    }

    pub fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.shared.topology.declare_exchange(name, kind, durable)
    }

    /// Declares a queue outside of any connection. Exclusive queues need a
    /// connection; use [`Channel::declare_queue`](crate::Channel::declare_queue).
    pub fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String, BrokerError> {
        self.shared.topology.declare_queue(name, options, None)
    }

    pub fn bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.shared.topology.bind(queue, exchange, routing_key)
    }

    pub fn unbind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.shared.topology.unbind(queue, exchange, routing_key)
    }

    /// Deletes a queue with its bindings and ends its consumers' streams.
    /// Returns the number of ready messages dropped.
    pub fn delete_queue(&self, name: &str) -> Result<usize, BrokerError> {
        let queue = self
            .shared
            .topology
            .queue(name)
            .ok_or_else(|| BrokerError::queue_not_found(name))?;
        Ok(self.shared.remove_queue(&queue).unwrap_or(0))
    }

    pub fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.shared.topology.delete_exchange(name)
    }

    /// Drops the ready messages of a queue. Returns how many were dropped.
    pub fn purge_queue(&self, name: &str) -> Result<usize, BrokerError> {
        let queue = self
            .shared
            .topology
            .queue(name)
            .ok_or_else(|| BrokerError::queue_not_found(name))?;
        let purged = queue.purge();
        self.shared.stats.record_discarded(purged);
        debug!(queue = name, purged, "queue purged");
        Ok(purged)
    }

    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<(), BrokerError> {
        self.shared
            .publish(exchange, routing_key, payload.into(), options)
    }

    /// Names of the queues a message published now would reach, without
    /// publishing anything.
    pub fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, BrokerError> {
        let queues = self
            .shared
            .router
            .route(&self.shared.topology, exchange, routing_key)?;
        Ok(queues.iter().map(|q| q.name().to_owned()).collect())
    }

    pub fn queue_info(&self, name: &str) -> Result<QueueInfo, BrokerError> {
        self.shared
            .topology
            .queue(name)
            .map(|queue| queue.info())
            .ok_or_else(|| BrokerError::queue_not_found(name))
    }

    pub fn list_queues(&self) -> Vec<QueueInfo> {
        self.shared
            .topology
            .queues()
            .iter()
            .map(|queue| queue.info())
            .collect()
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.shared.topology.exchanges()
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.shared.topology.bindings()
    }

    pub fn stats(&self) -> BrokerStats {
        self.shared.stats.snapshot()
    }

    /// The durable part of the topology: durable exchanges, durable
    /// non-exclusive queues and the bindings between them.
    pub fn definitions(&self) -> Definitions {
        let exchanges: Vec<ExchangeDefinition> = self
            .exchanges()
            .into_iter()
            .filter(|exchange| exchange.durable)
            .map(|exchange| ExchangeDefinition {
                name: exchange.name,
                kind: exchange.kind,
                durable: true,
            })
            .collect();

        let queues: Vec<QueueDefinition> = self
            .shared
            .topology
            .queues()
            .iter()
            .filter(|queue| queue.options().durable && !queue.options().exclusive)
            .map(|queue| QueueDefinition::from_options(queue.name(), queue.options()))
            .collect();

        let bindings = self
            .bindings()
            .into_iter()
            .filter(|binding| {
                exchanges.iter().any(|e| e.name == binding.exchange)
                    && queues.iter().any(|q| q.name == binding.queue)
            })
            .map(|binding| BindingDefinition {
                queue: binding.queue,
                exchange: binding.exchange,
                routing_key: binding.routing_key,
            })
            .collect();

        Definitions {
            exchanges,
            queues,
            bindings,
        }
    }

    /// Declares everything in `definitions`: exchanges, then queues, then
    /// bindings. Stops at the first error.
    pub fn apply(&self, definitions: &Definitions) -> Result<(), BrokerError> {
        for exchange in &definitions.exchanges {
            self.declare_exchange(&exchange.name, exchange.kind, exchange.durable)?;
        }
        for queue in &definitions.queues {
            self.declare_queue(&queue.name, queue.options())?;
        }
        for binding in &definitions.bindings {
            self.bind(&binding.queue, &binding.exchange, &binding.routing_key)?;
        }
        if !definitions.is_empty() {
            info!(
                exchanges = definitions.exchanges.len(),
                queues = definitions.queues.len(),
                bindings = definitions.bindings.len(),
                "topology applied"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

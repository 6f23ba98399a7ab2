//! The topology registry: exchanges, queues and the bindings between them.
//!
//! Declarations are idempotent. Redeclaring with identical attributes is a
//! no-op; differing attributes fail with [`BrokerError::Conflict`] and leave
//! the existing object untouched.

pub mod exchange;

pub use exchange::{Binding, Exchange, ExchangeEntry, ExchangeKind, DEFAULT_EXCHANGE};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::core::connection::ConnectionId;
use crate::core::error::{BrokerError, ResourceKind};
use crate::core::queue::{Queue, QueueOptions};
use crate::metrics::Stats;

/// Prefix reserved for broker-named objects.
const RESERVED_PREFIX: &str = "amq.";

#[derive(Debug, Default)]
pub struct TopologyRegistry {
    exchanges: DashMap<String, Arc<ExchangeEntry>>,
    queues: DashMap<String, Arc<Queue>>,
    stats: Arc<Stats>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_stats(stats: Arc<Stats>) -> Self {
        Self {
            exchanges: DashMap::new(),
            queues: DashMap::new(),
            stats,
        }
    }

    pub fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        if name == DEFAULT_EXCHANGE {
            return Err(BrokerError::AccessRefused(
                "the default exchange cannot be redeclared".into(),
            ));
        }

        match self.exchanges.entry(name.to_owned()) {
            Entry::Occupied(existing) => {
                let current = existing.get().exchange();
                if current.kind != kind {
                    return Err(BrokerError::Conflict {
                        kind: ResourceKind::Exchange,
                        name: name.to_owned(),
                        reason: format!("type {}", current.kind),
                    });
                }
                if current.durable != durable {
                    return Err(BrokerError::Conflict {
                        kind: ResourceKind::Exchange,
                        name: name.to_owned(),
                        reason: format!("durable={}", current.durable),
                    });
                }
                Ok(())
            }
            Entry::Vacant(slot) => {
                if name.starts_with(RESERVED_PREFIX) {
                    return Err(BrokerError::AccessRefused(format!(
                        "exchange name '{name}' uses the reserved '{RESERVED_PREFIX}' prefix"
                    )));
                }
                slot.insert(Arc::new(ExchangeEntry::new(Exchange {
                    name: name.to_owned(),
                    kind,
                    durable,
                })));
                debug!(exchange = name, %kind, durable, "exchange declared");
                Ok(())
            }
        }
    }

    /// Declares a queue and returns its name, which is generated when `name`
    /// is empty. `owner` is the declaring connection, if any; it only matters
    /// for exclusive queues.
    pub fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
        owner: Option<ConnectionId>,
    ) -> Result<String, BrokerError> {
        if options.exclusive && owner.is_none() {
            return Err(BrokerError::AccessRefused(
                "exclusive queues must be declared on a connection".into(),
            ));
        }

        let generated = name.is_empty();
        let name = if generated {
            format!("{RESERVED_PREFIX}gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_owned()
        };

        match self.queues.entry(name.clone()) {
            Entry::Occupied(existing) => {
                let queue = existing.get();
                if !queue.accessible_from(owner) {
                    return Err(BrokerError::ResourceLocked(name));
                }
                if let Some(reason) = queue.options().mismatch(&options) {
                    return Err(BrokerError::Conflict {
                        kind: ResourceKind::Queue,
                        name,
                        reason,
                    });
                }
            }
            Entry::Vacant(slot) => {
                // Existing generated queues can be redeclared; new ones need a plain name.
                if !generated && name.starts_with(RESERVED_PREFIX) {
                    return Err(BrokerError::AccessRefused(format!(
                        "queue name '{name}' uses the reserved '{RESERVED_PREFIX}' prefix"
                    )));
                }
                let owner = if options.exclusive { owner } else { None };
                debug!(queue = %name, ?options, "queue declared");
                slot.insert(Arc::new(Queue::new(
                    name.clone(),
                    options,
                    owner,
                    Arc::clone(&self.stats),
                )));
            }
        }
        Ok(name)
    }

    /// Binds `queue` to `exchange`. Binding twice with the same key is a no-op.
    pub fn bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        if exchange == DEFAULT_EXCHANGE {
            return Err(BrokerError::AccessRefused(
                "queues cannot be bound to the default exchange".into(),
            ));
        }
        let entry = self
            .exchange(exchange)
            .ok_or_else(|| BrokerError::exchange_not_found(exchange))?;

        // Holding the queue entry keeps a concurrent delete from leaving a
        // binding behind to a queue that no longer exists.
        let queue_ref = self
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::queue_not_found(queue))?;
        if entry.add_binding(queue, routing_key) {
            debug!(queue, exchange, routing_key, "queue bound");
        }
        drop(queue_ref);
        Ok(())
    }

    /// Removes a binding. Unbinding one that does not exist is a no-op.
    pub fn unbind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        if exchange == DEFAULT_EXCHANGE {
            return Err(BrokerError::AccessRefused(
                "queues cannot be unbound from the default exchange".into(),
            ));
        }
        let entry = self
            .exchange(exchange)
            .ok_or_else(|| BrokerError::exchange_not_found(exchange))?;
        if !self.queues.contains_key(queue) {
            return Err(BrokerError::queue_not_found(queue));
        }
        if entry.remove_binding(queue, routing_key) {
            debug!(queue, exchange, routing_key, "queue unbound");
        }
        Ok(())
    }

    pub fn exchange(&self, name: &str) -> Option<Arc<ExchangeEntry>> {
        self.exchanges.get(name).map(|entry| Arc::clone(&*entry))
    }

    pub fn queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).map(|entry| Arc::clone(&*entry))
    }

    /// Unregisters `queue` (if it is still the registered queue under its
    /// name) and strips its bindings. Returns `false` if it was already gone.
    pub(crate) fn remove_queue_if(&self, queue: &Arc<Queue>) -> bool {
        let removed = self
            .queues
            .remove_if(queue.name(), |_, current| Arc::ptr_eq(current, queue))
            .is_some();
        if removed {
            for entry in self.exchanges.iter() {
                entry.value().remove_queue(queue.name());
            }
            debug!(queue = queue.name(), "queue deleted");
        }
        removed
    }

    pub fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        if name == DEFAULT_EXCHANGE {
            return Err(BrokerError::AccessRefused(
                "the default exchange cannot be deleted".into(),
            ));
        }
        if self.exchanges.remove(name).is_none() {
            return Err(BrokerError::exchange_not_found(name));
        }
        debug!(exchange = name, "exchange deleted");
        Ok(())
    }

    /// Declared exchanges sorted by name. The default exchange is implicit
    /// and not listed.
    pub fn exchanges(&self) -> Vec<Exchange> {
        let mut exchanges: Vec<Exchange> = self
            .exchanges
            .iter()
            .map(|entry| entry.value().exchange().clone())
            .collect();
        exchanges.sort_by(|a, b| a.name.cmp(&b.name));
        exchanges
    }

    /// Queues sorted by name.
    pub fn queues(&self) -> Vec<Arc<Queue>> {
        let mut queues: Vec<Arc<Queue>> = self
            .queues
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        queues.sort_by(|a, b| a.name().cmp(b.name()));
        queues
    }

    /// Explicit bindings, grouped by exchange name.
    pub fn bindings(&self) -> Vec<Binding> {
        let mut entries: Vec<Arc<ExchangeEntry>> = self
            .exchanges
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        entries.sort_by(|a, b| a.exchange().name.cmp(&b.exchange().name));
        entries.iter().flat_map(|entry| entry.bindings()).collect()
    }

    pub(crate) fn queues_owned_by(&self, connection: ConnectionId) -> Vec<Arc<Queue>> {
        self.queues
            .iter()
            .filter(|entry| entry.value().owner() == Some(connection))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeclare_with_same_attributes_is_idempotent() {
        let topology = TopologyRegistry::new();
        topology
            .declare_exchange("logs", ExchangeKind::Fanout, false)
            .unwrap();
        topology
            .declare_exchange("logs", ExchangeKind::Fanout, false)
            .unwrap();
        assert_eq!(topology.exchanges().len(), 1);
    }

    #[test]
    fn redeclare_with_other_kind_conflicts_and_keeps_original() {
        let topology = TopologyRegistry::new();
        topology
            .declare_exchange("logs", ExchangeKind::Fanout, false)
            .unwrap();
        let err = topology
            .declare_exchange("logs", ExchangeKind::Direct, false)
            .unwrap_err();
        assert!(matches!(err, BrokerError::Conflict { kind: ResourceKind::Exchange, .. }));
        assert_eq!(topology.exchanges()[0].kind, ExchangeKind::Fanout);
    }

    #[test]
    fn queue_redeclare_checks_options() {
        let topology = TopologyRegistry::new();
        topology
            .declare_queue("task_queue", QueueOptions::durable(), None)
            .unwrap();
        let err = topology
            .declare_queue("task_queue", QueueOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, BrokerError::Conflict { kind: ResourceKind::Queue, .. }));
    }

    #[test]
    fn empty_queue_name_is_generated() {
        let topology = TopologyRegistry::new();
        let a = topology.declare_queue("", QueueOptions::default(), None).unwrap();
        let b = topology.declare_queue("", QueueOptions::default(), None).unwrap();
        assert!(a.starts_with("amq.gen-"));
        assert_ne!(a, b);
    }

    #[test]
    fn reserved_names_are_refused() {
        let topology = TopologyRegistry::new();
        assert!(matches!(
            topology.declare_exchange("amq.custom", ExchangeKind::Topic, false),
            Err(BrokerError::AccessRefused(_))
        ));
        assert!(matches!(
            topology.declare_exchange("", ExchangeKind::Direct, false),
            Err(BrokerError::AccessRefused(_))
        ));
        assert!(matches!(
            topology.declare_queue("amq.mine", QueueOptions::default(), None),
            Err(BrokerError::AccessRefused(_))
        ));
    }

    #[test]
    fn bind_requires_both_endpoints() {
        let topology = TopologyRegistry::new();
        topology
            .declare_exchange("logs_direct", ExchangeKind::Direct, false)
            .unwrap();
        assert!(matches!(
            topology.bind("missing", "logs_direct", "error"),
            Err(BrokerError::NotFound { kind: ResourceKind::Queue, .. })
        ));
        topology.declare_queue("errors", QueueOptions::default(), None).unwrap();
        assert!(matches!(
            topology.bind("errors", "nope", "error"),
            Err(BrokerError::NotFound { kind: ResourceKind::Exchange, .. })
        ));

        topology.bind("errors", "logs_direct", "error").unwrap();
        topology.bind("errors", "logs_direct", "error").unwrap();
        assert_eq!(topology.bindings().len(), 1);
    }

    #[test]
    fn removing_a_queue_strips_its_bindings() {
        let topology = TopologyRegistry::new();
        topology
            .declare_exchange("logs", ExchangeKind::Fanout, false)
            .unwrap();
        topology.declare_queue("q1", QueueOptions::default(), None).unwrap();
        topology.bind("q1", "logs", "").unwrap();

        let queue = topology.queue("q1").unwrap();
        assert!(topology.remove_queue_if(&queue));
        assert!(topology.bindings().is_empty());
        assert!(!topology.remove_queue_if(&queue));
    }
}

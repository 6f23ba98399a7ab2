use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::router::pattern::TopicPattern;

/// Name of the implicit exchange every queue is bound to by its own name.
pub const DEFAULT_EXCHANGE: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Direct => f.write_str("direct"),
            ExchangeKind::Fanout => f.write_str("fanout"),
            ExchangeKind::Topic => f.write_str("topic"),
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            other => Err(format!("unknown exchange kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

/// How a binding decides whether a routing key selects its queue.
#[derive(Debug, Clone)]
pub(crate) enum KeyMatcher {
    Exact,
    Any,
    Topic(TopicPattern),
}

/// Ties one queue to one exchange with a routing-key pattern.
#[derive(Debug, Clone)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    matcher: KeyMatcher,
}

impl Binding {
    pub(crate) fn new(queue: &str, exchange: &Exchange, routing_key: &str) -> Self {
        let matcher = match exchange.kind {
            ExchangeKind::Direct => KeyMatcher::Exact,
            ExchangeKind::Fanout => KeyMatcher::Any,
            ExchangeKind::Topic => KeyMatcher::Topic(TopicPattern::parse(routing_key)),
        };
        Self {
            queue: queue.to_owned(),
            exchange: exchange.name.clone(),
            routing_key: routing_key.to_owned(),
            matcher,
        }
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        match &self.matcher {
            KeyMatcher::Exact => self.routing_key == routing_key,
            KeyMatcher::Any => true,
            KeyMatcher::Topic(pattern) => pattern.matches(routing_key),
        }
    }

    fn same_as(&self, queue: &str, routing_key: &str) -> bool {
        self.queue == queue && self.routing_key == routing_key
    }
}

/// A declared exchange together with the bindings that point at it.
#[derive(Debug)]
pub struct ExchangeEntry {
    exchange: Exchange,
    bindings: RwLock<Vec<Binding>>,
}

impl ExchangeEntry {
    pub(crate) fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            bindings: RwLock::new(Vec::new()),
        }
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Returns `false` when the identical binding already existed.
    pub(crate) fn add_binding(&self, queue: &str, routing_key: &str) -> bool {
        let mut bindings = self.bindings.write();
        if bindings.iter().any(|b| b.same_as(queue, routing_key)) {
            return false;
        }
        bindings.push(Binding::new(queue, &self.exchange, routing_key));
        true
    }

    pub(crate) fn remove_binding(&self, queue: &str, routing_key: &str) -> bool {
        let mut bindings = self.bindings.write();
        let before = bindings.len();
        bindings.retain(|b| !b.same_as(queue, routing_key));
        bindings.len() != before
    }

    pub(crate) fn remove_queue(&self, queue: &str) {
        self.bindings.write().retain(|b| b.queue != queue);
    }

    /// Snapshot of the current bindings.
    pub fn bindings(&self) -> Vec<Binding> {
        self.bindings.read().clone()
    }

    /// Names of the queues whose bindings match `routing_key`, each at most once,
    /// in binding order.
    pub(crate) fn matching_queues(&self, routing_key: &str) -> Vec<String> {
        let bindings = self.bindings.read();
        let mut matched: Vec<String> = Vec::new();
        for binding in bindings.iter() {
            if binding.matches(routing_key) && !matched.iter().any(|q| q == &binding.queue) {
                matched.push(binding.queue.clone());
            }
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: ExchangeKind) -> ExchangeEntry {
        ExchangeEntry::new(Exchange {
            name: "x".into(),
            kind,
            durable: true,
        })
    }

    #[test]
    fn duplicate_binding_is_a_no_op() {
        let exchange = entry(ExchangeKind::Direct);
        assert!(exchange.add_binding("q", "error"));
        assert!(!exchange.add_binding("q", "error"));
        assert!(exchange.add_binding("q", "warning"));
        assert_eq!(exchange.bindings().len(), 2);
    }

    #[test]
    fn queue_listed_once_when_several_of_its_bindings_match() {
        let exchange = entry(ExchangeKind::Topic);
        exchange.add_binding("audit", "order.#");
        exchange.add_binding("audit", "order.amazon.*");
        exchange.add_binding("amazon", "order.amazon.*");
        assert_eq!(
            exchange.matching_queues("order.amazon.us"),
            vec!["audit".to_string(), "amazon".to_string()]
        );
    }

    #[test]
    fn kind_parses_from_config_names() {
        assert_eq!("fanout".parse::<ExchangeKind>(), Ok(ExchangeKind::Fanout));
        assert!("headers".parse::<ExchangeKind>().is_err());
    }
}

//! Declarative topology: what the config file lists under `[topology]`, and
//! what [`Broker::definitions`](super::Broker::definitions) exports.

use serde::{Deserialize, Serialize};

use crate::core::queue::QueueOptions;
use crate::core::topology::ExchangeKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Definitions {
    pub exchanges: Vec<ExchangeDefinition>,
    pub queues: Vec<QueueDefinition>,
    pub bindings: Vec<BindingDefinition>,
}

impl Definitions {
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty() && self.queues.is_empty() && self.bindings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDefinition {
    pub name: String,
    pub kind: ExchangeKind,
    #[serde(default = "default_durable")]
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub name: String,
    #[serde(default = "default_durable")]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_routing_key: Option<String>,
}

impl QueueDefinition {
    pub fn options(&self) -> QueueOptions {
        QueueOptions {
            durable: self.durable,
            exclusive: false,
            auto_delete: self.auto_delete,
            max_length: self.max_length,
            dead_letter_exchange: self.dead_letter_exchange.clone(),
            dead_letter_routing_key: self.dead_letter_routing_key.clone(),
        }
    }

    pub(crate) fn from_options(name: &str, options: &QueueOptions) -> Self {
        Self {
            name: name.to_owned(),
            durable: options.durable,
            auto_delete: options.auto_delete,
            max_length: options.max_length,
            dead_letter_exchange: options.dead_letter_exchange.clone(),
            dead_letter_routing_key: options.dead_letter_routing_key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDefinition {
    pub queue: String,
    pub exchange: String,
    #[serde(default)]
    pub routing_key: String,
}

fn default_durable() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_topology_tables() {
        let raw = r#"
            [[exchanges]]
            name = "order_events"
            kind = "topic"

            [[queues]]
            name = "order_processing"
            max_length = 1000
            dead_letter_exchange = "orders.dlx"

            [[bindings]]
            queue = "order_processing"
            exchange = "order_events"
            routing_key = "order.*.created"
        "#;
        let defs: Definitions = toml::from_str(raw).unwrap();

        assert_eq!(defs.exchanges[0].kind, ExchangeKind::Topic);
        assert!(defs.exchanges[0].durable);
        let options = defs.queues[0].options();
        assert!(options.durable);
        assert_eq!(options.max_length, Some(1000));
        assert_eq!(options.dead_letter_exchange.as_deref(), Some("orders.dlx"));
        assert_eq!(defs.bindings[0].routing_key, "order.*.created");
    }

    #[test]
    fn fanout_binding_key_defaults_to_empty() {
        let raw = r#"
            [[bindings]]
            queue = "q1"
            exchange = "news"
        "#;
        let defs: Definitions = toml::from_str(raw).unwrap();
        assert_eq!(defs.bindings[0].routing_key, "");
    }
}

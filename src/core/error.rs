use std::fmt;

/// Which kind of topology object an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Exchange,
    Queue,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Exchange => f.write_str("exchange"),
            ResourceKind::Queue => f.write_str("queue"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Redeclaration with attributes that differ from the existing object.
    Conflict {
        kind: ResourceKind,
        name: String,
        reason: String,
    },
    NotFound {
        kind: ResourceKind,
        name: String,
    },
    /// A mandatory publish matched no queue.
    Unroutable {
        exchange: String,
        routing_key: String,
    },
    /// Exclusive queue owned by another connection.
    ResourceLocked(String),
    AccessRefused(String),
    UnknownDeliveryTag(u64),
    ChannelClosed,
    ConnectionClosed,
}

impl BrokerError {
    pub(crate) fn exchange_not_found(name: &str) -> Self {
        BrokerError::NotFound {
            kind: ResourceKind::Exchange,
            name: name.to_owned(),
        }
    }

    pub(crate) fn queue_not_found(name: &str) -> Self {
        BrokerError::NotFound {
            kind: ResourceKind::Queue,
            name: name.to_owned(),
        }
    }
}

impl std::error::Error for BrokerError {}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Conflict { kind, name, reason } => {
                write!(f, "{kind} '{name}' already declared with {reason}")
            }
            BrokerError::NotFound { kind, name } => write!(f, "no {kind} '{name}'"),
            BrokerError::Unroutable {
                exchange,
                routing_key,
            } => write!(
                f,
                "message to exchange '{exchange}' with routing key '{routing_key}' matched no queue"
            ),
            BrokerError::ResourceLocked(queue) => {
                write!(f, "queue '{queue}' is exclusive to another connection")
            }
            BrokerError::AccessRefused(msg) => write!(f, "access refused: {msg}"),
            BrokerError::UnknownDeliveryTag(tag) => write!(f, "unknown delivery tag {tag}"),
            BrokerError::ChannelClosed => write!(f, "Channel is closed"),
            BrokerError::ConnectionClosed => write!(f, "Connection is closed"),
        }
    }
}

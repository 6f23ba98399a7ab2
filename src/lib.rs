//! Warren – an in-process AMQP-style message broker.
//!
//! This crate exports
//!  * `core`      – exchanges, queues, routing and the delivery/ack tracker
//!  * `broker`    – the broker facade, connections and topology definitions
//!  * `config`    – TOML-driven runtime configuration
//!  * `scenarios` – the classic messaging topologies, runnable in-process
//!
//! Typical use:
//!
//! ```
//! use warren::{Broker, ConsumeOptions, ExchangeKind, PublishOptions, QueueOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), warren::BrokerError> {
//! let broker = Broker::new();
//! let conn = broker.connect();
//! let channel = conn.open_channel()?;
//!
//! channel.declare_exchange("logs_direct", ExchangeKind::Direct, false)?;
//! let queue = channel.declare_queue("", QueueOptions::exclusive())?;
//! channel.bind(&queue, "logs_direct", "error")?;
//!
//! let mut consumer = channel.consume(&queue, ConsumeOptions::manual(1))?;
//! channel.publish("logs_direct", "error", "disk full", PublishOptions::default())?;
//!
//! let delivery = consumer.recv().await.expect("delivery");
//! assert_eq!(delivery.payload().as_ref(), b"disk full");
//! delivery.ack()?;
//! # Ok(())
//! # }
//! ```

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod broker;
pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;
pub mod scenarios;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use crate::broker::definitions::Definitions;
pub use crate::broker::{Broker, BrokerSettings};
pub use crate::config::{load_config, Config};
pub use crate::core::channel::Channel;
pub use crate::core::connection::Connection;
pub use crate::core::delivery::Delivery;
pub use crate::core::error::{BrokerError, ResourceKind};
pub use crate::core::message::{DeathReason, DeathRecord, Message, MessageProperties};
pub use crate::core::publisher::{PublishOptions, Publisher};
pub use crate::core::queue::{ConsumeOptions, Consumer, QueueInfo, QueueOptions};
pub use crate::core::topology::{ExchangeKind, DEFAULT_EXCHANGE};
pub use crate::metrics::BrokerStats;

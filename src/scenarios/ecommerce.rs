//! The e-commerce order system: one order fans out through three patterns.
//!
//! - `order_processing` work queue: competing processors, manual ack, prefetch 1
//! - `order_notifications` fanout: inventory, email and analytics each get a copy
//! - `regional_fulfillment` direct: routed by region to the matching center
//!
//! Processors report each finished order on the `order_events` topic exchange
//! as `order.<region>.processed`, through the shared [`Publisher`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use super::{Collector, ScenarioOptions};
use crate::broker::Broker;
use crate::core::channel::Channel;
use crate::core::delivery::Delivery;
use crate::core::error::BrokerError;
use crate::core::message::JSON_CONTENT_TYPE;
use crate::core::publisher::{PublishOptions, Publisher};
use crate::core::queue::{ConsumeOptions, Consumer, QueueOptions};
use crate::core::topology::{ExchangeKind, DEFAULT_EXCHANGE};

pub const ORDER_QUEUE: &str = "order_processing";
pub const NOTIFICATIONS_EXCHANGE: &str = "order_notifications";
pub const FULFILLMENT_EXCHANGE: &str = "regional_fulfillment";
pub const EVENTS_EXCHANGE: &str = "order_events";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub product: String,
    pub amount: f64,
    pub region: String,
    pub priority: String,
}

impl Order {
    fn from_delivery(delivery: &Delivery) -> anyhow::Result<Order> {
        Ok(serde_json::from_slice(delivery.payload())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Us,
    Eu,
    Asia,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Us, Region::Eu, Region::Asia];

    /// The routing key orders for this region are published with.
    pub fn code(&self) -> &'static str {
        match self {
            Region::Us => "US",
            Region::Eu => "EU",
            Region::Asia => "ASIA",
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .into_iter()
            .find(|region| region.code() == s)
            .ok_or_else(|| format!("unknown region '{s}'"))
    }
}

/// What a worker in the order system does. Built once per worker from its
/// name, then asked to declare its queue and handle deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Processor,
    Inventory,
    Email,
    Analytics,
    Fulfillment(Region),
    /// Follows processed-order events.
    Audit,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Processor => f.write_str("processor"),
            Role::Inventory => f.write_str("inventory"),
            Role::Email => f.write_str("email"),
            Role::Analytics => f.write_str("analytics"),
            Role::Fulfillment(region) => write!(f, "fulfillment_{}", region.code()),
            Role::Audit => f.write_str("audit"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processor" => Ok(Role::Processor),
            "inventory" => Ok(Role::Inventory),
            "email" => Ok(Role::Email),
            "analytics" => Ok(Role::Analytics),
            "audit" => Ok(Role::Audit),
            other => match other.strip_prefix("fulfillment_") {
                Some(region) => Ok(Role::Fulfillment(region.parse()?)),
                None => Err(format!("unknown worker type '{other}'")),
            },
        }
    }
}

impl Role {
    /// Manual-ack roles must not lose an order if they crash mid-way.
    pub fn manual_ack(&self) -> bool {
        matches!(self, Role::Processor | Role::Audit)
    }

    /// Declares the queue this role reads from and starts consuming it.
    pub fn attach(&self, channel: &Channel) -> Result<Consumer, BrokerError> {
        match self {
            Role::Processor => {
                channel.declare_queue(ORDER_QUEUE, QueueOptions::durable())?;
                channel.qos(1)?;
                channel.consume(ORDER_QUEUE, ConsumeOptions::default())
            }
            Role::Inventory | Role::Email | Role::Analytics => {
                let queue = channel.declare_queue("", QueueOptions::exclusive())?;
                channel.bind(&queue, NOTIFICATIONS_EXCHANGE, "")?;
                channel.consume(&queue, ConsumeOptions::auto_ack())
            }
            Role::Fulfillment(region) => {
                let queue = format!("fulfillment_{}", region.code());
                channel.declare_queue(&queue, QueueOptions::default())?;
                channel.bind(&queue, FULFILLMENT_EXCHANGE, region.code())?;
                channel.consume(&queue, ConsumeOptions::auto_ack())
            }
            Role::Audit => {
                let queue = channel.declare_queue("", QueueOptions::exclusive())?;
                channel.bind(&queue, EVENTS_EXCHANGE, "order.*.processed")?;
                channel.consume(&queue, ConsumeOptions::manual(1))
            }
        }
    }

    /// Handles one order and describes what was done.
    pub fn handle(&self, order: &Order, publisher: &Publisher) -> anyhow::Result<String> {
        let line = match self {
            Role::Processor => {
                let key = format!("order.{}.processed", order.region.to_lowercase());
                publisher.publish_json(EVENTS_EXCHANGE, &key, order)?;
                format!("processed {} ({}, ${:.2})", order.id, order.product, order.amount)
            }
            Role::Inventory => format!("reserved stock of {} for {}", order.product, order.id),
            Role::Email => format!("emailed {} about {}", order.user_id, order.id),
            Role::Analytics => format!(
                "recorded sale of {} for ${:.2} in {}",
                order.product, order.amount, order.region
            ),
            Role::Fulfillment(region) => {
                format!("shipping {} from the {} center", order.id, region.code())
            }
            Role::Audit => format!("{} processed", order.id),
        };
        debug!(role = %self, order = %order.id, "{line}");
        Ok(line)
    }
}

/// Declares the exchanges and the work queue the order system relies on.
pub fn declare_topology(channel: &Channel) -> Result<(), BrokerError> {
    channel.declare_queue(ORDER_QUEUE, QueueOptions::durable())?;
    channel.declare_exchange(NOTIFICATIONS_EXCHANGE, ExchangeKind::Fanout, true)?;
    channel.declare_exchange(FULFILLMENT_EXCHANGE, ExchangeKind::Direct, true)?;
    channel.declare_exchange(EVENTS_EXCHANGE, ExchangeKind::Topic, true)?;
    Ok(())
}

/// Sends one order through all three patterns.
pub fn place_order(publisher: &Publisher, order: &Order) -> anyhow::Result<()> {
    let body = serde_json::to_vec(order)?;
    publisher.publish(
        DEFAULT_EXCHANGE,
        ORDER_QUEUE,
        body.clone(),
        PublishOptions::persistent_json(),
    )?;
    let notify = PublishOptions {
        content_type: Some(JSON_CONTENT_TYPE.to_owned()),
        ..PublishOptions::default()
    };
    publisher.publish(NOTIFICATIONS_EXCHANGE, "", body.clone(), notify.clone())?;
    publisher.publish(FULFILLMENT_EXCHANGE, &order.region, body, notify)?;
    Ok(())
}

/// A deterministic batch of orders cycling through the regions.
pub fn sample_orders(count: usize) -> Vec<Order> {
    const PRODUCTS: [(&str, f64); 4] = [
        ("laptop", 999.99),
        ("headphones", 149.5),
        ("keyboard", 79.0),
        ("monitor", 329.9),
    ];
    (0..count)
        .map(|i| {
            let (product, amount) = PRODUCTS[i % PRODUCTS.len()];
            Order {
                id: format!("order_{}", i + 1),
                user_id: format!("user{}", 100 + i),
                product: product.to_string(),
                amount,
                region: Region::ALL[i % Region::ALL.len()].code().to_string(),
                priority: if i % 2 == 0 { "standard" } else { "express" }.to_string(),
            }
        })
        .collect()
}

pub(crate) async fn run(
    broker: &Broker,
    options: ScenarioOptions,
) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    let conn = broker.connect();
    let setup = conn.open_channel()?;
    declare_topology(&setup)?;

    let mut roles: Vec<(String, Role)> = (1..=options.workers.max(1))
        .map(|n| (format!("processor-{n}"), Role::Processor))
        .collect();
    const SUBSCRIBERS: [&str; 7] = [
        "inventory",
        "email",
        "analytics",
        "fulfillment_US",
        "fulfillment_EU",
        "fulfillment_ASIA",
        "audit",
    ];
    for name in SUBSCRIBERS {
        let role: Role = name.parse().map_err(anyhow::Error::msg)?;
        roles.push((name.to_string(), role));
    }

    let publisher = broker.publisher();
    let mut collector = Collector::new();
    // Dropping a channel closes it, so they are held until the run ends.
    let mut keep_open = Vec::with_capacity(roles.len());
    for (name, role) in roles {
        let channel = conn.open_channel()?;
        let consumer = role.attach(&channel)?;
        let handler_publisher = publisher.clone();
        collector.spawn(name, consumer, role.manual_ack(), move |delivery| {
            let order = Order::from_delivery(delivery)?;
            role.handle(&order, &handler_publisher)
        });
        keep_open.push(channel);
    }

    let orders = sample_orders(options.messages);
    for order in &orders {
        place_order(&publisher, order)?;
    }
    info!(orders = orders.len(), "orders placed");

    // processor + 3 notifications + fulfillment + audit per order
    collector.finish(orders.len() * 6).await
}

use std::collections::BTreeMap;
use tracing::info;

use super::{Collector, ScenarioOptions};
use crate::broker::Broker;
use crate::core::message::JSON_CONTENT_TYPE;
use crate::core::publisher::PublishOptions;
use crate::core::queue::{ConsumeOptions, QueueOptions};
use crate::core::topology::{ExchangeKind, DEFAULT_EXCHANGE};

type Handled = BTreeMap<String, Vec<String>>;

/// Units of work a task carries: one per `.` in its body.
pub(crate) fn task_units(body: &[u8]) -> usize {
    body.iter().filter(|&&b| b == b'.').count()
}

/// One queue, one producer, one consumer.
pub(crate) async fn simple(broker: &Broker) -> anyhow::Result<Handled> {
    let conn = broker.connect();
    let channel = conn.open_channel()?;
    channel.declare_queue("hello", QueueOptions::default())?;

    let mut collector = Collector::new();
    let consumer = channel.consume("hello", ConsumeOptions::auto_ack())?;
    collector.spawn("receiver", consumer, false, |delivery| {
        Ok(delivery.message().payload_str().into_owned())
    });

    channel.publish(DEFAULT_EXCHANGE, "hello", "Hello World!", PublishOptions::default())?;
    collector.finish(1).await
}

/// Competing workers with fair dispatch (prefetch 1, manual ack).
pub(crate) async fn work_queue(broker: &Broker, options: ScenarioOptions) -> anyhow::Result<Handled> {
    let conn = broker.connect();
    let producer = conn.open_channel()?;
    producer.declare_queue("task_queue", QueueOptions::durable())?;

    let mut collector = Collector::new();
    // Dropping a channel closes it, so they are held until the run ends.
    let mut keep_open = Vec::with_capacity(options.workers);
    for n in 1..=options.workers.max(1) {
        let channel = conn.open_channel()?;
        channel.qos(1)?;
        let consumer = channel.consume("task_queue", ConsumeOptions::default())?;
        collector.spawn(format!("worker-{n}"), consumer, true, |delivery| {
            let body = delivery.message().payload_str().into_owned();
            let units = task_units(delivery.payload());
            Ok(format!("{body} ({units} units)"))
        });
        keep_open.push(channel);
    }

    for i in 1..=options.messages {
        let task = format!("task {i}{}", ".".repeat(i % 4 + 1));
        let publish = PublishOptions {
            persistent: true,
            ..PublishOptions::default()
        };
        producer.publish(DEFAULT_EXCHANGE, "task_queue", task, publish)?;
    }
    info!(tasks = options.messages, "tasks queued");

    collector.finish(options.messages).await
}

/// Fanout broadcast; every subscriber owns an anonymous exclusive queue.
pub(crate) async fn pub_sub(broker: &Broker, options: ScenarioOptions) -> anyhow::Result<Handled> {
    let conn = broker.connect();
    let publisher = conn.open_channel()?;
    publisher.declare_exchange("logs", ExchangeKind::Fanout, false)?;

    let subscribers = options.workers.max(1);
    let mut collector = Collector::new();
    let mut keep_open = Vec::with_capacity(subscribers);
    for n in 1..=subscribers {
        let channel = conn.open_channel()?;
        let queue = channel.declare_queue("", QueueOptions::exclusive())?;
        channel.bind(&queue, "logs", "")?;
        let consumer = channel.consume(&queue, ConsumeOptions::auto_ack())?;
        collector.spawn(format!("subscriber-{n}"), consumer, false, |delivery| {
            Ok(delivery.message().payload_str().into_owned())
        });
        keep_open.push(channel);
    }

    for i in 1..=options.messages {
        publisher.publish("logs", "", format!("log entry {i}"), PublishOptions::default())?;
    }

    collector.finish(options.messages * subscribers).await
}

const SEVERITIES: [&str; 3] = ["info", "warning", "error"];

/// Direct routing by severity: one consumer takes only errors, another
/// takes every severity.
pub(crate) async fn routing(broker: &Broker, options: ScenarioOptions) -> anyhow::Result<Handled> {
    let conn = broker.connect();
    let producer = conn.open_channel()?;
    producer.declare_exchange("logs_direct", ExchangeKind::Direct, false)?;

    let mut collector = Collector::new();
    let mut keep_open = Vec::new();
    for (name, severities) in [("errors", &SEVERITIES[2..]), ("all", &SEVERITIES[..])] {
        let channel = conn.open_channel()?;
        let queue = channel.declare_queue("", QueueOptions::exclusive())?;
        for severity in severities {
            channel.bind(&queue, "logs_direct", severity)?;
        }
        let consumer = channel.consume(&queue, ConsumeOptions::auto_ack())?;
        collector.spawn(name, consumer, false, |delivery| {
            Ok(format!(
                "[{}] {}",
                delivery.routing_key(),
                delivery.message().payload_str()
            ))
        });
        keep_open.push(channel);
    }

    let mut expected = 0;
    for i in 0..options.messages {
        let severity = SEVERITIES[i % SEVERITIES.len()];
        producer.publish(
            "logs_direct",
            severity,
            format!("event {}", i + 1),
            PublishOptions::default(),
        )?;
        expected += if severity == "error" { 2 } else { 1 };
    }

    collector.finish(expected).await
}

/// Marketplace order routing over a topic exchange, plus an audit queue that
/// sees every order.
pub(crate) async fn topic(broker: &Broker) -> anyhow::Result<Handled> {
    const BINDINGS: [(&str, &str); 4] = [
        ("amazon_orders", "order.amazon.*"),
        ("trendyol_orders", "order.trendyol.*"),
        ("hepsiburada_orders", "order.hepsiburada.*"),
        ("order_audit", "order.#"),
    ];
    const ORDERS: [&str; 5] = [
        "order.amazon.us",
        "order.trendyol.tr",
        "order.hepsiburada.tr",
        "order.amazon.de",
        "order.ebay.us",
    ];

    let conn = broker.connect();
    let producer = conn.open_channel()?;
    producer.declare_exchange("stox.orders", ExchangeKind::Topic, true)?;

    let mut collector = Collector::new();
    let mut keep_open = Vec::new();
    for (queue, pattern) in BINDINGS {
        let channel = conn.open_channel()?;
        channel.declare_queue(queue, QueueOptions::durable())?;
        channel.bind(queue, "stox.orders", pattern)?;
        let consumer = channel.consume(queue, ConsumeOptions::manual(1))?;
        collector.spawn(queue, consumer, true, |delivery| {
            Ok(delivery.routing_key().to_owned())
        });
        keep_open.push(channel);
    }

    let mut expected = 0;
    for (i, key) in ORDERS.iter().enumerate() {
        expected += broker.route("stox.orders", key)?.len();
        let body = format!(r#"{{"order_id":"ORD-{:03}","routing_key":"{key}"}}"#, i + 1);
        let publish = PublishOptions {
            persistent: true,
            content_type: Some(JSON_CONTENT_TYPE.to_owned()),
            ..PublishOptions::default()
        };
        producer.publish("stox.orders", key, body, publish)?;
    }

    collector.finish(expected).await
}

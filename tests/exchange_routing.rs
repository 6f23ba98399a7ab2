#[path = "common.rs"]
mod common;

use bytes::Bytes;
use warren::{Broker, BrokerError, ExchangeKind, PublishOptions, QueueOptions, ResourceKind};

fn payloads(broker: &Broker, queue: &str) -> Vec<Bytes> {
    broker.topology().queue(queue).unwrap().peek_payloads()
}

#[test]
fn fanout_copies_to_every_bound_queue() {
    common::init_logging();
    let broker = Broker::new();
    broker
        .declare_exchange("news", ExchangeKind::Fanout, false)
        .unwrap();
    for q in ["Q1", "Q2", "Q3"] {
        broker.declare_queue(q, QueueOptions::default()).unwrap();
        broker.bind(q, "news", "").unwrap();
    }

    broker
        .publish("news", "", "headline", PublishOptions::default())
        .unwrap();

    for q in ["Q1", "Q2", "Q3"] {
        assert_eq!(payloads(&broker, q), vec![Bytes::from("headline")], "{q}");
    }
    assert_eq!(broker.stats().routed, 3);
}

#[test]
fn fanout_ignores_routing_key() {
    let broker = Broker::new();
    broker
        .declare_exchange("logs", ExchangeKind::Fanout, false)
        .unwrap();
    broker.declare_queue("q", QueueOptions::default()).unwrap();
    broker.bind("q", "logs", "only.this").unwrap();

    broker
        .publish("logs", "something.else", "a", PublishOptions::default())
        .unwrap();
    assert_eq!(broker.queue_info("q").unwrap().messages, 1);
}

#[test]
fn direct_routes_on_exact_key_only() {
    common::init_logging();
    let broker = Broker::new();
    broker
        .declare_exchange("logs", ExchangeKind::Direct, false)
        .unwrap();
    broker.declare_queue("QE", QueueOptions::default()).unwrap();
    broker.declare_queue("QI", QueueOptions::default()).unwrap();
    broker.bind("QE", "logs", "error").unwrap();
    broker.bind("QI", "logs", "info").unwrap();

    broker
        .publish("logs", "error", "disk full", PublishOptions::default())
        .unwrap();

    assert_eq!(broker.queue_info("QE").unwrap().messages, 1);
    assert_eq!(broker.queue_info("QI").unwrap().messages, 0);

    // Case-sensitive, no wildcards.
    broker
        .publish("logs", "ERROR", "x", PublishOptions::default())
        .unwrap();
    broker
        .publish("logs", "*", "x", PublishOptions::default())
        .unwrap();
    assert_eq!(broker.queue_info("QE").unwrap().messages, 1);
}

#[test]
fn topic_wildcards_select_queues() {
    let broker = Broker::new();
    broker
        .declare_exchange("stox.orders", ExchangeKind::Topic, true)
        .unwrap();
    let bindings = [
        ("amazon_any", "order.amazon.*"),
        ("all_orders", "order.#"),
        ("amazon_us", "order.amazon.us"),
        ("everything", "#"),
        ("trendyol", "order.trendyol.*"),
    ];
    for (queue, pattern) in bindings {
        broker.declare_queue(queue, QueueOptions::default()).unwrap();
        broker.bind(queue, "stox.orders", pattern).unwrap();
    }

    let mut reached = broker.route("stox.orders", "order.amazon.us").unwrap();
    reached.sort();
    assert_eq!(reached, ["all_orders", "amazon_any", "amazon_us", "everything"]);

    let mut reached = broker
        .route("stox.orders", "order.amazon.us.extra")
        .unwrap();
    reached.sort();
    assert_eq!(reached, ["all_orders", "everything"]);
}

#[test]
fn queue_matched_by_several_bindings_gets_one_copy() {
    let broker = Broker::new();
    broker
        .declare_exchange("events", ExchangeKind::Topic, false)
        .unwrap();
    broker.declare_queue("audit", QueueOptions::default()).unwrap();
    broker.bind("audit", "events", "order.#").unwrap();
    broker.bind("audit", "events", "*.eu.*").unwrap();
    broker.bind("audit", "events", "#").unwrap();

    broker
        .publish("events", "order.eu.processed", "o1", PublishOptions::default())
        .unwrap();
    assert_eq!(payloads(&broker, "audit"), vec![Bytes::from("o1")]);
}

#[test]
fn unroutable_is_dropped_unless_mandatory() {
    common::init_logging();
    let broker = Broker::new();
    broker
        .declare_exchange("logs", ExchangeKind::Direct, false)
        .unwrap();

    broker
        .publish("logs", "debug", "lost", PublishOptions::default())
        .unwrap();
    let err = broker
        .publish("logs", "debug", "returned", PublishOptions::mandatory())
        .unwrap_err();
    assert_eq!(
        err,
        BrokerError::Unroutable {
            exchange: "logs".into(),
            routing_key: "debug".into(),
        }
    );

    let stats = broker.stats();
    assert_eq!(stats.published, 2);
    assert_eq!(stats.unroutable_dropped, 1);
    assert_eq!(stats.unroutable_returned, 1);
    assert_eq!(stats.routed, 0);
}

#[test]
fn publish_to_undeclared_exchange_is_not_found() {
    let broker = Broker::new();
    let err = broker
        .publish("nope", "k", "x", PublishOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::NotFound {
            kind: ResourceKind::Exchange,
            ..
        }
    ));
}

#[test]
fn default_exchange_routes_by_queue_name() {
    let broker = Broker::new();
    broker
        .declare_queue("task_queue", QueueOptions::durable())
        .unwrap();

    broker
        .publish("", "task_queue", "job", PublishOptions::default())
        .unwrap();
    assert_eq!(payloads(&broker, "task_queue"), vec![Bytes::from("job")]);

    let err = broker
        .publish("", "no_such_queue", "job", PublishOptions::mandatory())
        .unwrap_err();
    assert!(matches!(err, BrokerError::Unroutable { .. }));

    assert!(matches!(
        broker.bind("task_queue", "", "task_queue"),
        Err(BrokerError::AccessRefused(_))
    ));
}

#[test]
fn copies_are_independent_fifos() {
    let broker = Broker::new();
    broker
        .declare_exchange("logs", ExchangeKind::Fanout, false)
        .unwrap();
    for q in ["a", "b"] {
        broker.declare_queue(q, QueueOptions::default()).unwrap();
        broker.bind(q, "logs", "").unwrap();
    }
    for m in ["1", "2", "3"] {
        broker
            .publish("logs", "", m, PublishOptions::default())
            .unwrap();
    }

    broker.purge_queue("a").unwrap();
    assert!(payloads(&broker, "a").is_empty());
    assert_eq!(
        payloads(&broker, "b"),
        vec![Bytes::from("1"), Bytes::from("2"), Bytes::from("3")]
    );
}

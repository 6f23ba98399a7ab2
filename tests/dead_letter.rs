#[path = "common.rs"]
mod common;

use bytes::Bytes;
use common::next;
use warren::{
    Broker, ConsumeOptions, DeathReason, ExchangeKind, PublishOptions, QueueOptions,
};

fn payloads(broker: &Broker, queue: &str) -> Vec<Bytes> {
    broker.topology().queue(queue).unwrap().peek_payloads()
}

fn with_dlx(exchange: &str) -> QueueOptions {
    QueueOptions {
        dead_letter_exchange: Some(exchange.to_owned()),
        ..QueueOptions::default()
    }
}

#[tokio::test]
async fn rejected_message_moves_to_dead_letter_exchange() {
    common::init_logging();
    let broker = Broker::new();
    broker
        .declare_exchange("dlx", ExchangeKind::Fanout, true)
        .unwrap();
    broker.declare_queue("dead", QueueOptions::durable()).unwrap();
    broker.bind("dead", "dlx", "").unwrap();
    broker.declare_queue("work", with_dlx("dlx")).unwrap();

    let conn = broker.connect();
    let ch = conn.open_channel().unwrap();
    let mut consumer = ch.consume("work", ConsumeOptions::manual(1)).unwrap();
    broker
        .publish("", "work", "poison", PublishOptions::default())
        .unwrap();

    let delivery = next(&mut consumer).await;
    delivery.nack(false).unwrap();
    assert_eq!(broker.queue_info("work").unwrap().unacked, 0);

    let dead = ch.get("dead", true).unwrap().expect("dead-lettered copy");
    assert_eq!(dead.payload().as_ref(), b"poison");
    assert_eq!(dead.message().exchange, "dlx");
    let death = dead.message().last_death().unwrap();
    assert_eq!(death.queue, "work");
    assert_eq!(death.reason, DeathReason::Rejected);
    assert_eq!(death.count, 1);
    assert_eq!(death.original_exchange, "");
    assert_eq!(death.original_routing_key, "work");

    let stats = broker.stats();
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.discarded, 0);
}

#[tokio::test]
async fn dead_letter_routing_key_overrides_original() {
    let broker = Broker::new();
    broker
        .declare_exchange("retry", ExchangeKind::Direct, false)
        .unwrap();
    broker.declare_queue("parked", QueueOptions::default()).unwrap();
    broker.bind("parked", "retry", "parked").unwrap();
    broker
        .declare_queue(
            "jobs",
            QueueOptions {
                dead_letter_routing_key: Some("parked".into()),
                ..with_dlx("retry")
            },
        )
        .unwrap();

    let conn = broker.connect();
    let ch = conn.open_channel().unwrap();
    broker
        .publish("", "jobs", "j1", PublishOptions::default())
        .unwrap();
    let delivery = ch.get("jobs", false).unwrap().unwrap();
    ch.nack(delivery.tag(), false).unwrap();

    assert_eq!(payloads(&broker, "parked"), vec![Bytes::from("j1")]);
}

#[test]
fn overflow_without_dead_letter_exchange_drops_the_oldest() {
    let broker = Broker::new();
    broker
        .declare_queue(
            "bounded",
            QueueOptions {
                max_length: Some(2),
                ..QueueOptions::default()
            },
        )
        .unwrap();

    for m in ["m1", "m2", "m3"] {
        broker
            .publish("", "bounded", m, PublishOptions::default())
            .unwrap();
    }

    assert_eq!(
        payloads(&broker, "bounded"),
        vec![Bytes::from("m2"), Bytes::from("m3")]
    );
    assert_eq!(broker.stats().discarded, 1);
}

#[tokio::test]
async fn overflow_is_dead_lettered_with_max_length_reason() {
    let broker = Broker::new();
    broker
        .declare_exchange("overflow", ExchangeKind::Fanout, false)
        .unwrap();
    broker.declare_queue("spill", QueueOptions::default()).unwrap();
    broker.bind("spill", "overflow", "").unwrap();
    broker
        .declare_queue(
            "bounded",
            QueueOptions {
                max_length: Some(1),
                ..with_dlx("overflow")
            },
        )
        .unwrap();

    broker
        .publish("", "bounded", "old", PublishOptions::default())
        .unwrap();
    broker
        .publish("", "bounded", "new", PublishOptions::default())
        .unwrap();

    assert_eq!(payloads(&broker, "bounded"), vec![Bytes::from("new")]);
    let conn = broker.connect();
    let ch = conn.open_channel().unwrap();
    let spilled = ch.get("spill", true).unwrap().unwrap();
    assert_eq!(spilled.payload().as_ref(), b"old");
    assert_eq!(
        spilled.message().last_death().unwrap().reason,
        DeathReason::MaxLength
    );
}

#[test]
fn dead_letter_cycle_is_broken() {
    common::init_logging();
    let broker = Broker::new();
    broker
        .declare_exchange("loop", ExchangeKind::Fanout, false)
        .unwrap();
    broker
        .declare_queue(
            "a",
            QueueOptions {
                max_length: Some(1),
                ..with_dlx("loop")
            },
        )
        .unwrap();
    broker.bind("a", "loop", "").unwrap();

    broker
        .publish("", "a", "m1", PublishOptions::default())
        .unwrap();
    broker
        .publish("", "a", "m2", PublishOptions::default())
        .unwrap();

    // m1 overflows into "loop", comes back to "a", pushes m2 out, and then
    // overflows a second time: that is where the cycle stops.
    assert_eq!(payloads(&broker, "a"), vec![Bytes::from("m2")]);
    let stats = broker.stats();
    assert_eq!(stats.dead_lettered, 2);
    assert_eq!(stats.discarded, 1);
}

#[tokio::test]
async fn requeued_rejection_is_not_dead_lettered() {
    let broker = Broker::new();
    broker
        .declare_exchange("dlx", ExchangeKind::Fanout, false)
        .unwrap();
    broker.declare_queue("dead", QueueOptions::default()).unwrap();
    broker.bind("dead", "dlx", "").unwrap();
    broker.declare_queue("work", with_dlx("dlx")).unwrap();

    let conn = broker.connect();
    let ch = conn.open_channel().unwrap();
    broker
        .publish("", "work", "retry me", PublishOptions::default())
        .unwrap();
    let delivery = ch.get("work", false).unwrap().unwrap();
    delivery.nack(true).unwrap();

    assert_eq!(broker.queue_info("work").unwrap().messages, 1);
    assert_eq!(broker.queue_info("dead").unwrap().messages, 0);
    assert_eq!(broker.stats().dead_lettered, 0);
}

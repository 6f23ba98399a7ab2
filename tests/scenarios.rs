use warren::config::load_config;
use warren::scenarios::{self, Scenario, ScenarioOptions};
use warren::{Broker, PublishOptions, QueueOptions};

async fn run(scenario: Scenario, workers: usize, messages: usize) -> scenarios::ScenarioReport {
    let broker = Broker::new();
    scenarios::run(&broker, scenario, ScenarioOptions { workers, messages })
        .await
        .unwrap()
}

#[tokio::test]
async fn simple_delivers_hello_world() {
    let report = run(Scenario::Simple, 1, 1).await;
    assert_eq!(report.handled_by("receiver"), ["Hello World!"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn work_queue_spreads_tasks_over_workers() {
    let report = run(Scenario::WorkQueue, 3, 9).await;

    assert_eq!(report.total(), 9);
    assert_eq!(report.stats.acked, 9);
    assert_eq!(report.stats.unroutable_dropped, 0);
    let first = report.handled.values().flatten().find(|l| l.starts_with("task 1."));
    assert_eq!(first.map(String::as_str), Some("task 1.. (2 units)"));
}

#[tokio::test]
async fn pub_sub_reaches_every_subscriber() {
    let report = run(Scenario::PubSub, 3, 4).await;

    for n in 1..=3 {
        let lines = report.handled_by(&format!("subscriber-{n}"));
        assert_eq!(lines, ["log entry 1", "log entry 2", "log entry 3", "log entry 4"]);
    }
}

#[tokio::test]
async fn routing_splits_by_severity() {
    let report = run(Scenario::Routing, 1, 6).await;

    assert_eq!(report.handled_by("errors"), ["[error] event 3", "[error] event 6"]);
    assert_eq!(report.handled_by("all").len(), 6);
}

#[tokio::test]
async fn topic_routes_marketplace_orders() {
    let report = run(Scenario::Topic, 1, 0).await;

    assert_eq!(
        report.handled_by("amazon_orders"),
        ["order.amazon.us", "order.amazon.de"]
    );
    assert_eq!(report.handled_by("trendyol_orders"), ["order.trendyol.tr"]);
    assert_eq!(report.handled_by("hepsiburada_orders"), ["order.hepsiburada.tr"]);
    assert_eq!(report.handled_by("order_audit").len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ecommerce_order_flows_through_every_pattern() {
    let report = run(Scenario::Ecommerce, 2, 6).await;

    let processed: usize = ["processor-1", "processor-2"]
        .iter()
        .map(|p| report.handled_by(p).len())
        .sum();
    assert_eq!(processed, 6);
    for role in ["inventory", "email", "analytics", "audit"] {
        assert_eq!(report.handled_by(role).len(), 6, "{role}");
    }
    for region in ["US", "EU", "ASIA"] {
        assert_eq!(report.handled_by(&format!("fulfillment_{region}")).len(), 2);
    }
    assert!(report.handled_by("fulfillment_EU")[0].contains("order_2"));
    assert_eq!(report.stats.unroutable_dropped, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ecommerce_runs_on_the_configured_broker() {
    let config = load_config("warren.toml").unwrap();
    let broker = Broker::from_config(&config).unwrap();
    let options = ScenarioOptions {
        workers: 2,
        messages: 3,
    };
    let report = scenarios::run(&broker, Scenario::Ecommerce, options)
        .await
        .unwrap();

    assert_eq!(report.handled_by("audit").len(), 3);
    assert!(broker.queue_info("order_intake").is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn undecodable_order_is_rejected_once() {
    let broker = Broker::new();
    broker
        .declare_queue("order_processing", QueueOptions::durable())
        .unwrap();
    broker
        .publish("", "order_processing", "not json", PublishOptions::default())
        .unwrap();

    let options = ScenarioOptions {
        workers: 2,
        messages: 3,
    };
    let report = scenarios::run(&broker, Scenario::Ecommerce, options)
        .await
        .unwrap();

    let processed: usize = ["processor-1", "processor-2"]
        .iter()
        .map(|p| report.handled_by(p).len())
        .sum();
    assert_eq!(processed, 3);
    assert_eq!(report.stats.requeued, 0);
    assert_eq!(report.stats.discarded, 1);
    assert_eq!(broker.queue_info("order_processing").unwrap().messages, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stox_product_reaches_every_marketplace() {
    let report = run(Scenario::Stox, 1, 2).await;

    for stage in ["image", "ai", "seo"] {
        assert_eq!(report.handled_by(stage).len(), 2, "{stage}");
    }
    assert_eq!(
        report.handled_by("seo")[0],
        "prod_001 keywords: premium, wireless, earbuds, electronics"
    );
    for marketplace in ["amazon", "trendyol", "hepsiburada"] {
        assert_eq!(
            report.handled_by(&format!("{marketplace}_listings")),
            ["listed prod_001 at $149.99", "listed prod_002 at $89.99"]
        );
    }

    // prod_001 syncs everywhere, prod_002 only to amazon
    assert_eq!(report.handled_by("sync").len(), 2);
    assert_eq!(
        report.handled_by("amazon_sync"),
        ["prod_001 stock 10", "prod_002 stock 20"]
    );
    assert_eq!(report.handled_by("trendyol_sync"), ["prod_001 stock 10"]);
    assert_eq!(report.handled_by("hepsiburada_sync"), ["prod_001 stock 10"]);
    assert_eq!(report.stats.unroutable_dropped, 0);
    assert_eq!(report.stats.discarded, 0);
}

#[test]
fn scenario_names_parse() {
    for scenario in Scenario::ALL {
        assert_eq!(scenario.name().parse::<Scenario>(), Ok(scenario));
    }
    assert!("hello-world".parse::<Scenario>().is_err());
}

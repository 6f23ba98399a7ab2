//! The classic messaging topologies, run against an in-process broker.
//!
//! Every consumer runs on its own tokio task and reports what it handled to
//! a collector; a scenario finishes once the expected number of messages has
//! been handled, then cancels its consumers.

pub mod ecommerce;
pub mod stox;
mod tutorials;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::core::delivery::Delivery;
use crate::core::queue::Consumer;
use crate::metrics::BrokerStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Simple,
    WorkQueue,
    PubSub,
    Routing,
    Topic,
    Ecommerce,
    Stox,
}

impl Scenario {
    pub const ALL: [Scenario; 7] = [
        Scenario::Simple,
        Scenario::WorkQueue,
        Scenario::PubSub,
        Scenario::Routing,
        Scenario::Topic,
        Scenario::Ecommerce,
        Scenario::Stox,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Simple => "simple",
            Scenario::WorkQueue => "work-queue",
            Scenario::PubSub => "pub-sub",
            Scenario::Routing => "routing",
            Scenario::Topic => "topic",
            Scenario::Ecommerce => "ecommerce",
            Scenario::Stox => "stox",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Scenario::ALL.iter().map(|s| s.name()).collect();
                format!("unknown scenario '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioOptions {
    /// Competing consumers on work queues.
    pub workers: usize,
    /// Messages (tasks, log lines, orders) to publish.
    pub messages: usize,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            messages: 6,
        }
    }
}

/// What each consumer of a scenario handled, in the order it handled it.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub handled: BTreeMap<String, Vec<String>>,
    pub stats: BrokerStats,
}

impl ScenarioReport {
    pub fn handled_by(&self, consumer: &str) -> &[String] {
        self.handled
            .get(consumer)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.handled.values().map(Vec::len).sum()
    }
}

/// Runs `scenario` on `broker` and waits for every consumer to finish.
pub async fn run(
    broker: &Broker,
    scenario: Scenario,
    options: ScenarioOptions,
) -> anyhow::Result<ScenarioReport> {
    info!(%scenario, workers = options.workers, messages = options.messages, "running scenario");
    let handled = match scenario {
        Scenario::Simple => tutorials::simple(broker).await?,
        Scenario::WorkQueue => tutorials::work_queue(broker, options).await?,
        Scenario::PubSub => tutorials::pub_sub(broker, options).await?,
        Scenario::Routing => tutorials::routing(broker, options).await?,
        Scenario::Topic => tutorials::topic(broker).await?,
        Scenario::Ecommerce => ecommerce::run(broker, options).await?,
        Scenario::Stox => stox::run(broker, options).await?,
    };
    Ok(ScenarioReport {
        scenario: scenario.to_string(),
        handled,
        stats: broker.stats(),
    })
}

/// How long a scenario may go without finishing before it is declared stuck.
const STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs consumers on tasks and gathers what they report.
pub(crate) struct Collector {
    tx: mpsc::UnboundedSender<(String, String)>,
    rx: mpsc::UnboundedReceiver<(String, String)>,
    tasks: Vec<JoinHandle<()>>,
}

impl Collector {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            tasks: Vec::new(),
        }
    }

    /// Drives `consumer` on its own task. `handler` turns each delivery into
    /// a line for the report; manual-ack consumers ack after it returns and
    /// reject what it fails on.
    pub(crate) fn spawn<F>(
        &mut self,
        name: impl Into<String>,
        mut consumer: Consumer,
        manual_ack: bool,
        mut handler: F,
    ) where
        F: FnMut(&Delivery) -> anyhow::Result<String> + Send + 'static,
    {
        let name = name.into();
        let tx = self.tx.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(delivery) = consumer.recv().await {
                match handler(&delivery) {
                    Ok(line) => {
                        if manual_ack {
                            if let Err(e) = delivery.ack() {
                                warn!(consumer = %name, error = %e, "ack failed");
                                continue;
                            }
                        }
                        if tx.send((name.clone(), line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(consumer = %name, error = %e, "handler failed, rejecting");
                        if manual_ack {
                            if let Err(e) = delivery.nack(false) {
                                warn!(consumer = %name, error = %e, "nack failed");
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Waits for `expected` reports, then stops every consumer task.
    pub(crate) async fn finish(
        mut self,
        expected: usize,
    ) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
        let mut handled: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let collect = async {
            for _ in 0..expected {
                match self.rx.recv().await {
                    Some((consumer, line)) => handled.entry(consumer).or_default().push(line),
                    None => break,
                }
            }
        };
        let outcome = tokio::time::timeout(STALL_TIMEOUT, collect).await;

        for task in &self.tasks {
            task.abort();
        }
        outcome.map_err(|_| anyhow::anyhow!("scenario stalled before {expected} messages were handled"))?;
        Ok(handled)
    }
}

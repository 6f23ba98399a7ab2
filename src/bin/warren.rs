//! warren – run the classic messaging scenarios against an in-process broker,
//! export its durable topology, or poke at it from an interactive shell.
//
//  $ warren scenario work-queue --workers 3 --messages 10
//  $ warren definitions --config warren.toml
//  $ warren shell
//  > exchange logs fanout
//  > queue q1
//  > bind q1 logs
//  > pub logs - hello
//  > get q1
use warren::config::{config_path, load_config, load_config_or_default};
use warren::logging::init_logging;
use warren::scenarios::{self, Scenario, ScenarioOptions};
use warren::{Broker, Channel, Config, ExchangeKind, PublishOptions, QueueOptions};

use clap::{Parser, Subcommand};
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "warren", version, about = "In-process AMQP-style broker")]
struct Cli {
    /// Path to config TOML (env WARREN_CONFIG, then warren.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one of the tutorial topologies and print what every consumer handled.
    Scenario {
        /// simple, work-queue, pub-sub, routing, topic, ecommerce or stox
        name: Scenario,
        /// Competing consumers on work queues
        #[arg(long, default_value_t = 2)]
        workers: usize,
        /// Messages to publish
        #[arg(long, default_value_t = 6)]
        messages: usize,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply the configured topology and print its durable definitions.
    Definitions,
    /// Interactive shell over a fresh broker.
    Shell,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config: Config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_config_or_default(config_path())?,
    };
    init_logging(&config.logging.level)?;
    let broker = Broker::from_config(&config)?;

    match cli.cmd {
        Command::Scenario {
            name,
            workers,
            messages,
            json,
        } => {
            let report =
                scenarios::run(&broker, name, ScenarioOptions { workers, messages }).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for (consumer, lines) in &report.handled {
                    println!("[{consumer}] handled {}", lines.len());
                    for line in lines {
                        println!("    {line}");
                    }
                }
                print!("{}", report.stats.render());
            }
        }
        Command::Definitions => {
            print!("{}", toml::to_string_pretty(&broker.definitions())?);
        }
        Command::Shell => shell(&broker)?,
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────
// Interactive shell
// ───────────────────────────────────────────────────────────
const HELP: &str = "\
exchange <name> <direct|fanout|topic> [durable]
queue <name|-> [durable]
bind <queue> <exchange> [key]   | unbind <queue> <exchange> [key]
pub <exchange|-> <key|-> <msg>  (`-` is the default exchange / empty key)
get <queue> | ack <tag> | nack <tag> [requeue]
queues | stats | help | exit";

fn shell(broker: &Broker) -> anyhow::Result<()> {
    let mut rl: Editor<(), DefaultHistory> = DefaultEditor::new()?;
    let conn = broker.connect();
    let channel = conn.open_channel()?;

    println!("warren shell. Type `help` for commands.");
    loop {
        let Ok(line) = rl.readline("> ") else { break };
        let _ = rl.add_history_entry(line.as_str());

        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => continue,
            ["exit" | "quit"] => break,
            ["help"] => println!("{HELP}"),
            words => {
                if let Err(e) = run_command(broker, &channel, words) {
                    println!("error: {e}");
                }
            }
        }
    }
    Ok(())
}

fn dash(word: &str) -> &str {
    if word == "-" {
        ""
    } else {
        word
    }
}

fn run_command(broker: &Broker, channel: &Channel, words: &[&str]) -> anyhow::Result<()> {
    match words {
        ["exchange", name, kind, rest @ ..] => {
            let kind: ExchangeKind = kind.parse().map_err(anyhow::Error::msg)?;
            channel.declare_exchange(name, kind, rest == ["durable"])?;
            println!("ok");
        }
        ["queue", name, rest @ ..] => {
            let options = if rest == ["durable"] {
                QueueOptions::durable()
            } else {
                QueueOptions::default()
            };
            println!("{}", channel.declare_queue(dash(name), options)?);
        }
        ["bind", queue, exchange, key @ ..] => {
            channel.bind(queue, exchange, key.first().copied().unwrap_or(""))?;
            println!("ok");
        }
        ["unbind", queue, exchange, key @ ..] => {
            channel.unbind(queue, exchange, key.first().copied().unwrap_or(""))?;
            println!("ok");
        }
        ["pub", exchange, key, rest @ ..] => {
            let options = PublishOptions::mandatory();
            channel.publish(dash(exchange), dash(key), rest.join(" "), options)?;
            println!("ok");
        }
        ["get", queue] => match channel.get(queue, false)? {
            Some(delivery) => println!(
                "#{} {}{}",
                delivery.tag(),
                delivery.message().payload_str(),
                if delivery.redelivered() { " (redelivered)" } else { "" }
            ),
            None => println!("(empty)"),
        },
        ["ack", tag] => {
            channel.ack(tag.parse()?)?;
            println!("ok");
        }
        ["nack", tag, rest @ ..] => {
            channel.nack(tag.parse()?, rest == ["requeue"])?;
            println!("ok");
        }
        ["queues"] => {
            println!("{:<40} {:>8} {:>8} {:>9}", "name", "messages", "unacked", "consumers");
            for info in broker.list_queues() {
                println!(
                    "{:<40} {:>8} {:>8} {:>9}",
                    info.name, info.messages, info.unacked, info.consumers
                );
            }
        }
        ["stats"] => print!("{}", broker.stats().render()),
        _ => println!("Unknown cmd. Type `help`."),
    }
    Ok(())
}

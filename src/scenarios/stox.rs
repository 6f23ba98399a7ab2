//! The Stox listing pipeline: a product upload travels through image
//! processing, AI enhancement and SEO generation, is broadcast to every
//! marketplace, and inventory changes are synced back out per marketplace.
//!
//! ```text
//! "" ─image_uploads─▶ image ─image.process─▶ stox.images ─▶ ai_processing
//!     ai ─image.enhanced─▶ stox.images ─▶ seo_processing
//!     seo ─▶ stox.listings (fanout) ─▶ {amazon,trendyol,hepsiburada}_listings
//! "" ─inventory_updates─▶ sync ─<marketplace>_sync─▶ stox.sync ─▶ <marketplace>_sync
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{Collector, ScenarioOptions};
use crate::broker::Broker;
use crate::core::channel::Channel;
use crate::core::delivery::Delivery;
use crate::core::error::BrokerError;
use crate::core::publisher::Publisher;
use crate::core::queue::{ConsumeOptions, QueueOptions};
use crate::core::topology::{ExchangeKind, DEFAULT_EXCHANGE};

pub const IMAGES_EXCHANGE: &str = "stox.images";
pub const LISTINGS_EXCHANGE: &str = "stox.listings";
pub const SYNC_EXCHANGE: &str = "stox.sync";
pub const UPLOAD_QUEUE: &str = "image_uploads";
pub const INVENTORY_QUEUE: &str = "inventory_updates";
pub const MARKETPLACES: [&str; 3] = ["amazon", "trendyol", "hepsiburada"];

/// Marketplace value that targets every marketplace at once.
const ALL_MARKETPLACES: &str = "all";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub category: String,
    pub price: f64,
    /// uploaded, images_uploaded, ai_enhanced, seo_generated
    pub status: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub product_id: String,
    /// A marketplace name, or `all`.
    pub marketplace: String,
    pub stock: u32,
}

impl InventoryUpdate {
    /// The marketplaces this update is synced to.
    pub fn targets(&self) -> Vec<&'static str> {
        MARKETPLACES
            .into_iter()
            .filter(|m| self.marketplace == ALL_MARKETPLACES || self.marketplace == *m)
            .collect()
    }
}

type Handler = Box<dyn FnMut(&Delivery) -> anyhow::Result<String> + Send>;

fn decode<T: for<'de> Deserialize<'de>>(delivery: &Delivery) -> anyhow::Result<T> {
    Ok(serde_json::from_slice(delivery.payload())?)
}

/// Search keywords from the title and category: lowercase, first use wins.
pub fn keywords(product: &Product) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in product
        .title
        .split_whitespace()
        .chain(std::iter::once(product.category.as_str()))
    {
        let word = word.to_lowercase();
        if !out.contains(&word) {
            out.push(word);
        }
    }
    out
}

/// Declares the three Stox exchanges and every queue of the pipeline.
pub fn declare_topology(channel: &Channel) -> Result<(), BrokerError> {
    channel.declare_exchange(IMAGES_EXCHANGE, ExchangeKind::Topic, true)?;
    channel.declare_exchange(LISTINGS_EXCHANGE, ExchangeKind::Fanout, true)?;
    channel.declare_exchange(SYNC_EXCHANGE, ExchangeKind::Direct, true)?;

    channel.declare_queue(UPLOAD_QUEUE, QueueOptions::durable())?;
    channel.declare_queue(INVENTORY_QUEUE, QueueOptions::durable())?;
    for (queue, key) in [("ai_processing", "image.process"), ("seo_processing", "image.enhanced")] {
        channel.declare_queue(queue, QueueOptions::durable())?;
        channel.bind(queue, IMAGES_EXCHANGE, key)?;
    }
    for marketplace in MARKETPLACES {
        let listings = format!("{marketplace}_listings");
        channel.declare_queue(&listings, QueueOptions::durable())?;
        channel.bind(&listings, LISTINGS_EXCHANGE, "")?;

        let sync = format!("{marketplace}_sync");
        channel.declare_queue(&sync, QueueOptions::durable())?;
        channel.bind(&sync, SYNC_EXCHANGE, &sync)?;
    }
    Ok(())
}

/// Products to upload, cycling through a small catalogue.
pub fn sample_products(count: usize) -> Vec<Product> {
    const CATALOGUE: [(&str, &str, f64); 3] = [
        ("Premium Wireless Earbuds", "Electronics", 149.99),
        ("Smart Home Security Camera", "Electronics", 89.99),
        ("Organic Cotton Throw", "Home", 39.5),
    ];
    (0..count)
        .map(|i| {
            let (title, category, price) = CATALOGUE[i % CATALOGUE.len()];
            Product {
                id: format!("prod_{:03}", i + 1),
                title: title.to_string(),
                category: category.to_string(),
                price,
                status: "uploaded".to_string(),
                keywords: Vec::new(),
            }
        })
        .collect()
}

/// One inventory change per product: the first goes to every marketplace,
/// the rest to one marketplace each in turn.
pub fn sample_updates(products: &[Product]) -> Vec<InventoryUpdate> {
    products
        .iter()
        .enumerate()
        .map(|(i, product)| InventoryUpdate {
            product_id: product.id.clone(),
            marketplace: match i {
                0 => ALL_MARKETPLACES.to_string(),
                i => MARKETPLACES[(i - 1) % MARKETPLACES.len()].to_string(),
            },
            stock: 10 * (i as u32 + 1),
        })
        .collect()
}

fn forward(
    publisher: &Publisher,
    exchange: &str,
    routing_key: &str,
    product: &mut Product,
    status: &str,
) -> anyhow::Result<()> {
    product.status = status.to_string();
    publisher.publish_json(exchange, routing_key, &*product)
}

pub(crate) async fn run(
    broker: &Broker,
    options: ScenarioOptions,
) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    let conn = broker.connect();
    let setup = conn.open_channel()?;
    declare_topology(&setup)?;

    let publisher = broker.publisher();
    let mut collector = Collector::new();
    // Dropping a channel closes it, so they are held until the run ends.
    let mut keep_open = Vec::new();
    let mut attach = |name: String, queue: String, handler: Handler| -> anyhow::Result<()> {
        let channel = conn.open_channel()?;
        let consumer = channel.consume(&queue, ConsumeOptions::manual(1))?;
        collector.spawn(name, consumer, true, handler);
        keep_open.push(channel);
        Ok(())
    };

    let images = publisher.clone();
    attach(
        "image".into(),
        UPLOAD_QUEUE.into(),
        Box::new(move |delivery: &Delivery| {
            let mut product: Product = decode(delivery)?;
            forward(&images, IMAGES_EXCHANGE, "image.process", &mut product, "images_uploaded")?;
            Ok(format!("{} images stored", product.id))
        }),
    )?;

    let ai = publisher.clone();
    attach(
        "ai".into(),
        "ai_processing".into(),
        Box::new(move |delivery: &Delivery| {
            let mut product: Product = decode(delivery)?;
            forward(&ai, IMAGES_EXCHANGE, "image.enhanced", &mut product, "ai_enhanced")?;
            Ok(format!("{} enhanced", product.id))
        }),
    )?;

    let seo = publisher.clone();
    attach(
        "seo".into(),
        "seo_processing".into(),
        Box::new(move |delivery: &Delivery| {
            let mut product: Product = decode(delivery)?;
            product.keywords = keywords(&product);
            forward(&seo, LISTINGS_EXCHANGE, "", &mut product, "seo_generated")?;
            Ok(format!("{} keywords: {}", product.id, product.keywords.join(", ")))
        }),
    )?;

    let sync = publisher.clone();
    attach(
        "sync".into(),
        INVENTORY_QUEUE.into(),
        Box::new(move |delivery: &Delivery| {
            let update: InventoryUpdate = decode(delivery)?;
            let targets = update.targets();
            for marketplace in &targets {
                sync.publish_json(SYNC_EXCHANGE, &format!("{marketplace}_sync"), &update)?;
            }
            Ok(format!("{} synced to {}", update.product_id, targets.join(", ")))
        }),
    )?;

    for marketplace in MARKETPLACES {
        attach(
            format!("{marketplace}_listings"),
            format!("{marketplace}_listings"),
            Box::new(move |delivery: &Delivery| {
                let product: Product = decode(delivery)?;
                debug!(marketplace, product = %product.id, "listing created");
                Ok(format!("listed {} at ${:.2}", product.id, product.price))
            }),
        )?;
        attach(
            format!("{marketplace}_sync"),
            format!("{marketplace}_sync"),
            Box::new(|delivery: &Delivery| {
                let update: InventoryUpdate = decode(delivery)?;
                Ok(format!("{} stock {}", update.product_id, update.stock))
            }),
        )?;
    }

    let products = sample_products(options.messages.max(1));
    let updates = sample_updates(&products);
    for product in &products {
        publisher.publish_json(DEFAULT_EXCHANGE, UPLOAD_QUEUE, product)?;
    }
    for update in &updates {
        publisher.publish_json(DEFAULT_EXCHANGE, INVENTORY_QUEUE, update)?;
    }
    info!(products = products.len(), updates = updates.len(), "uploads queued");

    // image + ai + seo + one listing per marketplace, then the sync service
    // plus each marketplace an update targets
    let expected = products.len() * (3 + MARKETPLACES.len())
        + updates.iter().map(|u| 1 + u.targets().len()).sum::<usize>();
    let handled = collector.finish(expected).await;
    drop(keep_open);
    handled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_come_from_title_and_category() {
        let product = Product {
            id: "p".into(),
            title: "Smart Home Camera".into(),
            category: "Home".into(),
            price: 1.0,
            status: "uploaded".into(),
            keywords: Vec::new(),
        };
        assert_eq!(keywords(&product), ["smart", "home", "camera"]);
    }

    #[test]
    fn first_update_goes_everywhere() {
        let updates = sample_updates(&sample_products(3));
        assert_eq!(updates[0].targets(), MARKETPLACES);
        assert_eq!(updates[1].targets(), ["amazon"]);
        assert_eq!(updates[2].targets(), ["trendyol"]);
    }
}

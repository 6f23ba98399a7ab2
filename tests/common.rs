#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;
use tokio::time::timeout;

use warren::{Consumer, Delivery};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = warren::logging::init_logging("warn");
    });
}

/// Next delivery, failing the test if none arrives within a second.
pub async fn next(consumer: &mut Consumer) -> Delivery {
    timeout(Duration::from_secs(1), consumer.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("consumer stream ended")
}

/// Asserts nothing is delivered for a short while.
pub async fn assert_idle(consumer: &mut Consumer) {
    if let Ok(Some(delivery)) = timeout(Duration::from_millis(50), consumer.recv()).await {
        panic!("unexpected delivery: {delivery:?}");
    }
}

pub fn body(delivery: &Delivery) -> String {
    delivery.message().payload_str().into_owned()
}

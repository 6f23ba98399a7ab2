use bytes::Bytes;
use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

/// Content type the tutorial services stamp on their JSON bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Publisher-supplied metadata carried unchanged to every queue copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub persistent: bool,
    /// Milliseconds since the Unix epoch at publish time.
    pub timestamp: u64,
}

/// Why a message left a queue without being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathReason {
    /// Nacked with `requeue = false`.
    Rejected,
    /// Dropped from the head by a `max_length` overflow.
    MaxLength,
}

/// Dead-letter bookkeeping attached to a republished message, one record per
/// queue and reason it died for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    pub queue: String,
    pub reason: DeathReason,
    /// How many times the message died in `queue` for `reason`.
    pub count: u32,
    pub original_exchange: String,
    pub original_routing_key: String,
}

/// An immutable published message. Queues share it through `Arc`; per-queue
/// state (position, redelivery) lives in the queue entry, not here.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: u64,
    pub exchange: String,
    pub routing_key: String,
    pub payload: Bytes,
    pub properties: MessageProperties,
    /// Most recent death first. Empty for messages that never died.
    pub deaths: Vec<DeathRecord>,
}

impl Message {
    pub fn new(
        id: u64,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<Bytes>,
        properties: MessageProperties,
    ) -> Self {
        Self {
            id,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            payload: payload.into(),
            properties,
            deaths: Vec::new(),
        }
    }

    /// Lossy UTF-8 view of the payload, for logging.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn last_death(&self) -> Option<&DeathRecord> {
        self.deaths.first()
    }

    pub fn died_in(&self, queue: &str, reason: DeathReason) -> bool {
        self.deaths
            .iter()
            .any(|d| d.queue == queue && d.reason == reason)
    }

    /// Builds the copy that gets republished to a dead-letter exchange.
    pub(crate) fn dead_lettered(
        &self,
        id: u64,
        queue: &str,
        reason: DeathReason,
        exchange: &str,
        routing_key: Option<&str>,
    ) -> Message {
        let (original_exchange, original_routing_key) = match self.deaths.last() {
            Some(first) => (
                first.original_exchange.clone(),
                first.original_routing_key.clone(),
            ),
            None => (self.exchange.clone(), self.routing_key.clone()),
        };

        let mut deaths = self.deaths.clone();
        let record = match deaths
            .iter()
            .position(|d| d.queue == queue && d.reason == reason)
        {
            Some(idx) => {
                let mut record = deaths.remove(idx);
                record.count += 1;
                record
            }
            None => DeathRecord {
                queue: queue.to_owned(),
                reason,
                count: 1,
                original_exchange,
                original_routing_key,
            },
        };
        deaths.insert(0, record);

        Message {
            id,
            exchange: exchange.to_owned(),
            routing_key: routing_key.unwrap_or(&self.routing_key).to_owned(),
            payload: self.payload.clone(),
            properties: self.properties.clone(),
            deaths,
        }
    }
}

pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

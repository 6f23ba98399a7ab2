use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Broker-wide counters. Coarse-grained and owned by one broker instance, so
/// brokers created side by side (one per test) never share numbers.
#[derive(Debug, Default)]
pub struct Stats {
    published: AtomicU64,
    routed: AtomicU64,
    unroutable_dropped: AtomicU64,
    unroutable_returned: AtomicU64,
    delivered: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    discarded: AtomicU64,
}

/// A copy of [`Stats`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub published: u64,
    /// Queue copies enqueued; a fanout to three queues counts three.
    pub routed: u64,
    pub unroutable_dropped: u64,
    pub unroutable_returned: u64,
    pub delivered: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub discarded: u64,
}

impl Stats {
    #[inline]
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn record_routed(&self, copies: usize) {
        self.routed.fetch_add(copies as u64, Ordering::Relaxed);
    }
    #[inline]
    pub fn record_unroutable_dropped(&self) {
        self.unroutable_dropped.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn record_unroutable_returned(&self) {
        self.unroutable_returned.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn record_delivered(&self, n: usize) {
        self.delivered.fetch_add(n as u64, Ordering::Relaxed);
    }
    #[inline]
    pub fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn record_requeued(&self, n: usize) {
        self.requeued.fetch_add(n as u64, Ordering::Relaxed);
    }
    #[inline]
    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn record_discarded(&self, n: usize) {
        self.discarded.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BrokerStats {
        BrokerStats {
            published: self.published.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
            unroutable_dropped: self.unroutable_dropped.load(Ordering::Relaxed),
            unroutable_returned: self.unroutable_returned.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl BrokerStats {
    /// Prometheus-style text, one counter per line.
    pub fn render(&self) -> String {
        format!(
            "warren_published {}\nwarren_routed {}\nwarren_unroutable_dropped {}\nwarren_unroutable_returned {}\nwarren_delivered {}\nwarren_acked {}\nwarren_requeued {}\nwarren_dead_lettered {}\nwarren_discarded {}\n",
            self.published,
            self.routed,
            self.unroutable_dropped,
            self.unroutable_returned,
            self.delivered,
            self.acked,
            self.requeued,
            self.dead_lettered,
            self.discarded,
        )
    }
}

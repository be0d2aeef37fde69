use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide relay counters, rendered for `/metrics/prometheus`.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    pub offers_published: AtomicU64,
    pub answers_published: AtomicU64,
    pub candidates_pushed: AtomicU64,
    pub barcodes_published: AtomicU64,
    pub barcodes_consumed: AtomicU64,
    pub barcodes_stale: AtomicU64,
    pub frames_published: AtomicU64,
    pub frames_served: AtomicU64,
    pub frames_stale: AtomicU64,
    pub sessions_created: AtomicU64,
    pub sessions_closed: AtomicU64,
    pub rate_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub offers_published: u64,
    pub answers_published: u64,
    pub candidates_pushed: u64,
    pub barcodes_published: u64,
    pub barcodes_consumed: u64,
    pub barcodes_stale: u64,
    pub frames_published: u64,
    pub frames_served: u64,
    pub frames_stale: u64,
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub rate_limited: u64,
}

pub fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RelayMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            offers_published: load(&self.offers_published),
            answers_published: load(&self.answers_published),
            candidates_pushed: load(&self.candidates_pushed),
            barcodes_published: load(&self.barcodes_published),
            barcodes_consumed: load(&self.barcodes_consumed),
            barcodes_stale: load(&self.barcodes_stale),
            frames_published: load(&self.frames_published),
            frames_served: load(&self.frames_served),
            frames_stale: load(&self.frames_stale),
            sessions_created: load(&self.sessions_created),
            sessions_closed: load(&self.sessions_closed),
            rate_limited: load(&self.rate_limited),
        }
    }

    pub fn render_prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("offers_published", "SDP offers stored", s.offers_published),
            ("answers_published", "SDP answers stored", s.answers_published),
            ("candidates_pushed", "ICE candidates appended", s.candidates_pushed),
            ("barcodes_published", "Barcodes published by phones", s.barcodes_published),
            ("barcodes_consumed", "Barcodes delivered to kiosks", s.barcodes_consumed),
            ("barcodes_stale", "Barcodes dropped as stale on read", s.barcodes_stale),
            ("frames_published", "Video frames published", s.frames_published),
            ("frames_served", "Video frames served", s.frames_served),
            ("frames_stale", "Video frames dropped as stale on read", s.frames_stale),
            ("sessions_created", "Checkout sessions opened", s.sessions_created),
            ("sessions_closed", "Checkout sessions torn down", s.sessions_closed),
            ("rate_limited", "Requests rejected by the rate limiter", s.rate_limited),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP checkout_gateway_{name}_total {help}");
            let _ = writeln!(out, "# TYPE checkout_gateway_{name}_total counter");
            let _ = writeln!(out, "checkout_gateway_{name}_total {value}");
        }
        out
    }
}

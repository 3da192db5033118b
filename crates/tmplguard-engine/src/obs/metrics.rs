//! In-process metrics registry.
//!
//! Counter, gauge and histogram families with dynamic labels backed by
//! `DashMap`. Label sets are sorted so each series has one key. Histogram
//! buckets are fixed in microseconds.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

type LabelKey = Vec<(String, String)>;

fn key_of(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn label_str(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        let counter = self.map.entry(key_of(labels)).or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(v, Ordering::Relaxed);
    }

    /// Current value of one series (0 if never touched).
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&key_of(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, label_str(r.key()), val);
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<LabelKey, AtomicI64>,
}

impl GaugeVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn dec(&self, labels: &[(&str, &str)]) {
        self.add(labels, -1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        let gauge = self.map.entry(key_of(labels)).or_insert_with(|| AtomicI64::new(0));
        gauge.fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.map
            .get(&key_of(labels))
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, label_str(r.key()), val);
        }
    }
}

// 100us .. 5s
const BUCKETS_MICROS: [u64; 10] = [
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 5_000_000,
];

#[derive(Default)]
struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; 10],
}

#[derive(Default)]
pub struct HistogramVec {
    map: DashMap<LabelKey, AtomicHistogram>,
}

impl HistogramVec {
    /// Record one observation into the cumulative buckets.
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let hist = self.map.entry(key_of(labels)).or_default();
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(micros, Ordering::Relaxed);
        for (i, &b) in BUCKETS_MICROS.iter().enumerate() {
            if micros <= b {
                hist.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&key_of(labels))
            .map(|h| h.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Bucket bounds (`le`) are integer microseconds.
    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for r in self.map.iter() {
            let hist = r.value();
            let labels = label_str(r.key());
            let prefix = if labels.is_empty() {
                String::new()
            } else {
                format!("{},", labels)
            };

            for (i, &le) in BUCKETS_MICROS.iter().enumerate() {
                let count = hist.buckets[i].load(Ordering::Relaxed);
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, count);
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);

            let sum = hist.sum.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_sum{{{}}} {}", name, labels, sum);
            let _ = writeln!(out, "{}_count{{{}}} {}", name, labels, count);
        }
    }
}

#[derive(Default)]
pub struct RenderMetrics {
    /// By outcome: `success` or an error code.
    pub renders_total: CounterVec,
    /// By gate: `permission`, `rate_limit`, `validation`, `context`, `parse`, `sandbox`.
    pub gate_rejections: CounterVec,
    pub renders_in_flight: GaugeVec,
    pub render_duration: HistogramVec,
    /// By cache (`validation`, `include`) and result (`hit`, `miss`).
    pub cache_events: CounterVec,
}

impl RenderMetrics {
    pub fn cache_event(&self, cache: &str, result: &str) {
        self.cache_events.inc(&[("cache", cache), ("result", result)]);
    }

    pub fn gate_rejected(&self, gate: &str) {
        self.gate_rejections.inc(&[("gate", gate)]);
    }

    /// Prometheus text exposition of every family, plus caller-supplied lines.
    pub fn render(&self, extra: &[(&str, u64)]) -> String {
        let mut out = String::new();
        self.renders_total.render("tmplguard_renders_total", &mut out);
        self.gate_rejections.render("tmplguard_gate_rejections_total", &mut out);
        self.renders_in_flight.render("tmplguard_renders_in_flight", &mut out);
        self.render_duration.render("tmplguard_render_duration_micros", &mut out);
        self.cache_events.render("tmplguard_cache_events_total", &mut out);
        for (k, v) in extra {
            let _ = writeln!(out, "{} {}", k, v);
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn label_order_does_not_split_series() {
        let m = RenderMetrics::default();
        m.cache_events.inc(&[("cache", "include"), ("result", "hit")]);
        m.cache_events.inc(&[("result", "hit"), ("cache", "include")]);
        m.cache_event("include", "hit");
        assert_eq!(m.cache_events.get(&[("cache", "include"), ("result", "hit")]), 3);
    }

    #[test]
    fn exposition_format() {
        let m = RenderMetrics::default();
        m.renders_total.inc(&[("outcome", "success")]);
        m.render_duration.observe(&[], Duration::from_micros(700));
        let text = m.render(&[("tmplguard_validation_cache_entries", 4)]);

        assert!(text.contains("tmplguard_renders_total{outcome=\"success\"} 1"));
        assert!(text.contains("tmplguard_render_duration_micros_bucket{le=\"500\"} 0"));
        assert!(text.contains("tmplguard_render_duration_micros_bucket{le=\"1000\"} 1"));
        assert!(text.contains("tmplguard_render_duration_micros_sum{} 700"));
        assert!(text.ends_with("tmplguard_validation_cache_entries 4\n"));
    }
}

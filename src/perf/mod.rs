//! Performance monitor: rolling sample buffers, hourly snapshots, and
//! cooldown-gated alert rules.
//!
//! Grounded on the teacher's `CacheMetrics`/`invalidation` tracking in
//! `enterprise/cache/invalidation.rs` (ring-buffer sampling with a hard cap)
//! and its alert-sink injection pattern from `enterprise/eventsource/saga.rs`
//! (compensations fire through an injected handler rather than a concrete
//! transport).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Hard cap per sample buffer (spec §4.7).
pub const MAX_SAMPLES: usize = 10_000;
/// Time-based retention window for samples.
pub const RETENTION: ChronoDuration = ChronoDuration::hours(24);

/// One recorded query execution.
#[derive(Debug, Clone)]
pub struct QuerySample {
    /// When the query completed.
    pub at: DateTime<Utc>,
    /// How long it took.
    pub duration: Duration,
    /// Whether the query cache was hit.
    pub cache_hit: bool,
    /// Whether the query failed.
    pub errored: bool,
}

/// One recorded storage operation (WAL write, compaction, etc).
#[derive(Debug, Clone)]
pub struct StorageSample {
    /// When the operation completed.
    pub at: DateTime<Utc>,
    /// How long it took.
    pub duration: Duration,
    /// Whether it failed.
    pub errored: bool,
}

/// One recorded system resource reading.
#[derive(Debug, Clone)]
pub struct SystemSample {
    /// When the reading was taken.
    pub at: DateTime<Utc>,
    /// Fraction of configured memory budget in use, 0.0-1.0.
    pub memory_fraction: f64,
}

struct RingBuffer<T> {
    items: VecDeque<T>,
}

impl<T> RingBuffer<T> {
    fn new() -> Self {
        Self { items: VecDeque::new() }
    }

    fn push(&mut self, item: T) {
        self.items.push_back(item);
        if self.items.len() > MAX_SAMPLES {
            self.items.pop_front();
        }
    }

    fn retain_since(&mut self, cutoff: DateTime<Utc>, at: impl Fn(&T) -> DateTime<Utc>) {
        while let Some(front) = self.items.front() {
            if at(front) < cutoff {
                self.items.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Aggregated view over the last hour of samples.
#[derive(Debug, Clone, Default)]
pub struct PerfSnapshot {
    /// Fraction of queries in the window that errored, 0.0-1.0.
    pub error_rate: f64,
    /// Average query duration in the window.
    pub average_query_time: Duration,
    /// Fraction of queries served from the query cache, 0.0-1.0.
    pub cache_hit_rate: f64,
    /// Most recent memory fraction reading, or 0.0 if none.
    pub memory_fraction: f64,
    /// Number of query samples the snapshot was computed over.
    pub query_sample_count: usize,
}

/// A user-registered predicate over a [`PerfSnapshot`], fired at most once
/// per `cooldown`.
pub struct AlertRule {
    /// Human-readable name, included in the emitted alert.
    pub name: String,
    /// Fires when this returns true for a snapshot.
    pub predicate: Box<dyn Fn(&PerfSnapshot) -> bool + Send + Sync>,
    /// Minimum time between firings of this rule.
    pub cooldown: Duration,
    last_fired: Mutex<Option<DateTime<Utc>>>,
}

impl AlertRule {
    /// Build a named rule with the given predicate and cooldown.
    pub fn new(
        name: impl Into<String>,
        cooldown: Duration,
        predicate: impl Fn(&PerfSnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            cooldown,
            last_fired: Mutex::new(None),
        }
    }

    fn try_fire(&self, snapshot: &PerfSnapshot, now: DateTime<Utc>) -> Option<AlertEvent> {
        if !(self.predicate)(snapshot) {
            return None;
        }
        let mut last_fired = self.last_fired.lock();
        if let Some(last) = *last_fired {
            if now - last < ChronoDuration::from_std(self.cooldown).unwrap_or(ChronoDuration::zero()) {
                return None;
            }
        }
        *last_fired = Some(now);
        Some(AlertEvent {
            rule_name: self.name.clone(),
            at: now,
        })
    }
}

/// Emitted when an [`AlertRule`] fires outside its cooldown.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    /// Name of the rule that fired.
    pub rule_name: String,
    /// When it fired.
    pub at: DateTime<Utc>,
}

/// Receives fired alerts. Transport (log, webhook, pager) is external.
pub trait AlertSink: Send + Sync {
    /// Handle one fired alert.
    fn emit(&self, event: AlertEvent);
}

/// Default sink: logs via `tracing::warn!`.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, event: AlertEvent) {
        tracing::warn!(rule = %event.rule_name, at = %event.at, "performance alert fired");
    }
}

/// Owns the rolling sample buffers and registered alert rules.
pub struct PerfMonitor {
    queries: Mutex<RingBuffer<QuerySample>>,
    storage: Mutex<RingBuffer<StorageSample>>,
    system: Mutex<RingBuffer<SystemSample>>,
    rules: Vec<AlertRule>,
    sink: Box<dyn AlertSink>,
}

impl PerfMonitor {
    /// Build a monitor with the four default alert rules (spec §4.7) and
    /// the given alert sink.
    pub fn new(sink: Box<dyn AlertSink>) -> Self {
        Self {
            queries: Mutex::new(RingBuffer::new()),
            storage: Mutex::new(RingBuffer::new()),
            system: Mutex::new(RingBuffer::new()),
            rules: default_rules(),
            sink,
        }
    }

    /// Build a monitor with a custom rule set and sink, bypassing the
    /// defaults.
    pub fn with_rules(sink: Box<dyn AlertSink>, rules: Vec<AlertRule>) -> Self {
        Self {
            queries: Mutex::new(RingBuffer::new()),
            storage: Mutex::new(RingBuffer::new()),
            system: Mutex::new(RingBuffer::new()),
            rules,
            sink,
        }
    }

    /// Record a completed query.
    pub fn record_query(&self, sample: QuerySample) {
        self.queries.lock().push(sample);
    }

    /// Record a completed storage operation.
    pub fn record_storage(&self, sample: StorageSample) {
        self.storage.lock().push(sample);
    }

    /// Record a system resource reading.
    pub fn record_system(&self, sample: SystemSample) {
        self.system.lock().push(sample);
    }

    fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now - RETENTION;
        self.queries.lock().retain_since(cutoff, |s| s.at);
        self.storage.lock().retain_since(cutoff, |s| s.at);
        self.system.lock().retain_since(cutoff, |s| s.at);
    }

    /// Aggregate the last hour of samples into a snapshot, pruning entries
    /// older than the 24h retention window first.
    pub fn snapshot(&self, now: DateTime<Utc>) -> PerfSnapshot {
        self.prune(now);
        let window_start = now - ChronoDuration::hours(1);

        let queries = self.queries.lock();
        let recent: Vec<&QuerySample> = queries.items.iter().filter(|s| s.at >= window_start).collect();

        let query_sample_count = recent.len();
        let error_rate = if recent.is_empty() {
            0.0
        } else {
            recent.iter().filter(|s| s.errored).count() as f64 / recent.len() as f64
        };
        let average_query_time = if recent.is_empty() {
            Duration::ZERO
        } else {
            let total: Duration = recent.iter().map(|s| s.duration).sum();
            total / recent.len() as u32
        };
        let cache_hit_rate = if recent.is_empty() {
            0.0
        } else {
            recent.iter().filter(|s| s.cache_hit).count() as f64 / recent.len() as f64
        };
        drop(queries);

        let memory_fraction = self
            .system
            .lock()
            .items
            .iter()
            .filter(|s| s.at >= window_start)
            .last()
            .map(|s| s.memory_fraction)
            .unwrap_or(0.0);

        PerfSnapshot {
            error_rate,
            average_query_time,
            cache_hit_rate,
            memory_fraction,
            query_sample_count,
        }
    }

    /// Evaluate every registered rule against `snapshot`, emitting through
    /// the sink for each rule that fires outside its cooldown.
    pub fn evaluate_rules(&self, snapshot: &PerfSnapshot, now: DateTime<Utc>) {
        for rule in &self.rules {
            if let Some(event) = rule.try_fire(snapshot, now) {
                self.sink.emit(event);
            }
        }
    }
}

fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new("error-rate-high", Duration::from_secs(300), |s| s.error_rate > 0.05),
        AlertRule::new("query-time-high", Duration::from_secs(300), |s| {
            s.average_query_time > Duration::from_secs(1)
        }),
        AlertRule::new("memory-high", Duration::from_secs(300), |s| s.memory_fraction > 0.90),
        AlertRule::new("cache-hit-rate-low", Duration::from_secs(300), |s| {
            s.query_sample_count > 0 && s.cache_hit_rate < 0.70
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);
    impl AlertSink for CountingSink {
        fn emit(&self, _event: AlertEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn snapshot_computes_error_rate_over_recent_window() {
        let monitor = PerfMonitor::new(Box::new(TracingAlertSink));
        let now = Utc::now();
        monitor.record_query(QuerySample { at: now, duration: Duration::from_millis(10), cache_hit: false, errored: true });
        monitor.record_query(QuerySample { at: now, duration: Duration::from_millis(10), cache_hit: false, errored: false });

        let snapshot = monitor.snapshot(now);
        assert_eq!(snapshot.error_rate, 0.5);
    }

    #[test]
    fn samples_older_than_retention_are_pruned() {
        let monitor = PerfMonitor::new(Box::new(TracingAlertSink));
        let now = Utc::now();
        let old = now - ChronoDuration::hours(25);
        monitor.record_query(QuerySample { at: old, duration: Duration::from_millis(1), cache_hit: true, errored: false });

        monitor.snapshot(now);
        assert_eq!(monitor.queries.lock().items.len(), 0);
    }

    #[test]
    fn alert_rule_respects_cooldown() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink(count.clone());
        let monitor = PerfMonitor::with_rules(
            Box::new(sink),
            vec![AlertRule::new("always", Duration::from_secs(3600), |_| true)],
        );
        let now = Utc::now();
        let snapshot = monitor.snapshot(now);
        monitor.evaluate_rules(&snapshot, now);
        monitor.evaluate_rules(&snapshot, now + ChronoDuration::seconds(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_rules_fire_on_low_cache_hit_rate() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink(count.clone());
        let monitor = PerfMonitor::new(Box::new(sink));
        let now = Utc::now();
        for _ in 0..10 {
            monitor.record_query(QuerySample { at: now, duration: Duration::from_millis(1), cache_hit: false, errored: false });
        }
        let snapshot = monitor.snapshot(now);
        monitor.evaluate_rules(&snapshot, now);
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}

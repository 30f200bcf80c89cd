//! Execution bookkeeping: counters, per-fingerprint health, ring buffers,
//! alerts, and the circuit-breaker gate.
//!
//! Nothing in here returns an error to the caller. Recording is best effort.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

use super::ResolutionSource;
use super::breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
use crate::config::{BreakerConfig, MonitorConfig};
use crate::util::text::{collapse_whitespace, fingerprint};

const SQL_PREVIEW_CHARS: usize = 200;
const MIN_SAMPLES_FOR_RATE_ALERT: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CircuitOpened,
    VerySlowQuery,
    HighFailureRate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub fingerprint: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

pub type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

/// One execution attempt, as reported by the resolver.
#[derive(Debug, Clone)]
pub struct ExecutionRecord<'a> {
    pub sql: &'a str,
    pub source: ResolutionSource,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<&'a str>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryHealth {
    pub fingerprint: String,
    pub sql_preview: String,
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
    pub last_executed: DateTime<Utc>,
    pub last_error: Option<String>,
    #[serde(skip)]
    total_ms: u64,
}

impl QueryHealth {
    fn new(fingerprint: &str, sql: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            sql_preview: preview(sql),
            total: 0,
            successes: 0,
            failures: 0,
            min_ms: u64::MAX,
            max_ms: 0,
            avg_ms: 0.0,
            last_executed: Utc::now(),
            last_error: None,
            total_ms: 0,
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failures as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlowQuery {
    pub fingerprint: String,
    pub sql_preview: String,
    pub duration_ms: u64,
    pub source: ResolutionSource,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub fingerprint: String,
    pub sql_preview: String,
    pub error: String,
    pub source: ResolutionSource,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    at: DateTime<Utc>,
    duration_ms: u64,
    success: bool,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct MonitorStats {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub slow_queries: u64,
    pub very_slow_queries: u64,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
    pub by_source: BTreeMap<String, u64>,
    pub tracked_fingerprints: usize,
    pub open_circuits: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourlyBucket {
    pub hour: DateTime<Utc>,
    pub executions: u64,
    pub failures: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub summary: MonitorStats,
    pub top_slow: Vec<QueryHealth>,
    pub problematic: Vec<QueryHealth>,
    pub recent_errors: Vec<ErrorEntry>,
    pub circuits: Vec<CircuitSnapshot>,
    pub hourly: Vec<HourlyBucket>,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_ms: AtomicU64,
    slow: AtomicU64,
    very_slow: AtomicU64,
    by_source: [AtomicU64; ResolutionSource::ALL.len()],
}

pub struct QueryMonitor {
    config: MonitorConfig,
    breaker: CircuitBreaker,
    counters: Counters,
    health: DashMap<String, Mutex<QueryHealth>>,
    slow: Mutex<VecDeque<SlowQuery>>,
    errors: Mutex<VecDeque<ErrorEntry>>,
    history: Mutex<VecDeque<HistoryEntry>>,
    callbacks: RwLock<Vec<AlertCallback>>,
}

fn preview(sql: &str) -> String {
    collapse_whitespace(sql).chars().take(SQL_PREVIEW_CHARS).collect()
}

fn push_bounded<T>(ring: &Mutex<VecDeque<T>>, item: T, capacity: usize) {
    let mut ring = ring.lock();
    ring.push_back(item);
    while ring.len() > capacity.max(1) {
        ring.pop_front();
    }
}

impl QueryMonitor {
    pub fn new(config: MonitorConfig, breaker: &BreakerConfig) -> Self {
        Self::with_breaker(config, CircuitBreaker::new(breaker))
    }

    pub fn with_breaker(config: MonitorConfig, breaker: CircuitBreaker) -> Self {
        Self {
            config,
            breaker,
            counters: Counters::default(),
            health: DashMap::new(),
            slow: Mutex::new(VecDeque::new()),
            errors: Mutex::new(VecDeque::new()),
            history: Mutex::new(VecDeque::new()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn add_alert_callback<F>(&self, callback: F)
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Whether `sql` may run now. False only while its circuit is open.
    pub fn is_query_allowed(&self, sql: &str) -> bool {
        let fp = fingerprint(sql);
        let allowed = !self.breaker.is_open(&fp);
        if !allowed {
            debug!(fingerprint = %fp, "Execution blocked by open circuit");
        }
        allowed
    }

    /// Records one execution attempt. Called after every attempt, whatever
    /// the source or outcome.
    pub fn record_execution(&self, record: ExecutionRecord<'_>) {
        let fp = fingerprint(record.sql);
        let now = Utc::now();
        let mut alerts = Vec::new();

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_ms
            .fetch_add(record.duration_ms, Ordering::Relaxed);
        self.counters.by_source[record.source.index()].fetch_add(1, Ordering::Relaxed);
        if record.success {
            self.counters.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }

        self.update_health(&fp, &record, now, &mut alerts);

        if record.duration_ms > self.config.slow_query_ms {
            self.counters.slow.fetch_add(1, Ordering::Relaxed);
            push_bounded(
                &self.slow,
                SlowQuery {
                    fingerprint: fp.clone(),
                    sql_preview: preview(record.sql),
                    duration_ms: record.duration_ms,
                    source: record.source,
                    at: now,
                },
                self.config.ring_size,
            );
            if record.duration_ms > self.config.very_slow_query_ms {
                self.counters.very_slow.fetch_add(1, Ordering::Relaxed);
                alerts.push(Alert {
                    kind: AlertKind::VerySlowQuery,
                    fingerprint: fp.clone(),
                    message: format!("Query took {} ms", record.duration_ms),
                    at: now,
                });
            }
        }

        if !record.success {
            push_bounded(
                &self.errors,
                ErrorEntry {
                    fingerprint: fp.clone(),
                    sql_preview: preview(record.sql),
                    error: record.error.unwrap_or("unknown error").to_string(),
                    source: record.source,
                    at: now,
                },
                self.config.ring_size,
            );
        }

        push_bounded(
            &self.history,
            HistoryEntry {
                at: now,
                duration_ms: record.duration_ms,
                success: record.success,
            },
            self.config.history_size,
        );

        let transition = if record.success {
            self.breaker.record_success(&fp)
        } else {
            self.breaker.record_failure(&fp)
        };
        if let Some(transition) = transition {
            if transition.to == CircuitState::Open {
                alerts.push(Alert {
                    kind: AlertKind::CircuitOpened,
                    fingerprint: fp.clone(),
                    message: format!("Circuit opened (was {})", transition.from),
                    at: now,
                });
            }
        }

        debug!(
            fingerprint = %fp,
            source = record.source.as_str(),
            success = record.success,
            rows = record.row_count,
            duration_ms = record.duration_ms,
            "Recorded execution"
        );
        for alert in alerts {
            self.dispatch(&alert);
        }
    }

    fn update_health(
        &self,
        fp: &str,
        record: &ExecutionRecord<'_>,
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) {
        if !self.health.contains_key(fp) && self.health.len() >= self.config.max_tracked_queries.max(1) {
            self.evict_health();
        }
        let entry = self
            .health
            .entry(fp.to_string())
            .or_insert_with(|| Mutex::new(QueryHealth::new(fp, record.sql)));
        let mut health = entry.lock();

        let rate_before = health.failure_rate();
        health.total += 1;
        health.total_ms += record.duration_ms;
        health.min_ms = health.min_ms.min(record.duration_ms);
        health.max_ms = health.max_ms.max(record.duration_ms);
        health.avg_ms = health.total_ms as f64 / health.total as f64;
        health.last_executed = now;
        if record.success {
            health.successes += 1;
        } else {
            health.failures += 1;
            health.last_error = record.error.map(str::to_string);
        }

        let rate_after = health.failure_rate();
        if health.total >= MIN_SAMPLES_FOR_RATE_ALERT
            && rate_after > self.config.high_failure_rate
            && (rate_before <= self.config.high_failure_rate
                || health.total == MIN_SAMPLES_FOR_RATE_ALERT)
        {
            alerts.push(Alert {
                kind: AlertKind::HighFailureRate,
                fingerprint: fp.to_string(),
                message: format!(
                    "Failure rate {:.0}% over {} executions",
                    rate_after * 100.0,
                    health.total
                ),
                at: now,
            });
        }
    }

    /// Drops health records until nine tenths of the capacity is in use.
    /// Healthy records go first, least recently executed first.
    fn evict_health(&self) {
        let capacity = self.config.max_tracked_queries.max(1);
        let keep = (capacity * 9 / 10).min(capacity - 1);
        let excess = self.health.len().saturating_sub(keep);
        let mut candidates: Vec<(bool, DateTime<Utc>, String)> = self
            .health
            .iter()
            .map(|entry| {
                let health = entry.value().lock();
                let troubled = health.failure_rate() > self.config.high_failure_rate;
                (troubled, health.last_executed, entry.key().clone())
            })
            .collect();
        candidates.sort();

        for (_, _, fp) in candidates.into_iter().take(excess) {
            self.health.remove(&fp);
        }
        debug!(evicted = excess, "Evicted old query health records");
    }

    fn dispatch(&self, alert: &Alert) {
        warn!(kind = ?alert.kind, fingerprint = %alert.fingerprint, "{}", alert.message);
        let callbacks: Vec<AlertCallback> = self.callbacks.read().clone();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(alert))).is_err() {
                error!("Alert callback panicked; ignoring");
            }
        }
    }

    pub fn get_stats(&self) -> MonitorStats {
        let total = self.counters.total.load(Ordering::Relaxed);
        let successes = self.counters.successes.load(Ordering::Relaxed);
        let total_ms = self.counters.total_ms.load(Ordering::Relaxed);
        let by_source = ResolutionSource::ALL
            .iter()
            .map(|source| {
                (
                    source.as_str().to_string(),
                    self.counters.by_source[source.index()].load(Ordering::Relaxed),
                )
            })
            .collect();

        MonitorStats {
            total_queries: total,
            successful_queries: successes,
            failed_queries: self.counters.failures.load(Ordering::Relaxed),
            slow_queries: self.counters.slow.load(Ordering::Relaxed),
            very_slow_queries: self.counters.very_slow.load(Ordering::Relaxed),
            avg_duration_ms: if total == 0 { 0.0 } else { total_ms as f64 / total as f64 },
            success_rate: if total == 0 { 1.0 } else { successes as f64 / total as f64 },
            by_source,
            tracked_fingerprints: self.health.len(),
            open_circuits: self.breaker.tripped().len(),
        }
    }

    pub fn get_query_health(&self, fp: &str) -> Option<QueryHealth> {
        self.health.get(fp).map(|entry| entry.lock().clone())
    }

    fn all_health(&self) -> Vec<QueryHealth> {
        self.health.iter().map(|entry| entry.lock().clone()).collect()
    }

    pub fn recent_slow_queries(&self) -> Vec<SlowQuery> {
        self.slow.lock().iter().cloned().collect()
    }

    pub fn recent_errors(&self) -> Vec<ErrorEntry> {
        self.errors.lock().iter().cloned().collect()
    }

    pub fn get_dashboard(&self) -> Dashboard {
        let mut health = self.all_health();

        health.sort_by(|a, b| b.avg_ms.total_cmp(&a.avg_ms));
        let top_slow: Vec<QueryHealth> = health.iter().take(10).cloned().collect();

        let mut problematic: Vec<QueryHealth> = health
            .into_iter()
            .filter(|h| h.total >= 3 && h.failure_rate() > self.config.high_failure_rate)
            .collect();
        problematic.sort_by(|a, b| b.failure_rate().total_cmp(&a.failure_rate()));

        let recent_errors: Vec<ErrorEntry> = {
            let errors = self.errors.lock();
            errors.iter().rev().take(10).cloned().collect()
        };

        Dashboard {
            summary: self.get_stats(),
            top_slow,
            problematic,
            recent_errors,
            circuits: self.breaker.tripped(),
            hourly: self.hourly_trend(24),
        }
    }

    /// Executions bucketed by hour for the last `hours` hours, oldest first.
    pub fn hourly_trend(&self, hours: i64) -> Vec<HourlyBucket> {
        let cutoff = Utc::now() - ChronoDuration::hours(hours);
        let mut buckets: BTreeMap<DateTime<Utc>, (u64, u64, u64)> = BTreeMap::new();
        for entry in self.history.lock().iter().filter(|e| e.at >= cutoff) {
            let hour = entry
                .at
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(entry.at);
            let bucket = buckets.entry(hour).or_default();
            bucket.0 += 1;
            bucket.1 += u64::from(!entry.success);
            bucket.2 += entry.duration_ms;
        }
        buckets
            .into_iter()
            .map(|(hour, (executions, failures, total_ms))| HourlyBucket {
                hour,
                executions,
                failures,
                avg_ms: total_ms as f64 / executions.max(1) as f64,
            })
            .collect()
    }

    pub fn reset_circuit(&self, fp: &str) -> bool {
        self.breaker.reset(fp)
    }

    /// Drops per-fingerprint health, rings and circuits. Counters are kept.
    pub fn clear_history(&self) {
        self.health.clear();
        self.slow.lock().clear();
        self.errors.lock().clear();
        self.history.lock().clear();
        self.breaker.clear();
    }
}

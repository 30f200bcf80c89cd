use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    changed_at_wall: DateTime<Utc>,
    /// Set while one half-open trial is running.
    trial_started: Option<Instant>,
    last_seen: Instant,
}

impl Circuit {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
            opened_at_wall: None,
            changed_at_wall: Utc::now(),
            trial_started: None,
            last_seen: now,
        }
    }

    fn move_to(&mut self, to: CircuitState, now: Instant) -> Transition {
        let from = self.state;
        self.state = to;
        self.changed_at_wall = Utc::now();
        self.trial_started = None;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                self.opened_at_wall = Some(self.changed_at_wall);
                self.half_open_successes = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_successes = 0;
            }
            CircuitState::Closed => {
                self.opened_at = None;
                self.opened_at_wall = None;
                self.consecutive_failures = 0;
                self.half_open_successes = 0;
            }
        }
        Transition { from, to }
    }

    /// Admits the caller as the half-open trial unless another one is still
    /// running. A trial that never reported back expires after `timeout`.
    fn admit_trial(&mut self, now: Instant, timeout: Duration) -> bool {
        let busy = self
            .trial_started
            .is_some_and(|started| now.saturating_duration_since(started) < timeout);
        if !busy {
            self.trial_started = Some(now);
        }
        !busy
    }

    fn recovery_elapsed(&self, now: Instant, timeout: Duration) -> bool {
        self.opened_at
            .map(|opened| now.saturating_duration_since(opened) >= timeout)
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CircuitSnapshot {
    pub fingerprint: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub changed_at: DateTime<Utc>,
}

/// Per-fingerprint circuit breaker.
///
/// Closed opens after `failure_threshold` consecutive failures. Once
/// `recovery_timeout` has passed an open circuit reads as half-open and lets
/// one trial through at a time. `success_threshold` consecutive trial
/// successes close it; any trial failure re-opens it with a fresh timestamp.
///
/// At most `max_circuits` circuits are tracked. Past that, the least recently
/// seen closed circuits are dropped; open and half-open ones are kept.
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
    max_circuits: usize,
    circuits: DashMap<String, Arc<Mutex<Circuit>>>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self::with_timeout(
            config.failure_threshold,
            Duration::from_secs(config.recovery_timeout_secs),
            config.success_threshold,
        )
        .with_capacity(config.max_circuits)
    }

    pub fn with_timeout(failure_threshold: u32, recovery_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            recovery_timeout,
            max_circuits: BreakerConfig::default().max_circuits,
            circuits: DashMap::new(),
        }
    }

    pub fn with_capacity(mut self, max_circuits: usize) -> Self {
        self.max_circuits = max_circuits.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    fn existing(&self, fingerprint: &str) -> Option<Arc<Mutex<Circuit>>> {
        self.circuits.get(fingerprint).map(|entry| entry.value().clone())
    }

    fn circuit(&self, fingerprint: &str, now: Instant) -> Arc<Mutex<Circuit>> {
        if let Some(circuit) = self.existing(fingerprint) {
            return circuit;
        }
        if self.circuits.len() >= self.max_circuits {
            self.evict_closed();
        }
        self.circuits
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Circuit::new(now))))
            .value()
            .clone()
    }

    /// Drops closed circuits, least recently seen first, until nine tenths
    /// of the capacity is in use.
    fn evict_closed(&self) {
        let keep = (self.max_circuits * 9 / 10).min(self.max_circuits - 1);
        let excess = self.circuits.len().saturating_sub(keep);
        let mut closed: Vec<(String, Instant)> = self
            .circuits
            .iter()
            .filter_map(|entry| {
                let circuit = entry.value().lock();
                (circuit.state == CircuitState::Closed)
                    .then(|| (entry.key().clone(), circuit.last_seen))
            })
            .collect();
        closed.sort_by_key(|(_, seen)| *seen);

        let evicted = closed
            .into_iter()
            .take(excess)
            .filter(|(fingerprint, _)| {
                self.circuits
                    .remove_if(fingerprint, |_, c| c.lock().state == CircuitState::Closed)
                    .is_some()
            })
            .count();
        if evicted > 0 {
            debug!(evicted, remaining = self.circuits.len(), "Evicted idle closed circuits");
        }
    }

    pub fn is_open(&self, fingerprint: &str) -> bool {
        self.is_open_at(fingerprint, Instant::now())
    }

    pub fn is_open_at(&self, fingerprint: &str, now: Instant) -> bool {
        let Some(circuit) = self.existing(fingerprint) else {
            return false;
        };
        let mut circuit = circuit.lock();
        circuit.last_seen = now;
        match circuit.state {
            CircuitState::Open if circuit.recovery_elapsed(now, self.recovery_timeout) => {
                circuit.move_to(CircuitState::HalfOpen, now);
                circuit.trial_started = Some(now);
                info!(fingerprint, "Circuit half-open, allowing one trial");
                false
            }
            CircuitState::Open => true,
            CircuitState::HalfOpen => !circuit.admit_trial(now, self.recovery_timeout),
            CircuitState::Closed => false,
        }
    }

    pub fn record_success(&self, fingerprint: &str) -> Option<Transition> {
        self.record_success_at(fingerprint, Instant::now())
    }

    /// A success on a fingerprint without a circuit has nothing to reset and
    /// creates none.
    pub fn record_success_at(&self, fingerprint: &str, now: Instant) -> Option<Transition> {
        let circuit = self.existing(fingerprint)?;
        let mut circuit = circuit.lock();
        circuit.last_seen = now;
        circuit.trial_started = None;
        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
                None
            }
            CircuitState::Open => {
                if !circuit.recovery_elapsed(now, self.recovery_timeout) {
                    // the gate was bypassed; an early success proves nothing
                    return None;
                }
                circuit.move_to(CircuitState::HalfOpen, now);
                self.count_trial_success(fingerprint, &mut circuit, now)
            }
            CircuitState::HalfOpen => self.count_trial_success(fingerprint, &mut circuit, now),
        }
    }

    fn count_trial_success(&self, fingerprint: &str, circuit: &mut Circuit, now: Instant) -> Option<Transition> {
        circuit.half_open_successes += 1;
        if circuit.half_open_successes >= self.success_threshold {
            info!(fingerprint, "Circuit closed after successful trials");
            return Some(circuit.move_to(CircuitState::Closed, now));
        }
        None
    }

    pub fn record_failure(&self, fingerprint: &str) -> Option<Transition> {
        self.record_failure_at(fingerprint, Instant::now())
    }

    pub fn record_failure_at(&self, fingerprint: &str, now: Instant) -> Option<Transition> {
        let circuit = self.circuit(fingerprint, now);
        let mut circuit = circuit.lock();
        circuit.last_seen = now;
        circuit.trial_started = None;
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
        match circuit.state {
            CircuitState::Closed if circuit.consecutive_failures >= self.failure_threshold => {
                warn!(
                    fingerprint,
                    failures = circuit.consecutive_failures,
                    "Circuit opened"
                );
                Some(circuit.move_to(CircuitState::Open, now))
            }
            CircuitState::Closed => None,
            CircuitState::HalfOpen => {
                warn!(fingerprint, "Half-open trial failed, circuit re-opened");
                Some(circuit.move_to(CircuitState::Open, now))
            }
            CircuitState::Open if circuit.recovery_elapsed(now, self.recovery_timeout) => {
                Some(circuit.move_to(CircuitState::Open, now))
            }
            CircuitState::Open => None,
        }
    }

    pub fn state(&self, fingerprint: &str) -> CircuitState {
        self.existing(fingerprint)
            .map(|c| c.lock().state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, fingerprint: &str) -> Option<CircuitSnapshot> {
        let circuit = self.existing(fingerprint)?;
        let circuit = circuit.lock();
        Some(CircuitSnapshot {
            fingerprint: fingerprint.to_string(),
            state: circuit.state,
            consecutive_failures: circuit.consecutive_failures,
            half_open_successes: circuit.half_open_successes,
            opened_at: circuit.opened_at_wall,
            changed_at: circuit.changed_at_wall,
        })
    }

    /// Circuits that are not closed.
    pub fn tripped(&self) -> Vec<CircuitSnapshot> {
        let fingerprints: Vec<String> = self.circuits.iter().map(|e| e.key().clone()).collect();
        fingerprints
            .iter()
            .filter_map(|fp| self.snapshot(fp))
            .filter(|s| s.state != CircuitState::Closed)
            .collect()
    }

    /// Forces a circuit closed. Returns false for unknown fingerprints.
    pub fn reset(&self, fingerprint: &str) -> bool {
        match self.existing(fingerprint) {
            Some(circuit) => {
                circuit.lock().move_to(CircuitState::Closed, Instant::now());
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.circuits.clear();
    }
}

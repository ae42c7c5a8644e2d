//! Metrics, offenders and assertion thresholds for a single run
//!
//! The store is the one mutable shared resource of consequence: plugins,
//! the network tracker and the orchestrator all write into it, so every
//! mutation goes through a single internal mutex.

use crate::error::ProbeError;
use crate::events::{Event, EventBus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, Weak};
use std::time::Instant;
use tracing::{debug, warn};

/// A metric value: a number for anything measurable, a string for
/// identity-style metrics (generator version, final URL and the like).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Text(_) => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Number(value as f64)
    }
}

impl From<usize> for MetricValue {
    fn from(value: usize) -> Self {
        MetricValue::Number(value as f64)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

/// An absent numeric value normalizes to zero.
impl From<Option<f64>> for MetricValue {
    fn from(value: Option<f64>) -> Self {
        MetricValue::Number(value.unwrap_or(0.0))
    }
}

/// Sink every final metric is forwarded to, outside the report itself.
/// The default implementation streams to the log.
pub trait MetricSink: Send + Sync {
    fn publish(&self, name: &str, value: &MetricValue);
}

pub struct TracingSink;

impl MetricSink for TracingSink {
    fn publish(&self, name: &str, value: &MetricValue) {
        debug!(metric = name, ?value, "final metric");
    }
}

#[derive(Debug, Clone)]
struct MetricEntry {
    value: MetricValue,
    is_final: bool,
}

#[derive(Debug, Clone)]
pub struct Assert {
    pub metric: String,
    pub threshold: f64,
}

#[derive(Default)]
struct StoreInner {
    metrics: HashMap<String, MetricEntry>,
    // insertion order preserved for deterministic reports
    metric_order: Vec<String>,
    offenders: HashMap<String, Vec<String>>,
    asserts: Vec<Assert>,
    response_end: Option<Instant>,
}

pub struct MetricsStore {
    inner: Mutex<StoreInner>,
    sink: Box<dyn MetricSink>,
    // bus handlers hold Arc<MetricsStore>, so a strong pointer would cycle
    bus: OnceLock<Weak<EventBus>>,
}

impl MetricsStore {
    pub fn new(sink: Box<dyn MetricSink>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            sink,
            bus: OnceLock::new(),
        }
    }

    /// Wire the bus the store emits `metric` events on. Called once at setup.
    pub fn bind_bus(&self, bus: Weak<EventBus>) {
        let _ = self.bus.set(bus);
    }

    /// Store a metric. Last write wins. Finality is sticky: once a metric
    /// was declared final a later write keeps it final and is logged as a
    /// logic error. Every call with `is_final` notifies the metric stream.
    pub fn set_metric(&self, name: &str, value: impl Into<MetricValue>, is_final: bool) {
        let value = value.into();
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.metrics.get_mut(name) {
                Some(entry) => {
                    if entry.is_final && !is_final {
                        warn!(metric = name, "write after final");
                    }
                    entry.value = value.clone();
                    entry.is_final = entry.is_final || is_final;
                }
                None => {
                    inner.metric_order.push(name.to_string());
                    inner.metrics.insert(
                        name.to_string(),
                        MetricEntry {
                            value: value.clone(),
                            is_final,
                        },
                    );
                }
            }
        }

        if is_final {
            self.sink.publish(name, &value);
            if let Some(bus) = self.bus.get().and_then(Weak::upgrade) {
                bus.emit(&Event::Metric {
                    name: name.to_string(),
                    value,
                });
            }
        }
    }

    /// Add `incr` to a numeric metric, starting from zero when unset.
    /// The result is not marked final.
    pub fn incr_metric(&self, name: &str, incr: f64) {
        let current = self
            .get_metric(name)
            .and_then(|v| v.as_number())
            .unwrap_or(0.0);
        self.set_metric(name, current + incr, false);
    }

    /// Record the instant the last network response completed. Marker
    /// metrics measure elapsed time from this point.
    pub fn record_response_end(&self, at: Instant) {
        self.inner.lock().unwrap().response_end = Some(at);
    }

    pub fn response_end(&self) -> Option<Instant> {
        self.inner.lock().unwrap().response_end
    }

    /// Record `now - response_end` in milliseconds as a final metric.
    /// Fails when no response has completed yet; a marker can never
    /// produce a nonsensical negative duration.
    pub fn set_marker_metric(&self, name: &str) -> Result<f64, ProbeError> {
        let response_end = self
            .response_end()
            .ok_or_else(|| ProbeError::MarkerBeforeResponse(name.to_string()))?;
        let elapsed_ms = response_end.elapsed().as_secs_f64() * 1000.0;
        self.set_metric(name, elapsed_ms, true);
        Ok(elapsed_ms)
    }

    pub fn get_metric(&self, name: &str) -> Option<MetricValue> {
        self.inner
            .lock()
            .unwrap()
            .metrics
            .get(name)
            .map(|e| e.value.clone())
    }

    /// Metric names in first-write order.
    pub fn metric_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().metric_order.clone()
    }

    /// Append a human-readable diagnostic to the metric's offender list.
    pub fn add_offender(&self, metric: &str, message: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .offenders
            .entry(metric.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn offenders(&self, metric: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .offenders
            .get(metric)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_offenders(&self) -> HashMap<String, Vec<String>> {
        self.inner.lock().unwrap().offenders.clone()
    }

    pub fn set_assert(&self, metric: &str, threshold: f64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.asserts.iter_mut().find(|a| a.metric == metric) {
            existing.threshold = threshold;
        } else {
            inner.asserts.push(Assert {
                metric: metric.to_string(),
                threshold,
            });
        }
    }

    pub fn set_asserts(&self, asserts: &HashMap<String, f64>) {
        let mut names: Vec<&String> = asserts.keys().collect();
        names.sort();
        for name in names {
            self.set_assert(name, asserts[name]);
        }
    }

    /// Register an assert from a CLI-style `name=value` spec. Specs with an
    /// empty name or a non-numeric value are ignored.
    pub fn set_assert_spec(&self, spec: &str) {
        let Some((name, raw)) = spec.split_once('=') else {
            warn!(spec, "ignoring malformed assert spec");
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            warn!(spec, "ignoring assert spec with empty metric name");
            return;
        }
        match raw.trim().parse::<f64>() {
            Ok(threshold) => self.set_assert(name, threshold),
            Err(_) => warn!(spec, "ignoring assert spec with non-numeric threshold"),
        }
    }

    pub fn asserts(&self) -> Vec<Assert> {
        self.inner.lock().unwrap().asserts.clone()
    }

    /// Evaluate every registered assert against the metric's current value.
    ///
    /// Policy: an assert passes iff the metric exists, is numeric, and its
    /// value meets or exceeds the threshold. A metric with no recorded
    /// value fails. Failed names are returned in registration order.
    pub fn evaluate_asserts(&self) -> Vec<String> {
        let asserts = self.asserts();
        let mut failed = Vec::new();
        for assert in &asserts {
            let passed = self
                .get_metric(&assert.metric)
                .and_then(|v| v.as_number())
                .map(|v| v >= assert.threshold)
                .unwrap_or(false);
            if !passed {
                failed.push(assert.metric.clone());
            }
        }
        failed
    }
}

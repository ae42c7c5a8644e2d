//! Final run report
//!
//! Exactly one report is produced per run and written to a single output
//! sink: a file when configured, stdout otherwise.

use crate::error::ProbeError;
use crate::metrics::{MetricValue, MetricsStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct AssertOutcome {
    pub metric: String,
    pub threshold: f64,
    pub actual: Option<MetricValue>,
    pub passed: bool,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub generator: String,
    pub run_id: String,
    pub url: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub timed_out: bool,
    pub metrics: BTreeMap<String, MetricValue>,
    pub offenders: BTreeMap<String, Vec<String>>,
    pub asserts: Vec<AssertOutcome>,
}

impl Report {
    pub fn build(url: &str, store: &MetricsStore, timed_out: bool) -> Self {
        let metrics = store
            .metric_names()
            .into_iter()
            .filter_map(|name| store.get_metric(&name).map(|value| (name, value)))
            .collect();
        let offenders = store.all_offenders().into_iter().collect();
        let asserts = store
            .asserts()
            .into_iter()
            .map(|assert| {
                let actual = store.get_metric(&assert.metric);
                let passed = actual
                    .as_ref()
                    .and_then(MetricValue::as_number)
                    .map(|value| value >= assert.threshold)
                    .unwrap_or(false);
                AssertOutcome {
                    metric: assert.metric,
                    threshold: assert.threshold,
                    actual,
                    passed,
                }
            })
            .collect();

        Self {
            generator: format!("pageprobe/{}", env!("CARGO_PKG_VERSION")),
            run_id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            timestamp: chrono::Utc::now(),
            timed_out,
            metrics,
            offenders,
            asserts,
        }
    }

    pub fn failed_assert_count(&self) -> usize {
        self.asserts.iter().filter(|a| !a.passed).count()
    }

    /// Serialize to the configured sink. Called once per run.
    pub async fn write(&self, output: Option<&Path>) -> Result<(), ProbeError> {
        let json = serde_json::to_string_pretty(self)?;
        match output {
            Some(path) => {
                tokio::fs::write(path, json.as_bytes()).await?;
                info!(path = %path.display(), "report written");
            }
            None => println!("{json}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TracingSink;

    fn store() -> MetricsStore {
        MetricsStore::new(Box::new(TracingSink))
    }

    #[test]
    fn report_carries_metrics_offenders_and_assert_detail() {
        let store = store();
        store.set_metric("requests", 12u64, true);
        store.set_metric("documentTitle", "Example", true);
        store.add_offender("requests", "GET /big.js");
        store.set_assert("requests", 10.0);
        store.set_assert("domElements", 100.0);

        let report = Report::build("https://example.com", &store, false);
        assert_eq!(report.url, "https://example.com");
        assert!(report.generator.starts_with("pageprobe/"));
        assert!(!report.timed_out);
        assert_eq!(
            report.metrics.get("requests"),
            Some(&MetricValue::Number(12.0))
        );
        assert_eq!(report.offenders["requests"], vec!["GET /big.js".to_string()]);

        // requests >= 10 passes, domElements was never recorded and fails
        assert_eq!(report.failed_assert_count(), 1);
        let failed: Vec<_> = report
            .asserts
            .iter()
            .filter(|a| !a.passed)
            .map(|a| a.metric.as_str())
            .collect();
        assert_eq!(failed, vec!["domElements"]);
    }

    #[test]
    fn report_serializes_to_json() {
        let store = store();
        store.set_metric("requests", 1u64, true);
        let report = Report::build("https://example.com", &store, true);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["timed_out"], serde_json::Value::Bool(true));
        assert_eq!(json["metrics"]["requests"], 1.0);
        assert_eq!(json["url"], "https://example.com");
    }
}

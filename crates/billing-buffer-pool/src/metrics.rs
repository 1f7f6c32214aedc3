//! Gauge reporting.
//!
//! The pool reports counts through a [`MetricsSink`]. [`RecorderSink`] feeds
//! the `metrics` facade, [`TracingSink`] logs each reading and
//! [`InMemorySink`] keeps them for inspection.

use std::collections::HashMap;

use billing_buffer_core::Tier;
use billing_buffer_store::EntryStatus;
use parking_lot::Mutex;
use serde::Serialize;

/// The gauges the pool reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GaugeMetric {
    /// Number of entries in a status, across all tiers.
    EntryCount,
    /// Number of `Available` entries in one tier.
    TierBufferSize,
}

impl GaugeMetric {
    /// Metric name as exported.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EntryCount => "billing_buffer_entry_count",
            Self::TierBufferSize => "billing_buffer_tier_buffer_size",
        }
    }
}

/// One gauge reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gauge {
    /// Which gauge this is.
    pub metric: GaugeMetric,
    /// Status label.
    pub status: EntryStatus,
    /// Tier label, for per-tier gauges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    /// The reading.
    pub value: u64,
}

/// Receives gauge readings.
pub trait MetricsSink: Send + Sync {
    /// Record the latest value of a gauge.
    fn record_gauge(&self, gauge: &Gauge);
}

/// Emits every reading as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record_gauge(&self, gauge: &Gauge) {
        tracing::info!(
            target: "billing_buffer::metrics",
            metric = gauge.metric.name(),
            status = %gauge.status,
            tier = gauge.tier.as_ref().map(Tier::as_str),
            value = gauge.value,
            "gauge"
        );
    }
}

/// Sets a [`metrics`] gauge per reading, labelled by status and tier.
///
/// Readings go to the globally installed recorder; the `billing-buffer`
/// binary installs a Prometheus recorder and serves it on `/metrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    #[allow(clippy::cast_precision_loss)]
    fn record_gauge(&self, gauge: &Gauge) {
        let name = gauge.metric.name();
        let status = gauge.status.as_str();
        let value = gauge.value as f64;

        match &gauge.tier {
            Some(tier) => {
                ::metrics::gauge!(name, "status" => status, "tier" => tier.to_string()).set(value);
            }
            None => ::metrics::gauge!(name, "status" => status).set(value),
        }
    }
}

type GaugeKey = (GaugeMetric, EntryStatus, Option<Tier>);

/// Keeps the latest value of every gauge in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    gauges: Mutex<HashMap<GaugeKey, u64>>,
}

impl InMemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest value recorded for a gauge.
    #[must_use]
    pub fn get(&self, metric: GaugeMetric, status: EntryStatus, tier: Option<&Tier>) -> Option<u64> {
        self.gauges
            .lock()
            .get(&(metric, status, tier.cloned()))
            .copied()
    }

    /// Number of distinct gauges recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.gauges.lock().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gauges.lock().is_empty()
    }
}

impl MetricsSink for InMemorySink {
    fn record_gauge(&self, gauge: &Gauge) {
        self.gauges
            .lock()
            .insert((gauge.metric, gauge.status, gauge.tier.clone()), gauge.value);
    }
}

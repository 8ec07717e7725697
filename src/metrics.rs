//! Pipeline metrics and observability.
//!
//! Counters are fed by the debug tap, which sees every operation entering the
//! pipeline and every result leaving it. One instance is shared by all
//! clients a process builds so the render host can report totals.

use crate::error::ExchangeError;
use crate::operation::{OperationResult, ResultSource};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Operation and result counters for one or more pipelines.
#[derive(Debug, Default)]
pub struct ExchangeMetrics {
    /// Operations that entered a pipeline
    operations: AtomicUsize,

    /// Results answered from the response cache
    cache_results: AtomicUsize,

    /// Results replayed from a server-render snapshot
    ssr_results: AtomicUsize,

    /// Results that came back from the network
    network_results: AtomicUsize,

    /// Results a stage synthesized on its own (fail-fast, cache-only miss)
    synthesized_results: AtomicUsize,

    /// Results carrying a network error
    network_errors: AtomicUsize,

    /// Results carrying an authentication error
    auth_errors: AtomicUsize,

    /// Results carrying GraphQL errors
    graphql_errors: AtomicUsize,
}

impl ExchangeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operation entering the pipeline.
    pub fn record_operation(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a result leaving the pipeline.
    pub fn record_result(&self, result: &OperationResult) {
        let counter = match result.source {
            ResultSource::Cache => &self.cache_results,
            ResultSource::Ssr => &self.ssr_results,
            ResultSource::Network => &self.network_results,
            ResultSource::Synthesized => &self.synthesized_results,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match &result.error {
            Some(ExchangeError::Network { .. }) => {
                self.network_errors.fetch_add(1, Ordering::Relaxed);
            }
            Some(ExchangeError::Authentication { .. }) => {
                self.auth_errors.fetch_add(1, Ordering::Relaxed);
            }
            Some(ExchangeError::GraphQl { .. }) => {
                self.graphql_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::Relaxed)
    }

    pub fn cache_results(&self) -> usize {
        self.cache_results.load(Ordering::Relaxed)
    }

    pub fn ssr_results(&self) -> usize {
        self.ssr_results.load(Ordering::Relaxed)
    }

    pub fn network_results(&self) -> usize {
        self.network_results.load(Ordering::Relaxed)
    }

    pub fn synthesized_results(&self) -> usize {
        self.synthesized_results.load(Ordering::Relaxed)
    }

    /// Generate a metrics report.
    pub fn report(&self) -> MetricsReport {
        let cache = self.cache_results();
        let ssr = self.ssr_results();
        let network = self.network_results();
        let synthesized = self.synthesized_results();
        let total = cache + ssr + network + synthesized;

        let local_hit_rate = if total > 0 {
            ((cache + ssr) as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            operations: self.operations(),
            cache_results: cache,
            ssr_results: ssr,
            network_results: network,
            synthesized_results: synthesized,
            local_hit_rate,
            network_errors: self.network_errors.load(Ordering::Relaxed),
            auth_errors: self.auth_errors.load(Ordering::Relaxed),
            graphql_errors: self.graphql_errors.load(Ordering::Relaxed),
        }
    }

    /// Log a one-line summary at `info`.
    pub fn log_summary(&self) {
        let report = self.report();
        info!(
            operations = report.operations,
            cache = report.cache_results,
            ssr = report.ssr_results,
            network = report.network_results,
            local_hit_rate = format!("{:.1}%", report.local_hit_rate),
            "Exchange metrics"
        );
    }
}

/// Snapshot of the counters, serializable for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub operations: usize,
    pub cache_results: usize,
    pub ssr_results: usize,
    pub network_results: usize,
    pub synthesized_results: usize,

    /// Share of results served without a network round-trip (0-100)
    pub local_hit_rate: f64,

    pub network_errors: usize,
    pub auth_errors: usize,
    pub graphql_errors: usize,
}

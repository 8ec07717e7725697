//! Observability tap.
//!
//! Sits at the head of the chain, so it sees each operation before any other
//! stage touches it and each result after every other stage is done with it.
//! It never changes either.

use super::{Exchange, Next, ResultStream};
use crate::metrics::ExchangeMetrics;
use crate::operation::Operation;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone)]
pub struct DebugExchange {
    metrics: Arc<ExchangeMetrics>,
}

impl DebugExchange {
    pub fn new(metrics: Arc<ExchangeMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &Arc<ExchangeMetrics> {
        &self.metrics
    }
}

impl Default for DebugExchange {
    fn default() -> Self {
        Self::new(Arc::new(ExchangeMetrics::new()))
    }
}

impl Exchange for DebugExchange {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn call(&self, operation: Operation, next: Next) -> ResultStream {
        self.metrics.record_operation();
        debug!(
            key = %operation.key(),
            kind = %operation.kind(),
            name = operation.operation_name().unwrap_or("anonymous"),
            "Operation started"
        );

        let metrics = Arc::clone(&self.metrics);
        let started = Instant::now();
        next.run(operation)
            .inspect(move |result| {
                metrics.record_result(result);
                debug!(
                    key = %result.key,
                    source = ?result.source,
                    stale = result.stale,
                    error = ?result.error,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Operation result"
                );
            })
            .boxed()
    }
}

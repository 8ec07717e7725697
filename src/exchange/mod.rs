//! The operation-exchange pipeline.
//!
//! An exchange is one stage of an ordered chain. Every operation enters the
//! first stage and is handed forward through [`Next`]; each stage may
//!
//! - pass the operation through unchanged,
//! - derive a new operation (extra headers, a different policy),
//! - answer it itself without calling `next`,
//! - forward it and post-process the result stream on the way back.
//!
//! Because a stage wraps the stream returned by the stages after it, the
//! forward pass runs in list order and the backward pass runs in reverse:
//! a later stage sees the operation after every earlier forward transform
//! and sees the result before every earlier backward transform.
//!
//! # Stages
//!
//! - `debug`: observability tap (tracing + metrics), never mutates
//! - `cache`: response cache, request coalescing, invalidation
//! - `auth`: credential injection, single-flight refresh, one replay
//! - `ssr`: server-render recording / client hydration replay
//! - `transport`: terminal HTTP stage

pub mod auth;
pub mod cache;
pub mod debug;
pub mod ssr;
pub mod transport;

pub use auth::{
    AuthConfig, AuthExchange, Credential, CredentialRefresher, InvalidPolicy, RefreshError,
    Session, SessionStatus,
};
pub use cache::{CacheConfig, CacheExchange};
pub use debug::DebugExchange;
pub use ssr::{SerializedResult, Snapshot, SsrExchange, SsrHandle, SsrMode};
pub use transport::TransportExchange;

use crate::error::ExchangeError;
use crate::operation::{Operation, OperationResult, ResultSource};
use futures::stream::{self, BoxStream, StreamExt};
use futures::Future;
use std::sync::Arc;
use tracing::warn;

/// A lazy, possibly multi-valued stream of results for one operation.
pub type ResultStream = BoxStream<'static, OperationResult>;

/// One stage of the pipeline.
///
/// `call` must not block: any waiting happens inside the returned stream.
/// Stages own their shared state behind `Arc` so the stream can outlive the
/// borrow of `self`.
pub trait Exchange: Send + Sync + 'static {
    /// Short stage name used in logs.
    fn name(&self) -> &'static str;

    fn call(&self, operation: Operation, next: Next) -> ResultStream;
}

/// Handle to the remainder of the chain after the current stage.
#[derive(Clone)]
pub struct Next {
    stages: Arc<[Arc<dyn Exchange>]>,
    index: usize,
}

impl Next {
    /// Forward an operation to the next stage.
    pub fn run(self, operation: Operation) -> ResultStream {
        match self.stages.get(self.index).cloned() {
            Some(stage) => {
                let next = Next {
                    stages: self.stages,
                    index: self.index + 1,
                };
                stage.call(operation, next)
            }
            None => {
                warn!(
                    key = %operation.key(),
                    "Operation fell off the end of the exchange chain"
                );
                once(OperationResult::from_error(
                    &operation,
                    ExchangeError::Unroutable,
                    ResultSource::Synthesized,
                ))
            }
        }
    }
}

/// An ordered, composed chain of exchanges.
#[derive(Clone)]
pub struct ExchangePipeline {
    stages: Arc<[Arc<dyn Exchange>]>,
}

/// Compose stages into a pipeline, preserving their order.
pub fn compose(stages: Vec<Arc<dyn Exchange>>) -> ExchangePipeline {
    ExchangePipeline {
        stages: stages.into(),
    }
}

impl ExchangePipeline {
    /// Dispatch an operation through the whole chain.
    pub fn execute(&self, operation: Operation) -> ResultStream {
        Next {
            stages: Arc::clone(&self.stages),
            index: 0,
        }
        .run(operation)
    }

    /// Stage names in dispatch order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

/// A stream with exactly one result.
pub fn once(result: OperationResult) -> ResultStream {
    stream::once(futures::future::ready(result)).boxed()
}

/// A stream whose single result is produced by a future.
pub fn from_future<F>(future: F) -> ResultStream
where
    F: Future<Output = OperationResult> + Send + 'static,
{
    stream::once(future).boxed()
}

/// A stream whose shape is decided after some asynchronous work.
pub fn deferred<F>(future: F) -> ResultStream
where
    F: Future<Output = ResultStream> + Send + 'static,
{
    stream::once(future).flatten().boxed()
}

/// Wait for the first result of a stream.
///
/// An empty stream means some stage swallowed the operation; that is reported
/// as [`ExchangeError::Unroutable`] rather than hanging or panicking.
pub async fn first_result(mut results: ResultStream, operation: &Operation) -> OperationResult {
    match results.next().await {
        Some(result) => result,
        None => OperationResult::from_error(
            operation,
            ExchangeError::Unroutable,
            ResultSource::Synthesized,
        ),
    }
}

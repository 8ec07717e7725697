//! Server-render capture and client hydration replay.
//!
//! In [`SsrMode::Server`] every completed query result is recorded into a
//! [`Snapshot`] in completion order. The render host serializes the snapshot
//! into the page. In [`SsrMode::Client`] the snapshot read back from the page
//! answers the first query for each recorded key without touching the
//! network; the entry is consumed, so later identical queries go out
//! normally.
//!
//! Keys are the hex form of [`OperationKey`](crate::operation::OperationKey).
//! If server and client derive different keys for what should be the same
//! operation the replay simply misses and the client pays one extra round
//! trip. Entries that cannot be decoded are dropped the same way.

use super::{once, Exchange, Next, ResultStream};
use crate::error::ExchangeError;
use crate::operation::{Operation, OperationKind, OperationResult, ResultSource};
use futures::StreamExt;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Which side of the render handoff a pipeline runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsrMode {
    Server,
    Client,
}

/// A result reduced to what survives serialization into the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExchangeError>,
}

impl SerializedResult {
    /// Keep only the payload; source and staleness are not carried over.
    pub fn from_result(result: &OperationResult) -> Self {
        Self {
            data: result.data.clone(),
            error: result.error.clone(),
        }
    }

    /// Rebuild a result for `operation`, or `None` if the entry is empty.
    pub fn into_result(self, operation: &Operation) -> Option<OperationResult> {
        if self.data.is_none() && self.error.is_none() {
            return None;
        }
        Some(OperationResult {
            key: operation.key(),
            kind: operation.kind(),
            data: self.data,
            error: self.error,
            stale: false,
            source: ResultSource::Ssr,
        })
    }
}

/// Ordered mapping from operation key to serialized result.
///
/// Serializes as a JSON object whose members appear in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<(String, SerializedResult)>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by the hex form of its operation key.
    pub fn get(&self, key: &str) -> Option<&SerializedResult> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Insert or overwrite in place; a new key goes to the end.
    pub fn insert(&mut self, key: impl Into<String>, value: SerializedResult) {
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Remove and return an entry, keeping the order of the rest.
    pub fn take(&mut self, key: &str) -> Option<SerializedResult> {
        let position = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(position).1)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// JSON object keyed by operation key, in insertion order.
    ///
    /// Not escaped for HTML; see `render::embed_snapshot`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Inverse of [`Snapshot::to_json`].
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(SnapshotVisitor)
    }
}

struct SnapshotVisitor;

impl<'de> Visitor<'de> for SnapshotVisitor {
    type Value = Snapshot;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of operation keys to serialized results")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Snapshot, A::Error> {
        let mut snapshot = Snapshot::new();
        while let Some((key, raw)) = access.next_entry::<String, Value>()? {
            match serde_json::from_value::<SerializedResult>(raw) {
                Ok(value) => snapshot.insert(key, value),
                Err(e) => warn!(%key, "Dropping undecodable snapshot entry: {}", e),
            }
        }
        Ok(snapshot)
    }
}

/// Shared access to the snapshot a pipeline records into or replays from.
#[derive(Clone, Default)]
pub struct SsrHandle {
    snapshot: Arc<Mutex<Snapshot>>,
}

impl SsrHandle {
    /// Copy of the current snapshot, for serialization into the page.
    pub fn extract(&self) -> Snapshot {
        self.lock().map(|snapshot| snapshot.clone()).unwrap_or_default()
    }

    /// Replace the snapshot, typically with one read back from the page.
    pub fn restore(&self, snapshot: Snapshot) {
        if let Some(mut current) = self.lock() {
            *current = snapshot;
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, Snapshot>> {
        match self.snapshot.lock() {
            Ok(snapshot) => Some(snapshot),
            Err(_) => {
                warn!("SSR snapshot unavailable");
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct SsrExchange {
    mode: SsrMode,
    handle: SsrHandle,
}

impl SsrExchange {
    /// Recording stage for one server render pass.
    pub fn server() -> Self {
        Self {
            mode: SsrMode::Server,
            handle: SsrHandle::default(),
        }
    }

    /// Replaying stage, optionally seeded with the page's snapshot.
    pub fn client(snapshot: Option<Snapshot>) -> Self {
        let handle = SsrHandle::default();
        if let Some(snapshot) = snapshot {
            handle.restore(snapshot);
        }
        Self {
            mode: SsrMode::Client,
            handle,
        }
    }

    /// Stage for `mode`, with an empty snapshot.
    pub fn new(mode: SsrMode) -> Self {
        match mode {
            SsrMode::Server => Self::server(),
            SsrMode::Client => Self::client(None),
        }
    }

    pub fn mode(&self) -> SsrMode {
        self.mode
    }

    /// Handle onto this stage's snapshot, shared with every clone.
    pub fn handle(&self) -> SsrHandle {
        self.handle.clone()
    }

    fn record(&self, operation: Operation, next: Next) -> ResultStream {
        let handle = self.handle.clone();
        next.run(operation)
            .inspect(move |result| {
                if let Some(mut snapshot) = handle.lock() {
                    debug!(key = %result.key, "Recording result for hydration");
                    snapshot.insert(result.key.to_string(), SerializedResult::from_result(result));
                }
            })
            .boxed()
    }

    fn replay(&self, operation: Operation, next: Next) -> ResultStream {
        let key = operation.key().to_string();
        let entry = self.handle.lock().and_then(|mut snapshot| snapshot.take(&key));
        match entry.and_then(|entry| entry.into_result(&operation)) {
            Some(result) => {
                debug!(%key, "Replaying server-rendered result");
                once(result)
            }
            None => next.run(operation),
        }
    }
}

impl Exchange for SsrExchange {
    fn name(&self) -> &'static str {
        "ssr"
    }

    fn call(&self, operation: Operation, next: Next) -> ResultStream {
        if operation.kind() != OperationKind::Query {
            return next.run(operation);
        }
        match self.mode {
            SsrMode::Server => self.record(operation, next),
            SsrMode::Client => self.replay(operation, next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::first_result;
    use crate::exchange::testing::{pipeline_with, MockTransport};
    use crate::exchange::ExchangePipeline;
    use serde_json::json;

    async fn run(pipeline: &ExchangePipeline, op: &Operation) -> OperationResult {
        first_result(pipeline.execute(op.clone()), op).await
    }

    fn entry(data: Value) -> SerializedResult {
        SerializedResult {
            data: Some(data),
            error: None,
        }
    }

    // ==================== Snapshot Tests ====================

    #[test]
    fn test_snapshot_preserves_insertion_order() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("zz", entry(json!(1)));
        snapshot.insert("aa", entry(json!(2)));
        snapshot.insert("mm", entry(json!(3)));
        snapshot.insert("zz", entry(json!(4)));

        let json = snapshot.to_json().unwrap();
        assert_eq!(json, r#"{"zz":{"data":4},"aa":{"data":2},"mm":{"data":3}}"#);

        let restored = Snapshot::from_json(&json).unwrap();
        assert_eq!(restored.keys().collect::<Vec<_>>(), vec!["zz", "aa", "mm"]);
    }

    #[test]
    fn test_snapshot_drops_undecodable_entries() {
        let restored = Snapshot::from_json(
            r#"{"a":{"data":1},"b":{"error":{"kind":"no_such_kind"}},"c":{"error":{"kind":"network","message":"x"}}}"#,
        )
        .unwrap();
        assert_eq!(restored.keys().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn test_snapshot_take_consumes() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("a", entry(json!(1)));
        assert!(snapshot.take("a").is_some());
        assert!(snapshot.take("a").is_none());
        assert!(snapshot.is_empty());
    }

    // ==================== Server Mode Tests ====================

    #[tokio::test]
    async fn test_server_records_queries_in_completion_order() {
        let ssr = SsrExchange::server();
        let handle = ssr.handle();
        let mock = Arc::new(MockTransport::new(|op| {
            OperationResult::from_data(op, json!({ "doc": op.document() }), ResultSource::Network)
        }));
        let pipeline = pipeline_with(vec![Arc::new(ssr)], &mock);

        let second = Operation::query("{ second }", json!({}));
        let first = Operation::query("{ first }", json!({}));
        let mutation = Operation::mutation("mutation { m }", json!({}));
        run(&pipeline, &second).await;
        run(&pipeline, &first).await;
        run(&pipeline, &mutation).await;

        let snapshot = handle.extract();
        assert_eq!(
            snapshot.keys().collect::<Vec<_>>(),
            vec![second.key().to_string(), first.key().to_string()]
        );
        assert_eq!(
            snapshot.get(&first.key().to_string()).unwrap().data,
            Some(json!({ "doc": "{ first }" }))
        );
    }

    #[tokio::test]
    async fn test_server_records_error_descriptors() {
        let ssr = SsrExchange::server();
        let handle = ssr.handle();
        let mock = Arc::new(MockTransport::new(|op| {
            OperationResult::from_error(op, ExchangeError::network("down"), ResultSource::Network)
        }));
        let pipeline = pipeline_with(vec![Arc::new(ssr)], &mock);
        let op = Operation::query("{ a }", json!({}));

        run(&pipeline, &op).await;

        let recorded = handle.extract().get(&op.key().to_string()).cloned().unwrap();
        assert!(recorded.error.unwrap().is_network());
    }

    // ==================== Client Mode Tests ====================

    #[tokio::test]
    async fn test_client_replays_once_then_uses_network() {
        let op = Operation::query("{ a }", json!({}));
        let mut snapshot = Snapshot::new();
        snapshot.insert(op.key().to_string(), entry(json!({ "a": "server" })));

        let mock = Arc::new(MockTransport::with_data(json!({ "a": "network" })));
        let pipeline = pipeline_with(vec![Arc::new(SsrExchange::client(Some(snapshot)))], &mock);

        let hydrated = run(&pipeline, &op).await;
        assert_eq!(hydrated.source, ResultSource::Ssr);
        assert_eq!(hydrated.data, Some(json!({ "a": "server" })));
        assert_eq!(mock.calls(), 0);

        let refetched = run(&pipeline, &op).await;
        assert_eq!(refetched.source, ResultSource::Network);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_client_misses_unknown_keys() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("0000000000000000", entry(json!({ "a": 1 })));
        let mock = Arc::new(MockTransport::with_data(json!({ "b": 2 })));
        let pipeline = pipeline_with(vec![Arc::new(SsrExchange::client(Some(snapshot)))], &mock);

        let op = Operation::query("{ b }", json!({}));
        let result = run(&pipeline, &op).await;

        assert_eq!(result.source, ResultSource::Network);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_client_skips_empty_entries() {
        let op = Operation::query("{ a }", json!({}));
        let mut snapshot = Snapshot::new();
        snapshot.insert(op.key().to_string(), SerializedResult { data: None, error: None });
        let mock = Arc::new(MockTransport::with_data(json!({ "a": 1 })));
        let pipeline = pipeline_with(vec![Arc::new(SsrExchange::client(Some(snapshot)))], &mock);

        let result = run(&pipeline, &op).await;

        assert!(result.is_success());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_client_never_replays_mutations() {
        let op = Operation::mutation("mutation { a }", json!({}));
        let mut snapshot = Snapshot::new();
        snapshot.insert(op.key().to_string(), entry(json!({ "a": "server" })));
        let mock = Arc::new(MockTransport::with_data(json!({ "a": "network" })));
        let pipeline = pipeline_with(vec![Arc::new(SsrExchange::client(Some(snapshot)))], &mock);

        let result = run(&pipeline, &op).await;

        assert_eq!(result.source, ResultSource::Network);
    }
}

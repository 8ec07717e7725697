//! GraphQL operations and the results that flow back through the pipeline.
//!
//! An [`Operation`] is immutable once built: stages that need a different
//! header or policy call one of the `with_*` methods, which consume the value
//! and hand back a derived operation with the same [`OperationKey`].

use crate::error::ExchangeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The three GraphQL operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic identifier of a (document, variables) pair.
///
/// The key must come out the same in the server render and in the hydrating
/// client, so it is a fixed FNV-1a hash over a whitespace-normalized document
/// and a key-sorted rendering of the variables. Formatting differences in the
/// document and object key order in the variables do not change the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey(u64);

impl OperationKey {
    pub fn derive(document: &str, variables: &Value) -> Self {
        let mut canonical = normalize_document(document);
        canonical.push('\n');
        write_stable_json(variables, &mut canonical);
        Self(fnv1a(canonical.as_bytes()))
    }

    /// Parse the hex form produced by `Display`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        u64::from_str_radix(hex, 16).ok().map(Self)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Collapse whitespace runs and drop `#` comments, leaving string literals
/// (plain and `"""` block strings) untouched.
fn normalize_document(document: &str) -> String {
    let mut out = String::with_capacity(document.len());
    let mut rest = document;
    let mut gap = false;

    while let Some(c) = rest.chars().next() {
        if c.is_whitespace() {
            gap = true;
            rest = &rest[c.len_utf8()..];
            continue;
        }
        if c == '#' {
            gap = true;
            rest = rest.find('\n').map(|end| &rest[end..]).unwrap_or("");
            continue;
        }

        if gap && !out.is_empty() {
            out.push(' ');
        }
        gap = false;

        let len = if rest.starts_with("\"\"\"") {
            block_string_len(rest)
        } else if c == '"' {
            string_len(rest)
        } else {
            c.len_utf8()
        };
        out.push_str(&rest[..len]);
        rest = &rest[len..];
    }
    out
}

/// Byte length of the `"..."` literal at the start of `text`.
fn string_len(text: &str) -> usize {
    let mut escaped = false;
    for (i, c) in text.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' | '\n' => return i + 1,
            _ => {}
        }
    }
    text.len()
}

/// Byte length of the `"""..."""` literal at the start of `text`.
fn block_string_len(text: &str) -> usize {
    let mut i = 3;
    while i < text.len() {
        if text[i..].starts_with("\\\"\"\"") {
            i += 4;
        } else if text[i..].starts_with("\"\"\"") {
            return i + 3;
        } else {
            i += text[i..].chars().next().map_or(1, char::len_utf8);
        }
    }
    text.len()
}

/// Render JSON with object keys sorted, independent of how the map was built.
fn write_stable_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_stable_json(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// How the cache stage treats a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPolicy {
    /// Serve a fresh cached result, otherwise go to the network.
    #[default]
    CacheFirst,
    /// Only ever answer from the cache.
    CacheOnly,
    /// Always go to the network, still storing the result.
    NetworkOnly,
    /// Serve a cached result flagged stale, then the network result.
    CacheAndNetwork,
}

/// Request options applied by the transport stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub headers: BTreeMap<String, String>,
}

impl FetchOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Per-operation context that stages read and derive from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationContext {
    pub url: String,
    pub fetch_options: FetchOptions,
    pub request_policy: RequestPolicy,
    /// Entity typenames the operation declares it depends on (reads) or
    /// affects (mutations).
    pub additional_typenames: BTreeSet<String>,
}

/// An immutable request descriptor.
#[derive(Debug, Clone)]
pub struct Operation {
    kind: OperationKind,
    key: OperationKey,
    document: Arc<str>,
    variables: Arc<Value>,
    context: OperationContext,
}

impl Operation {
    pub fn new(kind: OperationKind, document: impl Into<String>, variables: Value) -> Self {
        let document: String = document.into();
        let key = OperationKey::derive(&document, &variables);
        Self {
            kind,
            key,
            document: Arc::from(document),
            variables: Arc::new(variables),
            context: OperationContext::default(),
        }
    }

    pub fn query(document: impl Into<String>, variables: Value) -> Self {
        Self::new(OperationKind::Query, document, variables)
    }

    pub fn mutation(document: impl Into<String>, variables: Value) -> Self {
        Self::new(OperationKind::Mutation, document, variables)
    }

    pub fn subscription(document: impl Into<String>, variables: Value) -> Self {
        Self::new(OperationKind::Subscription, document, variables)
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn key(&self) -> OperationKey {
        self.key
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn variables(&self) -> &Value {
        &self.variables
    }

    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    /// Name following the operation keyword (`query UserProfile { .. }`).
    pub fn operation_name(&self) -> Option<&str> {
        let rest = self.document.trim_start();
        let rest = rest.strip_prefix(self.kind.as_str())?;
        let rest = rest.trim_start();
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        (end > 0).then(|| &rest[..end])
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.context.url = url.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.context
            .fetch_options
            .headers
            .insert(name.into(), value.into());
        self
    }

    /// Merge default fetch options underneath the operation's own headers.
    pub fn with_default_fetch_options(mut self, defaults: &FetchOptions) -> Self {
        for (name, value) in &defaults.headers {
            self.context
                .fetch_options
                .headers
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    pub fn with_request_policy(mut self, policy: RequestPolicy) -> Self {
        self.context.request_policy = policy;
        self
    }

    pub fn with_typenames<I, S>(mut self, typenames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context
            .additional_typenames
            .extend(typenames.into_iter().map(Into::into));
        self
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Network,
    Cache,
    Ssr,
    /// Produced by a stage without any upstream data (errors, fail-fast).
    Synthesized,
}

/// A result keyed by the operation that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub key: OperationKey,
    pub kind: OperationKind,
    pub data: Option<Value>,
    pub error: Option<ExchangeError>,
    /// Set when the result is known to be superseded by a pending refetch.
    pub stale: bool,
    pub source: ResultSource,
}

impl OperationResult {
    pub fn from_data(operation: &Operation, data: Value, source: ResultSource) -> Self {
        Self {
            key: operation.key(),
            kind: operation.kind(),
            data: Some(data),
            error: None,
            stale: false,
            source,
        }
    }

    pub fn from_error(operation: &Operation, error: ExchangeError, source: ResultSource) -> Self {
        Self {
            key: operation.key(),
            kind: operation.kind(),
            data: None,
            error: Some(error),
            stale: false,
            source,
        }
    }

    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.error.is_none()
    }

    pub fn is_auth_error(&self) -> bool {
        self.error
            .as_ref()
            .map(ExchangeError::is_authentication)
            .unwrap_or(false)
    }

    pub fn with_source(mut self, source: ResultSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_stale(mut self, stale: bool) -> Self {
        self.stale = stale;
        self
    }
}

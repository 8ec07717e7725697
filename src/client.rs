//! The composition root.
//!
//! [`ClientBuilder`] assembles the pipeline in its fixed order:
//!
//! ```text
//! debug → cache → auth → ssr → transport
//! ```
//!
//! Every stage except the terminal one is optional. The built [`Client`]
//! stamps the endpoint URL and its default fetch options onto each operation
//! before dispatch. In client mode the defaults carry `Accept-Language`,
//! kept in step with a [`LocaleStore`] through [`Client::follow_locale`].
//! Server-mode clients never send it.

use crate::exchange::{
    first_result, AuthExchange, CacheExchange, DebugExchange, Exchange, ExchangePipeline,
    ResultStream, Snapshot, SsrExchange, SsrHandle, SsrMode, TransportExchange,
};
use crate::i18n::{AcceptLanguageBuilder, LocaleStore, Subscription};
use crate::metrics::ExchangeMetrics;
use crate::operation::{FetchOptions, Operation, OperationResult};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

pub const ACCEPT_LANGUAGE: &str = "Accept-Language";

/// GraphQL endpoint for an API host (`https://kitsu.app/` → `https://kitsu.app/api/graphql`).
pub fn endpoint_url(api_host: &str) -> String {
    format!("{}/api/graphql", api_host.trim_end_matches('/'))
}

pub struct ClientBuilder {
    url: String,
    mode: SsrMode,
    debug: Option<DebugExchange>,
    cache: Option<CacheExchange>,
    auth: Option<AuthExchange>,
    ssr: Option<SsrExchange>,
    terminal: Option<Arc<dyn Exchange>>,
    accept_language: Option<String>,
}

impl ClientBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: SsrMode::Client,
            debug: None,
            cache: None,
            auth: None,
            ssr: None,
            terminal: None,
            accept_language: None,
        }
    }

    /// Set the mode without an SSR stage. Adding one overrides this.
    pub fn mode(mut self, mode: SsrMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_debug(mut self, debug: DebugExchange) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn with_cache(mut self, cache: CacheExchange) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_auth(mut self, auth: AuthExchange) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_ssr(mut self, ssr: SsrExchange) -> Self {
        self.mode = ssr.mode();
        self.ssr = Some(ssr);
        self
    }

    pub fn with_transport(self, transport: TransportExchange) -> Self {
        self.with_terminal(Arc::new(transport))
    }

    /// Replace the terminal stage with any exchange.
    pub fn with_terminal(mut self, terminal: Arc<dyn Exchange>) -> Self {
        self.terminal = Some(terminal);
        self
    }

    pub fn with_accept_language(mut self, header: impl Into<String>) -> Self {
        self.accept_language = Some(header.into());
        self
    }

    pub fn build(self) -> Client {
        let metrics = self.debug.as_ref().map(|debug| Arc::clone(debug.metrics()));
        let ssr = self.ssr.as_ref().map(SsrExchange::handle);

        let mut stages: Vec<Arc<dyn Exchange>> = Vec::new();
        if let Some(debug) = self.debug {
            stages.push(Arc::new(debug));
        }
        if let Some(cache) = self.cache.clone() {
            stages.push(Arc::new(cache));
        }
        if let Some(auth) = self.auth {
            stages.push(Arc::new(auth));
        }
        if let Some(ssr) = self.ssr {
            stages.push(Arc::new(ssr));
        }
        let terminal: Arc<dyn Exchange> = match self.terminal {
            Some(terminal) => terminal,
            None => Arc::new(TransportExchange::default()),
        };
        stages.push(terminal);
        let pipeline = crate::exchange::compose(stages);

        let mut fetch_options = FetchOptions::default();
        match (self.mode, self.accept_language) {
            (SsrMode::Client, Some(header)) => {
                fetch_options.headers.insert(ACCEPT_LANGUAGE.to_string(), header);
            }
            (SsrMode::Server, Some(_)) => {
                debug!("Server-mode client ignores Accept-Language");
            }
            (_, None) => {}
        }

        info!(
            url = %self.url,
            mode = ?self.mode,
            stages = ?pipeline.stage_names(),
            "GraphQL client built"
        );

        Client {
            inner: Arc::new(ClientInner {
                url: self.url,
                mode: self.mode,
                pipeline,
                fetch_options: RwLock::new(fetch_options),
                ssr,
                cache: self.cache,
                metrics,
            }),
        }
    }
}

struct ClientInner {
    url: String,
    mode: SsrMode,
    pipeline: ExchangePipeline,
    fetch_options: RwLock<FetchOptions>,
    ssr: Option<SsrHandle>,
    cache: Option<CacheExchange>,
    metrics: Option<Arc<ExchangeMetrics>>,
}

/// Cheaply cloneable handle to a built pipeline.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder(url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn mode(&self) -> SsrMode {
        self.inner.mode
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.inner.pipeline.stage_names()
    }

    pub fn cache(&self) -> Option<&CacheExchange> {
        self.inner.cache.as_ref()
    }

    pub fn metrics(&self) -> Option<&Arc<ExchangeMetrics>> {
        self.inner.metrics.as_ref()
    }

    /// Default fetch options applied to operations dispatched from now on.
    pub fn fetch_options(&self) -> FetchOptions {
        match self.inner.fetch_options.read() {
            Ok(options) => options.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Change the `Accept-Language` sent by later operations.
    ///
    /// Changing an already-set header clears the cache. Server-mode clients
    /// ignore this.
    pub fn set_accept_language(&self, header: impl Into<String>) {
        if self.inner.mode == SsrMode::Server {
            return;
        }
        let header = header.into();
        let mut options = match self.inner.fetch_options.write() {
            Ok(options) => options,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = options.headers.insert(ACCEPT_LANGUAGE.to_string(), header.clone());
        drop(options);
        if previous.as_deref() == Some(header.as_str()) {
            return;
        }
        debug!(%header, "Accept-Language updated");

        // Cached results were localized for the old header
        if let Some(cache) = &self.inner.cache {
            cache.clear();
        }
    }

    /// Keep `Accept-Language` in step with a locale store.
    ///
    /// The header is set from the current locale immediately. Dropping the
    /// returned subscription stops the updates.
    pub fn follow_locale(&self, store: &LocaleStore, builder: AcceptLanguageBuilder) -> Subscription {
        self.set_accept_language(builder.build(store.current_locale()));
        let client = self.clone();
        store.subscribe(move |locale| client.set_accept_language(builder.build(locale)))
    }

    /// Stamp the endpoint URL (unless already set) and default fetch options.
    pub fn prepare(&self, operation: Operation) -> Operation {
        let operation = if operation.context().url.is_empty() {
            operation.with_url(self.inner.url.clone())
        } else {
            operation
        };
        operation.with_default_fetch_options(&self.fetch_options())
    }

    pub fn execute(&self, operation: Operation) -> ResultStream {
        self.inner.pipeline.execute(self.prepare(operation))
    }

    /// Dispatch and wait for the first result.
    pub async fn execute_first(&self, operation: Operation) -> OperationResult {
        let operation = self.prepare(operation);
        first_result(self.inner.pipeline.execute(operation.clone()), &operation).await
    }

    pub async fn query(&self, document: &str, variables: Value) -> OperationResult {
        self.execute_first(Operation::query(document, variables)).await
    }

    pub async fn mutate(&self, document: &str, variables: Value) -> OperationResult {
        self.execute_first(Operation::mutation(document, variables)).await
    }

    pub fn subscribe(&self, document: &str, variables: Value) -> ResultStream {
        self.execute(Operation::subscription(document, variables))
    }

    /// Results recorded so far by a server-mode SSR stage.
    pub fn ssr_snapshot(&self) -> Option<Snapshot> {
        self.inner.ssr.as_ref().map(SsrHandle::extract)
    }
}

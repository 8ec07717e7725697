//! Server-render host.
//!
//! Every page request resolves a locale (the `chosenLocale` cookie, then the
//! request's `Accept-Language`), loads that locale's catalog once per process,
//! renders with a fresh server-mode client and embeds the recorded snapshot.

use crate::client::{Client, ClientBuilder};
use crate::config::Config;
use crate::exchange::{CacheExchange, DebugExchange, SsrExchange, TransportExchange};
use crate::i18n::{
    parse_accept_language, BuiltinCatalogLoader, Catalog, CatalogCache, CatalogLoader,
    CookieStore, Intl, Locale, LocaleRegistry, LocaleStore, StaticUserAgent,
};
use crate::metrics::{ExchangeMetrics, MetricsReport};
use crate::render::{embed_snapshot, render_error_page, PageRenderer, RenderContext};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<LocaleRegistry>,
    pub catalogs: Arc<CatalogCache>,
    pub http: reqwest::Client,
    pub metrics: Arc<ExchangeMetrics>,
    pub renderer: Arc<dyn PageRenderer>,
}

impl AppState {
    pub fn new(config: Config, renderer: Arc<dyn PageRenderer>) -> Result<Self> {
        let registry = Arc::new(config.registry()?);
        let catalogs = Arc::new(CatalogCache::new(config.catalog_loader()));
        let http = config.http_client()?;

        Ok(Self {
            config: Arc::new(config),
            registry,
            catalogs,
            http,
            metrics: Arc::new(ExchangeMetrics::new()),
            renderer,
        })
    }

    /// A fresh server-mode client for one request.
    ///
    /// No auth stage: the render host never holds user credentials.
    fn request_client(&self) -> Client {
        ClientBuilder::new(self.config.graphql_endpoint())
            .with_debug(DebugExchange::new(Arc::clone(&self.metrics)))
            .with_cache(CacheExchange::new(self.config.cache_config()))
            .with_ssr(SsrExchange::server())
            .with_transport(TransportExchange::new(self.http.clone()))
            .build()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(render_page)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: Config, renderer: Arc<dyn PageRenderer>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config, renderer)?;

    info!(
        endpoint = %state.config.graphql_endpoint(),
        environment = %state.config.environment,
        locales = state.registry.available().len(),
        "Render host configured"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    let metrics = Arc::clone(&state.metrics);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Render host stopped");
    metrics.log_summary();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn healthz(State(state): State<AppState>) -> Json<MetricsReport> {
    Json(state.metrics.report())
}

async fn render_page(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let locale = resolve_locale(&state.registry, &headers);
    let catalog = match state.catalogs.get(locale).await {
        Ok(catalog) => catalog,
        Err(e) => {
            error!(locale = %locale, "Catalog load failed: {}", e);
            let intl = fallback_intl(&state).await;
            return html_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                intl.locale(),
                render_error_page(&intl, 500),
            );
        }
    };
    let intl = Intl::new(locale, catalog, state.config.environment);

    let context = RenderContext {
        client: state.request_client(),
        intl,
    };
    let url = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let page = match state.renderer.render(&url, &context).await {
        Ok(html) => {
            let snapshot = context.client.ssr_snapshot().unwrap_or_default();
            embed_snapshot(&html, &snapshot).context("Failed to serialize SSR snapshot")
        }
        Err(e) => Err(e),
    };

    match page {
        Ok(page) => html_response(StatusCode::OK, locale, page),
        Err(e) => {
            error!(url = %url, "Render failed: {:#}", e);
            html_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                locale,
                render_error_page(&context.intl, 500),
            )
        }
    }
}

/// Locale for a request: the persisted choice cookie, else `Accept-Language`.
///
/// `LocaleStore` is single-threaded, so it lives and dies in this function.
fn resolve_locale(registry: &Arc<LocaleRegistry>, headers: &HeaderMap) -> Locale {
    let cookies = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok());
    let accept_language = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .map(parse_accept_language)
        .unwrap_or_default();

    let store = LocaleStore::new(
        Arc::clone(registry),
        Rc::new(CookieStore::from_header(cookies)),
        &StaticUserAgent(accept_language),
        None,
    );
    store.current_locale()
}

/// Default-locale formatter over the compiled-in strings, for error pages.
async fn fallback_intl(state: &AppState) -> Intl {
    let locale = state.registry.default_locale();
    let catalog = match BuiltinCatalogLoader.load(locale).await {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("No built-in strings for {}: {}", locale, e);
            Catalog::new(locale.code())
        }
    };
    Intl::new(locale, Arc::new(catalog), state.config.environment)
}

fn html_response(status: StatusCode, locale: Locale, body: String) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(
        header::CONTENT_LANGUAGE,
        HeaderValue::from_static(locale.code()),
    );
    response
}

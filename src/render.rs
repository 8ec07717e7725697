//! Server-render handoff.
//!
//! The server renders a page with a server-mode client, then embeds the
//! recorded [`Snapshot`] into the HTML:
//!
//! ```text
//! <script id="__GRAPHQL_SSR__" type="application/json">{ ... }</script>
//! ```
//!
//! `<` inside the JSON is written as `\u003c` so the payload cannot close the
//! script element early. The client reads the snapshot back with
//! [`extract_snapshot`] before it builds its pipeline ([`hydrate`]).

use crate::client::{Client, ClientBuilder};
use crate::config::Config;
use crate::exchange::{
    AuthExchange, CacheExchange, CredentialRefresher, DebugExchange, Session, Snapshot,
    SsrExchange, TransportExchange,
};
use crate::i18n::{strings, Intl, LocaleStore, Subscription};
use crate::metrics::ExchangeMetrics;
use crate::operation::Operation;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SNAPSHOT_SCRIPT_ID: &str = "__GRAPHQL_SSR__";

/// What a page renderer gets to work with for one request.
pub struct RenderContext {
    /// Server-mode client; every query it completes lands in the snapshot
    pub client: Client,
    pub intl: Intl,
}

/// The rendering framework, seen from the render host.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, context: &RenderContext) -> Result<String>;
}

/// Minimal application shell that prefetches a fixed set of queries.
#[derive(Debug, Clone, Default)]
pub struct ShellRenderer {
    preload: Vec<Operation>,
}

impl ShellRenderer {
    pub fn new(preload: Vec<Operation>) -> Self {
        Self { preload }
    }
}

#[async_trait]
impl PageRenderer for ShellRenderer {
    async fn render(&self, url: &str, context: &RenderContext) -> Result<String> {
        let results = join_all(
            self.preload
                .iter()
                .cloned()
                .map(|operation| context.client.execute_first(operation)),
        )
        .await;
        for result in results.iter().filter(|result| result.error.is_some()) {
            debug!(key = %result.key, error = ?result.error, "Preload failed");
        }

        let title = context
            .intl
            .message(strings::APP_TITLE, strings::ENGLISH_STRINGS.app_title)?;
        Ok(format!(
            "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body><div id=\"root\" data-url=\"{url}\"></div></body>\n</html>\n",
            lang = context.intl.locale(),
            title = escape_html(&title),
            url = escape_html(url),
        ))
    }
}

/// Localized general error page.
pub fn render_error_page(intl: &Intl, status: u16) -> String {
    let english = &strings::ENGLISH_STRINGS;
    let title = intl
        .message(strings::ERROR_TITLE, english.error_title)
        .unwrap_or_else(|_| english.error_title.to_string());
    let subtitle = intl
        .message(strings::ERROR_SUBTITLE, english.error_subtitle)
        .unwrap_or_else(|_| english.error_subtitle.to_string());
    let status_text = status.to_string();
    let status_line = intl
        .format(strings::ERROR_STATUS, english.error_status, &[("status", &status_text)])
        .unwrap_or(status_text);

    format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body><main class=\"error-page\"><h1>{title}</h1><p>{subtitle}</p><small>{status}</small></main></body>\n</html>\n",
        lang = intl.locale(),
        title = escape_html(&title),
        subtitle = escape_html(&subtitle),
        status = escape_html(&status_line),
    )
}

/// Insert the snapshot script before `</body>`, or append it.
pub fn embed_snapshot(html: &str, snapshot: &Snapshot) -> serde_json::Result<String> {
    let json = snapshot.to_json()?.replace('<', "\\u003c");
    let script = format!(
        "<script id=\"{}\" type=\"application/json\">{}</script>",
        SNAPSHOT_SCRIPT_ID, json
    );

    let mut page = String::with_capacity(html.len() + script.len());
    match html.rfind("</body>") {
        Some(index) => {
            page.push_str(&html[..index]);
            page.push_str(&script);
            page.push_str(&html[index..]);
        }
        None => {
            page.push_str(html);
            page.push_str(&script);
        }
    }
    Ok(page)
}

/// Read the embedded snapshot back out of a rendered page.
///
/// A missing or unreadable script yields `None`; hydration then simply
/// goes to the network.
pub fn extract_snapshot(html: &str) -> Option<Snapshot> {
    let marker = format!("<script id=\"{}\"", SNAPSHOT_SCRIPT_ID);
    let start = html.find(&marker)?;
    let body_start = start + html[start..].find('>')? + 1;
    let body_end = body_start + html[body_start..].find("</script>")?;

    match Snapshot::from_json(&html[body_start..body_end]) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!("Discarding unreadable SSR snapshot: {}", e);
            None
        }
    }
}

/// Build the client-side pipeline for a server-rendered page.
///
/// The page's snapshot seeds the SSR stage, so queries the server already
/// ran are answered without a round trip on first use. `Accept-Language`
/// follows `locales` for as long as the returned subscription is held.
pub fn hydrate(
    config: &Config,
    html: &str,
    locales: &LocaleStore,
    session: Session,
    refresher: Arc<dyn CredentialRefresher>,
    metrics: Arc<ExchangeMetrics>,
) -> Result<(Client, Subscription)> {
    let snapshot = extract_snapshot(html);
    debug!(
        entries = snapshot.as_ref().map(Snapshot::len).unwrap_or(0),
        "Hydrating client"
    );

    let transport = TransportExchange::new(config.http_client()?);
    let client = ClientBuilder::new(config.graphql_endpoint())
        .with_debug(DebugExchange::new(metrics))
        .with_cache(CacheExchange::new(config.cache_config()))
        .with_auth(AuthExchange::new(session, refresher, config.auth_config()))
        .with_ssr(SsrExchange::client(snapshot))
        .with_transport(transport)
        .build();
    let subscription = client.follow_locale(locales, config.accept_language_builder());
    Ok((client, subscription))
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

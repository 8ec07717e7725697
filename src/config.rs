use crate::client::endpoint_url;
use crate::exchange::{AuthConfig, CacheConfig, InvalidPolicy};
use crate::i18n::{
    AcceptLanguageBuilder, BuiltinCatalogLoader, CatalogLoader, DirectoryCatalogLoader,
    Environment, LocaleRegistry,
};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // API
    pub api_host: String,
    pub request_timeout_secs: u64,

    // Server
    pub port: u16,
    pub environment: Environment,

    // Locales
    pub default_locale: String,
    pub accept_language_fallbacks: Vec<String>,
    pub catalog_dir: Option<PathBuf>,

    // Exchanges
    pub cache_ttl_secs: Option<u64>,
    pub auth_invalid_policy: InvalidPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "https://kitsu.app/".to_string(),
            request_timeout_secs: 30,
            port: 8080,
            environment: Environment::Production,
            default_locale: "en".to_string(),
            accept_language_fallbacks: Vec::new(),
            catalog_dir: None,
            cache_ttl_secs: None,
            auth_invalid_policy: InvalidPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            // API
            api_host: std::env::var("API_HOST").unwrap_or(defaults.api_host),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_secs),

            // Server
            port: match std::env::var("PORT") {
                Ok(v) => v
                    .parse()
                    .with_context(|| format!("PORT must be a port number, got '{}'", v))?,
                Err(_) => defaults.port,
            },
            environment: match std::env::var("APP_ENV") {
                Ok(v) => match Environment::parse(&v) {
                    Some(environment) => environment,
                    None => bail!("APP_ENV must be 'development' or 'production', got '{}'", v),
                },
                Err(_) => defaults.environment,
            },

            // Locales
            default_locale: std::env::var("DEFAULT_LOCALE").unwrap_or(defaults.default_locale),
            accept_language_fallbacks: std::env::var("ACCEPT_LANGUAGE_FALLBACKS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            catalog_dir: std::env::var("CATALOG_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),

            // Exchanges
            cache_ttl_secs: std::env::var("CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            auth_invalid_policy: match std::env::var("AUTH_INVALID_POLICY") {
                Ok(v) => parse_invalid_policy(&v)?,
                Err(_) => defaults.auth_invalid_policy,
            },
        })
    }

    pub fn graphql_endpoint(&self) -> String {
        endpoint_url(&self.api_host)
    }

    /// Shared HTTP client for every outgoing GraphQL request.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")
    }

    /// Built-in registry with the configured default locale.
    pub fn registry(&self) -> Result<LocaleRegistry> {
        LocaleRegistry::get()
            .with_default(&self.default_locale)
            .with_context(|| format!("Invalid DEFAULT_LOCALE '{}'", self.default_locale))
    }

    pub fn accept_language_builder(&self) -> AcceptLanguageBuilder {
        AcceptLanguageBuilder::new().with_fallbacks(self.accept_language_fallbacks.iter())
    }

    pub fn catalog_loader(&self) -> Arc<dyn CatalogLoader> {
        match &self.catalog_dir {
            Some(dir) => Arc::new(DirectoryCatalogLoader::new(dir)),
            None => Arc::new(BuiltinCatalogLoader),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        match self.cache_ttl_secs {
            Some(secs) => CacheConfig::default().with_ttl(Duration::from_secs(secs)),
            None => CacheConfig::default(),
        }
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            invalid_policy: self.auth_invalid_policy,
            ..AuthConfig::default()
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_invalid_policy(value: &str) -> Result<InvalidPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "proceed" => Ok(InvalidPolicy::ProceedUnauthenticated),
        "fail-fast" | "fail_fast" => Ok(InvalidPolicy::FailFast),
        other => bail!("AUTH_INVALID_POLICY must be 'proceed' or 'fail-fast', got '{}'", other),
    }
}

//! Translation catalogs and their per-session cache.
//!
//! A [`CatalogLoader`] resolves a locale to a [`Catalog`]; [`CatalogCache`]
//! sits in front of it so each locale is loaded successfully at most once.
//! Concurrent requests for a locale that is still loading wait for that load
//! instead of starting another one. A failed load is not remembered, so the
//! next request tries again.

use crate::i18n::{strings, Locale, LocaleRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Resolved translation data for one locale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Message id → template
    #[serde(default)]
    pub messages: BTreeMap<String, String>,

    /// Locale id handed to date formatting
    #[serde(default)]
    pub date_locale: String,
}

impl Catalog {
    pub fn new(date_locale: impl Into<String>) -> Self {
        Self {
            messages: BTreeMap::new(),
            date_locale: date_locale.into(),
        }
    }

    pub fn with_message(mut self, id: impl Into<String>, template: impl Into<String>) -> Self {
        self.messages.insert(id.into(), template.into());
        self
    }

    /// Raw template for `id`, placeholders unformatted.
    pub fn message(&self, id: &str) -> Option<&str> {
        self.messages.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("No catalog available for locale '{0}'")]
    NotFound(String),

    #[error("Failed to read catalog {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait CatalogLoader: Send + Sync {
    async fn load(&self, locale: Locale) -> Result<Catalog, CatalogError>;
}

/// Serves the compiled-in strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalogLoader;

#[async_trait]
impl CatalogLoader for BuiltinCatalogLoader {
    async fn load(&self, locale: Locale) -> Result<Catalog, CatalogError> {
        let strings = strings::for_code(locale.code())
            .ok_or_else(|| CatalogError::NotFound(locale.code().to_string()))?;
        let date_locale = LocaleRegistry::get()
            .get_by_code(locale.code())
            .map(|config| config.date_locale)
            .unwrap_or(locale.code());

        Ok(strings
            .messages()
            .into_iter()
            .fold(Catalog::new(date_locale), |catalog, (id, template)| {
                catalog.with_message(id, template)
            }))
    }
}

/// Reads `<dir>/<code>.json`.
///
/// A missing `date_locale` defaults to the locale code.
#[derive(Debug, Clone)]
pub struct DirectoryCatalogLoader {
    dir: PathBuf,
}

impl DirectoryCatalogLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<dir>/<code>.json`
    pub fn path_for(&self, locale: Locale) -> PathBuf {
        self.dir.join(format!("{}.json", locale.code()))
    }
}

#[async_trait]
impl CatalogLoader for DirectoryCatalogLoader {
    async fn load(&self, locale: Locale) -> Result<Catalog, CatalogError> {
        let path = self.path_for(locale);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogError::NotFound(locale.code().to_string()));
            }
            Err(source) => return Err(CatalogError::Io { path, source }),
        };

        let mut catalog: Catalog = serde_json::from_str(&content)
            .map_err(|source| CatalogError::Parse { path: path.clone(), source })?;
        if catalog.date_locale.is_empty() {
            catalog.date_locale = locale.code().to_string();
        }
        debug!(path = %path.display(), messages = catalog.len(), "Catalog read");
        Ok(catalog)
    }
}

/// Loads each locale's catalog at most once per process.
///
/// Concurrent requests for the same locale wait on a single load. A failed
/// load is not remembered, so the next request retries.
pub struct CatalogCache {
    loader: Arc<dyn CatalogLoader>,
    cells: Mutex<HashMap<Locale, Arc<OnceCell<Arc<Catalog>>>>>,
}

impl CatalogCache {
    pub fn new(loader: Arc<dyn CatalogLoader>) -> Self {
        Self {
            loader,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Loaded catalog for `locale`, shared between callers.
    pub async fn get(&self, locale: Locale) -> Result<Arc<Catalog>, CatalogError> {
        let cell = {
            let mut cells = match self.cells.lock() {
                Ok(cells) => cells,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(cells.entry(locale).or_default())
        };

        let catalog = cell
            .get_or_try_init(|| async {
                info!(%locale, "Loading catalog");
                self.loader.load(locale).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(catalog))
    }

    /// Locales whose catalog has loaded successfully.
    pub fn loaded(&self) -> Vec<Locale> {
        let cells = match self.cells.lock() {
            Ok(cells) => cells,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut loaded: Vec<Locale> = cells
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(locale, _)| *locale)
            .collect();
        loaded.sort_by_key(|locale| locale.code());
        loaded
    }
}

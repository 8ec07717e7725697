//! Locale resolution and message formatting.
//!
//! # Architecture
//!
//! - `registry`: the statically known set of available locales
//! - `locale`: validated `Locale` type
//! - `negotiate`: best match of ranked preferences against a registry
//! - `accept_language`: `Accept-Language` header building and parsing
//! - `persistence`: key/value stores for the explicit locale choice
//! - `store`: `LocaleStore`, the active locale with change notification
//! - `catalog`: catalog loaders and the per-session catalog cache
//! - `intl`: message formatting and the missing-translation policy
//! - `strings`: compiled-in strings
//! - `validator`: catalog consistency checks
//!
//! # Example
//!
//! ```rust,ignore
//! use kitsu_client::i18n::{LocaleRegistry, AcceptLanguageBuilder};
//!
//! let registry = LocaleRegistry::get();
//! let locale = kitsu_client::i18n::negotiate(&["fr-CA", "en"], registry);
//! assert_eq!(AcceptLanguageBuilder::new().build(locale), "fr");
//! ```

mod accept_language;
mod catalog;
mod intl;
mod locale;
mod negotiate;
pub mod persistence;
mod registry;
mod store;
pub mod strings;
mod validator;

pub use accept_language::{build_accept_language, parse_accept_language, AcceptLanguageBuilder};
#[cfg(test)]
pub(crate) use catalog::testing as catalog_testing;
pub use catalog::{
    BuiltinCatalogLoader, Catalog, CatalogCache, CatalogError, CatalogLoader,
    DirectoryCatalogLoader,
};
pub use intl::{Environment, Intl, IntlError};
pub use locale::{Locale, LocaleError};
pub use negotiate::{negotiate, normalize_tag};
pub use persistence::{CookieStore, FileStore, KeyValueStore, MemoryStore, CHOSEN_LOCALE_KEY};
pub use registry::{LocaleConfig, LocaleRegistry};
pub use store::{LocaleStore, StaticUserAgent, Subscription, UserAgent};
pub use validator::{CatalogValidator, ValidationReport};

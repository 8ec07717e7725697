//! Message formatting against a catalog.
//!
//! Templates use `{name}` placeholders. A message missing from the catalog
//! falls back to its default (source-language) message; that is never an
//! error, only a log line. Broken templates and missing arguments are errors
//! in development and a logged fallback to the raw template in production.

use crate::i18n::{Catalog, Locale};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    /// Parse an `APP_ENV` value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn is_development(&self) -> bool {
        *self == Self::Development
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Production => "production",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntlError {
    #[error("Missing translation for '{id}' in locale '{locale}'")]
    MissingTranslation { id: String, locale: String },

    #[error("Message '{id}' references missing argument '{name}'")]
    MissingArgument { id: String, name: String },

    #[error("Message '{id}' is malformed: {reason}")]
    Malformed { id: String, reason: String },
}

/// Formatter bound to one locale's catalog.
///
/// Superseded, not mutated, when the locale changes.
#[derive(Debug, Clone)]
pub struct Intl {
    locale: Locale,
    catalog: Arc<Catalog>,
    environment: Environment,
}

impl Intl {
    pub fn new(locale: Locale, catalog: Arc<Catalog>, environment: Environment) -> Self {
        Self {
            locale,
            catalog,
            environment,
        }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn date_locale(&self) -> &str {
        &self.catalog.date_locale
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Message without arguments.
    pub fn message(&self, id: &str, default: &str) -> Result<String, IntlError> {
        self.format(id, default, &[])
    }

    /// Format message `id`, substituting `{name}` placeholders from `args`.
    ///
    /// A message missing from the catalog falls back to `default`. A template
    /// that fails to render is an error in development and comes back
    /// unformatted in production.
    pub fn format(&self, id: &str, default: &str, args: &[(&str, &str)]) -> Result<String, IntlError> {
        let template = match self.catalog.message(id) {
            Some(template) => template,
            None => {
                let missing = IntlError::MissingTranslation {
                    id: id.to_string(),
                    locale: self.locale.code().to_string(),
                };
                if self.environment.is_development() {
                    debug!("{}", missing);
                } else {
                    warn!("{}", missing);
                }
                default
            }
        };

        match render(id, template, args) {
            Ok(rendered) => Ok(rendered),
            Err(e) if self.environment.is_development() => Err(e),
            Err(e) => {
                warn!("{}", e);
                Ok(template.to_string())
            }
        }
    }
}

fn render(id: &str, template: &str, args: &[(&str, &str)]) -> Result<String, IntlError> {
    let malformed = |reason: &str| IntlError::Malformed {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find(['{', '}']) {
        if rest[open..].starts_with('}') {
            return Err(malformed("unmatched '}'"));
        }
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find(['{', '}'])
            .filter(|i| after[*i..].starts_with('}'))
            .ok_or_else(|| malformed("unclosed placeholder"))?;

        let name = after[..close].trim();
        if name.is_empty() {
            return Err(malformed("empty placeholder"));
        }
        let value = args
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| IntlError::MissingArgument {
                id: id.to_string(),
                name: name.to_string(),
            })?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

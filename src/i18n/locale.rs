//! Locale type: a validated member of a [`LocaleRegistry`].
//!
//! A `Locale` can only be obtained from a registry, so holding one means the
//! code is known and enabled. The code is a `&'static str` borrowed from the
//! registry's configuration, which makes the type `Copy`.

use crate::i18n::{LocaleConfig, LocaleRegistry};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocaleError {
    #[error("Unknown locale code: '{0}'")]
    Unknown(String),

    #[error("Locale '{0}' is not enabled")]
    Disabled(String),

    #[error("Invalid locale registry: {0}")]
    InvalidRegistry(String),
}

/// A validated locale identifier (e.g. `"en"`, `"pt-br"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locale {
    code: &'static str,
}

impl Locale {
    pub(crate) fn from_config(config: &LocaleConfig) -> Self {
        Self { code: config.code }
    }

    /// Look a code up in the built-in registry.
    ///
    /// # Example
    /// ```ignore
    /// let french = Locale::from_code("fr")?;
    /// ```
    pub fn from_code(code: &str) -> Result<Locale, LocaleError> {
        LocaleRegistry::get().locale(code)
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Primary language subtag (`"pt"` for `"pt-br"`).
    pub fn primary_subtag(&self) -> &'static str {
        primary_subtag(self.code)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code)
    }
}

pub(crate) fn primary_subtag(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== from_code Tests ====================

    #[test]
    fn test_from_code_known() {
        let locale = Locale::from_code("fr").expect("Should succeed");
        assert_eq!(locale.code(), "fr");
        assert_eq!(locale.to_string(), "fr");
    }

    #[test]
    fn test_from_code_is_case_insensitive() {
        let locale = Locale::from_code("PT-BR").expect("Should succeed");
        assert_eq!(locale.code(), "pt-br");
        assert_eq!(locale.primary_subtag(), "pt");
    }

    #[test]
    fn test_from_code_unknown() {
        let result = Locale::from_code("xx");
        assert_eq!(result, Err(LocaleError::Unknown("xx".to_string())));
        assert!(result.unwrap_err().to_string().contains("Unknown"));
    }

    #[test]
    fn test_from_code_empty() {
        assert!(Locale::from_code("").is_err());
    }

    // ==================== Trait Tests ====================

    #[test]
    fn test_locale_copy_and_equality() {
        let a = Locale::from_code("ja").unwrap();
        let b = a;
        assert_eq!(a, b);
        assert_ne!(a, Locale::from_code("en").unwrap());
    }
}

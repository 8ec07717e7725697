//! Locale registry: the statically known set of available locales.
//!
//! The built-in registry is a lazily initialized `OnceLock` singleton.
//! Registries over a custom set can be built with [`LocaleRegistry::new`];
//! construction validates that exactly one enabled locale is the default.

use crate::i18n::{Locale, LocaleError};
use std::sync::OnceLock;

/// Configuration for one available locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleConfig {
    /// Lowercase BCP 47 tag (e.g. "en", "pt-br")
    pub code: &'static str,

    /// English name (e.g. "French")
    pub name: &'static str,

    /// Native name (e.g. "Français")
    pub native_name: &'static str,

    /// Locale id handed to date formatting (e.g. "fr", "pt-BR")
    pub date_locale: &'static str,

    /// Fallback when nothing else matches (exactly one per registry)
    pub is_default: bool,

    pub enabled: bool,
}

impl LocaleConfig {
    /// Enabled, non-default locale whose date locale equals its code.
    pub const fn new(code: &'static str, name: &'static str, native_name: &'static str) -> Self {
        Self {
            code,
            name,
            native_name,
            date_locale: code,
            is_default: false,
            enabled: true,
        }
    }

    pub const fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct LocaleRegistry {
    locales: Vec<LocaleConfig>,
    default_index: usize,
}

static REGISTRY: OnceLock<LocaleRegistry> = OnceLock::new();

impl LocaleRegistry {
    /// Build a registry, rejecting anything but exactly one enabled default.
    pub fn new(locales: Vec<LocaleConfig>) -> Result<Self, LocaleError> {
        let defaults: Vec<usize> = locales
            .iter()
            .enumerate()
            .filter(|(_, config)| config.is_default)
            .map(|(i, _)| i)
            .collect();

        let default_index = match defaults.as_slice() {
            [] => return Err(LocaleError::InvalidRegistry("no default locale".into())),
            [index] => *index,
            _ => {
                return Err(LocaleError::InvalidRegistry(
                    "multiple default locales".into(),
                ))
            }
        };

        if !locales[default_index].enabled {
            return Err(LocaleError::InvalidRegistry(format!(
                "default locale '{}' is disabled",
                locales[default_index].code
            )));
        }

        for (i, config) in locales.iter().enumerate() {
            if locales[..i].iter().any(|other| other.code == config.code) {
                return Err(LocaleError::InvalidRegistry(format!(
                    "duplicate locale '{}'",
                    config.code
                )));
            }
        }

        Ok(Self {
            locales,
            default_index,
        })
    }

    /// The built-in registry.
    pub fn get() -> &'static LocaleRegistry {
        REGISTRY.get_or_init(|| LocaleRegistry {
            locales: builtin_locales(),
            default_index: 0,
        })
    }

    /// Copy of this registry with a different default locale.
    pub fn with_default(&self, code: &str) -> Result<Self, LocaleError> {
        let target = self.locale(code)?;
        let locales = self
            .locales
            .iter()
            .cloned()
            .map(|mut config| {
                config.is_default = config.code == target.code();
                config
            })
            .collect();
        Self::new(locales)
    }

    /// Case-insensitive lookup, including disabled locales.
    pub fn get_by_code(&self, code: &str) -> Option<&LocaleConfig> {
        self.locales
            .iter()
            .find(|config| config.code.eq_ignore_ascii_case(code))
    }

    pub fn list_enabled(&self) -> Vec<&LocaleConfig> {
        self.locales.iter().filter(|config| config.enabled).collect()
    }

    pub fn list_all(&self) -> Vec<&LocaleConfig> {
        self.locales.iter().collect()
    }

    /// Enabled locales in registry order.
    pub fn available(&self) -> Vec<Locale> {
        self.list_enabled()
            .into_iter()
            .map(Locale::from_config)
            .collect()
    }

    pub fn is_enabled(&self, code: &str) -> bool {
        self.get_by_code(code)
            .map(|config| config.enabled)
            .unwrap_or(false)
    }

    /// Resolve an enabled locale by exact code.
    pub fn locale(&self, code: &str) -> Result<Locale, LocaleError> {
        match self.get_by_code(code) {
            Some(config) if config.enabled => Ok(Locale::from_config(config)),
            Some(_) => Err(LocaleError::Disabled(code.to_string())),
            None => Err(LocaleError::Unknown(code.to_string())),
        }
    }

    pub fn default_locale(&self) -> Locale {
        Locale::from_config(&self.locales[self.default_index])
    }

    /// Display names and flags for a locale.
    pub fn config(&self, locale: Locale) -> Option<&LocaleConfig> {
        self.get_by_code(locale.code())
    }
}

fn builtin_locales() -> Vec<LocaleConfig> {
    vec![
        LocaleConfig::new("en", "English", "English").as_default(),
        LocaleConfig::new("es", "Spanish", "Español"),
        LocaleConfig::new("fr", "French", "Français"),
        LocaleConfig::new("ja", "Japanese", "日本語"),
        LocaleConfig {
            date_locale: "pt-BR",
            ..LocaleConfig::new("pt-br", "Portuguese (Brazil)", "Português (Brasil)")
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_locales() -> Vec<LocaleConfig> {
        vec![
            LocaleConfig::new("en", "English", "English").as_default(),
            LocaleConfig::new("fr", "French", "Français"),
            LocaleConfig::new("ja", "Japanese", "日本語"),
        ]
    }

    // ==================== Built-in Registry Tests ====================

    #[test]
    fn test_registry_get_returns_singleton() {
        let registry1 = LocaleRegistry::get();
        let registry2 = LocaleRegistry::get();
        assert!(std::ptr::eq(registry1, registry2));
    }

    #[test]
    fn test_builtin_default_is_english() {
        let registry = LocaleRegistry::get();
        assert_eq!(registry.default_locale().code(), "en");
        assert_eq!(registry.list_enabled().len(), 5);
    }

    #[test]
    fn test_get_by_code_is_case_insensitive() {
        let config = LocaleRegistry::get().get_by_code("PT-BR").unwrap();
        assert_eq!(config.code, "pt-br");
        assert_eq!(config.date_locale, "pt-BR");
        assert!(!config.is_default);
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_new_requires_single_default() {
        let mut none = three_locales();
        none[0].is_default = false;
        assert!(matches!(
            LocaleRegistry::new(none),
            Err(LocaleError::InvalidRegistry(_))
        ));

        let mut two = three_locales();
        two[1].is_default = true;
        assert!(LocaleRegistry::new(two).is_err());
    }

    #[test]
    fn test_new_rejects_disabled_default() {
        let mut locales = three_locales();
        locales[0].enabled = false;
        assert!(LocaleRegistry::new(locales).is_err());
    }

    #[test]
    fn test_new_rejects_duplicates() {
        let mut locales = three_locales();
        locales.push(LocaleConfig::new("fr", "French", "Français"));
        assert!(LocaleRegistry::new(locales).is_err());
    }

    // ==================== Lookup Tests ====================

    #[test]
    fn test_disabled_locale_is_not_available() {
        let mut locales = three_locales();
        locales[2].enabled = false;
        let registry = LocaleRegistry::new(locales).unwrap();

        assert!(!registry.is_enabled("ja"));
        assert_eq!(registry.locale("ja"), Err(LocaleError::Disabled("ja".into())));
        assert_eq!(registry.available().len(), 2);
        assert_eq!(registry.list_all().len(), 3);
    }

    #[test]
    fn test_with_default_moves_the_flag() {
        let registry = LocaleRegistry::new(three_locales()).unwrap();
        let french = registry.with_default("fr").unwrap();

        assert_eq!(french.default_locale().code(), "fr");
        assert_eq!(french.list_enabled().iter().filter(|c| c.is_default).count(), 1);
        assert!(registry.with_default("de").is_err());
    }
}

//! Catalog validation against the canonical catalog.
//!
//! Placeholder mismatches are errors, since formatting would fail or drop
//! data. Missing and extra keys are warnings: a missing key falls back to its
//! default message and an extra key is simply never used.

use crate::i18n::Catalog;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Validation report containing errors and warnings about a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        !self.has_errors() && !self.has_warnings()
    }
}

/// Checks a translated catalog against the canonical one.
pub struct CatalogValidator;

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

impl CatalogValidator {
    /// Placeholder mismatches are errors. Missing and unknown messages are
    /// warnings.
    pub fn validate(canonical: &Catalog, translated: &Catalog) -> ValidationReport {
        let mut report = ValidationReport::new();

        for (id, template) in &canonical.messages {
            let Some(translation) = translated.message(id) else {
                report.warnings.push(format!("Missing translation for '{}'", id));
                continue;
            };

            let expected = Self::extract_placeholders(template);
            let found = Self::extract_placeholders(translation);
            if expected != found {
                report.errors.push(format!(
                    "Placeholder mismatch in '{}': expected {:?}, found {:?}",
                    id, expected, found
                ));
            }
        }

        for id in translated.messages.keys() {
            if !canonical.messages.contains_key(id) {
                report.warnings.push(format!("Unknown message '{}'", id));
            }
        }

        report
    }

    fn extract_placeholders(template: &str) -> BTreeSet<String> {
        let regex = PLACEHOLDER_REGEX
            .get_or_init(|| Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").unwrap());

        regex
            .captures_iter(template)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::strings;

    fn canonical() -> Catalog {
        Catalog::new("en")
            .with_message("title", "Uh oh!")
            .with_message("status", "Error {status}")
    }

    // ==================== Placeholder Extraction Tests ====================

    #[test]
    fn test_extract_placeholders() {
        let found = CatalogValidator::extract_placeholders("{a} and { b } but not {1x}");
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_matching_catalog_is_clean() {
        let translated = Catalog::new("fr")
            .with_message("title", "Oh non !")
            .with_message("status", "Erreur {status}");
        assert!(CatalogValidator::validate(&canonical(), &translated).is_clean());
    }

    #[test]
    fn test_placeholder_mismatch_is_error() {
        let translated = Catalog::new("fr")
            .with_message("title", "Oh non !")
            .with_message("status", "Erreur {statut}");
        let report = CatalogValidator::validate(&canonical(), &translated);
        assert!(report.has_errors());
        assert!(report.errors[0].contains("status"));
    }

    #[test]
    fn test_missing_and_extra_keys_are_warnings() {
        let translated = Catalog::new("fr")
            .with_message("status", "Erreur {status}")
            .with_message("bonus", "Encore");
        let report = CatalogValidator::validate(&canonical(), &translated);
        assert!(!report.has_errors());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("'title'")));
        assert!(report.warnings.iter().any(|w| w.contains("'bonus'")));
    }

    #[test]
    fn test_builtin_strings_are_consistent() {
        let to_catalog = |strings: &strings::LocaleStrings| {
            strings
                .messages()
                .into_iter()
                .fold(Catalog::default(), |catalog, (id, template)| {
                    catalog.with_message(id, template)
                })
        };
        let english = to_catalog(&strings::ENGLISH_STRINGS);
        for other in [
            &strings::SPANISH_STRINGS,
            &strings::FRENCH_STRINGS,
            &strings::JAPANESE_STRINGS,
            &strings::PORTUGUESE_BR_STRINGS,
        ] {
            let report = CatalogValidator::validate(&english, &to_catalog(other));
            assert!(report.is_clean(), "{:?}", report);
        }
    }
}

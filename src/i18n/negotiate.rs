//! Locale negotiation: best match of ranked preferences against a registry.
//!
//! Preferences are tried in rank order. For each one the first rule that
//! matches wins:
//!
//! 1. exact tag (`fr-ca` → `fr-ca`)
//! 2. primary subtag (`fr-ca` → `fr`)
//! 3. any available locale with the same primary subtag (`pt-pt` → `pt-br`)
//!
//! When no preference matches the registry default is returned.

use crate::i18n::locale::primary_subtag;
use crate::i18n::{Locale, LocaleRegistry};
use regex::Regex;
use std::sync::OnceLock;

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z]{1,8}(-[a-z0-9]{1,8})*$").expect("Invalid language tag regex")
    })
}

/// Lowercase a tag, turning POSIX `_` separators into `-`.
///
/// Returns `None` for wildcards and anything that is not a language tag.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let normalized = tag.trim().replace('_', "-").to_ascii_lowercase();
    tag_pattern().is_match(&normalized).then_some(normalized)
}

/// Pick the best enabled locale for a ranked preference list.
///
/// Each preference is tried in order: exact tag, then its primary subtag,
/// then any locale sharing that primary subtag. Unparseable tags are skipped.
/// Falls back to the registry default.
pub fn negotiate<S: AsRef<str>>(preferences: &[S], registry: &LocaleRegistry) -> Locale {
    let available = registry.available();

    for preference in preferences {
        let Some(tag) = normalize_tag(preference.as_ref()) else {
            continue;
        };
        let primary = primary_subtag(&tag);

        if let Some(locale) = available.iter().find(|l| l.code() == tag) {
            return *locale;
        }
        if let Some(locale) = available.iter().find(|l| l.code() == primary) {
            return *locale;
        }
        if let Some(locale) = available.iter().find(|l| l.primary_subtag() == primary) {
            return *locale;
        }
    }

    registry.default_locale()
}

//! `Accept-Language` header building and parsing.
//!
//! The primary locale alone produces a bare tag (`"fr"`). With fallbacks the
//! primary gets `q=1` and fallback *i* gets `q = 0.5^(i+1)`, floored at
//! `0.001` and printed with at most three decimals:
//!
//! ```text
//! fr;q=1, en;q=0.5, ja;q=0.25
//! ```

use crate::i18n::negotiate::normalize_tag;
use crate::i18n::Locale;

const MIN_QUALITY: f64 = 0.001;

/// Builds the header for the active locale plus a configured fallback ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptLanguageBuilder {
    fallbacks: Vec<String>,
}

impl AcceptLanguageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags appended after the active locale, in rank order.
    pub fn with_fallbacks<I, S>(mut self, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallbacks = fallbacks.into_iter().map(Into::into).collect();
        self
    }

    pub fn fallbacks(&self) -> &[String] {
        &self.fallbacks
    }

    /// Header value for `locale`, e.g. `fr;q=1, en;q=0.5`.
    pub fn build(&self, locale: Locale) -> String {
        build_accept_language(locale.code(), &self.fallbacks)
    }
}

/// Build a header value from a primary tag and ranked fallbacks.
///
/// Fallbacks equal to the primary (or repeated) are skipped and do not use up
/// a quality step.
pub fn build_accept_language<S: AsRef<str>>(primary: &str, fallbacks: &[S]) -> String {
    let mut seen = vec![primary.to_ascii_lowercase()];
    let mut parts = Vec::new();

    for fallback in fallbacks {
        let tag = fallback.as_ref().trim();
        if tag.is_empty() || seen.contains(&tag.to_ascii_lowercase()) {
            continue;
        }
        seen.push(tag.to_ascii_lowercase());
        let quality = 0.5f64.powi(parts.len() as i32 + 1).max(MIN_QUALITY);
        parts.push(format!("{};q={}", tag, format_quality(quality)));
    }

    if parts.is_empty() {
        return primary.to_string();
    }

    let mut header = format!("{};q=1", primary);
    for part in parts {
        header.push_str(", ");
        header.push_str(&part);
    }
    header
}

fn format_quality(quality: f64) -> String {
    let fixed = format!("{:.3}", quality);
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Parse an incoming header into tags ordered by descending quality.
///
/// Ties keep header order; entries with `q=0`, wildcards and malformed tags
/// are dropped.
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut ranked: Vec<(String, f64)> = header
        .split(',')
        .filter_map(|entry| {
            let mut pieces = entry.split(';');
            let tag = normalize_tag(pieces.next()?)?;
            let mut quality = 1.0;
            for param in pieces {
                if let Some(value) = param.trim().strip_prefix("q=") {
                    quality = value.trim().parse::<f64>().ok()?;
                }
            }
            (quality > 0.0).then_some((tag, quality))
        })
        .collect();

    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.into_iter().map(|(tag, _)| tag).collect()
}

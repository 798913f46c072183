use serde::{Deserialize, Serialize};

/// How broadly untokenised multilingual values are duplicated across locales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocaleMatch {
    /// Only the exact locale tag, e.g. `en_US`.
    Exact,
    /// The exact tag plus its bare language, e.g. `en_US` and `en`.
    ExactAndLanguage,
    /// Exact tag, bare language, and the any-locale tag.
    All,
}

/// Language part of a locale tag (`en_US` -> `en`).
pub fn language_of(locale: &str) -> &str {
    match locale.find('_') {
        Some(pos) => &locale[..pos],
        None => locale,
    }
}

/// Expand one locale tag into the set of tags an untokenised value is
/// duplicated under. Order is most-specific first, deduplicated.
pub fn expand_locales(locale: &str, breadth: LocaleMatch) -> Vec<String> {
    let mut expanded = vec![locale.to_string()];
    match breadth {
        LocaleMatch::Exact => {}
        LocaleMatch::ExactAndLanguage | LocaleMatch::All => {
            let language = language_of(locale);
            if language != locale {
                expanded.push(language.to_string());
            }
            if breadth == LocaleMatch::All {
                expanded.push(String::new());
            }
        }
    }
    expanded
}

/// Locale-tagged term literal, the form untokenised multilingual values take
/// in the index: `{en}value`.
pub fn locale_literal(locale: &str, text: &str) -> String {
    format!("{{{}}}{}", locale, text)
}

/// True when a term carries a locale tag prefix. Such terms are excluded
/// from plain wildcard expansion so patterns cannot match across locales.
pub fn is_locale_literal(term: &str) -> bool {
    term.starts_with('{') && term.contains('}')
}

/// Stored form of one multilingual field value: `\0<locale>\0<text>`. The
/// analyser recovers the locale tag from this marker at tokenisation time.
pub fn ml_stored_value(locale: &str, text: &str) -> String {
    format!("\u{0}{}\u{0}{}", locale, text)
}

/// Split a stored multilingual value back into (locale, text).
pub fn split_ml_stored_value(value: &str) -> Option<(&str, &str)> {
    let rest = value.strip_prefix('\u{0}')?;
    let end = rest.find('\u{0}')?;
    Some((&rest[..end], &rest[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_breadth() {
        assert_eq!(expand_locales("en_US", LocaleMatch::Exact), vec!["en_US"]);
        assert_eq!(
            expand_locales("en_US", LocaleMatch::ExactAndLanguage),
            vec!["en_US", "en"]
        );
        assert_eq!(
            expand_locales("en", LocaleMatch::ExactAndLanguage),
            vec!["en"]
        );
        assert_eq!(
            expand_locales("fr_CA", LocaleMatch::All),
            vec!["fr_CA", "fr", ""]
        );
    }

    #[test]
    fn ml_stored_round_trip() {
        let stored = ml_stored_value("en_GB", "the value");
        assert_eq!(split_ml_stored_value(&stored), Some(("en_GB", "the value")));
        assert_eq!(split_ml_stored_value("plain"), None);
    }

    #[test]
    fn locale_literals() {
        assert_eq!(locale_literal("en", "Hello"), "{en}Hello");
        assert!(is_locale_literal("{en}Hello"));
        assert!(!is_locale_literal("Hello"));
    }
}

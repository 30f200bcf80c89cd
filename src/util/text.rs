//! Small string helpers shared by the validator, monitor, cache and learning store.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| static_regex(r"\s+"));

/// Compiles a pattern written into this crate's source. Those patterns are
/// fixed at build time and covered by the unit tests, so a failure is a bug.
#[allow(clippy::expect_used)]
pub(crate) fn static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in regex pattern must compile")
}

/// Collapses every whitespace run to a single space and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Canonical form of a SQL string used for hashing: whitespace collapsed,
/// trailing semicolons dropped, lowercased outside single-quoted literals.
pub fn normalize_sql(sql: &str) -> String {
    let collapsed = collapse_whitespace(sql);
    let trimmed = collapsed.trim_end_matches(';').trim_end();

    let mut out = String::with_capacity(trimmed.len());
    let mut in_literal = false;
    for c in trimmed.chars() {
        if c == '\'' {
            // '' inside a literal closes and reopens it, which keeps both quotes
            in_literal = !in_literal;
            out.push(c);
        } else if in_literal {
            out.push(c);
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// First 16 hex characters of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(16);
    encoded
}

/// Content hash of normalised SQL; the key for breaker and health records.
pub fn fingerprint(sql: &str) -> String {
    short_hash(&normalize_sql(sql))
}

/// Escapes a value for embedding inside a single-quoted SQL literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Strips control characters and escapes quotes in a user-supplied value.
pub fn sanitize_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .collect();
    escape_literal(cleaned.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_layout_and_case() {
        let a = fingerprint("SELECT  COUNT(*)\n FROM Event;");
        let b = fingerprint("select count(*) from event");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, fingerprint("select count(*) from eventviolation"));
    }

    #[test]
    fn fingerprint_keeps_literal_case() {
        let olaya = fingerprint("SELECT 1 FROM Locations l WHERE l.Name = 'Olaya'");
        let lower = fingerprint("select 1 from locations l where l.name = 'olaya'");
        assert_ne!(olaya, lower);
        assert_eq!(olaya, fingerprint("select 1  FROM locations L where L.NAME = 'Olaya';"));
        assert_eq!(
            normalize_sql("SELECT 'It''s Here' AS X"),
            "select 'It''s Here' as x"
        );
    }

    #[test]
    fn sanitize_strips_controls_and_escapes_quotes() {
        assert_eq!(sanitize_value("O'Brien\u{0}\n"), "O''Brien");
        assert_eq!(escape_literal("a'b'c"), "a''b''c");
    }
}

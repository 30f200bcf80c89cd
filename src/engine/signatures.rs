//! Injection signature table scanned by the validator.
//!
//! This is defence in depth; execution still goes through the database driver.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

use super::validator::Severity;

pub struct Signature {
    pub pattern: Regex,
    pub description: &'static str,
    pub severity: Severity,
}

/// (pattern, description, severity), ordered most-common-first so that
/// `quick_validate` can scan only the head of the table.
const SIGNATURE_SOURCE: &[(&str, &str, Severity)] = &[
    (r";\s*--", "comment after statement terminator", Severity::Error),
    (
        r";\s*(DROP|DELETE|INSERT|UPDATE|TRUNCATE|ALTER|CREATE|EXEC|GRANT|REVOKE|MERGE)\b",
        "stacked write statement",
        Severity::Error,
    ),
    (r"\bUNION\s+ALL\s+SELECT\b", "UNION ALL exfiltration", Severity::Error),
    (r"\bUNION\s+SELECT\b", "UNION exfiltration", Severity::Error),
    (r"\bOR\s+1\s*=\s*1\b", "always-true numeric predicate", Severity::Error),
    (r"\bOR\s+'1'\s*=\s*'1'", "always-true string predicate", Severity::Error),
    (r"\bOR\s+''\s*=\s*''", "always-true empty-string predicate", Severity::Error),
    (r"'\s*OR\s+''\s*=\s*'", "quote-breaking always-true predicate", Severity::Error),
    (r"\bWAITFOR\s+DELAY\b", "time-based blind injection", Severity::Error),
    (r"\bSLEEP\s*\(", "time-based blind injection", Severity::Error),
    (r"\bBENCHMARK\s*\(", "time-based blind injection", Severity::Error),
    (r"\bPG_SLEEP\s*\(", "time-based blind injection", Severity::Error),
    (r"\bXP_CMDSHELL\b", "shell execution built-in", Severity::Error),
    (r"\bSP_EXECUTESQL\b", "dynamic SQL built-in", Severity::Error),
    (r"\bINTO\s+OUTFILE\b", "file write", Severity::Error),
    (r"\bINTO\s+DUMPFILE\b", "file write", Severity::Error),
    (r"\bLOAD_FILE\s*\(", "file read", Severity::Error),
    (r"\bCOPY\s+.+\s+TO\s+'", "file export", Severity::Error),
    (r"\bREAD_(CSV|PARQUET|JSON)(_AUTO)?\s*\(", "file read table function", Severity::Error),
    (r"@@VERSION\b", "server fingerprinting", Severity::Error),
    (r"@@DATADIR\b", "server fingerprinting", Severity::Error),
    (r"\bCHAR\s*\(\s*\d+\s*\)\s*\+", "character-code string building", Severity::Warning),
    (r"\bINFORMATION_SCHEMA\.", "schema enumeration", Severity::Info),
];

/// Number of leading signatures `quick_validate` checks.
pub const QUICK_SCAN_DEPTH: usize = 10;

pub static SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    SIGNATURE_SOURCE
        .iter()
        .filter_map(|(source, description, severity)| {
            match Regex::new(&format!("(?i){}", source)) {
                Ok(pattern) => Some(Signature {
                    pattern,
                    description,
                    severity: *severity,
                }),
                Err(e) => {
                    error!("Dropping invalid injection signature {}: {}", source, e);
                    None
                }
            }
        })
        .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_signature_compiles() {
        assert_eq!(SIGNATURES.len(), SIGNATURE_SOURCE.len());
    }

    #[test]
    fn head_of_table_is_all_errors() {
        assert!(
            SIGNATURES
                .iter()
                .take(QUICK_SCAN_DEPTH)
                .all(|s| s.severity == Severity::Error)
        );
    }
}

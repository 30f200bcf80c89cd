//! Static safety and quality analysis of candidate SQL.
//!
//! The validator is pure: the same SQL and schema always yield the same
//! [`ValidationResult`], so the generator can call it on every correction round.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::signatures::{QUICK_SCAN_DEPTH, SIGNATURES};
use crate::config::ValidatorConfig;
use crate::schema::SchemaProvider;
use crate::util::text::{collapse_whitespace, static_regex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    EmptyQuery,
    QueryTooLong,
    InjectionDetected,
    SuspiciousPattern,
    SchemaEnumeration,
    ParseError,
    MultipleStatements,
    WriteOperation,
    DangerousKeyword,
    UnsupportedStatement,
    UnknownTable,
    TooManyJoins,
    TooManySubqueries,
    TooManyConditions,
    SelectStar,
    NoWhereClause,
    UnboundedSort,
    LeadingWildcard,
    NonSargable,
    PossibleImplicitConversion,
}

impl IssueCode {
    /// Codes whose presence means the SQL must not run at all.
    fn is_safety(&self) -> bool {
        matches!(
            self,
            IssueCode::InjectionDetected
                | IssueCode::MultipleStatements
                | IssueCode::WriteOperation
                | IssueCode::DangerousKeyword
                | IssueCode::UnsupportedStatement
                | IssueCode::UnknownTable
        )
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub is_safe: bool,
    pub issues: Vec<ValidationIssue>,
    pub tables: Vec<String>,
    pub complexity: u8,
    pub normalized_sql: String,
}

impl ValidationResult {
    fn new(sql: &str) -> Self {
        Self {
            is_valid: true,
            is_safe: true,
            issues: Vec::new(),
            tables: Vec::new(),
            complexity: 1,
            normalized_sql: collapse_whitespace(sql),
        }
    }

    fn push(&mut self, severity: Severity, code: IssueCode, message: impl Into<String>) {
        if severity == Severity::Error {
            self.is_valid = false;
            if code.is_safety() {
                self.is_safe = false;
            }
        }
        self.issues.push(ValidationIssue {
            severity,
            code,
            message: message.into(),
        });
    }

    pub fn is_executable(&self) -> bool {
        self.is_valid && self.is_safe
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn has_code(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// "CODE: message" lines for every error, for logs and correction prompts.
    pub fn error_summary(&self) -> Vec<String> {
        self.errors()
            .map(|i| format!("{}: {}", i.code, i.message))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickCheck {
    pub ok: bool,
    pub reason: Option<String>,
}

const WRITE_VERBS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "CREATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE", "MERGE", "REPLACE", "CALL", "ATTACH", "DETACH", "COPY", "VACUUM",
    "INSTALL", "LOAD", "SET", "PRAGMA", "EXPORT", "IMPORT",
];

static DANGEROUS_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    static_regex(
        r"(?i)(?:^|[^.\w])(INSERT|UPDATE|DELETE|DROP|TRUNCATE|ALTER|CREATE|GRANT|REVOKE|EXEC|EXECUTE|MERGE|ATTACH|DETACH)\b",
    )
});
static REPLACE_INTO: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bREPLACE\s+INTO\b"));
static LEADING_WORD: Lazy<Regex> = Lazy::new(|| static_regex(r"^\s*\(*\s*([A-Za-z]+)"));
static JOIN: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bJOIN\b"));
static SUBQUERY: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\(\s*SELECT\b"));
static SELECT: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bSELECT\b"));
static BOOLEAN_OP: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\b(AND|OR)\b"));
static SELECT_STAR: Lazy<Regex> = Lazy::new(|| {
    static_regex(r"(?i)\bSELECT\s+(?:DISTINCT\s+)?(?:TOP\s+\d+\s+)?\*")
});
static WHERE: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bWHERE\b"));
static FROM: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bFROM\b"));
static ORDER_BY: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bORDER\s+BY\b"));
static ROW_BOUND: Lazy<Regex> =
    Lazy::new(|| static_regex(r"(?i)\b(LIMIT|TOP|FETCH\s+FIRST)\b"));
static LEADING_WILDCARD: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bLIKE\s+N?'%"));
static NON_SARGABLE: Lazy<Regex> = Lazy::new(|| {
    static_regex(r"(?i)\bWHERE\b.*\b(UPPER|LOWER|CAST|CONVERT|SUBSTRING|TRIM|ISNULL|COALESCE)\s*\(")
});
static IMPLICIT_CONVERSION: Lazy<Regex> =
    Lazy::new(|| static_regex(r"(?i)\b\w*id\s*=\s*'\d+'"));
static FROM_FUNCTIONS: Lazy<Regex> = Lazy::new(|| {
    static_regex(r"(?i)\b(EXTRACT|SUBSTRING|TRIM|POSITION|OVERLAY)\s*\([^()]*\)")
});
static TABLE_REF: Lazy<Regex> = Lazy::new(|| {
    static_regex(
        r#"(?i)\b(?:FROM|JOIN)\s+((?:"[^"]+"|\[[^\]]+\]|[A-Za-z_][\w$]*)(?:\s*\.\s*(?:"[^"]+"|\[[^\]]+\]|[A-Za-z_][\w$]*))*)"#,
    )
});
static CTE_NAME: Lazy<Regex> = Lazy::new(|| {
    static_regex(r"(?i)(?:\bWITH\s+(?:RECURSIVE\s+)?|,\s*)([A-Za-z_]\w*)\s+AS\s*\(")
});
static AGGREGATE: Lazy<Regex> = Lazy::new(|| {
    static_regex(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX|STDDEV|STDEV|VARIANCE|MEDIAN)\s*\(")
});
static WINDOW: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bOVER\s*\("));
static GROUP_BY: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bGROUP\s+BY\b"));
static HAVING: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bHAVING\b"));

const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "pg_catalog"];

/// SQL with comments removed and the insides of string literals blanked.
///
/// `identifiers` also blanks double-quoted identifiers, for keyword scans.
struct Masked {
    literals: String,
    identifiers: String,
    balanced: bool,
}

fn mask(sql: &str) -> Masked {
    let chars: Vec<char> = sql.chars().collect();
    let mut literals = String::with_capacity(sql.len());
    let mut identifiers = String::with_capacity(sql.len());
    let mut depth: i64 = 0;
    let mut balanced = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                literals.push(' ');
                identifiers.push(' ');
                continue;
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                if i >= chars.len() {
                    balanced = false;
                }
                i += 2;
                literals.push(' ');
                identifiers.push(' ');
                continue;
            }
            '\'' | '"' => {
                let quote = c;
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    if chars[j] == quote {
                        if chars.get(j + 1) == Some(&quote) {
                            j += 2;
                            continue;
                        }
                        closed = true;
                        break;
                    }
                    j += 1;
                }
                if !closed {
                    balanced = false;
                }
                let end = j.min(chars.len().saturating_sub(1));
                if quote == '"' {
                    literals.extend(&chars[i..=end]);
                } else {
                    literals.push_str("''");
                }
                identifiers.push_str(if quote == '"' { "\"\"" } else { "''" });
                i = j + 1;
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    balanced = false;
                }
            }
            _ => {}
        }
        literals.push(c);
        identifiers.push(c);
        i += 1;
    }

    Masked {
        literals,
        identifiers,
        balanced: balanced && depth == 0,
    }
}

fn clean_identifier(part: &str) -> String {
    part.trim()
        .trim_matches(|c| c == '"' || c == '[' || c == ']')
        .to_string()
}

pub struct QueryValidator {
    config: ValidatorConfig,
    schema: Option<Arc<dyn SchemaProvider>>,
}

impl QueryValidator {
    pub fn new(config: ValidatorConfig, schema: Option<Arc<dyn SchemaProvider>>) -> Self {
        Self { config, schema }
    }

    pub fn validate(&self, sql: &str) -> ValidationResult {
        self.validate_with(sql, false)
    }

    pub fn validate_with(&self, sql: &str, allow_write: bool) -> ValidationResult {
        let mut result = ValidationResult::new(sql);
        let trimmed = sql.trim();

        if trimmed.is_empty() {
            result.push(Severity::Error, IssueCode::EmptyQuery, "Query is empty");
            return result;
        }
        if trimmed.len() > self.config.max_query_length {
            result.push(
                Severity::Error,
                IssueCode::QueryTooLong,
                format!(
                    "Query length {} exceeds maximum {}",
                    trimmed.len(),
                    self.config.max_query_length
                ),
            );
            return result;
        }

        self.scan_signatures(trimmed, &mut result);

        let masked = mask(trimmed);
        if !masked.balanced {
            result.push(
                Severity::Error,
                IssueCode::ParseError,
                "Unbalanced parentheses, quotes or comments",
            );
        }

        let is_query = self.classify(&masked, allow_write, &mut result);
        if is_query {
            self.analyze_structure(trimmed, &masked.literals, &mut result);
        }
        self.check_tables(&masked.literals, &mut result);
        result.complexity = complexity(&masked.literals);

        debug!(
            valid = result.is_valid,
            safe = result.is_safe,
            issues = result.issues.len(),
            complexity = result.complexity,
            "Validated SQL"
        );
        result
    }

    /// Cheap pre-filter: read-only leading keyword and the head of the
    /// signature table only.
    pub fn quick_validate(&self, sql: &str) -> QuickCheck {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return QuickCheck {
                ok: false,
                reason: Some("Query is empty".to_string()),
            };
        }
        let kind = extract_query_type(trimmed);
        if kind != "SELECT" && kind != "WITH" {
            return QuickCheck {
                ok: false,
                reason: Some(format!("Only SELECT/WITH statements are allowed, got {}", kind)),
            };
        }
        for signature in SIGNATURES.iter().take(QUICK_SCAN_DEPTH) {
            if signature.severity == Severity::Error && signature.pattern.is_match(trimmed) {
                return QuickCheck {
                    ok: false,
                    reason: Some(format!("Suspicious pattern: {}", signature.description)),
                };
            }
        }
        QuickCheck {
            ok: true,
            reason: None,
        }
    }

    fn scan_signatures(&self, sql: &str, result: &mut ValidationResult) {
        for signature in SIGNATURES.iter() {
            if !signature.pattern.is_match(sql) {
                continue;
            }
            let code = match signature.severity {
                Severity::Error => IssueCode::InjectionDetected,
                Severity::Warning => IssueCode::SuspiciousPattern,
                Severity::Info => IssueCode::SchemaEnumeration,
            };
            result.push(
                signature.severity,
                code,
                format!("Potential SQL injection: {}", signature.description),
            );
        }
    }

    /// Returns true when the statement is a read query worth structural analysis.
    fn classify(&self, masked: &Masked, allow_write: bool, result: &mut ValidationResult) -> bool {
        let statements: Vec<&str> = masked
            .identifiers
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if statements.len() > 1 {
            result.push(
                Severity::Error,
                IssueCode::MultipleStatements,
                format!("Found {} statements; only one is allowed", statements.len()),
            );
        }

        let mut is_query = false;
        for (index, statement) in statements.iter().enumerate() {
            let kind = extract_query_type(statement);
            let read_only = kind == "SELECT" || kind == "WITH";
            if index == 0 {
                is_query = read_only;
            }

            if !read_only {
                if WRITE_VERBS.contains(&kind.as_str()) {
                    if !allow_write {
                        result.push(
                            Severity::Error,
                            IssueCode::WriteOperation,
                            format!("Write operation not allowed: {}", kind),
                        );
                    }
                } else {
                    result.push(
                        Severity::Error,
                        IssueCode::UnsupportedStatement,
                        format!("Unsupported statement type: {}", kind),
                    );
                }
                continue;
            }

            if allow_write {
                continue;
            }
            if let Some(caps) = DANGEROUS_KEYWORD.captures(statement) {
                result.push(
                    Severity::Error,
                    IssueCode::DangerousKeyword,
                    format!("Dangerous keyword found: {}", caps[1].to_uppercase()),
                );
            } else if REPLACE_INTO.is_match(statement) {
                result.push(
                    Severity::Error,
                    IssueCode::DangerousKeyword,
                    "Dangerous keyword found: REPLACE INTO",
                );
            }
        }
        is_query
    }

    fn analyze_structure(&self, raw: &str, masked: &str, result: &mut ValidationResult) {
        let joins = JOIN.find_iter(masked).count();
        if joins > self.config.max_joins {
            result.push(
                Severity::Warning,
                IssueCode::TooManyJoins,
                format!("Query has {} joins (max {})", joins, self.config.max_joins),
            );
        }

        let subqueries = SUBQUERY.find_iter(masked).count();
        if subqueries > self.config.max_subqueries {
            result.push(
                Severity::Warning,
                IssueCode::TooManySubqueries,
                format!(
                    "Query has {} subqueries (max {})",
                    subqueries, self.config.max_subqueries
                ),
            );
        }

        let conditions = BOOLEAN_OP.find_iter(masked).count();
        if conditions > self.config.max_conditions {
            result.push(
                Severity::Warning,
                IssueCode::TooManyConditions,
                format!(
                    "Query has {} boolean conditions (max {})",
                    conditions, self.config.max_conditions
                ),
            );
        }

        if SELECT_STAR.is_match(masked) {
            result.push(
                Severity::Info,
                IssueCode::SelectStar,
                "SELECT * returns every column; list the columns you need",
            );
        }
        if FROM.is_match(masked) && !WHERE.is_match(masked) {
            result.push(
                Severity::Info,
                IssueCode::NoWhereClause,
                "No WHERE clause; the query scans whole tables",
            );
        }
        if ORDER_BY.is_match(masked) && !ROW_BOUND.is_match(masked) {
            result.push(
                Severity::Info,
                IssueCode::UnboundedSort,
                "ORDER BY without LIMIT sorts the full result",
            );
        }

        // literal-sensitive hints look at the raw text
        if LEADING_WILDCARD.is_match(raw) {
            result.push(
                Severity::Info,
                IssueCode::LeadingWildcard,
                "LIKE with a leading wildcard cannot use an index",
            );
        }
        if NON_SARGABLE.is_match(masked) {
            result.push(
                Severity::Info,
                IssueCode::NonSargable,
                "Function applied to a column in the WHERE clause",
            );
        }
        if IMPLICIT_CONVERSION.is_match(raw) {
            result.push(
                Severity::Info,
                IssueCode::PossibleImplicitConversion,
                "Identifier compared against a quoted number",
            );
        }
    }

    fn check_tables(&self, masked: &str, result: &mut ValidationResult) {
        let (tables, system_refs) = extract_tables(masked);
        result.tables = tables;

        let Some(schema) = &self.schema else {
            return;
        };
        if schema.get_all_tables().is_empty() {
            debug!("Schema provider has no tables loaded; skipping table check");
            return;
        }

        let unknown: Vec<String> = result
            .tables
            .iter()
            .filter(|t| !system_refs.contains(t) && !schema.has_table(t))
            .cloned()
            .collect();
        for table in unknown {
            result.push(
                Severity::Error,
                IssueCode::UnknownTable,
                format!("Unknown table: {}", table),
            );
        }
    }
}

/// Upper-cased leading keyword, e.g. `SELECT`, `WITH`, `DROP`.
pub fn extract_query_type(sql: &str) -> String {
    LEADING_WORD
        .captures(sql)
        .map(|caps| caps[1].to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Referenced table names (CTEs excluded) plus the subset that live in
/// system schemas.
fn extract_tables(masked: &str) -> (Vec<String>, Vec<String>) {
    let without_from_functions = FROM_FUNCTIONS.replace_all(masked, "x");
    let text = without_from_functions.as_ref();

    let ctes: Vec<String> = CTE_NAME
        .captures_iter(text)
        .map(|caps| caps[1].to_lowercase())
        .collect();

    let mut tables: Vec<String> = Vec::new();
    let mut system = Vec::new();
    for caps in TABLE_REF.captures_iter(text) {
        let Some(whole) = caps.get(1) else {
            continue;
        };
        // table functions such as range(10)
        if text[whole.end()..].trim_start().starts_with('(') {
            continue;
        }
        let parts: Vec<String> = whole.as_str().split('.').map(clean_identifier).collect();
        let Some(name) = parts.last().cloned() else {
            continue;
        };
        if name.is_empty() || ctes.contains(&name.to_lowercase()) {
            continue;
        }
        if tables.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
            continue;
        }
        let in_system_schema = parts.len() > 1
            && SYSTEM_SCHEMAS
                .iter()
                .any(|s| parts[0].eq_ignore_ascii_case(s));
        if in_system_schema {
            system.push(name.clone());
        }
        tables.push(name);
    }
    (tables, system)
}

/// 1-10 score from joins, nesting, aggregation and window functions.
fn complexity(masked: &str) -> u8 {
    let mut score: usize = 1;
    score += JOIN.find_iter(masked).count().min(3);
    let selects = SELECT.find_iter(masked).count();
    score += (selects.saturating_sub(1) * 2).min(4);
    if AGGREGATE.is_match(masked) {
        score += 1;
    }
    if WINDOW.is_match(masked) {
        score += 1;
    }
    if GROUP_BY.is_match(masked) {
        score += 1;
    }
    if HAVING.is_match(masked) {
        score += 1;
    }
    score.min(10) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::demo_catalog;
    use crate::schema::SchemaCatalog;

    fn validator() -> QueryValidator {
        QueryValidator::new(ValidatorConfig::default(), Some(Arc::new(demo_catalog())))
    }

    fn plain() -> QueryValidator {
        QueryValidator::new(ValidatorConfig::default(), None)
    }

    #[test]
    fn built_in_patterns_compile() {
        for pattern in [
            &DANGEROUS_KEYWORD, &REPLACE_INTO, &LEADING_WORD, &JOIN, &SUBQUERY, &SELECT,
            &BOOLEAN_OP, &SELECT_STAR, &WHERE, &FROM, &ORDER_BY, &ROW_BOUND, &LEADING_WILDCARD,
            &NON_SARGABLE, &IMPLICIT_CONVERSION, &FROM_FUNCTIONS, &TABLE_REF, &CTE_NAME,
            &AGGREGATE, &WINDOW, &GROUP_BY, &HAVING,
        ] {
            Lazy::force(pattern);
        }
    }

    #[test]
    fn unloaded_schema_leaves_table_names_unchecked() {
        let unloaded = QueryValidator::new(
            ValidatorConfig::default(),
            Some(Arc::new(SchemaCatalog::default())),
        );
        let sql = "SELECT COUNT(*) FROM Mystery";
        assert!(!unloaded.validate(sql).has_code(IssueCode::UnknownTable));
        assert!(validator().validate(sql).has_code(IssueCode::UnknownTable));
    }

    #[test]
    fn stacked_drop_is_rejected() {
        let result = plain().validate("SELECT * FROM Users; DROP TABLE Users;");
        assert!(!result.is_valid);
        assert!(!result.is_safe);
        assert!(
            result.has_code(IssueCode::InjectionDetected)
                || result.has_code(IssueCode::WriteOperation)
        );
    }

    #[test]
    fn every_write_verb_after_separator_is_unsafe() {
        let v = plain();
        for verb in [
            "DROP TABLE x", "DELETE FROM x", "INSERT INTO x VALUES (1)", "UPDATE x SET a = 1",
            "TRUNCATE x", "ALTER TABLE x ADD c INT", "CREATE TABLE y (a INT)", "GRANT ALL ON x TO u",
            "EXEC sp_who", "MERGE INTO x USING y ON 1 = 1",
        ] {
            let result = v.validate(&format!("SELECT 1 FROM Event;{}", verb));
            assert!(!result.is_safe, "{} was considered safe", verb);
            let spaced = v.validate(&format!("SELECT 1 FROM Event ;  \n {}", verb.to_lowercase()));
            assert!(!spaced.is_safe, "{} (lowercase) was considered safe", verb);
        }
    }

    #[test]
    fn write_statement_allowed_only_with_flag() {
        let v = plain();
        let sql = "UPDATE Event SET Status = 1 WHERE Id = 3";
        let denied = v.validate(sql);
        assert!(denied.has_code(IssueCode::WriteOperation));
        assert!(!denied.is_safe);

        let allowed = v.validate_with(sql, true);
        assert!(!allowed.has_code(IssueCode::WriteOperation));
        assert!(allowed.is_executable());
    }

    #[test]
    fn injection_signatures_fire() {
        let v = plain();
        for sql in [
            "SELECT * FROM Event WHERE Id = 1 OR 1=1",
            "SELECT Name FROM Locations UNION SELECT password FROM secrets",
            "SELECT 1 FROM Event WHERE SLEEP(5)",
            "SELECT * FROM Event WHERE Name = '' OR ''=''",
            "SELECT 1; -- trailing",
        ] {
            let result = v.validate(sql);
            assert!(result.has_code(IssueCode::InjectionDetected), "{}", sql);
            assert!(!result.is_safe);
        }
    }

    #[test]
    fn keywords_inside_literals_are_not_writes() {
        let result = validator().validate(
            "SELECT COUNT(*) FROM Event e WHERE e.Status = 'DROP TABLE' AND e.IsDeleted = 0",
        );
        assert!(!result.has_code(IssueCode::DangerousKeyword));
        assert!(!result.has_code(IssueCode::WriteOperation));
        assert!(result.is_executable());
    }

    #[test]
    fn replace_function_is_not_a_write() {
        let result = validator().validate(
            "SELECT REPLACE(l.Name, 'a', 'b') AS n FROM Locations l WHERE l.Id = 1",
        );
        assert!(result.is_executable(), "{:?}", result.issues);
    }

    #[test]
    fn unknown_table_is_a_safety_error() {
        let result = validator().validate("SELECT COUNT(*) FROM Users WHERE 1 = 1");
        assert!(result.has_code(IssueCode::UnknownTable));
        assert!(!result.is_safe);
        assert_eq!(result.tables, vec!["Users"]);
    }

    #[test]
    fn ctes_system_schemas_and_extract_are_not_tables() {
        let v = validator();
        let cte = v.validate(
            "WITH yearly AS (SELECT EXTRACT(YEAR FROM e.SubmitionDate) AS y FROM Event e WHERE e.IsDeleted = 0) \
             SELECT y, COUNT(*) FROM yearly GROUP BY y",
        );
        assert!(cte.is_executable(), "{:?}", cte.issues);
        assert_eq!(cte.tables, vec!["Event"]);

        let introspection = v.validate(
            "SELECT table_name, column_name FROM information_schema.columns WHERE table_schema = 'main'",
        );
        assert!(introspection.is_executable(), "{:?}", introspection.issues);
        assert!(introspection.has_code(IssueCode::SchemaEnumeration));
    }

    #[test]
    fn structural_ceilings_warn_without_failing() {
        let joins = (0..7)
            .map(|i| format!(" JOIN EventViolation v{} ON v{}.EventId = e.Id", i, i))
            .collect::<String>();
        let result = validator().validate(&format!(
            "SELECT e.Id FROM Event e{} WHERE e.IsDeleted = 0",
            joins
        ));
        assert!(result.has_code(IssueCode::TooManyJoins));
        assert!(result.is_executable());
        assert_eq!(result.warning_count(), 1);
        assert!(result.complexity >= 4);
    }

    #[test]
    fn info_hints_for_star_missing_where_and_unbounded_sort() {
        let result = validator().validate("SELECT * FROM Event ORDER BY Id");
        assert!(result.has_code(IssueCode::SelectStar));
        assert!(result.has_code(IssueCode::NoWhereClause));
        assert!(result.has_code(IssueCode::UnboundedSort));
        assert!(result.is_executable());
    }

    #[test]
    fn complexity_counts_nesting_and_aggregation() {
        let simple = validator().validate("SELECT Id FROM Event WHERE Id = 1");
        assert_eq!(simple.complexity, 1);

        let heavy = validator().validate(
            "SELECT l.Name, COUNT(*) OVER (PARTITION BY l.Id) FROM Event e \
             JOIN Locations l ON l.Id = e.LocationId \
             WHERE e.Id IN (SELECT EventId FROM EventViolation WHERE Severity > (SELECT 1)) \
             GROUP BY l.Name, l.Id HAVING COUNT(*) > 2",
        );
        // 1 + 1 join + 4 nesting + aggregate + window + group by + having
        assert_eq!(heavy.complexity, 10);
    }

    #[test]
    fn unbalanced_input_is_a_parse_error() {
        let result = plain().validate("SELECT (1 FROM Event WHERE Name = 'abc");
        assert!(result.has_code(IssueCode::ParseError));
        assert!(!result.is_valid);
    }

    #[test]
    fn empty_and_oversized_inputs_fail_fast() {
        let v = plain();
        assert!(v.validate("  ").has_code(IssueCode::EmptyQuery));
        let long = format!("SELECT 1 FROM Event WHERE {}", "1 = 1 AND ".repeat(2_000));
        let result = v.validate(&long);
        assert!(result.has_code(IssueCode::QueryTooLong));
        assert_eq!(result.issues.len(), 1);
        assert!(result.is_safe);
    }

    #[test]
    fn quick_validate_accepts_clean_reads() {
        let v = plain();
        for sql in [
            "SELECT COUNT(*) FROM Event",
            "with t as (select 1 as a) select a from t",
            "  SELECT Name FROM Locations WHERE Name LIKE 'A%'",
        ] {
            assert!(v.quick_validate(sql).ok, "{}", sql);
        }
        assert!(!v.quick_validate("DELETE FROM Event").ok);
        assert!(!v.quick_validate("SELECT 1 UNION SELECT 2").ok);
    }

    #[test]
    fn validation_is_deterministic() {
        let v = validator();
        let sql = "SELECT l.Name FROM Locations l JOIN Event e ON e.LocationId = l.Id";
        assert_eq!(v.validate(sql), v.validate(sql));
    }

    #[test]
    fn query_type_extraction() {
        assert_eq!(extract_query_type("  select 1"), "SELECT");
        assert_eq!(extract_query_type("(SELECT 1)"), "SELECT");
        assert_eq!(extract_query_type("Drop table x"), "DROP");
        assert_eq!(extract_query_type("42"), "UNKNOWN");
    }
}

//! Dynamic SQL generation through the NL-generation collaborator, validated
//! and self-corrected within a bounded retry budget.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pattern;
use super::query::ParsedQuery;
use super::validator::{IssueCode, QueryValidator, ValidationResult};
use crate::config::GeneratorConfig;
use crate::error::{EngineError, Result};
use crate::llm::models::GenerationReply;
use crate::llm::LlmManager;
use crate::schema::concepts::ConceptIndex;
use crate::schema::SchemaProvider;
use crate::util::text::static_regex;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Explanation {
    pub en: String,
    pub ar: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedQuery {
    pub sql: String,
    pub explanation: Explanation,
    pub tables: Vec<String>,
    pub confidence: f64,
    pub is_valid: bool,
    pub validation: Option<ValidationResult>,
    pub generation_ms: u64,
    /// Typed question pattern, for the learning pipeline.
    pub pattern: String,
    pub chart_type: Option<String>,
    pub corrections: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct GeneratorStats {
    pub attempts: u64,
    pub successes: u64,
    pub corrections: u64,
    pub failures: u64,
}

/// How SQL was recovered from a raw model reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Json,
    Fenced,
    BareSelect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub sql: String,
    pub strategy: ParseStrategy,
    pub explanation: Option<String>,
    pub tables: Vec<String>,
    pub chart_type: Option<String>,
    pub has_reasoning: bool,
}

static FENCED: Lazy<Regex> = Lazy::new(|| static_regex(r"(?is)```[a-z]*\s*(.*?)```"));
static BARE_SELECT: Lazy<Regex> = Lazy::new(|| {
    static_regex(r"(?is)\b(WITH\s+\w+\s+AS\s*\(.*?|SELECT\s.*?)(?:;|$)")
});
static LIMIT_VALUE: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\bLIMIT\s+(\d+)"));

fn clean_sql(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim().to_string()
}

/// Structured JSON, then a fenced code block, then the first bare SELECT/WITH.
pub fn parse_reply(raw: &str) -> Option<ParsedReply> {
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Ok(reply) = serde_json::from_str::<GenerationReply>(&raw[start..=end]) {
                if let Some(sql) = reply.sql.as_deref().map(clean_sql).filter(|s| !s.is_empty()) {
                    return Some(ParsedReply {
                        sql,
                        strategy: ParseStrategy::Json,
                        has_reasoning: reply.has_reasoning(),
                        explanation: reply.explanation,
                        tables: reply.tables_needed,
                        chart_type: reply.chart_type,
                    });
                }
            }
        }
    }

    let bare = |sql: String, strategy| ParsedReply {
        sql,
        strategy,
        explanation: None,
        tables: Vec::new(),
        chart_type: None,
        has_reasoning: false,
    };

    if let Some(sql) = FENCED
        .captures(raw)
        .map(|caps| clean_sql(&caps[1]))
        .filter(|s| !s.is_empty())
    {
        return Some(bare(sql, ParseStrategy::Fenced));
    }

    BARE_SELECT
        .captures(raw)
        .map(|caps| clean_sql(&caps[1]))
        .filter(|s| !s.is_empty())
        .map(|sql| bare(sql, ParseStrategy::BareSelect))
}

/// 1.0 minus error, warning and complexity penalties, plus a reasoning bonus.
pub fn score_confidence(validation: &ValidationResult, has_reasoning: bool) -> f64 {
    let mut confidence = 1.0;
    confidence -= 0.3 * validation.error_count() as f64;
    confidence -= 0.1 * validation.warning_count() as f64;
    if validation.complexity > 7 {
        confidence -= 0.1;
    }
    if has_reasoning {
        confidence += 0.1;
    }
    confidence.clamp(0.0, 1.0)
}

const GLOSSARY: &[(&str, &str)] = &[
    ("eventviolation", "المخالفات"),
    ("event", "عمليات التفتيش"),
    ("locations", "المواقع"),
    ("locationtype", "أنواع الأنشطة"),
];

fn arabic_name(table: &str) -> String {
    GLOSSARY
        .iter()
        .find(|(en, _)| table.eq_ignore_ascii_case(en))
        .map(|(_, ar)| ar.to_string())
        .unwrap_or_else(|| table.to_string())
}

enum Step {
    Generate,
    Validate(Option<ParsedReply>),
    Correct(ParsedReply, ValidationResult),
    Done(Option<ParsedReply>, Option<ValidationResult>),
}

pub struct DynamicSqlGenerator {
    llm: Arc<LlmManager>,
    validator: Arc<QueryValidator>,
    schema: Arc<dyn SchemaProvider>,
    concepts: ConceptIndex,
    max_retries: u32,
    attempts: AtomicU64,
    successes: AtomicU64,
    corrections: AtomicU64,
    failures: AtomicU64,
}

impl DynamicSqlGenerator {
    pub fn new(
        llm: Arc<LlmManager>,
        validator: Arc<QueryValidator>,
        schema: Arc<dyn SchemaProvider>,
        concepts: ConceptIndex,
        config: &GeneratorConfig,
    ) -> Self {
        Self {
            llm,
            validator,
            schema,
            concepts,
            max_retries: config.max_retries,
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            corrections: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn build_prompt(&self, question: &str, parsed: &ParsedQuery) -> String {
        let concepts = self.concepts.detect(question);
        let schema = self.schema.get_schema_context_for_ai(&concepts);

        let mut request = format!("- intent: {}\n", parsed.intent());
        if let Some(metric) = parsed.metric() {
            request.push_str(&format!("- metric: {}\n", metric));
        }
        for (key, value) in parsed.entities() {
            request.push_str(&format!("- {}: {}\n", key, value));
        }
        let time = parsed.time_range();
        if let Some(year) = time.get_year() {
            request.push_str(&format!("- year: {}\n", year));
        }
        if let Some(month) = time.get_month() {
            request.push_str(&format!("- month: {}\n", month));
        }
        if let Some(quarter) = time.get_quarter() {
            request.push_str(&format!("- quarter: {}\n", quarter));
        }

        format!(
            r#"### Instructions:
Convert the question into a single read-only SQL query for DuckDB.
- Use only the tables and columns listed in the schema; names are case sensitive
- Use table aliases to prevent ambiguity
- Produce exactly one SELECT or WITH statement; never modify data
- Exclude rows flagged as deleted when an IsDeleted column exists
- Add LIMIT to any ranked or sorted listing

### Question:
{}

### Parsed request:
{}
### Schema:
{}

### Response format:
Reply with one JSON object and nothing else:
{{"thinking": "...", "tables_needed": ["..."], "sql": "...", "explanation": "...", "query_type": "...", "chart_type": "..."}}
"#,
            question, request, schema
        )
    }

    fn correction_prompt(&self, question: &str, sql: &str, validation: &ValidationResult) -> String {
        let problems = validation
            .error_summary()
            .into_iter()
            .map(|line| format!("- {}", line))
            .collect::<Vec<_>>()
            .join("\n");
        let tables = self.schema.get_all_tables().join(", ");
        format!(
            r#"### Instructions:
The SQL you wrote for the question `{}` failed validation. Fix every problem below.
Only these tables exist: {}

### Invalid SQL:
```sql
{}
```

### Problems:
{}

### Response format:
Reply with one JSON object and nothing else:
{{"thinking": "...", "tables_needed": ["..."], "sql": "...", "explanation": "...", "query_type": "...", "chart_type": "..."}}
"#,
            question, tables, sql, problems
        )
    }

    async fn call(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let raw = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            reply = self.llm.complete(prompt) => reply?,
        };
        debug!(
            prompt_chars = prompt.len(),
            reply_chars = raw.len(),
            "Generation round trip"
        );
        Ok(raw)
    }

    /// Runs GENERATE -> VALIDATE -> {DONE | CORRECT -> VALIDATE ...}. On an
    /// exhausted budget the last SQL is returned still marked invalid.
    pub async fn generate(
        &self,
        question: &str,
        parsed: &ParsedQuery,
        cancel: &CancellationToken,
    ) -> Result<GeneratedQuery> {
        let started = Instant::now();
        let mut retries_left = self.max_retries;
        let mut corrections = 0u32;
        let mut step = Step::Generate;

        let (reply, validation) = loop {
            step = match step {
                Step::Generate => {
                    let prompt = self.build_prompt(question, parsed);
                    match self.call(&prompt, cancel).await {
                        Ok(raw) => Step::Validate(parse_reply(&raw)),
                        Err(EngineError::Llm(e)) if retries_left > 0 => {
                            warn!("Generation failed, retrying: {}", e);
                            retries_left -= 1;
                            Step::Generate
                        }
                        Err(e) => {
                            self.failures.fetch_add(1, Ordering::Relaxed);
                            return Err(e);
                        }
                    }
                }
                Step::Validate(None) if retries_left > 0 => {
                    warn!("No SQL found in model reply, regenerating");
                    retries_left -= 1;
                    Step::Generate
                }
                Step::Validate(None) => Step::Done(None, None),
                Step::Validate(Some(reply)) => {
                    let validation = self.validator.validate(&reply.sql);
                    if validation.is_executable() {
                        Step::Done(Some(reply), Some(validation))
                    } else if retries_left > 0 {
                        warn!(
                            "Generated SQL rejected: {}",
                            validation.error_summary().join("; ")
                        );
                        Step::Correct(reply, validation)
                    } else {
                        Step::Done(Some(reply), Some(validation))
                    }
                }
                Step::Correct(previous, validation) => {
                    retries_left -= 1;
                    corrections += 1;
                    self.corrections.fetch_add(1, Ordering::Relaxed);
                    let prompt = self.correction_prompt(question, &previous.sql, &validation);
                    match self.call(&prompt, cancel).await {
                        Ok(raw) => Step::Validate(parse_reply(&raw)),
                        Err(EngineError::Llm(e)) => {
                            warn!("Correction call failed: {}", e);
                            Step::Done(Some(previous), Some(validation))
                        }
                        Err(e) => {
                            self.failures.fetch_add(1, Ordering::Relaxed);
                            return Err(e);
                        }
                    }
                }
                Step::Done(reply, validation) => break (reply, validation),
            };
        };

        let generation_ms = started.elapsed().as_millis() as u64;
        let pattern = pattern::extract_pattern(question).pattern;

        let (Some(reply), Some(validation)) = (reply, validation) else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!("Could not extract SQL from any model reply");
            return Ok(GeneratedQuery {
                sql: String::new(),
                explanation: Explanation::default(),
                tables: Vec::new(),
                confidence: 0.0,
                is_valid: false,
                validation: None,
                generation_ms,
                pattern,
                chart_type: None,
                corrections,
            });
        };

        let is_valid = validation.is_executable();
        if is_valid {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let confidence = score_confidence(&validation, reply.has_reasoning);
        let tables = if validation.tables.is_empty() {
            reply.tables.clone()
        } else {
            validation.tables.clone()
        };
        let mut explanation = self.explain_query(&reply.sql);
        if let Some(en) = reply.explanation.as_deref().filter(|e| !e.trim().is_empty()) {
            explanation.en = en.trim().to_string();
        }

        info!(
            valid = is_valid,
            confidence,
            corrections,
            generation_ms,
            "Dynamic generation finished"
        );
        Ok(GeneratedQuery {
            sql: reply.sql,
            explanation,
            tables,
            confidence,
            is_valid,
            validation: Some(validation),
            generation_ms,
            pattern,
            chart_type: reply.chart_type,
            corrections,
        })
    }

    /// Answers a question about a concept the schema annotations do not know.
    /// Never fails: a narrowed discovery query over matching columns, else a
    /// schema introspection query.
    pub fn generate_for_unknown_concept(&self, question: &str, concept: &str) -> GeneratedQuery {
        let started = Instant::now();
        let mut terms = vec![concept.to_string()];
        terms.extend(self.concepts.keywords_for(concept));

        let mut by_table: Vec<(String, BTreeSet<String>)> = Vec::new();
        for term in &terms {
            for hit in self.schema.search_columns(term) {
                match by_table.iter_mut().find(|(table, _)| *table == hit.table) {
                    Some((_, columns)) => {
                        columns.insert(hit.column);
                    }
                    None => by_table.push((hit.table, BTreeSet::from([hit.column]))),
                }
            }
        }

        let (sql, confidence) = match by_table.first() {
            Some((table, columns)) => {
                let columns = columns
                    .iter()
                    .map(|c| format!("\"{}\"", c))
                    .collect::<Vec<_>>()
                    .join(", ");
                (format!("SELECT {} FROM \"{}\" LIMIT 50", columns, table), 0.6)
            }
            None => (
                "SELECT table_name, column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = 'main' ORDER BY table_name, ordinal_position LIMIT 200"
                    .to_string(),
                0.3,
            ),
        };

        let validation = self.validator.validate(&sql);
        info!(concept, confidence, "Unknown-concept fallback query built");
        GeneratedQuery {
            explanation: self.explain_query(&sql),
            tables: by_table.into_iter().map(|(table, _)| table).collect(),
            confidence,
            is_valid: validation.is_executable(),
            validation: Some(validation),
            generation_ms: started.elapsed().as_millis() as u64,
            pattern: pattern::extract_pattern(question).pattern,
            chart_type: Some("table".to_string()),
            corrections: 0,
            sql,
        }
    }

    /// One-line bilingual description of what a query does.
    pub fn explain_query(&self, sql: &str) -> Explanation {
        let upper = sql.to_uppercase();
        let tables = self.validator.validate(sql).tables;

        let (mut en, mut ar) = if upper.contains("INFORMATION_SCHEMA") {
            (
                "Lists the available tables and columns".to_string(),
                "يعرض الجداول والأعمدة المتاحة".to_string(),
            )
        } else {
            let (en_op, ar_op) = if upper.contains("COUNT(") {
                ("Counts", "يحسب عدد")
            } else if upper.contains("SUM(") {
                ("Sums", "يحسب مجموع")
            } else if upper.contains("AVG(") {
                ("Averages", "يحسب متوسط")
            } else {
                ("Lists", "يعرض")
            };
            let ar_tables = tables.iter().map(|t| arabic_name(t)).collect::<Vec<_>>();
            (
                format!("{} records from {}", en_op, tables.join(", ")),
                format!("{} السجلات من {}", ar_op, ar_tables.join("، ")),
            )
        };

        if upper.contains("GROUP BY") {
            en.push_str(", grouped by category");
            ar.push_str("، مجمعة حسب الفئة");
        }
        if upper.contains(" WHERE ") {
            en.push_str(", with filters");
            ar.push_str("، مع عوامل تصفية");
        }
        if let Some(caps) = LIMIT_VALUE.captures(sql) {
            en.push_str(&format!(", top {}", &caps[1]));
            ar.push_str(&format!("، أعلى {}", &caps[1]));
        }
        Explanation { en, ar }
    }

    /// Advice derived from validator findings.
    pub fn suggest_improvements(&self, sql: &str) -> Vec<String> {
        let validation = self.validator.validate(sql);
        validation
            .issues
            .iter()
            .map(|issue| match issue.code {
                IssueCode::SelectStar => "List only the columns you need instead of SELECT *".to_string(),
                IssueCode::NoWhereClause => "Add a WHERE clause to limit the rows scanned".to_string(),
                IssueCode::UnboundedSort => "Add a LIMIT to the sorted result".to_string(),
                IssueCode::LeadingWildcard => {
                    "Avoid LIKE patterns that start with a wildcard".to_string()
                }
                IssueCode::NonSargable => {
                    "Compare columns directly instead of wrapping them in functions".to_string()
                }
                IssueCode::PossibleImplicitConversion => {
                    "Compare numeric columns with numeric literals".to_string()
                }
                IssueCode::TooManyJoins => "Reduce joins or pre-aggregate in a CTE".to_string(),
                IssueCode::TooManySubqueries => "Rewrite nested subqueries as CTEs".to_string(),
                IssueCode::TooManyConditions => "Simplify the WHERE clause".to_string(),
                _ => format!("Fix: {}", issue.message),
            })
            .collect()
    }

    pub fn get_stats(&self) -> GeneratorStats {
        GeneratorStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidatorConfig;
    use crate::engine::query::Intent;
    use crate::llm::testing::ScriptedProvider;
    use crate::schema::fixtures::demo_catalog;
    use std::time::Duration;

    #[test]
    fn built_in_patterns_compile() {
        for pattern in [&FENCED, &BARE_SELECT, &LIMIT_VALUE] {
            Lazy::force(pattern);
        }
    }

    const GOOD_JSON: &str = r#"{"thinking": "violations live in EventViolation", "tables_needed": ["EventViolation"], "sql": "SELECT COUNT(*) AS total FROM EventViolation ev JOIN Event e ON ev.EventId = e.Id WHERE e.IsDeleted = 0;", "explanation": "Counts violations", "chart_type": "kpi"}"#;

    fn generator(provider: Arc<ScriptedProvider>, max_retries: u32) -> DynamicSqlGenerator {
        let schema: Arc<dyn SchemaProvider> = Arc::new(demo_catalog());
        let llm = Arc::new(LlmManager::with_provider(
            Box::new(provider),
            Duration::from_secs(5),
        ));
        let validator = Arc::new(QueryValidator::new(
            ValidatorConfig::default(),
            Some(schema.clone()),
        ));
        let config = GeneratorConfig {
            max_retries,
            ..GeneratorConfig::default()
        };
        DynamicSqlGenerator::new(llm, validator, schema, ConceptIndex::default(), &config)
    }

    fn parsed() -> ParsedQuery {
        ParsedQuery::new(Intent::Count).with_metric("violations")
    }

    #[test]
    fn parse_reply_degrades_through_strategies() {
        let json = parse_reply(&format!("Sure!\n{}\nDone", GOOD_JSON)).unwrap();
        assert_eq!(json.strategy, ParseStrategy::Json);
        assert!(json.has_reasoning);
        assert!(!json.sql.ends_with(';'));

        let fenced = parse_reply("Here you go:\n```sql\nSELECT 1 FROM Event;\n```").unwrap();
        assert_eq!(fenced.strategy, ParseStrategy::Fenced);
        assert_eq!(fenced.sql, "SELECT 1 FROM Event");

        let bare = parse_reply("The query with a join is SELECT e.Id FROM Event e; hope it helps").unwrap();
        assert_eq!(bare.strategy, ParseStrategy::BareSelect);
        assert_eq!(bare.sql, "SELECT e.Id FROM Event e");

        assert!(parse_reply("I cannot help with that").is_none());
    }

    #[tokio::test]
    async fn valid_first_reply_needs_no_correction() {
        let provider = Arc::new(ScriptedProvider::new([GOOD_JSON]));
        let generator = generator(provider.clone(), 2);
        let cancel = CancellationToken::new();

        let result = generator.generate("how many violations", &parsed(), &cancel).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.corrections, 0);
        assert!(result.confidence >= 0.9);
        assert!(result.tables.iter().any(|t| t == "EventViolation"));
        assert_eq!(result.explanation.en, "Counts violations");
        assert_eq!(provider.call_count(), 1);
        assert!(provider.prompts.lock()[0].contains("## Table: EventViolation"));
    }

    #[tokio::test]
    async fn invalid_sql_is_corrected_with_enumerated_errors() {
        let provider = Arc::new(ScriptedProvider::new([
            "```sql\nSELECT COUNT(*) FROM Users\n```",
            GOOD_JSON,
        ]));
        let generator = generator(provider.clone(), 2);

        let result = generator
            .generate("how many violations", &parsed(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_valid);
        assert_eq!(result.corrections, 1);

        let prompts = provider.prompts.lock();
        assert!(prompts[1].contains("SELECT COUNT(*) FROM Users"));
        assert!(prompts[1].contains("UNKNOWN_TABLE"));
        assert_eq!(generator.get_stats().corrections, 1);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_sql_marked_invalid() {
        let bad = "```sql\nSELECT COUNT(*) FROM Users\n```";
        let provider = Arc::new(ScriptedProvider::new([bad, bad, bad, GOOD_JSON]));
        let generator = generator(provider.clone(), 2);

        let result = generator
            .generate("how many users", &parsed(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.sql, "SELECT COUNT(*) FROM Users");
        assert_eq!(provider.call_count(), 3);
        assert!(result.confidence < 0.8);
    }

    #[tokio::test]
    async fn unparseable_replies_give_zero_confidence() {
        let provider = Arc::new(ScriptedProvider::new(["no idea", "still no idea"]));
        let generator = generator(provider, 1);
        let result = generator
            .generate("how many violations", &parsed(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn cancelled_request_never_calls_the_model() {
        let provider = Arc::new(ScriptedProvider::new([GOOD_JSON]));
        let generator = generator(provider.clone(), 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = generator.generate("q", &parsed(), &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn provider_failure_after_budget_is_an_error() {
        let provider = Arc::new(ScriptedProvider::failing());
        let generator = generator(provider.clone(), 1);
        let err = generator
            .generate("q", &parsed(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Llm(_)));
        assert_eq!(provider.call_count(), 2);
    }

    #[test]
    fn unknown_concept_never_fails() {
        let generator = generator(Arc::new(ScriptedProvider::new(Vec::<String>::new())), 2);

        let discovery = generator.generate_for_unknown_concept("what about severity", "severity");
        assert_eq!(discovery.confidence, 0.6);
        assert!(discovery.sql.contains("\"EventViolation\""));
        assert!(discovery.is_valid);

        let introspection = generator.generate_for_unknown_concept("what about unicorns", "unicorns");
        assert_eq!(introspection.confidence, 0.3);
        assert!(introspection.sql.contains("information_schema.columns"));
        assert!(introspection.is_valid);
    }

    #[test]
    fn explanation_is_bilingual() {
        let generator = generator(Arc::new(ScriptedProvider::new(Vec::<String>::new())), 2);
        let explanation = generator.explain_query(
            "SELECT COUNT(*) FROM EventViolation ev JOIN Event e ON ev.EventId = e.Id WHERE e.IsDeleted = 0",
        );
        assert!(explanation.en.starts_with("Counts records from"));
        assert!(explanation.ar.contains("المخالفات"));
        assert!(explanation.en.ends_with("with filters"));
    }

    #[test]
    fn suggestions_follow_validator_hints() {
        let generator = generator(Arc::new(ScriptedProvider::new(Vec::<String>::new())), 2);
        let tips = generator.suggest_improvements("SELECT * FROM Event ORDER BY Score");
        assert!(tips.iter().any(|t| t.contains("SELECT *")));
        assert!(tips.iter().any(|t| t.contains("WHERE")));
    }
}

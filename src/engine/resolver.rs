//! Fixed-order resolution: cache, learned store, template catalog, dynamic
//! generation, then a schema-suggestion fallback. Execution is gated by the
//! monitor and every attempt is recorded.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::{CacheStats, ResponseCache};
use super::generator::{DynamicSqlGenerator, Explanation, GeneratorStats};
use super::learning::{Capture, CaptureOutcome, LearnedQueryStore, LearningStats};
use super::monitor::{ExecutionRecord, MonitorStats, QueryMonitor};
use super::query::{Intent, Language, ParsedQuery};
use super::templates::TemplateMatcher;
use super::validator::{QueryValidator, ValidationResult};
use super::ResolutionSource;
use crate::config::CacheConfig;
use crate::db::executor::{QueryRows, SqlExecutor};
use crate::error::{EngineError, Result};
use crate::schema::SchemaProvider;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Resolution {
    /// Absent only for the message-only fallback.
    pub sql: Option<String>,
    pub source: ResolutionSource,
    pub confidence: f64,
    pub tables: Vec<String>,
    pub template_id: Option<String>,
    pub learned_id: Option<String>,
    pub explanation: Option<Explanation>,
    pub chart_type: Option<String>,
    pub message: Option<String>,
}

impl Resolution {
    fn fallback(message: String) -> Self {
        Self {
            sql: None,
            source: ResolutionSource::Fallback,
            confidence: 0.0,
            tables: Vec::new(),
            template_id: None,
            learned_id: None,
            explanation: None,
            chart_type: None,
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Ok,
    /// The circuit for this SQL is open.
    Blocked,
    Failed,
    NoQuery,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub resolution: Resolution,
    pub status: AnswerStatus,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub row_count: usize,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl Answer {
    fn without_rows(resolution: Resolution, status: AnswerStatus, message: Option<String>) -> Self {
        Self {
            resolution,
            status,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            duration_ms: 0,
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolverStatus {
    pub cache: CacheStats,
    pub monitor: MonitorStats,
    pub generator: Option<GeneratorStats>,
    pub templates: usize,
    pub promoted_templates: usize,
    pub learning_enabled: bool,
}

fn localized(language: Language, en: &str, ar: &str) -> String {
    match language {
        Language::En => en.to_string(),
        Language::Ar => ar.to_string(),
    }
}

pub struct HybridResolver {
    cache: ResponseCache<Answer>,
    learning: Option<Arc<LearnedQueryStore>>,
    matcher: Arc<TemplateMatcher>,
    generator: Option<Arc<DynamicSqlGenerator>>,
    validator: Arc<QueryValidator>,
    monitor: Arc<QueryMonitor>,
    executor: Arc<dyn SqlExecutor>,
    schema: Arc<dyn SchemaProvider>,
    match_threshold: f64,
}

impl HybridResolver {
    pub fn new(
        matcher: Arc<TemplateMatcher>,
        validator: Arc<QueryValidator>,
        monitor: Arc<QueryMonitor>,
        executor: Arc<dyn SqlExecutor>,
        schema: Arc<dyn SchemaProvider>,
        cache: &CacheConfig,
        match_threshold: f64,
    ) -> Self {
        Self {
            cache: ResponseCache::new(cache),
            learning: None,
            matcher,
            generator: None,
            validator,
            monitor,
            executor,
            schema,
            match_threshold,
        }
    }

    pub fn with_generator(mut self, generator: Arc<DynamicSqlGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_learning(mut self, store: Arc<LearnedQueryStore>) -> Self {
        self.learning = Some(store);
        self
    }

    pub fn monitor(&self) -> &Arc<QueryMonitor> {
        &self.monitor
    }

    pub fn validator(&self) -> &Arc<QueryValidator> {
        &self.validator
    }

    pub fn matcher(&self) -> &Arc<TemplateMatcher> {
        &self.matcher
    }

    pub fn learning(&self) -> Option<&Arc<LearnedQueryStore>> {
        self.learning.as_ref()
    }

    /// Picks SQL for a question without executing it. Only fails on
    /// cancellation; every other problem falls through to the next stage.
    pub async fn resolve(
        &self,
        question: &str,
        parsed: &ParsedQuery,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let key = ResponseCache::<Answer>::key_for(question, parsed);
        if let Some(hit) = self.cache.get(&key) {
            let mut resolution = hit.resolution;
            resolution.source = ResolutionSource::Cache;
            info!(source = %resolution.source, "Resolved from response cache");
            return Ok(resolution);
        }
        self.resolve_fresh(question, parsed, cancel).await
    }

    async fn resolve_fresh(
        &self,
        question: &str,
        parsed: &ParsedQuery,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        if let Some(resolution) = self.try_learned(question).await {
            return Ok(self.chosen(resolution));
        }
        if let Some(resolution) = self.try_template(parsed) {
            return Ok(self.chosen(resolution));
        }
        if let Some(resolution) = self.try_dynamic(question, parsed, cancel).await? {
            return Ok(self.chosen(resolution));
        }
        Ok(self.chosen(self.fallback(question, parsed)))
    }

    fn chosen(&self, resolution: Resolution) -> Resolution {
        info!(
            source = %resolution.source,
            confidence = resolution.confidence,
            template = resolution.template_id.as_deref().unwrap_or("-"),
            "Resolved question"
        );
        resolution
    }

    fn revalidate(&self, stage: ResolutionSource, sql: &str) -> Option<ValidationResult> {
        let validation = self.validator.validate(sql);
        if validation.is_executable() {
            Some(validation)
        } else {
            warn!(
                source = %stage,
                "Candidate rejected by validation: {}",
                validation.error_summary().join("; ")
            );
            None
        }
    }

    async fn try_learned(&self, question: &str) -> Option<Resolution> {
        let store = self.learning.clone()?;
        let owned = question.to_string();
        let found = match tokio::task::spawn_blocking(move || store.find_matching_query(&owned)).await {
            Ok(found) => found?,
            Err(e) => {
                error!("Learned-store lookup task failed: {}", e);
                return None;
            }
        };
        debug!(
            id = %found.id,
            similarity = found.similarity,
            "Learned query candidate"
        );
        let validation = self.revalidate(ResolutionSource::Learned, &found.sql)?;
        let tables = if validation.tables.is_empty() {
            found.tables
        } else {
            validation.tables
        };
        Some(Resolution {
            confidence: found.confidence,
            explanation: self.generator.as_ref().map(|g| g.explain_query(&found.sql)),
            sql: Some(found.sql),
            source: ResolutionSource::Learned,
            tables,
            template_id: None,
            learned_id: Some(found.id),
            chart_type: None,
            message: None,
        })
    }

    fn try_template(&self, parsed: &ParsedQuery) -> Option<Resolution> {
        let best = self.matcher.find_best_template(parsed);
        if best.score < self.match_threshold {
            debug!(
                template = %best.template.id,
                score = best.score,
                threshold = self.match_threshold,
                "Template match below threshold"
            );
            return None;
        }
        let sql = self.matcher.build_query(&best.template, parsed);
        let validation = self.revalidate(ResolutionSource::Template, &sql)?;
        Some(Resolution {
            sql: Some(sql),
            source: ResolutionSource::Template,
            confidence: best.score / 100.0,
            tables: validation.tables,
            template_id: Some(best.template.id.clone()),
            learned_id: None,
            explanation: best.template.description.clone().map(|en| Explanation {
                en,
                ar: String::new(),
            }),
            chart_type: best.template.chart.clone(),
            message: None,
        })
    }

    async fn try_dynamic(
        &self,
        question: &str,
        parsed: &ParsedQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<Resolution>> {
        let Some(generator) = &self.generator else {
            return Ok(None);
        };
        let generated = match generator.generate(question, parsed, cancel).await {
            Ok(generated) => generated,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warn!(source = "dynamic", "Generation failed: {}", e);
                return Ok(None);
            }
        };
        if !generated.is_valid {
            warn!(
                source = "dynamic",
                corrections = generated.corrections,
                "Generated SQL still invalid after correction budget"
            );
            return Ok(None);
        }
        Ok(Some(Resolution {
            sql: Some(generated.sql),
            source: ResolutionSource::Dynamic,
            confidence: generated.confidence,
            tables: generated.tables,
            template_id: None,
            learned_id: None,
            explanation: Some(generated.explanation),
            chart_type: generated.chart_type,
            message: None,
        }))
    }

    /// A discovery query for an unrecognised metric when possible, otherwise a
    /// message pointing at the tables that can be asked about.
    fn fallback(&self, question: &str, parsed: &ParsedQuery) -> Resolution {
        if let (Some(generator), Some(metric)) = (&self.generator, parsed.metric()) {
            let discovery = generator.generate_for_unknown_concept(question, metric);
            if discovery.is_valid {
                return Resolution {
                    sql: Some(discovery.sql),
                    source: ResolutionSource::Fallback,
                    confidence: discovery.confidence,
                    tables: discovery.tables,
                    template_id: None,
                    learned_id: None,
                    explanation: Some(discovery.explanation),
                    chart_type: discovery.chart_type,
                    message: None,
                };
            }
        }

        let tables = self.schema.get_all_tables().join(", ");
        let message = match parsed.language() {
            Language::En => format!(
                "I couldn't build a reliable query for this question. Try rephrasing it around: {}.",
                tables
            ),
            Language::Ar => format!(
                "تعذر إنشاء استعلام موثوق لهذا السؤال. حاول إعادة صياغته حول: {}.",
                tables
            ),
        };
        Resolution::fallback(message)
    }

    /// Resolve, then execute through the circuit-breaker gate, record the
    /// attempt, feed the learning pipeline and cache successful answers.
    pub async fn answer(
        &self,
        question: &str,
        parsed: &ParsedQuery,
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        let key = ResponseCache::<Answer>::key_for(question, parsed);
        if let Some(mut hit) = self.cache.get(&key) {
            hit.resolution.source = ResolutionSource::Cache;
            info!(source = "cache", "Answered from response cache");
            return Ok(hit);
        }

        let resolution = self.resolve_fresh(question, parsed, cancel).await?;
        let language = parsed.language();
        let Some(sql) = resolution.sql.clone() else {
            let message = resolution.message.clone();
            return Ok(Answer::without_rows(resolution, AnswerStatus::NoQuery, message));
        };

        if !self.monitor.is_query_allowed(&sql) {
            warn!(source = %resolution.source, "Execution blocked by open circuit");
            let message = localized(
                language,
                "This query is temporarily unavailable after repeated failures. Please try again shortly.",
                "هذا الاستعلام غير متاح مؤقتاً بسبب أخطاء متكررة. يرجى المحاولة لاحقاً.",
            );
            return Ok(Answer::without_rows(resolution, AnswerStatus::Blocked, Some(message)));
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let started = Instant::now();
        let outcome = self.executor.execute(&sql).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let error_text = outcome.as_ref().err().map(|e| e.to_string());
        self.monitor.record_execution(ExecutionRecord {
            sql: &sql,
            source: resolution.source,
            duration_ms,
            success: outcome.is_ok(),
            error: error_text.as_deref(),
            row_count: outcome.as_ref().map(QueryRows::len).unwrap_or(0),
        });

        let success = outcome.is_ok();
        match resolution.source {
            ResolutionSource::Dynamic if success => {
                self.learn(question, &sql, &resolution.tables, parsed, true, duration_ms)
                    .await;
            }
            ResolutionSource::Learned => {
                self.learn(question, &sql, &resolution.tables, parsed, success, duration_ms)
                    .await;
            }
            _ => {}
        }

        match outcome {
            Ok(rows) => {
                let answer = Answer {
                    row_count: rows.len(),
                    columns: rows.columns,
                    rows: rows.rows,
                    resolution,
                    status: AnswerStatus::Ok,
                    duration_ms,
                    message: None,
                };
                self.cache.set(key, answer.clone());
                Ok(answer)
            }
            Err(e) => {
                error!(source = %resolution.source, "Query execution failed: {}", e);
                let message = localized(
                    language,
                    "The query could not be completed.",
                    "تعذر تنفيذ الاستعلام.",
                );
                let mut answer = Answer::without_rows(resolution, AnswerStatus::Failed, Some(message));
                answer.duration_ms = duration_ms;
                Ok(answer)
            }
        }
    }

    async fn learn(
        &self,
        question: &str,
        sql: &str,
        tables: &[String],
        parsed: &ParsedQuery,
        success: bool,
        latency_ms: u64,
    ) {
        let intent = Some(parsed.intent());
        self.capture(question, sql, tables, intent, Some(parsed.clone()), success, latency_ms, false)
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn capture(
        &self,
        question: &str,
        sql: &str,
        tables: &[String],
        intent: Option<Intent>,
        parsed: Option<ParsedQuery>,
        success: bool,
        latency_ms: u64,
        user_validated: bool,
    ) -> Option<CaptureOutcome> {
        let store = self.learning.clone()?;
        let matcher = self.matcher.clone();
        let question = question.to_string();
        let sql = sql.to_string();
        let tables = tables.to_vec();

        let task = tokio::task::spawn_blocking(move || {
            let outcome = store.capture(Capture {
                question: &question,
                sql: &sql,
                intent,
                parsed: parsed.as_ref(),
                tables: &tables,
                success,
                latency_ms,
                user_validated,
            });
            if outcome.promoted {
                let loaded = matcher.reload();
                info!("Template catalog reloaded with {} promoted templates", loaded);
            }
            outcome
        });
        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Learning capture task failed: {}", e);
                None
            }
        }
    }

    /// User-validated capture. The SQL must pass validation first.
    pub async fn submit_feedback(
        &self,
        question: &str,
        sql: &str,
        intent: Option<Intent>,
        helpful: bool,
        latency_ms: u64,
    ) -> Result<Option<CaptureOutcome>> {
        let validation = self.validator.validate(sql);
        if !validation.is_executable() {
            warn!(
                "Feedback SQL rejected: {}",
                validation.error_summary().join("; ")
            );
            return Err(EngineError::Validation(
                "the submitted SQL did not pass validation".to_string(),
            ));
        }
        let outcome = self
            .capture(question, sql, &validation.tables, intent, None, helpful, latency_ms, true)
            .await;
        if let Some(outcome) = &outcome {
            info!(
                id = %outcome.id,
                helpful,
                uses = outcome.use_count,
                "Feedback recorded"
            );
        }
        Ok(outcome)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("Response cache cleared");
    }

    pub async fn learning_stats(&self) -> Option<LearningStats> {
        let store = self.learning.clone()?;
        match tokio::task::spawn_blocking(move || store.get_stats()).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("Learning stats task failed: {}", e);
                None
            }
        }
    }

    pub fn status(&self) -> ResolverStatus {
        let catalog = self.matcher.catalog();
        ResolverStatus {
            cache: self.cache.stats(),
            monitor: self.monitor.get_stats(),
            generator: self.generator.as_ref().map(|g| g.get_stats()),
            templates: catalog.len(),
            promoted_templates: catalog.promoted_count(),
            learning_enabled: self.learning.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BreakerConfig, GeneratorConfig, LearningConfig, MonitorConfig, TemplateConfig,
        ValidatorConfig,
    };
    use crate::db::db_pool::build_pool;
    use crate::engine::query::TimeRange;
    use crate::engine::templates::TemplateCatalog;
    use crate::llm::testing::ScriptedProvider;
    use crate::llm::LlmManager;
    use crate::schema::concepts::ConceptIndex;
    use crate::schema::fixtures::demo_catalog;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubExecutor {
        calls: AtomicUsize,
        fail: bool,
        executed: parking_lot::Mutex<Vec<String>>,
    }

    impl StubExecutor {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
                executed: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SqlExecutor for StubExecutor {
        async fn execute(&self, sql: &str) -> Result<QueryRows> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.executed.lock().push(sql.to_string());
            if self.fail {
                return Err(EngineError::Execution("Catalog Error: boom".to_string()));
            }
            let mut row = Map::new();
            row.insert("total".to_string(), json!(3));
            Ok(QueryRows {
                columns: vec!["total".to_string()],
                rows: vec![row],
            })
        }
    }

    const DYNAMIC_REPLY: &str = r#"{"thinking": "count events for the year", "tables_needed": ["Event"], "sql": "SELECT COUNT(*) AS total FROM Event e WHERE e.IsDeleted = 0 AND YEAR(e.SubmitionDate) = 2024", "explanation": "Counts events"}"#;

    struct Harness {
        resolver: HybridResolver,
        executor: Arc<StubExecutor>,
        provider: Arc<ScriptedProvider>,
    }

    fn harness(replies: Vec<&str>, fail: bool, breaker: BreakerConfig) -> Harness {
        let schema: Arc<dyn SchemaProvider> = Arc::new(demo_catalog());
        let validator = Arc::new(QueryValidator::new(
            ValidatorConfig::default(),
            Some(schema.clone()),
        ));
        let catalog = Arc::new(TemplateCatalog::with_builtin(None));
        let matcher = Arc::new(TemplateMatcher::new(catalog, &TemplateConfig::default()));
        let monitor = Arc::new(QueryMonitor::new(MonitorConfig::default(), &breaker));
        let executor = StubExecutor::new(fail);

        let provider = Arc::new(ScriptedProvider::new(replies));
        let llm = Arc::new(LlmManager::with_provider(
            Box::new(provider.clone()),
            Duration::from_secs(5),
        ));
        let generator = Arc::new(DynamicSqlGenerator::new(
            llm,
            validator.clone(),
            schema.clone(),
            ConceptIndex::default(),
            &GeneratorConfig::default(),
        ));
        let store = Arc::new(
            LearnedQueryStore::open(
                build_pool(":memory:", 2).unwrap(),
                &LearningConfig::default(),
                None,
            )
            .unwrap(),
        );

        let resolver = HybridResolver::new(
            matcher,
            validator,
            monitor,
            executor.clone(),
            schema,
            &CacheConfig::default(),
            70.0,
        )
        .with_generator(generator)
        .with_learning(store);

        Harness {
            resolver,
            executor,
            provider,
        }
    }

    #[tokio::test]
    async fn confident_template_wins_before_generation() {
        let h = harness(vec![], false, BreakerConfig::default());
        let parsed = ParsedQuery::new(Intent::Count).with_metric("violations");

        let resolution = h
            .resolver
            .resolve("how many violations", &parsed, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.source, ResolutionSource::Template);
        assert_eq!(resolution.template_id.as_deref(), Some("VIO_01"));
        assert!(resolution.tables.iter().any(|t| t == "EventViolation"));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn same_question_with_a_new_parse_is_not_served_from_cache() {
        let h = harness(vec![], false, BreakerConfig::default());
        let cancel = CancellationToken::new();
        let followup = |year| {
            ParsedQuery::new(Intent::Count)
                .with_metric("violations")
                .with_time_range(TimeRange::year(year).unwrap())
        };

        let first = h
            .resolver
            .answer("what about that year?", &followup(2024), &cancel)
            .await
            .unwrap();
        assert_eq!(first.resolution.source, ResolutionSource::Template);
        assert!(first.resolution.sql.unwrap().contains("2024"));

        let second = h
            .resolver
            .answer("what about that year?", &followup(2023), &cancel)
            .await
            .unwrap();
        assert_eq!(second.resolution.source, ResolutionSource::Template);
        assert!(second.resolution.sql.unwrap().contains("2023"));
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn weak_template_falls_through_to_generation_then_learning() {
        let h = harness(vec![DYNAMIC_REPLY], false, BreakerConfig::default());
        let cancel = CancellationToken::new();
        let parsed = ParsedQuery::new(Intent::Count);

        let first = h
            .resolver
            .answer("how many records in 2024", &parsed, &cancel)
            .await
            .unwrap();
        assert_eq!(first.resolution.source, ResolutionSource::Dynamic);
        assert_eq!(first.status, AnswerStatus::Ok);
        assert_eq!(first.row_count, 1);

        let again = h
            .resolver
            .answer("how many records in 2024", &parsed, &cancel)
            .await
            .unwrap();
        assert_eq!(again.resolution.source, ResolutionSource::Cache);

        let other_year = h
            .resolver
            .answer("how many records in 2023", &parsed, &cancel)
            .await
            .unwrap();
        assert_eq!(other_year.resolution.source, ResolutionSource::Learned);
        assert!(other_year.resolution.sql.unwrap().contains("= 2023"));

        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.resolver.monitor().get_stats().total_queries, 2);
    }

    #[tokio::test]
    async fn unusable_generation_degrades_to_fallback_message() {
        let h = harness(vec!["no idea", "still nothing", "nope"], false, BreakerConfig::default());
        let parsed = ParsedQuery::new(Intent::Count);

        let answer = h
            .resolver
            .answer("something unanswerable", &parsed, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer.status, AnswerStatus::NoQuery);
        assert_eq!(answer.resolution.source, ResolutionSource::Fallback);
        assert!(answer.message.unwrap().contains("EventViolation"));
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_metric_fallback_runs_discovery() {
        let h = harness(vec![], false, BreakerConfig::default());
        let parsed = ParsedQuery::new(Intent::Detail).with_metric("latitude");

        let resolution = h
            .resolver
            .resolve("show me latitude", &parsed, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.source, ResolutionSource::Fallback);
        assert!(resolution.sql.unwrap().contains("\"Locations\""));
    }

    #[tokio::test]
    async fn repeated_failures_open_the_circuit() {
        let breaker = BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::default()
        };
        let h = harness(vec![], true, breaker);
        let parsed = ParsedQuery::new(Intent::Count).with_metric("violations");
        let cancel = CancellationToken::new();

        let first = h.resolver.answer("how many violations", &parsed, &cancel).await.unwrap();
        assert_eq!(first.status, AnswerStatus::Failed);
        assert!(!first.message.unwrap().contains("Catalog Error"));

        let second = h.resolver.answer("how many violations", &parsed, &cancel).await.unwrap();
        assert_eq!(second.status, AnswerStatus::Blocked);
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_dynamic_generation() {
        let h = harness(vec![DYNAMIC_REPLY], false, BreakerConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h
            .resolver
            .answer("how many records in 2024", &ParsedQuery::new(Intent::Count), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn feedback_rejects_unsafe_sql() {
        let h = harness(vec![], false, BreakerConfig::default());
        let err = h
            .resolver
            .submit_feedback("q", "DELETE FROM Event", None, true, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let outcome = h
            .resolver
            .submit_feedback("how many events", "SELECT COUNT(*) FROM Event", None, true, 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.use_count, 1);
    }

    #[tokio::test]
    async fn clearing_cache_forces_fresh_resolution() {
        let h = harness(vec![], false, BreakerConfig::default());
        let parsed = ParsedQuery::new(Intent::Count).with_metric("violations");
        let cancel = CancellationToken::new();

        h.resolver.answer("how many violations", &parsed, &cancel).await.unwrap();
        h.resolver.clear_cache();
        let again = h.resolver.answer("how many violations", &parsed, &cancel).await.unwrap();
        assert_eq!(again.resolution.source, ResolutionSource::Template);
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 2);
    }
}

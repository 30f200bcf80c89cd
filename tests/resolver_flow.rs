use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use nl_gate::config::{
    BreakerConfig, CacheConfig, GeneratorConfig, LearningConfig, MonitorConfig, TemplateConfig,
    ValidatorConfig,
};
use nl_gate::db::db_pool::{build_pool, DuckDbPool};
use nl_gate::db::executor::DuckDbExecutor;
use nl_gate::engine::generator::DynamicSqlGenerator;
use nl_gate::engine::learning::{Capture, LearnedQueryStore};
use nl_gate::engine::monitor::QueryMonitor;
use nl_gate::engine::query::{Intent, ParsedQuery};
use nl_gate::engine::resolver::{AnswerStatus, HybridResolver};
use nl_gate::engine::templates::{TemplateCatalog, TemplateFamily, TemplateMatcher};
use nl_gate::engine::validator::{IssueCode, QueryValidator};
use nl_gate::engine::ResolutionSource;
use nl_gate::llm::{CompletionProvider, LlmError, LlmManager};
use nl_gate::schema::{ConceptIndex, SchemaManager, SchemaProvider};

struct Scripted {
    replies: Mutex<VecDeque<String>>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CompletionProvider for Scripted {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::Response("no scripted reply left".to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn seeded_pool() -> DuckDbPool {
    let pool = build_pool(":memory:", 4).unwrap();
    let conn = pool.get().unwrap();
    conn.execute_batch(
        "CREATE TABLE LocationType (Id INTEGER, Name VARCHAR);
         CREATE TABLE Locations (Id INTEGER, Name VARCHAR, LocationTypeId INTEGER, Latitude DOUBLE, Longitude DOUBLE);
         CREATE TABLE Event (Id INTEGER, ReporterID INTEGER, LocationId INTEGER, SubmitionDate TIMESTAMP,
                             Score DOUBLE, Status INTEGER, IsDeleted INTEGER);
         CREATE TABLE EventViolation (Id INTEGER, EventId INTEGER, ViolationValue DOUBLE, Severity INTEGER);
         INSERT INTO LocationType VALUES (1, 'Restaurant'), (2, 'Bakery');
         INSERT INTO Locations VALUES (1, 'Olaya', 1, 24.69, 46.68), (2, 'Malaz', 2, 24.66, 46.73);
         INSERT INTO Event VALUES
             (1, 7, 1, '2024-01-10 09:00:00', 80, 1, 0),
             (2, 7, 2, '2024-02-11 10:00:00', 65, 2, 0),
             (3, 9, 1, '2023-05-03 11:00:00', 90, 1, 0),
             (4, 9, 2, '2024-03-01 12:00:00', 50, 1, 1);
         INSERT INTO EventViolation VALUES
             (1, 1, 500, 2), (2, 2, 1000, 3), (3, 3, 250, 1), (4, 4, 900, 3);",
    )
    .unwrap();
    pool
}

struct Engine {
    resolver: HybridResolver,
    store: Arc<LearnedQueryStore>,
    llm_calls: Arc<AtomicUsize>,
}

async fn engine(replies: &[&str]) -> Engine {
    let pool = seeded_pool();
    let manager = Arc::new(SchemaManager::new(
        pool.clone(),
        ConceptIndex::default(),
        GeneratorConfig::default().core_tables,
    ));
    assert_eq!(manager.refresh_cache().await.unwrap(), 4);
    let schema: Arc<dyn SchemaProvider> = manager;

    let validator = Arc::new(QueryValidator::new(
        ValidatorConfig::default(),
        Some(schema.clone()),
    ));
    let matcher = Arc::new(TemplateMatcher::new(
        Arc::new(TemplateCatalog::with_builtin(None)),
        &TemplateConfig::default(),
    ));
    let monitor = Arc::new(QueryMonitor::new(
        MonitorConfig::default(),
        &BreakerConfig::default(),
    ));
    let executor = Arc::new(DuckDbExecutor::new(pool, Duration::from_secs(10)));

    let llm_calls = Arc::new(AtomicUsize::new(0));
    let provider = Scripted {
        replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        calls: llm_calls.clone(),
    };
    let llm = Arc::new(LlmManager::with_provider(
        Box::new(provider),
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
        executor,
        schema,
        &CacheConfig::default(),
        TemplateConfig::default().match_threshold,
    )
    .with_generator(generator)
    .with_learning(store.clone());

    Engine {
        resolver,
        store,
        llm_calls,
    }
}

#[test]
fn stacked_write_statements_are_never_safe() {
    let validator = QueryValidator::new(ValidatorConfig::default(), None);

    let result = validator.validate("SELECT * FROM Users; DROP TABLE Users;");
    assert!(!result.is_valid);
    assert!(
        result.has_code(IssueCode::InjectionDetected) || result.has_code(IssueCode::WriteOperation)
    );

    for verb in ["DROP TABLE Event", "DELETE FROM Event", "UPDATE Event SET Score = 0", "INSERT INTO Event VALUES (1)"] {
        let sql = format!("SELECT 1; {}", verb);
        assert!(!validator.validate(&sql).is_safe, "{} should be unsafe", sql);
    }

    assert!(validator.quick_validate("WITH t AS (SELECT 1 AS x) SELECT x FROM t").ok);
}

#[test]
fn inspector_questions_pick_the_inspector_family() {
    let matcher = TemplateMatcher::new(
        Arc::new(TemplateCatalog::with_builtin(None)),
        &TemplateConfig::default(),
    );
    let parsed = ParsedQuery::new(Intent::Count).with_entity("inspector", "7");

    let best = matcher.find_best_template(&parsed);
    assert_eq!(best.template.family, TemplateFamily::Inspectors);

    let first = matcher.build_query(&best.template, &parsed);
    let second = matcher.build_query(&best.template, &parsed);
    assert_eq!(first, second);
    assert!(!first.contains('{'));
}

#[test]
fn violation_count_outscores_every_other_family() {
    let matcher = TemplateMatcher::new(
        Arc::new(TemplateCatalog::with_builtin(None)),
        &TemplateConfig::default(),
    );
    let parsed = ParsedQuery::new(Intent::Count).with_metric("violations");

    let best = matcher.find_best_template(&parsed);
    assert!(best.template.sql_mentions("EventViolation"));
    let best_raw = matcher.score(&best.template, &parsed);
    for template in matcher.catalog().templates() {
        if template.family != TemplateFamily::Violations {
            assert!(matcher.score(&template, &parsed) < best_raw, "{}", template.id);
        }
    }
}

#[tokio::test]
async fn template_answers_run_against_duckdb() {
    let engine = engine(&[]).await;
    let parsed = ParsedQuery::new(Intent::Count).with_metric("violations");

    let answer = engine
        .resolver
        .answer("how many violations", &parsed, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer.status, AnswerStatus::Ok);
    assert_eq!(answer.resolution.source, ResolutionSource::Template);
    assert_eq!(answer.rows[0]["total_violations"], json!(3));
    assert_eq!(engine.llm_calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.resolver.monitor().get_stats().successful_queries, 1);
}

#[tokio::test]
async fn dynamic_success_is_learned_and_reused() {
    let reply = r#"{"thinking": "filter by year", "sql": "SELECT COUNT(*) AS total FROM Event e WHERE e.IsDeleted = 0 AND YEAR(e.SubmitionDate) = 2024", "explanation": "Counts inspections in a year"}"#;
    let engine = engine(&[reply]).await;
    let parsed = ParsedQuery::new(Intent::Count);
    let cancel = CancellationToken::new();

    let first = engine
        .resolver
        .answer("how many records in 2024", &parsed, &cancel)
        .await
        .unwrap();
    assert_eq!(first.resolution.source, ResolutionSource::Dynamic);
    assert_eq!(first.rows[0]["total"], json!(2));

    let second = engine
        .resolver
        .answer("how many records in 2023", &parsed, &cancel)
        .await
        .unwrap();
    assert_eq!(second.resolution.source, ResolutionSource::Learned);
    assert_eq!(second.rows[0]["total"], json!(1));
    assert_eq!(engine.llm_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn three_captures_make_the_fourth_lookup_learned() {
    let engine = engine(&[]).await;
    let sql = "SELECT COUNT(*) AS total FROM EventViolation ev WHERE ev.Severity = 3";
    let tables = vec!["EventViolation".to_string()];
    for _ in 0..3 {
        engine.store.capture(Capture {
            question: "how many severe violations",
            sql,
            intent: Some(Intent::Count),
            parsed: None,
            tables: &tables,
            success: true,
            latency_ms: 100,
            user_validated: false,
        });
    }

    let resolution = engine
        .resolver
        .resolve(
            "how many severe violations",
            &ParsedQuery::new(Intent::Count),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(resolution.source, ResolutionSource::Learned);
    assert_eq!(resolution.sql.as_deref(), Some(sql));
    assert_eq!(engine.llm_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn fuzzy_match_substitutes_the_new_year() {
    let store = LearnedQueryStore::open(
        build_pool(":memory:", 2).unwrap(),
        &LearningConfig::default(),
        None,
    )
    .unwrap();
    store.capture(Capture {
        question: "how many violations in 2023",
        sql: "SELECT COUNT(*) FROM EventViolation ev JOIN Event e ON ev.EventId = e.Id WHERE YEAR(e.SubmitionDate) = 2023",
        intent: Some(Intent::Count),
        parsed: None,
        tables: &[],
        success: true,
        latency_ms: 120,
        user_validated: false,
    });

    let found = store.find_matching_query("how many violations in 2024").unwrap();
    assert_eq!(found.pattern, "how many violations in {YEAR}");
    assert!(found.similarity >= 0.7);
    assert!(found.sql.ends_with("= 2024"));
}

#[test]
fn promotion_respects_latency_and_reaches_the_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("promoted.json");
    let store = LearnedQueryStore::open(
        build_pool(":memory:", 2).unwrap(),
        &LearningConfig::default(),
        Some(export.clone()),
    )
    .unwrap();

    let capture = |question: &'static str, latency_ms| {
        store.capture(Capture {
            question,
            sql: "SELECT AVG(e.Score) AS avg_score FROM Event e WHERE e.IsDeleted = 0",
            intent: Some(Intent::Average),
            parsed: None,
            tables: &[],
            success: true,
            latency_ms,
            user_validated: false,
        })
    };

    let promoted: Vec<bool> = (0..3).map(|_| capture("average score", 200).promoted).collect();
    assert_eq!(promoted, vec![false, false, true]);

    let slow: Vec<bool> = (0..3).map(|_| capture("mean score please", 6000).promoted).collect();
    assert!(slow.iter().all(|p| !p));

    let catalog = TemplateCatalog::with_builtin(Some(export));
    assert_eq!(catalog.promoted_count(), 0);
    assert_eq!(catalog.reload_promoted(), 1);
    assert_eq!(catalog.promoted_count(), 1);
}

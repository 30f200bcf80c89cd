//! Learned-query library: captures executed dynamic SQL by question pattern,
//! tracks reliability, and promotes dependable entries into the template catalog.

use chrono::{DateTime, Utc};
use duckdb::{params, Connection, Row};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing::{debug, error, info};

use super::pattern::{self, Bindings, QuestionPattern, Slot};
use super::query::{Intent, ParsedQuery};
use super::templates::{
    LearnedSignature, PromotedExport, SqlTemplate, TemplateFamily, EXPORT_VERSION,
};
use crate::config::LearningConfig;
use crate::db::db_pool::DuckDbPool;
use crate::error::Result;
use crate::util::text::short_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Auto,
    User,
}

impl Provenance {
    fn as_str(&self) -> &'static str {
        match self {
            Provenance::Auto => "auto",
            Provenance::User => "user",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "user" {
            Provenance::User
        } else {
            Provenance::Auto
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LearnedQuery {
    pub id: String,
    pub pattern: String,
    /// SQL with the question's values replaced by pattern placeholders.
    pub sql: String,
    /// Values of the question the entry was first captured from.
    pub bindings: Bindings,
    pub intent: Option<Intent>,
    /// Metric and entity shape of the question, when it was known.
    pub signature: Option<LearnedSignature>,
    pub tables: Vec<String>,
    pub use_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub avg_latency_ms: f64,
    pub confidence: f64,
    pub promoted: bool,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl LearnedQuery {
    fn new(pattern: &QuestionPattern, sql: String, intent: Option<Intent>, tables: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: short_hash(&format!("{}\u{1f}{}", pattern.pattern, sql)),
            pattern: pattern.pattern.clone(),
            sql,
            bindings: pattern.bindings.clone(),
            intent,
            signature: None,
            tables,
            use_count: 0,
            success_count: 0,
            failure_count: 0,
            avg_latency_ms: 0.0,
            confidence: 0.0,
            promoted: false,
            provenance: Provenance::Auto,
            created_at: now,
            last_used: now,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.use_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.use_count as f64
        }
    }

    fn record(&mut self, success: bool, latency_ms: u64, user_validated: bool) {
        self.use_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.avg_latency_ms += (latency_ms as f64 - self.avg_latency_ms) / self.use_count as f64;
        if user_validated {
            self.provenance = Provenance::User;
        }
        self.last_used = Utc::now();
        self.confidence = self.compute_confidence();
    }

    /// Base 0.5, adjusted by success rate, usage and latency tiers.
    pub fn compute_confidence(&self) -> f64 {
        let mut confidence = 0.5_f64;
        let rate = self.success_rate();
        if rate >= 0.9 {
            confidence += 0.3;
        } else if rate >= 0.7 {
            confidence += 0.2;
        }
        if self.use_count >= 10 {
            confidence += 0.15;
        } else if self.use_count >= 5 {
            confidence += 0.1;
        }
        if self.avg_latency_ms < 1_000.0 {
            confidence += 0.1;
        } else if self.avg_latency_ms > 5_000.0 {
            confidence -= 0.1;
        }
        confidence.clamp(0.0, 1.0)
    }

    /// Placeholders become matcher slots; the values of the question the entry
    /// was learned from fill any slot the next question leaves empty.
    fn to_template(&self) -> SqlTemplate {
        let renames = self
            .signature
            .as_ref()
            .map(|signature| signature.slots.clone())
            .unwrap_or_default();
        let (sql, defaults) = pattern::named_slots(&self.sql, &self.bindings, &renames);
        SqlTemplate {
            id: format!("LEARNED_{}", &self.id[..self.id.len().min(8)]),
            name: self.pattern.clone(),
            family: TemplateFamily::Learned,
            specialization: None,
            intents: vec![self.intent.unwrap_or(Intent::Unknown)],
            sql,
            filters: BTreeMap::new(),
            chart: None,
            description: Some(format!(
                "Promoted after {} uses ({:.0}% success)",
                self.use_count,
                self.success_rate() * 100.0
            )),
            signature: self.signature.clone(),
            defaults,
        }
    }
}

/// Signature of the question plus which entity or limit each captured value
/// came from, so a promoted template can take the next question's values.
fn learned_signature(parsed: &ParsedQuery, bindings: &Bindings) -> LearnedSignature {
    let mut signature = LearnedSignature::from_parsed(parsed);
    for (slot, index, value) in bindings.indexed() {
        let source = match slot {
            Slot::Value => parsed
                .entities()
                .iter()
                .find(|(key, entity)| {
                    key.as_str() != "limit" && entity.to_lowercase() == value.to_lowercase()
                })
                .map(|(key, _)| key.clone()),
            Slot::Number if parsed.limit().is_some_and(|limit| limit.to_string() == value) => {
                Some("limit".to_string())
            }
            _ => None,
        };
        if let Some(source) = source {
            signature.slots.insert(slot.key(index), source);
        }
    }
    signature
}

/// Thresholds for freezing a learned query into the template catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionPolicy {
    pub min_uses: u32,
    pub min_uses_user: u32,
    pub min_success_rate: f64,
    pub min_success_rate_user: f64,
    pub max_avg_latency_ms: f64,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            min_uses: 3,
            min_uses_user: 2,
            min_success_rate: 0.8,
            min_success_rate_user: 0.7,
            max_avg_latency_ms: 5_000.0,
        }
    }
}

impl PromotionPolicy {
    pub fn qualifies(&self, query: &LearnedQuery) -> bool {
        let (min_uses, min_rate) = match query.provenance {
            Provenance::User => (self.min_uses_user, self.min_success_rate_user),
            Provenance::Auto => (self.min_uses, self.min_success_rate),
        };
        !query.promoted
            && query.use_count >= min_uses
            && query.success_rate() >= min_rate
            && query.avg_latency_ms <= self.max_avg_latency_ms
    }
}

/// One execution outcome to learn from.
#[derive(Debug, Clone)]
pub struct Capture<'a> {
    pub question: &'a str,
    pub sql: &'a str,
    pub intent: Option<Intent>,
    /// Parsed form of the question; absent for feedback submissions.
    pub parsed: Option<&'a ParsedQuery>,
    pub tables: &'a [String],
    pub success: bool,
    pub latency_ms: u64,
    pub user_validated: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CaptureOutcome {
    pub id: String,
    pub use_count: u32,
    pub confidence: f64,
    /// True only on the capture that crossed the promotion thresholds.
    pub promoted: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LearnedMatch {
    pub id: String,
    pub pattern: String,
    /// Executable SQL with the current question's values filled in.
    pub sql: String,
    pub confidence: f64,
    pub similarity: f64,
    pub tables: Vec<String>,
    pub promoted: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatternUsage {
    pub pattern: String,
    pub use_count: u32,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct LearningStats {
    pub total_queries: u64,
    pub promoted: u64,
    pub total_uses: u64,
    pub avg_confidence: f64,
    pub hot_entries: usize,
    pub top_patterns: Vec<PatternUsage>,
}

const COLUMNS: &str = "id, pattern, sql_text, bindings, intent, tables, use_count, success_count, \
     failure_count, avg_latency_ms, confidence, promoted, provenance, created_at, last_used, signature";

pub struct LearnedQueryStore {
    pool: DuckDbPool,
    hot: Mutex<LruCache<String, LearnedQuery>>,
    similarity_threshold: f64,
    scan_limit: usize,
    min_scan_use_count: u32,
    policy: PromotionPolicy,
    export_path: Option<PathBuf>,
}

impl LearnedQueryStore {
    pub fn open(pool: DuckDbPool, config: &LearningConfig, export_path: Option<PathBuf>) -> Result<Self> {
        let conn = pool.get()?;
        init_schema(&conn)?;
        let size = NonZeroUsize::new(config.hot_cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            pool,
            hot: Mutex::new(LruCache::new(size)),
            similarity_threshold: config.similarity_threshold,
            scan_limit: config.scan_limit.max(1),
            min_scan_use_count: config.min_scan_use_count,
            policy: PromotionPolicy::default(),
            export_path,
        })
    }

    pub fn with_policy(mut self, policy: PromotionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn export_path(&self) -> Option<&PathBuf> {
        self.export_path.as_ref()
    }

    /// Records one execution outcome. Blocks on DuckDB; call from a blocking
    /// context. Persistence failures are logged and the in-memory state kept.
    pub fn capture(&self, capture: Capture<'_>) -> CaptureOutcome {
        let question = pattern::extract_pattern(capture.question);
        let sql = pattern::templatize_sql(capture.sql, &question.bindings);

        let recorded = {
            let mut hot = self.hot.lock();
            match self.find_hot(&hot, &question, &sql) {
                Some(id) => hot
                    .get_mut(&id)
                    .map(|entry| self.apply(entry, &question, &capture)),
                None => None,
            }
        };
        let (entry, newly_promoted) = match recorded {
            Some(recorded) => recorded,
            None => {
                let seed = match self.find_persisted_for_capture(&question, &sql) {
                    Ok(Some(found)) => found,
                    Ok(None) => LearnedQuery::new(&question, sql.clone(), capture.intent, capture.tables.to_vec()),
                    Err(e) => {
                        error!("Learned-store lookup failed, starting a fresh entry: {}", e);
                        LearnedQuery::new(&question, sql.clone(), capture.intent, capture.tables.to_vec())
                    }
                };
                // the entry may have been loaded by another capture while we read
                let mut hot = self.hot.lock();
                let loaded = match self.find_hot(&hot, &question, &sql) {
                    Some(id) => hot.get_mut(&id),
                    None => None,
                };
                match loaded {
                    Some(entry) => self.apply(entry, &question, &capture),
                    None => {
                        let mut seed = seed;
                        let recorded = self.apply(&mut seed, &question, &capture);
                        hot.put(seed.id.clone(), seed);
                        recorded
                    }
                }
            }
        };

        if newly_promoted {
            info!(
                "Promoting learned query {} (pattern '{}', {} uses)",
                entry.id, entry.pattern, entry.use_count
            );
        }
        if let Err(e) = self.persist(&entry) {
            error!("Failed to persist learned query {}: {}", entry.id, e);
        }
        if newly_promoted {
            if let Err(e) = self.export_promoted() {
                error!("Failed to export promoted templates: {}", e);
            }
        }

        debug!(
            "Captured '{}' (uses={}, confidence={:.2})",
            entry.pattern, entry.use_count, entry.confidence
        );
        CaptureOutcome {
            id: entry.id,
            use_count: entry.use_count,
            confidence: entry.confidence,
            promoted: newly_promoted,
        }
    }

    /// Hot entry with this exact pattern and SQL, else one whose pattern is
    /// similar enough and whose SQL is identical.
    fn find_hot(
        &self,
        hot: &LruCache<String, LearnedQuery>,
        question: &QuestionPattern,
        sql: &str,
    ) -> Option<String> {
        hot.iter()
            .find(|(_, q)| q.pattern == question.pattern && q.sql == sql)
            .or_else(|| {
                hot.iter().find(|(_, q)| {
                    q.sql == sql
                        && pattern::token_jaccard(&q.pattern, &question.pattern) >= self.similarity_threshold
                })
            })
            .map(|(id, _)| id.clone())
    }

    /// Applies one outcome to the shared entry under the hot-index lock and
    /// decides promotion, returning a snapshot to persist.
    fn apply(
        &self,
        entry: &mut LearnedQuery,
        question: &QuestionPattern,
        capture: &Capture<'_>,
    ) -> (LearnedQuery, bool) {
        entry.record(capture.success, capture.latency_ms, capture.user_validated);
        if entry.intent.is_none() {
            entry.intent = capture.intent;
        }
        if entry.signature.is_none() {
            entry.signature = capture
                .parsed
                .map(|parsed| learned_signature(parsed, &question.bindings));
        }
        let newly_promoted = self.policy.qualifies(entry);
        if newly_promoted {
            entry.promoted = true;
        }
        (entry.clone(), newly_promoted)
    }

    fn find_persisted_for_capture(&self, question: &QuestionPattern, sql: &str) -> Result<Option<LearnedQuery>> {
        let conn = self.pool.get()?;
        let id = short_hash(&format!("{}\u{1f}{}", question.pattern, sql));
        if let Some(found) = query_one(&conn, &format!("SELECT {} FROM learned_queries WHERE id = ?", COLUMNS), &id)? {
            return Ok(Some(found));
        }
        let best = self
            .scan(&conn)?
            .into_iter()
            .filter(|q| q.sql == sql)
            .map(|q| (pattern::token_jaccard(&q.pattern, &question.pattern), q))
            .filter(|(score, _)| *score >= self.similarity_threshold)
            .max_by(|a, b| a.0.total_cmp(&b.0));
        Ok(best.map(|(_, q)| q))
    }

    /// Bounded candidate set for fuzzy matching: the most used entries only.
    fn scan(&self, conn: &Connection) -> Result<Vec<LearnedQuery>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM learned_queries WHERE use_count >= ? ORDER BY use_count DESC LIMIT ?",
            COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![self.min_scan_use_count as i64, self.scan_limit as i64],
            from_row,
        )?;
        Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
    }

    /// Looks up a reusable query for this question: exact pattern in the hot
    /// index, then fuzzy in the hot index, then a bounded persisted scan.
    pub fn find_matching_query(&self, question: &str) -> Option<LearnedMatch> {
        let current = pattern::extract_pattern(question);

        let hit = {
            let hot = self.hot.lock();
            best_match(hot.iter().map(|(_, q)| q), &current.pattern, self.similarity_threshold)
                .map(|(q, similarity)| (q.clone(), similarity))
        };
        let hit = match hit {
            Some(hit) => Some(hit),
            None => match self.find_persisted(&current.pattern) {
                Ok(found) => found,
                Err(e) => {
                    error!("Learned-store scan failed: {}", e);
                    None
                }
            },
        };

        let (entry, similarity) = hit?;
        if entry.success_count == 0 || entry.success_rate() < 0.5 {
            return None;
        }
        let sql = pattern::substitute(&entry.sql, &[&current.bindings, &entry.bindings])?;
        self.hot.lock().put(entry.id.clone(), entry.clone());

        Some(LearnedMatch {
            id: entry.id,
            pattern: entry.pattern,
            sql,
            confidence: entry.confidence,
            similarity,
            tables: entry.tables,
            promoted: entry.promoted,
        })
    }

    fn find_persisted(&self, target: &str) -> Result<Option<(LearnedQuery, f64)>> {
        let conn = self.pool.get()?;
        let exact = query_one(
            &conn,
            &format!(
                "SELECT {} FROM learned_queries WHERE pattern = ? ORDER BY confidence DESC LIMIT 1",
                COLUMNS
            ),
            target,
        )?;
        if let Some(found) = exact {
            return Ok(Some((found, 1.0)));
        }
        let candidates = self.scan(&conn)?;
        Ok(best_match(candidates.iter(), target, self.similarity_threshold).map(|(q, s)| (q.clone(), s)))
    }

    pub fn get(&self, id: &str) -> Option<LearnedQuery> {
        if let Some(entry) = self.hot.lock().peek(id) {
            return Some(entry.clone());
        }
        let conn = self.pool.get().ok()?;
        query_one(&conn, &format!("SELECT {} FROM learned_queries WHERE id = ?", COLUMNS), id)
            .unwrap_or_else(|e| {
                error!("Failed to load learned query {}: {}", id, e);
                None
            })
    }

    /// Writes the entry unless a later snapshot of it is already stored.
    fn persist(&self, entry: &LearnedQuery) -> Result<()> {
        let conn = self.pool.get()?;
        let bindings = serde_json::to_string(&entry.bindings)?;
        let tables = serde_json::to_string(&entry.tables)?;
        let signature = entry
            .signature
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let intent = entry.intent.map(|i| i.as_str().to_string());

        let update = || {
            conn.execute(
                "UPDATE learned_queries SET use_count = ?, success_count = ?, failure_count = ?, \
                 avg_latency_ms = ?, confidence = ?, promoted = ?, provenance = ?, intent = ?, \
                 signature = ?, last_used = ? WHERE id = ? AND use_count <= ?",
                params![
                    entry.use_count as i64,
                    entry.success_count as i64,
                    entry.failure_count as i64,
                    entry.avg_latency_ms,
                    entry.confidence,
                    entry.promoted,
                    entry.provenance.as_str(),
                    intent,
                    signature,
                    entry.last_used.to_rfc3339(),
                    entry.id,
                    entry.use_count as i64,
                ],
            )
        };
        if update()? > 0 || row_exists(&conn, &entry.id)? {
            return Ok(());
        }

        let inserted = conn.execute(
            &format!(
                "INSERT INTO learned_queries ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                COLUMNS
            ),
            params![
                entry.id,
                entry.pattern,
                entry.sql,
                bindings,
                intent,
                tables,
                entry.use_count as i64,
                entry.success_count as i64,
                entry.failure_count as i64,
                entry.avg_latency_ms,
                entry.confidence,
                entry.promoted,
                entry.provenance.as_str(),
                entry.created_at.to_rfc3339(),
                entry.last_used.to_rfc3339(),
                signature,
            ],
        );
        if let Err(e) = inserted {
            // a concurrent capture may have inserted the row first
            if update()? == 0 && !row_exists(&conn, &entry.id)? {
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Rewrites the promoted-template export from every promoted entry.
    pub fn export_promoted(&self) -> Result<usize> {
        let Some(path) = &self.export_path else {
            return Ok(0);
        };
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM learned_queries WHERE promoted = true ORDER BY created_at",
            COLUMNS
        ))?;
        let promoted = stmt
            .query_map([], from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;

        let export = PromotedExport {
            version: EXPORT_VERSION,
            generated_at: Utc::now(),
            templates: promoted.iter().map(LearnedQuery::to_template).collect(),
        };
        export.write(path)?;
        info!("Exported {} promoted templates to {}", promoted.len(), path.display());
        Ok(promoted.len())
    }

    /// Un-promoted entries ordered by how close they are to promotion.
    pub fn get_promotion_candidates(&self, limit: usize) -> Vec<LearnedQuery> {
        let load = || -> Result<Vec<LearnedQuery>> {
            let conn = self.pool.get()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM learned_queries WHERE promoted = false AND success_count > 0 \
                 ORDER BY use_count DESC, confidence DESC LIMIT ?",
                COLUMNS
            ))?;
            let rows = stmt.query_map(params![limit as i64], from_row)?;
            Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
        };
        load().unwrap_or_else(|e| {
            error!("Failed to load promotion candidates: {}", e);
            Vec::new()
        })
    }

    pub fn get_stats(&self) -> LearningStats {
        let hot_entries = self.hot.lock().len();
        let load = || -> Result<LearningStats> {
            let conn = self.pool.get()?;
            let (total_queries, promoted, total_uses, avg_confidence) = conn.query_row(
                "SELECT COUNT(*), \
                 CAST(COALESCE(SUM(CASE WHEN promoted THEN 1 ELSE 0 END), 0) AS BIGINT), \
                 CAST(COALESCE(SUM(use_count), 0) AS BIGINT), \
                 COALESCE(AVG(confidence), 0.0) FROM learned_queries",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )?;
            let mut stmt = conn.prepare(
                "SELECT pattern, use_count, confidence FROM learned_queries \
                 ORDER BY use_count DESC, confidence DESC LIMIT 5",
            )?;
            let top_patterns = stmt
                .query_map([], |row| {
                    Ok(PatternUsage {
                        pattern: row.get(0)?,
                        use_count: row.get::<_, i64>(1)?.max(0) as u32,
                        confidence: row.get(2)?,
                    })
                })?
                .collect::<duckdb::Result<Vec<_>>>()?;
            Ok(LearningStats {
                total_queries: total_queries.max(0) as u64,
                promoted: promoted.max(0) as u64,
                total_uses: total_uses.max(0) as u64,
                avg_confidence,
                hot_entries,
                top_patterns,
            })
        };
        load().unwrap_or_else(|e| {
            error!("Failed to compute learning stats: {}", e);
            LearningStats {
                hot_entries,
                ..Default::default()
            }
        })
    }

    /// Deletes un-promoted entries with at least `min_failures` failures that
    /// fail more often than they succeed.
    pub fn clear_failed_queries(&self, min_failures: u32) -> usize {
        {
            let mut hot = self.hot.lock();
            let doomed: Vec<String> = hot
                .iter()
                .filter(|(_, q)| is_failed(q, min_failures))
                .map(|(id, _)| id.clone())
                .collect();
            for id in doomed {
                hot.pop(&id);
            }
        }
        let delete = || -> Result<usize> {
            let conn = self.pool.get()?;
            Ok(conn.execute(
                "DELETE FROM learned_queries WHERE promoted = false AND failure_count >= ? \
                 AND failure_count > success_count",
                params![min_failures as i64],
            )?)
        };
        match delete() {
            Ok(removed) => {
                info!("Cleared {} failing learned queries", removed);
                removed
            }
            Err(e) => {
                error!("Failed to clear failing learned queries: {}", e);
                0
            }
        }
    }
}

fn is_failed(query: &LearnedQuery, min_failures: u32) -> bool {
    !query.promoted && query.failure_count >= min_failures && query.failure_count > query.success_count
}

fn best_match<'a>(
    candidates: impl Iterator<Item = &'a LearnedQuery>,
    target: &str,
    threshold: f64,
) -> Option<(&'a LearnedQuery, f64)> {
    let candidates: Vec<&LearnedQuery> = candidates.collect();
    let exact = candidates
        .iter()
        .filter(|q| q.pattern == target)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
    if let Some(exact) = exact {
        return Some((*exact, 1.0));
    }
    candidates
        .into_iter()
        .map(|q| (q, pattern::token_jaccard(&q.pattern, target)))
        .filter(|(_, score)| *score >= threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1).then(a.0.confidence.total_cmp(&b.0.confidence)))
}

fn row_exists(conn: &Connection, id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM learned_queries WHERE id = ?",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS learned_queries (
            id VARCHAR PRIMARY KEY,
            pattern VARCHAR NOT NULL,
            sql_text VARCHAR NOT NULL,
            bindings VARCHAR NOT NULL,
            intent VARCHAR,
            tables VARCHAR NOT NULL,
            use_count BIGINT NOT NULL,
            success_count BIGINT NOT NULL,
            failure_count BIGINT NOT NULL,
            avg_latency_ms DOUBLE NOT NULL,
            confidence DOUBLE NOT NULL,
            promoted BOOLEAN NOT NULL,
            provenance VARCHAR NOT NULL,
            created_at VARCHAR NOT NULL,
            last_used VARCHAR NOT NULL,
            signature VARCHAR
        );
        CREATE INDEX IF NOT EXISTS idx_learned_pattern ON learned_queries(pattern);",
    )?;
    Ok(())
}

fn query_one(conn: &Connection, sql: &str, key: &str) -> Result<Option<LearnedQuery>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query_map(params![key], from_row)?;
    Ok(rows.next().transpose()?)
}

fn from_row(row: &Row<'_>) -> duckdb::Result<LearnedQuery> {
    let bindings: String = row.get(3)?;
    let intent: Option<String> = row.get(4)?;
    let tables: String = row.get(5)?;
    let provenance: String = row.get(12)?;
    let created_at: String = row.get(13)?;
    let last_used: String = row.get(14)?;
    let signature: Option<String> = row.get(15)?;
    Ok(LearnedQuery {
        id: row.get(0)?,
        pattern: row.get(1)?,
        sql: row.get(2)?,
        bindings: serde_json::from_str(&bindings).unwrap_or_default(),
        intent: intent.and_then(|i| serde_json::from_value(serde_json::Value::String(i)).ok()),
        signature: signature.and_then(|raw| serde_json::from_str(&raw).ok()),
        tables: serde_json::from_str(&tables).unwrap_or_default(),
        use_count: row.get::<_, i64>(6)?.max(0) as u32,
        success_count: row.get::<_, i64>(7)?.max(0) as u32,
        failure_count: row.get::<_, i64>(8)?.max(0) as u32,
        avg_latency_ms: row.get(9)?,
        confidence: row.get(10)?,
        promoted: row.get(11)?,
        provenance: Provenance::parse(&provenance),
        created_at: parse_time(&created_at),
        last_used: parse_time(&last_used),
    })
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

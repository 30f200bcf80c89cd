use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::{builtin, Specialization, SqlTemplate, TemplateCatalog};
use crate::config::TemplateConfig;
use crate::engine::query::{Granularity, Intent, ParsedQuery};
use crate::util::text::{collapse_whitespace, sanitize_value, static_regex};

/// Points awarded by the matcher. Negative values penalise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    pub intent_exact: f64,
    pub intent_compatible: f64,
    pub map_specialization: f64,
    pub map_chart: f64,
    pub inspector_specialization: f64,
    pub inspector_column: f64,
    pub location_specialization: f64,
    pub location_slot: f64,
    pub location_table: f64,
    pub activity_slot: f64,
    pub activity_table: f64,
    pub metric_violations: f64,
    pub metric_violations_table: f64,
    pub metric_inspections: f64,
    pub metric_inspections_table: f64,
    pub metric_inspectors: f64,
    pub metric_inspectors_column: f64,
    pub metric_score: f64,
    pub metric_status: f64,
    pub metric_forecast: f64,
    pub metric_mismatch: f64,
    pub time_year: f64,
    pub time_month: f64,
    pub ranking_cue: f64,
    pub trend_cue: f64,
    /// Promoted template whose learned metric and entity keys match.
    pub learned_signature: f64,
    /// Raw score that maps to a normalised 100.
    pub full_confidence: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            intent_exact: 10.0,
            intent_compatible: 5.0,
            map_specialization: 30.0,
            map_chart: 25.0,
            inspector_specialization: 20.0,
            inspector_column: 10.0,
            location_specialization: 20.0,
            location_slot: 15.0,
            location_table: 10.0,
            activity_slot: 25.0,
            activity_table: 15.0,
            metric_violations: 25.0,
            metric_violations_table: 15.0,
            metric_inspections: 15.0,
            metric_inspections_table: 10.0,
            metric_inspectors: 25.0,
            metric_inspectors_column: 10.0,
            metric_score: 10.0,
            metric_status: 5.0,
            metric_forecast: 20.0,
            metric_mismatch: -10.0,
            time_year: 2.0,
            time_month: 3.0,
            ranking_cue: 5.0,
            trend_cue: 5.0,
            learned_signature: 20.0,
            full_confidence: 40.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    Violations,
    Inspectors,
    Inspections,
    Score,
    Forecast,
}

impl Metric {
    fn classify(metric: &str) -> Option<Self> {
        let has = |needles: &[&str]| needles.iter().any(|n| metric.contains(n));
        if has(&["violation", "fine", "penalt", "مخالف", "غرام"]) {
            Some(Metric::Violations)
        } else if has(&["inspector", "performance", "مفتش", "مراقب"]) {
            Some(Metric::Inspectors)
        } else if has(&["inspection", "report", "event", "visit", "تفتيش", "زيار", "بلاغ"]) {
            Some(Metric::Inspections)
        } else if has(&["score", "compliance", "status", "درجة", "امتثال"]) {
            Some(Metric::Score)
        } else if has(&["forecast", "predict", "توقع"]) {
            Some(Metric::Forecast)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateMatch {
    pub template: Arc<SqlTemplate>,
    pub raw_score: f64,
    /// Normalised to 0-100.
    pub score: f64,
    /// True when no template scored above zero and the fallback chain picked one.
    pub fallback: bool,
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| static_regex(r"\{([A-Za-z_][A-Za-z0-9_]*)\}"));
static INDEX_SUFFIX: Lazy<Regex> = Lazy::new(|| static_regex(r"_\d+$"));

static WHERE_CONNECTOR: Lazy<Regex> =
    Lazy::new(|| static_regex(r"(?i)\bWHERE\s+(?:AND|OR)\b"));
static DOUBLE_CONNECTOR: Lazy<Regex> =
    Lazy::new(|| static_regex(r"(?i)\b(AND|OR)\s+(?:AND|OR)\b"));
static PAREN_CONNECTOR: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\(\s*(?:AND|OR)\b"));
static TRAILING_CONNECTOR: Lazy<Regex> = Lazy::new(|| {
    static_regex(r"(?i)\s(?:AND|OR)\s*(\)|$|\bGROUP\s+BY\b|\bORDER\s+BY\b|\bHAVING\b|\bLIMIT\b)")
});
static EMPTY_WHERE: Lazy<Regex> = Lazy::new(|| {
    static_regex(r"(?i)\bWHERE\s*(\)|$|\bGROUP\s+BY\b|\bORDER\s+BY\b|\bHAVING\b|\bLIMIT\b)")
});

/// Scores catalog templates against a parsed question and fills the winner.
pub struct TemplateMatcher {
    catalog: Arc<TemplateCatalog>,
    weights: ScoringWeights,
    default_limit: u32,
    default_year: i32,
}

impl TemplateMatcher {
    pub fn new(catalog: Arc<TemplateCatalog>, config: &TemplateConfig) -> Self {
        Self {
            catalog,
            weights: config.weights.clone(),
            default_limit: config.default_limit.max(1),
            default_year: chrono::Utc::now().year(),
        }
    }

    /// Pins the year used for bare `{year}` placeholders.
    pub fn with_default_year(mut self, year: i32) -> Self {
        self.default_year = year;
        self
    }

    pub fn catalog(&self) -> &Arc<TemplateCatalog> {
        &self.catalog
    }

    pub fn reload(&self) -> usize {
        self.catalog.reload_promoted()
    }

    pub fn normalize(&self, raw_score: f64) -> f64 {
        if self.weights.full_confidence <= 0.0 {
            return 0.0;
        }
        (raw_score / self.weights.full_confidence * 100.0).clamp(0.0, 100.0)
    }

    /// Raw additive score of one template for one question.
    pub fn score(&self, template: &SqlTemplate, parsed: &ParsedQuery) -> f64 {
        let w = &self.weights;
        let intent = parsed.intent();
        let sql = template.sql.to_lowercase();
        let mut score = 0.0;

        if template.supports(intent) {
            score += w.intent_exact;
        } else if intent.compatible().iter().any(|i| template.supports(*i)) {
            score += w.intent_compatible;
        }

        if intent == Intent::Map {
            if template.specialization == Some(Specialization::Map) {
                score += w.map_specialization;
            }
            if template.chart.as_deref() == Some("map") {
                score += w.map_chart;
            }
        }

        if parsed.inspector().is_some() {
            if template.specialization == Some(Specialization::Inspector) {
                score += w.inspector_specialization;
            }
            if sql.contains("reporterid") {
                score += w.inspector_column;
            }
        }

        if parsed.location().is_some() {
            if template.specialization == Some(Specialization::Location) {
                score += w.location_specialization;
            }
            if template.has_slot("location_filter") {
                score += w.location_slot;
            }
            if sql.contains("locations") {
                score += w.location_table;
            }
        }

        if parsed.activity().is_some() {
            if template.has_slot("activity_filter") {
                score += w.activity_slot;
            }
            if sql.contains("locationtype") {
                score += w.activity_table;
            }
        }

        if let Some(metric) = parsed.metric().and_then(Metric::classify) {
            let earned = self.metric_points(metric, template, &sql);
            if earned > 0.0 {
                score += earned;
            } else if template.family.is_metric_specific() {
                score += w.metric_mismatch;
            }
        }

        if template
            .signature
            .as_ref()
            .is_some_and(|signature| signature.matches(parsed))
        {
            score += w.learned_signature;
        }

        let time = parsed.time_range();
        let wants_year =
            time.get_year().is_some() || time.granularity() == Some(Granularity::Year);
        if wants_year && (template.has_slot("year_filter") || sql.contains("year(")) {
            score += w.time_year;
        }
        if time.get_month().is_some() && (template.has_slot("month_filter") || sql.contains("month("))
        {
            score += w.time_month;
        }

        match intent {
            Intent::Ranking if sql.contains(" desc") && sql.contains(" limit ") => {
                score += w.ranking_cue;
            }
            Intent::Trend if sql.contains("group by") && sql.contains("month(") => {
                score += w.trend_cue;
            }
            _ => {}
        }

        score
    }

    fn metric_points(&self, metric: Metric, template: &SqlTemplate, sql: &str) -> f64 {
        use super::TemplateFamily as F;
        let w = &self.weights;
        let mut points = 0.0;
        match metric {
            Metric::Violations => {
                if template.family == F::Violations {
                    points += w.metric_violations;
                }
                if sql.contains("eventviolation") {
                    points += w.metric_violations_table;
                }
            }
            Metric::Inspectors => {
                if template.family == F::Inspectors {
                    points += w.metric_inspectors;
                }
                if sql.contains("reporterid") {
                    points += w.metric_inspectors_column;
                }
            }
            Metric::Inspections => {
                if template.family == F::Inspections {
                    points += w.metric_inspections;
                } else if !sql.contains("eventviolation") && template.family != F::Inspectors {
                    points += w.metric_inspections_table;
                }
            }
            Metric::Score => {
                if sql.contains("score") {
                    points += w.metric_score;
                }
                if sql.contains("status") {
                    points += w.metric_status;
                }
            }
            Metric::Forecast => {
                if template.family == F::Forecasting {
                    points += w.metric_forecast;
                }
            }
        }
        points
    }

    /// Highest-scoring template, first in catalog order on ties. Never empty-handed.
    pub fn find_best_template(&self, parsed: &ParsedQuery) -> TemplateMatch {
        let templates = self.catalog.templates();
        let mut best: Option<(&Arc<SqlTemplate>, f64)> = None;
        for template in &templates {
            let score = self.score(template, parsed);
            if score <= 0.0 {
                continue;
            }
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((template, score));
            }
        }

        match best {
            Some((template, raw_score)) => {
                debug!("Best template {} scored {}", template.id, raw_score);
                TemplateMatch {
                    template: template.clone(),
                    raw_score,
                    score: self.normalize(raw_score),
                    fallback: false,
                }
            }
            None => {
                let template = self.fallback(&templates, parsed);
                debug!("No template scored; falling back to {}", template.id);
                TemplateMatch {
                    template,
                    raw_score: 0.0,
                    score: 0.0,
                    fallback: true,
                }
            }
        }
    }

    /// Normalised score (0-100) of the best template for this question.
    pub fn get_match_score(&self, parsed: &ParsedQuery) -> f64 {
        self.find_best_template(parsed).score
    }

    fn fallback(&self, templates: &[Arc<SqlTemplate>], parsed: &ParsedQuery) -> Arc<SqlTemplate> {
        let pick =
            |pred: &dyn Fn(&SqlTemplate) -> bool| templates.iter().find(|t| pred(&***t)).cloned();
        let by_specialization = |wanted: Specialization| {
            pick(&|t: &SqlTemplate| t.specialization == Some(wanted))
        };

        let entity_choice = if parsed.location().is_some() {
            by_specialization(Specialization::Location)
        } else if parsed.inspector().is_some() {
            by_specialization(Specialization::Inspector)
        } else if parsed.activity().is_some() {
            by_specialization(Specialization::Activity)
        } else {
            None
        };

        entity_choice
            .or_else(|| match parsed.intent() {
                intent @ (Intent::Ranking | Intent::Trend | Intent::Forecast | Intent::Map) => {
                    pick(&|t: &SqlTemplate| t.supports(intent))
                }
                _ => None,
            })
            .or_else(|| pick(&|t: &SqlTemplate| t.id == builtin::GENERIC_COUNT_ID))
            .unwrap_or_else(|| Arc::new(builtin::generic_count()))
    }

    /// Fills filter slots and placeholders. Slots whose values are missing
    /// are dropped along with any connector they leave dangling.
    pub fn build_query(&self, template: &SqlTemplate, parsed: &ParsedQuery) -> String {
        let explicit = slot_values(parsed);
        let mut defaults = BTreeMap::new();
        defaults.insert("year".to_string(), self.default_year.to_string());
        defaults.insert("limit".to_string(), self.default_limit.to_string());
        defaults.extend(
            template
                .defaults
                .iter()
                .map(|(slot, value)| (slot.to_lowercase(), value.clone())),
        );

        let mut sql = template.sql.clone();
        for (slot, fragment) in &template.filters {
            let ready = PLACEHOLDER
                .captures_iter(fragment)
                .all(|caps| lookup(&explicit, &caps[1]).is_some());
            let replacement = if ready {
                fill(fragment, &explicit, &defaults)
            } else {
                String::new()
            };
            sql = sql.replace(&format!("{{{}}}", slot), &replacement);
        }

        tidy(&fill(&sql, &explicit, &defaults))
    }
}

fn slot_values(parsed: &ParsedQuery) -> BTreeMap<String, String> {
    let mut values: BTreeMap<String, String> = parsed
        .entities()
        .iter()
        .map(|(key, value)| (key.clone(), sanitize_value(value)))
        .collect();
    if let Some(location) = parsed.location() {
        values.insert("location".to_string(), sanitize_value(location));
    }
    let time = parsed.time_range();
    if let Some(year) = time.get_year() {
        values.insert("year".to_string(), year.to_string());
    }
    if let Some(month) = time.get_month() {
        values.insert("month".to_string(), month.to_string());
    }
    if let Some(quarter) = time.get_quarter() {
        values.insert("quarter".to_string(), quarter.to_string());
    }
    if let Some(limit) = parsed.limit() {
        values.insert("limit".to_string(), limit.max(1).to_string());
    }
    values
}

/// Case-insensitive; `{YEAR_2}` falls back to the `year` value.
fn lookup<'a>(values: &'a BTreeMap<String, String>, name: &str) -> Option<&'a String> {
    let key = name.to_lowercase();
    values
        .get(&key)
        .or_else(|| values.get(INDEX_SUFFIX.replace(&key, "").as_ref()))
}

fn fill(
    text: &str,
    explicit: &BTreeMap<String, String>,
    defaults: &BTreeMap<String, String>,
) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            lookup(explicit, &caps[1])
                .or_else(|| lookup(defaults, &caps[1]))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

fn tidy(sql: &str) -> String {
    let mut current = collapse_whitespace(sql);
    loop {
        let next = WHERE_CONNECTOR.replace_all(&current, "WHERE");
        let next = DOUBLE_CONNECTOR.replace_all(&next, "$1");
        let next = PAREN_CONNECTOR.replace_all(&next, "(");
        let next = TRAILING_CONNECTOR.replace_all(&next, " $1");
        let next = EMPTY_WHERE.replace_all(&next, "$1");
        let next = collapse_whitespace(&next);
        if next == current {
            return current;
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::query::TimeRange;
    use crate::engine::templates::TemplateFamily;

    #[test]
    fn built_in_patterns_compile() {
        for pattern in [
            &PLACEHOLDER, &INDEX_SUFFIX, &WHERE_CONNECTOR, &DOUBLE_CONNECTOR, &PAREN_CONNECTOR,
            &TRAILING_CONNECTOR, &EMPTY_WHERE,
        ] {
            Lazy::force(pattern);
        }
    }

    fn matcher() -> TemplateMatcher {
        let catalog = Arc::new(TemplateCatalog::with_builtin(None));
        TemplateMatcher::new(catalog, &TemplateConfig::default()).with_default_year(2024)
    }

    fn template(sql: &str, filters: &[(&str, &str)]) -> SqlTemplate {
        SqlTemplate {
            id: "T".to_string(),
            name: "t".to_string(),
            family: TemplateFamily::Generic,
            specialization: None,
            intents: vec![Intent::Count],
            sql: sql.to_string(),
            filters: filters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            chart: None,
            description: None,
            signature: None,
            defaults: BTreeMap::new(),
        }
    }

    #[test]
    fn violations_count_beats_every_other_family() {
        let m = matcher();
        let parsed = ParsedQuery::new(Intent::Count)
            .with_metric("violations")
            .with_time_range(TimeRange::year(2024).unwrap());
        let best = m.find_best_template(&parsed);
        assert_eq!(best.template.family, TemplateFamily::Violations);
        assert!(best.template.sql_mentions("eventviolation"));
        assert!(!best.fallback);

        for other in m.catalog().templates() {
            if !other.sql_mentions("eventviolation") {
                assert!(m.score(&other, &parsed) < best.raw_score, "{}", other.id);
            }
        }
        assert!(best.score >= 70.0);
    }

    #[test]
    fn inspector_entity_prefers_inspector_template() {
        let m = matcher();
        let parsed = ParsedQuery::new(Intent::Count).with_entity("inspector", "42");
        let best = m.find_best_template(&parsed);
        assert_eq!(best.template.id, "INS_01");
        assert!(m.get_match_score(&parsed) >= 70.0);
    }

    #[test]
    fn location_entity_prefers_location_template() {
        let m = matcher();
        let parsed = ParsedQuery::new(Intent::Count).with_entity("neighborhood", "Olaya");
        assert_eq!(m.find_best_template(&parsed).template.id, "LOC_01");
    }

    #[test]
    fn intent_alone_is_below_threshold_and_ties_go_to_catalog_order() {
        let m = matcher();
        let parsed = ParsedQuery::new(Intent::Count);
        let best = m.find_best_template(&parsed);
        assert_eq!(best.template.id, "RPT_01");
        assert_eq!(best.score, 25.0);
    }

    #[test]
    fn unknown_question_falls_back_to_generic_count() {
        let m = matcher();
        let best = m.find_best_template(&ParsedQuery::new(Intent::Unknown));
        assert!(best.fallback);
        assert_eq!(best.template.id, builtin::GENERIC_COUNT_ID);
        assert_eq!(m.get_match_score(&ParsedQuery::new(Intent::Unknown)), 0.0);
    }

    #[test]
    fn build_query_fills_present_slots_and_drops_missing_ones() {
        let m = matcher();
        let tpl = m.catalog().get("VIO_01").unwrap();
        let parsed = ParsedQuery::new(Intent::Count)
            .with_metric("violations")
            .with_time_range(TimeRange::year(2023).unwrap());
        let sql = m.build_query(&tpl, &parsed);
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS total_violations FROM EventViolation ev \
             JOIN Event e ON ev.EventId = e.Id WHERE e.IsDeleted = 0 \
             AND YEAR(e.SubmitionDate) = 2023"
        );
        assert_eq!(sql, m.build_query(&tpl, &parsed));
    }

    #[test]
    fn build_query_escapes_values_and_uses_default_limit() {
        let m = matcher();
        let tpl = m.catalog().get("LOC_01").unwrap();
        let parsed = ParsedQuery::new(Intent::Count).with_entity("location", "O'Brien Park");
        let sql = m.build_query(&tpl, &parsed);
        assert!(sql.contains("l.Name = 'O''Brien Park'"));
        assert!(sql.ends_with("LIMIT 10"));
        assert!(!sql.contains('{'));
    }

    #[test]
    fn dangling_connectors_are_stripped() {
        let m = matcher();
        let tpl = template(
            "SELECT COUNT(*) FROM Event e WHERE {year_filter} {month_filter} GROUP BY e.Status",
            &[
                ("year_filter", "AND YEAR(e.SubmitionDate) = {year}"),
                ("month_filter", "AND MONTH(e.SubmitionDate) = {month}"),
            ],
        );
        let with_month = ParsedQuery::new(Intent::Count)
            .with_time_range(TimeRange::new(None, Some(3), None, None).unwrap());
        assert_eq!(
            m.build_query(&tpl, &with_month),
            "SELECT COUNT(*) FROM Event e WHERE MONTH(e.SubmitionDate) = 3 GROUP BY e.Status"
        );
        assert_eq!(
            m.build_query(&tpl, &ParsedQuery::new(Intent::Count)),
            "SELECT COUNT(*) FROM Event e GROUP BY e.Status"
        );
    }

    #[test]
    fn bare_placeholders_use_defaults_and_indexed_names() {
        let m = matcher();
        let tpl = template(
            "SELECT COUNT(*) FROM Event e WHERE YEAR(e.SubmitionDate) IN ({YEAR}, {YEAR_2})",
            &[],
        );
        assert_eq!(
            m.build_query(&tpl, &ParsedQuery::new(Intent::Count)),
            "SELECT COUNT(*) FROM Event e WHERE YEAR(e.SubmitionDate) IN (2024, 2024)"
        );
    }
}

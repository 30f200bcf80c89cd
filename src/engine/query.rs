//! Typed inputs to the engine: the question text and its parsed form.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, Result};

pub const MAX_QUESTION_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Count,
    Sum,
    Average,
    Ranking,
    Trend,
    Comparison,
    Distribution,
    Forecast,
    Filter,
    Map,
    Detail,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Count => "COUNT",
            Intent::Sum => "SUM",
            Intent::Average => "AVERAGE",
            Intent::Ranking => "RANKING",
            Intent::Trend => "TREND",
            Intent::Comparison => "COMPARISON",
            Intent::Distribution => "DISTRIBUTION",
            Intent::Forecast => "FORECAST",
            Intent::Filter => "FILTER",
            Intent::Map => "MAP",
            Intent::Detail => "DETAIL",
            Intent::Unknown => "UNKNOWN",
        }
    }

    /// Intents that answer a question of this kind acceptably when no exact
    /// match exists.
    pub fn compatible(&self) -> &'static [Intent] {
        match self {
            Intent::Count => &[Intent::Sum, Intent::Filter, Intent::Distribution],
            Intent::Sum => &[Intent::Count, Intent::Average],
            Intent::Average => &[Intent::Sum, Intent::Comparison],
            Intent::Ranking => &[Intent::Comparison, Intent::Distribution],
            Intent::Trend => &[Intent::Comparison, Intent::Forecast],
            Intent::Comparison => &[Intent::Ranking, Intent::Trend, Intent::Distribution],
            Intent::Distribution => &[Intent::Count, Intent::Ranking, Intent::Map],
            Intent::Forecast => &[Intent::Trend],
            Intent::Filter => &[Intent::Detail, Intent::Count],
            Intent::Map => &[Intent::Distribution],
            Intent::Detail => &[Intent::Filter],
            Intent::Unknown => &[],
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ar,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ar => "ar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    year: Option<i32>,
    month: Option<u32>,
    quarter: Option<u32>,
    granularity: Option<Granularity>,
}

#[derive(Deserialize)]
struct RawTimeRange {
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    month: Option<u32>,
    #[serde(default)]
    quarter: Option<u32>,
    #[serde(default)]
    granularity: Option<Granularity>,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = EngineError;

    fn try_from(raw: RawTimeRange) -> Result<Self> {
        TimeRange::new(raw.year, raw.month, raw.quarter, raw.granularity)
    }
}

impl TimeRange {
    pub fn new(
        year: Option<i32>,
        month: Option<u32>,
        quarter: Option<u32>,
        granularity: Option<Granularity>,
    ) -> Result<Self> {
        if let Some(year) = year {
            if !(1900..=2200).contains(&year) {
                return Err(EngineError::InvalidInput(format!("year {} out of range", year)));
            }
        }
        if let Some(month) = month {
            if !(1..=12).contains(&month) {
                return Err(EngineError::InvalidInput(format!("month {} out of range", month)));
            }
        }
        if let Some(quarter) = quarter {
            if !(1..=4).contains(&quarter) {
                return Err(EngineError::InvalidInput(format!(
                    "quarter {} out of range",
                    quarter
                )));
            }
        }
        Ok(Self {
            year,
            month,
            quarter,
            granularity,
        })
    }

    pub fn year(year: i32) -> Result<Self> {
        Self::new(Some(year), None, None, Some(Granularity::Year))
    }

    pub fn get_year(&self) -> Option<i32> {
        self.year
    }

    pub fn get_month(&self) -> Option<u32> {
        self.month
    }

    pub fn get_quarter(&self) -> Option<u32> {
        self.quarter
    }

    pub fn granularity(&self) -> Option<Granularity> {
        self.granularity
    }

    pub fn is_empty(&self) -> bool {
        self.year.is_none() && self.month.is_none() && self.quarter.is_none()
    }
}

/// Structured form of a question, produced upstream by NL understanding.
///
/// Entity keys are lowercased on construction. Well-known keys are
/// `location`, `inspector`, `activity`, `severity`, `status` and `limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParsedQuery")]
pub struct ParsedQuery {
    intent: Intent,
    metric: Option<String>,
    entities: BTreeMap<String, String>,
    time_range: TimeRange,
    language: Language,
    is_followup: bool,
}

#[derive(Deserialize)]
struct RawParsedQuery {
    intent: Intent,
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    entities: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    time_range: TimeRange,
    #[serde(default)]
    language: Language,
    #[serde(default)]
    is_followup: bool,
}

impl TryFrom<RawParsedQuery> for ParsedQuery {
    type Error = EngineError;

    fn try_from(raw: RawParsedQuery) -> Result<Self> {
        let mut query = ParsedQuery::new(raw.intent)
            .with_time_range(raw.time_range)
            .with_language(raw.language)
            .followup(raw.is_followup);
        if let Some(metric) = raw.metric {
            query = query.with_metric(metric);
        }
        for (key, value) in raw.entities {
            let text = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(EngineError::InvalidInput(format!(
                        "entity '{}' must be a scalar, got {}",
                        key, other
                    )));
                }
            };
            query = query.with_entity(key, text);
        }
        if let Some(limit) = query.entities.get("limit") {
            if limit.parse::<u32>().is_err() {
                return Err(EngineError::InvalidInput(format!(
                    "limit '{}' is not a positive integer",
                    limit
                )));
            }
        }
        Ok(query)
    }
}

impl ParsedQuery {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            metric: None,
            entities: BTreeMap::new(),
            time_range: TimeRange::default(),
            language: Language::En,
            is_followup: false,
        }
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        let metric = metric.into().trim().to_lowercase();
        self.metric = (!metric.is_empty()).then_some(metric);
        self
    }

    pub fn with_entity(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into().trim().to_string();
        if !value.is_empty() {
            self.entities.insert(key.into().to_lowercase(), value);
        }
        self
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn followup(mut self, is_followup: bool) -> Self {
        self.is_followup = is_followup;
        self
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn metric(&self) -> Option<&str> {
        self.metric.as_deref()
    }

    pub fn entities(&self) -> &BTreeMap<String, String> {
        &self.entities
    }

    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }

    /// Location entity, accepting the `neighborhood` alias.
    pub fn location(&self) -> Option<&str> {
        self.entity("location").or_else(|| self.entity("neighborhood"))
    }

    pub fn inspector(&self) -> Option<&str> {
        self.entity("inspector")
    }

    pub fn activity(&self) -> Option<&str> {
        self.entity("activity")
    }

    pub fn limit(&self) -> Option<u32> {
        self.entity("limit").and_then(|l| l.parse().ok())
    }

    pub fn time_range(&self) -> &TimeRange {
        &self.time_range
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn is_followup(&self) -> bool {
        self.is_followup
    }
}

/// A non-empty, bounded natural-language question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question(String);

impl Question {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidInput("question is empty".to_string()));
        }
        if trimmed.chars().count() > MAX_QUESTION_CHARS {
            return Err(EngineError::InvalidInput(format!(
                "question exceeds {} characters",
                MAX_QUESTION_CHARS
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//! Question patterns: concrete years, months, numbers and quoted literals are
//! replaced by typed placeholders so similar questions share one learned query.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::util::text::{collapse_whitespace, escape_literal, static_regex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Year,
    Month,
    Number,
    Value,
}

impl Slot {
    pub fn tag(&self) -> &'static str {
        match self {
            Slot::Year => "YEAR",
            Slot::Month => "MONTH",
            Slot::Number => "NUMBER",
            Slot::Value => "VALUE",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "YEAR" => Some(Slot::Year),
            "MONTH" => Some(Slot::Month),
            "NUMBER" => Some(Slot::Number),
            "VALUE" => Some(Slot::Value),
            _ => None,
        }
    }

    /// `YEAR` for the first value of a slot, `YEAR_2` for the second.
    pub fn key(&self, index: usize) -> String {
        if index == 0 {
            self.tag().to_string()
        } else {
            format!("{}_{}", self.tag(), index + 1)
        }
    }

    pub fn placeholder(&self, index: usize) -> String {
        format!("{{{}}}", self.key(index))
    }
}

/// Concrete values pulled out of a question, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bindings(Vec<(Slot, String)>);

impl Bindings {
    pub fn push(&mut self, slot: Slot, value: impl Into<String>) {
        self.0.push((slot, value.into()));
    }

    /// Distinct values of one slot, first occurrence first.
    pub fn values(&self, slot: Slot) -> Vec<&str> {
        let mut seen = Vec::new();
        for (s, v) in &self.0 {
            if *s == slot && !seen.contains(&v.as_str()) {
                seen.push(v.as_str());
            }
        }
        seen
    }

    pub fn get(&self, slot: Slot, index: usize) -> Option<&str> {
        self.values(slot).get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Each distinct value with its slot and per-slot index.
    pub fn indexed(&self) -> Vec<(Slot, usize, &str)> {
        let mut out = Vec::new();
        for slot in [Slot::Year, Slot::Month, Slot::Number, Slot::Value] {
            for (index, value) in self.values(slot).into_iter().enumerate() {
                out.push((slot, index, value));
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionPattern {
    pub pattern: String,
    pub bindings: Bindings,
}

const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("يناير", 1),
    ("فبراير", 2),
    ("مارس", 3),
    ("أبريل", 4),
    ("ابريل", 4),
    ("مايو", 5),
    ("يونيو", 6),
    ("يوليو", 7),
    ("أغسطس", 8),
    ("اغسطس", 8),
    ("سبتمبر", 9),
    ("أكتوبر", 10),
    ("اكتوبر", 10),
    ("نوفمبر", 11),
    ("ديسمبر", 12),
];

static TOKENS: Lazy<Regex> = Lazy::new(|| {
    let months = MONTHS.iter().map(|(name, _)| *name).collect::<Vec<_>>().join("|");
    static_regex(&format!(
        r#"\B'(?P<single>[^']*)'|"(?P<double>[^"]*)"|\b(?P<year>(?:19|20)\d{{2}})\b|\b(?P<number>\d+(?:\.\d+)?)\b|(?i:\b(?P<month>{})\b)"#,
        months
    ))
});
static TRAILING_PUNCT: Lazy<Regex> = Lazy::new(|| static_regex(r"[\s?!.؟،,]+$"));
static WORD: Lazy<Regex> = Lazy::new(|| static_regex(r"(?i)\{[A-Z_0-9]+\}|[\p{L}\p{N}_]+"));
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| static_regex(r"\{(YEAR|MONTH|NUMBER|VALUE)(?:_(\d+))?\}"));
static MONTH_CONTEXT: Lazy<Regex> = Lazy::new(|| {
    static_regex(
        r"(?i)((?:\bMONTH\s*\([^)]*\)|\bEXTRACT\s*\(\s*MONTH\s+FROM[^)]*\))\s*(?:=|IN\s*\()\s*)(\d{1,2})\b",
    )
});
static NUMBER_CONTEXT: Lazy<Regex> =
    Lazy::new(|| static_regex(r"(?i)(\bLIMIT\s+|\bTOP\s+|(?:>=|<=|<>|!=|=|>|<)\s*)(\d+(?:\.\d+)?)\b"));

/// Trims trailing punctuation and swaps concrete values for typed
/// placeholders. The pattern is lowercased; bound values keep their case.
pub fn extract_pattern(question: &str) -> QuestionPattern {
    let text = collapse_whitespace(question);
    let text = TRAILING_PUNCT.replace(&text, "");
    let mut bindings = Bindings::default();
    let mut pattern = String::with_capacity(text.len());
    let mut last = 0;

    for caps in TOKENS.captures_iter(&text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        pattern.push_str(&text[last..whole.start()].to_lowercase());
        last = whole.end();

        if let Some(m) = caps.name("single").or_else(|| caps.name("double")) {
            bindings.push(Slot::Value, m.as_str());
            pattern.push_str("{VALUE}");
        } else if let Some(m) = caps.name("year") {
            bindings.push(Slot::Year, m.as_str());
            pattern.push_str("{YEAR}");
        } else if let Some(m) = caps.name("number") {
            bindings.push(Slot::Number, m.as_str());
            pattern.push_str("{NUMBER}");
        } else if let Some(m) = caps.name("month") {
            let name = m.as_str().to_lowercase();
            let number = MONTHS
                .iter()
                .find(|(month, _)| *month == name)
                .map(|(_, n)| *n)
                .unwrap_or(1);
            bindings.push(Slot::Month, number.to_string());
            pattern.push_str("{MONTH}");
        } else {
            pattern.push_str(&whole.as_str().to_lowercase());
        }
    }
    pattern.push_str(&text[last..].to_lowercase());

    QuestionPattern { pattern, bindings }
}

fn tokens(text: &str) -> HashSet<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Jaccard similarity of the two token sets; 0.0 when either is empty.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let (a, b) = (tokens(a), tokens(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.union(&b).count();
    shared as f64 / union as f64
}

/// Rewrites concrete SQL values that came from the question into the same
/// placeholders, so the SQL can be replayed with new values.
pub fn templatize_sql(sql: &str, bindings: &Bindings) -> String {
    let mut out = sql.to_string();

    for (index, year) in bindings.values(Slot::Year).into_iter().enumerate() {
        if let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(year))) {
            out = re
                .replace_all(&out, Slot::Year.placeholder(index).as_str())
                .into_owned();
        }
    }

    let months = bindings.values(Slot::Month);
    out = MONTH_CONTEXT
        .replace_all(&out, |caps: &Captures| {
            let found = caps[2].trim_start_matches('0');
            match months.iter().position(|m| *m == found) {
                Some(index) => format!("{}{}", &caps[1], Slot::Month.placeholder(index)),
                None => caps[0].to_string(),
            }
        })
        .into_owned();

    let numbers: Vec<&str> = bindings
        .values(Slot::Number)
        .into_iter()
        .filter(|n| *n != "0" && *n != "1")
        .collect();
    out = NUMBER_CONTEXT
        .replace_all(&out, |caps: &Captures| {
            match bindings.values(Slot::Number).iter().position(|n| *n == &caps[2]) {
                Some(index) if numbers.contains(&&caps[2]) => {
                    format!("{}{}", &caps[1], Slot::Number.placeholder(index))
                }
                _ => caps[0].to_string(),
            }
        })
        .into_owned();

    for (index, value) in bindings.values(Slot::Value).into_iter().enumerate() {
        let quoted = format!("'{}'", escape_literal(value));
        if let Ok(re) = Regex::new(&format!("(?i){}", regex::escape(&quoted))) {
            let replacement = format!("'{}'", Slot::Value.placeholder(index));
            out = re.replace_all(&out, replacement.as_str()).into_owned();
        }
    }

    out
}

/// Fills placeholders from the first binding set that has a value for each.
/// Returns `None` if any placeholder stays unresolved.
pub fn substitute(template: &str, sources: &[&Bindings]) -> Option<String> {
    let mut complete = true;
    let filled = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let slot = Slot::from_tag(&caps[1]);
        let index = placeholder_index(caps);
        let value = slot.and_then(|slot| {
            sources
                .iter()
                .find_map(|b| b.get(slot, index))
                .map(|v| match slot {
                    Slot::Value => escape_literal(v),
                    _ => v.to_string(),
                })
        });
        match value {
            Some(value) => value,
            None => {
                complete = false;
                caps[0].to_string()
            }
        }
    });
    complete.then(|| filled.into_owned())
}

fn placeholder_index(caps: &Captures) -> usize {
    caps.get(2)
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .map(|n| n.saturating_sub(1))
        .unwrap_or(0)
}

/// Rewrites typed placeholders into lowercase matcher slots. `renames` maps a
/// placeholder key (`VALUE_2`) to a slot name; unmapped keys are lowercased.
/// Also returns each slot's captured value, SQL-escaped for `VALUE` slots.
pub fn named_slots(
    template: &str,
    bindings: &Bindings,
    renames: &BTreeMap<String, String>,
) -> (String, BTreeMap<String, String>) {
    let mut defaults = BTreeMap::new();
    let sql = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let Some(slot) = Slot::from_tag(&caps[1]) else {
            return caps[0].to_string();
        };
        let index = placeholder_index(caps);
        let key = slot.key(index);
        let name = renames
            .get(&key)
            .cloned()
            .unwrap_or_else(|| key.to_lowercase());
        if let Some(value) = bindings.get(slot, index) {
            let value = match slot {
                Slot::Value => escape_literal(value),
                _ => value.to_string(),
            };
            defaults.entry(name.clone()).or_insert(value);
        }
        format!("{{{}}}", name)
    });
    (sql.into_owned(), defaults)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_patterns_compile() {
        for pattern in [
            &TOKENS, &TRAILING_PUNCT, &WORD, &PLACEHOLDER, &MONTH_CONTEXT, &NUMBER_CONTEXT,
        ] {
            Lazy::force(pattern);
        }
    }

    #[test]
    fn extracts_typed_placeholders_in_order() {
        let p = extract_pattern("Top 5 locations in March 2024 for 'Olaya'?");
        assert_eq!(p.pattern, "top {NUMBER} locations in {MONTH} {YEAR} for {VALUE}");
        assert_eq!(p.bindings.get(Slot::Number, 0), Some("5"));
        assert_eq!(p.bindings.get(Slot::Month, 0), Some("3"));
        assert_eq!(p.bindings.get(Slot::Year, 0), Some("2024"));
        assert_eq!(p.bindings.get(Slot::Value, 0), Some("Olaya"));
    }

    #[test]
    fn same_question_shape_shares_a_pattern() {
        let a = extract_pattern("How many violations in 2023");
        let b = extract_pattern("how many   violations in 2024?");
        assert_eq!(a.pattern, b.pattern);
        assert_eq!(a.pattern, "how many violations in {YEAR}");
    }

    #[test]
    fn arabic_months_are_recognised() {
        let p = extract_pattern("كم عدد المخالفات في مارس 2024");
        assert_eq!(p.pattern, "كم عدد المخالفات في {MONTH} {YEAR}");
        assert_eq!(p.bindings.get(Slot::Month, 0), Some("3"));
    }

    #[test]
    fn jaccard_scores_reworded_questions() {
        let score = token_jaccard(
            "how many violations were there in {YEAR}",
            "how many violations in {YEAR}",
        );
        assert!(score >= 0.7, "{}", score);
        assert!(token_jaccard("top inspectors", "violation trend") < 0.1);
        assert_eq!(token_jaccard("", "anything"), 0.0);
    }

    #[test]
    fn templatize_then_substitute_replays_with_new_values() {
        let original = extract_pattern("top 5 locations in march 2023");
        let sql = "SELECT l.Name, COUNT(*) AS n FROM Event e JOIN Locations l ON e.LocationId = l.Id \
                   WHERE e.IsDeleted = 0 AND YEAR(e.SubmitionDate) = 2023 \
                   AND MONTH(e.SubmitionDate) = 3 GROUP BY l.Name ORDER BY n DESC LIMIT 5";
        let template = templatize_sql(sql, &original.bindings);
        assert!(template.contains("YEAR(e.SubmitionDate) = {YEAR}"));
        assert!(template.contains("MONTH(e.SubmitionDate) = {MONTH}"));
        assert!(template.contains("LIMIT {NUMBER}"));
        assert!(template.contains("IsDeleted = 0"));

        let current = extract_pattern("top 10 locations in july 2024");
        let replayed = substitute(&template, &[&current.bindings, &original.bindings]).unwrap();
        assert!(replayed.contains("= 2024"));
        assert!(replayed.contains("MONTH(e.SubmitionDate) = 7"));
        assert!(replayed.ends_with("LIMIT 10"));
    }

    #[test]
    fn substituted_values_are_escaped_and_keep_their_case() {
        let original = extract_pattern("Inspections at 'Olaya'");
        let template =
            templatize_sql("SELECT 1 FROM Locations l WHERE l.Name = 'Olaya'", &original.bindings);
        assert_eq!(template, "SELECT 1 FROM Locations l WHERE l.Name = '{VALUE}'");

        let same = substitute(&template, &[&original.bindings]).unwrap();
        assert_eq!(same, "SELECT 1 FROM Locations l WHERE l.Name = 'Olaya'");

        let current = extract_pattern("inspections at \"O'Hara\"");
        let sql = substitute(&template, &[&current.bindings]).unwrap();
        assert_eq!(sql, "SELECT 1 FROM Locations l WHERE l.Name = 'O''Hara'");
    }

    #[test]
    fn literal_with_different_case_in_sql_stays_concrete() {
        let original = extract_pattern("inspections at 'olaya'");
        let template =
            templatize_sql("SELECT 1 FROM Locations l WHERE l.Name = 'Olaya'", &original.bindings);
        assert_eq!(template, "SELECT 1 FROM Locations l WHERE l.Name = 'Olaya'");
    }

    #[test]
    fn month_names_match_in_any_case() {
        let p = extract_pattern("Violations in MARCH");
        assert_eq!(p.pattern, "violations in {MONTH}");
        assert_eq!(p.bindings.get(Slot::Month, 0), Some("3"));
    }

    #[test]
    fn named_slots_rename_mapped_placeholders_and_keep_defaults() {
        let original = extract_pattern("top 5 inspections at 'Olaya' in 2024");
        let template = templatize_sql(
            "SELECT e.Id FROM Event e JOIN Locations l ON e.LocationId = l.Id \
             WHERE l.Name = 'Olaya' AND YEAR(e.SubmitionDate) = 2024 LIMIT 5",
            &original.bindings,
        );
        let renames = BTreeMap::from([
            ("VALUE".to_string(), "location".to_string()),
            ("NUMBER".to_string(), "limit".to_string()),
        ]);
        let (sql, defaults) = named_slots(&template, &original.bindings, &renames);
        assert!(sql.contains("l.Name = '{location}'"));
        assert!(sql.contains("= {year} LIMIT {limit}"));
        assert_eq!(defaults["location"], "Olaya");
        assert_eq!(defaults["year"], "2024");
        assert_eq!(defaults["limit"], "5");
    }

    #[test]
    fn unresolved_placeholders_yield_none() {
        assert!(substitute("SELECT {YEAR_2}", &[&Bindings::default()]).is_none());
    }
}

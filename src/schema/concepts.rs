use serde::{Deserialize, Serialize};

/// A business concept and the keywords and tables that signal it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Concept {
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
}

impl Concept {
    fn new(name: &str, keywords: &[&str], tables: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            tables: tables.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Keyword-driven semantic annotations over the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptIndex {
    concepts: Vec<Concept>,
}

impl ConceptIndex {
    pub fn new(concepts: Vec<Concept>) -> Self {
        Self { concepts }
    }

    /// Concept names whose keywords occur in `text`, in declaration order.
    pub fn detect(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.concepts
            .iter()
            .filter(|concept| {
                concept
                    .keywords
                    .iter()
                    .any(|keyword| lowered.contains(&keyword.to_lowercase()))
            })
            .map(|concept| concept.name.clone())
            .collect()
    }

    pub fn tables_for(&self, concept: &str) -> Vec<String> {
        self.concepts
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(concept))
            .map(|c| c.tables.clone())
            .unwrap_or_default()
    }

    pub fn keywords_for(&self, concept: &str) -> Vec<String> {
        self.concepts
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(concept))
            .map(|c| c.keywords.clone())
            .unwrap_or_default()
    }
}

impl Default for ConceptIndex {
    fn default() -> Self {
        Self::new(vec![
            Concept::new(
                "inspection",
                &["inspection", "event", "visit", "تفتيش", "زيارة"],
                &["Event"],
            ),
            Concept::new(
                "score",
                &["score", "rating", "compliance", "نتيجة", "امتثال"],
                &["Event"],
            ),
            Concept::new("status", &["status", "state", "حالة"], &["Event"]),
            Concept::new(
                "violation",
                &["violation", "issue", "problem", "مخالف"],
                &["EventViolation"],
            ),
            Concept::new(
                "fine",
                &["fine", "penalty", "amount", "غرامة"],
                &["EventViolation"],
            ),
            Concept::new(
                "severity",
                &["severity", "critical", "major", "minor", "خطورة"],
                &["EventViolation"],
            ),
            Concept::new(
                "location",
                &["location", "place", "site", "neighborhood", "district", "موقع", "حي"],
                &["Locations"],
            ),
            Concept::new(
                "activity",
                &["activity", "business", "restaurant", "bakery", "نشاط", "مطعم"],
                &["LocationType", "Locations"],
            ),
            Concept::new(
                "inspector",
                &["inspector", "reporter", "officer", "مفتش"],
                &["Event"],
            ),
            Concept::new("date", &["date", "year", "month", "quarter", "سنة", "شهر"], &[]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_concepts_in_both_languages() {
        let index = ConceptIndex::default();
        assert_eq!(
            index.detect("How many violations per neighborhood?"),
            vec!["violation", "location"]
        );
        assert_eq!(index.detect("عدد المخالفات"), vec!["violation"]);
        assert!(index.detect("hello").is_empty());
    }

    #[test]
    fn tables_for_unknown_concept_is_empty() {
        let index = ConceptIndex::default();
        assert_eq!(index.tables_for("Violation"), vec!["EventViolation"]);
        assert!(index.tables_for("permits").is_empty());
    }
}

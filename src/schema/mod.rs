pub mod concepts;
pub mod manager;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use concepts::{Concept, ConceptIndex};
pub use manager::SchemaManager;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub description: Option<String>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, columns: &[(&str, &str)]) -> Self {
        Self {
            name: name.into(),
            columns: columns
                .iter()
                .map(|(name, data_type)| ColumnInfo {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                    description: None,
                })
                .collect(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnMatch {
    pub table: String,
    pub column: String,
    pub data_type: String,
}

/// Read-only view of the database schema used for validation and prompting.
pub trait SchemaProvider: Send + Sync {
    fn get_table(&self, name: &str) -> Option<TableInfo>;

    fn get_all_tables(&self) -> Vec<String>;

    /// Columns whose name or description contains `term` (case-insensitive).
    fn search_columns(&self, term: &str) -> Vec<ColumnMatch>;

    /// Markdown schema context for the tables behind `concepts` plus the core set.
    fn get_schema_context_for_ai(&self, concepts: &[String]) -> String;

    fn has_table(&self, name: &str) -> bool {
        self.get_table(name).is_some()
    }
}

/// In-memory schema snapshot. Table lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableInfo>,
    concepts: ConceptIndex,
    core_tables: Vec<String>,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableInfo>, concepts: ConceptIndex, core_tables: Vec<String>) -> Self {
        let tables = tables
            .into_iter()
            .map(|table| (table.name.to_lowercase(), table))
            .collect();
        Self {
            tables,
            concepts,
            core_tables,
        }
    }

    pub fn concepts(&self) -> &ConceptIndex {
        &self.concepts
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    fn render_table(table: &TableInfo, out: &mut String) {
        out.push_str(&format!("\n## Table: {}\n", table.name));
        if let Some(description) = &table.description {
            out.push_str(&format!("Description: {}\n", description));
        }
        out.push_str("### Columns:\n");
        for column in &table.columns {
            match &column.description {
                Some(description) => out.push_str(&format!(
                    "  - {}: {} -- {}\n",
                    column.name, column.data_type, description
                )),
                None => out.push_str(&format!("  - {}: {}\n", column.name, column.data_type)),
            }
        }
    }
}

impl SchemaProvider for SchemaCatalog {
    fn get_table(&self, name: &str) -> Option<TableInfo> {
        self.tables.get(&name.to_lowercase()).cloned()
    }

    fn get_all_tables(&self) -> Vec<String> {
        self.tables.values().map(|t| t.name.clone()).collect()
    }

    fn search_columns(&self, term: &str) -> Vec<ColumnMatch> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.tables
            .values()
            .flat_map(|table| {
                table.columns.iter().filter_map(|column| {
                    let described = column
                        .description
                        .as_deref()
                        .map(|d| d.to_lowercase().contains(&needle))
                        .unwrap_or(false);
                    (column.name.to_lowercase().contains(&needle) || described).then(|| {
                        ColumnMatch {
                            table: table.name.clone(),
                            column: column.name.clone(),
                            data_type: column.data_type.clone(),
                        }
                    })
                })
            })
            .collect()
    }

    fn get_schema_context_for_ai(&self, concepts: &[String]) -> String {
        let mut wanted: Vec<String> = concepts
            .iter()
            .flat_map(|concept| self.concepts.tables_for(concept))
            .collect();
        wanted.extend(self.core_tables.iter().cloned());

        let mut seen = std::collections::BTreeSet::new();
        let mut out = String::from("# Database Schema Context\n");
        for name in wanted {
            let key = name.to_lowercase();
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(table) = self.tables.get(&key) {
                Self::render_table(table, &mut out);
            }
        }

        if seen.iter().all(|key| !self.tables.contains_key(key)) {
            // nothing relevant resolved; give the model the full table list instead
            for table in self.tables.values() {
                Self::render_table(table, &mut out);
            }
        }
        out
    }
}

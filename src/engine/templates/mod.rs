//! Static SQL templates, the promoted-template export, and the matcher.

pub mod builtin;
pub mod matcher;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::query::{Intent, ParsedQuery};
use crate::error::Result;

pub use matcher::{ScoringWeights, TemplateMatch, TemplateMatcher};

pub const EXPORT_VERSION: u32 = 1;

/// Subject area a template answers questions about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFamily {
    Inspections,
    Violations,
    Inspectors,
    Locations,
    Forecasting,
    Generic,
    Learned,
}

impl TemplateFamily {
    /// Families tied to one metric; a different explicit metric is a mismatch.
    pub fn is_metric_specific(&self) -> bool {
        !matches!(self, TemplateFamily::Generic | TemplateFamily::Learned)
    }
}

/// Entity a template is built around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    Inspector,
    Location,
    Activity,
    Map,
}

/// Question shape a promoted template was learned from, so the matcher can
/// recognise the same shape again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedSignature {
    #[serde(default)]
    pub metric: Option<String>,
    /// Entity keys of the question, sorted, `limit` excluded.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Learned placeholder (`VALUE`, `NUMBER_2`) to the slot that fills it.
    #[serde(default)]
    pub slots: BTreeMap<String, String>,
}

impl LearnedSignature {
    pub fn from_parsed(parsed: &ParsedQuery) -> Self {
        Self {
            metric: parsed.metric().map(str::to_string),
            entities: entity_keys(parsed).map(str::to_string).collect(),
            slots: BTreeMap::new(),
        }
    }

    /// No metric and no entities: too vague to match on.
    pub fn is_empty(&self) -> bool {
        self.metric.is_none() && self.entities.is_empty()
    }

    pub fn matches(&self, parsed: &ParsedQuery) -> bool {
        !self.is_empty()
            && self.metric.as_deref() == parsed.metric()
            && self.entities.iter().map(String::as_str).eq(entity_keys(parsed))
    }
}

fn entity_keys(parsed: &ParsedQuery) -> impl Iterator<Item = &str> {
    parsed
        .entities()
        .keys()
        .map(String::as_str)
        .filter(|key| *key != "limit")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlTemplate {
    pub id: String,
    pub name: String,
    pub family: TemplateFamily,
    #[serde(default)]
    pub specialization: Option<Specialization>,
    pub intents: Vec<Intent>,
    pub sql: String,
    /// Slot name (e.g. `year_filter`) to the fragment substituted for it.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default)]
    pub chart: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Set on promoted templates only.
    #[serde(default)]
    pub signature: Option<LearnedSignature>,
    /// Placeholder values used when the question supplies none.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

impl SqlTemplate {
    pub fn supports(&self, intent: Intent) -> bool {
        self.intents.contains(&intent)
    }

    pub fn has_slot(&self, slot: &str) -> bool {
        self.filters.contains_key(slot)
    }

    pub fn sql_mentions(&self, needle: &str) -> bool {
        self.sql.to_lowercase().contains(needle)
    }
}

/// Versioned on-disk list of promoted templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromotedExport {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub templates: Vec<SqlTemplate>,
}

impl PromotedExport {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Writes via a temp file and rename so readers never see a partial file.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Built-in templates followed by promoted ones, in catalog order.
pub struct TemplateCatalog {
    builtin: Vec<Arc<SqlTemplate>>,
    promoted: RwLock<Vec<Arc<SqlTemplate>>>,
    export_path: Option<PathBuf>,
}

impl TemplateCatalog {
    pub fn new(builtin: Vec<SqlTemplate>, export_path: Option<PathBuf>) -> Self {
        let mut builtin = builtin;
        if !builtin.iter().any(|t| t.id == builtin::GENERIC_COUNT_ID) {
            builtin.push(builtin::generic_count());
        }
        Self {
            builtin: builtin.into_iter().map(Arc::new).collect(),
            promoted: RwLock::new(Vec::new()),
            export_path,
        }
    }

    pub fn with_builtin(export_path: Option<PathBuf>) -> Self {
        Self::new(builtin::templates(), export_path)
    }

    pub fn templates(&self) -> Vec<Arc<SqlTemplate>> {
        let promoted = self.promoted.read();
        self.builtin.iter().chain(promoted.iter()).cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<SqlTemplate>> {
        self.templates().into_iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.builtin.len() + self.promoted.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn promoted_count(&self) -> usize {
        self.promoted.read().len()
    }

    /// Re-reads the promoted export. A missing file means nothing promoted yet;
    /// an unreadable one keeps the previous set.
    pub fn reload_promoted(&self) -> usize {
        let Some(path) = &self.export_path else {
            return 0;
        };
        if !path.exists() {
            return self.promoted_count();
        }
        match PromotedExport::load(path) {
            Ok(export) if export.version == EXPORT_VERSION => {
                let templates: Vec<Arc<SqlTemplate>> = export
                    .templates
                    .into_iter()
                    .filter(|t| !self.builtin.iter().any(|b| b.id == t.id))
                    .map(Arc::new)
                    .collect();
                let count = templates.len();
                *self.promoted.write() = templates;
                info!("Loaded {} promoted templates from {}", count, path.display());
                count
            }
            Ok(export) => {
                warn!(
                    "Ignoring promoted export {} with unsupported version {}",
                    path.display(),
                    export.version
                );
                self.promoted_count()
            }
            Err(e) => {
                warn!("Failed to load promoted templates from {}: {}", path.display(), e);
                self.promoted_count()
            }
        }
    }
}

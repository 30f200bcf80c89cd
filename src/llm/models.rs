use serde::{Deserialize, Serialize};

/// Structured reply the generation prompt asks the model for.
///
/// Every field is optional because models routinely drop some of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationReply {
    pub thinking: Option<String>,
    pub tables_needed: Vec<String>,
    pub sql: Option<String>,
    pub explanation: Option<String>,
    pub query_type: Option<String>,
    pub chart_type: Option<String>,
}

impl GenerationReply {
    pub fn has_reasoning(&self) -> bool {
        self.thinking
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ColumnInfo, ColumnMatch, ConceptIndex, SchemaCatalog, SchemaProvider, TableInfo};
use crate::db::db_pool::DuckDbPool;
use crate::error::Result;

const COLUMNS_QUERY: &str = "SELECT table_name, column_name, data_type \
     FROM information_schema.columns \
     WHERE table_schema = 'main' \
     ORDER BY table_name, ordinal_position";

/// Caches the live DuckDB schema and serves it as a [`SchemaProvider`].
pub struct SchemaManager {
    pool: DuckDbPool,
    snapshot: RwLock<Arc<SchemaCatalog>>,
    concepts: ConceptIndex,
    core_tables: Vec<String>,
    last_refresh: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
}

impl SchemaManager {
    pub fn new(pool: DuckDbPool, concepts: ConceptIndex, core_tables: Vec<String>) -> Self {
        Self {
            pool,
            snapshot: RwLock::new(Arc::new(SchemaCatalog::new(
                Vec::new(),
                concepts.clone(),
                core_tables.clone(),
            ))),
            concepts,
            core_tables,
            last_refresh: RwLock::new(None),
        }
    }

    /// Re-reads table and column metadata from the database.
    pub async fn refresh_cache(&self) -> Result<usize> {
        info!("Refreshing schema cache");
        let pool = self.pool.clone();

        let tables = tokio::task::spawn_blocking(move || -> Result<Vec<TableInfo>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(COLUMNS_QUERY)?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut grouped: BTreeMap<String, Vec<ColumnInfo>> = BTreeMap::new();
            for row in rows {
                let (table, column, data_type) = row?;
                grouped.entry(table).or_default().push(ColumnInfo {
                    name: column,
                    data_type,
                    description: None,
                });
            }

            Ok(grouped
                .into_iter()
                .map(|(name, columns)| TableInfo {
                    name,
                    columns,
                    description: None,
                })
                .collect())
        })
        .await??;

        let count = tables.len();
        debug!("Schema refresh found {} tables", count);

        let catalog = SchemaCatalog::new(tables, self.concepts.clone(), self.core_tables.clone());
        *self.snapshot.write() = Arc::new(catalog);
        *self.last_refresh.write() = Some(chrono::Utc::now());
        Ok(count)
    }

    pub fn last_refresh(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        *self.last_refresh.read()
    }

    pub fn concepts(&self) -> &ConceptIndex {
        &self.concepts
    }

    fn current(&self) -> Arc<SchemaCatalog> {
        self.snapshot.read().clone()
    }
}

impl SchemaProvider for SchemaManager {
    fn get_table(&self, name: &str) -> Option<TableInfo> {
        self.current().get_table(name)
    }

    fn get_all_tables(&self) -> Vec<String> {
        self.current().get_all_tables()
    }

    fn search_columns(&self, term: &str) -> Vec<ColumnMatch> {
        self.current().search_columns(term)
    }

    fn get_schema_context_for_ai(&self, concepts: &[String]) -> String {
        self.current().get_schema_context_for_ai(concepts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::db_pool::build_pool;

    #[tokio::test]
    async fn refresh_reads_tables_from_duckdb() {
        let pool = build_pool(":memory:", 2).unwrap();
        pool.get()
            .unwrap()
            .execute_batch(
                "CREATE TABLE Event (Id INTEGER, SubmitionDate TIMESTAMP);
                 CREATE TABLE EventViolation (Id INTEGER, EventId INTEGER);",
            )
            .unwrap();

        let manager = SchemaManager::new(pool, ConceptIndex::default(), vec!["Event".into()]);
        assert!(!manager.has_table("Event"));
        assert!(manager.last_refresh().is_none());

        let count = manager.refresh_cache().await.unwrap();
        assert_eq!(count, 2);
        assert!(manager.has_table("event"));
        assert_eq!(manager.get_table("EventViolation").unwrap().columns.len(), 2);
        assert!(manager.last_refresh().is_some());
    }
}

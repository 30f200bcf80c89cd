use duckdb::Connection;
use parking_lot::Mutex;
use r2d2::{ManageConnection, Pool};

/// r2d2 manager handing out connections to a single DuckDB database.
///
/// DuckDB refuses a second `open` of the same file from one process, so every
/// pooled connection is cloned from one root connection instead.
pub struct DuckDBConnectionManager {
    root: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: &str) -> Result<Self, duckdb::Error> {
        let root = if connection_string.is_empty() || connection_string == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(connection_string)?
        };
        Ok(Self {
            root: Mutex::new(root),
        })
    }

    pub fn in_memory() -> Result<Self, duckdb::Error> {
        Self::new(":memory:")
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.root.lock().try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

pub type DuckDbPool = Pool<DuckDBConnectionManager>;

pub fn build_pool(connection_string: &str, size: u32) -> Result<DuckDbPool, crate::error::EngineError> {
    let manager = DuckDBConnectionManager::new(connection_string)?;
    Ok(Pool::builder().max_size(size.max(1)).build(manager)?)
}

//! SQLite catalog backend using rusqlite.
//!
//! Mirrors the system catalog tables the checks read, so a check sequence
//! can be rehearsed against a catalog snapshot or exercised in tests.
//!
//! # Example
//!
//! ```
//! use postcheck::{CatalogExecutor, SqliteCatalog};
//!
//! let catalog = SqliteCatalog::open_in_memory().unwrap();
//! catalog.add_tenant(1001, "PRIMARY").unwrap();
//! catalog.add_tenant(1002, "STANDBY").unwrap();
//!
//! let rows = catalog.query("SELECT count(*) FROM __all_tenant").unwrap();
//! assert_eq!(rows[0].get(0).and_then(|v| v.as_i64()), Some(2));
//! ```

use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};

use crate::data_version::MARKER_COLUMNS;
use crate::{encode_data_version, Capability, CatalogExecutor, CheckError, Row, Value};

/// Error type for the SQLite backend.
#[derive(Debug)]
pub enum SqliteCatalogError {
    /// An error from rusqlite.
    Sqlite(rusqlite::Error),
    /// Lock poisoned.
    LockPoisoned,
}

impl std::fmt::Display for SqliteCatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "sqlite error: {e}"),
            Self::LockPoisoned => write!(f, "sqlite lock poisoned"),
        }
    }
}

impl std::error::Error for SqliteCatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::LockPoisoned => None,
        }
    }
}

impl From<rusqlite::Error> for SqliteCatalogError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

/// Catalog backed by a SQLite database.
///
/// Wraps a `rusqlite::Connection` behind a `Mutex`. Creates the catalog
/// tables on open if they are missing.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open (or create) a catalog file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteCatalogError> {
        let conn = Connection::open(path)?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory catalog (useful for testing).
    pub fn open_in_memory() -> Result<Self, SqliteCatalogError> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn create_schema(conn: &Connection) -> Result<(), SqliteCatalogError> {
        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS __all_virtual_sys_parameter_stat (
                svr_ip      TEXT NOT NULL,
                svr_port    INTEGER NOT NULL,
                name        TEXT NOT NULL,
                value       TEXT NOT NULL,
                PRIMARY KEY (svr_ip, svr_port, name)
            );

            CREATE TABLE IF NOT EXISTS __all_tenant (
                tenant_id   INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS __all_virtual_tenant_info (
                tenant_id   INTEGER PRIMARY KEY,
                tenant_role TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS __all_virtual_core_table (
                tenant_id    INTEGER NOT NULL,
                column_name  TEXT NOT NULL,
                column_value TEXT,
                PRIMARY KEY (tenant_id, column_name)
            );

            CREATE TABLE IF NOT EXISTS __all_virtual_upgrade_inspection (
                name        TEXT PRIMARY KEY,
                info        TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteCatalogError> {
        self.conn.lock().map_err(|_| SqliteCatalogError::LockPoisoned)
    }

    /// Set one node's value of a parameter, registering the node if new.
    pub fn set_node_parameter(
        &self,
        node: &str,
        name: &str,
        value: &str,
    ) -> Result<(), SqliteCatalogError> {
        let (ip, port) = split_node(node);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO __all_virtual_sys_parameter_stat (svr_ip, svr_port, name, value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(svr_ip, svr_port, name) DO UPDATE SET value = excluded.value",
            params![ip, port, name, value],
        )?;
        Ok(())
    }

    /// Register a tenant with the given role (`PRIMARY`, `STANDBY`, ...).
    pub fn add_tenant(&self, tenant_id: i64, role: &str) -> Result<(), SqliteCatalogError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO __all_tenant (tenant_id) VALUES (?1)",
            params![tenant_id],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO __all_virtual_tenant_info (tenant_id, tenant_role)
             VALUES (?1, ?2)",
            params![tenant_id, role],
        )?;
        Ok(())
    }

    /// Set one data-version marker column of a tenant.
    pub fn set_marker(
        &self,
        tenant_id: i64,
        column: &str,
        value: u64,
    ) -> Result<(), SqliteCatalogError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO __all_virtual_core_table (tenant_id, column_name, column_value)
             VALUES (?1, ?2, ?3)",
            params![tenant_id, column, value.to_string()],
        )?;
        Ok(())
    }

    /// Record an upgrade inspection result.
    pub fn set_inspection(&self, name: &str, info: &str) -> Result<(), SqliteCatalogError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO __all_virtual_upgrade_inspection (name, info) VALUES (?1, ?2)",
            params![name, info],
        )?;
        Ok(())
    }

    /// Seed a fully converged cluster: every node on `version`, every
    /// tenant a primary with both markers set, capabilities disabled and
    /// one succeeded inspection row.
    pub fn seed_converged(
        &self,
        nodes: &[&str],
        tenants: &[i64],
        version: &str,
    ) -> Result<(), CheckError> {
        let code = encode_data_version(version)?;
        let seed = || -> Result<(), SqliteCatalogError> {
            for node in nodes {
                self.set_node_parameter(node, "min_observer_version", version)?;
                self.set_node_parameter(node, "compatible", version)?;
                for capability in Capability::ORDER {
                    self.set_node_parameter(node, capability.parameter(), "False")?;
                }
            }
            for &tenant_id in tenants {
                self.add_tenant(tenant_id, "PRIMARY")?;
                for column in MARKER_COLUMNS {
                    self.set_marker(tenant_id, column, code)?;
                }
            }
            self.set_inspection("all_tables_and_views", "succeed")
        };
        seed().map_err(CheckError::connection)
    }
}

impl CatalogExecutor for SqliteCatalog {
    type Error = SqliteCatalogError;

    fn query(&self, sql: &str) -> Result<Vec<Row>, Self::Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                (0..columns)
                    .map(|i| row.get_ref(i).map(to_value))
                    .collect::<Result<Vec<Value>, _>>()
                    .map(Row)
            })?
            .collect::<Result<Vec<Row>, _>>()?;
        Ok(rows)
    }

    fn set_parameter(&self, name: &str, value: &str) -> Result<(), Self::Error> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE __all_virtual_sys_parameter_stat SET value = ?1 WHERE name = ?2",
            params![value, name],
        )?;
        Ok(())
    }
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Text(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Split `ip:port`; a missing or malformed port maps to 0.
fn split_node(node: &str) -> (&str, i64) {
    match node.rsplit_once(':') {
        Some((ip, port)) => (ip, port.parse().unwrap_or(0)),
        None => (node, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, ParameterSyncWaiter, SyncPolicy};

    fn test_catalog() -> SqliteCatalog {
        SqliteCatalog::open_in_memory().unwrap()
    }

    fn count(catalog: &SqliteCatalog, sql: &str) -> i64 {
        catalog.query(sql).unwrap()[0].get(0).and_then(Value::as_i64).unwrap()
    }

    #[test]
    fn query_maps_cell_types() {
        let catalog = test_catalog();
        let rows = catalog
            .query("SELECT 1, 'text', NULL, 2.5")
            .unwrap();
        assert_eq!(
            rows,
            vec![Row(vec![
                Value::Int(1),
                Value::Text("text".into()),
                Value::Null,
                Value::Text("2.5".into()),
            ])]
        );
    }

    #[test]
    fn standby_tenants_are_excluded() {
        let catalog = test_catalog();
        catalog.add_tenant(1, "PRIMARY").unwrap();
        catalog.add_tenant(1001, "PRIMARY").unwrap();
        catalog.add_tenant(1002, "STANDBY").unwrap();

        let tenants = crate::data_version::active_tenants(&catalog).unwrap();
        assert_eq!(tenants, vec![1, 1001]);
    }

    #[test]
    fn set_parameter_updates_every_node() {
        let catalog = test_catalog();
        catalog.set_node_parameter("10.0.0.1:2882", "enable_ddl", "False").unwrap();
        catalog.set_node_parameter("10.0.0.2:2882", "enable_ddl", "False").unwrap();

        catalog.set_parameter("enable_ddl", "True").unwrap();

        assert_eq!(
            count(
                &catalog,
                "SELECT count(*) FROM __all_virtual_sys_parameter_stat WHERE value = 'True'"
            ),
            2
        );
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();
        ParameterSyncWaiter::new(&catalog, &clock, &policy)
            .wait_sync("enable_ddl", "True", 10)
            .unwrap();
    }

    #[test]
    fn node_parameter_upserts() {
        let catalog = test_catalog();
        catalog.set_node_parameter("10.0.0.1:2882", "compatible", "4.1.0.2").unwrap();
        catalog.set_node_parameter("10.0.0.1:2882", "compatible", "4.2.1.0").unwrap();

        let values = crate::sync::parameter_values(&catalog, "compatible").unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].node, "10.0.0.1:2882");
        assert_eq!(values[0].value, "4.2.1.0");
    }

    #[test]
    fn seed_converged_populates_catalog() {
        let catalog = test_catalog();
        catalog
            .seed_converged(&["10.0.0.1:2882", "10.0.0.2:2882"], &[1, 1001], "4.2.1.0")
            .unwrap();

        assert_eq!(count(&catalog, "SELECT count(*) FROM __all_tenant"), 2);
        assert_eq!(count(&catalog, "SELECT count(*) FROM __all_virtual_core_table"), 4);
        assert_eq!(
            count(
                &catalog,
                "SELECT count(*) FROM __all_virtual_sys_parameter_stat WHERE name = 'enable_major_freeze'"
            ),
            2
        );
    }

    #[test]
    fn bad_sql_is_an_executor_error() {
        let catalog = test_catalog();
        let err = catalog.query("SELECT * FROM no_such_table").unwrap_err();
        assert!(matches!(err, SqliteCatalogError::Sqlite(_)));
    }

    #[test]
    fn open_file_based() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let catalog = SqliteCatalog::open(&path).unwrap();
            catalog.add_tenant(1001, "PRIMARY").unwrap();
        }

        let catalog = SqliteCatalog::open(&path).unwrap();
        assert_eq!(count(&catalog, "SELECT count(*) FROM __all_tenant"), 1);
    }

    #[test]
    fn split_node_forms() {
        assert_eq!(split_node("10.0.0.1:2882"), ("10.0.0.1", 2882));
        assert_eq!(split_node("host"), ("host", 0));
        assert_eq!(split_node("host:x"), ("host", 0));
    }
}

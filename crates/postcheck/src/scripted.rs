//! Scripted in-memory catalog for tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::{CatalogExecutor, Row};

/// In-memory catalog that answers queries from scripted responses.
///
/// Each response is registered under a SQL fragment; a query is answered
/// by the first fragment (in registration order) it contains. Responses
/// under one fragment are consumed in order and the last one repeats.
/// Every query and parameter write is recorded, which makes this backend
/// suited for asserting call order.
///
/// # Example
///
/// ```
/// use postcheck::{CatalogExecutor, Row, ScriptedCatalog};
///
/// let catalog = ScriptedCatalog::new();
/// catalog.respond("__all_virtual_upgrade_inspection", vec![Row::new([2i64])]);
/// catalog.respond("__all_virtual_upgrade_inspection", vec![Row::new([0i64])]);
///
/// let sql = "select count(*) from __all_virtual_upgrade_inspection";
/// assert_eq!(catalog.query(sql).unwrap(), vec![Row::new([2i64])]);
/// assert_eq!(catalog.query(sql).unwrap(), vec![Row::new([0i64])]);
/// assert_eq!(catalog.query(sql).unwrap(), vec![Row::new([0i64])]);
/// assert_eq!(catalog.queries().len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedCatalog {
    /// Fragment -> pending responses, in registration order.
    responses: RefCell<Vec<(String, VecDeque<Response>)>>,
    /// Parameter name -> failure message for `set_parameter`.
    write_failures: RefCell<BTreeMap<String, String>>,
    queries: RefCell<Vec<String>>,
    writes: RefCell<Vec<ParameterWrite>>,
}

#[derive(Debug, Clone)]
enum Response {
    Rows(Vec<Row>),
    Fail(String),
}

/// A recorded `set_parameter` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterWrite {
    /// Parameter name.
    pub name: String,
    /// Value written.
    pub value: String,
}

/// Error returned by [`ScriptedCatalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedError(String);

impl fmt::Display for ScriptedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scripted catalog error: {}", self.0)
    }
}

impl std::error::Error for ScriptedError {}

impl ScriptedCatalog {
    /// Create a catalog with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `rows` as the next answer for queries containing `fragment`.
    pub fn respond(&self, fragment: &str, rows: Vec<Row>) {
        self.push(fragment, Response::Rows(rows));
    }

    /// Queue a failure for queries containing `fragment`.
    pub fn fail_on(&self, fragment: &str, message: &str) {
        self.push(fragment, Response::Fail(message.to_string()));
    }

    /// Make `set_parameter(name, _)` fail.
    pub fn fail_write(&self, name: &str, message: &str) {
        self.write_failures
            .borrow_mut()
            .insert(name.to_string(), message.to_string());
    }

    /// Every query executed so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.borrow().clone()
    }

    /// Every parameter write so far, in order. Failed writes are included.
    pub fn writes(&self) -> Vec<ParameterWrite> {
        self.writes.borrow().clone()
    }

    fn push(&self, fragment: &str, response: Response) {
        let mut responses = self.responses.borrow_mut();
        match responses.iter_mut().find(|(f, _)| f == fragment) {
            Some((_, queue)) => queue.push_back(response),
            None => responses.push((fragment.to_string(), VecDeque::from([response]))),
        }
    }
}

impl CatalogExecutor for ScriptedCatalog {
    type Error = ScriptedError;

    fn query(&self, sql: &str) -> Result<Vec<Row>, Self::Error> {
        self.queries.borrow_mut().push(sql.to_string());

        let mut responses = self.responses.borrow_mut();
        let queue = responses
            .iter_mut()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, queue)| queue)
            .ok_or_else(|| ScriptedError(format!("no scripted response for `{sql}`")))?;

        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };

        match response {
            Some(Response::Rows(rows)) => Ok(rows),
            Some(Response::Fail(message)) => Err(ScriptedError(message)),
            None => Err(ScriptedError(format!("no scripted response for `{sql}`"))),
        }
    }

    fn set_parameter(&self, name: &str, value: &str) -> Result<(), Self::Error> {
        self.writes.borrow_mut().push(ParameterWrite {
            name: name.to_string(),
            value: value.to_string(),
        });
        match self.write_failures.borrow().get(name) {
            Some(message) => Err(ScriptedError(message.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_fragment_wins() {
        let catalog = ScriptedCatalog::new();
        catalog.respond("name = 'compatible'", vec![Row::new(["a"])]);
        catalog.respond("__all_virtual_sys_parameter_stat", vec![Row::new(["b"])]);

        let rows = catalog
            .query("SELECT value FROM __all_virtual_sys_parameter_stat WHERE name = 'compatible'")
            .unwrap();
        assert_eq!(rows, vec![Row::new(["a"])]);

        let rows = catalog
            .query("SELECT value FROM __all_virtual_sys_parameter_stat WHERE name = 'enable_ddl'")
            .unwrap();
        assert_eq!(rows, vec![Row::new(["b"])]);
    }

    #[test]
    fn unmatched_query_fails() {
        let catalog = ScriptedCatalog::new();
        let err = catalog.query("select 1").unwrap_err();
        assert!(err.to_string().contains("no scripted response"));
        assert_eq!(catalog.queries(), vec!["select 1".to_string()]);
    }

    #[test]
    fn scripted_failure_then_recovery() {
        let catalog = ScriptedCatalog::new();
        catalog.fail_on("t", "boom");
        catalog.respond("t", vec![]);

        assert!(catalog.query("select * from t").is_err());
        assert!(catalog.query("select * from t").unwrap().is_empty());
    }

    #[test]
    fn writes_are_recorded_in_order() {
        let catalog = ScriptedCatalog::new();
        catalog.fail_write("enable_rebalance", "read-only");

        catalog.set_parameter("enable_ddl", "True").unwrap();
        assert!(catalog.set_parameter("enable_rebalance", "True").is_err());

        let names: Vec<String> = catalog.writes().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["enable_ddl", "enable_rebalance"]);
    }
}

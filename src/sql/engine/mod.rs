mod memory;

pub use memory::Memory;

use super::parser::ast::Statement;
use super::plan::Node;
use super::schema::Table;
use super::types::{Row, Value};
use crate::error::Result;

use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};

/// A backend connection. Each client connection owns exactly one; it is never
/// shared across connections.
#[async_trait]
pub trait Backend: Send {
    /// The data source identifier, used as the coordinator's resource ID
    fn resource_id(&self) -> &str;
    /// Fetches a table's schema, erroring if it does not exist
    async fn table_meta(&mut self, table: &str) -> Result<Table>;
    /// Runs a read plan, returning whole rows in table column order
    async fn query(&mut self, node: &Node, args: &[Value]) -> Result<Vec<Row>>;
    /// Executes a statement with its bound values
    async fn execute(&mut self, statement: &Statement, args: &[Value]) -> Result<ExecResult>;
    /// Begins a local transaction
    async fn begin(&mut self) -> Result<()>;
    /// Commits the local transaction
    async fn commit(&mut self) -> Result<()>;
    /// Rolls back the local transaction
    async fn rollback(&mut self) -> Result<()>;
}

/// The result of executing a statement against the backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExecResult {
    /// A DML or transaction control result.
    Affected {
        affected_rows: u64,
        /// The first auto-increment value generated by the statement, or 0.
        last_insert_id: u64,
    },
    /// A result set.
    Rows {
        columns: Vec<String>,
        rows: Vec<Row>,
    },
}

impl ExecResult {
    pub fn affected(affected_rows: u64) -> Self {
        Self::Affected {
            affected_rows,
            last_insert_id: 0,
        }
    }
}

use super::image::TableRecords;
use crate::error::{Error, Result};
use crate::sql::engine::Backend;
use crate::sql::parser::ast::{Expression, InsertStatement, Statement};
use crate::sql::schema::{Column, Table};
use crate::sql::types::{DataType, Value};

use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the backend table undo logs are written to
pub const UNDO_LOG_TABLE: &str = "undo_log";

const UNDO_LOG_CONTEXT: &str = "serializer=bincode";

/// The kind of statement an undo item compensates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Insert,
    Update,
    Delete,
}

impl Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        })
    }
}

/// The compensating record of one statement. DELETE carries only a
/// before-image, INSERT only an after-image, UPDATE both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoLogItem {
    pub sql_type: SqlType,
    pub schema_name: String,
    pub table_name: String,
    pub lock_key: String,
    pub before_image: Option<TableRecords>,
    pub after_image: Option<TableRecords>,
}

/// Builds an undo item. Pure; never fails.
pub fn build_undo_item(
    sql_type: SqlType,
    schema_name: &str,
    table_name: &str,
    lock_key: &str,
    before_image: Option<TableRecords>,
    after_image: Option<TableRecords>,
) -> UndoLogItem {
    UndoLogItem {
        sql_type,
        schema_name: schema_name.to_string(),
        table_name: table_name.to_string(),
        lock_key: lock_key.to_string(),
        before_image,
        after_image,
    }
}

/// All undo items of one branch, as serialized into `rollback_info`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchUndoLog {
    pub xid: String,
    pub branch_id: i64,
    pub undo_items: Vec<UndoLogItem>,
}

/// Undo log row status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStatus {
    /// Written alongside the branch's local transaction.
    Normal = 0,
}

/// Persists undo logs. Implementations must write through the statement's own
/// backend connection so the record commits or rolls back with the statement.
#[async_trait]
pub trait UndoLogStore: Send + Sync {
    async fn insert_undo_log_with_normal(
        &self,
        conn: &mut dyn Backend,
        xid: &str,
        branch_id: i64,
        item: UndoLogItem,
    ) -> Result<()>;
}

/// Writes undo logs as rows of the backend's `undo_log` table.
#[derive(Debug, Default)]
pub struct UndoLogManager;

impl UndoLogManager {
    pub fn new() -> Self {
        Self
    }

    /// The schema of the undo log table
    pub fn table() -> Result<Table> {
        Table::new(
            UNDO_LOG_TABLE,
            vec![
                Column::new("id", DataType::Integer).primary_key().auto_increment(),
                Column::new("branch_id", DataType::Integer),
                Column::new("xid", DataType::String),
                Column::new("context", DataType::String),
                Column::new("rollback_info", DataType::Bytes),
                Column::new("log_status", DataType::Integer),
                Column::new("log_created", DataType::Integer),
                Column::new("log_modified", DataType::Integer),
            ],
        )
    }

    /// Encodes a branch undo log into rollback info
    pub fn encode(log: &BranchUndoLog) -> Result<Vec<u8>> {
        Ok(bincode::serialize(log)?)
    }

    /// Decodes rollback info back into a branch undo log
    pub fn decode(rollback_info: &[u8]) -> Result<BranchUndoLog> {
        Ok(bincode::deserialize(rollback_info)?)
    }

    async fn insert(
        &self,
        conn: &mut dyn Backend,
        xid: &str,
        branch_id: i64,
        rollback_info: Vec<u8>,
        status: LogStatus,
    ) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Internal(e.to_string()))?
            .as_millis() as i64;
        let columns = [
            "branch_id",
            "xid",
            "context",
            "rollback_info",
            "log_status",
            "log_created",
            "log_modified",
        ];
        let statement = Statement::Insert(InsertStatement {
            table: UNDO_LOG_TABLE.to_string(),
            hints: vec![],
            columns: Some(columns.iter().map(|c| c.to_string()).collect()),
            values: vec![(0..columns.len()).map(Expression::Parameter).collect()],
        });
        let args = vec![
            Value::Integer(branch_id),
            Value::from(xid),
            Value::from(UNDO_LOG_CONTEXT),
            Value::Bytes(rollback_info),
            Value::Integer(status as i64),
            Value::Integer(now),
            Value::Integer(now),
        ];
        conn.execute(&statement, &args).await.map_err(|e| Error::UndoLog(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl UndoLogStore for UndoLogManager {
    async fn insert_undo_log_with_normal(
        &self,
        conn: &mut dyn Backend,
        xid: &str,
        branch_id: i64,
        item: UndoLogItem,
    ) -> Result<()> {
        let log = BranchUndoLog {
            xid: xid.to_string(),
            branch_id,
            undo_items: vec![item],
        };
        let rollback_info = Self::encode(&log).map_err(|e| Error::UndoLog(e.to_string()))?;
        self.insert(conn, xid, branch_id, rollback_info, LogStatus::Normal).await
    }
}

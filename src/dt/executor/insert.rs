use super::{read_by_keys, table_meta, AfterImage, Executor};
use crate::dt::image::TableRecords;
use crate::error::{Error, Result};
use crate::proxy::StatementContext;
use crate::sql::engine::{Backend, ExecResult};
use crate::sql::parser::ast::InsertStatement;
use crate::sql::schema::Table;
use crate::sql::types::Value;

use async_trait::async_trait;

/// Captures the rows an INSERT added. There is no before-image.
pub struct InsertExecutor<'a> {
    conn: &'a mut dyn Backend,
    stmt: &'a InsertStatement,
    args: &'a [Value],
}

impl<'a> InsertExecutor<'a> {
    pub fn new(conn: &'a mut dyn Backend, stmt: &'a InsertStatement, args: &'a [Value]) -> Self {
        Self { conn, stmt, args }
    }

    /// Works out the primary key of every inserted row. Explicit key values
    /// are evaluated from the statement; a missing or NULL auto-increment key
    /// takes the next generated id, starting at the result's last insert id
    /// and skipping past explicit ids the way the backend's counter does.
    fn primary_keys(&self, table: &Table, result: &ExecResult) -> Result<Vec<Vec<Value>>> {
        let (affected_rows, last_insert_id) = match result {
            ExecResult::Affected { affected_rows, last_insert_id } => {
                (*affected_rows, *last_insert_id)
            }
            ExecResult::Rows { .. } => {
                return Err(Error::Internal("insert returned a result set".into()))
            }
        };
        if affected_rows != self.stmt.values.len() as u64 {
            return Err(Error::ImageCapture(format!(
                "insert into {} affected {} rows, expected {}",
                table.name,
                affected_rows,
                self.stmt.values.len()
            )));
        }

        let columns: Vec<String> = match &self.stmt.columns {
            Some(columns) => columns.clone(),
            None => table.columns.iter().map(|c| c.name.clone()).collect(),
        };
        let pk_positions = table
            .get_primary_keys()?
            .into_iter()
            .map(|pk| (pk, columns.iter().position(|c| c.eq_ignore_ascii_case(&pk.name))))
            .collect::<Vec<_>>();

        // Next id the backend generates. Explicit ids at or past it move it on.
        let mut next_id = last_insert_id;
        let mut keys = Vec::with_capacity(self.stmt.values.len());
        for row in &self.stmt.values {
            let mut key = Vec::with_capacity(pk_positions.len());
            for (pk, position) in &pk_positions {
                let value = match position.and_then(|p| row.get(p)) {
                    Some(expr) => expr.evaluate(None, self.args)?,
                    None => Value::Null,
                };
                let value = match value {
                    Value::Null if pk.auto_increment && last_insert_id > 0 => {
                        let id = i64::try_from(next_id).map_err(|_| {
                            Error::ImageCapture(format!("generated id of {} overflows", pk.name))
                        })?;
                        next_id += 1;
                        Value::Integer(id)
                    }
                    Value::Integer(id)
                        if pk.auto_increment && id >= 0 && id as u64 >= next_id =>
                    {
                        next_id = id as u64 + 1;
                        Value::Integer(id)
                    }
                    Value::Null => {
                        return Err(Error::ImageCapture(format!(
                            "no value for primary key {} of inserted row in {}",
                            pk.name, table.name
                        )))
                    }
                    value => value,
                };
                key.push(value);
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

impl<'a> Executor for InsertExecutor<'a> {
    fn table_name(&self) -> &str {
        &self.stmt.table
    }
}

#[async_trait]
impl<'a> AfterImage for InsertExecutor<'a> {
    type Source = ExecResult;

    /// Reads back the inserted rows by primary key.
    async fn after_image(
        &mut self,
        ctx: &StatementContext,
        result: &ExecResult,
    ) -> Result<TableRecords> {
        let table = table_meta(ctx, &mut *self.conn, &self.stmt.table).await?;
        let keys = self.primary_keys(&table, result)?;
        read_by_keys(ctx, &mut *self.conn, &table, keys).await
    }
}

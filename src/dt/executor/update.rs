use super::{
    capture_error, read_by_keys, read_image, table_meta, AfterImage, BeforeImage, Executor,
};
use crate::dt::image::TableRecords;
use crate::error::{Error, Result};
use crate::proxy::StatementContext;
use crate::sql::engine::Backend;
use crate::sql::parser::ast::UpdateStatement;
use crate::sql::plan::Node;
use crate::sql::types::Value;

use async_trait::async_trait;

/// Captures the rows an UPDATE changes, before and after.
pub struct UpdateExecutor<'a> {
    conn: &'a mut dyn Backend,
    stmt: &'a UpdateStatement,
    args: &'a [Value],
}

impl<'a> UpdateExecutor<'a> {
    pub fn new(conn: &'a mut dyn Backend, stmt: &'a UpdateStatement, args: &'a [Value]) -> Self {
        Self { conn, stmt, args }
    }
}

impl<'a> Executor for UpdateExecutor<'a> {
    fn table_name(&self) -> &str {
        &self.stmt.table
    }
}

#[async_trait]
impl<'a> BeforeImage for UpdateExecutor<'a> {
    /// Reads, with local row locks, the rows the UPDATE's predicate currently
    /// matches. Updating a primary key column is rejected, since the
    /// after-image is re-read by key.
    async fn before_image(&mut self, ctx: &StatementContext) -> Result<TableRecords> {
        let table = table_meta(ctx, &mut *self.conn, &self.stmt.table).await?;
        for (column, _) in &self.stmt.set {
            if table.get_column(column).map_err(capture_error)?.primary_key {
                return Err(Error::Value(format!(
                    "Updating primary key column {} of table {} is not supported \
                     in a distributed transaction",
                    column, table.name
                )));
            }
        }
        let node = Node::Scan {
            table: table.name.clone(),
            filter: self.stmt.r#where.clone(),
            for_update: true,
        };
        read_image(ctx, &mut *self.conn, &table, node, self.args).await
    }
}

#[async_trait]
impl<'a> AfterImage for UpdateExecutor<'a> {
    type Source = TableRecords;

    /// Re-reads the before-image's rows by primary key. The original predicate
    /// may no longer match the updated rows.
    async fn after_image(
        &mut self,
        ctx: &StatementContext,
        before_image: &TableRecords,
    ) -> Result<TableRecords> {
        let table = table_meta(ctx, &mut *self.conn, &self.stmt.table).await?;
        let keys = before_image.primary_key_values()?;
        read_by_keys(ctx, &mut *self.conn, &table, keys).await
    }
}

use super::{read_image, table_meta, BeforeImage, Executor};
use crate::dt::image::TableRecords;
use crate::error::Result;
use crate::proxy::StatementContext;
use crate::sql::engine::Backend;
use crate::sql::parser::ast::DeleteStatement;
use crate::sql::plan::Node;
use crate::sql::types::Value;

use async_trait::async_trait;

/// Captures the rows a DELETE removes. There is no after-image.
pub struct DeleteExecutor<'a> {
    conn: &'a mut dyn Backend,
    stmt: &'a DeleteStatement,
    args: &'a [Value],
}

impl<'a> DeleteExecutor<'a> {
    pub fn new(conn: &'a mut dyn Backend, stmt: &'a DeleteStatement, args: &'a [Value]) -> Self {
        Self { conn, stmt, args }
    }
}

impl<'a> Executor for DeleteExecutor<'a> {
    fn table_name(&self) -> &str {
        &self.stmt.table
    }
}

#[async_trait]
impl<'a> BeforeImage for DeleteExecutor<'a> {
    /// Reads, with local row locks, exactly the rows the DELETE's predicate
    /// matches.
    async fn before_image(&mut self, ctx: &StatementContext) -> Result<TableRecords> {
        let table = table_meta(ctx, &mut *self.conn, &self.stmt.table).await?;
        let node = Node::Scan {
            table: table.name.clone(),
            filter: self.stmt.r#where.clone(),
            for_update: true,
        };
        read_image(ctx, &mut *self.conn, &table, node, self.args).await
    }
}

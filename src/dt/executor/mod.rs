//! Statement executors capture the row images a statement affects. Each one
//! is built per statement from the backend connection, the parsed statement
//! and its bound values.

mod delete;
mod insert;
mod select_for_update;
mod update;

pub use delete::DeleteExecutor;
pub use insert::InsertExecutor;
pub use select_for_update::SelectForUpdateExecutor;
pub use update::UpdateExecutor;

use super::image::TableRecords;
use crate::error::{Error, Result};
use crate::proxy::StatementContext;
use crate::sql::engine::Backend;
use crate::sql::plan::Node;
use crate::sql::schema::Table;
use crate::sql::types::Value;

use async_trait::async_trait;

/// An executor bound to one statement
pub trait Executor {
    /// The table the statement targets
    fn table_name(&self) -> &str;
}

/// Executors able to read the affected rows before the statement runs
#[async_trait]
pub trait BeforeImage: Executor {
    async fn before_image(&mut self, ctx: &StatementContext) -> Result<TableRecords>;
}

/// Executors able to read the affected rows after the statement ran, given
/// what identifies them (the before-image, or the execution result).
#[async_trait]
pub trait AfterImage: Executor {
    type Source: Sync + ?Sized;

    async fn after_image(
        &mut self,
        ctx: &StatementContext,
        source: &Self::Source,
    ) -> Result<TableRecords>;
}

/// Wraps backend failures as image capture failures. Cancellation passes
/// through unchanged.
fn capture_error(err: Error) -> Error {
    match err {
        Error::Cancelled | Error::DeadlineExceeded | Error::ImageCapture(_) => err,
        err => Error::ImageCapture(err.to_string()),
    }
}

/// Fetches the target table's schema
async fn table_meta(ctx: &StatementContext, conn: &mut dyn Backend, table: &str) -> Result<Table> {
    ctx.guard(conn.table_meta(table)).await.map_err(capture_error)
}

/// Runs a read plan and builds an image from the returned rows
async fn read_image(
    ctx: &StatementContext,
    conn: &mut dyn Backend,
    table: &Table,
    node: Node,
    args: &[Value],
) -> Result<TableRecords> {
    log::debug!("image query: {}", node);
    let rows = ctx.guard(conn.query(&node, args)).await.map_err(capture_error)?;
    TableRecords::from_rows(table, rows)
}

/// Re-reads rows by the primary keys of an image, erroring unless every row
/// is found again.
async fn read_by_keys(
    ctx: &StatementContext,
    conn: &mut dyn Backend,
    table: &Table,
    keys: Vec<Vec<Value>>,
) -> Result<TableRecords> {
    if keys.is_empty() {
        return TableRecords::empty(table);
    }
    let expected = keys.len();
    let node = Node::KeyLookup {
        table: table.name.clone(),
        key_columns: table.get_primary_key_names()?,
        keys,
    };
    let image = read_image(ctx, conn, table, node, &[]).await?;
    if image.len() != expected {
        return Err(Error::ImageCapture(format!(
            "expected {} rows of table {} but read back {}",
            expected,
            table.name,
            image.len()
        )));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::CommandType;
    use crate::sql::engine::Memory;
    use crate::sql::parser::ast::{
        DeleteStatement, Expression, InsertStatement, Operation, Statement, UpdateStatement,
    };
    use crate::sql::schema::{Catalog, Column};
    use crate::sql::types::DataType;

    pub(super) fn setup() -> Result<Memory> {
        let mut db = Memory::new("res");
        db.create_table(Table::new(
            "t",
            vec![
                Column::new("id", DataType::Integer).primary_key().auto_increment(),
                Column::new("v", DataType::Integer),
            ],
        )?)?;
        Ok(db)
    }

    pub(super) fn ctx() -> StatementContext {
        StatementContext::new(CommandType::StmtExecute).with_schema("db")
    }

    fn id_eq(param: usize) -> Option<Expression> {
        Some(Expression::Operation(Operation::Equal(
            Box::new(Expression::Field("id".into())),
            Box::new(Expression::Parameter(param)),
        )))
    }

    async fn seed(db: &mut Memory, rows: &[(i64, i64)]) -> Result<()> {
        let insert = Statement::Insert(InsertStatement {
            table: "t".into(),
            hints: vec![],
            columns: None,
            values: rows
                .iter()
                .map(|(id, v)| vec![Value::Integer(*id).into(), Value::Integer(*v).into()])
                .collect(),
        });
        db.execute(&insert, &[]).await?;
        Ok(())
    }

    #[tokio::test]
    async fn update_images() -> Result<()> {
        let mut db = setup()?;
        seed(&mut db, &[(1, 10), (2, 10)]).await?;
        let stmt = UpdateStatement {
            table: "t".into(),
            hints: vec![],
            set: vec![("v".into(), Expression::Parameter(0))],
            r#where: id_eq(1),
        };
        let args = vec![Value::Integer(20), Value::Integer(1)];

        let before = UpdateExecutor::new(&mut db, &stmt, &args).before_image(&ctx()).await?;
        assert_eq!(before.len(), 1);
        assert_eq!(before.rows[0].get("v"), Some(&Value::Integer(10)));

        db.execute(&Statement::Update(stmt.clone()), &args).await?;

        let after =
            UpdateExecutor::new(&mut db, &stmt, &args).after_image(&ctx(), &before).await?;
        assert_eq!(after.primary_key_values()?, before.primary_key_values()?);
        assert_eq!(after.rows[0].get("v"), Some(&Value::Integer(20)));
        Ok(())
    }

    #[tokio::test]
    async fn update_predicate_no_longer_matches() -> Result<()> {
        // UPDATE t SET v = 99 WHERE v = 10: the after-image must still find the row.
        let mut db = setup()?;
        seed(&mut db, &[(1, 10)]).await?;
        let stmt = UpdateStatement {
            table: "t".into(),
            hints: vec![],
            set: vec![("v".into(), Value::Integer(99).into())],
            r#where: Some(Expression::Operation(Operation::Equal(
                Box::new(Expression::Field("v".into())),
                Box::new(Value::Integer(10).into()),
            ))),
        };
        let before = UpdateExecutor::new(&mut db, &stmt, &[]).before_image(&ctx()).await?;
        db.execute(&Statement::Update(stmt.clone()), &[]).await?;
        let after = UpdateExecutor::new(&mut db, &stmt, &[]).after_image(&ctx(), &before).await?;
        assert_eq!(after.rows[0].get("v"), Some(&Value::Integer(99)));
        Ok(())
    }

    #[tokio::test]
    async fn update_of_primary_key_rejected() -> Result<()> {
        let mut db = setup()?;
        let stmt = UpdateStatement {
            table: "t".into(),
            hints: vec![],
            set: vec![("id".into(), Value::Integer(5).into())],
            r#where: None,
        };
        let result = UpdateExecutor::new(&mut db, &stmt, &[]).before_image(&ctx()).await;
        assert!(matches!(result, Err(Error::Value(_))));
        Ok(())
    }

    #[tokio::test]
    async fn update_of_unknown_column() -> Result<()> {
        let mut db = setup()?;
        let stmt = UpdateStatement {
            table: "t".into(),
            hints: vec![],
            set: vec![("missing".into(), Value::Integer(5).into())],
            r#where: None,
        };
        let result = UpdateExecutor::new(&mut db, &stmt, &[]).before_image(&ctx()).await;
        assert!(matches!(result, Err(Error::ImageCapture(_))));
        Ok(())
    }

    #[tokio::test]
    async fn update_after_image_missing_row() -> Result<()> {
        let mut db = setup()?;
        seed(&mut db, &[(1, 10)]).await?;
        let stmt = UpdateStatement {
            table: "t".into(),
            hints: vec![],
            set: vec![("v".into(), Value::Integer(1).into())],
            r#where: id_eq(0),
        };
        let args = vec![Value::Integer(1)];
        let before = UpdateExecutor::new(&mut db, &stmt, &args).before_image(&ctx()).await?;
        db.execute(
            &Statement::Delete(DeleteStatement {
                table: "t".into(),
                hints: vec![],
                r#where: None,
            }),
            &[],
        )
        .await?;
        let result =
            UpdateExecutor::new(&mut db, &stmt, &args).after_image(&ctx(), &before).await;
        assert!(matches!(result, Err(Error::ImageCapture(_))));
        Ok(())
    }

    #[tokio::test]
    async fn delete_before_image() -> Result<()> {
        let mut db = setup()?;
        seed(&mut db, &[(1, 10), (2, 20), (3, 30)]).await?;
        let stmt = DeleteStatement {
            table: "t".into(),
            hints: vec![],
            r#where: Some(Expression::Operation(Operation::GreaterThan(
                Box::new(Expression::Field("v".into())),
                Box::new(Expression::Parameter(0)),
            ))),
        };
        let args = vec![Value::Integer(15)];
        let mut executor = DeleteExecutor::new(&mut db, &stmt, &args);
        assert_eq!(executor.table_name(), "t");
        let before = executor.before_image(&ctx()).await?;
        assert_eq!(
            before.primary_key_values()?,
            vec![vec![Value::Integer(2)], vec![Value::Integer(3)]]
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_table() -> Result<()> {
        let mut db = setup()?;
        let stmt = DeleteStatement {
            table: "nope".into(),
            hints: vec![],
            r#where: None,
        };
        let result = DeleteExecutor::new(&mut db, &stmt, &[]).before_image(&ctx()).await;
        assert!(matches!(result, Err(Error::ImageCapture(_))));
        Ok(())
    }
}

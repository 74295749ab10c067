use super::{read_image, table_meta, Executor};
use crate::dt::coordinator::Coordinator;
use crate::dt::image::TableRecords;
use crate::dt::lock::build_lock_key;
use crate::dt::retry::{retry_on_lock_conflict, Clock, RetryPolicy};
use crate::error::{Error, Result};
use crate::proxy::StatementContext;
use crate::sql::engine::{Backend, ExecResult};
use crate::sql::parser::ast::SelectStatement;
use crate::sql::plan::Node;
use crate::sql::types::Value;

/// Holds a SELECT ... FOR UPDATE inside a global transaction until no other
/// global transaction holds a lock on the selected rows. Builds no undo log.
pub struct SelectForUpdateExecutor<'a> {
    conn: &'a mut dyn Backend,
    stmt: &'a SelectStatement,
    args: &'a [Value],
    xid: &'a str,
    coordinator: &'a dyn Coordinator,
    clock: &'a dyn Clock,
    policy: RetryPolicy,
}

impl<'a> SelectForUpdateExecutor<'a> {
    pub fn new(
        conn: &'a mut dyn Backend,
        stmt: &'a SelectStatement,
        args: &'a [Value],
        xid: &'a str,
        coordinator: &'a dyn Coordinator,
        clock: &'a dyn Clock,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            conn,
            stmt,
            args,
            xid,
            coordinator,
            clock,
            policy,
        }
    }

    /// Waits until the selected rows are free of global locks, returning the
    /// lock key checked, or None if the select returned no rows. Fails with
    /// the last lock conflict once the retry policy is exhausted.
    pub async fn execute(
        &mut self,
        ctx: &StatementContext,
        result: &ExecResult,
    ) -> Result<Option<String>> {
        let image = self.selected_rows(ctx, result).await?;
        if image.is_empty() {
            return Ok(None);
        }
        let lock_key = build_lock_key(&image)?;
        log::debug!("select for update, lockKey: {}", lock_key);

        let resource_id = self.conn.resource_id().to_string();
        let (xid, coordinator) = (self.xid, self.coordinator);
        let lock_key_ref = lock_key.as_str();
        let resource_ref = resource_id.as_str();
        retry_on_lock_conflict(ctx, &self.policy, self.clock, || async move {
            if coordinator.is_lockable(xid, resource_ref, lock_key_ref).await? {
                Ok(())
            } else {
                Err(Error::LockConflict(format!(
                    "global lock on {} of {} is held by another transaction",
                    lock_key_ref, resource_ref
                )))
            }
        })
        .await?;
        Ok(Some(lock_key))
    }

    /// The selected rows, taken from the result set when it projects the whole
    /// primary key, otherwise re-read by the statement's predicate.
    async fn selected_rows(
        &mut self,
        ctx: &StatementContext,
        result: &ExecResult,
    ) -> Result<TableRecords> {
        let table = table_meta(ctx, &mut *self.conn, &self.stmt.table).await?;
        if let ExecResult::Rows { columns, rows } = result {
            let primary_keys = table.get_primary_key_names()?;
            let covered = primary_keys
                .iter()
                .all(|pk| columns.iter().any(|c| c.eq_ignore_ascii_case(pk)));
            if covered {
                return TableRecords::from_columns(&table, columns, rows.clone());
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

impl<'a> Executor for SelectForUpdateExecutor<'a> {
    fn table_name(&self) -> &str {
        &self.stmt.table
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{ctx, setup};
    use super::*;
    use crate::dt::coordinator::{BranchRegisterRequest, BranchType, LocalCoordinator};
    use crate::dt::retry::RecordingClock;
    use crate::sql::parser::ast::{InsertStatement, SelectLock, Statement};
    use std::time::Duration;

    async fn seeded() -> Result<crate::sql::engine::Memory> {
        let mut db = setup()?;
        db.execute(
            &Statement::Insert(InsertStatement {
                table: "t".into(),
                hints: vec![],
                columns: Some(vec!["v".into()]),
                values: vec![vec![Value::Integer(10).into()], vec![Value::Integer(20).into()]],
            }),
            &[],
        )
        .await?;
        Ok(db)
    }

    fn select(columns: Option<Vec<String>>) -> SelectStatement {
        SelectStatement {
            table: "t".into(),
            hints: vec![],
            columns,
            r#where: None,
            lock: Some(SelectLock::ForUpdate),
        }
    }

    #[tokio::test]
    async fn waits_out_conflicting_lock() -> Result<()> {
        let mut db = seeded().await?;
        let tc = LocalCoordinator::new();
        tc.branch_register_local(BranchRegisterRequest {
            addressing: "a".into(),
            xid: "other".into(),
            resource_id: "res".into(),
            lock_key: "t:2".into(),
            branch_type: BranchType::AT,
            application_data: None,
            is_async: true,
        })
        .await?;
        let clock = RecordingClock::default();
        let policy = RetryPolicy::new(Duration::from_millis(5), 3);

        // Projection without the key: rows are re-read by predicate.
        let stmt = select(Some(vec!["v".into()]));
        let result = db.execute(&Statement::Select(stmt.clone()), &[]).await?;
        let outcome = SelectForUpdateExecutor::new(&mut db, &stmt, &[], "mine", &tc, &clock, policy)
            .execute(&ctx(), &result)
            .await;
        assert!(matches!(outcome, Err(Error::LockConflict(_))));
        assert_eq!(clock.sleeps().len(), 2);

        tc.release("other")?;
        let stmt = select(None);
        let result = db.execute(&Statement::Select(stmt.clone()), &[]).await?;
        let lock_key =
            SelectForUpdateExecutor::new(&mut db, &stmt, &[], "mine", &tc, &clock, policy)
                .execute(&ctx(), &result)
                .await?;
        assert_eq!(lock_key.as_deref(), Some("t:1,2"));
        Ok(())
    }

    #[tokio::test]
    async fn no_rows_no_check() -> Result<()> {
        let mut db = setup()?;
        let tc = LocalCoordinator::new();
        let clock = RecordingClock::default();
        let stmt = select(None);
        let result = ExecResult::Rows {
            columns: vec!["id".into(), "v".into()],
            rows: vec![],
        };
        let lock_key = SelectForUpdateExecutor::new(
            &mut db,
            &stmt,
            &[],
            "mine",
            &tc,
            &clock,
            RetryPolicy::new(Duration::ZERO, 1),
        )
        .execute(&ctx(), &result)
        .await?;
        assert_eq!(lock_key, None);
        Ok(())
    }
}

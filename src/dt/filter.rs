use super::config::FilterConfig;
use super::coordinator::{BranchRegisterRequest, BranchType, Coordinator};
use super::executor::{
    AfterImage, BeforeImage, DeleteExecutor, InsertExecutor, SelectForUpdateExecutor,
    UpdateExecutor,
};
use super::lock::build_lock_key;
use super::retry::{retry_on_lock_conflict, Clock, RetryPolicy, TokioClock};
use super::undo::{build_undo_item, SqlType, UndoLogItem, UndoLogStore};
use crate::error::{Error, Result};
use crate::proxy::{
    register_filter_factory, CommandType, Filter, FilterFactory, Interception, StatementContext,
};
use crate::sql::engine::{Backend, ExecResult};
use crate::sql::parser::ast::{
    DeleteStatement, InsertStatement, SelectStatement, Statement, TableHint, UpdateStatement,
};
use crate::sql::types::Value;

use async_trait::async_trait;
use std::sync::Arc;

/// The name the distributed transaction filter is registered under
pub const MYSQL_FILTER_NAME: &str = "MysqlDistributedTransaction";

/// The table hint carrying the global transaction id
pub const HINT_XID: &str = "xid";

/// Returns the global transaction id if the hints carry one. Statements
/// without it are not part of a distributed transaction.
pub fn has_xid_hint(hints: &[TableHint]) -> Option<&str> {
    hints
        .iter()
        .find(|hint| hint.name.eq_ignore_ascii_case(HINT_XID))
        .map(|hint| hint.data.as_str())
}

/// The statement kinds the filter tells apart
enum Dispatch<'a> {
    Delete(&'a DeleteStatement),
    Update(&'a UpdateStatement),
    Insert(&'a InsertStatement),
    SelectForUpdate(&'a SelectStatement),
    Other,
}

impl<'a> From<&'a Statement> for Dispatch<'a> {
    fn from(statement: &'a Statement) -> Self {
        match statement {
            Statement::Delete(stmt) => Dispatch::Delete(stmt),
            Statement::Update(stmt) => Dispatch::Update(stmt),
            Statement::Insert(stmt) => Dispatch::Insert(stmt),
            Statement::Select(stmt) if stmt.is_for_update() => Dispatch::SelectForUpdate(stmt),
            _ => Dispatch::Other,
        }
    }
}

/// Turns hinted DML into AT branch transactions: captures row images around
/// the statement, registers a branch holding the rows' global locks, and
/// writes the undo log next to the statement's own changes.
pub struct DistributedTransactionFilter {
    addressing: String,
    policy: RetryPolicy,
    coordinator: Arc<dyn Coordinator>,
    undo_log: Arc<dyn UndoLogStore>,
    clock: Arc<dyn Clock>,
}

impl DistributedTransactionFilter {
    pub fn new(
        config: FilterConfig,
        coordinator: Arc<dyn Coordinator>,
        undo_log: Arc<dyn UndoLogStore>,
    ) -> Self {
        Self {
            addressing: config.addressing,
            policy: RetryPolicy::new(config.lock_retry_interval, config.lock_retry_times),
            coordinator,
            undo_log,
            clock: Arc::new(TokioClock),
        }
    }

    /// Replaces the clock used to wait between lock conflict retries
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn process_before_delete(
        ctx: &StatementContext,
        conn: &mut dyn Backend,
        stmt: &DeleteStatement,
        args: &[Value],
    ) -> Result<Interception> {
        if has_xid_hint(&stmt.hints).is_none() {
            return Ok(Interception::none());
        }
        let before_image = DeleteExecutor::new(conn, stmt, args).before_image(ctx).await?;
        Ok(Interception::with_before_image(before_image))
    }

    async fn process_before_update(
        ctx: &StatementContext,
        conn: &mut dyn Backend,
        stmt: &UpdateStatement,
        args: &[Value],
    ) -> Result<Interception> {
        if has_xid_hint(&stmt.hints).is_none() {
            return Ok(Interception::none());
        }
        let before_image = UpdateExecutor::new(conn, stmt, args).before_image(ctx).await?;
        Ok(Interception::with_before_image(before_image))
    }

    async fn process_after_delete(
        &self,
        ctx: &StatementContext,
        mut interception: Interception,
        conn: &mut dyn Backend,
        stmt: &DeleteStatement,
    ) -> Result<()> {
        let Some(xid) = has_xid_hint(&stmt.hints) else {
            return Ok(());
        };
        let before_image = interception
            .take_before_image()
            .ok_or_else(|| Error::MissingContextState("before image should not be nil".into()))?;
        let schema = ctx.schema()?;
        if before_image.is_empty() {
            log::debug!("delete on {} matched no rows, no branch registered", stmt.table);
            return Ok(());
        }

        let lock_key = build_lock_key(&before_image)?;
        log::debug!("delete, lockKey: {}", lock_key);
        let table = before_image.table_name.clone();
        let undo_log =
            build_undo_item(SqlType::Delete, schema, &table, &lock_key, Some(before_image), None);
        self.register_and_log(ctx, conn, xid, &lock_key, undo_log).await
    }

    async fn process_after_insert(
        &self,
        ctx: &StatementContext,
        conn: &mut dyn Backend,
        result: &ExecResult,
        stmt: &InsertStatement,
        args: &[Value],
    ) -> Result<()> {
        let Some(xid) = has_xid_hint(&stmt.hints) else {
            return Ok(());
        };
        let schema = ctx.schema()?;
        let after_image = InsertExecutor::new(conn, stmt, args).after_image(ctx, result).await?;

        let lock_key = build_lock_key(&after_image)?;
        log::debug!("insert, lockKey: {}", lock_key);
        let table = after_image.table_name.clone();
        let undo_log =
            build_undo_item(SqlType::Insert, schema, &table, &lock_key, None, Some(after_image));
        self.register_and_log(ctx, conn, xid, &lock_key, undo_log).await
    }

    async fn process_after_update(
        &self,
        ctx: &StatementContext,
        mut interception: Interception,
        conn: &mut dyn Backend,
        stmt: &UpdateStatement,
        args: &[Value],
    ) -> Result<()> {
        let Some(xid) = has_xid_hint(&stmt.hints) else {
            return Ok(());
        };
        let before_image = interception
            .take_before_image()
            .ok_or_else(|| Error::MissingContextState("before image should not be nil".into()))?;
        let schema = ctx.schema()?;
        if before_image.is_empty() {
            log::debug!("update on {} matched no rows, no branch registered", stmt.table);
            return Ok(());
        }
        let after_image =
            UpdateExecutor::new(conn, stmt, args).after_image(ctx, &before_image).await?;

        let lock_key = build_lock_key(&after_image)?;
        log::debug!("update, lockKey: {}", lock_key);
        let table = after_image.table_name.clone();
        let undo_log = build_undo_item(
            SqlType::Update,
            schema,
            &table,
            &lock_key,
            Some(before_image),
            Some(after_image),
        );
        self.register_and_log(ctx, conn, xid, &lock_key, undo_log).await
    }

    async fn process_select_for_update(
        &self,
        ctx: &StatementContext,
        conn: &mut dyn Backend,
        result: &ExecResult,
        stmt: &SelectStatement,
        args: &[Value],
    ) -> Result<()> {
        let Some(xid) = has_xid_hint(&stmt.hints) else {
            return Ok(());
        };
        SelectForUpdateExecutor::new(
            conn,
            stmt,
            args,
            xid,
            self.coordinator.as_ref(),
            self.clock.as_ref(),
            self.policy,
        )
        .execute(ctx, result)
        .await?;
        Ok(())
    }

    /// Registers the branch, then persists its undo log through the same
    /// connection so it commits with the statement.
    async fn register_and_log(
        &self,
        ctx: &StatementContext,
        conn: &mut dyn Backend,
        xid: &str,
        lock_key: &str,
        undo_log: UndoLogItem,
    ) -> Result<()> {
        let resource_id = conn.resource_id().to_string();
        let branch_id = self.register_branch_transaction(ctx, xid, &resource_id, lock_key).await?;
        log::debug!("{}, branch id: {}", undo_log.sql_type.to_string().to_lowercase(), branch_id);
        ctx.guard(self.undo_log.insert_undo_log_with_normal(conn, xid, branch_id, undo_log)).await
    }

    /// Registers an AT branch for the rows of `lock_key`, waiting and retrying
    /// while another global transaction holds them.
    pub async fn register_branch_transaction(
        &self,
        ctx: &StatementContext,
        xid: &str,
        resource_id: &str,
        lock_key: &str,
    ) -> Result<i64> {
        let coordinator = self.coordinator.as_ref();
        retry_on_lock_conflict(ctx, &self.policy, self.clock.as_ref(), || {
            let request = BranchRegisterRequest {
                addressing: self.addressing.clone(),
                xid: xid.to_string(),
                resource_id: resource_id.to_string(),
                lock_key: lock_key.to_string(),
                branch_type: BranchType::AT,
                application_data: None,
                is_async: true,
            };
            async move {
                coordinator.branch_register_local(request).await.map_err(|err| {
                    log::error!("branch register err: {}", err);
                    match err {
                        Error::LockConflict(_)
                        | Error::Registration(_)
                        | Error::Cancelled
                        | Error::DeadlineExceeded => err,
                        err => Error::Registration(err.to_string()),
                    }
                })
            }
        })
        .await
    }
}

#[async_trait]
impl Filter for DistributedTransactionFilter {
    fn name(&self) -> &'static str {
        MYSQL_FILTER_NAME
    }

    async fn pre_handle(
        &self,
        ctx: &StatementContext,
        conn: &mut dyn Backend,
    ) -> Result<Interception> {
        if ctx.command != CommandType::StmtExecute {
            return Ok(Interception::none());
        }
        let prepared = ctx.prepared()?;
        let args = &prepared.bind_vars;
        match Dispatch::from(&prepared.statement) {
            Dispatch::Delete(stmt) => Self::process_before_delete(ctx, conn, stmt, args).await,
            Dispatch::Update(stmt) => Self::process_before_update(ctx, conn, stmt, args).await,
            _ => Ok(Interception::none()),
        }
    }

    async fn post_handle(
        &self,
        ctx: &StatementContext,
        interception: Interception,
        result: &ExecResult,
        conn: &mut dyn Backend,
    ) -> Result<()> {
        if ctx.command != CommandType::StmtExecute {
            return Ok(());
        }
        let prepared = ctx.prepared()?;
        let args = &prepared.bind_vars;
        match Dispatch::from(&prepared.statement) {
            Dispatch::Delete(stmt) => {
                self.process_after_delete(ctx, interception, conn, stmt).await
            }
            Dispatch::Insert(stmt) => {
                self.process_after_insert(ctx, conn, result, stmt, args).await
            }
            Dispatch::Update(stmt) => {
                self.process_after_update(ctx, interception, conn, stmt, args).await
            }
            Dispatch::SelectForUpdate(stmt) => {
                self.process_select_for_update(ctx, conn, result, stmt, args).await
            }
            Dispatch::Other => Ok(()),
        }
    }
}

/// Builds distributed transaction filters from configuration, wired to a
/// coordinator and an undo log store.
pub struct DistributedTransactionFactory {
    coordinator: Arc<dyn Coordinator>,
    undo_log: Arc<dyn UndoLogStore>,
}

impl DistributedTransactionFactory {
    pub fn new(coordinator: Arc<dyn Coordinator>, undo_log: Arc<dyn UndoLogStore>) -> Self {
        Self {
            coordinator,
            undo_log,
        }
    }

    /// Registers the factory under `MYSQL_FILTER_NAME`
    pub fn register(self) -> Result<()> {
        register_filter_factory(MYSQL_FILTER_NAME, Arc::new(self))
    }
}

impl FilterFactory for DistributedTransactionFactory {
    fn new_filter(&self, config: &config::Config) -> Result<Arc<dyn Filter>> {
        let config = FilterConfig::from_config(config)?;
        Ok(Arc::new(DistributedTransactionFilter::new(
            config,
            self.coordinator.clone(),
            self.undo_log.clone(),
        )))
    }
}

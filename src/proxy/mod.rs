//! The surface toward the surrounding proxy: the per-statement context, the
//! filter hook pair invoked around each backend execution, and a registry of
//! filter factories keyed by name.

mod context;

pub use context::{CommandType, PreparedStatement, StatementContext};

use crate::dt::image::TableRecords;
use crate::error::{Error, Result};
use crate::sql::engine::{Backend, ExecResult};

use async_trait::async_trait;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// State carried from a filter's pre-handle to its post-handle for one
/// statement execution. The proxy owns it between the two calls, so it can
/// never leak into another statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Interception {
    before_image: Option<TableRecords>,
}

impl Interception {
    /// Nothing to carry
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_before_image(image: TableRecords) -> Self {
        Self {
            before_image: Some(image),
        }
    }

    pub fn take_before_image(&mut self) -> Option<TableRecords> {
        self.before_image.take()
    }
}

/// A statement filter. `pre_handle` is always called before the backend
/// executes the statement and `post_handle` after, with the interception
/// returned by `pre_handle` for the same execution.
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn pre_handle(
        &self,
        ctx: &StatementContext,
        conn: &mut dyn Backend,
    ) -> Result<Interception>;

    async fn post_handle(
        &self,
        ctx: &StatementContext,
        interception: Interception,
        result: &ExecResult,
        conn: &mut dyn Backend,
    ) -> Result<()>;
}

/// Builds filters from their configuration section
pub trait FilterFactory: Send + Sync {
    fn new_filter(&self, config: &config::Config) -> Result<Arc<dyn Filter>>;
}

lazy_static! {
    static ref FILTER_FACTORIES: RwLock<HashMap<String, Arc<dyn FilterFactory>>> =
        RwLock::new(HashMap::new());
}

/// Registers a filter factory under a name, replacing any previous one
pub fn register_filter_factory(name: &str, factory: Arc<dyn FilterFactory>) -> Result<()> {
    FILTER_FACTORIES.write()?.insert(name.to_string(), factory);
    Ok(())
}

/// Looks up a filter factory by name
pub fn get_filter_factory(name: &str) -> Result<Arc<dyn FilterFactory>> {
    FILTER_FACTORIES
        .read()?
        .get(name)
        .cloned()
        .ok_or_else(|| Error::Config(format!("filter factory {} is not registered", name)))
}

/// Executes a prepared statement on the backend, running every filter's
/// pre-handle before and post-handle after it. Any error fails the statement;
/// rolling back the local transaction is left to the caller.
pub async fn execute_statement(
    filters: &[Arc<dyn Filter>],
    ctx: &StatementContext,
    conn: &mut dyn Backend,
) -> Result<ExecResult> {
    let prepared = ctx.prepared()?;
    let mut interceptions = Vec::with_capacity(filters.len());
    for filter in filters {
        interceptions.push(filter.pre_handle(ctx, conn).await?);
    }
    let result = ctx.guard(conn.execute(&prepared.statement, &prepared.bind_vars)).await?;
    for (filter, interception) in filters.iter().zip(interceptions) {
        filter.post_handle(ctx, interception, &result, conn).await?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::engine::Memory;
    use crate::sql::parser::ast::Statement;
    use std::sync::Mutex;

    struct Tracing(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Filter for Tracing {
        fn name(&self) -> &'static str {
            "Tracing"
        }

        async fn pre_handle(
            &self,
            _ctx: &StatementContext,
            _conn: &mut dyn Backend,
        ) -> Result<Interception> {
            self.0.lock()?.push("pre".into());
            Ok(Interception::none())
        }

        async fn post_handle(
            &self,
            _ctx: &StatementContext,
            _interception: Interception,
            result: &ExecResult,
            _conn: &mut dyn Backend,
        ) -> Result<()> {
            self.0.lock()?.push(format!("post {:?}", result));
            Ok(())
        }
    }

    struct TracingFactory(Arc<Mutex<Vec<String>>>);

    impl FilterFactory for TracingFactory {
        fn new_filter(&self, _config: &config::Config) -> Result<Arc<dyn Filter>> {
            Ok(Arc::new(Tracing(self.0.clone())))
        }
    }

    #[tokio::test]
    async fn hooks_wrap_execution() -> Result<()> {
        let events = Arc::new(Mutex::new(Vec::new()));
        register_filter_factory("Tracing", Arc::new(TracingFactory(events.clone())))?;
        let filter = get_filter_factory("Tracing")?.new_filter(&config::Config::default())?;

        let mut db = Memory::new("res");
        let ctx = StatementContext::execute("db", Statement::Begin, vec![]);
        execute_statement(&[filter], &ctx, &mut db).await?;
        assert!(db.in_transaction());
        assert_eq!(
            *events.lock()?,
            vec!["pre".to_string(), format!("post {:?}", ExecResult::affected(0))]
        );
        assert!(get_filter_factory("Unknown").is_err());
        Ok(())
    }
}

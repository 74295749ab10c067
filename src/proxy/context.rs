use crate::error::{Error, Result};
use crate::sql::parser::ast::Statement;
use crate::sql::types::Value;

use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The wire command a statement arrived with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandType {
    Query,
    StmtPrepare,
    StmtExecute,
    StmtClose,
}

/// A prepared statement together with the values bound for this execution
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedStatement {
    pub statement: Statement,
    pub bind_vars: Vec<Value>,
}

impl PreparedStatement {
    pub fn new(statement: Statement, bind_vars: Vec<Value>) -> Self {
        Self {
            statement,
            bind_vars,
        }
    }
}

/// Per-execution state handed to filters by the proxy.
#[derive(Clone, Debug)]
pub struct StatementContext {
    pub command: CommandType,
    pub schema: Option<String>,
    pub prepared: Option<Arc<PreparedStatement>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl StatementContext {
    pub fn new(command: CommandType) -> Self {
        Self {
            command,
            schema: None,
            prepared: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A COM_STMT_EXECUTE of the given statement in the given schema
    pub fn execute(schema: &str, statement: Statement, bind_vars: Vec<Value>) -> Self {
        Self::new(CommandType::StmtExecute)
            .with_schema(schema)
            .with_prepared(PreparedStatement::new(statement, bind_vars))
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn with_prepared(mut self, prepared: PreparedStatement) -> Self {
        self.prepared = Some(Arc::new(prepared));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The current schema, erroring if none is selected
    pub fn schema(&self) -> Result<&str> {
        match self.schema.as_deref() {
            Some(schema) if !schema.is_empty() => Ok(schema),
            _ => Err(Error::MissingSchema),
        }
    }

    /// The prepared statement being executed
    pub fn prepared(&self) -> Result<&PreparedStatement> {
        self.prepared
            .as_deref()
            .ok_or_else(|| Error::Internal("prepare stmt should not be nil".into()))
    }

    /// Runs a blocking step, aborting it if the statement is cancelled or its
    /// deadline passes.
    pub async fn guard<T, F>(&self, step: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let run = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(Error::Cancelled),
                result = step => result,
            }
        };
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, run)
                .await
                .map_err(|_| Error::DeadlineExceeded)?,
            None => run.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_schema() {
        let ctx = StatementContext::new(CommandType::StmtExecute).with_schema("");
        assert_eq!(ctx.schema(), Err(Error::MissingSchema));
        assert!(ctx.prepared().is_err());
    }

    #[tokio::test]
    async fn guard_cancelled() {
        let cancel = CancellationToken::new();
        let ctx = StatementContext::new(CommandType::StmtExecute).with_cancel(cancel.clone());
        cancel.cancel();
        let result = ctx.guard(async { Ok(1) }).await;
        assert_eq!(result, Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn guard_deadline() {
        let ctx = StatementContext::new(CommandType::StmtExecute)
            .with_deadline(Instant::now() + Duration::from_millis(5));
        let result = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(Error::DeadlineExceeded));
    }
}

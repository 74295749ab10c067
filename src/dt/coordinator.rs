use super::lock::split_row_keys;
use crate::error::{Error, Result};

use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Branch transaction modes. Only AT branches are registered by the proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchType {
    AT,
    TCC,
    Saga,
}

/// A request to register a branch of a global transaction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchRegisterRequest {
    /// The proxy's own address, for the coordinator to call back on
    pub addressing: String,
    pub xid: String,
    pub resource_id: String,
    pub lock_key: String,
    pub branch_type: BranchType,
    pub application_data: Option<Vec<u8>>,
    pub is_async: bool,
}

/// The transaction coordinator. Owns global transaction state and the
/// distributed row lock table.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Registers a branch and acquires its row locks, returning the branch ID.
    /// Errors with `Error::LockConflict` if another global transaction holds
    /// any of the rows.
    async fn branch_register_local(&self, request: BranchRegisterRequest) -> Result<i64>;

    /// Checks whether the rows are free of locks held by other global
    /// transactions.
    async fn is_lockable(&self, xid: &str, resource_id: &str, lock_key: &str) -> Result<bool>;
}

/// A registered branch, as tracked by the local coordinator
#[derive(Clone, Debug, PartialEq)]
pub struct BranchRecord {
    pub branch_id: i64,
    pub resource_id: String,
    pub lock_key: String,
}

/// An in-process coordinator with a row lock table. Branch IDs start at 1, so
/// 0 never names a branch.
#[derive(Debug)]
pub struct LocalCoordinator {
    next_branch_id: AtomicI64,
    /// (resource_id, row key) -> holding xid
    locks: Mutex<HashMap<(String, String), String>>,
    branches: Mutex<HashMap<String, Vec<BranchRecord>>>,
}

impl LocalCoordinator {
    pub fn new() -> Self {
        Self {
            next_branch_id: AtomicI64::new(1),
            locks: Mutex::new(HashMap::new()),
            branches: Mutex::new(HashMap::new()),
        }
    }

    /// Releases every row lock and branch of a global transaction, as its
    /// commit or rollback would.
    pub fn release(&self, xid: &str) -> Result<()> {
        self.locks.lock()?.retain(|_, holder| holder != xid);
        self.branches.lock()?.remove(xid);
        Ok(())
    }

    /// Returns the branches registered for a global transaction
    pub fn branches(&self, xid: &str) -> Result<Vec<BranchRecord>> {
        Ok(self.branches.lock()?.get(xid).cloned().unwrap_or_default())
    }

    /// Returns the first row key held by another global transaction, if any.
    fn conflict(
        locks: &HashMap<(String, String), String>,
        xid: &str,
        resource_id: &str,
        row_keys: &[String],
    ) -> Option<(String, String)> {
        row_keys.iter().find_map(|key| {
            locks
                .get(&(resource_id.to_string(), key.clone()))
                .filter(|holder| holder.as_str() != xid)
                .map(|holder| (key.clone(), holder.clone()))
        })
    }
}

impl Default for LocalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Coordinator for LocalCoordinator {
    async fn branch_register_local(&self, request: BranchRegisterRequest) -> Result<i64> {
        if request.branch_type != BranchType::AT {
            return Err(Error::Registration(format!(
                "unsupported branch type {:?}",
                request.branch_type
            )));
        }
        let row_keys = split_row_keys(&request.lock_key)
            .map_err(|e| Error::Registration(e.to_string()))?;

        let mut locks = self.locks.lock()?;
        if let Some((key, holder)) =
            Self::conflict(&locks, &request.xid, &request.resource_id, &row_keys)
        {
            return Err(Error::LockConflict(format!(
                "global lock on {} of {} is held by {}",
                key, request.resource_id, holder
            )));
        }
        for key in row_keys {
            locks.insert((request.resource_id.clone(), key), request.xid.clone());
        }
        drop(locks);

        let branch_id = self.next_branch_id.fetch_add(1, Ordering::SeqCst);
        self.branches.lock()?.entry(request.xid).or_default().push(BranchRecord {
            branch_id,
            resource_id: request.resource_id,
            lock_key: request.lock_key,
        });
        Ok(branch_id)
    }

    async fn is_lockable(&self, xid: &str, resource_id: &str, lock_key: &str) -> Result<bool> {
        let row_keys = split_row_keys(lock_key)?;
        let locks = self.locks.lock()?;
        Ok(Self::conflict(&locks, xid, resource_id, &row_keys).is_none())
    }
}

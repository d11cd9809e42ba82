//!
//! tablegate storage seams
//! -----------------------
//! Two traits separate the access-control core from whatever actually holds the data:
//!
//! - [`RecordStore`]: schema-agnostic CRUD keyed by a validated [`EntityId`].
//! - [`CredentialStore`]: identity lookup by login plus a one-way password comparison.
//!
//! Two backends implement both: an in-process store (`memory`) used by tests and the demo
//! mode, and PostgreSQL (`postgres`) over a bounded connection pool (`pool`).

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::access::{is_identifier, EntityId};
use crate::identity::{ActorContext, Identity};

pub mod memory;
pub mod pool;
pub mod postgres;

/// One row as column name -> JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Validated values for a mutation. `None` stores NULL.
pub type ColumnValues = BTreeMap<String, Option<String>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("table '{0}' does not exist in the store")]
    UnknownTable(String),
    #[error("column '{column}' does not exist on '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error("'{0}' is not a plain identifier")]
    InvalidIdentifier(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection pool is closed")]
    PoolClosed,
    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("row decoding failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Quote a name for interpolation into SQL after checking it is a plain identifier.
pub fn quote_ident(name: &str) -> StoreResult<String> {
    if !is_identifier(name) {
        return Err(StoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

/// Bound a store future by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// First `limit` rows of the entity's table.
    async fn query(&self, entity: &EntityId, limit: usize) -> StoreResult<Vec<Row>>;

    /// Column names in table order, primary key included.
    async fn columns_of(&self, entity: &EntityId) -> StoreResult<Vec<String>>;

    async fn fetch(&self, entity: &EntityId, pk: i64) -> StoreResult<Option<Row>>;

    /// Insert a row and return its primary key.
    async fn insert(&self, entity: &EntityId, values: &ColumnValues, actor: &ActorContext) -> StoreResult<i64>;

    /// Returns the number of rows changed.
    async fn update(&self, entity: &EntityId, pk: i64, values: &ColumnValues, actor: &ActorContext) -> StoreResult<u64>;

    /// Returns the number of rows removed.
    async fn delete(&self, entity: &EntityId, pk: i64, actor: &ActorContext) -> StoreResult<u64>;
}

/// A stored identity with its salted password hash.
#[derive(Clone)]
pub struct CredentialRecord {
    pub identity: Identity,
    pub password_hash: String,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord").field("identity", &self.identity).finish_non_exhaustive()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_identity_by_login(&self, login: &str) -> StoreResult<Option<CredentialRecord>>;

    /// One-way comparison of `password` against a stored hash.
    async fn verify_password(&self, password_hash: &str, password: &str) -> StoreResult<bool>;

    /// A well-formed hash no password is expected to match, compared on unknown logins.
    fn decoy_hash(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_accepts_plain_names_only() {
        assert_eq!(quote_ident("repair_request").unwrap(), "\"repair_request\"");
        assert!(quote_ident("repair\"; DROP TABLE x; --").is_err());
        assert!(quote_ident("public.repair").is_err());
        assert!(quote_ident("").is_err());
    }

    #[tokio::test]
    async fn with_timeout_reports_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, StoreError>(1)
        };
        let err = with_timeout(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
    }
}

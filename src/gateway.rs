//! Generic record gateway: schema-agnostic CRUD on behalf of an authorized caller.
//!
//! Every operation takes an [`Authorized`] from the enforcer, so the entity is already a
//! validated [`crate::access::EntityId`] and the acting identity is at hand for provenance.
//! Columns are discovered from the store at call time; submitted values are checked against
//! them before any mutating call is issued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::access::{Action, Authorized};
use crate::error::{AppError, AppResult};
use crate::storage::{with_timeout, ColumnValues, RecordStore, Row};

/// Rows shown by the list view.
pub const LIST_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Listing {
    pub entity: String,
    pub primary_key: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecordView {
    pub entity: String,
    pub primary_key: String,
    pub record_id: i64,
    pub columns: Vec<String>,
    pub record: Row,
}

/// Check submitted form values against the discovered columns.
///
/// The primary key is never writable, unknown columns are refused, and empty strings
/// become NULL.
pub fn prepare_values(primary_key: &str, columns: &[String], raw: &HashMap<String, String>) -> AppResult<ColumnValues> {
    if raw.is_empty() {
        return Err(AppError::validation("empty_record", "no column values submitted"));
    }
    let mut out = ColumnValues::new();
    for (col, value) in raw {
        if col == primary_key {
            return Err(AppError::Validation {
                code: "primary_key_write".into(),
                message: format!("column '{col}' is assigned by the store"),
            });
        }
        if !columns.iter().any(|c| c == col) {
            return Err(AppError::Validation { code: "unknown_column".into(), message: format!("unknown column '{col}'") });
        }
        let v = if value.is_empty() { None } else { Some(value.clone()) };
        out.insert(col.clone(), v);
    }
    Ok(out)
}

/// Parse a record id from a path segment.
pub fn parse_record_id(raw: &str) -> AppResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| AppError::Validation { code: "bad_record_id".into(), message: format!("'{raw}' is not a record id") })
}

pub struct RecordGateway {
    store: Arc<dyn RecordStore>,
    timeout: Duration,
}

impl RecordGateway {
    pub fn new(store: Arc<dyn RecordStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    fn require_action(auth: &Authorized, action: Action) -> AppResult<()> {
        if auth.action() != action {
            return Err(AppError::Internal {
                code: "authorization_mismatch".into(),
                message: format!("operation needs {action}, request was authorized for {}", auth.action()),
            });
        }
        Ok(())
    }

    pub async fn list(&self, auth: &Authorized, limit: usize) -> AppResult<Listing> {
        Self::require_action(auth, Action::Read)?;
        let entity = auth.entity();
        let columns = with_timeout(self.timeout, self.store.columns_of(entity)).await?;
        let rows = with_timeout(self.timeout, self.store.query(entity, limit)).await?;
        Ok(Listing { entity: entity.to_string(), primary_key: entity.primary_key(), columns, rows })
    }

    /// Writable columns for the create form (primary key excluded).
    pub async fn create_columns(&self, auth: &Authorized) -> AppResult<Vec<String>> {
        Self::require_action(auth, Action::Create)?;
        let pk = auth.entity().primary_key();
        let columns = with_timeout(self.timeout, self.store.columns_of(auth.entity())).await?;
        Ok(columns.into_iter().filter(|c| *c != pk).collect())
    }

    pub async fn create(&self, auth: &Authorized, raw: &HashMap<String, String>) -> AppResult<i64> {
        Self::require_action(auth, Action::Create)?;
        let entity = auth.entity();
        let columns = with_timeout(self.timeout, self.store.columns_of(entity)).await?;
        let values = prepare_values(&entity.primary_key(), &columns, raw)?;
        let actor = auth.identity().actor();
        let id = with_timeout(self.timeout, self.store.insert(entity, &values, &actor)).await?;
        info!(target: "tablegate::gateway", entity = %entity, id, login = %actor.login, "record created");
        Ok(id)
    }

    /// Current row plus its columns, for the edit form.
    pub async fn edit_view(&self, auth: &Authorized, pk: i64) -> AppResult<RecordView> {
        Self::require_action(auth, Action::Update)?;
        let entity = auth.entity();
        let columns = with_timeout(self.timeout, self.store.columns_of(entity)).await?;
        let record = with_timeout(self.timeout, self.store.fetch(entity, pk))
            .await?
            .ok_or_else(|| record_missing(entity.as_str(), pk))?;
        Ok(RecordView { entity: entity.to_string(), primary_key: entity.primary_key(), record_id: pk, columns, record })
    }

    pub async fn update(&self, auth: &Authorized, pk: i64, raw: &HashMap<String, String>) -> AppResult<()> {
        Self::require_action(auth, Action::Update)?;
        let entity = auth.entity();
        let columns = with_timeout(self.timeout, self.store.columns_of(entity)).await?;
        let values = prepare_values(&entity.primary_key(), &columns, raw)?;
        let actor = auth.identity().actor();
        let changed = with_timeout(self.timeout, self.store.update(entity, pk, &values, &actor)).await?;
        if changed == 0 {
            return Err(record_missing(entity.as_str(), pk));
        }
        info!(target: "tablegate::gateway", entity = %entity, id = pk, login = %actor.login, "record updated");
        Ok(())
    }

    pub async fn delete(&self, auth: &Authorized, pk: i64) -> AppResult<()> {
        Self::require_action(auth, Action::Delete)?;
        let entity = auth.entity();
        let actor = auth.identity().actor();
        let changed = with_timeout(self.timeout, self.store.delete(entity, pk, &actor)).await?;
        if changed == 0 {
            return Err(record_missing(entity.as_str(), pk));
        }
        info!(target: "tablegate::gateway", entity = %entity, id = pk, login = %actor.login, "record deleted");
        Ok(())
    }
}

fn record_missing(entity: &str, pk: i64) -> AppError {
    AppError::NotFound { code: "record_not_found".into(), message: format!("no {entity} record with id {pk}") }
}

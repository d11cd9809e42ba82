//! In-process record and credential stores.
//!
//! Tables are plain maps keyed by primary key behind a `parking_lot::RwLock`. Every
//! mutation appends a [`ProvenanceEntry`] under the same write lock, which plays the role
//! of the transaction the PostgreSQL backend uses.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ColumnValues, CredentialRecord, CredentialStore, RecordStore, Row, StoreError, StoreResult};
use crate::access::{Action, EntityId, PermissionMatrix};
use crate::identity::{ActorContext, Identity};
use crate::security::{self, SecurityError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceEntry {
    pub entity: String,
    pub action: Action,
    pub record_id: i64,
    pub actor_login: String,
    pub actor_role: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
struct MemoryTable {
    primary_key: String,
    columns: Vec<String>,
    rows: BTreeMap<i64, Row>,
    next_id: i64,
}

impl MemoryTable {
    fn check_columns(&self, table: &str, values: &ColumnValues) -> StoreResult<()> {
        for col in values.keys() {
            if col == &self.primary_key || !self.columns.contains(col) {
                return Err(StoreError::UnknownColumn { table: table.to_string(), column: col.clone() });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, MemoryTable>,
    provenance: Vec<ProvenanceEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

fn to_value(v: &Option<String>) -> Value {
    match v {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a table. The `{name}_id` primary key column is added first.
    pub fn create_table(&self, name: &str, columns: &[&str]) {
        let primary_key = format!("{name}_id");
        let mut cols = vec![primary_key.clone()];
        cols.extend(columns.iter().filter(|c| **c != primary_key).map(|c| c.to_string()));
        let table = MemoryTable { primary_key, columns: cols, rows: BTreeMap::new(), next_id: 1 };
        self.inner.write().tables.insert(name.to_string(), table);
    }

    /// Snapshot of the provenance log, oldest first.
    pub fn provenance(&self) -> Vec<ProvenanceEntry> {
        self.inner.read().provenance.clone()
    }

    pub fn row_count(&self, name: &str) -> usize {
        self.inner.read().tables.get(name).map(|t| t.rows.len()).unwrap_or(0)
    }

    fn stamp(inner: &mut Inner, entity: &EntityId, action: Action, record_id: i64, actor: &ActorContext) {
        inner.provenance.push(ProvenanceEntry {
            entity: entity.as_str().to_string(),
            action,
            record_id,
            actor_login: actor.login.clone(),
            actor_role: actor.role.clone(),
            recorded_at: Utc::now(),
        });
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn query(&self, entity: &EntityId, limit: usize) -> StoreResult<Vec<Row>> {
        let inner = self.inner.read();
        let table = inner.tables.get(entity.as_str()).ok_or_else(|| StoreError::UnknownTable(entity.to_string()))?;
        Ok(table.rows.values().take(limit).cloned().collect())
    }

    async fn columns_of(&self, entity: &EntityId) -> StoreResult<Vec<String>> {
        let inner = self.inner.read();
        let table = inner.tables.get(entity.as_str()).ok_or_else(|| StoreError::UnknownTable(entity.to_string()))?;
        Ok(table.columns.clone())
    }

    async fn fetch(&self, entity: &EntityId, pk: i64) -> StoreResult<Option<Row>> {
        let inner = self.inner.read();
        let table = inner.tables.get(entity.as_str()).ok_or_else(|| StoreError::UnknownTable(entity.to_string()))?;
        Ok(table.rows.get(&pk).cloned())
    }

    async fn insert(&self, entity: &EntityId, values: &ColumnValues, actor: &ActorContext) -> StoreResult<i64> {
        let mut inner = self.inner.write();
        let table = inner.tables.get_mut(entity.as_str()).ok_or_else(|| StoreError::UnknownTable(entity.to_string()))?;
        table.check_columns(entity.as_str(), values)?;
        let id = table.next_id;
        table.next_id += 1;
        let mut row = Row::new();
        for col in &table.columns {
            let v = if col == &table.primary_key {
                Value::from(id)
            } else {
                values.get(col).map(to_value).unwrap_or(Value::Null)
            };
            row.insert(col.clone(), v);
        }
        table.rows.insert(id, row);
        Self::stamp(&mut inner, entity, Action::Create, id, actor);
        debug!(target: "tablegate::storage", entity = %entity, id, "memory insert");
        Ok(id)
    }

    async fn update(&self, entity: &EntityId, pk: i64, values: &ColumnValues, actor: &ActorContext) -> StoreResult<u64> {
        let mut inner = self.inner.write();
        let table = inner.tables.get_mut(entity.as_str()).ok_or_else(|| StoreError::UnknownTable(entity.to_string()))?;
        table.check_columns(entity.as_str(), values)?;
        let Some(row) = table.rows.get_mut(&pk) else { return Ok(0) };
        for (col, v) in values {
            row.insert(col.clone(), to_value(v));
        }
        Self::stamp(&mut inner, entity, Action::Update, pk, actor);
        Ok(1)
    }

    async fn delete(&self, entity: &EntityId, pk: i64, actor: &ActorContext) -> StoreResult<u64> {
        let mut inner = self.inner.write();
        let table = inner.tables.get_mut(entity.as_str()).ok_or_else(|| StoreError::UnknownTable(entity.to_string()))?;
        if table.rows.remove(&pk).is_none() {
            return Ok(0);
        }
        Self::stamp(&mut inner, entity, Action::Delete, pk, actor);
        Ok(1)
    }
}

/// Credentials held in memory as argon2 PHC strings.
pub struct MemoryCredentialStore {
    records: HashMap<String, CredentialRecord>,
    decoy: String,
}

impl MemoryCredentialStore {
    pub fn new() -> Result<Self, SecurityError> {
        let mut seed = [0u8; 24];
        getrandom::getrandom(&mut seed).map_err(|e| SecurityError::Random(e.to_string()))?;
        let decoy = security::hash_password(&format!("{seed:?}"))?;
        Ok(Self { records: HashMap::new(), decoy })
    }

    /// Register an identity, hashing `password`. Replaces any record with the same login.
    pub fn add(&mut self, identity: Identity, password: &str) -> Result<(), SecurityError> {
        let password_hash = security::hash_password(password)?;
        self.records.insert(identity.login.clone(), CredentialRecord { identity, password_hash });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_identity_by_login(&self, login: &str) -> StoreResult<Option<CredentialRecord>> {
        Ok(self.records.get(login).cloned())
    }

    async fn verify_password(&self, password_hash: &str, password: &str) -> StoreResult<bool> {
        let hash = password_hash.to_string();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || security::verify_password(&hash, &password))
            .await
            .map_err(|e| StoreError::Backend(format!("password check task failed: {e}")))
    }

    fn decoy_hash(&self) -> &str {
        &self.decoy
    }
}

/// Demo data for running without a database: one table per matrix entity and one account
/// per role whose password equals its login.
pub fn seed_demo(matrix: &PermissionMatrix) -> Result<(MemoryStore, MemoryCredentialStore), SecurityError> {
    let store = MemoryStore::new();
    for entity in matrix.entities() {
        store.create_table(entity, &["name", "notes"]);
    }
    let mut creds = MemoryCredentialStore::new()?;
    let mut roles: Vec<&str> = matrix.roles().collect();
    roles.sort_unstable();
    for (i, role) in roles.into_iter().enumerate() {
        creds.add(Identity::new(i as i64 + 1, role, role), role)?;
        warn!(target: "tablegate::storage", login = role, "demo account created; password equals login");
    }
    Ok((store, creds))
}

//! PostgreSQL backends for the record and credential stores.
//!
//! Entity and column names reach SQL only through [`quote_ident`], after the entity has been
//! resolved against the permission matrix. Values always travel as bound parameters; inserts
//! and updates route them through `json_populate_record` so the server coerces text into
//! each column's declared type.
//!
//! Mutations run in one transaction that first publishes the actor via
//! `set_config('app.current_role' | 'app.current_login', _, true)` (visible to triggers and
//! row-level policies) and then writes one provenance row:
//!
//! ```sql
//! CREATE TABLE audit_log (
//!     audit_log_id bigserial PRIMARY KEY,
//!     entity       text        NOT NULL,
//!     action       text        NOT NULL,
//!     record_id    bigint      NOT NULL,
//!     actor_login  text        NOT NULL,
//!     actor_role   text        NOT NULL,
//!     recorded_at  timestamptz NOT NULL DEFAULT now()
//! );
//! ```

use async_trait::async_trait;
use tokio_postgres::error::SqlState;
use tokio_postgres::Transaction;
use tracing::{debug, warn};

use super::pool::PgPool;
use super::{quote_ident, ColumnValues, CredentialRecord, CredentialStore, RecordStore, Row, StoreError, StoreResult};
use crate::access::{Action, EntityId};
use crate::identity::{ActorContext, Identity};

fn map_pg(entity: &EntityId, err: tokio_postgres::Error) -> StoreError {
    if err.code() == Some(&SqlState::UNDEFINED_TABLE) {
        return StoreError::UnknownTable(entity.to_string());
    }
    StoreError::Postgres(err)
}

fn values_json(values: &ColumnValues) -> StoreResult<String> {
    let obj: serde_json::Map<String, serde_json::Value> = values
        .iter()
        .map(|(k, v)| (k.clone(), v.clone().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null)))
        .collect();
    Ok(serde_json::to_string(&obj)?)
}

fn column_list(values: &ColumnValues) -> StoreResult<String> {
    let cols = values.keys().map(|c| quote_ident(c)).collect::<StoreResult<Vec<_>>>()?;
    Ok(cols.join(", "))
}

pub struct PgRecordStore {
    pool: PgPool,
    provenance_table: String,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, provenance_table: &str) -> StoreResult<Self> {
        Ok(Self { pool, provenance_table: quote_ident(provenance_table)? })
    }

    async fn stamp_actor(tx: &Transaction<'_>, actor: &ActorContext) -> StoreResult<()> {
        tx.execute(
            "SELECT set_config('app.current_role', $1, true), set_config('app.current_login', $2, true)",
            &[&actor.role, &actor.login],
        )
        .await?;
        Ok(())
    }

    async fn record_provenance(
        &self,
        tx: &Transaction<'_>,
        entity: &EntityId,
        action: Action,
        record_id: i64,
        actor: &ActorContext,
    ) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} (entity, action, record_id, actor_login, actor_role) VALUES ($1, $2, $3, $4, $5)",
            self.provenance_table
        );
        tx.execute(&sql, &[&entity.as_str(), &action.code(), &record_id, &actor.login, &actor.role]).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn query(&self, entity: &EntityId, limit: usize) -> StoreResult<Vec<Row>> {
        let table = quote_ident(entity.as_str())?;
        let sql = format!("SELECT row_to_json(t)::text FROM {table} t LIMIT $1");
        let client = self.pool.get().await?;
        let rows = client.query(&sql, &[&(limit as i64)]).await.map_err(|e| map_pg(entity, e))?;
        rows.iter()
            .map(|r| -> StoreResult<Row> { Ok(serde_json::from_str(r.try_get::<_, &str>(0)?)?) })
            .collect()
    }

    async fn columns_of(&self, entity: &EntityId) -> StoreResult<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name::text = $1 ORDER BY ordinal_position",
                &[&entity.as_str()],
            )
            .await?;
        if rows.is_empty() {
            return Err(StoreError::UnknownTable(entity.to_string()));
        }
        rows.iter().map(|r| -> StoreResult<String> { Ok(r.try_get(0)?) }).collect()
    }

    async fn fetch(&self, entity: &EntityId, pk: i64) -> StoreResult<Option<Row>> {
        let table = quote_ident(entity.as_str())?;
        let pk_col = quote_ident(&entity.primary_key())?;
        let sql = format!("SELECT row_to_json(t)::text FROM {table} t WHERE {pk_col} = $1::bigint");
        let client = self.pool.get().await?;
        let row = client.query_opt(&sql, &[&pk]).await.map_err(|e| map_pg(entity, e))?;
        match row {
            Some(r) => Ok(Some(serde_json::from_str::<Row>(r.try_get::<_, &str>(0)?)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, entity: &EntityId, values: &ColumnValues, actor: &ActorContext) -> StoreResult<i64> {
        let table = quote_ident(entity.as_str())?;
        let pk_col = quote_ident(&entity.primary_key())?;
        let cols = column_list(values)?;
        let sql = format!(
            "INSERT INTO {table} ({cols}) SELECT {cols} FROM json_populate_record(NULL::{table}, $1::text::json) \
             RETURNING {pk_col}::bigint"
        );
        let payload = values_json(values)?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        Self::stamp_actor(&tx, actor).await?;
        let row = tx.query_one(&sql, &[&payload]).await.map_err(|e| map_pg(entity, e))?;
        let id: i64 = row.try_get(0)?;
        self.record_provenance(&tx, entity, Action::Create, id, actor).await?;
        tx.commit().await?;
        debug!(target: "tablegate::storage", entity = %entity, id, "postgres insert");
        Ok(id)
    }

    async fn update(&self, entity: &EntityId, pk: i64, values: &ColumnValues, actor: &ActorContext) -> StoreResult<u64> {
        let table = quote_ident(entity.as_str())?;
        let pk_col = quote_ident(&entity.primary_key())?;
        let cols = column_list(values)?;
        let sql = format!(
            "UPDATE {table} SET ({cols}) = (SELECT {cols} FROM json_populate_record(NULL::{table}, $1::text::json)) \
             WHERE {pk_col} = $2::bigint"
        );
        let payload = values_json(values)?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        Self::stamp_actor(&tx, actor).await?;
        let changed = tx.execute(&sql, &[&payload, &pk]).await.map_err(|e| map_pg(entity, e))?;
        if changed > 0 {
            self.record_provenance(&tx, entity, Action::Update, pk, actor).await?;
        }
        tx.commit().await?;
        Ok(changed)
    }

    async fn delete(&self, entity: &EntityId, pk: i64, actor: &ActorContext) -> StoreResult<u64> {
        let table = quote_ident(entity.as_str())?;
        let pk_col = quote_ident(&entity.primary_key())?;
        let sql = format!("DELETE FROM {table} WHERE {pk_col} = $1::bigint");

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        Self::stamp_actor(&tx, actor).await?;
        let changed = tx.execute(&sql, &[&pk]).await.map_err(|e| map_pg(entity, e))?;
        if changed > 0 {
            self.record_provenance(&tx, entity, Action::Delete, pk, actor).await?;
        }
        tx.commit().await?;
        Ok(changed)
    }
}

/// Credentials from the `employee` table, compared server-side with pgcrypto's `crypt`.
pub struct PgCredentialStore {
    pool: PgPool,
    decoy: String,
}

impl PgCredentialStore {
    /// Connects once to derive a bcrypt decoy hash for unknown logins.
    pub async fn connect(pool: PgPool) -> StoreResult<Self> {
        let mut seed = [0u8; 24];
        getrandom::getrandom(&mut seed).map_err(|e| StoreError::Backend(e.to_string()))?;
        let seed_text: String = seed.iter().map(|b| format!("{b:02x}")).collect();
        let decoy: String = {
            let client = pool.get().await?;
            client.query_one("SELECT crypt($1, gen_salt('bf'))", &[&seed_text]).await?.try_get(0)?
        };
        Ok(Self { pool, decoy })
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_identity_by_login(&self, login: &str) -> StoreResult<Option<CredentialRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT employee_id::bigint, login::text, role::text, password_hash::text FROM employee WHERE login::text = $1",
                &[&login],
            )
            .await?;
        if rows.len() > 1 {
            warn!(target: "tablegate::storage", login, "login matches more than one employee row; refusing");
            return Ok(None);
        }
        let Some(r) = rows.first() else { return Ok(None) };
        Ok(Some(CredentialRecord {
            identity: Identity { identity_id: r.try_get(0)?, login: r.try_get(1)?, role: r.try_get(2)? },
            password_hash: r.try_get(3)?,
        }))
    }

    async fn verify_password(&self, password_hash: &str, password: &str) -> StoreResult<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT crypt($1::text, $2::text) = $2::text", &[&password, &password_hash])
            .await?;
        Ok(row.try_get::<_, Option<bool>>(0)?.unwrap_or(false))
    }

    fn decoy_hash(&self) -> &str {
        &self.decoy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_become_json_with_nulls() {
        let mut v = ColumnValues::new();
        v.insert("status".into(), Some("open".into()));
        v.insert("cost".into(), None);
        assert_eq!(values_json(&v).unwrap(), r#"{"cost":null,"status":"open"}"#);
        assert_eq!(column_list(&v).unwrap(), r#""cost", "status""#);
    }

    #[test]
    fn hostile_column_names_never_reach_sql() {
        let mut v = ColumnValues::new();
        v.insert("status\" = 'x'; --".into(), None);
        assert!(matches!(column_list(&v), Err(StoreError::InvalidIdentifier(_))));
    }
}

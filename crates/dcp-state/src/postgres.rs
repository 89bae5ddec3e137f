//! # Postgres Leasable Store
//!
//! A [`LeasableStore`] over one shared table, `dcp_stateful_entities`,
//! keyed by `(kind, id)`. The entity is stored as a JSONB body; `state`,
//! `state_timestamp` and the lease columns are projected out so that claims
//! can filter, order and lock on them.
//!
//! ## Atomicity
//!
//! - `next_not_leased` is a single `UPDATE ... WHERE (kind, id) IN (SELECT
//!   ... FOR UPDATE SKIP LOCKED) RETURNING` statement. Two instances racing
//!   on the same rows each skip the rows the other has locked.
//! - `save`, `update`, `delete_by_id` and `break_lease` carry the lease
//!   check in their `WHERE` clause. Zero affected rows is followed by a
//!   lookup to tell `NotFound` from `LeaseViolation`.
//!
//! `query` filters in-process with [`QuerySpec`] after loading every row of
//! the entity kind.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dcp_core::{QuerySpec, SharedClock, Stateful, StoreError, SystemClock};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;

use crate::store::{LeasableStore, StateFilter, DEFAULT_LEASE_DURATION_SECS};

/// Connect to Postgres and apply the embedded migrations.
pub async fn init_pool(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

#[derive(sqlx::FromRow)]
struct EntityRow {
    body: Json<Value>,
    leased_by: Option<String>,
    lease_expiry: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct LeaseRow {
    leased_by: Option<String>,
}

/// Postgres store handle for entity type `T`, bound to one owner.
pub struct PostgresStore<T: Stateful> {
    pool: PgPool,
    owner: String,
    lease_duration: Duration,
    clock: SharedClock,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Stateful> Clone for PostgresStore<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            owner: self.owner.clone(),
            lease_duration: self.lease_duration,
            clock: Arc::clone(&self.clock),
            _entity: PhantomData,
        }
    }
}

impl<T: Stateful> std::fmt::Debug for PostgresStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("kind", &T::KIND)
            .field("owner", &self.owner)
            .field("lease_duration", &self.lease_duration)
            .finish()
    }
}

impl<T: Stateful> PostgresStore<T> {
    pub fn new(pool: PgPool, owner: impl Into<String>) -> Self {
        Self {
            pool,
            owner: owner.into(),
            lease_duration: Duration::seconds(DEFAULT_LEASE_DURATION_SECS),
            clock: Arc::new(SystemClock),
            _entity: PhantomData,
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    fn decode(row: EntityRow) -> Result<T, StoreError> {
        let mut entity: T = serde_json::from_value(row.body.0)?;
        let e = entity.entity_mut();
        e.leased_by = row.leased_by;
        e.lease_expiry = row.lease_expiry;
        Ok(entity)
    }

    fn encode(entity: &T) -> Result<Value, StoreError> {
        let mut copy = entity.clone();
        copy.entity_mut().clear_lease();
        Ok(serde_json::to_value(&copy)?)
    }

    /// Explain a zero-row write: the entity is missing or leased by another owner.
    async fn write_rejected(&self, id: &str) -> StoreError {
        let row = sqlx::query_as::<_, LeaseRow>(
            "SELECT leased_by FROM dcp_stateful_entities WHERE kind = $1 AND id = $2",
        )
        .bind(T::KIND)
        .bind(id)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(lease)) => StoreError::LeaseViolation {
                id: id.to_string(),
                leased_by: lease.leased_by.unwrap_or_default(),
            },
            Ok(None) => StoreError::NotFound { id: id.to_string() },
            Err(e) => db_error(e),
        }
    }

    async fn upsert(
        &self,
        entity: &T,
        lease: Option<(&str, DateTime<Utc>)>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let e = entity.entity();
        let body = Self::encode(entity)?;
        let (leased_by, lease_expiry) = match lease {
            Some((owner, expiry)) => (Some(owner), Some(expiry)),
            None => (None, None),
        };

        let result = sqlx::query(
            "INSERT INTO dcp_stateful_entities
                (kind, id, state, state_timestamp, leased_by, lease_expiry, body, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (kind, id) DO UPDATE SET
                state = EXCLUDED.state,
                state_timestamp = EXCLUDED.state_timestamp,
                leased_by = EXCLUDED.leased_by,
                lease_expiry = EXCLUDED.lease_expiry,
                body = EXCLUDED.body,
                updated_at = EXCLUDED.updated_at
             WHERE dcp_stateful_entities.leased_by IS NULL
                OR dcp_stateful_entities.leased_by = $10
                OR dcp_stateful_entities.lease_expiry IS NULL
                OR dcp_stateful_entities.lease_expiry <= $11",
        )
        .bind(T::KIND)
        .bind(&e.id)
        .bind(e.state)
        .bind(e.state_timestamp)
        .bind(leased_by)
        .bind(lease_expiry)
        .bind(Json(body))
        .bind(e.created_at)
        .bind(e.updated_at)
        .bind(&self.owner)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(self.write_rejected(&e.id).await);
        }
        Ok(())
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    tracing::error!(error = %e, "entity store query failed");
    StoreError::Persistence(e.to_string())
}

#[async_trait]
impl<T: Stateful> LeasableStore<T> for PostgresStore<T> {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn save(&self, entity: &T) -> Result<(), StoreError> {
        self.upsert(entity, None).await
    }

    async fn create(&self, entity: &T) -> Result<(), StoreError> {
        let e = entity.entity();
        let body = Self::encode(entity)?;
        let result = sqlx::query(
            "INSERT INTO dcp_stateful_entities
                (kind, id, state, state_timestamp, leased_by, lease_expiry, body, created_at, updated_at)
             VALUES ($1, $2, $3, $4, NULL, NULL, $5, $6, $7)
             ON CONFLICT (kind, id) DO NOTHING",
        )
        .bind(T::KIND)
        .bind(&e.id)
        .bind(e.state)
        .bind(e.state_timestamp)
        .bind(Json(body))
        .bind(e.created_at)
        .bind(e.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists { id: e.id.clone() });
        }
        Ok(())
    }

    async fn update(&self, entity: &T) -> Result<(), StoreError> {
        let expiry = self.clock.now() + self.lease_duration;
        self.upsert(entity, Some((self.owner.as_str(), expiry))).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<T>, StoreError> {
        let row = sqlx::query_as::<_, EntityRow>(
            "SELECT body, leased_by, lease_expiry FROM dcp_stateful_entities
             WHERE kind = $1 AND id = $2",
        )
        .bind(T::KIND)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Self::decode).transpose()
    }

    async fn find_by_id_and_lease(&self, id: &str) -> Result<T, StoreError> {
        let now = self.clock.now();
        let row = sqlx::query_as::<_, EntityRow>(
            "UPDATE dcp_stateful_entities
             SET leased_by = $3, lease_expiry = $4
             WHERE kind = $1 AND id = $2
               AND (leased_by IS NULL OR leased_by = $3 OR lease_expiry IS NULL OR lease_expiry <= $5)
             RETURNING body, leased_by, lease_expiry",
        )
        .bind(T::KIND)
        .bind(id)
        .bind(&self.owner)
        .bind(now + self.lease_duration)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => Self::decode(row),
            None => Err(self.write_rejected(id).await),
        }
    }

    async fn next_not_leased(
        &self,
        limit: usize,
        filter: &StateFilter,
    ) -> Result<Vec<T>, StoreError> {
        let now = self.clock.now();
        let rows = sqlx::query_as::<_, EntityRow>(
            "UPDATE dcp_stateful_entities
             SET leased_by = $1, lease_expiry = $2
             WHERE (kind, id) IN (
                 SELECT kind, id FROM dcp_stateful_entities
                 WHERE kind = $3
                   AND (cardinality($4::int4[]) = 0 OR state = ANY($4))
                   AND (leased_by IS NULL OR lease_expiry IS NULL OR lease_expiry <= $5)
                 ORDER BY state_timestamp, id
                 LIMIT $6
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING body, leased_by, lease_expiry",
        )
        .bind(&self.owner)
        .bind(now + self.lease_duration)
        .bind(T::KIND)
        .bind(filter.states().to_vec())
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        // RETURNING does not preserve the subquery order.
        let mut claimed = rows
            .into_iter()
            .map(Self::decode)
            .collect::<Result<Vec<T>, StoreError>>()?;
        claimed.sort_by(|a, b| {
            let (ea, eb) = (a.entity(), b.entity());
            (ea.state_timestamp, &ea.id).cmp(&(eb.state_timestamp, &eb.id))
        });
        Ok(claimed)
    }

    async fn query(&self, spec: &QuerySpec) -> Result<Vec<T>, StoreError> {
        let rows = sqlx::query_as::<_, EntityRow>(
            "SELECT body, leased_by, lease_expiry FROM dcp_stateful_entities
             WHERE kind = $1 ORDER BY id",
        )
        .bind(T::KIND)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let items = rows
            .into_iter()
            .map(|row| {
                let entity = Self::decode(row)?;
                Ok((serde_json::to_value(&entity)?, entity))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(spec.apply(items))
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "DELETE FROM dcp_stateful_entities
             WHERE kind = $1 AND id = $2
               AND (leased_by IS NULL OR leased_by = $3 OR lease_expiry IS NULL OR lease_expiry <= $4)",
        )
        .bind(T::KIND)
        .bind(id)
        .bind(&self.owner)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(self.write_rejected(id).await);
        }
        Ok(())
    }

    async fn break_lease(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE dcp_stateful_entities
             SET leased_by = NULL, lease_expiry = NULL
             WHERE kind = $1 AND id = $2
               AND (leased_by IS NULL OR leased_by = $3 OR lease_expiry IS NULL OR lease_expiry <= $4)",
        )
        .bind(T::KIND)
        .bind(id)
        .bind(&self.owner)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(self.write_rejected(id).await);
        }
        Ok(())
    }
}

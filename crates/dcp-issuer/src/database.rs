//! # Database Attestation Source
//!
//! Claims from one Postgres row keyed by the holder id. Every column of the
//! row becomes a claim under its column name.
//!
//! Configuration: `tableName` (required), `idColumn` (default
//! `holder_id`), `required` (default `true`). Table and column names are
//! interpolated into SQL, so both must be plain identifiers (a table may
//! be schema-qualified).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::attestation::{
    optional_bool, required_str, AttestationContext, AttestationError, AttestationSource,
    AttestationSourceFactory, Claims,
};
use crate::definition::AttestationDefinition;

pub const DATABASE_ATTESTATION_TYPE: &str = "database";

const DEFAULT_ID_COLUMN: &str = "holder_id";

/// Whether `name` is a plain SQL identifier: a letter or underscore
/// followed by letters, digits and underscores, at most 63 bytes.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_table_name(name: &str) -> bool {
    match name.split_once('.') {
        Some((schema, table)) => is_identifier(schema) && is_identifier(table),
        None => is_identifier(name),
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseAttestationSource {
    pool: PgPool,
    query: String,
    required: bool,
}

impl DatabaseAttestationSource {
    pub fn new(
        pool: PgPool,
        table_name: &str,
        id_column: &str,
        required: bool,
    ) -> Result<Self, AttestationError> {
        if !is_table_name(table_name) {
            return Err(AttestationError::Configuration(format!(
                "invalid table name '{table_name}'"
            )));
        }
        if !is_identifier(id_column) {
            return Err(AttestationError::Configuration(format!(
                "invalid id column '{id_column}'"
            )));
        }
        Ok(Self {
            pool,
            query: format!(
                "SELECT to_jsonb(t) AS row FROM {table_name} t WHERE t.{id_column}::text = $1 LIMIT 1"
            ),
            required,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

#[derive(sqlx::FromRow)]
struct AttestationRow {
    row: Json<Value>,
}

#[async_trait]
impl AttestationSource for DatabaseAttestationSource {
    async fn execute(&self, context: &AttestationContext<'_>) -> Result<Claims, AttestationError> {
        let row = sqlx::query_as::<_, AttestationRow>(&self.query)
            .bind(context.holder_id())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AttestationError::Source(format!("attestation query failed: {e}")))?;

        match row.map(|r| r.row.0) {
            Some(Value::Object(columns)) => Ok(columns),
            Some(other) => Err(AttestationError::Source(format!(
                "attestation row is not an object: {other}"
            ))),
            None if self.required => Err(AttestationError::Source(format!(
                "No attestation record found for holder '{}'",
                context.holder_id()
            ))),
            None => Ok(Claims::new()),
        }
    }
}

/// Builds [`DatabaseAttestationSource`]s on a shared pool.
pub struct DatabaseAttestationFactory {
    pool: PgPool,
}

impl DatabaseAttestationFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AttestationSourceFactory for DatabaseAttestationFactory {
    fn create(
        &self,
        definition: &AttestationDefinition,
    ) -> Result<Arc<dyn AttestationSource>, AttestationError> {
        let table_name = required_str(definition, "tableName")?;
        let id_column = definition
            .configuration
            .get("idColumn")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ID_COLUMN);
        let source = DatabaseAttestationSource::new(
            self.pool.clone(),
            table_name,
            id_column,
            optional_bool(definition, "required", true),
        )?;
        Ok(Arc::new(source))
    }
}

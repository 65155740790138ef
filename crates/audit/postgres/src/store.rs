use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use jejak_audit::error::AuditError;
use jejak_audit::record::{AuditPage, AuditQuery, AuditRecord, StoreStats};
use jejak_audit::store::AuditStore;

use crate::config::{PostgresAuditConfig, table_name};
use crate::migrations;

/// Rows per multi-row INSERT. Thirteen binds per row keeps each statement
/// well under the Postgres limit of 65535 parameters.
const INSERT_CHUNK: usize = 1000;

const COLUMNS: &str = "id, entity_type, entity_id, action, actor_id, actor_type, \
     before_value, after_value, delta, metadata, origin_address, origin_client, created_at";

/// Postgres-backed audit store using `sqlx`.
pub struct PostgresAuditStore {
    pool: PgPool,
    table: String,
}

impl PostgresAuditStore {
    /// Create a new store, connecting to Postgres and running migrations.
    pub async fn new(config: &PostgresAuditConfig) -> Result<Self, AuditError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(|e| AuditError::Storage(e.to_string()))?;

        Self::from_pool(pool, &config.prefix).await
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: PgPool, prefix: &str) -> Result<Self, AuditError> {
        migrations::run_migrations(&pool, prefix)
            .await
            .map_err(|e| AuditError::Storage(e.to_string()))?;

        Ok(Self {
            pool,
            table: table_name(prefix),
        })
    }

    /// The audit table this store reads and writes.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Map a sqlx error, surfacing unique violations as [`AuditError::DuplicateKey`].
fn map_err(e: sqlx::Error) -> AuditError {
    if let Some(db) = e.as_database_error()
        && db.is_unique_violation()
    {
        return AuditError::DuplicateKey(db.message().to_owned());
    }
    AuditError::Storage(e.to_string())
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn insert_batch(&self, records: &[AuditRecord]) -> Result<u64, AuditError> {
        if records.is_empty() {
            return Ok(0);
        }

        // One transaction per batch: a failed chunk leaves nothing behind.
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let mut inserted = 0u64;

        for chunk in records.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({COLUMNS}) ", self.table));
            qb.push_values(chunk, |mut row, rec| {
                row.push_bind(&rec.id)
                    .push_bind(&rec.entity_type)
                    .push_bind(&rec.entity_id)
                    .push_bind(&rec.action)
                    .push_bind(&rec.actor_id)
                    .push_bind(&rec.actor_type)
                    .push_bind(&rec.before_value)
                    .push_bind(&rec.after_value)
                    .push_bind(&rec.delta)
                    .push_bind(&rec.metadata)
                    .push_bind(&rec.origin_address)
                    .push_bind(&rec.origin_client)
                    .push_bind(rec.created_at);
            });
            qb.push(" ON CONFLICT (id) DO NOTHING");

            let result = qb.build().execute(&mut *tx).await.map_err(map_err)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(map_err)?;
        debug!(batch = records.len(), inserted, "audit batch inserted");
        Ok(inserted)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<AuditRecord>, AuditError> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = $1", self.table);

        let row = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(row.map(Into::into))
    }

    async fn query(&self, query: &AuditQuery) -> Result<AuditPage, AuditError> {
        let limit = query.effective_limit();
        let offset = query.offset();
        let (where_clause, binds, bind_idx) = build_where_clause(query);

        // Count query.
        let count_sql = format!("SELECT COUNT(*) FROM {} {where_clause}", self.table);
        let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
        for b in &binds {
            count_q = count_q.bind(b);
        }
        if let Some(from) = query.from {
            count_q = count_q.bind(from);
        }
        if let Some(to) = query.to {
            count_q = count_q.bind(to);
        }

        let total = count_q.fetch_one(&self.pool).await.map_err(map_err)?;

        // Data query.
        let limit_idx = bind_idx;
        let offset_idx = bind_idx + 1;
        let data_sql = format!(
            "SELECT {COLUMNS} FROM {} {where_clause} ORDER BY created_at DESC, id DESC LIMIT ${limit_idx} OFFSET ${offset_idx}",
            self.table
        );

        let mut data_q = sqlx::query_as::<_, AuditRow>(&data_sql);
        for b in &binds {
            data_q = data_q.bind(b);
        }
        if let Some(from) = query.from {
            data_q = data_q.bind(from);
        }
        if let Some(to) = query.to {
            data_q = data_q.bind(to);
        }
        data_q = data_q.bind(i64::from(limit));
        data_q = data_q.bind(i64::try_from(offset).unwrap_or(i64::MAX));

        let rows: Vec<AuditRow> = data_q.fetch_all(&self.pool).await.map_err(map_err)?;
        let records = rows.into_iter().map(Into::into).collect();

        Ok(AuditPage {
            records,
            total: to_u64(total),
            page: query.effective_page(),
            limit,
        })
    }

    async fn entity_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: u32,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE entity_type = $1 AND entity_id = $2 \
             ORDER BY created_at DESC, id DESC LIMIT $3",
            self.table
        );

        let rows = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(entity_type)
            .bind(entity_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE created_at < $1", self.table);

        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(to_u64(count))
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, AuditError> {
        // Postgres has no DELETE ... LIMIT; bound the page through the key.
        let sql = format!(
            "DELETE FROM {t} WHERE id IN (\
                SELECT id FROM {t} WHERE created_at < $1 ORDER BY created_at LIMIT $2\
             )",
            t = self.table
        );

        let result = sqlx::query(&sql)
            .bind(cutoff)
            .bind(i64::from(limit))
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(result.rows_affected())
    }

    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats, AuditError> {
        let sql = format!(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at), \
             COUNT(*) FILTER (WHERE created_at < $1) FROM {}",
            self.table
        );

        let (total, oldest, newest, eligible) =
            sqlx::query_as::<_, (i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>, i64)>(&sql)
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;

        Ok(StoreStats {
            total: to_u64(total),
            oldest,
            newest,
            eligible: to_u64(eligible),
        })
    }
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

/// Build the WHERE clause and string bind values for the query.
///
/// Time range binds (`from`, then `to`) follow the string binds. Returns the
/// next free placeholder index.
fn build_where_clause(query: &AuditQuery) -> (String, Vec<String>, u32) {
    let mut conditions = Vec::new();
    let mut bind_idx = 1u32;
    let mut binds: Vec<String> = Vec::new();

    let fields: &[(&Option<String>, &str)] = &[
        (&query.entity_type, "entity_type"),
        (&query.entity_id, "entity_id"),
        (&query.action, "action"),
        (&query.actor_id, "actor_id"),
        (&query.actor_type, "actor_type"),
    ];

    for (value, col) in fields {
        if let Some(v) = value {
            conditions.push(format!("{col} = ${bind_idx}"));
            binds.push(v.clone());
            bind_idx += 1;
        }
    }

    if query.from.is_some() {
        conditions.push(format!("created_at >= ${bind_idx}"));
        bind_idx += 1;
    }
    if query.to.is_some() {
        conditions.push(format!("created_at <= ${bind_idx}"));
        bind_idx += 1;
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (where_clause, binds, bind_idx)
}

/// Internal row type for mapping database rows to `AuditRecord`.
#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    entity_type: String,
    entity_id: String,
    action: String,
    actor_id: String,
    actor_type: String,
    before_value: Option<String>,
    after_value: Option<String>,
    delta: Option<String>,
    metadata: Option<String>,
    origin_address: Option<String>,
    origin_client: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditRecord {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            action: row.action,
            actor_id: row.actor_id,
            actor_type: row.actor_type,
            before_value: row.before_value,
            after_value: row.after_value,
            delta: row.delta,
            metadata: row.metadata,
            origin_address: row.origin_address,
            origin_client: row.origin_client,
            created_at: row.created_at,
        }
    }
}

use sqlx::PgPool;

use crate::config::table_name;

/// Run the audit table migration, creating the table and indexes if they do
/// not already exist.
pub async fn run_migrations(pool: &PgPool, prefix: &str) -> Result<(), sqlx::Error> {
    let table = table_name(prefix);

    // Structured columns hold serialized JSON text, not JSONB: stored values
    // must read back exactly as written.
    let create_table = format!(
        "
        CREATE TABLE IF NOT EXISTS {table} (
            id              TEXT PRIMARY KEY,
            entity_type     TEXT NOT NULL,
            entity_id       TEXT NOT NULL,
            action          TEXT NOT NULL,
            actor_id        TEXT NOT NULL,
            actor_type      TEXT NOT NULL,
            before_value    TEXT,
            after_value     TEXT,
            delta           TEXT,
            metadata        TEXT,
            origin_address  TEXT,
            origin_client   TEXT,
            created_at      TIMESTAMPTZ NOT NULL
        )
        "
    );

    sqlx::query(&create_table).execute(pool).await?;

    let indexes = [
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{prefix}audit_log_entity ON {table} (entity_type, entity_id, created_at DESC)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{prefix}audit_log_created ON {table} (created_at)"),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{prefix}audit_log_actor ON {table} (actor_id, created_at DESC)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{prefix}audit_log_action ON {table} (action, created_at DESC)"
        ),
    ];

    for idx in &indexes {
        sqlx::query(idx).execute(pool).await?;
    }

    Ok(())
}

/// Configuration for the Postgres audit store.
#[derive(Debug, Clone)]
pub struct PostgresAuditConfig {
    /// Postgres connection URL.
    pub url: String,
    /// Table name prefix (e.g. "jejak_").
    pub prefix: String,
    /// Maximum number of pooled connections.
    pub pool_size: u32,
}

impl PostgresAuditConfig {
    /// Create a new configuration with the given URL and defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            prefix: "jejak_".to_owned(),
            pool_size: 10,
        }
    }

    /// Set the table prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the connection pool size.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Fully qualified audit table name.
    pub fn table(&self) -> String {
        table_name(&self.prefix)
    }
}

pub(crate) fn table_name(prefix: &str) -> String {
    format!("{prefix}audit_log")
}

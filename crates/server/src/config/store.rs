use serde::Deserialize;

/// Configuration for the audit store backend.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Which backend to use: `"memory"` or `"postgres"`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    /// Connection URL (required by `postgres`).
    pub url: Option<String>,
    /// Table prefix for the audit backend.
    #[serde(default = "default_store_prefix")]
    pub prefix: String,
    /// Maximum pooled connections for database backends.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: None,
            prefix: default_store_prefix(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_store_backend() -> String {
    "memory".to_owned()
}

fn default_store_prefix() -> String {
    "jejak_".to_owned()
}

fn default_pool_size() -> u32 {
    10
}

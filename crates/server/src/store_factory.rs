use std::sync::Arc;

use jejak_audit::store::AuditStore;
use jejak_audit_memory::MemoryAuditStore;
#[cfg(feature = "postgres")]
use jejak_audit_postgres::{PostgresAuditConfig, PostgresAuditStore};

use crate::config::StoreConfig;
use crate::error::ServerError;

/// Create an audit store from the given configuration.
///
/// Database backends connect and run their migrations here.
#[allow(clippy::unused_async)]
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn AuditStore>, ServerError> {
    let store: Arc<dyn AuditStore> = match config.backend.as_str() {
        "memory" => Arc::new(MemoryAuditStore::new()),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = config.url.as_deref().ok_or_else(|| {
                ServerError::Config("store backend 'postgres' requires [store] url".into())
            })?;

            let pg_config = PostgresAuditConfig::new(url)
                .with_prefix(&config.prefix)
                .with_pool_size(config.pool_size);

            let store = PostgresAuditStore::new(&pg_config)
                .await
                .map_err(|e| ServerError::Config(format!("audit postgres: {e}")))?;

            Arc::new(store)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unsupported store backend '{other}' (is the feature enabled?)"
            )));
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend() {
        let store = create_store(&StoreConfig::default()).await.unwrap();
        let stats = store.stats(chrono::Utc::now()).await.unwrap();
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn unknown_backend_is_config_error() {
        let config = StoreConfig {
            backend: "cassandra".into(),
            ..StoreConfig::default()
        };
        let Err(err) = create_store(&config).await else {
            panic!("expected an error");
        };
        assert!(matches!(err, ServerError::Config(_)));
    }
}

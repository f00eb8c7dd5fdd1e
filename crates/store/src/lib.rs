//! Durable conversation store implementations for promptgate.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use promptgate_config::{StoreBackend, StoreConfig};
use promptgate_core::ConversationStore;
use promptgate_core::error::StoreError;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Open the store selected by `config`.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn ConversationStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),

        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::new(&config.url).await?)),

        #[cfg(feature = "postgres")]
        StoreBackend::Postgres => {
            let store = PostgresStore::connect(&config.url).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }

        #[allow(unreachable_patterns)]
        other => Err(StoreError::Storage(format!(
            "store backend {other:?} not compiled in (enable the matching feature)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_memory_backend() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            url: String::new(),
        };
        let store = open(&config).await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn open_uncompiled_backend_fails() {
        let config = StoreConfig {
            backend: StoreBackend::Postgres,
            url: "postgres://localhost/x".into(),
        };
        assert!(open(&config).await.is_err());
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::{info, warn};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::store::{
    AvailabilityStore, BackendKind, BlobStore, KeyValueStore, RedisKeyValueClient,
    RelationalStore, S3BlobClient,
};
use crate::trace::TraceId;

type Connect =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<Arc<dyn AvailabilityStore>, CacheError>> + Send>;

/// A backend the factory may try, with the deferred work of constructing it
pub struct StoreCandidate {
    /// Which backend this candidate builds
    pub kind: BackendKind,
    connect: Connect,
}

impl StoreCandidate {
    /// Wrap a constructor closure
    pub fn new<F>(kind: BackendKind, connect: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, Result<Arc<dyn AvailabilityStore>, CacheError>>
            + Send
            + 'static,
    {
        Self {
            kind,
            connect: Box::new(connect),
        }
    }
}

/// Try each candidate in order and return the first store that constructs.
///
/// A failing candidate is logged and skipped; when none succeeds the caller
/// gets [`CacheError::NoStoreAvailable`].
pub async fn first_available(
    candidates: Vec<StoreCandidate>,
    trace: &TraceId,
) -> Result<Arc<dyn AvailabilityStore>, CacheError> {
    for candidate in candidates {
        match (candidate.connect)().await {
            Ok(store) => {
                info!(trace_id = %trace, "Using {} cache store", candidate.kind);
                return Ok(store);
            }
            Err(e) => {
                warn!(trace_id = %trace, "Failed to create {} cache store: {}", candidate.kind, e);
            }
        }
    }

    Err(CacheError::NoStoreAvailable)
}

/// Candidates for every enabled backend, in the order Redis, SQL, blob
pub fn configured_candidates(config: &CacheConfig) -> Vec<StoreCandidate> {
    let mut candidates = Vec::new();

    if config.redis.enabled {
        let redis = config.redis.clone();
        candidates.push(StoreCandidate::new(BackendKind::KeyValue, move || {
            Box::pin(async move {
                let url = redis.url.ok_or_else(|| CacheError::StoreUnavailable {
                    backend: BackendKind::KeyValue,
                    reason: "no connection URL configured".to_string(),
                })?;
                let client = RedisKeyValueClient::connect(&url, redis.connect_timeout).await?;
                let store = KeyValueStore::connect(Arc::new(client)).await?;
                Ok(Arc::new(store) as Arc<dyn AvailabilityStore>)
            })
        }));
    }

    if config.sql.enabled {
        let sql = config.sql.clone();
        candidates.push(StoreCandidate::new(BackendKind::Relational, move || {
            Box::pin(async move {
                let store = RelationalStore::connect(&sql).await?;
                Ok(Arc::new(store) as Arc<dyn AvailabilityStore>)
            })
        }));
    }

    if config.blob.enabled {
        let blob = config.blob.clone();
        candidates.push(StoreCandidate::new(BackendKind::Blob, move || {
            Box::pin(async move {
                let bucket = blob.bucket.ok_or_else(|| CacheError::StoreUnavailable {
                    backend: BackendKind::Blob,
                    reason: "no bucket configured".to_string(),
                })?;
                let client = S3BlobClient::from_env(bucket).await;
                let store = BlobStore::connect(Arc::new(client), blob.prefix).await?;
                Ok(Arc::new(store) as Arc<dyn AvailabilityStore>)
            })
        }));
    }

    candidates
}

/// Create a store from configuration, falling back Redis, SQL, blob
pub async fn create_store(
    config: &CacheConfig,
    trace: &TraceId,
) -> Result<Arc<dyn AvailabilityStore>, CacheError> {
    first_available(configured_candidates(config), trace).await
}

/// Source of a fresh store for each poll cycle
#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// Construct a store, or report that none is reachable
    async fn create(&self, trace: &TraceId) -> Result<Arc<dyn AvailabilityStore>, CacheError>;
}

/// Provider that runs the configured backend fallback every time
pub struct ConfiguredStoreProvider {
    config: CacheConfig,
}

impl ConfiguredStoreProvider {
    /// Wrap a cache configuration
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreProvider for ConfiguredStoreProvider {
    async fn create(&self, trace: &TraceId) -> Result<Arc<dyn AvailabilityStore>, CacheError> {
        create_store(&self.config, trace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BlobStore, KeyValueStore};
    use crate::testing::{MemoryBlobClient, MemoryKeyValueClient};

    fn key_value_candidate(client: MemoryKeyValueClient) -> StoreCandidate {
        StoreCandidate::new(BackendKind::KeyValue, move || {
            Box::pin(async move {
                let store = KeyValueStore::connect(Arc::new(client)).await?;
                Ok(Arc::new(store) as Arc<dyn AvailabilityStore>)
            })
        })
    }

    fn blob_candidate(client: MemoryBlobClient) -> StoreCandidate {
        StoreCandidate::new(BackendKind::Blob, move || {
            Box::pin(async move {
                let store = BlobStore::connect(Arc::new(client), "availability/").await?;
                Ok(Arc::new(store) as Arc<dyn AvailabilityStore>)
            })
        })
    }

    #[tokio::test]
    async fn test_prefers_first_reachable_backend() {
        let store = first_available(
            vec![
                key_value_candidate(MemoryKeyValueClient::new()),
                blob_candidate(MemoryBlobClient::new()),
            ],
            &TraceId::generate(),
        )
        .await
        .unwrap();

        assert_eq!(store.backend(), BackendKind::KeyValue);
    }

    #[tokio::test]
    async fn test_falls_back_when_key_value_unreachable() {
        let store = first_available(
            vec![
                key_value_candidate(MemoryKeyValueClient::unreachable()),
                blob_candidate(MemoryBlobClient::new()),
            ],
            &TraceId::generate(),
        )
        .await
        .unwrap();

        assert_eq!(store.backend(), BackendKind::Blob);
    }

    #[tokio::test]
    async fn test_no_store_when_every_candidate_fails() {
        let result = first_available(
            vec![
                key_value_candidate(MemoryKeyValueClient::unreachable()),
                blob_candidate(MemoryBlobClient::unreachable()),
            ],
            &TraceId::generate(),
        )
        .await;

        assert!(matches!(result, Err(CacheError::NoStoreAvailable)));
    }

    #[test]
    fn test_disabled_backends_are_skipped() {
        let mut config = CacheConfig::default();
        config.sql.enabled = true;

        let kinds: Vec<BackendKind> = configured_candidates(&config)
            .iter()
            .map(|c| c.kind)
            .collect();
        assert_eq!(kinds, vec![BackendKind::Relational, BackendKind::Blob]);

        config.blob.enabled = false;
        config.sql.enabled = false;
        assert!(configured_candidates(&config).is_empty());
    }

    #[tokio::test]
    async fn test_nothing_enabled_means_no_store() {
        let mut config = CacheConfig::default();
        config.blob.enabled = false;

        let result = create_store(&config, &TraceId::generate()).await;
        assert!(matches!(result, Err(CacheError::NoStoreAvailable)));
    }

    #[tokio::test]
    async fn test_missing_redis_url_falls_through() {
        let mut config = CacheConfig::default();
        config.redis.enabled = true;
        config.blob.enabled = false;

        let result = create_store(&config, &TraceId::generate()).await;
        assert!(matches!(result, Err(CacheError::NoStoreAvailable)));
    }
}

use std::error::Error as StdError;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info, warn};

use super::{AvailabilityStore, BackendKind, Clock, local_now, sort_by_timestamp};
use crate::error::CacheError;
use crate::slot::{Slot, Window};
use crate::trace::TraceId;

/// Whole-object operations the blob store needs
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Connectivity check against the container
    async fn check(&self) -> Result<(), CacheError>;

    /// Object contents, `None` when the object does not exist
    async fn download(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Write the object, replacing any previous version
    async fn upload(&self, name: &str, body: Vec<u8>) -> Result<(), CacheError>;

    /// Remove the object if present
    async fn delete(&self, name: &str) -> Result<(), CacheError>;
}

/// Blob client for one S3 bucket
pub struct S3BlobClient {
    client: S3Client,
    bucket: String,
}

impl S3BlobClient {
    /// Create a client using the default AWS credential chain
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::new(S3Client::new(&config), bucket)
    }

    /// Wrap an existing SDK client
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobClient for S3BlobClient {
    async fn check(&self) -> Result<(), CacheError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| unavailable(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output.body.collect().await.map_err(|e| CacheError::Persistent {
                    backend: BackendKind::Blob,
                    reason: format!("Failed to read {}: {}", name, e),
                })?;
                Ok(Some(data.into_bytes().to_vec()))
            }
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => Ok(None),
            Err(e) => Err(s3_error(e)),
        }
    }

    async fn upload(&self, name: &str, body: Vec<u8>) -> Result<(), CacheError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), CacheError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }
}

/// Availability kept as one JSON document per location.
///
/// Replacing a window rewrites the whole document: past slots and slots in
/// the window are dropped, the new slots appended, and the result sorted.
pub struct BlobStore {
    client: Arc<dyn BlobClient>,
    prefix: String,
    clock: Clock,
}

impl BlobStore {
    /// Wrap a client after checking the container is reachable
    pub async fn connect(
        client: Arc<dyn BlobClient>,
        prefix: impl Into<String>,
    ) -> Result<Self, CacheError> {
        client.check().await.map_err(|e| unavailable(e.to_string()))?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            clock: local_now,
        })
    }

    /// Replace the clock used to decide which slots are in the past
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Object name holding a location's availability
    pub fn blob_name(&self, location_id: i32) -> String {
        format!("{}location_{}.json", self.prefix, location_id)
    }

    async fn read_all(&self, location_id: i32, trace: &TraceId) -> Result<Vec<Slot>, CacheError> {
        let name = self.blob_name(location_id);
        match self.client.download(&name).await? {
            Some(body) => Ok(serde_json::from_slice(&body)?),
            None => {
                warn!(trace_id = %trace, "No cached slots found in blob {}", name);
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl AvailabilityStore for BlobStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Blob
    }

    async fn load_window(&self, window: &Window, trace: &TraceId) -> Result<Vec<Slot>, CacheError> {
        let mut slots: Vec<Slot> = self
            .read_all(window.location_id, trace)
            .await?
            .into_iter()
            .filter(|s| window.contains(&s.timestamp))
            .collect();

        sort_by_timestamp(&mut slots);
        debug!(trace_id = %trace, "Loaded {} cached slots for {}", slots.len(), window);
        Ok(slots)
    }

    async fn replace_window(
        &self,
        window: &Window,
        slots: &[Slot],
        trace: &TraceId,
    ) -> Result<(), CacheError> {
        let now = (self.clock)();
        let mut cached = self.read_all(window.location_id, trace).await?;

        cached.retain(|s| s.timestamp > now && !window.contains(&s.timestamp));
        cached.extend(
            slots
                .iter()
                .filter(|s| s.location_id == window.location_id && window.contains(&s.timestamp))
                .cloned(),
        );
        sort_by_timestamp(&mut cached);

        let name = self.blob_name(window.location_id);
        let body = serde_json::to_vec(&cached)?;
        self.client.upload(&name, body).await?;

        info!(trace_id = %trace, "{} slots cached to blob {}", cached.len(), name);
        Ok(())
    }

    async fn clear(&self, location_id: i32, trace: &TraceId) -> Result<(), CacheError> {
        let name = self.blob_name(location_id);
        info!(trace_id = %trace, "Deleting cached blob {}", name);
        self.client.delete(&name).await
    }
}

fn unavailable(reason: impl Into<String>) -> CacheError {
    CacheError::StoreUnavailable {
        backend: BackendKind::Blob,
        reason: reason.into(),
    }
}

fn s3_error<E, R>(err: SdkError<E, R>) -> CacheError
where
    E: StdError + 'static,
    R: Debug,
{
    let reason = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => CacheError::Transient {
            backend: BackendKind::Blob,
            reason,
        },
        _ => CacheError::Persistent {
            backend: BackendKind::Blob,
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::testing::{MemoryBlobClient, assert_same_slots, dense_week, slot_at};

    fn fixed_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 9)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn tomorrow() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 10).unwrap()
    }

    async fn store_with(client: Arc<MemoryBlobClient>) -> BlobStore {
        BlobStore::connect(client, "availability/")
            .await
            .unwrap()
            .with_clock(fixed_now)
    }

    #[tokio::test]
    async fn test_unreachable_container_fails_to_connect() {
        let result = BlobStore::connect(Arc::new(MemoryBlobClient::unreachable()), "").await;
        assert!(matches!(
            result,
            Err(CacheError::StoreUnavailable {
                backend: BackendKind::Blob,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_document_loads_empty() {
        let store = store_with(Arc::new(MemoryBlobClient::new())).await;
        let window = Window::starting(1234, tomorrow(), 7).unwrap();

        let loaded = store.load_window(&window, &TraceId::generate()).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_single_slot_roundtrip_keeps_every_field() {
        let store = store_with(Arc::new(MemoryBlobClient::new())).await;
        let window = Window::starting(1234, tomorrow(), 7).unwrap();
        let trace = TraceId::generate();
        let slots = vec![slot_at(1234, "2024-07-10T08:00:00", 1)];

        store.replace_window(&window, &slots, &trace).await.unwrap();
        let loaded = store.load_window(&window, &trace).await.unwrap();

        assert_same_slots(&loaded, &slots);
    }

    #[tokio::test]
    async fn test_replace_keeps_future_slots_outside_window() {
        let client = Arc::new(MemoryBlobClient::new());
        let store = store_with(client.clone()).await;
        let trace = TraceId::generate();

        let past = slot_at(1234, "2024-07-09T08:00:00", 1);
        let later = slot_at(1234, "2024-07-20T08:00:00", 1);
        let stale = slot_at(1234, "2024-07-11T09:00:00", 1);
        client.put_json(&store.blob_name(1234), &[past, stale, later.clone()]);

        let window = Window::starting(1234, tomorrow(), 3).unwrap();
        let fresh = slot_at(1234, "2024-07-10T10:00:00", 2);
        store
            .replace_window(&window, std::slice::from_ref(&fresh), &trace)
            .await
            .unwrap();

        let document: Vec<Slot> =
            serde_json::from_slice(&client.object(&store.blob_name(1234)).unwrap()).unwrap();
        assert_eq!(document, vec![fresh, later]);
    }

    #[tokio::test]
    async fn test_replace_ignores_slots_outside_window() {
        let client = Arc::new(MemoryBlobClient::new());
        let store = store_with(client.clone()).await;
        let trace = TraceId::generate();
        let window = Window::starting(1234, tomorrow(), 7).unwrap();

        let inside = slot_at(1234, "2024-07-10T08:00:00", 1);
        let slots = vec![
            inside.clone(),
            slot_at(1234, "2024-07-17T00:00:00", 1),
            slot_at(4321, "2024-07-11T08:00:00", 1),
        ];
        store.replace_window(&window, &slots, &trace).await.unwrap();

        let document: Vec<Slot> =
            serde_json::from_slice(&client.object(&store.blob_name(1234)).unwrap()).unwrap();
        assert_eq!(document, vec![inside]);
    }

    #[tokio::test]
    async fn test_dense_week_roundtrip() {
        let store = store_with(Arc::new(MemoryBlobClient::new())).await;
        let window = Window::starting(1234, tomorrow(), 7).unwrap();
        let trace = TraceId::generate();
        let slots = dense_week(1234, tomorrow());

        store.replace_window(&window, &slots, &trace).await.unwrap();
        let loaded = store.load_window(&window, &trace).await.unwrap();

        assert_same_slots(&loaded, &slots);
    }

    #[tokio::test]
    async fn test_clear_removes_document() {
        let client = Arc::new(MemoryBlobClient::new());
        let store = store_with(client.clone()).await;
        let window = Window::starting(1234, tomorrow(), 1).unwrap();
        let trace = TraceId::generate();

        store
            .replace_window(&window, &[slot_at(1234, "2024-07-10T08:00:00", 1)], &trace)
            .await
            .unwrap();
        store.clear(1234, &trace).await.unwrap();

        assert!(client.object(&store.blob_name(1234)).is_none());
    }
}

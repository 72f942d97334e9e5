//! Resource client trait definitions

use crate::error::ClientResult;
use crate::selector::LabelSelector;
use async_trait::async_trait;
use futures::stream::BoxStream;
use keel_types::DynamicObject;
use serde_json::Value;

/// Change notification delivered by [`ResourceClient::watch`]
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
}

impl WatchEvent {
    pub fn object(&self) -> &DynamicObject {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// Unbounded stream of watch events
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Access to the cluster's stored objects.
///
/// Every call is a single bounded request. Writes carrying a stale
/// `resourceVersion` fail with [`ClientError::Conflict`](crate::ClientError::Conflict);
/// callers are expected to re-read and redo their work rather than retry
/// the write in place.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch one object; absent objects yield `NotFound`
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> ClientResult<DynamicObject>;

    /// List objects of a kind, optionally restricted to one namespace
    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> ClientResult<Vec<DynamicObject>>;

    /// Store a new object; the store assigns uid and version
    async fn create(&self, object: DynamicObject) -> ClientResult<DynamicObject>;

    /// Replace everything except `status`
    async fn update(&self, object: DynamicObject) -> ClientResult<DynamicObject>;

    /// Replace only `status`
    async fn update_status(&self, object: DynamicObject) -> ClientResult<DynamicObject>;

    /// Apply an RFC 7386 JSON merge patch
    async fn patch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> ClientResult<DynamicObject>;

    /// Delete an object; dependents are collected by the platform
    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> ClientResult<()>;

    /// Subscribe to changes of a kind, optionally in one namespace
    async fn watch(&self, kind: &str, namespace: Option<&str>) -> ClientResult<WatchStream>;
}

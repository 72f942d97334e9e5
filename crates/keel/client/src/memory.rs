//! In-memory cluster store
//!
//! Implements the full [`ResourceClient`] contract in process: uids and
//! version tokens, optimistic-concurrency conflicts, a status subresource,
//! JSON merge patches, watch streams and cascading deletion through owner
//! references. Used by tests and by the daemon's standalone mode.

use crate::error::{ClientError, ClientResult};
use crate::selector::LabelSelector;
use crate::traits::{ResourceClient, WatchEvent, WatchStream};
use async_trait::async_trait;
use futures::StreamExt;
use keel_types::{DynamicObject, ObjectKey, Scheme};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const WATCH_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StoreKey {
    kind: String,
    namespace: String,
    name: String,
}

impl StoreKey {
    fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn of(object: &DynamicObject) -> Self {
        Self::new(
            &object.kind,
            &object.metadata.namespace,
            &object.metadata.name,
        )
    }

    fn object_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// Snapshot of write calls served so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub creates: u64,
    pub updates: u64,
    pub status_updates: u64,
    pub patches: u64,
    pub deletes: u64,
}

impl WriteStats {
    pub fn total(&self) -> u64 {
        self.creates + self.updates + self.status_updates + self.patches + self.deletes
    }
}

#[derive(Debug, Default)]
struct WriteCounters {
    creates: AtomicU64,
    updates: AtomicU64,
    status_updates: AtomicU64,
    patches: AtomicU64,
    deletes: AtomicU64,
}

/// In-memory cluster for development and testing
pub struct InMemoryCluster {
    scheme: Arc<Scheme>,
    objects: RwLock<BTreeMap<StoreKey, DynamicObject>>,
    version: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    counters: WriteCounters,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new(Arc::new(Scheme::platform()))
    }
}

impl InMemoryCluster {
    pub fn new(scheme: Arc<Scheme>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            scheme,
            objects: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            events,
            counters: WriteCounters::default(),
        }
    }

    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    /// Write calls served so far, by verb
    pub fn stats(&self) -> WriteStats {
        WriteStats {
            creates: self.counters.creates.load(Ordering::SeqCst),
            updates: self.counters.updates.load(Ordering::SeqCst),
            status_updates: self.counters.status_updates.load(Ordering::SeqCst),
            patches: self.counters.patches.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
        }
    }

    /// Number of stored objects across all kinds
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn emit(&self, event: WatchEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn check_version(key: &StoreKey, sent: &DynamicObject, stored: &DynamicObject) -> ClientResult<()> {
        match (&sent.metadata.resource_version, &stored.metadata.resource_version) {
            (Some(sent), Some(stored)) if sent != stored => Err(ClientError::Conflict {
                kind: key.kind.clone(),
                key: key.object_key(),
                sent: sent.clone(),
                stored: stored.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Remove every object owned (transitively) by `uid`
    fn collect_dependents(&self, objects: &mut BTreeMap<StoreKey, DynamicObject>, uid: String) {
        let mut pending = vec![uid];
        while let Some(owner_uid) = pending.pop() {
            let dependents: Vec<StoreKey> = objects
                .iter()
                .filter(|(_, o)| o.metadata.is_owned_by(&owner_uid))
                .map(|(k, _)| k.clone())
                .collect();

            for key in dependents {
                if let Some(removed) = objects.remove(&key) {
                    tracing::debug!(
                        kind = %key.kind,
                        key = %key.object_key(),
                        owner = %owner_uid,
                        "Garbage collected dependent"
                    );
                    if let Some(uid) = removed.metadata.uid.clone() {
                        pending.push(uid);
                    }
                    self.emit(WatchEvent::Deleted(removed));
                }
            }
        }
    }
}

#[async_trait]
impl ResourceClient for InMemoryCluster {
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> ClientResult<DynamicObject> {
        let key = StoreKey::new(kind, namespace, name);
        let objects = self.objects.read().await;
        objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::not_found(kind, key.object_key()))
    }

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> ClientResult<Vec<DynamicObject>> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .filter(|(k, _)| namespace.map_or(true, |ns| k.namespace == ns))
            .filter(|(_, o)| selector.matches(&o.metadata.labels))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, mut object: DynamicObject) -> ClientResult<DynamicObject> {
        self.scheme.validate(&object)?;
        let key = StoreKey::of(&object);

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists {
                kind: key.kind.clone(),
                key: key.object_key(),
            });
        }

        object.metadata.uid = Some(Uuid::new_v4().to_string());
        object.metadata.resource_version = Some(self.next_version());
        object.metadata.generation = 1;
        object.metadata.creation_timestamp = Some(chrono::Utc::now());

        objects.insert(key, object.clone());
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        self.emit(WatchEvent::Added(object.clone()));

        Ok(object)
    }

    async fn update(&self, mut object: DynamicObject) -> ClientResult<DynamicObject> {
        self.scheme.validate(&object)?;
        let key = StoreKey::of(&object);

        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .ok_or_else(|| ClientError::not_found(&key.kind, key.object_key()))?;
        Self::check_version(&key, &object, stored)?;

        object.data.remove("status");
        if let Some(status) = stored.data.get("status") {
            object.data.insert("status".to_string(), status.clone());
        }
        object.metadata.uid = stored.metadata.uid.clone();
        object.metadata.creation_timestamp = stored.metadata.creation_timestamp;
        object.metadata.generation = if object.content() == stored.content() {
            stored.metadata.generation
        } else {
            stored.metadata.generation + 1
        };
        object.metadata.resource_version = Some(self.next_version());

        objects.insert(key, object.clone());
        self.counters.updates.fetch_add(1, Ordering::SeqCst);
        self.emit(WatchEvent::Modified(object.clone()));

        Ok(object)
    }

    async fn update_status(&self, object: DynamicObject) -> ClientResult<DynamicObject> {
        let key = StoreKey::of(&object);

        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .ok_or_else(|| ClientError::not_found(&key.kind, key.object_key()))?;
        Self::check_version(&key, &object, stored)?;

        let mut updated = stored.clone();
        match object.data.get("status") {
            Some(status) => {
                updated.data.insert("status".to_string(), status.clone());
            }
            None => {
                updated.data.remove("status");
            }
        }
        self.scheme.validate(&updated)?;
        updated.metadata.resource_version = Some(self.next_version());

        objects.insert(key, updated.clone());
        self.counters.status_updates.fetch_add(1, Ordering::SeqCst);
        self.emit(WatchEvent::Modified(updated.clone()));

        Ok(updated)
    }

    async fn patch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> ClientResult<DynamicObject> {
        let key = StoreKey::new(kind, namespace, name);

        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .ok_or_else(|| ClientError::not_found(kind, key.object_key()))?;

        let sent_version = patch
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let (Some(sent), Some(current)) = (&sent_version, &stored.metadata.resource_version) {
            if sent != current {
                return Err(ClientError::Conflict {
                    kind: kind.to_string(),
                    key: key.object_key(),
                    sent: sent.clone(),
                    stored: current.clone(),
                });
            }
        }

        let mut document = serde_json::to_value(stored)?;
        json_patch::merge(&mut document, patch);
        let mut patched: DynamicObject = serde_json::from_value(document)?;

        // Identity is not patchable
        patched.kind = stored.kind.clone();
        patched.api_version = stored.api_version.clone();
        patched.metadata.name = stored.metadata.name.clone();
        patched.metadata.namespace = stored.metadata.namespace.clone();
        patched.metadata.uid = stored.metadata.uid.clone();
        patched.metadata.creation_timestamp = stored.metadata.creation_timestamp;
        self.scheme.validate(&patched)?;

        patched.metadata.generation = if patched.content() == stored.content() {
            stored.metadata.generation
        } else {
            stored.metadata.generation + 1
        };
        patched.metadata.resource_version = Some(self.next_version());

        objects.insert(key, patched.clone());
        self.counters.patches.fetch_add(1, Ordering::SeqCst);
        self.emit(WatchEvent::Modified(patched.clone()));

        Ok(patched)
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> ClientResult<()> {
        let key = StoreKey::new(kind, namespace, name);

        let mut objects = self.objects.write().await;
        let removed = objects
            .remove(&key)
            .ok_or_else(|| ClientError::not_found(kind, key.object_key()))?;
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);

        let uid = removed.metadata.uid.clone();
        self.emit(WatchEvent::Deleted(removed));
        if let Some(uid) = uid {
            self.collect_dependents(&mut objects, uid);
        }

        Ok(())
    }

    async fn watch(&self, kind: &str, namespace: Option<&str>) -> ClientResult<WatchStream> {
        let receiver = self.events.subscribe();
        let kind = kind.to_string();
        let namespace = namespace.map(str::to_string);

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Watch stream lagged; relying on resync");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |event| {
            let object = event.object();
            let matches = object.kind == kind
                && namespace
                    .as_deref()
                    .map_or(true, |ns| object.metadata.namespace == ns);
            futures::future::ready(matches)
        });

        Ok(stream.boxed())
    }
}

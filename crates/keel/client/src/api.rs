//! Typed, namespace-scoped access to one kind

use crate::error::ClientResult;
use crate::selector::LabelSelector;
use crate::traits::ResourceClient;
use keel_types::Resource;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed wrapper over a [`ResourceClient`] for kind `K`
pub struct Api<K> {
    client: Arc<dyn ResourceClient>,
    namespace: Option<String>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for Api<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            namespace: self.namespace.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: Resource> Api<K> {
    /// Scope to a single namespace
    pub fn namespaced(client: Arc<dyn ResourceClient>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: Some(namespace.into()),
            _kind: PhantomData,
        }
    }

    /// Span every namespace; single-object calls target cluster scope
    pub fn all(client: Arc<dyn ResourceClient>) -> Self {
        Self {
            client,
            namespace: None,
            _kind: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }

    pub async fn get(&self, name: &str) -> ClientResult<K> {
        let object = self.client.get(K::KIND, self.namespace(), name).await?;
        Ok(K::from_dynamic(object)?)
    }

    /// Like [`get`](Self::get), mapping `NotFound` to `None`
    pub async fn get_opt(&self, name: &str) -> ClientResult<Option<K>> {
        match self.get(name).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self, selector: &LabelSelector) -> ClientResult<Vec<K>> {
        let objects = self
            .client
            .list(K::KIND, self.namespace.as_deref(), selector)
            .await?;
        objects
            .into_iter()
            .map(|o| K::from_dynamic(o).map_err(Into::into))
            .collect()
    }

    pub async fn create(&self, object: &K) -> ClientResult<K> {
        let created = self.client.create(self.scoped(object)?).await?;
        Ok(K::from_dynamic(created)?)
    }

    pub async fn replace(&self, object: &K) -> ClientResult<K> {
        let updated = self.client.update(self.scoped(object)?).await?;
        Ok(K::from_dynamic(updated)?)
    }

    pub async fn replace_status(&self, object: &K) -> ClientResult<K> {
        let updated = self.client.update_status(self.scoped(object)?).await?;
        Ok(K::from_dynamic(updated)?)
    }

    pub async fn patch(&self, name: &str, patch: &Value) -> ClientResult<K> {
        let patched = self
            .client
            .patch(K::KIND, self.namespace(), name, patch)
            .await?;
        Ok(K::from_dynamic(patched)?)
    }

    pub async fn delete(&self, name: &str) -> ClientResult<()> {
        self.client.delete(K::KIND, self.namespace(), name).await
    }

    fn scoped(&self, object: &K) -> ClientResult<keel_types::DynamicObject> {
        let mut dynamic = object.to_dynamic()?;
        if dynamic.metadata.namespace.is_empty() {
            if let Some(namespace) = &self.namespace {
                dynamic.metadata.namespace = namespace.clone();
            }
        }
        Ok(dynamic)
    }
}

//! Catalog-backed provisioner with fingerprint-gated apply

use crate::catalog::ManifestCatalog;
use crate::error::ProvisionResult;
use crate::traits::{ApplyOutcome, ModuleProvisioner, RenderRequest};
use async_trait::async_trait;
use keel_client::ResourceClient;
use keel_types::{fingerprint, fingerprint_label, set_fingerprint_label, DynamicObject, Scheme};
use serde_json::json;
use std::sync::Arc;

/// Renders from a [`ManifestCatalog`] and applies through a [`ResourceClient`]
pub struct CatalogProvisioner {
    catalog: ManifestCatalog,
    client: Arc<dyn ResourceClient>,
    scheme: Arc<Scheme>,
}

impl CatalogProvisioner {
    pub fn new(catalog: ManifestCatalog, client: Arc<dyn ResourceClient>, scheme: Arc<Scheme>) -> Self {
        Self {
            catalog,
            client,
            scheme,
        }
    }

    pub fn catalog(&self) -> &ManifestCatalog {
        &self.catalog
    }
}

/// Fingerprint of everything an apply owns on an object
fn desired_fingerprint(object: &DynamicObject) -> String {
    let mut labels = object.metadata.labels.clone();
    labels.remove(keel_types::labels::FINGERPRINT_LABEL);
    fingerprint(&json!({
        "content": object.content(),
        "labels": labels,
        "annotations": object.metadata.annotations,
        "ownerReferences": object.metadata.owner_references,
    }))
}

#[async_trait]
impl ModuleProvisioner for CatalogProvisioner {
    async fn render(&self, request: &RenderRequest) -> ProvisionResult<Vec<DynamicObject>> {
        tracing::debug!(
            template = %request.template_name,
            repo_ref = %request.repo_ref,
            tag = %request.tag,
            namespace = %request.namespace,
            authenticated = request.credentials.is_some(),
            "Rendering module"
        );
        self.catalog.render(request)
    }

    async fn apply(&self, object: &DynamicObject, dry_run: bool) -> ProvisionResult<ApplyOutcome> {
        let mut desired = object.clone();
        desired.metadata.resource_version = None;
        let fp = desired_fingerprint(&desired);
        set_fingerprint_label(&mut desired.metadata, &fp);

        self.scheme.validate(&desired)?;

        let namespace = desired.metadata.namespace.clone();
        let name = desired.metadata.name.clone();
        let live = match self.client.get(&desired.kind, &namespace, &name).await {
            Ok(live) => Some(live),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        if dry_run {
            return Ok(ApplyOutcome::Validated);
        }

        match live {
            None => {
                self.client.create(desired).await?;
                tracing::info!(kind = %object.kind, %namespace, %name, "Created object");
                Ok(ApplyOutcome::Created)
            }
            Some(live) if fingerprint_label(&live.metadata) == Some(fp.as_str()) => {
                tracing::debug!(kind = %object.kind, %namespace, %name, "Object unchanged");
                Ok(ApplyOutcome::Unchanged)
            }
            Some(live) => {
                desired.metadata.resource_version = live.metadata.resource_version;
                self.client.update(desired).await?;
                tracing::info!(kind = %object.kind, %namespace, %name, "Updated object");
                Ok(ApplyOutcome::Updated)
            }
        }
    }
}

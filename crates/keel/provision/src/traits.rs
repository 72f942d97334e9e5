//! Provisioning adapter contract

use crate::error::ProvisionResult;
use async_trait::async_trait;
use keel_types::{DynamicObject, Values};
use serde::Deserialize;
use std::fmt;

/// Pull credentials for the template registry
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryCredentials {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to render one module
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Name of the action definition (or component type) being rendered
    pub template_name: String,
    pub repo_ref: String,
    pub tag: String,
    /// Namespace every produced object is placed in
    pub namespace: String,
    pub credentials: Option<RegistryCredentials>,
    pub values: Values,
}

/// What an apply call did to the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
    /// Dry run; nothing was written
    Validated,
}

/// Module provisioning capability: render a template, apply its objects.
#[async_trait]
pub trait ModuleProvisioner: Send + Sync {
    /// Produce the concrete objects for a template and value set
    async fn render(&self, request: &RenderRequest) -> ProvisionResult<Vec<DynamicObject>>;

    /// Idempotently upsert one object. With `dry_run` nothing is written.
    async fn apply(&self, object: &DynamicObject, dry_run: bool) -> ProvisionResult<ApplyOutcome>;
}

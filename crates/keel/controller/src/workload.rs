//! Workload builder
//!
//! Translates one Component into its concrete children: a Workload (the
//! scalable process set) and an Exposure (its network endpoint). Building
//! is pure; [`WorkloadBuilder::reconcile`] writes each object through the
//! fingerprint-gated upsert.

use crate::error::{ReconcileError, ReconcileResult};
use crate::sync::{upsert, WriteOutcome};
use keel_client::{Api, ResourceClient};
use keel_types::labels::{APPLICATION_LABEL, COMPONENT_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use keel_types::{
    fingerprint, Component, ContainerPort, ContainerSpec, Exposure, ExposurePort, ExposureSpec,
    ObjectMeta, Resource, Volume, Workload, WorkloadSpec,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_REPLICAS: u32 = 1;

/// Write outcomes of one builder pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadOutcome {
    pub workload: WriteOutcome,
    pub exposure: WriteOutcome,
}

/// Builds and reconciles the children of a Component
pub struct WorkloadBuilder {
    client: Arc<dyn ResourceClient>,
}

impl WorkloadBuilder {
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self { client }
    }

    /// Build the desired children. No I/O; deterministic for equal input.
    pub fn build(component: &Component) -> (Workload, Exposure) {
        let meta = child_meta(component);
        let selector = selector(component);
        let values = &component.spec.values;

        let image = values
            .source
            .as_ref()
            .map(|s| s.image.clone())
            .filter(|image| !image.is_empty())
            .unwrap_or_else(|| format!("{}:{}", component.spec.repo_ref, component.spec.tag));
        let ports = values
            .network
            .as_ref()
            .map(|n| n.ports.as_slice())
            .unwrap_or_default();

        let workload = Workload {
            metadata: meta.clone(),
            spec: WorkloadSpec {
                replicas: values.replicas.unwrap_or(DEFAULT_REPLICAS),
                selector: selector.clone(),
                container: ContainerSpec {
                    name: component.metadata.name.clone(),
                    image,
                    pull_policy: values.source.as_ref().and_then(|s| s.pull_policy.clone()),
                    ports: ports
                        .iter()
                        .map(|p| ContainerPort {
                            name: p.name.clone(),
                            container_port: p.port,
                            protocol: p.protocol.clone(),
                        })
                        .collect(),
                    resources: values.resources.clone(),
                    env: values.env.clone(),
                },
                volumes: values
                    .storage
                    .iter()
                    .map(|s| Volume {
                        name: s.name.clone(),
                        mount_path: s.mount_path.clone(),
                        size: s.size.clone(),
                    })
                    .collect(),
            },
        };

        let exposure = Exposure {
            metadata: meta,
            spec: ExposureSpec {
                selector,
                ports: ports
                    .iter()
                    .map(|p| ExposurePort {
                        name: p.name.clone(),
                        port: p.port,
                        target_port: p.port,
                        protocol: p.protocol.clone(),
                    })
                    .collect(),
                public: ports.iter().any(|p| p.public),
            },
        };

        (workload, exposure)
    }

    /// Build and converge both children of `component`
    pub async fn reconcile(&self, component: &Component) -> ReconcileResult<WorkloadOutcome> {
        let (workload, exposure) = Self::build(component);
        if workload.metadata.owner_references.is_empty() {
            return Err(ReconcileError::missing_uid(Component::KIND, component.key()));
        }

        let namespace = &component.metadata.namespace;
        let workload_fp = spec_fingerprint(&workload.metadata, &workload.spec);
        let exposure_fp = spec_fingerprint(&exposure.metadata, &exposure.spec);

        let workloads = Api::<Workload>::namespaced(self.client.clone(), namespace.clone());
        let (workload_outcome, _) = upsert(&workloads, workload, &workload_fp).await?;

        let exposures = Api::<Exposure>::namespaced(self.client.clone(), namespace.clone());
        let (exposure_outcome, _) = upsert(&exposures, exposure, &exposure_fp).await?;

        Ok(WorkloadOutcome {
            workload: workload_outcome,
            exposure: exposure_outcome,
        })
    }
}

/// Children are owned by the Application so deleting it removes them;
/// a Component without a controller owner owns its children itself.
fn child_meta(component: &Component) -> ObjectMeta {
    let mut meta = ObjectMeta::new(
        component.metadata.namespace.clone(),
        component.metadata.name.clone(),
    )
    .with_label(COMPONENT_LABEL, component.metadata.name.clone())
    .with_label(MANAGED_BY_LABEL, MANAGED_BY_VALUE);

    if let Some(app) = component.metadata.labels.get(APPLICATION_LABEL) {
        meta.labels.insert(APPLICATION_LABEL.to_string(), app.clone());
    }

    let owner = component
        .metadata
        .controller_owner()
        .cloned()
        .or_else(|| component.controller_reference());
    if let Some(owner) = owner {
        meta.set_owner_reference(owner);
    }
    meta
}

fn selector(component: &Component) -> BTreeMap<String, String> {
    let mut selector = BTreeMap::new();
    selector.insert(COMPONENT_LABEL.to_string(), component.metadata.name.clone());
    if let Some(app) = component.metadata.labels.get(APPLICATION_LABEL) {
        selector.insert(APPLICATION_LABEL.to_string(), app.clone());
    }
    selector
}

fn spec_fingerprint<S: serde::Serialize>(meta: &ObjectMeta, spec: &S) -> String {
    fingerprint(&json!({
        "spec": spec,
        "labels": meta.labels,
        "ownerReferences": meta.owner_references,
    }))
}

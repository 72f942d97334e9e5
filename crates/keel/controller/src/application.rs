//! Application reconciler
//!
//! Mirrors each declared ComponentTemplate into a Component owned by the
//! Application, prunes Components it no longer declares and aggregates
//! Component readiness into the Application status.

use crate::config::ControllerContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::runtime::{Action, Reconciler};
use crate::sync::upsert;
use async_trait::async_trait;
use keel_client::{Api, LabelSelector};
use keel_types::condition::READY;
use keel_types::labels::{APPLICATION_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use keel_types::{
    fingerprint, Application, ApplicationStatus, Component, ComponentStatusSummary,
    ComponentTemplate, Condition, ConditionStatus, Conditions, ObjectKey, ObjectMeta,
    OwnerReference, Resource,
};
use serde_json::json;
use std::sync::Arc;

/// Reason recorded for Components that have not reported readiness yet
const PENDING_REASON: &str = "Pending";

/// Outcome of converging an Application's Components
enum Fanout {
    Synced(Vec<Component>),
    /// Declared names whose live Component another controller owns
    OwnedElsewhere(Vec<String>),
}

pub struct ApplicationReconciler {
    ctx: Arc<ControllerContext>,
}

impl ApplicationReconciler {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Converge the Components of one Application, in declaration order.
    /// Nothing is written while any declared name is controlled by someone
    /// else.
    async fn sync_components(&self, app: &Application) -> ReconcileResult<Fanout> {
        let owner = app
            .controller_reference()
            .ok_or_else(|| ReconcileError::missing_uid(Application::KIND, app.key()))?;
        let components =
            Api::<Component>::namespaced(self.ctx.client.clone(), app.metadata.namespace.clone());

        let mut foreign = Vec::new();
        for template in &app.spec.components {
            let Some(existing) = components.get_opt(&template.metadata.name).await? else {
                continue;
            };
            if let Some(other) = existing.metadata.controller_owner() {
                if other.uid != owner.uid {
                    tracing::warn!(
                        component = %template.metadata.name,
                        owner_kind = %other.kind,
                        owner = %other.name,
                        "Component is controlled by another owner"
                    );
                    foreign.push(template.metadata.name.clone());
                }
            }
        }
        if !foreign.is_empty() {
            return Ok(Fanout::OwnedElsewhere(foreign));
        }

        let mut live = Vec::with_capacity(app.spec.components.len());
        for template in &app.spec.components {
            let desired = derive_component(app, template, &owner);
            let fp = component_fingerprint(&desired);
            // Fail fast: the next pass re-attempts every component
            let (_, component) = upsert(&components, desired, &fp).await?;
            live.push(component);
        }

        self.prune(app, &owner, &components).await?;
        Ok(Fanout::Synced(live))
    }

    /// Delete Components this Application controls but no longer declares
    async fn prune(
        &self,
        app: &Application,
        owner: &OwnerReference,
        components: &Api<Component>,
    ) -> ReconcileResult<()> {
        let selector = LabelSelector::everything().eq(APPLICATION_LABEL, app.metadata.name.clone());
        for stale in components.list(&selector).await? {
            let controlled = stale
                .metadata
                .controller_owner()
                .map(|o| o.uid == owner.uid)
                .unwrap_or(false);
            if !controlled || app.component(&stale.metadata.name).is_some() {
                continue;
            }

            match components.delete(&stale.metadata.name).await {
                Ok(()) => tracing::info!(
                    namespace = %app.metadata.namespace,
                    application = %app.metadata.name,
                    component = %stale.metadata.name,
                    "Pruned undeclared component"
                ),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn write_status(
        &self,
        apps: &Api<Application>,
        app: &Application,
        status: ApplicationStatus,
    ) -> ReconcileResult<()> {
        if app.status.as_ref() == Some(&status) {
            return Ok(());
        }
        let mut updated = app.clone();
        updated.status = Some(status);
        apps.replace_status(&updated).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ApplicationReconciler {
    type Object = Application;

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<Action> {
        let apps = Api::<Application>::namespaced(self.ctx.client.clone(), key.namespace.clone());
        let Some(app) = apps.get_opt(&key.name).await? else {
            tracing::debug!("Application gone; nothing to do");
            return Ok(Action::Done);
        };

        let mut status = app.status.clone().unwrap_or_default();
        status.observed_generation = app.metadata.generation;

        let duplicates = app.duplicate_component_names();
        if !duplicates.is_empty() {
            tracing::warn!(duplicates = ?duplicates, "Rejecting application with duplicate component names");
            status.conditions.set_condition(Condition::new(
                READY,
                ConditionStatus::False,
                "DuplicateComponentName",
                format!("component names declared more than once: {}", duplicates.join(", ")),
            ));
            self.write_status(&apps, &app, status).await?;
            return Ok(Action::Done);
        }

        match self.sync_components(&app).await {
            Ok(Fanout::Synced(components)) => {
                aggregate(&mut status, &app, &components);
                self.write_status(&apps, &app, status).await?;
                Ok(Action::Done)
            }
            // Resync looks again once the other owner lets go
            Ok(Fanout::OwnedElsewhere(names)) => {
                status.conditions.set_condition(Condition::new(
                    READY,
                    ConditionStatus::False,
                    "ComponentOwnedElsewhere",
                    format!("components controlled by another owner: {}", names.join(", ")),
                ));
                self.write_status(&apps, &app, status).await?;
                Ok(Action::Done)
            }
            Err(e) => {
                if !e.is_conflict() {
                    status.conditions.set_condition(Condition::new(
                        READY,
                        ConditionStatus::False,
                        "ReconcileFailed",
                        e.to_string(),
                    ));
                    if let Err(status_err) = self.write_status(&apps, &app, status).await {
                        tracing::warn!(error = %status_err, "Failed to record reconcile failure");
                    }
                }
                Err(e)
            }
        }
    }
}

/// Component derived from one template: same name and namespace, template
/// metadata plus the application label, spec copied verbatim.
pub fn derive_component(
    app: &Application,
    template: &ComponentTemplate,
    owner: &OwnerReference,
) -> Component {
    let mut metadata = ObjectMeta::new(app.metadata.namespace.clone(), template.metadata.name.clone());
    metadata.labels = template.metadata.labels.clone();
    metadata.annotations = template.metadata.annotations.clone();
    metadata
        .labels
        .insert(APPLICATION_LABEL.to_string(), app.metadata.name.clone());
    metadata
        .labels
        .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    metadata.set_owner_reference(owner.clone());

    Component {
        metadata,
        spec: template.spec.clone(),
        status: None,
    }
}

/// Fingerprint of everything the Application dictates on a Component
pub fn component_fingerprint(component: &Component) -> String {
    let mut labels = component.metadata.labels.clone();
    labels.remove(keel_types::labels::FINGERPRINT_LABEL);
    fingerprint(&json!({
        "spec": component.spec,
        "labels": labels,
        "annotations": component.metadata.annotations,
        "ownerReferences": component.metadata.owner_references,
    }))
}

fn aggregate(status: &mut ApplicationStatus, app: &Application, components: &[Component]) {
    let mut ready = 0u32;
    status.components = app
        .spec
        .components
        .iter()
        .zip(components)
        .map(|(template, component)| {
            let condition = component
                .status
                .as_ref()
                .and_then(|s| s.conditions.condition(READY));
            if condition.map(Condition::is_true).unwrap_or(false) {
                ready += 1;
            }
            ComponentStatusSummary {
                name: template.metadata.name.clone(),
                component_type: template.spec.component_type.clone(),
                reason: condition
                    .map(|c| c.reason.clone())
                    .unwrap_or_else(|| PENDING_REASON.to_string()),
            }
        })
        .collect();

    let total = components.len() as u32;
    status.ready_components = ready;
    status.total_components = total;

    let condition = if ready == total {
        Condition::new(
            READY,
            ConditionStatus::True,
            "AllComponentsReady",
            format!("{}/{} components ready", ready, total),
        )
    } else {
        Condition::new(
            READY,
            ConditionStatus::False,
            "ComponentsNotReady",
            format!("{}/{} components ready", ready, total),
        )
    };
    status.conditions.set_condition(condition);
}

//! Component reconciler

use crate::config::ControllerContext;
use crate::error::ReconcileResult;
use crate::runtime::{Action, Reconciler};
use crate::workload::WorkloadBuilder;
use async_trait::async_trait;
use keel_client::Api;
use keel_types::condition::READY;
use keel_types::{Component, Condition, ConditionStatus, Conditions, ObjectKey};
use std::sync::Arc;

/// Runs the workload builder for each Component and reports the outcome
/// in the Component's `Ready` condition.
pub struct ComponentReconciler {
    ctx: Arc<ControllerContext>,
    builder: WorkloadBuilder,
}

impl ComponentReconciler {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        let builder = WorkloadBuilder::new(ctx.client.clone());
        Self { ctx, builder }
    }
}

#[async_trait]
impl Reconciler for ComponentReconciler {
    type Object = Component;

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<Action> {
        let components = Api::<Component>::namespaced(self.ctx.client.clone(), key.namespace.clone());
        let Some(component) = components.get_opt(&key.name).await? else {
            return Ok(Action::Done);
        };

        let result = self.builder.reconcile(&component).await;
        if matches!(&result, Err(e) if e.is_conflict()) {
            return result.map(|_| Action::Done);
        }
        let condition = match &result {
            Ok(_) => Condition::new(READY, ConditionStatus::True, "WorkloadsReconciled", ""),
            Err(e) => Condition::new(READY, ConditionStatus::False, "ReconcileFailed", e.to_string()),
        };

        let mut status = component.status.clone().unwrap_or_default();
        if status.conditions.set_condition(condition) {
            let mut updated = component.clone();
            updated.status = Some(status);
            if let Err(e) = components.replace_status(&updated).await {
                // Report the builder failure first if there was one
                if result.is_ok() {
                    return Err(e.into());
                }
                tracing::warn!(error = %e, "Failed to record component status");
            }
        }

        result.map(|_| Action::Done)
    }
}

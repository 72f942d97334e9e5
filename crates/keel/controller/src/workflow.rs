//! Workflow run engine
//!
//! Executes the actions of a Workflow against one target Component, in
//! declared order and never concurrently. Each action resolves its
//! ActionDefinition from the system namespace, renders it through the
//! module provisioner with the run's merged values, stamps every produced
//! object with an owner reference to the run plus trace labels, dry-runs
//! the whole set and then applies it.
//!
//! Every state transition is written back to the run's status before the
//! engine moves on. A failed pass leaves the run unfinished for a retry
//! until `max_attempts` passes have failed, after which it is finished as
//! failed.

use crate::config::ControllerContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::runtime::{Action, Reconciler};
use async_trait::async_trait;
use keel_client::Api;
use keel_provision::RenderRequest;
use keel_types::condition::{FINISHED, RUNNING_ACTION};
use keel_types::labels::{ACTION_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE, WORKFLOW_RUN_LABEL};
use keel_types::{
    generate_name_suffix, ActionDefinition, Application, Component, Condition, ConditionStatus,
    Conditions, ObjectKey, Resource, RunPhase, Workflow, WorkflowRun, WorkflowRunStatus,
};
use serde_json::json;
use std::sync::Arc;

/// Everything a run needs before it can start
struct Dependencies {
    application: Application,
    component: Component,
    workflow: Workflow,
}

enum Resolution {
    Ready(Dependencies),
    Missing(String),
}

/// The actions of a workflow in execution order
pub fn get_actions(workflow: &Workflow) -> &[keel_types::Action] {
    &workflow.spec.actions
}

fn status_mut(run: &mut WorkflowRun) -> &mut WorkflowRunStatus {
    run.status.get_or_insert_with(WorkflowRunStatus::default)
}

pub struct WorkflowRunReconciler {
    ctx: Arc<ControllerContext>,
}

impl WorkflowRunReconciler {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    async fn resolve(&self, run: &WorkflowRun) -> ReconcileResult<Resolution> {
        let client = &self.ctx.client;
        let namespace = run.metadata.namespace.clone();
        let spec = &run.spec;

        let applications = Api::<Application>::namespaced(client.clone(), namespace.clone());
        let Some(application) = applications.get_opt(&spec.application_name).await? else {
            return Ok(Resolution::Missing(format!(
                "application {} not found",
                spec.application_name
            )));
        };
        if application.component(&spec.component_name).is_none() {
            return Ok(Resolution::Missing(format!(
                "component {} is not declared by application {}",
                spec.component_name, spec.application_name
            )));
        }

        let components = Api::<Component>::namespaced(client.clone(), namespace.clone());
        let Some(component) = components.get_opt(&spec.component_name).await? else {
            return Ok(Resolution::Missing(format!(
                "component {} not found",
                spec.component_name
            )));
        };

        let workflows = Api::<Workflow>::namespaced(client.clone(), namespace);
        let Some(workflow) = workflows.get_opt(&spec.workflow_name).await? else {
            return Ok(Resolution::Missing(format!(
                "workflow {} not found",
                spec.workflow_name
            )));
        };

        Ok(Resolution::Ready(Dependencies {
            application,
            component,
            workflow,
        }))
    }

    /// Write the run's status back and adopt the stored version
    async fn persist(&self, runs: &Api<WorkflowRun>, run: &mut WorkflowRun) -> ReconcileResult<()> {
        *run = runs.replace_status(run).await?;
        Ok(())
    }

    /// Take back the attempt counted by a pass that lost a write race.
    /// Works from a fresh read since the run itself may be what conflicted.
    async fn release_attempt(&self, runs: &Api<WorkflowRun>, name: &str) {
        let released = async {
            let Some(mut run) = runs.get_opt(name).await? else {
                return Ok(false);
            };
            let status = status_mut(&mut run);
            if status.finished || status.attempts == 0 {
                return Ok(false);
            }
            status.attempts -= 1;
            runs.replace_status(&run).await?;
            Ok::<_, ReconcileError>(true)
        }
        .await;

        match released {
            Ok(true) => tracing::debug!("Released attempt after write conflict"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to release attempt after write conflict"),
        }
    }

    async fn run_actions(
        &self,
        runs: &Api<WorkflowRun>,
        run: &mut WorkflowRun,
        deps: &Dependencies,
        suffix: &str,
    ) -> ReconcileResult<usize> {
        let actions = get_actions(&deps.workflow);
        for action in actions {
            {
                let status = status_mut(run);
                status.current_action = Some(action.name.clone());
                status.conditions.set_condition(Condition::new(
                    RUNNING_ACTION,
                    ConditionStatus::True,
                    "Rendering",
                    format!("rendering action {}", action.name),
                ));
            }
            self.persist(runs, run).await?;

            let applied = self
                .run_action(run, action, deps, suffix)
                .await
                .map_err(|source| ReconcileError::ActionFailed {
                    action: action.name.clone(),
                    source: Box::new(source),
                })?;
            tracing::info!(action = %action.name, objects = applied, "Action applied");

            status_mut(run).conditions.set_condition(Condition::new(
                RUNNING_ACTION,
                ConditionStatus::True,
                "Succeeded",
                format!("action {} applied {} objects", action.name, applied),
            ));
            self.persist(runs, run).await?;
        }
        Ok(actions.len())
    }

    /// Render and apply one action; returns the number of objects applied
    async fn run_action(
        &self,
        run: &WorkflowRun,
        action: &keel_types::Action,
        deps: &Dependencies,
        suffix: &str,
    ) -> ReconcileResult<usize> {
        let definitions = Api::<ActionDefinition>::namespaced(
            self.ctx.client.clone(),
            self.ctx.workflow.system_namespace.clone(),
        );
        let definition = definitions.get(&action.action_type).await?;

        let namespace = run.metadata.namespace.clone();
        let mut values = action.values.clone();
        values.insert("nameSuffix".to_string(), json!(suffix));
        values.insert(
            "applicationName".to_string(),
            json!(deps.application.metadata.name),
        );
        values.insert(
            "componentName".to_string(),
            json!(deps.component.metadata.name),
        );
        values.insert("namespace".to_string(), json!(namespace));

        let request = RenderRequest {
            template_name: definition.metadata.name.clone(),
            repo_ref: definition.spec.repo_ref.clone(),
            tag: definition.spec.tag.clone(),
            namespace,
            credentials: self.ctx.workflow.credentials.clone(),
            values,
        };
        let mut objects = self.ctx.provisioner.render(&request).await?;

        let owner = run
            .controller_reference()
            .ok_or_else(|| ReconcileError::missing_uid(WorkflowRun::KIND, run.key()))?;
        for object in &mut objects {
            object.metadata.set_owner_reference(owner.clone());
            let labels = &mut object.metadata.labels;
            labels.insert(WORKFLOW_RUN_LABEL.to_string(), run.metadata.name.clone());
            labels.insert(ACTION_LABEL.to_string(), action.name.clone());
            labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        }

        // Reject the whole set before writing any of it
        for object in &objects {
            self.ctx.provisioner.apply(object, true).await?;
        }
        for object in &objects {
            let outcome = self.ctx.provisioner.apply(object, false).await?;
            tracing::debug!(
                action = %action.name,
                kind = %object.kind,
                name = %object.metadata.name,
                ?outcome,
                "Applied object"
            );
        }
        Ok(objects.len())
    }
}

#[async_trait]
impl Reconciler for WorkflowRunReconciler {
    type Object = WorkflowRun;

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<Action> {
        let runs = Api::<WorkflowRun>::namespaced(self.ctx.client.clone(), key.namespace.clone());
        let Some(mut run) = runs.get_opt(&key.name).await? else {
            return Ok(Action::Done);
        };
        if run.is_finished() {
            tracing::debug!("Run already finished");
            return Ok(Action::Done);
        }

        let deps = match self.resolve(&run).await? {
            Resolution::Ready(deps) => deps,
            Resolution::Missing(reason) => {
                tracing::info!(%reason, "Dependencies not ready");
                let changed = status_mut(&mut run).conditions.set_condition(Condition::new(
                    RUNNING_ACTION,
                    ConditionStatus::False,
                    "DependencyNotReady",
                    reason,
                ));
                if changed {
                    self.persist(&runs, &mut run).await?;
                }
                return Ok(Action::RequeueAfter(self.ctx.controller.dependency_retry));
            }
        };

        let generation = run.metadata.generation;
        let suffix = {
            let status = status_mut(&mut run);
            let suffix = status
                .name_suffix
                .get_or_insert_with(generate_name_suffix)
                .clone();
            status.attempts += 1;
            status.phase = RunPhase::Running;
            status.observed_generation = generation;
            suffix
        };
        self.persist(&runs, &mut run).await?;

        let attempt = status_mut(&mut run).attempts;
        tracing::info!(
            workflow = %run.spec.workflow_name,
            component = %run.spec.component_name,
            attempt,
            suffix = %suffix,
            "Executing workflow run"
        );

        match self.run_actions(&runs, &mut run, &deps, &suffix).await {
            Ok(count) => {
                let status = status_mut(&mut run);
                status.finished = true;
                status.phase = RunPhase::Succeeded;
                status.current_action = None;
                status.conditions.set_condition(Condition::new(
                    FINISHED,
                    ConditionStatus::True,
                    "Succeeded",
                    format!("{} actions applied", count),
                ));
                self.persist(&runs, &mut run).await?;
                tracing::info!(actions = count, "Workflow run succeeded");
                Ok(Action::Done)
            }
            Err(e) if e.is_conflict() => {
                self.release_attempt(&runs, &key.name).await;
                Err(e)
            }
            Err(e) => {
                let max_attempts = self.ctx.workflow.max_attempts;
                let status = status_mut(&mut run);
                status.conditions.set_condition(Condition::new(
                    RUNNING_ACTION,
                    ConditionStatus::False,
                    "Failed",
                    e.to_string(),
                ));
                let exhausted = status.attempts >= max_attempts;
                if exhausted {
                    status.finished = true;
                    status.phase = RunPhase::Failed;
                    status.conditions.set_condition(Condition::new(
                        FINISHED,
                        ConditionStatus::False,
                        "Failed",
                        format!("gave up after {} attempts: {}", status.attempts, e),
                    ));
                }
                if let Err(persist_err) = self.persist(&runs, &mut run).await {
                    tracing::warn!(error = %persist_err, "Failed to record action failure");
                    return Err(e);
                }

                if exhausted {
                    tracing::warn!(error = %e, attempts = attempt, "Workflow run failed permanently");
                    Ok(Action::Done)
                } else {
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{component_fingerprint, derive_component};
    use crate::config::WorkflowConfig;
    use keel_client::{InMemoryCluster, LabelSelector, ResourceClient};
    use keel_provision::{
        ApplyOutcome, CatalogProvisioner, ManifestCatalog, ModuleProvisioner, ProvisionResult,
    };
    use keel_types::{
        ActionDefinitionSpec, ApplicationSpec, ComponentSpec, ComponentTemplate, ComponentValues,
        DynamicObject, ObjectMeta, TemplateMeta, WorkflowRunSpec, WorkflowSpec,
    };
    use keel_client::ClientError;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SYSTEM: &str = "keel-system";

    /// Records which templates were rendered; can lose the next few
    /// applies to a concurrent writer
    struct Recording {
        inner: CatalogProvisioner,
        rendered: Mutex<Vec<String>>,
        conflicts: AtomicUsize,
    }

    #[async_trait]
    impl ModuleProvisioner for Recording {
        async fn render(&self, request: &RenderRequest) -> ProvisionResult<Vec<DynamicObject>> {
            self.rendered
                .lock()
                .unwrap()
                .push(request.template_name.clone());
            self.inner.render(request).await
        }

        async fn apply(&self, object: &DynamicObject, dry_run: bool) -> ProvisionResult<ApplyOutcome> {
            let lose = !dry_run
                && self
                    .conflicts
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if lose {
                return Err(ClientError::Conflict {
                    kind: object.kind.clone(),
                    key: object.key(),
                    sent: "1".to_string(),
                    stored: "2".to_string(),
                }
                .into());
            }
            self.inner.apply(object, dry_run).await
        }
    }

    struct Harness {
        cluster: Arc<InMemoryCluster>,
        provisioner: Arc<Recording>,
        reconciler: WorkflowRunReconciler,
        runs: Api<WorkflowRun>,
    }

    fn config_map(name: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name},
            "data": {"component": "${componentName}", "app": "${applicationName}"}
        })
    }

    fn catalog() -> ManifestCatalog {
        ManifestCatalog::new()
            .with_template("registry/a", "v1", vec![config_map("a-${nameSuffix}")])
            .with_template(
                "registry/b",
                "v1",
                vec![
                    config_map("b1-${nameSuffix}"),
                    // Rejected by scheme validation
                    json!({
                        "apiVersion": keel_types::KEEL_API_VERSION,
                        "kind": "WorkflowRun",
                        "metadata": {"name": "b2-${nameSuffix}"},
                        "spec": {"workflowName": 42}
                    }),
                ],
            )
            .with_template("registry/c", "v1", vec![config_map("c-${nameSuffix}")])
    }

    async fn harness(actions: &[&str], max_attempts: u32) -> Harness {
        let cluster = Arc::new(InMemoryCluster::default());
        let client: Arc<dyn ResourceClient> = cluster.clone();
        let provisioner = Arc::new(Recording {
            inner: CatalogProvisioner::new(catalog(), client.clone(), cluster.scheme().clone()),
            rendered: Mutex::new(Vec::new()),
            conflicts: AtomicUsize::new(0),
        });
        let ctx = Arc::new(
            ControllerContext::new(client.clone(), provisioner.clone()).with_workflow_config(
                WorkflowConfig {
                    max_attempts,
                    ..Default::default()
                },
            ),
        );

        for name in ["a", "b", "c"] {
            Api::<ActionDefinition>::namespaced(client.clone(), SYSTEM)
                .create(&ActionDefinition {
                    metadata: ObjectMeta::new(SYSTEM, name),
                    spec: ActionDefinitionSpec {
                        repo_ref: format!("registry/{}", name),
                        tag: "v1".to_string(),
                        docs_ref: None,
                    },
                })
                .await
                .unwrap();
        }

        Api::<Workflow>::namespaced(client.clone(), "default")
            .create(&Workflow {
                metadata: ObjectMeta::new("default", "release"),
                spec: WorkflowSpec {
                    actions: actions
                        .iter()
                        .map(|t| keel_types::Action {
                            name: format!("step-{}", t),
                            action_type: t.to_string(),
                            values: Default::default(),
                        })
                        .collect(),
                },
            })
            .await
            .unwrap();

        let runs = Api::<WorkflowRun>::namespaced(client.clone(), "default");
        runs.create(&WorkflowRun {
            metadata: ObjectMeta::new("default", "run1"),
            spec: WorkflowRunSpec {
                workflow_name: "release".to_string(),
                application_name: "app1".to_string(),
                component_name: "web".to_string(),
            },
            status: None,
        })
        .await
        .unwrap();

        Harness {
            cluster,
            provisioner,
            reconciler: WorkflowRunReconciler::new(ctx),
            runs,
        }
    }

    async fn create_application(cluster: &Arc<InMemoryCluster>) {
        let client: Arc<dyn ResourceClient> = cluster.clone();
        let template = ComponentTemplate {
            metadata: TemplateMeta {
                name: "web".to_string(),
                ..Default::default()
            },
            spec: ComponentSpec {
                component_type: "webservice".to_string(),
                repo_ref: "registry/web".to_string(),
                tag: "v1".to_string(),
                values: ComponentValues::default(),
            },
        };
        let app = Api::<Application>::namespaced(client.clone(), "default")
            .create(&Application {
                metadata: ObjectMeta::new("default", "app1"),
                spec: ApplicationSpec {
                    components: vec![template.clone()],
                },
                status: None,
            })
            .await
            .unwrap();
        let mut component = derive_component(&app, &template, &app.controller_reference().unwrap());
        let fp = component_fingerprint(&component);
        keel_types::set_fingerprint_label(&mut component.metadata, &fp);
        Api::<Component>::namespaced(client, "default")
            .create(&component)
            .await
            .unwrap();
    }

    fn key() -> ObjectKey {
        ObjectKey::new("default", "run1")
    }

    async fn config_maps_for(cluster: &InMemoryCluster, action: &str) -> Vec<DynamicObject> {
        cluster
            .list(
                "ConfigMap",
                Some("default"),
                &LabelSelector::everything().eq(ACTION_LABEL, action),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_run_finishes_and_persists() {
        let h = harness(&["a", "c"], 5).await;
        create_application(&h.cluster).await;

        assert_eq!(h.reconciler.reconcile(&key()).await.unwrap(), Action::Done);

        let run = h.runs.get("run1").await.unwrap();
        let status = run.status.clone().unwrap();
        assert!(status.finished);
        assert_eq!(status.phase, RunPhase::Succeeded);
        assert_eq!(status.attempts, 1);
        assert!(status.conditions.is_condition_true(FINISHED));

        let suffix = status.name_suffix.unwrap();
        let produced = config_maps_for(&h.cluster, "step-a").await;
        assert_eq!(produced.len(), 1);
        let object = &produced[0];
        assert_eq!(object.metadata.name, format!("a-{}", suffix));
        assert_eq!(object.metadata.labels[WORKFLOW_RUN_LABEL], "run1");
        assert_eq!(object.data["data"]["component"], "web");
        assert_eq!(object.data["data"]["app"], "app1");

        let owner = object.metadata.controller_owner().unwrap();
        assert_eq!(owner.kind, "WorkflowRun");
        assert_eq!(Some(&owner.uid), run.metadata.uid.as_ref());
        assert!(owner.block_owner_deletion);
    }

    #[tokio::test]
    async fn test_finished_run_is_not_executed_again() {
        let h = harness(&["a"], 5).await;
        create_application(&h.cluster).await;
        h.reconciler.reconcile(&key()).await.unwrap();

        let writes = h.cluster.stats().total();
        assert_eq!(h.reconciler.reconcile(&key()).await.unwrap(), Action::Done);
        assert_eq!(h.cluster.stats().total(), writes);
        assert_eq!(h.provisioner.rendered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_stops_sequence() {
        let h = harness(&["a", "b", "c"], 5).await;
        create_application(&h.cluster).await;

        let err = h.reconciler.reconcile(&key()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::ActionFailed { ref action, .. } if action == "step-b"));

        assert_eq!(config_maps_for(&h.cluster, "step-a").await.len(), 1);
        // Dry run rejected b's set before any of it was written
        assert!(config_maps_for(&h.cluster, "step-b").await.is_empty());
        assert!(config_maps_for(&h.cluster, "step-c").await.is_empty());
        assert_eq!(*h.provisioner.rendered.lock().unwrap(), vec!["a", "b"]);

        let status = h.runs.get("run1").await.unwrap().status.unwrap();
        assert!(!status.finished);
        assert_eq!(status.current_action.as_deref(), Some("step-b"));
        let running = status.conditions.condition(RUNNING_ACTION).unwrap();
        assert_eq!(running.status, ConditionStatus::False);
        assert_eq!(running.reason, "Failed");
    }

    #[tokio::test]
    async fn test_bounded_retries_end_in_failed() {
        let h = harness(&["a", "b"], 2).await;
        create_application(&h.cluster).await;

        assert!(h.reconciler.reconcile(&key()).await.is_err());
        let first = h.runs.get("run1").await.unwrap().status.unwrap();
        assert_eq!(first.attempts, 1);
        assert!(!first.finished);

        assert_eq!(h.reconciler.reconcile(&key()).await.unwrap(), Action::Done);
        let second = h.runs.get("run1").await.unwrap().status.unwrap();
        assert_eq!(second.attempts, 2);
        assert!(second.finished);
        assert_eq!(second.phase, RunPhase::Failed);
        assert_eq!(second.name_suffix, first.name_suffix);
        let finished = second.conditions.condition(FINISHED).unwrap();
        assert_eq!(finished.status, ConditionStatus::False);

        // Terminal: no further execution
        h.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(h.provisioner.rendered.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_conflicted_pass_does_not_use_up_an_attempt() {
        let h = harness(&["a"], 1).await;
        create_application(&h.cluster).await;
        h.provisioner.conflicts.store(1, Ordering::SeqCst);

        let err = h.reconciler.reconcile(&key()).await.unwrap_err();
        assert!(err.is_conflict());
        let status = h.runs.get("run1").await.unwrap().status.unwrap();
        assert_eq!(status.attempts, 0);
        assert!(!status.finished);
        let suffix = status.name_suffix.clone();
        assert!(suffix.is_some());

        // With a single allowed attempt the retried pass still runs and succeeds
        assert_eq!(h.reconciler.reconcile(&key()).await.unwrap(), Action::Done);
        let status = h.runs.get("run1").await.unwrap().status.unwrap();
        assert_eq!(status.phase, RunPhase::Succeeded);
        assert_eq!(status.attempts, 1);
        assert_eq!(status.name_suffix, suffix);
    }

    #[tokio::test]
    async fn test_missing_dependencies_requeue() {
        let h = harness(&["a"], 5).await;

        let action = h.reconciler.reconcile(&key()).await.unwrap();
        assert!(matches!(action, Action::RequeueAfter(_)));

        let status = h.runs.get("run1").await.unwrap().status.unwrap();
        let running = status.conditions.condition(RUNNING_ACTION).unwrap();
        assert_eq!(running.reason, "DependencyNotReady");
        assert_eq!(status.attempts, 0);
        assert!(status.name_suffix.is_none());
        assert!(h.provisioner.rendered.lock().unwrap().is_empty());

        // Waiting again changes nothing
        let writes = h.cluster.stats().total();
        h.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(h.cluster.stats().total(), writes);
    }

    #[tokio::test]
    async fn test_deleting_run_removes_produced_objects() {
        let h = harness(&["a", "c"], 5).await;
        create_application(&h.cluster).await;
        h.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(config_maps_for(&h.cluster, "step-c").await.len(), 1);

        h.runs.delete("run1").await.unwrap();
        let remaining = h
            .cluster
            .list(
                "ConfigMap",
                None,
                &LabelSelector::everything().exists(WORKFLOW_RUN_LABEL),
            )
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_get_actions_keeps_declared_order() {
        let workflow = Workflow {
            metadata: ObjectMeta::new("default", "release"),
            spec: WorkflowSpec {
                actions: ["migrate", "deploy", "verify"]
                    .iter()
                    .map(|n| keel_types::Action {
                        name: n.to_string(),
                        action_type: n.to_string(),
                        values: Default::default(),
                    })
                    .collect(),
            },
        };
        let names: Vec<_> = get_actions(&workflow).iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["migrate", "deploy", "verify"]);
    }
}

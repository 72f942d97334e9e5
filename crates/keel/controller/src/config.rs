//! Controller settings and the shared reconcile context

use keel_client::ResourceClient;
use keel_provision::{ModuleProvisioner, RegistryCredentials};
use std::sync::Arc;
use std::time::Duration;

/// Namespace ActionDefinitions are registered in
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "keel-system";

/// Runtime settings shared by every controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Concurrent reconcile workers per controller
    pub workers: usize,

    /// Periodic full re-enqueue for continuously reconciled kinds
    pub resync_interval: Option<Duration>,

    pub backoff_base: Duration,
    pub backoff_max: Duration,

    /// Delay before re-checking a WorkflowRun whose dependencies are missing
    pub dependency_retry: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            resync_interval: Some(Duration::from_secs(300)),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300),
            dependency_retry: Duration::from_secs(10),
        }
    }
}

/// Workflow engine settings
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub system_namespace: String,

    /// Failed passes after which a run is finished as failed
    pub max_attempts: u32,

    pub credentials: Option<RegistryCredentials>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_string(),
            max_attempts: 5,
            credentials: None,
        }
    }
}

/// Collaborators and settings handed to every reconciler
#[derive(Clone)]
pub struct ControllerContext {
    pub client: Arc<dyn ResourceClient>,
    pub provisioner: Arc<dyn ModuleProvisioner>,
    pub controller: ControllerConfig,
    pub workflow: WorkflowConfig,
}

impl ControllerContext {
    pub fn new(client: Arc<dyn ResourceClient>, provisioner: Arc<dyn ModuleProvisioner>) -> Self {
        Self {
            client,
            provisioner,
            controller: ControllerConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }

    pub fn with_controller_config(mut self, config: ControllerConfig) -> Self {
        self.controller = config;
        self
    }

    pub fn with_workflow_config(mut self, config: WorkflowConfig) -> Self {
        self.workflow = config;
        self
    }
}

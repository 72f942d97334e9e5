//! Well-known label keys

/// Content fingerprint of the desired state last written by a controller
pub const FINGERPRINT_LABEL: &str = "keel.dev/spec-hash";

/// Application that declared an object
pub const APPLICATION_LABEL: &str = "keel.dev/application";

/// Component an object was built from
pub const COMPONENT_LABEL: &str = "keel.dev/component";

/// WorkflowRun that produced an object
pub const WORKFLOW_RUN_LABEL: &str = "keel.dev/workflow-run";

/// Action (within the run's workflow) that produced an object
pub const ACTION_LABEL: &str = "keel.dev/action";

/// Marks objects written by Keel controllers
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

pub const MANAGED_BY_VALUE: &str = "keel";

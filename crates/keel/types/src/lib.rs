//! Keel Types - resource model for the Keel control plane
//!
//! This crate defines everything the controllers and the client facade agree on:
//!
//! - **Metadata**: object identity, version tokens, labels and ownership references
//! - **Resources**: Application, Component, Workflow, WorkflowRun, ActionDefinition,
//!   plus the concrete Workload and Exposure kinds built from components
//! - **Fingerprints**: deterministic content hashes used to skip no-op writes
//! - **Scheme**: the kind registration table built once at startup

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod application;
pub mod condition;
pub mod error;
pub mod fingerprint;
pub mod labels;
pub mod meta;
pub mod resource;
pub mod scheme;
pub mod values;
pub mod workflow;
pub mod workload;

pub use application::{
    Application, ApplicationSpec, ApplicationStatus, Component, ComponentSpec, ComponentStatus,
    ComponentStatusSummary, ComponentTemplate, TemplateMeta,
};
pub use condition::{Condition, ConditionStatus, Conditions};
pub use error::{SchemeError, SchemeResult};
pub use fingerprint::{fingerprint, fingerprint_label, set_fingerprint_label};
pub use meta::{ObjectKey, ObjectMeta, OwnerReference};
pub use resource::{DynamicObject, Resource, KEEL_API_VERSION};
pub use scheme::{KindInfo, Scheme, SchemeBuilder};
pub use values::{
    ComponentValues, NetworkSpec, PortSpec, ResourceSizing, SourceSpec, StorageMount, Values,
};
pub use workflow::{
    generate_name_suffix, Action, ActionDefinition, ActionDefinitionSpec, RunPhase, Workflow, WorkflowRun,
    WorkflowRunSpec, WorkflowRunStatus, WorkflowSpec,
};
pub use workload::{
    ContainerPort, ContainerSpec, Exposure, ExposurePort, ExposureSpec, Volume, Workload,
    WorkloadSpec,
};

//! Keel Controller - reconciliation runtime and engines
//!
//! Level-triggered controllers converge declared state into cluster objects:
//!
//! - **Runtime**: deduplicating work queue with per-key backoff, watch-fed
//!   controllers with a worker pool and periodic resync
//! - **Application reconciler**: fans an Application out into owned
//!   Components, prunes stale ones and aggregates readiness
//! - **Component reconciler**: builds each Component's Workload and Exposure
//! - **Workflow run engine**: executes a Workflow's actions in order through
//!   the module provisioner, tracking progress in the run's status
//! - **Manager**: runs the three controllers together until shutdown

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod application;
pub mod component;
pub mod config;
mod error;
pub mod manager;
pub mod queue;
pub mod runtime;
pub mod sync;
pub mod workflow;
pub mod workload;

pub use application::ApplicationReconciler;
pub use component::ComponentReconciler;
pub use config::{ControllerConfig, ControllerContext, WorkflowConfig, DEFAULT_SYSTEM_NAMESPACE};
pub use error::{ReconcileError, ReconcileResult};
pub use manager::ControllerManager;
pub use queue::WorkQueue;
pub use runtime::{Action, Controller, Reconciler};
pub use sync::WriteOutcome;
pub use workflow::WorkflowRunReconciler;
pub use workload::{WorkloadBuilder, WorkloadOutcome};

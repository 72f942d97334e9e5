//! Controller manager
//!
//! Runs the Application, Component and WorkflowRun controllers side by side
//! and stops them together.

use crate::application::ApplicationReconciler;
use crate::component::ComponentReconciler;
use crate::config::ControllerContext;
use crate::error::{ReconcileError, ReconcileResult};
use crate::runtime::{Controller, Reconciler};
use crate::workflow::WorkflowRunReconciler;
use keel_types::labels::COMPONENT_LABEL;
use keel_types::{Component, Exposure, Workload};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct ControllerManager {
    ctx: Arc<ControllerContext>,
}

impl ControllerManager {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    fn configure<R: Reconciler>(&self, controller: Controller<R>) -> Controller<R> {
        let config = &self.ctx.controller;
        controller
            .workers(config.workers)
            .backoff(config.backoff_base, config.backoff_max)
    }

    /// Run every controller until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> ReconcileResult<()> {
        let client = self.ctx.client.clone();
        let resync = self.ctx.controller.resync_interval;
        let (stop, stopped) = watch::channel(false);

        let applications = self
            .configure(Controller::new(
                "application",
                ApplicationReconciler::new(self.ctx.clone()),
                client.clone(),
            ))
            .owns::<Component>()
            .resync_every(resync);

        let components = self
            .configure(Controller::new(
                "component",
                ComponentReconciler::new(self.ctx.clone()),
                client.clone(),
            ))
            .watches_label::<Workload>(COMPONENT_LABEL)
            .watches_label::<Exposure>(COMPONENT_LABEL)
            .resync_every(resync);

        // Status writes do not re-trigger a run; failed passes retry through
        // backoff. Resync picks up runs whose events were dropped.
        let runs = self
            .configure(Controller::new(
                "workflow-run",
                WorkflowRunReconciler::new(self.ctx.clone()),
                client,
            ))
            .ignore_status_updates()
            .resync_every(resync);

        let handles: Vec<(&'static str, JoinHandle<ReconcileResult<()>>)> = vec![
            (applications.name(), tokio::spawn(applications.run(stopped.clone()))),
            (components.name(), tokio::spawn(components.run(stopped.clone()))),
            (runs.name(), tokio::spawn(runs.run(stopped))),
        ];
        tracing::info!(controllers = handles.len(), "Controller manager started");

        shutdown.await;
        tracing::info!("Stopping controllers");
        // Receivers live in the controller tasks; a send error means they all exited already
        let _ = stop.send(true);

        let mut failure = None;
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(controller = name, error = %e, "Controller exited with error");
                    failure = Some(e);
                }
                Err(e) => {
                    tracing::error!(controller = name, error = %e, "Controller task panicked");
                    failure = Some(ReconcileError::Task(e.to_string()));
                }
            }
        }

        tracing::info!("Controller manager stopped");
        failure.map_or(Ok(()), Err)
    }
}

//! Server setup and lifecycle management

use crate::bootstrap;
use crate::config::DaemonConfig;
use crate::error::DaemonResult;
use keel_client::{InMemoryCluster, ResourceClient};
use keel_controller::{ControllerContext, ControllerManager};
use keel_provision::{CatalogProvisioner, ManifestCatalog};
use keel_types::Scheme;
use std::future::Future;
use std::sync::Arc;

/// Keel daemon: an in-process cluster driven by the controller manager
pub struct Server {
    cluster: Arc<InMemoryCluster>,
    manager: ControllerManager,
}

impl Server {
    /// Wire the scheme, cluster, catalog provisioner and controllers, then
    /// load any bootstrap objects
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let scheme = Arc::new(Scheme::platform());
        let cluster = Arc::new(InMemoryCluster::new(scheme.clone()));
        let client: Arc<dyn ResourceClient> = cluster.clone();

        let catalog = ManifestCatalog::load_dir(&config.catalog_path)?;
        let provisioner = Arc::new(CatalogProvisioner::new(catalog, client.clone(), scheme));

        if let Some(dir) = &config.bootstrap_path {
            let objects = bootstrap::load_objects(dir)?;
            let total = objects.len();
            let created = bootstrap::seed(&*client, objects).await?;
            tracing::info!(path = %dir.display(), total, created, "Loaded bootstrap objects");
        }

        let ctx = ControllerContext::new(client, provisioner)
            .with_controller_config(config.controller)
            .with_workflow_config(config.workflow);

        Ok(Self {
            cluster,
            manager: ControllerManager::new(Arc::new(ctx)),
        })
    }

    pub fn cluster(&self) -> Arc<InMemoryCluster> {
        self.cluster.clone()
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves
    pub async fn run_until(self, shutdown: impl Future<Output = ()> + Send) -> DaemonResult<()> {
        tracing::info!("Keel daemon running");
        self.manager.run(shutdown).await?;
        tracing::info!("Keel daemon shutting down");
        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

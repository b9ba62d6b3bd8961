//! Service setup and lifecycle management

use crate::config::DaemonConfig;
use crate::error::DaemonResult;
use crate::loader;
use approval_engine::{
    CallbackError, CompletionHandler, StaticDirectory, WorkflowEngine, Workers,
};
use approval_notify::{LogTransport, WebhookTransport};
use approval_types::CompletionEvent;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Logs outcomes for entity types whose owning module has not registered
/// a handler of its own
pub struct LogCompletionHandler;

#[async_trait]
impl CompletionHandler for LogCompletionHandler {
    async fn on_complete(&self, event: &CompletionEvent) -> Result<(), CallbackError> {
        tracing::info!(
            instance_id = %event.instance_id,
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            status = %event.final_status,
            action = event.final_action.as_deref().unwrap_or(""),
            "Approval finished"
        );
        Ok(())
    }
}

/// approvald service
pub struct Service {
    config: DaemonConfig,
    engine: Arc<WorkflowEngine>,
}

impl Service {
    /// Build the engine, load startup data and register transports
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let directory = match &config.data.directory {
            Some(path) => StaticDirectory::from_tenants(loader::load_directory(path)?),
            None => {
                tracing::warn!("No directory file configured; role and manager assignments will not resolve");
                StaticDirectory::new()
            }
        };
        let tenants = directory.tenant_count();

        let engine = WorkflowEngine::new(config.engine.clone()).with_directory(Arc::new(directory));

        if let Some(url) = &config.transports.webhook_url {
            let timeout = Duration::from_secs(config.transports.webhook_timeout_secs);
            engine.register_transport(Arc::new(WebhookTransport::new(url.clone(), timeout)?));
        }
        for channel in &config.transports.log_channels {
            engine.register_transport(Arc::new(LogTransport::new(*channel)));
        }

        let mut entity_types = BTreeSet::new();
        if let Some(path) = &config.data.definitions {
            for definition in loader::load_definitions(path)? {
                entity_types.insert(definition.entity_type.clone());
                let published = engine.register_definition(definition)?;
                tracing::info!(
                    definition_id = %published.id(),
                    name = %published.definition.name,
                    version = published.definition.version,
                    "Definition published"
                );
            }
        }
        let handler: Arc<dyn CompletionHandler> = Arc::new(LogCompletionHandler);
        for entity_type in &entity_types {
            engine.register_completion_handler(entity_type.clone(), handler.clone());
        }

        tracing::info!(
            definitions = engine.registry().count(),
            tenants,
            "Approval engine ready"
        );

        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the workers until `shutdown` completes
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> DaemonResult<()> {
        let (workers, sweep_rx) = Workers::new(self.engine.clone());

        let runner = workers.clone();
        let handle = tokio::spawn(async move {
            runner.start(sweep_rx).await;
        });

        // Catch up on SLAs that expired while the daemon was down
        workers.trigger_sweep().await;

        shutdown.await;
        tracing::info!("approvald shutting down");

        workers.stop().await;
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task ended abnormally");
        }

        // Deliver what the last pass left behind
        let report = workers.run_once().await;
        tracing::info!(
            notifications = report.dispatch.delivered,
            callbacks = report.callbacks.delivered,
            "Final drain complete"
        );
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

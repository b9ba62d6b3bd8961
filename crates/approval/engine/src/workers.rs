//! Background workers: escalation sweep, notification dispatch and
//! completion callbacks, each on its own interval

use crate::callbacks::CallbackReport;
use crate::engine::WorkflowEngine;
use crate::escalation::SweepReport;
use approval_notify::DispatchReport;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration};

/// What one pass of every worker did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub sweep: SweepReport,
    pub dispatch: DispatchReport,
    pub callbacks: CallbackReport,
}

/// Drives the engine's periodic work
pub struct Workers {
    engine: Arc<WorkflowEngine>,
    sweep_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl Workers {
    /// Create the workers; pass the receiver to [`Workers::start`]
    pub fn new(engine: Arc<WorkflowEngine>) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (sweep_tx, sweep_rx) = mpsc::channel(10);
        let workers = Arc::new(Self {
            engine,
            sweep_tx,
            running: Arc::new(RwLock::new(false)),
        });
        (workers, sweep_rx)
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Request an escalation sweep ahead of the interval
    pub async fn trigger_sweep(&self) {
        let _ = self.sweep_tx.send(()).await;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Run every worker once, in order
    pub async fn run_once(&self) -> WorkerReport {
        let sweep = self.engine.sweep_escalations();
        let dispatch = self.engine.dispatch_notifications().await;
        let callbacks = self.engine.drain_callbacks().await;
        WorkerReport {
            sweep,
            dispatch,
            callbacks,
        }
    }

    /// Run the worker loops until [`Workers::stop`] is called
    pub async fn start(self: Arc<Self>, mut sweep_rx: mpsc::Receiver<()>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let config = self.engine.config();
        let sweep_secs = config.escalation_sweep_interval_secs.max(1);
        let dispatch_secs = config.notification_dispatch_interval_secs.max(1);
        let callback_secs = config.callback_drain_interval_secs.max(1);
        tracing::info!(sweep_secs, dispatch_secs, callback_secs, "Workers started");

        // Escalation sweep
        let sweep_workers = self.clone();
        let sweep_handle = tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(sweep_secs));

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    Some(_) = sweep_rx.recv() => {
                        tracing::debug!("Triggered escalation sweep");
                    }
                    else => break,
                }

                let running = sweep_workers.running.read().await;
                if !*running {
                    break;
                }
                drop(running);

                sweep_workers.engine.sweep_escalations();
            }
        });

        // Notification dispatch
        let dispatch_workers = self.clone();
        let dispatch_handle = tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(dispatch_secs));

            loop {
                interval.tick().await;

                let running = dispatch_workers.running.read().await;
                if !*running {
                    break;
                }
                drop(running);

                let report = dispatch_workers.engine.dispatch_notifications().await;
                if report.failed > 0 {
                    tracing::error!(failed = report.failed, "Notifications failed permanently");
                }
            }
        });

        // Completion callbacks
        let callback_workers = self.clone();
        let callback_handle = tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(callback_secs));

            loop {
                interval.tick().await;

                let running = callback_workers.running.read().await;
                if !*running {
                    break;
                }
                drop(running);

                let report = callback_workers.engine.drain_callbacks().await;
                if report.failed > 0 {
                    tracing::error!(failed = report.failed, "Completion callbacks failed permanently");
                }
            }
        });

        // Wait for shutdown
        let _ = tokio::join!(sweep_handle, dispatch_handle, callback_handle);

        tracing::info!("Workers stopped");
    }

    /// Stop the worker loops after their current pass
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        // Wake the sweep loop so it does not sit out a long interval
        let _ = self.sweep_tx.try_send(());
    }
}

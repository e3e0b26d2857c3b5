use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::domain::DomainResult;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{run_polling_loop, DeploymentStepper, RemoteSyncService};

pub type WorkerProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

/// The deployment step poller plus the three remote setup sync loops.
pub struct FuotaWorker {
    stepper: Arc<DeploymentStepper>,
    sync_service: Arc<RemoteSyncService>,
}

impl FuotaWorker {
    pub fn new(stepper: Arc<DeploymentStepper>, sync_service: Arc<RemoteSyncService>) -> Self {
        debug!("initializing FUOTA worker module");
        Self {
            stepper,
            sync_service,
        }
    }

    /// One named runner process per loop.
    pub fn into_runner_processes(self) -> Vec<(&'static str, WorkerProcess)> {
        vec![
            ("fuota-step-worker", self.step_process()),
            (
                "remote-multicast-setup-sync",
                self.sync_process("remote-multicast-setup-sync", |service| async move {
                    service.sync_multicast_setups().await
                }),
            ),
            (
                "remote-fragmentation-session-sync",
                self.sync_process("remote-fragmentation-session-sync", |service| async move {
                    service.sync_fragmentation_sessions().await
                }),
            ),
            (
                "remote-multicast-class-c-session-sync",
                self.sync_process("remote-multicast-class-c-session-sync", |service| async move {
                    service.sync_multicast_class_c_sessions().await
                }),
            ),
        ]
    }

    fn step_process(&self) -> WorkerProcess {
        let stepper = self.stepper.clone();
        Box::new(move |ctx| {
            Box::pin(async move {
                let interval = stepper.config().poll_interval;
                run_polling_loop("fuota-step-worker", interval, ctx, || {
                    let stepper = stepper.clone();
                    async move { stepper.process_due().await }
                })
                .await
            })
        })
    }

    fn sync_process<F, Fut>(&self, name: &'static str, pass: F) -> WorkerProcess
    where
        F: Fn(Arc<RemoteSyncService>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DomainResult<usize>> + Send + 'static,
    {
        let service = self.sync_service.clone();
        Box::new(move |ctx| {
            Box::pin(async move {
                let interval = service.config().interval;
                run_polling_loop(name, interval, ctx, || pass(service.clone())).await
            })
        })
    }
}

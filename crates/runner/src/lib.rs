//! Supervisor for the long-running processes of a service.
//!
//! Every process gets a clone of one [`CancellationToken`]. The first process
//! to fail, SIGINT or SIGTERM cancels the token. Once all processes have
//! stopped the closers run under a shared timeout.
//!
//! ```no_run
//! use lpwan_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_named_process("ticker", |ctx| async move {
//!             let mut interval = tokio::time::interval(Duration::from_secs(1));
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = interval.tick() => tracing::info!("tick"),
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type BoxedResultFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A process started with the runner's cancellation token.
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedResultFuture + Send>;

/// Cleanup run after every process has stopped.
pub type Closer = Box<dyn FnOnce() -> BoxedResultFuture + Send>;

struct NamedProcess {
    name: String,
    process: AppProcess,
}

pub struct Runner {
    processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// No processes, no closers and a 10 second closer timeout.
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.processes.push(NamedProcess {
            name: name.into(),
            process: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = format!("process-{}", self.processes.len());
        self.with_named_process(name, process)
    }

    /// Closers run concurrently. A failing closer does not stop the others.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Turns off SIGINT/SIGTERM handling, leaving shutdown to the token.
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Runs until shutdown and exits the process: status 1 when a process
    /// failed, 0 otherwise.
    pub async fn run(self) {
        match self.run_until_stopped().await {
            Ok(()) => {
                info!("application exiting normally");
                std::process::exit(0);
            }
            Err(err) => {
                error!("application exiting with error: {:#}", err);
                std::process::exit(1);
            }
        }
    }

    /// Runs every process until one fails or the token is cancelled, then
    /// runs the closers. Returns the first process error.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;

        if self.handle_signals {
            spawn_signal_handlers(token.clone());
        }

        let mut join_set = JoinSet::new();
        for NamedProcess { name, process } in self.processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                info!(process = %name, "starting process");
                let result = process(process_token).await;
                (name, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(process = %name, "process stopped");
                }
                Ok((name, Err(err))) => {
                    if token.is_cancelled() {
                        warn!(process = %name, "process failed during shutdown: {:#}", err);
                    } else {
                        error!(process = %name, "process failed: {:#}", err);
                        first_error = Some(err.context(format!("process {} failed", name)));
                        token.cancel();
                    }
                }
                Err(err) => {
                    error!("process panicked: {}", err);
                    if first_error.is_none() && !token.is_cancelled() {
                        first_error = Some(anyhow::anyhow!("process panicked: {}", err));
                    }
                    token.cancel();
                }
            }
        }

        if !self.closers.is_empty() {
            info!("running closers with timeout of {:?}", self.closer_timeout);
            match tokio::time::timeout(self.closer_timeout, run_closers(self.closers)).await {
                Ok(()) => info!("all closers completed"),
                Err(_) => error!("closers timed out after {:?}", self.closer_timeout),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT");
                ctrl_c_token.cancel();
            }
            Err(err) => error!("failed to listen for SIGINT: {}", err),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM");
                token.cancel();
            }
            Err(err) => error!("failed to listen for SIGTERM: {}", err),
        }
    });
}

async fn run_closers(closers: Vec<Closer>) {
    let mut closer_set = JoinSet::new();
    for closer in closers {
        closer_set.spawn(closer());
    }

    while let Some(joined) = closer_set.join_next().await {
        match joined {
            Ok(Ok(())) => debug!("closer completed"),
            Ok(Err(err)) => error!("closer failed: {:#}", err),
            Err(err) => error!("closer panicked: {}", err),
        }
    }
}

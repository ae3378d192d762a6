//! Handler registry.
//!
//! `FaasServer` is an explicit registry of workers: construct it with a
//! configuration, register one or more handlers, then run it. Each handler
//! gets its own `Worker` and therefore its own stream to the runtime.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::error::{FaasError, FaasResult};
use crate::worker::{TriggerHandler, Worker, WorkerId};

/// Registry of handlers sharing one runtime address.
#[derive(Debug)]
pub struct FaasServer {
    config: WorkerConfig,
    workers: Vec<Worker>,
}

impl Default for FaasServer {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

impl FaasServer {
    /// Empty registry; every worker connects with `config`.
    #[must_use]
    pub const fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            workers: Vec::new(),
        }
    }

    /// Server configured from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(WorkerConfig::from_env())
    }

    /// Settings shared by all workers.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Registers a handler, returning the id of the worker that will serve it.
    pub fn register(&mut self, handler: impl TriggerHandler) -> WorkerId {
        self.register_arc(Arc::new(handler))
    }

    /// Registers a shared handler.
    pub fn register_arc(&mut self, handler: Arc<dyn TriggerHandler>) -> WorkerId {
        let worker = Worker::from_arc(handler, self.config.clone());
        let id = worker.id();
        info!(worker = %id, "handler registered");
        self.workers.push(worker);
        id
    }

    /// Builder-style [`FaasServer::register`].
    #[must_use]
    pub fn with_handler(mut self, handler: impl TriggerHandler) -> Self {
        self.register(handler);
        self
    }

    /// Registered workers, in registration order.
    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter()
    }

    /// Number of registered workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns true if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Runs every registered worker until all streams end.
    pub async fn run(self) -> FaasResult<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Runs every registered worker until all streams end or `shutdown`
    /// resolves.
    ///
    /// The first worker to fail stops the others; its error is returned.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> FaasResult<()>
    where
        F: Future<Output = ()>,
    {
        if self.workers.is_empty() {
            return Err(FaasError::config("no handlers registered"));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for worker in self.workers {
            let stop_rx = stop_rx.clone();
            tasks.spawn(async move {
                let id = worker.id();
                let result = worker.run_with_shutdown(wait_for_stop(stop_rx)).await;
                (id, result)
            });
        }
        info!(workers = tasks.len(), address = %self.config.service_address, "faas server started");

        tokio::pin!(shutdown);
        let mut stopping = false;

        loop {
            tokio::select! {
                () = &mut shutdown, if !stopping => {
                    info!("faas server shutting down");
                    stopping = true;
                    stop_tx.send_replace(true);
                }
                joined = tasks.join_next() => match joined {
                    None => {
                        info!("faas server stopped");
                        return Ok(());
                    }
                    Some(Ok((id, Ok(())))) => {
                        info!(worker = %id, "worker stopped");
                    }
                    Some(Ok((id, Err(err)))) => {
                        error!(worker = %id, error = %err, "worker failed, stopping remaining workers");
                        stop_tx.send_replace(true);
                        tasks.shutdown().await;
                        return Err(err);
                    }
                    Some(Err(join_err)) => {
                        error!(error = %join_err, "worker task aborted");
                        stop_tx.send_replace(true);
                        tasks.shutdown().await;
                        return Err(FaasError::internal(format!("worker task aborted: {join_err}")));
                    }
                },
            }
        }
    }
}

async fn wait_for_stop(mut stop: watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

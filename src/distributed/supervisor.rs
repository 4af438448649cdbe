//! Supervised local worker pool
//!
//! Starts a set of worker services inside the current process, each on its
//! own tokio task with its own shutdown signal. The pool hands out the
//! workers' addresses as a roster; coordinators reach them over TCP like any
//! remote worker, never through an in-process handle.

use crate::config::WorkerConfig;
use crate::distributed::coordinator::WorkerAddr;
use crate::distributed::worker_service::WorkerService;
use crate::task::OperationRegistry;
use crate::Result;
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct SupervisedWorker {
    addr: WorkerAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<()>>>,
}

/// Worker pool
///
/// Dropping the pool drops every shutdown sender, which also stops the
/// workers' accept loops; [`WorkerPool::shutdown`] additionally waits for them.
pub struct WorkerPool {
    workers: Vec<SupervisedWorker>,
}

impl WorkerPool {
    /// Bind and start `count` workers
    ///
    /// `registry_for` builds each worker's registry from that worker's node id.
    /// With `config.port == 0` every worker gets an ephemeral port; otherwise
    /// workers use consecutive ports starting at `config.port`. If any bind
    /// fails, workers already started are stopped and the error is returned.
    pub async fn start<F>(config: &WorkerConfig, count: usize, registry_for: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<OperationRegistry>,
    {
        if count == 0 {
            anyhow::bail!("Worker pool needs at least one worker");
        }

        let mut pool = Self {
            workers: Vec::with_capacity(count),
        };

        for index in 0..count {
            match Self::start_one(config, index, &registry_for).await {
                Ok(worker) => pool.workers.push(worker),
                Err(e) => {
                    pool.shutdown().await?;
                    return Err(e.context(format!("Failed to start worker {}", index)));
                }
            }
        }

        info!(workers = count, "worker pool started");
        Ok(pool)
    }

    async fn start_one<F>(config: &WorkerConfig, index: usize, registry_for: &F) -> Result<SupervisedWorker>
    where
        F: Fn(&str) -> Result<OperationRegistry>,
    {
        let port = if config.port == 0 {
            0
        } else {
            u16::try_from(index)
                .ok()
                .and_then(|i| config.port.checked_add(i))
                .with_context(|| format!("Port range exhausted at worker {}", index))?
        };

        let node_id = match &config.node_id {
            Some(id) => format!("{}-{}", id, index),
            None => format!("local-{}", index),
        };
        let registry = registry_for(&node_id)?;
        let worker_config = WorkerConfig {
            port,
            node_id: Some(node_id),
            ..config.clone()
        };

        let service = WorkerService::bind(&worker_config, Arc::new(registry)).await?;
        let local = service.local_addr()?;
        let addr = WorkerAddr::new(config.host.clone(), local.port());

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(service.run_until(async move {
            let _ = rx.await;
        }));

        Ok(SupervisedWorker {
            addr,
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    /// Addresses of every worker, in start order
    pub fn roster(&self) -> Vec<WorkerAddr> {
        self.workers.iter().map(|w| w.addr.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Whether worker `index` is still serving
    pub fn is_running(&self, index: usize) -> bool {
        self.workers
            .get(index)
            .and_then(|w| w.handle.as_ref())
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Number of workers still serving
    pub fn running(&self) -> usize {
        (0..self.workers.len()).filter(|&i| self.is_running(i)).count()
    }

    /// Stop one worker and wait for its accept loop to exit
    ///
    /// The worker's address stays in the roster; connections to it are refused.
    pub async fn stop(&mut self, index: usize) -> Result<()> {
        let worker = self
            .workers
            .get_mut(index)
            .with_context(|| format!("No worker at index {}", index))?;

        if let Some(tx) = worker.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = worker.handle.take() {
            handle
                .await
                .with_context(|| format!("Worker {} task panicked", worker.addr))??;
            info!(worker = %worker.addr, "worker stopped");
        }
        Ok(())
    }

    /// Stop every worker
    pub async fn shutdown(mut self) -> Result<()> {
        let mut first_error = None;
        for index in 0..self.workers.len() {
            if let Err(e) = self.stop(index).await {
                warn!(error = %e, "worker did not stop cleanly");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

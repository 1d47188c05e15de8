//! Estimator worker pool.
//!
//! Pose models keep per-stream state and are not safe to share, so every
//! worker thread owns its own estimator. Requests reach the workers through a
//! bounded queue; a full queue is reported to the client instead of growing
//! without limit.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use pose_core::PoseEstimator;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::service::{
    config::PipelineOptions,
    data::{ProcessedImage, Upload},
    error::ServiceError,
    pipeline,
    storage::Storage,
    telemetry::spawn_thread,
};

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Builds the estimator owned by worker `index`. Runs on the worker thread.
pub type EstimatorFactory = dyn Fn(usize) -> Result<Box<dyn PoseEstimator>> + Send + Sync;

type Reply = oneshot::Sender<Result<ProcessedImage, ServiceError>>;

struct Job {
    upload: Upload,
    reply: Reply,
}

pub struct EstimatorPool {
    jobs: Sender<Job>,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl EstimatorPool {
    /// Spawn `workers` threads and wait until every estimator is loaded.
    pub fn start<F>(
        factory: F,
        workers: usize,
        queue_capacity: usize,
        storage: Arc<Storage>,
        opts: PipelineOptions,
    ) -> Result<Self>
    where
        F: Fn(usize) -> Result<Box<dyn PoseEstimator>> + Send + Sync + 'static,
    {
        let workers = workers.max(1);
        let factory: Arc<EstimatorFactory> = Arc::new(factory);
        let (jobs_tx, jobs_rx) = crossbeam_channel::bounded::<Job>(queue_capacity.max(1));
        let (init_tx, init_rx) = crossbeam_channel::unbounded::<Result<String, String>>();
        let running = Arc::new(AtomicBool::new(true));

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let handle = spawn_worker(
                index,
                factory.clone(),
                jobs_rx.clone(),
                init_tx.clone(),
                storage.clone(),
                opts,
                running.clone(),
            )
            .with_context(|| format!("failed to spawn pose worker #{index}"))?;
            handles.push(handle);
        }
        drop(init_tx);
        drop(jobs_rx);

        let pool = Self {
            jobs: jobs_tx,
            running,
            handles: Mutex::new(handles),
        };

        for _ in 0..workers {
            match init_rx.recv() {
                Ok(Ok(message)) => info!("{message}"),
                Ok(Err(message)) => {
                    pool.shutdown();
                    bail!(message);
                }
                Err(_) => {
                    pool.shutdown();
                    bail!("pose workers exited during initialisation");
                }
            }
        }

        Ok(pool)
    }

    /// Queue an upload without waiting for it. Fails fast when the queue is
    /// full or no worker is left to serve it.
    pub fn enqueue(
        &self,
        upload: Upload,
    ) -> Result<oneshot::Receiver<Result<ProcessedImage, ServiceError>>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        match self.jobs.try_send(Job { upload, reply }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(ServiceError::Busy),
            Err(TrySendError::Disconnected(_)) => return Err(ServiceError::WorkersUnavailable),
        }
        metrics::gauge!("pose_queue_depth").set(self.jobs.len() as f64);
        Ok(rx)
    }

    /// Queue an upload and wait for its result.
    pub async fn submit(&self, upload: Upload) -> Result<ProcessedImage, ServiceError> {
        let rx = self.enqueue(upload)?;
        rx.await.map_err(|_| ServiceError::WorkersUnavailable)?
    }

    pub fn queue_depth(&self) -> usize {
        self.jobs.len()
    }

    /// Stop the workers and wait for them. Queued jobs are dropped.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        for handle in handles {
            if handle.join().is_err() {
                error!("pose worker panicked during shutdown");
            }
        }
    }
}

impl Drop for EstimatorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(
    index: usize,
    factory: Arc<EstimatorFactory>,
    jobs: Receiver<Job>,
    init_tx: Sender<Result<String, String>>,
    storage: Arc<Storage>,
    opts: PipelineOptions,
    running: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    spawn_thread(format!("pose-worker-{index}"), move || {
        let mut estimator = match factory(index) {
            Ok(estimator) => {
                let ready = format!("worker #{index}: {} ready", estimator.describe());
                if init_tx.send(Ok(ready)).is_err() {
                    return;
                }
                estimator
            }
            Err(err) => {
                let _ = init_tx.send(Err(format!(
                    "worker #{index}: failed to load estimator: {err:#}"
                )));
                return;
            }
        };
        drop(init_tx);
        drop(factory);

        while running.load(Ordering::Relaxed) {
            let Job { upload, reply } = match jobs.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            metrics::gauge!("pose_queue_depth").set(jobs.len() as f64);

            let key = upload.key.clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                pipeline::process_upload(estimator.as_mut(), &storage, upload, &opts)
            }))
            .unwrap_or_else(|_| {
                error!("worker #{index}: estimator panicked on {}", key.as_str());
                Err(ServiceError::Estimator(anyhow!("estimator panicked")))
            });

            if reply.send(outcome).is_err() {
                debug!("worker #{index}: client for {} went away", key.as_str());
            }
        }
        debug!("worker #{index} stopped");
    })
}

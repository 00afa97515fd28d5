//! Single-writer job queue.
//!
//! Every mutation of the store is a [`WriteJob`]. Jobs are drained by exactly
//! one tokio task, each inside its own transaction, so no two transactions
//! ever run concurrently and jobs commit in submission order. A job that
//! fails is rolled back as a whole.
//!
//! [`WriteJob::committed`] runs on the worker after a successful commit. The
//! in-memory caches are maintained from there, which keeps cache updates in
//! the same order as the writes that produced them.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A unit of work executed inside one transaction on the writer task.
#[async_trait]
pub trait WriteJob: Send + 'static {
    type Output: Send + 'static;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Perform the writes. Returning an error rolls the transaction back.
    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<Self::Output>;

    /// Called on the writer task once the transaction has committed.
    fn committed(&mut self, _output: &Self::Output) {}
}

#[async_trait]
trait Envelope: Send {
    fn name(&self) -> &'static str;
    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<()>;
    fn finish(self: Box<Self>, result: Result<()>);
}

struct Pending<J: WriteJob> {
    job: J,
    output: Option<J::Output>,
    done: Option<oneshot::Sender<Result<J::Output>>>,
}

#[async_trait]
impl<J: WriteJob> Envelope for Pending<J> {
    fn name(&self) -> &'static str {
        self.job.name()
    }

    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        let output = self.job.run(conn).await?;
        self.output = Some(output);
        Ok(())
    }

    fn finish(mut self: Box<Self>, result: Result<()>) {
        let outcome = match (result, self.output.take()) {
            (Ok(()), Some(output)) => {
                self.job.committed(&output);
                Ok(output)
            }
            (Ok(()), None) => Err(Error::Other(format!(
                "write job '{}' committed without output",
                self.job.name()
            ))),
            (Err(err), _) => Err(err),
        };

        if let Some(done) = self.done.take() {
            // The caller may have stopped waiting; nothing to report then.
            let _ = done.send(outcome);
        }
    }
}

/// Handle to the writer task.
pub struct WriteQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Box<dyn Envelope>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteQueue {
    /// Start the writer task. Must be called from within a tokio runtime.
    pub fn spawn(pool: SqlitePool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(pool, rx));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    fn enqueue(&self, envelope: Box<dyn Envelope>) -> Result<()> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(Error::QueueClosed)?;
        tx.send(envelope).map_err(|_| Error::QueueClosed)
    }

    /// Enqueue a job and return immediately. Failures are logged by the
    /// worker and otherwise dropped.
    pub fn submit<J: WriteJob>(&self, job: J) -> Result<()> {
        self.enqueue(Box::new(Pending {
            job,
            output: None,
            done: None,
        }))
    }

    /// Enqueue a job and wait until it has committed or rolled back.
    pub async fn run_sync<J: WriteJob>(&self, job: J) -> Result<J::Output> {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(Box::new(Pending {
            job,
            output: None,
            done: Some(done_tx),
        }))?;
        done_rx.await.map_err(|_| Error::QueueClosed)?
    }

    /// Wait until every job submitted before this call has finished.
    pub async fn flush(&self) -> Result<()> {
        self.run_sync(Barrier).await
    }

    /// Stop accepting jobs, drain what is queued and join the worker.
    pub async fn shutdown(&self) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(tx);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!(error = %err, "write queue worker ended abnormally");
            }
        }
    }
}

struct Barrier;

#[async_trait]
impl WriteJob for Barrier {
    type Output = ();

    fn name(&self) -> &'static str {
        "barrier"
    }

    async fn run(&mut self, _conn: &mut SqliteConnection) -> Result<()> {
        Ok(())
    }
}

async fn run_worker(pool: SqlitePool, mut rx: mpsc::UnboundedReceiver<Box<dyn Envelope>>) {
    while let Some(mut job) = rx.recv().await {
        let name = job.name();
        let result = execute(&pool, job.as_mut()).await;
        if let Err(err) = &result {
            warn!(job = name, error = %err, "write job rolled back");
        }
        job.finish(result);
    }
    debug!("write queue drained");
}

async fn execute(pool: &SqlitePool, job: &mut dyn Envelope) -> Result<()> {
    let mut tx = pool.begin().await?;
    match job.run(&mut *tx).await {
        Ok(()) => {
            tx.commit().await?;
            Ok(())
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(job = job.name(), error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

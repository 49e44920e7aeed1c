// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;
use std::time::Duration;

use airbag::{Classification, Classify};
use stowage::DurableStore;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::{Connectivity, NackOutcome, OfflineQueue, QueuedMutation, Result};

/// Delivers queued mutations to the server.
///
/// A failure is classified to decide its fate: retryable failures reschedule the mutation,
/// terminal ones remove it as rejected.
///
/// Any `Fn(&QueuedMutation) -> impl Future<Output = Result<(), E>>` closure is a sender.
pub trait MutationSender: Send + Sync {
    /// The failure reported for a mutation that was not accepted.
    type Error: Classify + Display + Send;

    /// Sends one mutation.
    fn send(&self, mutation: &QueuedMutation) -> impl Future<Output = std::result::Result<(), Self::Error>> + Send;
}

impl<F, Fut, E> MutationSender for F
where
    F: Fn(&QueuedMutation) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), E>> + Send,
    E: Classify + Display + Send,
{
    type Error = E;

    fn send(&self, mutation: &QueuedMutation) -> impl Future<Output = std::result::Result<(), E>> + Send {
        self(mutation)
    }
}

/// Counts of what one [`OfflineQueue::drain`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct DrainReport {
    /// Mutations the server accepted.
    pub acked: usize,
    /// Mutations scheduled for another attempt.
    pub rescheduled: usize,
    /// Mutations removed as exhausted or rejected.
    pub failed: usize,
}

impl DrainReport {
    /// Returns `true` if the pass sent nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.acked == 0 && self.rescheduled == 0 && self.failed == 0
    }
}

impl<S: DurableStore> OfflineQueue<S> {
    /// Sends every ready mutation once, in replay order, until none is ready.
    ///
    /// Mutations that share a dedupe key go out one after another, never together.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot record an outcome. Mutations taken but not yet
    /// settled are released so a later pass retries them.
    pub async fn drain<M: MutationSender>(&self, sender: &M) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        loop {
            let batch = self.dequeue_ready(self.inner.options.get_batch_size());
            if batch.is_empty() {
                return Ok(report);
            }

            let mut batch = batch.into_iter();
            while let Some(mutation) = batch.next() {
                let id = mutation.id();
                if let Err(error) = self.settle(sender, &mutation, &mut report).await {
                    self.release(id);
                    batch.for_each(|rest| {
                        self.release(rest.id());
                    });
                    return Err(error);
                }
            }
        }
    }

    async fn settle<M: MutationSender>(&self, sender: &M, mutation: &QueuedMutation, report: &mut DrainReport) -> Result<()> {
        let id = mutation.id();
        match sender.send(mutation).await {
            Ok(()) => {
                self.ack(id).await?;
                report.acked += 1;
            }
            Err(error) if error.classify() == Classification::Retryable => {
                tracing::event!(
                    name: "outbox.send",
                    tracing::Level::DEBUG,
                    queue.mutation = %id,
                    error = %error,
                    "mutation send failed",
                );
                match self.nack(id).await? {
                    NackOutcome::Rescheduled { .. } => report.rescheduled += 1,
                    NackOutcome::Exhausted(_) => report.failed += 1,
                }
            }
            Err(error) => {
                tracing::event!(
                    name: "outbox.send",
                    tracing::Level::WARN,
                    queue.mutation = %id,
                    error = %error,
                    "mutation rejected",
                );
                self.fail(id).await?;
                report.failed += 1;
            }
        }
        Ok(())
    }
}

impl<S: DurableStore + 'static> OfflineQueue<S> {
    /// Starts a task that replays the queue whenever the device is online.
    ///
    /// The task drains the queue each time `connectivity` switches to
    /// [`Connectivity::Connected`]. While connected it sleeps until the earliest rescheduled
    /// mutation is ready or a new mutation arrives; while disconnected it sleeps until the
    /// connectivity changes. It never polls. The task ends when the handle is stopped or
    /// dropped, or when the connectivity signal goes away.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn_drainer<M>(&self, sender: M, mut connectivity: watch::Receiver<Connectivity>) -> DrainerHandle
    where
        M: MutationSender + 'static,
    {
        let queue = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                let connected = connectivity.borrow_and_update().is_connected();

                if connected {
                    match queue.drain(&sender).await {
                        Ok(report) if !report.is_empty() => tracing::event!(
                            name: "outbox.drain",
                            tracing::Level::DEBUG,
                            queue.acked = report.acked,
                            queue.rescheduled = report.rescheduled,
                            queue.failed = report.failed,
                        ),
                        Ok(_) => {}
                        Err(error) => tracing::event!(
                            name: "outbox.drain",
                            tracing::Level::ERROR,
                            error = %error,
                            "queue replay failed",
                        ),
                    }
                }

                let sleep = match queue.next_ready_at().filter(|_| connected) {
                    Some(at) => queue.inner.clock.delay_until(at),
                    None => queue.inner.clock.delay(Duration::MAX),
                };

                tokio::select! {
                    _ = &mut stop_rx => break,
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = queue.inner.wakeup.notified(), if connected => {}
                    () = sleep => {}
                }
            }
        });

        DrainerHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// Controls a drainer started by [`OfflineQueue::spawn_drainer`].
#[derive(Debug)]
pub struct DrainerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DrainerHandle {
    /// Stops the drainer and waits for it to finish the send in progress.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for DrainerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

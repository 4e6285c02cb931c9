//! Per-key serializer.
//!
//! Every fingerprint with pending work owns a small inbox drained by exactly
//! one task, so mutations on a key are totally ordered and waiters observe
//! FIFO order. Idle inboxes are torn down to keep the map from growing with
//! the keyspace.
//!
//! Teardown handshake: submitters always send while holding the map entry for
//! the key, and a worker only removes its entry while the map shard is locked
//! and its inbox is empty. A send therefore never lands in an abandoned inbox.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::algorithms;
use crate::clock::Clock;
use crate::common::{CheckRequest, CounterState, Fingerprint, RateLimitResponse};
use crate::error::PeermitError;
use crate::global::accept_update;
use crate::store::CounterStore;

pub(crate) enum Job {
    /// Apply the request's algorithm against the store and report the result.
    Check {
        request: CheckRequest,
        reply: oneshot::Sender<Result<(RateLimitResponse, CounterState), PeermitError>>,
    },
    /// Write broadcast state into the local shadow copy, subject to the
    /// monotonic acceptance rule.
    ApplyUpdate {
        fingerprint: Fingerprint,
        state: CounterState,
        reply: oneshot::Sender<bool>,
    },
}

/// Owner of the per-key inboxes and the counter store behind them.
pub(crate) struct KeyWorkers {
    inboxes: Arc<DashMap<Fingerprint, mpsc::Sender<Job>>>,
    store: Arc<Mutex<CounterStore>>,
    clock: Arc<dyn Clock>,
    inbox_capacity: usize,
    shutting_down: Arc<AtomicBool>,
}

impl KeyWorkers {
    pub(crate) fn new(
        store: Arc<Mutex<CounterStore>>,
        clock: Arc<dyn Clock>,
        inbox_capacity: usize,
    ) -> Self {
        Self {
            inboxes: Arc::new(DashMap::new()),
            store,
            clock,
            inbox_capacity: inbox_capacity.max(1),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Apply a validated request line on this node, waiting until `deadline`.
    pub(crate) async fn check(
        &self,
        request: CheckRequest,
        deadline: Instant,
    ) -> Result<(RateLimitResponse, CounterState), PeermitError> {
        let (reply, rx) = oneshot::channel();
        let fingerprint = request.fingerprint;
        self.submit(fingerprint, Job::Check { request, reply })?;

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PeermitError::Cancelled("worker went away".into())),
            Err(_) => Err(PeermitError::Deadline("timed out waiting for key worker".into())),
        }
    }

    /// Apply a broadcast update through the key's serializer. Returns whether
    /// the update was accepted.
    pub(crate) async fn apply_update(
        &self,
        fingerprint: Fingerprint,
        state: CounterState,
    ) -> Result<bool, PeermitError> {
        let (reply, rx) = oneshot::channel();
        self.submit(fingerprint, Job::ApplyUpdate { fingerprint, state, reply })?;
        rx.await
            .map_err(|_| PeermitError::Cancelled("worker went away".into()))
    }

    /// Live state probe that leaves recency untouched.
    pub(crate) fn peek(&self, fingerprint: Fingerprint) -> Option<CounterState> {
        let now_ms = self.clock.now_millis();
        self.store
            .lock()
            .expect("counter store lock poisoned")
            .peek(fingerprint, now_ms)
    }

    /// Number of keys that currently have a live inbox.
    #[cfg(test)]
    pub(crate) fn active_inboxes(&self) -> usize {
        self.inboxes.len()
    }

    /// Abandon pending work. Queued jobs are answered `CANCELLED`.
    pub(crate) fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.inboxes.clear();
    }

    fn submit(&self, fingerprint: Fingerprint, job: Job) -> Result<(), PeermitError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PeermitError::Cancelled("shutting down".into()));
        }

        let mut job = job;
        loop {
            let send_result = {
                let entry = self
                    .inboxes
                    .entry(fingerprint)
                    .or_insert_with(|| self.spawn_worker(fingerprint));
                entry.try_send(job)
            };

            match send_result {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    return Err(PeermitError::QueueFull(format!(
                        "inbox for key {fingerprint:x} is full"
                    )));
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => {
                    // The worker exited between our lookup and the send; drop
                    // the dead sender and retry with a fresh worker.
                    job = returned;
                    self.inboxes.remove_if(&fingerprint, |_, sender| sender.is_closed());
                }
            }
        }
    }

    fn spawn_worker(&self, fingerprint: Fingerprint) -> mpsc::Sender<Job> {
        let (sender, mut rx) = mpsc::channel(self.inbox_capacity);
        let inboxes = Arc::clone(&self.inboxes);
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let shutting_down = Arc::clone(&self.shutting_down);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                process(&store, clock.as_ref(), &shutting_down, job);

                // Opportunistically drain whatever queued up behind us.
                while let Ok(job) = rx.try_recv() {
                    process(&store, clock.as_ref(), &shutting_down, job);
                }

                // Tear down when idle. The removal predicate runs under the
                // shard lock, so no submitter can slip a job in between the
                // emptiness check and the removal.
                if inboxes
                    .remove_if(&fingerprint, |_, _| rx.is_empty())
                    .is_some()
                {
                    break;
                }
            }
        });

        sender
    } // end method spawn_worker
}

fn process(
    store: &Mutex<CounterStore>,
    clock: &dyn Clock,
    shutting_down: &AtomicBool,
    job: Job,
) {
    if shutting_down.load(Ordering::SeqCst) {
        match job {
            Job::Check { reply, .. } => {
                let _ = reply.send(Err(PeermitError::Cancelled("shutting down".into())));
            }
            Job::ApplyUpdate { reply, .. } => {
                let _ = reply.send(false);
            }
        }
        return;
    }

    let now_ms = clock.now_millis();
    match job {
        Job::Check { request, reply } => {
            let result = {
                let mut store = store.lock().expect("counter store lock poisoned");
                let previous = store.get(request.fingerprint, now_ms);
                let (state, response) = algorithms::apply(previous, &request, now_ms);
                store.upsert(request.fingerprint, state, now_ms);
                (response, state)
            };
            let _ = reply.send(Ok(result));
        }
        Job::ApplyUpdate { fingerprint, state, reply } => {
            let accepted = {
                let mut store = store.lock().expect("counter store lock poisoned");
                let held = store.get(fingerprint, now_ms);
                let accepted = accept_update(held.as_ref(), &state);
                if accepted {
                    store.upsert(fingerprint, state, now_ms);
                }
                accepted
            };
            let _ = reply.send(accepted);
        }
    }
}

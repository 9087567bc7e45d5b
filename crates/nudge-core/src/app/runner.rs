//! JobRunner - poll → claim → handle → release
//!
//! 1 つの runner が登録済みの全 job kind を担当します。
//! - poll ごとに kind 単位で `min(全体の空き, kind の空き)` 件だけ claim
//! - 各 job は専用の tokio task で実行（global + kind の permit を保持）
//! - handler の失敗は release に反映するだけで、ループは止めない
//! - 複数の runner が同じ store を共有しても、claim は store 側で排他される

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::registry::{HandlerRegistry, JobHandler};
use crate::config::SchedulerConfig;
use crate::domain::{JobKind, RunOutcome, StoreError};
use crate::queue::{ClaimRequest, ClaimedJob, JobStore, ReleaseOutcome};

pub struct JobRunner {
    store: Arc<dyn JobStore>,
    registry: HandlerRegistry,
    worker_id: String,
    poll_interval: Duration,
    lease: chrono::Duration,
    global: Arc<Semaphore>,
    per_kind: HashMap<JobKind, Arc<Semaphore>>,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>, registry: HandlerRegistry, config: &SchedulerConfig) -> Self {
        let per_kind = registry
            .registrations()
            .map(|(kind, reg)| (kind.clone(), Arc::new(Semaphore::new(reg.concurrency))))
            .collect();
        Self {
            store,
            registry,
            worker_id: config.worker_id.clone(),
            poll_interval: config.poll_interval(),
            lease: config.lock_lifetime(),
            global: Arc::new(Semaphore::new(config.max_concurrency)),
            per_kind,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim what is due right now, run it, and wait for those handlers.
    /// Returns the number of jobs executed.
    pub async fn poll_once(&self) -> usize {
        let mut in_flight = JoinSet::new();
        let dispatched = self.dispatch_due(&mut in_flight).await;
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }
        dispatched
    }

    /// Claim and spawn without waiting. Permits travel with each job, so the
    /// ceilings hold across overlapping polls.
    async fn dispatch_due(&self, in_flight: &mut JoinSet<()>) -> usize {
        let mut dispatched = 0;
        for (kind, reg) in self.registry.registrations() {
            let Some(kind_slots) = self.per_kind.get(kind) else {
                continue;
            };

            let mut permits = Vec::new();
            while let Ok(global) = Arc::clone(&self.global).try_acquire_owned() {
                match Arc::clone(kind_slots).try_acquire_owned() {
                    Ok(local) => permits.push((global, local)),
                    Err(_) => break,
                }
            }
            if permits.is_empty() {
                continue;
            }

            let request = ClaimRequest {
                kind,
                worker_id: &self.worker_id,
                limit: permits.len(),
                lease: self.lease,
            };
            let claimed = match self.store.claim_due_jobs(request).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(kind = %kind, error = %e, "claim failed");
                    continue;
                }
            };
            if !claimed.is_empty() {
                debug!(kind = %kind, count = claimed.len(), free = permits.len(), "claimed due jobs");
            }

            // unused permits drop here
            for (claimed, permits) in claimed.into_iter().zip(permits) {
                let store = Arc::clone(&self.store);
                let handler = Arc::clone(&reg.handler);
                in_flight.spawn(run_job(store, handler, claimed, permits));
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Start the poll loop on its own task.
    pub fn spawn(self) -> RunnerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        RunnerHandle { shutdown_tx, join }
    }

    /// Poll until shutdown is requested (or the sender is dropped), then wait
    /// for in-flight handlers. Running handlers are never cancelled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            worker_id = %self.worker_id,
            kinds = self.registry.len(),
            poll_interval_secs = self.poll_interval.as_secs(),
            "job runner started"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            self.dispatch_due(&mut in_flight).await;
            while let Some(joined) = in_flight.try_join_next() {
                log_join(joined);
            }
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "waiting for running jobs");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }
        info!(worker_id = %self.worker_id, "job runner stopped");
    }
}

/// Handle to a spawned runner.
/// - `request_shutdown()` で新しい claim を止める
/// - `shutdown_and_join()` で実行中の handler まで待つ
pub struct RunnerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RunnerHandle {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "job runner task panicked");
        }
    }
}

async fn run_job(
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    claimed: ClaimedJob,
    _permits: (OwnedSemaphorePermit, OwnedSemaphorePermit),
) {
    let ClaimedJob { job, lease_id } = claimed;
    let span = info_span!("job", job_id = %job.id, kind = %job.kind, attempt = job.attempts);

    async move {
        let outcome = match handler.handle(&job).await {
            Ok(()) => RunOutcome::Success,
            Err(e) => {
                warn!(error = %e, "handler failed");
                RunOutcome::failure(e.to_string())
            }
        };

        match store.release_job(job.id, lease_id, outcome).await {
            Ok(ReleaseOutcome::Failed) => {
                if let Err(e) = handler.on_exhausted(&job).await {
                    error!(error = %e, "exhausted hook failed");
                }
            }
            Ok(ReleaseOutcome::RetryScheduled { fire_at }) => {
                info!(fire_at = %fire_at, "retry scheduled");
            }
            Ok(released) => debug!(?released, "job released"),
            Err(StoreError::LeaseLost(_)) => {
                warn!("lease expired before release; job was reclaimed");
            }
            Err(e) => error!(error = %e, "release failed"),
        }
    }
    .instrument(span)
    .await
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        // the job stays running until its lease expires, then it is reclaimed
        error!(error = %e, "job task panicked");
    }
}

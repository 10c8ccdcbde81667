//! In-memory job status store.
//!
//! Holds a snapshot per job, the cancellation channel of every job and a
//! pointer to the most recently submitted job (used by the legacy polling
//! endpoints). Nothing survives a restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use bgswap_models::{FrameOutcome, JobId, JobPaths, JobReport, JobSnapshot, JobState};

use crate::error::{WorkerError, WorkerResult};

/// The latest job together with where its files live.
#[derive(Debug, Clone)]
pub struct LatestJob {
    pub snapshot: JobSnapshot,
    pub paths: JobPaths,
}

struct JobRecord {
    snapshot: JobSnapshot,
    paths: JobPaths,
    cancel_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<JobId, JobRecord>,
    /// Registration order, oldest first
    order: VecDeque<JobId>,
    latest: Option<JobId>,
}

impl StoreInner {
    /// Drop the oldest finished jobs until at most `retained` remain.
    /// Running jobs and the latest job are never dropped.
    fn evict(&mut self, retained: usize) -> Vec<JobPaths> {
        let mut evicted = Vec::new();
        if retained == 0 {
            return evicted;
        }

        let mut excess = self.jobs.len().saturating_sub(retained);
        let mut i = 0;
        while excess > 0 && i < self.order.len() {
            let removable = {
                let id = &self.order[i];
                self.latest.as_ref() != Some(id)
                    && self.jobs.get(id).is_some_and(|r| r.snapshot.is_terminal())
            };
            if !removable {
                i += 1;
                continue;
            }
            if let Some(id) = self.order.remove(i) {
                if let Some(record) = self.jobs.remove(&id) {
                    evicted.push(record.paths);
                }
                excess -= 1;
            }
        }
        evicted
    }
}

/// Job status store.
pub struct JobStore {
    inner: RwLock<StoreInner>,
    retained_jobs: usize,
}

impl JobStore {
    /// Create a store keeping up to `retained_jobs` jobs (0 keeps all).
    pub fn new(retained_jobs: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            retained_jobs,
        }
    }

    /// Register a new job and make it the latest.
    ///
    /// Returns the job's cancellation receiver and the paths of jobs evicted
    /// to stay within the retention limit; their directories are the caller's
    /// to delete.
    pub async fn register(&self, job_id: JobId, paths: JobPaths) -> (watch::Receiver<bool>, Vec<JobPaths>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let snapshot = JobSnapshot::new(job_id.clone(), paths.output_video().to_string_lossy());

        let mut inner = self.inner.write().await;
        inner.jobs.insert(
            job_id.clone(),
            JobRecord {
                snapshot,
                paths,
                cancel_tx,
            },
        );
        inner.order.push_back(job_id.clone());
        inner.latest = Some(job_id);

        let evicted = inner.evict(self.retained_jobs);
        (cancel_rx, evicted)
    }

    pub async fn get(&self, job_id: &JobId) -> Option<JobSnapshot> {
        let inner = self.inner.read().await;
        inner.jobs.get(job_id).map(|r| r.snapshot.clone())
    }

    pub async fn paths(&self, job_id: &JobId) -> Option<JobPaths> {
        let inner = self.inner.read().await;
        inner.jobs.get(job_id).map(|r| r.paths.clone())
    }

    /// The most recently submitted job, if any.
    pub async fn latest(&self) -> Option<LatestJob> {
        let inner = self.inner.read().await;
        let id = inner.latest.as_ref()?;
        inner.jobs.get(id).map(|r| LatestJob {
            snapshot: r.snapshot.clone(),
            paths: r.paths.clone(),
        })
    }

    /// Apply `f` to a job's snapshot.
    pub async fn update<R>(&self, job_id: &JobId, f: impl FnOnce(&mut JobSnapshot) -> R) -> Option<R> {
        let mut inner = self.inner.write().await;
        inner.jobs.get_mut(job_id).map(|r| f(&mut r.snapshot))
    }

    /// Request cancellation of a job that has not finished.
    pub async fn cancel(&self, job_id: &JobId) -> WorkerResult<JobSnapshot> {
        let mut inner = self.inner.write().await;
        let record = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| WorkerError::NotFound(job_id.to_string()))?;

        if !record.snapshot.transition(JobState::Cancelled) {
            return Err(WorkerError::Conflict(format!(
                "Job {} is already {}",
                job_id, record.snapshot.state
            )));
        }
        record.cancel_tx.send_replace(true);
        Ok(record.snapshot.clone())
    }

    /// Cancel every job that is still running. Returns how many were cancelled.
    pub async fn cancel_active(&self) -> usize {
        let mut inner = self.inner.write().await;
        let mut cancelled = 0;
        for record in inner.jobs.values_mut() {
            if record.snapshot.transition(JobState::Cancelled) {
                record.cancel_tx.send_replace(true);
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Handle through which a running job reports its progress.
    pub fn handle(self: &Arc<Self>, job_id: JobId) -> JobHandle {
        JobHandle {
            store: Arc::clone(self),
            job_id,
        }
    }
}

/// Write access to one job's snapshot.
#[derive(Clone)]
pub struct JobHandle {
    store: Arc<JobStore>,
    job_id: JobId,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub async fn snapshot(&self) -> Option<JobSnapshot> {
        self.store.get(&self.job_id).await
    }

    pub async fn state(&self) -> Option<JobState> {
        self.store.update(&self.job_id, |s| s.state).await
    }

    /// Move the job to `to`; `false` if the job is gone or the move is invalid.
    pub async fn set_state(&self, to: JobState) -> bool {
        self.store
            .update(&self.job_id, |s| s.transition(to))
            .await
            .unwrap_or(false)
    }

    pub async fn set_frames_total(&self, total: u64) {
        self.store.update(&self.job_id, |s| s.frames_total = total).await;
    }

    pub async fn record_frame(&self, outcome: &FrameOutcome) {
        let skipped = !outcome.produced_frame();
        self.store
            .update(&self.job_id, |s| s.record_frame(skipped))
            .await;
    }

    pub async fn complete(&self, report: JobReport) -> bool {
        self.store
            .update(&self.job_id, |s| s.complete(report))
            .await
            .unwrap_or(false)
    }

    pub async fn fail(&self, error: impl Into<String>) -> bool {
        let error = error.into();
        self.store
            .update(&self.job_id, |s| s.fail(error))
            .await
            .unwrap_or(false)
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Scheduler
//!
//! Queues operations, rejects conflicting submissions and runs each
//! operation's jobs strictly in order, stopping at the first failure.
//! Completed jobs are never rolled back: their effect is a new fact about
//! the device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use partops_contracts::{
    ConflictError, JobError, JobProgress, OperationEvent, OperationId, OperationKind,
    ProgressObserver,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::jobs::{JobContext, JobRecord, JobState};
use crate::operations::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Operations on disjoint devices that may run at the same time
    pub max_parallel_devices: usize,
    /// Report each job instead of executing it
    pub dry_run: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_devices: 4,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Completed,
    Failed,
    Cancelled,
}

/// The job that stopped an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    /// 0-based position within the operation
    pub index: usize,
    pub description: String,
    pub error: JobError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub description: String,
    pub status: OperationStatus,
    /// One record per job, in execution order; unstarted jobs stay `NotStarted`
    pub jobs: Vec<JobRecord>,
    pub failed_at: Option<FailedJob>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OperationResult {
    pub fn succeeded(&self) -> bool {
        self.status == OperationStatus::Completed
    }

    pub fn skipped_jobs(&self) -> usize {
        self.jobs.iter().filter(|record| record.skipped()).count()
    }
}

type Lanes = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Shared by every lane task; cheap to clone.
#[derive(Clone)]
struct Executor {
    ctx: JobContext,
    lanes: Lanes,
    observer: Option<Arc<dyn ProgressObserver>>,
    dry_run: bool,
}

impl Executor {
    fn notify(&self, event: OperationEvent) {
        if let Some(observer) = &self.observer {
            observer.notify(event);
        }
    }

    /// One lock per device, taken in sorted order.
    async fn acquire_lanes(&self, operation: &Operation) -> Vec<OwnedMutexGuard<()>> {
        let lanes: Vec<_> = {
            let mut map = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            operation
                .devices()
                .into_iter()
                .map(|device| Arc::clone(map.entry(device).or_default()))
                .collect()
        };
        let mut guards = Vec::with_capacity(lanes.len());
        for lane in lanes {
            guards.push(lane.lock_owned().await);
        }
        guards
    }

    async fn execute(&self, operation: &Operation, cancel: &CancellationToken) -> OperationResult {
        let _lanes = self.acquire_lanes(operation).await;
        let started_at = Utc::now();
        let operation_id = operation.id();
        let kind = operation.kind();
        let job_total = operation.jobs().len();
        let mut records: Vec<JobRecord> = operation
            .jobs()
            .iter()
            .map(|job| JobRecord::new(job.description()))
            .collect();

        info!(
            operation = %operation_id,
            description = operation.description(),
            jobs = job_total,
            dry_run = self.dry_run,
            "operation started"
        );
        self.notify(OperationEvent::Started {
            operation_id,
            operation: kind,
            job_total,
        });

        let mut status = OperationStatus::Completed;
        let mut failed_at = None;

        for (index, job) in operation.jobs().iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(operation = %operation_id, completed = index, "operation cancelled");
                status = OperationStatus::Cancelled;
                self.notify(OperationEvent::Cancelled {
                    operation_id,
                    operation: kind,
                    completed_jobs: index,
                });
                break;
            }

            let record = &mut records[index];
            record.advance(JobState::Running);
            let outcome = if self.dry_run {
                Ok(format!("dry run: {}", job.description()))
            } else {
                job.execute(&self.ctx).await
            };

            match outcome {
                Ok(message) => {
                    info!(operation = %operation_id, job = index, "{message}");
                    record.finish(true, message.clone());
                    self.notify(OperationEvent::JobFinished(JobProgress {
                        operation_id,
                        job_index: index,
                        job_total,
                        succeeded: true,
                        message,
                    }));
                }
                Err(job_error) => {
                    let message = job_error.to_string();
                    warn!(
                        operation = %operation_id,
                        job = index,
                        description = job.description(),
                        "job failed: {message}"
                    );
                    record.finish(false, message.clone());
                    self.notify(OperationEvent::JobFinished(JobProgress {
                        operation_id,
                        job_index: index,
                        job_total,
                        succeeded: false,
                        message,
                    }));
                    self.notify(OperationEvent::Failed {
                        operation_id,
                        operation: kind,
                        job_index: index,
                        error: job_error.clone(),
                    });
                    failed_at = Some(FailedJob {
                        index,
                        description: job.description().to_string(),
                        error: job_error,
                    });
                    status = OperationStatus::Failed;
                    break;
                }
            }
        }

        if status == OperationStatus::Completed {
            info!(operation = %operation_id, "operation completed");
            self.notify(OperationEvent::Completed {
                operation_id,
                operation: kind,
            });
        }

        OperationResult {
            operation_id,
            kind,
            description: operation.description().to_string(),
            status,
            jobs: records,
            failed_at,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

pub struct Scheduler {
    executor: Executor,
    cancel: Mutex<CancellationToken>,
    max_parallel_devices: usize,
    queue: Vec<Operation>,
}

impl Scheduler {
    pub fn new(ctx: JobContext, config: SchedulerConfig) -> Self {
        Self {
            executor: Executor {
                ctx,
                lanes: Arc::default(),
                observer: None,
                dry_run: config.dry_run,
            },
            cancel: Mutex::new(CancellationToken::new()),
            max_parallel_devices: config.max_parallel_devices.max(1),
            queue: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.executor.observer = Some(observer);
        self
    }

    /// Cancelling stops every running operation before its next job, and
    /// runs started later while it is still current. A cancelled token is
    /// replaced once the run it stopped has finished.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn rearm_if_cancelled(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            debug!("cancellation consumed, issuing a fresh token");
            *cancel = CancellationToken::new();
        }
    }

    pub fn queued(&self) -> &[Operation] {
        &self.queue
    }

    /// Enqueue `operation` unless a queued one already targets one of its
    /// devices.
    pub fn submit(&mut self, operation: Operation) -> Result<OperationId, ConflictError> {
        for queued in &self.queue {
            for target in operation.targets() {
                if !queued.targets_device(&target.device) {
                    continue;
                }
                let partition = queued
                    .targets_partition(&target.device, &target.range)
                    .then(|| target.partition.clone());
                warn!(
                    operation = %operation.id(),
                    queued = %queued.id(),
                    device = %target.device,
                    "rejecting conflicting operation"
                );
                return Err(ConflictError {
                    queued: queued.id(),
                    device: target.device.clone(),
                    partition,
                });
            }
        }

        let id = operation.id();
        info!(operation = %id, description = operation.description(), "operation queued");
        self.queue.push(operation);
        Ok(id)
    }

    /// Drop a queued operation that has not started.
    pub fn cancel(&mut self, id: OperationId) -> Option<Operation> {
        let position = self.queue.iter().position(|operation| operation.id() == id)?;
        info!(operation = %id, "queued operation dropped");
        Some(self.queue.remove(position))
    }

    /// Run one operation now, outside the queue.
    pub async fn run(&self, operation: &Operation) -> OperationResult {
        let cancel = self.cancellation_token();
        let result = self.executor.execute(operation, &cancel).await;
        self.rearm_if_cancelled();
        result
    }

    /// Drain the queue, one lane per operation, results in submission order.
    pub async fn run_all(&mut self) -> Vec<OperationResult> {
        let operations = std::mem::take(&mut self.queue);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_devices));
        let cancel = self.cancellation_token();
        let mut tasks = JoinSet::new();

        for (index, operation) in operations.into_iter().enumerate() {
            let executor = self.executor.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, executor.execute(&operation, &cancel).await)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(join_error) => error!(%join_error, "operation task aborted"),
            }
        }
        self.rearm_if_cancelled();
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

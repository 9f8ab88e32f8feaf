//! Durable work queue persisted in the repository index.
//!
//! The queue is the exclusive owner of `processing_queue` and
//! `bulk_processing_tasks`. Claiming runs inside a transaction so no task is
//! ever executed by two workers at once; ordering is FIFO within a
//! `(priority, bulk)` group and by priority then enqueue time across groups.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::{debug, info, warn};

use super::pool::AsyncSqlitePool;
use super::records::{NewBulkRecord, NewTaskRecord, TaskRecord};
use crate::errors::{AcquireError, Result};
use crate::models::{
    BulkOperation, BulkStatus, RetryPolicy, Task, TaskOperation, TaskStatus,
};
use crate::schema::{bulk_processing_tasks, processing_queue, queue_counters, service_state};

/// Candidate selection for a lease. Bulk membership is resolved in SQL so
/// the claim stays a single atomic statement sequence.
const CLAIM_SQL: &str = "SELECT * FROM processing_queue \
     WHERE status = 'pending' \
       AND (next_eligible_at IS NULL OR next_eligible_at <= ?) \
       AND (bulk_id IS NULL OR bulk_id IN \
            (SELECT id FROM bulk_processing_tasks WHERE status = 'running')) \
     ORDER BY priority ASC, enqueued_at ASC, id ASC \
     LIMIT 1";

/// Result of a heartbeat, as seen by the executing worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// Lease renewed; keep working.
    Active,
    /// The task (or its bulk) was cancelled; abort within the grace window.
    Cancelled,
    /// The lease expired and the task went back to pending; abort, another
    /// worker may already hold it.
    LostLease,
}

/// Aggregate queue counts.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub pending: u64,
    pub leased: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub lost_leases: u64,
}

/// The persistent work queue.
#[derive(Clone)]
pub struct WorkQueue {
    pool: AsyncSqlitePool,
    retry: RetryPolicy,
}

impl WorkQueue {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // ------------------------------------------------------------------
    // Producers
    // ------------------------------------------------------------------

    /// Insert a pending task.
    pub async fn enqueue(&self, task: &Task) -> Result<String> {
        let mut conn = self.pool.get().await?;
        let record = NewTaskRecord {
            id: &task.id,
            page_id: task.page_id.as_deref(),
            operation: task.operation.as_str(),
            parameters: serde_json::to_string(&task.parameters).unwrap_or_default(),
            priority: task.priority,
            status: TaskStatus::Pending.as_str(),
            attempts: 0,
            max_attempts: task.max_attempts as i32,
            bulk_id: task.bulk_id.as_deref(),
            enqueued_at: task.enqueued_at.to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        };
        diesel::insert_into(processing_queue::table)
            .values(&record)
            .execute(&mut conn)
            .await?;

        if let Some(bulk_id) = &task.bulk_id {
            self.bump_bulk_total(bulk_id, 1).await?;
        }
        debug!(task_id = %task.id, operation = task.operation.as_str(), "enqueued");
        Ok(task.id.clone())
    }

    /// Create a bulk operation group.
    pub async fn bulk_create(
        &self,
        description: &str,
        operation: TaskOperation,
    ) -> Result<BulkOperation> {
        let bulk = BulkOperation::new(description, operation);
        let mut conn = self.pool.get().await?;
        let record = NewBulkRecord {
            id: &bulk.id,
            description: &bulk.description,
            operation: bulk.operation.as_str(),
            status: bulk.status.as_str(),
            total: 0,
            created_at: bulk.created_at.to_rfc3339(),
            updated_at: bulk.updated_at.to_rfc3339(),
        };
        diesel::insert_into(bulk_processing_tasks::table)
            .values(&record)
            .execute(&mut conn)
            .await?;
        Ok(bulk)
    }

    /// Enqueue tasks under an existing bulk.
    pub async fn bulk_enqueue(&self, bulk_id: &str, tasks: Vec<Task>) -> Result<Vec<String>> {
        self.get_bulk(bulk_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("bulk", bulk_id))?;
        let mut ids = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            task.bulk_id = Some(bulk_id.to_string());
            ids.push(self.enqueue(&task).await?);
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    /// Atomically claim the best pending task, if any.
    ///
    /// Reclaims expired leases first so a crashed worker's task becomes
    /// claimable again.
    pub async fn lease(&self, worker_id: &str, lease_duration: Duration) -> Result<Option<Task>> {
        self.reclaim_expired_leases().await?;

        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let expires = (now + chrono::Duration::from_std(lease_duration).unwrap_or_default())
            .to_rfc3339();
        let worker = worker_id.to_string();

        let mut conn = self.pool.get().await?;
        let claimed: Option<TaskRecord> = conn
            .transaction::<_, AcquireError, _>(|conn| {
                Box::pin(async move {
                    let candidate: Option<TaskRecord> = diesel::sql_query(CLAIM_SQL)
                        .bind::<Text, _>(&now_str)
                        .get_result(conn)
                        .await
                        .optional()?;

                    let Some(record) = candidate else {
                        return Ok(None);
                    };

                    // Guard on status so a racing claimer that read the same
                    // candidate cannot lease it twice.
                    let claimed = diesel::update(
                        processing_queue::table
                            .find(&record.id)
                            .filter(processing_queue::status.eq(TaskStatus::Pending.as_str())),
                    )
                    .set((
                        processing_queue::status.eq(TaskStatus::Leased.as_str()),
                        processing_queue::worker_id.eq(&worker),
                        processing_queue::leased_at.eq(&now_str),
                        processing_queue::lease_expires_at.eq(&expires),
                        processing_queue::attempts.eq(record.attempts + 1),
                        processing_queue::updated_at.eq(&now_str),
                    ))
                    .execute(conn)
                    .await?;

                    if claimed == 0 {
                        return Ok(None);
                    }
                    Ok(Some(record))
                })
            })
            .await?;

        match claimed {
            Some(record) => {
                let mut task = Task::from(record);
                task.status = TaskStatus::Leased;
                task.attempts += 1;
                debug!(task_id = %task.id, worker = worker_id, "leased");
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Claim a batch: the best task plus up to `batch_size - 1` more with
    /// the same operation, parameters, and bulk. Batching never crosses
    /// bulk boundaries, so lone tasks batch alone.
    pub async fn lease_batch(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        batch_size: usize,
    ) -> Result<Vec<Task>> {
        let Some(first) = self.lease(worker_id, lease_duration).await? else {
            return Ok(Vec::new());
        };
        if batch_size <= 1 || first.bulk_id.is_none() {
            return Ok(vec![first]);
        }

        let mut batch = vec![first];
        while batch.len() < batch_size {
            let head = &batch[0];
            let Some(next) = self.lease(worker_id, lease_duration).await? else {
                break;
            };
            let same_group = next.bulk_id == head.bulk_id
                && next.operation == head.operation
                && next.parameters == head.parameters;
            if same_group {
                batch.push(next);
            } else {
                // Not batchable; put it straight back.
                self.release(&next.id).await?;
                break;
            }
        }
        Ok(batch)
    }

    /// Return a leased task to pending without counting the attempt.
    async fn release(&self, task_id: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(
            processing_queue::table
                .find(task_id)
                .filter(processing_queue::status.eq(TaskStatus::Leased.as_str())),
        )
        .set((
            processing_queue::status.eq(TaskStatus::Pending.as_str()),
            processing_queue::worker_id.eq(None::<String>),
            processing_queue::leased_at.eq(None::<String>),
            processing_queue::lease_expires_at.eq(None::<String>),
            processing_queue::attempts.eq(processing_queue::attempts - 1),
            processing_queue::updated_at.eq(Utc::now().to_rfc3339()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    /// Renew a lease and report cancellation to the worker.
    pub async fn heartbeat(
        &self,
        task_id: &str,
        lease_duration: Duration,
    ) -> Result<HeartbeatState> {
        let task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("task", task_id))?;

        match task.status {
            TaskStatus::Cancelled => return Ok(HeartbeatState::Cancelled),
            TaskStatus::Leased => {}
            _ => return Ok(HeartbeatState::LostLease),
        }

        if let Some(bulk_id) = &task.bulk_id {
            if let Some(bulk) = self.get_bulk(bulk_id).await? {
                if bulk.status == BulkStatus::Cancelled {
                    return Ok(HeartbeatState::Cancelled);
                }
            }
        }

        let expires = (Utc::now()
            + chrono::Duration::from_std(lease_duration).unwrap_or_default())
        .to_rfc3339();
        let mut conn = self.pool.get().await?;
        let renewed = diesel::update(
            processing_queue::table
                .find(task_id)
                .filter(processing_queue::status.eq(TaskStatus::Leased.as_str())),
        )
        .set((
            processing_queue::lease_expires_at.eq(&expires),
            processing_queue::updated_at.eq(Utc::now().to_rfc3339()),
        ))
        .execute(&mut conn)
        .await?;

        if renewed == 0 {
            Ok(HeartbeatState::LostLease)
        } else {
            Ok(HeartbeatState::Active)
        }
    }

    /// Mark a task succeeded.
    pub async fn complete(&self, task_id: &str) -> Result<()> {
        let task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("task", task_id))?;

        let mut conn = self.pool.get().await?;
        diesel::update(processing_queue::table.find(task_id))
            .set((
                processing_queue::status.eq(TaskStatus::Succeeded.as_str()),
                processing_queue::last_error.eq(None::<String>),
                processing_queue::lease_expires_at.eq(None::<String>),
                processing_queue::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;

        if let Some(bulk_id) = &task.bulk_id {
            self.refresh_bulk(bulk_id).await?;
        }
        Ok(())
    }

    /// Record a failure: retryable errors revert to pending with backoff
    /// until attempts are exhausted, everything else fails immediately.
    pub async fn fail(&self, task_id: &str, error: &str, retryable: bool) -> Result<()> {
        let task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("task", task_id))?;

        let retry = retryable && task.attempts < task.max_attempts;
        let now = Utc::now();
        let mut conn = self.pool.get().await?;

        if retry {
            let delay = self.retry.backoff(task.attempts);
            let eligible =
                (now + chrono::Duration::from_std(delay).unwrap_or_default()).to_rfc3339();
            diesel::update(processing_queue::table.find(task_id))
                .set((
                    processing_queue::status.eq(TaskStatus::Pending.as_str()),
                    processing_queue::last_error.eq(error),
                    processing_queue::worker_id.eq(None::<String>),
                    processing_queue::leased_at.eq(None::<String>),
                    processing_queue::lease_expires_at.eq(None::<String>),
                    processing_queue::next_eligible_at.eq(&eligible),
                    processing_queue::updated_at.eq(now.to_rfc3339()),
                ))
                .execute(&mut conn)
                .await?;
            debug!(task_id, attempts = task.attempts, "failed, retry at {eligible}");
        } else {
            diesel::update(processing_queue::table.find(task_id))
                .set((
                    processing_queue::status.eq(TaskStatus::Failed.as_str()),
                    processing_queue::last_error.eq(error),
                    processing_queue::lease_expires_at.eq(None::<String>),
                    processing_queue::updated_at.eq(now.to_rfc3339()),
                ))
                .execute(&mut conn)
                .await?;
            warn!(task_id, attempts = task.attempts, error, "task failed");
        }

        if let Some(bulk_id) = &task.bulk_id {
            self.refresh_bulk(bulk_id).await?;
        }
        Ok(())
    }

    /// Cancel a pending or leased task. Workers observe the cancellation on
    /// their next heartbeat and abort.
    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        let task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("task", task_id))?;
        if task.status.is_terminal() {
            return Err(AcquireError::Validation(format!(
                "task {task_id} is already {}",
                task.status.as_str()
            )));
        }

        let mut conn = self.pool.get().await?;
        diesel::update(processing_queue::table.find(task_id))
            .set((
                processing_queue::status.eq(TaskStatus::Cancelled.as_str()),
                processing_queue::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;

        if let Some(bulk_id) = &task.bulk_id {
            self.refresh_bulk(bulk_id).await?;
        }
        Ok(())
    }

    /// Return expired leases to pending, counting them as lost.
    pub async fn reclaim_expired_leases(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.pool.get().await?;
        let reclaimed = diesel::update(
            processing_queue::table
                .filter(processing_queue::status.eq(TaskStatus::Leased.as_str()))
                .filter(processing_queue::lease_expires_at.le(&now)),
        )
        .set((
            processing_queue::status.eq(TaskStatus::Pending.as_str()),
            processing_queue::worker_id.eq(None::<String>),
            processing_queue::leased_at.eq(None::<String>),
            processing_queue::lease_expires_at.eq(None::<String>),
            processing_queue::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;

        if reclaimed > 0 {
            warn!(count = reclaimed, "reclaimed expired leases");
            self.bump_counter("lost_leases", reclaimed as i64).await?;
        }
        Ok(reclaimed as u64)
    }

    /// Fail tasks that have run past the maximum task duration.
    pub async fn force_expire_overrunning(&self, max_task_duration: Duration) -> Result<u64> {
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(max_task_duration).unwrap_or_default())
        .to_rfc3339();
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = processing_queue::table
            .filter(processing_queue::status.eq(TaskStatus::Leased.as_str()))
            .filter(processing_queue::leased_at.le(&cutoff))
            .select(processing_queue::id)
            .load(&mut conn)
            .await?;
        drop(conn);

        for id in &ids {
            self.fail(id, "timeout", false).await?;
        }
        Ok(ids.len() as u64)
    }

    // ------------------------------------------------------------------
    // Bulk control
    // ------------------------------------------------------------------

    /// Pause a bulk: its pending tasks stop being leased; in-progress tasks
    /// run to completion.
    pub async fn pause_bulk(&self, bulk_id: &str) -> Result<()> {
        self.set_bulk_status(bulk_id, BulkStatus::Running, BulkStatus::Paused)
            .await
    }

    /// Resume a paused bulk.
    pub async fn resume_bulk(&self, bulk_id: &str) -> Result<()> {
        self.set_bulk_status(bulk_id, BulkStatus::Paused, BulkStatus::Running)
            .await
    }

    /// Cancel a bulk and all of its non-terminal tasks.
    pub async fn cancel_bulk(&self, bulk_id: &str) -> Result<()> {
        let bulk = self
            .get_bulk(bulk_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("bulk", bulk_id))?;
        if matches!(bulk.status, BulkStatus::Completed | BulkStatus::Cancelled) {
            return Err(AcquireError::Validation(format!(
                "bulk {bulk_id} is already {}",
                bulk.status.as_str()
            )));
        }

        let now = Utc::now().to_rfc3339();
        let mut conn = self.pool.get().await?;
        diesel::update(bulk_processing_tasks::table.find(bulk_id))
            .set((
                bulk_processing_tasks::status.eq(BulkStatus::Cancelled.as_str()),
                bulk_processing_tasks::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
        diesel::update(
            processing_queue::table
                .filter(processing_queue::bulk_id.eq(bulk_id))
                .filter(processing_queue::status.eq_any(["pending", "leased"])),
        )
        .set((
            processing_queue::status.eq(TaskStatus::Cancelled.as_str()),
            processing_queue::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;
        info!(bulk_id, "bulk cancelled");
        Ok(())
    }

    /// Requeue only the failed children of a bulk.
    pub async fn retry_failed(&self, bulk_id: &str) -> Result<u64> {
        self.get_bulk(bulk_id)
            .await?
            .ok_or_else(|| AcquireError::not_found("bulk", bulk_id))?;

        let now = Utc::now().to_rfc3339();
        let mut conn = self.pool.get().await?;
        let requeued = diesel::update(
            processing_queue::table
                .filter(processing_queue::bulk_id.eq(bulk_id))
                .filter(processing_queue::status.eq(TaskStatus::Failed.as_str())),
        )
        .set((
            processing_queue::status.eq(TaskStatus::Pending.as_str()),
            processing_queue::attempts.eq(0),
            processing_queue::next_eligible_at.eq(None::<String>),
            processing_queue::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;

        if requeued > 0 {
            diesel::update(bulk_processing_tasks::table.find(bulk_id))
                .set((
                    bulk_processing_tasks::status.eq(BulkStatus::Running.as_str()),
                    bulk_processing_tasks::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
        }
        Ok(requeued as u64)
    }

    async fn set_bulk_status(
        &self,
        bulk_id: &str,
        expected: BulkStatus,
        next: BulkStatus,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            bulk_processing_tasks::table
                .find(bulk_id)
                .filter(bulk_processing_tasks::status.eq(expected.as_str())),
        )
        .set((
            bulk_processing_tasks::status.eq(next.as_str()),
            bulk_processing_tasks::updated_at.eq(Utc::now().to_rfc3339()),
        ))
        .execute(&mut conn)
        .await?;
        if updated == 0 {
            let bulk = self.get_bulk(bulk_id).await?;
            return Err(match bulk {
                None => AcquireError::not_found("bulk", bulk_id),
                Some(b) => AcquireError::Validation(format!(
                    "bulk {bulk_id} is {}, expected {}",
                    b.status.as_str(),
                    expected.as_str()
                )),
            });
        }
        info!(bulk_id, status = next.as_str(), "bulk status changed");
        Ok(())
    }

    /// Move a running bulk to completed once every child is terminal.
    /// A bulk with failed children still completes; the counters tell the
    /// two apart.
    async fn refresh_bulk(&self, bulk_id: &str) -> Result<()> {
        let Some(bulk) = self.get_bulk(bulk_id).await? else {
            return Ok(());
        };
        if bulk.status == BulkStatus::Running
            && bulk.total > 0
            && bulk.pending == 0
            && bulk.in_progress == 0
        {
            let mut conn = self.pool.get().await?;
            diesel::update(
                bulk_processing_tasks::table
                    .find(bulk_id)
                    .filter(bulk_processing_tasks::status.eq(BulkStatus::Running.as_str())),
            )
            .set((
                bulk_processing_tasks::status.eq(BulkStatus::Completed.as_str()),
                bulk_processing_tasks::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;
            info!(bulk_id, "bulk completed");
        }
        Ok(())
    }

    async fn bump_bulk_total(&self, bulk_id: &str, by: i32) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(bulk_processing_tasks::table.find(bulk_id))
            .set((
                bulk_processing_tasks::total.eq(bulk_processing_tasks::total + by),
                bulk_processing_tasks::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let mut conn = self.pool.get().await?;
        let record: Option<TaskRecord> = processing_queue::table
            .find(task_id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(Task::from))
    }

    pub async fn get_bulk(&self, bulk_id: &str) -> Result<Option<BulkOperation>> {
        use diesel::dsl::count_star;
        let mut conn = self.pool.get().await?;
        let record: Option<super::records::BulkRecord> = bulk_processing_tasks::table
            .find(bulk_id)
            .first(&mut conn)
            .await
            .optional()?;
        let Some(record) = record else {
            return Ok(None);
        };

        let rows: Vec<(String, i64)> = processing_queue::table
            .filter(processing_queue::bulk_id.eq(bulk_id))
            .group_by(processing_queue::status)
            .select((processing_queue::status, count_star()))
            .load(&mut conn)
            .await?;
        let counts: HashMap<TaskStatus, u32> = Task::status_counts(rows);
        Ok(Some(record.into_bulk(&counts)))
    }

    pub async fn list_bulks(&self) -> Result<Vec<BulkOperation>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = bulk_processing_tasks::table
            .order(bulk_processing_tasks::created_at.desc())
            .select(bulk_processing_tasks::id)
            .load(&mut conn)
            .await?;
        drop(conn);

        let mut bulks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bulk) = self.get_bulk(&id).await? {
                bulks.push(bulk);
            }
        }
        Ok(bulks)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        use diesel::dsl::count_star;
        let mut conn = self.pool.get().await?;
        let rows: Vec<(String, i64)> = processing_queue::table
            .group_by(processing_queue::status)
            .select((processing_queue::status, count_star()))
            .load(&mut conn)
            .await?;
        let counts = Task::status_counts(rows);

        let lost: Option<i32> = queue_counters::table
            .find("lost_leases")
            .select(queue_counters::value)
            .first(&mut conn)
            .await
            .optional()?;

        let get = |s: TaskStatus| counts.get(&s).copied().unwrap_or(0) as u64;
        Ok(QueueStats {
            pending: get(TaskStatus::Pending),
            leased: get(TaskStatus::Leased),
            succeeded: get(TaskStatus::Succeeded),
            failed: get(TaskStatus::Failed),
            cancelled: get(TaskStatus::Cancelled),
            lost_leases: lost.unwrap_or(0).max(0) as u64,
        })
    }

    /// Remove terminal tasks and finished bulks older than the retention
    /// window.
    pub async fn cleanup(&self, archive_days: u32) -> Result<u64> {
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(archive_days))).to_rfc3339();
        let mut conn = self.pool.get().await?;
        let tasks = diesel::delete(
            processing_queue::table
                .filter(processing_queue::status.eq_any(["succeeded", "failed", "cancelled"]))
                .filter(processing_queue::updated_at.lt(&cutoff)),
        )
        .execute(&mut conn)
        .await?;
        let bulks = diesel::delete(
            bulk_processing_tasks::table
                .filter(bulk_processing_tasks::status.eq_any(["completed", "cancelled"]))
                .filter(bulk_processing_tasks::updated_at.lt(&cutoff)),
        )
        .execute(&mut conn)
        .await?;
        Ok((tasks + bulks) as u64)
    }

    async fn bump_counter(&self, name: &str, by: i64) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let existing: Option<i32> = queue_counters::table
            .find(name)
            .select(queue_counters::value)
            .first(&mut conn)
            .await
            .optional()?;
        match existing {
            Some(value) => {
                diesel::update(queue_counters::table.find(name))
                    .set(queue_counters::value.eq(value + by as i32))
                    .execute(&mut conn)
                    .await?;
            }
            None => {
                diesel::insert_into(queue_counters::table)
                    .values((
                        queue_counters::name.eq(name),
                        queue_counters::value.eq(by as i32),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Service control state
    // ------------------------------------------------------------------

    /// Persist a service control flag (global pause, stop request).
    pub async fn set_service_state(&self, name: &str, value: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::replace_into(service_state::table)
            .values((
                service_state::name.eq(name),
                service_state::value.eq(value),
                service_state::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get_service_state(&self, name: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = service_state::table
            .find(name)
            .select(service_state::value)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::migrations::init_repository_schema;
    use tempfile::TempDir;

    async fn test_queue() -> (TempDir, WorkQueue) {
        let dir = TempDir::new().unwrap();
        let pool = AsyncSqlitePool::from_path(&dir.path().join("repo.db"));
        init_repository_schema(&pool).await.unwrap();
        (dir, WorkQueue::new(pool))
    }

    fn lease_len() -> Duration {
        Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_lease_orders_by_priority_then_fifo() {
        let (_dir, queue) = test_queue().await;
        let low = Task::new(TaskOperation::Ocr).with_priority(20);
        let high_a = Task::new(TaskOperation::Ocr).with_priority(1);
        let high_b = Task::new(TaskOperation::Ocr).with_priority(1);
        queue.enqueue(&low).await.unwrap();
        queue.enqueue(&high_a).await.unwrap();
        // make FIFO within the priority group observable
        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut later = high_b.clone();
        later.enqueued_at = Utc::now();
        queue.enqueue(&later).await.unwrap();

        let first = queue.lease("w1", lease_len()).await.unwrap().unwrap();
        assert_eq!(first.id, high_a.id);
        let second = queue.lease("w1", lease_len()).await.unwrap().unwrap();
        assert_eq!(second.id, later.id);
        let third = queue.lease("w1", lease_len()).await.unwrap().unwrap();
        assert_eq!(third.id, low.id);
        assert!(queue.lease("w1", lease_len()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_single_task_goes_to_one_worker() {
        let (_dir, queue) = test_queue().await;
        queue.enqueue(&Task::new(TaskOperation::Ocr)).await.unwrap();

        let a = queue.lease("w1", lease_len()).await.unwrap();
        let b = queue.lease("w2", lease_len()).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn test_retry_until_exhausted() {
        let (_dir, queue) = test_queue().await;
        let queue = queue.with_retry_policy(RetryPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        });
        let mut task = Task::new(TaskOperation::Ocr);
        task.max_attempts = 3;
        queue.enqueue(&task).await.unwrap();

        for attempt in 1..=3u32 {
            let leased = queue.lease("w1", lease_len()).await.unwrap().unwrap();
            assert_eq!(leased.attempts, attempt);
            queue
                .fail(&leased.id, &format!("upstream 503 (attempt {attempt})"), true)
                .await
                .unwrap();
        }

        let done = queue.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.attempts, 3);
        assert_eq!(done.last_error.as_deref(), Some("upstream 503 (attempt 3)"));
        // a fourth lease returns nothing
        assert!(queue.lease("w1", lease_len()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_data_fails_without_retry() {
        let (_dir, queue) = test_queue().await;
        let task = Task::new(TaskOperation::Ocr);
        queue.enqueue(&task).await.unwrap();
        let leased = queue.lease("w1", lease_len()).await.unwrap().unwrap();
        queue.fail(&leased.id, "corrupt jp2", false).await.unwrap();
        let done = queue.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeded_clears_error() {
        let (_dir, queue) = test_queue().await;
        let queue = queue.with_retry_policy(RetryPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        });
        let task = Task::new(TaskOperation::Ocr);
        queue.enqueue(&task).await.unwrap();
        let leased = queue.lease("w1", lease_len()).await.unwrap().unwrap();
        queue.fail(&leased.id, "flaky", true).await.unwrap();
        let leased = queue.lease("w1", lease_len()).await.unwrap().unwrap();
        queue.complete(&leased.id).await.unwrap();

        let done = queue.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert!(done.attempts >= 1);
        assert!(done.last_error.is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let (_dir, queue) = test_queue().await;
        let task = Task::new(TaskOperation::Ocr);
        queue.enqueue(&task).await.unwrap();
        queue
            .lease("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let again = queue.lease("w2", lease_len()).await.unwrap().unwrap();
        assert_eq!(again.id, task.id);
        assert_eq!(queue.stats().await.unwrap().lost_leases, 1);
    }

    #[tokio::test]
    async fn test_cancel_seen_on_heartbeat() {
        let (_dir, queue) = test_queue().await;
        let task = Task::new(TaskOperation::Ocr);
        queue.enqueue(&task).await.unwrap();
        let leased = queue.lease("w1", lease_len()).await.unwrap().unwrap();
        assert_eq!(
            queue.heartbeat(&leased.id, lease_len()).await.unwrap(),
            HeartbeatState::Active
        );
        queue.cancel(&leased.id).await.unwrap();
        assert_eq!(
            queue.heartbeat(&leased.id, lease_len()).await.unwrap(),
            HeartbeatState::Cancelled
        );
    }

    #[tokio::test]
    async fn test_bulk_pause_masks_children() {
        let (_dir, queue) = test_queue().await;
        let bulk = queue.bulk_create("ocr batch", TaskOperation::Ocr).await.unwrap();
        queue
            .bulk_enqueue(&bulk.id, vec![Task::new(TaskOperation::Ocr)])
            .await
            .unwrap();

        queue.pause_bulk(&bulk.id).await.unwrap();
        assert!(queue.lease("w1", lease_len()).await.unwrap().is_none());

        queue.resume_bulk(&bulk.id).await.unwrap();
        assert!(queue.lease("w1", lease_len()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bulk_completes_with_failed_children() {
        let (_dir, queue) = test_queue().await;
        let bulk = queue.bulk_create("mixed", TaskOperation::Ocr).await.unwrap();
        let ids = queue
            .bulk_enqueue(
                &bulk.id,
                vec![Task::new(TaskOperation::Ocr), Task::new(TaskOperation::Ocr)],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        let first = queue.lease("w1", lease_len()).await.unwrap().unwrap();
        queue.complete(&first.id).await.unwrap();
        let second = queue.lease("w1", lease_len()).await.unwrap().unwrap();
        queue.fail(&second.id, "hard error", false).await.unwrap();

        let done = queue.get_bulk(&bulk.id).await.unwrap().unwrap();
        assert_eq!(done.status, BulkStatus::Completed);
        assert_eq!(done.succeeded, 1);
        assert_eq!(done.failed, 1);

        // retry-failed requeues only the failed child and reopens the bulk
        assert_eq!(queue.retry_failed(&bulk.id).await.unwrap(), 1);
        let reopened = queue.get_bulk(&bulk.id).await.unwrap().unwrap();
        assert_eq!(reopened.status, BulkStatus::Running);
        assert_eq!(reopened.pending, 1);
    }

    #[tokio::test]
    async fn test_batch_lease_same_group_only() {
        let (_dir, queue) = test_queue().await;
        let bulk = queue.bulk_create("batchable", TaskOperation::Ocr).await.unwrap();
        let make = || {
            Task::new(TaskOperation::Ocr)
                .with_parameter("language", serde_json::json!("eng"))
        };
        queue
            .bulk_enqueue(&bulk.id, vec![make(), make(), make()])
            .await
            .unwrap();
        // a non-bulk task that must not join the batch
        queue.enqueue(&Task::new(TaskOperation::Ocr)).await.unwrap();

        let batch = queue.lease_batch("w1", lease_len(), 8).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|t| t.bulk_id.as_deref() == Some(bulk.id.as_str())));

        // the loose task is still claimable
        let loose = queue.lease("w2", lease_len()).await.unwrap().unwrap();
        assert!(loose.bulk_id.is_none());
    }
}

//! The pipeline service: scheduler plus worker pool.
//!
//! Workers poll the queue, execute tasks through the handler set, and
//! heartbeat at a third of the lease duration. The scheduler does the
//! housekeeping: reclaiming expired leases, force-expiring overrunning
//! tasks, and watching the persisted control flags (pause, stop).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::events::{EventBus, PipelineEvent};
use super::handlers::HandlerSet;
use crate::context::AppContext;
use crate::errors::Result;
use crate::models::Task;
use crate::repository::HeartbeatState;

/// Service tuning knobs, derived from `Settings` by default.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    pub lease_duration: Duration,
    /// Tasks leased together when >1 and a bulk allows it.
    pub batch_size: usize,
    /// Leased tasks older than this are force-failed with reason timeout.
    pub max_task_duration: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_secs(5),
            lease_duration: Duration::from_secs(120),
            batch_size: 1,
            max_task_duration: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl ServiceConfig {
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            workers: settings.queue.max_concurrent.max(1),
            poll_interval: Duration::from_secs(settings.queue.poll_interval.max(1)),
            batch_size: settings.queue.batch_size.max(1),
            ..Self::default()
        }
    }
}

/// The long-running worker orchestrator.
pub struct PipelineService {
    ctx: Arc<AppContext>,
    config: ServiceConfig,
    handlers: Arc<HandlerSet>,
    events: EventBus,
    paused: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl PipelineService {
    pub fn new(ctx: Arc<AppContext>, config: ServiceConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            config,
            handlers: Arc::new(HandlerSet::builtin()),
            events: EventBus::new(),
            paused: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(shutdown),
        }
    }

    /// A handle that requests shutdown when called; usable from signal
    /// handlers after the service itself moved into `run()`.
    pub fn shutdown_handle(&self) -> impl Fn() + Send + Sync + 'static {
        let shutdown = self.shutdown.clone();
        move || {
            let _ = shutdown.send(true);
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Pause the scheduler in this process; leased tasks finish.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("pipeline paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("pipeline resumed");
    }

    /// Request shutdown; run() returns once workers wind down.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run until shutdown is requested (via `shutdown()` or the persisted
    /// `stop_requested` control flag).
    pub async fn run(&self) -> Result<()> {
        info!(workers = self.config.workers, "pipeline service starting");
        self.ctx
            .queue
            .set_service_state("running", "true")
            .await?;

        let mut joins = Vec::new();
        for n in 0..self.config.workers {
            joins.push(tokio::spawn(worker_loop(
                self.ctx.clone(),
                self.config.clone(),
                self.handlers.clone(),
                self.events.clone(),
                self.paused.clone(),
                self.shutdown.subscribe(),
                format!("worker-{n}"),
            )));
        }

        self.scheduler_loop().await;

        for join in joins {
            let _ = join.await;
        }
        self.ctx
            .queue
            .set_service_state("running", "false")
            .await?;
        info!("pipeline service stopped");
        Ok(())
    }

    /// Housekeeping loop; also mirrors persisted control flags into the
    /// in-process pause state so `service pause` works across processes.
    async fn scheduler_loop(&self) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if let Err(e) = self.ctx.queue.reclaim_expired_leases().await {
                warn!(error = %e, "lease reclamation failed");
            }
            if let Err(e) = self
                .ctx
                .queue
                .force_expire_overrunning(self.config.max_task_duration)
                .await
            {
                warn!(error = %e, "task expiry failed");
            }

            match self.ctx.queue.get_service_state("paused").await {
                Ok(flag) => self
                    .paused
                    .store(flag.as_deref() == Some("true"), Ordering::SeqCst),
                Err(e) => warn!(error = %e, "could not read pause flag"),
            }
            if let Ok(Some(flag)) = self.ctx.queue.get_service_state("stop_requested").await {
                if flag == "true" {
                    info!("stop requested through control state");
                    let _ = self
                        .ctx
                        .queue
                        .set_service_state("stop_requested", "false")
                        .await;
                    self.shutdown();
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

async fn worker_loop(
    ctx: Arc<AppContext>,
    config: ServiceConfig,
    handlers: Arc<HandlerSet>,
    events: EventBus,
    paused: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    worker_id: String,
) {
    debug!(worker = %worker_id, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        if paused.load(Ordering::SeqCst) {
            if wait_or_shutdown(&mut shutdown, config.poll_interval).await {
                break;
            }
            continue;
        }

        let batch = if config.batch_size > 1 {
            ctx.queue
                .lease_batch(&worker_id, config.lease_duration, config.batch_size)
                .await
        } else {
            ctx.queue
                .lease(&worker_id, config.lease_duration)
                .await
                .map(|t| t.into_iter().collect())
        };

        match batch {
            Ok(tasks) if tasks.is_empty() => {
                if wait_or_shutdown(&mut shutdown, config.poll_interval).await {
                    break;
                }
            }
            Ok(tasks) => {
                for task in tasks {
                    execute_task(&ctx, &config, &handlers, &events, &task).await;
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            Err(e) => {
                error!(worker = %worker_id, error = %e, "lease failed");
                if wait_or_shutdown(&mut shutdown, config.poll_interval).await {
                    break;
                }
            }
        }
    }
    debug!(worker = %worker_id, "worker stopped");
}

/// Sleep for `period`, returning true when shutdown arrived instead.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => false,
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}

/// Execute one task with heartbeats, publishing progress events and
/// recording the outcome on the queue.
async fn execute_task(
    ctx: &Arc<AppContext>,
    config: &ServiceConfig,
    handlers: &Arc<HandlerSet>,
    events: &EventBus,
    task: &Task,
) {
    events.publish(PipelineEvent::TaskStarted {
        task_id: task.id.clone(),
        operation: task.operation,
        page_id: task.page_id.clone(),
    });

    let Some(handler) = handlers.get(task.operation) else {
        let _ = ctx
            .queue
            .fail(&task.id, "no handler for operation", false)
            .await;
        events.publish(PipelineEvent::TaskFailed {
            task_id: task.id.clone(),
            error: "no handler for operation".to_string(),
        });
        return;
    };

    // Heartbeat at a third of the lease; a cancelled or lost task aborts
    // the handler future at the next await point.
    let heartbeat_period = config.lease_duration / 3;
    let queue = ctx.queue.clone();
    let task_id = task.id.clone();
    let lease_duration = config.lease_duration;
    let heartbeat = async {
        loop {
            tokio::time::sleep(heartbeat_period).await;
            match queue.heartbeat(&task_id, lease_duration).await {
                Ok(HeartbeatState::Active) => {}
                Ok(state) => return state,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "heartbeat failed");
                }
            }
        }
    };

    let outcome = tokio::select! {
        result = handler.handle(ctx, task) => Some(result),
        state = heartbeat => {
            info!(task_id = %task.id, ?state, "task interrupted");
            None
        }
    };

    match outcome {
        Some(Ok(())) => {
            if let Err(e) = ctx.queue.complete(&task.id).await {
                error!(task_id = %task.id, error = %e, "could not record completion");
            }
            events.publish(PipelineEvent::TaskCompleted {
                task_id: task.id.clone(),
            });
        }
        Some(Err(err)) => {
            let retryable = err.is_retryable();
            if let Err(e) = ctx
                .queue
                .fail(&task.id, &err.to_string(), retryable)
                .await
            {
                error!(task_id = %task.id, error = %e, "could not record failure");
            }
            events.publish(PipelineEvent::TaskFailed {
                task_id: task.id.clone(),
                error: err.to_string(),
            });
        }
        // Cancelled or lease lost: the queue row already reflects it.
        None => {}
    }

    if let Some(bulk_id) = &task.bulk_id {
        if let Ok(Some(bulk)) = ctx.queue.get_bulk(bulk_id).await {
            events.publish(PipelineEvent::BulkProgress {
                bulk_id: bulk.id,
                succeeded: bulk.succeeded,
                failed: bulk.failed,
                total: bulk.total,
            });
        }
    }
}

//! Processing pipeline: a scheduler plus a pool of workers consuming the
//! durable queue, with progress events for any subscriber.

mod events;
mod handlers;
mod service;

pub use events::{EventBus, PipelineEvent};
pub use handlers::{HandlerSet, TaskHandler};
pub use service::{PipelineService, ServiceConfig};

//! Data models for NewsAcquire.

mod event;
mod page;
mod task;

pub use event::{EventLink, HistoricalEvent};
pub use page::{
    ArticleSegment, BoundingBox, NewspaperArticle, NewspaperPage, PageStatus, Publication,
    SegmentKind, SegmentStatus,
};
pub use task::{BulkOperation, BulkStatus, RetryPolicy, Task, TaskOperation, TaskStatus};

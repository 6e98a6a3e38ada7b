//! Typed work queues, the worker pools that drain them, and the handlers that
//! turn gateway answers into store writes.

pub mod handlers;
mod queue;
mod work_item;
mod worker;
mod writer;

pub use queue::{QueueDepth, QueueError, WorkQueue, WorkQueues};
pub use work_item::{WorkItem, WorkKind};
pub use worker::{
    drain_queue, process_item, WorkError, WorkHandler, WorkOutcome, WorkerPool,
};
pub use writer::ContentWriter;

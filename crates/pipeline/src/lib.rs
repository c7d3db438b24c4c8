//! Watch → upload → archive pipeline.
//!
//! This crate wires the [`courier_watcher`] producer to a fixed pool of
//! upload workers through a bounded queue of file paths.
//!
//! # Flow
//!
//! 1. **Watch**: poll the drop directory and claim files that stopped changing
//! 2. **Queue**: hand each claimed path to the workers (blocking when full)
//! 3. **Upload**: POST the file as multipart form data
//! 4. **Archive**: move the file to `archive/<yyyy-mm-dd>/`
//!
//! Failures at steps 3 and 4 release the path back to the tracker, so the
//! next scan retries it (at-least-once delivery).

pub mod delivery;
pub mod error;
pub mod pool;
pub mod shutdown;

mod pipeline;

pub use delivery::Delivery;
pub use error::DeliveryError;
pub use pipeline::{Pipeline, PipelineConfig, PipelineHandle};
pub use pool::WorkerPool;
pub use shutdown::wait_for_signal;

use std::time::Duration;

/// Default number of upload workers.
pub const DEFAULT_WORKERS: usize = 8;

/// Default capacity of the dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default time allowed for in-flight uploads after shutdown is requested.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

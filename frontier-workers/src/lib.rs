//! Scheduler, logging and signal handling for the `frontier-workers` binary.
#![allow(missing_docs)]

pub mod logging;
pub mod scheduler;
pub mod shutdown;

pub use scheduler::{Scheduler, WorkerError};

//! Workflow Execution Module
//!
//! Runs a workflow graph: one coordinating thread per process, bounded
//! channels between them and a shared pool capping concurrent commands.
//!
//! # Architecture
//!
//! - [`engine`]: Scheduler wiring ports and threads, and collecting results
//! - [`runner`]: Run loops for each process kind
//! - [`pool`]: Task slots bounding concurrent command invocations
//! - [`task`]: Execution of one rendered command

pub mod engine;
pub mod pool;
pub mod runner;
pub mod task;

pub use engine::{Engine, RunReport};
pub use pool::TaskPool;

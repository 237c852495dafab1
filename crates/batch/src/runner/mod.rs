//! Batch scheduler runner -- owns the queue, the control loop and the stores.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, admission and accessor methods
//! - `execution`: lifecycle (start/stop) and the control loop
//! - `scheduling`: batch formation rule and queue draining

mod core;
mod execution;
mod scheduling;

pub use self::core::Scheduler;
pub use self::scheduling::should_form_batch;

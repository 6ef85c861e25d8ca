//! Execution queue backends.

pub mod memory;

pub use memory::{InMemoryTaskQueue, QueuedTask};

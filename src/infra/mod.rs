//! Infrastructure adapters for persistence and the execution queue.

pub mod queue;
pub mod store;

pub use queue::InMemoryTaskQueue;
pub use store::InMemoryStore;

//! In-memory execution queue.
//!
//! Accepts tasks up to a maximum depth and can be switched offline to mimic a
//! broker outage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::store::{EnqueueOutcome, TaskQueue};

/// A task accepted by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    /// Assigned task id.
    pub task_id: String,
    /// Task name.
    pub name: String,
    /// Task arguments.
    pub args: serde_json::Value,
}

/// Bounded FIFO queue for development/testing. Clones share state.
#[derive(Clone)]
pub struct InMemoryTaskQueue {
    max_depth: usize,
    tasks: Arc<Mutex<VecDeque<QueuedTask>>>,
    online: Arc<AtomicBool>,
}

impl InMemoryTaskQueue {
    /// Create a new queue with a maximum depth.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            tasks: Arc::new(Mutex::new(VecDeque::with_capacity(max_depth.min(1024)))),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the broker going away or coming back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Pop the oldest task.
    #[must_use]
    pub fn pop(&self) -> Option<QueuedTask> {
        self.tasks.lock().pop_front()
    }

    /// Snapshot of queued tasks, oldest first.
    #[must_use]
    pub fn tasks(&self) -> Vec<QueuedTask> {
        self.tasks.lock().iter().cloned().collect()
    }

    /// Current depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no task is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn send_task(&self, name: &str, args: serde_json::Value) -> EnqueueOutcome {
        if !self.online.load(Ordering::Acquire) {
            return EnqueueOutcome::BrokerUnavailable {
                reason: "in-memory broker is offline".into(),
            };
        }
        let mut tasks = self.tasks.lock();
        if tasks.len() >= self.max_depth {
            return EnqueueOutcome::Rejected {
                reason: format!("queue full (depth={})", tasks.len()),
            };
        }
        let task_id = Uuid::new_v4().to_string();
        tasks.push_back(QueuedTask {
            task_id: task_id.clone(),
            name: name.to_owned(),
            args,
        });
        EnqueueOutcome::Enqueued { task_id }
    }
}

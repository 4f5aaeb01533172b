//! Per-chat task tracker items, broadcast on every mutation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// One entry on the chat's task board. Ephemeral — lives only as long as
/// the process keeps the chat state around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: u32,
    pub subject: String,
    pub status: TaskStatus,
}

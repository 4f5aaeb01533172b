//! Per-chat task board, mutated by the `update_tasks` tool and broadcast
//! as a `task_snapshot` event on every change.

use serde_json::Value;

use dp_domain::task::{TaskItem, TaskStatus};

#[derive(Default)]
pub struct TaskBoard {
    items: Vec<TaskItem>,
    next_id: u32,
}

impl TaskBoard {
    /// Apply an `update_tasks` tool call. Supported keys:
    /// `add` (array of subjects), `set_status` (array of `{id, status}`),
    /// `clear` (bool). Returns an error string for the model on bad input.
    pub fn apply(&mut self, args: &Value) -> Result<(), String> {
        if args.get("clear").and_then(Value::as_bool).unwrap_or(false) {
            self.items.clear();
        }

        if let Some(add) = args.get("add") {
            let subjects = add
                .as_array()
                .ok_or_else(|| "add must be an array of strings".to_string())?;
            for subject in subjects {
                let subject = subject
                    .as_str()
                    .ok_or_else(|| "add entries must be strings".to_string())?;
                self.next_id += 1;
                self.items.push(TaskItem {
                    id: self.next_id,
                    subject: subject.to_string(),
                    status: TaskStatus::Pending,
                });
            }
        }

        if let Some(updates) = args.get("set_status") {
            let updates = updates
                .as_array()
                .ok_or_else(|| "set_status must be an array".to_string())?;
            for update in updates {
                let id = update
                    .get("id")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| "set_status entries need a numeric id".to_string())?
                    as u32;
                let status: TaskStatus = update
                    .get("status")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| format!("bad status: {e}"))?
                    .ok_or_else(|| "set_status entries need a status".to_string())?;
                let item = self
                    .items
                    .iter_mut()
                    .find(|t| t.id == id)
                    .ok_or_else(|| format!("no task with id {id}"))?;
                item.status = status;
            }
        }

        Ok(())
    }

    /// Insertion-ordered copy of the board.
    pub fn snapshot(&self) -> Vec<TaskItem> {
        self.items.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

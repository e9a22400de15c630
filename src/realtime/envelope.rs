//! Request envelopes for the realtime channel.
//!
//! A queued task travels as a type-3 envelope whose `payload` is itself a
//! JSON string holding the task list; each task's `payload` is a JSON string
//! again. Presence-style messages use the flatter type-4 frame.

use chrono::Utc;
use rand::Rng;
use serde_json::{Value, json};

/// How a queued task gets its `task_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskIdPolicy {
    /// Next value of the dispatcher's task counter.
    Sequential,
    /// A small random id; the server does not order these.
    Random,
}

/// Wire frame of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFrame {
    /// Type 3: a one-task list addressed to a server-side queue.
    Queued {
        queue_name: String,
        task_id: TaskIdPolicy,
    },
    /// Type 4: a single labelled payload with no task list.
    Direct,
}

/// Whether the caller waits for a correlated reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    Await,
    FireAndForget,
}

/// One task as built by a capability, before ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDescriptor {
    pub app_id: String,
    pub label: String,
    pub payload: Value,
    pub version_id: String,
    pub frame: TaskFrame,
    pub reply: ReplyMode,
}

impl TaskDescriptor {
    /// Queued mutation with a sequential task id that awaits its reply.
    pub fn queued(
        app_id: impl Into<String>,
        label: impl Into<String>,
        queue_name: impl Into<String>,
        payload: Value,
        version_id: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            label: label.into(),
            payload,
            version_id: version_id.into(),
            frame: TaskFrame::Queued {
                queue_name: queue_name.into(),
                task_id: TaskIdPolicy::Sequential,
            },
            reply: ReplyMode::Await,
        }
    }

    /// Type-4 message; fire-and-forget.
    pub fn direct(
        app_id: impl Into<String>,
        label: impl Into<String>,
        payload: Value,
        version_id: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            label: label.into(),
            payload,
            version_id: version_id.into(),
            frame: TaskFrame::Direct,
            reply: ReplyMode::FireAndForget,
        }
    }

    pub fn with_random_task_id(mut self) -> Self {
        if let TaskFrame::Queued { task_id, .. } = &mut self.frame {
            *task_id = TaskIdPolicy::Random;
        }
        self
    }

    pub fn fire_and_forget(mut self) -> Self {
        self.reply = ReplyMode::FireAndForget;
        self
    }

    pub fn expects_reply(&self) -> bool {
        self.reply == ReplyMode::Await
    }

    /// Whether this task consumes a value of the task counter.
    pub fn uses_task_counter(&self) -> bool {
        matches!(
            self.frame,
            TaskFrame::Queued {
                task_id: TaskIdPolicy::Sequential,
                ..
            }
        )
    }
}

/// Fresh epoch nonce: wall-clock millis in the high bits, 22 random low
/// bits. The server uses it to spot duplicate submissions.
pub fn offline_threading_id() -> u64 {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let entropy = u64::from(rand::thread_rng().r#gen::<u32>()) & 0x3F_FFFF;
    (millis << 22) | entropy
}

pub(crate) fn random_task_id() -> u64 {
    rand::thread_rng().gen_range(0..1001)
}

/// Serialize `task` into the envelope published on the request topic.
pub fn build_envelope(
    task: &TaskDescriptor,
    request_id: u64,
    task_id: Option<u64>,
    epoch_id: u64,
) -> String {
    let (kind, inner) = match &task.frame {
        TaskFrame::Queued { queue_name, .. } => (
            3,
            json!({
                "data_trace_id": null,
                "epoch_id": epoch_id,
                "tasks": [{
                    "failure_count": null,
                    "label": task.label,
                    "payload": task.payload.to_string(),
                    "queue_name": queue_name,
                    "task_id": task_id.unwrap_or_default(),
                }],
                "version_id": task.version_id,
            }),
        ),
        TaskFrame::Direct => (
            4,
            json!({
                "label": task.label,
                "payload": task.payload.to_string(),
                "version": task.version_id,
            }),
        ),
    };

    json!({
        "app_id": task.app_id,
        "payload": inner.to_string(),
        "request_id": request_id,
        "type": kind,
    })
    .to_string()
}

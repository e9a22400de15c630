//! Request/response correlation over the shared realtime channel.
//!
//! Every awaited task is registered under its `request_id` before the
//! envelope is published. Inbound `/ls_resp` traffic is matched back by id;
//! anything else is dropped. A task leaves the pending map exactly once: on
//! its reply, on timeout, on a publish failure or on teardown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{DispatchError, TransportError};
use crate::realtime::envelope::{
    TaskDescriptor, TaskFrame, TaskIdPolicy, build_envelope, offline_threading_id, random_task_id,
};
use crate::realtime::response::{ResponseEnvelope, payload_error};
use crate::realtime::transport::{InboundMessage, REQUEST_TOPIC, RESPONSE_TOPIC, RealtimeTransport};

/// Reply deadline for tasks that expect one.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(20);

/// Outcome of one submitted task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub request_id: u64,
    pub task_id: Option<u64>,
    /// Decoded reply payload; `Null` for fire-and-forget tasks.
    pub payload: Value,
}

type Reply = Result<TaskResult, DispatchError>;

struct PendingTask {
    task_id: Option<u64>,
    label: String,
    issued_at: Instant,
    reply: oneshot::Sender<Reply>,
}

/// Counter values a dispatcher resumes from, so ids are never reused when
/// the channel is rebuilt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub request: u64,
    pub task: u64,
}

pub struct TaskDispatcher {
    transport: Arc<dyn RealtimeTransport>,
    request_counter: AtomicU64,
    task_counter: AtomicU64,
    /// Keyed by request id, which is also insertion order.
    pending: Mutex<BTreeMap<u64, PendingTask>>,
    closed: AtomicBool,
    reply_timeout: Duration,
}

impl TaskDispatcher {
    pub fn new(transport: Arc<dyn RealtimeTransport>, reply_timeout: Duration) -> Self {
        Self::resume(transport, reply_timeout, DispatchCounters::default())
    }

    /// Start with counters continuing from `counters`.
    pub fn resume(
        transport: Arc<dyn RealtimeTransport>,
        reply_timeout: Duration,
        counters: DispatchCounters,
    ) -> Self {
        Self {
            transport,
            request_counter: AtomicU64::new(counters.request),
            task_counter: AtomicU64::new(counters.task),
            pending: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            reply_timeout,
        }
    }

    /// Last issued request and task ids.
    pub fn counters(&self) -> DispatchCounters {
        DispatchCounters {
            request: self.request_counter.load(Ordering::SeqCst),
            task: self.task_counter.load(Ordering::SeqCst),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Publish `task` and, unless it is fire-and-forget, wait for its reply.
    pub async fn submit(&self, task: TaskDescriptor) -> Result<TaskResult, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Connectivity {
                reason: "dispatcher has been torn down".to_string(),
            });
        }
        if !self.transport.is_connected() {
            return Err(DispatchError::Connectivity {
                reason: "realtime channel is not connected".to_string(),
            });
        }

        let request_id = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let task_id = match &task.frame {
            TaskFrame::Queued {
                task_id: TaskIdPolicy::Sequential,
                ..
            } => Some(self.task_counter.fetch_add(1, Ordering::SeqCst) + 1),
            TaskFrame::Queued {
                task_id: TaskIdPolicy::Random,
                ..
            } => Some(random_task_id()),
            TaskFrame::Direct => None,
        };
        let envelope = build_envelope(&task, request_id, task_id, offline_threading_id());

        if !task.expects_reply() {
            self.publish(request_id, &envelope).await?;
            tracing::debug!("Published fire-and-forget task {} (request {})", task.label, request_id);
            return Ok(TaskResult {
                request_id,
                task_id,
                payload: Value::Null,
            });
        }

        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().insert(
            request_id,
            PendingTask {
                task_id,
                label: task.label.clone(),
                issued_at: Instant::now(),
                reply: tx,
            },
        );
        // Deregisters if the caller drops this future mid-flight.
        let _registration = Registration {
            dispatcher: self,
            request_id,
        };

        if let Err(e) = self.publish(request_id, &envelope).await {
            self.pending.lock().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.reply_timeout, &mut rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(DispatchError::Connectivity {
                reason: "reply channel dropped".to_string(),
            }),
            Err(_) => {
                let already_resolved = self.pending.lock().remove(&request_id).is_none();
                if already_resolved && let Ok(reply) = rx.try_recv()
                {
                    // Reply landed between the deadline and deregistration.
                    return reply;
                }
                tracing::warn!(
                    "Task {} (request {}) timed out after {:?}",
                    task.label,
                    request_id,
                    self.reply_timeout
                );
                Err(DispatchError::Timeout {
                    request_id,
                    timeout: self.reply_timeout,
                })
            }
        }
    }

    async fn publish(&self, request_id: u64, envelope: &str) -> Result<(), DispatchError> {
        self.transport
            .publish(REQUEST_TOPIC, envelope)
            .await
            .map_err(|e| match e {
                TransportError::NotConnected => DispatchError::Connectivity {
                    reason: "realtime channel is not connected".to_string(),
                },
                TransportError::Publish(reason) => {
                    tracing::error!("Publish of request {} failed: {}", request_id, reason);
                    DispatchError::Publish { request_id, reason }
                }
            })
    }

    /// Route one inbound message. Returns whether it resolved a pending task.
    pub fn handle_inbound(&self, message: &InboundMessage) -> bool {
        if message.topic != RESPONSE_TOPIC {
            return false;
        }
        let envelope = match ResponseEnvelope::parse(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("Dropping unparseable response envelope: {}", e);
                return false;
            }
        };
        let Some(request_id) = envelope.request_id else {
            return false;
        };
        let Some(pending) = self.pending.lock().remove(&request_id) else {
            tracing::trace!("No pending task for request {}", request_id);
            return false;
        };

        let reply = envelope.decode_payload().and_then(|payload| {
            match payload_error(&payload) {
                Some(reason) => Err(DispatchError::Rejected { request_id, reason }),
                None => Ok(TaskResult {
                    request_id,
                    task_id: pending.task_id,
                    payload,
                }),
            }
        });
        tracing::debug!(
            "Task {} (request {}) answered in {:?}",
            pending.label,
            request_id,
            pending.issued_at.elapsed()
        );
        // The caller may have given up already.
        let _ = pending.reply.send(reply);
        true
    }

    /// Feed inbound traffic until the channel closes, then tear down.
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            self.handle_inbound(&message);
        }
        self.teardown("realtime channel closed");
    }

    /// Reject every pending task in submission order and refuse new ones.
    /// Returns how many were rejected.
    pub fn teardown(&self, reason: &str) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let drained = std::mem::take(&mut *self.pending.lock());
        let count = drained.len();
        for (_, pending) in drained {
            let _ = pending.reply.send(Err(DispatchError::Connectivity {
                reason: reason.to_string(),
            }));
        }
        if count > 0 {
            tracing::info!("Rejected {} pending task(s): {}", count, reason);
        }
        count
    }
}

struct Registration<'a> {
    dispatcher: &'a TaskDispatcher,
    request_id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.dispatcher.pending.lock().remove(&self.request_id);
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::capabilities::{Capability, CapabilityOutput, PRESENCE_APP_ID, parse_params, submit};
use crate::error::CapabilityError;
use crate::realtime::TaskDescriptor;
use crate::session::Session;

pub const SEND_TYPING_INDICATOR_NAME: &str = "send_typing_indicator";

const LABEL: &str = "3";
const VERSION: &str = "8965252033599983";
const DEFAULT_DURATION_MS: u64 = 10_000;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThreadIds {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct TypingParams {
    thread_id: ThreadIds,
    is_typing: bool,
    #[serde(default = "default_true")]
    is_group: bool,
    /// How long before an automatic stop is sent.
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default = "default_true")]
    auto_stop: bool,
    #[serde(default)]
    attribution: u64,
}

fn default_true() -> bool {
    true
}

/// Presence ping: fire-and-forget, one per thread.
pub struct SendTypingIndicator {
    session: Arc<Session>,
}

impl SendTypingIndicator {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

pub(crate) fn construct(session: Arc<Session>) -> Box<dyn Capability> {
    Box::new(SendTypingIndicator::new(session))
}

fn task(thread_key: u64, is_typing: bool, is_group: bool, attribution: u64) -> TaskDescriptor {
    TaskDescriptor::direct(
        PRESENCE_APP_ID,
        LABEL,
        json!({
            "thread_key": thread_key,
            "is_group_thread": u8::from(is_group),
            "is_typing": u8::from(is_typing),
            "attribution": attribution,
            "sync_group": 1,
            "thread_type": if is_group { 2 } else { 1 },
        }),
        VERSION,
    )
}

fn invalid(reason: String) -> CapabilityError {
    CapabilityError::InvalidParameters {
        name: SEND_TYPING_INDICATOR_NAME.to_string(),
        reason,
    }
}

#[async_trait]
impl Capability for SendTypingIndicator {
    fn name(&self) -> &str {
        SEND_TYPING_INDICATOR_NAME
    }

    fn description(&self) -> &str {
        "Shows or hides the typing indicator in one or more threads."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "thread_id": {
                    "description": "Thread id, or a list of thread ids.",
                    "oneOf": [
                        { "type": "string" },
                        { "type": "array", "items": { "type": "string" } }
                    ]
                },
                "is_typing": { "type": "boolean" },
                "is_group": { "type": "boolean", "description": "Defaults to true." },
                "duration_ms": {
                    "type": "integer",
                    "description": "Delay before the automatic stop. Defaults to 10000."
                },
                "auto_stop": { "type": "boolean", "description": "Defaults to true." },
                "attribution": { "type": "integer" }
            },
            "required": ["thread_id", "is_typing"]
        })
    }

    async fn execute(&self, params: Value) -> Result<CapabilityOutput, CapabilityError> {
        let parsed: TypingParams = parse_params(SEND_TYPING_INDICATOR_NAME, params)?;
        let thread_ids = match parsed.thread_id {
            ThreadIds::One(id) => vec![id],
            ThreadIds::Many(ids) => ids,
        };
        if thread_ids.is_empty() {
            return Err(invalid("thread_id is required".to_string()));
        }
        let thread_keys = thread_ids
            .iter()
            .map(|id| {
                id.trim()
                    .parse::<u64>()
                    .map_err(|_| invalid(format!("thread_id {id:?} is not numeric")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut last = None;
        for thread_key in thread_keys {
            let ping = task(thread_key, parsed.is_typing, parsed.is_group, parsed.attribution);
            last = Some(submit(&self.session, SEND_TYPING_INDICATOR_NAME, LABEL, ping).await?);

            if parsed.is_typing && parsed.auto_stop {
                let session = self.session.clone();
                let delay = Duration::from_millis(parsed.duration_ms.unwrap_or(DEFAULT_DURATION_MS));
                let stop = task(thread_key, false, parsed.is_group, parsed.attribution);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = session.submit_task(stop).await {
                        tracing::debug!("Typing auto-stop not sent: {}", e);
                    }
                });
            }
        }
        last.ok_or_else(|| invalid("thread_id is required".to_string()))
    }
}

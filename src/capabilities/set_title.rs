use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::capabilities::{
    Capability, CapabilityOutput, MESSENGER_APP_ID, parse_params, require_non_empty, submit,
};
use crate::error::CapabilityError;
use crate::realtime::TaskDescriptor;
use crate::session::Session;

pub const SET_TITLE_NAME: &str = "set_title";

const LABEL: &str = "32";
const VERSION_ID: &str = "8798795233522156";

#[derive(Debug, Deserialize)]
struct SetTitleParams {
    title: String,
    thread_id: String,
}

/// Rename a group thread.
pub struct SetTitle {
    session: Arc<Session>,
}

impl SetTitle {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

pub(crate) fn construct(session: Arc<Session>) -> Box<dyn Capability> {
    Box::new(SetTitle::new(session))
}

/// The thread is its own queue; task ids are random and skip the counter.
fn task(params: &SetTitleParams) -> TaskDescriptor {
    TaskDescriptor::queued(
        MESSENGER_APP_ID,
        LABEL,
        params.thread_id.clone(),
        json!({
            "thread_key": params.thread_id,
            "thread_name": params.title,
            "sync_group": 1,
        }),
        VERSION_ID,
    )
    .with_random_task_id()
}

#[async_trait]
impl Capability for SetTitle {
    fn name(&self) -> &str {
        SET_TITLE_NAME
    }

    fn description(&self) -> &str {
        "Sets the title of a group thread."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "New thread title." },
                "thread_id": { "type": "string" }
            },
            "required": ["title", "thread_id"]
        })
    }

    async fn execute(&self, params: Value) -> Result<CapabilityOutput, CapabilityError> {
        let parsed: SetTitleParams = parse_params(SET_TITLE_NAME, params)?;
        require_non_empty(SET_TITLE_NAME, "thread_id", &parsed.thread_id)?;
        submit(&self.session, SET_TITLE_NAME, SET_TITLE_NAME, task(&parsed)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::test_support::{first_task, harness, reply, unwrap_envelope};

    #[tokio::test]
    async fn title_goes_to_the_thread_queue_without_touching_the_task_counter() {
        let mut h = harness().await;
        let capability = SetTitle::new(h.session.clone());
        let call = tokio::spawn(async move {
            capability
                .execute(json!({"title": "Weekend plans", "thread_id": "4455"}))
                .await
        });

        let (outer, inner) = unwrap_envelope(&h.published.recv().await.unwrap().payload);
        let (task, payload) = first_task(&inner);
        assert_eq!(task["label"], LABEL);
        assert_eq!(task["queue_name"], "4455");
        assert!(task["task_id"].as_u64().unwrap() <= 1000);
        assert_eq!(payload["thread_name"], "Weekend plans");
        assert_eq!(inner["version_id"], VERSION_ID);

        h.inbound.send(reply(&outer["request_id"], json!({}))).await.unwrap();
        let output = call.await.unwrap().unwrap();
        assert_eq!(output.message_id, None);
        assert_eq!(h.session.counters().task, 0);
    }
}

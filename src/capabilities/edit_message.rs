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

pub const EDIT_MESSAGE_NAME: &str = "edit_message";

const LABEL: &str = "742";
const QUEUE: &str = "edit_message";
const VERSION_ID: &str = "6903494529735864";

#[derive(Debug, Deserialize)]
struct EditMessageParams {
    message_id: String,
    text: String,
}

/// Replace the text of a message the session sent.
pub struct EditMessage {
    session: Arc<Session>,
}

impl EditMessage {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

pub(crate) fn construct(session: Arc<Session>) -> Box<dyn Capability> {
    Box::new(EditMessage::new(session))
}

fn task(params: &EditMessageParams) -> TaskDescriptor {
    TaskDescriptor::queued(
        MESSENGER_APP_ID,
        LABEL,
        QUEUE,
        json!({
            "message_id": params.message_id,
            "text": params.text,
        }),
        VERSION_ID,
    )
}

#[async_trait]
impl Capability for EditMessage {
    fn name(&self) -> &str {
        EDIT_MESSAGE_NAME
    }

    fn description(&self) -> &str {
        "Edits the text of a previously sent message."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message_id": {
                    "type": "string",
                    "description": "Id of the message to edit (mid.$...)."
                },
                "text": {
                    "type": "string",
                    "description": "Replacement text."
                }
            },
            "required": ["message_id", "text"]
        })
    }

    async fn execute(&self, params: Value) -> Result<CapabilityOutput, CapabilityError> {
        let parsed: EditMessageParams = parse_params(EDIT_MESSAGE_NAME, params)?;
        require_non_empty(EDIT_MESSAGE_NAME, "message_id", &parsed.message_id)?;
        submit(&self.session, EDIT_MESSAGE_NAME, QUEUE, task(&parsed)).await
    }
}

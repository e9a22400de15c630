use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::capabilities::{
    Capability, CapabilityOutput, PRESENCE_APP_ID, parse_params, require_non_empty, submit,
};
use crate::error::CapabilityError;
use crate::realtime::TaskDescriptor;
use crate::session::Session;

pub const SET_MESSAGE_REACTION_NAME: &str = "set_message_reaction";

const LABEL: &str = "29";
const VERSION_ID: &str = "25376272951962053";
const SEND_ATTRIBUTION: u64 = 65537;

#[derive(Debug, Deserialize)]
struct ReactionParams {
    /// Emoji; an empty string removes the reaction.
    reaction: String,
    message_id: String,
    thread_id: String,
    #[serde(default)]
    force_custom_reaction: bool,
}

/// React to a message, or clear the session's reaction.
pub struct SetMessageReaction {
    session: Arc<Session>,
}

impl SetMessageReaction {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    fn task(&self, params: &ReactionParams) -> Result<TaskDescriptor, CapabilityError> {
        let queue = serde_json::to_string(&["reaction", params.message_id.as_str()]).map_err(|e| {
            CapabilityError::InvalidParameters {
                name: SET_MESSAGE_REACTION_NAME.to_string(),
                reason: e.to_string(),
            }
        })?;
        let reaction_style = params.force_custom_reaction.then_some(1);
        Ok(TaskDescriptor::queued(
            PRESENCE_APP_ID,
            LABEL,
            queue,
            json!({
                "thread_key": params.thread_id,
                "timestamp_ms": Utc::now().timestamp_millis(),
                "message_id": params.message_id,
                "reaction": params.reaction,
                "actor_id": self.session.identity().as_str(),
                "reaction_style": reaction_style,
                "sync_group": 1,
                "send_attribution": SEND_ATTRIBUTION,
                "dataclass_params": null,
                "attachment_fbid": null,
            }),
            VERSION_ID,
        ))
    }
}

pub(crate) fn construct(session: Arc<Session>) -> Box<dyn Capability> {
    Box::new(SetMessageReaction::new(session))
}

#[async_trait]
impl Capability for SetMessageReaction {
    fn name(&self) -> &str {
        SET_MESSAGE_REACTION_NAME
    }

    fn description(&self) -> &str {
        "Sets or clears the session's reaction on a message."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reaction": {
                    "type": "string",
                    "description": "Reaction emoji. Empty string removes the reaction."
                },
                "message_id": { "type": "string" },
                "thread_id": { "type": "string" },
                "force_custom_reaction": {
                    "type": "boolean",
                    "description": "Send the emoji as a custom reaction."
                }
            },
            "required": ["reaction", "message_id", "thread_id"]
        })
    }

    async fn execute(&self, params: Value) -> Result<CapabilityOutput, CapabilityError> {
        let parsed: ReactionParams = parse_params(SET_MESSAGE_REACTION_NAME, params)?;
        require_non_empty(SET_MESSAGE_REACTION_NAME, "message_id", &parsed.message_id)?;
        require_non_empty(SET_MESSAGE_REACTION_NAME, "thread_id", &parsed.thread_id)?;
        let task = self.task(&parsed)?;
        submit(&self.session, SET_MESSAGE_REACTION_NAME, SET_MESSAGE_REACTION_NAME, task).await
    }
}

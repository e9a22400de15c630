//! Capabilities: thin builders that turn caller parameters into one task
//! and submit it through the session's dispatcher.
//!
//! Capabilities are wired through an explicit [`CapabilityRegistry`]
//! mapping a name to a constructor taking the shared session handle.

mod edit_message;
mod set_message_reaction;
mod set_title;
mod typing;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CapabilityError;
use crate::realtime::{TaskDescriptor, TaskResponseData, TaskResult};
use crate::session::Session;

pub use edit_message::{EDIT_MESSAGE_NAME, EditMessage};
pub use set_message_reaction::{SET_MESSAGE_REACTION_NAME, SetMessageReaction};
pub use set_title::{SET_TITLE_NAME, SetTitle};
pub use typing::{SEND_TYPING_INDICATOR_NAME, SendTypingIndicator};

/// App id shared by the messaging mutations.
pub(crate) const MESSENGER_APP_ID: &str = "2220391788200892";
/// App id of the presence and reaction surface.
pub(crate) const PRESENCE_APP_ID: &str = "772021112871879";

/// What a capability hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    pub request_id: u64,
    /// Decoded reply ids, when the task type returns any.
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    /// Decoded reply payload; `null` for fire-and-forget tasks.
    pub payload: Value,
}

impl CapabilityOutput {
    fn from_result(task_type: &str, result: TaskResult) -> Self {
        let (thread_id, message_id) = match TaskResponseData::decode(task_type, &result.payload) {
            Some(TaskResponseData::SendMessage {
                thread_id,
                message_id,
                ..
            }) => (Some(thread_id), Some(message_id)),
            Some(TaskResponseData::Reaction { message_id })
            | Some(TaskResponseData::Edit { message_id }) => (None, Some(message_id)),
            None => (None, None),
        };
        Self {
            request_id: result.request_id,
            message_id,
            thread_id,
            payload: result.payload,
        }
    }
}

/// One realtime operation exposed to callers.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value) -> Result<CapabilityOutput, CapabilityError>;
}

/// Builds a capability bound to a session.
pub type CapabilityConstructor = fn(Arc<Session>) -> Box<dyn Capability>;

/// Name → constructor table. Registering a name twice is an error.
#[derive(Default)]
pub struct CapabilityRegistry {
    constructors: BTreeMap<String, CapabilityConstructor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in capability.
    pub fn with_defaults() -> Result<Self, CapabilityError> {
        let mut registry = Self::new();
        registry.register(EDIT_MESSAGE_NAME, edit_message::construct)?;
        registry.register(SET_MESSAGE_REACTION_NAME, set_message_reaction::construct)?;
        registry.register(SET_TITLE_NAME, set_title::construct)?;
        registry.register(SEND_TYPING_INDICATOR_NAME, typing::construct)?;
        Ok(registry)
    }

    pub fn register(
        &mut self,
        name: &str,
        constructor: CapabilityConstructor,
    ) -> Result<(), CapabilityError> {
        if self.constructors.contains_key(name) {
            return Err(CapabilityError::Duplicate {
                name: name.to_string(),
            });
        }
        tracing::debug!("Registered capability {}", name);
        self.constructors.insert(name.to_string(), constructor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn instantiate(
        &self,
        name: &str,
        session: Arc<Session>,
    ) -> Result<Box<dyn Capability>, CapabilityError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| CapabilityError::NotFound {
                name: name.to_string(),
            })?;
        Ok(constructor(session))
    }

    /// Bind every registered capability to `session`.
    pub fn instantiate_all(&self, session: &Arc<Session>) -> BTreeMap<String, Box<dyn Capability>> {
        self.constructors
            .iter()
            .map(|(name, constructor)| (name.clone(), constructor(session.clone())))
            .collect()
    }
}

pub(crate) fn parse_params<T: DeserializeOwned>(name: &str, params: Value) -> Result<T, CapabilityError> {
    serde_json::from_value(params).map_err(|e| CapabilityError::InvalidParameters {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn require_non_empty(name: &str, field: &str, value: &str) -> Result<(), CapabilityError> {
    if value.trim().is_empty() {
        return Err(CapabilityError::InvalidParameters {
            name: name.to_string(),
            reason: format!("{field} cannot be empty"),
        });
    }
    Ok(())
}

/// Submit `task` and decode the reply as `task_type`.
pub(crate) async fn submit(
    session: &Session,
    name: &str,
    task_type: &str,
    task: TaskDescriptor,
) -> Result<CapabilityOutput, CapabilityError> {
    let result = session
        .submit_task(task)
        .await
        .map_err(|source| {
            tracing::error!("{} failed: {}", name, source);
            CapabilityError::Dispatch {
                name: name.to_string(),
                source,
            }
        })?;
    Ok(CapabilityOutput::from_result(task_type, result))
}

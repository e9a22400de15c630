//! Task protocol over the shared realtime channel.

pub mod dispatcher;
pub mod envelope;
pub mod response;
pub mod transport;

pub use dispatcher::{DEFAULT_REPLY_TIMEOUT, DispatchCounters, TaskDispatcher, TaskResult};
pub use envelope::{ReplyMode, TaskDescriptor, TaskFrame, TaskIdPolicy};
pub use response::{ResponseEnvelope, TaskResponseData};
pub use transport::{
    InboundMessage, MemoryTransport, PublishedMessage, REQUEST_TOPIC, RESPONSE_TOPIC,
    RealtimeTransport,
};

//! Cookie-session recovery and realtime task dispatch for a messaging
//! client.
//!
//! A [`session::SessionRecovery`] turns a seed (cookie header, app-state
//! export or credentials) into a verified [`session::Session`]. The
//! session owns a [`realtime::TaskDispatcher`] once a transport is
//! attached, and [`capabilities`] build the tasks it submits.

pub mod backup;
pub mod bootstrap;
pub mod capabilities;
pub mod cli;
pub mod config;
pub mod error;
pub mod realtime;
pub mod session;
pub mod settings;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{Session, SessionRecovery, SessionSeed};

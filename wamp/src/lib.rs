//! Minimal WAMP v2 client.
//!
//! Implements the basic profile (publish/subscribe and routed RPC) using the
//! `wamp.2.json` serialization over a WebSocket transport.

pub mod client;
pub mod config;
pub mod session;
pub mod types;

pub use client::WampClient;
pub use config::WampConfig;
pub use session::{
    ignore_no_such_procedure, ApplicationError, CallResult, Event, EventHandler, Invocation,
    Procedure, Session, WampError, WampResult,
};
pub use types::{codes, uris, Dict, Id, Message, Payload};

pub mod prelude {
    pub use crate::client::*;
    pub use crate::config::*;
    pub use crate::session::*;
    pub use crate::types::*;
}

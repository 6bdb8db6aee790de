//! OCPP 2.0.1 protocol layer
//!
//! - `types`: OCPP message types and data structures
//! - `messages`: JSON-RPC framing (CALL, CALLRESULT, CALLERROR)
//! - `client`: WebSocket transport to the CSMS
//! - `session`: per-charge-point session bridge and dispatch logic

pub mod client;
pub mod messages;
pub mod session;
pub mod types;

pub use client::{CsmsLink, IncomingRequest};
pub use messages::*;
pub use session::{Outbound, SessionBridge};
pub use types::*;

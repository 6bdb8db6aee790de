//! # V2G OCPP Adapter
//!
//! Bridges live ISO 15118 (EVCC/SECC) charging session state into an OCPP
//! 2.0.1 CSMS, and translates CSMS-issued charging profiles back into the
//! schedule structures the ISO 15118 session consumes.
//!
//! ## Architecture
//!
//! ```text
//! OCPP CSMS (Backend)
//!       │ WebSocket JSON-RPC
//!       ▼
//! ┌───────────────────────────────────┐
//! │    v2g-adapter-ocpp               │
//! │  ┌────────────┐  ┌─────────────┐  │
//! │  │ Connection │◄►│ Session     │  │
//! │  │ Supervisor │  │ Bridge      │  │
//! │  └────────────┘  └──────┬──────┘  │
//! │                  ┌──────┴──────┐  │
//! │                  │ Schedule    │  │
//! │                  │ Translator  │  │
//! │                  └─────────────┘  │
//! └─────────────┬─────────────────────┘
//!               │ state polling / schedule sink
//!               ▼
//! ┌───────────────────────────────────┐
//! │    ISO 15118 session (SECC)       │
//! │  protocol state │ charging needs  │
//! └───────────────────────────────────┘
//! ```
//!
//! ## Message Flow
//!
//! 1. The supervisor connects to the next CSMS endpoint from the rotator
//!    and runs the boot sequence
//! 2. On each observed SECC state transition the bridge dispatches the OCPP
//!    messages owed for it (StatusNotification, TransactionEvent,
//!    Authorize, NotifyEVChargingNeeds) — at most once per transition
//! 3. A SetChargingProfile push from the CSMS is acknowledged and stored
//! 4. On entry to ChargeParameterDiscovery the stored profile is translated
//!    into an SAScheduleTuple and handed to the ISO 15118 session
//!
//! ## Usage
//!
//! ```no_run
//! use v2g_adapter_ocpp::{BridgeConfig, FleetRunner, SimSessionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let base = BridgeConfig::default().with_port_range(2910, 2920);
//!     let fleet = FleetRunner::simulated(base, "CP", 10, SimSessionConfig::default());
//!     fleet.run().await;
//! }
//! ```

pub mod codec;
pub mod config;
pub mod fleet;
pub mod iso;
pub mod metrics;
pub mod ocpp;
pub mod rotation;
pub mod supervisor;

pub use codec::{CodecError, ExiCodec, ResetOnFailure};
pub use config::{BridgeConfig, RotationConfig, StationConfig};
pub use fleet::FleetRunner;
pub use iso::schedule::SaScheduleTuple;
pub use iso::session::{ChargingNeeds, ChargingSession, SeccState, SimSession, SimSessionConfig};
pub use iso::translator::{translate, TranslateError};
pub use metrics::{MetricsSink, NullSink, TracingSink};
pub use supervisor::ConnectionSupervisor;

// Re-export key OCPP types
pub use ocpp::{
    Action, Call, CallResult, ChargingProfile, ConnectorStatus, CsmsLink, GenericStatus,
    Outbound, SessionBridge,
};

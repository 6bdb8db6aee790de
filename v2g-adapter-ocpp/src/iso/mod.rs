//! ISO 15118 side of the bridge
//!
//! - `session`: the observed SECC session (trait + simulator)
//! - `schedule`: ISO 15118-2 schedule value types
//! - `translator`: OCPP charging profile -> ISO schedule conversion

pub mod schedule;
pub mod session;
pub mod translator;

pub use schedule::SaScheduleTuple;
pub use session::{ChargingNeeds, ChargingSession, SeccState, SimSession, SimSessionConfig};
pub use translator::{translate, TranslateError};

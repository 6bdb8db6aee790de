//! Charge point session bridge
//!
//! `SessionBridge` holds the per-charge-point session state and decides,
//! for each observed ISO 15118 state transition, which OCPP messages must
//! go out. `observe_state` is the single gate: dispatch fires at most once
//! per transition, and interior protocol states produce nothing.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::iso::session::{ChargingNeeds, SeccState};
use crate::ocpp::types::*;

/// Outbound OCPP message produced by one dispatch
#[derive(Debug, Clone)]
pub enum Outbound {
    StatusNotification(StatusNotificationRequest),
    TransactionEvent(TransactionEventRequest),
    Authorize(AuthorizeRequest),
    NotifyEvChargingNeeds(NotifyEvChargingNeedsRequest),
}

impl Outbound {
    /// OCPP action name of the message, for logging and metrics
    pub fn action_name(&self) -> &'static str {
        match self {
            Outbound::StatusNotification(_) => "StatusNotification",
            Outbound::TransactionEvent(_) => "TransactionEvent",
            Outbound::Authorize(_) => "Authorize",
            Outbound::NotifyEvChargingNeeds(_) => "NotifyEVChargingNeeds",
        }
    }
}

/// Per-charge-point session state and dispatch logic
pub struct SessionBridge {
    identity: String,
    evse_id: i32,
    current_state: SeccState,
    previous_state: SeccState,
    state_changed: bool,
    booted: bool,
    heartbeat_interval: i32,
    transaction_id: Option<String>,
    connector_status: ConnectorStatus,
    authorized: Option<bool>,
    id_token: IdToken,
    charging_needs: Option<ChargingNeeds>,
    active_charging_profile: Option<ChargingProfile>,
}

impl SessionBridge {
    pub fn new(identity: impl Into<String>, evse_id: i32) -> Self {
        Self {
            identity: identity.into(),
            evse_id,
            current_state: SeccState::NotStarted,
            previous_state: SeccState::NotStarted,
            state_changed: false,
            booted: false,
            heartbeat_interval: 10,
            transaction_id: None,
            connector_status: ConnectorStatus::Available,
            authorized: None,
            id_token: IdToken {
                id_token: Uuid::new_v4().to_string(),
                token_type: "Local".to_string(),
            },
            charging_needs: None,
            active_charging_profile: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn evse_id(&self) -> i32 {
        self.evse_id
    }

    pub fn booted(&self) -> bool {
        self.booted
    }

    /// Heartbeat cadence in seconds, as granted by the CSMS
    pub fn heartbeat_interval(&self) -> i32 {
        self.heartbeat_interval
    }

    pub fn connector_status(&self) -> ConnectorStatus {
        self.connector_status
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn authorized(&self) -> Option<bool> {
        self.authorized
    }

    /// Profile last pushed by the CSMS, if any
    pub fn active_charging_profile(&self) -> Option<&ChargingProfile> {
        self.active_charging_profile.as_ref()
    }

    /// Record the accepted boot response
    pub fn mark_booted(&mut self, heartbeat_interval: i32) {
        self.booted = true;
        self.heartbeat_interval = heartbeat_interval;
        info!(
            "{}: registered with CSMS, heartbeat every {}s",
            self.identity, heartbeat_interval
        );
    }

    /// Forget the boot acceptance when the connection is lost
    pub fn mark_disconnected(&mut self) {
        self.booted = false;
    }

    /// Store the needs negotiated by the EV, if none are pending
    pub fn update_charging_needs(&mut self, needs: ChargingNeeds) {
        if self.charging_needs.is_none() {
            self.charging_needs = Some(needs);
        }
    }

    /// Observe the externally-driven protocol state.
    ///
    /// Returns whether a transition occurred. Dispatch must only be invoked
    /// after a `true` return; this is what bounds every status/transaction
    /// message to one per transition.
    pub fn observe_state(&mut self, new_state: SeccState) -> bool {
        if new_state == self.current_state {
            self.state_changed = false;
            return false;
        }
        self.previous_state = self.current_state;
        self.current_state = new_state;
        self.state_changed = true;
        debug!(
            "{}: SECC {} -> {}",
            self.identity, self.previous_state, self.current_state
        );
        true
    }

    pub fn current_state(&self) -> SeccState {
        self.current_state
    }

    /// Produce the OCPP messages owed for the last observed transition.
    ///
    /// Consumes the transition flag, so calling twice for one transition
    /// yields nothing the second time. Interior states produce an empty
    /// sequence; that is the normal case, not an error.
    pub fn dispatch(&mut self) -> Vec<Outbound> {
        if !self.booted || !self.state_changed {
            return Vec::new();
        }
        self.state_changed = false;

        let mut out = Vec::new();

        match self.current_state {
            SeccState::SupportedAppProtocol => {
                self.connector_status = ConnectorStatus::Occupied;
                out.push(self.status_notification());
            }
            SeccState::SessionSetup => {
                let transaction_id = self.ensure_transaction_id();
                out.push(Outbound::TransactionEvent(TransactionEventRequest {
                    event_type: TransactionEventType::Started,
                    timestamp: Utc::now(),
                    trigger_reason: TriggerReason::EVDetected,
                    seq_no: 0,
                    transaction_info: TransactionInfo {
                        transaction_id,
                        charging_state: Some(ChargingState::EVConnected),
                    },
                }));
            }
            SeccState::Authorization => {
                out.push(Outbound::Authorize(AuthorizeRequest {
                    id_token: self.id_token.clone(),
                }));
                if let Some(needs) = self.charging_needs.take() {
                    out.push(Outbound::NotifyEvChargingNeeds(NotifyEvChargingNeedsRequest {
                        charging_needs: ChargingNeedsPayload {
                            requested_energy_transfer: EnergyTransferMode::AcSinglePhase,
                            ac_charging_parameters: Some(AcChargingParameters {
                                energy_amount: needs.energy_amount,
                                ev_min_current: needs.min_current as i32,
                                ev_max_current: needs.max_current as i32,
                                ev_max_voltage: needs.max_voltage as i32,
                            }),
                            departure_time: Some(needs.departure_time),
                        },
                        evse_id: self.evse_id,
                        max_schedule_tuples: 1,
                    }));
                }
            }
            SeccState::SessionStop => {
                self.connector_status = ConnectorStatus::Available;
                out.push(self.status_notification());

                let transaction_id = self.ensure_transaction_id();
                out.push(Outbound::TransactionEvent(TransactionEventRequest {
                    event_type: TransactionEventType::Ended,
                    timestamp: Utc::now(),
                    trigger_reason: TriggerReason::EnergyLimitReached,
                    seq_no: 0,
                    transaction_info: TransactionInfo {
                        transaction_id,
                        charging_state: Some(ChargingState::SuspendedEV),
                    },
                }));

                // Occupancy episode over: the next EV gets a fresh id
                self.transaction_id = None;
                self.authorized = None;
            }
            _ => {}
        }

        out
    }

    /// CSMS-initiated SetChargingProfile push.
    ///
    /// A profile targeting another EVSE on the same transport is
    /// acknowledged without being stored; failing the call would fail the
    /// CSMS for a message that simply was not ours.
    pub fn on_charging_profile_push(
        &mut self,
        evse_id: i32,
        profile: ChargingProfile,
    ) -> GenericStatus {
        if evse_id == self.evse_id {
            info!(
                "{}: charging profile {} received from CSMS",
                self.identity, profile.id
            );
            self.active_charging_profile = Some(profile);
        } else {
            debug!(
                "{}: ignoring charging profile for EVSE {} (ours is {})",
                self.identity, evse_id, self.evse_id
            );
        }
        GenericStatus::Accepted
    }

    /// Outcome of the Authorize exchange. Rejection is recoverable.
    pub fn on_authorize_result(&mut self, status: AuthorizationStatus) {
        let accepted = status == AuthorizationStatus::Accepted;
        self.authorized = Some(accepted);
        if !accepted {
            warn!(
                "{}: authentication failed, token not accepted by CSMS ({:?})",
                self.identity, status
            );
        }
    }

    fn status_notification(&self) -> Outbound {
        Outbound::StatusNotification(StatusNotificationRequest {
            timestamp: Utc::now(),
            connector_status: self.connector_status,
            evse_id: self.evse_id,
            connector_id: 1,
        })
    }

    fn ensure_transaction_id(&mut self) -> String {
        self.transaction_id
            .get_or_insert_with(|| format!("tx-{}", &Uuid::new_v4().to_string()[..8]))
            .clone()
    }
}

//! OCPP 2.0.1 message types
//!
//! Implements the data types for the messages a bridged charge point
//! exchanges with the CSMS:
//! - BootNotification / Heartbeat
//! - StatusNotification
//! - TransactionEvent
//! - Authorize
//! - NotifyEVChargingNeeds
//! - SetChargingProfile (CSMS -> CP)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Enumerations
// ============================================================================

/// Connector status reported to the CSMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Occupied,
}

/// Generic OCPP status for responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum GenericStatus {
    Accepted,
    Rejected,
}

/// Registration status for BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Authorization status carried in idTokenInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    NoCredit,
    NotAllowedTypeEVSE,
    NotAtThisLocation,
    NotAtThisTime,
    Unknown,
}

/// Boot reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootReason {
    ApplicationReset,
    FirmwareUpdate,
    LocalReset,
    PowerUp,
    RemoteReset,
    ScheduledReset,
    Triggered,
    Unknown,
    Watchdog,
}

/// Charging rate unit
///
/// Units outside the OCPP 2.0.1 set decode to `Unsupported` so a bad profile
/// is rejected by the schedule translation, not by frame parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingRateUnit {
    W,
    A,
    #[serde(other)]
    Unsupported,
}

/// Charging profile purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingProfilePurpose {
    ChargingStationMaxProfile,
    TxDefaultProfile,
    TxProfile,
}

/// Charging profile kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingProfileKind {
    Absolute,
    Recurring,
    Relative,
}

/// TransactionEvent event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionEventType {
    Started,
    Updated,
    Ended,
}

/// Reason a TransactionEvent was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    Authorized,
    CablePluggedIn,
    ChargingStateChanged,
    Deauthorized,
    EnergyLimitReached,
    EVCommunicationLost,
    EVConnectTimeout,
    EVDeparted,
    EVDetected,
    RemoteStart,
    RemoteStop,
    StopAuthorized,
    TimeLimitReached,
    Trigger,
}

/// Charging state inside transactionInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingState {
    Charging,
    EVConnected,
    SuspendedEV,
    SuspendedEVSE,
    Idle,
}

/// Requested energy transfer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnergyTransferMode {
    #[serde(rename = "AC_single_phase")]
    AcSinglePhase,
    #[serde(rename = "AC_two_phase")]
    AcTwoPhase,
    #[serde(rename = "AC_three_phase")]
    AcThreePhase,
    #[serde(rename = "DC")]
    Dc,
}

/// Status in the NotifyEVChargingNeeds response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargingNeedsStatus {
    Accepted,
    Rejected,
    Processing,
}

// ============================================================================
// Complex Types
// ============================================================================

/// Token for identification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdToken {
    pub id_token: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Token status info returned by Authorize
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenInfo {
    pub status: AuthorizationStatus,
}

/// Charging station information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingStationInfo {
    pub model: String,
    pub vendor_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// Charging schedule period
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedulePeriod {
    pub start_period: i32,
    pub limit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_phases: Option<i32>,
}

/// Charging schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedule {
    pub id: i32,
    pub charging_rate_unit: ChargingRateUnit,
    pub charging_schedule_period: Vec<ChargingSchedulePeriod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_schedule: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_charging_rate: Option<f64>,
}

/// Charging profile pushed by the CSMS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingProfile {
    pub id: i32,
    pub stack_level: i32,
    pub charging_profile_purpose: ChargingProfilePurpose,
    pub charging_profile_kind: ChargingProfileKind,
    pub charging_schedule: Vec<ChargingSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Transaction details inside TransactionEvent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging_state: Option<ChargingState>,
}

/// AC charging parameters negotiated by the EV
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcChargingParameters {
    pub energy_amount: f64,
    pub ev_min_current: i32,
    pub ev_max_current: i32,
    pub ev_max_voltage: i32,
}

/// Charging needs inside NotifyEVChargingNeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingNeedsPayload {
    pub requested_energy_transfer: EnergyTransferMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_charging_parameters: Option<AcChargingParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure_time: Option<i64>,
}

/// Status info for responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
}

// ============================================================================
// Request Messages
// ============================================================================

/// BootNotification request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charging_station: ChargingStationInfo,
    pub reason: BootReason,
}

/// Heartbeat request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

/// StatusNotification request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub timestamp: DateTime<Utc>,
    pub connector_status: ConnectorStatus,
    pub evse_id: i32,
    pub connector_id: i32,
}

/// TransactionEvent request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEventRequest {
    pub event_type: TransactionEventType,
    pub timestamp: DateTime<Utc>,
    pub trigger_reason: TriggerReason,
    pub seq_no: i32,
    pub transaction_info: TransactionInfo,
}

/// Authorize request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_token: IdToken,
}

/// NotifyEVChargingNeeds request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyEvChargingNeedsRequest {
    pub charging_needs: ChargingNeedsPayload,
    pub evse_id: i32,
    pub max_schedule_tuples: i32,
}

/// SetChargingProfile request (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetChargingProfileRequest {
    pub evse_id: i32,
    pub charging_profile: ChargingProfile,
}

// ============================================================================
// Response Messages
// ============================================================================

/// BootNotification response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub current_time: DateTime<Utc>,
    pub interval: i32,
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_info: Option<StatusInfo>,
}

/// Heartbeat response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

/// StatusNotification response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusNotificationResponse {}

/// TransactionEvent response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEventResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_info: Option<IdTokenInfo>,
}

/// Authorize response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub id_token_info: IdTokenInfo,
}

/// NotifyEVChargingNeeds response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyEvChargingNeedsResponse {
    pub status: ChargingNeedsStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_info: Option<StatusInfo>,
}

/// SetChargingProfile response (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetChargingProfileResponse {
    pub status: GenericStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_info: Option<StatusInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charging_profile_serialization() {
        let profile = ChargingProfile {
            id: 1,
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurpose::TxDefaultProfile,
            charging_profile_kind: ChargingProfileKind::Absolute,
            charging_schedule: vec![ChargingSchedule {
                id: 1,
                charging_rate_unit: ChargingRateUnit::W,
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: 22000.0,
                    number_phases: Some(3),
                }],
                start_schedule: None,
                duration: None,
                min_charging_rate: None,
            }],
            valid_from: None,
            valid_to: None,
            transaction_id: None,
        };

        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains("TxDefaultProfile"));
        assert!(json.contains("22000"));

        let parsed: ChargingProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.charging_schedule.len(), 1);
    }

    #[test]
    fn test_transaction_event_wire_form() {
        let req = TransactionEventRequest {
            event_type: TransactionEventType::Started,
            timestamp: Utc::now(),
            trigger_reason: TriggerReason::EVDetected,
            seq_no: 0,
            transaction_info: TransactionInfo {
                transaction_id: "tx-0a1b2c3d".to_string(),
                charging_state: Some(ChargingState::EVConnected),
            },
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"eventType\":\"Started\""));
        assert!(json.contains("\"triggerReason\":\"EVDetected\""));
        assert!(json.contains("\"transactionId\":\"tx-0a1b2c3d\""));
    }

    #[test]
    fn test_charging_needs_wire_form() {
        let req = NotifyEvChargingNeedsRequest {
            charging_needs: ChargingNeedsPayload {
                requested_energy_transfer: EnergyTransferMode::AcSinglePhase,
                ac_charging_parameters: Some(AcChargingParameters {
                    energy_amount: 60.0,
                    ev_min_current: 6,
                    ev_max_current: 32,
                    ev_max_voltage: 400,
                }),
                departure_time: Some(3600),
            },
            evse_id: 4,
            max_schedule_tuples: 1,
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("AC_single_phase"));
        assert!(json.contains("\"evMaxCurrent\":32"));
        assert!(json.contains("\"maxScheduleTuples\":1"));
    }

    #[test]
    fn test_boot_notification_round_trip() {
        let req = BootNotificationRequest {
            charging_station: ChargingStationInfo {
                model: "EK3-V2G".to_string(),
                vendor_name: "Elektrokombinacija".to_string(),
                serial_number: Some("EK3-V2G-001".to_string()),
                firmware_version: Some("0.1.0".to_string()),
            },
            reason: BootReason::PowerUp,
        };

        let json = serde_json::to_string(&req).unwrap();
        let parsed: BootNotificationRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.charging_station.model, "EK3-V2G");
    }
}

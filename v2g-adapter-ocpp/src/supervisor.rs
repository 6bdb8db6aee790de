//! Connection supervisor
//!
//! Owns one charge point's outbound CSMS connection and its recovery:
//! pick the next endpoint from the rotator, connect, run the boot sequence,
//! then multiplex the heartbeat, dispatch and push-handler loops until the
//! transport closes. Transport failures are never fatal; the loop retries
//! after a fixed delay with a fresh endpoint.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::codec::ExiCodec;
use crate::config::BridgeConfig;
use crate::iso::session::{ChargingSession, SeccState};
use crate::iso::translator::translate;
use crate::metrics::{MetricsSink, TracingSink};
use crate::ocpp::client::{CsmsLink, IncomingRequest};
use crate::ocpp::messages::{Action, Call, CallError, CallResult, ErrorCode, OcppError};
use crate::ocpp::session::{Outbound, SessionBridge};
use crate::ocpp::types::{
    AuthorizeResponse, BootNotificationResponse, BootReason, ChargingStationInfo,
    RegistrationStatus, SetChargingProfileRequest,
};
use crate::rotation::{derive_evse_id, host_address, AddressRotator};

/// Supervises one charge point's CSMS connection
pub struct ConnectionSupervisor {
    config: BridgeConfig,
    rotator: AddressRotator,
    bridge: Arc<RwLock<SessionBridge>>,
    session: Arc<dyn ChargingSession>,
    metrics: Arc<dyn MetricsSink>,
    codec: Option<Arc<dyn ExiCodec>>,
}

impl ConnectionSupervisor {
    pub fn new(config: BridgeConfig, session: Arc<dyn ChargingSession>) -> Self {
        let evse_id = config.station.evse_id.unwrap_or_else(|| {
            derive_evse_id(
                &config.station.identity,
                Some(host_address(config.rotation.fallback)),
            )
        });
        let bridge = Arc::new(RwLock::new(SessionBridge::new(
            config.station.identity.clone(),
            evse_id,
        )));
        let rotator = AddressRotator::new(config.rotation.clone());

        Self {
            config,
            rotator,
            bridge,
            session,
            metrics: Arc::new(TracingSink),
            codec: None,
        }
    }

    /// Replace the latency sink
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attach the EXI codec gateway, reset once per detected network failure
    pub fn with_codec(mut self, codec: Arc<dyn ExiCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Shared handle to this charge point's session bridge
    pub fn bridge(&self) -> Arc<RwLock<SessionBridge>> {
        self.bridge.clone()
    }

    /// Run the connection lifecycle. Never returns under normal operation.
    pub async fn run(mut self) {
        let identity = self.config.station.identity.clone();

        loop {
            let (addr, port) = self.rotator.next_endpoint();
            info!("{}: connecting to CSMS at {}:{}", identity, addr, port);

            match self.serve(addr, port).await {
                Ok(()) => {
                    info!("{}: connection to {}:{} ended", identity, addr, port);
                }
                Err(e) => {
                    warn!("{}: connection to {}:{} failed: {}", identity, addr, port, e);
                    if let Some(codec) = &self.codec {
                        if let Err(reset_err) = codec.reset() {
                            warn!("{}: codec gateway reset failed: {}", identity, reset_err);
                        }
                    }
                }
            }

            self.bridge.write().await.mark_disconnected();
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    /// One connection: boot, then the concurrent loops until closure
    async fn serve(&self, addr: Ipv4Addr, port: u16) -> Result<(), OcppError> {
        let (link, incoming, pump) = CsmsLink::connect(
            addr,
            port,
            &self.config.station.identity,
            self.config.request_timeout,
        )
        .await?;

        let result = self.drive(&link, incoming).await;

        // No orphaned pump past this connection
        pump.abort();
        result
    }

    async fn drive(
        &self,
        link: &CsmsLink,
        mut incoming: mpsc::Receiver<IncomingRequest>,
    ) -> Result<(), OcppError> {
        let identity = &self.config.station.identity;

        // Boot sequence
        let started = Instant::now();
        let boot = Call::boot_notification(self.station_info(), BootReason::PowerUp)?;
        let result = link.call(boot).await?;
        self.metrics
            .record(identity, "BootNotification", started.elapsed());

        let response: BootNotificationResponse = result.parse_payload()?;
        match response.status {
            RegistrationStatus::Accepted => {
                self.bridge.write().await.mark_booted(response.interval);
            }
            status @ (RegistrationStatus::Pending | RegistrationStatus::Rejected) => {
                // Business rejection: close and let the outer loop retry
                warn!("{}: boot not accepted ({:?})", identity, status);
                return Ok(());
            }
        }

        let heartbeat_interval =
            std::time::Duration::from_secs(response.interval.max(1) as u64);

        // Heartbeat, dispatch and push handling share this task; all three
        // end when the transport closes.
        tokio::select! {
            r = self.heartbeat_loop(link, heartbeat_interval) => r,
            r = self.dispatch_loop(link) => r,
            r = self.push_loop(link, &mut incoming) => r,
        }
    }

    async fn heartbeat_loop(
        &self,
        link: &CsmsLink,
        interval: std::time::Duration,
    ) -> Result<(), OcppError> {
        loop {
            let started = Instant::now();
            link.call(Call::heartbeat()?).await?;
            self.metrics
                .record(&self.config.station.identity, "Heartbeat", started.elapsed());
            tokio::time::sleep(interval).await;
        }
    }

    async fn dispatch_loop(&self, link: &CsmsLink) -> Result<(), OcppError> {
        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            if let Some(needs) = self.session.charging_needs() {
                self.bridge.write().await.update_charging_needs(needs);
            }

            let state = self.session.state();
            let outbound = {
                let mut bridge = self.bridge.write().await;
                if bridge.observe_state(state) {
                    bridge.dispatch()
                } else {
                    continue;
                }
            };

            // Dispatch for this transition completes before the next
            // transition is observed
            for message in outbound {
                self.send_outbound(link, message).await?;
            }

            if state == SeccState::ChargeParameterDiscovery {
                self.deliver_schedule().await;
            }
        }
    }

    async fn send_outbound(&self, link: &CsmsLink, message: Outbound) -> Result<(), OcppError> {
        let identity = &self.config.station.identity;
        let name = message.action_name();
        let started = Instant::now();

        let (call, is_authorize) = match message {
            Outbound::StatusNotification(req) => (Call::status_notification(req)?, false),
            Outbound::TransactionEvent(req) => (Call::transaction_event(req)?, false),
            Outbound::Authorize(req) => (Call::authorize(req)?, true),
            Outbound::NotifyEvChargingNeeds(req) => {
                (Call::notify_ev_charging_needs(req)?, false)
            }
        };

        match link.call(call).await {
            Ok(result) => {
                if is_authorize {
                    let response: AuthorizeResponse = result.parse_payload()?;
                    self.bridge
                        .write()
                        .await
                        .on_authorize_result(response.id_token_info.status);
                }
                self.metrics.record(identity, name, started.elapsed());
                Ok(())
            }
            Err(OcppError::RemoteError {
                code, description, ..
            }) => {
                // CSMS-level rejection of a single message is not fatal to
                // the connection
                warn!(
                    "{}: CSMS rejected {}: {:?} {}",
                    identity, name, code, description
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn push_loop(
        &self,
        link: &CsmsLink,
        incoming: &mut mpsc::Receiver<IncomingRequest>,
    ) -> Result<(), OcppError> {
        let identity = &self.config.station.identity;

        while let Some(request) = incoming.recv().await {
            match request.action {
                Action::SetChargingProfile => {
                    match serde_json::from_value::<SetChargingProfileRequest>(request.payload) {
                        Ok(push) => {
                            let status = self
                                .bridge
                                .write()
                                .await
                                .on_charging_profile_push(push.evse_id, push.charging_profile);
                            link.respond(CallResult::set_charging_profile(
                                request.message_id,
                                status,
                            )?)
                            .await?;
                        }
                        Err(e) => {
                            warn!("{}: malformed SetChargingProfile: {}", identity, e);
                            link.respond_error(CallError::new(
                                request.message_id,
                                ErrorCode::FormatViolation,
                                e.to_string(),
                            ))
                            .await?;
                        }
                    }
                }
                other => {
                    debug!("{}: unhandled CSMS action {}", identity, other);
                    link.respond_error(CallError::new(
                        request.message_id,
                        ErrorCode::NotImplemented,
                        format!("{} not handled", other),
                    ))
                    .await?;
                }
            }
        }

        // Channel end means the pump is gone
        Err(OcppError::ConnectionClosed)
    }

    /// Translate the active profile and hand the schedule to the session
    async fn deliver_schedule(&self) {
        let profile = self.bridge.read().await.active_charging_profile().cloned();
        let Some(profile) = profile else { return };

        match translate(&profile) {
            Ok(schedule) => self.session.accept_schedule(schedule),
            Err(e) => {
                // Validation failure: no partial schedule is delivered
                warn!(
                    "{}: charging profile {} not translatable: {}",
                    self.config.station.identity, profile.id, e
                );
            }
        }
    }

    fn station_info(&self) -> ChargingStationInfo {
        ChargingStationInfo {
            model: self.config.station.model.clone(),
            vendor_name: self.config.station.vendor.clone(),
            serial_number: self.config.station.serial_number.clone(),
            firmware_version: self.config.station.firmware_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RotationConfig;
    use crate::iso::session::{SimSession, SimSessionConfig};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    /// Minimal CSMS: accepts one charge point, answers every call, logs
    /// received action names, optionally pushes a charging profile right
    /// after boot.
    async fn mock_csms(
        listener: TcpListener,
        log: Arc<Mutex<Vec<String>>>,
        push_profile: Option<serde_json::Value>,
    ) {
        let (stream, _) = listener.accept().await.expect("accept");
        // A real CSMS echoes the negotiated OCPP subprotocol; tungstenite's
        // client rejects the handshake otherwise.
        let negotiate = |_req: &tokio_tungstenite::tungstenite::handshake::server::Request,
                         mut response: tokio_tungstenite::tungstenite::handshake::server::Response| {
            response.headers_mut().insert(
                tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL,
                "ocpp2.0.1".parse().unwrap(),
            );
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, negotiate)
            .await
            .expect("handshake");

        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else { continue };
            let frame: serde_json::Value = serde_json::from_str(&text).expect("frame");

            match frame[0].as_i64() {
                Some(2) => {
                    let id = frame[1].as_str().expect("id").to_string();
                    let action = frame[2].as_str().expect("action").to_string();
                    log.lock().unwrap().push(action.clone());

                    let payload = match action.as_str() {
                        "BootNotification" => json!({
                            "currentTime": chrono::Utc::now().to_rfc3339(),
                            "interval": 1,
                            "status": "Accepted",
                        }),
                        "Heartbeat" => json!({
                            "currentTime": chrono::Utc::now().to_rfc3339(),
                        }),
                        "Authorize" => json!({
                            "idTokenInfo": { "status": "Accepted" },
                        }),
                        "NotifyEVChargingNeeds" => json!({ "status": "Accepted" }),
                        _ => json!({}),
                    };

                    ws.send(Message::Text(json!([3, id, payload]).to_string()))
                        .await
                        .expect("respond");

                    if action == "BootNotification" {
                        if let Some(profile_push) = &push_profile {
                            ws.send(Message::Text(
                                json!([2, "srv-push-1", "SetChargingProfile", profile_push])
                                    .to_string(),
                            ))
                            .await
                            .expect("push");
                        }
                    }
                }
                Some(3) => {
                    log.lock().unwrap().push("PushAck".to_string());
                }
                _ => {}
            }
        }
    }

    fn test_config(port: u16, ceiling: u16) -> BridgeConfig {
        let mut config = BridgeConfig::new("CP001")
            .with_evse_id(4)
            .with_retry_delay(Duration::from_millis(50));
        config.rotation = RotationConfig {
            preferred: vec![Ipv4Addr::LOCALHOST],
            subnet: Some(Ipv4Addr::LOCALHOST),
            octet_window: (1, 1),
            port_base: port,
            port_ceiling: ceiling,
            fallback: Ipv4Addr::LOCALHOST,
        };
        config.poll_interval = Duration::from_millis(10);
        config.request_timeout = Duration::from_secs(2);
        config
    }

    fn sim() -> Arc<SimSession> {
        Arc::new(SimSession::new(SimSessionConfig::default()))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn test_boot_and_session_walk() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(mock_csms(listener, log.clone(), None));

        let session = sim();
        let supervisor =
            ConnectionSupervisor::new(test_config(port, port), session.clone());
        let bridge = supervisor.bridge();
        let runner = tokio::spawn(supervisor.run());

        settle().await;
        assert!(bridge.read().await.booted());

        // Walk the EV through to Authorization, one observed state at a time
        session.advance(); // SupportedAppProtocol
        settle().await;
        session.advance(); // SessionSetup (needs appear)
        settle().await;
        session.advance(); // ServiceDiscovery
        settle().await;
        session.advance(); // PaymentServiceSelection
        settle().await;
        session.advance(); // Authorization
        settle().await;

        let actions = log.lock().unwrap().clone();
        let position = |name: &str| actions.iter().position(|a| a.as_str() == name);

        assert_eq!(actions[0], "BootNotification");
        let status = position("StatusNotification").expect("StatusNotification sent");
        let event = position("TransactionEvent").expect("TransactionEvent sent");
        let authorize = position("Authorize").expect("Authorize sent");
        let needs = position("NotifyEVChargingNeeds").expect("NotifyEVChargingNeeds sent");
        assert!(status < event && event < authorize && authorize < needs);

        assert_eq!(bridge.read().await.authorized(), Some(true));
        assert!(bridge.read().await.transaction_id().is_some());

        // Interior states produced nothing: exactly one of each boundary call
        for name in [
            "StatusNotification",
            "TransactionEvent",
            "Authorize",
            "NotifyEVChargingNeeds",
        ] {
            assert_eq!(
                actions.iter().filter(|a| a.as_str() == name).count(),
                1,
                "{} must fire exactly once",
                name
            );
        }

        runner.abort();
    }

    #[tokio::test]
    async fn test_connect_failure_rotates_to_next_endpoint() {
        // Find two adjacent free ports; the first stays closed, the second
        // hosts the CSMS.
        let (dead_port, listener) = loop {
            let probe = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
            let port = probe.local_addr().unwrap().port();
            drop(probe);
            if let Ok(next) = TcpListener::bind((Ipv4Addr::LOCALHOST, port + 1)).await {
                break (port, next);
            }
        };

        let log = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(mock_csms(listener, log.clone(), None));

        let session = sim();
        let supervisor =
            ConnectionSupervisor::new(test_config(dead_port, dead_port + 1), session);
        let bridge = supervisor.bridge();
        let runner = tokio::spawn(supervisor.run());

        // First attempt is refused; the retry must pick the next port
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(bridge.read().await.booted());
        assert_eq!(log.lock().unwrap()[0], "BootNotification");

        runner.abort();
    }

    #[tokio::test]
    async fn test_pushed_profile_reaches_session_as_schedule() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(Vec::new()));

        let push = json!({
            "evseId": 4,
            "chargingProfile": {
                "id": 1,
                "stackLevel": 0,
                "chargingProfilePurpose": "ChargingStationMaxProfile",
                "chargingProfileKind": "Absolute",
                "chargingSchedule": [{
                    "id": 0,
                    "chargingRateUnit": "A",
                    "duration": 10,
                    "chargingSchedulePeriod": [
                        {"startPeriod": 0, "limit": 6},
                        {"startPeriod": 5, "limit": 10}
                    ]
                }]
            }
        });
        tokio::spawn(mock_csms(listener, log.clone(), Some(push)));

        let session = sim();
        let supervisor =
            ConnectionSupervisor::new(test_config(port, port), session.clone());
        let runner = tokio::spawn(supervisor.run());

        settle().await;

        // Walk into ChargeParameterDiscovery where the schedule is consumed
        for _ in 0..6 {
            session.advance();
            settle().await;
        }

        let delivered = session.delivered_schedules();
        assert_eq!(delivered.len(), 1);
        let tuple = &delivered[0];
        assert_eq!(tuple.sa_schedule_tuple_id, 1);
        let watts: Vec<i32> = tuple
            .p_max_schedule
            .schedule_entries
            .iter()
            .map(|e| e.p_max.value)
            .collect();
        assert_eq!(watts, vec![1380, 2300]);

        // The push was acknowledged on the wire
        assert!(log.lock().unwrap().iter().any(|a| a == "PushAck"));

        runner.abort();
    }

    #[tokio::test]
    async fn test_push_for_other_evse_acked_but_not_delivered() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(Vec::new()));

        let push = json!({
            "evseId": 9,
            "chargingProfile": {
                "id": 2,
                "stackLevel": 0,
                "chargingProfilePurpose": "ChargingStationMaxProfile",
                "chargingProfileKind": "Absolute",
                "chargingSchedule": [{
                    "id": 0,
                    "chargingRateUnit": "W",
                    "chargingSchedulePeriod": [{"startPeriod": 0, "limit": 11000}]
                }]
            }
        });
        tokio::spawn(mock_csms(listener, log.clone(), Some(push)));

        let session = sim();
        let supervisor =
            ConnectionSupervisor::new(test_config(port, port), session.clone());
        let bridge = supervisor.bridge();
        let runner = tokio::spawn(supervisor.run());

        settle().await;

        for _ in 0..6 {
            session.advance();
            settle().await;
        }

        // Acknowledged, but never stored or translated
        assert!(log.lock().unwrap().iter().any(|a| a == "PushAck"));
        assert!(bridge.read().await.active_charging_profile().is_none());
        assert!(session.delivered_schedules().is_empty());

        runner.abort();
    }
}

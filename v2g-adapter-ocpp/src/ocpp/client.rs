//! OCPP WebSocket transport
//!
//! `CsmsLink` owns exactly one WebSocket connection to a CSMS endpoint:
//! request/response correlation by message id, delivery of CSMS-initiated
//! calls to the supervisor, closure detection. Reconnection policy lives in
//! the supervisor, not here.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::header,
        protocol::WebSocketConfig,
        Message,
    },
};
use tracing::{debug, error, info, warn};

use super::messages::{Action, Call, CallError, CallResult, OcppError, OcppMessage};

/// OCPP 2.0.1 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp2.0.1";

/// Incoming CSMS request for the supervisor to handle
#[derive(Debug)]
pub struct IncomingRequest {
    pub message_id: String,
    pub action: Action,
    pub payload: serde_json::Value,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<CallResult, OcppError>>>>>;

/// One live connection to a CSMS
#[derive(Clone)]
pub struct CsmsLink {
    outgoing: mpsc::Sender<OcppMessage>,
    pending: PendingMap,
    request_timeout: Duration,
}

impl CsmsLink {
    /// Connect to `ws://addr:port/{station_id}` with the OCPP subprotocol.
    ///
    /// Returns the link, the channel of CSMS-initiated requests, and the
    /// pump task handle. The pump ends when either peer closes the socket;
    /// pending and future calls then fail with `ConnectionClosed`.
    pub async fn connect(
        addr: Ipv4Addr,
        port: u16,
        station_id: &str,
        request_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<IncomingRequest>, JoinHandle<()>), OcppError> {
        let url = format!("ws://{}:{}/{}", addr, port, station_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|_| OcppError::InvalidFormat)?;
        request.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            OCPP_SUBPROTOCOL
                .parse()
                .map_err(|_| OcppError::InvalidFormat)?,
        );

        let ws_config = WebSocketConfig {
            max_message_size: Some(64 * 1024),
            max_frame_size: Some(16 * 1024),
            ..Default::default()
        };

        let (ws_stream, response) = connect_async_with_config(request, Some(ws_config), false)
            .await
            .map_err(|e| {
                debug!("WebSocket connection to {} failed: {}", url, e);
                OcppError::ConnectionClosed
            })?;

        let accepted_protocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());

        if accepted_protocol != Some(OCPP_SUBPROTOCOL) {
            warn!(
                "CSMS did not accept OCPP 2.0.1 subprotocol, got: {:?}",
                accepted_protocol
            );
        }

        info!("WebSocket connected to {}", url);

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<OcppMessage>(64);
        let (incoming_tx, incoming_rx) = mpsc::channel::<IncomingRequest>(64);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let pump_pending = pending.clone();
        let pump = tokio::spawn(async move {
            let (mut ws_tx, mut ws_rx) = ws_stream.split();

            loop {
                tokio::select! {
                    queued = outgoing_rx.recv() => {
                        let Some(msg) = queued else { break };
                        let bytes = match msg.to_bytes() {
                            Ok(b) => b,
                            Err(e) => {
                                error!("failed to serialize message: {}", e);
                                continue;
                            }
                        };

                        debug!("sending: {}", String::from_utf8_lossy(&bytes));

                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            error!("failed to send WebSocket message: {}", e);
                            break;
                        }
                    }

                    frame = ws_rx.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                debug!("received: {}", text);
                                dispatch_frame(&pump_pending, &incoming_tx, text.as_bytes())
                                    .await;
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("WebSocket closed by server");
                                break;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                // Pong is handled by tungstenite
                                debug!("received ping");
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                break;
                            }
                            None => {
                                info!("WebSocket stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            // Dropping the senders fails every in-flight call
            pump_pending.lock().await.clear();
        });

        Ok((
            Self {
                outgoing: outgoing_tx,
                pending,
                request_timeout,
            },
            incoming_rx,
            pump,
        ))
    }

    /// Send a request and wait for the matching CALLRESULT
    pub async fn call(&self, call: Call) -> Result<CallResult, OcppError> {
        let (response_tx, response_rx) = oneshot::channel();
        let message_id = call.message_id.clone();

        self.pending
            .lock()
            .await
            .insert(message_id.clone(), response_tx);

        if self.outgoing.send(OcppMessage::Call(call)).await.is_err() {
            self.pending.lock().await.remove(&message_id);
            return Err(OcppError::ConnectionClosed);
        }

        match tokio::time::timeout(self.request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OcppError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&message_id);
                Err(OcppError::Timeout)
            }
        }
    }

    /// Send a response to a CSMS request
    pub async fn respond(&self, response: CallResult) -> Result<(), OcppError> {
        self.outgoing
            .send(OcppMessage::CallResult(response))
            .await
            .map_err(|_| OcppError::ConnectionClosed)
    }

    /// Send an error response to a CSMS request
    pub async fn respond_error(&self, error: CallError) -> Result<(), OcppError> {
        self.outgoing
            .send(OcppMessage::CallError(error))
            .await
            .map_err(|_| OcppError::ConnectionClosed)
    }
}

/// Route one received frame: resolve a pending call or surface a CSMS call
async fn dispatch_frame(
    pending: &PendingMap,
    incoming_tx: &mpsc::Sender<IncomingRequest>,
    bytes: &[u8],
) {
    match OcppMessage::parse(bytes) {
        Ok(OcppMessage::Call(call)) => {
            if incoming_tx
                .send(IncomingRequest {
                    message_id: call.message_id,
                    action: call.action,
                    payload: call.payload,
                })
                .await
                .is_err()
            {
                debug!("CSMS request dropped, no handler attached");
            }
        }
        Ok(OcppMessage::CallResult(result)) => {
            let sender = pending.lock().await.remove(&result.message_id);
            match sender {
                Some(tx) => {
                    let _ = tx.send(Ok(result));
                }
                None => warn!("CALLRESULT for unknown message id {}", result.message_id),
            }
        }
        Ok(OcppMessage::CallError(error)) => {
            let sender = pending.lock().await.remove(&error.message_id);
            match sender {
                Some(tx) => {
                    let _ = tx.send(Err(OcppError::RemoteError {
                        code: error.error_code,
                        description: error.error_description,
                        details: error.error_details,
                    }));
                }
                None => warn!("CALLERROR for unknown message id {}", error.message_id),
            }
        }
        Err(e) => {
            warn!("failed to parse OCPP message: {}", e);
        }
    }
}

/// Build the full OCPP WebSocket URL
pub fn build_ocpp_url(addr: Ipv4Addr, port: u16, station_id: &str) -> String {
    format!("ws://{}:{}/{}", addr, port, station_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ocpp_url() {
        let url = build_ocpp_url(Ipv4Addr::LOCALHOST, 2910, "CP001");
        assert_eq!(url, "ws://127.0.0.1:2910/CP001");
    }

    #[tokio::test]
    async fn test_connect_refused_maps_to_connection_closed() {
        // Bind and drop a listener so the port is free but refusing
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = CsmsLink::connect(Ipv4Addr::LOCALHOST, port, "CP001", Duration::from_secs(1))
            .await
            .err()
            .expect("connect to a closed port must fail");
        assert!(matches!(err, OcppError::ConnectionClosed));
    }
}

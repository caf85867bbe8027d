//! Offer feed over the `graphql-transport-ws` protocol
//!
//! One WebSocket per subscription. The first connection is opened inside
//! [`OfferFeed::subscribe`] so an unreachable server is reported to the
//! caller. Afterwards a background task forwards `next` payloads as domain
//! offers and reconnects after transport drops with a bounded exponential
//! backoff. Dropping the returned stream ends the task.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use resq_core::Config;
use resq_dispatch::{ApiError, OfferFeed, OfferStream};
use resq_domain::{Offer, Session, VehicleId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{GatewayError, Result};
use crate::graphql::GraphqlResponse;
use crate::wire::OfferPayload;

/// Offers targeting one vehicle
pub const ASSIGNMENT_OFFERED: &str = r#"
subscription AssignmentOffered($vehicleId: Int!) {
  onVehicleAssignmentOffered(vehicleId: $vehicleId) {
    request {
      address
      createdAt
      description
      emergencySubCategoryId
      id
      latitude
      longitude
      proofImageURL
      emergencySubCategory { name }
      civilianId
      civilian { name phoneNumber }
    }
    isCancelled
    offeredAt
    offerTtlSeconds
  }
}"#;

/// WebSocket subprotocol name
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const FEED_BUFFER: usize = 32;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientMessage {
    ConnectionInit {
        payload: Value,
    },
    Subscribe {
        id: String,
        payload: Value,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Complete {
        id: String,
    },
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerMessage {
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Next {
        id: String,
        payload: Value,
    },
    Error {
        id: String,
        payload: Value,
    },
    Complete {
        id: String,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

#[derive(Debug, Deserialize)]
struct OfferedData {
    #[serde(rename = "onVehicleAssignmentOffered")]
    offered: Option<OfferPayload>,
}

/// How one connection ended
#[derive(Debug)]
enum PumpEnd {
    /// The consumer dropped the stream
    Cancelled,
    /// The server ended the subscription
    Completed,
    /// The transport failed
    Dropped(String),
}

/// Decode one `next` payload into a domain offer.
pub(crate) fn decode_offer(payload: Value, vehicle_id: VehicleId) -> Result<Offer> {
    let envelope: GraphqlResponse<OfferedData> = serde_json::from_value(payload)?;
    envelope
        .into_result()?
        .offered
        .ok_or_else(|| GatewayError::Malformed("empty offer event".to_string()))?
        .into_offer(vehicle_id)
}

async fn send(ws: &mut WsStream, message: &ClientMessage) -> Result<()> {
    let text = serde_json::to_string(message)?;
    ws.send(Message::Text(text)).await?;
    Ok(())
}

/// [`OfferFeed`] backed by a GraphQL subscription
#[derive(Debug, Clone)]
pub struct GraphqlOfferFeed {
    url: Url,
    token: String,
    max_reconnects: u32,
}

impl GraphqlOfferFeed {
    /// Feed against `url` authenticating with `token`.
    pub fn new(url: &str, token: impl Into<String>, max_reconnects: u32) -> Result<Self> {
        Ok(Self {
            url: Url::parse(url)?,
            token: token.into(),
            max_reconnects,
        })
    }

    /// Feed for `session` using the configured WebSocket endpoint.
    pub fn for_session(config: &Config, session: &Session) -> Result<Self> {
        Self::new(
            &config.server.graphql_ws_url,
            session.token.clone(),
            config.timing.feed_max_reconnects,
        )
    }

    fn subscription_id(vehicle_id: VehicleId) -> String {
        format!("offers-{}", vehicle_id)
    }

    /// Connect, authenticate and subscribe.
    async fn open(&self, vehicle_id: VehicleId) -> Result<WsStream> {
        let mut request = self.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

        let (mut ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| GatewayError::Protocol("connect timed out".to_string()))??;

        send(
            &mut ws,
            &ClientMessage::ConnectionInit {
                payload: json!({ "Authorization": format!("Bearer {}", self.token) }),
            },
        )
        .await?;

        tokio::time::timeout(CONNECT_TIMEOUT, await_ack(&mut ws))
            .await
            .map_err(|_| GatewayError::Protocol("no connection_ack from server".to_string()))??;

        send(
            &mut ws,
            &ClientMessage::Subscribe {
                id: Self::subscription_id(vehicle_id),
                payload: json!({
                    "operationName": "AssignmentOffered",
                    "query": ASSIGNMENT_OFFERED,
                    "variables": { "vehicleId": vehicle_id },
                }),
            },
        )
        .await?;
        debug!(vehicle_id, url = %self.url, "Offer subscription opened");
        Ok(ws)
    }

    /// Forward events until the connection or the consumer goes away.
    async fn pump(
        &self,
        ws: &mut WsStream,
        vehicle_id: VehicleId,
        tx: &mpsc::Sender<std::result::Result<Offer, ApiError>>,
    ) -> PumpEnd {
        loop {
            let frame = tokio::select! {
                _ = tx.closed() => {
                    let id = Self::subscription_id(vehicle_id);
                    let _ = send(ws, &ClientMessage::Complete { id }).await;
                    let _ = ws.close(None).await;
                    return PumpEnd::Cancelled;
                }
                frame = ws.next() => frame,
            };

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return PumpEnd::Dropped("connection closed".to_string())
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return PumpEnd::Dropped(e.to_string()),
            };

            let message = match serde_json::from_str::<ServerMessage>(&text) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Ignoring unparseable subscription message");
                    continue;
                }
            };

            match message {
                ServerMessage::Next { payload, .. } => {
                    let item = decode_offer(payload, vehicle_id).map_err(ApiError::from);
                    if tx.send(item).await.is_err() {
                        return PumpEnd::Cancelled;
                    }
                }
                ServerMessage::Ping { .. } => {
                    if let Err(e) = send(ws, &ClientMessage::Pong { payload: None }).await {
                        return PumpEnd::Dropped(e.to_string());
                    }
                }
                ServerMessage::Error { payload, .. } => {
                    let _ = tx.send(Err(ApiError::Rejected(payload.to_string()))).await;
                    return PumpEnd::Completed;
                }
                ServerMessage::Complete { .. } => return PumpEnd::Completed,
                ServerMessage::ConnectionAck { .. } | ServerMessage::Pong { .. } => {}
            }
        }
    }

    async fn run(
        self,
        vehicle_id: VehicleId,
        mut ws: WsStream,
        tx: mpsc::Sender<std::result::Result<Offer, ApiError>>,
    ) {
        loop {
            match self.pump(&mut ws, vehicle_id, &tx).await {
                PumpEnd::Cancelled => {
                    debug!(vehicle_id, "Offer subscription cancelled");
                    return;
                }
                PumpEnd::Completed => {
                    info!(vehicle_id, "Offer subscription completed by server");
                    return;
                }
                PumpEnd::Dropped(reason) => {
                    warn!(vehicle_id, reason = %reason, "Offer subscription dropped, reconnecting");
                }
            }

            ws = match self.reconnect(vehicle_id, &tx).await {
                Some(ws) => ws,
                None => return,
            };
        }
    }

    async fn reconnect(
        &self,
        vehicle_id: VehicleId,
        tx: &mpsc::Sender<std::result::Result<Offer, ApiError>>,
    ) -> Option<WsStream> {
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 1..=self.max_reconnects {
            tokio::select! {
                _ = tx.closed() => return None,
                _ = tokio::time::sleep(backoff) => {}
            }
            match self.open(vehicle_id).await {
                Ok(ws) => {
                    info!(vehicle_id, attempt, "Offer subscription re-established");
                    return Some(ws);
                }
                Err(e) => {
                    warn!(vehicle_id, attempt, error = %e, "Offer subscription reconnect failed");
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        error!(
            vehicle_id,
            attempts = self.max_reconnects,
            "Giving up on offer subscription"
        );
        None
    }
}

async fn await_ack(ws: &mut WsStream) -> Result<()> {
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text)? {
                ServerMessage::ConnectionAck { .. } => return Ok(()),
                ServerMessage::Ping { .. } => {
                    send(ws, &ClientMessage::Pong { payload: None }).await?
                }
                other => {
                    return Err(GatewayError::Protocol(format!(
                        "unexpected {:?} before connection_ack",
                        other
                    )))
                }
            },
            Message::Close(_) => {
                return Err(GatewayError::Protocol(
                    "connection closed during handshake".to_string(),
                ))
            }
            _ => {}
        }
    }
    Err(GatewayError::Protocol(
        "connection ended before connection_ack".to_string(),
    ))
}

#[async_trait]
impl OfferFeed for GraphqlOfferFeed {
    async fn subscribe(&self, vehicle_id: VehicleId) -> std::result::Result<OfferStream, ApiError> {
        let ws = self.open(vehicle_id).await?;
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        tokio::spawn(self.clone().run(vehicle_id, ws, tx));

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}

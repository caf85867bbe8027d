//! Test utilities for the vehicle dispatch scenarios

use futures_util::{SinkExt, StreamExt};
use resq_core::GeoPoint;
use resq_dispatch::testing::{sample_record, TestRig};
use resq_dispatch::{VehicleCore, VehicleSnapshot};
use resq_domain::AssignmentRecord;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

/// Destination used by every sample offer
pub const HOSPITAL: GeoPoint = GeoPoint { lat: 9.6615, lng: 80.0255 };

/// Where the vehicle waits
pub const DEPOT: GeoPoint = GeoPoint { lat: 9.6800, lng: 80.0100 };

/// Install a test-friendly subscriber once; later calls are no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start the core on `rig` and return it with a snapshot receiver.
pub fn start_core(rig: &TestRig) -> (VehicleCore, watch::Receiver<VehicleSnapshot>) {
    init_test_logging();
    let core = match VehicleCore::start(rig.parts()) {
        Ok(core) => core,
        Err(e) => panic!("vehicle core failed to start: {}", e),
    };
    let rx = core.subscribe();
    (core, rx)
}

/// Server record for assignment `id` on request 101 at [`HOSPITAL`]
pub fn hospital_record(id: i64, status: &str) -> AssignmentRecord {
    sample_record(id, "101", status, Some(HOSPITAL))
}

/// `graphql-transport-ws` server accepting one subscriber
///
/// Performs the handshake, then forwards every pushed payload as a `next`
/// message for the subscription the client opened.
pub struct LoopbackOfferServer {
    url: String,
    payloads: mpsc::UnboundedSender<Value>,
    task: JoinHandle<Value>,
}

impl LoopbackOfferServer {
    /// Bind to an ephemeral local port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let url = format!("ws://{}/graphql", listener.local_addr().expect("local addr"));
        let (payloads, mut rx) = mpsc::unbounded_channel::<Value>();

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept subscriber");
            let callback = |_req: &Request, mut resp: Response| {
                resp.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    HeaderValue::from_static("graphql-transport-ws"),
                );
                Ok::<Response, ErrorResponse>(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .expect("websocket handshake");

            let mut init = Value::Null;
            let mut subscription = None;
            while subscription.is_none() {
                let text = match ws.next().await {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                    other => panic!("subscriber went away during handshake: {:?}", other),
                };
                let message: Value = serde_json::from_str(&text).expect("client json");
                match message["type"].as_str() {
                    Some("connection_init") => {
                        init = message["payload"].clone();
                        let ack = json!({ "type": "connection_ack" }).to_string();
                        ws.send(Message::Text(ack)).await.expect("send ack");
                    }
                    Some("subscribe") => subscription = Some(message),
                    _ => {}
                }
            }
            let subscription = subscription.unwrap_or_default();
            let id = subscription["id"].as_str().unwrap_or_default().to_string();

            loop {
                tokio::select! {
                    payload = rx.recv() => match payload {
                        Some(payload) => {
                            let next = json!({ "type": "next", "id": id, "payload": payload });
                            if ws.send(Message::Text(next.to_string())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    frame = ws.next() => match frame {
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                }
            }
            json!({ "init": init, "subscribe": subscription })
        });

        Self {
            url,
            payloads,
            task,
        }
    }

    /// WebSocket URL of the server
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver one `next` payload to the subscriber.
    pub fn push(&self, payload: Value) {
        let _ = self.payloads.send(payload);
    }

    /// Stop serving and return the client's `connection_init` and
    /// `subscribe` messages.
    pub async fn finish(self) -> Value {
        drop(self.payloads);
        self.task.await.expect("server task")
    }
}

/// `next` payload for an offer of request `request_id` made at `offered_at`
pub fn offer_payload(request_id: i64, offered_at: &str, ttl_seconds: u32) -> Value {
    json!({
        "data": {
            "onVehicleAssignmentOffered": {
                "request": {
                    "id": request_id,
                    "address": "Hospital Rd, Jaffna",
                    "createdAt": offered_at,
                    "description": "Road traffic accident",
                    "emergencySubCategoryId": 3,
                    "latitude": HOSPITAL.lat,
                    "longitude": HOSPITAL.lng,
                    "proofImageURL": "/uploads/proof.jpg",
                    "emergencySubCategory": { "name": "Trauma" },
                    "civilianId": 9,
                    "civilian": { "name": "S. Tharshan", "phoneNumber": "+94770000000" }
                },
                "isCancelled": false,
                "offeredAt": offered_at,
                "offerTtlSeconds": ttl_seconds
            }
        }
    })
}

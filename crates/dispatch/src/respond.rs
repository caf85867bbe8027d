//! Response Coordinator
//!
//! Sends the driver's accept/decline decision for the active offer. Nothing
//! is applied locally before the server answers; on success the outcome is
//! handed to the reconciler and the offer is retired.

use resq_domain::{Offer, OfferKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::api::{ApiError, DispatchApi, RespondCommand};
use crate::error::{DispatchError, Result};
use crate::inbox::CoreEvent;
use crate::runtime::CoreContext;

/// What a `respond` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RespondOutcome {
    /// The server recorded the accept
    Accepted,
    /// The server recorded the decline
    Declined,
    /// There was no active offer to respond to
    Ignored,
}

/// Tracks the single in-flight response
#[derive(Debug, Default)]
pub(crate) struct ResponseCoordinator {
    in_flight: Option<OfferKey>,
}

impl ResponseCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start a response for `offer`. On `Err` no call was made and the
    /// caller gets the error back immediately.
    pub(crate) fn begin(
        &mut self,
        offer: Option<&Offer>,
        accepted: bool,
        ctx: &mut CoreContext,
        reply: oneshot::Sender<Result<RespondOutcome>>,
    ) {
        let offer = match offer {
            Some(offer) => offer,
            None => {
                let _ = reply.send(Ok(RespondOutcome::Ignored));
                return;
            }
        };
        if let Some(key) = &self.in_flight {
            let _ = reply.send(Err(DispatchError::ResponseInFlight(key.to_string())));
            return;
        }

        let vehicle_id = ctx.session.vehicle_id;
        let request_id = match offer.request.id.as_i64() {
            Some(id) if vehicle_id > 0 => id,
            _ => {
                warn!(request_id = %offer.request.id, vehicle_id, "Refusing to respond with invalid ids");
                let _ = reply.send(Err(DispatchError::InvalidIds {
                    request_id: offer.request.id.to_string(),
                    vehicle_id,
                }));
                return;
            }
        };

        let key = offer.key();
        let request = offer.request.clone();
        self.in_flight = Some(key.clone());

        let api: Arc<dyn DispatchApi> = ctx.api.clone();
        let inbox = ctx.inbox.clone();
        let command = RespondCommand {
            request_id,
            vehicle_id,
            accepted,
        };
        info!(request_id, vehicle_id, accepted, "Responding to offer");
        ctx.tasks.spawn(async move {
            let result = match api.respond_to_offer(command).await {
                Ok(ack) if !ack.success => Err(ApiError::Rejected(ack.message)),
                other => other,
            };
            inbox.post(CoreEvent::RespondSettled {
                key,
                request,
                accepted,
                result,
                reply,
            });
        });
    }

    /// The call for `key` finished.
    pub(crate) fn settle(&mut self, key: &OfferKey) {
        if self.in_flight.as_ref() == Some(key) {
            self.in_flight = None;
        }
    }

    pub(crate) fn teardown(&mut self) {
        self.in_flight = None;
    }
}

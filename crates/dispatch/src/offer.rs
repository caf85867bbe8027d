//! Offer Channel
//!
//! Holds the single active offer. Every inbound event supersedes the previous
//! one: the prior expiry timer and countdown ticker are stopped before
//! anything else happens, and the generation counter moves on so that a
//! late firing from a stopped timer is recognised and ignored.
//!
//! Two independent mechanisms remove an offer at its deadline: the scheduled
//! expiry and the countdown reaching zero. Either one alone is sufficient.

use chrono::{DateTime, Utc};
use resq_domain::{resolve_image_url, Countdown, Offer, OfferKey, VehicleId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::handle::{self, SubscriptionHandle};
use crate::inbox::CoreEvent;
use crate::runtime::CoreContext;

/// Audible/visual alert collaborator, invoked once per new notification
pub trait AlertSink: Send + Sync + 'static {
    /// A new offer is in front of the driver.
    fn offer_alert(&self, offer: &Offer);
}

/// Alert sink that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn offer_alert(&self, offer: &Offer) {
        info!(
            vehicle_id = offer.vehicle_id,
            request_id = %offer.request.id,
            offered_at = %offer.offered_at,
            "New dispatch offer"
        );
    }
}

/// Published projection of the active offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferView {
    /// The offer as received
    pub offer: Offer,
    /// Absolute deadline
    pub ends_at: DateTime<Utc>,
    /// Remaining lifetime for display
    pub countdown: Countdown,
    /// Proof image resolved against the asset server
    pub proof_image_url: Option<String>,
}

/// Owner of the active offer
pub(crate) struct OfferChannel {
    vehicle_id: VehicleId,
    active: Option<Offer>,
    generation: u64,
    last_alert: Option<OfferKey>,
    expiry: Option<SubscriptionHandle>,
    ticker: Option<SubscriptionHandle>,
}

impl OfferChannel {
    pub(crate) fn new(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id,
            active: None,
            generation: 0,
            last_alert: None,
            expiry: None,
            ticker: None,
        }
    }

    pub(crate) fn active(&self) -> Option<&Offer> {
        self.active.as_ref()
    }

    /// Whether the expiry timer is armed.
    pub(crate) fn is_armed(&self) -> bool {
        self.expiry.is_some()
    }

    /// Apply one feed event. Returns `true` when the active offer changed.
    pub(crate) fn on_event(
        &mut self,
        offer: Offer,
        ctx: &CoreContext,
        alerts: &dyn AlertSink,
    ) -> bool {
        if offer.vehicle_id != self.vehicle_id {
            debug!(
                vehicle_id = self.vehicle_id,
                target = offer.vehicle_id,
                "Ignoring offer addressed to another vehicle"
            );
            return false;
        }

        self.disarm();
        self.generation += 1;

        if offer.is_cancelled {
            info!(request_id = %offer.request.id, "Offer cancelled by server");
            return self.active.take().is_some();
        }

        let default_ttl = ctx.config.timing.default_offer_ttl_secs;
        let now = ctx.clock.now();
        let key = offer.key();
        if offer.is_valid_at(now, default_ttl) && self.last_alert.as_ref() != Some(&key) {
            alerts.offer_alert(&offer);
            self.last_alert = Some(key);
        }

        let generation = self.generation;
        let inbox = ctx.inbox.clone();
        self.expiry = Some(SubscriptionHandle::timeout(
            "offer-expiry",
            offer.remaining(now, default_ttl),
            move || {
                inbox.post(CoreEvent::OfferExpired { generation });
            },
        ));

        let inbox = ctx.inbox.clone();
        self.ticker = Some(SubscriptionHandle::interval(
            "offer-countdown",
            ctx.config.timing.countdown_tick(),
            move || inbox.post(CoreEvent::CountdownTick { generation }),
        ));

        debug!(
            request_id = %offer.request.id,
            ends_at = %offer.ends_at(default_ttl),
            "Offer active"
        );
        self.active = Some(offer);
        true
    }

    /// Scheduled expiry fired.
    pub(crate) fn on_expired(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.disarm();
        match self.active.take() {
            Some(offer) => {
                info!(request_id = %offer.request.id, "Offer expired");
                true
            }
            None => false,
        }
    }

    /// Countdown tick. Returns `true` because the projection moved; an
    /// elapsed countdown also clears the offer.
    pub(crate) fn on_tick(&mut self, generation: u64, ctx: &CoreContext) -> bool {
        if generation != self.generation {
            return false;
        }
        let default_ttl = ctx.config.timing.default_offer_ttl_secs;
        let elapsed = match &self.active {
            Some(offer) => offer.countdown(ctx.clock.now(), default_ttl).is_elapsed(),
            None => return false,
        };
        if elapsed {
            return self.on_expired(generation);
        }
        true
    }

    /// Clear the active offer if it is still the one identified by `key`.
    pub(crate) fn clear_if(&mut self, key: &OfferKey) -> bool {
        if self.active.as_ref().map(Offer::key).as_ref() != Some(key) {
            return false;
        }
        self.disarm();
        self.generation += 1;
        self.active = None;
        true
    }

    pub(crate) fn view(&self, ctx: &CoreContext) -> Option<OfferView> {
        let offer = self.active.as_ref()?;
        let default_ttl = ctx.config.timing.default_offer_ttl_secs;
        Some(OfferView {
            offer: offer.clone(),
            ends_at: offer.ends_at(default_ttl),
            countdown: offer.countdown(ctx.clock.now(), default_ttl),
            proof_image_url: resolve_image_url(
                offer.request.proof_image_url.as_deref(),
                &ctx.config.server.asset_base_url,
            ),
        })
    }

    pub(crate) fn teardown(&mut self) {
        self.disarm();
        self.generation += 1;
        self.active = None;
    }

    fn disarm(&mut self) {
        handle::clear(&mut self.expiry);
        handle::clear(&mut self.ticker);
    }
}

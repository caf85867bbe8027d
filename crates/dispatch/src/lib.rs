//! ResQ Dispatch - real-time coordination core for one rescue vehicle
//!
//! This crate reconciles three independently arriving signals into one view
//! of what the vehicle is doing right now:
//! - pushed offer events from the per-vehicle feed
//! - periodic server confirmation of the current assignment
//! - the local continuous position stream
//!
//! # Architecture
//!
//! Every producer (feed pump, timers, position watch, API call completions,
//! driver commands) posts into one ordered inbox. A single reducer task owns
//! all component state and handles one event at a time, so no component
//! state is ever shared behind a lock. Each state change is published as a
//! [`VehicleSnapshot`] on a watch channel.
//!
//! - [`offer::OfferChannel`]: active offer, expiry timer, countdown, alert de-dup
//! - [`respond::ResponseCoordinator`]: accept/decline with optimistic follow-up
//! - [`reconciler::AssignmentReconciler`]: optimistic vs confirmed assignment, polling, status advance
//! - [`location::LocationPublisher`]: position sampling, fallback re-sample, reporting
//! - [`route::RouteOverlay`]: route toward the active destination
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use resq_core::{Config, SystemClock};
//! use resq_dispatch::{CoreParts, LogAlertSink, StraightLineProvider, VehicleCore};
//! # async fn run(
//! #     session: Arc<dyn resq_dispatch::SessionProvider>,
//! #     api: Arc<dyn resq_dispatch::DispatchApi>,
//! #     feed: Arc<dyn resq_dispatch::OfferFeed>,
//! #     positions: Arc<dyn resq_dispatch::PositionSource>,
//! # ) -> resq_dispatch::Result<()> {
//! let core = VehicleCore::start(CoreParts {
//!     session,
//!     api,
//!     feed,
//!     positions,
//!     routes: Arc::new(StraightLineProvider),
//!     alerts: Arc::new(LogAlertSink),
//!     clock: Arc::new(SystemClock),
//!     config: Config::default_config(),
//! })?;
//!
//! let mut snapshots = core.subscribe();
//! while snapshots.changed().await.is_ok() {
//!     let snapshot = snapshots.borrow().clone();
//!     tracing::info!(state = ?snapshot.state, "vehicle state");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod error;
pub mod handle;
pub(crate) mod inbox;
pub mod location;
pub mod machine;
pub mod offer;
pub mod reconciler;
pub mod respond;
pub mod route;
pub mod runtime;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{Ack, ApiError, DispatchApi, LocationReport, OfferFeed, OfferStream, RespondCommand};
pub use error::{DispatchError, Result};
pub use handle::SubscriptionHandle;
pub use location::{PositionError, PositionSource, PositionStream};
pub use machine::{DriverAction, VehicleState};
pub use offer::{AlertSink, LogAlertSink, OfferView};
pub use reconciler::reconcile;
pub use respond::RespondOutcome;
pub use route::{RouteError, RoutePath, RouteProvider, RouteView, StraightLineProvider};
pub use runtime::{AssignmentCard, CoreParts, VehicleCore, VehicleSnapshot};
pub use session::{MemorySessionStore, SessionProvider, SessionStore, SqliteSessionStore};

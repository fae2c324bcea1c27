//! Sequential offer cascade for a single ride.
//!
//! One ride is offered to one driver at a time. Each offer carries a timer;
//! silence, rejection or an unreachable driver moves the cascade to the next
//! ranked candidate until someone accepts or the attempt budget runs out.
//!
//! The pending table is the only state shared between cascades. Every
//! transition takes the table lock, re-checks that the event still applies to
//! the live offer, and releases the lock before any repository call. Offer
//! timers carry a token so a timer that fires after its offer was superseded
//! does nothing.
//!
//! Terminal ride states are written as conditional transitions out of
//! `requested`, so of an acceptance, a cancellation and an exhaustion racing
//! on the same ride exactly one is recorded. A cascade whose terminal write
//! failed is parked in the table with no offer out, where the sweep retries it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::entities::ride::{self, RideStatus};
use crate::error::{AppError, AppResult};
use crate::realtime::messages::{RideOffer, RideStatusUpdate, ServerMessage, WithdrawReason};
use crate::realtime::RealtimeNotifier;
use crate::repository::{DriverDirectory, RideRepository, RideUpdate};
use crate::services::distance::URBAN_SPEED_KMH;
use crate::services::presence::PresenceRegistry;
use crate::utils::clock::Clock;
use crate::utils::geo::haversine_distance;

pub const SEARCH_RADIUS_KM: f64 = 10.0;
pub const OFFER_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_ATTEMPTS: usize = 5;
pub const STALE_REQUEST_MINUTES: i64 = 5;

const DISTANCE_WEIGHT: f64 = 0.7;
const RATING_WEIGHT: f64 = 0.3;

pub const NO_DRIVERS_MESSAGE: &str = "No available drivers found in your area";
pub const NO_LONGER_AVAILABLE_MESSAGE: &str = "Ride request no longer available";
pub const SEARCH_FAILED_MESSAGE: &str = "Failed to find driver, please try again";
pub const ACCEPT_NOT_RECORDED_MESSAGE: &str = "Could not confirm the ride, it was passed on";
pub const NOT_CANCELLABLE_MESSAGE: &str = "Ride can no longer be cancelled";

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub search_radius_km: f64,
    pub offer_timeout: Duration,
    pub max_attempts: usize,
    /// Cascades for rides older than this are force-exhausted by the sweep.
    pub stale_request_age: chrono::Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            search_radius_km: SEARCH_RADIUS_KM,
            offer_timeout: OFFER_TIMEOUT,
            max_attempts: MAX_ATTEMPTS,
            stale_request_age: chrono::Duration::minutes(STALE_REQUEST_MINUTES),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DispatchCandidate {
    pub driver_id: Uuid,
    pub distance_km: f64,
    pub rating_score: f64,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// An offer is out; the rider should keep waiting.
    Searching,
    NoDriversAvailable,
    Exhausted,
    AlreadyDispatching,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub outcome: DispatchOutcome,
    pub message: String,
    pub candidates: usize,
}

impl DispatchResult {
    fn searching(candidates: usize) -> Self {
        Self {
            success: true,
            outcome: DispatchOutcome::Searching,
            message: "Searching for a driver".to_string(),
            candidates,
        }
    }

    fn unsuccessful(outcome: DispatchOutcome, message: &str, candidates: usize) -> Self {
        Self {
            success: false,
            outcome,
            message: message.to_string(),
            candidates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptanceResult {
    pub success: bool,
    pub message: String,
}

impl AcceptanceResult {
    fn accepted() -> Self {
        Self {
            success: true,
            message: "Ride accepted".to_string(),
        }
    }

    fn no_longer_available() -> Self {
        Self {
            success: false,
            message: NO_LONGER_AVAILABLE_MESSAGE.to_string(),
        }
    }

    fn not_recorded() -> Self {
        Self {
            success: false,
            message: ACCEPT_NOT_RECORDED_MESSAGE.to_string(),
        }
    }
}

/// Admin view of one live cascade.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSnapshot {
    pub ride_id: Uuid,
    pub current_index: usize,
    pub candidates: usize,
    pub offered_driver: Option<Uuid>,
    pub ride_created_at: DateTime<Utc>,
}

struct OutstandingOffer {
    driver_id: Uuid,
    token: u64,
    timer: AbortHandle,
}

struct PendingDispatch {
    ride: ride::Model,
    candidates: Vec<DispatchCandidate>,
    current_index: usize,
    offer: Option<OutstandingOffer>,
}

impl PendingDispatch {
    fn offered_driver(&self) -> Option<Uuid> {
        self.offer.as_ref().map(|offer| offer.driver_id)
    }

    fn cancel_timer(&mut self) {
        if let Some(offer) = self.offer.take() {
            offer.timer.abort();
        }
    }
}

enum CascadeStep {
    Offered(Uuid),
    /// Attempts ran out; the entry is already out of the table.
    Exhausted(PendingDispatch),
    /// The cascade was already concluded by someone else.
    Concluded,
}

pub struct DispatchCoordinator {
    presence: Arc<PresenceRegistry>,
    rides: Arc<dyn RideRepository>,
    drivers: Arc<dyn DriverDirectory>,
    notifier: Arc<dyn RealtimeNotifier>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
    pending: Mutex<HashMap<Uuid, PendingDispatch>>,
    next_token: AtomicU64,
}

impl DispatchCoordinator {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        rides: Arc<dyn RideRepository>,
        drivers: Arc<dyn DriverDirectory>,
        notifier: Arc<dyn RealtimeNotifier>,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            presence,
            rides,
            drivers,
            notifier,
            clock,
            settings,
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<Uuid, PendingDispatch>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find nearby drivers and start offering the ride to them.
    ///
    /// Never errors: search failures come back as a `Failed` result. The only
    /// fallible step runs before the pending entry is created, so a failure
    /// leaves nothing behind.
    pub async fn match_driver_for_ride(self: &Arc<Self>, ride: &ride::Model) -> DispatchResult {
        let candidates = match self.find_candidates(ride).await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::error!(ride_id = %ride.id, error = %err, "Driver search failed");
                return DispatchResult::unsuccessful(DispatchOutcome::Failed, SEARCH_FAILED_MESSAGE, 0);
            }
        };

        if candidates.is_empty() {
            tracing::info!(ride_id = %ride.id, "No drivers within search radius");
            return DispatchResult::unsuccessful(DispatchOutcome::NoDriversAvailable, NO_DRIVERS_MESSAGE, 0);
        }

        let ranked = rank_candidates(candidates);
        let count = ranked.len();

        {
            let mut table = self.table();
            if table.contains_key(&ride.id) {
                tracing::warn!(ride_id = %ride.id, "Ride already has a live dispatch");
                return DispatchResult::unsuccessful(
                    DispatchOutcome::AlreadyDispatching,
                    "Ride is already being dispatched",
                    count,
                );
            }

            table.insert(
                ride.id,
                PendingDispatch {
                    ride: ride.clone(),
                    candidates: ranked,
                    current_index: 0,
                    offer: None,
                },
            );
        }

        tracing::info!(ride_id = %ride.id, candidates = count, "Dispatch cascade started");

        match self.advance(ride.id).await {
            Some(_) => DispatchResult::searching(count),
            None => DispatchResult::unsuccessful(DispatchOutcome::Exhausted, NO_DRIVERS_MESSAGE, count),
        }
    }

    /// First acceptance from the driver currently holding the offer wins.
    /// Everyone else, including late or repeated acceptances, gets
    /// "no longer available" without any state change.
    ///
    /// Nothing is withdrawn until the acceptance is recorded. When the write
    /// fails the cascade moves on to the next candidate.
    pub async fn handle_driver_acceptance(
        self: &Arc<Self>,
        ride_id: Uuid,
        driver_id: Uuid,
    ) -> AcceptanceResult {
        let won = {
            let mut table = self.table();
            let holds_offer = table
                .get(&ride_id)
                .is_some_and(|entry| entry.offered_driver() == Some(driver_id));
            if holds_offer { table.remove(&ride_id) } else { None }
        };

        let Some(mut entry) = won else {
            tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "Acceptance for a concluded offer");
            return AcceptanceResult::no_longer_available();
        };

        entry.cancel_timer();
        let candidate = entry.candidates[entry.current_index];
        let now = self.clock.now();

        match self
            .rides
            .transition(ride_id, RideStatus::Requested, RideUpdate::accepted(driver_id, now))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Cancelled while this acceptance was in flight
                tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "Ride concluded before acceptance was recorded");
                self.withdraw_offers(
                    ride_id,
                    entry.candidates[entry.current_index + 1..].iter(),
                    WithdrawReason::RideCancelled,
                );
                return AcceptanceResult::no_longer_available();
            }
            Err(err) => {
                tracing::error!(ride_id = %ride_id, driver_id = %driver_id, error = %err, "Failed to record acceptance");
                entry.current_index += 1;
                if self.restore(entry) {
                    self.advance(ride_id).await;
                }
                return AcceptanceResult::not_recorded();
            }
        }

        self.withdraw_offers(
            ride_id,
            entry.candidates.iter().filter(|c| c.driver_id != driver_id),
            WithdrawReason::AcceptedByAnotherDriver,
        );

        tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "Driver accepted ride");

        let status = RideStatusUpdate {
            driver_id: Some(driver_id),
            estimated_arrival: Some(arrival_seconds(candidate.distance_km)),
            fare: entry.ride.estimated_fare,
            distance: entry.ride.estimated_distance_km,
            duration: entry.ride.estimated_duration_seconds,
            ..RideStatusUpdate::new(ride_id, RideStatus::Accepted, now)
        };
        self.notifier
            .broadcast_to_ride(ride_id, ServerMessage::RideStatus(status));

        AcceptanceResult::accepted()
    }

    /// Returns false when the driver does not hold the live offer.
    pub async fn handle_driver_rejection(self: &Arc<Self>, ride_id: Uuid, driver_id: Uuid) -> bool {
        let rejected = {
            let mut table = self.table();
            match table.get_mut(&ride_id) {
                Some(entry) if entry.offered_driver() == Some(driver_id) => {
                    entry.cancel_timer();
                    entry.current_index += 1;
                    true
                }
                _ => false,
            }
        };

        if !rejected {
            tracing::debug!(ride_id = %ride_id, driver_id = %driver_id, "Ignoring rejection for a concluded offer");
            return false;
        }

        tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "Driver rejected ride offer");
        self.advance(ride_id).await;
        true
    }

    /// Rider cancelled: stop the cascade, withdraw every outstanding or
    /// future offer, and record the cancellation. Returns whether a cascade
    /// was running. A ride that already left `requested` is a `Conflict`.
    pub async fn cancel_dispatch(&self, ride_id: Uuid) -> AppResult<bool> {
        let removed = self.table().remove(&ride_id).map(|mut entry| {
            entry.cancel_timer();
            entry
        });
        let had_cascade = removed.is_some();

        let now = self.clock.now();
        let recorded = self
            .rides
            .transition(ride_id, RideStatus::Requested, RideUpdate::cancelled(now))
            .await;

        if let Some(mut entry) = removed {
            self.withdraw_offers(
                ride_id,
                entry.candidates[entry.current_index..].iter(),
                WithdrawReason::RideCancelled,
            );
            if matches!(&recorded, Err(err) if !matches!(err, AppError::NotFound(_))) {
                entry.current_index = entry.candidates.len();
                self.restore(entry);
            }
        }

        if !recorded? {
            tracing::info!(ride_id = %ride_id, "Cancellation refused, ride already concluded");
            return Err(AppError::Conflict(NOT_CANCELLABLE_MESSAGE.to_string()));
        }

        tracing::info!(ride_id = %ride_id, had_cascade, "Ride cancelled by rider");
        self.notifier.broadcast_to_ride(
            ride_id,
            ServerMessage::RideStatus(RideStatusUpdate::new(ride_id, RideStatus::Cancelled, now)),
        );

        Ok(had_cascade)
    }

    /// Force-exhaust cascades whose ride is older than the stale age,
    /// including parked ones whose terminal write failed earlier.
    /// Returns how many were swept.
    pub async fn cleanup_expired_requests(&self) -> usize {
        let cutoff = self.clock.now() - self.settings.stale_request_age;

        let expired: Vec<PendingDispatch> = {
            let mut table = self.table();
            let stale: Vec<Uuid> = table
                .iter()
                .filter(|(_, entry)| entry.ride.created_at.with_timezone(&Utc) < cutoff)
                .map(|(ride_id, _)| *ride_id)
                .collect();
            stale.iter().filter_map(|ride_id| table.remove(ride_id)).collect()
        };

        let swept = expired.len();
        for entry in expired {
            tracing::warn!(ride_id = %entry.ride.id, "Abandoned dispatch force-exhausted");
            self.conclude_exhausted(entry).await;
        }

        swept
    }

    pub fn is_dispatching(&self, ride_id: Uuid) -> bool {
        self.table().contains_key(&ride_id)
    }

    pub fn offered_driver(&self, ride_id: Uuid) -> Option<Uuid> {
        self.table().get(&ride_id).and_then(PendingDispatch::offered_driver)
    }

    pub fn snapshot(&self) -> Vec<DispatchSnapshot> {
        self.table()
            .values()
            .map(|entry| DispatchSnapshot {
                ride_id: entry.ride.id,
                current_index: entry.current_index,
                candidates: entry.candidates.len(),
                offered_driver: entry.offered_driver(),
                ride_created_at: entry.ride.created_at.with_timezone(&Utc),
            })
            .collect()
    }

    async fn find_candidates(&self, ride: &ride::Model) -> AppResult<Vec<DispatchCandidate>> {
        let online = self.presence.online_drivers();
        if online.is_empty() {
            return Ok(Vec::new());
        }

        let ratings: HashMap<Uuid, f64> = self
            .drivers
            .active_drivers()
            .await?
            .into_iter()
            .map(|profile| (profile.driver_id, profile.rating))
            .collect();

        Ok(online
            .into_iter()
            .filter_map(|presence| {
                let rating_score = *ratings.get(&presence.driver_id)?;
                let distance_km = haversine_distance(
                    ride.pickup_lat,
                    ride.pickup_lng,
                    presence.latitude,
                    presence.longitude,
                );

                (distance_km <= self.settings.search_radius_km).then_some(DispatchCandidate {
                    driver_id: presence.driver_id,
                    distance_km,
                    rating_score,
                    latitude: presence.latitude,
                    longitude: presence.longitude,
                })
            })
            .collect())
    }

    /// Returns the driver now holding the offer, if any.
    async fn advance(self: &Arc<Self>, ride_id: Uuid) -> Option<Uuid> {
        match self.offer_next(ride_id) {
            CascadeStep::Offered(driver_id) => Some(driver_id),
            CascadeStep::Exhausted(entry) => {
                self.conclude_exhausted(entry).await;
                None
            }
            CascadeStep::Concluded => None,
        }
    }

    /// Put an entry back unless the ride has been dispatched again meanwhile.
    fn restore(&self, entry: PendingDispatch) -> bool {
        match self.table().entry(entry.ride.id) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Offer the ride to the candidate at the current index, skipping
    /// unreachable drivers. Removes the entry once the attempt budget or the
    /// candidate list runs out.
    fn offer_next(self: &Arc<Self>, ride_id: Uuid) -> CascadeStep {
        let mut table = self.table();
        let Some(entry) = table.get_mut(&ride_id) else {
            return CascadeStep::Concluded;
        };

        // One outstanding offer per ride at most
        if let Some(driver_id) = entry.offered_driver() {
            return CascadeStep::Offered(driver_id);
        }

        let bound = entry.candidates.len().min(self.settings.max_attempts);
        while entry.current_index < bound {
            let candidate = entry.candidates[entry.current_index];
            let offer = self.build_offer(&entry.ride, &candidate);

            match self
                .notifier
                .send_to_driver(candidate.driver_id, ServerMessage::RideOffer(offer))
            {
                Ok(()) => {
                    let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                    let timer = self.schedule_offer_timeout(ride_id, token);
                    entry.offer = Some(OutstandingOffer {
                        driver_id: candidate.driver_id,
                        token,
                        timer,
                    });

                    tracing::info!(
                        ride_id = %ride_id,
                        driver_id = %candidate.driver_id,
                        attempt = entry.current_index + 1,
                        distance_km = candidate.distance_km,
                        "Ride offered to driver"
                    );
                    return CascadeStep::Offered(candidate.driver_id);
                }
                Err(err) => {
                    tracing::warn!(
                        ride_id = %ride_id,
                        driver_id = %candidate.driver_id,
                        error = %err,
                        "Offer undeliverable, treating as rejection"
                    );
                    entry.current_index += 1;
                }
            }
        }

        tracing::info!(ride_id = %ride_id, attempts = bound, "Dispatch cascade exhausted");
        match table.remove(&ride_id) {
            Some(entry) => CascadeStep::Exhausted(entry),
            None => CascadeStep::Concluded,
        }
    }

    fn schedule_offer_timeout(self: &Arc<Self>, ride_id: Uuid, token: u64) -> AbortHandle {
        let coordinator = Arc::clone(self);
        let timeout = self.settings.offer_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            coordinator.handle_offer_timeout(ride_id, token).await;
        })
        .abort_handle()
    }

    async fn handle_offer_timeout(self: &Arc<Self>, ride_id: Uuid, token: u64) {
        let expired = {
            let mut table = self.table();
            match table.get_mut(&ride_id) {
                Some(entry) if entry.offer.as_ref().is_some_and(|o| o.token == token) => {
                    // Runs on the timer's own task, so the handle is dropped, not aborted
                    let offer = entry.offer.take();
                    entry.current_index += 1;
                    offer.map(|o| o.driver_id)
                }
                _ => None,
            }
        };

        match expired {
            Some(driver_id) => {
                tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "Ride offer timed out");
                self.advance(ride_id).await;
            }
            None => {
                tracing::debug!(ride_id = %ride_id, token, "Superseded offer timer ignored");
            }
        }
    }

    /// Record that nobody took the ride and tell its subscribers. If the
    /// write fails the entry is parked for the sweep to retry.
    async fn conclude_exhausted(&self, mut entry: PendingDispatch) {
        entry.cancel_timer();
        let ride_id = entry.ride.id;

        match self
            .rides
            .transition(ride_id, RideStatus::Requested, RideUpdate::status(RideStatus::NoDriversAvailable))
            .await
        {
            Ok(true) => {
                self.notifier.broadcast_to_ride(
                    ride_id,
                    ServerMessage::RideStatus(RideStatusUpdate::new(
                        ride_id,
                        RideStatus::NoDriversAvailable,
                        self.clock.now(),
                    )),
                );
            }
            Ok(false) => {
                tracing::debug!(ride_id = %ride_id, "Exhausted ride was already concluded");
            }
            Err(AppError::NotFound(_)) => {
                tracing::warn!(ride_id = %ride_id, "Exhausted ride no longer exists");
            }
            Err(err) => {
                tracing::error!(ride_id = %ride_id, error = %err, "Failed to record exhausted dispatch");
                entry.current_index = entry.candidates.len();
                self.restore(entry);
            }
        }
    }

    fn withdraw_offers<'a>(
        &self,
        ride_id: Uuid,
        candidates: impl Iterator<Item = &'a DispatchCandidate>,
        reason: WithdrawReason,
    ) {
        for candidate in candidates {
            if let Err(err) = self
                .notifier
                .send_to_driver(candidate.driver_id, ServerMessage::OfferWithdrawn { ride_id, reason })
            {
                tracing::debug!(ride_id = %ride_id, driver_id = %candidate.driver_id, error = %err, "Withdrawal not delivered");
            }
        }
    }

    fn build_offer(&self, ride: &ride::Model, candidate: &DispatchCandidate) -> RideOffer {
        let window = chrono::Duration::milliseconds(self.settings.offer_timeout.as_millis() as i64);

        RideOffer {
            ride_id: ride.id,
            pickup_lat: ride.pickup_lat,
            pickup_lng: ride.pickup_lng,
            pickup_address: ride.pickup_address.clone(),
            dropoff_lat: ride.dropoff_lat,
            dropoff_lng: ride.dropoff_lng,
            dropoff_address: ride.dropoff_address.clone(),
            rider_id: ride.rider_id,
            distance_km: candidate.distance_km,
            estimated_arrival_seconds: arrival_seconds(candidate.distance_km),
            expires_at: self.clock.now() + window,
        }
    }
}

/// Order candidates best first.
///
/// Ranking follows the pairwise rule `distanceDiff * 0.7 + ratingDiff * 0.3`
/// (distance ascending, rating descending) with kilometres and rating points
/// on the same raw scale. That rule is the difference of
/// [`ranking_score`] between the two candidates, so sorting by the score
/// yields the same order.
pub fn rank_candidates(mut candidates: Vec<DispatchCandidate>) -> Vec<DispatchCandidate> {
    candidates.sort_by(|a, b| ranking_score(a).total_cmp(&ranking_score(b)));
    candidates
}

pub fn ranking_score(candidate: &DispatchCandidate) -> f64 {
    candidate.distance_km * DISTANCE_WEIGHT - candidate.rating_score * RATING_WEIGHT
}

fn arrival_seconds(distance_km: f64) -> i64 {
    (distance_km / URBAN_SPEED_KMH * 3600.0).round() as i64
}

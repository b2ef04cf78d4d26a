use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::engine::lifecycle::{MAX_LIST_LIMIT, RideLifecycle};
use crate::error::AppError;
use crate::geo::index::GeoIndex;
use crate::geo::{haversine_m, validate_point, validate_radius};
use crate::models::caller::Caller;
use crate::models::driver::Candidate;
use crate::models::location::GeoPoint;
use crate::models::ride::{Ride, RideEvent, RideStatus};
use crate::observability::metrics::Metrics;
use crate::store::Repository;

/// Candidates tried by one dispatch pass.
const DISPATCH_FANOUT: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct OfferMatch {
    pub ride: Ride,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferPage {
    pub offers: Vec<OfferMatch>,
    pub total: usize,
}

/// Connects proximity search to the lifecycle's atomic accept. Holds no
/// state of its own; the store arbitrates every race.
#[derive(Clone)]
pub struct MatchingCoordinator {
    repo: Repository,
    geo: Arc<GeoIndex>,
    lifecycle: RideLifecycle,
    metrics: Metrics,
}

impl MatchingCoordinator {
    pub fn new(
        repo: Repository,
        geo: Arc<GeoIndex>,
        lifecycle: RideLifecycle,
        metrics: Metrics,
    ) -> Self {
        Self {
            repo,
            geo,
            lifecycle,
            metrics,
        }
    }

    /// Nearby drivers whose authoritative record says they can take a ride.
    pub async fn find_candidates(
        &self,
        pickup: &GeoPoint,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<Candidate>, AppError> {
        let nearby = self.geo.query(pickup, radius_m)?;
        let mut candidates = Vec::with_capacity(nearby.len().min(limit));

        for candidate in nearby {
            if candidates.len() >= limit {
                break;
            }
            match self.repo.driver(candidate.driver_id).await {
                Ok(driver) if driver.value.is_dispatchable() => candidates.push(candidate),
                Ok(_) | Err(AppError::NotFound(_)) => {
                    debug!(driver_id = %candidate.driver_id, "indexed driver is not dispatchable");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(candidates)
    }

    /// Assigns a specific driver to a requested ride.
    pub async fn assign(
        &self,
        caller: &Caller,
        ride_id: Uuid,
        driver_id: Uuid,
    ) -> Result<Ride, AppError> {
        if !caller.is_admin() && caller.user_id != driver_id {
            return Err(AppError::Unauthorized(format!(
                "{} may not assign ride {ride_id} to driver {driver_id}",
                caller.user_id
            )));
        }

        let result = self.lifecycle.accept_for(ride_id, driver_id).await;
        self.metrics.record_transition("assign", &result);
        result
    }

    /// Offers the ride to nearby drivers nearest first until one commits.
    ///
    /// Returns `Ok(None)` when nobody in range could take it. An
    /// `AlreadyAssigned` outcome ends the walk, since the ride has a driver.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, ride_id: Uuid, radius_m: f64) -> Result<Option<Ride>, AppError> {
        let result = self.try_dispatch(ride_id, radius_m).await;
        self.metrics.record_transition("dispatch", &result);
        result
    }

    /// Open driver offers whose pickup lies within `radius_m`, nearest first.
    pub async fn find_offers(
        &self,
        point: &GeoPoint,
        radius_m: f64,
        skip: usize,
        limit: usize,
    ) -> Result<OfferPage, AppError> {
        validate_point(point)?;
        validate_radius(radius_m)?;
        if limit == 0 || limit > MAX_LIST_LIMIT {
            return Err(AppError::InvalidArgument(format!(
                "limit must be between 1 and {MAX_LIST_LIMIT}"
            )));
        }

        let mut offers: Vec<OfferMatch> = self
            .repo
            .rides()
            .await?
            .into_iter()
            .filter(|ride| ride.status == RideStatus::Offered)
            .filter_map(|ride| {
                let distance_m = haversine_m(point, &ride.pickup.point);
                (distance_m <= radius_m).then_some(OfferMatch { ride, distance_m })
            })
            .collect();

        offers.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        let total = offers.len();

        Ok(OfferPage {
            offers: offers.into_iter().skip(skip).take(limit).collect(),
            total,
        })
    }

    async fn try_dispatch(&self, ride_id: Uuid, radius_m: f64) -> Result<Option<Ride>, AppError> {
        let ride = self.repo.ride(ride_id).await?.value;
        if ride.status != RideStatus::Requested {
            ride.next_status(RideEvent::DriverAccept)?;
        }

        let candidates = self
            .find_candidates(&ride.pickup.point, radius_m, DISPATCH_FANOUT)
            .await?;

        for candidate in candidates {
            match self.lifecycle.accept_for(ride_id, candidate.driver_id).await {
                Ok(ride) => {
                    info!(
                        driver_id = %candidate.driver_id,
                        distance_m = candidate.distance_m,
                        "ride dispatched"
                    );
                    return Ok(Some(ride));
                }
                Err(AppError::DriverUnavailable(reason)) => {
                    debug!(driver_id = %candidate.driver_id, reason = %reason, "candidate busy, trying next");
                }
                Err(err) => {
                    if err.is_routine() {
                        debug!(driver_id = %candidate.driver_id, error = %err, "ride taken during dispatch");
                    }
                    return Err(err);
                }
            }
        }

        debug!("no candidate accepted the ride");
        Ok(None)
    }
}

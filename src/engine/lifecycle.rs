use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::fare::FareCalculator;
use crate::error::AppError;
use crate::geo::index::GeoIndex;
use crate::integrations::events::EventSink;
use crate::integrations::payment::PaymentGateway;
use crate::models::caller::{AccountStatus, Caller, Role};
use crate::models::driver::Driver;
use crate::models::event::DomainEvent;
use crate::models::fare::FareBreakdown;
use crate::models::location::Place;
use crate::models::ride::{PaymentMethod, Ride, RideEvent, RideOrigin, RideStatus};
use crate::observability::metrics::Metrics;
use crate::store::{Mutation, Record, Repository, Versioned};

pub const MAX_LIST_LIMIT: usize = 100;

/// Route and payment details of a new ride.
#[derive(Debug, Clone, Deserialize)]
pub struct RideRequest {
    pub pickup: Place,
    pub dropoff: Place,
    pub payment_method: PaymentMethod,
}

/// A driver advertises a route with the same details a rider would request.
pub type RideOffer = RideRequest;

/// Measured trip figures reported by the driver at drop-off.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Completion {
    pub actual_distance_m: Option<f64>,
    pub actual_duration_min: Option<u32>,
}

/// Ride state machine.
///
/// Each transition loads the ride (and the driver and wallet it touches),
/// plans every mutation against the loaded versions and commits them as one
/// batch. A racer that loses the commit reloads and re-evaluates, so it ends
/// up observing the winner's state rather than overwriting it.
#[derive(Clone)]
pub struct RideLifecycle {
    repo: Repository,
    fares: FareCalculator,
    geo: Arc<GeoIndex>,
    events: Arc<dyn EventSink>,
    gateway: Arc<dyn PaymentGateway>,
    metrics: Metrics,
    retries: u32,
}

impl RideLifecycle {
    pub fn new(
        repo: Repository,
        fares: FareCalculator,
        geo: Arc<GeoIndex>,
        events: Arc<dyn EventSink>,
        gateway: Arc<dyn PaymentGateway>,
        metrics: Metrics,
        retries: u32,
    ) -> Self {
        Self {
            repo,
            fares,
            geo,
            events,
            gateway,
            metrics,
            retries,
        }
    }

    pub fn fares(&self) -> &FareCalculator {
        &self.fares
    }

    pub async fn request(&self, caller: &Caller, draft: RideRequest) -> Result<Ride, AppError> {
        let result = self.try_request(caller, draft).await;
        self.metrics.record_transition("request", &result);
        result
    }

    pub async fn offer(&self, caller: &Caller, draft: RideOffer) -> Result<Ride, AppError> {
        let result = self.try_offer(caller, draft).await;
        self.metrics.record_transition("offer", &result);
        result
    }

    /// A driver claims a requested ride. First commit wins.
    pub async fn accept(&self, caller: &Caller, ride_id: Uuid) -> Result<Ride, AppError> {
        let result = match ensure_driver(caller) {
            Ok(()) => self.accept_for(ride_id, caller.user_id).await,
            Err(err) => Err(err),
        };
        self.metrics.record_transition("accept", &result);
        result
    }

    /// A rider claims a driver's open offer. First commit wins.
    pub async fn accept_offer(&self, caller: &Caller, ride_id: Uuid) -> Result<Ride, AppError> {
        let result = self.try_accept_offer(caller, ride_id).await;
        self.metrics.record_transition("accept_offer", &result);
        result
    }

    pub async fn start(&self, caller: &Caller, ride_id: Uuid) -> Result<Ride, AppError> {
        let result = self.try_start(caller, ride_id).await;
        self.metrics.record_transition("start", &result);
        result
    }

    pub async fn complete(
        &self,
        caller: &Caller,
        ride_id: Uuid,
        completion: Completion,
    ) -> Result<Ride, AppError> {
        let result = self.try_complete(caller, ride_id, completion).await;
        self.metrics.record_transition("complete", &result);
        result
    }

    pub async fn cancel(
        &self,
        caller: &Caller,
        ride_id: Uuid,
        reason: Option<String>,
    ) -> Result<Ride, AppError> {
        let result = self.try_cancel(caller, ride_id, reason).await;
        self.metrics.record_transition("cancel", &result);
        result
    }

    /// Visible to its rider and driver, to admins, and while still open to the
    /// other side of the market.
    pub async fn get(&self, caller: &Caller, ride_id: Uuid) -> Result<Ride, AppError> {
        let ride = self.repo.ride(ride_id).await?.value;
        let open_to_caller = match ride.status {
            RideStatus::Requested => caller.role == Role::Driver,
            RideStatus::Offered => caller.role == Role::Rider,
            _ => false,
        };

        if caller.is_admin() || ride.is_party(caller.user_id) || open_to_caller {
            Ok(ride)
        } else {
            Err(AppError::Unauthorized(format!(
                "ride {ride_id} does not belong to {}",
                caller.user_id
            )))
        }
    }

    /// The caller's rides as rider or driver, newest first.
    pub async fn list_for_user(
        &self,
        caller: &Caller,
        status: Option<RideStatus>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Ride>, AppError> {
        if limit == 0 || limit > MAX_LIST_LIMIT {
            return Err(AppError::InvalidArgument(format!(
                "limit must be between 1 and {MAX_LIST_LIMIT}"
            )));
        }

        let mut rides: Vec<Ride> = self
            .repo
            .rides()
            .await?
            .into_iter()
            .filter(|ride| ride.is_party(caller.user_id))
            .filter(|ride| status.is_none_or(|wanted| ride.status == wanted))
            .collect();

        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rides.into_iter().skip(skip).take(limit).collect())
    }

    pub(crate) async fn accept_for(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
        let mut attempt = 0;
        let ride = loop {
            let Versioned {
                value: mut ride,
                version,
            } = self.repo.ride(ride_id).await?;
            let next = ride.next_status(RideEvent::DriverAccept)?;

            let mut driver = self.dispatchable_driver(driver_id).await?;
            driver.value.engage(ride_id);

            ride.status = next;
            ride.driver_id = Some(driver_id);
            ride.accepted_at = Some(Utc::now());

            let mutations = vec![
                Mutation::update(Record::Ride(ride.clone()), version),
                Mutation::update(Record::Driver(driver.value), driver.version),
            ];
            if self.try_commit(mutations, &mut attempt, ride_id).await? {
                break ride;
            }
        };

        self.geo.set_available(driver_id, false);
        info!(ride_id = %ride.id, driver_id = %driver_id, "ride accepted by driver");
        self.events.publish(DomainEvent::RideAccepted {
            ride_id: ride.id,
            rider_id: ride.rider_id,
            driver_id: ride.driver_id,
            at: Utc::now(),
        });
        Ok(ride)
    }

    async fn try_request(&self, caller: &Caller, draft: RideRequest) -> Result<Ride, AppError> {
        caller.require_role(Role::Rider)?;

        let fare = self.quote(&draft)?;
        let mut ride = new_ride(RideOrigin::Request, draft, fare);
        ride.rider_id = Some(caller.user_id);
        ride.requested_at = Some(ride.created_at);

        self.repo
            .commit(vec![Mutation::create(Record::Ride(ride.clone()))])
            .await?;

        info!(
            ride_id = %ride.id,
            rider_id = %caller.user_id,
            total_fare = %ride.fare.total_fare,
            "ride requested"
        );
        self.events.publish(DomainEvent::RideRequested {
            ride_id: ride.id,
            rider_id: caller.user_id,
            at: ride.created_at,
        });
        Ok(ride)
    }

    async fn try_offer(&self, caller: &Caller, draft: RideOffer) -> Result<Ride, AppError> {
        ensure_driver(caller)?;
        let fare = self.quote(&draft)?;

        let mut attempt = 0;
        let ride = loop {
            let mut driver = self.dispatchable_driver(caller.user_id).await?;

            let mut ride = new_ride(RideOrigin::Offer, draft.clone(), fare.clone());
            ride.driver_id = Some(caller.user_id);
            ride.offered_at = Some(ride.created_at);
            driver.value.engage(ride.id);

            let mutations = vec![
                Mutation::create(Record::Ride(ride.clone())),
                Mutation::update(Record::Driver(driver.value), driver.version),
            ];
            if self.try_commit(mutations, &mut attempt, ride.id).await? {
                break ride;
            }
        };

        self.geo.set_available(caller.user_id, false);
        info!(ride_id = %ride.id, driver_id = %caller.user_id, "ride offered");
        self.events.publish(DomainEvent::RideOffered {
            ride_id: ride.id,
            driver_id: caller.user_id,
            at: ride.created_at,
        });
        Ok(ride)
    }

    async fn try_accept_offer(&self, caller: &Caller, ride_id: Uuid) -> Result<Ride, AppError> {
        caller.require_role(Role::Rider)?;

        let mut attempt = 0;
        let ride = loop {
            let Versioned {
                value: mut ride,
                version,
            } = self.repo.ride(ride_id).await?;
            ride.status = ride.next_status(RideEvent::RiderAcceptOffer)?;
            ride.rider_id = Some(caller.user_id);
            ride.accepted_at = Some(Utc::now());

            let mutations = vec![Mutation::update(Record::Ride(ride.clone()), version)];
            if self.try_commit(mutations, &mut attempt, ride_id).await? {
                break ride;
            }
        };

        info!(ride_id = %ride.id, rider_id = %caller.user_id, "ride offer accepted");
        self.events.publish(DomainEvent::RideAccepted {
            ride_id: ride.id,
            rider_id: ride.rider_id,
            driver_id: ride.driver_id,
            at: Utc::now(),
        });
        Ok(ride)
    }

    async fn try_start(&self, caller: &Caller, ride_id: Uuid) -> Result<Ride, AppError> {
        let mut attempt = 0;
        let ride = loop {
            let Versioned {
                value: mut ride,
                version,
            } = self.repo.ride(ride_id).await?;
            ensure_ride_driver(caller, &ride)?;
            ride.status = ride.next_status(RideEvent::Start)?;
            ride.started_at = Some(Utc::now());

            let mutations = vec![Mutation::update(Record::Ride(ride.clone()), version)];
            if self.try_commit(mutations, &mut attempt, ride_id).await? {
                break ride;
            }
        };

        info!(ride_id = %ride.id, "ride started");
        self.events.publish(DomainEvent::RideStarted {
            ride_id: ride.id,
            rider_id: ride.rider_id,
            driver_id: ride.driver_id,
            at: Utc::now(),
        });
        Ok(ride)
    }

    async fn try_complete(
        &self,
        caller: &Caller,
        ride_id: Uuid,
        completion: Completion,
    ) -> Result<Ride, AppError> {
        if let Some(distance) = completion.actual_distance_m {
            if !distance.is_finite() || distance < 0.0 {
                return Err(AppError::InvalidArgument(format!(
                    "actual distance must be a non-negative number of meters, got {distance}"
                )));
            }
        }

        let mut attempt = 0;
        let (ride, wallet_tx) = loop {
            let Versioned {
                value: mut ride,
                version,
            } = self.repo.ride(ride_id).await?;
            ensure_ride_driver(caller, &ride)?;
            let next = ride.next_status(RideEvent::Complete)?;

            let driver_id = ride.driver_id.ok_or_else(|| {
                AppError::Internal(format!("started ride {ride_id} has no driver"))
            })?;
            let rider_id = ride.rider_id.ok_or_else(|| {
                AppError::Internal(format!("started ride {ride_id} has no rider"))
            })?;

            // Once an external charge is on record the fare it paid is final.
            let method = ride.payment_method;
            let charged = method.is_external() && ride.payment_reference.is_some();
            if !charged {
                ride.fare = self.final_fare(&ride, &completion)?;
                ride.actual_distance_m = completion.actual_distance_m.or(ride.actual_distance_m);
                ride.actual_duration_min =
                    completion.actual_duration_min.or(ride.actual_duration_min);
            }

            let mut mutations = Vec::with_capacity(3);
            let mut wallet_tx = None;

            match method {
                PaymentMethod::Wallet if ride.fare.total_fare > Decimal::ZERO => {
                    let Versioned {
                        value: mut wallet,
                        version: wallet_version,
                    } = self.repo.wallet_or_new(rider_id).await?;
                    let tx = wallet.debit(ride.fare.total_fare, Some(ride_id), "Ride payment")?;
                    ride.payment_reference = Some(tx.id.to_string());
                    mutations.push(Mutation::update(Record::Wallet(wallet), wallet_version));
                    wallet_tx = Some(tx);
                }
                method
                    if method.is_external() && !charged && ride.fare.total_fare > Decimal::ZERO =>
                {
                    let reference = self.charge(ride_id, ride.fare.total_fare, method).await?;
                    ride.payment_reference = Some(reference.clone());

                    // The charge is stored before completing, so a failed
                    // completion is retried against this reference.
                    let recorded = self
                        .try_commit(
                            vec![Mutation::update(Record::Ride(ride), version)],
                            &mut attempt,
                            ride_id,
                        )
                        .await;
                    if let Err(err) = &recorded {
                        warn!(
                            ride_id = %ride_id,
                            reference = %reference,
                            error = %err,
                            "ride charged externally but the charge was not recorded"
                        );
                    }
                    recorded?;
                    continue;
                }
                _ => {}
            }

            let mut driver = self.repo.driver(driver_id).await?;
            driver.value.release();

            ride.status = next;
            ride.paid = true;
            ride.completed_at = Some(Utc::now());

            mutations.push(Mutation::update(Record::Ride(ride.clone()), version));
            mutations.push(Mutation::update(Record::Driver(driver.value), driver.version));

            if self.try_commit(mutations, &mut attempt, ride_id).await? {
                break (ride, wallet_tx);
            }
        };

        if let Some(driver_id) = ride.driver_id {
            self.geo.set_available(driver_id, true);
        }
        info!(
            ride_id = %ride.id,
            total_fare = %ride.fare.total_fare,
            payment_method = ?ride.payment_method,
            "ride completed"
        );

        let now = Utc::now();
        self.events.publish(DomainEvent::RideCompleted {
            ride_id: ride.id,
            rider_id: ride.rider_id,
            driver_id: ride.driver_id,
            total_fare: ride.fare.total_fare,
            at: now,
        });

        if let Some(tx) = &wallet_tx {
            self.metrics
                .wallet_transactions_total
                .with_label_values(&["debit"])
                .inc();
            debug!(ride_id = %ride.id, tx_id = %tx.id, "wallet debited for ride");
        }
        if let (Some(rider_id), Some(reference)) = (ride.rider_id, &ride.payment_reference) {
            self.events.publish(DomainEvent::PaymentApplied {
                ride_id: Some(ride.id),
                user_id: rider_id,
                amount: ride.fare.total_fare,
                reference: reference.clone(),
                at: now,
            });
        }
        Ok(ride)
    }

    async fn try_cancel(
        &self,
        caller: &Caller,
        ride_id: Uuid,
        reason: Option<String>,
    ) -> Result<Ride, AppError> {
        let mut attempt = 0;
        let (ride, released) = loop {
            let Versioned {
                value: mut ride,
                version,
            } = self.repo.ride(ride_id).await?;

            if !caller.is_admin() && !ride.is_party(caller.user_id) {
                return Err(AppError::Unauthorized(format!(
                    "{} may not cancel ride {ride_id}",
                    caller.user_id
                )));
            }

            let holding_driver = matches!(ride.status, RideStatus::Offered | RideStatus::Accepted);
            ride.status = ride.next_status(RideEvent::Cancel)?;
            ride.cancelled_at = Some(Utc::now());
            ride.cancelled_by = Some(caller.user_id);
            ride.cancel_reason = reason.clone();

            let mut mutations = vec![Mutation::update(Record::Ride(ride.clone()), version)];
            let mut released = None;

            if let (true, Some(driver_id)) = (holding_driver, ride.driver_id) {
                let mut driver = self.repo.driver(driver_id).await?;
                if driver.value.active_ride == Some(ride_id) {
                    driver.value.release();
                    mutations.push(Mutation::update(Record::Driver(driver.value), driver.version));
                    released = Some(driver_id);
                }
            }

            if self.try_commit(mutations, &mut attempt, ride_id).await? {
                break (ride, released);
            }
        };

        if let Some(driver_id) = released {
            self.geo.set_available(driver_id, true);
        }
        info!(ride_id = %ride.id, cancelled_by = %caller.user_id, "ride cancelled");
        self.events.publish(DomainEvent::RideCancelled {
            ride_id: ride.id,
            cancelled_by: caller.user_id,
            reason: ride.cancel_reason.clone(),
            at: Utc::now(),
        });
        Ok(ride)
    }

    fn quote(&self, draft: &RideRequest) -> Result<FareBreakdown, AppError> {
        self.fares.estimate(&draft.pickup.point, &draft.dropoff.point)
    }

    /// Re-prices with the measured distance and duration when reported.
    fn final_fare(&self, ride: &Ride, completion: &Completion) -> Result<FareBreakdown, AppError> {
        let surge = ride.fare.surge_multiplier;
        match (completion.actual_distance_m, completion.actual_duration_min) {
            (None, None) => Ok(ride.fare.clone()),
            (Some(distance), duration) => self.fares.price(
                distance,
                duration.unwrap_or_else(|| self.fares.duration_for(distance)),
                surge,
            ),
            (None, Some(duration)) => self.fares.price(ride.fare.distance_m, duration, surge),
        }
    }

    async fn charge(
        &self,
        ride_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<String, AppError> {
        tokio::time::timeout(
            self.repo.timeout(),
            self.gateway.charge_external(Some(ride_id), amount, method.as_str()),
        )
        .await
        .map_err(|_| AppError::Timeout(format!("payment gateway charge for ride {ride_id}")))?
    }

    async fn dispatchable_driver(&self, driver_id: Uuid) -> Result<Versioned<Driver>, AppError> {
        let driver = match self.repo.driver(driver_id).await {
            Ok(driver) => driver,
            Err(AppError::NotFound(_)) => {
                return Err(AppError::DriverUnavailable(format!(
                    "driver {driver_id} is not registered"
                )));
            }
            Err(err) => return Err(err),
        };

        if !driver.value.is_dispatchable() {
            return Err(AppError::DriverUnavailable(format!(
                "driver {driver_id} cannot take a ride right now"
            )));
        }
        Ok(driver)
    }

    /// `Ok(true)` once committed, `Ok(false)` when the caller should reload and retry.
    async fn try_commit(
        &self,
        mutations: Vec<Mutation>,
        attempt: &mut u32,
        ride_id: Uuid,
    ) -> Result<bool, AppError> {
        match self.repo.commit(mutations).await {
            Ok(()) => Ok(true),
            Err(AppError::Conflict(reason)) if *attempt < self.retries => {
                *attempt += 1;
                debug!(ride_id = %ride_id, attempt = *attempt, reason = %reason, "commit raced, reloading");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

fn new_ride(origin: RideOrigin, draft: RideRequest, fare: FareBreakdown) -> Ride {
    let status = match origin {
        RideOrigin::Request => RideStatus::Requested,
        RideOrigin::Offer => RideStatus::Offered,
    };

    Ride {
        id: Uuid::new_v4(),
        rider_id: None,
        driver_id: None,
        origin,
        pickup: draft.pickup,
        dropoff: draft.dropoff,
        status,
        estimated_distance_m: fare.distance_m,
        estimated_duration_min: fare.duration_min,
        actual_distance_m: None,
        actual_duration_min: None,
        fare,
        payment_method: draft.payment_method,
        payment_reference: None,
        paid: false,
        cancel_reason: None,
        cancelled_by: None,
        created_at: Utc::now(),
        requested_at: None,
        offered_at: None,
        accepted_at: None,
        started_at: None,
        completed_at: None,
        cancelled_at: None,
    }
}

fn ensure_driver(caller: &Caller) -> Result<(), AppError> {
    if caller.role != Role::Driver {
        return Err(AppError::Unauthorized(format!(
            "driver role required, caller is {}",
            caller.role
        )));
    }
    if caller.status != AccountStatus::Active {
        return Err(AppError::DriverUnavailable(format!(
            "driver {} is {:?}",
            caller.user_id, caller.status
        )));
    }
    Ok(())
}

fn ensure_ride_driver(caller: &Caller, ride: &Ride) -> Result<(), AppError> {
    if caller.is_admin() || ride.driver_id == Some(caller.user_id) {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "only the assigned driver may drive ride {}",
            ride.id
        )))
    }
}

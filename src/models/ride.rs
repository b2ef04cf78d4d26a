use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::fare::FareBreakdown;
use crate::models::location::Place;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RideStatus {
    Requested,
    Offered,
    Accepted,
    Started,
    Completed,
    Cancelled,
}

/// Which party created the ride. Only the matching accept event can move it
/// out of its initial state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RideOrigin {
    Request,
    Offer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideEvent {
    DriverAccept,
    RiderAcceptOffer,
    Start,
    Complete,
    Cancel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentMethod {
    Cash,
    Card,
    Wallet,
    Upi,
}

impl PaymentMethod {
    /// Settled through the payment-gateway collaborator.
    pub fn is_external(self) -> bool {
        matches!(self, PaymentMethod::Card | PaymentMethod::Upi)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Upi => "upi",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ride {
    pub id: Uuid,
    pub rider_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub origin: RideOrigin,
    pub pickup: Place,
    pub dropoff: Place,
    pub status: RideStatus,
    pub estimated_distance_m: f64,
    pub estimated_duration_min: u32,
    pub actual_distance_m: Option<f64>,
    pub actual_duration_min: Option<u32>,
    pub fare: FareBreakdown,
    pub payment_method: PaymentMethod,
    pub payment_reference: Option<String>,
    pub paid: bool,
    pub cancel_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub requested_at: Option<DateTime<Utc>>,
    pub offered_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Ride {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.rider_id == Some(user_id) || self.driver_id == Some(user_id)
    }

    /// Resolves `event` against the lifecycle graph without touching the ride.
    pub fn next_status(&self, event: RideEvent) -> Result<RideStatus, AppError> {
        use RideEvent::*;
        use RideStatus::*;

        match (self.status, event) {
            (Requested, DriverAccept) | (Offered, RiderAcceptOffer) => Ok(Accepted),
            (Accepted | Started | Completed, DriverAccept)
                if self.origin == RideOrigin::Request =>
            {
                Err(AppError::AlreadyAssigned(self.id.to_string()))
            }
            (Accepted | Started | Completed, RiderAcceptOffer)
                if self.origin == RideOrigin::Offer =>
            {
                Err(AppError::AlreadyAssigned(self.id.to_string()))
            }
            (Accepted, Start) => Ok(Started),
            (Started, Complete) => Ok(Completed),
            (Requested | Offered | Accepted, Cancel) => Ok(Cancelled),
            (status, event) => Err(AppError::InvalidTransition(format!(
                "cannot apply {event:?} to {status} ride {}",
                self.id
            ))),
        }
    }
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Requested => "requested",
            RideStatus::Offered => "offered",
            RideStatus::Accepted => "accepted",
            RideStatus::Started => "started",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "requested" => Ok(RideStatus::Requested),
            "offered" => Ok(RideStatus::Offered),
            "accepted" => Ok(RideStatus::Accepted),
            "started" => Ok(RideStatus::Started),
            "completed" => Ok(RideStatus::Completed),
            "cancelled" => Ok(RideStatus::Cancelled),
            other => Err(AppError::InvalidArgument(format!(
                "unknown ride status: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;
    use crate::models::location::GeoPoint;

    fn ride(status: RideStatus, origin: RideOrigin) -> Ride {
        let place = Place {
            label: "somewhere".to_string(),
            point: GeoPoint::new(12.97, 77.59),
        };
        Ride {
            id: Uuid::new_v4(),
            rider_id: None,
            driver_id: None,
            origin,
            pickup: place.clone(),
            dropoff: place,
            status,
            estimated_distance_m: 0.0,
            estimated_duration_min: 0,
            actual_distance_m: None,
            actual_duration_min: None,
            fare: FareBreakdown {
                distance_m: 0.0,
                duration_min: 0,
                base_fare: Decimal::ZERO,
                distance_fare: Decimal::ZERO,
                time_fare: Decimal::ZERO,
                surge_multiplier: Decimal::ONE,
                total_fare: Decimal::ZERO,
            },
            payment_method: PaymentMethod::Cash,
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

    #[test]
    fn happy_path_from_request() {
        let mut r = ride(RideStatus::Requested, RideOrigin::Request);
        for (event, expected) in [
            (RideEvent::DriverAccept, RideStatus::Accepted),
            (RideEvent::Start, RideStatus::Started),
            (RideEvent::Complete, RideStatus::Completed),
        ] {
            r.status = r.next_status(event).unwrap();
            assert_eq!(r.status, expected);
        }
    }

    #[test]
    fn second_accept_reports_already_assigned() {
        let r = ride(RideStatus::Accepted, RideOrigin::Request);
        assert!(matches!(
            r.next_status(RideEvent::DriverAccept),
            Err(AppError::AlreadyAssigned(_))
        ));

        let offer = ride(RideStatus::Started, RideOrigin::Offer);
        assert!(matches!(
            offer.next_status(RideEvent::RiderAcceptOffer),
            Err(AppError::AlreadyAssigned(_))
        ));
    }

    #[test]
    fn accept_event_must_match_origin() {
        let offer = ride(RideStatus::Offered, RideOrigin::Offer);
        assert!(matches!(
            offer.next_status(RideEvent::DriverAccept),
            Err(AppError::InvalidTransition(_))
        ));

        let request = ride(RideStatus::Requested, RideOrigin::Request);
        assert!(matches!(
            request.next_status(RideEvent::RiderAcceptOffer),
            Err(AppError::InvalidTransition(_))
        ));
    }

    #[test]
    fn terminal_states_reject_every_event() {
        for status in [RideStatus::Completed, RideStatus::Cancelled] {
            let r = ride(status, RideOrigin::Request);
            for event in [RideEvent::Start, RideEvent::Complete, RideEvent::Cancel] {
                assert!(matches!(
                    r.next_status(event),
                    Err(AppError::InvalidTransition(_))
                ));
            }
        }
    }

    #[test]
    fn started_ride_cannot_be_cancelled() {
        let r = ride(RideStatus::Started, RideOrigin::Request);
        assert!(r.next_status(RideEvent::Cancel).is_err());
    }

    #[test]
    fn status_strings_are_validated() {
        assert_eq!("Offered".parse::<RideStatus>().unwrap(), RideStatus::Offered);
        assert!("in_progress".parse::<RideStatus>().is_err());
    }
}

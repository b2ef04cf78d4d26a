use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain events handed to the notification collaborator after a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DomainEvent {
    RideRequested {
        ride_id: Uuid,
        rider_id: Uuid,
        at: DateTime<Utc>,
    },
    RideOffered {
        ride_id: Uuid,
        driver_id: Uuid,
        at: DateTime<Utc>,
    },
    RideAccepted {
        ride_id: Uuid,
        rider_id: Option<Uuid>,
        driver_id: Option<Uuid>,
        at: DateTime<Utc>,
    },
    RideStarted {
        ride_id: Uuid,
        rider_id: Option<Uuid>,
        driver_id: Option<Uuid>,
        at: DateTime<Utc>,
    },
    RideCompleted {
        ride_id: Uuid,
        rider_id: Option<Uuid>,
        driver_id: Option<Uuid>,
        total_fare: Decimal,
        at: DateTime<Utc>,
    },
    RideCancelled {
        ride_id: Uuid,
        cancelled_by: Uuid,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    PaymentApplied {
        ride_id: Option<Uuid>,
        user_id: Uuid,
        amount: Decimal,
        reference: String,
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::RideRequested { .. } => "RideRequested",
            DomainEvent::RideOffered { .. } => "RideOffered",
            DomainEvent::RideAccepted { .. } => "RideAccepted",
            DomainEvent::RideStarted { .. } => "RideStarted",
            DomainEvent::RideCompleted { .. } => "RideCompleted",
            DomainEvent::RideCancelled { .. } => "RideCancelled",
            DomainEvent::PaymentApplied { .. } => "PaymentApplied",
        }
    }
}

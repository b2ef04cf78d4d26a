use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::caller::AccountStatus;

/// Authoritative driver state. The geo index keeps an advisory copy of the
/// availability flag that is refreshed after every committed transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub status: AccountStatus,
    pub online: bool,
    pub available: bool,
    pub active_ride: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn new(id: Uuid, name: String) -> Self {
        Self {
            id,
            name,
            status: AccountStatus::Pending,
            online: false,
            available: false,
            active_ride: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether this driver may take on a new ride right now.
    pub fn is_dispatchable(&self) -> bool {
        self.status == AccountStatus::Active
            && self.online
            && self.available
            && self.active_ride.is_none()
    }

    pub fn engage(&mut self, ride_id: Uuid) {
        self.available = false;
        self.active_ride = Some(ride_id);
        self.updated_at = Utc::now();
    }

    pub fn release(&mut self) {
        self.available = true;
        self.active_ride = None;
        self.updated_at = Utc::now();
    }
}

/// A driver returned from a proximity search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub distance_m: f64,
}

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{BoundingBox, haversine_m, validate_point, validate_radius};
use crate::models::driver::Candidate;
use crate::models::location::GeoPoint;

/// Entries scanned between two cancellation checks.
const QUERY_BATCH: usize = 256;

/// Latest known fix for one driver.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DriverFix {
    pub driver_id: Uuid,
    pub point: GeoPoint,
    pub available: bool,
    pub online: bool,
    pub updated_at: DateTime<Utc>,
}

/// In-memory index of driver positions.
///
/// Reads may race writes and observe a fix one update behind; positions are
/// advisory input to matching, the store decides who actually gets a ride.
#[derive(Debug, Default)]
pub struct GeoIndex {
    fixes: DashMap<Uuid, DriverFix>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the driver's fix unless a newer one is already stored.
    /// Returns `false` when the report was stale and dropped.
    pub fn upsert(
        &self,
        driver_id: Uuid,
        point: GeoPoint,
        available: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        validate_point(&point)?;

        let fix = DriverFix {
            driver_id,
            point,
            available,
            online: true,
            updated_at: at,
        };

        match self.fixes.entry(driver_id) {
            Entry::Occupied(mut existing) => {
                if existing.get().updated_at > at {
                    return Ok(false);
                }
                existing.insert(fix);
            }
            Entry::Vacant(slot) => {
                slot.insert(fix);
            }
        }

        Ok(true)
    }

    pub fn set_available(&self, driver_id: Uuid, available: bool) {
        if let Some(mut fix) = self.fixes.get_mut(&driver_id) {
            fix.available = available;
        }
    }

    pub fn set_online(&self, driver_id: Uuid, online: bool) {
        if let Some(mut fix) = self.fixes.get_mut(&driver_id) {
            fix.online = online;
        }
    }

    pub fn remove(&self, driver_id: Uuid) -> Option<DriverFix> {
        self.fixes.remove(&driver_id).map(|(_, fix)| fix)
    }

    pub fn get(&self, driver_id: Uuid) -> Option<DriverFix> {
        self.fixes.get(&driver_id).map(|fix| fix.value().clone())
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Available, online drivers within `radius_m` of `center`, nearest first.
    pub fn query(&self, center: &GeoPoint, radius_m: f64) -> Result<Vec<Candidate>, AppError> {
        self.query_cancellable(center, radius_m, || false)
    }

    /// Like [`GeoIndex::query`], checking `is_cancelled` between batches.
    pub fn query_cancellable<F>(
        &self,
        center: &GeoPoint,
        radius_m: f64,
        is_cancelled: F,
    ) -> Result<Vec<Candidate>, AppError>
    where
        F: Fn() -> bool,
    {
        validate_point(center)?;
        validate_radius(radius_m)?;

        let bbox = BoundingBox::around(center, radius_m);
        let mut candidates = Vec::new();

        for (scanned, entry) in self.fixes.iter().enumerate() {
            if scanned % QUERY_BATCH == 0 && is_cancelled() {
                return Err(AppError::Cancelled("radius query".to_string()));
            }

            let fix = entry.value();
            if !fix.available || !fix.online || !bbox.contains(&fix.point) {
                continue;
            }

            let distance_m = haversine_m(center, &fix.point);
            if distance_m <= radius_m {
                candidates.push(Candidate {
                    driver_id: fix.driver_id,
                    lat: fix.point.lat,
                    lng: fix.point.lng,
                    distance_m,
                });
            }
        }

        candidates.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        Ok(candidates)
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::index::GeoIndex;
use crate::models::caller::{AccountStatus, Caller, Role};
use crate::models::driver::Driver;
use crate::models::location::GeoPoint;
use crate::observability::metrics::Metrics;
use crate::store::{Mutation, Record, Repository};

/// Driver records and their mirror in the geo index.
#[derive(Clone)]
pub struct DriverRoster {
    repo: Repository,
    geo: Arc<GeoIndex>,
    metrics: Metrics,
    retries: u32,
}

impl DriverRoster {
    pub fn new(repo: Repository, geo: Arc<GeoIndex>, metrics: Metrics, retries: u32) -> Self {
        Self {
            repo,
            geo,
            metrics,
            retries,
        }
    }

    /// Creates the caller's driver record. It stays `Pending` until an admin
    /// activates the account.
    pub async fn register(&self, caller: &Caller, name: String) -> Result<Driver, AppError> {
        if caller.role != Role::Driver {
            return Err(AppError::Unauthorized(format!(
                "driver role required, caller is {}",
                caller.role
            )));
        }
        if name.trim().is_empty() {
            return Err(AppError::InvalidArgument("driver name is empty".to_string()));
        }

        let driver = Driver::new(caller.user_id, name.trim().to_string());
        match self
            .repo
            .commit(vec![Mutation::create(Record::Driver(driver.clone()))])
            .await
        {
            Ok(()) => {}
            Err(AppError::Conflict(_)) => {
                return Err(AppError::Conflict(format!(
                    "driver {} is already registered",
                    caller.user_id
                )));
            }
            Err(err) => return Err(err),
        }

        info!(driver_id = %driver.id, "driver registered");
        Ok(driver)
    }

    pub async fn get(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        Ok(self.repo.driver(driver_id).await?.value)
    }

    /// Admin pushes the identity provider's verdict into the driver record.
    pub async fn set_status(
        &self,
        caller: &Caller,
        driver_id: Uuid,
        status: AccountStatus,
    ) -> Result<Driver, AppError> {
        caller.require_admin()?;

        let driver = self
            .update(driver_id, |driver| {
                driver.status = status;
                Ok(())
            })
            .await?;

        if status == AccountStatus::Suspended && self.geo.remove(driver_id).is_some() {
            self.metrics.drivers_indexed.set(self.geo.len() as i64);
        }
        info!(driver_id = %driver_id, status = ?status, "driver account status changed");
        Ok(driver)
    }

    /// Goes online/offline and available/unavailable. Refused while the driver
    /// is holding a ride, which is released only by that ride's lifecycle.
    pub async fn set_presence(
        &self,
        caller: &Caller,
        online: bool,
        available: bool,
    ) -> Result<Driver, AppError> {
        if caller.role != Role::Driver {
            return Err(AppError::Unauthorized(format!(
                "driver role required, caller is {}",
                caller.role
            )));
        }

        let driver = self
            .update(caller.user_id, |driver| {
                if let Some(ride_id) = driver.active_ride {
                    return Err(AppError::Conflict(format!(
                        "driver {} is on ride {ride_id}",
                        driver.id
                    )));
                }
                driver.online = online;
                driver.available = online && available;
                Ok(())
            })
            .await?;

        self.geo.set_online(driver.id, driver.online);
        info!(
            driver_id = %driver.id,
            online = driver.online,
            available = driver.available,
            "driver presence changed"
        );
        Ok(driver)
    }

    /// Records a position report. Returns `false` when a newer fix was
    /// already indexed.
    pub async fn report_location(
        &self,
        caller: &Caller,
        point: GeoPoint,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        if caller.role != Role::Driver {
            return Err(AppError::Unauthorized(format!(
                "driver role required, caller is {}",
                caller.role
            )));
        }

        let driver = self.repo.driver(caller.user_id).await?.value;
        let applied = self.geo.upsert(
            driver.id,
            point,
            driver.is_dispatchable(),
            at.unwrap_or_else(Utc::now),
        )?;

        if applied {
            self.geo.set_online(driver.id, driver.online);
        } else {
            debug!(driver_id = %driver.id, "stale location report dropped");
        }
        self.metrics.drivers_indexed.set(self.geo.len() as i64);
        Ok(applied)
    }

    async fn update<F>(&self, driver_id: Uuid, mut apply: F) -> Result<Driver, AppError>
    where
        F: FnMut(&mut Driver) -> Result<(), AppError>,
    {
        let mut attempt = 0;
        loop {
            let mut loaded = self.repo.driver(driver_id).await?;
            apply(&mut loaded.value)?;
            loaded.value.updated_at = Utc::now();

            let driver = loaded.value.clone();
            match self
                .repo
                .commit(vec![Mutation::update(Record::Driver(loaded.value), loaded.version)])
                .await
            {
                Ok(()) => {
                    self.geo.set_available(driver.id, driver.is_dispatchable());
                    return Ok(driver);
                }
                Err(AppError::Conflict(reason)) if attempt < self.retries => {
                    attempt += 1;
                    debug!(driver_id = %driver_id, attempt, reason = %reason, "driver update raced, reloading");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    use super::DriverRoster;
    use crate::error::AppError;
    use crate::geo::index::GeoIndex;
    use crate::models::caller::{AccountStatus, Caller, Role};
    use crate::models::location::GeoPoint;
    use crate::observability::metrics::Metrics;
    use crate::store::{MemoryStore, Mutation, Record, Repository};

    const MG_ROAD: GeoPoint = GeoPoint {
        lat: 12.9716,
        lng: 77.5946,
    };

    fn roster() -> (DriverRoster, Arc<GeoIndex>, Repository) {
        let repo = Repository::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        let geo = Arc::new(GeoIndex::new());
        (
            DriverRoster::new(repo.clone(), geo.clone(), Metrics::new(), 3),
            geo,
            repo,
        )
    }

    async fn active_driver(roster: &DriverRoster) -> Caller {
        let caller = Caller::new(Uuid::new_v4(), Role::Driver);
        let admin = Caller::new(Uuid::new_v4(), Role::Admin);
        roster.register(&caller, "Asha".to_string()).await.unwrap();
        roster
            .set_status(&admin, caller.user_id, AccountStatus::Active)
            .await
            .unwrap();
        caller
    }

    #[tokio::test]
    async fn registration_starts_pending_and_rejects_duplicates() {
        let (roster, _, _) = roster();
        let caller = Caller::new(Uuid::new_v4(), Role::Driver);

        let driver = roster.register(&caller, "Asha".to_string()).await.unwrap();
        assert_eq!(driver.status, AccountStatus::Pending);
        assert!(!driver.is_dispatchable());

        let again = roster.register(&caller, "Asha".to_string()).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn riders_cannot_register_or_set_status() {
        let (roster, _, _) = roster();
        let rider = Caller::new(Uuid::new_v4(), Role::Rider);

        let registered = roster.register(&rider, "R".to_string()).await;
        assert!(matches!(registered, Err(AppError::Unauthorized(_))));

        let status = roster
            .set_status(&rider, Uuid::new_v4(), AccountStatus::Active)
            .await;
        assert!(matches!(status, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn available_driver_becomes_visible_in_the_index() {
        let (roster, geo, _) = roster();
        let caller = active_driver(&roster).await;

        roster.set_presence(&caller, true, true).await.unwrap();
        assert!(roster.report_location(&caller, MG_ROAD, None).await.unwrap());

        let found = geo.query(&MG_ROAD, 5_000.0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].driver_id, caller.user_id);

        roster.set_presence(&caller, false, false).await.unwrap();
        assert!(geo.query(&MG_ROAD, 5_000.0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn suspension_drops_the_indexed_fix() {
        let (roster, geo, _) = roster();
        let caller = active_driver(&roster).await;
        roster.set_presence(&caller, true, true).await.unwrap();
        roster.report_location(&caller, MG_ROAD, None).await.unwrap();
        assert_eq!(geo.len(), 1);

        let admin = Caller::new(Uuid::new_v4(), Role::Admin);
        roster
            .set_status(&admin, caller.user_id, AccountStatus::Suspended)
            .await
            .unwrap();
        assert!(geo.get(caller.user_id).is_none());
    }

    #[tokio::test]
    async fn older_report_is_dropped() {
        let (roster, geo, _) = roster();
        let caller = active_driver(&roster).await;
        let now = Utc::now();

        roster
            .report_location(&caller, MG_ROAD, Some(now))
            .await
            .unwrap();
        let applied = roster
            .report_location(
                &caller,
                GeoPoint::new(13.0, 77.0),
                Some(now - ChronoDuration::seconds(5)),
            )
            .await
            .unwrap();

        assert!(!applied);
        assert_eq!(geo.get(caller.user_id).unwrap().point, MG_ROAD);
    }

    #[tokio::test]
    async fn presence_cannot_change_during_a_ride() {
        let (roster, _, repo) = roster();
        let caller = active_driver(&roster).await;
        roster.set_presence(&caller, true, true).await.unwrap();

        let mut loaded = repo.driver(caller.user_id).await.unwrap();
        loaded.value.engage(Uuid::new_v4());
        repo.commit(vec![Mutation::update(
            Record::Driver(loaded.value),
            loaded.version,
        )])
        .await
        .unwrap();

        let toggled = roster.set_presence(&caller, true, true).await;
        assert!(matches!(toggled, Err(AppError::Conflict(_))));
    }
}

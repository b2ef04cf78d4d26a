use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::ride::Ride;
use crate::store::{EntityKey, Mutation, Record, Store, Versioned};

/// Process-local [`Store`]. One write lock covers a whole batch, so readers
/// never observe half of a multi-entity commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<EntityKey, Versioned<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self, key: EntityKey) -> Result<Versioned<Record>, AppError> {
        let records = self
            .records
            .read()
            .map_err(|_| AppError::Internal("store lock poisoned".to_string()))?;

        records
            .get(&key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("{key:?} not found")))
    }

    async fn save_atomic(&self, mutations: Vec<Mutation>) -> Result<(), AppError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| AppError::Internal("store lock poisoned".to_string()))?;

        let mut seen = HashSet::with_capacity(mutations.len());
        for mutation in &mutations {
            let key = mutation.record.key();
            if !seen.insert(key) {
                return Err(AppError::Internal(format!(
                    "{key:?} mutated twice in one batch"
                )));
            }

            let current = records.get(&key).map_or(0, |stored| stored.version);
            if current != mutation.expected_version {
                return Err(AppError::Conflict(format!(
                    "{key:?} is at version {current}, expected {}",
                    mutation.expected_version
                )));
            }
        }

        for mutation in mutations {
            let key = mutation.record.key();
            records.insert(
                key,
                Versioned {
                    value: mutation.record,
                    version: mutation.expected_version + 1,
                },
            );
        }

        Ok(())
    }

    async fn list_rides(&self) -> Result<Vec<Ride>, AppError> {
        let records = self
            .records
            .read()
            .map_err(|_| AppError::Internal("store lock poisoned".to_string()))?;

        Ok(records
            .values()
            .filter_map(|stored| match &stored.value {
                Record::Ride(ride) => Some(ride.clone()),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::error::AppError;
    use crate::models::driver::Driver;
    use crate::models::wallet::Wallet;
    use crate::store::{EntityKey, Mutation, Record, Store};

    fn driver(id: Uuid) -> Record {
        Record::Driver(Driver::new(id, "Ravi".to_string()))
    }

    #[tokio::test]
    async fn versions_start_at_one_and_increment() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        store.save_atomic(vec![Mutation::create(driver(id))]).await.unwrap();
        assert_eq!(store.load(EntityKey::Driver(id)).await.unwrap().version, 1);

        store
            .save_atomic(vec![Mutation::update(driver(id), 1)])
            .await
            .unwrap();
        assert_eq!(store.load(EntityKey::Driver(id)).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn stale_batch_applies_nothing() {
        let store = MemoryStore::new();
        let driver_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        store
            .save_atomic(vec![Mutation::create(driver(driver_id))])
            .await
            .unwrap();

        let result = store
            .save_atomic(vec![
                Mutation::create(Record::Wallet(Wallet::new(user_id))),
                Mutation::update(driver(driver_id), 5),
            ])
            .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert!(matches!(
            store.load(EntityKey::Wallet(user_id)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn creating_twice_conflicts() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.save_atomic(vec![Mutation::create(driver(id))]).await.unwrap();

        let again = store.save_atomic(vec![Mutation::create(driver(id))]).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }
}

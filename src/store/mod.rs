//! Persistence boundary.
//!
//! The engine treats storage as a transactional record store: every record
//! carries a version and [`Store::save_atomic`] applies a batch of mutations
//! only if every expected version still matches. Anything implementing
//! [`Store`] with those semantics can back the engine.

pub mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::ride::Ride;
use crate::models::wallet::Wallet;

pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Ride(Uuid),
    Driver(Uuid),
    Wallet(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Ride(Ride),
    Driver(Driver),
    Wallet(Wallet),
}

impl Record {
    pub fn key(&self) -> EntityKey {
        match self {
            Record::Ride(ride) => EntityKey::Ride(ride.id),
            Record::Driver(driver) => EntityKey::Driver(driver.id),
            Record::Wallet(wallet) => EntityKey::Wallet(wallet.user_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    /// Zero means "not stored yet".
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub record: Record,
    pub expected_version: u64,
}

impl Mutation {
    pub fn create(record: Record) -> Self {
        Self {
            record,
            expected_version: 0,
        }
    }

    pub fn update(record: Record, expected_version: u64) -> Self {
        Self {
            record,
            expected_version,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn load(&self, key: EntityKey) -> Result<Versioned<Record>, AppError>;

    /// All-or-nothing commit. Fails with [`AppError::Conflict`] when any
    /// mutation's expected version is out of date, leaving the store untouched.
    async fn save_atomic(&self, mutations: Vec<Mutation>) -> Result<(), AppError>;

    async fn list_rides(&self) -> Result<Vec<Ride>, AppError>;
}

/// Typed access to a [`Store`] with every call bounded by a deadline.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            store: self.store.clone(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn ride(&self, id: Uuid) -> Result<Versioned<Ride>, AppError> {
        let loaded = self.load(EntityKey::Ride(id)).await?;
        match loaded.value {
            Record::Ride(value) => Ok(Versioned {
                value,
                version: loaded.version,
            }),
            other => Err(mismatch("ride", &other)),
        }
    }

    pub async fn driver(&self, id: Uuid) -> Result<Versioned<Driver>, AppError> {
        let loaded = self.load(EntityKey::Driver(id)).await?;
        match loaded.value {
            Record::Driver(value) => Ok(Versioned {
                value,
                version: loaded.version,
            }),
            other => Err(mismatch("driver", &other)),
        }
    }

    /// The user's wallet, or a fresh zero-balance one at version 0.
    pub async fn wallet_or_new(&self, user_id: Uuid) -> Result<Versioned<Wallet>, AppError> {
        match self.load(EntityKey::Wallet(user_id)).await {
            Ok(loaded) => match loaded.value {
                Record::Wallet(value) => Ok(Versioned {
                    value,
                    version: loaded.version,
                }),
                other => Err(mismatch("wallet", &other)),
            },
            Err(AppError::NotFound(_)) => Ok(Versioned {
                value: Wallet::new(user_id),
                version: 0,
            }),
            Err(err) => Err(err),
        }
    }

    pub async fn rides(&self) -> Result<Vec<Ride>, AppError> {
        self.bounded("list rides", self.store.list_rides()).await
    }

    pub async fn commit(&self, mutations: Vec<Mutation>) -> Result<(), AppError> {
        self.bounded("commit", self.store.save_atomic(mutations)).await
    }

    async fn load(&self, key: EntityKey) -> Result<Versioned<Record>, AppError> {
        self.bounded("load", self.store.load(key)).await
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "store {operation} exceeded {}ms",
                    self.timeout.as_millis()
                ))
            })?
    }
}

fn mismatch(expected: &str, found: &Record) -> AppError {
    AppError::Internal(format!(
        "expected {expected} record, found {:?}",
        found.key()
    ))
}

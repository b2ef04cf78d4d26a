use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;

/// Opaque reference issued by the payment provider.
pub type ProviderReference = String;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` through the provider. `ride_id` is `None` for wallet
    /// top-ups. Declines surface as [`AppError::PaymentFailed`].
    ///
    /// A `Some(ride_id)` is an idempotency key: charging the same ride again
    /// must return the first reference without moving money twice.
    async fn charge_external(
        &self,
        ride_id: Option<Uuid>,
        amount: Decimal,
        method: &str,
    ) -> Result<ProviderReference, AppError>;
}

/// Accepts every charge and logs it. Used when no provider is configured.
#[derive(Debug, Default, Clone)]
pub struct LoggingGateway {
    rides: Arc<DashMap<Uuid, ProviderReference>>,
}

#[async_trait]
impl PaymentGateway for LoggingGateway {
    async fn charge_external(
        &self,
        ride_id: Option<Uuid>,
        amount: Decimal,
        method: &str,
    ) -> Result<ProviderReference, AppError> {
        let mut charged = true;
        let reference = match ride_id {
            Some(id) => self
                .rides
                .entry(id)
                .or_insert_with(|| {
                    charged = false;
                    new_reference()
                })
                .clone(),
            None => {
                charged = false;
                new_reference()
            }
        };

        if charged {
            debug!(ride_id = ?ride_id, reference = %reference, "ride already charged");
        } else {
            info!(
                ride_id = ?ride_id,
                amount = %amount,
                method,
                reference = %reference,
                "external charge accepted"
            );
        }
        Ok(reference)
    }
}

fn new_reference() -> ProviderReference {
    format!("local_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::{LoggingGateway, PaymentGateway};

    #[tokio::test]
    async fn repeated_ride_charge_returns_the_first_reference() {
        let gateway = LoggingGateway::default();
        let ride_id = Uuid::new_v4();

        let first = gateway.charge_external(Some(ride_id), dec!(120), "card").await.unwrap();
        let again = gateway.charge_external(Some(ride_id), dec!(120), "card").await.unwrap();
        assert_eq!(first, again);

        let top_up = gateway.charge_external(None, dec!(120), "card").await.unwrap();
        let other = gateway.charge_external(None, dec!(120), "card").await.unwrap();
        assert_ne!(top_up, other);
    }
}

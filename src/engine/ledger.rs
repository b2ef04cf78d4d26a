use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::integrations::events::EventSink;
use crate::integrations::payment::PaymentGateway;
use crate::models::event::DomainEvent;
use crate::models::wallet::{Transaction, TransactionKind, Wallet};
use crate::observability::metrics::Metrics;
use crate::store::{Mutation, Record, Repository, Versioned};

pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub total: usize,
    pub page: usize,
    pub size: usize,
}

/// Per-user wallets. Every balance change and its ledger entry are written in
/// one versioned commit, so the balance always equals a replay of the log.
#[derive(Clone)]
pub struct WalletLedger {
    repo: Repository,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn EventSink>,
    metrics: Metrics,
    retries: u32,
}

impl WalletLedger {
    pub fn new(
        repo: Repository,
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn EventSink>,
        metrics: Metrics,
        retries: u32,
    ) -> Self {
        Self {
            repo,
            gateway,
            events,
            metrics,
            retries,
        }
    }

    /// Current balance, opening an empty wallet on first access.
    pub async fn balance(&self, user_id: Uuid) -> Result<Decimal, AppError> {
        let wallet = self.repo.wallet_or_new(user_id).await?;
        if wallet.version == 0 {
            match self
                .repo
                .commit(vec![Mutation::create(Record::Wallet(wallet.value.clone()))])
                .await
            {
                Ok(()) => debug!(user_id = %user_id, "wallet opened"),
                // Someone else opened it first; a fresh wallet is still empty.
                Err(AppError::Conflict(_)) => {
                    return Ok(self.repo.wallet_or_new(user_id).await?.value.balance);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(wallet.value.balance)
    }

    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction, AppError> {
        let tx = self
            .mutate(user_id, |wallet| wallet.credit(amount, description))
            .await?;
        self.count(&tx);
        info!(user_id = %user_id, amount = %amount, tx_id = %tx.id, "wallet credited");
        Ok(tx)
    }

    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        ride_id: Option<Uuid>,
        description: &str,
    ) -> Result<Transaction, AppError> {
        let tx = self
            .mutate(user_id, |wallet| wallet.debit(amount, ride_id, description))
            .await?;
        self.count(&tx);
        info!(user_id = %user_id, amount = %amount, tx_id = %tx.id, "wallet debited");
        Ok(tx)
    }

    /// Charges the payment gateway and credits the wallet with the proceeds.
    /// A declined or timed-out charge is recorded as a failed entry.
    pub async fn top_up(
        &self,
        user_id: Uuid,
        amount: Decimal,
        method: &str,
        description: &str,
    ) -> Result<Transaction, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidArgument(format!(
                "amount must be > 0, got {amount}"
            )));
        }

        // Refuse before charging what could never be credited.
        self.repo
            .wallet_or_new(user_id)
            .await?
            .value
            .balance_after_credit(amount)?;

        let charge = tokio::time::timeout(
            self.repo.timeout(),
            self.gateway.charge_external(None, amount, method),
        )
        .await
        .unwrap_or_else(|_| Err(AppError::Timeout("payment gateway".to_string())));

        let reference = match charge {
            Ok(reference) => reference,
            Err(err) => {
                warn!(user_id = %user_id, amount = %amount, error = %err, "wallet top-up declined");
                let description = format!("{description} (failed: {})", err.kind());
                self.mutate(user_id, |wallet| {
                    Ok(wallet.record_failure(
                        TransactionKind::Credit,
                        amount,
                        description.clone(),
                        Some(method.to_string()),
                    ))
                })
                .await?;
                return Err(err);
            }
        };

        let tx = self
            .mutate(user_id, |wallet| {
                wallet.credit_via(
                    amount,
                    description,
                    Some(method.to_string()),
                    Some(reference.clone()),
                )
            })
            .await?;

        self.count(&tx);
        self.events.publish(DomainEvent::PaymentApplied {
            ride_id: None,
            user_id,
            amount,
            reference,
            at: Utc::now(),
        });
        info!(user_id = %user_id, amount = %amount, tx_id = %tx.id, "wallet topped up");
        Ok(tx)
    }

    /// Newest first. `page` is 1-based.
    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        page: usize,
        size: usize,
    ) -> Result<TransactionPage, AppError> {
        if page == 0 {
            return Err(AppError::InvalidArgument("page starts at 1".to_string()));
        }
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(AppError::InvalidArgument(format!(
                "size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let wallet = self.repo.wallet_or_new(user_id).await?.value;
        let total = wallet.transactions.len();
        let transactions = wallet
            .transactions
            .into_iter()
            .rev()
            .skip((page - 1).saturating_mul(size))
            .take(size)
            .collect();

        Ok(TransactionPage {
            transactions,
            total,
            page,
            size,
        })
    }

    pub async fn transaction(&self, user_id: Uuid, tx_id: Uuid) -> Result<Transaction, AppError> {
        self.repo
            .wallet_or_new(user_id)
            .await?
            .value
            .transactions
            .into_iter()
            .find(|tx| tx.id == tx_id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {tx_id} not found")))
    }

    pub(crate) fn count(&self, tx: &Transaction) {
        let kind = match tx.kind {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
        };
        self.metrics
            .wallet_transactions_total
            .with_label_values(&[kind])
            .inc();
    }

    async fn mutate<T, F>(&self, user_id: Uuid, mut apply: F) -> Result<T, AppError>
    where
        F: FnMut(&mut Wallet) -> Result<T, AppError>,
    {
        let mut attempt = 0;
        loop {
            let Versioned { mut value, version } = self.repo.wallet_or_new(user_id).await?;
            let out = apply(&mut value)?;

            match self
                .repo
                .commit(vec![Mutation::update(Record::Wallet(value), version)])
                .await
            {
                Ok(()) => return Ok(out),
                Err(AppError::Conflict(reason)) if attempt < self.retries => {
                    attempt += 1;
                    debug!(user_id = %user_id, attempt, reason = %reason, "wallet commit raced, retrying");
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

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::WalletLedger;
    use crate::error::AppError;
    use crate::integrations::events::BroadcastSink;
    use crate::integrations::payment::{LoggingGateway, PaymentGateway, ProviderReference};
    use crate::models::wallet::{TransactionKind, TransactionStatus};
    use crate::observability::metrics::Metrics;
    use crate::store::{MemoryStore, Repository};

    struct DecliningGateway;

    #[async_trait]
    impl PaymentGateway for DecliningGateway {
        async fn charge_external(
            &self,
            _ride_id: Option<Uuid>,
            _amount: Decimal,
            _method: &str,
        ) -> Result<ProviderReference, AppError> {
            Err(AppError::PaymentFailed("card declined".to_string()))
        }
    }

    fn ledger_with(gateway: Arc<dyn PaymentGateway>) -> WalletLedger {
        let repo = Repository::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        WalletLedger::new(repo, gateway, Arc::new(BroadcastSink::new(16)), Metrics::new(), 3)
    }

    fn ledger() -> WalletLedger {
        ledger_with(Arc::new(LoggingGateway::default()))
    }

    #[tokio::test]
    async fn balance_opens_an_empty_wallet() {
        let ledger = ledger();
        let user = Uuid::new_v4();

        assert_eq!(ledger.balance(user).await.unwrap(), Decimal::ZERO);
        assert_eq!(ledger.balance(user).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn balance_equals_replay_of_the_log() {
        let ledger = ledger();
        let user = Uuid::new_v4();

        ledger.credit(user, dec!(500), "top up").await.unwrap();
        ledger.debit(user, dec!(120.75), None, "ride").await.unwrap();
        ledger.credit(user, dec!(10.25), "refund").await.unwrap();
        ledger.debit(user, dec!(89.50), None, "ride").await.unwrap();

        let page = ledger.list_transactions(user, 1, 100).await.unwrap();
        let replay = page.transactions.iter().fold(Decimal::ZERO, |acc, tx| match tx.kind {
            TransactionKind::Credit => acc + tx.amount,
            TransactionKind::Debit => acc - tx.amount,
        });

        assert_eq!(ledger.balance(user).await.unwrap(), dec!(300));
        assert_eq!(replay, dec!(300));
    }

    #[tokio::test]
    async fn overdraw_is_rejected_without_side_effects() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        ledger.credit(user, dec!(40), "top up").await.unwrap();

        let err = ledger.debit(user, dec!(40.01), None, "ride").await.unwrap_err();

        assert!(matches!(err, AppError::InsufficientFunds { .. }));
        assert_eq!(ledger.balance(user).await.unwrap(), dec!(40));
        assert_eq!(ledger.list_transactions(user, 1, 10).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn transactions_are_listed_newest_first_and_paged() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        for amount in 1..=5 {
            ledger.credit(user, Decimal::from(amount), "top up").await.unwrap();
        }

        let first = ledger.list_transactions(user, 1, 2).await.unwrap();
        let third = ledger.list_transactions(user, 3, 2).await.unwrap();

        assert_eq!(first.total, 5);
        assert_eq!(first.transactions[0].amount, dec!(5));
        assert_eq!(first.transactions[1].amount, dec!(4));
        assert_eq!(third.transactions.len(), 1);
        assert_eq!(third.transactions[0].amount, dec!(1));
        assert!(ledger.list_transactions(user, 0, 2).await.is_err());
        assert!(ledger.list_transactions(user, 1, 101).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_debits_never_overdraw() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        ledger.credit(user, dec!(100), "top up").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit(user, dec!(30), None, "ride").await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        let balance = ledger.balance(user).await.unwrap();
        assert!(succeeded <= 3);
        assert_eq!(balance, dec!(100) - dec!(30) * Decimal::from(succeeded));
        assert!(balance >= Decimal::ZERO);
    }

    #[tokio::test]
    async fn top_up_records_provider_reference() {
        let ledger = ledger();
        let user = Uuid::new_v4();

        let tx = ledger.top_up(user, dec!(250), "card", "Wallet recharge").await.unwrap();

        assert_eq!(tx.payment_method.as_deref(), Some("card"));
        assert!(tx.provider_reference.is_some());
        assert_eq!(ledger.transaction(user, tx.id).await.unwrap(), tx);
        assert_eq!(ledger.balance(user).await.unwrap(), dec!(250));
    }

    #[tokio::test]
    async fn declined_top_up_is_logged_but_moves_no_money() {
        let ledger = ledger_with(Arc::new(DecliningGateway));
        let user = Uuid::new_v4();

        let err = ledger.top_up(user, dec!(250), "card", "Wallet recharge").await.unwrap_err();

        assert!(matches!(err, AppError::PaymentFailed(_)));
        assert_eq!(ledger.balance(user).await.unwrap(), Decimal::ZERO);
        let page = ledger.list_transactions(user, 1, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.transactions[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn oversized_credit_is_rejected_before_charging() {
        let ledger = ledger_with(Arc::new(DecliningGateway));
        let user = Uuid::new_v4();
        ledger.credit(user, Decimal::MAX, "seed").await.unwrap();

        let credit = ledger.credit(user, Decimal::MAX, "seed").await.unwrap_err();
        assert!(matches!(credit, AppError::InvalidArgument(_)));

        // A declining gateway would answer PaymentFailed had it been called.
        let top_up = ledger.top_up(user, dec!(1), "card", "Wallet recharge").await.unwrap_err();
        assert!(matches!(top_up, AppError::InvalidArgument(_)));

        assert_eq!(ledger.balance(user).await.unwrap(), Decimal::MAX);
        assert_eq!(ledger.list_transactions(user, 1, 10).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn unknown_transaction_is_not_found() {
        let ledger = ledger();
        let err = ledger.transaction(Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}

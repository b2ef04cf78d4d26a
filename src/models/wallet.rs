use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionKind {
    Credit,
    Debit,
}

/// Failed entries are kept for audit and never count towards the balance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub ride_id: Option<Uuid>,
    pub status: TransactionStatus,
    pub description: String,
    pub payment_method: Option<String>,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub transactions: Vec<Transaction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: Decimal::ZERO,
            transactions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn credit(
        &mut self,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Result<Transaction, AppError> {
        self.credit_via(amount, description, None, None)
    }

    /// Credit funded through a payment method, keeping the provider's reference.
    pub fn credit_via(
        &mut self,
        amount: Decimal,
        description: impl Into<String>,
        payment_method: Option<String>,
        provider_reference: Option<String>,
    ) -> Result<Transaction, AppError> {
        ensure_positive(amount)?;
        let balance = self.balance_after_credit(amount)?;
        let mut tx = self.entry(TransactionKind::Credit, amount, None, description.into());
        tx.payment_method = payment_method;
        tx.provider_reference = provider_reference;
        self.balance = balance;
        self.push(tx.clone());
        Ok(tx)
    }

    /// Rejects the debit before touching the wallet if it would overdraw it.
    pub fn debit(
        &mut self,
        amount: Decimal,
        ride_id: Option<Uuid>,
        description: impl Into<String>,
    ) -> Result<Transaction, AppError> {
        ensure_positive(amount)?;
        if amount > self.balance {
            return Err(AppError::InsufficientFunds {
                balance: self.balance.to_string(),
                requested: amount.to_string(),
            });
        }

        let balance = self.balance.checked_sub(amount).ok_or_else(|| {
            AppError::InvalidArgument(format!("debit of {amount} is out of range"))
        })?;
        let mut tx = self.entry(TransactionKind::Debit, amount, ride_id, description.into());
        tx.payment_method = Some("wallet".to_string());
        self.balance = balance;
        self.push(tx.clone());
        Ok(tx)
    }

    /// Balance after crediting `amount`, refused when it would not fit.
    pub fn balance_after_credit(&self, amount: Decimal) -> Result<Decimal, AppError> {
        self.balance.checked_add(amount).ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "credit of {amount} would overflow the balance"
            ))
        })
    }

    /// Records an attempt that moved no money.
    pub fn record_failure(
        &mut self,
        kind: TransactionKind,
        amount: Decimal,
        description: impl Into<String>,
        payment_method: Option<String>,
    ) -> Transaction {
        let mut tx = self.entry(kind, amount, None, description.into());
        tx.status = TransactionStatus::Failed;
        tx.payment_method = payment_method;
        self.push(tx.clone());
        tx
    }

    /// Balance recomputed from the log.
    pub fn replayed_balance(&self) -> Decimal {
        self.transactions
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Completed)
            .fold(Decimal::ZERO, |acc, tx| match tx.kind {
                TransactionKind::Credit => acc + tx.amount,
                TransactionKind::Debit => acc - tx.amount,
            })
    }

    fn entry(
        &self,
        kind: TransactionKind,
        amount: Decimal,
        ride_id: Option<Uuid>,
        description: String,
    ) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            kind,
            amount,
            ride_id,
            status: TransactionStatus::Completed,
            description,
            payment_method: None,
            provider_reference: None,
            created_at: Utc::now(),
        }
    }

    fn push(&mut self, tx: Transaction) {
        self.updated_at = tx.created_at;
        self.transactions.push(tx);
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidArgument(format!(
            "amount must be > 0, got {amount}"
        )));
    }
    Ok(())
}

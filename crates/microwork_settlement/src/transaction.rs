//! Payout transaction processing.

use crate::account::{fail_account, transition_account};
use crate::error::{SettlementError, SettlementResult};
use crate::provider::PaymentProvider;
use crate::queue::{JobHandler, JobQueue};
use microwork_core::{
    AccountStatus, Credits, GlobalId, PaymentsTransactionRecord, Store, Timestamp,
    TransactionPurpose, TransactionStatus,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

/// Settlement currency.
pub const CURRENCY: &str = "INR";

/// Idempotency key for an account's verification payout.
///
/// Derived from the destination hash alone: one verification payout per
/// destination, no matter how often registration is replayed.
pub fn verification_idempotency_key(account_hash: &str) -> String {
    format!("{:x}", Sha256::digest(account_hash.as_bytes()))
}

/// Idempotency key for a settlement payout.
pub fn payment_idempotency_key(account_hash: &str, transaction_id: GlobalId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_hash.as_bytes());
    hasher.update(transaction_id.value().to_be_bytes());
    format!("{:x}", hasher.finalize())
}

/// A queued payout to execute against the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionJob {
    /// The transaction record to settle.
    pub transaction_id: GlobalId,
}

/// Records a payment of earned credits and queues it for settlement.
///
/// The balance is checked again at processing time; this upfront check stops
/// obviously bad requests before a record is written.
pub fn request_payment(
    store: &Store,
    queue: &JobQueue<TransactionJob>,
    account_id: GlobalId,
    amount: Credits,
) -> SettlementResult<PaymentsTransactionRecord> {
    let account = store.accounts.get(account_id)?;
    if account.status != AccountStatus::Verified {
        return Err(SettlementError::InvalidTransition {
            from: format!("{:?}", account.status),
            to: "payment".into(),
        });
    }
    let worker = store.workers.get(account.worker_id)?;
    if amount > worker.balance {
        return Err(SettlementError::InsufficientBalance {
            requested: amount,
            available: worker.balance,
        });
    }

    let inserted = store.transactions.insert(PaymentsTransactionRecord {
        id: GlobalId::from_value(0),
        box_id: account.box_id,
        worker_id: account.worker_id,
        account_id,
        amount,
        currency: CURRENCY.into(),
        purpose: TransactionPurpose::Payment,
        mode: account.mode,
        idempotency_key: String::new(),
        payout_id: None,
        status: TransactionStatus::Created,
        meta: json!({}),
        created_at: Timestamp::ZERO,
        last_updated_at: Timestamp::ZERO,
    })?;
    // The key covers the record's own ID, so it exists only after insert.
    let key = payment_idempotency_key(&account.hash, inserted.id);
    let queued = store.transactions.update(inserted.id, |t| {
        t.idempotency_key = key.clone();
        t.status = TransactionStatus::Queued;
    })?;
    queue.enqueue(TransactionJob {
        transaction_id: queued.id,
    })?;
    Ok(queued)
}

/// Executes queued payouts against the provider.
pub struct TransactionProcessor<P: PaymentProvider> {
    store: Arc<Store>,
    provider: Arc<P>,
}

impl<P: PaymentProvider> TransactionProcessor<P> {
    /// Creates a processor.
    pub fn new(store: Arc<Store>, provider: Arc<P>) -> Self {
        Self { store, provider }
    }
}

impl<P: PaymentProvider> JobHandler<TransactionJob> for TransactionProcessor<P> {
    /// Settles one transaction.
    ///
    /// Already-processed transactions are a no-op, and the provider replays
    /// by idempotency key, so at-least-once delivery cannot pay twice.
    fn process(&self, job: &TransactionJob) -> SettlementResult<()> {
        let store = &self.store;
        let tx = store.transactions.get(job.transaction_id)?;
        if tx.status == TransactionStatus::Processed {
            return Ok(());
        }

        let worker = store.workers.get(tx.worker_id)?;
        // Verification payouts are house money and bypass the balance check.
        if tx.purpose == TransactionPurpose::Payment && tx.amount > worker.balance {
            return Err(SettlementError::InsufficientBalance {
                requested: tx.amount,
                available: worker.balance,
            });
        }

        let account = store.accounts.get(tx.account_id)?;
        let fund_id = account
            .fund_id
            .clone()
            .ok_or_else(|| SettlementError::provider("fund account not registered"))?;

        let receipt =
            self.provider
                .create_transaction(&fund_id, tx.amount, tx.mode, &tx.idempotency_key)?;
        store.transactions.update(tx.id, |t| {
            t.payout_id = Some(receipt.payout_id.clone());
            t.status = receipt.status;
        })?;

        match tx.purpose {
            TransactionPurpose::Verification => {
                transition_account(
                    store,
                    tx.account_id,
                    AccountStatus::TransactionQueue,
                    AccountStatus::TransactionCreated,
                )?;
            }
            TransactionPurpose::Payment => {
                store.workers.update(tx.worker_id, |w| {
                    w.balance -= tx.amount;
                })?;
            }
        }

        info!(
            transaction_id = %tx.id,
            payout_id = receipt.payout_id,
            amount = tx.amount,
            purpose = ?tx.purpose,
            "payout settled"
        );
        Ok(())
    }

    /// Marks the transaction failed; a failed verification payout fails the
    /// account with it.
    fn on_terminal_failure(&self, job: &TransactionJob, error: &SettlementError) {
        let Ok(tx) = self.store.transactions.get(job.transaction_id) else {
            return;
        };
        let _ = self.store.transactions.update(tx.id, |t| {
            t.status = TransactionStatus::Failed;
        });
        if tx.purpose == TransactionPurpose::Verification {
            let _ = fail_account(&self.store, tx.account_id, &error.to_string());
        }
    }
}

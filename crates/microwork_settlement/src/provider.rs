//! Payment-provider abstraction.

use crate::error::{SettlementError, SettlementResult};
use microwork_core::{Credits, PaymentsAccountRecord, PayoutMode, TransactionStatus, WorkerRecord};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A provider-accepted payout.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutReceipt {
    /// Provider-side payout handle.
    pub payout_id: String,
    /// Status the provider reported on creation.
    pub status: TransactionStatus,
}

/// The external payment gateway.
///
/// Contacts and fund accounts are provider-side registrations of a worker
/// and one of their payout destinations. `create_transaction` must treat the
/// idempotency key as authoritative: a replayed key returns the original
/// payout and moves no money.
pub trait PaymentProvider: Send + Sync {
    /// Registers a worker as a provider contact, returning the contact ID.
    fn create_contact(&self, worker: &WorkerRecord) -> SettlementResult<String>;
    /// Registers a payout destination under a contact, returning the fund ID.
    fn create_fund_account(
        &self,
        contact_id: &str,
        account: &PaymentsAccountRecord,
    ) -> SettlementResult<String>;
    /// Creates a payout to a fund account under an idempotency key.
    fn create_transaction(
        &self,
        fund_id: &str,
        amount: Credits,
        mode: PayoutMode,
        idempotency_key: &str,
    ) -> SettlementResult<PayoutReceipt>;
}

/// In-memory provider for tests.
///
/// Tracks every registration, replays payouts by idempotency key, and fails
/// calls with queued errors before succeeding.
#[derive(Default)]
pub struct MockProvider {
    inner: Mutex<MockProviderInner>,
}

#[derive(Default)]
struct MockProviderInner {
    next_id: u64,
    contacts: u64,
    funds: u64,
    payouts: HashMap<String, PayoutReceipt>,
    fail_next: VecDeque<SettlementError>,
}

impl MockProvider {
    /// A provider that succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error; the next call consumes it instead of succeeding.
    pub fn fail_next(&self, error: SettlementError) {
        self.inner.lock().fail_next.push_back(error);
    }

    /// Number of contacts registered so far.
    pub fn contacts_created(&self) -> u64 {
        self.inner.lock().contacts
    }

    /// Number of fund accounts registered so far.
    pub fn funds_created(&self) -> u64 {
        self.inner.lock().funds
    }

    /// Number of distinct payouts created so far.
    pub fn payouts_created(&self) -> u64 {
        self.inner.lock().payouts.len() as u64
    }
}

impl PaymentProvider for MockProvider {
    fn create_contact(&self, _worker: &WorkerRecord) -> SettlementResult<String> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.fail_next.pop_front() {
            return Err(err);
        }
        inner.next_id += 1;
        inner.contacts += 1;
        Ok(format!("cont_{:06}", inner.next_id))
    }

    fn create_fund_account(
        &self,
        _contact_id: &str,
        _account: &PaymentsAccountRecord,
    ) -> SettlementResult<String> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.fail_next.pop_front() {
            return Err(err);
        }
        inner.next_id += 1;
        inner.funds += 1;
        Ok(format!("fa_{:06}", inner.next_id))
    }

    fn create_transaction(
        &self,
        _fund_id: &str,
        _amount: Credits,
        _mode: PayoutMode,
        idempotency_key: &str,
    ) -> SettlementResult<PayoutReceipt> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.fail_next.pop_front() {
            return Err(err);
        }
        if let Some(existing) = inner.payouts.get(idempotency_key) {
            return Ok(existing.clone());
        }
        inner.next_id += 1;
        let receipt = PayoutReceipt {
            payout_id: format!("pout_{:06}", inner.next_id),
            status: TransactionStatus::Processed,
        };
        inner
            .payouts
            .insert(idempotency_key.to_string(), receipt.clone());
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replayed_idempotency_keys_return_the_original_payout() {
        let provider = MockProvider::new();
        let first = provider
            .create_transaction("fa_1", 10.0, PayoutMode::Upi, "key-a")
            .unwrap();
        let replay = provider
            .create_transaction("fa_1", 10.0, PayoutMode::Upi, "key-a")
            .unwrap();
        assert_eq!(first, replay);
        assert_eq!(provider.payouts_created(), 1);

        let other = provider
            .create_transaction("fa_1", 10.0, PayoutMode::Upi, "key-b")
            .unwrap();
        assert_ne!(first.payout_id, other.payout_id);
        assert_eq!(provider.payouts_created(), 2);
    }
}

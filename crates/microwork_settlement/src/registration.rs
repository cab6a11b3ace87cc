//! Payout-account registration.
//!
//! Registering an account walks it from `Initialised` to `TransactionQueue`:
//! provider contact (cached on the worker), fund account, then a queued
//! verification payout. The worker later confirms the amount they received
//! to activate the account.

use crate::account::{fail_account, transition_account};
use crate::error::{SettlementError, SettlementResult};
use crate::provider::PaymentProvider;
use crate::queue::JobQueue;
use crate::transaction::{verification_idempotency_key, TransactionJob, CURRENCY};
use microwork_core::{
    AccountStatus, Credits, GlobalId, PaymentsAccountRecord, PaymentsTransactionRecord, Store,
    Timestamp, TransactionPurpose, TransactionStatus,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Credits paid out to verify a new destination.
pub const VERIFICATION_AMOUNT: Credits = 2.0;

/// Walks new accounts through provider registration.
pub struct RegistrationProcessor<P: PaymentProvider> {
    store: Arc<Store>,
    provider: Arc<P>,
    queue: Arc<JobQueue<TransactionJob>>,
}

impl<P: PaymentProvider> RegistrationProcessor<P> {
    /// Creates a processor that queues verification payouts on `queue`.
    pub fn new(store: Arc<Store>, provider: Arc<P>, queue: Arc<JobQueue<TransactionJob>>) -> Self {
        Self {
            store,
            provider,
            queue,
        }
    }

    /// Registers an `Initialised` account with the provider.
    ///
    /// Claiming the account (the `Initialised → Verification` transition)
    /// serializes racing registrations: the loser gets an error and the
    /// winner's progress is untouched. After the claim, any error re-fetches
    /// the account and fails it with the reason in its metadata, so a stuck
    /// registration is visible to the worker.
    pub fn register_account(&self, account_id: GlobalId) -> SettlementResult<PaymentsAccountRecord> {
        let account = transition_account(
            &self.store,
            account_id,
            AccountStatus::Initialised,
            AccountStatus::Verification,
        )?;
        match self.try_register(account) {
            Ok(account) => Ok(account),
            Err(err) => {
                fail_account(&self.store, account_id, &err.to_string())?;
                Err(err)
            }
        }
    }

    fn try_register(
        &self,
        account: PaymentsAccountRecord,
    ) -> SettlementResult<PaymentsAccountRecord> {
        let store = &self.store;
        let account_id = account.id;
        let worker = store.workers.get(account.worker_id)?;
        let contact_id = match cached_contact(&worker.payments_meta) {
            Some(existing) => existing,
            None => {
                let created = self.provider.create_contact(&worker)?;
                store.workers.update(worker.id, |w| {
                    merge_meta(&mut w.payments_meta, "contact_id", json!(created.clone()));
                })?;
                created
            }
        };

        let fund_id = self.provider.create_fund_account(&contact_id, &account)?;
        let account = store.accounts.update(account_id, |a| {
            a.fund_id = Some(fund_id.clone());
        })?;

        let tx = store.transactions.insert(PaymentsTransactionRecord {
            id: GlobalId::from_value(0),
            box_id: account.box_id,
            worker_id: account.worker_id,
            account_id,
            amount: VERIFICATION_AMOUNT,
            currency: CURRENCY.into(),
            purpose: TransactionPurpose::Verification,
            mode: account.mode,
            idempotency_key: verification_idempotency_key(&account.hash),
            payout_id: None,
            status: TransactionStatus::Queued,
            meta: json!({}),
            created_at: Timestamp::ZERO,
            last_updated_at: Timestamp::ZERO,
        })?;
        self.queue.enqueue(TransactionJob {
            transaction_id: tx.id,
        })?;

        let queued = transition_account(
            store,
            account_id,
            AccountStatus::Verification,
            AccountStatus::TransactionQueue,
        )?;
        info!(%account_id, transaction_id = %tx.id, "verification payout queued");
        Ok(queued)
    }
}

/// Applies the worker's report of the verification amount they received.
///
/// A correct amount activates the account; a wrong one rejects it for good
/// (the destination evidently belongs to someone else).
pub fn confirm_account(
    store: &Store,
    account_id: GlobalId,
    reported_amount: Credits,
) -> SettlementResult<PaymentsAccountRecord> {
    transition_account(
        store,
        account_id,
        AccountStatus::TransactionCreated,
        AccountStatus::ConfirmationReceived,
    )?;

    let verification = store
        .transactions
        .filter(|t| {
            t.account_id == account_id && t.purpose == TransactionPurpose::Verification
        })
        .into_iter()
        .max_by_key(|t| t.created_at)
        .ok_or_else(|| SettlementError::provider("no verification payout on record"))?;

    let target = if reported_amount == verification.amount {
        AccountStatus::Verified
    } else {
        AccountStatus::Rejected
    };
    transition_account(store, account_id, AccountStatus::ConfirmationReceived, target)
}

fn cached_contact(meta: &Value) -> Option<String> {
    meta.get("contact_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn merge_meta(meta: &mut Value, key: &str, value: Value) {
    match meta {
        Value::Object(map) => {
            map.insert(key.into(), value);
        }
        other => {
            *other = json!({ key: value });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use crate::queue::RetryPolicy;
    use crate::transaction::TransactionProcessor;
    use microwork_testkit::{account, worker};

    struct Fixture {
        store: Arc<Store>,
        provider: Arc<MockProvider>,
        queue: Arc<JobQueue<TransactionJob>>,
        registration: RegistrationProcessor<MockProvider>,
        worker_id: GlobalId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::center());
        let w = store.workers.insert(worker(None, &[])).unwrap();
        let provider = Arc::new(MockProvider::new());
        let queue = Arc::new(JobQueue::new());
        Fixture {
            registration: RegistrationProcessor::new(
                store.clone(),
                provider.clone(),
                queue.clone(),
            ),
            store,
            provider,
            queue,
            worker_id: w.id,
        }
    }

    fn new_account(fx: &Fixture) -> PaymentsAccountRecord {
        fx.store.accounts.insert(account(fx.worker_id, None)).unwrap()
    }

    #[test]
    fn full_registration_reaches_transaction_queue() {
        let fx = fixture();
        let acc = new_account(&fx);

        let registered = fx.registration.register_account(acc.id).unwrap();
        assert_eq!(registered.status, AccountStatus::TransactionQueue);
        assert!(registered.fund_id.is_some());

        let txs = fx.store.transactions.all();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].purpose, TransactionPurpose::Verification);
        assert_eq!(txs[0].amount, VERIFICATION_AMOUNT);
        assert_eq!(
            txs[0].idempotency_key,
            verification_idempotency_key(&acc.hash)
        );

        // The contact is cached on the worker for the next account.
        let meta = fx.store.workers.get(fx.worker_id).unwrap().payments_meta;
        assert!(meta["contact_id"].as_str().is_some());
    }

    #[test]
    fn second_account_reuses_the_cached_contact() {
        let fx = fixture();
        let first = new_account(&fx);
        fx.registration.register_account(first.id).unwrap();

        let mut other = account(fx.worker_id, None);
        other.hash = "acct-hash-5678".into();
        let other = fx.store.accounts.insert(other).unwrap();
        fx.registration.register_account(other.id).unwrap();

        assert_eq!(fx.provider.contacts_created(), 1);
        assert_eq!(fx.provider.funds_created(), 2);
    }

    #[test]
    fn provider_failure_fails_the_account_with_a_reason() {
        let fx = fixture();
        let acc = new_account(&fx);
        fx.provider
            .fail_next(SettlementError::provider("contact rejected"));

        assert!(fx.registration.register_account(acc.id).is_err());
        let failed = fx.store.accounts.get(acc.id).unwrap();
        assert_eq!(failed.status, AccountStatus::Failed);
        assert!(failed.meta["failure_reason"]
            .as_str()
            .unwrap()
            .contains("contact rejected"));
    }

    #[test]
    fn replayed_registration_is_rejected_by_the_lifecycle() {
        let fx = fixture();
        let acc = new_account(&fx);
        fx.registration.register_account(acc.id).unwrap();

        let err = fx.registration.register_account(acc.id).unwrap_err();
        assert!(matches!(err, SettlementError::InvalidTransition { .. }));
        // The failed replay must not clobber the in-flight registration.
        assert_eq!(
            fx.store.accounts.get(acc.id).unwrap().status,
            AccountStatus::TransactionQueue
        );
    }

    #[test]
    fn confirmation_activates_or_rejects_on_the_reported_amount() {
        let fx = fixture();
        let processor = TransactionProcessor::new(fx.store.clone(), fx.provider.clone());

        let acc = new_account(&fx);
        fx.registration.register_account(acc.id).unwrap();
        fx.queue.drain(&processor, &RetryPolicy::no_retry()).unwrap();
        assert_eq!(
            fx.store.accounts.get(acc.id).unwrap().status,
            AccountStatus::TransactionCreated
        );

        let verified = confirm_account(&fx.store, acc.id, VERIFICATION_AMOUNT).unwrap();
        assert_eq!(verified.status, AccountStatus::Verified);

        // A second account confirmed with the wrong amount is rejected.
        let mut other = account(fx.worker_id, None);
        other.hash = "acct-hash-9999".into();
        let other = fx.store.accounts.insert(other).unwrap();
        fx.registration.register_account(other.id).unwrap();
        fx.queue.drain(&processor, &RetryPolicy::no_retry()).unwrap();
        let rejected = confirm_account(&fx.store, other.id, 99.0).unwrap();
        assert_eq!(rejected.status, AccountStatus::Rejected);
    }
}

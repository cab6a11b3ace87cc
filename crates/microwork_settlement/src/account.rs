//! Account lifecycle transitions.
//!
//! Every status change goes through a compare-and-swap against the stored
//! status, under the account table's write lock, so two processors racing on
//! the same account cannot both win a transition.

use crate::error::{SettlementError, SettlementResult};
use microwork_core::{AccountStatus, GlobalId, PaymentsAccountRecord, Store};
use serde_json::{json, Value};
use tracing::warn;

/// Whether the lifecycle allows moving from `from` to `to`.
///
/// The forward chain is strict; `Failed` is reachable from any non-terminal
/// state, `Rejected` from any non-terminal state (the worker can refuse at
/// any point before activation).
pub fn transition_allowed(from: AccountStatus, to: AccountStatus) -> bool {
    use AccountStatus::*;
    if from.is_terminal() {
        return false;
    }
    match to {
        Failed | Rejected => true,
        Verification => from == Initialised,
        TransactionQueue => from == Verification,
        TransactionCreated => from == TransactionQueue,
        ConfirmationReceived => from == TransactionCreated,
        Verified => from == ConfirmationReceived,
        Initialised => false,
    }
}

/// Moves an account from `from` to `to`, failing if it is in any other state.
///
/// The check and the write happen in one critical section; a losing racer
/// observes the winner's status in the error.
pub fn transition_account(
    store: &Store,
    account_id: GlobalId,
    from: AccountStatus,
    to: AccountStatus,
) -> SettlementResult<PaymentsAccountRecord> {
    if !transition_allowed(from, to) {
        return Err(SettlementError::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        });
    }
    let (account, swapped) = store.accounts.update_if(
        account_id,
        |account| account.status == from,
        |account| account.status = to,
    )?;
    if !swapped {
        return Err(SettlementError::InvalidTransition {
            from: format!("{:?}", account.status),
            to: format!("{to:?}"),
        });
    }
    Ok(account)
}

/// Marks an account `Failed`, recording the reason in its metadata.
///
/// The account is re-fetched inside the write, so a status raced to terminal
/// in the meantime is left alone.
pub fn fail_account(
    store: &Store,
    account_id: GlobalId,
    reason: &str,
) -> SettlementResult<PaymentsAccountRecord> {
    warn!(%account_id, reason, "failing payout account");
    let updated = store.accounts.update(account_id, |account| {
        if !account.status.is_terminal() {
            account.status = AccountStatus::Failed;
        }
        match &mut account.meta {
            Value::Object(map) => {
                map.insert("failure_reason".into(), json!(reason));
            }
            other => {
                *other = json!({ "failure_reason": reason });
            }
        }
    })?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use microwork_testkit::{account, worker};

    fn stored_account(store: &Store) -> PaymentsAccountRecord {
        let w = store.workers.insert(worker(None, &[])).unwrap();
        store.accounts.insert(account(w.id, None)).unwrap()
    }

    #[test]
    fn forward_chain_is_strict() {
        use AccountStatus::*;
        assert!(transition_allowed(Initialised, Verification));
        assert!(transition_allowed(Verification, TransactionQueue));
        assert!(transition_allowed(ConfirmationReceived, Verified));
        assert!(!transition_allowed(Initialised, TransactionQueue));
        assert!(!transition_allowed(Verified, Verification));
        assert!(!transition_allowed(Failed, Verification));
        // Terminal states are reachable from anywhere non-terminal.
        assert!(transition_allowed(Initialised, Failed));
        assert!(transition_allowed(TransactionCreated, Rejected));
    }

    #[test]
    fn cas_rejects_a_mismatched_stored_status() {
        let store = Store::center();
        let acc = stored_account(&store);

        transition_account(&store, acc.id, AccountStatus::Initialised, AccountStatus::Verification)
            .unwrap();

        // The account already moved on; the replayed transition loses even
        // though the stored status already equals the target.
        let err = transition_account(
            &store,
            acc.id,
            AccountStatus::Initialised,
            AccountStatus::Verification,
        )
        .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidTransition { .. }));
    }

    #[test]
    fn losing_racer_does_not_touch_the_record() {
        let store = Store::center();
        let acc = stored_account(&store);

        let winner = transition_account(
            &store,
            acc.id,
            AccountStatus::Initialised,
            AccountStatus::Verification,
        )
        .unwrap();

        transition_account(&store, acc.id, AccountStatus::Initialised, AccountStatus::Verification)
            .unwrap_err();

        // No status change and no update stamp: the loser must not push the
        // record back into the sync window.
        let stored = store.accounts.get(acc.id).unwrap();
        assert_eq!(stored.status, AccountStatus::Verification);
        assert_eq!(stored.last_updated_at, winner.last_updated_at);
    }

    #[test]
    fn failing_an_account_merges_the_reason_and_spares_terminal_states() {
        let store = Store::center();
        let acc = stored_account(&store);

        let failed = fail_account(&store, acc.id, "provider rejected the fund account").unwrap();
        assert_eq!(failed.status, AccountStatus::Failed);
        assert_eq!(
            failed.meta["failure_reason"],
            "provider rejected the fund account"
        );

        // A second failure does not resurrect or re-transition the account.
        let again = fail_account(&store, acc.id, "later error").unwrap();
        assert_eq!(again.status, AccountStatus::Failed);
        assert_eq!(again.meta["failure_reason"], "later error");
    }
}

//! The edge-side sync state machine.
//!
//! A cycle is checkin, push, pull, in that order. Each watermark advances
//! only after the other side has fully acknowledged (push) or the batch has
//! been fully applied (pull), so a cycle that dies mid-way re-ships the same
//! window on the next attempt and stale-rejection absorbs the replay.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use microwork_core::{BoxRecord, CoreError, GlobalId, Store, Timestamp};
use microwork_sync_protocol::{edge_changes, CheckinRequest, PullRequest, PushRequest};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Phase of the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle has run yet.
    Idle,
    /// Opening a cycle against the center.
    CheckingIn,
    /// Shipping edge records to the center.
    Pushing,
    /// Fetching and applying center records.
    Pulling,
    /// Last cycle finished cleanly.
    Synced,
    /// Waiting out a backoff delay between attempts.
    RetryWait,
    /// Last cycle failed.
    Error,
}

impl SyncState {
    /// True when a new cycle may begin from this state.
    pub fn can_start_sync(self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }

    /// True while a cycle is in flight.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SyncState::CheckingIn | SyncState::Pushing | SyncState::Pulling | SyncState::RetryWait
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::CheckingIn => "checking_in",
            SyncState::Pushing => "pushing",
            SyncState::Pulling => "pulling",
            SyncState::Synced => "synced",
            SyncState::RetryWait => "retry_wait",
            SyncState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Running totals across cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Cycles that finished cleanly.
    pub cycles_completed: u64,
    /// Cycles that ended in an error.
    pub cycles_failed: u64,
    /// Records shipped to the center.
    pub records_pushed: u64,
    /// Records the center refused as stale.
    pub push_rejected: u64,
    /// Records applied from the center.
    pub records_pulled: u64,
    /// Pulled records skipped as stale.
    pub pull_skipped: u64,
}

/// Outcome of one clean cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCycleResult {
    /// Records shipped to the center.
    pub pushed: usize,
    /// Records the center refused as stale.
    pub push_rejected: usize,
    /// Records applied from the center.
    pub pulled: usize,
    /// Pulled records skipped as stale.
    pub pull_skipped: usize,
}

/// Drives sync cycles for one edge store.
pub struct SyncEngine<T: SyncTransport> {
    store: Arc<Store>,
    transport: T,
    config: SyncConfig,
    box_record_id: GlobalId,
    state: Mutex<SyncState>,
    stats: Mutex<SyncStats>,
    cancelled: AtomicBool,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates an engine over an edge store.
    ///
    /// The store's box record (holding the watermarks) is created at zero
    /// watermarks if absent.
    pub fn new(store: Arc<Store>, transport: T, config: SyncConfig) -> SyncResult<Self> {
        let box_record_id = match store
            .boxes
            .filter(|b| b.box_id == config.box_id)
            .into_iter()
            .next()
        {
            Some(existing) => existing.id,
            None => {
                store
                    .boxes
                    .insert(BoxRecord {
                        id: GlobalId::from_value(0),
                        box_id: config.box_id,
                        name: format!("box-{}", config.box_id),
                        last_sent_at: Timestamp::ZERO,
                        last_received_at: Timestamp::ZERO,
                        created_at: Timestamp::ZERO,
                        last_updated_at: Timestamp::ZERO,
                    })?
                    .id
            }
        };
        Ok(Self {
            store,
            transport,
            config,
            box_record_id,
            state: Mutex::new(SyncState::Idle),
            stats: Mutex::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Current state machine phase.
    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Running totals across cycles.
    pub fn stats(&self) -> SyncStats {
        *self.stats.lock()
    }

    /// Requests cancellation.
    ///
    /// The in-flight (or next) cycle stops at its next phase boundary with
    /// [`SyncError::Cancelled`]; watermarks stay wherever the last completed
    /// phase left them. Observing the cancellation consumes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Runs one full cycle: checkin, push, pull.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        {
            let mut state = self.state.lock();
            if !state.can_start_sync() {
                return Err(SyncError::InvalidStateTransition {
                    from: state.to_string(),
                    to: SyncState::CheckingIn.to_string(),
                });
            }
            *state = SyncState::CheckingIn;
        }

        match self.run_cycle() {
            Ok(result) => {
                let mut stats = self.stats.lock();
                stats.cycles_completed += 1;
                stats.records_pushed += result.pushed as u64;
                stats.push_rejected += result.push_rejected as u64;
                stats.records_pulled += result.pulled as u64;
                stats.pull_skipped += result.pull_skipped as u64;
                *self.state.lock() = SyncState::Synced;
                info!(
                    box_id = %self.config.box_id,
                    pushed = result.pushed,
                    pulled = result.pulled,
                    "sync cycle complete"
                );
                Ok(result)
            }
            Err(err) => {
                self.stats.lock().cycles_failed += 1;
                *self.state.lock() = SyncState::Error;
                warn!(box_id = %self.config.box_id, error = %err, "sync cycle failed");
                Err(err)
            }
        }
    }

    /// Runs [`sync`](Self::sync) with exponential backoff on retryable errors.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let retry = self.config.retry.clone();
        let mut last_err = SyncError::transport_fatal("no attempts configured");
        for attempt in 0..retry.max_attempts {
            let delay = retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                *self.state.lock() = SyncState::RetryWait;
                thread::sleep(delay);
                *self.state.lock() = SyncState::Error;
            }
            match self.sync() {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                    debug!(attempt, error = %err, "retryable sync failure");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    fn run_cycle(&self) -> SyncResult<SyncCycleResult> {
        self.check_cancelled()?;
        self.transport.checkin(CheckinRequest {
            box_id: self.config.box_id,
        })?;

        self.check_cancelled()?;
        *self.state.lock() = SyncState::Pushing;
        let (pushed, push_rejected) = self.push_phase()?;

        self.check_cancelled()?;
        *self.state.lock() = SyncState::Pulling;
        let (pulled, pull_skipped) = self.pull_phase()?;

        Ok(SyncCycleResult {
            pushed,
            push_rejected,
            pulled,
            pull_skipped,
        })
    }

    /// Ships records changed in `(last_sent_at, send_time]` and advances the
    /// send watermark once the center acknowledges the whole batch.
    fn push_phase(&self) -> SyncResult<(usize, usize)> {
        let watermark = self.store.boxes.get(self.box_record_id)?.last_sent_at;
        // A concurrent local write stamped in the same microsecond as the
        // window close could land after its table was scanned and then
        // vanish behind the advanced watermark. Waiting out the current
        // microsecond before scanning puts every later write strictly past
        // `send_time`, so it ships next cycle instead.
        let send_time = Timestamp::now();
        while Timestamp::now() <= send_time {
            std::hint::spin_loop();
        }
        let records = edge_changes(&self.store, watermark, send_time);
        let count = records.len();
        debug!(count, from = %watermark, to = %send_time, "pushing edge changes");

        let response = self.transport.push(PushRequest {
            box_id: self.config.box_id,
            sent_at: send_time,
            records,
        })?;

        // Stale rejections mean the center already holds these versions;
        // the batch still counts as delivered.
        self.store.boxes.update(self.box_record_id, |b| {
            b.last_sent_at = send_time;
        })?;
        Ok((count, response.rejected.len()))
    }

    /// Applies center records since `last_received_at` and advances the
    /// receive watermark once the whole batch is in.
    fn pull_phase(&self) -> SyncResult<(usize, usize)> {
        let since = self.store.boxes.get(self.box_record_id)?.last_received_at;
        let response = self.transport.pull(PullRequest {
            box_id: self.config.box_id,
            since,
        })?;

        let mut applied = 0;
        let mut skipped = 0;
        for record in &response.records {
            match record.upsert_into(&self.store) {
                Ok(_) => applied += 1,
                Err(CoreError::StaleUpdate { .. }) => skipped += 1,
                Err(err) => return Err(err.into()),
            }
        }

        self.store.boxes.update(self.box_record_id, |b| {
            b.last_received_at = response.server_time;
        })?;
        debug!(applied, skipped, "pull applied");
        Ok((applied, skipped))
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

//! Transport abstraction between an edge and the center.

use crate::error::{SyncError, SyncResult};
use microwork_core::Timestamp;
use microwork_sync_protocol::{
    CheckinRequest, CheckinResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    SyncRecord,
};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Carries sync requests from an edge to the center.
///
/// Implementations own retryability classification: a [`SyncError::Transport`]
/// with `retryable: true` tells the engine the cycle may be re-attempted.
pub trait SyncTransport: Send + Sync {
    /// Opens a sync cycle.
    fn checkin(&self, request: CheckinRequest) -> SyncResult<CheckinResponse>;
    /// Delivers a batch of edge records.
    fn push(&self, request: PushRequest) -> SyncResult<PushResponse>;
    /// Fetches center records for the edge.
    fn pull(&self, request: PullRequest) -> SyncResult<PullResponse>;
}

/// Scripted transport for engine tests.
///
/// Records every push it receives, serves a configurable pull batch, and
/// fails individual operations with queued errors before succeeding.
#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<MockInner>,
}

#[derive(Default)]
struct MockInner {
    fail_checkin: VecDeque<SyncError>,
    fail_push: VecDeque<SyncError>,
    fail_pull: VecDeque<SyncError>,
    pull_records: Vec<SyncRecord>,
    pushes: Vec<PushRequest>,
}

impl MockTransport {
    /// A transport that succeeds with empty responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error for the next checkin.
    pub fn fail_next_checkin(&self, error: SyncError) {
        self.inner.lock().fail_checkin.push_back(error);
    }

    /// Queues an error for the next push.
    pub fn fail_next_push(&self, error: SyncError) {
        self.inner.lock().fail_push.push_back(error);
    }

    /// Queues an error for the next pull.
    pub fn fail_next_pull(&self, error: SyncError) {
        self.inner.lock().fail_pull.push_back(error);
    }

    /// Sets the records every pull will return.
    pub fn serve_on_pull(&self, records: Vec<SyncRecord>) {
        self.inner.lock().pull_records = records;
    }

    /// Push requests received so far.
    pub fn pushes(&self) -> Vec<PushRequest> {
        self.inner.lock().pushes.clone()
    }
}

impl SyncTransport for MockTransport {
    fn checkin(&self, _request: CheckinRequest) -> SyncResult<CheckinResponse> {
        if let Some(err) = self.inner.lock().fail_checkin.pop_front() {
            return Err(err);
        }
        Ok(CheckinResponse {
            server_time: Timestamp::now(),
        })
    }

    fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.fail_push.pop_front() {
            return Err(err);
        }
        let applied = request.records.len() as u64;
        inner.pushes.push(request);
        Ok(PushResponse {
            applied,
            rejected: Vec::new(),
        })
    }

    fn pull(&self, _request: PullRequest) -> SyncResult<PullResponse> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.fail_pull.pop_front() {
            return Err(err);
        }
        Ok(PullResponse {
            records: inner.pull_records.clone(),
            server_time: Timestamp::now(),
        })
    }
}

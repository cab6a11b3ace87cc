//! Center-side handling of edge sync requests.
//!
//! The center applies pushed records by stale-rejecting upsert, runs the
//! verification policy over submissions it has not seen before, and serves
//! pulls scoped to the requesting edge's affiliation.

use crate::error::SyncResult;
use crate::transport::SyncTransport;
use microwork_core::{
    AssignmentStatus, GlobalId, MicrotaskAssignmentRecord, Store, Timestamp,
};
use microwork_policy::CompletionHandler;
use microwork_sync_protocol::{
    CheckinRequest, CheckinResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    StaleRejection, SyncRecord,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

fn is_submitted(status: AssignmentStatus) -> bool {
    matches!(status, AssignmentStatus::Completed | AssignmentStatus::Verified)
}

/// Serves sync requests against the center store.
pub struct CenterHandler {
    store: Arc<Store>,
    completion: CompletionHandler,
}

impl CenterHandler {
    /// Creates a handler with the default completion pipeline.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            completion: CompletionHandler::new(),
        }
    }

    /// The center store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Acknowledges an edge checkin.
    pub fn checkin(&self, request: CheckinRequest) -> CheckinResponse {
        debug!(box_id = %request.box_id, "edge checked in");
        CheckinResponse {
            server_time: Timestamp::now(),
        }
    }

    /// Applies a pushed batch and runs verification over new submissions.
    ///
    /// A submission is new when the stored assignment (if any) was not yet
    /// in a submitted state; replays land as stale rejections and never
    /// reach the policy again.
    pub fn handle_push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        let mut applied = 0u64;
        let mut rejected = Vec::new();
        let mut new_submissions: BTreeMap<GlobalId, Vec<MicrotaskAssignmentRecord>> =
            BTreeMap::new();

        for record in &request.records {
            let previously_submitted = match record {
                SyncRecord::Assignment(a) => self
                    .store
                    .assignments
                    .try_get(a.id)
                    .map(|prior| is_submitted(prior.status))
                    .unwrap_or(false),
                _ => false,
            };
            match record.upsert_into(&self.store) {
                Ok(_) => {
                    applied += 1;
                    if let SyncRecord::Assignment(a) = record {
                        if is_submitted(a.status) && !previously_submitted {
                            new_submissions.entry(a.task_id).or_default().push(a.clone());
                        }
                    }
                }
                Err(err) => match StaleRejection::from_error(&err) {
                    Some(rejection) => rejected.push(rejection),
                    None => return Err(err.into()),
                },
            }
        }

        for (task_id, batch) in new_submissions {
            let task = self.store.tasks.get(task_id)?;
            let summary = self
                .completion
                .handle_newly_completed(&self.store, &task, &batch)?;
            info!(
                box_id = %request.box_id,
                %task_id,
                submissions = batch.len(),
                verified = summary.verified,
                completed = summary.completed,
                "processed pushed submissions"
            );
        }

        Ok(PushResponse { applied, rejected })
    }

    /// Serves records changed in `(since, server_time]` for one edge.
    ///
    /// The window covers the edge's workers, the tasks assigned to it with
    /// their groups and microtasks, and the edge's own assignments, accounts,
    /// and transactions (which come back verified or settled).
    pub fn handle_pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
        let server_time = Timestamp::now();
        let since = request.since;
        let for_box = request.box_id;
        let in_window = |t: Timestamp| t > since && t <= server_time;

        let tasks = self.store.tasks.filter(|t| t.assigned_boxes.contains(&for_box));
        let task_ids: BTreeSet<GlobalId> = tasks.iter().map(|t| t.id).collect();

        let mut records = Vec::new();
        records.extend(
            tasks
                .into_iter()
                .filter(|t| in_window(t.last_updated_at))
                .map(SyncRecord::Task),
        );
        records.extend(
            self.store
                .groups
                .filter(|g| task_ids.contains(&g.task_id) && in_window(g.last_updated_at))
                .into_iter()
                .map(SyncRecord::Group),
        );
        records.extend(
            self.store
                .microtasks
                .filter(|m| task_ids.contains(&m.task_id) && in_window(m.last_updated_at))
                .into_iter()
                .map(SyncRecord::Microtask),
        );
        records.extend(
            self.store
                .workers
                .filter(|w| w.box_id == Some(for_box) && in_window(w.last_updated_at))
                .into_iter()
                .map(SyncRecord::Worker),
        );
        records.extend(
            self.store
                .assignments
                .filter(|a| a.box_id == Some(for_box) && in_window(a.last_updated_at))
                .into_iter()
                .map(SyncRecord::Assignment),
        );
        records.extend(
            self.store
                .group_assignments
                .filter(|ga| ga.box_id == Some(for_box) && in_window(ga.last_updated_at))
                .into_iter()
                .map(SyncRecord::GroupAssignment),
        );
        records.extend(
            self.store
                .accounts
                .filter(|acc| acc.box_id == Some(for_box) && in_window(acc.last_updated_at))
                .into_iter()
                .map(SyncRecord::Account),
        );
        records.extend(
            self.store
                .transactions
                .filter(|tx| tx.box_id == Some(for_box) && in_window(tx.last_updated_at))
                .into_iter()
                .map(SyncRecord::Transaction),
        );

        debug!(box_id = %for_box, count = records.len(), "serving pull");
        Ok(PullResponse {
            records,
            server_time,
        })
    }
}

/// In-process transport wiring an edge engine straight to a center handler.
pub struct LoopbackTransport {
    center: Arc<CenterHandler>,
}

impl LoopbackTransport {
    /// Wraps a center handler.
    pub fn new(center: Arc<CenterHandler>) -> Self {
        Self { center }
    }
}

impl SyncTransport for LoopbackTransport {
    fn checkin(&self, request: CheckinRequest) -> SyncResult<CheckinResponse> {
        Ok(self.center.checkin(request))
    }

    fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        self.center.handle_push(request)
    }

    fn pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
        self.center.handle_pull(request)
    }
}

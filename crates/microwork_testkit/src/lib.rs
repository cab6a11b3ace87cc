//! # Microwork Testkit
//!
//! Record builders and store fixtures shared by tests across the workspace.
//! Builders produce unsaved records with sensible defaults; IDs and
//! timestamps are filled in by the store on insert.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use microwork_core::{
    AccountDetails, AccountStatus, AssignmentGranularity, AssignmentOrder, BoxId, BoxRecord,
    Credits, GlobalId, GroupStatus, MicrotaskGroupRecord, MicrotaskRecord, MicrotaskStatus,
    Payload, PaymentsAccountRecord, PayoutMode, PolicyKind, PolicyParams, ScenarioKind,
    TaskRecord, TaskStatus, Timestamp, WorkerRecord,
};
use serde_json::json;

/// Builder for [`TaskRecord`] fixtures.
pub struct TaskBuilder {
    task: TaskRecord,
}

impl TaskBuilder {
    /// Starts a microtask-granular speech task with the given policy.
    pub fn new(policy: PolicyKind, n: u32) -> Self {
        Self {
            task: TaskRecord {
                id: GlobalId::from_value(0),
                name: "test task".into(),
                scenario: ScenarioKind::SpeechData,
                status: TaskStatus::Assigned,
                assignment_granularity: AssignmentGranularity::Microtask,
                group_assignment_order: AssignmentOrder::Sequential,
                microtask_assignment_order: AssignmentOrder::Sequential,
                policy,
                policy_params: PolicyParams::with_n(n),
                input_tags: Vec::new(),
                worker_group: None,
                assigned_boxes: Vec::new(),
                assignment_batch_size: 1000,
                created_at: Timestamp::ZERO,
                last_updated_at: Timestamp::ZERO,
            },
        }
    }

    /// Sets the assignment granularity.
    pub fn granularity(mut self, granularity: AssignmentGranularity) -> Self {
        self.task.assignment_granularity = granularity;
        self
    }

    /// Sets the group assignment order.
    pub fn group_order(mut self, order: AssignmentOrder) -> Self {
        self.task.group_assignment_order = order;
        self
    }

    /// Sets the microtask assignment order.
    pub fn microtask_order(mut self, order: AssignmentOrder) -> Self {
        self.task.microtask_assignment_order = order;
        self
    }

    /// Assigns the task to an edge.
    pub fn on_box(mut self, box_id: BoxId) -> Self {
        self.task.assigned_boxes.push(box_id);
        self
    }

    /// Requires worker tags.
    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.task.input_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Caps microtasks per worker.
    pub fn max_per_worker(mut self, cap: u32) -> Self {
        self.task.policy_params.max_per_worker = Some(cap);
        self
    }

    /// Sets the per-call batch size.
    pub fn batch_size(mut self, size: u32) -> Self {
        self.task.assignment_batch_size = size;
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> TaskRecord {
        self.task
    }
}

/// An unsaved worker with the given affiliation and tags.
pub fn worker(box_id: Option<BoxId>, tags: &[&str]) -> WorkerRecord {
    WorkerRecord {
        id: GlobalId::from_value(0),
        box_id,
        phone_number: Some("9999999999".into()),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        worker_group: None,
        balance: 0.0,
        selected_account: None,
        payments_meta: json!({}),
        created_at: Timestamp::ZERO,
        last_updated_at: Timestamp::ZERO,
    }
}

/// An unsaved box record for an edge.
pub fn edge_box(box_id: BoxId) -> BoxRecord {
    BoxRecord {
        id: GlobalId::from_value(0),
        box_id,
        name: format!("box-{box_id}"),
        last_sent_at: Timestamp::ZERO,
        last_received_at: Timestamp::ZERO,
        created_at: Timestamp::ZERO,
        last_updated_at: Timestamp::ZERO,
    }
}

/// An unsaved microtask under a task.
pub fn microtask(task_id: GlobalId, credits: Credits) -> MicrotaskRecord {
    MicrotaskRecord {
        id: GlobalId::from_value(0),
        task_id,
        group_id: None,
        status: MicrotaskStatus::Incomplete,
        credits,
        deadline: None,
        input: Payload::new(ScenarioKind::SpeechData, json!({"sentence": "bol"})),
        output: None,
        created_at: Timestamp::ZERO,
        last_updated_at: Timestamp::ZERO,
    }
}

/// An unsaved microtask group carrying an aggregate credit total.
pub fn group(task_id: GlobalId, credits: Credits) -> MicrotaskGroupRecord {
    MicrotaskGroupRecord {
        id: GlobalId::from_value(0),
        task_id,
        status: GroupStatus::Incomplete,
        credits,
        created_at: Timestamp::ZERO,
        last_updated_at: Timestamp::ZERO,
    }
}

/// A worker-submitted response payload.
pub fn response(text: &str) -> Payload {
    Payload::new(ScenarioKind::SpeechData, json!({ "transcript": text }))
}

/// An unsaved payout account for a worker.
pub fn account(worker_id: GlobalId, box_id: Option<BoxId>) -> PaymentsAccountRecord {
    let details = AccountDetails {
        name: "Test Worker".into(),
        masked_id: "XXXX1234".into(),
    };
    PaymentsAccountRecord {
        id: GlobalId::from_value(0),
        box_id,
        worker_id,
        mode: PayoutMode::BankTransfer,
        details,
        hash: "acct-hash-1234".into(),
        fund_id: None,
        status: AccountStatus::Initialised,
        meta: json!({}),
        created_at: Timestamp::ZERO,
        last_updated_at: Timestamp::ZERO,
    }
}

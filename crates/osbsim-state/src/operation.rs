//! Simulated lifecycle operations.
//!
//! An [`Operation`] is one create/update/delete transition of a resource.
//! Each resource owns an [`OperationHistory`]: a single-slot gate that
//! serializes operation starts and hands out per-resource `task_N` names,
//! plus the never-pruned record of every operation started so far.
//!
//! State transitions are `in progress → succeeded | failed`. Every operation
//! is recorded in progress the moment it starts, so the last operation of a
//! resource is always the most recently started one. Asynchronous operations
//! are flipped by a detached tokio task after their duration; synchronous
//! ones sleep in the caller, holding the gate, and are terminal by the time
//! [`RunningOperation::finish`] returns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::debug;

use osbsim_core::{OperationKind, OperationState};

/// How an operation should play out, resolved from knobs and settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPlan {
    pub kind: OperationKind,
    pub asynchronous: bool,
    pub duration: Duration,
    /// Simulated failure requested through `failAtOperation`.
    pub fail: bool,
    pub instance_usable: Option<bool>,
    pub update_repeatable: Option<bool>,
}

impl OperationPlan {
    /// Immediate, successful, synchronous plan.
    pub fn immediate(kind: OperationKind) -> Self {
        Self {
            kind,
            asynchronous: false,
            duration: Duration::ZERO,
            fail: false,
            instance_usable: None,
            update_repeatable: None,
        }
    }

    fn outcome(&self) -> OperationState {
        if self.fail {
            OperationState::Failed
        } else {
            OperationState::Succeeded
        }
    }
}

/// One lifecycle transition of a resource.
#[derive(Debug)]
pub struct Operation {
    name: String,
    kind: OperationKind,
    asynchronous: bool,
    duration: Duration,
    started_at: u64,
    outcome: OperationState,
    instance_usable: Option<bool>,
    update_repeatable: Option<bool>,
    state: watch::Sender<OperationState>,
}

impl Operation {
    fn new(name: String, plan: &OperationPlan, started_at: u64, initial: OperationState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            name,
            kind: plan.kind,
            asynchronous: plan.asynchronous,
            duration: plan.duration,
            started_at,
            outcome: plan.outcome(),
            instance_usable: plan.instance_usable,
            update_repeatable: plan.update_repeatable,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn is_async(&self) -> bool {
        self.asynchronous
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Unix timestamp (seconds) when the operation started.
    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    pub fn is_in_progress(&self) -> bool {
        self.state() == OperationState::InProgress
    }

    /// Only reported once the operation has failed.
    pub fn instance_usable(&self) -> Option<bool> {
        self.failure_flag(self.instance_usable)
    }

    /// Only reported once the operation has failed.
    pub fn update_repeatable(&self) -> Option<bool> {
        self.failure_flag(self.update_repeatable)
    }

    pub fn description(&self) -> String {
        format!("{} {}", self.kind, self.state())
    }

    /// Wait until the operation reaches a terminal state.
    pub async fn wait(&self) -> OperationState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    fn failure_flag(&self, flag: Option<bool>) -> Option<bool> {
        (self.state() == OperationState::Failed)
            .then_some(flag)
            .flatten()
    }

    fn complete(&self) {
        self.state.send_replace(self.outcome);
    }
}

#[derive(Default)]
struct Entries {
    by_name: HashMap<String, Arc<Operation>>,
    last: Option<Arc<Operation>>,
}

/// Per-resource operation record and start gate.
pub struct OperationHistory {
    /// Next sequence number. Holding the lock is holding the gate.
    gate: tokio::sync::Mutex<u64>,
    entries: Mutex<Entries>,
}

/// Exclusive right to start the next operation of a resource.
pub struct OperationTicket<'a> {
    history: &'a OperationHistory,
    next: tokio::sync::MutexGuard<'a, u64>,
}

/// A started operation. Synchronous operations keep the gate until
/// [`finish`](Self::finish).
#[must_use = "a synchronous operation only completes through `finish`"]
pub struct RunningOperation<'a> {
    op: Arc<Operation>,
    gate: Option<tokio::sync::MutexGuard<'a, u64>>,
}

impl OperationHistory {
    pub fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(0),
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Wait for the gate. Callers are served in arrival order.
    pub async fn begin(&self) -> OperationTicket<'_> {
        OperationTicket {
            history: self,
            next: self.gate.lock().await,
        }
    }

    /// Take the gate only if no operation is running or in progress.
    pub fn try_begin(&self) -> Option<OperationTicket<'_>> {
        let next = self.gate.try_lock().ok()?;
        if self.last().is_some_and(|op| op.is_in_progress()) {
            return None;
        }
        Some(OperationTicket {
            history: self,
            next,
        })
    }

    /// True while an operation is being started, running synchronously, or
    /// still in progress in the background.
    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err() || self.last().is_some_and(|op| op.is_in_progress())
    }

    /// Wait for any operation currently holding the gate to finish starting.
    pub async fn settled(&self) {
        drop(self.gate.lock().await);
    }

    pub fn last(&self) -> Option<Arc<Operation>> {
        self.lock_entries().last.clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Operation>> {
        self.lock_entries().by_name.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, op: Arc<Operation>) {
        let mut entries = self.lock_entries();
        entries.by_name.insert(op.name.clone(), Arc::clone(&op));
        entries.last = Some(op);
    }

    fn lock_entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OperationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> OperationTicket<'a> {
    /// Name the operation started by this ticket will get.
    pub fn name(&self) -> String {
        format!("task_{}", *self.next)
    }

    /// Record the operation in progress.
    ///
    /// Asynchronous plans release the gate right away and complete in the
    /// background. Synchronous plans keep it until `finish`.
    pub fn start(mut self, plan: OperationPlan) -> RunningOperation<'a> {
        let name = self.name();
        *self.next += 1;
        let op = Arc::new(Operation::new(
            name,
            &plan,
            epoch_secs(),
            OperationState::InProgress,
        ));
        self.history.record(Arc::clone(&op));

        if !plan.asynchronous {
            return RunningOperation {
                op,
                gate: Some(self.next),
            };
        }

        let pending = Arc::clone(&op);
        tokio::spawn(async move {
            tokio::time::sleep(pending.duration).await;
            pending.complete();
            debug!(
                operation = %pending.name,
                kind = %pending.kind,
                state = %pending.state(),
                "async operation finished"
            );
        });
        RunningOperation { op, gate: None }
    }

    /// Start the operation and, for synchronous plans, wait for it.
    pub async fn run(self, plan: OperationPlan) -> Arc<Operation> {
        self.start(plan).finish().await
    }
}

impl RunningOperation<'_> {
    pub fn operation(&self) -> &Arc<Operation> {
        &self.op
    }

    /// Sleep out a synchronous operation and release the gate. Returns
    /// immediately for asynchronous ones.
    pub async fn finish(mut self) -> Arc<Operation> {
        if let Some(gate) = self.gate.take() {
            tokio::time::sleep(self.op.duration).await;
            self.op.complete();
            drop(gate);
        }
        Arc::clone(&self.op)
    }
}

impl Drop for RunningOperation<'_> {
    fn drop(&mut self) {
        // Dropped without `finish`.
        if let Some(gate) = self.gate.take() {
            self.op.complete();
            drop(gate);
        }
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

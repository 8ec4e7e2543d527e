//! Resource tables: live entities plus the deleted-resource side table.
//!
//! Structural access goes through the table's [`Coordinator`]:
//! [`TableReader`] can only look things up, [`TableWriter`] can also insert
//! and remove. The maps themselves sit behind brief `std` mutexes that are
//! never held across an `.await`.
//!
//! The side table keeps the last operation of a deleted resource so a
//! client can observe how the delete ended. An entry is dropped by the first
//! poll that sees it terminal, when the id is provisioned again, or when the
//! table holds more than its capacity and the entry is the oldest.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::coordinator::{Coordinator, ReadGuard, WriteGuard};
use crate::error::{StateError, StateResult};
use crate::operation::Operation;

/// Side-table entries kept per table unless configured otherwise.
pub const DEFAULT_RETIRED_CAPACITY: usize = 1024;

pub struct ResourceTable<T> {
    kind: &'static str,
    coordinator: Coordinator,
    live: Mutex<HashMap<String, Arc<T>>>,
    retired: Mutex<Retired>,
    retired_capacity: usize,
}

/// Side-table entries in retirement order.
#[derive(Default)]
struct Retired {
    by_id: HashMap<String, Arc<Operation>>,
    order: VecDeque<String>,
}

impl Retired {
    fn remove(&mut self, id: &str) -> Option<Arc<Operation>> {
        let op = self.by_id.remove(id)?;
        self.order.retain(|entry| entry != id);
        Some(op)
    }

    /// Insert and return the ids evicted to stay within `capacity`.
    fn insert(&mut self, id: &str, op: Arc<Operation>, capacity: usize) -> Vec<String> {
        self.remove(id);
        self.by_id.insert(id.to_string(), op);
        self.order.push_back(id.to_string());

        let mut evicted = Vec::new();
        while self.order.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.by_id.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }
}

/// Shared view of a table.
pub struct TableReader<'a, T> {
    table: &'a ResourceTable<T>,
    _guard: ReadGuard<'a>,
}

/// Exclusive view of a table.
pub struct TableWriter<'a, T> {
    table: &'a ResourceTable<T>,
    _guard: WriteGuard<'a>,
}

impl<T> ResourceTable<T> {
    /// `kind` names the resource in errors and logs ("instance", "binding").
    pub fn new(kind: &'static str) -> Self {
        Self::with_retired_capacity(kind, DEFAULT_RETIRED_CAPACITY)
    }

    /// Keep at most `capacity` side-table entries; the oldest go first.
    pub fn with_retired_capacity(kind: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            coordinator: Coordinator::new(),
            live: Mutex::new(HashMap::new()),
            retired: Mutex::new(Retired::default()),
            retired_capacity: capacity,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub async fn read(&self) -> TableReader<'_, T> {
        let guard = self.coordinator.begin_read().await;
        TableReader {
            table: self,
            _guard: guard,
        }
    }

    pub async fn write(&self) -> TableWriter<'_, T> {
        let guard = self.coordinator.acquire_write().await;
        TableWriter {
            table: self,
            _guard: guard,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Terminal (or still running) operation of a deleted resource.
    pub fn retired(&self, id: &str) -> Option<Arc<Operation>> {
        self.lock_retired().by_id.get(id).cloned()
    }

    pub fn retired_len(&self) -> usize {
        self.lock_retired().by_id.len()
    }

    /// Drop a side-table entry once its terminal state has been reported.
    ///
    /// Entries whose operation is still running are kept.
    pub fn consume_retired(&self, id: &str) -> Option<Arc<Operation>> {
        let mut retired = self.lock_retired();
        let op = retired.by_id.get(id).cloned()?;
        if op.state().is_terminal() {
            retired.remove(id);
            debug!(kind = self.kind, %id, "retired entry consumed");
        }
        Some(op)
    }

    fn get(&self, id: &str) -> Option<Arc<T>> {
        self.lock_live().get(id).cloned()
    }

    fn lock_live(&self) -> MutexGuard<'_, HashMap<String, Arc<T>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_retired(&self) -> MutexGuard<'_, Retired> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> TableReader<'_, T> {
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.table.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.lock_live().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.table.lock_live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.table.lock_live().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<T> TableWriter<'_, T> {
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.table.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.lock_live().contains_key(id)
    }

    /// Insert a new entity. Any side-table entry under the same id is dropped.
    pub fn insert(&mut self, id: &str, entity: Arc<T>) -> StateResult<()> {
        let mut live = self.table.lock_live();
        if live.contains_key(id) {
            return Err(StateError::AlreadyExists {
                kind: self.table.kind,
                id: id.to_string(),
            });
        }
        live.insert(id.to_string(), entity);
        drop(live);
        self.table.lock_retired().remove(id);
        debug!(kind = self.table.kind, %id, "entity inserted");
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> StateResult<Arc<T>> {
        let removed = self.table.lock_live().remove(id);
        removed.ok_or_else(|| StateError::NotFound {
            kind: self.table.kind,
            id: id.to_string(),
        })
    }

    /// Remove `id` only if it still refers to `expected`.
    pub fn remove_if_same(&mut self, id: &str, expected: &Arc<T>) -> bool {
        let mut live = self.table.lock_live();
        match live.get(id) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                live.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Record the last operation of a resource that just left the live table.
    pub fn retire(&mut self, id: &str, op: Arc<Operation>) {
        let evicted = self
            .table
            .lock_retired()
            .insert(id, op, self.table.retired_capacity);
        debug!(kind = self.table.kind, %id, "entity retired");
        for old in evicted {
            debug!(kind = self.table.kind, id = %old, "retired entry evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationHistory, OperationPlan};
    use osbsim_core::OperationKind;
    use std::time::Duration;

    #[tokio::test]
    async fn insert_rejects_live_duplicates() {
        let table: ResourceTable<u32> = ResourceTable::new("thing");
        let mut writer = table.write().await;
        writer.insert("a", Arc::new(1)).unwrap();
        let err = writer.insert("a", Arc::new(2)).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists { kind: "thing", .. }));
        drop(writer);

        let reader = table.read().await;
        assert_eq!(*reader.get("a").unwrap(), 1);
        assert_eq!(reader.ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn remove_missing_is_not_found() {
        let table: ResourceTable<u32> = ResourceTable::new("thing");
        let mut writer = table.write().await;
        assert!(matches!(
            writer.remove("nope"),
            Err(StateError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn remove_if_same_ignores_replaced_entities() {
        let table: ResourceTable<u32> = ResourceTable::new("thing");
        let original = Arc::new(1);
        let mut writer = table.write().await;
        writer.insert("a", Arc::clone(&original)).unwrap();
        writer.remove("a").unwrap();
        writer.insert("a", Arc::new(2)).unwrap();

        assert!(!writer.remove_if_same("a", &original));
        assert!(writer.contains("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn retired_entry_is_consumed_once_terminal() {
        let table: ResourceTable<u32> = ResourceTable::new("thing");
        let history = OperationHistory::new();
        let op = history
            .begin()
            .await
            .run(OperationPlan {
                asynchronous: true,
                duration: Duration::from_secs(2),
                ..OperationPlan::immediate(OperationKind::Deprovision)
            })
            .await;

        table.write().await.retire("a", Arc::clone(&op));

        // Still running: reported but kept.
        assert!(table.consume_retired("a").unwrap().is_in_progress());
        assert!(table.retired("a").is_some());

        op.wait().await;
        assert!(table.consume_retired("a").is_some());
        assert!(table.retired("a").is_none());
    }

    #[tokio::test]
    async fn reprovision_clears_retired_entry() {
        let table: ResourceTable<u32> = ResourceTable::new("thing");
        let history = OperationHistory::new();
        let op = history
            .begin()
            .await
            .run(OperationPlan::immediate(OperationKind::Deprovision))
            .await;

        let mut writer = table.write().await;
        writer.retire("a", op);
        writer.insert("a", Arc::new(7)).unwrap();
        drop(writer);

        assert!(table.retired("a").is_none());
    }

    #[tokio::test]
    async fn reader_blocks_writer_structurally() {
        let table: ResourceTable<u32> = ResourceTable::new("thing");
        let reader = table.read().await;
        assert!(table.coordinator().try_acquire_write().is_none());
        assert!(reader.is_empty());
        drop(reader);
        assert!(table.coordinator().try_acquire_write().is_some());
    }

    #[tokio::test]
    async fn retired_entries_are_capped_oldest_first() {
        let table: ResourceTable<u32> = ResourceTable::with_retired_capacity("thing", 2);
        let history = OperationHistory::new();
        let mut writer = table.write().await;
        for id in ["a", "b", "a", "c"] {
            let op = history
                .begin()
                .await
                .run(OperationPlan::immediate(OperationKind::Deprovision))
                .await;
            writer.retire(id, op);
        }
        drop(writer);

        assert_eq!(table.retired_len(), 2);
        assert!(table.retired("b").is_none());
        assert_eq!(table.retired("a").unwrap().name(), "task_2");
        assert!(table.retired("c").is_some());
    }
}

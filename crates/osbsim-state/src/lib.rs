//! osbsim-state: in-memory resource state for the broker simulator.
//!
//! # Architecture
//!
//! ```text
//! ResourceTable<T>            (one per resource kind)
//!   ├── Coordinator           readers-preferred table lock
//!   ├── live: id → Arc<T>     Instance / Binding entities
//!   └── retired: id → Arc<Operation>   terminal op of deleted resources
//!
//! Instance / Binding
//!   └── OperationHistory      single-slot gate + task_N sequence
//!         └── Arc<Operation>  state held in a watch cell
//! ```
//!
//! Entities refer to each other by id only; a binding's owner is resolved
//! through the instance table. Nothing here is persisted.

pub mod binding;
pub mod coordinator;
pub mod error;
pub mod instance;
pub mod operation;
pub mod table;

pub use binding::Binding;
pub use coordinator::{Coordinator, ReadGuard, WriteGuard};
pub use error::{StateError, StateResult};
pub use instance::{Instance, InstanceSpec};
pub use operation::{
    Operation, OperationHistory, OperationPlan, OperationTicket, RunningOperation, epoch_secs,
};
pub use table::{ResourceTable, TableReader, TableWriter};

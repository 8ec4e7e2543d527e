//! Service instance entity.
//!
//! Identity fields (id, offering, org, space) are fixed at provision time.
//! The mutable part, plan/parameters/context/maintenance info, sits behind a
//! short-lived mutex so an update never races a concurrent fetch. Bindings
//! are tracked by id only.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use osbsim_core::request::{FetchFilter, Parameters, ProvisionRequest, UpdateRequest};
use osbsim_core::response::{InstanceMetadata, ProvisionResponse};
use osbsim_core::{MaintenanceInfo, OperationKind, OperationState};

use crate::operation::{Operation, OperationHistory};

/// The part of an instance an update may change.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSpec {
    pub plan_id: String,
    pub parameters: Parameters,
    pub context: Option<Value>,
    pub maintenance_info: Option<MaintenanceInfo>,
}

pub struct Instance {
    id: String,
    offering_id: String,
    organization_guid: String,
    space_guid: String,
    dashboard_url: Option<String>,
    metadata: Option<InstanceMetadata>,
    spec: Mutex<InstanceSpec>,
    bindings: Mutex<BTreeSet<String>>,
    operations: OperationHistory,
    information_returned: AtomicBool,
}

impl Instance {
    pub fn new(
        id: &str,
        request: &ProvisionRequest,
        dashboard_url: Option<String>,
        metadata: Option<InstanceMetadata>,
    ) -> Self {
        Self {
            id: id.to_string(),
            offering_id: request.service_id.clone(),
            organization_guid: request.organization_guid.clone(),
            space_guid: request.space_guid.clone(),
            dashboard_url,
            metadata,
            spec: Mutex::new(InstanceSpec {
                plan_id: request.plan_id.clone(),
                parameters: request.parameters.clone(),
                context: request.context.clone(),
                maintenance_info: request.maintenance_info.clone(),
            }),
            bindings: Mutex::new(BTreeSet::new()),
            operations: OperationHistory::new(),
            information_returned: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn offering_id(&self) -> &str {
        &self.offering_id
    }

    pub fn organization_guid(&self) -> &str {
        &self.organization_guid
    }

    pub fn space_guid(&self) -> &str {
        &self.space_guid
    }

    pub fn dashboard_url(&self) -> Option<&str> {
        self.dashboard_url.as_deref()
    }

    pub fn metadata(&self) -> Option<&InstanceMetadata> {
        self.metadata.as_ref()
    }

    pub fn spec(&self) -> InstanceSpec {
        self.lock_spec().clone()
    }

    pub fn plan_id(&self) -> String {
        self.lock_spec().plan_id.clone()
    }

    pub fn operations(&self) -> &OperationHistory {
        &self.operations
    }

    pub fn last_operation(&self) -> Option<Arc<Operation>> {
        self.operations.last()
    }

    /// Whether a provision request describes exactly this instance.
    pub fn matches(&self, request: &ProvisionRequest) -> bool {
        let spec = self.lock_spec();
        self.offering_id == request.service_id
            && self.organization_guid == request.organization_guid
            && self.space_guid == request.space_guid
            && spec.plan_id == request.plan_id
            && spec.parameters == request.parameters
            && spec.context == request.context
            && spec.maintenance_info == request.maintenance_info
    }

    /// Whether optional `service_id`/`plan_id` filters agree with this instance.
    pub fn matches_filter(&self, filter: &FetchFilter) -> bool {
        let service_ok = filter
            .service_id
            .as_ref()
            .is_none_or(|id| *id == self.offering_id);
        let plan_ok = filter
            .plan_id
            .as_ref()
            .is_none_or(|id| *id == self.lock_spec().plan_id);
        service_ok && plan_ok
    }

    /// The spec an update would produce, or `None` if nothing would change.
    pub fn pending_changes(&self, request: &UpdateRequest) -> Option<InstanceSpec> {
        let current = self.spec();
        let mut next = current.clone();
        if let Some(plan_id) = &request.plan_id {
            next.plan_id = plan_id.clone();
        }
        if let Some(parameters) = &request.parameters {
            next.parameters = parameters.clone();
        }
        if request.context.is_some() {
            next.context = request.context.clone();
        }
        if request.maintenance_info.is_some() {
            next.maintenance_info = request.maintenance_info.clone();
        }
        (next != current).then_some(next)
    }

    pub fn apply(&self, spec: InstanceSpec) {
        *self.lock_spec() = spec;
    }

    /// Whether a provision is still running, in which case the instance is
    /// not yet observable through fetch. An instance whose first operation
    /// has not been recorded yet counts as provisioning.
    pub fn is_provisioning(&self) -> bool {
        self.operations.is_empty() || self.in_flight_kind() == Some(OperationKind::Provision)
    }

    /// Whether an update is still running.
    pub fn is_updating(&self) -> bool {
        self.in_flight_kind() == Some(OperationKind::Update)
    }

    /// Whether a deprovision has succeeded and the instance is only waiting
    /// to leave the live table.
    pub fn is_deprovisioned(&self) -> bool {
        self.operations.last().is_some_and(|op| {
            op.kind() == OperationKind::Deprovision && op.state() == OperationState::Succeeded
        })
    }

    pub fn attach_binding(&self, binding_id: &str) {
        self.lock_bindings().insert(binding_id.to_string());
    }

    pub fn detach_binding(&self, binding_id: &str) -> bool {
        self.lock_bindings().remove(binding_id)
    }

    pub fn binding_ids(&self) -> Vec<String> {
        self.lock_bindings().iter().cloned().collect()
    }

    pub fn has_bindings(&self) -> bool {
        !self.lock_bindings().is_empty()
    }

    /// Mark the response as delivered. Returns true the first time only.
    pub fn first_delivery(&self) -> bool {
        !self.information_returned.swap(true, Ordering::AcqRel)
    }

    pub fn information_returned(&self) -> bool {
        self.information_returned.load(Ordering::Acquire)
    }

    pub fn provision_response(&self, operation: Option<String>) -> ProvisionResponse {
        ProvisionResponse {
            dashboard_url: self.dashboard_url.clone(),
            operation,
            metadata: self.metadata.clone(),
        }
    }

    fn in_flight_kind(&self) -> Option<OperationKind> {
        self.operations
            .last()
            .filter(|op| op.state() == OperationState::InProgress)
            .map(|op| op.kind())
    }

    fn lock_spec(&self) -> MutexGuard<'_, InstanceSpec> {
        self.spec.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_bindings(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Service binding entity.
//!
//! A binding is immutable apart from its operation history and the
//! delivered-once flag. Its owner is referenced by instance id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use osbsim_core::request::{BindRequest, FetchFilter, Parameters};
use osbsim_core::response::{BindingResponse, BindingSnapshot, FetchBindingResponse};
use osbsim_core::{OperationKind, OperationState};

use crate::operation::{Operation, OperationHistory};

pub struct Binding {
    id: String,
    instance_id: String,
    offering_id: String,
    plan_id: String,
    app_guid: Option<String>,
    bind_resource: Option<Value>,
    parameters: Parameters,
    context: Option<Value>,
    predecessor_id: Option<String>,
    snapshot: BindingSnapshot,
    operations: OperationHistory,
    information_returned: AtomicBool,
}

impl Binding {
    pub fn new(
        id: &str,
        instance_id: &str,
        request: &BindRequest,
        snapshot: BindingSnapshot,
    ) -> Self {
        Self {
            id: id.to_string(),
            instance_id: instance_id.to_string(),
            offering_id: request.service_id.clone(),
            plan_id: request.plan_id.clone(),
            app_guid: request.app_guid.clone(),
            bind_resource: request.bind_resource.clone(),
            parameters: request.parameters.clone(),
            context: request.context.clone(),
            predecessor_id: None,
            snapshot,
            operations: OperationHistory::new(),
            information_returned: AtomicBool::new(false),
        }
    }

    /// Successor binding for credential rotation.
    ///
    /// Context, parameters and bind resource carry over; identity, snapshot
    /// and operation sequence are fresh. The predecessor is left untouched.
    pub fn rotate(&self, id: &str, snapshot: BindingSnapshot) -> Self {
        Self {
            id: id.to_string(),
            instance_id: self.instance_id.clone(),
            offering_id: self.offering_id.clone(),
            plan_id: self.plan_id.clone(),
            app_guid: self.app_guid.clone(),
            bind_resource: self.bind_resource.clone(),
            parameters: self.parameters.clone(),
            context: self.context.clone(),
            predecessor_id: Some(self.id.clone()),
            snapshot,
            operations: OperationHistory::new(),
            information_returned: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn offering_id(&self) -> &str {
        &self.offering_id
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn app_guid(&self) -> Option<&str> {
        self.app_guid.as_deref()
    }

    pub fn bind_resource(&self) -> Option<&Value> {
        self.bind_resource.as_ref()
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    pub fn predecessor_id(&self) -> Option<&str> {
        self.predecessor_id.as_deref()
    }

    pub fn snapshot(&self) -> &BindingSnapshot {
        &self.snapshot
    }

    pub fn operations(&self) -> &OperationHistory {
        &self.operations
    }

    pub fn last_operation(&self) -> Option<Arc<Operation>> {
        self.operations.last()
    }

    /// Whether a bind request under `instance_id` describes exactly this binding.
    ///
    /// A rotation request carries no body of its own, so it matches on the
    /// predecessor instead of parameters and context.
    pub fn matches(&self, instance_id: &str, request: &BindRequest) -> bool {
        if self.instance_id != instance_id
            || self.offering_id != request.service_id
            || self.plan_id != request.plan_id
        {
            return false;
        }
        match &request.predecessor_binding_id {
            Some(predecessor) => self.predecessor_id.as_ref() == Some(predecessor),
            None => {
                self.predecessor_id.is_none()
                    && self.app_guid == request.app_guid
                    && self.bind_resource == request.bind_resource
                    && self.parameters == request.parameters
                    && self.context == request.context
            }
        }
    }

    pub fn matches_filter(&self, filter: &FetchFilter) -> bool {
        filter
            .service_id
            .as_ref()
            .is_none_or(|id| *id == self.offering_id)
            && filter.plan_id.as_ref().is_none_or(|id| *id == self.plan_id)
    }

    /// Whether the bind itself is still running, or has not been recorded yet.
    pub fn is_binding(&self) -> bool {
        self.operations.last().is_none_or(|op| {
            op.kind() == OperationKind::Bind && op.state() == OperationState::InProgress
        })
    }

    /// Whether an unbind has succeeded and the binding is only waiting to
    /// leave the live table.
    pub fn is_unbound(&self) -> bool {
        self.operations.last().is_some_and(|op| {
            op.kind() == OperationKind::Unbind && op.state() == OperationState::Succeeded
        })
    }

    /// Mark the credentials as delivered. Returns true the first time only.
    pub fn first_delivery(&self) -> bool {
        !self.information_returned.swap(true, Ordering::AcqRel)
    }

    pub fn information_returned(&self) -> bool {
        self.information_returned.load(Ordering::Acquire)
    }

    pub fn response(&self, operation: Option<String>) -> BindingResponse {
        BindingResponse {
            snapshot: self.snapshot.clone(),
            operation,
        }
    }

    pub fn fetch_response(&self, include_parameters: bool) -> FetchBindingResponse {
        FetchBindingResponse {
            snapshot: self.snapshot.clone(),
            parameters: include_parameters.then(|| self.parameters.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationPlan;
    use serde_json::json;

    fn bind_request() -> BindRequest {
        BindRequest {
            service_id: "svc".to_string(),
            plan_id: "small".to_string(),
            app_guid: Some("app".to_string()),
            bind_resource: Some(json!({"app_guid": "app"})),
            parameters: Parameters::default(),
            context: Some(json!({"platform": "cloudfoundry"})),
            predecessor_binding_id: None,
        }
    }

    fn snapshot(user: &str) -> BindingSnapshot {
        BindingSnapshot {
            credentials: Some(json!({"username": user})),
            ..BindingSnapshot::default()
        }
    }

    #[test]
    fn matches_same_owner_and_body() {
        let req = bind_request();
        let binding = Binding::new("b1", "i1", &req, snapshot("u1"));
        assert!(binding.matches("i1", &req));
        assert!(!binding.matches("i2", &req));

        let mut other = req;
        other.app_guid = Some("other".to_string());
        assert!(!binding.matches("i1", &other));
    }

    #[tokio::test]
    async fn binding_and_unbound_flags_follow_operations() {
        let binding = Binding::new("b1", "i1", &bind_request(), snapshot("u1"));
        assert!(binding.is_binding());

        binding
            .operations()
            .begin()
            .await
            .run(OperationPlan::immediate(OperationKind::Bind))
            .await;
        assert!(!binding.is_binding());
        assert!(!binding.is_unbound());

        binding
            .operations()
            .begin()
            .await
            .run(OperationPlan::immediate(OperationKind::Unbind))
            .await;
        assert!(binding.is_unbound());
    }

    #[tokio::test]
    async fn rotation_copies_body_with_fresh_identity() {
        let req = bind_request();
        let original = Binding::new("b1", "i1", &req, snapshot("u1"));
        original
            .operations()
            .begin()
            .await
            .run(OperationPlan::immediate(OperationKind::Bind))
            .await;

        let rotated = original.rotate("b2", snapshot("u2"));
        assert_eq!(rotated.id(), "b2");
        assert_eq!(rotated.instance_id(), "i1");
        assert_eq!(rotated.context(), original.context());
        assert_eq!(rotated.parameters(), original.parameters());
        assert_eq!(rotated.bind_resource(), original.bind_resource());
        assert_eq!(rotated.predecessor_id(), Some("b1"));
        assert_ne!(rotated.snapshot(), original.snapshot());
        assert!(rotated.operations().is_empty());
        assert_eq!(original.operations().len(), 1);

        let rotate_req = BindRequest {
            service_id: "svc".to_string(),
            plan_id: "small".to_string(),
            app_guid: None,
            bind_resource: None,
            parameters: Parameters::default(),
            context: None,
            predecessor_binding_id: Some("b1".to_string()),
        };
        assert!(rotated.matches("i1", &rotate_req));
        assert!(!original.matches("i1", &rotate_req));
    }

    #[test]
    fn fetch_response_optionally_includes_parameters() {
        let binding = Binding::new("b1", "i1", &bind_request(), snapshot("u1"));
        assert!(binding.fetch_response(false).parameters.is_none());
        assert!(binding.fetch_response(true).parameters.is_some());
    }
}

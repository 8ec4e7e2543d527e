//! Typed request bodies consumed by the lifecycle engine.
//!
//! The HTTP layer deserializes into these types; the engine never sees raw
//! JSON apart from the opaque passthrough parts of [`Parameters`] and
//! platform `context` objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::MaintenanceInfo;
use crate::types::OperationKind;
use crate::version::ApiVersion;

/// Caller-supplied parameters.
///
/// The `simulation` object steers the simulated operation; every other key is
/// kept verbatim and echoed back on fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Parameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationKnobs>,
    #[serde(flatten)]
    pub passthrough: BTreeMap<String, Value>,
}

/// Fault-injection and timing knobs recognized by the simulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationKnobs {
    #[serde(default, rename = "async", skip_serializing_if = "Option::is_none")]
    pub asynchronous: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_to_complete: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_at_operation: Option<OperationKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_usable_after_fail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_repeatable_after_fail: Option<bool>,
}

impl Parameters {
    pub fn knobs(&self) -> Option<&SimulationKnobs> {
        self.simulation.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.simulation.is_none() && self.passthrough.is_empty()
    }
}

/// Per-call options that travel outside the body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// `accepts_incomplete=true` query parameter.
    pub accepts_incomplete: bool,
    /// Value of the `X-Broker-API-Version` header.
    pub api_version: ApiVersion,
}

/// `PUT /v2/service_instances/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionRequest {
    pub service_id: String,
    pub plan_id: String,
    pub organization_guid: String,
    pub space_guid: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_info: Option<MaintenanceInfo>,
}

/// `PATCH /v2/service_instances/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRequest {
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_info: Option<MaintenanceInfo>,
}

/// `DELETE /v2/service_instances/{id}` query parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeprovisionRequest {
    pub service_id: String,
    pub plan_id: String,
}

/// `PUT /v2/service_instances/{id}/service_bindings/{binding_id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindRequest {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_resource: Option<Value>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Rotate credentials of this existing binding into the new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_binding_id: Option<String>,
}

/// `DELETE .../service_bindings/{binding_id}` query parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnbindRequest {
    pub service_id: String,
    pub plan_id: String,
}

/// Optional `service_id`/`plan_id` filters on fetch requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FetchFilter {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
}

/// `GET .../last_operation` query parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LastOperationQuery {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
}

impl LastOperationQuery {
    pub fn filter(&self) -> FetchFilter {
        FetchFilter {
            service_id: self.service_id.clone(),
            plan_id: self.plan_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_split_knobs_from_passthrough() {
        let json = r#"{
            "simulation": {"async": true, "secondsToComplete": 3, "failAtOperation": "update"},
            "size": "xl",
            "replicas": 3
        }"#;
        let params: Parameters = serde_json::from_str(json).unwrap();
        let knobs = params.knobs().unwrap();
        assert_eq!(knobs.asynchronous, Some(true));
        assert_eq!(knobs.seconds_to_complete, Some(3));
        assert_eq!(knobs.fail_at_operation, Some(OperationKind::Update));
        assert_eq!(params.passthrough.len(), 2);
        assert!(!params.passthrough.contains_key("simulation"));
    }

    #[test]
    fn provision_request_defaults_parameters() {
        let json = r#"{
            "service_id": "svc",
            "plan_id": "plan",
            "organization_guid": "org",
            "space_guid": "space"
        }"#;
        let req: ProvisionRequest = serde_json::from_str(json).unwrap();
        assert!(req.parameters.is_empty());
        assert!(req.maintenance_info.is_none());
    }

    #[test]
    fn bind_request_carries_predecessor() {
        let json = r#"{"service_id": "s", "plan_id": "p", "predecessor_binding_id": "old"}"#;
        let req: BindRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.predecessor_binding_id.as_deref(), Some("old"));
    }
}

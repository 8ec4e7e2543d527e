//! State shared by the lifecycle services.

use std::sync::Arc;

use osbsim_core::request::FetchFilter;
use osbsim_core::response::InstanceMetadata;
use osbsim_core::{Catalog, MaintenanceInfo, Offering, Plan, Settings};
use osbsim_state::{Binding, Instance, ResourceTable};

use crate::error::{BrokerError, BrokerResult};

/// Catalog, settings and the two resource tables.
///
/// Lock order is always instances before bindings.
pub struct BrokerContext {
    pub catalog: Arc<Catalog>,
    pub settings: Arc<Settings>,
    pub instances: ResourceTable<Instance>,
    pub bindings: ResourceTable<Binding>,
}

impl BrokerContext {
    pub fn new(catalog: Arc<Catalog>, settings: Arc<Settings>) -> Self {
        let capacity = settings.behavior.retired_capacity;
        Self {
            catalog,
            settings,
            instances: ResourceTable::with_retired_capacity("instance", capacity),
            bindings: ResourceTable::with_retired_capacity("binding", capacity),
        }
    }

    pub(crate) fn offering(&self, service_id: &str) -> BrokerResult<&Offering> {
        self.catalog
            .offering(service_id)
            .ok_or_else(|| BrokerError::BadRequest(format!("unknown service_id {service_id:?}")))
    }

    /// Offering of a resource that already exists; the catalog never changes,
    /// so a miss is an internal error.
    pub(crate) fn owning_offering(&self, service_id: &str) -> BrokerResult<&Offering> {
        self.catalog.offering(service_id).ok_or_else(|| {
            BrokerError::Internal(format!("service {service_id:?} vanished from the catalog"))
        })
    }

    pub(crate) fn dashboard_url(&self, instance_id: &str) -> Option<String> {
        let response = &self.settings.response;
        response.dashboard_url.then(|| {
            format!(
                "{}/instances/{instance_id}",
                response.dashboard_base_url.trim_end_matches('/')
            )
        })
    }

    pub(crate) fn instance_metadata(&self, offering: &Offering, plan: &Plan) -> Option<InstanceMetadata> {
        self.settings.response.instance_metadata.then(|| InstanceMetadata {
            labels: [
                ("offering".to_string(), offering.name.clone()),
                ("plan".to_string(), plan.name.clone()),
            ]
            .into(),
            attributes: [("broker".to_string(), "osbsim".to_string())].into(),
        })
    }
}

pub(crate) fn plan<'a>(offering: &'a Offering, plan_id: &str) -> BrokerResult<&'a Plan> {
    offering.plan(plan_id).ok_or_else(|| {
        BrokerError::BadRequest(format!(
            "plan {plan_id:?} does not belong to service {:?}",
            offering.id
        ))
    })
}

/// Requested maintenance info must name the plan's current version.
pub(crate) fn check_maintenance_info(
    plan: &Plan,
    requested: Option<&MaintenanceInfo>,
) -> BrokerResult<()> {
    let Some(requested) = requested else {
        return Ok(());
    };
    match plan.maintenance_version() {
        Some(version) if version == requested.version => Ok(()),
        Some(version) => Err(BrokerError::MaintenanceInfoConflict(format!(
            "maintenance_info.version {:?} does not match plan version {version:?}",
            requested.version
        ))),
        None => Err(BrokerError::MaintenanceInfoConflict(format!(
            "plan {:?} has no maintenance_info",
            plan.id
        ))),
    }
}

/// Optional `service_id`/`plan_id` filters on a request must match.
pub(crate) fn check_filter(matches: bool, filter: &FetchFilter) -> BrokerResult<()> {
    if matches {
        Ok(())
    } else {
        Err(BrokerError::ValidationMismatch(format!(
            "service_id {:?} / plan_id {:?} do not match the resource",
            filter.service_id, filter.plan_id
        )))
    }
}

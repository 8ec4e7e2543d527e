//! Service instance lifecycle: provision, fetch, update, poll, deprovision.
//!
//! Creation and deletion take the instance table's write path; fetch, poll
//! and update take the read path. The table lock is never held across a
//! simulated synchronous sleep: the operation is started, and so visible to
//! pollers, under the lock and sleeps out its duration after it is released.

use std::sync::Arc;

use tracing::{debug, info, warn};

use osbsim_core::request::{
    DeprovisionRequest, FetchFilter, LastOperationQuery, ProvisionRequest, RequestOptions,
    UpdateRequest,
};
use osbsim_core::response::{
    FetchInstanceResponse, LastOperationResponse, OperationResponse, ProvisionResponse,
    UpdateResponse,
};
use osbsim_core::{OperationKind, OperationState};
use osbsim_state::{Instance, Operation, TableWriter};

use crate::context::{self, BrokerContext};
use crate::error::{BrokerError, BrokerResult};
use crate::reply::{self, Reply, Status};
use crate::simulation::plan_operation;

#[derive(Clone)]
pub struct DeploymentService {
    ctx: Arc<BrokerContext>,
}

impl DeploymentService {
    pub fn new(ctx: Arc<BrokerContext>) -> Self {
        Self { ctx }
    }

    /// Create an instance, or replay the reply for an identical request.
    pub async fn provision(
        &self,
        instance_id: &str,
        request: ProvisionRequest,
        options: &RequestOptions,
    ) -> BrokerResult<Reply<ProvisionResponse>> {
        let mut instances = self.ctx.instances.write().await;

        if let Some(existing) = instances.get(instance_id) {
            if !existing.matches(&request) {
                return Err(BrokerError::Conflict(format!(
                    "instance {instance_id} already exists with different attributes"
                )));
            }
            drop(instances);
            return self.replay_provision(&existing).await;
        }

        let offering = self.ctx.offering(&request.service_id)?;
        let plan = context::plan(offering, &request.plan_id)?;
        context::check_maintenance_info(plan, request.maintenance_info.as_ref())?;
        let op_plan = plan_operation(
            OperationKind::Provision,
            &request.parameters,
            &self.ctx.settings.behavior,
            options,
        )?;

        let instance = Arc::new(Instance::new(
            instance_id,
            &request,
            self.ctx.dashboard_url(instance_id),
            self.ctx.instance_metadata(offering, plan),
        ));
        instances.insert(instance_id, Arc::clone(&instance))?;
        let running = instance.operations().begin().await.start(op_plan);
        drop(instances);

        let op = running.finish().await;
        info!(
            %instance_id,
            service_id = %request.service_id,
            plan_id = %request.plan_id,
            operation = %op.name(),
            asynchronous = op.is_async(),
            "instance provisioned"
        );

        if op.is_async() {
            instance.first_delivery();
            return Ok(Reply::new(
                Status::Accepted,
                instance.provision_response(Some(op.name().to_string())),
            ));
        }
        fail_if_failed(instance_id, &op)?;
        instance.first_delivery();
        Ok(Reply::new(Status::Created, instance.provision_response(None)))
    }

    async fn replay_provision(
        &self,
        instance: &Instance,
    ) -> BrokerResult<Reply<ProvisionResponse>> {
        instance.operations().settled().await;
        let instance_id = instance.id();

        if instance.is_deprovisioned() {
            return Err(BrokerError::ConcurrencyError(format!(
                "instance {instance_id} is being deprovisioned"
            )));
        }
        if let Some(op) = instance.last_operation() {
            if op.is_async() && op.is_in_progress() {
                debug!(%instance_id, operation = %op.name(), "provision replay, still in progress");
                return Ok(Reply::new(
                    Status::Accepted,
                    instance.provision_response(Some(op.name().to_string())),
                ));
            }
            if op.kind() == OperationKind::Provision {
                fail_if_failed(instance_id, &op)?;
            }
        }
        if !instance.first_delivery() && self.ctx.settings.response.return_once {
            debug!(%instance_id, "provision replay, response already delivered");
            return Ok(Reply::empty(Status::Ok));
        }
        debug!(%instance_id, "provision replay");
        Ok(Reply::ok(instance.provision_response(None)))
    }

    pub async fn fetch(
        &self,
        instance_id: &str,
        filter: &FetchFilter,
    ) -> BrokerResult<Reply<FetchInstanceResponse>> {
        let instances = self.ctx.instances.read().await;
        let instance = live_instance(instances.get(instance_id))
            .ok_or_else(|| not_found(instance_id))?;
        let offering = self.ctx.owning_offering(instance.offering_id())?;

        if !offering.instances_retrievable {
            return Err(BrokerError::NotRetrievable(format!(
                "instances of service {:?} are not retrievable",
                offering.id
            )));
        }
        context::check_filter(instance.matches_filter(filter), filter)?;
        if instance.is_provisioning() {
            return Err(BrokerError::NotFound(format!(
                "instance {instance_id} is still being provisioned"
            )));
        }
        if instance.is_updating() {
            return Err(BrokerError::ConcurrencyError(format!(
                "instance {instance_id} is being updated"
            )));
        }

        let spec = instance.spec();
        let response = &self.ctx.settings.response;
        Ok(Reply::ok(FetchInstanceResponse {
            service_id: instance.offering_id().to_string(),
            plan_id: spec.plan_id,
            dashboard_url: instance.dashboard_url().map(str::to_string),
            parameters: response.fetch_parameters.then_some(spec.parameters),
            maintenance_info: spec
                .maintenance_info
                .filter(|_| response.fetch_maintenance_info),
            metadata: instance.metadata().cloned(),
        }))
    }

    /// Change plan, parameters, context or maintenance info of an instance.
    pub async fn update(
        &self,
        instance_id: &str,
        request: UpdateRequest,
        options: &RequestOptions,
    ) -> BrokerResult<Reply<UpdateResponse>> {
        let instances = self.ctx.instances.read().await;
        let instance = live_instance(instances.get(instance_id))
            .ok_or_else(|| not_found(instance_id))?;

        if request.service_id != instance.offering_id() {
            return Err(BrokerError::BadRequest(format!(
                "service_id {:?} does not match instance {instance_id}",
                request.service_id
            )));
        }
        let offering = self.ctx.owning_offering(instance.offering_id())?;
        let current = instance.spec();

        if request.context.is_some()
            && request.context != current.context
            && !offering.allow_context_updates
        {
            return Err(BrokerError::BadRequest(format!(
                "service {:?} does not allow context updates",
                offering.id
            )));
        }
        let target_plan_id = request.plan_id.as_deref().unwrap_or(&current.plan_id);
        let target_plan = context::plan(offering, target_plan_id)?;
        if target_plan_id != current.plan_id && !offering.plan_updateable {
            return Err(BrokerError::BadRequest(format!(
                "service {:?} does not allow plan changes",
                offering.id
            )));
        }
        context::check_maintenance_info(target_plan, request.maintenance_info.as_ref())?;

        let ticket = instance
            .operations()
            .try_begin()
            .ok_or_else(|| busy(instance_id))?;

        let Some(next) = instance.pending_changes(&request) else {
            debug!(%instance_id, "update without changes");
            return Ok(Reply::empty(Status::Ok));
        };
        let knobs_source = request.parameters.as_ref().unwrap_or(&current.parameters);
        let op_plan = plan_operation(
            OperationKind::Update,
            knobs_source,
            &self.ctx.settings.behavior,
            options,
        )?;
        let running = ticket.start(op_plan);
        instance.apply(next);
        drop(instances);

        let op = running.finish().await;
        info!(%instance_id, operation = %op.name(), asynchronous = op.is_async(), "instance updated");

        if op.is_async() {
            return Ok(Reply::new(
                Status::Accepted,
                UpdateResponse {
                    dashboard_url: None,
                    operation: Some(op.name().to_string()),
                },
            ));
        }
        fail_if_failed(instance_id, &op)?;
        Ok(Reply::ok(UpdateResponse {
            dashboard_url: instance.dashboard_url().map(str::to_string),
            operation: None,
        }))
    }

    /// Report the named (or last) operation of an instance.
    ///
    /// A deleted instance reports its delete operation once that is
    /// terminal; the entry is then dropped.
    pub async fn last_operation(
        &self,
        instance_id: &str,
        query: &LastOperationQuery,
    ) -> BrokerResult<Reply<LastOperationResponse>> {
        let instances = self.ctx.instances.read().await;

        if let Some(instance) = instances.get(instance_id) {
            drop(instances);
            let filter = query.filter();
            context::check_filter(instance.matches_filter(&filter), &filter)?;
            let op = match &query.operation {
                Some(name) => instance.operations().get(name).ok_or_else(|| {
                    BrokerError::NotFound(format!(
                        "operation {name} not found for instance {instance_id}"
                    ))
                })?,
                None => instance
                    .last_operation()
                    .ok_or_else(|| not_found(instance_id))?,
            };
            return Ok(Reply::ok(reply::describe(&op)));
        }

        let retired = self.ctx.instances.consume_retired(instance_id);
        drop(instances);
        match retired {
            Some(op) => Ok(reply::describe_retired(&op)),
            None => Err(not_found(instance_id)),
        }
    }

    /// Delete an instance and every binding it owns.
    pub async fn deprovision(
        &self,
        instance_id: &str,
        request: &DeprovisionRequest,
        options: &RequestOptions,
    ) -> BrokerResult<Reply<OperationResponse>> {
        let mut instances = self.ctx.instances.write().await;
        let instance = live_instance(instances.get(instance_id))
            .ok_or_else(|| BrokerError::Gone(format!("instance {instance_id} does not exist")))?;

        if request.service_id != instance.offering_id() || request.plan_id != instance.plan_id() {
            return Err(BrokerError::BadRequest(format!(
                "service_id {:?} / plan_id {:?} do not match instance {instance_id}",
                request.service_id, request.plan_id
            )));
        }
        let offering = self.ctx.owning_offering(instance.offering_id())?;
        let allowed = offering
            .allow_deprovision_with_bindings
            .unwrap_or(self.ctx.settings.behavior.allow_deprovision_with_bindings);
        if instance.has_bindings() && !allowed {
            return Err(BrokerError::BlockedByDependency(format!(
                "instance {instance_id} still has bindings"
            )));
        }

        let ticket = instance
            .operations()
            .try_begin()
            .ok_or_else(|| busy(instance_id))?;
        let op_plan = plan_operation(
            OperationKind::Deprovision,
            &instance.spec().parameters,
            &self.ctx.settings.behavior,
            options,
        )?;

        if op_plan.asynchronous {
            let op = ticket.run(op_plan).await;
            let name = op.name().to_string();
            self.retire(&mut instances, &instance, op).await;
            info!(%instance_id, operation = %name, "instance deprovision accepted");
            return Ok(Reply::new(
                Status::Accepted,
                OperationResponse {
                    operation: Some(name),
                },
            ));
        }

        let running = ticket.start(op_plan);
        drop(instances);
        let op = running.finish().await;
        fail_if_failed(instance_id, &op)?;

        let mut instances = self.ctx.instances.write().await;
        self.retire(&mut instances, &instance, op).await;
        info!(%instance_id, "instance deprovisioned");
        Ok(Reply::empty(Status::Ok))
    }

    /// Move an instance from the live table to the side table, cascading to
    /// its bindings.
    async fn retire(
        &self,
        instances: &mut TableWriter<'_, Instance>,
        instance: &Arc<Instance>,
        op: Arc<Operation>,
    ) {
        let instance_id = instance.id();
        if !instances.remove_if_same(instance_id, instance) {
            return;
        }
        let binding_ids = instance.binding_ids();
        if !binding_ids.is_empty() {
            let mut bindings = self.ctx.bindings.write().await;
            for binding_id in &binding_ids {
                if bindings.remove(binding_id).is_ok() {
                    instance.detach_binding(binding_id);
                    debug!(%instance_id, %binding_id, "binding removed with its instance");
                }
            }
        }
        instances.retire(instance_id, op);
    }
}

/// Turn a synchronously failed operation into an error reply.
pub(crate) fn fail_if_failed(resource_id: &str, op: &Operation) -> BrokerResult<()> {
    if op.state() != OperationState::Failed {
        return Ok(());
    }
    warn!(%resource_id, operation = %op.name(), kind = %op.kind(), "simulated operation failed");
    Err(BrokerError::OperationFailed {
        description: op.description(),
        instance_usable: op.instance_usable(),
        update_repeatable: op.update_repeatable(),
    })
}

/// An instance whose deprovision already succeeded is on its way out of the
/// live table and no longer accepts requests.
pub(crate) fn live_instance(instance: Option<Arc<Instance>>) -> Option<Arc<Instance>> {
    instance.filter(|i| !i.is_deprovisioned())
}

fn not_found(instance_id: &str) -> BrokerError {
    BrokerError::NotFound(format!("instance {instance_id} not found"))
}

fn busy(instance_id: &str) -> BrokerError {
    BrokerError::ConcurrencyError(format!(
        "another operation on instance {instance_id} is in progress"
    ))
}

//! Service binding lifecycle: bind (including rotation), fetch, poll, unbind.
//!
//! Every path that touches both tables takes the instance table first.

use std::sync::Arc;

use tracing::{debug, info};

use osbsim_core::OperationKind;
use osbsim_core::request::{
    BindRequest, FetchFilter, LastOperationQuery, RequestOptions, UnbindRequest,
};
use osbsim_core::response::{
    BindingResponse, FetchBindingResponse, LastOperationResponse, OperationResponse,
};
use osbsim_state::{Binding, Instance, Operation, TableWriter, epoch_secs};

use crate::context::{self, BrokerContext};
use crate::deployment::{fail_if_failed, live_instance};
use crate::error::{BrokerError, BrokerResult};
use crate::reply::{self, Reply, Status};
use crate::simulation::plan_operation;
use crate::snapshot;

#[derive(Clone)]
pub struct BindingService {
    ctx: Arc<BrokerContext>,
}

impl BindingService {
    pub fn new(ctx: Arc<BrokerContext>) -> Self {
        Self { ctx }
    }

    /// Create a binding, rotate an existing one, or replay an identical request.
    pub async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        request: BindRequest,
        options: &RequestOptions,
    ) -> BrokerResult<Reply<BindingResponse>> {
        let instances = self.ctx.instances.read().await;
        let mut bindings = self.ctx.bindings.write().await;

        if let Some(existing) = bindings.get(binding_id) {
            if !existing.matches(instance_id, &request) {
                return Err(BrokerError::Conflict(format!(
                    "binding {binding_id} already exists with different attributes"
                )));
            }
            drop(bindings);
            drop(instances);
            return self.replay_bind(&existing).await;
        }

        let instance = live_instance(instances.get(instance_id)).ok_or_else(|| {
            BrokerError::NotFound(format!("instance {instance_id} not found"))
        })?;
        if request.service_id != instance.offering_id() {
            return Err(BrokerError::BadRequest(format!(
                "service_id {:?} does not match instance {instance_id}",
                request.service_id
            )));
        }
        let offering = self.ctx.owning_offering(instance.offering_id())?;
        let plan = context::plan(offering, &request.plan_id)?;
        if !offering.plan_bindable(plan) {
            return Err(BrokerError::BadRequest(format!(
                "plan {:?} of service {:?} is not bindable",
                plan.id, offering.id
            )));
        }
        if instance.operations().is_busy() {
            return Err(BrokerError::ConcurrencyError(format!(
                "an operation on instance {instance_id} is in progress"
            )));
        }

        let now = epoch_secs();
        let binding = match &request.predecessor_binding_id {
            Some(predecessor_id) => {
                if !options.api_version.supports_rotation() {
                    return Err(BrokerError::BadRequest(format!(
                        "binding rotation requires broker API version 2.17, got {}",
                        options.api_version
                    )));
                }
                let predecessor = live_binding(bindings.get(predecessor_id), instance_id)
                    .ok_or_else(|| {
                        BrokerError::BadRequest(format!(
                            "predecessor binding {predecessor_id} not found on instance {instance_id}"
                        ))
                    })?;
                if predecessor.plan_id() != request.plan_id {
                    return Err(BrokerError::BadRequest(format!(
                        "plan_id {:?} does not match predecessor binding {predecessor_id}",
                        request.plan_id
                    )));
                }
                let snapshot = snapshot::rotate(
                    predecessor.snapshot(),
                    binding_id,
                    instance_id,
                    &self.ctx.settings,
                    now,
                );
                predecessor.rotate(binding_id, snapshot)
            }
            None => {
                let snapshot =
                    snapshot::compute(binding_id, instance_id, offering, &self.ctx.settings, now);
                Binding::new(binding_id, instance_id, &request, snapshot)
            }
        };
        let op_plan = plan_operation(
            OperationKind::Bind,
            binding.parameters(),
            &self.ctx.settings.behavior,
            options,
        )?;

        let binding = Arc::new(binding);
        bindings.insert(binding_id, Arc::clone(&binding))?;
        instance.attach_binding(binding_id);
        let running = binding.operations().begin().await.start(op_plan);
        drop(bindings);
        drop(instances);

        let op = running.finish().await;
        info!(
            %instance_id,
            %binding_id,
            predecessor = binding.predecessor_id().unwrap_or(""),
            operation = %op.name(),
            asynchronous = op.is_async(),
            "binding created"
        );

        if op.is_async() {
            return Ok(Reply::new(
                Status::Accepted,
                BindingResponse {
                    operation: Some(op.name().to_string()),
                    ..BindingResponse::default()
                },
            ));
        }
        fail_if_failed(binding_id, &op)?;
        binding.first_delivery();
        Ok(Reply::new(Status::Created, binding.response(None)))
    }

    async fn replay_bind(&self, binding: &Binding) -> BrokerResult<Reply<BindingResponse>> {
        binding.operations().settled().await;
        let binding_id = binding.id();

        if binding.is_unbound() {
            return Err(BrokerError::ConcurrencyError(format!(
                "binding {binding_id} is being removed"
            )));
        }
        if let Some(op) = binding.last_operation() {
            if op.is_async() && op.is_in_progress() {
                debug!(%binding_id, operation = %op.name(), "bind replay, still in progress");
                return Ok(Reply::new(
                    Status::Accepted,
                    BindingResponse {
                        operation: Some(op.name().to_string()),
                        ..BindingResponse::default()
                    },
                ));
            }
            if op.kind() == OperationKind::Bind {
                fail_if_failed(binding_id, &op)?;
            }
        }
        if !binding.first_delivery() && self.ctx.settings.response.return_once {
            debug!(%binding_id, "bind replay, response already delivered");
            return Ok(Reply::empty(Status::Ok));
        }
        debug!(%binding_id, "bind replay");
        Ok(Reply::ok(binding.response(None)))
    }

    pub async fn fetch(
        &self,
        instance_id: &str,
        binding_id: &str,
        filter: &FetchFilter,
    ) -> BrokerResult<Reply<FetchBindingResponse>> {
        let instances = self.ctx.instances.read().await;
        let instance = instances.get(instance_id).ok_or_else(|| {
            BrokerError::NotFound(format!("instance {instance_id} not found"))
        })?;
        let offering = self.ctx.owning_offering(instance.offering_id())?;
        if !offering.bindings_retrievable {
            return Err(BrokerError::NotRetrievable(format!(
                "bindings of service {:?} are not retrievable",
                offering.id
            )));
        }

        let bindings = self.ctx.bindings.read().await;
        let binding = live_binding(bindings.get(binding_id), instance_id)
            .ok_or_else(|| not_found(binding_id))?;
        if binding.is_binding() {
            return Err(BrokerError::NotFound(format!(
                "binding {binding_id} is still being created"
            )));
        }
        context::check_filter(binding.matches_filter(filter), filter)?;

        if !binding.first_delivery() && self.ctx.settings.response.return_once {
            debug!(%binding_id, "binding already delivered");
            return Ok(Reply::empty(Status::Ok));
        }
        Ok(Reply::ok(
            binding.fetch_response(self.ctx.settings.response.fetch_parameters),
        ))
    }

    /// Report the named (or last) operation of a binding.
    pub async fn last_operation(
        &self,
        instance_id: &str,
        binding_id: &str,
        query: &LastOperationQuery,
    ) -> BrokerResult<Reply<LastOperationResponse>> {
        let bindings = self.ctx.bindings.read().await;

        if let Some(binding) = owned_binding(bindings.get(binding_id), instance_id) {
            drop(bindings);
            let filter = query.filter();
            context::check_filter(binding.matches_filter(&filter), &filter)?;
            let op = match &query.operation {
                Some(name) => binding.operations().get(name).ok_or_else(|| {
                    BrokerError::NotFound(format!(
                        "operation {name} not found for binding {binding_id}"
                    ))
                })?,
                None => binding
                    .last_operation()
                    .ok_or_else(|| not_found(binding_id))?,
            };
            return Ok(Reply::ok(reply::describe(&op)));
        }

        let retired = self.ctx.bindings.consume_retired(binding_id);
        drop(bindings);
        match retired {
            Some(op) => Ok(reply::describe_retired(&op)),
            None => Err(not_found(binding_id)),
        }
    }

    pub async fn unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
        request: &UnbindRequest,
        options: &RequestOptions,
    ) -> BrokerResult<Reply<OperationResponse>> {
        let instances = self.ctx.instances.read().await;
        let mut bindings = self.ctx.bindings.write().await;
        let binding = live_binding(bindings.get(binding_id), instance_id).ok_or_else(|| {
            BrokerError::Gone(format!("binding {binding_id} does not exist"))
        })?;

        if request.service_id != binding.offering_id() || request.plan_id != binding.plan_id() {
            return Err(BrokerError::BadRequest(format!(
                "service_id {:?} / plan_id {:?} do not match binding {binding_id}",
                request.service_id, request.plan_id
            )));
        }
        let ticket = binding.operations().try_begin().ok_or_else(|| {
            BrokerError::ConcurrencyError(format!(
                "another operation on binding {binding_id} is in progress"
            ))
        })?;
        let op_plan = plan_operation(
            OperationKind::Unbind,
            binding.parameters(),
            &self.ctx.settings.behavior,
            options,
        )?;

        if op_plan.asynchronous {
            let op = ticket.run(op_plan).await;
            let name = op.name().to_string();
            retire(&mut bindings, instances.get(instance_id), &binding, op);
            info!(%instance_id, %binding_id, operation = %name, "unbind accepted");
            return Ok(Reply::new(
                Status::Accepted,
                OperationResponse {
                    operation: Some(name),
                },
            ));
        }

        let running = ticket.start(op_plan);
        drop(bindings);
        drop(instances);
        let op = running.finish().await;
        fail_if_failed(binding_id, &op)?;

        let instances = self.ctx.instances.read().await;
        let mut bindings = self.ctx.bindings.write().await;
        retire(&mut bindings, instances.get(instance_id), &binding, op);
        info!(%instance_id, %binding_id, "binding removed");
        Ok(Reply::empty(Status::Ok))
    }
}

/// A binding only counts as found when it belongs to the given instance.
fn owned_binding(binding: Option<Arc<Binding>>, instance_id: &str) -> Option<Arc<Binding>> {
    binding.filter(|b| b.instance_id() == instance_id)
}

/// Owned and not already unbound.
fn live_binding(binding: Option<Arc<Binding>>, instance_id: &str) -> Option<Arc<Binding>> {
    owned_binding(binding, instance_id).filter(|b| !b.is_unbound())
}

fn retire(
    bindings: &mut TableWriter<'_, Binding>,
    instance: Option<Arc<Instance>>,
    binding: &Arc<Binding>,
    op: Arc<Operation>,
) {
    let binding_id = binding.id();
    if !bindings.remove_if_same(binding_id, binding) {
        return;
    }
    if let Some(instance) = instance {
        instance.detach_binding(binding_id);
    }
    bindings.retire(binding_id, op);
}

fn not_found(binding_id: &str) -> BrokerError {
    BrokerError::NotFound(format!("binding {binding_id} not found"))
}

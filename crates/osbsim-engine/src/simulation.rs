//! Resolve simulation knobs and settings into an operation plan.

use std::time::Duration;

use osbsim_core::OperationKind;
use osbsim_core::request::{Parameters, RequestOptions};
use osbsim_core::settings::BehaviorSettings;
use osbsim_state::OperationPlan;

use crate::error::{BrokerError, BrokerResult};

/// Plan `kind` from the knobs in `parameters`, falling back to the behavior
/// defaults. Fails with `AsyncRequired` when the plan is asynchronous and the
/// caller did not accept incomplete results.
pub fn plan_operation(
    kind: OperationKind,
    parameters: &Parameters,
    behavior: &BehaviorSettings,
    options: &RequestOptions,
) -> BrokerResult<OperationPlan> {
    let knobs = parameters.knobs().cloned().unwrap_or_default();

    let plan = OperationPlan {
        kind,
        asynchronous: knobs.asynchronous.unwrap_or(behavior.async_by_default),
        duration: Duration::from_secs(
            knobs
                .seconds_to_complete
                .unwrap_or(behavior.seconds_to_complete),
        ),
        fail: knobs.fail_at_operation == Some(kind),
        instance_usable: knobs.instance_usable_after_fail,
        update_repeatable: knobs.update_repeatable_after_fail,
    };

    if plan.asynchronous && !options.accepts_incomplete {
        return Err(BrokerError::AsyncRequired(format!(
            "{kind} is asynchronous and requires accepts_incomplete=true"
        )));
    }
    Ok(plan)
}

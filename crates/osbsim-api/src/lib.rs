//! osbsim-api: REST API for the broker simulator.
//!
//! Provides axum route handlers for the provisioning protocol. Every `/v2`
//! route requires an `X-Broker-API-Version` header no older than the
//! configured minimum.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/v2/catalog` | Service catalog |
//! | PUT | `/v2/service_instances/{instance_id}` | Provision an instance |
//! | GET | `/v2/service_instances/{instance_id}` | Fetch an instance |
//! | PATCH | `/v2/service_instances/{instance_id}` | Update an instance |
//! | DELETE | `/v2/service_instances/{instance_id}` | Deprovision an instance |
//! | GET | `/v2/service_instances/{instance_id}/last_operation` | Poll an instance operation |
//! | PUT | `/v2/service_instances/{instance_id}/service_bindings/{binding_id}` | Bind |
//! | GET | `/v2/service_instances/{instance_id}/service_bindings/{binding_id}` | Fetch a binding |
//! | DELETE | `/v2/service_instances/{instance_id}/service_bindings/{binding_id}` | Unbind |
//! | GET | `/v2/service_instances/{instance_id}/service_bindings/{binding_id}/last_operation` | Poll a binding operation |

pub mod handlers;
pub mod version;

use axum::Router;
use axum::middleware;
use axum::routing::get;
use osbsim_engine::Broker;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub broker: Broker,
}

/// Build the complete broker router.
pub fn build_router(broker: Broker) -> Router {
    let state = ApiState { broker };

    let broker_routes = Router::new()
        .route("/catalog", get(handlers::catalog))
        .route(
            "/service_instances/{instance_id}",
            get(handlers::fetch_instance)
                .put(handlers::provision)
                .patch(handlers::update)
                .delete(handlers::deprovision),
        )
        .route(
            "/service_instances/{instance_id}/last_operation",
            get(handlers::instance_last_operation),
        )
        .route(
            "/service_instances/{instance_id}/service_bindings/{binding_id}",
            get(handlers::fetch_binding)
                .put(handlers::bind)
                .delete(handlers::unbind),
        )
        .route(
            "/service_instances/{instance_id}/service_bindings/{binding_id}/last_operation",
            get(handlers::binding_last_operation),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            version::require_api_version,
        ))
        .with_state(state);

    Router::new().nest("/v2", broker_routes)
}

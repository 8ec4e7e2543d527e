//! Broker route handlers.
//!
//! Each handler decodes the request into the engine's typed form, calls the
//! matching lifecycle service and renders the reply. Empty bodies render as
//! `{}`; errors render as an error body under the error's own status.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use osbsim_core::ApiVersion;
use osbsim_core::request::{
    BindRequest, DeprovisionRequest, FetchFilter, LastOperationQuery, ProvisionRequest,
    RequestOptions, UnbindRequest, UpdateRequest,
};
use osbsim_engine::{BrokerError, BrokerResult, Reply, Status};

use crate::ApiState;

/// `accepts_incomplete` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct AsyncQuery {
    #[serde(default)]
    pub accepts_incomplete: bool,
}

impl AsyncQuery {
    fn options(&self, api_version: ApiVersion) -> RequestOptions {
        RequestOptions {
            accepts_incomplete: self.accepts_incomplete,
            api_version,
        }
    }
}

/// Query parameters of the two delete routes.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub accepts_incomplete: bool,
    pub service_id: Option<String>,
    pub plan_id: Option<String>,
}

impl DeleteQuery {
    fn ids(&self) -> Result<(String, String), BrokerError> {
        match (&self.service_id, &self.plan_id) {
            (Some(service_id), Some(plan_id)) => Ok((service_id.clone(), plan_id.clone())),
            _ => Err(BrokerError::BadRequest(
                "service_id and plan_id query parameters are required".to_string(),
            )),
        }
    }

    fn options(&self, api_version: ApiVersion) -> RequestOptions {
        RequestOptions {
            accepts_incomplete: self.accepts_incomplete,
            api_version,
        }
    }
}

fn status_code(status: Status) -> StatusCode {
    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn render<T: Serialize>(result: BrokerResult<Reply<T>>) -> Response {
    match result {
        Ok(reply) => {
            let status = status_code(reply.status);
            match reply.body {
                Some(body) => (status, Json(body)).into_response(),
                None => (status, Json(serde_json::json!({}))).into_response(),
            }
        }
        Err(err) => render_error(&err),
    }
}

fn render_error(err: &BrokerError) -> Response {
    let status = status_code(err.status());
    if status.is_server_error() {
        error!(error = %err, "request failed");
    } else {
        debug!(status = status.as_u16(), error = %err, "request rejected");
    }
    (status, Json(err.body())).into_response()
}

fn bad_body(rejection: JsonRejection) -> Response {
    render_error(&BrokerError::BadRequest(format!(
        "invalid request body: {}",
        rejection.body_text()
    )))
}

// ── Catalog ────────────────────────────────────────────────────

/// GET /v2/catalog
pub async fn catalog(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.broker.catalog().clone())
}

// ── Instances ──────────────────────────────────────────────────

/// PUT /v2/service_instances/{instance_id}
pub async fn provision(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Query(query): Query<AsyncQuery>,
    Extension(version): Extension<ApiVersion>,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    render(
        state
            .broker
            .deployments()
            .provision(&instance_id, request, &query.options(version))
            .await,
    )
}

/// GET /v2/service_instances/{instance_id}
pub async fn fetch_instance(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Query(filter): Query<FetchFilter>,
) -> Response {
    render(state.broker.deployments().fetch(&instance_id, &filter).await)
}

/// PATCH /v2/service_instances/{instance_id}
pub async fn update(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Query(query): Query<AsyncQuery>,
    Extension(version): Extension<ApiVersion>,
    body: Result<Json<UpdateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    render(
        state
            .broker
            .deployments()
            .update(&instance_id, request, &query.options(version))
            .await,
    )
}

/// DELETE /v2/service_instances/{instance_id}
pub async fn deprovision(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Query(query): Query<DeleteQuery>,
    Extension(version): Extension<ApiVersion>,
) -> Response {
    let (service_id, plan_id) = match query.ids() {
        Ok(ids) => ids,
        Err(err) => return render_error(&err),
    };
    let request = DeprovisionRequest {
        service_id,
        plan_id,
    };
    render(
        state
            .broker
            .deployments()
            .deprovision(&instance_id, &request, &query.options(version))
            .await,
    )
}

/// GET /v2/service_instances/{instance_id}/last_operation
pub async fn instance_last_operation(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    Query(query): Query<LastOperationQuery>,
) -> Response {
    render(
        state
            .broker
            .deployments()
            .last_operation(&instance_id, &query)
            .await,
    )
}

// ── Bindings ───────────────────────────────────────────────────

/// PUT /v2/service_instances/{instance_id}/service_bindings/{binding_id}
pub async fn bind(
    State(state): State<ApiState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(query): Query<AsyncQuery>,
    Extension(version): Extension<ApiVersion>,
    body: Result<Json<BindRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    render(
        state
            .broker
            .bindings()
            .bind(&instance_id, &binding_id, request, &query.options(version))
            .await,
    )
}

/// GET /v2/service_instances/{instance_id}/service_bindings/{binding_id}
pub async fn fetch_binding(
    State(state): State<ApiState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(filter): Query<FetchFilter>,
) -> Response {
    render(
        state
            .broker
            .bindings()
            .fetch(&instance_id, &binding_id, &filter)
            .await,
    )
}

/// DELETE /v2/service_instances/{instance_id}/service_bindings/{binding_id}
pub async fn unbind(
    State(state): State<ApiState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
    Extension(version): Extension<ApiVersion>,
) -> Response {
    let (service_id, plan_id) = match query.ids() {
        Ok(ids) => ids,
        Err(err) => return render_error(&err),
    };
    let request = UnbindRequest {
        service_id,
        plan_id,
    };
    render(
        state
            .broker
            .bindings()
            .unbind(&instance_id, &binding_id, &request, &query.options(version))
            .await,
    )
}

/// GET /v2/service_instances/{instance_id}/service_bindings/{binding_id}/last_operation
pub async fn binding_last_operation(
    State(state): State<ApiState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(query): Query<LastOperationQuery>,
) -> Response {
    render(
        state
            .broker
            .bindings()
            .last_operation(&instance_id, &binding_id, &query)
            .await,
    )
}

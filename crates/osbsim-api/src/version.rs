//! `X-Broker-API-Version` header check.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use osbsim_core::ApiVersion;
use osbsim_core::response::ErrorBody;

use crate::ApiState;

pub const API_VERSION_HEADER: &str = "x-broker-api-version";

/// Reject requests without a usable API version with 412, otherwise make
/// the parsed version available to handlers as an extension.
pub async fn require_api_version(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(API_VERSION_HEADER)
        .and_then(|value| value.to_str().ok());

    let version = match header.map(str::parse::<ApiVersion>) {
        Some(Ok(version)) => version,
        Some(Err(e)) => return precondition_failed(e.to_string()),
        None => return precondition_failed("missing X-Broker-API-Version header".to_string()),
    };

    let minimum = &state.broker.settings().protocol.min_api_version;
    if version < *minimum {
        return precondition_failed(format!(
            "broker API version {version} is older than the supported minimum {minimum}"
        ));
    }

    request.extensions_mut().insert(version);
    next.run(request).await
}

fn precondition_failed(description: String) -> Response {
    debug!(%description, "request rejected");
    (
        StatusCode::PRECONDITION_FAILED,
        Json(ErrorBody {
            error: None,
            description,
            instance_usable: None,
            update_repeatable: None,
        }),
    )
        .into_response()
}

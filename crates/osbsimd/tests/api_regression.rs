//! Broker API regression tests.
//!
//! Drives the full `/v2` router through `tower::ServiceExt::oneshot` and
//! checks the status codes and bodies the engine decisions map onto.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use osbsim_api::build_router;
use osbsim_core::{ApiVersion, Catalog, Settings};
use osbsim_engine::Broker;

const INSTANCE: &str = "/v2/service_instances/x";
const BINDING: &str = "/v2/service_instances/x/service_bindings/b1";
const DELETE_QUERY: &str = "service_id=osbsim-database&plan_id=osbsim-database-small";

fn router_with(settings: Settings) -> Router {
    build_router(Broker::new(Arc::new(Catalog::sample()), Arc::new(settings)))
}

fn router() -> Router {
    router_with(Settings::default())
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Broker-API-Version", "2.17");
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn provision_body(org: &str, simulation: Option<Value>) -> Value {
    let mut body = json!({
        "service_id": "osbsim-database",
        "plan_id": "osbsim-database-small",
        "organization_guid": org,
        "space_guid": "space",
    });
    if let Some(simulation) = simulation {
        body["parameters"] = json!({ "simulation": simulation });
    }
    body
}

fn bind_body() -> Value {
    json!({
        "service_id": "osbsim-database",
        "plan_id": "osbsim-database-small",
        "app_guid": "app",
    })
}

#[tokio::test]
async fn catalog_is_served_with_version_header() {
    let router = router();
    let (status, body) = send(&router, "GET", "/v2/catalog", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_or_old_version_header_is_precondition_failed() {
    let router = router();

    let req = Request::builder()
        .uri("/v2/catalog")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let req = Request::builder()
        .uri("/v2/catalog")
        .header("X-Broker-API-Version", "2.11")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let req = Request::builder()
        .uri("/v2/catalog")
        .header("X-Broker-API-Version", "latest")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn configured_minimum_version_is_enforced() {
    let mut settings = Settings::default();
    settings.protocol.min_api_version = ApiVersion::new(2, 18);
    let router = router_with(settings);
    let (status, body) = send(&router, "GET", "/v2/catalog", None).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert!(body["description"].as_str().unwrap().contains("2.18"));
}

#[tokio::test]
async fn sync_instance_scenario() {
    let router = router();

    let (status, _) = send(&router, "PUT", INSTANCE, Some(provision_body("org", None))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&router, "GET", &format!("{INSTANCE}/last_operation"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "succeeded");

    let (status, _) = send(&router, "PUT", INSTANCE, Some(provision_body("org", None))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&router, "PUT", INSTANCE, Some(provision_body("other", None))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&router, "DELETE", &format!("{INSTANCE}?{DELETE_QUERY}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, _) = send(&router, "GET", INSTANCE, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&router, "GET", &format!("{INSTANCE}/last_operation"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "failed");

    let (status, _) = send(&router, "DELETE", &format!("{INSTANCE}?{DELETE_QUERY}"), None).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn async_provision_requires_accepts_incomplete() {
    let router = router();
    let simulation = json!({"async": true, "secondsToComplete": 1});

    let (status, body) = send(
        &router,
        "PUT",
        INSTANCE,
        Some(provision_body("org", Some(simulation.clone()))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "AsyncRequired");

    let (status, body) = send(
        &router,
        "PUT",
        &format!("{INSTANCE}?accepts_incomplete=true"),
        Some(provision_body("org", Some(simulation))),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["operation"], "task_0");
}

#[tokio::test(start_paused = true)]
async fn async_delete_then_poll_is_gone() {
    let router = router();
    let simulation = json!({"async": true, "secondsToComplete": 2});
    let (status, _) = send(
        &router,
        "PUT",
        &format!("{INSTANCE}?accepts_incomplete=true"),
        Some(provision_body("org", Some(simulation))),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    tokio::time::sleep(Duration::from_secs(3)).await;

    let (status, body) = send(
        &router,
        "DELETE",
        &format!("{INSTANCE}?{DELETE_QUERY}&accepts_incomplete=true"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["operation"], "task_1");

    let (status, body) = send(&router, "GET", &format!("{INSTANCE}/last_operation"), None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["state"], "in progress");

    tokio::time::sleep(Duration::from_secs(3)).await;
    let (status, body) = send(&router, "GET", &format!("{INSTANCE}/last_operation"), None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["state"], "succeeded");
}

#[tokio::test]
async fn delete_requires_service_and_plan() {
    let router = router();
    send(&router, "PUT", INSTANCE, Some(provision_body("org", None))).await;
    let (status, body) = send(&router, "DELETE", INSTANCE, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["description"].as_str().unwrap().contains("service_id"));
}

#[tokio::test]
async fn update_and_fetch_round_trip() {
    let router = router();
    send(&router, "PUT", INSTANCE, Some(provision_body("org", None))).await;

    let update = json!({
        "service_id": "osbsim-database",
        "plan_id": "osbsim-database-large",
    });
    let (status, body) = send(&router, "PATCH", INSTANCE, Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["dashboard_url"].is_string());

    let (status, body) = send(&router, "GET", INSTANCE, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan_id"], "osbsim-database-large");

    let (status, body) = send(
        &router,
        "GET",
        &format!("{INSTANCE}?plan_id=osbsim-database-small"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationMismatch");
}

#[tokio::test]
async fn binding_lifecycle() {
    let router = router();
    send(&router, "PUT", INSTANCE, Some(provision_body("org", None))).await;

    let (status, created) = send(&router, "PUT", BINDING, Some(bind_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["credentials"]["username"].is_string());

    let (status, fetched) = send(&router, "GET", BINDING, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["credentials"], created["credentials"]);

    let (status, body) = send(&router, "GET", &format!("{BINDING}/last_operation"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "succeeded");

    let (status, body) = send(&router, "DELETE", &format!("{BINDING}?{DELETE_QUERY}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, _) = send(&router, "GET", BINDING, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn bind_against_busy_instance_is_concurrency_error() {
    let router = router();
    let simulation = json!({"async": true, "secondsToComplete": 5});
    send(
        &router,
        "PUT",
        &format!("{INSTANCE}?accepts_incomplete=true"),
        Some(provision_body("org", Some(simulation))),
    )
    .await;

    let (status, body) = send(
        &router,
        "PUT",
        &format!("{BINDING}?accepts_incomplete=true"),
        Some(bind_body()),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "ConcurrencyError");
}

#[tokio::test]
async fn rotation_creates_successor_binding() {
    let router = router();
    send(&router, "PUT", INSTANCE, Some(provision_body("org", None))).await;
    let (_, original) = send(&router, "PUT", BINDING, Some(bind_body())).await;

    let rotate = json!({
        "service_id": "osbsim-database",
        "plan_id": "osbsim-database-small",
        "predecessor_binding_id": "b1",
    });
    let successor = "/v2/service_instances/x/service_bindings/b2";
    let (status, rotated) = send(&router, "PUT", successor, Some(rotate)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(rotated["credentials"], original["credentials"]);

    let (status, body) = send(&router, "GET", &format!("{successor}/last_operation"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "bind succeeded");

    // The predecessor survives rotation.
    let (status, _) = send(&router, "GET", BINDING, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn failed_sync_provision_reports_flags() {
    let router = router();
    let simulation = json!({
        "failAtOperation": "provision",
        "instanceUsableAfterFail": false,
        "updateRepeatableAfterFail": true,
    });
    let (status, body) = send(
        &router,
        "PUT",
        INSTANCE,
        Some(provision_body("org", Some(simulation))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["instance_usable"], false);
    assert_eq!(body["update_repeatable"], true);

    let (status, body) = send(&router, "GET", &format!("{INSTANCE}/last_operation"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "failed");
}

//! HTTP round trips through the custody node router

use crate::test_utils::*;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use custody_core::CustodyConfig;
use custody_handoff::{InMemoryHandoffStore, RecordingNotifier};
use custody_node::{app, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct Node {
    router: Router,
    state: Arc<AppState>,
}

fn node() -> Node {
    init_test_logging();
    let world_clock = Arc::new(custody_core::ManualClock::new(current_timestamp_ms()));
    let state = Arc::new(
        AppState::with_parts(
            CustodyConfig::default(),
            Arc::new(InMemoryHandoffStore::new()),
            Arc::new(directory()),
            Arc::new(RecordingNotifier::new()),
            world_clock,
        )
        .unwrap(),
    );
    Node {
        router: app(state.clone()),
        state,
    }
}

async fn send(
    node: &Node,
    method: Method,
    uri: &str,
    caller: Option<(&str, &str)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = caller {
        builder = builder
            .header("x-caller-id", id)
            .header("x-caller-role", role)
            .header("x-caller-name", id);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = node
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

const SUPERVISOR: Option<(&str, &str)> = Some(("sup-1", "supervisor"));
const DRIVER: Option<(&str, &str)> = Some(("drv-1", "driver"));

#[tokio::test]
async fn test_full_chain_over_http() {
    let node = node();

    let (status, step1) = send(
        &node,
        Method::POST,
        "/handoffs",
        SUPERVISOR,
        Some(json!({
            "sessionId": "H1",
            "type": "facility_to_driver",
            "containers": [{"containerRef": "C1", "declaredWeight": 5}, {"containerRef": "C2"}],
            "receiver": {"accountId": "drv-1"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(step1["handoffId"], "FD-000001");
    let step1_id = step1["id"].as_str().unwrap().to_string();

    for caller in [SUPERVISOR, DRIVER] {
        let (status, _) = send(
            &node,
            Method::PATCH,
            &format!("/handoffs/{}/confirm", step1_id),
            caller,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, step2) = send(
        &node,
        Method::POST,
        "/handoffs",
        DRIVER,
        Some(json!({
            "sessionId": "H1",
            "type": "driver_to_incinerator",
            "containers": [{"containerRef": "C1", "declaredWeight": 5}, {"containerRef": "C2"}],
            "receiver": {"name": "Incinerator gate", "phone": "+15550199"},
            "channel": "telegram"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let step2_id = step2["id"].as_str().unwrap().to_string();
    let token = token_of(&node.state.service.get(&step2_id).unwrap());

    let (status, confirmed) = send(
        &node,
        Method::POST,
        &format!("/handoffs/confirm/{}", token),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["handoff"]["status"], "confirmed_by_receiver");

    // Replay of a used link is harmless
    let (status, replay) = send(
        &node,
        Method::POST,
        &format!("/handoffs/confirm/{}", token),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["applied"], false);

    send(
        &node,
        Method::PATCH,
        &format!("/handoffs/{}/confirm", step2_id),
        DRIVER,
        None,
    )
    .await;

    let (status, chain) = send(&node, Method::GET, "/handoffs/chain/H1", SUPERVISOR, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chain["completedSteps"], 2);
    assert_eq!(chain["progress"], 1.0);
    assert_eq!(chain["step2"]["status"], "completed");
    assert!(chain["step2"].get("confirmationToken").is_none());
}

#[tokio::test]
async fn test_token_dispute_over_http() {
    let node = node();
    let handoff = node
        .state
        .service
        .create(&driver(), step2_request("H2"))
        .unwrap();
    let token = token_of(&handoff);

    let (status, err) = send(
        &node,
        Method::POST,
        &format!("/handoffs/dispute/{}", token),
        None,
        Some(json!({"reason": "other"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["kind"], "validation_error");

    let (status, view) = send(
        &node,
        Method::POST,
        &format!("/handoffs/dispute/{}", token),
        None,
        Some(json!({"reason": "other", "description": "bag torn"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "disputed");
    assert_eq!(view["disputeReason"], "other");

    let (status, err) = send(
        &node,
        Method::GET,
        &format!("/handoffs/public/{}", token),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(err["kind"], "token_expired");
}

#[tokio::test]
async fn test_unknown_role_is_unauthorized() {
    let node = node();
    let (status, err) = send(&node, Method::GET, "/handoffs", Some(("x", "janitor")), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["kind"], "unauthorized");
}

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};

use timekeep_client::{
    Connectivity, GatewayError, HealthCheck, HttpGateway, RemoteGateway, StopOutcome,
    TimeEntryFilter,
};
use timekeep_core::{EntityId, NewTimeEntry, StartTimerRequest, TimeEntryChanges};

const TOKEN: &str = "test-token";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Serve `api` under `/api/v1` (plus `/health`) on an ephemeral port.
    async fn spawn(api: Router) -> Self {
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .nest("/api/v1", api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn gateway(&self, token: &str) -> HttpGateway {
        HttpGateway::new(&self.base_url, "/api/v1", token, Duration::from_secs(2)).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn entry_json(id: i64, end: Option<&str>) -> Value {
    json!({
        "id": id,
        "project_id": 7,
        "task_id": null,
        "start_time": "2026-03-02T09:00:00Z",
        "end_time": end,
        "duration_seconds": end.map(|_| 3600),
        "notes": "standup",
        "billable": true,
        "user_id": 1
    })
}

fn timer_api() -> Router {
    Router::new()
        .route(
            "/timer/status",
            get(|headers: HeaderMap| async move {
                if !authorized(&headers) {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid token"})));
                }
                (
                    StatusCode::OK,
                    Json(json!({
                        "active": true,
                        "timer": {
                            "id": 41,
                            "project_id": 7,
                            "start_time": "2026-03-02T09:00:00Z",
                            "elapsed_seconds": 90
                        }
                    })),
                )
            }),
        )
        .route(
            "/timer/start",
            post(|Json(body): Json<Value>| async move {
                (
                    StatusCode::CREATED,
                    Json(json!({
                        "id": 42,
                        "project_id": body["project_id"],
                        "task_id": body.get("task_id"),
                        "start_time": "2026-03-02T09:00:00Z"
                    })),
                )
            }),
        )
}

#[tokio::test]
async fn bearer_credential_is_sent_and_rejections_map_to_unauthorized() {
    let server = TestServer::spawn(timer_api()).await;

    let status = server.gateway(TOKEN).timer_status().await.unwrap();
    let running = status.running().unwrap();
    assert_eq!(running.id, Some(EntityId::new(41)));
    assert_eq!(running.project_id, EntityId::new(7));

    let err = server.gateway("stale").timer_status().await.unwrap_err();
    assert_eq!(err, GatewayError::Unauthorized);
}

#[tokio::test]
async fn start_timer_decodes_server_timer() {
    let server = TestServer::spawn(timer_api()).await;

    let timer = server
        .gateway(TOKEN)
        .start_timer(&StartTimerRequest {
            project_id: EntityId::new(7),
            task_id: Some(EntityId::new(3)),
            notes: None,
        })
        .await
        .unwrap();

    assert_eq!(timer.id, Some(EntityId::new(42)));
    assert_eq!(timer.task_id, Some(EntityId::new(3)));
}

#[tokio::test]
async fn stop_without_running_timer_is_already_stopped() {
    let api = Router::new().route(
        "/timer/stop",
        post(|| async { (StatusCode::NOT_FOUND, Json(json!({"error": "no active timer"}))) }),
    );
    let server = TestServer::spawn(api).await;

    assert_eq!(
        server.gateway(TOKEN).stop_timer().await.unwrap(),
        StopOutcome::AlreadyStopped
    );
}

#[tokio::test]
async fn stop_conflict_is_already_stopped() {
    let api = Router::new().route(
        "/timer/stop",
        post(|| async { (StatusCode::CONFLICT, "timer already stopped") }),
    );
    let server = TestServer::spawn(api).await;

    assert_eq!(
        server.gateway(TOKEN).stop_timer().await.unwrap(),
        StopOutcome::AlreadyStopped
    );
}

#[tokio::test]
async fn stop_returns_the_finished_entry() {
    let api = Router::new().route(
        "/timer/stop",
        post(|| async {
            Json(json!({
                "message": "timer stopped",
                "time_entry": entry_json(41, Some("2026-03-02T10:00:00Z"))
            }))
        }),
    );
    let server = TestServer::spawn(api).await;

    let StopOutcome::Stopped(Some(entry)) = server.gateway(TOKEN).stop_timer().await.unwrap() else {
        panic!("expected the stopped entry");
    };
    assert_eq!(entry.id, EntityId::new(41));
    assert_eq!(entry.duration_seconds, Some(3600));
}

fn entries_api() -> Router {
    Router::new()
        .route(
            "/time-entries",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                let wanted = query.get("project_id").map(String::as_str) == Some("7")
                    && query.get("billable").map(String::as_str) == Some("true");
                let data = if wanted {
                    vec![entry_json(1, Some("2026-03-02T10:00:00Z"))]
                } else {
                    Vec::new()
                };
                Json(json!({"data": data, "page": 1}))
            })
            .post(|Json(body): Json<Value>| async move {
                if let (Some(start), Some(end)) = (body["start_time"].as_str(), body["end_time"].as_str()) {
                    if end < start {
                        return (
                            StatusCode::UNPROCESSABLE_ENTITY,
                            Json(json!({"error": "end_time must be after start_time"})),
                        );
                    }
                }
                (StatusCode::CREATED, Json(entry_json(77, body["end_time"].as_str())))
            }),
        )
        .route(
            "/time-entries/:id",
            put(|Path(id): Path<i64>, Json(body): Json<Value>| async move {
                let mut entry = entry_json(id, Some("2026-03-02T10:00:00Z"));
                entry["notes"] = body["notes"].clone();
                Json(entry)
            })
            .delete(|Path(id): Path<i64>| async move {
                if id == 404 {
                    StatusCode::NOT_FOUND.into_response()
                } else {
                    StatusCode::NO_CONTENT.into_response()
                }
            }),
        )
        .route(
            "/projects",
            get(|| async {
                Json(json!({"items": [
                    {"id": 7, "name": "Website"},
                    {"id": 8, "name": "Audit", "status": "archived"}
                ]}))
            }),
        )
        .route(
            "/tasks",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                let project = query
                    .get("project_id")
                    .and_then(|p| p.parse::<i64>().ok())
                    .unwrap_or(0);
                Json(json!([{"id": 3, "project_id": project, "name": "Design"}]))
            }),
        )
}

#[tokio::test]
async fn list_endpoints_accept_envelopes_and_bare_arrays() {
    let server = TestServer::spawn(entries_api()).await;
    let gateway = server.gateway(TOKEN);

    let entries = gateway
        .list_time_entries(&TimeEntryFilter {
            project_id: Some(EntityId::new(7)),
            billable: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].is_running());

    let other = gateway
        .list_time_entries(&TimeEntryFilter {
            project_id: Some(EntityId::new(8)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(other.is_empty());

    let projects = gateway.list_projects(None).await.unwrap();
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[1].status, "archived");

    let tasks = gateway.list_tasks(Some(EntityId::new(7)), None).await.unwrap();
    assert_eq!(tasks[0].project_id, EntityId::new(7));
}

#[tokio::test]
async fn create_update_delete_round_trip_through_http() {
    let server = TestServer::spawn(entries_api()).await;
    let gateway = server.gateway(TOKEN);

    let created = gateway
        .create_time_entry(&NewTimeEntry {
            project_id: EntityId::new(7),
            task_id: None,
            start_time: "2026-03-02T09:00:00Z".parse().unwrap(),
            end_time: Some("2026-03-02T10:00:00Z".parse().unwrap()),
            notes: Some("standup".into()),
            billable: true,
        })
        .await
        .unwrap();
    assert_eq!(created.id, EntityId::new(77));

    let updated = gateway
        .update_time_entry(
            created.id,
            &TimeEntryChanges {
                notes: Some("retro".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.notes.as_deref(), Some("retro"));

    gateway.delete_time_entry(created.id).await.unwrap();
    assert_eq!(
        gateway.delete_time_entry(EntityId::new(404)).await.unwrap_err(),
        GatewayError::NotFound
    );
}

#[tokio::test]
async fn rejected_payload_maps_to_validation_with_server_message() {
    let server = TestServer::spawn(entries_api()).await;

    let err = server
        .gateway(TOKEN)
        .create_time_entry(&NewTimeEntry {
            project_id: EntityId::new(7),
            task_id: None,
            start_time: "2026-03-02T10:00:00Z".parse().unwrap(),
            end_time: Some("2026-03-02T09:00:00Z".parse().unwrap()),
            notes: None,
            billable: false,
        })
        .await
        .unwrap_err();

    assert_eq!(
        err,
        GatewayError::Validation("end_time must be after start_time".into())
    );
}

#[tokio::test]
async fn server_errors_are_transient() {
    let api = Router::new().route(
        "/projects",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "maintenance"}))) }),
    );
    let server = TestServer::spawn(api).await;

    let err = server.gateway(TOKEN).list_projects(None).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Server {
            status: 503,
            message: "maintenance".into()
        }
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let api = Router::new().route("/timer/status", get(|| async { "not json" }));
    let server = TestServer::spawn(api).await;

    let err = server.gateway(TOKEN).timer_status().await.unwrap_err();
    assert!(matches!(err, GatewayError::Decode(_)));
}

#[tokio::test]
async fn slow_server_times_out() {
    let api = Router::new().route(
        "/timer/status",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"active": false}))
        }),
    );
    let server = TestServer::spawn(api).await;
    let gateway =
        HttpGateway::new(&server.base_url, "/api/v1", TOKEN, Duration::from_millis(200)).unwrap();

    assert_eq!(gateway.timer_status().await.unwrap_err(), GatewayError::Timeout);
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway =
        HttpGateway::new(&format!("http://{addr}"), "/api/v1", TOKEN, Duration::from_secs(2)).unwrap();
    let err = gateway.list_projects(None).await.unwrap_err();

    assert!(matches!(err, GatewayError::Network(_)));
    assert!(!HealthCheck::new(&format!("http://{addr}"), Duration::from_secs(1)).is_online().await);
}

#[tokio::test]
async fn health_check_sees_running_server() {
    let server = TestServer::spawn(timer_api()).await;

    assert!(HealthCheck::new(&server.base_url, Duration::from_secs(1)).is_online().await);
}

//! End-to-end checks against an in-process stub of the marketplace back end.
//!
//! The stub speaks the same routes, headers and JSON shapes as the real
//! server, so these tests drive the real `ApiClient` over HTTP and the
//! export poller through its real transport.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use time::{Date, Month};

use portal::config::PortalConfig;
use portal::dashboard;
use portal::export::{DirectorySink, ExportError, ExportPoller, ExportStatus, MessageKind};
use portal::net::types::{RequestStatus, Role};
use portal::net::{ApiClient, ApiError};
use portal::session::Session;

const ADMIN_TOKEN: &str = "tok-admin";
const TASK_ID: &str = "task-1";
const CSV: &str = "id,service_name,status\n10,Plumbing,completed\n";

// =============================================================================
// STUB SERVER
// =============================================================================

struct Stub {
    /// Status checks answered with 202 before the CSV is handed over.
    pending_polls: u32,
    /// Answer every status check with a 500 instead.
    fail_task: bool,
    /// Id handed out by `/download-csv`.
    task_id: &'static str,
    /// Task ids as decoded by the router, one per status check.
    seen_ids: Mutex<Vec<String>>,
    polls: AtomicU32,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("Authentication-Token")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|token| token == ADMIN_TOKEN)
}

fn auth_required() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Authentication is required to access this resource" })),
    )
        .into_response()
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["password"] == "secret" {
        Json(json!({
            "token": ADMIN_TOKEN,
            "email": body["email"],
            "roles": "admin",
            "active": true,
            "id": 1,
        }))
        .into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid password" }))).into_response()
    }
}

async fn users(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return auth_required();
    }
    Json(json!([
        { "id": 1, "email": "admin@portal.test", "active": true, "roles": ["admin"] },
        { "id": 2, "email": "cust@portal.test", "active": true, "roles": ["customer"], "username": "cust" },
        { "id": 7, "email": "pro@portal.test", "active": false, "roles": ["professional"],
          "service_type": "Plumbing", "experience_years": 4 },
    ]))
    .into_response()
}

async fn activate(headers: HeaderMap, Path(user_id): Path<i64>) -> Response {
    if !authorized(&headers) {
        return auth_required();
    }
    Json(json!({ "message": format!("User {user_id} activated"), "active": true })).into_response()
}

async fn services() -> Json<Value> {
    Json(json!([
        { "id": 1, "name": "Plumbing", "price": 250.0, "time_required": 60, "description": "Leaks and pipes" },
        { "id": 2, "name": "Painting", "price": 900.5, "time_required": null, "description": null },
    ]))
}

async fn book(headers: HeaderMap, Path(_service_id): Path<i64>) -> Response {
    if !authorized(&headers) {
        return auth_required();
    }
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "No available professional found for this service" })),
    )
        .into_response()
}

async fn closed(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return auth_required();
    }
    Json(json!([
        { "id": 10, "service_name": "Plumbing", "date_completed": "2026-10-10", "status": "completed",
          "customer_id": 2, "professional_id": 7, "review": "Quick and tidy" },
        { "id": 11, "service_name": "Painting", "date_completed": null, "status": "cancelled",
          "customer_id": 2, "professional_id": 42, "review": null },
    ]))
    .into_response()
}

async fn download_csv(State(stub): State<Arc<Stub>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return auth_required();
    }
    Json(json!({ "task-id": stub.task_id })).into_response()
}

async fn get_csv(State(stub): State<Arc<Stub>>, headers: HeaderMap, Path(task): Path<String>) -> Response {
    if !authorized(&headers) {
        return auth_required();
    }
    let seen = stub.polls.fetch_add(1, Ordering::SeqCst);
    stub.seen_ids.lock().unwrap().push(task.clone());
    if stub.fail_task || task != stub.task_id {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Task failed" }))).into_response();
    }
    if seen < stub.pending_polls {
        return (StatusCode::ACCEPTED, Json(json!({ "status": "pending" }))).into_response();
    }
    ([(header::CONTENT_TYPE, "text/csv")], CSV).into_response()
}

async fn spawn_stub(pending_polls: u32, fail_task: bool) -> (String, Arc<Stub>) {
    spawn_stub_with_task(pending_polls, fail_task, TASK_ID).await
}

async fn spawn_stub_with_task(pending_polls: u32, fail_task: bool, task_id: &'static str) -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub {
        pending_polls,
        fail_task,
        task_id,
        seen_ids: Mutex::new(Vec::new()),
        polls: AtomicU32::new(0),
    });
    let app = Router::new()
        .route("/login", post(login))
        .route("/users", get(users))
        .route("/activate/user/{id}", post(activate))
        .route("/api/service", get(services))
        .route("/book/{id}", post(book))
        .route("/api/services/closed", get(closed))
        .route("/download-csv", get(download_csv))
        .route("/get-csv/{task}", get(get_csv))
        .with_state(Arc::clone(&stub));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), stub)
}

fn config(base_url: &str) -> PortalConfig {
    let base_url = base_url.to_owned();
    PortalConfig::from_lookup(move |key| match key {
        "PORTAL_BASE_URL" => Some(base_url.clone()),
        "PORTAL_EXPORT_POLL_INTERVAL_MS" => Some("20".to_owned()),
        _ => None,
    })
    .unwrap()
}

fn client(base_url: &str, token: Option<&str>) -> ApiClient {
    let session = Session { auth_token: token.map(ToOwned::to_owned), role: Some(Role::Admin), user_id: Some(1) };
    ApiClient::new(&config(base_url), Arc::new(session)).unwrap()
}

fn fixed_today() -> Date {
    Date::from_calendar_date(2026, Month::October, 18).unwrap()
}

// =============================================================================
// ACCOUNTS AND LISTS
// =============================================================================

#[tokio::test]
async fn login_returns_session_fields() {
    let (base, _) = spawn_stub(0, false).await;
    let login = client(&base, None).login("admin@portal.test", "secret").await.unwrap();
    assert_eq!(login.token, ADMIN_TOKEN);
    assert_eq!(login.roles, Role::Admin);
    assert_eq!(login.id, 1);

    let session = Session::from_login(&login);
    assert!(session.is_admin());
}

#[tokio::test]
async fn wrong_password_surfaces_server_reason() {
    let (base, _) = spawn_stub(0, false).await;
    let err = client(&base, None).login("admin@portal.test", "nope").await.unwrap_err();
    match err {
        ApiError::Server { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid password");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let (base, _) = spawn_stub(0, false).await;
    let err = client(&base, Some("stale")).list_users().await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized));
}

#[tokio::test]
async fn admin_lists_and_groups_users() {
    let (base, _) = spawn_stub(0, false).await;
    let api = client(&base, Some(ADMIN_TOKEN));
    let mut users = api.list_users().await.unwrap();
    assert_eq!(users.len(), 3);

    let groups = dashboard::group_users(&users);
    assert_eq!(groups.customers.len(), 1);
    assert_eq!(groups.professionals.len(), 1);
    assert_eq!(groups.professionals[0].service_type.as_deref(), Some("Plumbing"));

    let toggled = api.toggle_user_activation(7).await.unwrap();
    assert!(toggled.active);
    assert!(dashboard::apply_activation(&mut users, 7, toggled.active));
    assert!(users.iter().all(|user| user.active));
}

#[tokio::test]
async fn catalogue_is_public() {
    let (base, _) = spawn_stub(0, false).await;
    let services = client(&base, None).list_services().await.unwrap();
    assert_eq!(services.len(), 2);
    assert_eq!(services[1].description, None);
    assert_eq!(dashboard::search_services(&services, "pipes").len(), 1);
}

#[tokio::test]
async fn booking_failure_carries_server_text() {
    let (base, _) = spawn_stub(0, false).await;
    let err = client(&base, Some(ADMIN_TOKEN)).book_service(1).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "server returned HTTP 404: No available professional found for this service"
    );
}

#[tokio::test]
async fn closed_services_join_user_emails() {
    let (base, _) = spawn_stub(0, false).await;
    let api = client(&base, Some(ADMIN_TOKEN));
    let services = api.closed_services().await.unwrap();
    let users = api.list_users().await.unwrap();
    let rows = dashboard::closed_service_rows(&services, &users);

    assert_eq!(rows[0].customer_email, "cust@portal.test");
    assert_eq!(rows[0].professional_email, "pro@portal.test");
    assert_eq!(rows[0].review, "Quick and tidy");
    assert_eq!(rows[1].status, RequestStatus::Cancelled);
    assert_eq!(rows[1].professional_email, dashboard::UNKNOWN_EMAIL);
    assert_eq!(rows[1].review, dashboard::NO_REVIEW);
}

// =============================================================================
// EXPORT
// =============================================================================

fn poller(base: &str, token: Option<&str>, dir: &std::path::Path) -> ExportPoller {
    let api = client(base, token);
    ExportPoller::new(Arc::new(api), Arc::new(DirectorySink::new(dir)), config(base).poll).with_today(fixed_today)
}

#[tokio::test]
async fn export_saves_csv_after_pending_checks() {
    let (base, stub) = spawn_stub(2, false).await;
    let dir = tempfile::tempdir().unwrap();
    let mut poller = poller(&base, Some(ADMIN_TOKEN), dir.path());

    poller.start_export().await.unwrap();
    assert!(poller.is_exporting());
    let done = tokio::time::timeout(Duration::from_secs(5), poller.wait_until_settled())
        .await
        .unwrap();

    assert_eq!(done.status, ExportStatus::Succeeded);
    assert_eq!(done.task_id.as_deref(), Some(TASK_ID));
    assert_eq!(done.polls, 3);
    assert_eq!(stub.polls.load(Ordering::SeqCst), 3);
    assert_eq!(done.message.as_ref().map(|m| m.kind), Some(MessageKind::Success));

    let path = done.saved_to.unwrap();
    assert_eq!(path, dir.path().join("completed_services_2026-10-18.csv"));
    assert_eq!(std::fs::read_to_string(path).unwrap(), CSV);
    assert!(!poller.is_exporting());
}

#[tokio::test]
async fn export_with_rejected_token_never_polls() {
    let (base, stub) = spawn_stub(0, false).await;
    let dir = tempfile::tempdir().unwrap();
    let mut poller = poller(&base, Some("stale"), dir.path());

    assert_eq!(poller.start_export().await, Err(ExportError::AuthRequired));
    assert_eq!(poller.status(), ExportStatus::Unauthorized);
    assert_eq!(poller.snapshot().message.unwrap().text, "Authentication required");
    assert_eq!(stub.polls.load(Ordering::SeqCst), 0);
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn export_failure_reports_server_detail() {
    let (base, _) = spawn_stub(0, true).await;
    let dir = tempfile::tempdir().unwrap();
    let mut poller = poller(&base, Some(ADMIN_TOKEN), dir.path());

    poller.start_export().await.unwrap();
    let done = tokio::time::timeout(Duration::from_secs(5), poller.wait_until_settled())
        .await
        .unwrap();

    assert_eq!(done.status, ExportStatus::Failed);
    assert_eq!(done.polls, 1);
    assert_eq!(done.message.unwrap().text, "Export failed: Task failed");
    assert_eq!(done.error, Some(ExportError::PollFailed("Task failed".to_owned())));
}

#[tokio::test]
async fn export_task_id_with_reserved_characters_polls_the_same_task() {
    let task_id = "exports/2026?kind=closed#v2 final";
    let (base, stub) = spawn_stub_with_task(1, false, task_id).await;
    let dir = tempfile::tempdir().unwrap();
    let mut poller = poller(&base, Some(ADMIN_TOKEN), dir.path());

    poller.start_export().await.unwrap();
    let done = tokio::time::timeout(Duration::from_secs(5), poller.wait_until_settled())
        .await
        .unwrap();

    assert_eq!(done.status, ExportStatus::Succeeded, "{:?}", done.error);
    assert_eq!(done.task_id.as_deref(), Some(task_id));
    assert_eq!(done.polls, 2);
    assert_eq!(*stub.seen_ids.lock().unwrap(), vec![task_id.to_owned(), task_id.to_owned()]);
    assert_eq!(std::fs::read_to_string(done.saved_to.unwrap()).unwrap(), CSV);
}

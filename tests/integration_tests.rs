use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use chrono::Utc;
use tokio::sync::broadcast;
use tower::ServiceExt;

use autoshop::config::AppConfig;
use autoshop::db;
use autoshop::db::queries;
use autoshop::handlers;
use autoshop::models::{Role, User};
use autoshop::services::auth::issue_token;
use autoshop::services::notify::{ChannelEvent, NotificationChannel};
use autoshop::state::AppState;

const SECRET: &str = "test-secret";

// ── Mock Channels ──

struct RecordingChannel {
    events: Arc<Mutex<Vec<ChannelEvent>>>,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn publish(&self, key: &str, event: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(ChannelEvent {
            key: key.to_string(),
            event: event.to_string(),
            payload,
        });
        Ok(())
    }
}

struct OfflineChannel;

#[async_trait]
impl NotificationChannel for OfflineChannel {
    async fn publish(&self, _key: &str, _event: &str, _payload: serde_json::Value) -> anyhow::Result<()> {
        anyhow::bail!("relay offline")
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        token_secret: SECRET.to_string(),
        token_ttl_days: 30,
        notify_mode: "broadcast".to_string(),
        notify_webhook_url: "".to_string(),
        strict_transitions: false,
    }
}

fn build_state(config: AppConfig, notifier: Box<dyn NotificationChannel>) -> Arc<AppState> {
    let conn = db::init_db(":memory:").unwrap();
    let (events_tx, _) = broadcast::channel(16);
    Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        notifier,
        events_tx,
    })
}

fn test_state() -> Arc<AppState> {
    build_state(test_config(), Box::new(OfflineChannel))
}

fn test_state_with_events() -> (Arc<AppState>, Arc<Mutex<Vec<ChannelEvent>>>) {
    let events = Arc::new(Mutex::new(vec![]));
    let channel = RecordingChannel {
        events: Arc::clone(&events),
    };
    (build_state(test_config(), Box::new(channel)), events)
}

fn test_app(state: Arc<AppState>) -> Router {
    handlers::router(state)
}

/// Inserts a user directly and returns a bearer token for them.
fn seed_user(state: &AppState, id: &str, role: Role) -> String {
    let db = state.db.lock().unwrap();
    queries::insert_user(
        &db,
        &User {
            id: id.to_string(),
            name: format!("User {id}"),
            email: format!("{id}@example.com"),
            phone: None,
            role,
            created_at: Utc::now().naive_utc(),
        },
    )
    .unwrap();
    let expires_at = Utc::now().timestamp() + 3600;
    issue_token(SECRET, id, expires_at).unwrap()
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(res: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn book_appointment(state: &Arc<AppState>, token: &str, service: &str) -> String {
    let res = test_app(state.clone())
        .oneshot(request(
            "POST",
            "/api/appointments",
            Some(token),
            Some(serde_json::json!({
                "service": service,
                "service_type": "repair",
                "date": "2025-07-01",
                "time_slot": "10:00",
                "vehicle": {"make": "Honda", "model": "Civic", "year": "2019"}
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

// ── Health & Auth ──

#[tokio::test]
async fn test_health() {
    let res = test_app(test_state())
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "ok");
}

#[tokio::test]
async fn test_requires_token() {
    let state = test_state();

    let res = test_app(state.clone())
        .oneshot(request("GET", "/api/appointments/my", None, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = test_app(state)
        .oneshot(request("GET", "/api/auth/me", Some("garbage"), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_and_me() {
    let state = test_state();

    let res = test_app(state.clone())
        .oneshot(request(
            "POST",
            "/api/auth/register",
            None,
            Some(serde_json::json!({
                "name": "Sam",
                "email": "Sam@Example.com",
                "password": "brake-fluid",
                "phone": "555-0100"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let json = body_json(res).await;
    assert_eq!(json["user"]["role"], "customer");
    assert_eq!(json["user"]["email"], "sam@example.com");
    let token = json["token"].as_str().unwrap().to_string();

    let res = test_app(state.clone())
        .oneshot(request("GET", "/api/auth/me", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["name"], "Sam");

    // Same address again
    let res = test_app(state)
        .oneshot(request(
            "POST",
            "/api/auth/register",
            None,
            Some(serde_json::json!({"name": "Other", "email": "sam@example.com", "password": "x"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["error"], "Email already registered");
}

fn register_request(email: &str, password: &str) -> Request<Body> {
    request(
        "POST",
        "/api/auth/register",
        None,
        Some(serde_json::json!({"name": "Jo", "email": email, "password": password})),
    )
}

fn login_request(email: &str, password: &str) -> Request<Body> {
    request(
        "POST",
        "/api/auth/login",
        None,
        Some(serde_json::json!({"email": email, "password": password})),
    )
}

#[tokio::test]
async fn test_login_issues_fresh_token() {
    let state = test_state();
    let res = test_app(state.clone())
        .oneshot(register_request("jo@example.com", "spark-plug"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let user_id = body_json(res).await["user"]["id"].as_str().unwrap().to_string();

    let res = test_app(state.clone())
        .oneshot(login_request("JO@example.com", "spark-plug"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["user"]["id"], user_id.as_str());
    assert!(json["user"].get("password_hash").is_none());
    let token = json["token"].as_str().unwrap().to_string();

    let res = test_app(state)
        .oneshot(request("GET", "/api/auth/me", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["email"], "jo@example.com");
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let state = test_state();
    test_app(state.clone())
        .oneshot(register_request("jo@example.com", "spark-plug"))
        .await
        .unwrap();
    // Seeded users have no password and can't log in
    seed_user(&state, "cust-1", Role::Customer);

    for (email, password) in [
        ("jo@example.com", "wrong"),
        ("nobody@example.com", "spark-plug"),
        ("cust-1@example.com", ""),
    ] {
        let res = test_app(state.clone())
            .oneshot(login_request(email, password))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{email}");
        assert_eq!(body_json(res).await["error"], "Invalid credentials");
    }
}

#[tokio::test]
async fn test_register_requires_password() {
    let res = test_app(test_state())
        .oneshot(register_request("jo@example.com", ""))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_only_first_owner_may_register() {
    let state = test_state();
    let owner = |email: &str| {
        request(
            "POST",
            "/api/auth/register",
            None,
            Some(serde_json::json!({"name": "Shop", "email": email, "password": "torque", "role": "owner"})),
        )
    };

    let res = test_app(state.clone())
        .oneshot(owner("shop@example.com"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = test_app(state).oneshot(owner("intruder@example.com")).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_update_profile() {
    let state = test_state();
    let token = seed_user(&state, "cust-1", Role::Customer);

    let res = test_app(state)
        .oneshot(request(
            "PUT",
            "/api/auth/profile",
            Some(&token),
            Some(serde_json::json!({"phone": "555-0199"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["phone"], "555-0199");
    assert_eq!(json["name"], "User cust-1");
}

#[tokio::test]
async fn test_owner_routes_reject_customers() {
    let state = test_state();
    let token = seed_user(&state, "cust-1", Role::Customer);

    for uri in [
        "/api/appointments/all",
        "/api/appointments/stats",
        "/api/appointments/calendar",
        "/api/auth/customers",
        "/api/invoices/all",
        "/api/messages/rooms/all",
    ] {
        let res = test_app(state.clone())
            .oneshot(request("GET", uri, Some(&token), None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN, "{uri}");
    }
}

// ── Appointments ──

#[tokio::test]
async fn test_booking_starts_pending() {
    let state = test_state();
    let token = seed_user(&state, "cust-1", Role::Customer);

    let res = test_app(state.clone())
        .oneshot(request(
            "POST",
            "/api/appointments",
            Some(&token),
            Some(serde_json::json!({"service": "Oil change", "date": "2025-07-01T09:30", "time_slot": "09:30"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let json = body_json(res).await;
    assert_eq!(json["status"], "pending");
    assert_eq!(json["service_type"], "maintenance");
    assert_eq!(json["duration_minutes"], 60);
    assert_eq!(json["customer"]["id"], "cust-1");
    assert_eq!(json["status_history"].as_array().unwrap().len(), 1);
    assert_eq!(json["status_history"][0]["note"], "Appointment created");

    let res = test_app(state)
        .oneshot(request("GET", "/api/appointments/my", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(body_json(res).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_booking_validation() {
    let state = test_state();
    let token = seed_user(&state, "cust-1", Role::Customer);

    let res = test_app(state)
        .oneshot(request(
            "POST",
            "/api/appointments",
            Some(&token),
            Some(serde_json::json!({"service": "Oil change", "date": "next tuesday", "time_slot": "09:30"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_update_notifies_customer() {
    let (state, events) = test_state_with_events();
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);
    let id = book_appointment(&state, &customer, "Brake job").await;

    let res = test_app(state.clone())
        .oneshot(request(
            "PUT",
            &format!("/api/appointments/{id}/status"),
            Some(&owner),
            Some(serde_json::json!({"status": "confirmed", "mechanic": "Alex", "bay": "2"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["status"], "confirmed");
    assert_eq!(json["mechanic"], "Alex");
    assert_eq!(json["customer"]["name"], "User cust-1");
    let history = json["status_history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["note"], "Status updated to confirmed");

    let res = test_app(state.clone())
        .oneshot(request(
            "PUT",
            &format!("/api/appointments/{id}/status"),
            Some(&owner),
            Some(serde_json::json!({
                "status": "completed",
                "final_cost": 249.5,
                "repair_note": "Replaced front pads"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["final_cost"], 249.5);
    assert!(json["completed_at"].is_string());
    assert_eq!(json["status_history"][2]["note"], "Replaced front pads");
    // Unchanged fields survive the partial update
    assert_eq!(json["mechanic"], "Alex");

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.key == "customer_cust-1"));
    assert!(events.iter().all(|e| e.event == "appointment_updated"));
    assert_eq!(events[0].payload["status"], "confirmed");
    assert!(events[0].payload["note"].is_null());
    assert_eq!(events[1].payload["status"], "completed");
    assert_eq!(events[1].payload["service"], "Brake job");
    assert_eq!(events[1].payload["note"], "Replaced front pads");
    assert_eq!(events[1].payload["appointment_id"], id.as_str());
}

#[tokio::test]
async fn test_status_update_survives_notification_failure() {
    let state = test_state();
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);
    let id = book_appointment(&state, &customer, "Alignment").await;

    let res = test_app(state)
        .oneshot(request(
            "PUT",
            &format!("/api/appointments/{id}/status"),
            Some(&owner),
            Some(serde_json::json!({"status": "in-progress"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "in-progress");
}

#[tokio::test]
async fn test_status_update_unknown_appointment() {
    let (state, events) = test_state_with_events();
    let owner = seed_user(&state, "owner-1", Role::Owner);

    let res = test_app(state)
        .oneshot(request(
            "PUT",
            "/api/appointments/missing/status",
            Some(&owner),
            Some(serde_json::json!({"status": "confirmed"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_strict_transitions_reject_skips() {
    let config = AppConfig {
        strict_transitions: true,
        ..test_config()
    };
    let state = build_state(config, Box::new(OfflineChannel));
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);
    let id = book_appointment(&state, &customer, "Tires").await;

    let res = test_app(state.clone())
        .oneshot(request(
            "PUT",
            &format!("/api/appointments/{id}/status"),
            Some(&owner),
            Some(serde_json::json!({"status": "completed"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = test_app(state)
        .oneshot(request(
            "PUT",
            &format!("/api/appointments/{id}/status"),
            Some(&owner),
            Some(serde_json::json!({"status": "confirmed"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cancel_rules() {
    let state = test_state();
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let stranger = seed_user(&state, "cust-2", Role::Customer);
    let id = book_appointment(&state, &customer, "Battery").await;
    let uri = format!("/api/appointments/{id}/cancel");

    let res = test_app(state.clone())
        .oneshot(request("PUT", &uri, Some(&stranger), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = test_app(state.clone())
        .oneshot(request("PUT", &uri, Some(&customer), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["status"], "cancelled");
    assert_eq!(json["status_history"][1]["note"], "Cancelled by customer");

    // Already cancelled
    let res = test_app(state)
        .oneshot(request("PUT", &uri, Some(&customer), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_repair_notes_record_author() {
    let state = test_state();
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);
    let id = book_appointment(&state, &customer, "Diagnostics").await;

    let res = test_app(state)
        .oneshot(request(
            "POST",
            &format!("/api/appointments/{id}/notes"),
            Some(&owner),
            Some(serde_json::json!({"text": "Check engine code P0420"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["repair_notes"][0]["author"], "User owner-1");
    assert_eq!(json["status"], "pending");
}

#[tokio::test]
async fn test_list_all_filters() {
    let state = test_state();
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);
    book_appointment(&state, &customer, "Oil").await;
    let id = book_appointment(&state, &customer, "Brakes").await;
    test_app(state.clone())
        .oneshot(request("PUT", &format!("/api/appointments/{id}/cancel"), Some(&customer), None))
        .await
        .unwrap();

    let res = test_app(state.clone())
        .oneshot(request("GET", "/api/appointments/all?status=pending", Some(&owner), None))
        .await
        .unwrap();
    let json = body_json(res).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["service"], "Oil");
    assert_eq!(json[0]["customer"]["email"], "cust-1@example.com");

    let res = test_app(state.clone())
        .oneshot(request("GET", "/api/appointments/all?status=all&month=7&year=2025", Some(&owner), None))
        .await
        .unwrap();
    assert_eq!(body_json(res).await.as_array().unwrap().len(), 2);

    let res = test_app(state.clone())
        .oneshot(request("GET", "/api/appointments/all?month=8&year=2025", Some(&owner), None))
        .await
        .unwrap();
    assert!(body_json(res).await.as_array().unwrap().is_empty());

    let res = test_app(state)
        .oneshot(request("GET", "/api/appointments/all?status=lost", Some(&owner), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_calendar_range() {
    let state = test_state();
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);
    book_appointment(&state, &customer, "Oil").await;

    let res = test_app(state.clone())
        .oneshot(request(
            "GET",
            "/api/appointments/calendar?start=2025-06-30&end=2025-07-01",
            Some(&owner),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await.as_array().unwrap().len(), 1);

    let res = test_app(state)
        .oneshot(request(
            "GET",
            "/api/appointments/calendar?start=2025-07-02&end=2025-07-31",
            Some(&owner),
            None,
        ))
        .await
        .unwrap();
    assert!(body_json(res).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_stats() {
    let state = test_state();
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);
    book_appointment(&state, &customer, "Oil").await;
    book_appointment(&state, &customer, "Oil").await;
    book_appointment(&state, &customer, "Tires").await;

    let res = test_app(state)
        .oneshot(request("GET", "/api/appointments/stats", Some(&owner), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["total"], 3);
    assert_eq!(json["pending"], 3);
    assert_eq!(json["in_progress"], 0);
    assert_eq!(json["service_breakdown"][0]["service"], "Oil");
    assert_eq!(json["service_breakdown"][0]["count"], 2);
}

// ── Invoices & Payments ──

async fn create_invoice(state: &Arc<AppState>, owner: &str) -> serde_json::Value {
    let res = test_app(state.clone())
        .oneshot(request(
            "POST",
            "/api/invoices",
            Some(owner),
            Some(serde_json::json!({
                "customer_id": "cust-1",
                "items": [
                    {"description": "Labor", "category": "labor", "quantity": 2, "unit_price": 50, "total": 100},
                    {"description": "Brake pads", "category": "parts", "quantity": 1, "unit_price": 50, "total": 50}
                ]
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    body_json(res).await
}

#[tokio::test]
async fn test_invoice_totals() {
    let state = test_state();
    seed_user(&state, "cust-1", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);

    let json = create_invoice(&state, &owner).await;
    assert_eq!(json["subtotal"], 150.0);
    assert_eq!(json["tax_rate"], 8.5);
    assert_eq!(json["tax"], 12.75);
    assert_eq!(json["total"], 162.75);
    assert_eq!(json["status"], "draft");
    assert!(json["invoice_number"].as_str().unwrap().starts_with("INV-"));

    let id = json["id"].as_str().unwrap();
    let res = test_app(state.clone())
        .oneshot(request(
            "PUT",
            &format!("/api/invoices/{id}"),
            Some(&owner),
            Some(serde_json::json!({"discount": 20, "status": "sent"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated = body_json(res).await;
    assert_eq!(updated["total"], 142.75);
    assert_eq!(updated["status"], "sent");
    assert_eq!(updated["invoice_number"], json["invoice_number"]);

    let res = test_app(state)
        .oneshot(request("GET", "/api/invoices/all?status=sent", Some(&owner), None))
        .await
        .unwrap();
    assert_eq!(body_json(res).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invoice_overflow_is_rejected_and_server_keeps_working() {
    let state = test_state();
    seed_user(&state, "cust-1", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);

    let res = test_app(state.clone())
        .oneshot(request(
            "POST",
            "/api/invoices",
            Some(&owner),
            Some(serde_json::json!({
                "customer_id": "cust-1",
                "items": [{"total": 5e28}, {"total": 5e28}]
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = test_app(state.clone())
        .oneshot(request("GET", "/api/auth/me", Some(&owner), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let json = create_invoice(&state, &owner).await;
    assert_eq!(json["total"], 162.75);
}

#[tokio::test]
async fn test_invoice_unknown_customer() {
    let state = test_state();
    let owner = seed_user(&state, "owner-1", Role::Owner);

    let res = test_app(state)
        .oneshot(request(
            "POST",
            "/api/invoices",
            Some(&owner),
            Some(serde_json::json!({"customer_id": "nobody", "items": []})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_customer_pays_invoice() {
    let state = test_state();
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let stranger = seed_user(&state, "cust-2", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);
    let invoice = create_invoice(&state, &owner).await;
    let id = invoice["id"].as_str().unwrap();

    let res = test_app(state.clone())
        .oneshot(request("GET", "/api/invoices/my", Some(&customer), None))
        .await
        .unwrap();
    assert_eq!(body_json(res).await.as_array().unwrap().len(), 1);

    let pay = |token: &str| {
        request(
            "POST",
            "/api/payments/pay",
            Some(token),
            Some(serde_json::json!({"invoice_id": id, "method": "card", "card_last4": "4242"})),
        )
    };

    let res = test_app(state.clone()).oneshot(pay(&stranger)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = test_app(state.clone()).oneshot(pay(&customer)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let receipt = body_json(res).await;
    assert_eq!(receipt["success"], true);
    assert!(receipt["transaction_id"].as_str().unwrap().starts_with("TXN-"));
    assert_eq!(receipt["invoice"]["status"], "paid");
    assert_eq!(receipt["invoice"]["payment_method"], "card");
    assert_eq!(receipt["invoice"]["notes"], "Payment processed via card ending 4242");
    assert!(receipt["invoice"]["paid_at"].is_string());
    assert_eq!(receipt["invoice"]["total"], 162.75);

    let res = test_app(state)
        .oneshot(request("GET", &format!("/api/invoices/{id}"), Some(&stranger), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

// ── Vehicles ──

#[tokio::test]
async fn test_vehicle_crud_is_owner_scoped() {
    let state = test_state();
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let stranger = seed_user(&state, "cust-2", Role::Customer);

    let res = test_app(state.clone())
        .oneshot(request(
            "POST",
            "/api/vehicles",
            Some(&customer),
            Some(serde_json::json!({"make": "Toyota", "model": "Corolla", "year": "2018", "mileage": 84000})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let id = body_json(res).await["id"].as_str().unwrap().to_string();
    let uri = format!("/api/vehicles/{id}");

    let res = test_app(state.clone())
        .oneshot(request("PUT", &uri, Some(&stranger), Some(serde_json::json!({"color": "red"}))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = test_app(state.clone())
        .oneshot(request("PUT", &uri, Some(&customer), Some(serde_json::json!({"mileage": 91000}))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["mileage"], 91000);
    assert_eq!(json["make"], "Toyota");

    let res = test_app(state.clone())
        .oneshot(request("DELETE", &uri, Some(&customer), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = test_app(state)
        .oneshot(request("GET", "/api/vehicles/my", Some(&customer), None))
        .await
        .unwrap();
    assert!(body_json(res).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_vehicle_requires_make_model_year() {
    let state = test_state();
    let customer = seed_user(&state, "cust-1", Role::Customer);

    let res = test_app(state)
        .oneshot(request(
            "POST",
            "/api/vehicles",
            Some(&customer),
            Some(serde_json::json!({"make": "Toyota", "model": " ", "year": "2018"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

// ── Messages ──

#[tokio::test]
async fn test_chat_flow() {
    let (state, events) = test_state_with_events();
    let customer = seed_user(&state, "cust-1", Role::Customer);
    let stranger = seed_user(&state, "cust-2", Role::Customer);
    let owner = seed_user(&state, "owner-1", Role::Owner);

    let res = test_app(state.clone())
        .oneshot(request(
            "POST",
            "/api/messages",
            Some(&customer),
            Some(serde_json::json!({"message": "Is my car ready?"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let json = body_json(res).await;
    assert_eq!(json["room_id"], "customer_cust-1");
    assert_eq!(json["sender_role"], "customer");

    {
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "customer_cust-1");
        assert_eq!(events[0].event, "message");
    }

    let res = test_app(state.clone())
        .oneshot(request("GET", "/api/messages/rooms/all", Some(&owner), None))
        .await
        .unwrap();
    let rooms = body_json(res).await;
    assert_eq!(rooms[0]["room_id"], "customer_cust-1");
    assert_eq!(rooms[0]["unread"], 1);

    let res = test_app(state.clone())
        .oneshot(request("GET", "/api/messages/customer_cust-1", Some(&stranger), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = test_app(state.clone())
        .oneshot(request("PUT", "/api/messages/customer_cust-1/read", Some(&owner), None))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["updated"], 1);

    let res = test_app(state)
        .oneshot(request("GET", "/api/messages/customer_cust-1", Some(&customer), None))
        .await
        .unwrap();
    let messages = body_json(res).await;
    assert_eq!(messages.as_array().unwrap().len(), 1);
    assert_eq!(messages[0]["read"], true);
}

#[tokio::test]
async fn test_events_require_token() {
    let res = test_app(test_state())
        .oneshot(request("GET", "/api/events?token=bogus", None, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

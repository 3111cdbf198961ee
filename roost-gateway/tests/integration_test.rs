//! Integration tests for the Roost gateway.
//!
//! Drives the full HTTP API over a scripted transport: registration and
//! email verification, login, the coin ledger, and the bot deployment flow.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use roost_common::config::{AuthConfig, Config, SessionsConfig};
use roost_gateway::{build_router, build_state, routes::LoginResponse};
use roost_sessions::{transport::mock::MockTransport, Transport, TransportEvent};

/// Test helper: isolated app over a scripted transport.
fn create_test_app(temp_dir: &TempDir, pairing_timeout_secs: u64) -> (axum::Router, Arc<MockTransport>) {
    let config = Config {
        auth: AuthConfig {
            jwt_secret: Some("test-secret-key-for-integration-tests!".into()),
            token_expiry_secs: 3600,
        },
        sessions: SessionsConfig {
            credentials_dir: Some(temp_dir.path().join("credentials")),
            pairing_timeout_secs,
            ..Default::default()
        },
        ..Default::default()
    };

    let transport = Arc::new(MockTransport::new());
    let state = build_state(
        &config,
        transport.clone() as Arc<dyn Transport>,
        Some(temp_dir.path().join("db")),
    )
    .unwrap();

    (build_router(state), transport)
}

/// Helper to make a request and get JSON response.
async fn request_json(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);

    if let Some(t) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }

    let request = if let Some(b) = body {
        request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&b).unwrap()))
            .unwrap()
    } else {
        request.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };

    (status, json)
}

/// The verification code is only ever emailed; tests read it straight from
/// the user database.
fn verification_code(temp_dir: &TempDir, username: &str) -> String {
    let conn = rusqlite::Connection::open(temp_dir.path().join("db/users.db")).unwrap();
    conn.query_row(
        "SELECT verification_code FROM users WHERE username = ?1",
        [username],
        |row| row.get(0),
    )
    .unwrap()
}

/// Register, verify, and log in a user; returns the bearer token.
async fn register_and_login(app: &axum::Router, temp_dir: &TempDir, username: &str) -> String {
    let (status, _) = request_json(
        app,
        Method::POST,
        "/api/v1/auth/register",
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "password123"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let code = verification_code(temp_dir, username);
    let (status, _) = request_json(
        app,
        Method::POST,
        "/api/v1/auth/verify",
        Some(json!({ "username": username, "code": code })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, login) = request_json(
        app,
        Method::POST,
        "/api/v1/auth/login",
        Some(json!({ "username": username, "password": "password123" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let login: LoginResponse = serde_json::from_value(login).unwrap();
    login.token
}

// ─────────────────────────────────────────────────────────────────────────────
// Health Check Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, 10);

    let (status, json) = request_json(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "roost-gateway");

    let (status, _) = request_json(&app, Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

// ─────────────────────────────────────────────────────────────────────────────
// Account Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_verify_login_flow() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, 10);

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/auth/register",
        Some(json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "password123"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    // Signup bonus credited immediately.
    assert_eq!(body["balance"], 100);
    assert_eq!(body["user"]["verified"], false);

    // Login is blocked until the email is verified.
    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/auth/login",
        Some(json!({ "username": "alice", "password": "password123" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "AUTH_NOT_VERIFIED");

    // Wrong code is rejected, correct one flips the account to verified.
    let (status, _) = request_json(
        &app,
        Method::POST,
        "/api/v1/auth/verify",
        Some(json!({ "username": "alice", "code": "this-is-wrong" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let code = verification_code(&temp_dir, "alice");
    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/auth/verify",
        Some(json!({ "username": "alice", "code": code })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/auth/login",
        Some(json!({ "username": "alice", "password": "password123" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let login: LoginResponse = serde_json::from_value(body).unwrap();
    assert!(!login.token.is_empty());

    let (status, body) =
        request_json(&app, Method::GET, "/api/v1/auth/me", None, Some(&login.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
}

#[tokio::test]
async fn test_register_duplicate_username() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, 10);

    register_and_login(&app, &temp_dir, "taken").await;

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/auth/register",
        Some(json!({
            "username": "taken",
            "email": "other@example.com",
            "password": "password123"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "USER_EXISTS");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, 10);

    let (status, _) = request_json(&app, Method::GET, "/api/v1/coins", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) =
        request_json(&app, Method::GET, "/api/v1/bots", None, Some("not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ─────────────────────────────────────────────────────────────────────────────
// Coin Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_coin_transfer() {
    let temp_dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&temp_dir, 10);

    let alice = register_and_login(&app, &temp_dir, "alice").await;
    register_and_login(&app, &temp_dir, "bob").await;

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/coins/transfer",
        Some(json!({ "to_username": "bob", "amount": 30 })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 70);

    // Over-spending is rejected and the balance stays put.
    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/coins/transfer",
        Some(json!({ "to_username": "bob", "amount": 1000 })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "COINS_INSUFFICIENT");

    let (status, body) =
        request_json(&app, Method::GET, "/api/v1/coins", None, Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 70);

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/api/v1/coins/transfer",
        Some(json!({ "to_username": "ghost", "amount": 5 })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─────────────────────────────────────────────────────────────────────────────
// Bot Deployment Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_deploy_bot_full_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let (app, transport) = create_test_app(&temp_dir, 10);
    let alice = register_and_login(&app, &temp_dir, "alice").await;

    // Script the pairing handshake once the session connects.
    let script = transport.clone();
    tokio::spawn(async move {
        script.wait_for_connects(1).await;
        script
            .emit(TransportEvent::PairingArtifact("SCAN-ME".into()))
            .await;
    });

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/bots",
        Some(json!({ "name": "support-bot" })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["pairing_artifact"], "SCAN-ME");
    assert_eq!(body["deployment"]["status"], "pairing");
    assert_eq!(body["connected"], false);
    let bot_id = body["deployment"]["id"].as_str().unwrap().to_string();

    // Deployment cost debited from the signup bonus.
    let (_, coins) = request_json(&app, Method::GET, "/api/v1/coins", None, Some(&alice)).await;
    assert_eq!(coins["balance"], 90);

    // The user scans the artifact and the connection opens.
    transport.emit(TransportEvent::Open).await;
    let uri = format!("/api/v1/bots/{bot_id}/status");
    let mut connected = false;
    for _ in 0..100 {
        let (status, body) = request_json(&app, Method::GET, &uri, None, Some(&alice)).await;
        assert_eq!(status, StatusCode::OK);
        if body["connected"] == true {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(connected, "session never reached the open state");

    let (status, body) = request_json(&app, Method::GET, "/api/v1/bots", None, Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    // Stop the bot: session torn down, record marked stopped.
    let (status, body) = request_json(
        &app,
        Method::DELETE,
        &format!("/api/v1/bots/{bot_id}"),
        None,
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deployment"]["status"], "stopped");
    assert_eq!(body["connected"], false);
}

#[tokio::test]
async fn test_deploy_bot_insufficient_funds() {
    let temp_dir = TempDir::new().unwrap();
    let (app, transport) = create_test_app(&temp_dir, 10);
    let alice = register_and_login(&app, &temp_dir, "alice").await;

    // Drain the balance with transfers to another account.
    register_and_login(&app, &temp_dir, "sink").await;
    let (status, _) = request_json(
        &app,
        Method::POST,
        "/api/v1/coins/transfer",
        Some(json!({ "to_username": "sink", "amount": 95 })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/bots",
        Some(json!({ "name": "broke-bot" })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "COINS_INSUFFICIENT");
    // The session layer was never touched.
    assert_eq!(transport.connect_count(), 0);
}

#[tokio::test]
async fn test_deploy_bot_pairing_timeout_refunds() {
    let temp_dir = TempDir::new().unwrap();
    // Short pairing window; nobody ever scans.
    let (app, transport) = create_test_app(&temp_dir, 1);
    let alice = register_and_login(&app, &temp_dir, "alice").await;

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/bots",
        Some(json!({ "name": "silent-bot" })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body["code"], "BOT_PAIRING_TIMEOUT");
    assert_eq!(transport.connect_count(), 1);

    // Coins refunded, deployment recorded as failed.
    let (_, coins) = request_json(&app, Method::GET, "/api/v1/coins", None, Some(&alice)).await;
    assert_eq!(coins["balance"], 100);

    let (_, bots) = request_json(&app, Method::GET, "/api/v1/bots", None, Some(&alice)).await;
    assert_eq!(bots["bots"][0]["deployment"]["status"], "failed");

    // A failed deployment can be redeployed under the same name.
    let script = transport.clone();
    tokio::spawn(async move {
        script.wait_for_connects(2).await;
        script
            .emit(TransportEvent::PairingArtifact("SECOND-TRY".into()))
            .await;
    });
    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/bots",
        Some(json!({ "name": "silent-bot" })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["pairing_artifact"], "SECOND-TRY");
}

#[tokio::test]
async fn test_deploy_duplicate_name_conflicts() {
    let temp_dir = TempDir::new().unwrap();
    let (app, transport) = create_test_app(&temp_dir, 10);
    let alice = register_and_login(&app, &temp_dir, "alice").await;

    let script = transport.clone();
    tokio::spawn(async move {
        script.wait_for_connects(1).await;
        script.emit(TransportEvent::PairingArtifact("QR".into())).await;
    });
    let (status, _) = request_json(
        &app,
        Method::POST,
        "/api/v1/bots",
        Some(json!({ "name": "mybot" })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/bots",
        Some(json!({ "name": "mybot" })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "BOT_EXISTS");
    // No coins were taken for the rejected deploy.
    let (_, coins) = request_json(&app, Method::GET, "/api/v1/coins", None, Some(&alice)).await;
    assert_eq!(coins["balance"], 90);
}

#[tokio::test]
async fn test_bot_access_is_owner_only() {
    let temp_dir = TempDir::new().unwrap();
    let (app, transport) = create_test_app(&temp_dir, 10);
    let alice = register_and_login(&app, &temp_dir, "alice").await;
    let mallory = register_and_login(&app, &temp_dir, "mallory").await;

    let script = transport.clone();
    tokio::spawn(async move {
        script.wait_for_connects(1).await;
        script.emit(TransportEvent::PairingArtifact("QR".into())).await;
    });
    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/v1/bots",
        Some(json!({ "name": "alices-bot" })),
        Some(&alice),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let bot_id = body["deployment"]["id"].as_str().unwrap().to_string();

    let (status, _) = request_json(
        &app,
        Method::GET,
        &format!("/api/v1/bots/{bot_id}/status"),
        None,
        Some(&mallory),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request_json(
        &app,
        Method::DELETE,
        &format!("/api/v1/bots/{bot_id}"),
        None,
        Some(&mallory),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Each user only sees their own bots.
    let (_, bots) = request_json(&app, Method::GET, "/api/v1/bots", None, Some(&mallory)).await;
    assert_eq!(bots["total"], 0);
}

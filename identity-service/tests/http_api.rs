//! End-to-end HTTP tests over the full router with the in-memory store.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{spawn_app, spawn_app_with_config, test_config};
use identity_service::models::{OtpPurpose, Role};
use identity_service::store::IdentityStore;

async fn request(
    app: &Router,
    method: &str,
    path: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn post(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    request(app, "POST", path, None, Some(body)).await
}

fn wrong_code(actual: &str) -> &'static str {
    if actual == "000000" {
        "000001"
    } else {
        "000000"
    }
}

#[tokio::test]
async fn health_reports_healthy() {
    let t = spawn_app();
    let (status, body) = request(&t.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn register_creates_unverified_account_and_emails_code() {
    let t = spawn_app();

    let (status, body) = post(
        &t.app,
        "/auth/register",
        json!({
            "email": "New@Example.com",
            "password": "hunter2hunter2",
            "full_name": "New User",
            "role": "RECRUITER"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["email"], "new@example.com");
    assert_eq!(body["user"]["role"], "RECRUITER");
    assert_eq!(body["user"]["email_verified"], false);
    assert!(body["user"].get("password_hash").is_none());
    // No session until the email is verified or the user logs in.
    assert!(body.get("access_token").is_none());

    let code = t
        .mailer
        .last_code_for("new@example.com", OtpPurpose::EmailVerification)
        .expect("verification code not sent");

    let (status, body) = post(
        &t.app,
        "/otp/verify",
        json!({"email": "new@example.com", "otp_code": code, "type": "EMAIL_VERIFICATION"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert_eq!(body["type"], "EMAIL_VERIFICATION");

    let user = t
        .store
        .find_user_by_email("new@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(user.email_verified);
}

#[tokio::test]
async fn register_rejects_duplicates_and_admin_self_assignment() {
    let t = spawn_app();
    common::seed_user(&t.store, "taken@example.com", "hunter2hunter2", Role::Candidate).await;

    let (status, body) = post(
        &t.app,
        "/auth/register",
        json!({"email": "taken@example.com", "password": "hunter2hunter2", "full_name": "Dup"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "USER_EXISTS");

    let (status, body) = post(
        &t.app,
        "/auth/register",
        json!({"email": "boss@example.com", "password": "hunter2hunter2", "full_name": "Boss", "role": "ADMIN"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn login_issues_tokens_and_me_returns_identity() {
    let t = spawn_app();
    common::seed_user(&t.store, "user@example.com", "hunter2hunter2", Role::Candidate).await;

    let (status, body) = post(
        &t.app,
        "/auth/login",
        json!({"email": "user@example.com", "password": "hunter2hunter2"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    let access = body["access_token"].as_str().unwrap().to_string();

    let (status, body) = request(&t.app, "GET", "/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "user@example.com");
    assert_eq!(body["role"], "CANDIDATE");
}

#[tokio::test]
async fn login_failures_are_distinguishable() {
    let t = spawn_app();
    common::seed_user(&t.store, "user@example.com", "hunter2hunter2", Role::Candidate).await;

    let (status, body) = post(
        &t.app,
        "/auth/login",
        json!({"email": "user@example.com", "password": "not-the-password"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");

    let (status, body) = post(
        &t.app,
        "/auth/login",
        json!({"email": "ghost@example.com", "password": "whatever1"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "USER_NOT_FOUND");
}

#[tokio::test]
async fn login_requires_a_verified_email() {
    let t = spawn_app();
    let mut user =
        common::seed_user(&t.store, "fresh@example.com", "hunter2hunter2", Role::Candidate).await;
    user.email_verified = false;
    t.store.insert_user(&user).await.unwrap();

    let (status, body) = post(
        &t.app,
        "/auth/login",
        json!({"email": "fresh@example.com", "password": "hunter2hunter2"}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn otp_login_counts_as_email_verification() {
    let t = spawn_app();
    let mut user =
        common::seed_user(&t.store, "new@example.com", "hunter2hunter2", Role::Candidate).await;
    user.email_verified = false;
    t.store.insert_user(&user).await.unwrap();

    let (status, _) = post(
        &t.app,
        "/otp/send",
        json!({"email": "new@example.com", "type": "LOGIN"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let code = t
        .mailer
        .last_code_for("new@example.com", OtpPurpose::Login)
        .expect("login code not sent");

    let (status, body) = post(
        &t.app,
        "/otp/verify",
        json!({"email": "new@example.com", "otp_code": code, "type": "LOGIN"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());

    // Mailbox control doubles as verification; password login now works.
    let (status, _) = post(
        &t.app,
        "/auth/login",
        json!({"email": "new@example.com", "password": "hunter2hunter2"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// Scenario: wrong code burns exactly one attempt, right code then logs in.
#[tokio::test]
async fn wrong_otp_decrements_attempt_budget() {
    let t = spawn_app();
    common::seed_user(&t.store, "user@example.com", "hunter2hunter2", Role::Candidate).await;

    let (status, body) = post(
        &t.app,
        "/otp/send",
        json!({"email": "user@example.com", "type": "LOGIN"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expires_in"], 600);

    let code = t.mailer.last_code();
    let (status, body) = post(
        &t.app,
        "/otp/verify",
        json!({"email": "user@example.com", "otp_code": wrong_code(&code), "type": "LOGIN"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "OTP_INVALID");
    assert_eq!(body["attempts_remaining"], 4);

    let (status, body) = post(
        &t.app,
        "/otp/verify",
        json!({"email": "user@example.com", "otp_code": code, "type": "LOGIN"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert_eq!(body["user"]["email"], "user@example.com");
}

// Scenario: refresh rotation is single use; replay kills the lineage.
#[tokio::test]
async fn refresh_replay_is_detected_and_kills_lineage() {
    let t = spawn_app();
    common::seed_user(&t.store, "user@example.com", "hunter2hunter2", Role::Candidate).await;

    let (_, login) = post(
        &t.app,
        "/auth/login",
        json!({"email": "user@example.com", "password": "hunter2hunter2"}),
    )
    .await;
    let original = login["refresh_token"].as_str().unwrap().to_string();

    let (status, rotated) = post(
        &t.app,
        "/auth/refresh-token",
        json!({"refresh_token": original}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let successor = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(successor, original);

    let (status, body) = post(
        &t.app,
        "/auth/refresh-token",
        json!({"refresh_token": original}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "TOKEN_REUSED");

    // The stolen-token response swept the successor as well.
    let (status, body) = post(
        &t.app,
        "/auth/refresh-token",
        json!({"refresh_token": successor}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

// Scenario: two sends inside the cooldown window.
#[tokio::test]
async fn otp_cooldown_rejects_immediate_resend() {
    let t = spawn_app();
    common::seed_user(&t.store, "user@example.com", "hunter2hunter2", Role::Candidate).await;

    let (status, _) = post(
        &t.app,
        "/otp/send",
        json!({"email": "user@example.com", "type": "LOGIN"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let req = Request::builder()
        .method("POST")
        .uri("/otp/resend")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"email": "user@example.com", "type": "LOGIN"}).to_string(),
        ))
        .unwrap();
    let response = t.app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .expect("Retry-After header missing");
    assert!(retry_after > 0 && retry_after <= 60);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "OTP_COOLDOWN");
    assert_eq!(body["retry_after"], retry_after);
}

// Scenario: a well-signed but expired access token reads as expired.
#[tokio::test]
async fn expired_access_token_is_rejected_as_expired() {
    let t = spawn_app_with_config(test_config(-5));
    let user =
        common::seed_user(&t.store, "user@example.com", "hunter2hunter2", Role::Candidate).await;

    let pair = t.sessions.issue(&user).await.unwrap();
    let (status, body) =
        request(&t.app, "GET", "/auth/me", Some(&pair.access_token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "TOKEN_EXPIRED");
}

#[tokio::test]
async fn admin_gate_distinguishes_401_from_403() {
    let t = spawn_app();
    let candidate =
        common::seed_user(&t.store, "user@example.com", "hunter2hunter2", Role::Candidate).await;
    let admin =
        common::seed_user(&t.store, "admin@example.com", "hunter2hunter2", Role::Admin).await;
    let target_path = format!("/admin/users/{}/revoke-sessions", candidate.user_id);

    // No credentials at all.
    let (status, body) = request(&t.app, "POST", &target_path, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");

    // Valid identity, insufficient role.
    let candidate_tokens = t.sessions.issue(&candidate).await.unwrap();
    let (status, body) = request(
        &t.app,
        "POST",
        &target_path,
        Some(&candidate_tokens.access_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    // Admin succeeds and sweeps the candidate's sessions.
    let admin_tokens = t.sessions.issue(&admin).await.unwrap();
    let (status, body) = request(
        &t.app,
        "POST",
        &target_path,
        Some(&admin_tokens.access_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions_revoked"], 1);

    let (status, _) = post(
        &t.app,
        "/auth/refresh-token",
        json!({"refresh_token": candidate_tokens.refresh_token}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_the_presented_session() {
    let t = spawn_app();
    common::seed_user(&t.store, "user@example.com", "hunter2hunter2", Role::Candidate).await;

    let (_, login) = post(
        &t.app,
        "/auth/login",
        json!({"email": "user@example.com", "password": "hunter2hunter2"}),
    )
    .await;
    let access = login["access_token"].as_str().unwrap().to_string();
    let refresh = login["refresh_token"].as_str().unwrap().to_string();

    let (status, _) = request(
        &t.app,
        "POST",
        "/auth/logout",
        Some(&access),
        Some(json!({"refresh_token": refresh})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(
        &t.app,
        "/auth/refresh-token",
        json!({"refresh_token": refresh}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn password_reset_flow_revokes_existing_sessions() {
    let t = spawn_app();
    common::seed_user(&t.store, "user@example.com", "old-password-1", Role::Candidate).await;

    let (_, login) = post(
        &t.app,
        "/auth/login",
        json!({"email": "user@example.com", "password": "old-password-1"}),
    )
    .await;
    let old_refresh = login["refresh_token"].as_str().unwrap().to_string();

    let (status, _) = post(
        &t.app,
        "/auth/forgot-password",
        json!({"email": "user@example.com"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let code = t
        .mailer
        .last_code_for("user@example.com", OtpPurpose::PasswordReset)
        .expect("reset code not sent");
    let (status, _) = post(
        &t.app,
        "/auth/reset-password",
        json!({"email": "user@example.com", "otp_code": code, "new_password": "new-password-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Old sessions and old password are both dead; the new password works.
    let (status, _) = post(
        &t.app,
        "/auth/refresh-token",
        json!({"refresh_token": old_refresh}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post(
        &t.app,
        "/auth/login",
        json!({"email": "user@example.com", "password": "old-password-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post(
        &t.app,
        "/auth/login",
        json!({"email": "user@example.com", "password": "new-password-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn validation_errors_use_the_shared_envelope() {
    let t = spawn_app();
    let (status, body) = post(
        &t.app,
        "/otp/send",
        json!({"email": "not-an-email", "type": "LOGIN"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn ip_rate_limit_applies_per_forwarded_address() {
    let mut config = test_config(60);
    config.rate_limit.otp_send_per_minute = 1;
    let t = spawn_app_with_config(config);
    common::seed_user(&t.store, "user@example.com", "hunter2hunter2", Role::Candidate).await;

    let send = |ip: &'static str| {
        let app = t.app.clone();
        async move {
            let req = Request::builder()
                .method("POST")
                .uri("/otp/send")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", ip)
                .body(Body::from(
                    json!({"email": "user@example.com", "type": "LOGIN"}).to_string(),
                ))
                .unwrap();
            app.oneshot(req).await.unwrap().status()
        }
    };

    assert_eq!(send("10.1.1.1").await, StatusCode::OK);
    // Second hit from the same address trips the IP limiter, before the
    // per-key cooldown is even consulted.
    assert_eq!(send("10.1.1.1").await, StatusCode::TOO_MANY_REQUESTS);
    // A different address is unaffected by the first one's budget, though
    // the challenge cooldown now answers for this key.
    let other = send("10.2.2.2").await;
    assert_eq!(other, StatusCode::TOO_MANY_REQUESTS);
}

//! Integration tests for code exchange and refresh against a mock provider

use google_readonly_auth::auth::{EXPIRY_SKEW_MS, now_millis};
use google_readonly_auth::{AuthError, OAuthConfig, TokenClient};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Clock slack allowed between the client computing `expires` and the test reading the clock
const TOLERANCE_MS: i64 = 5_000;

fn client_for(server: &MockServer) -> TokenClient {
    let config = OAuthConfig::builder()
        .client_id("client-id")
        .client_secret("client-secret")
        .token_url(format!("{}/token", server.uri()))
        .userinfo_url(format!("{}/userinfo", server.uri()))
        .build();
    TokenClient::with_http_client(
        config,
        reqwest::Client::builder().no_proxy().build().unwrap(),
    )
}

fn assert_expiry(expires: i64, ttl_secs: i64) {
    let expected = now_millis() + ttl_secs * 1000 - EXPIRY_SKEW_MS;
    assert!(
        (expected - expires).abs() < TOLERANCE_MS,
        "expires {expires} not within {TOLERANCE_MS}ms of {expected}"
    );
}

// ============================================================================
// Exchange
// ============================================================================

#[tokio::test]
async fn test_exchange_builds_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .and(body_string_contains("code_verifier=the-verifier"))
        .and(body_string_contains("client_secret=client-secret"))
        .and(body_string_contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A51122%2Foauth-callback",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.access",
            "refresh_token": "1//refresh",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer ya29.access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email": "reader@example.com",
            "verified_email": true
        })))
        .mount(&server)
        .await;

    let credential = client_for(&server)
        .exchange("auth-code", "the-verifier")
        .await
        .unwrap();

    assert_eq!(credential.access, "ya29.access");
    assert_eq!(credential.refresh, "1//refresh");
    assert_eq!(credential.email.as_deref(), Some("reader@example.com"));
    assert_expiry(credential.expires, 3599);
}

#[tokio::test]
async fn test_exchange_without_refresh_token_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.access",
            "expires_in": 3599
        })))
        .mount(&server)
        .await;

    let result = client_for(&server).exchange("code", "verifier").await;
    assert!(matches!(result, Err(AuthError::MissingRefreshToken)));
}

#[tokio::test]
async fn test_exchange_error_keeps_provider_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Bad Request"
        })))
        .expect(1)
        .mount(&server)
        .await;

    match client_for(&server).exchange("code", "verifier").await {
        Err(AuthError::ExchangeFailed { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("expected ExchangeFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_userinfo_failure_is_swallowed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let credential = client_for(&server).exchange("code", "verifier").await.unwrap();
    assert_eq!(credential.refresh, "r");
    assert!(credential.email.is_none());
}

#[tokio::test]
async fn test_missing_expires_in_defaults_to_one_hour() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a",
            "refresh_token": "r"
        })))
        .mount(&server)
        .await;

    let credential = client_for(&server).exchange("code", "verifier").await.unwrap();
    assert_expiry(credential.expires, 3600);
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_returns_access_and_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=1%2F%2Frefresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.fresh",
            "expires_in": 1800
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refreshed = client_for(&server).refresh("1//refresh").await.unwrap();
    assert_eq!(refreshed.access, "ya29.fresh");
    assert_expiry(refreshed.expires, 1800);
}

#[tokio::test]
async fn test_refresh_error_keeps_provider_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    match client_for(&server).refresh("stale").await {
        Err(AuthError::RefreshFailed { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("expired or revoked"));
        }
        other => panic!("expected RefreshFailed, got {other:?}"),
    }
}

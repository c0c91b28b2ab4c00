//! Integration tests for the client lifecycle API

#![cfg(unix)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use ovpnd_lib::{ClientManager, Config, EasyRsa, NameLocks, PkiStore, ProfileAssembler};
use ovpnd_server::api::{create_router, ApiState};
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// easyrsa stand-in that fabricates artifacts under $EASYRSA_PKI
const STUB_EASYRSA: &str = r#"#!/bin/sh
case "$1" in
    build-client-full)
        printf 'CERT %s\n' "$2" > "$EASYRSA_PKI/issued/$2.crt"
        printf 'KEY %s\n' "$2" > "$EASYRSA_PKI/private/$2.key"
        printf 'REQ %s\n' "$2" > "$EASYRSA_PKI/reqs/$2.req"
        echo "Certificate created"
        ;;
    revoke)
        echo "$2" >> "$EASYRSA_PKI/revoked.txt"
        echo "Revocation was successful."
        ;;
    gen-crl)
        printf 'CRL\n' > "$EASYRSA_PKI/crl.pem"
        echo "An updated CRL has been created."
        ;;
    *)
        echo "unknown command: $1" >&2
        exit 1
        ;;
esac
"#;

// Helper to create a test app over a throwaway PKI tree
fn create_test_app(api_token: Option<&str>) -> (TempDir, axum::Router) {
    let tmp = TempDir::new().unwrap();
    let ovpn_dir = tmp.path().to_path_buf();
    let pki = ovpn_dir.join("pki");
    std::fs::create_dir_all(pki.join("issued")).unwrap();
    std::fs::create_dir_all(pki.join("private")).unwrap();
    std::fs::create_dir_all(pki.join("reqs")).unwrap();
    std::fs::write(
        pki.join("ca.crt"),
        "-----BEGIN CERTIFICATE-----\nTEST-CA\n-----END CERTIFICATE-----",
    )
    .unwrap();

    let easyrsa_bin = ovpn_dir.join("easyrsa");
    std::fs::write(&easyrsa_bin, STUB_EASYRSA).unwrap();
    let mut perms = std::fs::metadata(&easyrsa_bin).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&easyrsa_bin, perms).unwrap();

    let mut config = Config::default()
        .with_ovpn_dir(&ovpn_dir)
        .with_easyrsa_bin(&easyrsa_bin)
        .with_tls_auth(false);
    if let Some(token) = api_token {
        config = config.with_api_token(token);
    }
    let config = Arc::new(config);

    let store = PkiStore::new(&config);
    let ca = Arc::new(EasyRsa::from_config(&config));
    let locks = Arc::new(NameLocks::new());
    let manager = Arc::new(ClientManager::new(store.clone(), ca, locks.clone()));
    let profiles = Arc::new(ProfileAssembler::new(Arc::clone(&config), store, locks));

    let app = create_router(ApiState {
        config,
        manager,
        profiles,
    });
    (tmp, app)
}

fn create_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/clients")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_tmp, app) = create_test_app(None);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_client_writes_artifacts() {
    let (tmp, app) = create_test_app(None);

    let response = app
        .oneshot(create_request(json!({"name": "alice"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Client created");
    assert_eq!(body["name"], "alice");

    let pki = tmp.path().join("pki");
    assert!(pki.join("issued").join("alice.crt").exists());
    assert!(pki.join("private").join("alice.key").exists());
    assert!(pki.join("reqs").join("alice.req").exists());
}

#[tokio::test]
async fn test_create_client_twice_is_idempotent() {
    let (_tmp, app) = create_test_app(None);

    let response = app
        .clone()
        .oneshot(create_request(json!({"name": "alice"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(create_request(json!({"name": "alice"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Client already exists");
}

#[tokio::test]
async fn test_create_with_overwrite_revokes_old_identity() {
    let (tmp, app) = create_test_app(None);

    let response = app
        .clone()
        .oneshot(create_request(json!({"name": "alice"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(create_request(json!({"name": "alice", "overwrite": true})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Client created");

    let revoked = std::fs::read_to_string(tmp.path().join("pki").join("revoked.txt")).unwrap();
    assert!(revoked.contains("alice"));
}

#[tokio::test]
async fn test_create_with_password() {
    let (tmp, app) = create_test_app(None);

    let response = app
        .oneshot(create_request(
            json!({"name": "frank", "password": "hunter2", "nopass": false}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Client created");
    assert!(tmp
        .path()
        .join("pki")
        .join("private")
        .join("frank.key")
        .exists());
}

#[tokio::test]
async fn test_create_rejects_blank_name() {
    let (_tmp, app) = create_test_app(None);

    let response = app
        .oneshot(create_request(json!({"name": "   "})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_profile_roundtrip_after_create() {
    let (_tmp, app) = create_test_app(None);

    let response = app
        .clone()
        .oneshot(create_request(json!({"name": "bob"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/clients/bob")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/x-openvpn-profile"
    );
    assert_eq!(
        response.headers().get("content-disposition").unwrap(),
        "attachment; filename=\"bob.ovpn\""
    );

    let profile = body_text(response).await;
    assert!(profile.starts_with("client\n"));
    assert!(profile.contains(
        "<ca>\n-----BEGIN CERTIFICATE-----\nTEST-CA\n-----END CERTIFICATE-----\n</ca>"
    ));
    assert!(profile.contains("<cert>\nCERT bob\n</cert>"));
    assert!(profile.contains("<key>\nKEY bob\n</key>"));
    assert!(profile.ends_with('\n'));
    assert!(!profile.ends_with("\n\n"));
    assert!(!profile.contains("\n\n\n"));
}

#[tokio::test]
async fn test_profile_missing_client_returns_404() {
    let (_tmp, app) = create_test_app(None);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/clients/nobody")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_partial_state_surfaces_conflict() {
    let (tmp, app) = create_test_app(None);

    let response = app
        .clone()
        .oneshot(create_request(json!({"name": "eve"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Lose the key out from under the service
    std::fs::remove_file(tmp.path().join("pki").join("private").join("eve.key")).unwrap();

    let response = app
        .clone()
        .oneshot(create_request(json!({"name": "eve"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The profile route reports the identity as unusable
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/clients/eve")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Overwrite repairs it
    let response = app
        .oneshot(create_request(json!({"name": "eve", "overwrite": true})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(tmp
        .path()
        .join("pki")
        .join("private")
        .join("eve.key")
        .exists());
}

#[tokio::test]
async fn test_revoke_client_keeps_artifacts() {
    let (tmp, app) = create_test_app(None);

    let response = app
        .clone()
        .oneshot(create_request(json!({"name": "carol"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/clients/carol")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Client revoked");
    assert_eq!(body["name"], "carol");
    assert_eq!(body["revoke"], "Revocation was successful.");
    assert_eq!(body["crl"], "An updated CRL has been created.");

    // Revocation never deletes issued material
    let pki = tmp.path().join("pki");
    assert!(pki.join("issued").join("carol.crt").exists());
    assert!(pki.join("private").join("carol.key").exists());
    assert!(pki.join("crl.pem").exists());
    let revoked = std::fs::read_to_string(pki.join("revoked.txt")).unwrap();
    assert!(revoked.contains("carol"));
}

#[tokio::test]
async fn test_revoke_requires_token_when_configured() {
    let (_tmp, app) = create_test_app(Some("hunter2"));

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/clients/alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Missing Bearer token");
}

#[tokio::test]
async fn test_revoke_rejects_wrong_token() {
    let (_tmp, app) = create_test_app(Some("hunter2"));

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/clients/alice")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn test_revoke_accepts_valid_token() {
    let (_tmp, app) = create_test_app(Some("hunter2"));

    let response = app
        .clone()
        .oneshot(create_request(json!({"name": "dave"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/clients/dave")
                .header("authorization", "Bearer hunter2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Client revoked");
}

#[tokio::test]
async fn test_create_is_not_token_gated() {
    let (_tmp, app) = create_test_app(Some("hunter2"));

    let response = app
        .oneshot(create_request(json!({"name": "grace"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_profile_override_query_params() {
    let (_tmp, app) = create_test_app(None);

    let response = app
        .clone()
        .oneshot(create_request(json!({"name": "henry"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/clients/henry?override_host=vpn.example.org&override_port=1194&proto=udp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let profile = body_text(response).await;
    assert!(profile.contains("remote vpn.example.org 1194"));
    assert!(profile.contains("proto udp"));
}

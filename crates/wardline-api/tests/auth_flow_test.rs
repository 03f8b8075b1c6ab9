#![allow(clippy::unwrap_used)]
// Integration tests for the login/logout flow.

use std::sync::Arc;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wardline_api::{ApiClient, ClientConfig, CredentialStore, Error, MemoryCredentialStore};

async fn setup() -> (MockServer, ApiClient, Arc<MemoryCredentialStore>) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let store = Arc::new(MemoryCredentialStore::new());
    let client = ApiClient::new(base_url, &ClientConfig::default(), Arc::clone(&store) as _)
        .unwrap();
    (server, client, store)
}

#[tokio::test]
async fn login_populates_all_four_keys() {
    let (server, client, store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({
            "email": "patel@hospital.example",
            "password": "hunter2"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "access-1",
            "refreshToken": "refresh-1",
            "user": { "role": "doctor", "name": "Dr. Patel" }
        })))
        .mount(&server)
        .await;

    let password: SecretString = "hunter2".to_owned().into();
    let user = client.login("patel@hospital.example", &password).await.unwrap();

    assert_eq!(user.role, "doctor");

    let creds = store.get();
    assert_eq!(creds.access_token.as_deref(), Some("access-1"));
    assert_eq!(creds.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(creds.role.as_deref(), Some("doctor"));
    assert_eq!(creds.display_name.as_deref(), Some("Dr. Patel"));
}

#[tokio::test]
async fn rejected_login_does_not_trigger_a_refresh() {
    let (server, client, store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "wrong password" })),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let password: SecretString = "wrong".to_owned().into();
    let result = client.login("patel@hospital.example", &password).await;

    match result {
        Err(Error::Http { status: 401, message }) => assert_eq!(message, "wrong password"),
        other => panic!("expected Http 401, got: {other:?}"),
    }
    assert!(store.get().is_empty());
}

#[tokio::test]
async fn logout_clears_credentials_even_when_server_is_down() {
    let (server, client, store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "access-1",
            "refreshToken": "refresh-1",
            "user": { "role": "admin", "name": "Sam Okoye" }
        })))
        .mount(&server)
        .await;

    let password: SecretString = "hunter2".to_owned().into();
    client.login("okoye@hospital.example", &password).await.unwrap();
    assert!(!store.get().is_empty());

    // Backend gone before logout: local session must clear anyway.
    drop(server);

    client.logout().await.unwrap();
    assert!(store.get().is_empty());
}

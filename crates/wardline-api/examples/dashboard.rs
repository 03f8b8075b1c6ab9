//! End-to-end wiring demo: log in, build an auto-refreshing appointment
//! resource, and hook it to realtime invalidation.
//!
//! Run against a local backend:
//!
//! ```sh
//! WARDLINE_SERVER=http://localhost:5000 \
//! WARDLINE_EMAIL=doctor@hospital.example \
//! WARDLINE_PASSWORD=... \
//! cargo run -p wardline-api --example dashboard
//! ```

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use url::Url;

use wardline_api::realtime::{ReconnectConfig, SocketHandle, events};
use wardline_api::{
    ApiClient, AsyncResource, ClientConfig, CredentialStore, InvalidationBridge,
    MemoryCredentialStore, ResourceOptions,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wardline_api=debug".into()),
        )
        .init();

    let server = std::env::var("WARDLINE_SERVER").unwrap_or_else(|_| "http://localhost:5000".into());
    let email = std::env::var("WARDLINE_EMAIL")?;
    let password: SecretString = std::env::var("WARDLINE_PASSWORD")?.into();

    let base_url = Url::parse(&server)?;
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
    let client = ApiClient::new(base_url.clone(), &ClientConfig::default(), Arc::clone(&store))?;

    let user = client.login(&email, &password).await?;
    println!("signed in as {} ({})", user.name, user.role);

    // The app shell would redirect to the login view on this signal.
    let mut session_rx = client.session_events();
    tokio::spawn(async move {
        if session_rx.recv().await.is_ok() {
            eprintln!("session expired, please log in again");
        }
    });

    // Read-side cache over the appointments endpoint.
    let appointments_client = client.clone();
    let appointments: AsyncResource<serde_json::Value> = AsyncResource::new(
        move || {
            let client = appointments_client.clone();
            async move {
                Ok(client
                    .get("/api/appointments")
                    .await?
                    .unwrap_or(serde_json::Value::Null))
            }
        },
        vec![],
        ResourceOptions::default(),
    );

    // Realtime invalidation: any appointment event refetches the list.
    let cancel = CancellationToken::new();
    let mut ws_url = base_url.join("/ws/events")?;
    let _ = ws_url.set_scheme(if ws_url.scheme() == "https" { "wss" } else { "ws" });
    let socket = SocketHandle::connect(ws_url, ReconnectConfig::default(), cancel.clone(), store);

    let bridge = InvalidationBridge::new();
    bridge.attach(socket.subscribe(), cancel.clone());
    let sub_new = bridge.subscribe(events::APPOINTMENT_NEW, appointments.invalidator());
    let sub_updated = bridge.subscribe(events::APPOINTMENT_UPDATED, appointments.invalidator());

    let mut state_rx = appointments.watch();
    let initial = state_rx.wait_for(|s| !s.loading).await?.clone();
    match initial.error {
        Some(err) => eprintln!("fetch failed: {err}"),
        None => println!("appointments: {}", initial.data.unwrap_or_default()),
    }

    // Watch for invalidation-driven updates for a little while.
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(30)) => {}
        result = state_rx.changed() => {
            if result.is_ok() {
                println!("appointments updated: {:?}", state_rx.borrow().data);
            }
        }
    }

    sub_new.dispose();
    sub_updated.dispose();
    cancel.cancel();
    client.logout().await?;
    Ok(())
}

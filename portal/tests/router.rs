//! The assembled router served over a loopback socket.

use std::net::SocketAddr;
use std::sync::Arc;

use adapters::memory::InMemoryBackend;
use adapters::{Identity, Record};
use portal::auth::mirror::{MemoryStore, PersistedSnapshot, PersistenceMirror, RegistrationHandoff};
use portal::auth::service::SessionCache;
use portal::config::PortalConfig;
use portal::state::AppState;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn config() -> PortalConfig {
    PortalConfig::from_lookup(|key| match key {
        "USRA_STATE_DIR" => Some("/nonexistent/usra".to_owned()),
        _ => None,
    })
    .expect("config")
}

fn state_for(cache: Arc<SessionCache>) -> AppState {
    AppState::new(
        cache,
        RegistrationHandoff::new(Arc::new(MemoryStore::default())),
        config(),
    )
}

async fn serve(state: AppState) -> SocketAddr {
    let app = portal::app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
    addr
}

async fn send_raw(addr: SocketAddr, path: &str) -> (u16, String, String) {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nx-request-id: guard-1\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("http response must have separator");
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .expect("status code");
    (status, head.to_owned(), body.to_owned())
}

fn jane() -> Identity {
    Identity::new("u1", Some("a@b.com"))
}

#[tokio::test]
async fn dashboard_requires_confirmed_session() {
    let backend = Arc::new(InMemoryBackend::new().with_account(jane(), "hunter22"));
    let schools: Record = json!({"id": "s1", "user_id": "u1", "school_name": "Kampala High"})
        .as_object()
        .cloned()
        .expect("object");
    backend.seed("schools", vec![schools]);
    let mirror = PersistenceMirror::new(Arc::new(MemoryStore::default()));
    let cache = Arc::new(SessionCache::with_backend(backend, mirror));
    let addr = serve(state_for(cache.clone())).await;

    let (status, head, _) = send_raw(addr, "/api/dashboard").await;
    assert_eq!(status, 401);
    assert!(head.to_ascii_lowercase().contains("x-request-id: guard-1"));

    cache.sign_in("a@b.com", "hunter22").await.expect("sign in");

    let (status, _, body) = send_raw(addr, "/api/dashboard").await;
    assert_eq!(status, 200);
    assert!(body.contains("Kampala High"));
    let (status, _, _) = send_raw(addr, "/api/dashboard/schools/s1/players").await;
    assert_eq!(status, 200);

    cache.sign_out().await.expect("sign out");
    let (status, _, _) = send_raw(addr, "/api/dashboard").await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn advisory_session_is_not_let_through() {
    let mirror = PersistenceMirror::new(Arc::new(MemoryStore::default()));
    mirror.save(&PersistedSnapshot {
        user: Some(jane()),
        profile: None,
    });
    let cache = Arc::new(SessionCache::new(mirror));
    let session = cache.refresh().await.expect("refresh");
    assert!(session.advisory);
    let addr = serve(state_for(cache)).await;

    let (status, _, _) = send_raw(addr, "/api/dashboard").await;
    assert_eq!(status, 401);
    let (status, _, body) = send_raw(addr, "/api/auth/session").await;
    assert_eq!(status, 200);
    assert!(body.contains("\"advisory\":true"));
}

//! Streaming endpoint tests over real WebSocket connections: handshake
//! rejection happens before the upgrade, and a closed connection leaves no
//! queues behind.

use futures::StreamExt;
use hearthbeat::calendar::NewLens;
use hearthbeat::channels::Channel;
use hearthbeat::config::Settings;
use hearthbeat::live::LiveBroker;
use hearthbeat::server::{create_router, AppState};
use hearthbeat::storage::{AuthStore, MemoryStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

struct TestServer {
    addr: SocketAddr,
    state: AppState,
}

async fn start_server() -> TestServer {
    let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
    let settings = Arc::new(Settings::for_tests());
    let broker = LiveBroker::new(32);
    broker.start_delivery();
    let state = AppState::new(settings, store, broker);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer { addr, state }
}

fn ws_request(server: &TestServer, path_and_query: &str, access_token: Option<&str>) -> Request {
    let mut request = format!("ws://{}{}", server.addr, path_and_query)
        .into_client_request()
        .unwrap();
    if let Some(token) = access_token {
        let cookie = format!("{}={}", server.state.settings.access_cookie_name, token);
        request
            .headers_mut()
            .insert("Cookie", cookie.parse().unwrap());
    }
    request
}

#[tokio::test]
async fn test_handshake_rejected_without_credentials() {
    let server = start_server().await;
    let err = connect_async(ws_request(&server, "/live/ws", None))
        .await
        .unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unshared_lens_scope_rejected_at_handshake() {
    let server = start_server().await;
    let owner = server
        .state
        .sessions
        .signup("owner@example.com", "Owner", "hunter2hunter2", false)
        .await
        .unwrap();
    let lens = server
        .state
        .lenses
        .create(
            &owner.context.member,
            NewLens {
                name: "Just me".into(),
                member_ids: vec![owner.context.member.id],
                is_default: false,
            },
        )
        .await
        .unwrap();

    // A second member of the same project, not in the lens.
    let invite = server
        .state
        .sessions
        .create_invite(
            owner.context.member.project_id,
            owner.context.user.id,
            Some(24),
        )
        .await
        .unwrap();
    let (_, guest_tokens) = server
        .state
        .sessions
        .accept_invite(&invite, "guest@example.com", "Guest", "hunter2hunter2")
        .await
        .unwrap();

    let path = format!("/live/ws?calendar_id={}", lens.id);
    let err = connect_async(ws_request(&server, &path, Some(&guest_tokens.access_token)))
        .await
        .unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 403),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    // Rejected during setup: nothing was ever subscribed.
    let key = Channel::Calendar(lens.id).key();
    assert_eq!(server.state.broker.subscriber_count(&key), 0);
}

#[tokio::test]
async fn test_connection_subscribes_and_unsubscribes_cleanly() {
    let server = start_server().await;
    let owner = server
        .state
        .sessions
        .signup("a@example.com", "A", "hunter2hunter2", false)
        .await
        .unwrap();
    let lens = server
        .state
        .lenses
        .create(
            &owner.context.member,
            NewLens {
                name: "Family".into(),
                member_ids: vec![owner.context.member.id],
                is_default: true,
            },
        )
        .await
        .unwrap();

    let path = format!("/live/ws?calendar_id={}", lens.id);
    let (mut ws, _) = connect_async(ws_request(&server, &path, Some(&owner.tokens.access_token)))
        .await
        .unwrap();

    // First frame announces the resolved channel set; the metadata feed is
    // included by default.
    let frame = ws.next().await.unwrap().unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame");
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["type"], "system.connected");
    let channels: Vec<String> =
        serde_json::from_value(value["payload"]["channels"].clone()).unwrap();
    let calendar_key = Channel::Calendar(lens.id).key();
    let meta_key = Channel::ProjectMeta(owner.context.member.project_id).key();
    assert!(channels.contains(&calendar_key));
    assert!(channels.contains(&meta_key));

    assert_eq!(server.state.broker.subscriber_count(&calendar_key), 1);
    assert_eq!(server.state.broker.subscriber_count(&meta_key), 1);

    // A published event reaches the socket.
    let entry = server
        .state
        .entries
        .create(
            &owner.context.member,
            hearthbeat::calendar::NewEntry {
                title: "Dentist".into(),
                lens_id: Some(lens.id),
            },
        )
        .await
        .unwrap();
    let frame = ws.next().await.unwrap().unwrap();
    let value: serde_json::Value =
        serde_json::from_str(frame.into_text().unwrap().as_str()).unwrap();
    assert_eq!(value["type"], "event.created");
    assert_eq!(value["entityId"], entry.id.to_string());

    // Closing the connection releases every queue.
    ws.close(None).await.unwrap();
    drop(ws);
    let mut released = false;
    for _ in 0..100 {
        if server.state.broker.subscriber_count(&calendar_key) == 0
            && server.state.broker.subscriber_count(&meta_key) == 0
        {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "queues still registered after disconnect");
}

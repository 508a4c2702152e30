//! Live streaming endpoint
//!
//! One WebSocket per client. Authentication and channel authorization
//! happen before the upgrade, so a rejected client gets a plain HTTP
//! status instead of a socket that immediately closes. After the upgrade
//! the connection is append-only from the server's perspective: the client
//! receives events and heartbeats, and anything it sends besides close
//! frames is ignored.

use crate::auth::AuthError;
use crate::channels::Channel;
use crate::live::{ConnectedPayload, LiveEvent, LiveEventKind, SubscriberQueue};
use crate::server::state::AppState;
use crate::server::ApiError;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    pub calendar_id: Option<Uuid>,
    pub project_feed: Option<String>,
}

/// Lenient query-parameter boolean: unrecognized or absent values fall
/// back to the default.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

pub async fn live_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LiveQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let context = state.sessions.authenticate_stream(&headers).await?;
    let member = context.member;

    // Scoped connection: exactly the requested calendar channel. Otherwise
    // the project feed plus every calendar the member may see.
    let mut channels: Vec<String> = Vec::new();
    let calendar_scope = query.calendar_id;
    if let Some(calendar_id) = query.calendar_id {
        let channel = Channel::Calendar(calendar_id);
        if !state.access.can_access_channel(&member, &channel).await? {
            return Err(AuthError::Forbidden("No access to this channel").into());
        }
        channels.push(channel.key());
    } else {
        channels.push(Channel::ProjectEvents(member.project_id).key());
        for calendar_id in state.access.visible_calendar_ids(&member).await? {
            channels.push(Channel::Calendar(calendar_id).key());
        }
    }
    // The metadata feed is on unless the client explicitly opts out.
    if parse_bool(query.project_feed.as_deref(), true) {
        channels.push(Channel::ProjectMeta(member.project_id).key());
    }
    channels.dedup();

    Ok(ws.on_upgrade(move |socket| {
        run_connection(socket, state, member.project_id, calendar_scope, channels)
    }))
}

async fn run_connection(
    socket: WebSocket,
    state: AppState,
    project_id: Uuid,
    calendar_scope: Option<Uuid>,
    channels: Vec<String>,
) {
    let (mut sender, mut receiver) = socket.split();

    let subscriptions: Vec<(String, Arc<SubscriberQueue>)> = channels
        .iter()
        .map(|key| (key.clone(), state.broker.subscribe(key)))
        .collect();
    info!(%project_id, channel_count = subscriptions.len(), "Live connection opened");

    let connected = LiveEvent::new(
        project_id,
        calendar_scope,
        project_id,
        LiveEventKind::Connected(ConnectedPayload {
            channels: channels.clone(),
        }),
        Utc::now(),
    );
    if send_event(&mut sender, &connected).await.is_err() {
        teardown(&state, &subscriptions);
        return;
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(state.settings.heartbeat_secs));
    // The first interval tick completes immediately; the connected frame
    // already served that purpose.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = next_event(&subscriptions) => {
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                let ping = LiveEvent::heartbeat(project_id, calendar_scope);
                if send_event(&mut sender, &ping).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(%project_id, error = %e, "Live connection error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    debug!(%project_id, "Live connection closed");
    teardown(&state, &subscriptions);
}

/// Next pending event across all of this connection's queues. Sweeps the
/// queues first, then parks on their notifiers; cancel-safe, so it can sit
/// inside a select arm.
async fn next_event(subscriptions: &[(String, Arc<SubscriberQueue>)]) -> LiveEvent {
    loop {
        for (_, queue) in subscriptions {
            if let Some(event) = queue.try_recv() {
                return event;
            }
        }
        let waits: Vec<_> = subscriptions
            .iter()
            .map(|(_, queue)| Box::pin(queue.notified()))
            .collect();
        futures::future::select_all(waits).await;
    }
}

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &LiveEvent,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

fn teardown(state: &AppState, subscriptions: &[(String, Arc<SubscriberQueue>)]) {
    for (key, queue) in subscriptions {
        state.broker.unsubscribe(key, queue);
    }
}

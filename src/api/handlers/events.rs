use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tracing::{debug, warn};

use crate::api::response::ApiError;
use crate::bus::{once_topic, user_topic, Message, Stream};
use crate::context::RequestContext;
use crate::widget::WIDGET_NAMESPACE;
use crate::AppState;

/// Time allowed to write a message to the peer
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Ping period; must stay below the peer's 60s pong deadline
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Placeholder for an unused path segment
const NO_TOPIC: &str = "-";

/// Route: GET /ws/:request/:key/
///
/// Pushes the owner's file events (`user.<key>`) and the one-shot widget
/// results of a page (`once.widget.<request>`) to the browser.
pub async fn event_stream(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path((request, key)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let mut topics = Vec::new();
    if is_addressed(&key) {
        if key != ctx.owner {
            return Err(ApiError::forbidden("Token does not match the session"));
        }
        topics.push(user_topic(&key));
    }
    if is_addressed(&request) {
        topics.push(once_topic(WIDGET_NAMESPACE, &request));
    }
    if topics.is_empty() {
        return Err(ApiError::not_implemented("This ws call is not supported"));
    }

    let mut streams = Vec::with_capacity(topics.len());
    for topic in topics {
        let stream = state
            .bus
            .subscribe(topic)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to subscribe: {e}")))?;
        streams.push(stream);
    }

    Ok(ws.on_upgrade(move |socket| forward(socket, streams)))
}

fn is_addressed(segment: &str) -> bool {
    !segment.is_empty() && segment != NO_TOPIC
}

async fn forward(mut socket: WebSocket, streams: Vec<Stream>) {
    let mut streams = streams.into_iter();
    let mut first = streams.next();
    let mut second = streams.next();

    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.tick().await;

    loop {
        let message = tokio::select! {
            message = next_message(first.as_mut()) => message,
            message = next_message(second.as_mut()) => message,
            _ = ping.tick() => {
                if !send(&mut socket, WsMessage::Ping(Vec::new())).await {
                    debug!("WS ping failed");
                    return;
                }
                continue;
            }
        };

        let Some(message) = message else {
            debug!("Subscription closed");
            let _ = send(&mut socket, WsMessage::Close(None)).await;
            return;
        };

        debug!(topic = %message.topic, "Received event");
        let text = String::from_utf8_lossy(&message.payload).into_owned();
        if !send(&mut socket, WsMessage::Text(text)).await {
            warn!(topic = %message.topic, "Failed to send ws message");
            return;
        }
    }
}

/// Next message of an optional stream; never resolves for an absent one.
async fn next_message(stream: Option<&mut Stream>) -> Option<Message> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

async fn send(socket: &mut WebSocket, message: WsMessage) -> bool {
    matches!(
        tokio::time::timeout(WRITE_WAIT, socket.send(message)).await,
        Ok(Ok(()))
    )
}

//! WebSocket endpoint
//!
//! Each connection gets a reader (runs in the upgrade task) and a writer
//! (spawned). Both watch the client's `closed()` signal, so whichever side
//! fails first, or an idle timeout, slow-consumer drop or shutdown, takes the
//! whole connection down through the same teardown.

use std::fmt::Display;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::AppState;
use crate::bus::events::{parse_client_frame, ClientRequest, Outbound};
use crate::bus::{DispatchSender, HubEvent, NoteOrigin};
use crate::hub::client::{ClientHandle, CloseReason};
use crate::hub::HubHandle;

/// GET /ws - Upgrade to a WebSocket session
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_client(socket, state.hub))
}

/// Run one client session to completion
pub async fn serve_client(socket: WebSocket, hub: HubHandle) {
    let (client, outbound) = hub.connect();
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(sink, outbound, client.clone()));
    read_loop(stream, &client, &hub.dispatcher()).await;

    // No-op unless the reader stopped because the hub went away
    client.close(CloseReason::Shutdown);
    if let Err(e) = writer.await {
        warn!(client_id = client.id(), "WebSocket writer panicked: {}", e);
    }

    info!(
        client_id = client.id(),
        reason = ?client.close_reason(),
        clients = hub.client_count(),
        "WebSocket client disconnected"
    );
}

/// Read frames until the peer goes away or the client is torn down.
/// Every frame counts as activity; text frames are parsed and forwarded.
pub async fn read_loop<S>(mut stream: S, client: &ClientHandle, dispatch: &DispatchSender)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = client.closed() => return,
            frame = stream.next() => frame,
        };

        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(client_id = client.id(), "WebSocket read error: {}", e);
                client.close(CloseReason::ReadError);
                return;
            }
            None => {
                client.close(CloseReason::ClientClosed);
                return;
            }
        };

        client.touch();

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                client.close(CloseReason::ClientClosed);
                return;
            }
            _ => continue,
        };

        let event = match parse_client_frame(text.as_str()) {
            Ok(ClientRequest::Note { note, velocity }) => HubEvent::Note {
                note,
                velocity,
                origin: NoteOrigin::Client,
            },
            Ok(ClientRequest::NextScene) => {
                debug!(client_id = client.id(), "Received nextScene request");
                HubEvent::NextScene
            }
            Ok(ClientRequest::Ignored) => {
                debug!(client_id = client.id(), "Ignoring unknown message type");
                continue;
            }
            Err(e) => {
                warn!(client_id = client.id(), "Protocol violation: {}", e);
                continue;
            }
        };

        if dispatch.submit(event).await.is_err() {
            debug!(client_id = client.id(), "Hub stopped, ending session");
            return;
        }
    }
}

/// Drain the client's outbound queue into the socket
pub async fn write_loop<K>(mut sink: K, mut outbound: mpsc::Receiver<Outbound>, client: ClientHandle)
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    loop {
        let message = tokio::select! {
            _ = client.closed() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let text = match serde_json::to_string(&*message) {
            Ok(text) => text,
            Err(e) => {
                warn!(kind = message.kind(), "Failed to encode message: {}", e);
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            debug!(client_id = client.id(), "WebSocket write error: {}", e);
            client.close(CloseReason::WriteError);
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!(client_id = client.id(), "WebSocket close failed: {}", e);
    }
}

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::connctx::ConnCtx;

/// WebSocket handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut ctx = ConnCtx::new(Uuid::new_v4());
    let mut outbound = state.hub.register(ctx.conn_id).await;
    state.coordinator.connect(&ctx).await;

    let (mut sender, mut receiver) = socket.split();

    // Forward frames queued for this connection to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Client events are handled inline so the connection context outlives the
    // socket and can be cleaned up below.
    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => state.coordinator.handle_text(&mut ctx, &text).await,
                Some(Ok(Message::Binary(_))) => debug!("Ignoring binary frame from {}", ctx.conn_id),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error on {}: {}", ctx.conn_id, e);
                    break;
                }
            },
            _ = &mut send_task => break,
        }
    }
    send_task.abort();

    state.coordinator.disconnect(&mut ctx).await;
    state.hub.unregister(ctx.conn_id).await;
    info!("WebSocket connection {} terminated", ctx.conn_id);
}

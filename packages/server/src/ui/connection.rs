//! Per-connection reader and writer.
//!
//! The socket is split in two halves. The writer task owns the sink and drains the bounded
//! outbound queue, sending a keepalive ping on idle. The reader runs on the upgrade task, enforces
//! the sliding read deadline and the inbound rate limit, and hands text frames to the dispatch
//! usecase. Whichever side fails first fires the [`CloseSignal`]; the close sequence runs once
//! the reader has returned.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket},
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use governor::RateLimiter;
use thiserror::Error;
use tokio::{
    sync::{OwnedSemaphorePermit, mpsc},
    time::{Instant, MissedTickBehavior},
};

use crate::{
    domain::ConnectionId,
    hub::CloseSignal,
    usecase::ConnectionContext,
};

use super::state::AppState;

/// Fatal connection fault.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

/// Drive one upgraded connection until it closes. The admission permit is held for the whole
/// lifetime of the connection.
pub(crate) async fn run_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    permit: OwnedSemaphorePermit,
) {
    let conn_id = ConnectionId::generate();
    let closer = CloseSignal::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.outbound_queue_capacity);

    if let Err(e) = state
        .hub
        .register(conn_id, outbound_tx, closer.clone())
        .await
    {
        tracing::warn!(conn_id = %conn_id, "Cannot register connection: {}", e);
        return;
    }
    tracing::info!(
        conn_id = %conn_id,
        active = state.active_connections(),
        "Connection opened"
    );

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound_rx,
        closer.clone(),
        conn_id,
        state.config.write_deadline,
        state.config.keepalive_interval,
    ));

    read_loop(stream, &state, conn_id, &closer).await;

    state
        .close_connection_usecase
        .execute(conn_id, &closer)
        .await;
    if let Err(e) = writer.await {
        tracing::error!(conn_id = %conn_id, "Writer task failed: {}", e);
    }
    drop(permit);
    tracing::info!(conn_id = %conn_id, "Connection closed");
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    conn_id: ConnectionId,
    closer: &CloseSignal,
) {
    let limiter = RateLimiter::direct(state.quota);
    let mut ctx = ConnectionContext::new(conn_id);

    loop {
        let deadline = Instant::now() + state.config.read_deadline;
        let next = tokio::select! {
            biased;
            _ = closer.closed() => break,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                tracing::info!(conn_id = %conn_id, "Read failed: {}", e);
                break;
            }
            Ok(None) => {
                tracing::debug!(conn_id = %conn_id, "Stream ended");
                break;
            }
            Err(_) => {
                tracing::info!(conn_id = %conn_id, "Read deadline exceeded");
                break;
            }
        };

        if closer.is_closed() {
            break;
        }

        if let Err(e) = state.dispatch_frame_usecase.record_activity(&ctx).await {
            tracing::warn!(conn_id = %conn_id, "{}", e);
            break;
        }

        match message {
            Message::Text(text) => {
                if limiter.check().is_err() {
                    tracing::debug!(conn_id = %conn_id, "Rate limit exceeded, dropping frame");
                    continue;
                }
                if let Err(e) = state
                    .dispatch_frame_usecase
                    .execute(&mut ctx, text.as_str())
                    .await
                {
                    tracing::warn!(conn_id = %conn_id, "{}", e);
                    break;
                }
            }
            Message::Binary(data) => {
                tracing::debug!(conn_id = %conn_id, len = data.len(), "Ignoring binary frame");
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(frame) => {
                tracing::info!(conn_id = %conn_id, reason = ?frame, "Client initiated close");
                break;
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    closer: CloseSignal,
    conn_id: ConnectionId,
    write_deadline: Duration,
    keepalive_interval: Duration,
) {
    let mut keepalive =
        tokio::time::interval_at(Instant::now() + keepalive_interval, keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let result = tokio::select! {
            biased;
            _ = closer.closed() => break,
            frame = outbound.recv() => match frame {
                Some(text) => send_frame(&mut sink, Message::Text(text.into()), write_deadline).await,
                None => break,
            },
            _ = keepalive.tick() => send_frame(&mut sink, Message::Ping(Bytes::new()), write_deadline).await,
        };

        if let Err(e) = result {
            tracing::info!(conn_id = %conn_id, "Write failed: {}", e);
            closer.close();
            return;
        }
    }

    // Best-effort close frame; the peer may already be gone.
    let _ = send_frame(&mut sink, Message::Close(None), write_deadline).await;
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_deadline: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(write_deadline, sink.send(message)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::WriteTimeout(write_deadline)),
    }
}

//! Per-connection handler: join the coordinator, then read, route, write.
//!
//! Each admitted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Finish the WebSocket upgrade (the gate runs here)
//!   2. Register with the broadcast coordinator under the identity the
//!      gate resolved from the one-time token
//!   3. Spawn the writer: drains the outbound queue, pings on a timer,
//!      and gives up on a peer that has gone quiet or stopped reading
//!   4. Loop: receive frames → size check → decode → route → apply
//!   5. On any ending, leave the coordinator and close the socket
//!
//! The coordinator holds the only strong sender for the outbound queue.
//! When it evicts a member whose queue filled up, the queue closes and the
//! writer ends, which ends the connection.

use std::sync::Arc;
use std::time::Duration;

use chatwire_protocol::{
    Codec, Envelope, ErrorEvent, Identity, JsonCodec, RoomName, RouteError, SendMessageEvent,
};
use chatwire_room::{MemberId, RoomError};
use chatwire_session::CloseCause;
use chatwire_transport::{Connection, Handshake, PendingUpgrade, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ChatError;
use crate::server::ServerState;

/// Something a routed event asked the server to do.
#[derive(Debug)]
pub(crate) enum Action {
    Publish(SendMessageEvent),
    ChangeRoom(RoomName),
}

/// What server-side handlers see while one envelope is routed.
///
/// Handlers only record actions; the connection task applies them after
/// routing returns, in the order they were recorded.
#[derive(Debug, Default)]
pub(crate) struct ServerContext {
    pub(crate) pending: Vec<Action>,
}

/// Upgrades `pending` and handles the connection until it closes.
pub(crate) async fn handle_upgrade(
    pending: PendingUpgrade,
    state: Arc<ServerState>,
) -> Result<(), ChatError> {
    let addr = pending.peer_addr();
    match pending.complete().await {
        Ok(conn) => handle_connection(conn, state).await,
        Err(e) => {
            tracing::debug!(%addr, error = %e, "upgrade failed");
            Ok(())
        }
    }
}

/// Handles a single connection from admission to close.
async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<ServerState>,
) -> Result<(), ChatError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let identity = Identity::from(conn.peer());
    let member = MemberId(conn_id.into_inner());

    let (tx, rx) = mpsc::channel(state.config.outbound_queue.max(1));
    let outbound = tx.downgrade();
    if let Err(e) = state.coordinator.join(member, identity.clone(), tx).await {
        let _ = conn.close().await;
        return Err(e.into());
    }
    tracing::info!(%conn_id, %identity, "client connected");

    let mut writer = tokio::spawn(write_loop(
        Arc::clone(&conn),
        rx,
        state.codec,
        state.config.ping_interval(),
        state.config.pong_wait(),
    ));

    let cause = read_loop(&conn, &state, member, &outbound, &mut writer).await;

    writer.abort();
    if let Err(e) = state.coordinator.leave(member).await {
        tracing::debug!(%conn_id, error = %e, "leave after close");
    }
    let _ = conn.close().await;

    tracing::info!(%conn_id, %identity, %cause, "client disconnected");
    Ok(())
}

async fn read_loop(
    conn: &WebSocketConnection,
    state: &ServerState,
    member: MemberId,
    outbound: &mpsc::WeakSender<Envelope>,
    writer: &mut JoinHandle<CloseCause>,
) -> CloseCause {
    let conn_id = conn.id();
    let limit = state.config.max_frame_bytes;

    loop {
        let data = tokio::select! {
            received = conn.recv() => match received {
                Ok(Some(data)) => data,
                Ok(None) => return CloseCause::Closed,
                Err(e) => return CloseCause::Error(e.to_string()),
            },
            ended = &mut *writer => return writer_outcome(ended),
        };

        if data.len() > limit {
            tracing::warn!(%conn_id, bytes = data.len(), limit, "frame too large, closing");
            return CloseCause::Error(format!(
                "frame of {} bytes exceeds limit of {limit}",
                data.len()
            ));
        }

        let envelope = match state.codec.decode_envelope(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "dropping undecodable frame");
                continue;
            }
        };

        let outcome = tokio::select! {
            outcome = process(state, member, outbound, &envelope) => outcome,
            ended = &mut *writer => return writer_outcome(ended),
        };
        if let Err(e) = outcome {
            tracing::warn!(%conn_id, error = %e, "coordinator refused action, closing");
            return CloseCause::Error(e.to_string());
        }
    }
}

fn writer_outcome(ended: Result<CloseCause, tokio::task::JoinError>) -> CloseCause {
    ended.unwrap_or_else(|e| CloseCause::Error(e.to_string()))
}

/// Routes one envelope and applies what it asked for.
async fn process(
    state: &ServerState,
    member: MemberId,
    outbound: &mpsc::WeakSender<Envelope>,
    envelope: &Envelope,
) -> Result<(), RoomError> {
    let mut ctx = ServerContext::default();
    if let Err(e) = state.router.route(envelope, &mut ctx) {
        tracing::debug!(error = %e, "route failed");
        reply_error(outbound, &e).await;
        return Ok(());
    }

    for action in ctx.pending {
        match action {
            Action::Publish(event) => {
                wait_for_room(outbound).await?;
                state.coordinator.publish(member, event).await?;
            }
            Action::ChangeRoom(room) => state.coordinator.change_room(member, room).await?,
        }
    }
    Ok(())
}

/// Waits until this connection's own queue has a free slot.
///
/// Publishing only once there is room for the echo keeps a fast sender
/// paced by how quickly it reads, instead of overflowing its own queue.
async fn wait_for_room(outbound: &mpsc::WeakSender<Envelope>) -> Result<(), RoomError> {
    let Some(tx) = outbound.upgrade() else {
        return Err(RoomError::Unavailable);
    };
    tx.reserve().await.map_err(|_| RoomError::Unavailable)?;
    Ok(())
}

/// Queues an `error` envelope describing `e` for the peer.
async fn reply_error(outbound: &mpsc::WeakSender<Envelope>, e: &RouteError) {
    let event = ErrorEvent {
        message: e.to_string(),
    };
    let envelope = match Envelope::from_event(&event) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!(error = %e, "failed to build error envelope");
            return;
        }
    };
    // A closed queue means the member was dropped; the writer ends and the
    // read loop notices.
    if let Some(tx) = outbound.upgrade() {
        let _ = tx.send(envelope).await;
    }
}

/// Drains the outbound queue and keeps the connection alive.
///
/// Returns why it stopped:
/// - the queue closed (the coordinator dropped this member)
/// - the socket failed
/// - a write or ping did not complete within `pong_wait`, or nothing was
///   heard from the peer (pongs included) for longer than that
async fn write_loop(
    conn: Arc<WebSocketConnection>,
    mut rx: mpsc::Receiver<Envelope>,
    codec: JsonCodec,
    ping_every: Duration,
    pong_wait: Duration,
) -> CloseCause {
    let conn_id = conn.id();
    let mut ticker = tokio::time::interval(ping_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            queued = rx.recv() => {
                let Some(envelope) = queued else {
                    tracing::info!(%conn_id, "dropped by broadcast coordinator");
                    return CloseCause::Error("outbound queue closed".into());
                };
                let bytes = match codec.encode_envelope(&envelope) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!(%conn_id, error = %e, "failed to encode outbound envelope");
                        continue;
                    }
                };
                match tokio::time::timeout(pong_wait, conn.send(&bytes)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return CloseCause::Error(e.to_string()),
                    Err(_) => {
                        tracing::info!(%conn_id, "peer stopped reading");
                        return CloseCause::Timeout;
                    }
                }
            }
            _ = ticker.tick() => {
                if conn.idle_for() > pong_wait {
                    tracing::info!(%conn_id, "peer silent too long");
                    return CloseCause::Timeout;
                }
                match tokio::time::timeout(pong_wait, conn.ping()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return CloseCause::Error(e.to_string()),
                    Err(_) => return CloseCause::Timeout,
                }
            }
        }
    }
}

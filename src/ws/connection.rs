//! WebSocket connection driver.
//!
//! Runs the read and write halves of one admitted session. The read loop
//! dispatches client commands and enforces the idle timeout and the
//! malformed-frame limit; the write task drains the session's outbound
//! queue to the socket.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::messages::{
    CODE_UNSUPPORTED_FRAME, FrameError, WsCommand, WsEvent, WsMessage, WsRequest, parse_request,
    validate_body,
};
use crate::domain::{CloseReason, Outbound, Room, SessionHandle, SessionState};
use crate::service::{Admission, MessageGateway};

/// Runs an admitted session until it closes, then removes it from its room.
pub async fn run_connection(socket: WebSocket, admission: Admission, gateway: Arc<MessageGateway>) {
    let Admission {
        session,
        outbound,
        room,
    } = admission;
    let (ws_tx, mut ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(ws_tx, outbound, session.clone()));

    let reason = read_loop(&mut ws_rx, &session, &room, &gateway).await;
    session.close(reason);

    let grace = gateway.config().drain_grace;
    if tokio::time::timeout(grace, &mut writer).await.is_err() {
        writer.abort();
    }
    gateway.release(&room, &session, reason).await;

    tracing::info!(
        connection_id = %session.connection_id(),
        room_id = %room.id(),
        reason = session.close_reason().unwrap_or(reason).as_str(),
        "ws connection closed"
    );
}

/// Reads frames until the session must close and returns the reason.
async fn read_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    session: &SessionHandle,
    room: &Room,
    gateway: &MessageGateway,
) -> CloseReason {
    let config = gateway.config();
    let mut state = session.subscribe_state();
    let mut malformed: u32 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = state.wait_for(|s| *s == SessionState::Closed) => {
                return session.close_reason().unwrap_or(CloseReason::ClientClosed);
            }
            next = tokio::time::timeout(config.idle_timeout, ws_rx.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                if session.mark_draining(CloseReason::IdleTimeout) {
                    tracing::info!(
                        connection_id = %session.connection_id(),
                        room_id = %room.id(),
                        "session idle, draining"
                    );
                }
                continue;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return CloseReason::ClientClosed,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %session.connection_id(), error = %e, "ws read failed");
                return CloseReason::TransportError;
            }
            Ok(Some(Ok(msg))) => msg,
        };
        session.touch();

        let outcome = match msg {
            Message::Text(text) => handle_text(text.as_str(), session, room, gateway).await,
            Message::Binary(_) => Err(FrameError {
                id: String::new(),
                code: CODE_UNSUPPORTED_FRAME,
                message: "binary frames are not supported".to_string(),
            }),
            _ => continue,
        };

        match outcome {
            Ok(reply) => queue_frame(session, &reply),
            Err(err) => {
                malformed += 1;
                tracing::debug!(
                    connection_id = %session.connection_id(),
                    malformed,
                    reason = %err.message,
                    "malformed frame"
                );
                queue_frame(session, &err.into_message());
                if malformed > config.malformed_frame_limit {
                    tracing::info!(
                        connection_id = %session.connection_id(),
                        room_id = %room.id(),
                        "malformed frame limit exceeded"
                    );
                    return CloseReason::ProtocolViolation;
                }
            }
        }
    }
}

/// Executes one text command. Publish and history failures are replies,
/// not malformed frames.
async fn handle_text(
    text: &str,
    session: &SessionHandle,
    room: &Room,
    gateway: &MessageGateway,
) -> Result<WsMessage, FrameError> {
    let WsRequest { id, command } = parse_request(text)?;
    let reply = match command {
        WsCommand::Publish { body } => {
            validate_body(&id, &body, gateway.config().max_body_bytes)?;
            match room.publish(session, body).await {
                Ok(message) => WsMessage::response(
                    id,
                    serde_json::json!({
                        "seq": message.seq,
                        "created_at": message.created_at,
                    }),
                ),
                Err(e) => WsMessage::error(id, e.error_code(), e.to_string()),
            }
        }
        WsCommand::History { since_seq, limit } => {
            match gateway.history(room.id(), since_seq, limit).await {
                Ok(messages) => WsMessage::response(id, serde_json::json!({ "messages": messages })),
                Err(e) => WsMessage::error(id, e.error_code(), e.to_string()),
            }
        }
        WsCommand::Ping => WsMessage::response(id, serde_json::json!({ "pong": true })),
    };
    Ok(reply)
}

/// Drains the outbound queue to the socket until the session closes.
///
/// Items queued before the close are still written, ahead of the close
/// frame, unless the transport already failed.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    session: SessionHandle,
) {
    let mut state = session.subscribe_state();
    loop {
        let item = tokio::select! {
            biased;
            _ = state.wait_for(|s| *s == SessionState::Closed) => break,
            item = outbound.recv() => item,
        };
        let Some(item) = item else { break };
        if !send_item(&mut sink, &session, item).await {
            return;
        }
    }

    let reason = session.close_reason().unwrap_or(CloseReason::ClientClosed);
    if reason == CloseReason::TransportError {
        return;
    }
    while let Ok(item) = outbound.try_recv() {
        if !send_item(&mut sink, &session, item).await {
            return;
        }
    }
    let frame = CloseFrame {
        code: close_code_for(reason),
        reason: Utf8Bytes::from_static(reason.as_str()),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}

/// Writes one outbound item. Returns `false` once the socket is unusable.
async fn send_item(
    sink: &mut SplitSink<WebSocket, Message>,
    session: &SessionHandle,
    item: Outbound,
) -> bool {
    let rendered = match item {
        Outbound::Text(text) => Ok(text),
        Outbound::Joined { last_seq } => WsMessage::event(&WsEvent::Joined {
            room_id: session.room_id(),
            user_id: session.user_id(),
            connection_id: session.connection_id(),
            last_seq,
        })
        .and_then(|frame| frame.to_json()),
        Outbound::Message(message) => {
            WsMessage::event(&WsEvent::Message(&message)).and_then(|frame| frame.to_json())
        }
    };
    let text = match rendered {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(connection_id = %session.connection_id(), error = %e, "failed to serialize frame");
            return true;
        }
    };

    if let Err(e) = sink.send(Message::text(text)).await {
        tracing::debug!(connection_id = %session.connection_id(), error = %e, "ws write failed");
        session.close(CloseReason::TransportError);
        return false;
    }
    true
}

fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::ClientClosed | CloseReason::TransportError => close_code::NORMAL,
        CloseReason::SlowConsumer | CloseReason::IdleTimeout => close_code::POLICY,
        CloseReason::ProtocolViolation => close_code::PROTOCOL,
        CloseReason::AdmissionFailed => close_code::ERROR,
        CloseReason::RoomRetired | CloseReason::ServerShutdown => close_code::AWAY,
    }
}

fn queue_frame(session: &SessionHandle, frame: &WsMessage) {
    match frame.to_json() {
        Ok(json) => {
            session.deliver(Outbound::Text(json));
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize ws frame"),
    }
}

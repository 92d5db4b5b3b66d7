//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Room events (`cursor:moved`, `snapshot:changed`) → forward to client
//!
//! Handler functions validate and return an `Outcome`. The dispatch layer
//! owns all outbound concerns: reply to sender and publish to the room.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. `room:join` → hub membership + forwarders for both room events
//! 3. `cursor:moved` → published to the room, sender excluded
//! 4. `room:snapshot` → read (no `imageData`) or write the room's snapshot
//! 5. Close → membership dropped → hub part

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::hub::RoomChannel;
use crate::channel::{BroadcastChannel, CURSOR_EVENT, SNAPSHOT_CHANGED_EVENT};
use crate::frame::{Data, Frame, Status};
use crate::ids::{ParticipantId, RoomId};
use crate::presence::CursorPosition;
use crate::presence::message::FIELD_PARTICIPANT_ID;
use crate::snapshot::raster::{ImageData, RasterBuffer};
use crate::state::AppState;

const CLIENT_QUEUE_CAPACITY: usize = 256;
const FIELD_IMAGE_DATA: &str = "imageData";

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send frames directly.
#[derive(Debug)]
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// Publish to room peers, excluding sender. No reply to sender.
    Publish { event: &'static str, data: Data },
    /// Nothing goes out. Used for cursor moves that cannot be relayed.
    Silent,
}

/// A connection's current room.
struct Membership {
    channel: RoomChannel,
    participant_id: ParticipantId,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for room events forwarded from the hub.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_QUEUE_CAPACITY);

    let welcome = Frame::request("session:connected", Data::new()).with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    let mut membership: Option<Membership> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, &mut membership, client_id, &client_tx, &text).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Dropping the membership parts the hub room.
    drop(membership);
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Keeps websocket transport concerns out of frame handling so tests can
/// drive dispatch without a socket.
async fn process_inbound_text(
    state: &AppState,
    membership: &mut Option<Membership>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    let prefix = req.prefix();
    if prefix != "cursor" {
        info!(%client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    }

    let result = match prefix {
        "room" => handle_room(state, membership, client_id, client_tx, &req).await,
        "cursor" => Ok(handle_cursor(membership.as_ref(), &req)),
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Publish { event, data }) => {
            if let Some(m) = membership.as_ref() {
                if let Err(e) = m.channel.publish(event, data) {
                    debug!(%client_id, error = %e, "ws: publish skipped");
                }
            }
            vec![]
        }
        Ok(Outcome::Silent) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

async fn handle_room(
    state: &AppState,
    membership: &mut Option<Membership>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            let Some(room_id) = req.room_id.clone().or_else(|| {
                req.data
                    .get("room_id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(RoomId::from)
            }) else {
                return Err(req.error("room_id required"));
            };
            let participant_id = req
                .data
                .get("participant_id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map_or_else(|| ParticipantId::new(client_id.to_string()), ParticipantId::from);

            // Part current room if already joined.
            membership.take();

            let channel = state.hub.join(room_id.clone());
            for event in [CURSOR_EVENT, SNAPSHOT_CHANGED_EVENT] {
                let rx = channel.subscribe(event).map_err(|e| req.error_from(&e))?;
                spawn_forwarder(rx, client_tx.clone());
            }
            let members = state.hub.member_count(&room_id);
            info!(%client_id, %room_id, %participant_id, members, "ws: joined room");
            *membership = Some(Membership { channel, participant_id: participant_id.clone() });

            let mut reply = Data::new();
            reply.insert("room_id".into(), json!(room_id));
            reply.insert("participant_id".into(), json!(participant_id));
            reply.insert("members".into(), json!(members));
            Ok(Outcome::Reply(reply))
        }
        "part" => {
            if membership.take().is_none() {
                return Err(req.error("not in a room"));
            }
            Ok(Outcome::Done)
        }
        "snapshot" => handle_snapshot(state, membership.as_ref(), req).await,
        op => Err(req.error(format!("unknown room op: {op}"))),
    }
}

/// Read or replace the joined room's snapshot. Writes go through the store,
/// so every member sees them on the change feed.
async fn handle_snapshot(state: &AppState, membership: Option<&Membership>, req: &Frame) -> Result<Outcome, Frame> {
    let Some(m) = membership else {
        return Err(req.error("not in a room"));
    };
    let room_id = m.channel.room_id();

    let Some(image) = req.data.get(FIELD_IMAGE_DATA) else {
        let latest = state.snapshots.read_latest(room_id).await.map_err(|e| req.error_from(&e))?;
        let Some(image_data) = latest else {
            return Ok(Outcome::Done);
        };
        let mut reply = Data::new();
        reply.insert(FIELD_IMAGE_DATA.into(), json!(image_data));
        return Ok(Outcome::Reply(reply));
    };

    let Some(image) = image.as_str().map(ImageData::new) else {
        return Err(req.error("imageData must be a string"));
    };
    RasterBuffer::decode(&image).map_err(|e| req.error_from(&e))?;
    state
        .snapshots
        .write_snapshot(room_id, &image)
        .await
        .map_err(|e| req.error_from(&e))?;
    info!(%room_id, participant_id = %m.participant_id, "ws: snapshot written");
    Ok(Outcome::Done)
}

// =============================================================================
// CURSOR HANDLER
// =============================================================================

fn handle_cursor(membership: Option<&Membership>, req: &Frame) -> Outcome {
    // Silently ignore cursor moves before joining.
    let Some(m) = membership else {
        return Outcome::Silent;
    };

    // The joined participant id is authoritative over whatever the client sent.
    let mut data = req.data.clone();
    data.insert(FIELD_PARTICIPANT_ID.into(), json!(m.participant_id));
    let Some(msg) = CursorPosition::from_payload(&data) else {
        return Outcome::Silent;
    };

    Outcome::Publish { event: CURSOR_EVENT, data: msg.to_payload() }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Pump one room subscription into the connection's outbound queue. Ends
/// when the membership parts or the connection goes away.
fn spawn_forwarder(mut rx: mpsc::Receiver<Frame>, client_tx: mpsc::Sender<Frame>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if client_tx.send(frame).await.is_err() {
                break;
            }
        }
    });
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if !frame.syscall.starts_with("cursor:") {
        if frame.status == Status::Error {
            let message = frame
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("-");
            warn!(id = %frame.id, syscall = %frame.syscall, message, "ws: send frame status=Error");
        } else {
            info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
        }
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;

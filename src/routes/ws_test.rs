use super::*;
use crate::routes::tests::serve;
use crate::state::test_helpers;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn request_text(syscall: &str, data: serde_json::Value) -> String {
    let data: Data = serde_json::from_value(data).expect("flat object");
    serde_json::to_string(&Frame::request(syscall, data)).expect("serialize frame")
}

async fn join(state: &AppState, membership: &mut Option<Membership>, tx: &mpsc::Sender<Frame>, room: &str, who: &str) -> Frame {
    let text = request_text("room:join", json!({"room_id": room, "participant_id": who}));
    let mut replies = process_inbound_text(state, membership, Uuid::new_v4(), tx, &text).await;
    assert_eq!(replies.len(), 1);
    replies.remove(0)
}

async fn recv_forwarded(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("forwarded frame timed out")
        .expect("client queue closed unexpectedly")
}

// =============================================================================
// DISPATCH
// =============================================================================

#[tokio::test]
async fn invalid_json_yields_gateway_error() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut membership = None;

    let replies = process_inbound_text(&state, &mut membership, Uuid::new_v4(), &tx, "{not json").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].syscall, "gateway:error");
}

#[tokio::test]
async fn unknown_prefix_yields_error_frame() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut membership = None;

    let text = request_text("board:list", json!({}));
    let replies = process_inbound_text(&state, &mut membership, Uuid::new_v4(), &tx, &text).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].status, Status::Error);
}

#[tokio::test]
async fn join_requires_room_id() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut membership = None;

    let text = request_text("room:join", json!({}));
    let replies = process_inbound_text(&state, &mut membership, Uuid::new_v4(), &tx, &text).await;
    assert_eq!(replies[0].status, Status::Error);
    assert!(membership.is_none());
}

#[tokio::test]
async fn join_replies_with_membership_and_rejoin_parts_previous_room() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut membership = None;

    let reply = join(&state, &mut membership, &tx, "room-1", "alice").await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data.get("participant_id"), Some(&json!("alice")));
    assert_eq!(reply.data.get("members"), Some(&json!(1)));
    assert_eq!(state.hub.member_count(&RoomId::from("room-1")), 1);

    join(&state, &mut membership, &tx, "room-2", "alice").await;
    assert_eq!(state.hub.member_count(&RoomId::from("room-1")), 0);
    assert_eq!(state.hub.member_count(&RoomId::from("room-2")), 1);
}

#[tokio::test]
async fn cursor_before_join_is_ignored() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut membership = None;

    let text = request_text("cursor:moved", json!({"x": 1.0, "y": 2.0}));
    assert!(process_inbound_text(&state, &mut membership, Uuid::new_v4(), &tx, &text).await.is_empty());
}

#[tokio::test]
async fn cursor_is_relayed_to_peers_with_joined_identity() {
    let state = test_helpers::test_app_state();
    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    let mut a = None;
    let mut b = None;
    join(&state, &mut a, &tx_a, "room-1", "alice").await;
    join(&state, &mut b, &tx_b, "room-1", "bob").await;

    // A spoofed participantId is overwritten with the joined one.
    let text = request_text("cursor:moved", json!({"participantId": "mallory", "x": 10.0, "y": 20.0}));
    assert!(process_inbound_text(&state, &mut a, Uuid::new_v4(), &tx_a, &text).await.is_empty());

    let frame = recv_forwarded(&mut rx_b).await;
    assert_eq!(frame.syscall, CURSOR_EVENT);
    let msg = CursorPosition::from_payload(&frame.data).expect("cursor payload");
    assert_eq!(msg.participant_id, ParticipantId::from("alice"));
    assert!(
        timeout(Duration::from_millis(80), rx_a.recv()).await.is_err(),
        "sender must not receive its own cursor"
    );
}

#[tokio::test]
async fn malformed_cursor_is_dropped() {
    let state = test_helpers::test_app_state();
    let (tx_a, _rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    let mut a = None;
    let mut b = None;
    join(&state, &mut a, &tx_a, "room-1", "alice").await;
    join(&state, &mut b, &tx_b, "room-1", "bob").await;

    let text = request_text("cursor:moved", json!({"x": "left", "y": 2.0}));
    assert!(process_inbound_text(&state, &mut a, Uuid::new_v4(), &tx_a, &text).await.is_empty());
    assert!(timeout(Duration::from_millis(80), rx_b.recv()).await.is_err());
}

#[tokio::test]
async fn part_leaves_the_room() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut membership = None;
    join(&state, &mut membership, &tx, "room-1", "alice").await;

    let text = request_text("room:part", json!({}));
    let replies = process_inbound_text(&state, &mut membership, Uuid::new_v4(), &tx, &text).await;
    assert_eq!(replies[0].status, Status::Done);
    assert_eq!(state.hub.member_count(&RoomId::from("room-1")), 0);

    let replies = process_inbound_text(&state, &mut membership, Uuid::new_v4(), &tx, &text).await;
    assert_eq!(replies[0].status, Status::Error);
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

fn dot_image() -> crate::snapshot::raster::ImageData {
    let mut raster = crate::snapshot::RasterBuffer::blank(4, 4);
    raster.draw_stroke(&crate::snapshot::Stroke {
        points: vec![crate::presence::Position::new(2.0, 2.0)],
        color: crate::snapshot::Rgba::BLACK,
        width: 2.0,
    });
    raster.encode().expect("encode")
}

async fn snapshot_request(state: &AppState, membership: &mut Option<Membership>, tx: &mpsc::Sender<Frame>, data: serde_json::Value) -> Frame {
    let text = request_text("room:snapshot", data);
    let mut replies = process_inbound_text(state, membership, Uuid::new_v4(), tx, &text).await;
    assert_eq!(replies.len(), 1);
    replies.remove(0)
}

#[tokio::test]
async fn snapshot_requires_membership() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut membership = None;

    let reply = snapshot_request(&state, &mut membership, &tx, json!({})).await;
    assert_eq!(reply.status, Status::Error);
}

#[tokio::test]
async fn snapshot_write_then_read_over_the_socket_protocol() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut membership = None;
    join(&state, &mut membership, &tx, "room-1", "alice").await;

    let empty = snapshot_request(&state, &mut membership, &tx, json!({})).await;
    assert_eq!(empty.status, Status::Done);
    assert!(empty.data.get("imageData").is_none());

    let image = dot_image();
    let written = snapshot_request(&state, &mut membership, &tx, json!({"imageData": image})).await;
    assert_eq!(written.status, Status::Done);
    assert_eq!(state.snapshots.read_latest(&RoomId::from("room-1")).await.expect("read"), Some(image.clone()));

    let read = snapshot_request(&state, &mut membership, &tx, json!({})).await;
    assert_eq!(read.data.get("imageData"), Some(&json!(image)));
}

#[tokio::test]
async fn undecodable_snapshot_yields_raster_error_code() {
    let state = test_helpers::test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut membership = None;
    join(&state, &mut membership, &tx, "room-1", "alice").await;

    let reply = snapshot_request(&state, &mut membership, &tx, json!({"imageData": "data:image/png;base64,bm9wZQ=="})).await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.data.get(crate::frame::FRAME_CODE), Some(&json!("E_RASTER_DECODE")));
    assert_eq!(state.snapshots.read_latest(&RoomId::from("room-1")).await.expect("read"), None);
}

#[tokio::test]
async fn store_failure_yields_retryable_database_error() {
    let state = test_helpers::unreachable_db_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut membership = None;
    join(&state, &mut membership, &tx, "room-1", "alice").await;

    let reply = snapshot_request(&state, &mut membership, &tx, json!({})).await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.data.get(crate::frame::FRAME_CODE), Some(&json!("E_DATABASE")));
    assert_eq!(reply.data.get(crate::frame::FRAME_RETRYABLE), Some(&json!(true)));
}

// =============================================================================
// SOCKETS
// =============================================================================

type Socket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(base: &str) -> Socket {
    let url = format!("{}/api/ws", base.replacen("http", "ws", 1));
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
    let welcome = next_frame(&mut socket).await;
    assert_eq!(welcome.syscall, "session:connected");
    socket
}

async fn send(socket: &mut Socket, syscall: &str, data: serde_json::Value) {
    socket
        .send(WsMessage::Text(request_text(syscall, data).into()))
        .await
        .expect("ws send");
}

async fn next_frame(socket: &mut Socket) -> Frame {
    loop {
        let msg = timeout(Duration::from_millis(500), socket.next())
            .await
            .expect("ws receive timed out")
            .expect("ws stream ended")
            .expect("ws error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("frame json");
        }
    }
}

#[tokio::test]
async fn cursor_crosses_sockets_in_the_same_room_only() {
    let state = test_helpers::test_app_state();
    let base = serve(state).await;
    let mut a = connect(&base).await;
    let mut b = connect(&base).await;

    send(&mut a, "room:join", json!({"room_id": "room-1", "participant_id": "alice"})).await;
    assert_eq!(next_frame(&mut a).await.status, Status::Done);
    send(&mut b, "room:join", json!({"room_id": "room-1", "participant_id": "bob"})).await;
    assert_eq!(next_frame(&mut b).await.status, Status::Done);

    send(&mut a, "cursor:moved", json!({"x": 15.0, "y": 25.0})).await;

    let frame = next_frame(&mut b).await;
    assert_eq!(frame.syscall, CURSOR_EVENT);
    let msg = CursorPosition::from_payload(&frame.data).expect("cursor payload");
    assert_eq!(msg.participant_id, ParticipantId::from("alice"));
    assert_eq!(msg.position, crate::presence::Position::new(15.0, 25.0));

    assert!(
        timeout(Duration::from_millis(80), a.next()).await.is_err(),
        "sender must not receive its own cursor"
    );
}

#[tokio::test]
async fn snapshot_put_reaches_room_sockets() {
    let state = test_helpers::test_app_state();
    let relay = crate::services::relay::spawn_change_relay(state.hub.clone(), state.snapshots.clone());
    let base = serve(state).await;
    let mut a = connect(&base).await;
    send(&mut a, "room:join", json!({"room_id": "room-1"})).await;
    assert_eq!(next_frame(&mut a).await.status, Status::Done);

    let mut raster = crate::snapshot::RasterBuffer::blank(4, 4);
    raster.draw_stroke(&crate::snapshot::Stroke {
        points: vec![crate::presence::Position::new(2.0, 2.0)],
        color: crate::snapshot::Rgba::BLACK,
        width: 2.0,
    });
    let image = raster.encode().expect("encode");

    // The relay subscribes asynchronously; repeat the write until one lands.
    let client = reqwest::Client::new();
    let frame = timeout(Duration::from_secs(2), async {
        loop {
            client
                .put(format!("{base}/api/rooms/room-1/snapshot"))
                .json(&json!({"imageData": image}))
                .send()
                .await
                .expect("put");
            if let Ok(Some(Ok(WsMessage::Text(text)))) = timeout(Duration::from_millis(50), a.next()).await {
                break serde_json::from_str::<Frame>(text.as_str()).expect("frame json");
            }
        }
    })
    .await
    .expect("snapshot change should reach the socket");

    assert_eq!(frame.syscall, SNAPSHOT_CHANGED_EVENT);
    assert_eq!(frame.data.get("imageData"), Some(&json!(image)));
    relay.abort();
}

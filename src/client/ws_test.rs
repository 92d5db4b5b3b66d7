use super::*;
use crate::channel::CURSOR_EVENT;
use crate::presence::{CursorPosition, Position};
use crate::routes::tests::serve;
use crate::state::test_helpers;
use tokio::time::timeout;

async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("frame timed out")
        .expect("subscription closed unexpectedly")
}

#[test]
fn ws_url_maps_http_schemes() {
    assert_eq!(ws_url("http://127.0.0.1:3000").expect("http"), "ws://127.0.0.1:3000/api/ws");
    assert_eq!(ws_url("https://pad.test/").expect("https"), "wss://pad.test/api/ws");
    assert!(matches!(ws_url("ftp://pad.test"), Err(ClientError::InvalidBaseUrl(_))));
}

#[tokio::test]
async fn connect_joins_the_room_as_the_requested_participant() {
    let state = test_helpers::test_app_state();
    let hub = state.hub.clone();
    let base = serve(state).await;
    let room = RoomId::from("room-1");

    let channel = WsRoomChannel::connect(&base, &room, Some(&ParticipantId::from("alice")))
        .await
        .expect("connect");

    assert!(channel.is_open());
    assert_eq!(channel.participant_id(), &ParticipantId::from("alice"));
    assert_eq!(channel.room_id(), &room);
    assert_eq!(hub.member_count(&room), 1);
}

#[tokio::test]
async fn anonymous_connect_gets_a_server_assigned_participant() {
    let base = serve(test_helpers::test_app_state()).await;
    let channel = WsRoomChannel::connect(&base, &RoomId::from("room-1"), None)
        .await
        .expect("connect");
    assert!(!channel.participant_id().as_str().is_empty());
}

#[tokio::test]
async fn cursor_events_flow_both_ways_with_the_hub() {
    let state = test_helpers::test_app_state();
    let hub = state.hub.clone();
    let base = serve(state).await;
    let room = RoomId::from("room-1");

    let channel = WsRoomChannel::connect(&base, &room, Some(&ParticipantId::from("alice")))
        .await
        .expect("connect");
    let mut from_server = channel.subscribe(CURSOR_EVENT).expect("subscribe");
    let peer = hub.join(room.clone());
    let mut from_client = peer.subscribe(CURSOR_EVENT).expect("peer subscribe");

    // Outbound: the server stamps the joined participant id.
    let spoofed = CursorPosition::new(ParticipantId::from("mallory"), Position::new(3.0, 4.0));
    channel.publish(CURSOR_EVENT, spoofed.to_payload()).expect("publish");
    let frame = recv_frame(&mut from_client).await;
    let msg = CursorPosition::from_payload(&frame.data).expect("cursor payload");
    assert_eq!(msg.participant_id, ParticipantId::from("alice"));
    assert_eq!(msg.position, Position::new(3.0, 4.0));

    // Inbound: hub events reach the websocket subscriber.
    let bob = CursorPosition::new(ParticipantId::from("bob"), Position::new(7.0, 8.0));
    peer.publish(CURSOR_EVENT, bob.to_payload()).expect("peer publish");
    let frame = recv_frame(&mut from_server).await;
    assert_eq!(CursorPosition::from_payload(&frame.data), Some(bob));
}

#[tokio::test]
async fn close_ends_subscriptions_and_parts_the_room() {
    let state = test_helpers::test_app_state();
    let hub = state.hub.clone();
    let base = serve(state).await;
    let room = RoomId::from("room-1");

    let channel = WsRoomChannel::connect(&base, &room, None).await.expect("connect");
    let mut rx = channel.subscribe(CURSOR_EVENT).expect("subscribe");
    channel.close();

    assert!(!channel.is_open());
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.expect("subscription end").is_none());
    assert!(matches!(channel.publish(CURSOR_EVENT, Data::new()), Err(ChannelError::Closed)));
    assert!(matches!(channel.subscribe(CURSOR_EVENT), Err(ChannelError::Closed)));

    test_helpers::eventually("server-side part", Duration::from_secs(1), || hub.member_count(&room) == 0).await;
}

#[tokio::test]
async fn connect_to_a_dead_server_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let result = WsRoomChannel::connect(&format!("http://{addr}"), &RoomId::from("room-1"), None).await;
    assert!(matches!(result, Err(ClientError::WsConnect(_))));
}

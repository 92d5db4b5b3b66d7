//! Websocket room channel — [`BroadcastChannel`] over a server's `/api/ws`.
//!
//! DESIGN
//! ======
//! `connect` performs the handshake inline (`session:connected`, then
//! `room:join` and its terminal reply), then splits the socket:
//! - a writer task drains a bounded outbound queue into the sink
//! - a reader task routes inbound request frames to subscribers by syscall
//!
//! Publishing and subscribing are synchronous, like the hub: `publish`
//! uses `try_send` on the outbound queue and drops the event when the queue
//! is full. The server stamps the joined participant id on cursor events
//! and never echoes a publisher's own events back.
//!
//! LIFECYCLE
//! =========
//! `close` marks the handle closed, ends every subscription, and queues a
//! close frame; the server parts the room when the socket closes. Dropping
//! the handle does the same without the close frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ClientError;
use crate::channel::{BroadcastChannel, ChannelError};
use crate::frame::{Data, FRAME_MESSAGE, Frame, Status};
use crate::ids::{ParticipantId, RoomId};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type Subscribers = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Frame>>>>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);
const OUTBOUND_CAPACITY: usize = 256;
const SUBSCRIBER_CAPACITY: usize = 256;

pub struct WsRoomChannel {
    room_id: RoomId,
    participant_id: ParticipantId,
    open: Arc<AtomicBool>,
    outbound: mpsc::Sender<Message>,
    subscribers: Subscribers,
    reader: JoinHandle<()>,
}

impl WsRoomChannel {
    /// Connect to `base_url` and join `room_id`. With no `participant`, the
    /// server assigns one from the connection id.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened, the handshake times
    /// out, or the server rejects the join.
    pub async fn connect(base_url: &str, room_id: &RoomId, participant: Option<&ParticipantId>) -> Result<Self, ClientError> {
        let url = ws_url(base_url)?;
        let (mut stream, _) = connect_async(url)
            .await
            .map_err(|error| ClientError::WsConnect(Box::new(error)))?;
        wait_for_session_connected(&mut stream).await?;

        let mut join = Frame::request("room:join", Data::new()).with_room_id(room_id.clone());
        if let Some(participant) = participant {
            join = join.with_data("participant_id", participant.to_string());
        }
        send_frame(&mut stream, &join).await?;
        let reply = wait_for_reply(&mut stream, join.id).await?;
        let participant_id = reply
            .data
            .get("participant_id")
            .and_then(Value::as_str)
            .map(ParticipantId::from)
            .ok_or(ClientError::MissingField("participant_id"))?;

        let (sink, source) = stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let subscribers: Subscribers = Arc::default();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        tokio::spawn(write_loop(sink, outbound_rx));
        let reader = tokio::spawn(read_loop(source, subscribers.clone(), open.clone()));

        info!(%room_id, %participant_id, "ws channel: joined room");
        Ok(Self { room_id: room_id.clone(), participant_id, open, outbound, subscribers, reader })
    }

    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Participant id the server joined this connection as.
    #[must_use]
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, HashMap<String, Vec<mpsc::Sender<Frame>>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BroadcastChannel for WsRoomChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn publish(&self, event: &str, payload: Data) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let frame = Frame::request(event, payload).with_room_id(self.room_id.clone());
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, syscall = %event, "ws channel: failed to serialize frame");
                return Ok(());
            }
        };
        match self.outbound.try_send(Message::Text(text.into())) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(syscall = %event, "ws channel: outbound queue full; dropping event");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.open.store(false, Ordering::Release);
                Err(ChannelError::Closed)
            }
        }
    }

    fn subscribe(&self, event: &str) -> Result<mpsc::Receiver<Frame>, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.lock_subscribers().entry(event.to_owned()).or_default().push(tx);
        Ok(rx)
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.lock_subscribers().clear();
        self.reader.abort();
        let _ = self.outbound.try_send(Message::Close(None));
        info!(room_id = %self.room_id, participant_id = %self.participant_id, "ws channel: left room");
    }
}

impl Drop for WsRoomChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// =============================================================================
// TASKS
// =============================================================================

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut outbound: mpsc::Receiver<Message>) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "ws channel: send failed");
            return;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut source: SplitStream<WsStream>, subscribers: Subscribers, open: Arc<AtomicBool>) {
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "ws channel: receive failed");
                break;
            }
        };
        let frame: Frame = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "ws channel: invalid inbound frame");
                continue;
            }
        };
        if frame.status == Status::Error {
            warn!(syscall = %frame.syscall, message = %error_message(&frame), "ws channel: server error");
            continue;
        }
        if frame.status == Status::Request {
            dispatch(&subscribers, &frame);
        }
    }

    open.store(false, Ordering::Release);
    subscribers.lock().unwrap_or_else(PoisonError::into_inner).clear();
    info!("ws channel: connection ended");
}

fn dispatch(subscribers: &Subscribers, frame: &Frame) {
    let mut subscribers = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(queues) = subscribers.get_mut(&frame.syscall) else {
        return;
    };
    queues.retain(|tx| match tx.try_send(frame.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(syscall = %frame.syscall, "ws channel: subscriber queue full; dropping event");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

// =============================================================================
// HANDSHAKE
// =============================================================================

/// `http(s)://host` → `ws(s)://host/api/ws`.
pub(crate) fn ws_url(base_url: &str) -> Result<String, ClientError> {
    let base_url = base_url.trim_end_matches('/');
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws"));
    }
    Err(ClientError::InvalidBaseUrl(base_url.to_owned()))
}

async fn wait_for_session_connected(stream: &mut WsStream) -> Result<(), ClientError> {
    loop {
        let frame = recv_next(stream, HANDSHAKE_TIMEOUT).await?;
        if frame.syscall == "session:connected" {
            return Ok(());
        }
    }
}

async fn wait_for_reply(stream: &mut WsStream, request_id: Uuid) -> Result<Frame, ClientError> {
    loop {
        let frame = recv_next(stream, REPLY_TIMEOUT).await?;
        if frame.parent_id != Some(request_id) || !frame.status.is_terminal() {
            continue;
        }
        if frame.status == Status::Error {
            return Err(ClientError::ServerError { syscall: frame.syscall.clone(), message: error_message(&frame) });
        }
        return Ok(frame);
    }
}

async fn recv_next(stream: &mut WsStream, timeout: Duration) -> Result<Frame, ClientError> {
    let fut = async {
        loop {
            let Some(message) = stream.next().await else {
                return Err(ClientError::WsClosed);
            };
            match message.map_err(|error| ClientError::WsConnect(Box::new(error)))? {
                Message::Text(text) => return serde_json::from_str(text.as_str()).map_err(ClientError::from),
                Message::Close(_) => return Err(ClientError::WsClosed),
                _ => {}
            }
        }
    };

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ClientError::Timeout)?
}

async fn send_frame(stream: &mut WsStream, frame: &Frame) -> Result<(), ClientError> {
    let text = serde_json::to_string(frame)?;
    stream
        .send(Message::Text(text.into()))
        .await
        .map_err(|error| ClientError::WsConnect(Box::new(error)))
}

fn error_message(frame: &Frame) -> String {
    frame
        .data
        .get(FRAME_MESSAGE)
        .and_then(Value::as_str)
        .unwrap_or("unknown websocket error")
        .to_owned()
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;

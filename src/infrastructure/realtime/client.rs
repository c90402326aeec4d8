//! Websocket realtime client: one socket and one Phoenix channel per
//! subscription.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::codec::{self, Incoming};
use super::payloads::PhoenixMessage;
use crate::domain::errors::{RealtimeError, RealtimeResult};
use crate::domain::ports::{
    ChangeEvent, RealtimePort, Subscription, SubscriptionHandle, SubscriptionRequest,
    SubscriptionStatus,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;
type WsReader = SplitStream<WsStream>;

const JOIN_REF: &str = "1";
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeClientConfig {
    pub heartbeat_interval: Duration,
    /// Also bounds the websocket handshake.
    pub join_timeout: Duration,
}

impl Default for RealtimeClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

/// [`RealtimePort`] over the backend's Phoenix-channels websocket.
pub struct RealtimeClient {
    socket_url: String,
    access_token: String,
    config: RealtimeClientConfig,
}

impl RealtimeClient {
    /// Creates a client for the project at `base_url`.
    #[must_use]
    pub fn new(
        base_url: &str,
        anon_key: &str,
        access_token: Option<String>,
        config: RealtimeClientConfig,
    ) -> Self {
        Self {
            socket_url: codec::socket_url(base_url, anon_key),
            access_token: access_token.unwrap_or_else(|| anon_key.to_string()),
            config,
        }
    }

    async fn connect(&self) -> RealtimeResult<WsStream> {
        let (stream, _) = timeout(self.config.join_timeout, connect_async(self.socket_url.as_str()))
            .await
            .map_err(|_| RealtimeError::timeout("websocket connection"))?
            .map_err(|e| RealtimeError::connection_failed(e.to_string()))?;
        Ok(stream)
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RealtimePort for RealtimeClient {
    async fn subscribe(&self, request: SubscriptionRequest) -> RealtimeResult<Subscription> {
        let stream = self.connect().await?;
        let (mut writer, reader) = stream.split();

        let topic = codec::topic_for(&request, Uuid::new_v4());
        let join = PhoenixMessage::join(&topic, &request, &self.access_token, JOIN_REF);
        send(&mut writer, &join).await?;
        debug!(topic = %topic, "Sent channel join");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Connecting);
        let (stop_tx, stop_rx) = oneshot::channel();

        let channel = ChannelTask {
            topic,
            config: self.config,
            writer,
            reader,
            events: events_tx,
            status: status_tx,
            next_ref: 2,
        };
        tokio::spawn(channel.run(stop_rx));

        Ok(Subscription {
            events: events_rx,
            status: status_rx,
            handle: Box::new(ChannelHandle {
                stop: Mutex::new(Some(stop_tx)),
            }),
        })
    }
}

/// Stops the channel task; dropping it has the same effect.
struct ChannelHandle {
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl SubscriptionHandle for ChannelHandle {
    fn unsubscribe(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
    }
}

async fn send(writer: &mut WsWriter, message: &PhoenixMessage) -> RealtimeResult<()> {
    let text = codec::encode(message)?;
    writer
        .send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| RealtimeError::websocket(e.to_string()))
}

struct ChannelTask {
    topic: String,
    config: RealtimeClientConfig,
    writer: WsWriter,
    reader: WsReader,
    events: mpsc::UnboundedSender<ChangeEvent>,
    status: watch::Sender<SubscriptionStatus>,
    next_ref: u64,
}

enum Step {
    Continue,
    Stop(SubscriptionStatus),
}

impl ChannelTask {
    fn reference(&mut self) -> String {
        let reference = self.next_ref.to_string();
        self.next_ref += 1;
        reference
    }

    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        let join_deadline = sleep(self.config.join_timeout);
        tokio::pin!(join_deadline);
        let mut joined = false;
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);

        let final_status = loop {
            let step = tokio::select! {
                _ = &mut stop => {
                    self.leave().await;
                    Step::Stop(SubscriptionStatus::Closed)
                }
                () = &mut join_deadline, if !joined => {
                    warn!(topic = %self.topic, "Channel join timed out");
                    Step::Stop(SubscriptionStatus::TimedOut)
                }
                _ = heartbeat.tick() => {
                    let reference = self.reference();
                    match send(&mut self.writer, &PhoenixMessage::heartbeat(&reference)).await {
                        Ok(()) => {
                            trace!(topic = %self.topic, reference = %reference, "Sent heartbeat");
                            Step::Continue
                        }
                        Err(e) => Step::Stop(SubscriptionStatus::ChannelError(e.to_string())),
                    }
                }
                frame = self.reader.next() => self.on_frame(frame, &mut joined).await,
            };

            if let Step::Stop(status) = step {
                break status;
            }
        };

        debug!(topic = %self.topic, status = ?final_status, "Channel task finished");
        self.status.send_replace(final_status);
        let _ = self.writer.close().await;
    }

    async fn on_frame(
        &mut self,
        frame: Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>,
        joined: &mut bool,
    ) -> Step {
        match frame {
            Some(Ok(WsMessage::Text(text))) => match codec::decode(&text) {
                Ok(message) => self.on_message(&message, joined),
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "Dropping undecodable frame");
                    Step::Continue
                }
            },
            Some(Ok(WsMessage::Ping(data))) => {
                let _ = self.writer.send(WsMessage::Pong(data)).await;
                Step::Continue
            }
            Some(Ok(WsMessage::Close(frame))) => {
                let reason = frame.map_or_else(
                    || "socket closed".to_string(),
                    |f| format!("socket closed with code {}: {}", u16::from(f.code), f.reason),
                );
                Step::Stop(SubscriptionStatus::ChannelError(reason))
            }
            Some(Ok(_)) => Step::Continue,
            Some(Err(e)) => Step::Stop(SubscriptionStatus::ChannelError(e.to_string())),
            None => Step::Stop(SubscriptionStatus::ChannelError("socket closed".to_string())),
        }
    }

    fn on_message(&mut self, message: &PhoenixMessage, joined: &mut bool) -> Step {
        match codec::classify(message, &self.topic, JOIN_REF) {
            Incoming::JoinAccepted => {
                *joined = true;
                info!(topic = %self.topic, "Channel joined");
                self.status.send_replace(SubscriptionStatus::Subscribed);
                Step::Continue
            }
            Incoming::JoinRejected(reason) => {
                warn!(topic = %self.topic, reason = %reason, "Channel join rejected");
                Step::Stop(SubscriptionStatus::ChannelError(reason))
            }
            Incoming::Change(event) => {
                trace!(topic = %self.topic, kind = ?event.kind, "Change event");
                if self.events.send(event).is_err() {
                    return Step::Stop(SubscriptionStatus::Closed);
                }
                Step::Continue
            }
            Incoming::ChannelError(reason) => {
                warn!(topic = %self.topic, reason = %reason, "Channel error");
                Step::Stop(SubscriptionStatus::ChannelError(reason))
            }
            Incoming::ChannelClosed => Step::Stop(SubscriptionStatus::Closed),
            Incoming::Ignored => Step::Continue,
        }
    }

    async fn leave(&mut self) {
        let reference = self.reference();
        if let Err(e) = send(&mut self.writer, &PhoenixMessage::leave(&self.topic, &reference)).await {
            debug!(topic = %self.topic, error = %e, "Failed to send channel leave");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Filter;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerSocket = WebSocketStream<TcpStream>;

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        (listener, base)
    }

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (stream, _) = listener.accept().await.unwrap();
        accept_async(stream).await.unwrap()
    }

    async fn next_frame(socket: &mut ServerSocket) -> PhoenixMessage {
        loop {
            match socket.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return codec::decode(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn reply(socket: &mut ServerSocket, message: &PhoenixMessage) {
        socket
            .send(WsMessage::Text(codec::encode(message).unwrap().into()))
            .await
            .unwrap();
    }

    fn client(base: &str, join_timeout: Duration) -> RealtimeClient {
        RealtimeClient::new(
            base,
            "anon",
            Some("jwt".to_string()),
            RealtimeClientConfig {
                heartbeat_interval: Duration::from_secs(60),
                join_timeout,
            },
        )
    }

    fn request() -> SubscriptionRequest {
        SubscriptionRequest {
            table: "messages".to_string(),
            filter: Some(Filter::eq("channel_id", "c1")),
        }
    }

    #[tokio::test]
    async fn test_subscribe_join_events_and_leave() {
        let (listener, base) = listen().await;
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            let join = next_frame(&mut socket).await;
            assert_eq!(join.event, "phx_join");
            assert_eq!(join.payload["access_token"], "jwt");

            let mut ok = PhoenixMessage::new(
                join.topic.clone(),
                "phx_reply",
                json!({"status": "ok", "response": {}}),
                JOIN_REF,
            );
            ok.join_ref = Some(JOIN_REF.to_string());
            reply(&mut socket, &ok).await;

            let mut change = PhoenixMessage::new(
                join.topic.clone(),
                "postgres_changes",
                json!({"data": {"type": "INSERT", "record": {"id": "m1"}}}),
                "",
            );
            change.reference = None;
            reply(&mut socket, &change).await;

            let leave = next_frame(&mut socket).await;
            assert_eq!(leave.event, "phx_leave");
            assert_eq!(leave.topic, join.topic);
        });

        let mut subscription = client(&base, Duration::from_secs(5))
            .subscribe(request())
            .await
            .unwrap();

        subscription
            .status
            .wait_for(|s| *s == SubscriptionStatus::Subscribed)
            .await
            .unwrap();
        let event = subscription.events.recv().await.unwrap();
        assert_eq!(event.record["id"], "m1");

        subscription.handle.unsubscribe();
        server.await.unwrap();
        subscription
            .status
            .wait_for(|s| *s == SubscriptionStatus::Closed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_join_reports_channel_error() {
        let (listener, base) = listen().await;
        tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            let join = next_frame(&mut socket).await;
            reply(
                &mut socket,
                &PhoenixMessage::new(
                    join.topic,
                    "phx_reply",
                    json!({"status": "error", "response": {"reason": "unauthorized"}}),
                    JOIN_REF,
                ),
            )
            .await;
            while socket.next().await.is_some() {}
        });

        let mut subscription = client(&base, Duration::from_secs(5))
            .subscribe(request())
            .await
            .unwrap();

        let status = subscription
            .status
            .wait_for(|s| s.is_failure())
            .await
            .unwrap()
            .clone();
        assert_eq!(status, SubscriptionStatus::ChannelError("unauthorized".to_string()));
    }

    #[tokio::test]
    async fn test_unanswered_join_times_out() {
        let (listener, base) = listen().await;
        tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            while socket.next().await.is_some() {}
        });

        let mut subscription = client(&base, Duration::from_millis(200))
            .subscribe(request())
            .await
            .unwrap();

        subscription
            .status
            .wait_for(|s| *s == SubscriptionStatus::TimedOut)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (listener, base) = listen().await;
        drop(listener);

        let err = client(&base, Duration::from_secs(5))
            .subscribe(request())
            .await
            .unwrap_err();
        assert!(err.should_retry());
    }
}

use serde_json::Value;
use uuid::Uuid;

use super::payloads::{
    EVENT_CHANGES, EVENT_CLOSE, EVENT_ERROR, EVENT_REPLY, EVENT_SYSTEM, PhoenixMessage,
};
use crate::domain::errors::{RealtimeError, RealtimeResult};
use crate::domain::ports::{ChangeEvent, ChangeKind, SubscriptionRequest};

const PROTOCOL_VERSION: &str = "1.0.0";

/// What an incoming frame means for one joined channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    JoinAccepted,
    JoinRejected(String),
    Change(ChangeEvent),
    ChannelError(String),
    ChannelClosed,
    Ignored,
}

/// Websocket endpoint for the project at `base_url`.
#[must_use]
pub fn socket_url(base_url: &str, anon_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = base
        .strip_prefix("https://")
        .map(|rest| format!("wss://{rest}"))
        .or_else(|| base.strip_prefix("http://").map(|rest| format!("ws://{rest}")))
        .unwrap_or_else(|| base.to_string());
    format!("{base}/realtime/v1/websocket?apikey={anon_key}&vsn={PROTOCOL_VERSION}")
}

/// Channel topic for a subscription. The id keeps topics unique when the
/// same table and filter are subscribed twice.
#[must_use]
pub fn topic_for(request: &SubscriptionRequest, id: Uuid) -> String {
    let filter = request
        .filter
        .as_ref()
        .map_or_else(|| "*".to_string(), |f| f.to_expression());
    format!("realtime:{}:{filter}:{id}", request.table)
}

/// Serializes a frame for sending.
///
/// # Errors
/// Returns error if the payload cannot be serialized.
pub fn encode(message: &PhoenixMessage) -> RealtimeResult<String> {
    serde_json::to_string(message).map_err(|e| RealtimeError::serialization(e.to_string()))
}

/// Parses a received text frame.
///
/// # Errors
/// Returns error if the text is not a Phoenix frame.
pub fn decode(text: &str) -> RealtimeResult<PhoenixMessage> {
    serde_json::from_str(text).map_err(|e| RealtimeError::protocol(format!("invalid frame: {e}")))
}

/// Interprets `message` for the channel joined on `topic` with `join_ref`.
#[must_use]
pub fn classify(message: &PhoenixMessage, topic: &str, join_ref: &str) -> Incoming {
    if message.topic != topic {
        return Incoming::Ignored;
    }

    match message.event.as_str() {
        EVENT_REPLY if message.reference.as_deref() == Some(join_ref) => {
            if message.payload["status"] == "ok" {
                Incoming::JoinAccepted
            } else {
                Incoming::JoinRejected(reason(&message.payload["response"]))
            }
        }
        EVENT_CHANGES => decode_change(&message.payload).map_or(Incoming::Ignored, Incoming::Change),
        EVENT_SYSTEM if message.payload["status"] == "error" => {
            Incoming::ChannelError(reason(&message.payload))
        }
        EVENT_ERROR => Incoming::ChannelError(reason(&message.payload)),
        EVENT_CLOSE => Incoming::ChannelClosed,
        _ => Incoming::Ignored,
    }
}

/// Extracts a row change from a `postgres_changes` payload.
#[must_use]
pub fn decode_change(payload: &Value) -> Option<ChangeEvent> {
    let data = payload.get("data").unwrap_or(payload);
    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
        .and_then(ChangeKind::parse)?;

    let field = |name: &str, alt: &str| {
        data.get(name)
            .or_else(|| data.get(alt))
            .cloned()
            .unwrap_or(Value::Null)
    };

    Some(ChangeEvent {
        kind,
        record: field("record", "new"),
        old_record: field("old_record", "old"),
    })
}

fn reason(value: &Value) -> String {
    ["reason", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map_or_else(|| "unknown error".to_string(), String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Filter;
    use serde_json::json;

    const TOPIC: &str = "realtime:messages:channel_id=eq.c1:abc";

    fn frame(event: &str, payload: Value, reference: Option<&str>) -> PhoenixMessage {
        PhoenixMessage {
            topic: TOPIC.to_string(),
            event: event.to_string(),
            payload,
            reference: reference.map(String::from),
            join_ref: None,
        }
    }

    #[test]
    fn test_socket_url() {
        assert_eq!(
            socket_url("https://abc.example.co/", "anon"),
            "wss://abc.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert_eq!(
            socket_url("http://127.0.0.1:54321", "anon"),
            "ws://127.0.0.1:54321/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn test_topics_are_unique_per_subscription() {
        let request = SubscriptionRequest {
            table: "messages".to_string(),
            filter: Some(Filter::eq("channel_id", "c1")),
        };
        let a = topic_for(&request, Uuid::new_v4());
        let b = topic_for(&request, Uuid::new_v4());

        assert!(a.starts_with("realtime:messages:channel_id=eq.c1:"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_join_replies() {
        let ok = frame("phx_reply", json!({"status": "ok", "response": {}}), Some("1"));
        assert_eq!(classify(&ok, TOPIC, "1"), Incoming::JoinAccepted);

        let rejected = frame(
            "phx_reply",
            json!({"status": "error", "response": {"reason": "unauthorized"}}),
            Some("1"),
        );
        assert_eq!(
            classify(&rejected, TOPIC, "1"),
            Incoming::JoinRejected("unauthorized".to_string())
        );

        let heartbeat_reply = frame("phx_reply", json!({"status": "ok"}), Some("2"));
        assert_eq!(classify(&heartbeat_reply, TOPIC, "1"), Incoming::Ignored);
    }

    #[test]
    fn test_change_frames() {
        let insert = frame(
            "postgres_changes",
            json!({
                "ids": [1],
                "data": {
                    "type": "INSERT",
                    "table": "messages",
                    "record": {"id": "m1"},
                    "old_record": null,
                }
            }),
            None,
        );
        assert_eq!(
            classify(&insert, TOPIC, "1"),
            Incoming::Change(ChangeEvent::insert(json!({"id": "m1"})))
        );

        let delete = frame(
            "postgres_changes",
            json!({"data": {"type": "DELETE", "old_record": {"id": "g1"}}}),
            None,
        );
        assert_eq!(
            classify(&delete, TOPIC, "1"),
            Incoming::Change(ChangeEvent::delete(json!({"id": "g1"})))
        );

        let unknown = frame("postgres_changes", json!({"data": {"type": "TRUNCATE"}}), None);
        assert_eq!(classify(&unknown, TOPIC, "1"), Incoming::Ignored);
    }

    #[test]
    fn test_channel_failures() {
        assert_eq!(
            classify(&frame("phx_error", json!({}), None), TOPIC, "1"),
            Incoming::ChannelError("unknown error".to_string())
        );
        assert_eq!(
            classify(
                &frame("system", json!({"status": "error", "message": "bad filter"}), None),
                TOPIC,
                "1"
            ),
            Incoming::ChannelError("bad filter".to_string())
        );
        assert_eq!(
            classify(&frame("system", json!({"status": "ok"}), None), TOPIC, "1"),
            Incoming::Ignored
        );
        assert_eq!(
            classify(&frame("phx_close", json!({}), None), TOPIC, "1"),
            Incoming::ChannelClosed
        );
    }

    #[test]
    fn test_other_topics_are_ignored() {
        let mut message = frame("phx_close", json!({}), None);
        message.topic = "phoenix".to_string();
        assert_eq!(classify(&message, TOPIC, "1"), Incoming::Ignored);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not json"), Err(RealtimeError::Protocol { .. })));
        let message = decode(r#"{"topic":"phoenix","event":"phx_reply","payload":{},"ref":null}"#)
            .unwrap();
        assert_eq!(message.reference, None);
    }
}

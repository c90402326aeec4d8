use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::ports::SubscriptionRequest;

pub const PHOENIX_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";

const SCHEMA: &str = "public";

/// One Phoenix channels frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        event: impl Into<String>,
        payload: Value,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            reference: Some(reference.into()),
            join_ref: None,
        }
    }

    /// Join frame subscribing `topic` to row changes described by `request`.
    #[must_use]
    pub fn join(
        topic: &str,
        request: &SubscriptionRequest,
        access_token: &str,
        reference: &str,
    ) -> Self {
        let mut change = json!({
            "event": "*",
            "schema": SCHEMA,
            "table": request.table,
        });
        if let Some(filter) = &request.filter {
            change["filter"] = Value::String(filter.to_expression());
        }

        let payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change],
            },
            "access_token": access_token,
        });

        let mut message = Self::new(topic, EVENT_JOIN, payload, reference);
        message.join_ref = Some(reference.to_string());
        message
    }

    #[must_use]
    pub fn leave(topic: &str, reference: &str) -> Self {
        Self::new(topic, EVENT_LEAVE, json!({}), reference)
    }

    #[must_use]
    pub fn heartbeat(reference: &str) -> Self {
        Self::new(PHOENIX_TOPIC, EVENT_HEARTBEAT, json!({}), reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Filter;

    #[test]
    fn test_join_carries_filter_and_token() {
        let request = SubscriptionRequest {
            table: "messages".to_string(),
            filter: Some(Filter::eq("channel_id", "c1")),
        };

        let join = PhoenixMessage::join("realtime:messages", &request, "jwt", "1");
        let value = serde_json::to_value(&join).unwrap();

        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "1");
        assert_eq!(value["join_ref"], "1");
        assert_eq!(value["payload"]["access_token"], "jwt");
        assert_eq!(
            value["payload"]["config"]["postgres_changes"][0],
            json!({
                "event": "*",
                "schema": "public",
                "table": "messages",
                "filter": "channel_id=eq.c1",
            })
        );
    }

    #[test]
    fn test_unfiltered_join_has_no_filter_key() {
        let request = SubscriptionRequest {
            table: "guilds".to_string(),
            filter: None,
        };

        let join = PhoenixMessage::join("realtime:guilds", &request, "anon", "1");
        let change = &join.payload["config"]["postgres_changes"][0];

        assert!(change.get("filter").is_none());
    }

    #[test]
    fn test_heartbeat_frame() {
        let value = serde_json::to_value(PhoenixMessage::heartbeat("7")).unwrap();
        assert_eq!(
            value,
            json!({ "topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": "7" })
        );
    }
}

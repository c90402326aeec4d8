//! Table and storage client for a PostgREST-style backend.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde_json::Value;
use tracing::{debug, warn};

use super::dto::{ErrorResponse, SignRequest, SignResponse};
use crate::domain::errors::RemoteError;
use crate::domain::ports::{Filter, Query, RemoteDataPort};

const USER_AGENT: &str = concat!("guildsync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_AFTER_MS: u64 = 5000;

/// Remote data client speaking the backend's REST dialect:
/// `GET /rest/v1/<table>?col=eq.value&order=col.asc` and friends.
pub struct RestDataClient {
    client: Client,
    base_url: String,
    anon_key: String,
    bearer: String,
}

impl RestDataClient {
    /// Creates a client for the project at `base_url`. Requests are
    /// authorized with `access_token`, or the anonymous key when absent.
    ///
    /// # Errors
    /// Returns error if HTTP client creation fails.
    pub fn new(
        base_url: &str,
        anon_key: impl Into<String>,
        access_token: Option<String>,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::unexpected(format!("failed to create HTTP client: {e}")))?;

        let anon_key = anon_key.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer: access_token.unwrap_or_else(|| anon_key.clone()),
            anon_key,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{bucket}/{path}", self.base_url)
    }

    fn sign_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/sign/{bucket}/{path}", self.base_url)
    }

    /// Turns the signing endpoint's relative answer into an absolute URL.
    fn absolute_signed_url(&self, signed: &str) -> String {
        if signed.starts_with("http://") || signed.starts_with("https://") {
            return signed.to_string();
        }
        let signed = signed.trim_start_matches('/');
        format!("{}/storage/v1/{signed}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.bearer)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            warn!(error = %e, "Backend request failed");
            if e.is_timeout() {
                RemoteError::network("request timed out")
            } else if e.is_connect() {
                RemoteError::network("failed to connect to backend")
            } else {
                RemoteError::network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000));
        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.into_message(),
            Err(_) => None,
        }
        .unwrap_or_else(|| format!("HTTP {status}"));

        Err(status_error(status, message, retry_after))
    }

    async fn rows(response: Response) -> Result<Vec<Value>, RemoteError> {
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| RemoteError::serialization(format!("failed to parse response: {e}")))
    }
}

/// Maps a non-success status to the matching [`RemoteError`].
fn status_error(status: StatusCode, message: String, retry_after_ms: Option<u64>) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::rejected(message),
        StatusCode::NOT_FOUND => RemoteError::not_found(message),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited {
            retry_after_ms: retry_after_ms.unwrap_or(DEFAULT_RETRY_AFTER_MS),
        },
        s if s.is_server_error() => RemoteError::network(format!("{status}: {message}")),
        s if s.is_client_error() => RemoteError::rejected(message),
        _ => RemoteError::unexpected(format!("unexpected response: {status} - {message}")),
    }
}

/// Query-string pairs for a table read.
fn query_pairs(query: &Query) -> Vec<(String, String)> {
    let mut pairs = vec![("select".to_string(), "*".to_string())];
    pairs.extend(query.filters.iter().map(filter_pair));
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        pairs.push(("order".to_string(), format!("{}.{direction}", order.column)));
    }
    pairs
}

fn filter_pair(filter: &Filter) -> (String, String) {
    (
        filter.column.clone(),
        format!("{}.{}", filter.op.as_str(), filter.value),
    )
}

fn id_pair(id: &str) -> Vec<(String, String)> {
    vec![filter_pair(&Filter::eq("id", id))]
}

#[async_trait]
impl RemoteDataPort for RestDataClient {
    async fn query(&self, query: &Query) -> Result<Vec<Value>, RemoteError> {
        let request = self
            .client
            .get(self.table_url(&query.table))
            .query(&query_pairs(query));
        let rows = Self::rows(self.send(request).await?).await?;
        debug!(table = %query.table, count = rows.len(), "Queried table");
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, RemoteError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        Self::rows(self.send(request).await?)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::unexpected(format!("insert into {table} returned no rows")))
    }

    async fn update(&self, table: &str, id: &str, changes: Value) -> Result<Value, RemoteError> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&id_pair(id))
            .header("Prefer", "return=representation")
            .json(&changes);
        Self::rows(self.send(request).await?)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::not_found(format!("{table} row {id}")))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&id_pair(id));
        self.send(request).await?;
        debug!(table = %table, id = %id, "Deleted row");
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), RemoteError> {
        let size = bytes.len();
        let request = self
            .client
            .post(self.object_url(bucket, path))
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes);
        self.send(request).await?;
        debug!(bucket = %bucket, path = %path, size, "Uploaded object");
        Ok(())
    }

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
    ) -> Result<String, RemoteError> {
        let request = self.client.post(self.sign_url(bucket, path)).json(&SignRequest {
            expires_in: ttl.as_secs(),
        });
        let signed: SignResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::serialization(format!("failed to parse response: {e}")))?;
        Ok(self.absolute_signed_url(&signed.signed_url))
    }
}

impl std::fmt::Debug for RestDataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDataClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serves one canned response and hands back the raw request.
    async fn serve_once(status: &str, body: &str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0_u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            let _ = tx.send(String::from_utf8_lossy(&raw).to_string());
        });

        (format!("http://{addr}"), rx)
    }

    #[test]
    fn test_query_pairs() {
        let query = Query::table("messages")
            .filter(Filter::eq("channel_id", "c1"))
            .filter(Filter::gt("inserted_at", "2024-01-01T00:00:00.000000Z"))
            .order_asc("inserted_at");

        assert_eq!(
            query_pairs(&query),
            vec![
                ("select".to_string(), "*".to_string()),
                ("channel_id".to_string(), "eq.c1".to_string()),
                (
                    "inserted_at".to_string(),
                    "gt.2024-01-01T00:00:00.000000Z".to_string()
                ),
                ("order".to_string(), "inserted_at.asc".to_string()),
            ]
        );
    }

    #[test_case(StatusCode::UNAUTHORIZED, "Rejected")]
    #[test_case(StatusCode::FORBIDDEN, "Rejected")]
    #[test_case(StatusCode::BAD_REQUEST, "Rejected")]
    #[test_case(StatusCode::NOT_FOUND, "NotFound")]
    #[test_case(StatusCode::TOO_MANY_REQUESTS, "RateLimited")]
    #[test_case(StatusCode::BAD_GATEWAY, "Network")]
    #[test_case(StatusCode::SERVICE_UNAVAILABLE, "Network")]
    fn test_status_mapping(status: StatusCode, expected: &str) {
        let error = status_error(status, "boom".to_string(), None);
        let actual = match error {
            RemoteError::Rejected { .. } => "Rejected",
            RemoteError::NotFound { .. } => "NotFound",
            RemoteError::RateLimited { .. } => "RateLimited",
            RemoteError::Network { .. } => "Network",
            _ => "other",
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_retry_after_is_honoured() {
        let error = status_error(StatusCode::TOO_MANY_REQUESTS, String::new(), Some(2000));
        assert!(matches!(error, RemoteError::RateLimited { retry_after_ms: 2000 }));
        assert!(error.is_transient());
    }

    #[test]
    fn test_signed_url_made_absolute() {
        let client = RestDataClient::new("https://abc.example.co/", "anon", None).unwrap();
        assert_eq!(
            client.absolute_signed_url("/object/sign/guilds/guild-images/1.png?token=t"),
            "https://abc.example.co/storage/v1/object/sign/guilds/guild-images/1.png?token=t"
        );
        assert_eq!(
            client.absolute_signed_url("https://cdn.example.co/x.png?token=t"),
            "https://cdn.example.co/x.png?token=t"
        );
    }

    #[tokio::test]
    async fn test_query_sends_filters_and_credentials() {
        let (base, request) = serve_once("200 OK", r#"[{"id":"m1"}]"#).await;
        let client = RestDataClient::new(&base, "anon-key", Some("jwt".to_string())).unwrap();

        let rows = client
            .query(&Query::table("messages").filter(Filter::eq("channel_id", "c1")))
            .await
            .unwrap();

        assert_eq!(rows, vec![json!({"id": "m1"})]);
        let request = request.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /rest/v1/messages?select=*&channel_id=eq.c1 "));
        assert!(request.contains("apikey: anon-key"));
        assert!(request.contains("authorization: bearer jwt"));
    }

    #[tokio::test]
    async fn test_insert_returns_first_row() {
        let (base, request) = serve_once("201 Created", r#"[{"id":"g1","name":"Rust"}]"#).await;
        let client = RestDataClient::new(&base, "anon-key", None).unwrap();

        let row = client
            .insert("guilds", json!({"name": "Rust"}))
            .await
            .unwrap();

        assert_eq!(row["id"], "g1");
        let request = request.await.unwrap();
        assert!(request.starts_with("POST /rest/v1/guilds "));
        assert!(request.to_ascii_lowercase().contains("prefer: return=representation"));
        assert!(request.ends_with(r#"{"name":"Rust"}"#));
    }

    #[tokio::test]
    async fn test_error_body_message_is_kept() {
        let (base, _request) =
            serve_once("403 Forbidden", r#"{"message":"row-level security"}"#).await;
        let client = RestDataClient::new(&base, "anon-key", None).unwrap();

        let err = client.delete("guilds", "g1").await.unwrap_err();

        assert!(matches!(err, RemoteError::Rejected { ref message } if message == "row-level security"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = RestDataClient::new(&format!("http://{addr}"), "anon-key", None).unwrap();

        let err = client.query(&Query::table("guilds")).await.unwrap_err();
        assert!(err.is_transient());
    }
}

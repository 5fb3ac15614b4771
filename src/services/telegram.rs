//! Gateway to the messaging platform.
//!
//! The rest of the pipeline only sees the narrow [`HistoryClient`] and
//! [`PostPublisher`] contracts, so scans can be driven against fakes in
//! tests. The production implementation talks JSON to an MTProto HTTP
//! bridge configured via `GATEWAY_URL`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::rate_limiter::{RateLimitConfig, RateLimitedClient};

/// Error taxonomy for gateway calls.
///
/// Only `RateLimited` and `Transient` are retried; `Permanent` aborts the
/// operation with context.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
    #[error("transient gateway error: {0}")]
    Transient(String),
    #[error("permanent gateway error: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Whether a bounded retry loop should try this call again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Permanent(_))
    }
}

/// Uniform view of a message's media payload.
///
/// Built once at the gateway boundary from whichever slot the platform put
/// the file in (document, video or audio).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub file_name: String,
    pub file_size: i64,
}

/// A single non-empty channel message as seen by the streamer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: i64,
    pub caption: Option<String>,
    pub media: Option<MediaDescriptor>,
}

impl ChannelMessage {
    /// Messages without a named file payload carry nothing worth cataloging.
    pub fn has_payload(&self) -> bool {
        self.media
            .as_ref()
            .map(|m| !m.file_name.is_empty())
            .unwrap_or(false)
    }
}

/// Read-side contract: bulk history access for one channel.
#[async_trait]
pub trait HistoryClient: Send + Sync {
    async fn count_messages(&self, channel_id: i64) -> Result<u64, FetchError>;
    async fn latest_message_id(&self, channel_id: i64) -> Result<i64, FetchError>;
    /// Fetch the given message IDs. Empty, deleted and service entries are
    /// omitted from the result, so the returned list may be shorter than
    /// the requested ID list.
    async fn fetch_messages(
        &self,
        channel_id: i64,
        ids: &[i64],
    ) -> Result<Vec<ChannelMessage>, FetchError>;
    async fn chat_title(&self, channel_id: i64) -> Result<String, FetchError>;
}

/// Write-side contract: publishing and editing index posts.
#[async_trait]
pub trait PostPublisher: Send + Sync {
    /// Publish a new post, returning its message ID.
    async fn send_post(&self, channel_id: i64, text: &str) -> Result<i64, FetchError>;
    async fn edit_post(
        &self,
        channel_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), FetchError>;
}

// ---------------------------------------------------------------------------
// HTTP bridge implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct LatestIdResponse {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    title: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: i64,
    caption: Option<String>,
    #[serde(default)]
    empty: bool,
    #[serde(default)]
    service: bool,
    document: Option<RawFile>,
    video: Option<RawFile>,
    audio: Option<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    file_name: Option<String>,
    #[serde(default)]
    file_size: i64,
}

impl RawMessage {
    /// Collapse the duck-typed payload slots into one descriptor.
    fn into_channel_message(self) -> Option<ChannelMessage> {
        if self.empty || self.service {
            return None;
        }
        let media = [self.document, self.video, self.audio]
            .into_iter()
            .flatten()
            .find_map(|f| {
                f.file_name.map(|name| MediaDescriptor {
                    file_name: name,
                    file_size: f.file_size,
                })
            });
        Some(ChannelMessage {
            id: self.id,
            caption: self.caption,
            media,
        })
    }
}

#[derive(Debug, Serialize)]
struct FetchRequest<'a> {
    channel_id: i64,
    ids: &'a [i64],
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    channel_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct EditRequest<'a> {
    channel_id: i64,
    message_id: i64,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: i64,
}

/// Production gateway talking to the MTProto HTTP bridge.
pub struct TelegramGateway {
    client: RateLimitedClient,
    base_url: String,
    token: Option<String>,
}

impl TelegramGateway {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            client: RateLimitedClient::new("gateway", RateLimitConfig::default()),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        self.client.wait_for_permit().await;
        debug!(path = path, "Gateway GET");
        let mut req = self.client.inner().get(self.url(path)).query(query);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(classify_reqwest_error)?;
        decode_response(resp).await
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, FetchError> {
        self.client.wait_for_permit().await;
        debug!(path = path, "Gateway POST");
        let mut req = self.client.inner().post(self.url(path)).json(body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(classify_reqwest_error)?;
        decode_response(resp).await
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() {
        FetchError::Transient(err.to_string())
    } else {
        FetchError::Permanent(err.to_string())
    }
}

async fn decode_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, FetchError> {
    let status = resp.status().as_u16();
    if status == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        return Err(FetchError::RateLimited { retry_after });
    }
    if status == 408 || (500..600).contains(&status) {
        return Err(FetchError::Transient(format!("gateway returned {status}")));
    }
    if !resp.status().is_success() {
        return Err(FetchError::Permanent(format!("gateway returned {status}")));
    }
    resp.json()
        .await
        .map_err(|e| FetchError::Permanent(format!("bad gateway response: {e}")))
}

#[async_trait]
impl HistoryClient for TelegramGateway {
    async fn count_messages(&self, channel_id: i64) -> Result<u64, FetchError> {
        let resp: CountResponse = self
            .get_json("messages/count", &[("channel_id", channel_id.to_string())])
            .await?;
        Ok(resp.count)
    }

    async fn latest_message_id(&self, channel_id: i64) -> Result<i64, FetchError> {
        let resp: LatestIdResponse = self
            .get_json("messages/latest", &[("channel_id", channel_id.to_string())])
            .await?;
        Ok(resp.message_id)
    }

    async fn fetch_messages(
        &self,
        channel_id: i64,
        ids: &[i64],
    ) -> Result<Vec<ChannelMessage>, FetchError> {
        let raw: Vec<RawMessage> = self
            .post_json("messages/get", &FetchRequest { channel_id, ids })
            .await?;
        Ok(raw
            .into_iter()
            .filter_map(RawMessage::into_channel_message)
            .collect())
    }

    async fn chat_title(&self, channel_id: i64) -> Result<String, FetchError> {
        let resp: ChatResponse = self
            .get_json("chats/get", &[("channel_id", channel_id.to_string())])
            .await?;
        Ok(resp.title)
    }
}

#[async_trait]
impl PostPublisher for TelegramGateway {
    async fn send_post(&self, channel_id: i64, text: &str) -> Result<i64, FetchError> {
        let resp: SendResponse = self
            .post_json("messages/send", &SendRequest { channel_id, text })
            .await?;
        Ok(resp.message_id)
    }

    async fn edit_post(
        &self,
        channel_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), FetchError> {
        let _: serde_json::Value = self
            .post_json(
                "messages/edit",
                &EditRequest {
                    channel_id,
                    message_id,
                    text,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_message_media_precedence() {
        let raw = RawMessage {
            id: 7,
            caption: None,
            empty: false,
            service: false,
            document: Some(RawFile {
                file_name: Some("Show.S01E01.mkv".into()),
                file_size: 100,
            }),
            video: Some(RawFile {
                file_name: Some("other.mp4".into()),
                file_size: 200,
            }),
            audio: None,
        };
        let msg = raw.into_channel_message().unwrap();
        assert_eq!(msg.media.unwrap().file_name, "Show.S01E01.mkv");
    }

    #[test]
    fn test_service_message_dropped() {
        let raw = RawMessage {
            id: 1,
            caption: None,
            empty: false,
            service: true,
            document: None,
            video: None,
            audio: None,
        };
        assert!(raw.into_channel_message().is_none());
    }

    #[test]
    fn test_has_payload_requires_file_name() {
        let msg = ChannelMessage {
            id: 1,
            caption: None,
            media: Some(MediaDescriptor {
                file_name: String::new(),
                file_size: 10,
            }),
        };
        assert!(!msg.has_payload());
    }
}

//! Rate-limited Slack API client.
//!
//! Speaks the form-encoded HTTP surface directly so that session-mode
//! authentication (user token + `d=` cookie) and bot-mode (bot token) share
//! one call shape. Every list call pages with cursors and hands each batch
//! to a caller-supplied sink in server order (newest first).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

const SLACK_BASE_URL: &str = "https://slack.com/api";
const PAGE_LIMIT: u32 = 200;
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(150);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retries for rate-limited API calls
const MAX_RATE_LIMIT_RETRIES: u32 = 5;
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// A Slack message as returned by conversations.history / replies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub ts: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<SlackFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<Edited>,
}

impl Message {
    /// A main message has no thread parent, or is itself the parent.
    pub fn is_main(&self) -> bool {
        match &self.thread_ts {
            None => true,
            Some(t) => t.is_empty() || *t == self.ts,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackFile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url_private_download: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title_link: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Edited {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub ts: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_app_user: bool,
    #[serde(default)]
    pub profile: SlackProfile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

impl SlackUser {
    /// Preferred display name: profile display name, real name, handle, id.
    pub fn display_name(&self) -> &str {
        if !self.profile.display_name.is_empty() {
            &self.profile.display_name
        } else if !self.real_name.is_empty() {
            &self.real_name
        } else if !self.name.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default)]
    pub is_mpim: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub num_members: u32,
}

/// Identity behind the current token, from auth.test.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub user_id: String,
}

impl ConversationInfo {
    pub fn kind_str(&self) -> &'static str {
        if self.is_im {
            "dm"
        } else if self.is_mpim {
            "mpim"
        } else if self.is_private {
            "private_channel"
        } else {
            "channel"
        }
    }
}

/// Per-batch consumer for paginated message fetches.
pub type MessageSink<'a> = &'a mut (dyn FnMut(Vec<Message>) + Send);

/// The Slack surface the orchestrator depends on.
#[async_trait]
pub trait SlackApi: Send + Sync {
    /// Page conversations.history between the optional bounds, feeding each
    /// non-empty batch to the sink in server order (newest first).
    async fn history(
        &self,
        channel: &str,
        oldest: Option<&str>,
        latest: Option<&str>,
        sink: MessageSink<'_>,
    ) -> Result<()>;

    /// Page conversations.replies for one thread. The parent message is the
    /// first element of the listing; consumers dedupe it.
    async fn replies(&self, channel: &str, thread_ts: &str, sink: MessageSink<'_>) -> Result<()>;

    async fn user_info(&self, user: &str) -> Result<SlackUser>;

    async fn list_users(&self) -> Result<Vec<SlackUser>>;

    async fn conversation_members(&self, channel: &str) -> Result<Vec<String>>;

    async fn list_conversations(&self, types: &[&str]) -> Result<Vec<ConversationInfo>>;

    async fn conversation_info(&self, channel: &str) -> Result<ConversationInfo>;

    async fn auth_test(&self) -> Result<AuthInfo>;

    async fn download_file(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    error: String,
}

#[derive(Deserialize, Default)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Deserialize)]
struct UserInfoResponse {
    user: SlackUser,
}

#[derive(Deserialize)]
struct UsersListResponse {
    #[serde(default)]
    members: Vec<SlackUser>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Deserialize)]
struct ConversationInfoResponse {
    channel: ConversationInfo,
}

#[derive(Deserialize)]
struct ConversationsListResponse {
    #[serde(default)]
    channels: Vec<ConversationInfo>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

/// Slack client for both auth shapes.
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    cookie: Option<String>,
    base_url: String,
    last_request: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl SlackClient {
    /// Session mode: short-lived user token plus the `d` session cookie.
    pub fn session(token: &str, cookie: &str) -> Result<Self> {
        Self::build(token, Some(cookie.to_string()))
    }

    /// Bot mode: long-lived bot token, no cookie.
    pub fn bot(token: &str) -> Result<Self> {
        Self::build(token, None)
    }

    fn build(token: &str, cookie: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            token: token.to_string(),
            cookie,
            base_url: SLACK_BASE_URL.to_string(),
            last_request: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Keep at most one request per MIN_REQUEST_INTERVAL in flight.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Perform one API method call, retrying rate limits with the
    /// server-provided hint. Retries re-send identical parameters, so the
    /// pagination cursor never advances on a failed page.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let mut retries = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            self.throttle().await;

            let mut req = self
                .http
                .post(format!("{}/{}", self.base_url, method))
                .bearer_auth(&self.token)
                .form(params);
            if let Some(cookie) = &self.cookie {
                req = req
                    .header(header::COOKIE, format!("d={}", cookie))
                    .header(header::ORIGIN, "https://app.slack.com")
                    .header(header::REFERER, "https://app.slack.com/");
            }

            let resp = req.send().await?;

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after_secs(resp.headers());
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(AppError::SlackApi(format!(
                        "rate limited {} times on {}, giving up",
                        retries, method
                    )));
                }
                warn!(method, wait_secs = wait, retry = retries, "slack rate limit");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            let body = resp.bytes().await?;
            let envelope: ApiEnvelope =
                serde_json::from_slice(&body).map_err(|e| AppError::JsonParse(e.to_string()))?;
            if !envelope.ok {
                if envelope.error == "ratelimited" {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(AppError::SlackApi(format!(
                            "rate limited {} times on {}, giving up",
                            retries, method
                        )));
                    }
                    tokio::time::sleep(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS)).await;
                    continue;
                }
                return Err(classify_api_error(&envelope.error));
            }

            debug!(method, "slack api call ok");
            return serde_json::from_slice(&body).map_err(|e| AppError::JsonParse(e.to_string()));
        }
    }

    async fn page_messages(
        &self,
        method: &str,
        base_params: &[(&str, String)],
        sink: MessageSink<'_>,
    ) -> Result<()> {
        let mut cursor: Option<String> = None;
        loop {
            let mut params = base_params.to_vec();
            params.push(("limit", PAGE_LIMIT.to_string()));
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }

            let resp: HistoryResponse = self.call(method, &params).await?;

            if !resp.messages.is_empty() {
                sink(resp.messages);
            }

            let next = resp.response_metadata.next_cursor;
            if !resp.has_more || next.is_empty() {
                break;
            }
            cursor = Some(next);
        }
        Ok(())
    }
}

#[async_trait]
impl SlackApi for SlackClient {
    async fn history(
        &self,
        channel: &str,
        oldest: Option<&str>,
        latest: Option<&str>,
        sink: MessageSink<'_>,
    ) -> Result<()> {
        let mut params: Vec<(&str, String)> = vec![("channel", channel.to_string())];
        if let Some(o) = oldest {
            if !o.is_empty() {
                params.push(("oldest", o.to_string()));
            }
        }
        if let Some(l) = latest {
            if !l.is_empty() {
                params.push(("latest", l.to_string()));
            }
        }
        self.page_messages("conversations.history", &params, sink)
            .await
    }

    async fn replies(&self, channel: &str, thread_ts: &str, sink: MessageSink<'_>) -> Result<()> {
        let params: Vec<(&str, String)> = vec![
            ("channel", channel.to_string()),
            ("ts", thread_ts.to_string()),
        ];
        self.page_messages("conversations.replies", &params, sink)
            .await
    }

    async fn user_info(&self, user: &str) -> Result<SlackUser> {
        let params = [("user", user.to_string())];
        let resp: UserInfoResponse = self.call("users.info", &params).await?;
        Ok(resp.user)
    }

    async fn list_users(&self) -> Result<Vec<SlackUser>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = vec![("limit", PAGE_LIMIT.to_string())];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }
            let resp: UsersListResponse = self.call("users.list", &params).await?;
            all.extend(resp.members);
            let next = resp.response_metadata.next_cursor;
            if next.is_empty() {
                break;
            }
            cursor = Some(next);
        }
        Ok(all)
    }

    async fn conversation_members(&self, channel: &str) -> Result<Vec<String>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("channel", channel.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }
            let resp: MembersResponse = self.call("conversations.members", &params).await?;
            all.extend(resp.members);
            let next = resp.response_metadata.next_cursor;
            if next.is_empty() {
                break;
            }
            cursor = Some(next);
        }
        Ok(all)
    }

    async fn list_conversations(&self, types: &[&str]) -> Result<Vec<ConversationInfo>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("types", types.join(",")),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }
            let resp: ConversationsListResponse = self.call("conversations.list", &params).await?;
            all.extend(resp.channels);
            let next = resp.response_metadata.next_cursor;
            if next.is_empty() {
                break;
            }
            cursor = Some(next);
        }
        Ok(all)
    }

    async fn conversation_info(&self, channel: &str) -> Result<ConversationInfo> {
        let params = [("channel", channel.to_string())];
        let resp: ConversationInfoResponse = self.call("conversations.info", &params).await?;
        Ok(resp.channel)
    }

    async fn auth_test(&self) -> Result<AuthInfo> {
        self.call("auth.test", &[]).await
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        self.throttle().await;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AppError::SlackApi(format!(
                "HTTP {} downloading file",
                resp.status()
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Map an `ok=false` error code to the error taxonomy.
fn classify_api_error(code: &str) -> AppError {
    match code {
        "invalid_auth" | "token_revoked" | "account_inactive" | "not_authed" => {
            AppError::SlackAuth(code.to_string())
        }
        "channel_not_found" => AppError::NotFound {
            resource: "channel",
            id: String::new(),
        },
        "user_not_found" => AppError::NotFound {
            resource: "user",
            id: String::new(),
        },
        "thread_not_found" => AppError::NotFound {
            resource: "thread",
            id: String::new(),
        },
        "message_not_found" => AppError::NotFound {
            resource: "message",
            id: String::new(),
        },
        other => AppError::SlackApi(other.to_string()),
    }
}

/// Retry-After header in seconds, defaulted and capped.
fn retry_after_secs(headers: &header::HeaderMap) -> u64 {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
        .min(MAX_RETRY_AFTER_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn msg(ts: &str, user: &str, text: &str) -> serde_json::Value {
        serde_json::json!({"ts": ts, "user": user, "text": text})
    }

    #[test]
    fn test_is_main() {
        let plain = Message {
            ts: "1.000000".to_string(),
            ..Message::default()
        };
        assert!(plain.is_main());

        let parent = Message {
            ts: "1.000000".to_string(),
            thread_ts: Some("1.000000".to_string()),
            reply_count: 2,
            ..Message::default()
        };
        assert!(parent.is_main());

        let reply = Message {
            ts: "2.000000".to_string(),
            thread_ts: Some("1.000000".to_string()),
            ..Message::default()
        };
        assert!(!reply.is_main());
    }

    #[test]
    fn test_display_name_preference() {
        let mut user = SlackUser {
            id: "U1".to_string(),
            name: "alice.w".to_string(),
            real_name: "Alice Wong".to_string(),
            ..SlackUser::default()
        };
        user.profile.display_name = "Alice".to_string();
        assert_eq!(user.display_name(), "Alice");

        user.profile.display_name.clear();
        assert_eq!(user.display_name(), "Alice Wong");

        user.real_name.clear();
        assert_eq!(user.display_name(), "alice.w");

        user.name.clear();
        assert_eq!(user.display_name(), "U1");
    }

    #[test]
    fn test_classify_api_error() {
        assert!(matches!(
            classify_api_error("invalid_auth"),
            AppError::SlackAuth(_)
        ));
        assert!(matches!(
            classify_api_error("token_revoked"),
            AppError::SlackAuth(_)
        ));
        assert!(matches!(
            classify_api_error("channel_not_found"),
            AppError::NotFound {
                resource: "channel",
                ..
            }
        ));
        assert!(matches!(
            classify_api_error("thread_not_found"),
            AppError::NotFound {
                resource: "thread",
                ..
            }
        ));
        assert!(matches!(
            classify_api_error("fatal_error"),
            AppError::SlackApi(_)
        ));
    }

    #[test]
    fn test_conversation_kind_str() {
        let mut info = ConversationInfo {
            is_im: true,
            ..ConversationInfo::default()
        };
        assert_eq!(info.kind_str(), "dm");
        info.is_im = false;
        info.is_mpim = true;
        assert_eq!(info.kind_str(), "mpim");
        info.is_mpim = false;
        info.is_private = true;
        assert_eq!(info.kind_str(), "private_channel");
        info.is_private = false;
        assert_eq!(info.kind_str(), "channel");
    }

    #[tokio::test]
    async fn test_history_paginates_with_cursor() {
        let server = MockServer::start().await;

        // Second page: only matches once the cursor is sent back.
        Mock::given(method("POST"))
            .and(path("/conversations.history"))
            .and(body_string_contains("cursor=page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [msg("1706745603.000100", "U1", "older")],
                "has_more": false,
                "response_metadata": {"next_cursor": ""}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [msg("1706745999.000200", "U1", "newer")],
                "has_more": true,
                "response_metadata": {"next_cursor": "page2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::bot("xoxb-test")
            .unwrap()
            .with_base_url(&server.uri());

        let mut collected = Vec::new();
        let mut sink = |batch: Vec<Message>| collected.extend(batch);
        client
            .history("C1", None, None, &mut sink)
            .await
            .unwrap();

        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].text, "newer");
        assert_eq!(collected[1].text, "older");
    }

    #[tokio::test]
    async fn test_history_retries_rate_limited_page_with_same_cursor() {
        let server = MockServer::start().await;

        // The cursor=page2 request is rate limited once, then succeeds.
        Mock::given(method("POST"))
            .and(path("/conversations.history"))
            .and(body_string_contains("cursor=page2"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("Retry-After", "2"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/conversations.history"))
            .and(body_string_contains("cursor=page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [msg("1706745603.000100", "U1", "page two")],
                "has_more": false,
                "response_metadata": {"next_cursor": ""}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [msg("1706745999.000200", "U1", "page one")],
                "has_more": true,
                "response_metadata": {"next_cursor": "page2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::bot("xoxb-test")
            .unwrap()
            .with_base_url(&server.uri());

        let started = std::time::Instant::now();
        let mut collected = Vec::new();
        let mut sink = |batch: Vec<Message>| collected.extend(batch);
        client
            .history("C1", None, None, &mut sink)
            .await
            .unwrap();

        // The full message set survives the 429, and the retry honoured
        // the 2s hint.
        assert_eq!(collected.len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "invalid_auth"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::bot("xoxb-bad")
            .unwrap()
            .with_base_url(&server.uri());

        let mut sink = |_batch: Vec<Message>| {};
        let err = client
            .history("C1", None, None, &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SlackAuth(_)));
    }

    #[tokio::test]
    async fn test_channel_not_found_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "channel_not_found"
            })))
            .mount(&server)
            .await;

        let client = SlackClient::bot("xoxb-test")
            .unwrap()
            .with_base_url(&server.uri());

        let mut sink = |_batch: Vec<Message>| {};
        let err = client
            .history("CMISSING", None, None, &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::NotFound {
                resource: "channel",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_session_mode_sends_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users.info"))
            .and(wiremock::matchers::header("cookie", "d=cookie-value"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "user": {"id": "U1", "name": "alice"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SlackClient::session("xoxc-test", "cookie-value")
            .unwrap()
            .with_base_url(&server.uri());

        let user = client.user_info("U1").await.unwrap();
        assert_eq!(user.id, "U1");
    }

    #[tokio::test]
    async fn test_empty_history_invokes_sink_never() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let client = SlackClient::bot("xoxb-test")
            .unwrap()
            .with_base_url(&server.uri());

        let mut batches = 0usize;
        let mut sink = |_batch: Vec<Message>| batches += 1;
        client
            .history("C1", None, None, &mut sink)
            .await
            .unwrap();
        assert_eq!(batches, 0);
    }

    #[tokio::test]
    async fn test_auth_test_parses_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "url": "https://ws.slack.com/",
                "team": "Acme",
                "user": "alice",
                "team_id": "T1",
                "user_id": "U1"
            })))
            .mount(&server)
            .await;

        let client = SlackClient::bot("xoxb-test")
            .unwrap()
            .with_base_url(&server.uri());

        let auth = client.auth_test().await.unwrap();
        assert_eq!(auth.team, "Acme");
        assert_eq!(auth.user_id, "U1");
    }

    #[tokio::test]
    async fn test_conversation_info() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "channel": {"id": "C1", "name": "general", "is_im": false}
            })))
            .mount(&server)
            .await;

        let client = SlackClient::bot("xoxb-test")
            .unwrap()
            .with_base_url(&server.uri());

        let info = client.conversation_info("C1").await.unwrap();
        assert_eq!(info.id, "C1");
        assert_eq!(info.kind_str(), "channel");
    }

    #[test]
    fn test_retry_after_secs_default_and_cap() {
        let mut headers = header::HeaderMap::new();
        assert_eq!(retry_after_secs(&headers), 1);

        headers.insert(header::RETRY_AFTER, "30".parse().unwrap());
        assert_eq!(retry_after_secs(&headers), 30);

        headers.insert(header::RETRY_AFTER, "600".parse().unwrap());
        assert_eq!(retry_after_secs(&headers), 60);

        headers.insert(header::RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(retry_after_secs(&headers), 1);
    }
}

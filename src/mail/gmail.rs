//! Gmail REST client
//!
//! Implements [`MailService`] on top of the Gmail v1 API and exposes the
//! listing calls ingestion needs. The bearer token is supplied by the caller;
//! acquiring and refreshing it is not handled here.

use super::{Label, MailResult, MailService, Marker, RemoteError};
use crate::db::NewMessage;
use async_trait::async_trait;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com";

/// Gmail hands out URL-safe base64 with or without padding
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Largest page the list endpoint accepts
const MAX_PAGE_SIZE: u32 = 500;

/// Which messages to list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageQuery {
    /// The most recent `n` messages
    Latest(u32),
    /// Messages received after this date
    Since(chrono::NaiveDate),
}

/// API client for one Gmail mailbox
pub struct GmailClient {
    client: Client,
    base_url: Url,
    access_token: String,
}

impl GmailClient {
    /// Client for the public Gmail API
    pub fn new(access_token: impl Into<String>) -> MailResult<Self> {
        Self::with_base_url(access_token, DEFAULT_API_BASE, Duration::from_secs(30))
    }

    /// Client for a specific API host, with a per-call timeout
    pub fn with_base_url(
        access_token: impl Into<String>,
        base_url: &str,
        timeout: Duration,
    ) -> MailResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::Network(format!("invalid API base {}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            access_token: access_token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/gmail/v1/users/me/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path
        )
    }

    /// Ids of the messages selected by `query`, newest first
    pub async fn list_message_ids(&self, query: &MessageQuery) -> MailResult<Vec<String>> {
        if *query == MessageQuery::Latest(0) {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, String)> = Vec::new();
            match query {
                MessageQuery::Latest(n) => {
                    let remaining = (*n as usize).saturating_sub(ids.len()) as u32;
                    params.push(("maxResults", remaining.min(MAX_PAGE_SIZE).to_string()));
                }
                MessageQuery::Since(date) => {
                    params.push(("q", format!("after:{}", date.format("%Y/%m/%d"))));
                    params.push(("maxResults", MAX_PAGE_SIZE.to_string()));
                }
            }
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let response = self
                .client
                .get(self.endpoint("messages"))
                .bearer_auth(&self.access_token)
                .query(&params)
                .send()
                .await?;
            let page: MessageListResponse = handle_response(response).await?;

            ids.extend(page.messages.into_iter().map(|m| m.id));

            let done = match query {
                MessageQuery::Latest(n) => ids.len() >= *n as usize,
                MessageQuery::Since(_) => false,
            };
            match page.next_page_token {
                Some(token) if !done => page_token = Some(token),
                _ => break,
            }
        }

        if let MessageQuery::Latest(n) = query {
            ids.truncate(*n as usize);
        }
        Ok(ids)
    }

    /// Full message, including payload parts
    pub async fn get_message(&self, id: &str) -> MailResult<GmailMessage> {
        let response = self
            .client
            .get(self.endpoint(&format!("messages/{}", id)))
            .bearer_auth(&self.access_token)
            .query(&[("format", "full")])
            .send()
            .await?;

        handle_response(response).await
    }
}

#[async_trait]
impl MailService for GmailClient {
    async fn list_labels(&self) -> MailResult<Vec<Label>> {
        let response = self
            .client
            .get(self.endpoint("labels"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let list: LabelListResponse = handle_response(response).await?;
        Ok(list.labels)
    }

    async fn modify_message(&self, id: &str, add: &[Marker], remove: &[Marker]) -> MailResult<()> {
        let body = ModifyMessageRequest {
            add_label_ids: add.iter().map(|m| m.label_id().to_string()).collect(),
            remove_label_ids: remove.iter().map(|m| m.label_id().to_string()).collect(),
        };

        let response = self
            .client
            .post(self.endpoint(&format!("messages/{}/modify", id)))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            log::debug!("Modified message {}: +{:?} -{:?}", id, body.add_label_ids, body.remove_label_ids);
            Ok(())
        } else {
            Err(handle_error(response).await)
        }
    }
}

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyMessageRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remove_label_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LabelListResponse {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageRef {
    id: String,
}

/// Message as returned by `messages.get`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub internal_date: String,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartBody {
    pub data: Option<String>,
}

impl GmailMessage {
    /// First header with this name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn is_unread(&self) -> bool {
        self.label_ids.iter().any(|l| l == Marker::Unread.label_id())
    }

    /// Decoded first `text/plain` part, searched depth-first
    pub fn plain_text_body(&self) -> Option<String> {
        self.payload.as_ref().and_then(find_plain_text)
    }

    /// Store record for this message
    pub fn to_new_message(&self) -> NewMessage {
        NewMessage {
            id: self.id.clone(),
            sender: self.header("From").unwrap_or_default().to_string(),
            subject: self.header("Subject").unwrap_or_default().to_string(),
            received_at: self.internal_date.clone(),
            body: self.plain_text_body().unwrap_or_default(),
            is_read: !self.is_unread(),
        }
    }
}

fn find_plain_text(part: &MessagePart) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case("text/plain") {
        let data = part.body.as_ref().and_then(|b| b.data.as_deref());
        if let Some(data) = data.filter(|d| !d.is_empty()) {
            match BODY_ENGINE.decode(data) {
                Ok(bytes) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => log::warn!("Skipping undecodable text/plain part: {}", e),
            }
        }
    }

    part.parts.iter().find_map(find_plain_text)
}

/// Handle successful JSON response
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> MailResult<T> {
    if response.status().is_success() {
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    } else {
        Err(handle_error(response).await)
    }
}

/// Convert error response to RemoteError
async fn handle_error(response: reqwest::Response) -> RemoteError {
    let status = response.status();

    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited,
        _ => {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            RemoteError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

// ============================================================================
// Tests
// ============================================================================

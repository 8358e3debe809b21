//! REST implementation of [`RemoteApi`]

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{RemoteApi, RemoteError, RemoteResult};
use crate::config::SyncSettings;
use crate::models::{Invite, Membership, Record};
use crate::store::Collection;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// JSON-over-HTTP client for the Waymark backend.
#[derive(Clone)]
pub struct HttpRemoteApi {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl fmt::Debug for HttpRemoteApi {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpRemoteApi")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteApi {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client,
        })
    }

    /// Build a client from settings; `None` when no API URL is configured.
    pub fn from_settings(settings: &SyncSettings) -> RemoteResult<Option<Self>> {
        settings
            .api_base_url
            .as_ref()
            .map(|url| {
                Self::new(
                    url.clone(),
                    settings.api_token.clone(),
                    settings.request_timeout(),
                )
            })
            .transpose()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn health(&self) -> RemoteResult<()> {
        let response = self.request(Method::GET, "/healthz").send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn upsert_record(&self, collection: Collection, record: &Record) -> RemoteResult<()> {
        let response = self
            .request(Method::PUT, &record_path(collection, &record.id))
            .json(record)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn delete_record(
        &self,
        collection: Collection,
        record_id: &str,
        subject_id: &str,
    ) -> RemoteResult<()> {
        let response = self
            .request(Method::DELETE, &record_path(collection, record_id))
            .query(&[("subject_id", subject_id)])
            .send()
            .await?;
        // Deleting something already gone is success.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn update_label(
        &self,
        collection: Collection,
        record_id: &str,
        label: &str,
    ) -> RemoteResult<()> {
        let path = format!("{}/label", record_path(collection, record_id));
        let response = self
            .request(Method::PATCH, &path)
            .json(&serde_json::json!({ "label": label }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn list_owned(
        &self,
        collection: Collection,
        subject_id: &str,
    ) -> RemoteResult<Vec<Record>> {
        let response = self
            .request(Method::GET, &collection_path(collection))
            .query(&[("owner_id", subject_id)])
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn list_by_membership(
        &self,
        collection: Collection,
        subject_id: &str,
    ) -> RemoteResult<Vec<Record>> {
        let response = self
            .request(Method::GET, &collection_path(collection))
            .query(&[("member_id", subject_id)])
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn list_memberships(&self, subject_id: &str) -> RemoteResult<Vec<Membership>> {
        let response = self
            .request(Method::GET, "/v1/memberships")
            .query(&[("subject_id", subject_id)])
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn add_membership(&self, membership: &Membership) -> RemoteResult<()> {
        let response = self
            .request(Method::POST, "/v1/memberships")
            .json(membership)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn create_invite(&self, invite: &Invite) -> RemoteResult<()> {
        let response = self
            .request(Method::POST, "/v1/invites")
            .json(invite)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn find_invite(&self, code: &str) -> RemoteResult<Option<Invite>> {
        let response = self.request(Method::GET, &invite_path(code)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(ensure_success(response).await?.json().await?))
    }

    async fn increment_invite_uses(&self, code: &str) -> RemoteResult<u32> {
        let path = format!("{}/uses", invite_path(code));
        let response = self.request(Method::POST, &path).send().await?;
        let payload: UsesResponse = ensure_success(response).await?.json().await?;
        Ok(payload.uses)
    }
}

#[derive(Debug, Deserialize)]
struct UsesResponse {
    uses: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<String>,
    message: Option<String>,
}

async fn ensure_success(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        _ => RemoteError::Server {
            status: status.as_u16(),
            message,
        },
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_string)
    } else {
        compact_text(trimmed)
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| RemoteError::InvalidPayload("API URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidPayload(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}

fn collection_path(collection: Collection) -> String {
    format!("/v1/{}", collection.name())
}

fn record_path(collection: Collection, record_id: &str) -> String {
    format!(
        "{}/{}",
        collection_path(collection),
        urlencoding::encode(record_id)
    )
}

fn invite_path(code: &str) -> String {
    format!("/v1/invites/{}", urlencoding::encode(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed_and_validated() {
        assert_eq!(
            normalize_base_url(" https://api.example.com/ ".to_string()).unwrap(),
            "https://api.example.com"
        );
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
    }

    #[test]
    fn paths_encode_ids() {
        assert_eq!(record_path(Collection::Plans, "a b/c"), "/v1/plans/a%20b%2Fc");
        assert_eq!(invite_path("ABC234"), "/v1/invites/ABC234");
    }

    #[test]
    fn api_errors_prefer_message_field() {
        let message = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"bad_request","message":"label too long"}"#,
        );
        assert_eq!(message, "label too long");
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "  "),
            "Bad Gateway"
        );
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            RemoteError::Unauthorized(_)
        ));
        let error = classify_status(StatusCode::SERVICE_UNAVAILABLE, "down");
        assert!(error.is_transient());
        assert!(!classify_status(StatusCode::CONFLICT, "stale").is_transient());
    }

    #[test]
    fn debug_redacts_token() {
        let api = HttpRemoteApi::new(
            "https://api.example.com",
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{api:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}

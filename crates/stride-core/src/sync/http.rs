//! HTTP remote endpoint client

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::error::{SyncError, SyncResult};
use super::remote::{PullCursor, PullResponse, PushRequest, PushResponse, RemoteEndpoint};
use crate::models::{EntityRecord, SyncTable, UserId};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Remote store reached over HTTPS.
///
/// `POST {base}/v1/sync/{table}/push` and
/// `GET {base}/v1/sync/{table}/pull?userId=&cursor=&since=`.
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    api_token: Option<String>,
    client: Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SyncError::Validation(format!("invalid HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            api_token: normalize_text_option(api_token),
            client,
        })
    }

    fn endpoint(&self, table: SyncTable, action: &str) -> String {
        format!("{}/v1/sync/{}/{action}", self.base_url, table.as_str())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> SyncResult<T> {
        let response = request.send().await.map_err(classify_transport)?;
        decode(response).await
    }
}

#[async_trait]
impl RemoteEndpoint for HttpRemote {
    async fn push(
        &self,
        table: SyncTable,
        user: &UserId,
        records: &[EntityRecord],
    ) -> SyncResult<PushResponse> {
        let payload = PushRequest {
            user_id: user.clone(),
            records: records.to_vec(),
        };
        let request = self
            .authorize(self.client.post(self.endpoint(table, "push")))
            .json(&payload);
        Self::send(request).await
    }

    async fn pull(
        &self,
        table: SyncTable,
        user: &UserId,
        cursor: &PullCursor,
    ) -> SyncResult<PullResponse> {
        let request = self
            .authorize(self.client.get(self.endpoint(table, "pull")))
            .query(&pull_query(user, cursor));
        Self::send(request).await
    }
}

fn pull_query(user: &UserId, cursor: &PullCursor) -> Vec<(&'static str, String)> {
    let mut query = vec![("userId", user.to_string())];
    match cursor {
        PullCursor::Beginning => {}
        PullCursor::Token(token) => query.push(("cursor", token.clone())),
        PullCursor::Since(since) => {
            query.push(("since", since.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
    }
    query
}

async fn decode<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }

    let body = response.text().await.map_err(classify_transport)?;
    serde_json::from_str(&body)
        .map_err(|error| SyncError::Validation(format!("unexpected response payload: {error}")))
}

fn classify_transport(error: reqwest::Error) -> SyncError {
    if error.is_decode() {
        SyncError::Validation(error.to_string())
    } else {
        SyncError::TransientNetwork(error.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> SyncError {
    let message = parse_api_error(status, body);
    match status.as_u16() {
        401 | 403 => SyncError::Auth(message),
        402 | 429 => SyncError::QuotaExceeded(message),
        408 | 500..=599 => SyncError::TransientNetwork(message),
        _ => SyncError::Validation(message),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> SyncResult<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| SyncError::Validation("remote URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(SyncError::Validation(
            "remote URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::from_millis;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_codes_map_to_error_classes() {
        let cases = [
            (StatusCode::BAD_REQUEST, "validation"),
            (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            (StatusCode::UNAUTHORIZED, "auth"),
            (StatusCode::FORBIDDEN, "auth"),
            (StatusCode::PAYMENT_REQUIRED, "quota"),
            (StatusCode::TOO_MANY_REQUESTS, "quota"),
            (StatusCode::REQUEST_TIMEOUT, "transient"),
            (StatusCode::BAD_GATEWAY, "transient"),
            (StatusCode::SERVICE_UNAVAILABLE, "transient"),
        ];

        for (status, expected) in cases {
            let class = match classify_status(status, "") {
                SyncError::Validation(_) => "validation",
                SyncError::Auth(_) => "auth",
                SyncError::QuotaExceeded(_) => "quota",
                SyncError::TransientNetwork(_) => "transient",
                other => panic!("unexpected classification {other:?}"),
            };
            assert_eq!(class, expected, "{status}");
        }
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::FORBIDDEN, r#"{"message": " token expired "}"#),
            "token expired (403)"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down (502)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[test]
    fn base_url_must_be_http() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("sync.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url("https://sync.example.com/".to_string()).unwrap(),
            "https://sync.example.com"
        );
    }

    #[test]
    fn pull_query_carries_cursor_or_since() {
        let user: UserId = "u1".parse().unwrap();
        assert_eq!(
            pull_query(&user, &PullCursor::Token("12".into())),
            vec![("userId", "u1".to_string()), ("cursor", "12".to_string())]
        );
        assert_eq!(
            pull_query(&user, &PullCursor::Since(from_millis(1_700_000_000_123))),
            vec![
                ("userId", "u1".to_string()),
                ("since", "2023-11-14T22:13:20.123Z".to_string())
            ]
        );
        assert_eq!(pull_query(&user, &PullCursor::Beginning).len(), 1);
    }

    #[test]
    fn debug_redacts_api_token() {
        let remote = HttpRemote::new(
            "https://sync.example.com",
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(
            remote.endpoint(SyncTable::PhysiologicalLogs, "push"),
            "https://sync.example.com/v1/sync/physiological_logs/push"
        );
    }
}

//! HTTP Sender - production transport to the remote reporting endpoint
//!
//! Bodies are zstd-compressed JSON. Every request carries the tenant and
//! facility headers plus an idempotency key derived from the item id, so the
//! remote can discard replays after a crash between send and commit.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::{Duration, Instant};

use super::sender::{SendError, Sender};
use crate::config::{defaults, ConnectionConfig};
use crate::types::QueueItem;

const REPORTS_PATH: &str = "/api/paraclate/reports";
const HEALTH_PATH: &str = "/api/paraclate/health";

/// reqwest-based [`Sender`].
#[derive(Clone)]
pub struct HttpSender {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl HttpSender {
    /// Build a client with the configured request timeout.
    pub fn new(config: &ConnectionConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(concat!("paraclate-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })
    }

    fn url(endpoint: &str, path: &str) -> String {
        format!("{}{}", endpoint.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn encode(item: &QueueItem) -> Result<Vec<u8>, SendError> {
        let body = serde_json::json!({
            "id": item.id,
            "type": item.payload_type,
            "tenant_id": item.tenant_id,
            "facility_id": item.facility_id,
            "created_at": item.created_at,
            "payload": item.payload,
        });
        let json = serde_json::to_vec(&body).map_err(|e| SendError::Terminal(format!("serialization: {e}")))?;
        zstd::encode_all(json.as_slice(), defaults::ZSTD_LEVEL)
            .map_err(|e| SendError::Terminal(format!("compression: {e}")))
    }
}

/// Map a response status onto the retry model.
///
/// 409 means the remote already has this item, which is a delivery.
pub fn classify_status(status: StatusCode) -> Result<(), SendError> {
    if status.is_success() || status == StatusCode::CONFLICT {
        return Ok(());
    }
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => Err(SendError::Terminal(format!("remote returned {status}"))),
        _ => Err(SendError::Transient(format!("remote returned {status}"))),
    }
}

fn transport_error(e: &reqwest::Error) -> SendError {
    if e.is_timeout() {
        SendError::Transient("request timed out".to_string())
    } else {
        SendError::Transient(e.to_string())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, endpoint: &str, item: &QueueItem) -> Result<u64, SendError> {
        let body = Self::encode(item)?;
        let started = Instant::now();

        let req = self
            .http
            .post(Self::url(endpoint, REPORTS_PATH))
            .header("Content-Type", "application/json")
            .header("Content-Encoding", "zstd")
            .header("X-Tenant-ID", &item.tenant_id)
            .header("X-Facility-ID", &item.facility_id)
            .header("X-Idempotency-Key", format!("{}-{}", item.facility_id, item.id))
            .body(body);

        let resp = self.authorize(req).send().await.map_err(|e| transport_error(&e))?;
        classify_status(resp.status())?;
        Ok(elapsed_ms(started))
    }

    async fn probe(&self, endpoint: &str) -> Result<u64, SendError> {
        let started = Instant::now();
        let req = self.http.get(Self::url(endpoint, HEALTH_PATH));
        let resp = self.authorize(req).send().await.map_err(|e| transport_error(&e))?;

        let status = resp.status();
        if status.is_success() {
            Ok(elapsed_ms(started))
        } else {
            // A probe never carries a payload, so nothing here is terminal
            Err(SendError::Transient(format!("health check returned {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PayloadType;
    use chrono::Utc;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK).is_ok());
        assert!(classify_status(StatusCode::CREATED).is_ok());
        assert!(classify_status(StatusCode::CONFLICT).is_ok());

        assert!(classify_status(StatusCode::UNPROCESSABLE_ENTITY).unwrap_err().is_terminal());
        assert!(classify_status(StatusCode::PAYLOAD_TOO_LARGE).unwrap_err().is_terminal());

        assert!(!classify_status(StatusCode::SERVICE_UNAVAILABLE).unwrap_err().is_terminal());
        assert!(!classify_status(StatusCode::TOO_MANY_REQUESTS).unwrap_err().is_terminal());
        assert!(!classify_status(StatusCode::UNAUTHORIZED).unwrap_err().is_terminal());
    }

    #[test]
    fn test_body_is_zstd_json() {
        let item = QueueItem::new(
            42,
            "tenant-a",
            "site-1",
            PayloadType::Emergency,
            serde_json::json!({"alarm": "smoke"}),
            Utc::now(),
        );
        let body = HttpSender::encode(&item).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&zstd::decode_all(body.as_slice()).unwrap()).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["type"], "emergency");
        assert_eq!(json["payload"]["alarm"], "smoke");
    }

    #[test]
    fn test_url_join() {
        assert_eq!(
            HttpSender::url("https://reports.example.com/", REPORTS_PATH),
            "https://reports.example.com/api/paraclate/reports"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let sender = HttpSender::new(&ConnectionConfig {
            http_timeout_secs: 2,
            ..ConnectionConfig::default()
        })
        .unwrap();
        let err = sender.probe("http://127.0.0.1:1").await.unwrap_err();
        assert!(!err.is_terminal());
    }
}

//! Gateway access.
//!
//! `LedgerClient` is the seam the uploader and the status tracker talk
//! through; `GatewayClient` implements it over HTTP with reqwest. Failed
//! responses are split into structured errors (a JSON body with an
//! `error` code) and unstructured ones, because only structured codes can
//! be classified as fatal.

use super::transaction::{ChunkPayload, TransactionHeader};
use super::{b64url, TxId, Winston};
use crate::error::{Result, SyncError, FATAL_CHUNK_ERRORS};
use crate::price::PriceOracle;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client as HttpClient, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("weavesync/", env!("CARGO_PKG_VERSION"));

/// A failed gateway request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The gateway answered with a JSON `error` code.
    #[error("HTTP {status}: {code}")]
    Structured { status: u16, code: String },

    #[error("HTTP {status}: {body}")]
    Unstructured { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl RequestError {
    /// The error code if resending the same request can never succeed.
    pub fn fatal_code(&self) -> Option<&str> {
        match self {
            RequestError::Structured { code, .. } if FATAL_CHUNK_ERRORS.contains(&code.as_str()) => {
                Some(code)
            }
            _ => None,
        }
    }

    fn from_body(status: StatusCode, body: String) -> Self {
        #[derive(Deserialize)]
        struct ErrorBody {
            error: String,
        }

        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => RequestError::Structured {
                status: status.as_u16(),
                code: parsed.error,
            },
            Err(_) => RequestError::Unstructured {
                status: status.as_u16(),
                body,
            },
        }
    }

    async fn from_response(response: Response) -> Self {
        let status = response.status();
        match response.text().await {
            Ok(body) => Self::from_body(status, body),
            Err(e) => RequestError::Transport(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        RequestError::Transport(e.to_string())
    }
}

/// Confirmation state of a transaction as reported by a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Known to the gateway but not mined yet.
    Pending,
    NotFound,
    Mined { confirmations: u64 },
}

impl TxStatus {
    pub fn confirmations(&self) -> u64 {
        match self {
            TxStatus::Mined { confirmations } => *confirmations,
            TxStatus::Pending | TxStatus::NotFound => 0,
        }
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Post a transaction header; `data` is inlined for single-chunk payloads.
    async fn post_transaction(
        &self,
        header: &TransactionHeader,
        data: Option<&Bytes>,
    ) -> std::result::Result<(), RequestError>;

    async fn post_chunk(&self, chunk: &ChunkPayload) -> std::result::Result<(), RequestError>;

    async fn transaction_status(&self, id: &TxId) -> std::result::Result<TxStatus, RequestError>;

    /// Anchor (`last_tx`) for a new transaction.
    async fn tx_anchor(&self) -> std::result::Result<String, RequestError>;
}

// =============================================================================
// HTTP gateway
// =============================================================================

#[derive(Serialize)]
struct TransactionBody<'a> {
    #[serde(flatten)]
    header: &'a TransactionHeader,
    data: String,
}

#[derive(Deserialize)]
struct StatusBody {
    number_of_confirmations: u64,
}

#[derive(Debug, Clone)]
pub struct GatewayClient {
    endpoint: Url,
    client: HttpClient,
}

impl GatewayClient {
    /// `request_timeout` bounds each whole request; a stalled gateway
    /// surfaces as [`RequestError::Transport`].
    pub fn new(gateway_url: &str, request_timeout: Duration) -> Result<Self> {
        let mut endpoint = Url::parse(gateway_url)
            .map_err(|e| SyncError::Config(format!("invalid gateway URL {}: {}", gateway_url, e)))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = HttpClient::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> std::result::Result<Url, RequestError> {
        self.endpoint
            .join(path)
            .map_err(|e| RequestError::Transport(format!("invalid request path {}: {}", path, e)))
    }

    async fn get_text(&self, path: &str) -> std::result::Result<String, RequestError> {
        let res = self.client.get(self.url(path)?).send().await?;
        if res.status().is_success() {
            Ok(res.text().await?)
        } else {
            Err(RequestError::from_response(res).await)
        }
    }
}

#[async_trait]
impl LedgerClient for GatewayClient {
    async fn post_transaction(
        &self,
        header: &TransactionHeader,
        data: Option<&Bytes>,
    ) -> std::result::Result<(), RequestError> {
        let body = TransactionBody {
            header,
            data: data.map(|d| b64url(d)).unwrap_or_default(),
        };
        let res = self.client.post(self.url("tx")?).json(&body).send().await?;
        if res.status().is_success() {
            Ok(())
        } else {
            Err(RequestError::from_response(res).await)
        }
    }

    async fn post_chunk(&self, chunk: &ChunkPayload) -> std::result::Result<(), RequestError> {
        let res = self.client.post(self.url("chunk")?).json(chunk).send().await?;
        if res.status().is_success() {
            Ok(())
        } else {
            Err(RequestError::from_response(res).await)
        }
    }

    async fn transaction_status(&self, id: &TxId) -> std::result::Result<TxStatus, RequestError> {
        let res = self
            .client
            .get(self.url(&format!("tx/{}/status", id))?)
            .send()
            .await?;

        match res.status() {
            StatusCode::OK => {
                let body = res.text().await?;
                let status: StatusBody = serde_json::from_str(&body).map_err(|_| {
                    RequestError::Unstructured {
                        status: StatusCode::OK.as_u16(),
                        body,
                    }
                })?;
                Ok(TxStatus::Mined {
                    confirmations: status.number_of_confirmations,
                })
            }
            StatusCode::ACCEPTED => Ok(TxStatus::Pending),
            StatusCode::NOT_FOUND => Ok(TxStatus::NotFound),
            _ => Err(RequestError::from_response(res).await),
        }
    }

    async fn tx_anchor(&self) -> std::result::Result<String, RequestError> {
        Ok(self.get_text("tx_anchor").await?.trim().to_string())
    }
}

#[async_trait]
impl PriceOracle for GatewayClient {
    async fn winston_for_bytes(&self, bytes: u64) -> Result<Winston> {
        let text = self.get_text(&format!("price/{}", bytes)).await?;
        let winston = text
            .trim()
            .parse::<u64>()
            .map_err(|_| SyncError::malformed("price response", text.clone()))?;
        Ok(Winston(winston))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_error_classification() {
        let err = RequestError::from_body(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_proof"}"#.to_string(),
        );
        assert_eq!(err.fatal_code(), Some("invalid_proof"));

        let err = RequestError::from_body(
            StatusCode::BAD_REQUEST,
            r#"{"error":"disk_full"}"#.to_string(),
        );
        assert!(matches!(err, RequestError::Structured { .. }));
        assert_eq!(err.fatal_code(), None);
    }

    #[test]
    fn test_unstructured_error_is_not_fatal() {
        let err = RequestError::from_body(StatusCode::BAD_GATEWAY, "upstream down".to_string());
        assert_eq!(
            err,
            RequestError::Unstructured {
                status: 502,
                body: "upstream down".into()
            }
        );
        assert!(err.fatal_code().is_none());
        assert!(RequestError::Transport("reset".into()).fatal_code().is_none());
    }

    #[test]
    fn test_endpoint_gets_trailing_slash() {
        let client =
            GatewayClient::new("http://localhost:1984/gw", Duration::from_secs(5)).unwrap();
        assert_eq!(client.endpoint().as_str(), "http://localhost:1984/gw/");
        assert_eq!(
            client.url("tx_anchor").unwrap().as_str(),
            "http://localhost:1984/gw/tx_anchor"
        );
        assert!(GatewayClient::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_stalled_gateway_times_out() {
        // Accepts connections through the backlog but never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let client = GatewayClient::new(&url, Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        let err = client.tx_anchor().await.unwrap_err();
        assert!(matches!(err, RequestError::Transport(_)), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
        drop(listener);
    }

    #[test]
    fn test_status_confirmations() {
        assert_eq!(TxStatus::Pending.confirmations(), 0);
        assert_eq!(TxStatus::NotFound.confirmations(), 0);
        assert_eq!(TxStatus::Mined { confirmations: 12 }.confirmations(), 12);
    }
}

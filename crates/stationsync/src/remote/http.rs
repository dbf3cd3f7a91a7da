//! HTTP implementation of the observation transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{to_query_pairs, EntryFormQuery, ObservationQuery, ObservationTransport, TransportError};
use crate::error::{Error, Result};
use crate::observation::{CompositeKey, ObservationRecord};

/// Acknowledgement expected from a successful bulk upsert.
const SUCCESS_MESSAGE: &str = "success";

/// Talks to the remote observation API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

/// Acknowledgement body of a data-entry upsert.
#[derive(Debug, Deserialize)]
struct PutResponse {
    message: String,
}

/// Error body returned by the API.
///
/// `message` is a string for application errors and a list of strings for
/// request validation failures. `dto` echoes the record that was refused.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    dto: Option<Value>,
}

impl HttpTransport {
    /// Create a transport for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// The API root this transport talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_records(
        &self,
        path: &str,
        pairs: &[(String, String)],
    ) -> std::result::Result<Vec<ObservationRecord>, TransportError> {
        let url = self.url(path);
        debug!("GET {} ({} params)", url, pairs.len());

        let response = self
            .client
            .get(&url)
            .query(pairs)
            .send()
            .await
            .map_err(request_error)?;
        let body = check_status(response).await?.text().await.map_err(request_error)?;

        decode_records(&body)
    }

    /// Send a key array and read back the number of records changed.
    async fn send_keys(
        &self,
        method: Method,
        path: &str,
        keys: &[CompositeKey],
    ) -> std::result::Result<u64, TransportError> {
        let url = self.url(path);
        debug!("{} {} ({} keys)", method, url, keys.len());

        let response = self
            .client
            .request(method, &url)
            .json(keys)
            .send()
            .await
            .map_err(request_error)?;
        let body = check_status(response).await?.text().await.map_err(request_error)?;

        decode_count(&body)
    }
}

#[async_trait]
impl ObservationTransport for HttpTransport {
    async fn bulk_put(
        &self,
        records: &[ObservationRecord],
    ) -> std::result::Result<(), TransportError> {
        let url = self.url("observations/data-entry");
        debug!("PUT {} ({} records)", url, records.len());

        let response = self
            .client
            .put(&url)
            .json(records)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        let body = check_status(response).await?.text().await.map_err(request_error)?;

        let ack = parse_ack(&body)?;
        if ack.message == SUCCESS_MESSAGE {
            Ok(())
        } else {
            warn!("Upsert not acknowledged: {}", ack.message);
            Err(TransportError::server(status.as_u16(), ack.message))
        }
    }

    async fn find_entry_form_data(
        &self,
        query: &EntryFormQuery,
    ) -> std::result::Result<Vec<ObservationRecord>, TransportError> {
        let pairs = encode(query)?;
        self.get_records("observations/form-data", &pairs).await
    }

    async fn find(
        &self,
        query: &ObservationQuery,
    ) -> std::result::Result<Vec<ObservationRecord>, TransportError> {
        let pairs = encode(query)?;
        self.get_records("observations", &pairs).await
    }

    async fn restore(&self, keys: &[CompositeKey]) -> std::result::Result<u64, TransportError> {
        self.send_keys(Method::PATCH, "observations/restore", keys).await
    }

    async fn soft_delete(&self, keys: &[CompositeKey]) -> std::result::Result<u64, TransportError> {
        self.send_keys(Method::DELETE, "observations/soft", keys).await
    }

    async fn hard_delete(&self, keys: &[CompositeKey]) -> std::result::Result<u64, TransportError> {
        self.send_keys(Method::DELETE, "observations/hard", keys).await
    }
}

fn encode<T: serde::Serialize>(
    query: &T,
) -> std::result::Result<Vec<(String, String)>, TransportError> {
    to_query_pairs(query).map_err(|e| TransportError::protocol(format!("invalid query: {e}")))
}

fn decode_records(body: &str) -> std::result::Result<Vec<ObservationRecord>, TransportError> {
    serde_json::from_str(body)
        .map_err(|e| TransportError::protocol(format!("invalid response body: {e}")))
}

fn parse_ack(body: &str) -> std::result::Result<PutResponse, TransportError> {
    serde_json::from_str(body)
        .map_err(|e| TransportError::protocol(format!("invalid upsert acknowledgement: {e}")))
}

fn decode_count(body: &str) -> std::result::Result<u64, TransportError> {
    serde_json::from_str(body.trim())
        .map_err(|e| TransportError::protocol(format!("invalid change count {body:?}: {e}")))
}

/// Classify a failure to get any response at all.
fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::network(format!("request timed out: {err}"))
    } else {
        TransportError::network(err.to_string())
    }
}

async fn check_status(response: Response) -> std::result::Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &body))
}

/// Build a server error from a non-success response body.
fn error_from_body(status: StatusCode, body: &str) -> TransportError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    let message = match parsed.message {
        Some(Value::String(s)) => s,
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) => other.to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    };

    let rejected = parsed
        .dto
        .and_then(|dto| serde_json::from_value::<ObservationRecord>(dto).ok());

    match rejected {
        Some(record) => TransportError::rejected(status.as_u16(), message, record),
        None => TransportError::server(status.as_u16(), message),
    }
}

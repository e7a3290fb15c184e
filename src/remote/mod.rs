//! Backend REST API client helpers.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{AgentError, Result};

/// `OrderApi` trait and its reqwest implementation.
pub mod api;
/// Login and agent-availability endpoints.
pub mod auth;
/// Order endpoints.
pub mod orders;
/// Token and profile persistence.
pub mod session_store;

/// Error body shapes the backend uses.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Payloads arrive bare, or wrapped in `data` / a named key.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Envelope<T> {
    Order { order: T },
    Stats { stats: T },
    Data { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            Envelope::Order { order } => order,
            Envelope::Stats { stats } => stats,
            Envelope::Data { data } => data,
            Envelope::Bare(v) => v,
        }
    }
}

/// Convert non-2xx responses into a `ServerRejection` carrying the payload message.
pub(crate) async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(rejection_from_body(status.as_u16(), &body))
}

fn rejection_from_body(status: u16, body: &str) -> AgentError {
    let parsed = serde_json::from_str::<ErrorBody>(body).unwrap_or_default();
    AgentError::rejected(Some(status), parsed.message.or(parsed.error))
}

/// Read a successful response body, unwrapping any envelope.
pub(crate) async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let resp = ensure_success(resp).await?;
    let bytes = resp.bytes().await?;
    decode(&bytes)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let env = serde_json::from_slice::<Envelope<T>>(bytes)?;
    Ok(env.into_inner())
}

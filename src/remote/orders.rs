//! Order endpoints: listing, snapshots, status updates, delivery OTP.

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Serialize;

use super::{ensure_success, read_json};
use crate::{
    error::{AgentError, Result},
    models::{Order, OrderId, OrderList, OrderStats, OrderStatus},
    proof::ProofPhoto,
};

/// Everything the backend needs to close a delivery.
#[derive(Clone, Debug)]
pub struct VerificationRequest {
    /// Code the customer read out.
    pub otp: String,
    pub delivery_note: String,
    /// Cash collected on hand-off; the current flow always sends `true`.
    pub payment_received: bool,
    pub proof: ProofPhoto,
}

/// List orders, optionally filtered by status.
pub async fn list_orders(
    http: &Client,
    base_url: &str,
    token: &str,
    status: Option<OrderStatus>,
) -> Result<OrderList> {
    let url = match status {
        Some(st) => format!(
            "{}/api/orders?status={}",
            base_url,
            urlencoding::encode(st.as_str())
        ),
        None => format!("{}/api/orders", base_url),
    };
    let resp = http.get(url).bearer_auth(token).send().await?;
    read_json(resp).await
}

/// Fetch a single order snapshot.
pub async fn get_order(http: &Client, base_url: &str, token: &str, id: &OrderId) -> Result<Order> {
    let url = format!(
        "{}/api/orders/{}",
        base_url,
        urlencoding::encode(id.as_str())
    );
    let resp = http.get(url).bearer_auth(token).send().await?;
    read_json(resp).await
}

/// Status update request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusUpdateReq<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_notes: Option<&'a str>,
}

/// Submit a status transition and return the authoritative snapshot.
pub async fn update_status(
    http: &Client,
    base_url: &str,
    token: &str,
    id: &OrderId,
    status: OrderStatus,
    agent_notes: Option<&str>,
) -> Result<Order> {
    let url = format!(
        "{}/api/orders/{}/status",
        base_url,
        urlencoding::encode(id.as_str())
    );
    let body = StatusUpdateReq {
        status: status.as_str(),
        agent_notes,
    };
    let resp = http.put(url).bearer_auth(token).json(&body).send().await?;
    read_json(resp).await
}

/// Ask the backend to text a delivery OTP to the customer.
pub async fn send_otp(http: &Client, base_url: &str, token: &str, id: &OrderId) -> Result<()> {
    let url = format!(
        "{}/api/orders/{}/send-otp",
        base_url,
        urlencoding::encode(id.as_str())
    );
    let resp = http.post(url).bearer_auth(token).send().await?;
    ensure_success(resp).await?;
    Ok(())
}

/// Build the multipart form for OTP verification.
fn verification_form(req: VerificationRequest) -> Result<Form> {
    let proof = Part::bytes(req.proof.bytes)
        .file_name(req.proof.file_name)
        .mime_str(&req.proof.mime)
        .map_err(|e| {
            AgentError::Storage(format!("proof photo type {:?}: {e}", req.proof.mime))
        })?;
    Ok(Form::new()
        .text("otp", req.otp)
        .text("deliveryNote", req.delivery_note)
        .text("paymentReceived", req.payment_received.to_string())
        .part("deliveryProof", proof))
}

/// Verify the customer's OTP with proof of delivery; returns the delivered snapshot.
pub async fn verify_otp(
    http: &Client,
    base_url: &str,
    token: &str,
    id: &OrderId,
    req: VerificationRequest,
) -> Result<Order> {
    let url = format!(
        "{}/api/orders/{}/verify-otp",
        base_url,
        urlencoding::encode(id.as_str())
    );
    let form = verification_form(req)?;
    let resp = http.post(url).bearer_auth(token).multipart(form).send().await?;
    read_json(resp).await
}

/// Aggregated counts for the history screen.
pub async fn agent_stats(http: &Client, base_url: &str, token: &str) -> Result<OrderStats> {
    let url = format!("{}/api/orders/agent/stats", base_url);
    let resp = http.get(url).bearer_auth(token).send().await?;
    read_json(resp).await
}

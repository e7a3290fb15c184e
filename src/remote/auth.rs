//! Login exchange and agent availability endpoints.

use reqwest::Client;
use serde::Serialize;

use super::{ensure_success, read_json};
use crate::{
    error::Result,
    models::{AgentStatus, LoginResponse},
};

#[derive(Debug, Serialize)]
struct LoginReq<'a> {
    phone: &'a str,
    otp: &'a str,
}

/// Exchange phone + login OTP for a bearer token and profile.
pub async fn verify_login_otp(
    http: &Client,
    base_url: &str,
    phone: &str,
    otp: &str,
) -> Result<LoginResponse> {
    let url = format!("{}/api/auth/verify-otp", base_url);
    let resp = http
        .post(url)
        .json(&LoginReq { phone, otp })
        .send()
        .await?;
    read_json(resp).await
}

#[derive(Debug, Serialize)]
struct AgentStatusReq<'a> {
    status: &'a str,
}

/// Report the agent as online/offline.
pub async fn update_agent_status(
    http: &Client,
    base_url: &str,
    token: &str,
    status: AgentStatus,
) -> Result<()> {
    let url = format!("{}/api/auth/agent/status", base_url);
    let resp = http
        .patch(url)
        .bearer_auth(token)
        .json(&AgentStatusReq {
            status: status.as_str(),
        })
        .send()
        .await?;
    ensure_success(resp).await?;
    Ok(())
}

//! The remote order API seam.

use async_trait::async_trait;
use reqwest::Client;
use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use super::{auth, orders, orders::VerificationRequest};
use crate::{
    error::{AgentError, Result},
    models::{AgentStatus, LoginResponse, Order, OrderId, OrderList, OrderStats, OrderStatus},
};

/// Every backend call the agent client makes.
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn login(&self, phone: &str, otp: &str) -> Result<LoginResponse>;
    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<OrderList>;
    async fn get_order(&self, id: &OrderId) -> Result<Order>;
    async fn update_order_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        agent_notes: Option<String>,
    ) -> Result<Order>;
    async fn send_delivery_otp(&self, id: &OrderId) -> Result<()>;
    async fn verify_delivery_otp(&self, id: &OrderId, req: VerificationRequest) -> Result<Order>;
    async fn update_agent_status(&self, status: AgentStatus) -> Result<()>;
    async fn agent_stats(&self) -> Result<OrderStats>;
}

/// Bearer token shared between the auth session and the HTTP client.
#[derive(Clone, Debug, Default)]
pub struct Credentials(Arc<RwLock<Option<String>>>);

impl Credentials {
    /// Store the bearer token for later calls.
    pub fn set(&self, token: impl Into<String>) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    /// Drop the bearer token.
    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Current bearer token, if logged in.
    pub fn token(&self) -> Option<String> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// `OrderApi` over HTTP with a single shared reqwest client.
#[derive(Clone)]
pub struct HttpApi {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpApi {
    /// Client for `base_url`; fails only if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration, credentials: Credentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn token(&self) -> Result<String> {
        self.credentials.token().ok_or(AgentError::Unauthenticated)
    }
}

#[async_trait]
impl OrderApi for HttpApi {
    async fn login(&self, phone: &str, otp: &str) -> Result<LoginResponse> {
        auth::verify_login_otp(&self.http, &self.base_url, phone, otp).await
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<OrderList> {
        let token = self.token()?;
        orders::list_orders(&self.http, &self.base_url, &token, status).await
    }

    async fn get_order(&self, id: &OrderId) -> Result<Order> {
        let token = self.token()?;
        orders::get_order(&self.http, &self.base_url, &token, id).await
    }

    async fn update_order_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        agent_notes: Option<String>,
    ) -> Result<Order> {
        let token = self.token()?;
        orders::update_status(
            &self.http,
            &self.base_url,
            &token,
            id,
            status,
            agent_notes.as_deref(),
        )
        .await
    }

    async fn send_delivery_otp(&self, id: &OrderId) -> Result<()> {
        let token = self.token()?;
        orders::send_otp(&self.http, &self.base_url, &token, id).await
    }

    async fn verify_delivery_otp(&self, id: &OrderId, req: VerificationRequest) -> Result<Order> {
        let token = self.token()?;
        orders::verify_otp(&self.http, &self.base_url, &token, id, req).await
    }

    async fn update_agent_status(&self, status: AgentStatus) -> Result<()> {
        let token = self.token()?;
        auth::update_agent_status(&self.http, &self.base_url, &token, status).await
    }

    async fn agent_stats(&self) -> Result<OrderStats> {
        let token = self.token()?;
        orders::agent_stats(&self.http, &self.base_url, &token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calls_without_a_token_fail_before_sending() {
        let api = HttpApi::new(
            "http://127.0.0.1:9/",
            Duration::from_secs(1),
            Credentials::default(),
        )
        .unwrap();
        assert_eq!(api.base_url, "http://127.0.0.1:9");
        let err = api.agent_stats().await.unwrap_err();
        assert_eq!(err, AgentError::Unauthenticated);
    }

    #[test]
    fn credentials_are_shared_between_clones() {
        let creds = Credentials::default();
        let other = creds.clone();
        creds.set("abc");
        assert_eq!(other.token().as_deref(), Some("abc"));
        other.clear();
        assert!(creds.token().is_none());
    }
}

//! In-memory `OrderApi` that records every call.

use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use crate::{
    error::{AgentError, Result},
    models::{
        AgentStatus, LoginResponse, Order, OrderId, OrderList, OrderStats, OrderStatus, User,
    },
    remote::{api::OrderApi, orders::VerificationRequest},
};

#[derive(Default)]
pub struct FakeApi {
    calls: Mutex<Vec<&'static str>>,
    failures: Mutex<HashMap<&'static str, VecDeque<AgentError>>>,
    orders: Mutex<HashMap<OrderId, Order>>,
    otp: Mutex<String>,
    agent_status: Mutex<Option<AgentStatus>>,
    verified: Mutex<Vec<VerificationRequest>>,
    /// Status a successful verification leaves the order in.
    verify_outcome: Mutex<Option<OrderStatus>>,
    /// Suspend once inside each call so concurrent callers interleave.
    pub yield_in_calls: bool,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn yielding() -> Self {
        Self {
            yield_in_calls: true,
            ..Self::default()
        }
    }

    /// Seed server-side orders.
    pub fn with_orders(self, orders: impl IntoIterator<Item = Order>) -> Self {
        {
            let mut map = self.orders.lock().unwrap();
            for o in orders {
                map.insert(o.id.clone(), o);
            }
        }
        self
    }

    pub fn set_otp(&self, otp: &str) {
        *self.otp.lock().unwrap() = otp.to_string();
    }

    /// Accept the next OTP but leave the order in `status`.
    pub fn verify_leaves(&self, status: OrderStatus) {
        *self.verify_outcome.lock().unwrap() = Some(status);
    }

    /// Make the next call to `method` fail with `err`.
    pub fn fail_next(&self, method: &'static str, err: AgentError) {
        self.failures
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(err);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| **c == method).count()
    }

    pub fn agent_status(&self) -> Option<AgentStatus> {
        *self.agent_status.lock().unwrap()
    }

    pub fn verified(&self) -> Vec<VerificationRequest> {
        self.verified.lock().unwrap().clone()
    }

    pub fn server_order(&self, id: &str) -> Option<Order> {
        self.orders.lock().unwrap().get(&OrderId::new(id)).cloned()
    }

    async fn enter(&self, method: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(method);
        if self.yield_in_calls {
            tokio::task::yield_now().await;
        }
        let next = self
            .failures
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(|q| q.pop_front());
        match next {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl OrderApi for FakeApi {
    async fn login(&self, phone: &str, _otp: &str) -> Result<LoginResponse> {
        self.enter("login").await?;
        Ok(LoginResponse {
            token: format!("token-{phone}"),
            user: User {
                id: "u1".into(),
                name: "Agent".into(),
                phone: phone.to_string(),
                role: Some("delivery_agent".into()),
            },
            delivery_agent: None,
        })
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<OrderList> {
        self.enter("list_orders").await?;
        let mut orders: Vec<Order> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(OrderList {
            orders,
            pagination: None,
        })
    }

    async fn get_order(&self, id: &OrderId) -> Result<Order> {
        self.enter("get_order").await?;
        self.orders
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::rejected(Some(404), Some("Order not found".into())))
    }

    async fn update_order_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        agent_notes: Option<String>,
    ) -> Result<Order> {
        self.enter("update_order_status").await?;
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .entry(id.clone())
            .or_insert_with(|| Order::new(id.clone(), status));
        order.status = status;
        if agent_notes.is_some() {
            order.agent_notes = agent_notes;
        }
        Ok(order.clone())
    }

    async fn send_delivery_otp(&self, _id: &OrderId) -> Result<()> {
        self.enter("send_delivery_otp").await
    }

    async fn verify_delivery_otp(&self, id: &OrderId, req: VerificationRequest) -> Result<Order> {
        self.enter("verify_delivery_otp").await?;
        if req.otp != *self.otp.lock().unwrap() {
            return Err(AgentError::rejected(Some(400), Some("Invalid OTP".into())));
        }
        self.verified.lock().unwrap().push(req);
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .entry(id.clone())
            .or_insert_with(|| Order::new(id.clone(), OrderStatus::Delivered));
        order.status = self
            .verify_outcome
            .lock()
            .unwrap()
            .take()
            .unwrap_or(OrderStatus::Delivered);
        Ok(order.clone())
    }

    async fn update_agent_status(&self, status: AgentStatus) -> Result<()> {
        self.enter("update_agent_status").await?;
        *self.agent_status.lock().unwrap() = Some(status);
        Ok(())
    }

    async fn agent_stats(&self) -> Result<OrderStats> {
        self.enter("agent_stats").await?;
        let orders = self.orders.lock().unwrap();
        let count = |pred: fn(OrderStatus) -> bool| {
            orders.values().filter(|o| pred(o.status)).count() as u64
        };
        Ok(OrderStats {
            pending: count(|s| s == OrderStatus::Pending),
            active: count(|s| !s.is_terminal() && s != OrderStatus::Pending),
            delivered: count(|s| s == OrderStatus::Delivered),
            cancelled: count(|s| s == OrderStatus::Canceled),
        })
    }
}

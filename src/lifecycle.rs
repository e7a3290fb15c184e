//! Order status transitions, validated locally and applied only from the
//! server's authoritative snapshot.

use std::sync::Arc;

use crate::{
    error::{AgentError, Result},
    models::{Order, OrderId, OrderStatus},
    remote::api::OrderApi,
    store::OrderStore,
};

/// Owns status changes for the agent's orders.
#[derive(Clone)]
pub struct OrderLifecycle {
    api: Arc<dyn OrderApi>,
    store: OrderStore,
}

/// Allowed iff `to` is the single successor of `from`. The last hop to
/// `delivered` belongs to the completion protocol.
pub fn check_transition(from: OrderStatus, to: OrderStatus) -> Result<()> {
    if from == OrderStatus::HeadingToCustomer && to == OrderStatus::Delivered {
        return Err(AgentError::DeliveryProofRequired);
    }
    match from.successor() {
        Some(next) if next == to => Ok(()),
        _ => Err(AgentError::InvalidTransition { from, to }),
    }
}

impl OrderLifecycle {
    pub fn new(api: Arc<dyn OrderApi>, store: OrderStore) -> Self {
        Self { api, store }
    }

    /// Local order state this lifecycle writes to.
    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    pub(crate) fn api(&self) -> &Arc<dyn OrderApi> {
        &self.api
    }

    /// The order `id` refers to: the current one, or an available one.
    fn locate(&self, id: &OrderId) -> Result<Order> {
        if let Some(cur) = self.store.current()
            && &cur.id == id
        {
            return Ok(cur);
        }
        self.store
            .find_available(id)
            .ok_or_else(|| AgentError::UnknownOrder(id.to_string()))
    }

    /// Validate and submit a status change. Local state changes only after
    /// the server confirms, and then to the snapshot it returned.
    pub async fn request_transition(
        &self,
        id: &OrderId,
        target: OrderStatus,
        agent_notes: Option<String>,
    ) -> Result<Order> {
        let order = self.locate(id)?;
        if let Err(e) = check_transition(order.status, target) {
            tracing::warn!(order_id = %id, from = %order.status, to = %target, "transition rejected locally");
            return Err(e);
        }
        if target == OrderStatus::Accepted
            && let Some(cur) = self.store.current()
            && cur.id != *id
        {
            return Err(AgentError::CurrentOrderActive(cur.id.to_string()));
        }

        tracing::info!(order_id = %id, from = %order.status, to = %target, "submitting transition");
        let snapshot = match self.api.update_order_status(id, target, agent_notes).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(order_id = %id, to = %target, error = %e, "transition failed");
                return Err(e);
            }
        };

        if target == OrderStatus::Accepted {
            self.store.promote(snapshot.clone());
        }
        self.store.update_current(snapshot.clone());
        tracing::info!(order_id = %id, status = %snapshot.status, "transition applied");
        Ok(snapshot)
    }

    /// Accept an available order into the current-order slot.
    pub async fn accept(&self, id: &OrderId) -> Result<Order> {
        self.request_transition(id, OrderStatus::Accepted, None)
            .await
    }

    /// Advance the current order one step.
    pub async fn advance(&self, agent_notes: Option<String>) -> Result<Order> {
        let cur = self.store.current().ok_or(AgentError::NoActiveOrder)?;
        let next = cur.status.successor().ok_or(AgentError::InvalidTransition {
            from: cur.status,
            to: cur.status,
        })?;
        self.request_transition(&cur.id, next, agent_notes).await
    }

    /// Record the delivered snapshot returned by OTP verification.
    pub(crate) fn complete_delivery(&self, snapshot: Order) {
        tracing::info!(order_id = %snapshot.id, status = %snapshot.status, "delivery completed");
        self.store.update_current(snapshot);
    }

    /// Apply a snapshot pushed by the server (e.g. cancellation).
    /// Returns whether it touched local state.
    pub fn apply_remote_snapshot(&self, order: Order) -> bool {
        if let Some(cur) = self.store.current()
            && cur.id == order.id
        {
            tracing::info!(order_id = %order.id, status = %order.status, "current order updated remotely");
            self.store.update_current(order);
            return true;
        }
        if self.store.find_available(&order.id).is_some() {
            let mut available = self.store.available();
            if order.status == OrderStatus::Pending {
                for o in available.iter_mut().filter(|o| o.id == order.id) {
                    *o = order.clone();
                }
            } else {
                // Taken by someone else or withdrawn.
                available.retain(|o| o.id != order.id);
            }
            self.store.replace_available(available);
            return true;
        }
        false
    }

    /// Re-fetch the current order from the server.
    pub async fn refresh_current(&self) -> Result<Option<Order>> {
        let Some(cur) = self.store.current() else {
            return Ok(None);
        };
        let snapshot = self.api.get_order(&cur.id).await?;
        self.store.update_current(snapshot.clone());
        Ok(Some(snapshot))
    }
}

//! Session-scoped order slots: available orders, the current order, history.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{Order, OrderId};

#[derive(Debug, Default)]
struct Slots {
    available: Vec<Order>,
    current: Option<Order>,
    history: Vec<Order>,
}

/// Shared handle; reads are public, writes go through the lifecycle and
/// availability components only.
#[derive(Clone, Debug, Default)]
pub struct OrderStore {
    slots: Arc<Mutex<Slots>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Orders the agent may accept.
    pub fn available(&self) -> Vec<Order> {
        self.lock().available.clone()
    }

    /// Order being delivered, if any.
    pub fn current(&self) -> Option<Order> {
        self.lock().current.clone()
    }

    /// Orders that reached `delivered` or `canceled` this session.
    pub fn history(&self) -> Vec<Order> {
        self.lock().history.clone()
    }

    /// Available order by id.
    pub fn find_available(&self, id: &OrderId) -> Option<Order> {
        self.lock().available.iter().find(|o| &o.id == id).cloned()
    }

    pub(crate) fn replace_available(&self, orders: Vec<Order>) {
        let mut slots = self.lock();
        // The accepted order never shows up twice.
        let current_id = slots.current.as_ref().map(|o| o.id.clone());
        slots.available = orders
            .into_iter()
            .filter(|o| Some(&o.id) != current_id.as_ref())
            .collect();
    }

    pub(crate) fn clear_available(&self) {
        self.lock().available.clear();
    }

    /// Move an accepted order out of the available list into the current slot.
    pub(crate) fn promote(&self, order: Order) {
        let mut slots = self.lock();
        slots.available.retain(|o| o.id != order.id);
        slots.current = Some(order);
    }

    /// Replace the current order with a newer snapshot; terminal snapshots
    /// leave the active slot and go to history.
    pub(crate) fn update_current(&self, order: Order) {
        let mut slots = self.lock();
        if order.status.is_terminal() {
            slots.current = None;
            slots.available.retain(|o| o.id != order.id);
            slots.history.push(order);
        } else {
            slots.current = Some(order);
        }
    }

    pub(crate) fn clear(&self) {
        *self.lock() = Slots::default();
    }
}

//! Agent online/offline state, coupled to location tracking and the
//! available-orders list.

use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};
use tokio::task::JoinHandle;

use crate::{
    error::{AgentError, Result},
    location::LocationTracker,
    models::{AgentStatus, Order, OrderStatus},
    remote::api::OrderApi,
    store::OrderStore,
};

const WATCHDOG_RETRY: Duration = Duration::from_millis(100);

/// Agent availability as the server last confirmed it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Offline,
    Online,
    /// A toggle request is in flight.
    Updating,
}

/// Online/offline toggle coupled to location tracking and the order list.
pub struct AvailabilitySession {
    api: Arc<dyn OrderApi>,
    tracker: LocationTracker,
    store: OrderStore,
    state: Mutex<Availability>,
    /// Forces offline when the tracking stream dies while online.
    watchdog: Mutex<Option<JoinHandle<()>>>,
    me: Weak<AvailabilitySession>,
}

impl AvailabilitySession {
    /// Offline session; the tracker is owned and stopped with it.
    pub fn new(
        api: Arc<dyn OrderApi>,
        tracker: LocationTracker,
        store: OrderStore,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            api,
            tracker,
            store,
            state: Mutex::new(Availability::Offline),
            watchdog: Mutex::new(None),
            me: me.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Availability> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current availability.
    pub fn state(&self) -> Availability {
        *self.lock()
    }

    /// True only when settled online.
    pub fn is_online(&self) -> bool {
        self.state() == Availability::Online
    }

    /// The tracker this session drives.
    pub fn tracker(&self) -> &LocationTracker {
        &self.tracker
    }

    /// Move to `Updating` from `expected`; anything else is a no-op or a
    /// concurrent toggle.
    fn claim(&self, expected: Availability) -> Result<bool> {
        let mut st = self.lock();
        match *st {
            Availability::Updating => Err(AgentError::OperationInProgress("availability")),
            s if s == expected => {
                *st = Availability::Updating;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn settle(&self, value: Availability) {
        *self.lock() = value;
        tracing::info!(availability = ?value, "availability settled");
    }

    /// Go online: permission first, then the server, then tracking and a
    /// fetch of available orders. Any local location fault leaves the agent
    /// offline on both sides.
    pub async fn go_online(&self) -> Result<()> {
        if !self.claim(Availability::Offline)? {
            return Ok(());
        }

        if let Err(e) = self.tracker.ensure_permission().await {
            tracing::warn!(error = %e, "go online refused: location");
            self.settle(Availability::Offline);
            return Err(e);
        }

        if let Err(e) = self.api.update_agent_status(AgentStatus::Online).await {
            tracing::error!(error = %e, "go online rejected");
            self.settle(Availability::Offline);
            return Err(e);
        }

        if let Err(e) = self.tracker.start().await {
            tracing::warn!(error = %e, "tracking failed after going online; reverting");
            self.revert_remote_online().await;
            self.settle(Availability::Offline);
            return Err(e);
        }

        self.settle(Availability::Online);
        self.arm_watchdog();
        if let Err(e) = self.refresh_available().await {
            tracing::warn!(error = %e, "available orders fetch failed");
        }
        Ok(())
    }

    /// Go offline. The server's answer decides: on failure the agent stays
    /// online and keeps tracking.
    pub async fn go_offline(&self) -> Result<()> {
        if !self.claim(Availability::Online)? {
            return Ok(());
        }

        match self.api.update_agent_status(AgentStatus::Offline).await {
            Ok(()) => {
                self.disarm_watchdog();
                self.tracker.stop();
                self.store.clear_available();
                self.settle(Availability::Offline);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "go offline rejected; staying online");
                self.settle(Availability::Online);
                Err(e)
            }
        }
    }

    /// Detect a tracking subscription that died while online and force the
    /// agent offline instead of leaving it online but untracked.
    pub async fn reconcile_tracking(&self) -> Result<()> {
        if !self.is_online() || self.tracker.is_tracking() {
            return Ok(());
        }
        if !self.claim(Availability::Online)? {
            return Ok(());
        }
        tracing::warn!("tracking lost while online; forcing offline");
        self.tracker.stop();
        self.revert_remote_online().await;
        self.store.clear_available();
        self.settle(Availability::Offline);
        Err(AgentError::LocationUnavailable)
    }

    /// Wait for the tracker to report a lost stream, then reconcile.
    fn arm_watchdog(&self) {
        let mut lost = self.tracker.lost_signal();
        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            if lost.wait_for(|l| *l).await.is_err() {
                return;
            }
            loop {
                let Some(session) = me.upgrade() else {
                    return;
                };
                match session.reconcile_tracking().await {
                    // A toggle is mid-flight; look again once it settles.
                    Err(AgentError::OperationInProgress(_)) => {
                        drop(session);
                        tokio::time::sleep(WATCHDOG_RETRY).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "agent forced offline");
                        return;
                    }
                    Ok(()) => return,
                }
            }
        });
        if let Some(old) = self
            .watchdog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle)
        {
            old.abort();
        }
    }

    fn disarm_watchdog(&self) {
        if let Some(handle) = self
            .watchdog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    async fn revert_remote_online(&self) {
        if let Err(e) = self.api.update_agent_status(AgentStatus::Offline).await {
            tracing::warn!(error = %e, "could not report offline to server");
        }
    }

    /// Fetch available orders. Offline short-circuits to an empty list with
    /// no request.
    pub async fn refresh_available(&self) -> Result<Vec<Order>> {
        if !self.is_online() {
            return Ok(vec![]);
        }
        let list = self.api.list_orders(Some(OrderStatus::Pending)).await?;
        tracing::info!(count = list.orders.len(), "available orders loaded");
        self.store.replace_available(list.orders);
        Ok(self.store.available())
    }

    /// Local reset on logout; no server call.
    pub(crate) fn reset(&self) {
        self.disarm_watchdog();
        self.tracker.stop();
        self.store.clear_available();
        self.settle(Availability::Offline);
    }
}

impl Drop for AvailabilitySession {
    fn drop(&mut self) {
        self.disarm_watchdog();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Capability,
        location::{LocationProvider, tests::ScriptedProvider},
        models::OrderId,
        testing::FakeApi,
    };

    fn setup_with(
        api: FakeApi,
        provider: ScriptedProvider,
    ) -> (Arc<FakeApi>, Arc<ScriptedProvider>, Arc<AvailabilitySession>) {
        let api = Arc::new(api.with_orders([
            Order::new("1001", OrderStatus::Pending),
            Order::new("1002", OrderStatus::Pending),
            Order::new("2000", OrderStatus::Delivered),
        ]));
        let provider = Arc::new(provider);
        let dyn_provider: Arc<dyn LocationProvider> = provider.clone();
        let tracker = LocationTracker::new(dyn_provider, 10.0);
        let session = AvailabilitySession::new(api.clone(), tracker, OrderStore::new());
        (api, provider, session)
    }

    fn setup() -> (Arc<FakeApi>, Arc<ScriptedProvider>, Arc<AvailabilitySession>) {
        setup_with(FakeApi::new(), ScriptedProvider::granted())
    }

    #[tokio::test]
    async fn online_starts_tracking_and_loads_orders() {
        let (api, _p, s) = setup();
        assert_eq!(s.state(), Availability::Offline);
        s.go_online().await.unwrap();

        assert_eq!(s.state(), Availability::Online);
        assert!(s.tracker().is_tracking());
        assert_eq!(api.agent_status(), Some(AgentStatus::Online));
        let ids: Vec<_> = s.store.available().into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![OrderId::new("1001"), OrderId::new("1002")]);
    }

    #[tokio::test]
    async fn denied_permission_stays_offline_without_requests() {
        let (api, provider, s) = setup_with(
            FakeApi::new(),
            ScriptedProvider::failing(AgentError::PermissionDenied(Capability::Location)),
        );
        let err = s.go_online().await.unwrap_err();
        assert_eq!(err, AgentError::PermissionDenied(Capability::Location));
        assert_eq!(s.state(), Availability::Offline);
        assert!(!s.tracker().is_tracking());
        assert_eq!(provider.watches.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn gps_off_and_timeout_surface_distinct_errors() {
        for fault in [AgentError::LocationUnavailable, AgentError::LocationTimeout] {
            let (_api, _p, s) = setup_with(FakeApi::new(), ScriptedProvider::failing(fault.clone()));
            assert_eq!(s.go_online().await, Err(fault));
            assert_eq!(s.state(), Availability::Offline);
        }
    }

    #[tokio::test]
    async fn rejected_online_request_stays_offline() {
        let api = FakeApi::new();
        api.fail_next("update_agent_status", AgentError::Network("no route".into()));
        let (api, _p, s) = setup_with(api, ScriptedProvider::granted());
        assert!(matches!(s.go_online().await, Err(AgentError::Network(_))));
        assert_eq!(s.state(), Availability::Offline);
        assert!(!s.tracker().is_tracking());
        assert_eq!(api.count("list_orders"), 0);
    }

    #[tokio::test]
    async fn offline_stops_tracking_and_clears_orders() {
        let (api, _p, s) = setup();
        s.go_online().await.unwrap();
        s.go_offline().await.unwrap();
        assert_eq!(s.state(), Availability::Offline);
        assert!(!s.tracker().is_tracking());
        assert!(s.store.available().is_empty());
        assert_eq!(api.agent_status(), Some(AgentStatus::Offline));

        // Already offline: nothing to do.
        s.go_offline().await.unwrap();
        assert_eq!(api.count("update_agent_status"), 2);
    }

    #[tokio::test]
    async fn rejected_offline_request_rolls_back_to_online() {
        let (api, _p, s) = setup();
        s.go_online().await.unwrap();
        api.fail_next(
            "update_agent_status",
            AgentError::rejected(Some(409), Some("Finish your active delivery first".into())),
        );
        let err = s.go_offline().await.unwrap_err();
        assert_eq!(err.to_string(), "Finish your active delivery first");
        assert_eq!(s.state(), Availability::Online);
        assert!(s.tracker().is_tracking());
        assert_eq!(s.store.available().len(), 2);
    }

    #[tokio::test]
    async fn fetch_while_offline_makes_no_request() {
        let (api, _p, s) = setup();
        assert!(s.refresh_available().await.unwrap().is_empty());
        assert_eq!(api.count("list_orders"), 0);
    }

    #[tokio::test]
    async fn concurrent_toggle_is_rejected() {
        let (api, _p, s) = setup_with(FakeApi::yielding(), ScriptedProvider::granted());
        let (a, b) = tokio::join!(s.go_online(), s.go_online());
        assert!(a.is_ok());
        assert_eq!(b, Err(AgentError::OperationInProgress("availability")));
        assert_eq!(api.count("update_agent_status"), 1);
    }

    async fn wait_offline(s: &AvailabilitySession) {
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while s.state() != Availability::Offline {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("agent still online");
    }

    #[tokio::test]
    async fn closed_stream_forces_offline() {
        let (api, provider, s) = setup();
        s.go_online().await.unwrap();

        // Platform ends the subscription.
        provider.feed.lock().unwrap().take();
        wait_offline(&s).await;

        assert!(!s.tracker().is_tracking());
        assert!(s.store.available().is_empty());
        assert_eq!(api.agent_status(), Some(AgentStatus::Offline));
    }

    #[tokio::test]
    async fn stream_error_forces_offline_without_a_refresh() {
        let (api, provider, s) = setup();
        s.go_online().await.unwrap();

        provider
            .sender()
            .send(Err(AgentError::LocationUnavailable))
            .await
            .unwrap();
        wait_offline(&s).await;

        assert!(!s.tracker().is_tracking());
        assert_eq!(api.agent_status(), Some(AgentStatus::Offline));
        assert_eq!(api.count("update_agent_status"), 2);
        // Nothing left to reconcile.
        assert_eq!(s.reconcile_tracking().await, Ok(()));
    }

    #[tokio::test]
    async fn going_offline_disarms_the_watchdog() {
        let (api, provider, s) = setup();
        s.go_online().await.unwrap();
        let feed = provider.sender();
        s.go_offline().await.unwrap();

        feed.closed().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(api.count("update_agent_status"), 2);
    }
}

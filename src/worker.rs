//! Background worker running agent commands against the session services.

use std::{path::PathBuf, sync::Arc};
use tokio::sync::mpsc;

use crate::{
    auth::AuthSession,
    availability::{Availability, AvailabilitySession},
    completion::{CompletionSettings, CompletionSnapshot, CompletionStage, DeliveryCompletion},
    error::{AgentError, Remedy, Result},
    lifecycle::OrderLifecycle,
    models::{Order, OrderId, OrderStats, Profile},
    proof::FileProofCapture,
};

/// Session-scoped services, built once at start-up.
pub struct Services {
    pub auth: Arc<AuthSession>,
    pub lifecycle: OrderLifecycle,
    pub availability: Arc<AvailabilitySession>,
    pub completion: CompletionSettings,
}

/// Commands sent from the console to the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCmd {
    /// Reload a persisted session.
    RestoreSession,
    Login { phone: String, otp: String },
    Logout,
    GoOnline,
    GoOffline,
    /// Re-fetch available orders and the current order.
    RefreshOrders,
    Accept(OrderId),
    /// Move the current order one step forward.
    Advance { notes: Option<String> },
    /// Start (or resume) delivery completion for the current order.
    OpenCompletion,
    CapturePhoto(PathBuf),
    SendOtp,
    ResendOtp,
    Verify { otp: String, note: String },
    AbandonCompletion,
    LoadStats,
}

impl WorkerCmd {
    /// Name for logs; never includes codes the operator typed.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerCmd::RestoreSession => "restore",
            WorkerCmd::Login { .. } => "login",
            WorkerCmd::Logout => "logout",
            WorkerCmd::GoOnline => "online",
            WorkerCmd::GoOffline => "offline",
            WorkerCmd::RefreshOrders => "orders",
            WorkerCmd::Accept(_) => "accept",
            WorkerCmd::Advance { .. } => "advance",
            WorkerCmd::OpenCompletion => "complete",
            WorkerCmd::CapturePhoto(_) => "photo",
            WorkerCmd::SendOtp => "send-otp",
            WorkerCmd::ResendOtp => "resend-otp",
            WorkerCmd::Verify { .. } => "verify",
            WorkerCmd::AbandonCompletion => "abandon",
            WorkerCmd::LoadStats => "stats",
        }
    }

    fn needs_session(&self) -> bool {
        !matches!(
            self,
            WorkerCmd::RestoreSession | WorkerCmd::Login { .. } | WorkerCmd::Logout
        )
    }
}

/// Events emitted by the worker for the console.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerEvent {
    SignedIn(Profile),
    SignedOut,
    Availability(Availability),
    AvailableOrders(Vec<Order>),
    CurrentOrder(Option<Order>),
    Completion(CompletionSnapshot),
    Stats { stats: OrderStats, history: usize },
    /// Informational log message.
    Log(String),
    /// User-visible error with what to do about it.
    Error { message: String, remedy: Remedy },
}

struct Worker {
    services: Services,
    completion: Option<DeliveryCompletion>,
    tx: mpsc::Sender<WorkerEvent>,
}

/// Main worker loop: handle commands sequentially until the console hangs up.
pub async fn run(mut rx: mpsc::Receiver<WorkerCmd>, tx: mpsc::Sender<WorkerEvent>, services: Services) {
    tracing::info!("worker started");
    let mut worker = Worker {
        services,
        completion: None,
        tx,
    };
    // Process commands one at a time to keep state consistent.
    while let Some(cmd) = rx.recv().await {
        let name = cmd.name();
        tracing::info!(command = name, "worker command");
        if let Err(e) = worker.handle(cmd).await {
            tracing::warn!(command = name, error = %e, "command failed");
            worker.report(e).await;
        }
    }
    if let Some(c) = worker.completion.take() {
        c.abandon();
    }
    tracing::info!("worker stopped");
}

impl Worker {
    async fn emit(&self, ev: WorkerEvent) {
        let _ = self.tx.send(ev).await;
    }

    async fn report(&mut self, e: AgentError) {
        if !e.is_recoverable() {
            self.sign_out("session integrity").await;
        }
        let remedy = e.remedy();
        self.emit(WorkerEvent::Error {
            message: e.to_string(),
            remedy,
        })
        .await;
    }

    async fn publish_orders(&self) {
        let store = self.services.lifecycle.store();
        self.emit(WorkerEvent::CurrentOrder(store.current())).await;
        self.emit(WorkerEvent::AvailableOrders(store.available())).await;
    }

    async fn publish_availability(&self) {
        self.emit(WorkerEvent::Availability(self.services.availability.state()))
            .await;
    }

    /// Open a completion session unless the existing one still belongs to
    /// the current order (or is the finished one for the last order).
    fn ensure_completion(&mut self) -> Result<()> {
        let current = self.services.lifecycle.store().current();
        let reusable = match (&self.completion, &current) {
            (Some(c), Some(cur)) => *c.order_id() == cur.id,
            (Some(c), None) => c.stage() == CompletionStage::Completed,
            (None, _) => false,
        };
        if !reusable {
            if let Some(old) = self.completion.take() {
                old.abandon();
            }
            self.completion = Some(DeliveryCompletion::open(
                self.services.lifecycle.clone(),
                self.services.completion,
            )?);
        }
        Ok(())
    }

    fn active_completion(&self) -> Result<&DeliveryCompletion> {
        self.completion.as_ref().ok_or(AgentError::NoActiveOrder)
    }

    async fn sign_out(&mut self, reason: &str) {
        if let Some(c) = self.completion.take() {
            c.abandon();
        }
        self.services.availability.reset();
        self.services.lifecycle.store().clear();
        self.services.auth.force_logout(reason).await;
        self.emit(WorkerEvent::SignedOut).await;
    }

    async fn issue_otp(&mut self, resend: bool) -> Result<()> {
        self.ensure_completion()?;
        let c = self.active_completion()?;
        let res = if resend {
            c.resend_otp().await
        } else {
            c.send_otp().await
        };
        self.emit(WorkerEvent::Completion(c.snapshot())).await;
        res
    }

    async fn handle(&mut self, cmd: WorkerCmd) -> Result<()> {
        if cmd.needs_session() && !self.services.auth.is_authenticated() {
            return Err(AgentError::Unauthenticated);
        }
        match cmd {
            WorkerCmd::RestoreSession => match self.services.auth.restore().await? {
                Some(profile) => self.emit(WorkerEvent::SignedIn(profile)).await,
                None => self.emit(WorkerEvent::Log("not signed in".into())).await,
            },

            WorkerCmd::Login { phone, otp } => {
                let profile = self.services.auth.login(&phone, &otp).await?;
                self.emit(WorkerEvent::SignedIn(profile)).await;
            }

            WorkerCmd::Logout => {
                if self.services.availability.is_online()
                    && let Err(e) = self.services.availability.go_offline().await
                {
                    tracing::warn!(error = %e, "offline before logout failed");
                }
                self.sign_out("operator logout").await;
            }

            WorkerCmd::GoOnline => {
                let res = self.services.availability.go_online().await;
                self.publish_availability().await;
                res?;
                self.publish_orders().await;
            }

            WorkerCmd::GoOffline => {
                let res = self.services.availability.go_offline().await;
                self.publish_availability().await;
                res?;
            }

            WorkerCmd::RefreshOrders => {
                if let Err(e) = self.services.availability.reconcile_tracking().await {
                    self.publish_availability().await;
                    return Err(e);
                }
                self.services.lifecycle.refresh_current().await?;
                self.services.availability.refresh_available().await?;
                self.publish_orders().await;
            }

            WorkerCmd::Accept(id) => {
                let order = self.services.lifecycle.accept(&id).await?;
                self.emit(WorkerEvent::Log(format!("accepted order {}", order.id)))
                    .await;
                self.publish_orders().await;
            }

            WorkerCmd::Advance { notes } => {
                let order = self.services.lifecycle.advance(notes).await?;
                self.emit(WorkerEvent::Log(format!(
                    "order {} is now {}",
                    order.id,
                    order.status.label()
                )))
                .await;
                self.publish_orders().await;
            }

            WorkerCmd::OpenCompletion => {
                self.ensure_completion()?;
                let c = self.active_completion()?;
                self.emit(WorkerEvent::Completion(c.snapshot())).await;
            }

            WorkerCmd::CapturePhoto(path) => {
                self.ensure_completion()?;
                let c = self.active_completion()?;
                let res = c.capture_photo(&FileProofCapture::new(path)).await;
                self.emit(WorkerEvent::Completion(c.snapshot())).await;
                if !res? {
                    self.emit(WorkerEvent::Log("no photo selected".into())).await;
                }
            }

            WorkerCmd::SendOtp => self.issue_otp(false).await?,

            WorkerCmd::ResendOtp => self.issue_otp(true).await?,

            WorkerCmd::Verify { otp, note } => {
                self.ensure_completion()?;
                let c = self.active_completion()?;
                let res = c.verify(&otp, &note).await;
                self.emit(WorkerEvent::Completion(c.snapshot())).await;
                let order = res?;
                self.emit(WorkerEvent::Log(format!("order {} delivered", order.id)))
                    .await;
                self.publish_orders().await;
            }

            WorkerCmd::AbandonCompletion => {
                if let Some(c) = self.completion.take() {
                    c.abandon();
                    self.emit(WorkerEvent::Log("delivery completion closed".into()))
                        .await;
                }
            }

            WorkerCmd::LoadStats => {
                let stats = self.services.lifecycle.api().agent_stats().await?;
                let history = self.services.lifecycle.store().history().len();
                self.emit(WorkerEvent::Stats { stats, history }).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        location::{LocationProvider, LocationTracker, tests::ScriptedProvider},
        models::OrderStatus,
        remote::{api::Credentials, session_store::MemorySessionStore},
        store::OrderStore,
        testing::FakeApi,
    };
    use std::time::Duration;

    fn spawn_worker(
        api: Arc<FakeApi>,
    ) -> (mpsc::Sender<WorkerCmd>, mpsc::Receiver<WorkerEvent>) {
        let auth = Arc::new(AuthSession::new(
            api.clone(),
            Arc::new(MemorySessionStore::default()),
            Credentials::default(),
        ));
        let store = OrderStore::new();
        let provider: Arc<dyn LocationProvider> = Arc::new(ScriptedProvider::granted());
        let services = Services {
            auth,
            lifecycle: OrderLifecycle::new(api.clone(), store.clone()),
            availability: AvailabilitySession::new(
                api,
                LocationTracker::new(provider, 0.0),
                store,
            ),
            completion: CompletionSettings {
                cooldown_units: 30,
                cooldown_unit: Duration::from_secs(1),
            },
        };
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (ev_tx, ev_rx) = mpsc::channel(64);
        tokio::spawn(run(cmd_rx, ev_tx, services));
        (cmd_tx, ev_rx)
    }

    /// Send one command and collect events until the worker goes quiet.
    async fn exchange(
        tx: &mpsc::Sender<WorkerCmd>,
        rx: &mut mpsc::Receiver<WorkerEvent>,
        cmd: WorkerCmd,
    ) -> Vec<WorkerEvent> {
        tx.send(cmd).await.unwrap();
        let mut out = vec![];
        while let Ok(Some(ev)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn commands_before_login_are_refused() {
        let api = Arc::new(FakeApi::new());
        let (tx, mut rx) = spawn_worker(api.clone());
        let events = exchange(&tx, &mut rx, WorkerCmd::GoOnline).await;
        assert_eq!(
            events,
            vec![WorkerEvent::Error {
                message: AgentError::Unauthenticated.to_string(),
                remedy: Remedy::SignIn,
            }]
        );
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn full_delivery_through_the_worker() {
        let api = Arc::new(FakeApi::new().with_orders([Order::new("1001", OrderStatus::Pending)]));
        api.set_otp("654321");
        let (tx, mut rx) = spawn_worker(api.clone());

        let events = exchange(
            &tx,
            &mut rx,
            WorkerCmd::Login {
                phone: "555".into(),
                otp: "1234".into(),
            },
        )
        .await;
        assert!(matches!(events[0], WorkerEvent::SignedIn(_)));

        let events = exchange(&tx, &mut rx, WorkerCmd::GoOnline).await;
        assert!(events.contains(&WorkerEvent::Availability(Availability::Online)));

        exchange(&tx, &mut rx, WorkerCmd::Accept("1001".into())).await;
        for _ in 0..4 {
            exchange(&tx, &mut rx, WorkerCmd::Advance { notes: None }).await;
        }
        assert_eq!(
            api.server_order("1001").unwrap().status,
            OrderStatus::HeadingToCustomer
        );

        // The last hop needs proof and an OTP.
        let events = exchange(&tx, &mut rx, WorkerCmd::Advance { notes: None }).await;
        assert!(matches!(
            &events[0],
            WorkerEvent::Error { message, .. } if *message == AgentError::DeliveryProofRequired.to_string()
        ));

        let photo = std::env::temp_dir().join(format!("proof-{}.jpg", uuid::Uuid::new_v4()));
        std::fs::write(&photo, b"jpeg bytes").unwrap();
        exchange(&tx, &mut rx, WorkerCmd::CapturePhoto(photo.clone())).await;
        exchange(&tx, &mut rx, WorkerCmd::SendOtp).await;
        let events = exchange(
            &tx,
            &mut rx,
            WorkerCmd::Verify {
                otp: "654321".into(),
                note: "left with guard".into(),
            },
        )
        .await;
        std::fs::remove_file(&photo).unwrap();

        assert!(events.contains(&WorkerEvent::CurrentOrder(None)));
        assert_eq!(api.server_order("1001").unwrap().status, OrderStatus::Delivered);
        assert_eq!(api.count("verify_delivery_otp"), 1);

        // Same command again: no second request.
        exchange(
            &tx,
            &mut rx,
            WorkerCmd::Verify {
                otp: "654321".into(),
                note: String::new(),
            },
        )
        .await;
        assert_eq!(api.count("verify_delivery_otp"), 1);
    }

    #[tokio::test]
    async fn logout_goes_offline_first() {
        let api = Arc::new(FakeApi::new());
        let (tx, mut rx) = spawn_worker(api.clone());
        exchange(
            &tx,
            &mut rx,
            WorkerCmd::Login {
                phone: "555".into(),
                otp: "1234".into(),
            },
        )
        .await;
        exchange(&tx, &mut rx, WorkerCmd::GoOnline).await;
        let events = exchange(&tx, &mut rx, WorkerCmd::Logout).await;
        assert_eq!(events.last(), Some(&WorkerEvent::SignedOut));
        assert_eq!(api.agent_status(), Some(crate::models::AgentStatus::Offline));
    }
}

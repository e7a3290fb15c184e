//! OTP-gated delivery completion: proof photo, OTP issue/resend, verification.

use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    cooldown::ResendCooldown,
    error::{AgentError, Result},
    lifecycle::OrderLifecycle,
    models::{Order, OrderId, OrderStatus},
    proof::{ProofCapture, ProofPhoto},
    remote::orders::VerificationRequest,
};

/// Digits in a delivery OTP.
pub const OTP_LEN: usize = 6;

/// Where a completion session stands. A failed step keeps its stage and
/// records the reason in `CompletionSnapshot::failure`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionStage {
    CapturingProof,
    AwaitingOtpSend,
    OtpPending,
    Verifying,
    Completed,
}

/// Cooldown parameters.
#[derive(Clone, Copy, Debug)]
pub struct CompletionSettings {
    pub cooldown_units: u32,
    pub cooldown_unit: Duration,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            cooldown_units: 30,
            cooldown_unit: Duration::from_secs(1),
        }
    }
}

/// Read-only view for rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionSnapshot {
    pub order_id: OrderId,
    pub stage: CompletionStage,
    pub failure: Option<String>,
    pub has_proof: bool,
    pub otp_input: String,
    pub note: String,
    pub cooldown: u32,
}

impl CompletionSnapshot {
    /// Resend is open once an OTP is pending and the countdown is done.
    pub fn can_resend(&self) -> bool {
        self.stage == CompletionStage::OtpPending && self.cooldown == 0
    }
}

/// Exactly six ASCII digits.
pub fn is_valid_otp(otp: &str) -> bool {
    otp.len() == OTP_LEN && otp.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug)]
struct SessionState {
    stage: CompletionStage,
    photo: Option<ProofPhoto>,
    note: String,
    otp: String,
    failure: Option<String>,
    in_flight: Option<&'static str>,
    delivered: Option<Order>,
    closed: bool,
}

/// Clears the in-flight marker when the operation ends, however it ends.
/// A verification cut short falls back to waiting for the OTP.
struct InFlight<'a> {
    state: &'a Mutex<SessionState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.in_flight = None;
        if st.stage == CompletionStage::Verifying {
            st.stage = CompletionStage::OtpPending;
        }
    }
}

/// One delivery-completion session for the current order.
pub struct DeliveryCompletion {
    order_id: OrderId,
    lifecycle: OrderLifecycle,
    state: Mutex<SessionState>,
    cooldown: ResendCooldown,
    cooldown_units: u32,
}

impl DeliveryCompletion {
    /// Open a session; the current order must be heading to the customer.
    pub fn open(lifecycle: OrderLifecycle, settings: CompletionSettings) -> Result<Self> {
        let cur = lifecycle
            .store()
            .current()
            .ok_or(AgentError::NoActiveOrder)?;
        if cur.status != OrderStatus::HeadingToCustomer {
            return Err(AgentError::InvalidTransition {
                from: cur.status,
                to: OrderStatus::Delivered,
            });
        }
        tracing::info!(order_id = %cur.id, "delivery completion opened");
        Ok(Self {
            order_id: cur.id,
            lifecycle,
            state: Mutex::new(SessionState {
                stage: CompletionStage::CapturingProof,
                photo: None,
                note: String::new(),
                otp: String::new(),
                failure: None,
                in_flight: None,
                delivered: None,
                closed: false,
            }),
            cooldown: ResendCooldown::new(settings.cooldown_unit),
            cooldown_units: settings.cooldown_units,
        })
    }

    /// Order this session completes.
    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the session for one remote operation.
    fn begin(&self, op: &'static str) -> Result<InFlight<'_>> {
        let mut st = self.lock();
        if st.closed {
            return Err(AgentError::SessionClosed);
        }
        if let Some(running) = st.in_flight {
            tracing::warn!(order_id = %self.order_id, op, running, "operation rejected: in progress");
            return Err(AgentError::OperationInProgress(running));
        }
        st.in_flight = Some(op);
        Ok(InFlight { state: &self.state })
    }

    /// Copy of the session state for rendering.
    pub fn snapshot(&self) -> CompletionSnapshot {
        let st = self.lock();
        CompletionSnapshot {
            order_id: self.order_id.clone(),
            stage: st.stage,
            failure: st.failure.clone(),
            has_proof: st.photo.is_some(),
            otp_input: st.otp.clone(),
            note: st.note.clone(),
            cooldown: self.cooldown.remaining(),
        }
    }

    /// Current stage.
    pub fn stage(&self) -> CompletionStage {
        self.lock().stage
    }

    /// Units left before a resend is allowed.
    pub fn cooldown_remaining(&self) -> u32 {
        self.cooldown.remaining()
    }

    /// True once an OTP went out and the cooldown has run down.
    pub fn can_resend(&self) -> bool {
        self.snapshot().can_resend()
    }

    /// Record digits as the operator types them.
    pub fn set_otp_input(&self, digits: &str) {
        self.lock().otp = digits.trim().to_string();
    }

    /// Free-text note sent with the verification.
    pub fn set_note(&self, note: &str) {
        self.lock().note = note.to_string();
    }

    /// Take (or retake) the proof photo. Returns false if the picker was dismissed.
    pub async fn capture_photo(&self, capture: &dyn ProofCapture) -> Result<bool> {
        let _guard = self.begin("photo capture")?;
        if self.lock().stage == CompletionStage::Completed {
            return Err(AgentError::SessionClosed);
        }
        let result = capture.capture().await;

        let mut st = self.lock();
        match result {
            Ok(Some(photo)) => {
                tracing::info!(order_id = %self.order_id, fingerprint = %photo.fingerprint(), "proof photo captured");
                st.photo = Some(photo);
                if st.stage == CompletionStage::CapturingProof {
                    st.stage = CompletionStage::AwaitingOtpSend;
                }
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e @ AgentError::PermissionDenied(_)) => {
                tracing::warn!(order_id = %self.order_id, error = %e, "proof capture denied");
                st.photo = None;
                if st.stage == CompletionStage::AwaitingOtpSend {
                    st.stage = CompletionStage::CapturingProof;
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the backend to send the customer an OTP.
    pub async fn send_otp(&self) -> Result<()> {
        self.issue_otp(false).await
    }

    /// Send a fresh OTP once the cooldown has run out; clears typed digits.
    pub async fn resend_otp(&self) -> Result<()> {
        let left = self.cooldown.remaining();
        if left > 0 {
            return Err(AgentError::CooldownActive(left));
        }
        self.issue_otp(true).await
    }

    async fn issue_otp(&self, resend: bool) -> Result<()> {
        let _guard = self.begin("OTP")?;
        let clear_input = {
            let st = self.lock();
            if st.stage == CompletionStage::Completed {
                return Err(AgentError::SessionClosed);
            }
            if st.photo.is_none() {
                return Err(AgentError::MissingProof);
            }
            let already_sent = st.stage == CompletionStage::OtpPending;
            if already_sent && self.cooldown.is_active() {
                return Err(AgentError::CooldownActive(self.cooldown.remaining()));
            }
            resend || already_sent
        };

        let result = self
            .lifecycle
            .api()
            .send_delivery_otp(&self.order_id)
            .await;

        let mut st = self.lock();
        if st.closed {
            tracing::info!(order_id = %self.order_id, "OTP reply arrived after abandon");
            return result.and(Err(AgentError::SessionClosed));
        }
        match result {
            Ok(()) => {
                st.stage = CompletionStage::OtpPending;
                st.failure = None;
                if clear_input {
                    st.otp.clear();
                }
                // Started under the lock so a concurrent abandon cancels it.
                self.cooldown.start(self.cooldown_units);
                drop(st);
                tracing::info!(order_id = %self.order_id, resend = clear_input, "delivery OTP sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(order_id = %self.order_id, error = %e, "sending OTP failed");
                st.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Verify the customer's OTP with the proof photo and close the order.
    /// Calling again after success returns the delivered snapshot without a
    /// second request.
    pub async fn verify(&self, otp: &str, note: &str) -> Result<Order> {
        if let Some(done) = self.lock().delivered.clone() {
            return Ok(done);
        }
        let _guard = self.begin("verification")?;
        let req = {
            let mut st = self.lock();
            st.otp = otp.trim().to_string();
            st.note = note.to_string();
            if !is_valid_otp(&st.otp) {
                return Err(AgentError::InvalidOtpFormat);
            }
            let proof = st.photo.clone().ok_or(AgentError::MissingProof)?;
            if st.stage != CompletionStage::OtpPending {
                return Err(AgentError::OtpNotRequested);
            }
            st.stage = CompletionStage::Verifying;
            VerificationRequest {
                otp: st.otp.clone(),
                delivery_note: st.note.clone(),
                payment_received: true,
                proof,
            }
        };

        let result = self
            .lifecycle
            .api()
            .verify_delivery_otp(&self.order_id, req)
            .await
            .and_then(|snapshot| {
                if snapshot.status == OrderStatus::Delivered {
                    Ok(snapshot)
                } else {
                    Err(AgentError::rejected(
                        None,
                        Some(format!(
                            "server left the order {} after verification",
                            snapshot.status.label()
                        )),
                    ))
                }
            });

        if self.lock().closed {
            // The server's outcome still stands for the order itself.
            if let Ok(snapshot) = &result {
                self.lifecycle.complete_delivery(snapshot.clone());
            }
            tracing::info!(order_id = %self.order_id, "verification reply arrived after abandon");
            return result;
        }

        match result {
            Ok(snapshot) => {
                self.lifecycle.complete_delivery(snapshot.clone());
                {
                    let mut st = self.lock();
                    st.stage = CompletionStage::Completed;
                    st.failure = None;
                    st.otp.clear();
                    st.delivered = Some(snapshot.clone());
                }
                self.cooldown.cancel();
                Ok(snapshot)
            }
            Err(e) => {
                let e = match e {
                    AgentError::ServerRejection { message, .. } => {
                        AgentError::VerificationFailed(message)
                    }
                    other => other,
                };
                tracing::warn!(order_id = %self.order_id, error = %e, "OTP verification failed");
                let mut st = self.lock();
                // Typed digits stay so the operator can correct them.
                st.stage = CompletionStage::OtpPending;
                st.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Leave the flow; stops the cooldown and refuses further operations.
    pub fn abandon(&self) {
        self.lock().closed = true;
        self.cooldown.cancel();
        tracing::info!(order_id = %self.order_id, "delivery completion abandoned");
    }
}

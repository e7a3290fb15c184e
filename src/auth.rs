//! Signed-in state: login exchange, restore on start, forced logout.

use std::sync::{Arc, Mutex};

use crate::{
    error::{AgentError, Result},
    models::Profile,
    remote::{
        api::{Credentials, OrderApi},
        session_store::{AUTH_TOKEN, SessionStore, USER_DATA},
    },
};

/// Logged-in agent session: token, profile, and their persisted copy.
pub struct AuthSession {
    api: Arc<dyn OrderApi>,
    store: Arc<dyn SessionStore>,
    credentials: Credentials,
    profile: Mutex<Option<Profile>>,
}

impl AuthSession {
    pub fn new(
        api: Arc<dyn OrderApi>,
        store: Arc<dyn SessionStore>,
        credentials: Credentials,
    ) -> Self {
        Self {
            api,
            store,
            credentials,
            profile: Mutex::new(None),
        }
    }

    /// True while a bearer token is held.
    pub fn is_authenticated(&self) -> bool {
        self.credentials.token().is_some()
    }

    /// Profile from the last login or restore.
    pub fn profile(&self) -> Option<Profile> {
        self.profile
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_profile(&self, profile: Option<Profile>) {
        *self.profile.lock().unwrap_or_else(|e| e.into_inner()) = profile;
    }

    /// Exchange phone + login OTP for a token and persist the session.
    pub async fn login(&self, phone: &str, otp: &str) -> Result<Profile> {
        let phone = phone.trim();
        let otp = otp.trim();
        if otp.is_empty() || !otp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AgentError::InvalidOtpFormat);
        }

        let resp = self.api.login(phone, otp).await?;
        if resp.token.trim().is_empty() {
            return Err(AgentError::rejected(
                None,
                Some("login response did not include a token".into()),
            ));
        }
        let profile = Profile {
            user: resp.user,
            delivery_agent: resp.delivery_agent,
        };
        let user_data =
            serde_json::to_string(&profile).map_err(|e| AgentError::Storage(e.to_string()))?;

        self.store.set(AUTH_TOKEN, &resp.token).await?;
        self.store.set(USER_DATA, &user_data).await?;
        self.credentials.set(resp.token);
        self.set_profile(Some(profile.clone()));
        tracing::info!(user = %profile.user.id, "signed in");
        Ok(profile)
    }

    /// Reload a persisted session. A token that is present but unusable
    /// forces a full logout.
    pub async fn restore(&self) -> Result<Option<Profile>> {
        match self.load_persisted().await {
            Ok(Some((token, profile))) => {
                self.credentials.set(token);
                self.set_profile(Some(profile.clone()));
                tracing::info!(user = %profile.user.id, "session restored");
                Ok(Some(profile))
            }
            Ok(None) => Ok(None),
            Err(AgentError::SessionCorrupted(reason)) => {
                tracing::error!(%reason, "stored session corrupted");
                self.force_logout("stored session corrupted").await;
                Err(AgentError::SessionCorrupted(reason))
            }
            Err(e) => Err(e),
        }
    }

    async fn load_persisted(&self) -> Result<Option<(String, Profile)>> {
        let Some(token) = self.store.get(AUTH_TOKEN).await? else {
            return Ok(None);
        };
        if token.trim().is_empty() {
            return Err(AgentError::SessionCorrupted("empty token".into()));
        }
        let raw = self
            .store
            .get(USER_DATA)
            .await?
            .ok_or_else(|| AgentError::SessionCorrupted("profile missing".into()))?;
        let profile = serde_json::from_str::<Profile>(&raw)
            .map_err(|e| AgentError::SessionCorrupted(format!("profile: {e}")))?;
        Ok(Some((token, profile)))
    }

    /// Drop the token and cached profile everywhere. Idempotent.
    pub async fn force_logout(&self, reason: &str) {
        self.credentials.clear();
        self.set_profile(None);
        for key in [AUTH_TOKEN, USER_DATA] {
            if let Err(e) = self.store.remove(key).await {
                tracing::warn!(key, error = %e, "could not clear session key");
            }
        }
        tracing::info!(reason, "signed out");
    }
}

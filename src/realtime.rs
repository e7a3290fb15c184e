//! Server push channel: frame decoding and dispatch into the session.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{
    auth::AuthSession,
    availability::AvailabilitySession,
    error::{AgentError, Result},
    lifecycle::OrderLifecycle,
    models::{AgentStatus, Order},
    remote::Envelope,
};

/// Topics the agent listens on after every connect.
pub const TOPICS: [&str; 2] = ["orders", "agent"];

/// Agent account states that end the session.
const BLOCKING_STATES: [&str; 3] = ["inactive", "blocked", "suspended"];

/// Server push decoded from one text frame.
#[derive(Clone, Debug, PartialEq)]
pub enum RealtimeEvent {
    SystemMessage(String),
    AgentStatusUpdated(AgentStatus),
    Notification { title: String, body: String },
    ForceLogout { reason: Option<String> },
    AgentUpdated {
        status: Option<String>,
        is_active: Option<bool>,
    },
    OrderUpdated(Order),
    /// Known frame shape, unknown event name.
    Other(String),
}

fn text(data: &Value, keys: &[&str]) -> Option<String> {
    if let Value::String(s) = data {
        return Some(s.clone());
    }
    keys.iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

impl RealtimeEvent {
    /// Decode one `{event, data}` frame.
    pub fn decode(frame: &str) -> Result<Self> {
        let mut root: Value = serde_json::from_str(frame)?;
        let name = root
            .get("event")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentError::rejected(None, Some("frame without event name".into())))?;
        let data = root.get_mut("data").map(Value::take).unwrap_or(Value::Null);

        let event = match name.as_str() {
            "system:message" => {
                RealtimeEvent::SystemMessage(text(&data, &["message"]).unwrap_or_default())
            }
            "agent:status-updated" => {
                let status = data.get("status").cloned().unwrap_or(data);
                RealtimeEvent::AgentStatusUpdated(serde_json::from_value(status)?)
            }
            "notification" => RealtimeEvent::Notification {
                title: text(&data, &["title"]).unwrap_or_default(),
                body: data
                    .get("body")
                    .or_else(|| data.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "user:force-logout" => RealtimeEvent::ForceLogout {
                reason: text(&data, &["reason", "message"]),
            },
            "agent:updated" => {
                // Either the agent record itself or wrapped as `{agent: ...}`.
                let agent = data.get("agent").unwrap_or(&data);
                RealtimeEvent::AgentUpdated {
                    status: agent
                        .get("accountStatus")
                        .or_else(|| agent.get("status"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    is_active: agent.get("isActive").and_then(Value::as_bool),
                }
            }
            "order:updated" => RealtimeEvent::OrderUpdated(
                serde_json::from_value::<Envelope<Order>>(data)?.into_inner(),
            ),
            _ => RealtimeEvent::Other(name),
        };
        Ok(event)
    }

    /// Reason to end the session, if this event demands it.
    pub fn terminates_session(&self) -> Option<String> {
        match self {
            RealtimeEvent::ForceLogout { reason } => Some(
                reason
                    .clone()
                    .unwrap_or_else(|| "signed out by server".into()),
            ),
            RealtimeEvent::AgentUpdated { status, is_active } => {
                let blocked = status
                    .as_deref()
                    .is_some_and(|s| BLOCKING_STATES.contains(&s.to_ascii_lowercase().as_str()));
                if blocked || *is_active == Some(false) {
                    Some(format!(
                        "agent account {}",
                        status.as_deref().unwrap_or("inactive")
                    ))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// What the transport reports.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelSignal {
    Connected,
    Frame(String),
    Disconnected,
}

/// Socket side of the channel. Authenticated with the bearer token at
/// connect time by the transport.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<()>;
}

/// Operator-facing outcome of a handled frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    Message(String),
    AgentStatus(AgentStatus),
    OrderUpdated(Order),
    LoggedOut(String),
}

/// Applies realtime signals to the auth and order state.
pub struct RealtimeDispatcher {
    channel: Arc<dyn RealtimeChannel>,
    auth: Arc<AuthSession>,
    lifecycle: OrderLifecycle,
    availability: Arc<AvailabilitySession>,
}

impl RealtimeDispatcher {
    pub fn new(
        channel: Arc<dyn RealtimeChannel>,
        auth: Arc<AuthSession>,
        lifecycle: OrderLifecycle,
        availability: Arc<AvailabilitySession>,
    ) -> Self {
        Self {
            channel,
            auth,
            lifecycle,
            availability,
        }
    }

    /// Handle one channel signal; returns a notice worth showing, if any.
    pub async fn handle(&self, signal: ChannelSignal) -> Result<Option<Notice>> {
        match signal {
            ChannelSignal::Connected => {
                for topic in TOPICS {
                    self.channel.subscribe(topic).await?;
                }
                tracing::info!(topics = ?TOPICS, "realtime subscribed");
                Ok(None)
            }
            ChannelSignal::Disconnected => {
                tracing::warn!("realtime disconnected");
                Ok(None)
            }
            ChannelSignal::Frame(raw) => match RealtimeEvent::decode(&raw) {
                Ok(event) => Ok(self.dispatch(event).await),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed realtime frame");
                    Ok(None)
                }
            },
        }
    }

    async fn dispatch(&self, event: RealtimeEvent) -> Option<Notice> {
        if let Some(reason) = event.terminates_session() {
            self.availability.reset();
            self.lifecycle.store().clear();
            self.auth.force_logout(&reason).await;
            return Some(Notice::LoggedOut(reason));
        }
        match event {
            RealtimeEvent::SystemMessage(m) => Some(Notice::Message(m)),
            RealtimeEvent::Notification { title, body } if body.is_empty() => {
                Some(Notice::Message(title))
            }
            RealtimeEvent::Notification { title, body } => {
                Some(Notice::Message(format!("{title}: {body}")))
            }
            RealtimeEvent::AgentStatusUpdated(s) => Some(Notice::AgentStatus(s)),
            RealtimeEvent::OrderUpdated(order) => self
                .lifecycle
                .apply_remote_snapshot(order.clone())
                .then_some(Notice::OrderUpdated(order)),
            RealtimeEvent::Other(name) => {
                tracing::debug!(event = %name, "ignoring realtime event");
                None
            }
            RealtimeEvent::ForceLogout { .. } | RealtimeEvent::AgentUpdated { .. } => None,
        }
    }

    /// Drain transport signals until the channel closes.
    pub async fn run(
        &self,
        mut signals: mpsc::Receiver<ChannelSignal>,
        notices: mpsc::Sender<Notice>,
    ) {
        while let Some(signal) = signals.recv().await {
            match self.handle(signal).await {
                Ok(Some(notice)) => {
                    if notices.send(notice).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "realtime subscribe failed"),
            }
        }
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
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        topics: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RealtimeChannel for RecordingChannel {
        async fn subscribe(&self, topic: &str) -> Result<()> {
            self.topics.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    struct Harness {
        channel: Arc<RecordingChannel>,
        auth: Arc<AuthSession>,
        lifecycle: OrderLifecycle,
        dispatcher: RealtimeDispatcher,
    }

    async fn harness() -> Harness {
        let api = Arc::new(FakeApi::new().with_orders([Order::new("7", OrderStatus::Pending)]));
        let auth = Arc::new(AuthSession::new(
            api.clone(),
            Arc::new(MemorySessionStore::default()),
            Credentials::default(),
        ));
        auth.login("555", "1234").await.unwrap();

        let store = OrderStore::new();
        store.replace_available(vec![Order::new("7", OrderStatus::Pending)]);
        let lifecycle = OrderLifecycle::new(api.clone(), store.clone());
        lifecycle.accept(&"7".into()).await.unwrap();

        let provider: Arc<dyn LocationProvider> = Arc::new(ScriptedProvider::granted());
        let availability = AvailabilitySession::new(
            api,
            LocationTracker::new(provider, 0.0),
            store,
        );
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = RealtimeDispatcher::new(
            channel.clone(),
            auth.clone(),
            lifecycle.clone(),
            availability,
        );
        Harness {
            channel,
            auth,
            lifecycle,
            dispatcher,
        }
    }

    #[test]
    fn decodes_known_frames() {
        assert_eq!(
            RealtimeEvent::decode(r#"{"event":"system:message","data":{"message":"hi"}}"#).unwrap(),
            RealtimeEvent::SystemMessage("hi".into())
        );
        assert_eq!(
            RealtimeEvent::decode(r#"{"event":"agent:status-updated","data":{"status":"busy"}}"#)
                .unwrap(),
            RealtimeEvent::AgentStatusUpdated(AgentStatus::Busy)
        );
        let ev = RealtimeEvent::decode(
            r#"{"event":"order:updated","data":{"order":{"_id":42,"status":"cancelled"}}}"#,
        )
        .unwrap();
        let RealtimeEvent::OrderUpdated(order) = ev else {
            panic!("expected order update");
        };
        assert_eq!(order.id.as_str(), "42");
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[test]
    fn blocked_or_inactive_agent_terminates() {
        let blocked =
            RealtimeEvent::decode(r#"{"event":"agent:updated","data":{"agent":{"status":"Blocked"}}}"#)
                .unwrap();
        assert!(blocked.terminates_session().is_some());

        let inactive =
            RealtimeEvent::decode(r#"{"event":"agent:updated","data":{"isActive":false}}"#).unwrap();
        assert!(inactive.terminates_session().is_some());

        let fine =
            RealtimeEvent::decode(r#"{"event":"agent:updated","data":{"status":"online","isActive":true}}"#)
                .unwrap();
        assert_eq!(fine.terminates_session(), None);

        let forced = RealtimeEvent::decode(r#"{"event":"user:force-logout","data":{}}"#).unwrap();
        assert_eq!(
            forced.terminates_session().as_deref(),
            Some("signed out by server")
        );
    }

    #[test]
    fn rejects_frames_without_event() {
        assert!(RealtimeEvent::decode(r#"{"data":{}}"#).is_err());
        assert!(RealtimeEvent::decode("not json").is_err());
    }

    #[tokio::test]
    async fn resubscribes_on_every_connect() {
        let h = harness().await;
        h.dispatcher.handle(ChannelSignal::Connected).await.unwrap();
        h.dispatcher.handle(ChannelSignal::Disconnected).await.unwrap();
        h.dispatcher.handle(ChannelSignal::Connected).await.unwrap();
        assert_eq!(
            *h.channel.topics.lock().unwrap(),
            vec!["orders", "agent", "orders", "agent"]
        );
    }

    #[tokio::test]
    async fn force_logout_clears_the_session() {
        let h = harness().await;
        let notice = h
            .dispatcher
            .handle(ChannelSignal::Frame(
                r#"{"event":"user:force-logout","data":{"reason":"account review"}}"#.into(),
            ))
            .await
            .unwrap();
        assert_eq!(notice, Some(Notice::LoggedOut("account review".into())));
        assert!(!h.auth.is_authenticated());
        assert!(h.lifecycle.store().current().is_none());
    }

    #[tokio::test]
    async fn cancellation_snapshot_retires_current_order() {
        let h = harness().await;
        let notice = h
            .dispatcher
            .handle(ChannelSignal::Frame(
                r#"{"event":"order:updated","data":{"id":"7","status":"canceled"}}"#.into(),
            ))
            .await
            .unwrap();
        assert!(matches!(notice, Some(Notice::OrderUpdated(_))));
        assert!(h.lifecycle.store().current().is_none());
        assert_eq!(h.lifecycle.store().history()[0].status, OrderStatus::Canceled);
        assert!(h.auth.is_authenticated());
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let h = harness().await;
        assert_eq!(
            h.dispatcher
                .handle(ChannelSignal::Frame("{oops".into()))
                .await
                .unwrap(),
            None
        );
        assert!(h.auth.is_authenticated());
    }
}

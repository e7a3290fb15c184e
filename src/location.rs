//! Device location: permission, one-shot fixes, and continuous tracking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    error::{AgentError, Capability, Result},
    models::GeoPoint,
};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// One position fix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub point: GeoPoint,
    /// Horizontal accuracy in metres, when the platform reports it.
    pub accuracy: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl Position {
    /// Fix at the given coordinate, stamped now.
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            point: GeoPoint {
                latitude,
                longitude,
            },
            accuracy: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Great-circle distance in metres.
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lng = (b.longitude - a.longitude).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    EARTH_RADIUS_M * 2.0 * haversine.sqrt().asin()
}

/// Platform location service.
///
/// Failures map to `PermissionDenied(Location)`, `LocationUnavailable`
/// (GPS off) or `LocationTimeout`.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Ask for (or confirm) foreground location permission.
    async fn request_permission(&self) -> Result<()>;

    async fn current_position(&self) -> Result<Position>;

    /// Start a platform subscription. Dropping the receiver releases it.
    async fn watch(&self) -> Result<mpsc::Receiver<Result<Position>>>;
}

/// Continuous tracking with an explicit stop handle.
pub struct LocationTracker {
    provider: std::sync::Arc<dyn LocationProvider>,
    min_distance_m: f64,
    latest: watch::Sender<Option<Position>>,
    /// Flips to true when the platform stream ends on its own.
    lost: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocationTracker {
    pub fn new(provider: std::sync::Arc<dyn LocationProvider>, min_distance_m: f64) -> Self {
        let (latest, _rx) = watch::channel(None);
        let (lost, _rx) = watch::channel(false);
        Self {
            provider,
            min_distance_m,
            latest,
            lost,
            task: Mutex::new(None),
        }
    }

    /// Permission check without starting a subscription.
    pub async fn ensure_permission(&self) -> Result<()> {
        self.provider.request_permission().await
    }

    /// Start forwarding updates. No-op if already tracking.
    pub async fn start(&self) -> Result<()> {
        if self.is_tracking() {
            return Ok(());
        }
        self.provider.request_permission().await?;
        let mut updates = self.provider.watch().await?;
        self.lost.send_replace(false);

        let latest = self.latest.clone();
        let lost = self.lost.clone();
        let min_distance_m = self.min_distance_m;
        let handle = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                match update {
                    Ok(pos) => {
                        // Each fix replaces the previous one; small moves are dropped.
                        latest.send_if_modified(|slot| {
                            let moved = slot.as_ref().is_none_or(|prev| {
                                haversine_m(&prev.point, &pos.point) >= min_distance_m
                            });
                            if moved {
                                *slot = Some(pos);
                            }
                            moved
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "location stream failed");
                        break;
                    }
                }
            }
            tracing::info!("location stream ended");
            lost.send_replace(true);
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        tracing::info!("location tracking started");
        Ok(())
    }

    /// Stop tracking and release the platform subscription. Idempotent.
    pub fn stop(&self) {
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("location tracking stopped");
        }
    }

    /// True while the forwarder is alive and its stream has not ended.
    pub fn is_tracking(&self) -> bool {
        !*self.lost.borrow()
            && self
                .task
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
                .is_some_and(|h| !h.is_finished())
    }

    /// Receiver that turns true when the platform ends the stream (error or
    /// close). An explicit `stop` does not trigger it.
    pub fn lost_signal(&self) -> watch::Receiver<bool> {
        self.lost.subscribe()
    }

    /// Most recent accepted fix.
    pub fn latest(&self) -> Option<Position> {
        *self.latest.borrow()
    }

    /// Receiver that always holds the most recent position.
    pub fn subscribe(&self) -> watch::Receiver<Option<Position>> {
        self.latest.subscribe()
    }
}

impl Drop for LocationTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Serves a fixed coordinate; stands in for GPS on the console.
#[derive(Clone, Debug)]
pub struct StaticLocationProvider {
    position: GeoPoint,
    permission_granted: bool,
}

impl StaticLocationProvider {
    pub fn new(position: GeoPoint, permission_granted: bool) -> Self {
        Self {
            position,
            permission_granted,
        }
    }
}

#[async_trait]
impl LocationProvider for StaticLocationProvider {
    async fn request_permission(&self) -> Result<()> {
        if self.permission_granted {
            Ok(())
        } else {
            Err(AgentError::PermissionDenied(Capability::Location))
        }
    }

    async fn current_position(&self) -> Result<Position> {
        self.request_permission().await?;
        Ok(Position::at(self.position.latitude, self.position.longitude))
    }

    async fn watch(&self) -> Result<mpsc::Receiver<Result<Position>>> {
        self.request_permission().await?;
        let (tx, rx) = mpsc::channel(1);
        let pos = Position::at(self.position.latitude, self.position.longitude);
        tokio::spawn(async move {
            if tx.send(Ok(pos)).await.is_ok() {
                // Hold the subscription open until the tracker lets go.
                tx.closed().await;
            }
        });
        Ok(rx)
    }
}

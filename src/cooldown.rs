//! Resend countdown for the delivery OTP.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time};

/// Counts down once per `unit`; resend is allowed again at zero.
#[derive(Debug)]
pub struct ResendCooldown {
    remaining: Arc<AtomicU32>,
    unit: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Decrement once, saturating at zero. Returns what is left.
fn step(remaining: &AtomicU32) -> u32 {
    match remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
        Ok(prev) => prev - 1,
        Err(_) => 0,
    }
}

impl ResendCooldown {
    pub fn new(unit: Duration) -> Self {
        Self {
            remaining: Arc::new(AtomicU32::new(0)),
            unit,
            ticker: Mutex::new(None),
        }
    }

    /// Restart the countdown at `units`, replacing any running ticker.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, units: u32) {
        self.cancel();
        if units == 0 {
            return;
        }
        self.remaining.store(units, Ordering::SeqCst);

        let remaining = Arc::clone(&self.remaining);
        let unit = self.unit;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + unit, unit);
            loop {
                interval.tick().await;
                if step(&remaining) == 0 {
                    break;
                }
            }
        });
        *self.ticker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Advance one unit by hand. Returns what is left.
    pub fn tick(&self) -> u32 {
        step(&self.remaining)
    }

    /// Units left; 0 when idle.
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// True while the countdown is running.
    pub fn is_active(&self) -> bool {
        self.remaining() > 0
    }

    /// Stop the ticker and clear the countdown. Safe to call repeatedly.
    pub fn cancel(&self) {
        if let Some(handle) = self
            .ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        self.remaining.store(0, Ordering::SeqCst);
    }
}

impl Drop for ResendCooldown {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_ticks_saturate_at_zero() {
        let cd = ResendCooldown::new(Duration::from_secs(1));
        cd.remaining.store(2, Ordering::SeqCst);
        assert_eq!(cd.tick(), 1);
        assert!(cd.is_active());
        assert_eq!(cd.tick(), 0);
        assert_eq!(cd.tick(), 0);
        assert!(!cd.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_one_per_unit() {
        let cd = ResendCooldown::new(Duration::from_secs(1));
        cd.start(30);
        assert_eq!(cd.remaining(), 30);

        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(cd.remaining(), 29);

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cd.remaining(), 19);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cd.remaining(), 0);
        assert!(!cd.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_ticker() {
        let cd = ResendCooldown::new(Duration::from_secs(1));
        cd.start(30);
        time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(cd.remaining(), 28);

        cd.cancel();
        cd.cancel();
        assert_eq!(cd.remaining(), 0);

        cd.start(5);
        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(cd.remaining(), 4);
    }
}

//! Purpose: Time source seam for lock ages and memory-cache freshness.
//! Exports: `Clock`, `SystemClock`, `ManualClock`.
//! Invariants: Time is fractional seconds since the Unix epoch.
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, seconds: f64) {
        let mut now = self.now.lock().unwrap_or_else(|poison| poison.into_inner());
        *now += seconds;
    }

    pub fn set(&self, seconds: f64) {
        let mut now = self.now.lock().unwrap_or_else(|poison| poison.into_inner());
        *now = seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

//! Rate-limited alerting
//!
//! Each priority tier has its own window measured from the last *delivered* alert of that
//! tier. A send that fails does not start a window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error};

use crate::alerts::{AlertChannel, Priority};

/// Minimum spacing per tier; `None` never suppresses
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub low: Option<Duration>,
    pub normal: Option<Duration>,
    pub high: Option<Duration>,
}

impl RateLimits {
    fn window(&self, priority: Priority) -> Option<Duration> {
        match priority {
            Priority::Low => self.low,
            Priority::Normal => self.normal,
            Priority::High => self.high,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            low: Some(Duration::from_secs(300)),
            normal: Some(Duration::from_secs(60)),
            high: None,
        }
    }
}

pub struct Notifier {
    channel: Arc<dyn AlertChannel>,
    limits: RateLimits,
    last_delivered: Mutex<HashMap<Priority, Instant>>,
}

impl Notifier {
    pub fn new(channel: Arc<dyn AlertChannel>) -> Self {
        Self::with_limits(channel, RateLimits::default())
    }

    pub fn with_limits(channel: Arc<dyn AlertChannel>, limits: RateLimits) -> Self {
        Self {
            channel,
            limits,
            last_delivered: Mutex::new(HashMap::new()),
        }
    }

    /// Send unless rate limited. Returns whether the alert was delivered.
    pub async fn notify(&self, message: &str, priority: Priority) -> bool {
        let now = Instant::now();

        // reserve the slot so concurrent callers of the same tier are suppressed
        let previous = {
            let mut last = self.last_delivered.lock().unwrap_or_else(|e| e.into_inner());
            let previous = last.get(&priority).copied();
            if let (Some(window), Some(sent)) = (self.limits.window(priority), previous) {
                if now.duration_since(sent) < window {
                    debug!("Suppressed {} alert: {}", priority, message);
                    return false;
                }
            }
            last.insert(priority, now);
            previous
        };

        match self.channel.send(message, priority).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to deliver {} alert: {}", priority, e);
                let mut last = self.last_delivered.lock().unwrap_or_else(|e| e.into_inner());
                if last.get(&priority) == Some(&now) {
                    match previous {
                        Some(sent) => last.insert(priority, sent),
                        None => last.remove(&priority),
                    };
                }
                false
            }
        }
    }
}

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Per-resource alert state. Only a successful dispatch moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertState {
    pub last_sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Idle,
    Cooldown { remaining: Duration },
}

impl AlertState {
    pub fn phase(&self, now: DateTime<Utc>, cooldown: Duration) -> AlertPhase {
        let Some(last) = self.last_sent_at else {
            return AlertPhase::Idle;
        };

        // a clock that went backwards counts as zero elapsed
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= cooldown {
            AlertPhase::Idle
        } else {
            AlertPhase::Cooldown {
                remaining: cooldown - elapsed,
            }
        }
    }

    pub fn record_dispatch(&mut self, at: DateTime<Utc>) {
        self.last_sent_at = Some(at);
    }
}

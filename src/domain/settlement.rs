//! Quiet-window and absolute-timeout bookkeeping for an active transaction.

use super::amount::Amount;
use super::pulse::BurstStatus;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_ABSOLUTE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_secs(2);

/// The decision produced by one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Keep collecting money.
    Pending { remaining: Duration },
    /// A burst has gone quiet and must be resolved before deciding.
    ResolveBurst,
    /// The invoice is covered and the customer has stopped inserting notes.
    PaidComplete { overpaid: Amount },
    /// The absolute timeout elapsed, whatever the amount.
    TimedOut { shortfall: Amount, overpaid: Amount },
}

impl Settlement {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PaidComplete { .. } | Self::TimedOut { .. })
    }
}

/// Money state the timer needs to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub total_inserted: Amount,
    pub product_price: Amount,
    pub burst: BurstStatus,
}

/// Deadlines measured from the last sign of customer activity.
///
/// Activation and every accepted pulse refresh the activity clock, so both the
/// quiet window and the absolute timeout restart while notes keep arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementTimer {
    last_activity_at: Instant,
    absolute_timeout: Duration,
    quiet_window: Duration,
}

impl SettlementTimer {
    pub fn start(now: Instant, absolute_timeout: Duration, quiet_window: Duration) -> Self {
        Self {
            last_activity_at: now,
            absolute_timeout,
            quiet_window,
        }
    }

    /// Moves the activity clock forward; never backwards.
    pub fn refresh(&mut self, now: Instant) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    pub fn last_activity_at(&self) -> Instant {
        self.last_activity_at
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.absolute_timeout
            .saturating_sub(now.saturating_duration_since(self.last_activity_at))
    }

    pub fn is_quiet(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity_at) >= self.quiet_window
    }

    pub fn evaluate(&self, now: Instant, progress: Progress) -> Settlement {
        if progress.burst == BurstStatus::Ready {
            return Settlement::ResolveBurst;
        }

        let quiet = self.is_quiet(now);
        if quiet
            && progress.burst == BurstStatus::Empty
            && progress.total_inserted >= progress.product_price
        {
            return Settlement::PaidComplete {
                overpaid: progress.total_inserted.saturating_sub(progress.product_price),
            };
        }

        let remaining = self.remaining(now);
        if remaining.is_zero() {
            // The deadline closes a burst that is still collecting.
            if progress.burst == BurstStatus::Collecting {
                return Settlement::ResolveBurst;
            }
            return Settlement::TimedOut {
                shortfall: progress.product_price.saturating_sub(progress.total_inserted),
                overpaid: progress.total_inserted.saturating_sub(progress.product_price),
            };
        }

        Settlement::Pending { remaining }
    }
}

//! Debouncing of raw acceptor edges into per-note bursts.

use super::denomination::{BurstResolution, DenominationTable, InvalidBurst, resolve_burst};
use std::time::Duration;
use tokio::time::Instant;

/// Default minimum spacing between two accepted edges.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);
/// Default silence after which a burst is considered complete.
pub const DEFAULT_BURST_QUIET: Duration = Duration::from_secs(2);

/// Pulses collected for the note currently passing through the acceptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingBurst {
    pub pending_pulse_count: u32,
    pub last_pulse_at: Option<Instant>,
}

/// What happened to a single edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAcceptance {
    /// Arrived inside the debounce window of the previous edge.
    Debounced,
    /// Counted. `first` marks the edge that opened a new burst.
    Accepted { pending: u32, first: bool },
}

/// Readiness of the pending burst at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstStatus {
    Empty,
    Collecting,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub debounce: Duration,
    pub burst_quiet: Duration,
    pub tolerance: u32,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            burst_quiet: DEFAULT_BURST_QUIET,
            tolerance: super::denomination::DEFAULT_TOLERANCE,
        }
    }
}

/// Turns debounced edges into denominations.
#[derive(Debug, Clone)]
pub struct PulseAggregator {
    table: DenominationTable,
    settings: AggregatorSettings,
    burst: PendingBurst,
}

impl PulseAggregator {
    pub fn new(table: DenominationTable, settings: AggregatorSettings) -> Self {
        Self {
            table,
            settings,
            burst: PendingBurst::default(),
        }
    }

    /// Counts an edge unless it falls within the debounce window.
    ///
    /// The debounce clock survives across bursts: it tracks the last accepted
    /// edge, not the start of the current note.
    pub fn on_edge(&mut self, now: Instant) -> EdgeAcceptance {
        if let Some(last) = self.burst.last_pulse_at
            && now.saturating_duration_since(last) <= self.settings.debounce
        {
            return EdgeAcceptance::Debounced;
        }

        let first = self.burst.pending_pulse_count == 0;
        self.burst.pending_pulse_count += 1;
        self.burst.last_pulse_at = Some(now);
        EdgeAcceptance::Accepted {
            pending: self.burst.pending_pulse_count,
            first,
        }
    }

    pub fn status(&self, now: Instant) -> BurstStatus {
        if self.burst.pending_pulse_count == 0 {
            return BurstStatus::Empty;
        }
        match self.burst.last_pulse_at {
            Some(last) if now.saturating_duration_since(last) < self.settings.burst_quiet => {
                BurstStatus::Collecting
            }
            _ => BurstStatus::Ready,
        }
    }

    pub fn pending(&self) -> u32 {
        self.burst.pending_pulse_count
    }

    pub fn burst(&self) -> PendingBurst {
        self.burst
    }

    pub fn resolve_burst(&self, pending_pulse_count: u32) -> Result<BurstResolution, InvalidBurst> {
        resolve_burst(&self.table, pending_pulse_count, self.settings.tolerance)
    }

    /// Resolves and clears the pending burst. `None` when nothing is pending.
    pub fn finish_burst(&mut self) -> Option<Result<BurstResolution, InvalidBurst>> {
        let count = std::mem::take(&mut self.burst.pending_pulse_count);
        (count > 0).then(|| self.resolve_burst(count))
    }

    /// Forgets the pending burst and the debounce clock.
    pub fn clear(&mut self) {
        self.burst = PendingBurst::default();
    }
}

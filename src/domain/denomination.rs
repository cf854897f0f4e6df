//! Pulse-count to denomination mapping.
//!
//! The acceptor signals each note as a burst of pulses whose length encodes
//! its face value. Electrical noise adds or drops pulses, so an observed
//! count is snapped to the nearest key of the table within a tolerance.

use super::amount::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Pulse key of the smallest note. A single pulse is trusted literally.
pub const SINGLE_PULSE_KEY: u32 = 1;
/// Pulse key every count in `(2, 5)` is forced to.
pub const FORCED_PULSE_KEY: u32 = 2;
/// Default maximum distance between an observed count and a table key.
pub const DEFAULT_TOLERANCE: u32 = 2;

/// One row of the denomination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denomination {
    pub pulses: u32,
    pub amount: Amount,
}

/// A burst mapped onto the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstResolution {
    /// The raw pulse count that was observed.
    pub observed: u32,
    /// The table key the count was corrected to.
    pub corrected: u32,
    pub amount: Amount,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("pulse burst of {observed} matches no denomination (nearest key {nearest:?})")]
pub struct InvalidBurst {
    pub observed: u32,
    pub nearest: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenominationTable {
    entries: BTreeMap<u32, Amount>,
}

impl Default for DenominationTable {
    fn default() -> Self {
        Self::from_entries([
            (1, 1_000),
            (2, 2_000),
            (5, 5_000),
            (10, 10_000),
            (20, 20_000),
            (50, 50_000),
            (100, 100_000),
        ])
    }
}

impl DenominationTable {
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, u64)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(pulses, amount)| (pulses, Amount::new(amount)))
                .collect(),
        }
    }

    pub fn from_denominations(denominations: &[Denomination]) -> Self {
        Self {
            entries: denominations.iter().map(|d| (d.pulses, d.amount)).collect(),
        }
    }

    pub fn amount_for(&self, pulses: u32) -> Option<Amount> {
        self.entries.get(&pulses).copied()
    }

    pub fn denominations(&self) -> Vec<Denomination> {
        self.entries
            .iter()
            .map(|(&pulses, &amount)| Denomination { pulses, amount })
            .collect()
    }

    /// Checks the table can serve every rule of [`resolve_burst`].
    pub fn validate(&self) -> Result<(), String> {
        for key in [SINGLE_PULSE_KEY, FORCED_PULSE_KEY] {
            if !self.entries.contains_key(&key) {
                return Err(format!("denomination table must define pulse key {key}"));
            }
        }
        if let Some((pulses, _)) = self.entries.iter().find(|(_, amount)| amount.is_zero()) {
            return Err(format!("denomination for {pulses} pulses has a zero amount"));
        }
        Ok(())
    }
}

/// Maps a raw pulse count to the nearest valid denomination.
///
/// - `1` is always the single-pulse note.
/// - `3` and `4` are forced to the two-pulse note.
/// - Anything else snaps to the closest key other than `1`, ties going to
///   the smaller key, and is rejected when further than `tolerance` away.
pub fn resolve_burst(
    table: &DenominationTable,
    observed: u32,
    tolerance: u32,
) -> Result<BurstResolution, InvalidBurst> {
    let corrected = match observed {
        0 => {
            return Err(InvalidBurst {
                observed,
                nearest: None,
            });
        }
        SINGLE_PULSE_KEY => Some(SINGLE_PULSE_KEY),
        p if p > 2 && p < 5 => Some(FORCED_PULSE_KEY),
        p => {
            let nearest = table
                .entries
                .keys()
                .copied()
                .filter(|&key| key != SINGLE_PULSE_KEY)
                .min_by_key(|&key| key.abs_diff(p));
            match nearest {
                Some(key) if key.abs_diff(p) <= tolerance => Some(key),
                other => {
                    return Err(InvalidBurst {
                        observed,
                        nearest: other,
                    });
                }
            }
        }
    };

    corrected
        .and_then(|key| table.amount_for(key).map(|amount| (key, amount)))
        .map(|(corrected, amount)| BurstResolution {
            observed,
            corrected,
            amount,
        })
        .ok_or(InvalidBurst {
            observed,
            nearest: corrected,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(pulses: u32) -> Result<BurstResolution, InvalidBurst> {
        resolve_burst(&DenominationTable::default(), pulses, DEFAULT_TOLERANCE)
    }

    #[test]
    fn test_single_pulse_is_literal() {
        let resolved = resolve(1).unwrap();
        assert_eq!(resolved.corrected, 1);
        assert_eq!(resolved.amount, Amount::new(1_000));
    }

    #[test]
    fn test_three_and_four_are_forced_to_two() {
        for pulses in [3, 4] {
            let resolved = resolve(pulses).unwrap();
            assert_eq!(resolved.corrected, 2, "pulses {pulses}");
            assert_eq!(resolved.amount, Amount::new(2_000));
        }
    }

    #[test]
    fn test_exact_keys_resolve_to_themselves() {
        for (pulses, amount) in [(2, 2_000), (5, 5_000), (10, 10_000), (20, 20_000), (50, 50_000), (100, 100_000)] {
            let resolved = resolve(pulses).unwrap();
            assert_eq!(resolved.corrected, pulses);
            assert_eq!(resolved.amount, Amount::new(amount));
        }
    }

    #[test]
    fn test_noisy_counts_within_tolerance() {
        assert_eq!(resolve(101).unwrap().amount, Amount::new(100_000));
        assert_eq!(resolve(98).unwrap().corrected, 100);
        assert_eq!(resolve(12).unwrap().corrected, 10);
        assert_eq!(resolve(19).unwrap().corrected, 20);
        assert_eq!(resolve(6).unwrap().corrected, 5);
    }

    #[test]
    fn test_ties_prefer_smaller_key() {
        let table = DenominationTable::from_entries([(1, 1), (2, 2), (8, 8), (12, 12)]);
        assert_eq!(resolve_burst(&table, 10, 2).unwrap().corrected, 8);
        // 15 sits between 10 and 20 at distance 5: out of tolerance either way.
        assert_eq!(
            resolve(15),
            Err(InvalidBurst {
                observed: 15,
                nearest: Some(10)
            })
        );
    }

    #[test]
    fn test_counts_beyond_tolerance_are_invalid() {
        let err = resolve(60).unwrap_err();
        assert_eq!(err.observed, 60);
        assert_eq!(err.nearest, Some(50));
        assert_eq!(resolve(0).unwrap_err().nearest, None);
        assert!(resolve(35).is_err());
        assert!(resolve(103).is_err());
    }

    #[test]
    fn test_zero_tolerance_only_accepts_exact_keys() {
        let table = DenominationTable::default();
        assert!(resolve_burst(&table, 6, 0).is_err());
        assert!(resolve_burst(&table, 5, 0).is_ok());
    }

    #[test]
    fn test_validate_requires_rule_keys() {
        assert!(DenominationTable::default().validate().is_ok());
        let missing_two = DenominationTable::from_entries([(1, 1_000), (5, 5_000)]);
        assert!(missing_two.validate().is_err());
        let zero = DenominationTable::from_entries([(1, 1_000), (2, 0)]);
        assert!(zero.validate().is_err());
    }
}

//! Winner selection: smallest size, unless a cheaper configuration is close
//! enough.

use common::ColumnEncoding;
use serde::Serialize;
use std::fmt;

use crate::bench::Measurement;
use crate::candidates::WeightTable;

/// Trade-off threshold in percent, 1 to 99 inclusive.
///
/// A candidate competes with the smallest one when
/// `100 * best_size / candidate_size >= threshold`. Higher thresholds admit
/// only near-identical sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TradeoffThreshold(u8);

impl TradeoffThreshold {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 99;

    pub fn new(percent: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX)
            .contains(&percent)
            .then_some(Self(percent))
    }

    pub fn percent(&self) -> u8 {
        self.0
    }
}

impl Default for TradeoffThreshold {
    fn default() -> Self {
        Self(90)
    }
}

impl fmt::Display for TradeoffThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Outcome of selection for one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionResult {
    pub column: String,
    pub winner: Measurement,
    pub winner_weight: u32,
    /// Smallest measurement of the column
    pub best: Measurement,
    /// Measurement matching the column's current encoding, if it was measured
    pub current: Option<Measurement>,
}

impl SelectionResult {
    pub fn winning_size(&self) -> u64 {
        self.winner.physical_size_bytes
    }

    /// Whether the column already uses the recommended configuration.
    pub fn is_current(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| current.config == self.winner.config)
    }
}

/// Whether `candidate` is close enough in size to `best` to compete.
///
/// Evaluated as `100 * best >= threshold * candidate` so the boundary is
/// exact. A zero-sized candidate competes only if `best` is zero as well.
pub fn is_competitor(best_size: u64, candidate_size: u64, threshold: TradeoffThreshold) -> bool {
    100 * u128::from(best_size) >= u128::from(threshold.percent()) * u128::from(candidate_size)
}

/// Pick the winner among one column's measurements.
///
/// Measurements are stable-sorted by size; the first is `best`. Every later
/// measurement within the threshold is a competitor, and the competitor with
/// the lowest weight wins (first encountered on equal weight). Without
/// competitors `best` wins. Returns `None` when nothing was measured.
pub fn select_best(
    measurements: &[Measurement],
    threshold: TradeoffThreshold,
    weights: &WeightTable,
    current_encoding: Option<&ColumnEncoding>,
) -> Option<SelectionResult> {
    let mut sorted: Vec<&Measurement> = measurements.iter().collect();
    sorted.sort_by_key(|m| m.physical_size_bytes);

    let (best, rest) = sorted.split_first()?;

    let mut competitors: Vec<(&Measurement, u32)> = rest
        .iter()
        .filter(|m| is_competitor(best.physical_size_bytes, m.physical_size_bytes, threshold))
        .map(|m| (*m, weights.weight(&m.config)))
        .collect();
    competitors.sort_by_key(|(_, weight)| *weight);

    let (winner, winner_weight) = competitors
        .first()
        .copied()
        .unwrap_or_else(|| (*best, weights.weight(&best.config)));

    Some(SelectionResult {
        column: best.column.clone(),
        winner: winner.clone(),
        winner_weight,
        best: (*best).clone(),
        current: current_encoding.and_then(|encoding| current_measurement(measurements, encoding)),
    })
}

/// Measurement taken under the column's current encoding.
pub fn current_measurement(
    measurements: &[Measurement],
    encoding: &ColumnEncoding,
) -> Option<Measurement> {
    measurements
        .iter()
        .find(|m| encoding.matches(&m.config))
        .cloned()
}

//! Per-station link quality and best-rate estimation.
//!
//! The link-quality poller reports, for every rate a station has been tried
//! at, an EWMA delivery probability and an instantaneous ("cur") probability,
//! both on a 0-100 scale. From that table a station derives:
//!
//! - its best EWMA rate and best cur-prob rate (fallback inputs for
//!   arbitration when no common reliable rate exists), and
//! - its reliable rate sets: every rate whose probability meets the
//!   threshold, used for the cross-station intersection.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Rate;

/// Rates above this value whose probabilities both miss the threshold are
/// demoted to the next lower rate.
pub const DEMOTION_FLOOR: Rate = 12;

/// Rate that legacy hardware cannot use for multicast; replaced by
/// [`DEMOTION_FLOOR`].
pub const QUIRK_RATE: Rate = 9;

/// Delivery probabilities reported for one rate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RateStats {
    pub ewma_prob: f64,
    pub cur_prob: f64,
}

/// Rate → probabilities, as delivered by the poller.
pub type RatesTable = BTreeMap<Rate, RateStats>;

/// Borrowed view of a station's derived rate estimates.
#[derive(Debug, Clone, Copy)]
pub struct BestRates<'a> {
    pub ewma_rate: Rate,
    pub cur_prob_rate: Rate,
    pub reliable_ewma: &'a BTreeMap<Rate, f64>,
    pub reliable_cur_prob: &'a BTreeMap<Rate, f64>,
}

#[derive(Debug, Clone)]
pub struct LinkQuality {
    threshold: f64,
    rates: RatesTable,
    best_ewma_rate: Rate,
    best_cur_prob_rate: Rate,
    reliable_ewma: BTreeMap<Rate, f64>,
    reliable_cur_prob: BTreeMap<Rate, f64>,
}

/// Running argmax over `(probability, rate)`: higher probability wins, equal
/// probability goes to the higher rate. NaN never wins.
#[derive(Debug, Clone, Copy, Default)]
struct Best {
    prob: f64,
    rate: Rate,
}

impl Best {
    fn offer(&mut self, prob: f64, rate: Rate) {
        let wins = match prob.partial_cmp(&self.prob) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => rate > self.rate,
            _ => false,
        };
        if wins {
            self.prob = prob;
            self.rate = rate;
        }
    }
}

impl LinkQuality {
    /// Creates an empty estimator. `threshold` is on the 0-100 scale.
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold: f64::from(threshold),
            rates: RatesTable::new(),
            best_ewma_rate: 0,
            best_cur_prob_rate: 0,
            reliable_ewma: BTreeMap::new(),
            reliable_cur_prob: BTreeMap::new(),
        }
    }

    /// Replaces the rate table and recomputes every derived field.
    ///
    /// An empty table is ignored and the previous estimates are kept.
    /// Returns whether the table was applied.
    pub fn update(&mut self, rates: RatesTable) -> bool {
        let Some(lowest) = rates.keys().next().copied() else {
            return false;
        };
        let threshold = self.threshold;

        let mut best_ewma = Best::default();
        let mut best_cur = Best::default();
        let mut reliable_ewma = BTreeMap::new();
        let mut reliable_cur_prob = BTreeMap::new();

        for (&rate, stats) in &rates {
            best_ewma.offer(stats.ewma_prob, rate);
            best_cur.offer(stats.cur_prob, rate);
            if stats.ewma_prob >= threshold {
                reliable_ewma.insert(rate, stats.ewma_prob);
            }
            if stats.cur_prob >= threshold {
                reliable_cur_prob.insert(rate, stats.cur_prob);
            }
        }

        let mut ewma_rate = best_ewma.rate;
        let unreliable_both = best_ewma.prob < threshold
            && rates
                .get(&ewma_rate)
                .is_some_and(|stats| stats.cur_prob < threshold);
        if unreliable_both && ewma_rate > DEMOTION_FLOOR {
            if let Some((&lower, _)) = rates.range(..ewma_rate).next_back() {
                ewma_rate = lower;
            }
        }
        if ewma_rate == QUIRK_RATE {
            ewma_rate = DEMOTION_FLOOR;
        }

        let mut cur_prob_rate = best_cur.rate;
        if best_cur.prob <= 0.0 && best_ewma.prob <= 0.0 {
            ewma_rate = lowest;
            cur_prob_rate = lowest;
        } else if best_cur.prob <= 0.0 {
            cur_prob_rate = ewma_rate;
        }

        self.rates = rates;
        self.best_ewma_rate = ewma_rate;
        self.best_cur_prob_rate = cur_prob_rate;
        self.reliable_ewma = reliable_ewma;
        self.reliable_cur_prob = reliable_cur_prob;
        true
    }

    pub fn best_rates(&self) -> BestRates<'_> {
        BestRates {
            ewma_rate: self.best_ewma_rate,
            cur_prob_rate: self.best_cur_prob_rate,
            reliable_ewma: &self.reliable_ewma,
            reliable_cur_prob: &self.reliable_cur_prob,
        }
    }

    /// Whether a non-empty rate table has been applied.
    pub fn has_report(&self) -> bool {
        !self.rates.is_empty()
    }
}

//! Legacy-multicast rate arbitration across the subscribers of one group.
//!
//! Every subscriber contributes its reliable rate set. When all of them
//! agree on at least one rate, the highest agreed rate is used. As soon as a
//! subscriber has no reliable rate, or the running intersection empties,
//! agreement is abandoned and the rate degrades to the lowest best-rate
//! estimate among the subscribers, so no known subscriber is pushed above
//! what it can sustain. Without any usable subscriber the AP's lowest
//! capability rate is used.
//!
//! The EWMA and cur-prob metrics are arbitrated independently.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::link_quality::LinkQuality;
use crate::types::{ProbSource, Rate};

/// Arbitration result for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArbitratedRate {
    pub ewma_rate: Rate,
    pub cur_prob_rate: Rate,
}

impl ArbitratedRate {
    /// Both outputs at the same rate.
    pub fn uniform(rate: Rate) -> Self {
        Self {
            ewma_rate: rate,
            cur_prob_rate: rate,
        }
    }

    pub fn for_source(&self, source: ProbSource) -> Rate {
        match source {
            ProbSource::Ewma => self.ewma_rate,
            ProbSource::CurProb => self.cur_prob_rate,
        }
    }
}

/// Running intersection of reliable rate sets.
#[derive(Debug, Default)]
struct Agreement {
    rates: Option<BTreeSet<Rate>>,
    broken: bool,
}

impl Agreement {
    fn fold(&mut self, reliable: &BTreeMap<Rate, f64>) {
        if self.broken {
            return;
        }
        if reliable.is_empty() {
            self.broken = true;
            return;
        }
        match &mut self.rates {
            None => self.rates = Some(reliable.keys().copied().collect()),
            Some(rates) => {
                rates.retain(|rate| reliable.contains_key(rate));
                if rates.is_empty() {
                    self.broken = true;
                }
            }
        }
    }

    fn best(&self) -> Option<Rate> {
        if self.broken {
            return None;
        }
        self.rates.as_ref()?.last().copied()
    }
}

#[derive(Debug, Default)]
struct Floor(Option<Rate>);

impl Floor {
    fn offer(&mut self, rate: Rate) {
        if rate != 0 && self.0.is_none_or(|current| rate < current) {
            self.0 = Some(rate);
        }
    }
}

/// Computes the legacy rate for a group from the link quality of all of its
/// subscribers on one AP. `lowest_rate` is the AP's lowest capability rate.
pub fn best_rate<'a, I>(subscribers: I, lowest_rate: Rate) -> ArbitratedRate
where
    I: IntoIterator<Item = &'a LinkQuality>,
{
    let mut ewma = Agreement::default();
    let mut cur_prob = Agreement::default();
    let mut ewma_floor = Floor::default();
    let mut cur_prob_floor = Floor::default();

    for quality in subscribers {
        let best = quality.best_rates();
        ewma_floor.offer(best.ewma_rate);
        cur_prob_floor.offer(best.cur_prob_rate);
        ewma.fold(best.reliable_ewma);
        cur_prob.fold(best.reliable_cur_prob);
    }

    let (min_rate, min_cur_prob_rate) = match (ewma_floor.0, cur_prob_floor.0) {
        (Some(ewma), Some(cur)) => (ewma, cur),
        _ => (lowest_rate, lowest_rate),
    };

    ArbitratedRate {
        ewma_rate: ewma.best().unwrap_or(min_rate),
        cur_prob_rate: cur_prob.best().unwrap_or(min_cur_prob_rate),
    }
}

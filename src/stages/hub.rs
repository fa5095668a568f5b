//! Consolidation hubs (centers)
//!
//! A hub starts where `min_members` consecutive legs share a price range
//! of strictly positive width, keeps absorbing legs while the running
//! intersection stays non-empty, and closes on the first leg that no
//! longer intersects. That leg is the hub's leaving leg and the next search
//! starts from it.
//!
//! Legs are contiguous, so the leaving leg starts where the last member
//! ends, entirely on one side of the hub range. The last member of a
//! closed hub is therefore its exit leg: it starts inside the range and
//! breaks out of it, and the leaving leg is the pullback that follows.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::Span;
use crate::params::{get_period, ParamMeta, Parameterized};
use crate::{ChanError, HubId, Level, Result, StructureRef};

pub const DEFAULT_MIN_MEMBERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hub {
    pub id: HubId,
    pub level: Level,
    /// Top of the intersection
    pub high: f64,
    /// Bottom of the intersection
    pub low: f64,
    /// Highest high among members
    pub max_high: f64,
    /// Lowest low among members
    pub min_low: f64,
    pub first_member: usize,
    pub last_member: usize,
    pub entering: Option<usize>,
    /// `None` while the hub is still open at the end of the data
    pub leaving: Option<usize>,
    pub start_bar: usize,
    pub end_bar: usize,
}

impl Hub {
    #[inline]
    pub fn member_count(&self) -> usize {
        self.last_member - self.first_member + 1
    }

    #[inline]
    pub fn members(&self) -> std::ops::RangeInclusive<usize> {
        self.first_member..=self.last_member
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.leaving.is_some()
    }

    pub fn entering_ref(&self) -> Option<StructureRef> {
        self.entering.map(|i| StructureRef::member(self.level, i))
    }

    pub fn leaving_ref(&self) -> Option<StructureRef> {
        self.leaving.map(|i| StructureRef::member(self.level, i))
    }

    /// Member that breaks out of a closed hub
    #[inline]
    pub fn exit(&self) -> Option<usize> {
        self.leaving.map(|_| self.last_member)
    }

    pub fn exit_ref(&self) -> Option<StructureRef> {
        self.exit().map(|i| StructureRef::member(self.level, i))
    }

    #[inline]
    pub fn overlaps(&self, high: f64, low: f64) -> bool {
        low < self.high && high > self.low
    }
}

// ============================================================
// DETECTOR
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubDetector {
    pub min_members: usize,
}

impl Default for HubDetector {
    fn default() -> Self {
        Self {
            min_members: DEFAULT_MIN_MEMBERS,
        }
    }
}

impl HubDetector {
    pub fn validate(&self) -> Result<()> {
        if self.min_members < 3 {
            return Err(ChanError::InvalidConfig(format!(
                "hub.min_members must be >= 3, got {}",
                self.min_members
            )));
        }
        self.validate_params()
    }

    pub fn detect<S: Span>(&self, items: &[S], level: Level) -> Vec<Hub> {
        self.detect_from(items, level, Vec::new())
    }

    /// Continue after `kept`, hubs from an earlier run whose leaving legs
    /// are unchanged in `items`. A trailing open hub in `kept` is dropped
    /// and searched again.
    pub fn detect_from<S: Span>(&self, items: &[S], level: Level, mut kept: Vec<Hub>) -> Vec<Hub> {
        while kept.last().is_some_and(|h| !h.is_closed()) {
            kept.pop();
        }
        let m = self.min_members.max(1);
        let n = items.len();
        let mut i = kept.last().and_then(|h| h.leaving).unwrap_or(0);

        while i + m <= n {
            let window = &items[i..i + m];
            let mut low = window.iter().map(|s| s.low()).fold(f64::NEG_INFINITY, f64::max);
            let mut high = window.iter().map(|s| s.high()).fold(f64::INFINITY, f64::min);
            if low >= high {
                i += 1;
                continue;
            }

            let mut max_high = window.iter().map(|s| s.high()).fold(f64::NEG_INFINITY, f64::max);
            let mut min_low = window.iter().map(|s| s.low()).fold(f64::INFINITY, f64::min);
            let mut j = i + m;
            while j < n {
                let next_low = low.max(items[j].low());
                let next_high = high.min(items[j].high());
                if next_low >= next_high {
                    break;
                }
                low = next_low;
                high = next_high;
                max_high = max_high.max(items[j].high());
                min_low = min_low.min(items[j].low());
                j += 1;
            }

            kept.push(Hub {
                id: HubId(kept.len()),
                level,
                high,
                low,
                max_high,
                min_low,
                first_member: i,
                last_member: j - 1,
                entering: i.checked_sub(1),
                leaving: (j < n).then_some(j),
                start_bar: items[i].start_bar(),
                end_bar: items[j - 1].end_bar(),
            });
            if j >= n {
                break;
            }
            i = j;
        }
        kept
    }

    /// Hubs that survive when only the first `stable_items` legs are
    /// unchanged: everything up to the last closed hub whose leaving leg is
    /// stable.
    pub fn resume_point(hubs: &[Hub], stable_items: usize) -> usize {
        hubs.iter()
            .rposition(|h| h.leaving.is_some_and(|l| l < stable_items))
            .map_or(0, |p| p + 1)
    }
}

static HUB_PARAMS: &[ParamMeta] = &[ParamMeta::period(
    "min_members",
    DEFAULT_MIN_MEMBERS as f64,
    (3.0, 9.0, 1.0),
    "Overlapping legs needed to open a hub",
)];

impl Parameterized for HubDetector {
    fn param_meta() -> &'static [ParamMeta] {
        HUB_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            min_members: get_period(params, "min_members", DEFAULT_MIN_MEMBERS)?.get(),
        };
        detector.validate()?;
        Ok(detector)
    }

    fn stage_name() -> &'static str {
        "hub"
    }

    fn param_values(&self) -> Vec<(&'static str, f64)> {
        vec![("min_members", self.min_members as f64)]
    }
}

// ============================================================
// TESTS
// ============================================================

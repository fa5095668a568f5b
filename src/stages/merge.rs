//! Containment merging of raw bars
//!
//! Adjacent bars where one [low, high] range contains the other are
//! collapsed into a single merged bar. The prevailing direction (set when a
//! merged bar is opened, relative to its predecessor) decides which extremes
//! survive: upward merges keep the higher high and higher low, downward
//! merges the lower high and lower low.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Direction, MergedBarId, OHLCV};

/// One or more raw bars after containment merging
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergedBar {
    pub id: MergedBarId,
    pub high: f64,
    pub low: f64,
    /// Direction relative to the previous merged bar. `None` for the first
    /// one, which is also never merged into.
    pub direction: Option<Direction>,
    /// First contributing raw bar
    pub start_index: usize,
    /// Last contributing raw bar (inclusive)
    pub end_index: usize,
    /// Raw bar holding `high`
    pub high_bar: usize,
    /// Raw bar holding `low`
    pub low_bar: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub high_time: DateTime<Utc>,
    pub low_time: DateTime<Utc>,
}

impl MergedBar {
    fn open<T: OHLCV>(id: MergedBarId, index: usize, bar: &T, direction: Option<Direction>) -> Self {
        let ts = bar.timestamp();
        Self {
            id,
            high: bar.high(),
            low: bar.low(),
            direction,
            start_index: index,
            end_index: index,
            high_bar: index,
            low_bar: index,
            start_time: ts,
            end_time: ts,
            high_time: ts,
            low_time: ts,
        }
    }

    /// Number of raw bars folded into this one
    #[inline]
    pub fn raw_count(&self) -> usize {
        self.end_index - self.start_index + 1
    }

    #[inline]
    pub fn contains(&self, high: f64, low: f64) -> bool {
        self.high >= high && self.low <= low
    }

    /// Fold `bar` in if it is in a containment relation with this bar.
    /// Returns false (and leaves `self` untouched) otherwise.
    fn absorb<T: OHLCV>(&mut self, index: usize, bar: &T) -> bool {
        let Some(direction) = self.direction else {
            return false;
        };
        let (high, low) = (bar.high(), bar.low());
        let contained = self.contains(high, low) || (high >= self.high && low <= self.low);
        if !contained {
            return false;
        }

        let ts = bar.timestamp();
        let (take_high, take_low) = match direction {
            Direction::Up => (high > self.high, low > self.low),
            Direction::Down => (high < self.high, low < self.low),
        };
        if take_high {
            self.high = high;
            self.high_bar = index;
            self.high_time = ts;
        }
        if take_low {
            self.low = low;
            self.low_bar = index;
            self.low_time = ts;
        }
        self.end_index = index;
        self.end_time = ts;
        true
    }
}

// ============================================================
// MERGER
// ============================================================

/// Collapses contained bars. Stateless; all state lives in the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarMerger;

impl BarMerger {
    /// Feed raw bar `index` into an existing merged sequence.
    /// Only the last merged bar can change.
    pub fn step<T: OHLCV>(&self, merged: &mut Vec<MergedBar>, index: usize, bar: &T) {
        if let Some(last) = merged.last_mut() {
            if last.absorb(index, bar) {
                return;
            }
            let direction = if bar.high() > last.high {
                Direction::Up
            } else {
                Direction::Down
            };
            let id = MergedBarId(merged.len());
            merged.push(MergedBar::open(id, index, bar, Some(direction)));
        } else {
            merged.push(MergedBar::open(MergedBarId(0), index, bar, None));
        }
    }

    pub fn merge<T: OHLCV>(&self, bars: &[T]) -> Vec<MergedBar> {
        self.merge_from(bars, Vec::new())
    }

    /// Continue merging after `prefix`, a leading slice of an earlier
    /// result over the same bars. Raw bars already covered by the prefix
    /// are skipped.
    pub fn merge_from<T: OHLCV>(&self, bars: &[T], mut prefix: Vec<MergedBar>) -> Vec<MergedBar> {
        let start = prefix.last().map_or(0, |m| m.end_index + 1);
        for (i, bar) in bars.iter().enumerate().skip(start) {
            self.step(&mut prefix, i, bar);
        }
        prefix
    }

    /// Lazy merged sequence. Each item is yielded once no later bar can
    /// merge into it; the trailing one is yielded when input runs out.
    pub fn iter<'a, T: OHLCV>(&self, bars: &'a [T]) -> MergedBars<'a, T> {
        MergedBars {
            bars,
            next: 0,
            pending: None,
        }
    }
}

/// Iterator returned by [`BarMerger::iter`]
pub struct MergedBars<'a, T: OHLCV> {
    bars: &'a [T],
    next: usize,
    pending: Option<MergedBar>,
}

impl<'a, T: OHLCV> Iterator for MergedBars<'a, T> {
    type Item = MergedBar;

    fn next(&mut self) -> Option<MergedBar> {
        while let Some(bar) = self.bars.get(self.next) {
            let index = self.next;
            self.next += 1;

            let Some(pending) = self.pending.as_mut() else {
                self.pending = Some(MergedBar::open(MergedBarId(0), index, bar, None));
                continue;
            };
            if pending.absorb(index, bar) {
                continue;
            }
            let direction = if bar.high() > pending.high {
                Direction::Up
            } else {
                Direction::Down
            };
            let id = MergedBarId(pending.id.0 + 1);
            return self.pending.replace(MergedBar::open(id, index, bar, Some(direction)));
        }
        self.pending.take()
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bar;
    use chrono::TimeZone;

    fn bars(ranges: &[(f64, f64)]) -> Vec<Bar> {
        ranges
            .iter()
            .enumerate()
            .map(|(i, &(h, l))| {
                let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
                Bar::new("M", i as u64, ts, l, h, l, h, 1.0)
            })
            .collect()
    }

    #[test]
    fn test_upward_containment_keeps_highs() {
        let b = bars(&[(10.0, 8.0), (12.0, 9.0), (11.5, 9.5), (13.0, 10.0)]);
        let merged = BarMerger.merge(&b);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].direction, Some(Direction::Up));
        assert_eq!((merged[1].high, merged[1].low), (12.0, 9.5));
        assert_eq!((merged[1].start_index, merged[1].end_index), (1, 2));
        assert_eq!(merged[1].high_bar, 1);
        assert_eq!(merged[1].low_bar, 2);
    }

    #[test]
    fn test_downward_containment_keeps_lows() {
        let b = bars(&[(12.0, 10.0), (11.0, 9.0), (11.5, 8.5), (10.0, 8.0)]);
        let merged = BarMerger.merge(&b);
        assert_eq!(merged[1].direction, Some(Direction::Down));
        // outer bar contains the current one: down merge takes min/min
        assert_eq!((merged[1].high, merged[1].low), (11.0, 8.5));
        assert_eq!(merged[1].raw_count(), 2);
    }

    #[test]
    fn test_first_bar_is_not_merged_into() {
        let b = bars(&[(12.0, 8.0), (11.0, 9.0), (13.0, 10.0)]);
        let merged = BarMerger.merge(&b);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].direction, None);
        assert_eq!(merged[1].direction, Some(Direction::Down));
    }

    #[test]
    fn test_no_containment_after_second_bar() {
        let b = bars(&[
            (10.0, 8.0),
            (11.0, 9.0),
            (10.5, 9.5),
            (12.0, 8.0),
            (9.0, 7.0),
            (9.5, 7.5),
            (8.0, 6.0),
        ]);
        let merged = BarMerger.merge(&b);
        for w in merged.windows(2).skip(1) {
            assert!(!w[0].contains(w[1].high, w[1].low));
            assert!(!w[1].contains(w[0].high, w[0].low));
        }
    }

    #[test]
    fn test_iter_matches_merge() {
        let b = bars(&[
            (10.0, 8.0),
            (11.0, 9.0),
            (10.5, 9.5),
            (12.0, 10.0),
            (11.0, 10.5),
            (9.0, 7.0),
        ]);
        let eager = BarMerger.merge(&b);
        let lazy: Vec<_> = BarMerger.iter(&b).collect();
        assert_eq!(eager, lazy);
    }

    #[test]
    fn test_merge_from_prefix() {
        let b = bars(&[
            (10.0, 8.0),
            (11.0, 9.0),
            (10.5, 9.5),
            (12.0, 10.0),
            (9.0, 7.0),
        ]);
        let full = BarMerger.merge(&b);
        let prefix = full[..2].to_vec();
        assert_eq!(BarMerger.merge_from(&b, prefix), full);
    }

    #[test]
    fn test_empty_input() {
        let b: Vec<Bar> = Vec::new();
        assert!(BarMerger.merge(&b).is_empty());
        assert_eq!(BarMerger.iter(&b).count(), 0);
    }
}

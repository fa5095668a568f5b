//! Top/bottom fractal detection over merged bars

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::helpers::TurningPoint;
use super::merge::MergedBar;
use crate::{FractalId, FractalKind};

/// A three-bar local extreme on the merged sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fractal {
    pub id: FractalId,
    pub kind: FractalKind,
    /// Position of the middle bar in the merged sequence
    pub index: usize,
    /// Raw bar carrying the extreme price
    pub bar_index: usize,
    /// High for a top, low for a bottom
    pub price: f64,
    /// Highest high of the three bars
    pub high: f64,
    /// Lowest low of the three bars
    pub low: f64,
    pub timestamp: DateTime<Utc>,
    /// Set once the fractal is an endpoint of the stroke chain
    pub confirmed: bool,
}

impl TurningPoint for Fractal {
    #[inline]
    fn kind(&self) -> FractalKind {
        self.kind
    }

    #[inline]
    fn price(&self) -> f64 {
        self.price
    }
}

/// Scans merged bars for fractal candidates and resolves runs of the same
/// kind down to the most extreme one.
#[derive(Debug, Clone, Copy, Default)]
pub struct FractalDetector;

impl FractalDetector {
    /// Candidate at merged position `i`, if any. A bar that is both a top and
    /// a bottom (it contains both neighbours) is ambiguous and skipped.
    pub fn candidate(&self, merged: &[MergedBar], i: usize) -> Option<Fractal> {
        if i == 0 || i + 1 >= merged.len() {
            return None;
        }
        let (prev, cur, next) = (&merged[i - 1], &merged[i], &merged[i + 1]);
        let top = cur.high > prev.high && cur.high > next.high;
        let bottom = cur.low < prev.low && cur.low < next.low;

        let (kind, price, bar_index, timestamp) = match (top, bottom) {
            (true, false) => (FractalKind::Top, cur.high, cur.high_bar, cur.high_time),
            (false, true) => (FractalKind::Bottom, cur.low, cur.low_bar, cur.low_time),
            _ => return None,
        };
        Some(Fractal {
            id: FractalId(0),
            kind,
            index: i,
            bar_index,
            price,
            high: prev.high.max(cur.high).max(next.high),
            low: prev.low.min(cur.low).min(next.low),
            timestamp,
            confirmed: false,
        })
    }

    pub fn detect(&self, merged: &[MergedBar]) -> Vec<Fractal> {
        self.detect_from(merged, Vec::new())
    }

    /// Continue detection after `prefix`, the first fractals of an earlier
    /// run whose three bars are unchanged in `merged`.
    pub fn detect_from(&self, merged: &[MergedBar], mut prefix: Vec<Fractal>) -> Vec<Fractal> {
        let start = prefix.last().map_or(1, |f| f.index + 1);
        for i in start..merged.len().saturating_sub(1) {
            if let Some(candidate) = self.candidate(merged, i) {
                resolve_push(&mut prefix, candidate);
            }
        }
        prefix
    }

    /// Number of leading fractals that survive when only the first
    /// `stable_merged` merged bars are known to be unchanged.
    pub fn resume_point(fractals: &[Fractal], stable_merged: usize) -> usize {
        fractals.partition_point(|f| f.index + 1 < stable_merged)
    }

    /// Lazy fractal sequence; a fractal is yielded once a candidate of the
    /// opposite kind follows it.
    pub fn iter<'a>(&self, merged: &'a [MergedBar]) -> Fractals<'a> {
        Fractals {
            detector: *self,
            merged,
            next: 1,
            pending: None,
        }
    }
}

/// Same-kind neighbours collapse to the more extreme price; ties go to the
/// later candidate.
fn resolve_push(out: &mut Vec<Fractal>, mut candidate: Fractal) {
    if let Some(last) = out.last_mut() {
        if last.kind == candidate.kind {
            if candidate.kind.at_least_as_extreme(candidate.price, last.price) {
                candidate.id = last.id;
                *last = candidate;
            }
            return;
        }
    }
    candidate.id = FractalId(out.len());
    out.push(candidate);
}

/// Iterator returned by [`FractalDetector::iter`]
pub struct Fractals<'a> {
    detector: FractalDetector,
    merged: &'a [MergedBar],
    next: usize,
    pending: Option<Fractal>,
}

impl<'a> Iterator for Fractals<'a> {
    type Item = Fractal;

    fn next(&mut self) -> Option<Fractal> {
        while self.next + 1 < self.merged.len() {
            let i = self.next;
            self.next += 1;
            let Some(mut candidate) = self.detector.candidate(self.merged, i) else {
                continue;
            };
            match self.pending.as_mut() {
                None => self.pending = Some(candidate),
                Some(p) if p.kind == candidate.kind => {
                    if candidate.kind.at_least_as_extreme(candidate.price, p.price) {
                        candidate.id = p.id;
                        *p = candidate;
                    }
                }
                Some(p) => {
                    candidate.id = FractalId(p.id.0 + 1);
                    return self.pending.replace(candidate);
                }
            }
        }
        self.pending.take()
    }
}

// ============================================================
// TESTS
// ============================================================

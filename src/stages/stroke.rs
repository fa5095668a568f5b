//! Stroke construction
//!
//! Fractals are offered one at a time to an alternating chain. Two chain
//! neighbours form a stroke when at least `min_gap` merged bars separate
//! them, their prices are strictly ordered in the stroke's direction, and
//! no merged bar in between trades beyond either endpoint. A candidate that
//! cannot pair with the tail but beats the fractal before it retracts the
//! tail, which is how a weaker endpoint gets dropped. Retraction only
//! happens when the candidate then pairs validly with the point it lands
//! next to.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fractal::Fractal;
use super::helpers::{AlternatingChain, ChainUpdate, Span};
use super::merge::MergedBar;
use crate::params::{get_period, ParamMeta, Parameterized};
use crate::{ChanError, Direction, FractalId, FractalKind, Result, StrokeId};

pub const DEFAULT_MIN_GAP: usize = 4;

/// A directional leg between two alternating chain fractals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: StrokeId,
    pub direction: Direction,
    pub start: FractalId,
    pub end: FractalId,
    /// Merged position of the start fractal
    pub start_index: usize,
    /// Merged position of the end fractal
    pub end_index: usize,
    /// Merged bars strictly between the endpoints
    pub bar_count: usize,
    /// Raw bar of the start extreme
    pub start_bar: usize,
    /// Raw bar of the end extreme
    pub end_bar: usize,
    pub start_price: f64,
    pub end_price: f64,
    pub high: f64,
    pub low: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Stroke {
    /// Percentage move from start to end price
    pub fn change_pct(&self) -> f64 {
        if self.start_price == 0.0 {
            return 0.0;
        }
        (self.end_price - self.start_price) / self.start_price * 100.0
    }
}

impl Span for Stroke {
    fn direction(&self) -> Direction {
        self.direction
    }
    fn high(&self) -> f64 {
        self.high
    }
    fn low(&self) -> f64 {
        self.low
    }
    fn start_bar(&self) -> usize {
        self.start_bar
    }
    fn end_bar(&self) -> usize {
        self.end_bar
    }
}

// ============================================================
// BUILDER
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrokeBuilder {
    /// Minimum merged bars strictly between stroke endpoints
    pub min_gap: usize,
}

impl Default for StrokeBuilder {
    fn default() -> Self {
        Self {
            min_gap: DEFAULT_MIN_GAP,
        }
    }
}

impl StrokeBuilder {
    /// Raw bars needed before a single stroke is possible
    pub fn min_bars(&self) -> usize {
        self.min_gap + 4
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_gap == 0 {
            return Err(ChanError::InvalidConfig(
                "stroke.min_gap must be at least 1".into(),
            ));
        }
        self.validate_params()
    }

    /// Whether `a` (earlier) and `b` (later) may be joined into a stroke
    pub fn valid_pair(&self, merged: &[MergedBar], a: &Fractal, b: &Fractal) -> bool {
        if a.kind == b.kind || b.index <= a.index {
            return false;
        }
        if b.index - a.index - 1 < self.min_gap {
            return false;
        }
        let (low, high) = match a.kind {
            FractalKind::Bottom => (a.price, b.price),
            FractalKind::Top => (b.price, a.price),
        };
        if low >= high {
            return false;
        }
        merged[a.index + 1..b.index]
            .iter()
            .all(|m| m.high <= high && m.low >= low)
    }

    /// Build the endpoint chain over all fractals
    pub fn confirm(&self, fractals: &[Fractal], merged: &[MergedBar]) -> Vec<Fractal> {
        self.confirm_from(fractals, merged, AlternatingChain::new())
            .into_points()
    }

    /// Offer `chain` the fractals it has not seen yet. Offers are keyed by
    /// fractal id, so after earlier fractals change the chain is rewound
    /// to the first changed id before calling this.
    pub fn confirm_from(
        &self,
        fractals: &[Fractal],
        merged: &[MergedBar],
        mut chain: AlternatingChain<Fractal>,
    ) -> AlternatingChain<Fractal> {
        for fractal in fractals.iter().skip(chain.next_key()) {
            let update = chain.offer(fractal.id.0, *fractal, |a, b| self.valid_pair(merged, a, b));
            if update == ChainUpdate::Retracted {
                tracing::trace!(fractal = fractal.id.0, "stroke endpoint retracted");
            }
        }
        chain
    }

    pub fn strokes(&self, chain: &[Fractal], merged: &[MergedBar]) -> Vec<Stroke> {
        self.strokes_from(chain, merged, Vec::new())
    }

    /// Extend `kept`, strokes still valid for `chain`, to cover the whole chain.
    pub fn strokes_from(
        &self,
        chain: &[Fractal],
        merged: &[MergedBar],
        mut kept: Vec<Stroke>,
    ) -> Vec<Stroke> {
        for k in kept.len()..chain.len().saturating_sub(1) {
            kept.push(make_stroke(StrokeId(k), &chain[k], &chain[k + 1], merged));
        }
        kept
    }

    /// Fractals to strokes in one call
    pub fn build(&self, fractals: &[Fractal], merged: &[MergedBar]) -> Vec<Stroke> {
        let chain = self.confirm(fractals, merged);
        self.strokes(&chain, merged)
    }
}

fn make_stroke(id: StrokeId, a: &Fractal, b: &Fractal, merged: &[MergedBar]) -> Stroke {
    let span = &merged[a.index..=b.index];
    let high = span.iter().map(|m| m.high).fold(f64::NEG_INFINITY, f64::max);
    let low = span.iter().map(|m| m.low).fold(f64::INFINITY, f64::min);
    Stroke {
        id,
        direction: match a.kind {
            FractalKind::Bottom => Direction::Up,
            FractalKind::Top => Direction::Down,
        },
        start: a.id,
        end: b.id,
        start_index: a.index,
        end_index: b.index,
        bar_count: b.index - a.index - 1,
        start_bar: a.bar_index,
        end_bar: b.bar_index,
        start_price: a.price,
        end_price: b.price,
        high,
        low,
        start_time: a.timestamp,
        end_time: b.timestamp,
    }
}

static STROKE_PARAMS: &[ParamMeta] = &[ParamMeta::period(
    "min_gap",
    DEFAULT_MIN_GAP as f64,
    (1.0, 10.0, 1.0),
    "Merged bars required strictly between stroke endpoints",
)];

impl Parameterized for StrokeBuilder {
    fn param_meta() -> &'static [ParamMeta] {
        STROKE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            min_gap: get_period(params, "min_gap", DEFAULT_MIN_GAP)?.get(),
        })
    }

    fn stage_name() -> &'static str {
        "stroke"
    }

    fn param_values(&self) -> Vec<(&'static str, f64)> {
        vec![("min_gap", self.min_gap as f64)]
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::fractal::FractalDetector;
    use crate::stages::merge::BarMerger;
    use crate::Bar;
    use chrono::TimeZone;

    fn merged(ranges: &[(f64, f64)]) -> Vec<MergedBar> {
        let bars: Vec<Bar> = ranges
            .iter()
            .enumerate()
            .map(|(i, &(h, l))| {
                let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
                Bar::new("S", i as u64, ts, l, h, l, h, 1.0)
            })
            .collect();
        BarMerger.merge(&bars)
    }

    /// Zig-zag of unit-step bars: each leg runs `leg` bars.
    fn zigzag(legs: usize, leg: usize) -> Vec<(f64, f64)> {
        let mut out = Vec::new();
        let mut h = 20.0;
        out.push((h, h - 2.0));
        for k in 0..legs {
            let step = if k % 2 == 0 { -1.0 } else { 1.0 };
            for _ in 0..leg {
                h += step;
                out.push((h, h - 2.0));
            }
        }
        out
    }

    #[test]
    fn test_v_shape_gives_one_up_stroke() {
        let m = merged(&zigzag(2, 5));
        let f = FractalDetector.detect(&m);
        let strokes = StrokeBuilder::default().build(&f, &m);
        assert_eq!(strokes.len(), 0, "only a bottom fractal, no top after it");

        let mut ranges = zigzag(2, 5);
        ranges.push((19.0, 17.0));
        let m = merged(&ranges);
        let f = FractalDetector.detect(&m);
        let strokes = StrokeBuilder::default().build(&f, &m);
        assert_eq!(strokes.len(), 1);
        assert_eq!(strokes[0].direction, Direction::Up);
        assert_eq!(strokes[0].bar_count, 4);
        assert_eq!((strokes[0].low, strokes[0].high), (13.0, 20.0));
    }

    #[test]
    fn test_short_legs_rejected() {
        let m = merged(&zigzag(4, 3));
        let f = FractalDetector.detect(&m);
        assert!(f.len() >= 2);
        let strokes = StrokeBuilder::default().build(&f, &m);
        assert!(strokes.is_empty());

        let loose = StrokeBuilder { min_gap: 2 };
        let strokes = loose.build(&f, &m);
        assert!(!strokes.is_empty());
        assert!(strokes.iter().all(|s| s.bar_count >= 2));
    }

    #[test]
    fn test_strokes_alternate_and_share_endpoints() {
        let m = merged(&zigzag(6, 6));
        let f = FractalDetector.detect(&m);
        let strokes = StrokeBuilder::default().build(&f, &m);
        assert_eq!(strokes.len(), 4);
        for w in strokes.windows(2) {
            assert_ne!(w[0].direction, w[1].direction);
            assert_eq!(w[0].end, w[1].start);
        }
    }

    #[test]
    fn test_resume_matches_full() {
        let m = merged(&zigzag(6, 6));
        let f = FractalDetector.detect(&m);
        let builder = StrokeBuilder::default();
        let full = builder.confirm_from(&f, &m, AlternatingChain::new());
        for stable in 0..=f.len() {
            let mut chain = full.clone();
            chain.rewind(stable);
            assert_eq!(builder.confirm_from(&f, &m, chain), full, "rewound to {stable}");
        }
    }

    #[test]
    fn test_endpoints_bound_every_stroke() {
        // a fall, a two-bar bounce, a deeper fall and a rally
        let mut ranges = zigzag(1, 5);
        let mut h = ranges[ranges.len() - 1].0;
        let steps = [-1.0; 7].into_iter().chain([1.0; 2]).chain([-1.0; 8]).chain([1.0; 8]);
        for step in steps {
            h += step;
            ranges.push((h, h - 2.0));
        }
        let m = merged(&ranges);
        let f = FractalDetector.detect(&m);
        for min_gap in 1..=5 {
            let strokes = StrokeBuilder { min_gap }.build(&f, &m);
            for s in &strokes {
                assert_eq!(s.high, s.start_price.max(s.end_price), "min_gap {min_gap}");
                assert_eq!(s.low, s.start_price.min(s.end_price), "min_gap {min_gap}");
            }
        }
    }

    #[test]
    fn test_validate_and_params() {
        assert!(StrokeBuilder { min_gap: 0 }.validate().is_err());
        assert!(StrokeBuilder::default().validate().is_ok());
        let mut p = HashMap::new();
        p.insert("min_gap", 6.0);
        assert_eq!(StrokeBuilder::with_params(&p).unwrap().min_gap, 6);
        assert_eq!(StrokeBuilder::default().min_bars(), 8);
    }
}

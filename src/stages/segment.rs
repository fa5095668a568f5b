//! Segment construction from stroke endpoints
//!
//! The stroke chain `p_0..p_m` is scanned for feature-sequence turning
//! points. For a top at `p_j` the feature elements are the down strokes
//! around it; `p_j` is a segment top when it is higher than the tops two
//! strokes either side. If the first and second feature elements leave a
//! gap (`p_{j+1} > p_{j-2}`) the turn is only accepted once the following
//! down move makes a lower low (`p_{j+3} < p_{j+1}`). Bottoms mirror this.
//!
//! Accepted turning points feed the same alternating chain used for
//! strokes, so a later, more extreme point retracts a provisional segment
//! end. A retraction is only kept when the point it leaves behind still
//! bounds every stroke endpoint in between.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fractal::Fractal;
use super::helpers::{AlternatingChain, ChainUpdate, Span, TurningPoint};
use super::stroke::Stroke;
use crate::params::{get_period, ParamMeta, Parameterized};
use crate::{ChanError, Direction, FractalId, FractalKind, Result, SegmentId, StrokeId};

pub const DEFAULT_MIN_STROKES: usize = 3;

/// A segment boundary: position `point` in the stroke chain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentPoint {
    pub point: usize,
    pub fractal: Fractal,
}

impl TurningPoint for SegmentPoint {
    #[inline]
    fn kind(&self) -> FractalKind {
        self.fractal.kind
    }

    #[inline]
    fn price(&self) -> f64 {
        self.fractal.price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub direction: Direction,
    pub first_stroke: StrokeId,
    pub last_stroke: StrokeId,
    pub stroke_count: usize,
    pub start: FractalId,
    pub end: FractalId,
    pub start_price: f64,
    pub end_price: f64,
    pub high: f64,
    pub low: f64,
    pub start_bar: usize,
    pub end_bar: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Segment {
    #[inline]
    pub fn covers(&self, stroke: StrokeId) -> bool {
        self.first_stroke <= stroke && stroke <= self.last_stroke
    }
}

impl Span for Segment {
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
pub struct SegmentBuilder {
    /// Minimum strokes per segment (odd)
    pub min_strokes: usize,
}

impl Default for SegmentBuilder {
    fn default() -> Self {
        Self {
            min_strokes: DEFAULT_MIN_STROKES,
        }
    }
}

impl SegmentBuilder {
    pub fn validate(&self) -> Result<()> {
        if self.min_strokes < 3 || self.min_strokes % 2 == 0 {
            return Err(ChanError::InvalidConfig(format!(
                "segment.min_strokes must be odd and >= 3, got {}",
                self.min_strokes
            )));
        }
        self.validate_params()
    }

    /// Whether stroke-chain position `j` is a segment-level turning point
    pub fn is_turn(&self, points: &[Fractal], j: usize) -> bool {
        if j < 2 || j + 2 >= points.len() {
            return false;
        }
        let p = |k: usize| points[k].price;
        match points[j].kind {
            FractalKind::Top => {
                if !(p(j) > p(j - 2) && p(j) > p(j + 2)) {
                    return false;
                }
                if p(j + 1) > p(j - 2) {
                    return j + 3 < points.len() && p(j + 3) < p(j + 1);
                }
                true
            }
            FractalKind::Bottom => {
                if !(p(j) < p(j - 2) && p(j) < p(j + 2)) {
                    return false;
                }
                if p(j + 1) < p(j - 2) {
                    return j + 3 < points.len() && p(j + 3) > p(j + 1);
                }
                true
            }
        }
    }

    /// Whether two turning points may bound a segment
    pub fn valid_pair(&self, points: &[Fractal], a: &SegmentPoint, b: &SegmentPoint) -> bool {
        if b.point < a.point + self.min_strokes || a.kind() == b.kind() {
            return false;
        }
        let (low, high) = match a.kind() {
            FractalKind::Bottom => (a.price(), b.price()),
            FractalKind::Top => (b.price(), a.price()),
        };
        if low >= high {
            return false;
        }
        points[a.point + 1..b.point]
            .iter()
            .all(|f| f.price <= high && f.price >= low)
    }

    pub fn build(&self, points: &[Fractal]) -> Vec<SegmentPoint> {
        self.points_from(points, AlternatingChain::new()).into_points()
    }

    /// Continue the segment chain over stroke-chain positions it has not
    /// examined yet. Offers are keyed by position in `points`, the stroke
    /// chain; rewind to [`resume_point`](Self::resume_point) first when
    /// earlier positions changed.
    pub fn points_from(
        &self,
        points: &[Fractal],
        mut chain: AlternatingChain<SegmentPoint>,
    ) -> AlternatingChain<SegmentPoint> {
        for j in chain.next_key()..points.len() {
            if j != 0 && !self.is_turn(points, j) {
                continue;
            }
            let candidate = SegmentPoint {
                point: j,
                fractal: points[j],
            };
            let update = chain.offer(j, candidate, |a, b| self.valid_pair(points, a, b));
            if update == ChainUpdate::Retracted {
                tracing::trace!(point = j, "segment boundary retracted");
            }
        }
        chain
    }

    /// First stroke-chain position whose turn decision may differ when
    /// only the first `stable_points` positions are unchanged. A turn at
    /// `j` looks three points ahead.
    pub fn resume_point(stable_points: usize) -> usize {
        stable_points.saturating_sub(3)
    }

    pub fn segments(&self, chain: &[SegmentPoint], strokes: &[Stroke]) -> Vec<Segment> {
        self.segments_from(chain, strokes, Vec::new())
    }

    pub fn segments_from(
        &self,
        chain: &[SegmentPoint],
        strokes: &[Stroke],
        mut kept: Vec<Segment>,
    ) -> Vec<Segment> {
        for k in kept.len()..chain.len().saturating_sub(1) {
            kept.push(make_segment(SegmentId(k), &chain[k], &chain[k + 1], strokes));
        }
        kept
    }
}

fn make_segment(id: SegmentId, a: &SegmentPoint, b: &SegmentPoint, strokes: &[Stroke]) -> Segment {
    let members = &strokes[a.point..b.point];
    let high = members.iter().map(|s| s.high).fold(f64::NEG_INFINITY, f64::max);
    let low = members.iter().map(|s| s.low).fold(f64::INFINITY, f64::min);
    Segment {
        id,
        direction: match a.kind() {
            FractalKind::Bottom => Direction::Up,
            FractalKind::Top => Direction::Down,
        },
        first_stroke: StrokeId(a.point),
        last_stroke: StrokeId(b.point - 1),
        stroke_count: b.point - a.point,
        start: a.fractal.id,
        end: b.fractal.id,
        start_price: a.price(),
        end_price: b.price(),
        high,
        low,
        start_bar: a.fractal.bar_index,
        end_bar: b.fractal.bar_index,
        start_time: a.fractal.timestamp,
        end_time: b.fractal.timestamp,
    }
}

static SEGMENT_PARAMS: &[ParamMeta] = &[ParamMeta::period(
    "min_strokes",
    DEFAULT_MIN_STROKES as f64,
    (3.0, 9.0, 2.0),
    "Minimum strokes making up one segment",
)];

impl Parameterized for SegmentBuilder {
    fn param_meta() -> &'static [ParamMeta] {
        SEGMENT_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let builder = Self {
            min_strokes: get_period(params, "min_strokes", DEFAULT_MIN_STROKES)?.get(),
        };
        builder.validate()?;
        Ok(builder)
    }

    fn stage_name() -> &'static str {
        "segment"
    }

    fn param_values(&self) -> Vec<(&'static str, f64)> {
        vec![("min_strokes", self.min_strokes as f64)]
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Stroke chain from alternating prices, starting with a bottom.
    fn points(prices: &[f64]) -> Vec<Fractal> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Fractal {
                id: FractalId(i),
                kind: if i % 2 == 0 {
                    FractalKind::Bottom
                } else {
                    FractalKind::Top
                },
                index: i * 6,
                bar_index: i * 6,
                price: p,
                high: p + 1.0,
                low: p - 1.0,
                timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 3600, 0).unwrap(),
                confirmed: true,
            })
            .collect()
    }

    fn strokes_for(points: &[Fractal]) -> Vec<Stroke> {
        points
            .windows(2)
            .enumerate()
            .map(|(k, w)| Stroke {
                id: StrokeId(k),
                direction: if w[0].kind == FractalKind::Bottom {
                    Direction::Up
                } else {
                    Direction::Down
                },
                start: w[0].id,
                end: w[1].id,
                start_index: w[0].index,
                end_index: w[1].index,
                bar_count: w[1].index - w[0].index - 1,
                start_bar: w[0].bar_index,
                end_bar: w[1].bar_index,
                start_price: w[0].price,
                end_price: w[1].price,
                high: w[0].price.max(w[1].price),
                low: w[0].price.min(w[1].price),
                start_time: w[0].timestamp,
                end_time: w[1].timestamp,
            })
            .collect()
    }

    // rising staircase to 20, then a falling staircase
    const UP_THEN_DOWN: [f64; 12] = [10.0, 14.0, 12.0, 16.0, 14.0, 20.0, 15.0, 17.0, 13.0, 15.0, 11.0, 12.0];

    #[test]
    fn test_up_then_down_segment() {
        let pts = points(&UP_THEN_DOWN);
        let builder = SegmentBuilder::default();
        assert!(builder.is_turn(&pts, 5));
        let chain = builder.build(&pts);
        assert_eq!(chain.iter().map(|g| g.point).collect::<Vec<_>>(), vec![0, 5]);

        let segs = builder.segments(&chain, &strokes_for(&pts));
        assert_eq!(segs.len(), 1);
        let s = &segs[0];
        assert_eq!(s.direction, Direction::Up);
        assert_eq!(s.stroke_count, 5);
        assert_eq!((s.first_stroke, s.last_stroke), (StrokeId(0), StrokeId(4)));
        assert_eq!((s.low, s.high), (10.0, 20.0));
    }

    #[test]
    fn test_gap_needs_second_confirmation() {
        // top at 5 with a gap: p6 = 17 > p3 = 16
        let pts = points(&[10.0, 14.0, 12.0, 16.0, 14.0, 20.0, 17.0, 18.0]);
        let builder = SegmentBuilder::default();
        assert!(!builder.is_turn(&pts, 5), "p8 is missing");

        let pts = points(&[10.0, 14.0, 12.0, 16.0, 14.0, 20.0, 17.0, 18.0, 16.0, 17.0]);
        assert!(builder.is_turn(&pts, 5));
    }

    #[test]
    fn test_higher_top_moves_provisional_end() {
        // segment top at 5, then a higher segment top at 9
        let pts = points(&[10.0, 14.0, 12.0, 16.0, 14.0, 20.0, 15.0, 17.0, 16.0, 22.0, 18.0, 21.0, 17.0]);
        let builder = SegmentBuilder::default();
        let chain = builder.build(&pts);
        let ends: Vec<_> = chain.iter().map(|g| g.point).collect();
        assert_eq!(ends, vec![0, 9]);
    }

    #[test]
    fn test_too_few_points() {
        let pts = points(&[10.0, 14.0, 12.0]);
        let builder = SegmentBuilder::default();
        let chain = builder.build(&pts);
        assert_eq!(chain.len(), 1);
        assert!(builder.segments(&chain, &strokes_for(&pts)).is_empty());
        assert!(builder.build(&[]).is_empty());
    }

    #[test]
    fn test_resume_matches_full() {
        let pts = points(&UP_THEN_DOWN);
        let builder = SegmentBuilder::default();
        let full = builder.points_from(&pts, AlternatingChain::new());
        for stable in 0..=pts.len() {
            let mut chain = full.clone();
            chain.rewind(SegmentBuilder::resume_point(stable));
            assert_eq!(builder.points_from(&pts, chain), full);
        }
    }

    #[test]
    fn test_boundaries_bound_intervening_points() {
        // segment top at 5 (20), a fall to 8 below the start, then a
        // higher top at 9, too close to the 8 to pair with it. Moving the
        // first segment's end to 9 would put the 8 inside it.
        let pts = points(&[10.0, 14.0, 12.0, 16.0, 14.0, 20.0, 11.0, 13.0, 8.0, 22.0, 15.0, 18.0, 14.0, 16.0, 12.0]);
        let builder = SegmentBuilder::default();
        assert!(builder.is_turn(&pts, 9));
        let chain = builder.build(&pts);
        assert_eq!(chain.iter().map(|g| g.point).collect::<Vec<_>>(), vec![0, 5, 8]);
        for w in chain.windows(2) {
            assert!(builder.valid_pair(&pts, &w[0], &w[1]));
        }
        let segs = builder.segments(&chain, &strokes_for(&pts));
        for s in &segs {
            assert_eq!(s.high, s.start_price.max(s.end_price));
            assert_eq!(s.low, s.start_price.min(s.end_price));
        }
    }

    #[test]
    fn test_validate() {
        assert!(SegmentBuilder { min_strokes: 4 }.validate().is_err());
        assert!(SegmentBuilder { min_strokes: 1 }.validate().is_err());
        assert!(SegmentBuilder { min_strokes: 5 }.validate().is_ok());
    }
}

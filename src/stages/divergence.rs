//! MACD-area divergence between comparable legs
//!
//! A leg's momentum is the histogram area over its raw-bar range, counted
//! on the side of its direction only (positive bars for up legs, negative
//! bars for down legs). The later of two same-direction legs diverges when
//! it reaches an equal or more extreme price with an area strictly below
//! `area_ratio` times the earlier one's.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::Span;
use super::hub::Hub;
use super::segment::Segment;
use super::stroke::Stroke;
use crate::params::{get_period, get_ratio, ParamMeta, Parameterized};
use crate::{ChanError, Direction, HubId, Level, Ratio, Result, SegmentId, StrokeId, StructureRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DivergenceKind {
    /// Up legs: higher price, weaker momentum
    Top,
    /// Down legs: lower price, weaker momentum
    Bottom,
}

/// Which pairing rule produced a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DivergenceOrigin {
    AdjacentStrokes,
    AdjacentSegments,
    /// Entering leg against exit leg of one closed hub
    HubBoundary { hub: HubId, level: Level },
}

/// A leg reduced to what the comparison needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    pub reference: StructureRef,
    pub direction: Direction,
    pub high: f64,
    pub low: f64,
    pub start_bar: usize,
    pub end_bar: usize,
}

impl Leg {
    pub fn of<S: Span>(reference: StructureRef, span: &S) -> Self {
        Self {
            reference,
            direction: span.direction(),
            high: span.high(),
            low: span.low(),
            start_bar: span.start_bar(),
            end_bar: span.end_bar(),
        }
    }

    #[inline]
    pub fn bar_count(&self) -> usize {
        (self.end_bar + 1).saturating_sub(self.start_bar)
    }

    #[inline]
    fn extreme(&self) -> f64 {
        match self.direction {
            Direction::Up => self.high,
            Direction::Down => self.low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivergenceSignal {
    pub kind: DivergenceKind,
    pub origin: DivergenceOrigin,
    pub first: StructureRef,
    pub second: StructureRef,
    pub area_first: f64,
    pub area_second: f64,
    pub price_first: f64,
    pub price_second: f64,
    pub is_divergent: bool,
}

// ============================================================
// ANALYZER
// ============================================================

pub const DEFAULT_AREA_RATIO: f64 = 1.0;
pub const DEFAULT_MIN_BARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceAnalyzer {
    /// Second area must be below `area_ratio * first area`
    pub area_ratio: Ratio,
    /// Legs spanning fewer raw bars are not compared
    pub min_bars: usize,
}

impl Default for DivergenceAnalyzer {
    fn default() -> Self {
        Self {
            area_ratio: Ratio::new_const(DEFAULT_AREA_RATIO),
            min_bars: DEFAULT_MIN_BARS,
        }
    }
}

impl DivergenceAnalyzer {
    pub fn validate(&self) -> Result<()> {
        if self.min_bars < 2 {
            return Err(ChanError::InvalidConfig(
                "divergence.min_bars must be at least 2".into(),
            ));
        }
        self.validate_params()
    }

    /// Directional histogram area of `leg`; `None` if the leg is too short
    /// or runs past the histogram.
    pub fn area(&self, leg: &Leg, hist: &[f64]) -> Option<f64> {
        if leg.bar_count() < self.min_bars || leg.end_bar >= hist.len() {
            return None;
        }
        let values = &hist[leg.start_bar..=leg.end_bar];
        let area = match leg.direction {
            Direction::Up => values.iter().map(|h| h.max(0.0)).sum(),
            Direction::Down => values.iter().map(|h| (-h).max(0.0)).sum(),
        };
        Some(area)
    }

    /// Compare an earlier and a later leg of the same direction
    pub fn compare(
        &self,
        first: &Leg,
        second: &Leg,
        hist: &[f64],
        origin: DivergenceOrigin,
    ) -> Option<DivergenceSignal> {
        if first.direction != second.direction {
            return None;
        }
        let area_first = self.area(first, hist)?;
        let area_second = self.area(second, hist)?;
        let (price_first, price_second) = (first.extreme(), second.extreme());

        let (kind, extended) = match first.direction {
            Direction::Up => (DivergenceKind::Top, price_second >= price_first),
            Direction::Down => (DivergenceKind::Bottom, price_second <= price_first),
        };
        let weaker = area_second < area_first * self.area_ratio.get();

        Some(DivergenceSignal {
            kind,
            origin,
            first: first.reference,
            second: second.reference,
            area_first,
            area_second,
            price_first,
            price_second,
            is_divergent: extended && weaker,
        })
    }

    /// Every comparable pair in a finished decomposition: strokes two apart,
    /// segments two apart, and the entering and exit legs of each closed
    /// hub when they run the same way.
    pub fn analyze(
        &self,
        strokes: &[Stroke],
        segments: &[Segment],
        hubs: &[Hub],
        hist: &[f64],
    ) -> Vec<DivergenceSignal> {
        let mut out = Vec::new();

        for i in 2..strokes.len() {
            let a = Leg::of(StructureRef::Stroke(StrokeId(i - 2)), &strokes[i - 2]);
            let b = Leg::of(StructureRef::Stroke(StrokeId(i)), &strokes[i]);
            out.extend(self.compare(&a, &b, hist, DivergenceOrigin::AdjacentStrokes));
        }

        for i in 2..segments.len() {
            let a = Leg::of(StructureRef::Segment(SegmentId(i - 2)), &segments[i - 2]);
            let b = Leg::of(StructureRef::Segment(SegmentId(i)), &segments[i]);
            out.extend(self.compare(&a, &b, hist, DivergenceOrigin::AdjacentSegments));
        }

        for hub in hubs {
            let (Some(enter), Some(exit)) = (hub.entering, hub.exit()) else {
                continue;
            };
            let origin = DivergenceOrigin::HubBoundary {
                hub: hub.id,
                level: hub.level,
            };
            let pair = match hub.level {
                Level::Stroke => strokes.get(enter).zip(strokes.get(exit)).map(|(a, b)| {
                    (
                        Leg::of(StructureRef::Stroke(StrokeId(enter)), a),
                        Leg::of(StructureRef::Stroke(StrokeId(exit)), b),
                    )
                }),
                Level::Segment => segments.get(enter).zip(segments.get(exit)).map(|(a, b)| {
                    (
                        Leg::of(StructureRef::Segment(SegmentId(enter)), a),
                        Leg::of(StructureRef::Segment(SegmentId(exit)), b),
                    )
                }),
            };
            if let Some((a, b)) = pair {
                out.extend(self.compare(&a, &b, hist, origin));
            }
        }
        out
    }
}

static DIVERGENCE_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio(
        "area_ratio",
        DEFAULT_AREA_RATIO,
        (0.5, 1.0, 0.05),
        "Later area must fall below this fraction of the earlier area",
    ),
    ParamMeta::period(
        "min_bars",
        DEFAULT_MIN_BARS as f64,
        (2.0, 20.0, 1.0),
        "Minimum raw bars in a compared leg",
    ),
];

impl Parameterized for DivergenceAnalyzer {
    fn param_meta() -> &'static [ParamMeta] {
        DIVERGENCE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let analyzer = Self {
            area_ratio: get_ratio(params, "area_ratio", DEFAULT_AREA_RATIO)?,
            min_bars: get_period(params, "min_bars", DEFAULT_MIN_BARS)?.get(),
        };
        analyzer.validate()?;
        Ok(analyzer)
    }

    fn stage_name() -> &'static str {
        "divergence"
    }

    fn param_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("area_ratio", self.area_ratio.get()),
            ("min_bars", self.min_bars as f64),
        ]
    }
}

// ============================================================
// TESTS
// ============================================================

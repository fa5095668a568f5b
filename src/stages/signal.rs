//! First, second and third class trade points
//!
//! Rules run over closed stroke-level hubs. With `x` the hub's exit stroke
//! (its last member, the one that carries price out of the hub range) and
//! `x + 1` its leaving stroke:
//!
//! - first: the entering stroke and `x` diverge; the point is the end of
//!   `x`, anchored at stroke `x + 1`.
//! - second: stroke `x + 2` pulls back without exceeding the first point.
//! - third: `x` breaks out of the hub and stroke `x + 1` pulls back
//!   without re-entering the hub range.
//!
//! A bar can carry at most one point per side; earlier classes win.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::divergence::{DivergenceKind, DivergenceOrigin, DivergenceSignal};
use super::hub::Hub;
use super::segment::Segment;
use super::stroke::Stroke;
use crate::{Direction, HubId, Level, SegmentId, StrokeId, StructureRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TradeClass {
    First,
    Second,
    Third,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradePoint {
    pub class: TradeClass,
    pub side: Side,
    pub anchor: StructureRef,
    pub hub: Option<HubId>,
    pub segment: Option<SegmentId>,
    /// Raw bar index of the point
    pub index: usize,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalClassifier;

impl SignalClassifier {
    pub fn classify(
        &self,
        strokes: &[Stroke],
        segments: &[Segment],
        hubs: &[Hub],
        divergences: &[DivergenceSignal],
    ) -> Vec<TradePoint> {
        let mut points = Vec::new();
        let firsts: Vec<_> = hubs
            .iter()
            .filter(|h| h.level == Level::Stroke)
            .filter_map(|h| first_point(h, strokes, divergences))
            .collect();

        points.extend(firsts.iter().map(|(p, _)| *p));
        points.extend(
            firsts
                .iter()
                .filter_map(|(p, exit)| second_point(p, *exit, strokes)),
        );
        points.extend(
            hubs.iter()
                .filter(|h| h.level == Level::Stroke)
                .filter_map(|h| third_point(h, strokes)),
        );

        let mut seen = std::collections::HashSet::new();
        points.retain(|p| seen.insert((p.side, p.index)));
        for p in &mut points {
            if let StructureRef::Stroke(s) = p.anchor {
                p.segment = segments.iter().find(|seg| seg.covers(s)).map(|seg| seg.id);
            }
        }
        points.sort_by(|a, b| (a.index, a.class, a.side).cmp(&(b.index, b.class, b.side)));
        points
    }
}

fn point_at(
    class: TradeClass,
    side: Side,
    hub: &Hub,
    end_of: &Stroke,
    anchor: usize,
) -> TradePoint {
    TradePoint {
        class,
        side,
        anchor: StructureRef::Stroke(StrokeId(anchor)),
        hub: Some(hub.id),
        segment: None,
        index: end_of.end_bar,
        price: end_of.end_price,
        timestamp: end_of.end_time,
    }
}

fn first_point(
    hub: &Hub,
    strokes: &[Stroke],
    divergences: &[DivergenceSignal],
) -> Option<(TradePoint, usize)> {
    let exit = hub.exit()?;
    let signal = divergences.iter().find(|d| {
        d.is_divergent
            && d.origin
                == DivergenceOrigin::HubBoundary {
                    hub: hub.id,
                    level: Level::Stroke,
                }
    })?;
    strokes.get(exit + 1)?;
    let side = match signal.kind {
        DivergenceKind::Bottom => Side::Buy,
        DivergenceKind::Top => Side::Sell,
    };
    let point = point_at(TradeClass::First, side, hub, strokes.get(exit)?, exit + 1);
    Some((point, exit))
}

fn second_point(first: &TradePoint, exit: usize, strokes: &[Stroke]) -> Option<TradePoint> {
    let pullback = strokes.get(exit + 2)?;
    let holds = match first.side {
        Side::Buy => pullback.end_price > first.price,
        Side::Sell => pullback.end_price < first.price,
    };
    if !holds {
        return None;
    }
    Some(TradePoint {
        class: TradeClass::Second,
        anchor: StructureRef::Stroke(StrokeId(exit + 2)),
        index: pullback.end_bar,
        price: pullback.end_price,
        timestamp: pullback.end_time,
        ..*first
    })
}

fn third_point(hub: &Hub, strokes: &[Stroke]) -> Option<TradePoint> {
    let exit = hub.exit()?;
    let breakout = strokes.get(exit)?;
    let pullback = strokes.get(exit + 1)?;
    let side = match breakout.direction {
        Direction::Up if breakout.high > hub.high && pullback.low > hub.high => Side::Buy,
        Direction::Down if breakout.low < hub.low && pullback.high < hub.low => Side::Sell,
        _ => return None,
    };
    Some(point_at(TradeClass::Third, side, hub, pullback, exit + 1))
}

// ============================================================
// TESTS
// ============================================================

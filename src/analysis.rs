//! Per-run output handed to report, chart and web collaborators
//!
//! Everything here is plain data. Consumers read it; nothing feeds back
//! into the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stages::{
    DivergenceSignal, Fractal, Hub, MergedBar, Segment, Side, Stroke, TradePoint,
};
use crate::{Direction, FractalKind, Frequency, Trend};

/// Full structural decomposition of one (symbol, frequency) series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub symbol: String,
    pub frequency: Frequency,
    pub bar_count: usize,
    pub merged_count: usize,
    pub merged_bars: Vec<MergedBar>,
    /// All fractal candidates; stroke endpoints are flagged `confirmed`
    pub fractals: Vec<Fractal>,
    pub strokes: Vec<Stroke>,
    pub segments: Vec<Segment>,
    /// Stroke-level hubs
    pub hubs: Vec<Hub>,
    pub segment_hubs: Vec<Hub>,
    pub divergences: Vec<DivergenceSignal>,
    pub trade_points: Vec<TradePoint>,
    /// Fewer bars than one stroke needs; the structure lists are empty
    pub insufficient_data: bool,
    pub summary: Summary,
}

impl Analysis {
    pub fn confirmed_fractals(&self) -> impl Iterator<Item = &Fractal> {
        self.fractals.iter().filter(|f| f.confirmed)
    }

    pub fn buy_points(&self) -> impl Iterator<Item = &TradePoint> {
        self.trade_points.iter().filter(|p| p.side == Side::Buy)
    }

    pub fn sell_points(&self) -> impl Iterator<Item = &TradePoint> {
        self.trade_points.iter().filter(|p| p.side == Side::Sell)
    }

    pub fn divergent_signals(&self) -> impl Iterator<Item = &DivergenceSignal> {
        self.divergences.iter().filter(|d| d.is_divergent)
    }
}

// ============================================================
// SUMMARY
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub latest_price: Option<f64>,
    pub latest_time: Option<DateTime<Utc>>,
    pub trend: Trend,
    pub latest_fractal: Option<FractalStatus>,
    pub strokes: StrokeStats,
    pub buy_points: usize,
    pub sell_points: usize,
}

/// Where the latest close sits relative to the most recent fractal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FractalStatus {
    pub kind: FractalKind,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    /// (close - fractal price) / fractal price, in percent
    pub distance_pct: f64,
    /// Close below a top, or above a bottom
    pub crossed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrokeStats {
    pub up_count: usize,
    pub down_count: usize,
    pub up_avg_pct: f64,
    pub down_avg_pct: f64,
    pub up_max_pct: f64,
    /// Largest decline, as a negative percentage
    pub down_max_pct: f64,
}

impl StrokeStats {
    pub fn from_strokes(strokes: &[Stroke]) -> Self {
        let mut stats = Self::default();
        let (mut up_sum, mut down_sum) = (0.0, 0.0);
        for s in strokes {
            let pct = s.change_pct();
            match s.direction {
                Direction::Up => {
                    stats.up_count += 1;
                    up_sum += pct;
                    stats.up_max_pct = stats.up_max_pct.max(pct);
                }
                Direction::Down => {
                    stats.down_count += 1;
                    down_sum += pct;
                    stats.down_max_pct = stats.down_max_pct.min(pct);
                }
            }
        }
        if stats.up_count > 0 {
            stats.up_avg_pct = up_sum / stats.up_count as f64;
        }
        if stats.down_count > 0 {
            stats.down_avg_pct = down_sum / stats.down_count as f64;
        }
        stats
    }
}

/// Trend from the last three strokes: more up strokes is bullish, more down
/// strokes bearish, anything else sideways.
pub fn trend_of(strokes: &[Stroke]) -> Trend {
    let recent = &strokes[strokes.len().saturating_sub(3)..];
    let up = recent.iter().filter(|s| s.direction == Direction::Up).count();
    let down = recent.len() - up;
    match up.cmp(&down) {
        std::cmp::Ordering::Greater => Trend::Bullish,
        std::cmp::Ordering::Less => Trend::Bearish,
        std::cmp::Ordering::Equal => Trend::Sideways,
    }
}

impl FractalStatus {
    pub fn new(fractal: &Fractal, close: f64) -> Self {
        let distance_pct = if fractal.price == 0.0 {
            0.0
        } else {
            (close - fractal.price) / fractal.price * 100.0
        };
        let crossed = match fractal.kind {
            FractalKind::Top => close < fractal.price,
            FractalKind::Bottom => close > fractal.price,
        };
        Self {
            kind: fractal.kind,
            price: fractal.price,
            timestamp: fractal.timestamp,
            distance_pct,
            crossed,
        }
    }
}

impl Summary {
    pub fn compute(
        latest: Option<(f64, DateTime<Utc>)>,
        fractals: &[Fractal],
        strokes: &[Stroke],
        trade_points: &[TradePoint],
    ) -> Self {
        Self {
            latest_price: latest.map(|(c, _)| c),
            latest_time: latest.map(|(_, t)| t),
            trend: trend_of(strokes),
            latest_fractal: latest
                .zip(fractals.last())
                .map(|((close, _), f)| FractalStatus::new(f, close)),
            strokes: StrokeStats::from_strokes(strokes),
            buy_points: trade_points.iter().filter(|p| p.side == Side::Buy).count(),
            sell_points: trade_points.iter().filter(|p| p.side == Side::Sell).count(),
        }
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FractalId, StrokeId};
    use chrono::TimeZone;

    fn stroke(k: usize, from: f64, to: f64) -> Stroke {
        let t = Utc.timestamp_opt(k as i64 * 60, 0).unwrap();
        Stroke {
            id: StrokeId(k),
            direction: if to > from { Direction::Up } else { Direction::Down },
            start: FractalId(k),
            end: FractalId(k + 1),
            start_index: k * 5,
            end_index: k * 5 + 5,
            bar_count: 4,
            start_bar: k * 5,
            end_bar: k * 5 + 5,
            start_price: from,
            end_price: to,
            high: from.max(to),
            low: from.min(to),
            start_time: t,
            end_time: t,
        }
    }

    #[test]
    fn test_trend_from_last_three() {
        let s = [stroke(0, 10.0, 12.0), stroke(1, 12.0, 11.0), stroke(2, 11.0, 13.0)];
        assert_eq!(trend_of(&s), Trend::Bullish);
        assert_eq!(trend_of(&s[1..]), Trend::Sideways);
        assert_eq!(trend_of(&s[1..2]), Trend::Bearish);
        assert_eq!(trend_of(&[]), Trend::Sideways);
    }

    #[test]
    fn test_stroke_stats() {
        let s = [stroke(0, 10.0, 12.0), stroke(1, 12.0, 9.0), stroke(2, 9.0, 9.9)];
        let stats = StrokeStats::from_strokes(&s);
        assert_eq!((stats.up_count, stats.down_count), (2, 1));
        assert!((stats.up_max_pct - 20.0).abs() < 1e-9);
        assert!((stats.up_avg_pct - 15.0).abs() < 1e-9);
        assert!((stats.down_max_pct + 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_fractal_status() {
        let f = Fractal {
            id: FractalId(0),
            kind: FractalKind::Top,
            index: 3,
            bar_index: 3,
            price: 20.0,
            high: 20.0,
            low: 18.0,
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            confirmed: true,
        };
        let status = FractalStatus::new(&f, 18.0);
        assert!(status.crossed);
        assert!((status.distance_pct + 10.0).abs() < 1e-9);
        assert!(!FractalStatus::new(&f, 21.0).crossed);
    }
}

//! # chanlun - Chan Theory structural decomposition
//!
//! Turns an ordered bar series into the layered structure used by Chan Theory
//! analysis: merged bars, fractals, strokes, segments, hubs, MACD divergence
//! and first/second/third class trade points.
//!
//! ## Quick Start
//!
//! ```rust
//! use chanlun::prelude::*;
//! use chrono::{TimeZone, Utc};
//!
//! let closes = [10.0, 11.0, 12.0, 11.5, 10.5, 9.8, 10.4, 11.2, 12.5, 13.0];
//! let bars: Vec<Bar> = closes
//!     .iter()
//!     .enumerate()
//!     .map(|(i, &c)| {
//!         let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 86_400, 0).unwrap();
//!         Bar::new("DEMO", i as u64, ts, c, c + 0.3, c - 0.3, c, 1_000.0)
//!     })
//!     .collect();
//!
//! let engine = EngineBuilder::new().build().unwrap();
//! let analysis = engine.analyze("DEMO", Frequency::Day, &bars).unwrap();
//! assert_eq!(analysis.bar_count, 10);
//! ```

pub mod analysis;
pub mod config;
pub mod engine;
pub mod logging;
pub mod params;
pub mod stages;

pub mod prelude {
    pub use crate::{
        // Output
        analysis::{Analysis, FractalStatus, StrokeStats, Summary},
        // Config
        config::{ChanConfig, EngineSection, LogConfig},
        // Engine
        engine::{
            analyze_parallel, BatchFailure, BatchReport, Checkpoint, ChanEngine, Deadline,
            EngineBuilder, IncrementalAnalyzer,
        },
        // Parameters
        params::{get_period, get_ratio, ParamMeta, ParamType, Parameterized},
        // Stages
        stages::*,
        // Core types
        Bar,
        // Errors
        ChanError,
        Direction,
        FractalId,
        FractalKind,
        Frequency,
        FrequencyProfile,
        HubId,
        Level,
        MergedBarId,
        OHLCVExt,
        Period,
        Ratio,
        Result,
        SegmentId,
        StrokeId,
        StructureRef,
        Trend,
        OHLCV,
    };
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, ChanError>;

/// Errors surfaced by the decomposition engine.
///
/// Stage-level corrections (stroke or segment retraction) are handled
/// internally and never appear here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChanError {
    #[error("Invalid sequence at bar {index}: {reason}")]
    InvalidSequence { index: usize, reason: &'static str },

    #[error("Invalid numeric value at bar {index}: {reason}")]
    NumericInvalid { index: usize, reason: &'static str },

    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Config load failed: {0}")]
    Config(String),

    #[error("{symbol}: run exceeded {limit_ms} ms during {stage}")]
    Timeout {
        symbol: String,
        stage: &'static str,
        limit_ms: u64,
    },

    #[error("Worker pool: {0}")]
    ThreadPool(String),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(ChanError::InvalidValue("Ratio cannot be NaN or infinite"));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(ChanError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(ChanError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Input bar contract. Anything that can report prices and a timestamp
/// can be fed to the engine.
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;
    fn timestamp(&self) -> DateTime<Utc>;

    /// Traded value. Sources without it report zero.
    fn amount(&self) -> f64 {
        0.0
    }

    /// Position in the source series, when the source tracks one.
    /// Present indices must be gap-free.
    fn sequence_index(&self) -> Option<u64> {
        None
    }
}

impl<T: OHLCV + ?Sized> OHLCV for &T {
    fn open(&self) -> f64 {
        (**self).open()
    }

    fn high(&self) -> f64 {
        (**self).high()
    }

    fn low(&self) -> f64 {
        (**self).low()
    }

    fn close(&self) -> f64 {
        (**self).close()
    }

    fn volume(&self) -> f64 {
        (**self).volume()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        (**self).timestamp()
    }

    fn amount(&self) -> f64 {
        (**self).amount()
    }

    fn sequence_index(&self) -> Option<u64> {
        (**self).sequence_index()
    }
}

/// Extension trait with computed properties and validation
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// True when `other`'s [low, high] lies inside this bar's range (inclusive)
    #[inline]
    fn contains_range(&self, high: f64, low: f64) -> bool {
        self.high() >= high && self.low() <= low
    }

    /// Check a single bar's numeric fields. `index` is reported in the error.
    fn validate_at(&self, index: usize) -> Result<()> {
        let fields = [
            self.open(),
            self.high(),
            self.low(),
            self.close(),
            self.volume(),
            self.amount(),
        ];
        if fields.iter().any(|v| v.is_nan()) {
            return Err(ChanError::NumericInvalid {
                index,
                reason: "NaN in bar",
            });
        }
        if fields.iter().any(|v| v.is_infinite()) {
            return Err(ChanError::NumericInvalid {
                index,
                reason: "infinite value in bar",
            });
        }
        if fields.iter().any(|v| *v < 0.0) {
            return Err(ChanError::NumericInvalid {
                index,
                reason: "negative price, volume or amount",
            });
        }
        if self.high() < self.low() {
            return Err(ChanError::NumericInvalid {
                index,
                reason: "high < low",
            });
        }
        Ok(())
    }

    /// Check that this bar may directly follow `prev`.
    fn validate_after<P: OHLCV + ?Sized>(&self, prev: &P, index: usize) -> Result<()> {
        if self.timestamp() <= prev.timestamp() {
            return Err(ChanError::InvalidSequence {
                index,
                reason: "timestamps must be strictly increasing",
            });
        }
        match (prev.sequence_index(), self.sequence_index()) {
            (Some(a), Some(b)) if a.checked_add(1) != Some(b) => {
                Err(ChanError::InvalidSequence {
                    index,
                    reason: "sequence index gap",
                })
            }
            (Some(_), None) | (None, Some(_)) => Err(ChanError::InvalidSequence {
                index,
                reason: "sequence index present on only some bars",
            }),
            _ => Ok(()),
        }
    }
}

impl<T: OHLCV + ?Sized> OHLCVExt for T {}

/// Validate a whole series: per-bar numerics, then ordering.
pub fn validate_bars<T: OHLCV>(bars: &[T]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate_at(i)?;
        if i > 0 {
            bar.validate_after(&bars[i - 1], i)?;
        }
    }
    Ok(())
}

// ============================================================
// BAR
// ============================================================

/// Concrete bar record supplied by data collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub sequence_index: u64,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: f64,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        sequence_index: u64,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            sequence_index,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            amount: 0.0,
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }
}

impl OHLCV for Bar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn amount(&self) -> f64 {
        self.amount
    }

    fn sequence_index(&self) -> Option<u64> {
        Some(self.sequence_index)
    }
}

// ============================================================
// FREQUENCY
// ============================================================

/// Bar frequency. The set is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[default]
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "1wk")]
    Week,
    #[serde(rename = "1mo")]
    Month,
}

/// Lookback defaults attached to a frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrequencyProfile {
    pub name: &'static str,
    pub default_days: u32,
    pub max_days: u32,
    pub min_bars: usize,
    pub recommended_bars: usize,
}

impl Frequency {
    pub const ALL: [Frequency; 6] = [
        Frequency::Min15,
        Frequency::Min30,
        Frequency::Hour1,
        Frequency::Day,
        Frequency::Week,
        Frequency::Month,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Min15 => "15m",
            Frequency::Min30 => "30m",
            Frequency::Hour1 => "1h",
            Frequency::Day => "1d",
            Frequency::Week => "1wk",
            Frequency::Month => "1mo",
        }
    }

    pub fn profile(self) -> FrequencyProfile {
        let (name, default_days, max_days, min_bars, recommended_bars) = match self {
            Frequency::Min15 => ("15 minute", 30, 60, 50, 200),
            Frequency::Min30 => ("30 minute", 60, 120, 50, 150),
            Frequency::Hour1 => ("1 hour", 120, 240, 50, 120),
            Frequency::Day => ("daily", 365, 1095, 30, 250),
            Frequency::Week => ("weekly", 1095, 1825, 20, 100),
            Frequency::Month => ("monthly", 1825, 3650, 12, 60),
        };
        FrequencyProfile {
            name,
            default_days,
            max_days,
            min_bars,
            recommended_bars,
        }
    }

    /// Display order, finest first
    pub fn priority(self) -> u8 {
        match self {
            Frequency::Min15 => 1,
            Frequency::Min30 => 2,
            Frequency::Hour1 => 3,
            Frequency::Day => 4,
            Frequency::Week => 5,
            Frequency::Month => 6,
        }
    }

    #[inline]
    pub fn is_intraday(self) -> bool {
        matches!(self, Frequency::Min15 | Frequency::Min30 | Frequency::Hour1)
    }

    #[inline]
    pub fn is_daily(self) -> bool {
        self == Frequency::Day
    }

    #[inline]
    pub fn is_weekly_monthly(self) -> bool {
        matches!(self, Frequency::Week | Frequency::Month)
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = ChanError;

    fn from_str(s: &str) -> Result<Self> {
        Frequency::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ChanError::InvalidConfig(format!("unknown frequency '{s}'")))
    }
}

// ============================================================
// DIRECTION / KIND / TREND
// ============================================================

/// Direction of a merged bar, stroke or segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    #[inline]
    pub fn is_up(self) -> bool {
        matches!(self, Direction::Up)
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Fractal kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FractalKind {
    Top,
    Bottom,
}

impl FractalKind {
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            FractalKind::Top => FractalKind::Bottom,
            FractalKind::Bottom => FractalKind::Top,
        }
    }

    /// True when `candidate` is at least as extreme as `current` for this kind
    #[inline]
    pub fn at_least_as_extreme(self, candidate: f64, current: f64) -> bool {
        match self {
            FractalKind::Top => candidate >= current,
            FractalKind::Bottom => candidate <= current,
        }
    }
}

/// Trend classification of the latest strokes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    #[default]
    Sideways,
    Bearish,
}

/// Which structure a hub or divergence is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Stroke,
    Segment,
}

// ============================================================
// ARENA IDS
// ============================================================

macro_rules! arena_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub usize);

            impl $name {
                #[inline]
                pub fn index(self) -> usize {
                    self.0
                }
            }
        )*
    };
}

arena_id!(
    /// Position in the merged-bar sequence
    MergedBarId,
    /// Position in the fractal list
    FractalId,
    /// Position in the stroke list
    StrokeId,
    /// Position in the segment list
    SegmentId,
    /// Position in a hub list
    HubId,
);

/// Lookup reference to a structure produced by an earlier stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureRef {
    Stroke(StrokeId),
    Segment(SegmentId),
    Hub(HubId),
}

impl StructureRef {
    pub fn member(level: Level, index: usize) -> Self {
        match level {
            Level::Stroke => StructureRef::Stroke(StrokeId(index)),
            Level::Segment => StructureRef::Segment(SegmentId(index)),
        }
    }
}

// ============================================================
// TESTS
// ============================================================

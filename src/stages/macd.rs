//! MACD oscillator used as the momentum measure for divergence
//!
//! EMAs use `alpha = 2 / (period + 1)` and are seeded with the first input.
//! The histogram is `dif - dea`. State is kept explicitly so appending bars
//! extends the series with exactly the values a full run would produce.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::params::{get_period, ParamMeta, Parameterized};
use crate::{ChanError, Period, Result};

/// Streaming exponential moving average
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: Period) -> Self {
        Self {
            alpha: 2.0 / (period.get() as f64 + 1.0),
            value: None,
        }
    }

    pub fn push(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
            None => x,
        };
        self.value = Some(next);
        next
    }

    #[inline]
    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdPoint {
    pub dif: f64,
    pub dea: f64,
    pub hist: f64,
}

/// Running EMAs behind a MACD series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdState {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl MacdState {
    pub fn push(&mut self, close: f64) -> MacdPoint {
        let dif = self.fast.push(close) - self.slow.push(close);
        let dea = self.signal.push(dif);
        MacdPoint {
            dif,
            dea,
            hist: dif - dea,
        }
    }
}

/// Column-wise MACD output, one entry per raw bar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacdSeries {
    pub dif: Vec<f64>,
    pub dea: Vec<f64>,
    pub hist: Vec<f64>,
}

impl MacdSeries {
    #[inline]
    pub fn len(&self) -> usize {
        self.hist.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    pub fn push(&mut self, point: MacdPoint) {
        self.dif.push(point.dif);
        self.dea.push(point.dea);
        self.hist.push(point.hist);
    }
}

// ============================================================
// CONFIG
// ============================================================

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Macd {
    pub fast: Period,
    pub slow: Period,
    pub signal: Period,
}

impl Default for Macd {
    fn default() -> Self {
        Self {
            fast: Period::new_const(DEFAULT_FAST),
            slow: Period::new_const(DEFAULT_SLOW),
            signal: Period::new_const(DEFAULT_SIGNAL),
        }
    }
}

impl Macd {
    pub fn validate(&self) -> Result<()> {
        if self.fast >= self.slow {
            return Err(ChanError::InvalidConfig(format!(
                "macd.fast ({}) must be below macd.slow ({})",
                self.fast.get(),
                self.slow.get()
            )));
        }
        self.validate_params()
    }

    pub fn state(&self) -> MacdState {
        MacdState {
            fast: Ema::new(self.fast),
            slow: Ema::new(self.slow),
            signal: Ema::new(self.signal),
        }
    }

    pub fn compute(&self, closes: &[f64]) -> MacdSeries {
        let mut state = self.state();
        let mut series = MacdSeries::default();
        for &c in closes {
            series.push(state.push(c));
        }
        series
    }
}

static MACD_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("fast", DEFAULT_FAST as f64, (2.0, 50.0, 1.0), "Fast EMA period"),
    ParamMeta::period("slow", DEFAULT_SLOW as f64, (5.0, 100.0, 1.0), "Slow EMA period"),
    ParamMeta::period("signal", DEFAULT_SIGNAL as f64, (2.0, 30.0, 1.0), "Signal EMA period over DIF"),
];

impl Parameterized for Macd {
    fn param_meta() -> &'static [ParamMeta] {
        MACD_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let macd = Self {
            fast: get_period(params, "fast", DEFAULT_FAST)?,
            slow: get_period(params, "slow", DEFAULT_SLOW)?,
            signal: get_period(params, "signal", DEFAULT_SIGNAL)?,
        };
        macd.validate()?;
        Ok(macd)
    }

    fn stage_name() -> &'static str {
        "macd"
    }

    fn param_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("fast", self.fast.get() as f64),
            ("slow", self.slow.get() as f64),
            ("signal", self.signal.get() as f64),
        ]
    }
}

// ============================================================
// TESTS
// ============================================================

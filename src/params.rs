//! Parameter metadata for pipeline stages
//!
//! Every tunable stage publishes a static table of [`ParamMeta`]. The table
//! drives config validation and lets callers sweep a stage over its grid:
//!
//! ```rust
//! use chanlun::params::{stage_grid, Parameterized};
//! use chanlun::prelude::*;
//!
//! for param in StrokeBuilder::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//! let candidates: Vec<StrokeBuilder> = stage_grid();
//! assert!(candidates.iter().any(|s| s.min_gap == 4));
//! ```

use std::collections::HashMap;

use crate::{ChanError, Period, Ratio, Result};

// ============================================================
// PARAMETER TYPES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Fraction in 0.0..=1.0
    Ratio,
    /// Positive integer count or length
    Period,
}

#[derive(Debug, Clone)]
pub struct ParamMeta {
    pub name: &'static str,
    pub param_type: ParamType,
    pub default: f64,
    /// Sweep range: (min, max, step)
    pub range: (f64, f64, f64),
    pub description: &'static str,
}

impl ParamMeta {
    pub const fn ratio(
        name: &'static str,
        default: f64,
        range: (f64, f64, f64),
        description: &'static str,
    ) -> Self {
        Self { name, param_type: ParamType::Ratio, default, range, description }
    }

    pub const fn period(
        name: &'static str,
        default: f64,
        range: (f64, f64, f64),
        description: &'static str,
    ) -> Self {
        Self { name, param_type: ParamType::Period, default, range, description }
    }

    /// Values from `min` to `max` inclusive in `step` increments
    pub fn generate_grid(&self) -> Vec<f64> {
        let (min, max, step) = self.range;
        if step <= 0.0 {
            return vec![min];
        }
        let count = ((max - min) / step + 1e-9).floor() as usize + 1;
        (0..count).map(|k| min + k as f64 * step).collect()
    }

    /// Check `value` against the range and the type's own rules
    pub fn validate(&self, value: f64) -> Result<()> {
        let (min, max, _) = self.range;
        if !value.is_finite() || value < min || value > max {
            return Err(ChanError::OutOfRange { field: self.name, value, min, max });
        }
        match self.param_type {
            ParamType::Ratio => Ratio::new(value).map(|_| ()),
            ParamType::Period => {
                if value < 1.0 || value.fract() != 0.0 {
                    return Err(ChanError::InvalidValue("count parameters must be positive integers"));
                }
                Ok(())
            },
        }
    }
}

// ============================================================
// PARAMETERIZED STAGE TRAIT
// ============================================================

/// A pipeline stage with tunable parameters
pub trait Parameterized: Sized {
    fn param_meta() -> &'static [ParamMeta];

    /// Build from named values; missing names take their defaults
    fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;

    /// Config section the stage is read from
    fn stage_name() -> &'static str;

    /// Current values, in `param_meta` order
    fn param_values(&self) -> Vec<(&'static str, f64)>;

    /// Range-check the current values against the metadata table
    fn validate_params(&self) -> Result<()> {
        for (name, value) in self.param_values() {
            let meta = Self::param_meta().iter().find(|m| m.name == name).ok_or_else(|| {
                ChanError::InvalidConfig(format!("{}: no metadata for '{name}'", Self::stage_name()))
            })?;
            meta.validate(value).map_err(|e| ChanError::InvalidConfig(format!("{}.{name}: {e}", Self::stage_name())))?;
        }
        Ok(())
    }
}

/// Every valid configuration of a stage over the cartesian product of its
/// parameter grids. Combinations the stage rejects are skipped.
pub fn stage_grid<P: Parameterized>() -> Vec<P> {
    let mut combos: Vec<HashMap<&'static str, f64>> = vec![HashMap::new()];
    for meta in P::param_meta() {
        let grid = meta.generate_grid();
        combos = combos
            .into_iter()
            .flat_map(|base| {
                grid.iter().map(move |&v| {
                    let mut next = base.clone();
                    next.insert(meta.name, v);
                    next
                })
            })
            .collect();
    }
    combos
        .iter()
        .filter_map(|c| {
            let view: HashMap<&str, f64> = c.iter().map(|(k, v)| (*k, *v)).collect();
            P::with_params(&view).ok()
        })
        .collect()
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

pub fn get_ratio(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Ratio> {
    Ratio::new(params.get(key).copied().unwrap_or(default))
}

pub fn get_period(params: &HashMap<&str, f64>, key: &str, default: usize) -> Result<Period> {
    let value = params.get(key).copied().unwrap_or(default as f64);
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(ChanError::InvalidValue("count parameters must be non-negative integers"));
    }
    Period::new(value as usize)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{DivergenceAnalyzer, HubDetector, Macd, SegmentBuilder, StrokeBuilder};

    #[test]
    fn test_grid_inclusive_of_max() {
        let meta = ParamMeta::ratio("area_ratio", 1.0, (0.5, 1.0, 0.25), "x");
        let grid = meta.generate_grid();
        assert_eq!(grid.len(), 3);
        assert!((grid[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_period_meta_rejects_fractions() {
        let meta = ParamMeta::period("min_gap", 4.0, (1.0, 10.0, 1.0), "x");
        assert!(meta.validate(4.0).is_ok());
        assert!(meta.validate(4.5).is_err());
        assert!(meta.validate(11.0).is_err());
        assert!(meta.validate(f64::NAN).is_err());
    }

    #[test]
    fn test_defaults_validate() {
        assert!(StrokeBuilder::default().validate_params().is_ok());
        assert!(SegmentBuilder::default().validate_params().is_ok());
        assert!(HubDetector::default().validate_params().is_ok());
        assert!(Macd::default().validate_params().is_ok());
        assert!(DivergenceAnalyzer::default().validate_params().is_ok());
    }

    #[test]
    fn test_out_of_range_names_stage() {
        let err = StrokeBuilder { min_gap: 50 }.validate_params().unwrap_err();
        assert!(err.to_string().contains("stroke.min_gap"));
    }

    #[test]
    fn test_stage_grid_skips_invalid() {
        let segs: Vec<SegmentBuilder> = stage_grid();
        assert_eq!(segs.iter().map(|s| s.min_strokes).collect::<Vec<_>>(), vec![3, 5, 7, 9]);

        let macds: Vec<Macd> = stage_grid();
        assert!(!macds.is_empty());
        assert!(macds.iter().all(|m| m.fast < m.slow));
    }

    #[test]
    fn test_value_helpers() {
        let mut params = HashMap::new();
        params.insert("min_gap", 6.0);
        params.insert("bad", 2.5);
        assert_eq!(get_period(&params, "min_gap", 4).unwrap().get(), 6);
        assert_eq!(get_period(&params, "missing", 4).unwrap().get(), 4);
        assert!(get_period(&params, "bad", 4).is_err());
        assert!((get_ratio(&params, "missing", 0.7).unwrap().get() - 0.7).abs() < 1e-12);
    }
}

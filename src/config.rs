//! Engine configuration, loadable from TOML
//!
//! ```toml
//! [stroke]
//! min_gap = 4
//!
//! [macd]
//! fast = 12
//! slow = 26
//! signal = 9
//!
//! [engine]
//! timeout_ms = 2000
//! workers = 8
//!
//! [logging]
//! level = "DEBUG"
//! ```
//!
//! Every section and key is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::stages::{DivergenceAnalyzer, HubDetector, Macd, SegmentBuilder, StrokeBuilder};
use crate::{ChanError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChanConfig {
    pub stroke: StrokeBuilder,
    pub segment: SegmentBuilder,
    pub hub: HubDetector,
    pub macd: Macd,
    pub divergence: DivergenceAnalyzer,
    pub engine: EngineSection,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Reject malformed bars before the pipeline runs
    pub validate_data: bool,
    /// Per-symbol wall-clock budget; unlimited when absent
    pub timeout_ms: Option<u64>,
    /// Upper bound on threads used by batch analysis
    pub workers: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self { validate_data: true, timeout_ms: None, workers: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "INFO".to_string(), json: false }
    }
}

impl ChanConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ChanConfig = toml::from_str(s).map_err(|e| ChanError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ChanError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ChanError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.stroke.validate()?;
        self.segment.validate()?;
        self.hub.validate()?;
        self.macd.validate()?;
        self.divergence.validate()?;
        if self.engine.workers == 0 {
            return Err(ChanError::InvalidConfig("engine.workers must be at least 1".into()));
        }
        if self.engine.timeout_ms == Some(0) {
            return Err(ChanError::InvalidConfig("engine.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

// ============================================================
// TESTS
// ============================================================

//! Pipeline driver
//!
//! [`ChanEngine`] runs every stage for one (symbol, frequency) series. All
//! stage output lives in a [`Checkpoint`]; feeding more bars re-evaluates
//! each stage only from its resume point, so a one-shot run and a long
//! sequence of [`IncrementalAnalyzer::push`] calls reach the same state.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::{Analysis, Summary};
use crate::config::ChanConfig;
use crate::stages::{
    common_prefix, AlternatingChain, BarMerger, Fractal, FractalDetector, Hub, HubDetector, Macd,
    MacdSeries, MacdState, MergedBar, Segment, SegmentBuilder, SegmentPoint, SignalClassifier,
    Stroke, StrokeBuilder,
};
use crate::{
    validate_bars, Bar, ChanError, Frequency, Level, OHLCVExt, Period, Ratio, Result, OHLCV,
};

// ============================================================
// DEADLINE
// ============================================================

/// Wall-clock budget for one symbol's run, checked between stages
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn none() -> Self {
        Self {
            start: Instant::now(),
            limit: None,
        }
    }

    pub fn after(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit: Some(limit),
        }
    }

    pub fn from_ms(limit_ms: Option<u64>) -> Self {
        limit_ms.map_or_else(Self::none, |ms| Self::after(Duration::from_millis(ms)))
    }

    #[inline]
    pub fn expired(&self) -> bool {
        self.limit.is_some_and(|limit| self.start.elapsed() >= limit)
    }

    pub fn check(&self, symbol: &str, stage: &'static str) -> Result<()> {
        match self.limit {
            Some(limit) if self.expired() => Err(ChanError::Timeout {
                symbol: symbol.to_string(),
                stage,
                limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
            _ => Ok(()),
        }
    }
}

// ============================================================
// CHECKPOINT
// ============================================================

/// Complete stage state after the bars seen so far.
///
/// The next ingest only rewrites each list from its stage's resume point
/// onward. The two chains are rewound through their edit logs instead, so
/// they continue from exactly the state a full run would have had.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    merged: Vec<MergedBar>,
    fractals: Vec<Fractal>,
    /// Stroke endpoints
    chain: AlternatingChain<Fractal>,
    strokes: Vec<Stroke>,
    segment_points: AlternatingChain<SegmentPoint>,
    segments: Vec<Segment>,
    stroke_hubs: Vec<Hub>,
    segment_hubs: Vec<Hub>,
    macd_state: MacdState,
    macd: MacdSeries,
    bar_count: usize,
    latest: Option<(f64, DateTime<Utc>)>,
}

impl Checkpoint {
    pub fn new(macd: &Macd) -> Self {
        Self {
            merged: Vec::new(),
            fractals: Vec::new(),
            chain: AlternatingChain::new(),
            strokes: Vec::new(),
            segment_points: AlternatingChain::new(),
            segments: Vec::new(),
            stroke_hubs: Vec::new(),
            segment_hubs: Vec::new(),
            macd_state: macd.state(),
            macd: MacdSeries::default(),
            bar_count: 0,
            latest: None,
        }
    }

    #[inline]
    pub fn bar_count(&self) -> usize {
        self.bar_count
    }

    pub fn merged(&self) -> &[MergedBar] {
        &self.merged
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn macd(&self) -> &MacdSeries {
        &self.macd
    }
}

// ============================================================
// ENGINE
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct ChanEngine {
    config: ChanConfig,
}

impl ChanEngine {
    pub fn new(config: ChanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &ChanConfig {
        &self.config
    }

    /// Full decomposition of `bars`, bounded by `engine.timeout_ms`.
    pub fn analyze<T: OHLCV>(
        &self,
        symbol: &str,
        frequency: Frequency,
        bars: &[T],
    ) -> Result<Analysis> {
        let deadline = Deadline::from_ms(self.config.engine.timeout_ms);
        self.analyze_until(symbol, frequency, bars, deadline)
    }

    /// Same as [`analyze`](Self::analyze) with an explicit deadline.
    /// Nothing is published for a run that fails or times out.
    pub fn analyze_until<T: OHLCV>(
        &self,
        symbol: &str,
        frequency: Frequency,
        bars: &[T],
        deadline: Deadline,
    ) -> Result<Analysis> {
        if self.config.engine.validate_data {
            validate_bars(bars)
                .inspect_err(|e| warn!(symbol, error = %e, "rejected input"))?;
        }

        let mut checkpoint = Checkpoint::new(&self.config.macd);
        self.ingest(&mut checkpoint, bars, symbol, &deadline)
            .inspect_err(|e| warn!(symbol, error = %e, "run aborted"))?;

        let analysis = self.publish(symbol, frequency, &checkpoint);
        info!(
            symbol,
            frequency = %frequency,
            bars = analysis.bar_count,
            strokes = analysis.strokes.len(),
            segments = analysis.segments.len(),
            hubs = analysis.hubs.len(),
            trade_points = analysis.trade_points.len(),
            "analysis complete"
        );
        Ok(analysis)
    }

    /// Fold `bars` (already validated, continuing the series) into
    /// `cp`. On error `cp` is half-updated and must be discarded.
    fn ingest<T: OHLCV>(
        &self,
        cp: &mut Checkpoint,
        bars: &[T],
        symbol: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        let stroke_builder: &StrokeBuilder = &self.config.stroke;
        let segment_builder: &SegmentBuilder = &self.config.segment;
        let hub_detector: &HubDetector = &self.config.hub;

        // merged bars and MACD
        let old_merged = cp.merged.len();
        let old_last = cp.merged.last().copied();
        for (k, bar) in bars.iter().enumerate() {
            BarMerger.step(&mut cp.merged, cp.bar_count + k, bar);
            cp.macd.push(cp.macd_state.push(bar.close()));
        }
        cp.bar_count += bars.len();
        if let Some(bar) = bars.last() {
            cp.latest = Some((bar.close(), bar.timestamp()));
        }
        let stable_merged = match old_last {
            Some(last) if cp.merged[old_merged - 1] == last => old_merged,
            Some(_) => old_merged - 1,
            None => 0,
        };
        debug!(symbol, merged = cp.merged.len(), stable_merged, "merge");
        deadline.check(symbol, "merge")?;

        // fractals; detection may still replace the last kept one
        let mut fractals = std::mem::take(&mut cp.fractals);
        let old_tail = fractals.split_off(FractalDetector::resume_point(&fractals, stable_merged));
        let kept = fractals.len();
        let last_kept = fractals.last().copied();
        cp.fractals = FractalDetector.detect_from(&cp.merged, fractals);
        let same_fractals = if kept > 0 && cp.fractals.get(kept - 1).copied() != last_kept {
            kept - 1
        } else {
            kept + common_prefix(&old_tail, &cp.fractals[kept..])
        };
        let stable_fractals =
            same_fractals.min(cp.fractals.partition_point(|f| f.index < stable_merged));
        debug!(symbol, fractals = cp.fractals.len(), stable_fractals, "fractals");
        deadline.check(symbol, "fractal")?;

        // stroke endpoints, then strokes. Retraction can reach below the
        // rewind point, so chains are compared in full.
        let old_chain = cp.chain.points().to_vec();
        let mut chain = std::mem::take(&mut cp.chain);
        chain.rewind(stable_fractals);
        cp.chain = stroke_builder.confirm_from(&cp.fractals, &cp.merged, chain);
        let same_chain = common_prefix(&old_chain, cp.chain.points());
        let stable_points = same_chain
            .min(cp.chain.points().partition_point(|f| f.index < stable_merged));

        let mut strokes = std::mem::take(&mut cp.strokes);
        let old_tail = strokes.split_off(stable_points.saturating_sub(1).min(strokes.len()));
        let kept = strokes.len();
        cp.strokes = stroke_builder.strokes_from(cp.chain.points(), &cp.merged, strokes);
        let stable_strokes = kept + common_prefix(&old_tail, &cp.strokes[kept..]);
        debug!(symbol, strokes = cp.strokes.len(), stable_strokes, "strokes");
        deadline.check(symbol, "stroke")?;

        // segment boundaries, then segments
        let old_points = cp.segment_points.points().to_vec();
        let mut chain = std::mem::take(&mut cp.segment_points);
        chain.rewind(SegmentBuilder::resume_point(same_chain));
        cp.segment_points = segment_builder.points_from(cp.chain.points(), chain);
        let same_points = common_prefix(&old_points, cp.segment_points.points());
        let stable_points = same_points.min(
            cp.segment_points
                .points()
                .partition_point(|g| g.point <= stable_strokes),
        );

        let mut segments = std::mem::take(&mut cp.segments);
        let old_tail =
            segments.split_off(stable_points.saturating_sub(1).min(segments.len()));
        let kept = segments.len();
        cp.segments =
            segment_builder.segments_from(cp.segment_points.points(), &cp.strokes, segments);
        let stable_segments = kept + common_prefix(&old_tail, &cp.segments[kept..]);
        debug!(symbol, segments = cp.segments.len(), stable_segments, "segments");
        deadline.check(symbol, "segment")?;

        // hubs at both levels
        let mut hubs = std::mem::take(&mut cp.stroke_hubs);
        hubs.truncate(HubDetector::resume_point(&hubs, stable_strokes));
        cp.stroke_hubs = hub_detector.detect_from(&cp.strokes, Level::Stroke, hubs);

        let mut hubs = std::mem::take(&mut cp.segment_hubs);
        hubs.truncate(HubDetector::resume_point(&hubs, stable_segments));
        cp.segment_hubs = hub_detector.detect_from(&cp.segments, Level::Segment, hubs);
        debug!(
            symbol,
            stroke_hubs = cp.stroke_hubs.len(),
            segment_hubs = cp.segment_hubs.len(),
            "hubs"
        );
        deadline.check(symbol, "hub")
    }

    /// Build the published result from a checkpoint. Divergence, trade
    /// points and the summary are recomputed from the structure lists.
    pub fn publish(&self, symbol: &str, frequency: Frequency, cp: &Checkpoint) -> Analysis {
        let insufficient_data = cp.bar_count < self.config.stroke.min_bars();
        let mut analysis = Analysis {
            symbol: symbol.to_string(),
            frequency,
            bar_count: cp.bar_count,
            merged_count: cp.merged.len(),
            merged_bars: cp.merged.clone(),
            fractals: Vec::new(),
            strokes: Vec::new(),
            segments: Vec::new(),
            hubs: Vec::new(),
            segment_hubs: Vec::new(),
            divergences: Vec::new(),
            trade_points: Vec::new(),
            insufficient_data,
            summary: Summary::compute(cp.latest, &[], &[], &[]),
        };
        if insufficient_data {
            debug!(symbol, bars = cp.bar_count, "insufficient data");
            return analysis;
        }

        let chain = cp.chain.points();
        let paired = chain.len() >= 2;
        let fractals: Vec<Fractal> = cp
            .fractals
            .iter()
            .map(|f| Fractal {
                confirmed: paired
                    && chain.binary_search_by_key(&f.id, |c| c.id).is_ok(),
                ..*f
            })
            .collect();

        let all_hubs: Vec<Hub> = cp.stroke_hubs.iter().chain(&cp.segment_hubs).copied().collect();
        let divergences =
            self.config
                .divergence
                .analyze(&cp.strokes, &cp.segments, &all_hubs, &cp.macd.hist);
        let trade_points =
            SignalClassifier.classify(&cp.strokes, &cp.segments, &cp.stroke_hubs, &divergences);

        analysis.summary = Summary::compute(cp.latest, &fractals, &cp.strokes, &trade_points);
        analysis.fractals = fractals;
        analysis.strokes = cp.strokes.clone();
        analysis.segments = cp.segments.clone();
        analysis.hubs = cp.stroke_hubs.clone();
        analysis.segment_hubs = cp.segment_hubs.clone();
        analysis.divergences = divergences;
        analysis.trade_points = trade_points;
        analysis
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for [`ChanEngine`]. Values are checked in [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: ChanConfig,
    macd: Option<(usize, usize, usize)>,
    area_ratio: Option<f64>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration
    pub fn config(mut self, config: ChanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn min_gap(mut self, min_gap: usize) -> Self {
        self.config.stroke.min_gap = min_gap;
        self
    }

    pub fn min_strokes(mut self, min_strokes: usize) -> Self {
        self.config.segment.min_strokes = min_strokes;
        self
    }

    pub fn min_members(mut self, min_members: usize) -> Self {
        self.config.hub.min_members = min_members;
        self
    }

    pub fn macd(mut self, fast: usize, slow: usize, signal: usize) -> Self {
        self.macd = Some((fast, slow, signal));
        self
    }

    pub fn area_ratio(mut self, ratio: f64) -> Self {
        self.area_ratio = Some(ratio);
        self
    }

    /// Enable/disable input validation
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.config.engine.validate_data = enable;
        self
    }

    pub fn timeout_ms(mut self, limit_ms: u64) -> Self {
        self.config.engine.timeout_ms = Some(limit_ms);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.engine.workers = workers;
        self
    }

    pub fn build(self) -> Result<ChanEngine> {
        let mut config = self.config;
        if let Some((fast, slow, signal)) = self.macd {
            config.macd = Macd {
                fast: Period::new(fast)?,
                slow: Period::new(slow)?,
                signal: Period::new(signal)?,
            };
        }
        if let Some(ratio) = self.area_ratio {
            config.divergence.area_ratio = Ratio::new(ratio)?;
        }
        ChanEngine::new(config)
    }
}

// ============================================================
// INCREMENTAL ANALYSIS
// ============================================================

/// Streaming front end over one series. Appending bars re-runs only the
/// trailing window of each stage.
#[derive(Debug, Clone)]
pub struct IncrementalAnalyzer<T: OHLCV = Bar> {
    engine: ChanEngine,
    symbol: String,
    frequency: Frequency,
    checkpoint: Checkpoint,
    last: Option<T>,
}

impl<T: OHLCV> IncrementalAnalyzer<T> {
    pub fn new(engine: ChanEngine, symbol: impl Into<String>, frequency: Frequency) -> Self {
        let checkpoint = Checkpoint::new(&engine.config.macd);
        Self {
            engine,
            symbol: symbol.into(),
            frequency,
            checkpoint,
            last: None,
        }
    }

    /// Append one bar. A rejected bar leaves the state untouched.
    pub fn push(&mut self, bar: T) -> Result<()> {
        self.check(&bar, self.last.as_ref(), self.checkpoint.bar_count)?;
        self.ingest(std::slice::from_ref(&bar))?;
        self.last = Some(bar);
        Ok(())
    }

    /// Append a run of bars in one pass. Either every bar is accepted or
    /// none is.
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, bars: I) -> Result<()> {
        let bars: Vec<T> = bars.into_iter().collect();
        let base = self.checkpoint.bar_count;
        for (k, bar) in bars.iter().enumerate() {
            let prev = if k == 0 { self.last.as_ref() } else { Some(&bars[k - 1]) };
            self.check(bar, prev, base + k)?;
        }
        self.ingest(&bars)?;
        if let Some(bar) = bars.into_iter().last() {
            self.last = Some(bar);
        }
        Ok(())
    }

    /// Published view of everything pushed so far
    pub fn snapshot(&self) -> Analysis {
        self.engine
            .publish(&self.symbol, self.frequency, &self.checkpoint)
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    #[inline]
    pub fn bar_count(&self) -> usize {
        self.checkpoint.bar_count
    }

    fn check(&self, bar: &T, prev: Option<&T>, index: usize) -> Result<()> {
        if !self.engine.config.engine.validate_data {
            return Ok(());
        }
        bar.validate_at(index)
            .and_then(|()| prev.map_or(Ok(()), |p| bar.validate_after(p, index)))
            .inspect_err(|e| warn!(symbol = %self.symbol, error = %e, "rejected bar"))
    }

    fn ingest(&mut self, bars: &[T]) -> Result<()> {
        self.engine
            .ingest(&mut self.checkpoint, bars, &self.symbol, &Deadline::none())
    }
}

// ============================================================
// PARALLEL BATCH
// ============================================================

/// A symbol whose run failed or timed out
#[derive(Debug)]
pub struct BatchFailure {
    pub symbol: String,
    pub frequency: Frequency,
    pub error: ChanError,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub successes: Vec<Analysis>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    #[inline]
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }
}

/// Analyse many instruments on a pool of at most `engine.workers` threads.
/// Runs are independent; a failure only affects its own symbol.
pub fn analyze_parallel<'a, T, I>(engine: &ChanEngine, instruments: I) -> Result<BatchReport>
where
    T: OHLCV + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, Frequency, &'a [T])> + Send,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(engine.config.engine.workers)
        .build()
        .map_err(|e| ChanError::ThreadPool(e.to_string()))?;

    let results: Vec<_> = pool.install(|| {
        instruments
            .into_par_iter()
            .map(|(symbol, frequency, bars)| {
                engine
                    .analyze(symbol, frequency, bars)
                    .map_err(|error| BatchFailure {
                        symbol: symbol.to_string(),
                        frequency,
                        error,
                    })
            })
            .collect()
    });

    let mut report = BatchReport::default();
    for result in results {
        match result {
            Ok(analysis) => report.successes.push(analysis),
            Err(failure) => report.failures.push(failure),
        }
    }
    info!(
        ok = report.successes.len(),
        failed = report.failures.len(),
        "batch complete"
    );
    Ok(report)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
                Bar::new("T", i as u64, ts, c, c + 0.5, c - 0.5, c, 100.0)
            })
            .collect()
    }

    fn wave(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let phase = (i % 20) as f64;
                let leg = if phase < 10.0 { phase } else { 20.0 - phase };
                50.0 + leg + (i / 40) as f64
            })
            .collect()
    }

    #[test]
    fn test_builder_validates() {
        assert!(EngineBuilder::new().build().is_ok());
        assert!(EngineBuilder::new().macd(26, 12, 9).build().is_err());
        assert!(EngineBuilder::new().area_ratio(1.5).build().is_err());
        assert!(EngineBuilder::new().workers(0).build().is_err());
        assert!(EngineBuilder::new().min_strokes(4).build().is_err());

        let engine = EngineBuilder::new().min_gap(3).area_ratio(0.7).build().unwrap();
        assert_eq!(engine.config().stroke.min_gap, 3);
        assert!((engine.config().divergence.area_ratio.get() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_deadline() {
        assert!(!Deadline::none().expired());
        assert!(Deadline::none().check("X", "merge").is_ok());
        assert!(Deadline::after(Duration::from_secs(3600)).check("X", "merge").is_ok());
        let err = Deadline::after(Duration::ZERO).check("X", "stroke").unwrap_err();
        assert!(matches!(
            err,
            ChanError::Timeout { ref symbol, stage: "stroke", limit_ms: 0 } if symbol == "X"
        ));
    }

    #[test]
    fn test_timeout_publishes_nothing() {
        let engine = ChanEngine::default();
        let data = bars(&wave(100));
        let result = engine.analyze_until("T", Frequency::Day, &data, Deadline::after(Duration::ZERO));
        assert!(matches!(result, Err(ChanError::Timeout { .. })));
    }

    #[test]
    fn test_empty_input() {
        let engine = ChanEngine::default();
        let analysis = engine.analyze::<Bar>("T", Frequency::Day, &[]).unwrap();
        assert!(analysis.insufficient_data);
        assert_eq!(analysis.merged_count, 0);
        assert!(analysis.summary.latest_price.is_none());
    }

    #[test]
    fn test_wave_produces_strokes() {
        let engine = ChanEngine::default();
        let analysis = engine.analyze("T", Frequency::Day, &bars(&wave(120))).unwrap();
        assert!(!analysis.insufficient_data);
        assert!(analysis.strokes.len() >= 4);
        for pair in analysis.strokes.windows(2) {
            assert_ne!(pair[0].direction, pair[1].direction);
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(
            analysis.confirmed_fractals().count(),
            analysis.strokes.len() + 1
        );
    }

    #[test]
    fn test_push_matches_full_run() {
        let engine = ChanEngine::default();
        let data = bars(&wave(90));
        let mut inc = IncrementalAnalyzer::new(engine.clone(), "T", Frequency::Day);
        for bar in data.iter().cloned() {
            inc.push(bar).unwrap();
        }
        let full = engine.analyze("T", Frequency::Day, &data).unwrap();
        assert_eq!(inc.snapshot(), full);
        assert_eq!(inc.bar_count(), 90);
    }

    #[test]
    fn test_rejected_push_keeps_state() {
        let engine = ChanEngine::default();
        let data = bars(&wave(30));
        let mut inc = IncrementalAnalyzer::new(engine, "T", Frequency::Day);
        inc.extend(data.iter().cloned()).unwrap();
        let before = inc.checkpoint().clone();

        let stale = data[29].clone();
        assert!(matches!(inc.push(stale), Err(ChanError::InvalidSequence { index: 30, .. })));
        assert_eq!(inc.checkpoint(), &before);
    }

    #[test]
    fn test_parallel_batch() {
        let engine = EngineBuilder::new().workers(2).build().unwrap();
        let good = bars(&wave(60));
        let mut bad = bars(&wave(60));
        bad[10].high = f64::NAN;

        let instruments = vec![
            ("AAA", Frequency::Day, good.as_slice()),
            ("BBB", Frequency::Hour1, bad.as_slice()),
            ("CCC", Frequency::Week, good.as_slice()),
        ];
        let report = analyze_parallel(&engine, instruments).unwrap();
        assert_eq!(report.success_count(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].symbol, "BBB");
        assert!(matches!(
            report.failures[0].error,
            ChanError::NumericInvalid { index: 10, .. }
        ));
        assert_eq!(report.successes[0].symbol, "AAA");
        assert_eq!(report.successes[1].frequency, Frequency::Week);
    }
}

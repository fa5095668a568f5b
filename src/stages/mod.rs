//! Pipeline stages, leaves first.
//!
//! Every stage is a left fold over its input that only ever rewrites the
//! tail of its output. Each one therefore exposes a `*_from` entry point
//! taking the still-valid state of a previous run. List stages pair it with
//! a `resume_point` that computes how much of that state survives a change
//! to the input; the two chain stages rewind an [`AlternatingChain`].

pub mod divergence;
pub mod fractal;
pub mod helpers;
pub mod hub;
pub mod macd;
pub mod merge;
pub mod segment;
pub mod signal;
pub mod stroke;

pub use divergence::{DivergenceAnalyzer, DivergenceKind, DivergenceOrigin, DivergenceSignal, Leg};
pub use fractal::{Fractal, FractalDetector, Fractals};
pub use helpers::{common_prefix, AlternatingChain, ChainUpdate, Span, TurningPoint};
pub use hub::{Hub, HubDetector};
pub use macd::{Ema, Macd, MacdPoint, MacdSeries, MacdState};
pub use merge::{BarMerger, MergedBar, MergedBars};
pub use segment::{Segment, SegmentBuilder, SegmentPoint};
pub use signal::{Side, SignalClassifier, TradeClass, TradePoint};
pub use stroke::{Stroke, StrokeBuilder};

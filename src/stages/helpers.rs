//! Shared building blocks for the alternating-chain stages
//!
//! Strokes and segments are both chains of turning points whose kinds
//! alternate top/bottom. The chain rules live here once.

use serde::{Deserialize, Serialize};

use crate::{Direction, FractalKind};

// ============================================================
// TRAITS
// ============================================================

/// A price extreme that can sit in an alternating chain
pub trait TurningPoint {
    fn kind(&self) -> FractalKind;
    fn price(&self) -> f64;
}

/// A directional leg with a price range and a raw-bar extent.
/// Hub detection and divergence work on anything implementing it.
pub trait Span {
    fn direction(&self) -> Direction;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn start_bar(&self) -> usize;
    fn end_bar(&self) -> usize;

    /// Price extreme in the direction of travel
    #[inline]
    fn extreme(&self) -> f64 {
        match self.direction() {
            Direction::Up => self.high(),
            Direction::Down => self.low(),
        }
    }
}

// ============================================================
// ALTERNATING CHAIN
// ============================================================

/// What a single [`AlternatingChain::offer`] call did to the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainUpdate {
    /// Chain was empty
    Started,
    /// Same kind as the tail and at least as extreme: tail replaced
    ExtendedTail,
    /// Opposite kind forming a valid pair with the tail
    Appended,
    /// The point could only join further back; the elements after its
    /// new neighbour were dropped
    Retracted,
    /// Point discarded
    Ignored,
}

/// Elements dropped by one accepted offer, enough to undo it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Edit<P> {
    key: usize,
    removed: Vec<P>,
}

/// A chain of turning points whose kinds alternate top/bottom and whose
/// neighbours always satisfy the caller's pairing rule.
///
/// Every offer carries a key, the position of the offered input. The chain
/// keeps a log of its edits so [`rewind`](Self::rewind) can restore the
/// exact state from before any key when earlier inputs change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternatingChain<P> {
    points: Vec<P>,
    edits: Vec<Edit<P>>,
    next_key: usize,
}

impl<P> Default for AlternatingChain<P> {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            edits: Vec::new(),
            next_key: 0,
        }
    }
}

impl<P: TurningPoint> AlternatingChain<P> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn points(&self) -> &[P] {
        &self.points
    }

    pub fn into_points(self) -> Vec<P> {
        self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Key of the first input not yet offered
    #[inline]
    pub fn next_key(&self) -> usize {
        self.next_key
    }

    /// Offer `point`, the input at position `key`.
    ///
    /// `valid(a, b)` decides whether `a` and the later `b` may be chain
    /// neighbours. Walking back from the tail, a same-kind element is
    /// dropped only when `point` is at least as extreme, and an
    /// opposite-kind element either pairs validly with `point` or is
    /// dropped along with it. If no valid neighbour is reached the point
    /// is discarded and the chain is left as it was.
    pub fn offer<F>(&mut self, key: usize, point: P, valid: F) -> ChainUpdate
    where
        F: Fn(&P, &P) -> bool,
    {
        self.next_key = key + 1;
        let Some(keep) = attach_point(&self.points, &point, valid) else {
            return ChainUpdate::Ignored;
        };
        let removed = self.points.split_off(keep);
        let update = match removed.as_slice() {
            [] if keep == 0 => ChainUpdate::Started,
            [] => ChainUpdate::Appended,
            [tail] if tail.kind() == point.kind() => ChainUpdate::ExtendedTail,
            _ => ChainUpdate::Retracted,
        };
        self.points.push(point);
        self.edits.push(Edit { key, removed });
        update
    }

    /// Undo every offer whose key is `key` or later
    pub fn rewind(&mut self, key: usize) {
        while self.edits.last().is_some_and(|e| e.key >= key) {
            if let Some(edit) = self.edits.pop() {
                self.points.pop();
                self.points.extend(edit.removed);
            }
        }
        self.next_key = self.next_key.min(key);
    }
}

/// Number of leading elements that stay when `point` joins `chain`, or
/// `None` when it cannot join.
fn attach_point<P, F>(chain: &[P], point: &P, valid: F) -> Option<usize>
where
    P: TurningPoint,
    F: Fn(&P, &P) -> bool,
{
    let kind = point.kind();
    let mut k = chain.len();
    while k > 0 {
        let prev = &chain[k - 1];
        if prev.kind() == kind {
            if !kind.at_least_as_extreme(point.price(), prev.price()) {
                return None;
            }
        } else if valid(prev, point) {
            return Some(k);
        } else if k < 2 {
            return None;
        }
        k -= 1;
    }
    Some(0)
}

/// Length of the longest common prefix of two runs of the same stage
pub fn common_prefix<T: PartialEq>(old: &[T], new: &[T]) -> usize {
    old.iter().zip(new).take_while(|(a, b)| a == b).count()
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct P(FractalKind, f64, usize);

    impl TurningPoint for P {
        fn kind(&self) -> FractalKind {
            self.0
        }
        fn price(&self) -> f64 {
            self.1
        }
    }

    fn far_apart(a: &P, b: &P) -> bool {
        b.2 >= a.2 + 3
    }

    /// Far enough apart, and nothing in `lows` between them below the
    /// pair's low.
    fn no_breach<'a>(lows: &'a [(usize, f64)]) -> impl Fn(&P, &P) -> bool + 'a {
        move |a, b| {
            let low = a.1.min(b.1);
            far_apart(a, b) && lows.iter().all(|&(at, l)| at <= a.2 || at >= b.2 || l >= low)
        }
    }

    fn chain_of(points: &[P]) -> AlternatingChain<P> {
        let mut chain = AlternatingChain::new();
        for (key, p) in points.iter().enumerate() {
            chain.offer(key, *p, far_apart);
        }
        chain
    }

    use FractalKind::{Bottom, Top};

    #[test]
    fn test_same_kind_keeps_more_extreme() {
        let mut chain = chain_of(&[P(Bottom, 5.0, 0), P(Top, 10.0, 4)]);
        assert_eq!(chain.offer(2, P(Top, 9.0, 6), far_apart), ChainUpdate::Ignored);
        assert_eq!(chain.offer(3, P(Top, 10.0, 7), far_apart), ChainUpdate::ExtendedTail);
        assert_eq!(chain.points()[1], P(Top, 10.0, 7));
    }

    #[test]
    fn test_invalid_pair_retracts_weaker_tail() {
        let mut chain = chain_of(&[P(Bottom, 5.0, 0), P(Top, 10.0, 4)]);
        // too close to the top, but lower than the first bottom
        let r = chain.offer(2, P(Bottom, 4.0, 5), far_apart);
        assert_eq!(r, ChainUpdate::Retracted);
        assert_eq!(chain.points(), &[P(Bottom, 4.0, 5)]);
    }

    #[test]
    fn test_invalid_pair_without_new_extreme_is_dropped() {
        let mut chain = chain_of(&[P(Bottom, 5.0, 0), P(Top, 10.0, 4)]);
        let r = chain.offer(2, P(Bottom, 6.0, 5), far_apart);
        assert_eq!(r, ChainUpdate::Ignored);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_retraction_never_leaves_an_invalid_pair() {
        // x=5, t0=10, b=3 (below x), then t'=12 too close to b
        let lows = [(8, 3.0)];
        let valid = no_breach(&lows);
        let mut chain = AlternatingChain::new();
        for (key, p) in [P(Bottom, 5.0, 0), P(Top, 10.0, 4), P(Bottom, 3.0, 8)].into_iter().enumerate() {
            chain.offer(key, p, &valid);
        }
        assert_eq!(chain.len(), 3);

        // joining x would put b inside the stroke x -> t'
        assert_eq!(chain.offer(3, P(Top, 12.0, 9), &valid), ChainUpdate::Ignored);
        assert_eq!(chain.points(), &[P(Bottom, 5.0, 0), P(Top, 10.0, 4), P(Bottom, 3.0, 8)]);
        for w in chain.points().windows(2) {
            assert!(valid(&w[0], &w[1]));
        }
    }

    #[test]
    fn test_walks_back_past_a_blocked_tail() {
        // y=20, x=5, t0=10, b=8, then a top of 11 that never became a chain
        // point. A far lower bottom cannot extend b (t0 -> b2 would hold
        // the 11) but pairs with y.
        let tops = [(11, 11.0)];
        let valid = |a: &P, b: &P| {
            let high = a.1.max(b.1);
            far_apart(a, b) && tops.iter().all(|&(at, h)| at <= a.2 || at >= b.2 || h <= high)
        };
        let mut chain = AlternatingChain::new();
        let pts = [P(Top, 20.0, 0), P(Bottom, 5.0, 3), P(Top, 10.0, 6), P(Bottom, 8.0, 9)];
        for (key, p) in pts.into_iter().enumerate() {
            chain.offer(key, p, &valid);
        }
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.offer(4, P(Bottom, 2.0, 14), &valid), ChainUpdate::Retracted);
        assert_eq!(chain.points(), &[P(Top, 20.0, 0), P(Bottom, 2.0, 14)]);
    }

    #[test]
    fn test_chain_alternates() {
        let chain = chain_of(&[
            P(Top, 10.0, 0),
            P(Bottom, 5.0, 4),
            P(Bottom, 4.0, 5),
            P(Top, 9.0, 6),
            P(Top, 12.0, 9),
            P(Bottom, 7.0, 13),
        ]);
        assert!(chain.points().windows(2).all(|w| w[0].kind() != w[1].kind()));
    }

    #[test]
    fn test_rewind_restores_earlier_state() {
        let pts = [
            P(Bottom, 5.0, 0),
            P(Top, 10.0, 4),
            P(Bottom, 7.0, 8),
            P(Top, 12.0, 9),
            P(Bottom, 4.0, 10),
            P(Top, 9.0, 14),
        ];
        for cut in 0..=pts.len() {
            let before = chain_of(&pts[..cut]);
            let mut chain = chain_of(&pts);
            chain.rewind(cut);
            assert_eq!(chain.points(), before.points(), "rewind to {cut}");
            assert_eq!(chain.next_key(), cut);
            for (key, p) in pts.iter().enumerate().skip(cut) {
                chain.offer(key, *p, far_apart);
            }
            assert_eq!(chain, chain_of(&pts));
        }
    }

    #[test]
    fn test_common_prefix() {
        assert_eq!(common_prefix(&[1, 2, 3], &[1, 2, 4, 5]), 2);
        assert_eq!(common_prefix::<i32>(&[], &[1]), 0);
        assert_eq!(common_prefix(&[1, 2], &[1, 2, 3]), 2);
    }
}

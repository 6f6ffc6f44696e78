//! Per-channel sequence tracking and confirmed-gap detection.
//!
//! For every `(channel, origin)` pair the detector keeps the highest
//! contiguous seqno and the set of holes behind the frontier. A hole starts
//! out *suspected* — reordering in a mesh is normal — and becomes
//! *confirmed* only when the origin demonstrably moved on (forward progress
//! past the hole by a margin) or the hole aged past a timeout. Only
//! confirmed gaps surface as events and feed the sync engine.

use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};

use skywave_proto::NodeId;

/// A hole that met the confirmation criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedGap {
    /// Channel with the hole.
    pub channel: String,
    /// Origin whose sequence is holed.
    pub origin: NodeId,
    /// First missing seqno, inclusive.
    pub start: u32,
    /// Last missing seqno, inclusive.
    pub end: u32,
}

#[derive(Debug, Clone)]
struct Hole<I> {
    start: u32,
    end: u32,
    first_seen: I,
    reported: bool,
}

#[derive(Debug)]
struct OriginState<I> {
    /// Seqnos `1..=contiguous` have all been observed.
    contiguous: u32,
    /// Observed seqnos above the contiguous frontier.
    observed: BTreeSet<u32>,
    /// Unobserved ranges between the frontier and the highest observation.
    holes: Vec<Hole<I>>,
}

impl<I> OriginState<I> {
    fn new() -> Self {
        Self { contiguous: 0, observed: BTreeSet::new(), holes: Vec::new() }
    }

    fn highest(&self) -> u32 {
        self.observed.last().copied().unwrap_or(0).max(self.contiguous)
    }
}

/// Gap detector over all `(channel, origin)` pairs.
#[derive(Debug)]
pub struct GapDetector<I> {
    margin: u32,
    timeout: Duration,
    state: HashMap<(String, NodeId), OriginState<I>>,
}

impl<I> GapDetector<I>
where
    I: Copy + Ord + std::ops::Sub<Output = Duration>,
{
    /// Create a detector with the given confirmation criteria.
    #[must_use]
    pub fn new(margin: u32, timeout: Duration) -> Self {
        Self { margin, timeout, state: HashMap::new() }
    }

    /// Record an observed seqno; returns any gaps that confirm as a result.
    ///
    /// Sync-applied rows run through here too, so repairs heal holes the
    /// same way live traffic does.
    pub fn observe(
        &mut self,
        channel: &str,
        origin: NodeId,
        seqno: u32,
        now: I,
    ) -> Vec<ConfirmedGap> {
        if seqno == 0 {
            return Vec::new();
        }

        let state = self
            .state
            .entry((channel.to_string(), origin))
            .or_insert_with(OriginState::new);

        if seqno <= state.contiguous || state.observed.contains(&seqno) {
            return Vec::new();
        }

        let prev_highest = state.highest();
        state.observed.insert(seqno);

        if seqno == state.contiguous + 1 {
            state.contiguous += 1;
            while state.observed.remove(&(state.contiguous + 1)) {
                state.contiguous += 1;
            }
            let frontier = state.contiguous;
            state.holes.retain_mut(|hole| {
                hole.start = hole.start.max(frontier + 1);
                hole.start <= hole.end
            });
        } else if seqno > prev_highest {
            if seqno > prev_highest + 1 {
                state.holes.push(Hole {
                    start: prev_highest + 1,
                    end: seqno - 1,
                    first_seen: now,
                    reported: false,
                });
            }
        } else if let Some(pos) =
            state.holes.iter().position(|hole| hole.start <= seqno && seqno <= hole.end)
        {
            // The observation lands inside a hole: split it, segments
            // inheriting the original evidence time and reported flag.
            let Hole { start, end, first_seen, reported } = state.holes.remove(pos);
            if start < seqno {
                state.holes.push(Hole { start, end: seqno - 1, first_seen, reported });
            }
            if seqno < end {
                state.holes.push(Hole { start: seqno + 1, end, first_seen, reported });
            }
            state.holes.sort_by_key(|h| h.start);
        }

        Self::confirm(self.margin, self.timeout, channel, origin, state, now)
    }

    /// Time-based confirmation sweep across every tracked pair.
    pub fn tick(&mut self, now: I) -> Vec<ConfirmedGap> {
        let margin = self.margin;
        let timeout = self.timeout;
        let mut confirmed = Vec::new();
        for ((channel, origin), state) in &mut self.state {
            confirmed.extend(Self::confirm(margin, timeout, channel, *origin, state, now));
        }
        confirmed
    }

    /// Highest contiguous seqno for a pair, for diagnostics and tests.
    #[must_use]
    pub fn contiguous(&self, channel: &str, origin: &NodeId) -> u32 {
        self.state
            .get(&(channel.to_string(), *origin))
            .map_or(0, |state| state.contiguous)
    }

    /// Open hole count for a pair.
    #[must_use]
    pub fn open_holes(&self, channel: &str, origin: &NodeId) -> usize {
        self.state
            .get(&(channel.to_string(), *origin))
            .map_or(0, |state| state.holes.len())
    }

    fn confirm(
        margin: u32,
        timeout: Duration,
        channel: &str,
        origin: NodeId,
        state: &mut OriginState<I>,
        now: I,
    ) -> Vec<ConfirmedGap> {
        let highest = state.highest();
        let mut confirmed = Vec::new();

        for hole in &mut state.holes {
            if hole.reported {
                continue;
            }
            let progressed = highest >= hole.end.saturating_add(margin);
            let aged = now - hole.first_seen >= timeout;
            if progressed || aged {
                hole.reported = true;
                confirmed.push(ConfirmedGap {
                    channel: channel.to_string(),
                    origin,
                    start: hole.start,
                    end: hole.end,
                });
            }
        }
        confirmed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn origin() -> NodeId {
        NodeId::from_callsign("KD9YQK-1")
    }

    fn detector() -> GapDetector<Instant> {
        GapDetector::new(3, Duration::from_secs(60))
    }

    #[test]
    fn contiguous_sequence_raises_nothing() {
        let mut gaps = detector();
        let now = Instant::now();

        for seqno in 1..=10 {
            assert!(gaps.observe("#general", origin(), seqno, now).is_empty());
        }
        assert_eq!(gaps.contiguous("#general", &origin()), 10);
        assert_eq!(gaps.open_holes("#general", &origin()), 0);
    }

    #[test]
    fn hole_is_suspected_before_margin() {
        let mut gaps = detector();
        let now = Instant::now();

        gaps.observe("#general", origin(), 1, now);
        // 2..4 missing; 5 observed. Progress past the hole is 0 < margin.
        assert!(gaps.observe("#general", origin(), 5, now).is_empty());
        assert_eq!(gaps.open_holes("#general", &origin()), 1);
    }

    #[test]
    fn forward_progress_confirms_hole() {
        let mut gaps = detector();
        let now = Instant::now();

        gaps.observe("#general", origin(), 1, now);
        gaps.observe("#general", origin(), 5, now);
        gaps.observe("#general", origin(), 6, now);
        // highest = 7 >= hole.end(4) + margin(3): confirmed.
        let confirmed = gaps.observe("#general", origin(), 7, now);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].start, 2);
        assert_eq!(confirmed[0].end, 4);

        // Confirmed once, not again.
        assert!(gaps.observe("#general", origin(), 8, now).is_empty());
    }

    #[test]
    fn elapsed_time_confirms_hole() {
        let mut gaps = detector();
        let start = Instant::now();

        gaps.observe("#general", origin(), 1, start);
        gaps.observe("#general", origin(), 5, start);

        assert!(gaps.tick(start + Duration::from_secs(30)).is_empty());
        let confirmed = gaps.tick(start + Duration::from_secs(61));
        assert_eq!(confirmed.len(), 1);
        assert_eq!((confirmed[0].start, confirmed[0].end), (2, 4));
    }

    #[test]
    fn healing_removes_holes() {
        let mut gaps = detector();
        let now = Instant::now();

        gaps.observe("#general", origin(), 1, now);
        gaps.observe("#general", origin(), 5, now);
        assert_eq!(gaps.open_holes("#general", &origin()), 1);

        // Late arrivals fill the hole completely.
        gaps.observe("#general", origin(), 2, now);
        gaps.observe("#general", origin(), 3, now);
        gaps.observe("#general", origin(), 4, now);

        assert_eq!(gaps.open_holes("#general", &origin()), 0);
        assert_eq!(gaps.contiguous("#general", &origin()), 5);
    }

    #[test]
    fn partial_heal_splits_hole() {
        let mut gaps = detector();
        let now = Instant::now();

        gaps.observe("#general", origin(), 1, now);
        gaps.observe("#general", origin(), 9, now);
        assert_eq!(gaps.open_holes("#general", &origin()), 1);

        // 5 lands mid-hole: 2..4 and 6..8 remain.
        gaps.observe("#general", origin(), 5, now);
        assert_eq!(gaps.open_holes("#general", &origin()), 2);
    }

    #[test]
    fn pairs_are_independent() {
        let mut gaps = detector();
        let now = Instant::now();
        let other = NodeId::from_callsign("W1AW");

        gaps.observe("#general", origin(), 1, now);
        gaps.observe("#general", origin(), 9, now);
        gaps.observe("#general", other, 1, now);
        gaps.observe("#other", origin(), 1, now);

        assert_eq!(gaps.open_holes("#general", &origin()), 1);
        assert_eq!(gaps.open_holes("#general", &other), 0);
        assert_eq!(gaps.open_holes("#other", &origin()), 0);
    }

    #[test]
    fn frontier_advance_trims_partially_healed_hole() {
        let mut gaps = detector();
        let now = Instant::now();

        gaps.observe("#general", origin(), 1, now);
        gaps.observe("#general", origin(), 9, now);
        // Heal from the left edge: 2 advances the frontier into the hole.
        gaps.observe("#general", origin(), 2, now);

        assert_eq!(gaps.contiguous("#general", &origin()), 2);
        assert_eq!(gaps.open_holes("#general", &origin()), 1);
    }
}

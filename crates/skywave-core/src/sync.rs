//! Targeted history repair: request planning and the responder side.
//!
//! The engine owns the outstanding-repair book. Confirmed gaps enter as
//! range repairs (bounds are always known once a gap confirms); inventory
//! requests are the discovery fallback for `(channel, origin)` pairs we
//! have no baseline for. Overlapping outstanding ranges are never reissued,
//! retries back off exponentially with a hard attempt cap, and per-channel
//! policy decides whether a channel repairs eagerly, opportunistically, or
//! not at all.
//!
//! Applying responses is the chat client's job — rows go through the same
//! idempotent insert path as live traffic. The engine only learns about
//! filled seqnos via [`SyncEngine::note_filled`] so it can retire
//! outstanding work.

use std::{collections::HashMap, time::Duration};

use skywave_proto::{
    NodeId,
    chat::{SyncMode, SyncRequest, SyncResponse, SyncRow},
};

use crate::{
    config::{ChannelSyncMode, SyncConfig},
    error::StoreError,
    gap::ConfirmedGap,
    store::ChatStore,
};

/// Soft byte budget per sync response chunk, leaving room for the envelope
/// and DATA prefix inside one frame.
const CHUNK_BUDGET: usize = 48 * 1024;

/// Hard cap on rows any single request may name, whatever the peer asked.
const RESPONDER_ROW_CAP: usize = 200;

/// A request the engine wants sent. The caller wraps it in a chat envelope
/// and addresses it (best next hop toward the origin, else broadcast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRequest {
    /// Channel being repaired.
    pub channel: String,
    /// Target origin.
    pub origin: NodeId,
    /// Request payload, ready for the envelope.
    pub request: SyncRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepairKind {
    Range { start: u32, end: u32 },
    Inventory,
}

#[derive(Debug)]
struct PendingRepair<I> {
    channel: String,
    origin: NodeId,
    kind: RepairKind,
    attempts: u32,
    last_attempt: Option<I>,
}

/// The sync engine.
#[derive(Debug)]
pub struct SyncEngine<I> {
    config: SyncConfig,
    pending: Vec<PendingRepair<I>>,
    last_answer: HashMap<NodeId, I>,
}

impl<I> SyncEngine<I>
where
    I: Copy + Ord + std::ops::Sub<Output = Duration>,
{
    /// Create an engine with the given tuning.
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self { config, pending: Vec::new(), last_answer: HashMap::new() }
    }

    /// Outstanding repair count, for diagnostics and tests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Enqueue a confirmed gap as a range repair.
    ///
    /// Seqnos already covered by outstanding ranges for the same pair are
    /// not enqueued again; what remains is split into bursts no larger than
    /// the channel's `max_burst`.
    pub fn note_gap(&mut self, gap: &ConfirmedGap) {
        let policy = self.config.policy_for(&gap.channel);
        if policy.mode == ChannelSyncMode::Off {
            return;
        }

        let mut uncovered = vec![(gap.start, gap.end)];
        for pending in &self.pending {
            if pending.channel != gap.channel || pending.origin != gap.origin {
                continue;
            }
            let RepairKind::Range { start, end } = pending.kind else { continue };
            uncovered = uncovered
                .into_iter()
                .flat_map(|(s, e)| subtract_range(s, e, start, end))
                .collect();
        }

        let burst = policy.max_burst.max(1);
        for (start, end) in uncovered {
            let mut chunk_start = start;
            while chunk_start <= end {
                let chunk_end = end.min(chunk_start.saturating_add(burst - 1));
                self.pending.push(PendingRepair {
                    channel: gap.channel.clone(),
                    origin: gap.origin,
                    kind: RepairKind::Range { start: chunk_start, end: chunk_end },
                    attempts: 0,
                    last_attempt: None,
                });
                if chunk_end == u32::MAX {
                    break;
                }
                chunk_start = chunk_end + 1;
            }
        }
    }

    /// Enqueue an inventory discovery for a pair we have no baseline for.
    pub fn note_inventory(&mut self, channel: &str, origin: NodeId) {
        if self.config.policy_for(channel).mode == ChannelSyncMode::Off {
            return;
        }
        let already = self.pending.iter().any(|p| {
            p.channel == channel && p.origin == origin && p.kind == RepairKind::Inventory
        });
        if !already {
            self.pending.push(PendingRepair {
                channel: channel.to_string(),
                origin,
                kind: RepairKind::Inventory,
                attempts: 0,
                last_attempt: None,
            });
        }
    }

    /// A row arrived (live or via sync); retire it from outstanding ranges.
    pub fn note_filled(&mut self, channel: &str, origin: NodeId, seqno: u32) {
        let mut split = Vec::new();
        self.pending.retain_mut(|pending| {
            if pending.channel != channel || pending.origin != origin {
                return true;
            }
            let RepairKind::Range { start, end } = pending.kind else { return true };
            if seqno < start || seqno > end {
                return true;
            }
            let mut remainder = subtract_range(start, end, seqno, seqno);
            match remainder.len() {
                0 => false,
                1 => {
                    let (s, e) = remainder[0];
                    pending.kind = RepairKind::Range { start: s, end: e };
                    true
                },
                _ => {
                    let (s, e) = remainder.remove(0);
                    pending.kind = RepairKind::Range { start: s, end: e };
                    for (s2, e2) in remainder {
                        split.push(PendingRepair {
                            channel: pending.channel.clone(),
                            origin: pending.origin,
                            kind: RepairKind::Range { start: s2, end: e2 },
                            attempts: pending.attempts,
                            last_attempt: pending.last_attempt,
                        });
                    }
                    true
                },
            }
        });
        self.pending.extend(split);
    }

    /// Requests due this tick.
    ///
    /// Exhausted repairs (attempt cap reached, backoff elapsed) are dropped
    /// with a warning. Deferred channels only emit when no eager channel
    /// has outstanding work.
    pub fn due_requests(&mut self, now: I) -> Vec<PlannedRequest> {
        let config = &self.config;
        self.pending.retain(|pending| {
            let exhausted = pending.attempts >= config.max_retries
                && pending
                    .last_attempt
                    .is_none_or(|at| now - at >= backoff(config.request_timeout, pending.attempts));
            if exhausted {
                tracing::warn!(
                    channel = %pending.channel,
                    origin = %pending.origin,
                    attempts = pending.attempts,
                    "giving up on sync repair"
                );
            }
            !exhausted
        });

        let eager_outstanding = self
            .pending
            .iter()
            .any(|p| self.config.policy_for(&p.channel).mode == ChannelSyncMode::Eager);

        let mut planned = Vec::new();
        let config = self.config.clone();
        for pending in &mut self.pending {
            if pending.attempts >= config.max_retries {
                continue;
            }
            let policy = config.policy_for(&pending.channel);
            if policy.mode == ChannelSyncMode::Deferred && eager_outstanding {
                continue;
            }

            let due = match pending.last_attempt {
                None => true,
                Some(at) => now - at >= backoff(config.request_timeout, pending.attempts),
            };
            if !due {
                continue;
            }

            pending.attempts += 1;
            pending.last_attempt = Some(now);

            let request = match pending.kind {
                RepairKind::Range { start, end } => SyncRequest {
                    channel: pending.channel.clone(),
                    mode: SyncMode::Range,
                    origin_id_hex: pending.origin.to_hex(),
                    start: Some(start),
                    end: Some(end),
                    last_n: None,
                },
                RepairKind::Inventory => SyncRequest {
                    channel: pending.channel.clone(),
                    mode: SyncMode::Inventory,
                    origin_id_hex: pending.origin.to_hex(),
                    start: None,
                    end: None,
                    last_n: Some(config.inventory_last_n),
                },
            };
            planned.push(PlannedRequest {
                channel: pending.channel.clone(),
                origin: pending.origin,
                request,
            });
        }

        // Inventory repairs are one-shot: once asked, retries make no sense
        // because there is no completion signal to wait for.
        self.pending
            .retain(|p| !(p.kind == RepairKind::Inventory && p.attempts > 0));

        planned
    }

    /// Answer a sync request addressed to this node from the store.
    ///
    /// Returns response chunks sized to fit individual frames, or nothing
    /// when the requester is inside its rate-limit window.
    ///
    /// # Errors
    ///
    /// - [`StoreError`] if the store lookup fails
    pub fn answer_request<S: ChatStore>(
        &mut self,
        request: &SyncRequest,
        requester: NodeId,
        store: &S,
        now: I,
    ) -> Result<Vec<SyncResponse>, StoreError> {
        if let Some(&last) = self.last_answer.get(&requester) {
            if now - last < self.config.responder_min_interval {
                tracing::debug!(requester = %requester, "rate-limiting sync responder");
                return Ok(Vec::new());
            }
        }

        let Some(origin) = request.origin() else {
            tracing::debug!("ignoring sync request with unparseable origin");
            return Ok(Vec::new());
        };

        let rows = match request.mode {
            SyncMode::Range => {
                let (Some(start), Some(end)) = (request.start, request.end) else {
                    tracing::debug!("ignoring range sync request without bounds");
                    return Ok(Vec::new());
                };
                if start > end {
                    return Ok(Vec::new());
                }
                let mut rows = store.get_range(&request.channel, &origin, start, end)?;
                rows.truncate(RESPONDER_ROW_CAP);
                rows
            },
            SyncMode::Inventory => {
                let limit = request
                    .last_n
                    .unwrap_or(self.config.inventory_last_n)
                    .min(RESPONDER_ROW_CAP as u32) as usize;
                store.latest_rows(&request.channel, &origin, limit)?
            },
        };

        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.last_answer.insert(requester, now);

        Ok(chunk_rows(&request.channel, rows))
    }
}

/// Exponential backoff: `timeout * 2^attempts`, exponent clamped so the
/// delay stays finite.
fn backoff(timeout: Duration, attempts: u32) -> Duration {
    timeout.saturating_mul(1u32 << attempts.min(5))
}

/// `[s, e]` minus `[rs, re]`, in 0..=2 leftover pieces.
fn subtract_range(s: u32, e: u32, rs: u32, re: u32) -> Vec<(u32, u32)> {
    if re < s || rs > e {
        return vec![(s, e)];
    }
    let mut out = Vec::new();
    if rs > s {
        out.push((s, rs - 1));
    }
    if re < e {
        out.push((re + 1, e));
    }
    out
}

/// Pack rows into frame-sized response chunks.
fn chunk_rows(channel: &str, rows: Vec<crate::store::ChatRow>) -> Vec<SyncResponse> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0usize;

    for row in rows {
        let estimated = 64 + row.channel.len() + row.nick.len() + row.text.len();
        if !current.is_empty() && current_size + estimated > CHUNK_BUDGET {
            chunks.push(SyncResponse { channel: channel.to_string(), rows: current });
            current = Vec::new();
            current_size = 0;
        }
        current_size += estimated;
        current.push(SyncRow {
            origin: row.origin,
            seqno: row.seqno,
            channel: row.channel,
            nick: row.nick,
            text: row.text,
            created_ts: row.created_ts,
        });
    }
    if !current.is_empty() {
        chunks.push(SyncResponse { channel: channel.to_string(), rows: current });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{
        config::{ChannelSyncPolicy, SyncConfig},
        store::{ChatRow, ChatStore, MemoryStore},
    };

    fn origin() -> NodeId {
        NodeId::from_callsign("KD9YQK-1")
    }

    fn gap(start: u32, end: u32) -> ConfirmedGap {
        ConfirmedGap { channel: "#general".into(), origin: origin(), start, end }
    }

    fn engine() -> SyncEngine<Instant> {
        SyncEngine::new(SyncConfig::default())
    }

    #[test]
    fn confirmed_gap_becomes_range_request() {
        let mut sync = engine();
        let now = Instant::now();

        sync.note_gap(&gap(142, 147));
        let requests = sync.due_requests(now);
        assert_eq!(requests.len(), 1);

        let request = &requests[0].request;
        assert_eq!(request.mode, SyncMode::Range);
        assert_eq!(request.start, Some(142));
        assert_eq!(request.end, Some(147));
        assert_eq!(request.origin_id_hex, origin().to_hex());
    }

    #[test]
    fn overlapping_gaps_are_coalesced() {
        let mut sync = engine();

        sync.note_gap(&gap(10, 20));
        sync.note_gap(&gap(15, 25));
        // Only 21..25 is new.
        assert_eq!(sync.pending_count(), 2);

        let now = Instant::now();
        let requests = sync.due_requests(now);
        let bounds: Vec<(Option<u32>, Option<u32>)> =
            requests.iter().map(|r| (r.request.start, r.request.end)).collect();
        assert!(bounds.contains(&(Some(10), Some(20))));
        assert!(bounds.contains(&(Some(21), Some(25))));
    }

    #[test]
    fn bursts_split_large_ranges() {
        let config = SyncConfig {
            default_policy: ChannelSyncPolicy { mode: ChannelSyncMode::Eager, max_burst: 10 },
            ..SyncConfig::default()
        };
        let mut sync: SyncEngine<Instant> = SyncEngine::new(config);

        sync.note_gap(&gap(1, 25));
        assert_eq!(sync.pending_count(), 3);
    }

    #[test]
    fn retry_backs_off_and_gives_up() {
        let config = SyncConfig {
            request_timeout: Duration::from_secs(10),
            max_retries: 2,
            ..SyncConfig::default()
        };
        let mut sync: SyncEngine<Instant> = SyncEngine::new(config);
        let start = Instant::now();

        sync.note_gap(&gap(5, 6));
        assert_eq!(sync.due_requests(start).len(), 1);
        // Backoff after first attempt is timeout * 2.
        assert!(sync.due_requests(start + Duration::from_secs(5)).is_empty());
        assert_eq!(sync.due_requests(start + Duration::from_secs(21)).len(), 1);

        // Cap reached: once the final backoff elapses the repair is dropped.
        let much_later = start + Duration::from_secs(200);
        assert!(sync.due_requests(much_later).is_empty());
        assert_eq!(sync.pending_count(), 0);
    }

    #[test]
    fn filled_seqnos_retire_outstanding_work() {
        let mut sync = engine();
        sync.note_gap(&gap(5, 9));

        for seqno in 5..=9 {
            sync.note_filled("#general", origin(), seqno);
        }
        assert_eq!(sync.pending_count(), 0);
    }

    #[test]
    fn partial_fill_splits_range() {
        let mut sync = engine();
        sync.note_gap(&gap(5, 9));

        sync.note_filled("#general", origin(), 7);
        assert_eq!(sync.pending_count(), 2);

        let now = Instant::now();
        let requests = sync.due_requests(now);
        let bounds: Vec<(Option<u32>, Option<u32>)> =
            requests.iter().map(|r| (r.request.start, r.request.end)).collect();
        assert!(bounds.contains(&(Some(5), Some(6))));
        assert!(bounds.contains(&(Some(8), Some(9))));
    }

    #[test]
    fn off_channels_never_enqueue() {
        let config = SyncConfig {
            per_channel: [(
                "#quiet".to_string(),
                ChannelSyncPolicy { mode: ChannelSyncMode::Off, max_burst: 32 },
            )]
            .into_iter()
            .collect(),
            ..SyncConfig::default()
        };
        let mut sync: SyncEngine<Instant> = SyncEngine::new(config);

        sync.note_gap(&ConfirmedGap {
            channel: "#quiet".into(),
            origin: origin(),
            start: 1,
            end: 5,
        });
        assert_eq!(sync.pending_count(), 0);
    }

    #[test]
    fn deferred_channels_wait_for_eager_work_to_drain() {
        let config = SyncConfig {
            per_channel: [(
                "#casual".to_string(),
                ChannelSyncPolicy { mode: ChannelSyncMode::Deferred, max_burst: 32 },
            )]
            .into_iter()
            .collect(),
            ..SyncConfig::default()
        };
        let mut sync: SyncEngine<Instant> = SyncEngine::new(config);
        let now = Instant::now();

        sync.note_gap(&ConfirmedGap {
            channel: "#casual".into(),
            origin: origin(),
            start: 1,
            end: 3,
        });
        sync.note_gap(&gap(10, 12)); // #general is eager by default

        let requests = sync.due_requests(now);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].channel, "#general");

        // Eager repair retires; the deferred one may now emit.
        for seqno in 10..=12 {
            sync.note_filled("#general", origin(), seqno);
        }
        let requests = sync.due_requests(now);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].channel, "#casual");
    }

    fn seed_rows(store: &MemoryStore, count: u32) {
        for seqno in 1..=count {
            store
                .insert(&ChatRow {
                    origin: origin(),
                    seqno,
                    channel: "#general".into(),
                    nick: "kd9yqk".into(),
                    text: format!("line {seqno}"),
                    created_ts: 1_700_000_000 + u64::from(seqno),
                    local_insert_ts: 1_700_000_000 + u64::from(seqno),
                })
                .unwrap();
        }
    }

    #[test]
    fn responder_answers_range_from_store() {
        let mut sync = engine();
        let store = MemoryStore::new();
        seed_rows(&store, 150);
        let now = Instant::now();

        let request = SyncRequest {
            channel: "#general".into(),
            mode: SyncMode::Range,
            origin_id_hex: origin().to_hex(),
            start: Some(142),
            end: Some(147),
            last_n: None,
        };
        let responses = sync
            .answer_request(&request, NodeId::from_callsign("NOCALL-1"), &store, now)
            .unwrap();

        assert_eq!(responses.len(), 1);
        let seqnos: Vec<u32> = responses[0].rows.iter().map(|r| r.seqno).collect();
        assert_eq!(seqnos, vec![142, 143, 144, 145, 146, 147]);
    }

    #[test]
    fn responder_rate_limits_per_requester() {
        let mut sync = engine();
        let store = MemoryStore::new();
        seed_rows(&store, 10);
        let start = Instant::now();
        let requester = NodeId::from_callsign("NOCALL-1");

        let request = SyncRequest {
            channel: "#general".into(),
            mode: SyncMode::Range,
            origin_id_hex: origin().to_hex(),
            start: Some(1),
            end: Some(5),
            last_n: None,
        };

        assert!(!sync.answer_request(&request, requester, &store, start).unwrap().is_empty());
        // Within the window: suppressed.
        assert!(sync
            .answer_request(&request, requester, &store, start + Duration::from_secs(5))
            .unwrap()
            .is_empty());
        // Another requester is unaffected.
        assert!(!sync
            .answer_request(
                &request,
                NodeId::from_callsign("W9XYZ"),
                &store,
                start + Duration::from_secs(5)
            )
            .unwrap()
            .is_empty());
    }

    #[test]
    fn responder_chunks_large_answers() {
        let mut sync = engine();
        let store = MemoryStore::new();
        // Bulky rows force chunking.
        for seqno in 1..=120u32 {
            store
                .insert(&ChatRow {
                    origin: origin(),
                    seqno,
                    channel: "#general".into(),
                    nick: "kd9yqk".into(),
                    text: "x".repeat(1024),
                    created_ts: u64::from(seqno),
                    local_insert_ts: u64::from(seqno),
                })
                .unwrap();
        }
        let now = Instant::now();

        let request = SyncRequest {
            channel: "#general".into(),
            mode: SyncMode::Range,
            origin_id_hex: origin().to_hex(),
            start: Some(1),
            end: Some(120),
            last_n: None,
        };
        let responses = sync
            .answer_request(&request, NodeId::from_callsign("NOCALL-1"), &store, now)
            .unwrap();

        assert!(responses.len() > 1);
        let total: usize = responses.iter().map(|r| r.rows.len()).sum();
        assert_eq!(total, 120);
    }

    #[test]
    fn inventory_answers_latest_rows_of_the_target_origin() {
        let mut sync = engine();
        let store = MemoryStore::new();
        seed_rows(&store, 80);
        // Another origin chatters on the same channel with newer
        // timestamps; it must not appear in an answer about KD9YQK-1.
        for seqno in 1..=20u32 {
            store
                .insert(&ChatRow {
                    origin: NodeId::from_callsign("W1AW"),
                    seqno,
                    channel: "#general".into(),
                    nick: "w1aw".into(),
                    text: format!("noise {seqno}"),
                    created_ts: 1_700_009_000 + u64::from(seqno),
                    local_insert_ts: 1_700_009_000 + u64::from(seqno),
                })
                .unwrap();
        }
        let now = Instant::now();

        let request = SyncRequest {
            channel: "#general".into(),
            mode: SyncMode::Inventory,
            origin_id_hex: origin().to_hex(),
            start: None,
            end: None,
            last_n: Some(10),
        };
        let responses = sync
            .answer_request(&request, NodeId::from_callsign("NOCALL-1"), &store, now)
            .unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].rows.len(), 10);
        assert_eq!(responses[0].rows.last().unwrap().seqno, 80);
        assert!(responses[0].rows.iter().all(|row| row.origin == origin()));
    }
}

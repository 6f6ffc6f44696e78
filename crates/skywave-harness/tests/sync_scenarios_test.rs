//! End-to-end sync scenarios: targeted range repair and inventory
//! discovery, including idempotent re-application.

use std::time::{Duration, Instant};

use skywave_core::{
    Event, MeshConfig, NodeMode,
    node::{MeshNode, NodeAction},
    store::{ChatRow, ChatStore},
};
use skywave_harness::MeshSim;
use skywave_proto::{
    NodeId,
    chat::{ChatEnvelope, ChatPayload, SyncResponse, SyncRow},
};

fn history_row(seqno: u32) -> ChatRow {
    ChatRow {
        origin: NodeId::from_callsign("KD9YQK-1"),
        seqno,
        channel: "#general".into(),
        nick: "kd9yqk".into(),
        text: format!("line {seqno}"),
        created_ts: 1_699_990_000 + u64::from(seqno),
        local_insert_ts: 1_699_990_001 + u64::from(seqno),
    }
}

fn applied_counts(events: &[Event]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::SyncApplied { applied_count, .. } => Some(*applied_count),
            _ => None,
        })
        .collect()
}

#[test]
fn targeted_range_sync_repairs_a_confirmed_gap() {
    let mut sim = MeshSim::new();
    let b = sim.add_node("NOCALL-1", NodeMode::Full);
    let c = sim.add_node("W1AW", NodeMode::Full);
    sim.connect(b, c);

    // C holds the full history for the origin.
    for seqno in 1..=151 {
        sim.node_mut(c).store.insert(&history_row(seqno)).unwrap();
    }

    // B heard everything up to 141, lost 142..147, then heard 148..151 —
    // forward progress past the hole confirms it.
    for seqno in 1..=141 {
        sim.inject_chat(
            b,
            "KD9YQK-1",
            seqno,
            "#general",
            &format!("line {seqno}"),
            1_699_990_000 + u64::from(seqno),
        );
    }
    for seqno in 148..=151 {
        sim.inject_chat(
            b,
            "KD9YQK-1",
            seqno,
            "#general",
            &format!("line {seqno}"),
            1_699_990_000 + u64::from(seqno),
        );
    }

    let gap_events: Vec<&Event> = sim
        .node(b)
        .events
        .iter()
        .filter(|event| matches!(event, Event::GapDetected { .. }))
        .collect();
    assert_eq!(gap_events.len(), 1);
    assert!(matches!(
        gap_events[0],
        Event::GapDetected { start: 142, end: 147, .. }
    ));

    // The tick turns the gap into a range request; with no route to the
    // origin it goes out as a broadcast, C answers, B applies six rows.
    sim.chat_tick(b);

    let origin = NodeId::from_callsign("KD9YQK-1");
    let repaired = sim.node(b).store.get_range("#general", &origin, 142, 147).unwrap();
    assert_eq!(repaired.len(), 6);
    assert_eq!(applied_counts(&sim.node(b).events), vec![6]);
}

#[test]
fn replayed_sync_response_applies_nothing() {
    let mut sim = MeshSim::new();
    let b = sim.add_node("NOCALL-1", NodeMode::Full);
    let c = sim.add_node("W1AW", NodeMode::Full);
    sim.connect(b, c);

    for seqno in 1..=151 {
        sim.node_mut(c).store.insert(&history_row(seqno)).unwrap();
    }
    for seqno in (1..=141).chain(148..=151) {
        sim.inject_chat(
            b,
            "KD9YQK-1",
            seqno,
            "#general",
            &format!("line {seqno}"),
            1_699_990_000 + u64::from(seqno),
        );
    }
    sim.chat_tick(b);
    assert_eq!(applied_counts(&sim.node(b).events), vec![6]);

    // Later, an identical SYNC_RESPONSE arrives again (another responder,
    // new frame seqnos). Every row is a duplicate: applied_count is 0.
    let rows: Vec<SyncRow> = (142..=147)
        .map(|seqno| {
            let row = history_row(seqno);
            SyncRow {
                origin: row.origin,
                seqno: row.seqno,
                channel: row.channel,
                nick: row.nick,
                text: row.text,
                created_ts: row.created_ts,
            }
        })
        .collect();
    let payload = ChatEnvelope::new(ChatPayload::SyncResponse(SyncResponse {
        channel: "#general".into(),
        rows,
    }))
    .encode_to_vec()
    .unwrap();

    // A shadow responder with a fresh seqno window so dedup sees a new
    // frame rather than a retransmission.
    let mut shadow: MeshNode<Instant> =
        MeshNode::new(NodeId::from_callsign("W9XYZ"), MeshConfig::default(), 500);
    let mut wire = Vec::new();
    for action in shadow
        .send_data(NodeId::from_callsign("NOCALL-1"), 0, &payload, Instant::now())
        .unwrap()
    {
        if let NodeAction::Broadcast(frame) = action {
            wire = frame.encode_to_vec().unwrap();
        }
    }
    sim.deliver_raw(b, &wire, "ardop");

    assert_eq!(applied_counts(&sim.node(b).events), vec![6, 0]);
    let origin = NodeId::from_callsign("KD9YQK-1");
    assert_eq!(sim.node(b).store.get_range("#general", &origin, 142, 147).unwrap().len(), 6);
}

fn other_origin_row(seqno: u32) -> ChatRow {
    ChatRow {
        origin: NodeId::from_callsign("W9OTH"),
        seqno,
        channel: "#general".into(),
        nick: "w9oth".into(),
        text: format!("other {seqno}"),
        created_ts: 1_699_995_000 + u64::from(seqno),
        local_insert_ts: 1_699_995_001 + u64::from(seqno),
    }
}

#[test]
fn inventory_sync_bootstraps_an_empty_node() {
    let mut sim = MeshSim::new();
    let b = sim.add_node("NOCALL-1", NodeMode::Full);
    let c = sim.add_node("W1AW", NodeMode::Full);
    sim.connect(b, c);

    for seqno in 1..=40 {
        sim.node_mut(c).store.insert(&history_row(seqno)).unwrap();
    }

    // B knows the channel exists but has no baseline; it asks for the
    // recent inventory and applies whatever comes back.
    let origin = NodeId::from_callsign("KD9YQK-1");
    sim.node_mut(b).chat.request_inventory("#general", origin);
    sim.chat_tick(b);

    // Default inventory_last_n is 50, so all 40 rows arrive.
    assert_eq!(sim.node(b).store.row_count(), 40);
    assert_eq!(applied_counts(&sim.node(b).events), vec![40]);
}

#[test]
fn inventory_sync_is_scoped_to_the_requested_origin() {
    let mut sim = MeshSim::new();
    let b = sim.add_node("NOCALL-1", NodeMode::Full);
    let c = sim.add_node("W1AW", NodeMode::Full);
    sim.connect(b, c);

    // C holds history for two origins on the channel, the other one
    // noisier and with newer timestamps.
    for seqno in 1..=15 {
        sim.node_mut(c).store.insert(&history_row(seqno)).unwrap();
    }
    for seqno in 1..=30 {
        sim.node_mut(c).store.insert(&other_origin_row(seqno)).unwrap();
    }

    let origin = NodeId::from_callsign("KD9YQK-1");
    sim.node_mut(b).chat.request_inventory("#general", origin);
    sim.chat_tick(b);

    // Only the target origin's 15 rows come back; W9OTH's never do.
    assert_eq!(applied_counts(&sim.node(b).events), vec![15]);
    assert_eq!(sim.node(b).store.row_count(), 15);
    assert_eq!(sim.node(b).store.get_range("#general", &origin, 1, 15).unwrap().len(), 15);
    let other = NodeId::from_callsign("W9OTH");
    assert!(sim.node(b).store.get_range("#general", &other, 1, 30).unwrap().is_empty());
}

#[test]
fn sync_requests_retry_until_a_responder_appears() {
    let mut sim = MeshSim::new();
    let b = sim.add_node("NOCALL-1", NodeMode::Full);

    for seqno in (1..=20).chain(27..=30) {
        sim.inject_chat(
            b,
            "KD9YQK-1",
            seqno,
            "#general",
            &format!("line {seqno}"),
            1_699_990_000 + u64::from(seqno),
        );
    }
    // Gap 21..26 confirmed; the first request goes nowhere (no peers).
    sim.chat_tick(b);
    assert_eq!(sim.node(b).store.row_count(), 24);

    // A peer with history appears; after the backoff the retry reaches
    // it and the gap heals.
    let c = sim.add_node("W1AW", NodeMode::Full);
    sim.connect(b, c);
    for seqno in 1..=30 {
        sim.node_mut(c).store.insert(&history_row(seqno)).unwrap();
    }

    sim.advance(Duration::from_secs(600));
    sim.chat_tick(b);

    let origin = NodeId::from_callsign("KD9YQK-1");
    assert_eq!(sim.node(b).store.get_range("#general", &origin, 21, 26).unwrap().len(), 6);
}

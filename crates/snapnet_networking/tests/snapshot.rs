//! # Snapshot Distribution Tests
//!
//! Snapshot rate gating and delta base selection as seen by one client.

mod common;

use common::{config, Harness, Received};
use snapnet_networking::server::SnapRate;
use snapnet_networking::SystemMsg;

fn snapshots(received: &[Received]) -> Vec<&Received> {
    received
        .iter()
        .filter(|r| r.is(SystemMsg::SnapSingle) || r.is(SystemMsg::Snap) || r.is(SystemMsg::SnapEmpty))
        .collect()
}

fn fast_harness() -> Harness {
    let mut cfg = config();
    cfg.high_bandwidth = true;
    Harness::with_config(cfg)
}

#[test]
fn new_client_gets_snapshots_at_init_rate() {
    let mut h = fast_harness();
    h.join(0);
    let _ = h.received(0);

    // Ticks 1..=9: no init-rate snapshot
    for _ in 0..9 {
        h.advance_ticks(1);
    }
    assert!(snapshots(&h.received(0)).is_empty());

    h.advance_ticks(1);
    assert_eq!(h.server.state().tick(), 10);
    let received = h.received(0);
    let snaps = snapshots(&received);
    assert_eq!(snaps.len(), 1);
    // tick, tick - delta tick: no acked base yet
    let ints = snaps[0].ints();
    assert_eq!(ints[0], 10);
    assert_eq!(ints[1], 11);
}

#[test]
fn evicted_base_falls_back_to_empty_snapshot() {
    let mut h = fast_harness();
    h.join(0);

    // The client claims tick 100, which the server never stored
    h.send_input(0, 100, 1, &[]);
    h.update();
    assert_eq!(h.server.state().client(0).map(|c| c.snap_rate), Some(SnapRate::Full));
    let _ = h.received(0);

    h.advance_ticks(103);
    assert_eq!(h.server.state().tick(), 103);

    let received = h.received(0);
    let snaps = snapshots(&received);
    assert_eq!(snaps.len(), 1);
    assert!(snaps[0].is(SystemMsg::SnapSingle));
    let ints = snaps[0].ints();
    assert_eq!(ints[0], 103);
    // Delta tick -1 marks the empty base
    assert_eq!(ints[1], 104);
    assert_eq!(h.server.state().client(0).map(|c| c.snap_rate), Some(SnapRate::Recover));

    // Recovering clients only get every 50th tick
    h.advance_ticks(1);
    assert!(snapshots(&h.received(0)).is_empty());

    // The next ack restores the full rate
    h.send_input(0, 103, 105, &[]);
    h.update();
    assert_eq!(h.server.state().client(0).map(|c| c.snap_rate), Some(SnapRate::Full));
}

#[test]
fn acked_base_produces_relative_delta() {
    let mut h = fast_harness();
    h.join(0);
    h.advance_ticks(10);
    let _ = h.received(0);

    h.send_input(0, 10, 11, &[]);
    h.update();
    h.advance_ticks(1);

    let received = h.received(0);
    let snaps = snapshots(&received);
    assert_eq!(snaps.len(), 1);
    let ints = snaps[0].ints();
    assert_eq!(ints[0], 11);
    assert_eq!(ints[1], 1);
}

#[test]
fn input_moves_player_between_snapshots() {
    let mut h = fast_harness();
    h.join(0);
    let start = h.server.game().position(0).expect("player spawned");

    h.send_input(0, 0, 1, &[1]);
    h.update();
    h.advance_ticks(5);

    let moved = h.server.game().position(0).expect("player still there");
    assert!(moved > start);
}

#[test]
fn snapshots_only_reach_ingame_clients() {
    let mut h = fast_harness();
    h.link.connect(1, common::addr(1), false);
    h.update();
    h.send_info(1, "");
    h.update();
    let _ = h.link.take_sent();

    h.advance_ticks(10);
    assert!(snapshots(&h.received(1)).is_empty());
}

//! # Connection Handshake Tests
//!
//! Drives clients through the session state machine over the in-memory
//! transport and checks every gate on the way into the game.

mod common;

use common::{addr, config, Harness, Received, MAP};
use snapnet_networking::{ClientState, SystemMsg};

fn find(received: &[Received], msg: SystemMsg) -> Option<&Received> {
    received.iter().find(|r| r.is(msg))
}

// ============================================================================
// HAPPY PATH
// ============================================================================

#[test]
fn handshake_reaches_connecting_and_sends_map() {
    let mut h = Harness::new();
    h.link.connect(0, addr(0), false);
    h.update();
    assert_eq!(h.server.state().client_state(0), ClientState::PreAuth);

    h.send_client_ver(0);
    h.update();
    assert_eq!(h.server.state().client_state(0), ClientState::Auth);
    let client = h.server.state().client(0).expect("slot exists");
    assert_eq!(client.ddnet_version, 16_050);
    assert_eq!(client.ddnet_version_str, "DDNet 16.5");

    h.send_info(0, "");
    h.update();
    assert_eq!(h.server.state().client_state(0), ClientState::Connecting);

    let received = h.received(0);
    let change = find(&received, SystemMsg::MapChange).expect("map change sent");
    assert_eq!(change.string(), MAP);
    assert!(find(&received, SystemMsg::MapDetails).is_some());
    assert!(find(&received, SystemMsg::Capabilities).is_some());
    assert!(find(&received, SystemMsg::RconType).is_some());
}

#[test]
fn full_join_enters_game() {
    let mut h = Harness::new();
    h.join(0);

    assert_eq!(h.server.state().client_state(0), ClientState::InGame);
    assert_eq!(h.server.game().num_players(), 1);
    assert_eq!(h.server.state().client_count(), 1);
}

#[test]
fn map_download_serves_requested_chunks() {
    let mut h = Harness::new();
    h.link.connect(0, addr(0), false);
    h.update();
    h.send_info(0, "");
    h.update();
    let _ = h.received(0);

    // Out-of-order request: only that chunk comes back
    let mut msg = snapnet_networking::MsgPacker::system(SystemMsg::RequestMapData);
    msg.add_int(3);
    h.send(0, &msg, true);
    h.update();

    let chunks: Vec<Vec<i32>> = h
        .received(0)
        .iter()
        .filter(|r| r.is(SystemMsg::MapData))
        .map(|r| r.ints().into_iter().take(4).collect())
        .collect();
    assert_eq!(chunks.len(), 1);
    // last, crc, chunk, size: 3000 bytes end in chunk 3
    assert_eq!(chunks[0][0], 1);
    assert_eq!(chunks[0][2], 3);
    assert_eq!(chunks[0][3], 3000 - 3 * 896);
}

// ============================================================================
// REJECTIONS
// ============================================================================

#[test]
fn wrong_password_drops_client() {
    let mut cfg = config();
    cfg.password = "letmein".to_owned();
    let mut h = Harness::with_config(cfg);

    h.link.connect(0, addr(0), false);
    h.update();
    h.send_info(0, "guess");
    h.update();

    assert_eq!(h.link.take_dropped(), vec![(0, "Wrong password".to_owned())]);
    assert_eq!(h.server.state().client_state(0), ClientState::Empty);
    assert!(find(&h.received(0), SystemMsg::MapChange).is_none());
}

#[test]
fn wrong_version_drops_client() {
    let mut h = Harness::new();
    h.link.connect(0, addr(0), false);
    h.update();

    let mut msg = snapnet_networking::MsgPacker::system(SystemMsg::Info);
    msg.add_string("0.5 b67d1f1a1eea234e", 0).add_string("", 0);
    h.send(0, &msg, true);
    h.update();

    let dropped = h.link.take_dropped();
    assert_eq!(dropped.len(), 1);
    assert!(dropped[0].1.starts_with("Wrong version."));
}

#[test]
fn ready_before_info_is_ignored() {
    let mut h = Harness::new();
    h.link.connect(0, addr(0), false);
    h.update();
    let _ = h.received(0);

    h.send_system(0, SystemMsg::Ready);
    h.update();

    assert_eq!(h.server.state().client_state(0), ClientState::PreAuth);
    assert!(find(&h.received(0), SystemMsg::ConReady).is_none());
}

#[test]
fn duplicate_ready_answered_once() {
    let mut h = Harness::new();
    h.link.connect(0, addr(0), false);
    h.update();
    h.send_info(0, "");
    h.update();
    let _ = h.received(0);

    h.send_system(0, SystemMsg::Ready);
    h.send_system(0, SystemMsg::Ready);
    h.update();

    let ready = h.received(0).iter().filter(|r| r.is(SystemMsg::ConReady)).count();
    assert_eq!(ready, 1);
    assert_eq!(h.server.state().client_state(0), ClientState::Ready);
}

#[test]
fn non_vital_system_messages_are_ignored() {
    let mut h = Harness::new();
    h.link.connect(0, addr(0), false);
    h.update();

    let mut msg = snapnet_networking::MsgPacker::system(SystemMsg::Info);
    msg.add_string(snapnet_networking::GAME_NETVERSION, 0).add_string("", 0);
    h.send(0, &msg, false);
    h.update();

    assert_eq!(h.server.state().client_state(0), ClientState::PreAuth);
}

#[test]
fn per_ip_limit_refuses_extra_connection() {
    let mut cfg = config();
    cfg.max_clients_per_ip = 1;
    let mut h = Harness::with_config(cfg);

    h.link.connect(0, addr(0), false);
    h.update();
    h.link.connect(1, addr(1), false);
    h.update();

    assert_eq!(h.server.state().client_state(1), ClientState::Empty);
    assert_eq!(
        h.link.take_dropped(),
        vec![(1, "Only 1 players with the same IP are allowed".to_owned())]
    );
}

// ============================================================================
// DISCONNECTS
// ============================================================================

#[test]
fn disconnect_frees_slot_and_player() {
    let mut h = Harness::new();
    h.join(0);
    h.link.disconnect(0, "leaving");
    h.update();

    assert_eq!(h.server.state().client_state(0), ClientState::Empty);
    assert_eq!(h.server.game().num_players(), 0);
}

#[test]
fn rejoin_restarts_map_download() {
    let mut h = Harness::new();
    h.join(0);
    let _ = h.received(0);

    h.link.rejoin(0);
    h.update();

    assert!(find(&h.received(0), SystemMsg::MapChange).is_some());
}

#[test]
fn ping_is_answered() {
    let mut h = Harness::new();
    h.join(0);
    let _ = h.received(0);

    h.send_system(0, SystemMsg::Ping);
    h.update();
    assert!(find(&h.received(0), SystemMsg::PingReply).is_some());
}

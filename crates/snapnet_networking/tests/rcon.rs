//! # Remote Console Tests
//!
//! Login, brute-force protection, command access levels and key management.

mod common;

use common::{config, Harness};
use snapnet_networking::{AuthLevel, ClientState, SystemMsg};

fn harness(max_tries: i32, bantime: i32) -> Harness {
    let mut cfg = config();
    cfg.rcon.max_tries = max_tries;
    cfg.rcon.bantime = bantime;
    Harness::with_config(cfg)
}

// ============================================================================
// LOGIN
// ============================================================================

#[test]
fn default_admin_password_logs_in() {
    let mut h = harness(3, 5);
    h.join(0);
    let _ = h.received(0);

    h.send_rcon_auth(0, "", "admin-pass");
    h.update();

    assert_eq!(h.server.state().client_authed(0), AuthLevel::Admin);
    let received = h.received(0);
    let status = received
        .iter()
        .find(|r| r.is(SystemMsg::RconAuthStatus))
        .expect("auth status sent");
    assert_eq!(status.ints(), vec![1, 1]);
    assert!(Harness::rcon_lines(&received)
        .iter()
        .any(|l| l == "Admin authentication successful. Full remote console access granted."));
}

#[test]
fn moderator_password_grants_mod_level() {
    let mut h = harness(3, 5);
    h.join(0);
    h.send_rcon_auth(0, "", "mod-pass");
    h.update();
    assert_eq!(h.server.state().client_authed(0), AuthLevel::Mod);
}

#[test]
fn command_list_streamed_on_slot_turn() {
    let mut h = harness(3, 5);
    h.join(0);
    h.send_rcon_auth(0, "", "admin-pass");
    h.update();
    let _ = h.received(0);

    // Slot 0 gets its turn on tick 64
    h.advance_ticks(64);
    let announced = h.received(0).iter().filter(|r| r.is(SystemMsg::RconCmdAdd)).count();
    assert_eq!(announced, 14);
    assert_eq!(h.server.state().client(0).and_then(|c| c.rcon_cmd_cursor), None);
}

// ============================================================================
// BRUTE FORCE
// ============================================================================

#[test]
fn third_wrong_password_bans() {
    let mut h = harness(3, 5);
    h.join(0);
    let _ = h.received(0);

    for attempt in 1..=2 {
        h.send_rcon_auth(0, "", "nope");
        h.update();
        assert!(h.link.take_dropped().is_empty(), "dropped after attempt {attempt}");
        let lines = Harness::rcon_lines(&h.received(0));
        assert_eq!(lines, vec![format!("Wrong password {attempt}/3.")]);
    }

    h.send_rcon_auth(0, "", "nope");
    h.update();

    let dropped = h.link.take_dropped();
    assert_eq!(
        dropped,
        vec![(
            0,
            "You have been banned for 5 minutes (Too many remote console authentication tries)".to_owned()
        )]
    );
    assert_eq!(h.server.state().bans().entries().len(), 1);
    assert_eq!(h.server.state().client_state(0), ClientState::Empty);
}

#[test]
fn zero_bantime_only_disconnects() {
    let mut h = harness(2, 0);
    h.join(0);

    h.send_rcon_auth(0, "", "nope");
    h.send_rcon_auth(0, "", "nope");
    h.update();

    assert_eq!(
        h.link.take_dropped(),
        vec![(0, "Too many remote console authentication tries".to_owned())]
    );
    assert!(h.server.state().bans().entries().is_empty());
}

#[test]
fn unlimited_tries_never_punish() {
    let mut h = harness(0, 5);
    h.join(0);
    let _ = h.received(0);

    for _ in 0..10 {
        h.send_rcon_auth(0, "", "nope");
    }
    h.update();

    assert!(h.link.take_dropped().is_empty());
    let lines = Harness::rcon_lines(&h.received(0));
    assert_eq!(lines.len(), 10);
    assert!(lines.iter().all(|l| l == "Wrong password."));
}

// ============================================================================
// COMMANDS
// ============================================================================

#[test]
fn moderator_cannot_run_admin_commands() {
    let mut h = harness(3, 5);
    h.join(0);
    h.send_rcon_auth(0, "", "mod-pass");
    h.update();
    let _ = h.received(0);

    h.send_rcon_cmd(0, "shutdown");
    h.update();

    assert!(h.server.state().is_running());
    let lines = Harness::rcon_lines(&h.received(0));
    assert!(lines.iter().any(|l| l == "Access for command shutdown denied."));
}

#[test]
fn unauthenticated_commands_are_ignored() {
    let mut h = harness(3, 5);
    h.join(0);
    h.send_rcon_cmd(0, "shutdown");
    h.update();
    assert!(h.server.state().is_running());
}

#[test]
fn admin_kicks_other_client_but_not_itself() {
    let mut h = harness(3, 5);
    h.join(0);
    h.join(1);
    h.send_rcon_auth(0, "", "admin-pass");
    h.update();
    let _ = h.link.take_sent();

    h.send_rcon_cmd(0, "kick 0");
    h.update();
    assert_eq!(h.server.state().client_state(0), ClientState::InGame);

    h.send_rcon_cmd(0, "kick 1 spamming");
    h.update();
    assert_eq!(h.link.take_dropped(), vec![(1, "Kicked (spamming)".to_owned())]);
    assert_eq!(h.server.state().client_state(1), ClientState::Empty);
}

#[test]
fn console_shutdown_stops_loop() {
    let mut h = harness(3, 5);
    h.join(0);
    h.server.execute_console_line("shutdown maintenance");
    assert!(!h.server.update());

    h.server.shutdown();
    assert_eq!(h.link.take_dropped(), vec![(0, "maintenance".to_owned())]);
}

// ============================================================================
// KEYS
// ============================================================================

#[test]
fn named_key_login_and_removal_logs_out() {
    let mut h = harness(3, 5);
    h.join(0);
    h.join(1);
    h.server.execute_console_line("auth_add alice mod secret");
    assert!(h.server.state().auth().find_key("alice").is_some());

    h.send_rcon_auth(0, "alice", "secret");
    h.send_rcon_auth(1, "alice", "secret");
    h.update();
    assert_eq!(h.server.state().client_authed(0), AuthLevel::Mod);
    assert_eq!(h.server.state().auth_name(1), Some("alice"));
    let _ = h.link.take_sent();

    h.server.execute_console_line("auth_remove alice");

    assert!(h.server.state().auth().find_key("alice").is_none());
    for cid in 0..2 {
        assert_eq!(h.server.state().client_authed(cid), AuthLevel::None);
    }
    let received = h.received(0);
    assert!(received
        .iter()
        .any(|r| r.is(SystemMsg::RconAuthStatus) && r.ints() == vec![0, 0]));
    assert!(Harness::rcon_lines(&received)
        .iter()
        .any(|l| l == "Logged out by key removal."));
}

#[test]
fn wrong_ident_fails_login() {
    let mut h = harness(3, 5);
    h.join(0);
    h.server.execute_console_line("auth_add alice admin secret");
    h.send_rcon_auth(0, "bob", "secret");
    h.update();
    assert_eq!(h.server.state().client_authed(0), AuthLevel::None);
}

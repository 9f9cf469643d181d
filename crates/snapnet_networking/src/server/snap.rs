//! # Snapshot Distribution
//!
//! Builds one snapshot per in-game client, stores it in the client's history
//! and sends the delta against the last snapshot the client acknowledged.
//!
//! ## Delta base
//!
//! ```text
//! acked tick in history   ──▶ delta vs. that snapshot
//! acked tick evicted      ──▶ delta vs. empty snapshot, rate drops to Recover
//! ```

use super::client::{ClientState, SnapRate};
use super::Server;
use crate::integration::GameLogic;
use crate::protocol::{MsgPacker, Protocol, SystemMsg};
use crate::snapshot::{create_delta, Snapshot};
use crate::transport::ChunkFlags;
use crate::{MAX_SNAPSHOT_PACKSIZE, SERVER_TICK_SPEED};

/// Seconds of snapshots kept per client.
const HISTORY_SECONDS: i32 = 3;

fn to_int(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

impl<G: GameLogic> Server<G> {
    /// Builds and sends the snapshots of the current tick.
    pub(super) fn do_snapshot(&mut self) {
        self.game.on_pre_snap(&mut self.state);
        let tick = self.state.tick();

        if self.state.demo.as_ref().is_some_and(|d| d.is_recording()) {
            self.builder.init(Protocol::Legacy);
            self.game.on_snap(&self.state, &mut self.builder, None);
            let data = self.builder.finish().to_bytes();
            if let Some(demo) = self.state.demo.as_mut() {
                demo.record_snapshot(tick, &data);
            }
        }

        let now = self.state.clock.now();
        let sizes = *self.builder.item_sizes();
        let retention = HISTORY_SECONDS * i32::try_from(SERVER_TICK_SPEED).unwrap_or(i32::MAX);

        for cid in 0..self.state.clients.len() {
            let client = &self.state.clients[cid];
            if client.state != ClientState::InGame {
                continue;
            }
            match client.snap_rate {
                SnapRate::Recover if tick % 50 != 0 => continue,
                SnapRate::Init if tick % 10 != 0 => continue,
                _ => {}
            }

            self.builder.init(client.protocol);
            self.game.on_snap(&self.state, &mut self.builder, Some(cid));
            let snapshot = self.builder.finish();
            let crc = snapshot.crc();

            let client = &mut self.state.clients[cid];
            client.snapshots.purge_until(tick - retention);
            client.snapshots.add(tick, now, snapshot.to_bytes());

            let acked = client.last_acked_snapshot;
            let base = client
                .snapshots
                .get(acked)
                .and_then(|entry| Snapshot::from_bytes(&entry.data));
            let (base, delta_tick) = match base {
                Some(base) => (base, acked),
                None => {
                    if client.snap_rate == SnapRate::Full {
                        client.snap_rate = SnapRate::Recover;
                    }
                    (Snapshot::empty(), -1)
                }
            };

            let delta = create_delta(&base, &snapshot, &sizes);
            if delta.is_empty() {
                let mut msg = MsgPacker::system(SystemMsg::SnapEmpty);
                msg.add_int(tick).add_int(tick - delta_tick);
                self.state.send_msg(&msg, ChunkFlags::FLUSH, Some(cid));
                continue;
            }

            let Some(data) = self.state.codec.compress(&delta) else {
                tracing::warn!("failed to compress snapshot delta for cid={cid}");
                continue;
            };
            let num_parts = to_int(data.len().div_ceil(MAX_SNAPSHOT_PACKSIZE));
            for (n, part) in data.chunks(MAX_SNAPSHOT_PACKSIZE).enumerate() {
                let mut msg = if num_parts == 1 {
                    let mut msg = MsgPacker::system(SystemMsg::SnapSingle);
                    msg.add_int(tick).add_int(tick - delta_tick);
                    msg
                } else {
                    let mut msg = MsgPacker::system(SystemMsg::Snap);
                    msg.add_int(tick)
                        .add_int(tick - delta_tick)
                        .add_int(num_parts)
                        .add_int(to_int(n));
                    msg
                };
                msg.add_int(crc).add_int(to_int(part.len())).add_raw(part);
                self.state.send_msg(&msg, ChunkFlags::FLUSH, Some(cid));
            }
        }

        self.game.on_post_snap(&mut self.state);
    }
}

//! # Integration Layer
//!
//! The contracts between the server core and its collaborators, plus the
//! lobby game used by the binary and the tests.
//!
//! ```text
//! NetEvent ──▶ Server core ──▶ GameLogic (hooks)
//!                  │
//!                  ├──▶ DemoRecorder (snapshots, game messages)
//!                  └──▶ Register (server info JSON)
//! ```

pub mod lobby;
pub mod traits;

pub use lobby::LobbyGame;
pub use traits::{DemoRecorder, GameLogic, Register};

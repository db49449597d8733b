//! Obsidian Protocol - Network Engine
//!
//! The master-side state machine of the Obsidian request/reply
//! protocol:
//!
//! - **Reliable delivery**: a single in-flight reply window with
//!   timeout-driven retransmission and reply correlation
//! - **Peer registration**: periodic join-offer broadcasts and the
//!   join request/acknowledge handshake
//! - **Keepalive polling**: round-robin polls with peer-suggested,
//!   clamped intervals and inactivity marking
//!
//! The engine runs three periodic loops plus an inbound handler, all
//! serialized through one state lock so that timeout handling, sending
//! and reply correlation never interleave.

mod config;
mod engine;
mod peer;

pub use config::ObsidianConfig;
pub use engine::{Obsidian, ObsidianBuilder};
pub use peer::Peer;

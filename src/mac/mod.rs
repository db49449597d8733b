//! Obsidian Protocol - Medium Access Layer
//!
//! Half-duplex medium access for a shared serial bus (RS485 and
//! friends). Every node hears every byte, nothing arbitrates access in
//! hardware, so this layer provides:
//!
//! - **Carrier sense**: transmit only after the line has been silent
//!   for a minimum spacing
//! - **Collision recovery**: verify the local echo of every
//!   transmission, back off a random penalty on mismatch and retry
//! - **Frame assembly**: cut the inbound byte stream into frames by
//!   declared length, with an idle gap flushing desynchronized leftovers
//!
//! The layer moves opaque byte buffers; decoding them is the business
//! of whoever consumes the inbound channel.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Obsidian Engine              │
//! ├─────────────────────────────────────────┤
//! │            Serial Link                  │
//! ├─────────────────────────────────────────┤
//! │         Medium Access Layer             │  ← This module
//! │  carrier sense, collisions, assembly    │
//! ├─────────────────────────────────────────┤
//! │        Serial bus (half-duplex)         │
//! └─────────────────────────────────────────┘
//! ```

mod bus;
mod controller;

pub use bus::{BusIo, MacConfig};
pub use controller::MediumAccess;

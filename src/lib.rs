//! # Obsidian Protocol
//!
//! A reliable request/reply protocol stack for half-duplex shared
//! serial buses (RS485 and friends). A master node discovers,
//! registers, polls, and exchanges typed structured messages with
//! slave peers over a shared, unreliable link. It provides:
//!
//! - **A binary frame codec**: checksummed frames of typed, possibly
//!   nested parameters, with byte-exact round trips
//! - **Reliable delivery**: a single in-flight reply window with
//!   timeout-driven retransmission and reply correlation
//! - **Peer management**: join handshake, persisted registry, and
//!   adaptive keepalive polling
//! - **Medium access**: carrier sense, echo-verified collision
//!   detection and randomized backoff on the shared line
//!
//! ## Feature Flags
//!
//! - `mac` (default): half-duplex medium access controller
//! - `engine` (default): the Obsidian protocol engine
//!
//! ## Modules
//!
//! - [`codec`]: frame and parameter wire codec (always included)
//! - [`core`]: constants, errors, and the layer traits (always included)
//! - [`mac`]: medium access controller (requires `mac`)
//! - [`obsidian`]: the protocol engine (requires `engine`)
//! - [`link`]: serial physical layer gluing MAC and codec (requires both)
//!
//! ## Example Usage
//!
//! ```rust
//! use obsidian_protocol::prelude::*;
//!
//! // Build a frame for a thermostat peer: subject 'd' (data),
//! // command 'w' (write), one temperature parameter.
//! let mut frame = Frame::new(Address::new([0x12, 0xab]), 'd', 'w');
//! frame.add_parameter(Parameter::int16(b't', 215))?;
//!
//! // On the wire it is length-framed and checksummed.
//! let bytes = encode_frame(&frame, Some(&Address::master()))?;
//! match decode_frame(&bytes, 1024, Some(&Address::new([0x12, 0xab])))? {
//!     DecodeOutcome::Frame(received) => {
//!         assert_eq!(received.parameter(b't').and_then(Parameter::as_i32), Some(215));
//!     }
//!     DecodeOutcome::NotForUs { .. } => unreachable!(),
//! }
//! # Ok::<(), obsidian_protocol::CodecError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Frame codec (always included)
pub mod codec;

// Core constants, errors and traits (always included)
pub mod core;

// Medium access layer (feature-gated)
#[cfg(feature = "mac")]
#[cfg_attr(docsrs, doc(cfg(feature = "mac")))]
pub mod mac;

// Protocol engine (feature-gated)
#[cfg(feature = "engine")]
#[cfg_attr(docsrs, doc(cfg(feature = "engine")))]
pub mod obsidian;

// Serial physical layer (needs both halves)
#[cfg(all(feature = "mac", feature = "engine"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "mac", feature = "engine"))))]
pub mod link;

/// Prelude module for convenient imports.
pub mod prelude {
    // Codec types
    pub use crate::codec::{
        decode_frame, encode_frame, Address, CodecError, DecodeOutcome, Frame, Parameter,
        ParameterType, Struct, Value,
    };

    // Core traits and errors
    pub use crate::core::{ObsidianError, ReceiveListener, SendError};

    #[cfg(feature = "engine")]
    pub use crate::core::{
        NetworkConfig, PeerPersister, PhysicalLayer, ProtocolKind, ReplyListener,
    };

    #[cfg(feature = "mac")]
    pub use crate::mac::{BusIo, MacConfig, MediumAccess};

    #[cfg(feature = "engine")]
    pub use crate::obsidian::{Obsidian, ObsidianBuilder, ObsidianConfig, Peer};

    #[cfg(all(feature = "mac", feature = "engine"))]
    pub use crate::link::SerialLink;
}

// Re-export commonly used items at crate root
pub use codec::{Address, CodecError, Frame, Parameter, ParameterType, Struct, Value};
pub use crate::core::{ObsidianError, SendError};

#[cfg(feature = "engine")]
pub use obsidian::{Obsidian, ObsidianBuilder, ObsidianConfig, Peer};

#[cfg(all(feature = "mac", feature = "engine"))]
pub use link::SerialLink;

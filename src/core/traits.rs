//! Core traits wiring the codec, the physical layer and the engine together.

use std::io;

use crate::codec::Frame;

#[cfg(feature = "engine")]
use std::sync::Arc;

#[cfg(feature = "engine")]
use super::error::{PersistError, SendError};
#[cfg(feature = "engine")]
use crate::codec::Address;
#[cfg(feature = "engine")]
use crate::obsidian::{ObsidianConfig, Peer};

/// Receiver of decoded inbound frames.
///
/// Implementations run on the receive path and must not block; hand
/// heavy work off to another task.
pub trait ReceiveListener: Send + Sync {
    /// Called for every frame addressed to this node (or broadcast).
    fn on_frame(&self, frame: Frame);

    /// Called when the physical layer hits an I/O failure.
    ///
    /// The layer keeps running and retries on its own; this is a
    /// report, not a request for recovery. The default ignores it.
    fn on_error(&self, _error: &io::Error) {}
}

/// Receiver of the outcome of a reply-expected send.
#[cfg(feature = "engine")]
#[cfg_attr(docsrs, doc(cfg(feature = "engine")))]
pub trait ReplyListener: Send + Sync {
    /// A matching reply arrived within the retry budget.
    fn on_reply(&self, request: &Frame, reply: &Frame);

    /// Every retransmission timed out without a matching reply.
    fn on_timeout(&self, request: &Frame);
}

/// Durable storage for the master's peer registry.
///
/// The engine loads once at startup and stores after every registry
/// mutation, so restarts keep polling known peers. Each store hands
/// over the whole registry rather than the one peer that changed; a
/// backend that writes per peer can diff against its previous
/// snapshot.
#[cfg(feature = "engine")]
#[cfg_attr(docsrs, doc(cfg(feature = "engine")))]
pub trait PeerPersister: Send + Sync + 'static {
    /// Load the previously stored registry, empty when none exists.
    fn load(&self) -> Result<Vec<Peer>, PersistError>;

    /// Replace the stored registry.
    fn store(&self, peers: &[Peer]) -> Result<(), PersistError>;
}

/// Protocols a physical layer may carry profile defaults for.
#[cfg(feature = "engine")]
#[cfg_attr(docsrs, doc(cfg(feature = "engine")))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// The Obsidian request/reply engine.
    Obsidian,
}

/// Protocol configuration recommended by a physical layer.
#[cfg(feature = "engine")]
#[cfg_attr(docsrs, doc(cfg(feature = "engine")))]
#[derive(Debug, Clone)]
pub enum NetworkConfig {
    /// Timings tuned for the medium the layer drives.
    Obsidian(ObsidianConfig),
}

/// A frame transport the engine can run on.
///
/// The engine calls [`send_frame`](Self::send_frame) from its loops and
/// registers itself as a [`ReceiveListener`] for inbound traffic.
#[cfg(feature = "engine")]
#[cfg_attr(docsrs, doc(cfg(feature = "engine")))]
pub trait PhysicalLayer: Send + Sync + 'static {
    /// Set the address frames are stamped with and filtered against.
    fn set_address(&self, address: &Address);

    /// Register a listener for decoded inbound frames.
    fn add_receive_listener(&self, listener: Arc<dyn ReceiveListener>);

    /// Queue a frame for transmission.
    fn send_frame(&self, frame: &Frame) -> Result<(), SendError>;

    /// Timing profile this layer recommends for a protocol, if any.
    fn config(&self, kind: ProtocolKind) -> Option<NetworkConfig>;

    /// Stop background work. Idempotent.
    fn shutdown(&self);
}

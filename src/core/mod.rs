//! Obsidian Protocol - Core Layer
//!
//! Constants, error types and the traits that connect the layers:
//!
//! - **Constants**: addresses, reserved parameter names, management
//!   subjects and commands, engine loop timing
//! - **Errors**: [`SendError`], [`PersistError`], [`ConfigError`] and the
//!   top-level [`ObsidianError`]
//! - **Traits**: [`ReceiveListener`] for inbound frames, and (with the
//!   `engine` feature) [`PhysicalLayer`], [`ReplyListener`] and
//!   [`PeerPersister`]

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;

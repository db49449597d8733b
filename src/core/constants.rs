//! Protocol constants shared across the frame codec and the Obsidian engine.
//!
//! These values are fixed by the wire protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// ADDRESSES
// =============================================================================

/// Broadcast target, every node on the bus accepts it.
pub const BROADCAST_ADDRESS: [u8; 2] = [0x00, 0x00];

/// Well-known address of the bus master.
pub const MASTER_ADDRESS: [u8; 2] = [0x00, 0x01];

// =============================================================================
// RESERVED PARAMETER NAMES
// =============================================================================

/// Subject parameter, present in every frame.
pub const PARAM_SUBJECT: u8 = b's';

/// Command parameter, present in every frame.
pub const PARAM_COMMAND: u8 = b'c';

/// Reply-request reference carried on a frame that expects a reply.
pub const PARAM_REPLY_REQUEST: u8 = b'r';

/// Reply-response reference echoing the request it answers.
pub const PARAM_REPLY_RESPONSE: u8 = b'R';

// =============================================================================
// MANAGEMENT TRAFFIC
// =============================================================================

/// Subject of all management frames (join, poll).
pub const MGMT_SUBJECT: char = 'n';

/// Join offer (master, broadcast) and join request (slave).
pub const CMD_JOIN: char = 'j';

/// Join acknowledgement from the master.
pub const CMD_JOIN_ACK: char = 'J';

/// Poll request from the master.
pub const CMD_POLL: char = 'p';

/// Join offer window length in seconds, on the offer frame.
pub const PARAM_OFFER_WINDOW: u8 = b'w';

/// Registration identifier assigned on accept.
pub const PARAM_REGISTRATION_ID: u8 = b'i';

/// Join decision on the acknowledgement.
pub const PARAM_JOIN_DECISION: u8 = b'd';

/// Peer description string on a join request or poll reply.
pub const PARAM_PEER_DESCRIPTION: u8 = b'd';

/// Peer version string on a join request or poll reply.
pub const PARAM_PEER_VERSION: u8 = b'v';

/// Seconds until the peer next expects to be polled.
pub const PARAM_NEXT_POLL_HINT: u8 = b'n';

/// Join decision value: accepted.
pub const JOIN_ACCEPT: char = 'a';

/// Join decision value: declined.
pub const JOIN_DECLINE: char = 'd';

// =============================================================================
// ENGINE LOOP TIMING
// =============================================================================

/// Send loop tick.
pub const SEND_TICK: Duration = Duration::from_millis(10);

/// Poll loop tick while peers are registered.
pub const POLL_TICK: Duration = Duration::from_millis(50);

/// Poll loop tick while the registry is empty.
pub const POLL_TICK_IDLE: Duration = Duration::from_millis(500);

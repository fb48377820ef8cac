//! The WebSocket connection state machine.
//!
//! A [`Connection`] owns everything one endpoint needs after the TCP stream
//! exists: the opening handshake, frame capture, message reassembly,
//! fragmentation, control frames and the close handshake.
//!
//! ## Connection Lifecycle
//!
//! 1. **Handshaking** - Upgrade request/response in progress
//! 2. **Open** - Data flows both ways
//! 3. **LocalClosePending / RemoteClosePending** - One side sent Close
//! 4. **Closed** - Both sides closed, or the deadline expired

mod accumulator;
#[allow(clippy::module_inception)]
mod connection;
mod fragmenter;
mod role;
mod state;

pub use accumulator::FrameAccumulator;
pub use connection::{Connection, Event};
pub use fragmenter::{MessageFragmenter, TextFragmenter};
pub use role::Role;
pub use state::ConnectionState;

// =============================================================================
// FIX 4.4 — transport, framing, session state, and the session run-loops
// =============================================================================

pub mod client;
pub mod framer;
pub mod message;
pub mod session;
pub mod transport;

pub use framer::{FrameError, InboundFramer};
pub use message::{FixMessage, SessionIdentity};
pub use session::{SessionKind, SessionState};
pub use transport::{FixTransport, TransportError};

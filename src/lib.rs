//! astrogate: session and exposure orchestration for remotely operated
//! astronomical instruments.
//!
//! Cameras, telescopes, focusers and filter wheels reachable over two
//! incompatible remote protocols (a poll-style property protocol and a
//! push-style event protocol) are driven through one uniform session
//! contract. The crate layers up from the backend channel abstraction,
//! through per-kind sessions and the camera exposure state machine, to the
//! command dispatcher and its websocket transport.

pub mod backend;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod imaging;
pub mod server;
pub mod session;

pub use error::{GateError, GateResult};

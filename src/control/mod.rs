//! Bidirectional control protocol engine.
//!
//! [`ControlChannel`] owns the peer's stdin and stdout. Requests from this
//! side are correlated by a per-channel request id (`req_<n>_<token>`);
//! requests from the peer are answered by [`PeerHandlers`] on their own
//! tasks so a slow hook never blocks message delivery.

mod channel;
mod handlers;
mod pending;

pub use channel::{ControlChannel, MessageReceiver, PeerWatch};
pub use handlers::PeerHandlers;

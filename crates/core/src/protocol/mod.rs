//! RTSP client-side protocol pieces (RFC 2326).
//!
//! Message framing and the handshake sequence live in
//! [`transport::tcp`](crate::transport::tcp); this module only knows how to
//! build requests, parse responses and SDP, and answer auth challenges.
//!
//! ## Handshake
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate interleaved TCP channels |
//! | PLAY | §10.5 | Start media delivery |
//! | PAUSE | §10.6 | Suspend media delivery |
//! | TEARDOWN | §10.7 | Destroy session |
//! | GET_PARAMETER | §10.8 | Keepalive |

pub mod auth;
pub mod request;
pub mod response;
pub mod sdp;
pub mod transport;

pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
pub use sdp::SessionDescription;

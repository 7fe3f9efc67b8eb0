//! Decode video and audio elementary streams from a framed device channel.
//!
//! # Crate Structure
//!
//! - [`transport`]: Device channel abstraction (socket bridge, in-memory)
//! - [`frame`]: Magic-delimited frame reader, buffer pool, cancellation
//! - [`session`]: Per-stream decode sessions with stall detection

/// Re-export transport types.
pub mod transport {
    pub use avtap_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use avtap_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use avtap_session::*;
}

pub mod config;
pub mod congestion;
pub mod error;
pub mod feedback;
pub mod media;
pub mod protocol;
pub mod rtp;
pub mod runtime;
pub mod server;
pub mod session;
pub mod transport;
pub mod wire;

pub use config::{ClientConfig, ServerConfig, StreamConfig};
pub use error::{Result, StreamError};
pub use media::{FrameCompressor, FrameSink, FrameSource, FrameSynchronizer, StatsSink};
pub use server::{SessionRegistry, StreamServer};
pub use session::{ClientSession, ServerSession, SessionId, SessionState};

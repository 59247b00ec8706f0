// parkwatch-api: Transport layer for the parkwatch detection backend
// (WebSocket event stream + HTTP liveness probe).

pub mod error;
pub mod event;
pub mod probe;
pub mod stream;

pub use error::Error;
pub use event::{ControlMessage, FramePush, InboundEvent};
pub use probe::{ProbeConfig, Reachability, ReachabilityMonitor};
pub use stream::{StreamClient, StreamConfig, StreamState};

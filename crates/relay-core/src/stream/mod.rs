pub mod frame;
pub mod sse;

pub use frame::{AgentEvent, FrameMeta, parse_frame};
pub use sse::{FrameStream, parse_sse_frames};

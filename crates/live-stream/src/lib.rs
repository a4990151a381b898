//! Live chart mode: history seed plus a streamed, self-healing tail.

pub mod controller;
pub mod status;

pub use controller::LiveStreamController;
pub use status::StreamStatus;

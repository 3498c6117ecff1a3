//! Host side of the drone link: UDP control traffic, keep-alive, burst maneuvers and a video feed
//! that survives dropouts.

pub mod config;
pub mod control;
pub mod error;
pub mod ffmpeg;
pub mod flight;
pub mod frame;
pub mod heartbeat;
pub mod link;
pub mod stream;

pub use config::{BurstConfig, HeartbeatConfig, LinkConfig, StreamConfig};
pub use control::{ControlLoop, GesturePolicy, HandDetector, NoHands, Observe, Tick, Trigger};
pub use error::{FlightError, StreamError, TransportError};
pub use ffmpeg::FfmpegBackend;
pub use flight::{Action, FlightController, FlightHandle};
pub use frame::{BBox, Frame, FrameRate};
pub use heartbeat::HeartbeatScheduler;
pub use link::{Link, UdpLink};
pub use stream::{
    ConnectionState, Decoder, StreamManager, StreamSource, VideoBackend, VideoCapture, VideoSource,
};

use std::io;
use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Could not bind a socket for {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("Sending {len} bytes to {addr} failed: {source}")]
    Send {
        addr: SocketAddr,
        len: usize,
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Failed to open {what}: {reason}")]
    Open { what: String, reason: String },

    #[error("No video source could be opened")]
    NoVideoSource,

    #[error("Video stream lost, gave up after {0} reconnect attempts")]
    Exhausted(u32),

    #[error("Invalid in the current stream state: {0}")]
    InvalidState(&'static str),
}

impl StreamError {
    /// Only exhaustion ends a session, everything else is retried or rejected in place.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlightError {
    #[error("Flight worker has shut down")]
    WorkerGone,
}

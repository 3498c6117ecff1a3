use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

pub const DRONE_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 7099));
pub const RTSP_URL: &str = "rtsp://192.168.1.1:7070/webcam";
pub const WEBCAM_INDEX: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub drone: SocketAddr,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { drone: DRONE_ADDR }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// How long `stop` waits for the sender thread before giving up on it.
    pub stop_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

/// Timing of the repeated sends that carry a maneuver flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstConfig {
    pub period: Duration,
    pub takeoff: Duration,
    pub land: Duration,
    pub emergency_stop: Duration,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(50),
            takeoff: Duration::from_secs(1),
            land: Duration::from_millis(1500),
            emergency_stop: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub rtsp_url: String,
    pub webcam_index: u32,
    /// Pause after releasing a capture before opening the next one.
    pub reopen_delay: Duration,
    /// Pause before retrying the primary source with the default decoder.
    pub decoder_retry_delay: Duration,
    pub empty_read_delay: Duration,
    pub empty_read_limit: u32,
    pub reconnect_limit: u32,
    pub reconnect_backoff: Duration,
    /// Reopen delay after a camera switch, the drone restarts its encoder meanwhile.
    pub switch_settle: Duration,
    pub switch_retry_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rtsp_url: RTSP_URL.to_owned(),
            webcam_index: WEBCAM_INDEX,
            reopen_delay: Duration::from_millis(300),
            decoder_retry_delay: Duration::from_millis(200),
            empty_read_delay: Duration::from_millis(50),
            empty_read_limit: 8,
            reconnect_limit: 5,
            reconnect_backoff: Duration::from_millis(800),
            switch_settle: Duration::from_millis(700),
            switch_retry_delay: Duration::from_millis(500),
        }
    }
}

impl StreamConfig {
    /// Same limits, no waiting.
    pub fn immediate() -> Self {
        Self {
            reopen_delay: Duration::ZERO,
            decoder_retry_delay: Duration::ZERO,
            empty_read_delay: Duration::ZERO,
            reconnect_backoff: Duration::ZERO,
            switch_settle: Duration::ZERO,
            switch_retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

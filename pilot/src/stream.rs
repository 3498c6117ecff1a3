//! Video acquisition with fallback and reconnection.
//!
//! ```text
//! Disconnected -> ConnectingPrimary -> Streaming(Drone)
//!                         |
//!                         v
//!                 ConnectingFallback -> Streaming(LocalWebcam)
//!                         |
//!                         v
//!                   Disconnected (NoVideoSource)
//!
//! Streaming(_) --stall--> Reconnecting{attempt} -> Streaming(_) | Exhausted
//! ```
//!
//! All waiting happens on the caller's thread: a reconnect blocks [`StreamManager::read_frame`]
//! until it either succeeds or runs out of attempts.

use std::fmt::Display;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use protocol::{CameraIndex, camera_select};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::frame::Frame;
use crate::link::Link;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Drone(CameraIndex),
    LocalWebcam,
}

impl StreamSource {
    /// Fixed per-source correction: the drone sensor is mounted sideways, the webcam is shown
    /// as a mirror.
    pub fn postprocess(self, frame: Frame) -> Frame {
        match self {
            Self::Drone(_) => frame.rotate_clockwise(),
            Self::LocalWebcam => frame.mirror(),
        }
    }
}

impl Display for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drone(camera) => write!(f, "drone camera {}", camera.number()),
            Self::LocalWebcam => f.write_str("local webcam"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    ConnectingPrimary,
    ConnectingFallback,
    Streaming(StreamSource),
    Reconnecting { attempt: u32 },
    Exhausted,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::ConnectingPrimary => f.write_str("Connecting to drone"),
            Self::ConnectingFallback => f.write_str("Connecting to webcam"),
            Self::Streaming(source) => write!(f, "Streaming from {source}"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting ({attempt})"),
            Self::Exhausted => f.write_str("Gave up"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    Rtsp(String),
    Webcam(u32),
}

impl Display for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rtsp(url) => f.write_str(url),
            Self::Webcam(index) => write!(f, "webcam {index}"),
        }
    }
}

/// Decoding setup to try a source with. `Default` is the fallback when `Preferred` won't open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    Preferred,
    Default,
}

/// An opened source. `None` means no frame right now, not necessarily that it is gone for good.
pub trait VideoCapture: Send {
    fn read(&mut self) -> Option<Frame>;
}

pub trait VideoBackend {
    fn open(
        &mut self,
        source: &VideoSource,
        decoder: Decoder,
    ) -> Result<Box<dyn VideoCapture>, StreamError>;
}

impl<F> VideoBackend for F
where
    F: FnMut(&VideoSource, Decoder) -> Result<Box<dyn VideoCapture>, StreamError>,
{
    fn open(
        &mut self,
        source: &VideoSource,
        decoder: Decoder,
    ) -> Result<Box<dyn VideoCapture>, StreamError> {
        self(source, decoder)
    }
}

type StateObserver = Box<dyn FnMut(ConnectionState) + Send>;

pub struct StreamManager<B> {
    backend: B,
    link: Arc<dyn Link>,
    config: StreamConfig,
    state: ConnectionState,
    on_state: Option<StateObserver>,
    capture: Option<Box<dyn VideoCapture>>,
    camera: CameraIndex,
    empty_reads: u32,
}

impl<B: VideoBackend> StreamManager<B> {
    /// `link` is only used to tell the drone which camera to stream.
    pub fn new(backend: B, link: Arc<dyn Link>, config: StreamConfig) -> Self {
        Self {
            backend,
            link,
            config,
            state: ConnectionState::Disconnected,
            on_state: None,
            capture: None,
            camera: CameraIndex::One,
            empty_reads: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Calls `observer` with every state the manager moves into, including the ones it passes
    /// through inside a blocking [`read_frame`](Self::read_frame).
    pub fn on_state_change(&mut self, observer: impl FnMut(ConnectionState) + Send + 'static) {
        self.on_state = Some(Box::new(observer));
    }

    pub fn camera(&self) -> CameraIndex {
        self.camera
    }

    pub fn source(&self) -> Option<StreamSource> {
        match self.state {
            ConnectionState::Streaming(source) => Some(source),
            _ => None,
        }
    }

    /// Drone stream first (preferred decoder, then default), local webcam second.
    pub fn open(&mut self) -> Result<StreamSource, StreamError> {
        self.release(self.config.reopen_delay);

        match self.connect_primary() {
            Ok(capture) => return Ok(self.streaming(capture, StreamSource::Drone(self.camera))),
            Err(e) => warn!("Drone stream unavailable: {e}"),
        }

        self.set_state(ConnectionState::ConnectingFallback);
        let webcam = VideoSource::Webcam(self.config.webcam_index);
        match self.backend.open(&webcam, Decoder::Default) {
            Ok(capture) => Ok(self.streaming(capture, StreamSource::LocalWebcam)),
            Err(e) => {
                warn!("Webcam unavailable: {e}");
                self.set_state(ConnectionState::Disconnected);
                Err(StreamError::NoVideoSource)
            }
        }
    }

    pub fn close(&mut self) {
        if self.capture.take().is_some() {
            info!("Stream closed");
        }
        self.set_state(ConnectionState::Disconnected);
        self.empty_reads = 0;
    }

    /// Blocks until a frame arrives, reconnecting as needed. Only
    /// [`StreamError::Exhausted`] comes out of here.
    ///
    /// Every empty read but the last waits `empty_read_delay`. The read that reaches
    /// `empty_read_limit` goes straight to reconnecting, where [`open`](Self::open) waits
    /// `reopen_delay` before opening again.
    pub fn read_frame(&mut self) -> Result<Frame, StreamError> {
        loop {
            let source = match self.state {
                ConnectionState::Exhausted => {
                    return Err(StreamError::Exhausted(self.config.reconnect_limit));
                }
                ConnectionState::Streaming(source) => source,
                _ => {
                    self.reconnect()?;
                    continue;
                }
            };
            let Some(capture) = self.capture.as_mut() else {
                self.set_state(ConnectionState::Disconnected);
                continue;
            };

            if let Some(frame) = capture.read() {
                self.empty_reads = 0;
                return Ok(source.postprocess(frame));
            }

            self.empty_reads += 1;
            if self.empty_reads >= self.config.empty_read_limit {
                warn!("No frames for {} reads, reopening", self.empty_reads);
                self.empty_reads = 0;
                self.set_state(ConnectionState::Reconnecting { attempt: 0 });
            } else {
                thread::sleep(self.config.empty_read_delay);
            }
        }
    }

    /// Toggles between the drone's two cameras. The drone restarts its encoder on a switch, so
    /// the stream is reopened after a settle delay.
    pub fn switch_camera(&mut self) -> Result<CameraIndex, StreamError> {
        let ConnectionState::Streaming(StreamSource::Drone(current)) = self.state else {
            warn!("Ignoring camera switch while {}", self.state);
            return Err(StreamError::InvalidState(
                "camera switch needs the drone stream",
            ));
        };

        let target = current.other();
        info!("Switching to camera {}", target.number());
        if let Err(e) = self.link.send(&camera_select(target)) {
            warn!("Camera select not sent: {e}");
        }

        self.release(self.config.switch_settle);
        let capture = match self.connect_primary() {
            Ok(capture) => capture,
            Err(e) => {
                warn!("Stream did not come back after camera switch: {e}");
                thread::sleep(self.config.switch_retry_delay + self.config.switch_settle);
                match self.connect_primary() {
                    Ok(capture) => capture,
                    Err(e) => {
                        warn!("Camera switch failed, staying on camera {}", current.number());
                        self.set_state(ConnectionState::Disconnected);
                        return Err(e);
                    }
                }
            }
        };

        self.camera = target;
        self.empty_reads = 0;
        self.streaming(capture, StreamSource::Drone(target));
        Ok(target)
    }

    fn connect_primary(&mut self) -> Result<Box<dyn VideoCapture>, StreamError> {
        self.set_state(ConnectionState::ConnectingPrimary);
        let rtsp = VideoSource::Rtsp(self.config.rtsp_url.clone());
        match self.backend.open(&rtsp, Decoder::Preferred) {
            Ok(capture) => Ok(capture),
            Err(e) => {
                info!("{e}, retrying with default decoder");
                thread::sleep(self.config.decoder_retry_delay);
                self.backend.open(&rtsp, Decoder::Default)
            }
        }
    }

    fn reconnect(&mut self) -> Result<(), StreamError> {
        let limit = self.config.reconnect_limit;
        let mut attempt = match self.state {
            ConnectionState::Reconnecting { attempt } => attempt,
            _ => 0,
        };

        loop {
            attempt += 1;
            self.set_state(ConnectionState::Reconnecting { attempt });
            info!("Reconnecting, attempt {attempt}/{limit}");

            match self.open() {
                Ok(_) => return Ok(()),
                Err(e) if attempt >= limit => {
                    error!("Reconnect attempt {attempt} failed: {e}, giving up");
                    self.set_state(ConnectionState::Exhausted);
                    return Err(StreamError::Exhausted(attempt));
                }
                Err(e) => {
                    warn!("Reconnect attempt {attempt} failed: {e}");
                    self.set_state(ConnectionState::Reconnecting { attempt });
                    thread::sleep(self.config.reconnect_backoff);
                }
            }
        }
    }

    fn streaming(&mut self, capture: Box<dyn VideoCapture>, source: StreamSource) -> StreamSource {
        self.capture = Some(capture);
        self.set_state(ConnectionState::Streaming(source));
        info!("Streaming from {source}");
        source
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Some(observer) = self.on_state.as_mut() {
            observer(state);
        }
    }

    fn release(&mut self, delay: Duration) {
        if self.capture.take().is_some() {
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::link::recording::RecordingLink;

    struct Scripted(VecDeque<Option<Frame>>);

    impl VideoCapture for Scripted {
        fn read(&mut self) -> Option<Frame> {
            self.0.pop_front().flatten()
        }
    }

    fn frames(reads: Vec<Option<Frame>>) -> Box<dyn VideoCapture> {
        Box::new(Scripted(reads.into()))
    }

    fn tall() -> Frame {
        Frame::new(1, 2, vec![1, 1, 1, 2, 2, 2]).unwrap()
    }

    fn wide() -> Frame {
        Frame::new(2, 1, vec![1, 1, 1, 2, 2, 2]).unwrap()
    }

    fn fail(source: &VideoSource) -> Result<Box<dyn VideoCapture>, StreamError> {
        Err(StreamError::Open {
            what: source.to_string(),
            reason: "scripted".into(),
        })
    }

    type Calls = Arc<Mutex<Vec<(VideoSource, Decoder)>>>;

    /// Backend answering each open from `policy`, recording every call.
    fn backend(
        mut policy: impl FnMut(&VideoSource, Decoder) -> Result<Box<dyn VideoCapture>, StreamError>,
    ) -> (
        impl FnMut(&VideoSource, Decoder) -> Result<Box<dyn VideoCapture>, StreamError>,
        Calls,
    ) {
        let calls = Calls::default();
        let recorded = calls.clone();
        let backend = move |source: &VideoSource, decoder| {
            recorded.lock().unwrap().push((source.clone(), decoder));
            policy(source, decoder)
        };
        (backend, calls)
    }

    fn manager<B: VideoBackend>(backend: B, link: &RecordingLink) -> StreamManager<B> {
        StreamManager::new(backend, Arc::new(link.clone()), StreamConfig::immediate())
    }

    fn rtsp() -> VideoSource {
        VideoSource::Rtsp(StreamConfig::default().rtsp_url)
    }

    #[test]
    fn falls_back_to_webcam() {
        let (backend, calls) = backend(|source, _| match source {
            VideoSource::Rtsp(_) => fail(source),
            VideoSource::Webcam(_) => Ok(frames(vec![Some(wide())])),
        });
        let mut stream = manager(backend, &RecordingLink::default());

        assert_eq!(stream.open().unwrap(), StreamSource::LocalWebcam);
        assert_eq!(stream.state(), ConnectionState::Streaming(StreamSource::LocalWebcam));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                (rtsp(), Decoder::Preferred),
                (rtsp(), Decoder::Default),
                (VideoSource::Webcam(0), Decoder::Default),
            ]
        );

        // mirrored
        let frame = stream.read_frame().unwrap();
        assert_eq!(frame.pixels(), &[2, 2, 2, 1, 1, 1]);
    }

    #[test]
    fn default_decoder_rescues_primary() {
        let (backend, calls) = backend(|source, decoder| match decoder {
            Decoder::Preferred => fail(source),
            Decoder::Default => Ok(frames(vec![Some(wide())])),
        });
        let mut stream = manager(backend, &RecordingLink::default());

        assert_eq!(stream.open().unwrap(), StreamSource::Drone(CameraIndex::One));
        assert_eq!(calls.lock().unwrap().len(), 2);

        // rotated a quarter turn
        let frame = stream.read_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (1, 2));
    }

    #[test]
    fn no_source_then_exhausted() {
        let (backend, calls) = backend(|source, _| fail(source));
        let mut stream = manager(backend, &RecordingLink::default());

        assert!(matches!(stream.open(), Err(StreamError::NoVideoSource)));
        assert_eq!(stream.state(), ConnectionState::Disconnected);

        let err = stream.read_frame().unwrap_err();
        assert!(matches!(err, StreamError::Exhausted(5)));
        assert!(err.is_terminal());
        assert_eq!(stream.state(), ConnectionState::Exhausted);
        // initial open plus five reconnects, three opens each
        assert_eq!(calls.lock().unwrap().len(), 18);

        assert!(matches!(stream.read_frame(), Err(StreamError::Exhausted(_))));
        assert_eq!(calls.lock().unwrap().len(), 18);
    }

    #[test]
    fn stalled_stream_is_reopened() {
        let mut opens = 0;
        let (backend, calls) = backend(move |_, _| {
            opens += 1;
            Ok(match opens {
                1 => frames(vec![Some(tall()), None, None, None, None, None, None, None, None]),
                _ => frames(vec![Some(wide())]),
            })
        });
        let mut stream = manager(backend, &RecordingLink::default());
        stream.open().unwrap();

        assert_eq!(stream.read_frame().unwrap().width(), 2);
        // eight empty reads, then a fresh capture
        assert_eq!(stream.read_frame().unwrap().width(), 1);
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(
            stream.state(),
            ConnectionState::Streaming(StreamSource::Drone(CameraIndex::One))
        );
    }

    #[test]
    fn eighth_empty_read_skips_the_read_delay() {
        let mut opens = 0;
        let (backend, _) = backend(move |_, _| {
            opens += 1;
            Ok(match opens {
                1 => frames(vec![Some(tall()), None, None, None, None, None, None, None, None]),
                _ => frames(vec![Some(wide())]),
            })
        });
        let config = StreamConfig {
            empty_read_delay: Duration::from_millis(100),
            ..StreamConfig::immediate()
        };
        let mut stream = StreamManager::new(backend, Arc::new(RecordingLink::default()), config);
        stream.open().unwrap();
        stream.read_frame().unwrap();

        let start = std::time::Instant::now();
        stream.read_frame().unwrap();
        let elapsed = start.elapsed();
        // seven delays, not eight
        assert!(elapsed >= Duration::from_millis(700), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(790), "{elapsed:?}");
    }

    #[test]
    fn observer_sees_reconnects_and_giving_up() {
        let (backend, _) = backend(|source, _| fail(source));
        let mut stream = manager(backend, &RecordingLink::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = seen.clone();
        stream.on_state_change(move |state| observed.lock().unwrap().push(state));

        assert!(stream.open().is_err());
        assert!(stream.read_frame().is_err());

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ConnectionState::ConnectingPrimary);
        assert!(seen.contains(&ConnectionState::Reconnecting { attempt: 1 }));
        assert!(seen.contains(&ConnectionState::Reconnecting { attempt: 5 }));
        assert_eq!(seen.last(), Some(&ConnectionState::Exhausted));
        assert!(seen.windows(2).all(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn short_gaps_do_not_reconnect() {
        let reads = vec![None, None, None, None, None, None, None, Some(wide())];
        let (backend, calls) = backend(move |_, _| Ok(frames(reads.clone())));
        let mut stream = manager(backend, &RecordingLink::default());
        stream.open().unwrap();

        stream.read_frame().unwrap();
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn reconnect_recovers_after_failures() {
        let mut opens = 0;
        let (backend, _) = backend(move |source, _| {
            opens += 1;
            match opens {
                1 => Ok(frames(vec![])),
                // two whole reconnect rounds fail: primary twice and webcam each
                2..=7 => fail(source),
                _ => Ok(frames(vec![Some(wide())])),
            }
        });
        let mut stream = manager(backend, &RecordingLink::default());
        stream.open().unwrap();

        assert!(stream.read_frame().is_ok());
        assert!(matches!(stream.state(), ConnectionState::Streaming(_)));
    }

    #[test]
    fn camera_switch_rejected_on_webcam() {
        let (backend, _) = backend(|source, _| match source {
            VideoSource::Rtsp(_) => fail(source),
            VideoSource::Webcam(_) => Ok(frames(vec![])),
        });
        let link = RecordingLink::default();
        let mut stream = manager(backend, &link);
        stream.open().unwrap();

        assert!(matches!(
            stream.switch_camera(),
            Err(StreamError::InvalidState(_))
        ));
        assert_eq!(stream.state(), ConnectionState::Streaming(StreamSource::LocalWebcam));
        assert!(link.packets().is_empty());
    }

    #[test]
    fn camera_switch_sends_select_and_reopens() {
        let (backend, calls) = backend(|_, _| Ok(frames(vec![Some(wide())])));
        let link = RecordingLink::default();
        let mut stream = manager(backend, &link);
        stream.open().unwrap();

        assert_eq!(stream.switch_camera().unwrap(), CameraIndex::Two);
        assert_eq!(stream.camera(), CameraIndex::Two);
        assert_eq!(
            stream.state(),
            ConnectionState::Streaming(StreamSource::Drone(CameraIndex::Two))
        );
        assert_eq!(calls.lock().unwrap().len(), 2);

        assert_eq!(stream.switch_camera().unwrap(), CameraIndex::One);
        assert_eq!(link.bytes(), vec![vec![6, 2], vec![6, 1]]);
    }

    #[test]
    fn failed_camera_switch_keeps_camera() {
        let mut opens = 0;
        let (backend, calls) = backend(move |source, _| {
            opens += 1;
            match opens {
                1 => Ok(frames(vec![])),
                _ => fail(source),
            }
        });
        let link = RecordingLink::default();
        let mut stream = manager(backend, &link);
        stream.open().unwrap();

        assert!(matches!(
            stream.switch_camera(),
            Err(StreamError::Open { .. })
        ));
        assert_eq!(stream.camera(), CameraIndex::One);
        assert_eq!(stream.state(), ConnectionState::Disconnected);
        assert_eq!(link.bytes(), vec![vec![6, 2]]);
        // two rounds of preferred + default, never the webcam
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        assert!(calls.iter().all(|(source, _)| matches!(source, VideoSource::Rtsp(_))));
    }

    #[test]
    fn close_disconnects() {
        let (backend, _) = backend(|_, _| Ok(frames(vec![])));
        let mut stream = manager(backend, &RecordingLink::default());
        stream.open().unwrap();

        stream.close();
        assert_eq!(stream.state(), ConnectionState::Disconnected);
        assert_eq!(stream.source(), None);
    }
}

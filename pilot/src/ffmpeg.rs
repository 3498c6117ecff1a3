//! Video backend that lets an `ffmpeg` child process do the decoding and reads raw RGB24 frames
//! from its stdout.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::StreamError;
use crate::frame::Frame;
use crate::stream::{Decoder, VideoBackend, VideoCapture, VideoSource};

/// Socket and I/O timeout handed to ffmpeg for RTSP, in microseconds. A drone that is gone ends
/// the process instead of leaving it waiting on the network.
const RTSP_TIMEOUT_US: &str = "5000000";

#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    program: PathBuf,
    width: usize,
    height: usize,
    /// How long `open` waits for the first frame.
    open_timeout: Duration,
    /// How long a read waits before reporting no frame.
    read_timeout: Duration,
}

impl FfmpegBackend {
    /// Frames are scaled to `width` x `height` before any rotation.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            width,
            height,
            open_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_millis(250),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeouts(mut self, open: Duration, read: Duration) -> Self {
        self.open_timeout = open;
        self.read_timeout = read;
        self
    }

    fn command(&self, source: &VideoSource, decoder: Decoder) -> Command {
        let mut command = Command::new(&self.program);
        command.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);

        match (source, decoder) {
            (VideoSource::Rtsp(url), Decoder::Preferred) => {
                command
                    .args(["-rtsp_transport", "tcp"])
                    .args(["-fflags", "nobuffer", "-flags", "low_delay"])
                    .args(["-timeout", RTSP_TIMEOUT_US])
                    .args(["-rw_timeout", RTSP_TIMEOUT_US])
                    .arg("-i")
                    .arg(url);
            }
            (VideoSource::Rtsp(url), Decoder::Default) => {
                command.args(["-rw_timeout", RTSP_TIMEOUT_US]).arg("-i").arg(url);
            }
            (VideoSource::Webcam(index), _) => {
                command
                    .args(["-f", "v4l2", "-i"])
                    .arg(format!("/dev/video{index}"));
            }
        }

        command
            .arg("-an")
            .args(["-vf", &format!("scale={}:{}", self.width, self.height)])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"]);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl VideoBackend for FfmpegBackend {
    /// Only counts as open once the first frame has been decoded.
    fn open(
        &mut self,
        source: &VideoSource,
        decoder: Decoder,
    ) -> Result<Box<dyn VideoCapture>, StreamError> {
        let failed = |reason: String| StreamError::Open {
            what: source.to_string(),
            reason,
        };

        let mut child = self
            .command(source, decoder)
            .spawn()
            .map_err(|e| failed(format!("could not start {}: {e}", self.program.display())))?;

        let last_error = Arc::new(Mutex::new(None));
        if let Some(stderr) = child.stderr.take() {
            let last_error = last_error.clone();
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!("ffmpeg: {line}");
                    if let Ok(mut last) = last_error.lock() {
                        *last = Some(line);
                    }
                }
            });
        }

        let Some(stdout) = child.stdout.take() else {
            stop(&mut child);
            return Err(failed("no stdout from ffmpeg".into()));
        };

        let (tx_frames, frames) = mpsc::sync_channel(2);
        let (width, height) = (self.width, self.height);
        thread::spawn(move || read_frames(stdout, width, height, tx_frames));

        let mut capture = FfmpegCapture {
            child,
            frames,
            read_timeout: self.read_timeout,
            pending: None,
        };
        match capture.frames.recv_timeout(self.open_timeout) {
            Ok(frame) => {
                info!("Opened {source} ({decoder:?} decoder)");
                capture.pending = Some(frame);
                Ok(Box::new(capture))
            }
            Err(e) => {
                stop(&mut capture.child);
                let reason = last_error
                    .lock()
                    .ok()
                    .and_then(|mut last| last.take())
                    .unwrap_or_else(|| match e {
                        RecvTimeoutError::Timeout => {
                            format!("no frame within {:?}", self.open_timeout)
                        }
                        RecvTimeoutError::Disconnected => {
                            "stream ended before the first frame".into()
                        }
                    });
                Err(failed(reason))
            }
        }
    }
}

/// Pumps whole frames from ffmpeg's stdout until the pipe ends or the capture is dropped.
fn read_frames(
    mut stdout: ChildStdout,
    width: usize,
    height: usize,
    tx_frames: mpsc::SyncSender<Frame>,
) {
    loop {
        let mut pixels = vec![0; Frame::byte_len(width, height)];
        if let Err(e) = stdout.read_exact(&mut pixels) {
            debug!("ffmpeg output ended: {e}");
            return;
        }
        let Some(frame) = Frame::new(width, height, pixels) else {
            return;
        };
        if tx_frames.send(frame).is_err() {
            return;
        }
    }
}

struct FfmpegCapture {
    child: Child,
    frames: mpsc::Receiver<Frame>,
    read_timeout: Duration,
    /// First frame, read during open.
    pending: Option<Frame>,
}

impl VideoCapture for FfmpegCapture {
    /// `None` once `read_timeout` passes without a frame, or right away after ffmpeg is gone.
    fn read(&mut self) -> Option<Frame> {
        if let Some(frame) = self.pending.take() {
            return Some(frame);
        }
        self.frames.recv_timeout(self.read_timeout).ok()
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        stop(&mut self.child);
    }
}

fn stop(child: &mut Child) {
    _ = child.kill();
    _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: &Command) -> Vec<String> {
        command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    fn has_pair(args: &[String], key: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == key && w[1] == value)
    }

    #[test]
    fn preferred_decoder_tunes_rtsp() {
        let backend = FfmpegBackend::new(320, 240);
        let url = VideoSource::Rtsp("rtsp://192.168.1.1:7070/webcam".into());

        let preferred = args(&backend.command(&url, Decoder::Preferred));
        assert!(has_pair(&preferred, "-rtsp_transport", "tcp"));
        assert!(has_pair(&preferred, "-i", "rtsp://192.168.1.1:7070/webcam"));
        assert!(has_pair(&preferred, "-vf", "scale=320:240"));
        assert!(has_pair(&preferred, "-pix_fmt", "rgb24"));
        assert_eq!(preferred.last().map(String::as_str), Some("-"));

        let default = args(&backend.command(&url, Decoder::Default));
        assert!(!default.iter().any(|arg| arg == "-rtsp_transport"));
        assert!(has_pair(&default, "-rw_timeout", RTSP_TIMEOUT_US));
        assert!(has_pair(&default, "-i", "rtsp://192.168.1.1:7070/webcam"));
    }

    #[test]
    fn webcam_reads_v4l2_device() {
        let backend = FfmpegBackend::new(640, 480);
        let args = args(&backend.command(&VideoSource::Webcam(2), Decoder::Default));

        assert!(has_pair(&args, "-f", "v4l2"));
        assert!(has_pair(&args, "-i", "/dev/video2"));
    }

    #[test]
    fn missing_program_fails_to_open() {
        let mut backend =
            FfmpegBackend::new(4, 4).with_program("/nonexistent/definitely-not-ffmpeg");

        let result = backend.open(&VideoSource::Webcam(0), Decoder::Default);
        assert!(matches!(result, Err(StreamError::Open { .. })));
    }

    /// Shell script standing in for ffmpeg. It ignores its arguments.
    #[cfg(unix)]
    fn fake_ffmpeg(name: &str, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = std::env::temp_dir().join(format!("pilot-{name}-{}.sh", std::process::id()));
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// One 4x4 frame, then silence with the pipe still open.
    #[cfg(unix)]
    fn stalling_backend(name: &str) -> FfmpegBackend {
        let program = fake_ffmpeg(name, "head -c 48 /dev/zero\nexec sleep 20");
        FfmpegBackend::new(4, 4)
            .with_program(program)
            .with_timeouts(Duration::from_secs(5), Duration::from_millis(50))
    }

    #[cfg(unix)]
    #[test]
    fn stalled_feed_reads_empty() {
        let mut backend = stalling_backend("stall");
        let mut capture = backend
            .open(&VideoSource::Webcam(0), Decoder::Default)
            .unwrap();

        assert_eq!(capture.read().map(|frame| frame.width()), Some(4));
        let start = std::time::Instant::now();
        assert!(capture.read().is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[test]
    fn stalled_feed_is_reopened() {
        use crate::config::StreamConfig;
        use crate::link::recording::RecordingLink;
        use crate::stream::{StreamManager, StreamSource};

        let mut stream = StreamManager::new(
            stalling_backend("reopen"),
            Arc::new(RecordingLink::default()),
            StreamConfig::immediate(),
        );
        assert!(matches!(stream.open().unwrap(), StreamSource::Drone(_)));
        stream.read_frame().unwrap();

        // eight empty reads, then a fresh ffmpeg delivers its first frame
        let start = std::time::Instant::now();
        assert_eq!(stream.read_frame().unwrap().width(), 4);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn silent_program_times_out_on_open() {
        let program = fake_ffmpeg("silent", "exec sleep 20");
        let mut backend = FfmpegBackend::new(4, 4)
            .with_program(program)
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(50));

        let start = std::time::Instant::now();
        let result = backend.open(&VideoSource::Webcam(0), Decoder::Default);
        assert!(matches!(result, Err(StreamError::Open { .. })));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}

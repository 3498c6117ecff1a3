use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::{error, warn};
use pilot::{ConnectionState, ControlLoop, GesturePolicy, HandDetector, Tick, Trigger, VideoBackend};

#[derive(Debug)]
pub enum VideoEvent {
    State(ConnectionState),
    Tick(Tick),
}

/// Body of the video thread. Runs until the trigger sender is dropped or the stream gives up.
/// Every state change is forwarded, and a stream that gave up stays reported as exhausted.
pub fn video_thread<B, D, P>(
    mut control: ControlLoop<B, D, P>,
    rx_trigger: mpsc::Receiver<Trigger>,
    tx_video: mpsc::Sender<VideoEvent>,
) where
    B: VideoBackend,
    D: HandDetector,
    P: GesturePolicy,
{
    let states = tx_video.clone();
    control.on_state_change(move |state| _ = states.send(VideoEvent::State(state)));
    control.open();

    let result = control.run(&rx_trigger, |tick| {
        tx_video.send(VideoEvent::Tick(tick.clone())).is_ok()
    });
    if let Err(e) = result {
        error!("{e}");
    }

    // an exhausted stream has already let go of its capture
    if control.stream().state() != ConnectionState::Exhausted {
        control.close();
    }
}

/// Drains `rx_video` until the video thread hangs up, for at most `timeout`. A thread stuck in a
/// blocking read is left behind.
pub fn wait_for_video(rx_video: &mpsc::Receiver<VideoEvent>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match rx_video.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(_) => {}
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => {
                warn!("Video thread still busy after {timeout:?}, detaching it");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pilot::{
        BurstConfig, Decoder, FlightController, Frame, Link, NoHands, Observe, StreamConfig,
        StreamError, StreamManager, StreamSource, TransportError, VideoCapture, VideoSource,
    };
    use protocol::{CameraIndex, DeviceProfile};

    use super::*;

    struct NullLink;

    impl Link for NullLink {
        fn send(&self, _packet: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct Still;

    impl VideoCapture for Still {
        fn read(&mut self) -> Option<Frame> {
            Frame::new(2, 1, vec![0; 6])
        }
    }

    fn offline(source: &VideoSource, _: Decoder) -> Result<Box<dyn VideoCapture>, StreamError> {
        Err(StreamError::Open {
            what: source.to_string(),
            reason: "offline".into(),
        })
    }

    fn online(_: &VideoSource, _: Decoder) -> Result<Box<dyn VideoCapture>, StreamError> {
        Ok(Box::new(Still))
    }

    /// Runs the video thread body to completion and returns the states it reported.
    fn states<B: VideoBackend>(backend: B, hang_up_first: bool) -> Vec<ConnectionState> {
        let link: Arc<dyn Link> = Arc::new(NullLink);
        let flight = FlightController::spawn(
            link.clone(),
            DeviceProfile::Standard,
            BurstConfig::default(),
        );
        let stream = StreamManager::new(backend, link, StreamConfig::immediate());
        let control = ControlLoop::new(stream, NoHands, Observe, flight.handle());

        let (tx_trigger, rx_trigger) = mpsc::channel();
        let (tx_video, rx_video) = mpsc::channel();
        if hang_up_first {
            drop(tx_trigger);
            video_thread(control, rx_trigger, tx_video);
        } else {
            video_thread(control, rx_trigger, tx_video);
            drop(tx_trigger);
        }
        flight.shutdown();

        let states = rx_video
            .try_iter()
            .filter_map(|event| match event {
                VideoEvent::State(state) => Some(state),
                VideoEvent::Tick(_) => None,
            })
            .collect();
        // the observer went down with the loop
        assert!(matches!(rx_video.try_recv(), Err(mpsc::TryRecvError::Disconnected)));
        states
    }

    #[test]
    fn reconnects_and_giving_up_are_reported() {
        let states = states(offline, false);

        assert!(states.contains(&ConnectionState::Reconnecting { attempt: 1 }));
        assert!(states.contains(&ConnectionState::Reconnecting { attempt: 5 }));
        assert_eq!(states.last(), Some(&ConnectionState::Exhausted));
    }

    #[test]
    fn hang_up_closes_the_stream() {
        let states = states(online, true);

        assert_eq!(
            states,
            vec![
                ConnectionState::ConnectingPrimary,
                ConnectionState::Streaming(StreamSource::Drone(CameraIndex::One)),
                ConnectionState::Disconnected,
            ]
        );
    }
}

use std::sync::mpsc::{Receiver, TryRecvError};

use log::{error, info, warn};

use crate::error::StreamError;
use crate::flight::{Action, FlightHandle};
use crate::frame::{BBox, Frame, FrameRate};
use crate::stream::{ConnectionState, StreamManager, StreamSource, VideoBackend};

/// Finds the hand in a frame. The model behind it is not this crate's business.
pub trait HandDetector {
    fn detect(&mut self, frame: &Frame) -> Option<BBox>;
}

impl<F> HandDetector for F
where
    F: FnMut(&Frame) -> Option<BBox>,
{
    fn detect(&mut self, frame: &Frame) -> Option<BBox> {
        self(frame)
    }
}

/// Detector for running without a model: never sees a hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHands;

impl HandDetector for NoHands {
    fn detect(&mut self, _frame: &Frame) -> Option<BBox> {
        None
    }
}

/// Turns a detected hand into a maneuver.
pub trait GesturePolicy {
    fn decide(&mut self, bbox: &BBox, frame: &Frame) -> Option<Action>;
}

impl<F> GesturePolicy for F
where
    F: FnMut(&BBox, &Frame) -> Option<Action>,
{
    fn decide(&mut self, bbox: &BBox, frame: &Frame) -> Option<Action> {
        self(bbox, frame)
    }
}

/// Policy that only watches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Observe;

impl GesturePolicy for Observe {
    fn decide(&mut self, _bbox: &BBox, _frame: &Frame) -> Option<Action> {
        None
    }
}

/// Request from outside the loop, usually a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Flight(Action),
    SwitchCamera,
}

/// What one pass of the loop saw.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub source: StreamSource,
    pub width: usize,
    pub height: usize,
    pub fps: f64,
    pub bbox: Option<BBox>,
    /// Maneuver the gesture policy asked for.
    pub gesture: Option<Action>,
}

pub struct ControlLoop<B, D, P> {
    stream: StreamManager<B>,
    detector: D,
    policy: P,
    flight: FlightHandle,
    rate: FrameRate,
}

impl<B, D, P> ControlLoop<B, D, P>
where
    B: VideoBackend,
    D: HandDetector,
    P: GesturePolicy,
{
    pub fn new(stream: StreamManager<B>, detector: D, policy: P, flight: FlightHandle) -> Self {
        Self {
            stream,
            detector,
            policy,
            flight,
            rate: FrameRate::new(),
        }
    }

    pub fn stream(&self) -> &StreamManager<B> {
        &self.stream
    }

    pub fn on_state_change(&mut self, observer: impl FnMut(ConnectionState) + Send + 'static) {
        self.stream.on_state_change(observer);
    }

    /// Opens the stream up front. A failure here is not fatal, the first step reconnects.
    pub fn open(&mut self) {
        if let Err(e) = self.stream.open() {
            warn!("Initial stream open failed: {e}");
        }
    }

    pub fn close(&mut self) {
        self.stream.close();
    }

    /// Applies `trigger`, then pulls one frame and runs detection on it. Only a stream that gave
    /// up for good is reported as an error.
    pub fn step(&mut self, trigger: Option<Trigger>) -> Result<Tick, StreamError> {
        match trigger {
            Some(Trigger::Flight(action)) => self.perform(action),
            Some(Trigger::SwitchCamera) => match self.stream.switch_camera() {
                Ok(camera) => info!("Now on camera {}", camera.number()),
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => warn!("Camera switch: {e}"),
            },
            None => {}
        }

        let frame = self.stream.read_frame()?;
        let fps = self.rate.tick();
        let bbox = self.detector.detect(&frame);
        let gesture = bbox.and_then(|bbox| self.policy.decide(&bbox, &frame));
        if let Some(action) = gesture {
            self.perform(action);
        }

        Ok(Tick {
            source: self
                .stream
                .source()
                .ok_or(StreamError::InvalidState("frame read without a stream"))?,
            width: frame.width(),
            height: frame.height(),
            fps,
            bbox,
            gesture,
        })
    }

    /// Steps until `on_tick` returns false or the trigger sender hangs up.
    pub fn run(
        &mut self,
        triggers: &Receiver<Trigger>,
        mut on_tick: impl FnMut(&Tick) -> bool,
    ) -> Result<(), StreamError> {
        loop {
            let trigger = match triggers.try_recv() {
                Ok(trigger) => Some(trigger),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            };
            let tick = self.step(trigger)?;
            if !on_tick(&tick) {
                break;
            }
        }
        info!("Control loop stopped");
        Ok(())
    }

    fn perform(&self, action: Action) {
        if let Err(e) = self.flight.perform(action) {
            error!("{action:?} dropped: {e}");
        }
    }
}

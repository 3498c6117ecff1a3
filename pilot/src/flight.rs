use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};
use protocol::{ControlAxes, DeviceProfile, Flag, FlightState};

use crate::config::BurstConfig;
use crate::error::FlightError;
use crate::link::Link;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Takeoff,
    Land,
    Hover,
    EmergencyStop,
    SetAxes(ControlAxes),
    SetFlag(Flag, bool),
}

enum Message {
    Action(Action),
    Sync(mpsc::Sender<()>),
    Shutdown,
}

/// Cheap to clone, every clone talks to the same worker.
#[derive(Clone)]
pub struct FlightHandle {
    tx: mpsc::Sender<Message>,
}

impl FlightHandle {
    pub fn perform(&self, action: Action) -> Result<(), FlightError> {
        self.tx
            .send(Message::Action(action))
            .map_err(|_| FlightError::WorkerGone)
    }

    pub fn takeoff(&self) -> Result<(), FlightError> {
        self.perform(Action::Takeoff)
    }

    pub fn land(&self) -> Result<(), FlightError> {
        self.perform(Action::Land)
    }

    pub fn hover(&self) -> Result<(), FlightError> {
        self.perform(Action::Hover)
    }

    /// Interrupts whatever burst is running and drops queued maneuvers.
    pub fn emergency_stop(&self) -> Result<(), FlightError> {
        self.perform(Action::EmergencyStop)
    }

    pub fn set_axes(&self, axes: ControlAxes) -> Result<(), FlightError> {
        self.perform(Action::SetAxes(axes))
    }

    pub fn set_flag(&self, flag: Flag, value: bool) -> Result<(), FlightError> {
        self.perform(Action::SetFlag(flag, value))
    }

    /// Blocks until everything submitted before this call has been carried out.
    pub fn sync(&self) -> Result<(), FlightError> {
        let (tx, rx) = mpsc::channel();
        self.tx
            .send(Message::Sync(tx))
            .map_err(|_| FlightError::WorkerGone)?;
        rx.recv().map_err(|_| FlightError::WorkerGone)
    }
}

/// Owns the [`FlightState`] on a worker thread and serializes every maneuver on it.
pub struct FlightController {
    handle: FlightHandle,
    thread: Option<JoinHandle<()>>,
}

impl FlightController {
    pub fn spawn(link: Arc<dyn Link>, profile: DeviceProfile, config: BurstConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            state: FlightState::new(profile),
            link,
            config,
            rx,
            queue: VecDeque::new(),
        };
        let thread = thread::spawn(move || worker.run());

        Self {
            handle: FlightHandle { tx },
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> FlightHandle {
        self.handle.clone()
    }

    /// Lets pending actions finish, then joins the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        _ = self.handle.tx.send(Message::Shutdown);
        if thread.join().is_err() {
            warn!("Flight worker panicked");
        }
    }
}

impl Drop for FlightController {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    state: FlightState,
    link: Arc<dyn Link>,
    config: BurstConfig,
    rx: mpsc::Receiver<Message>,
    /// Messages that arrived while a burst was holding the worker.
    queue: VecDeque<Message>,
}

impl Worker {
    fn run(mut self) {
        loop {
            let message = match self.queue.pop_front() {
                Some(message) => message,
                None => match self.rx.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };
            match message {
                Message::Action(action) => self.perform(action),
                Message::Sync(ack) => {
                    _ = ack.send(());
                }
                Message::Shutdown => break,
            }
        }
        info!("Flight worker stopped");
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::Takeoff => self.burst(Flag::FastFly, self.config.takeoff),
            Action::Land => self.burst(Flag::FastDrop, self.config.land),
            Action::EmergencyStop => self.burst(Flag::EmergencyStop, self.config.emergency_stop),
            Action::Hover => {
                info!("Hover");
                self.state.set_neutral();
                self.send();
            }
            Action::SetAxes(axes) => {
                self.state.set_axes(axes);
                self.send();
            }
            Action::SetFlag(flag, value) => {
                info!("Set {flag} to {value}");
                self.state.set_flag(flag, value);
                self.send();
            }
        }
    }

    /// Holds `flag` on the wire until the deadline, re-sending every period, then clears it with
    /// one last packet. An emergency stop arriving meanwhile takes over immediately.
    fn burst(&mut self, flag: Flag, duration: Duration) {
        let (mut flag, mut duration) = (flag, duration);

        loop {
            info!("Holding {flag} for {duration:?}");
            self.state.set_flag(flag, true);
            self.send();

            let start = Instant::now();
            let deadline = start + duration;
            let mut next = start + self.config.period;

            let preempted = loop {
                match self.wait_until(next.min(deadline)) {
                    Some(Message::Action(Action::EmergencyStop)) if flag != Flag::EmergencyStop => {
                        break true;
                    }
                    Some(message) => self.queue.push_back(message),
                    None if next >= deadline => break false,
                    None => {
                        self.send();
                        next += self.config.period;
                    }
                }
            };

            self.state.set_flag(flag, false);
            if !preempted {
                self.send();
                info!("Released {flag}");
                return;
            }

            warn!("{flag} interrupted by emergency stop");
            let before = self.queue.len();
            self.queue
                .retain(|message| !matches!(message, Message::Action(_)));
            if self.queue.len() < before {
                warn!("Dropped {} queued actions", before - self.queue.len());
            }
            flag = Flag::EmergencyStop;
            duration = self.config.emergency_stop;
        }
    }

    fn wait_until(&self, wake: Instant) -> Option<Message> {
        let timeout = wake.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(timeout);
                None
            }
        }
    }

    fn send(&self) {
        let command = self.state.build_command();
        if let Err(e) = self.link.send(command.as_bytes()) {
            warn!("Flight command not sent: {e}");
        }
    }
}

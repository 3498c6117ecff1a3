mod args;
mod control_tab;
mod logs_tab;
mod session;

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use pilot::{
    Action, BurstConfig, ConnectionState, ControlLoop, FfmpegBackend, FlightController,
    FlightHandle, HeartbeatConfig, HeartbeatScheduler, Link, NoHands, Observe, StreamManager,
    StreamSource, Tick, Trigger, UdpLink,
};
use protocol::DeviceProfile;
use ratatui::DefaultTerminal;
use ratatui::Frame;
use ratatui::crossterm::event::{self, KeyCode};
use ratatui::layout::{Constraint, Layout};
use ratatui::text::Line;
use ratatui::widgets::{Block, Paragraph};

use crate::args::Args;
use crate::control_tab::{ControlTab, Outcome};
use crate::logs_tab::{LogsTab, LogsTabKind, TuiLogger};
use crate::session::VideoEvent;

const VIDEO_STOP_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    let (tx_logs, rx_logs) = mpsc::channel();
    TuiLogger::install(tx_logs, args.log_level)?;

    let terminal = ratatui::init();
    let app_result = App::new(args.profile).start(terminal, args, rx_logs);
    ratatui::restore();
    app_result
}

struct Channels {
    flight: FlightHandle,
    tx_trigger: mpsc::Sender<Trigger>,
    rx_video: mpsc::Receiver<VideoEvent>,
    rx_logs: mpsc::Receiver<(LogsTabKind, Line<'static>)>,
}

struct App {
    active_logs_tab: LogsTabKind,
    logs_tabs: [LogsTab; 2],
    control_tab: ControlTab,
    profile: DeviceProfile,
    video_state: ConnectionState,
    last_tick: Option<Tick>,
    heartbeat_running: bool,
}

impl App {
    fn new(profile: DeviceProfile) -> Self {
        Self {
            active_logs_tab: LogsTabKind::Control,
            logs_tabs: [
                LogsTab::new(LogsTabKind::Control),
                LogsTab::new(LogsTabKind::Video),
            ],
            control_tab: ControlTab::new(),
            profile,
            video_state: ConnectionState::Disconnected,
            last_tick: None,
            heartbeat_running: false,
        }
    }

    fn start(
        mut self,
        terminal: DefaultTerminal,
        args: Args,
        rx_logs: mpsc::Receiver<(LogsTabKind, Line<'static>)>,
    ) -> Result<()> {
        let link: Arc<dyn Link> = Arc::new(UdpLink::from_config(&args.link));
        info!("Commanding {} with the {:?} layout", args.link.drone, args.profile);

        let mut heartbeat = HeartbeatScheduler::new(link.clone(), HeartbeatConfig::default());
        heartbeat.start();
        self.heartbeat_running = heartbeat.is_running();

        let flight = FlightController::spawn(link.clone(), args.profile, BurstConfig::default());

        let (tx_trigger, rx_trigger) = mpsc::channel();
        let (tx_video, rx_video) = mpsc::channel();
        let backend = FfmpegBackend::new(args.width, args.height).with_program(&args.ffmpeg);
        let stream = StreamManager::new(backend, link, args.stream);
        let control = ControlLoop::new(stream, NoHands, Observe, flight.handle());
        thread::Builder::new()
            .name("video".into())
            .spawn(move || session::video_thread(control, rx_trigger, tx_video))?;

        let channels = Channels {
            flight: flight.handle(),
            tx_trigger,
            rx_video,
            rx_logs,
        };
        let result = self.run(terminal, &channels);

        let Channels {
            tx_trigger,
            rx_video,
            ..
        } = channels;
        drop(tx_trigger);
        session::wait_for_video(&rx_video, VIDEO_STOP_TIMEOUT);
        heartbeat.stop();
        flight.shutdown();
        result
    }

    fn run(&mut self, mut terminal: DefaultTerminal, channels: &Channels) -> Result<()> {
        let tick_rate = Duration::from_millis(20);

        loop {
            for (kind, line) in channels.rx_logs.try_iter() {
                self.logs_tabs[kind as usize].push(line);
            }
            for event in channels.rx_video.try_iter() {
                match event {
                    VideoEvent::State(state) => self.video_state = state,
                    VideoEvent::Tick(tick) => {
                        self.video_state = ConnectionState::Streaming(tick.source);
                        self.last_tick = Some(tick);
                    }
                }
            }

            terminal.draw(|frame| self.draw(frame))?;

            if !event::poll(tick_rate)? {
                continue;
            }
            let event = event::read()?;
            match self.control_tab.handle_event(&event) {
                Outcome::Submitted(trigger) => self.dispatch(trigger, channels),
                Outcome::Consumed => {}
                Outcome::Ignored => {
                    let Some(key) = event.as_key_event() else {
                        continue;
                    };
                    match key.code {
                        KeyCode::Char('i') => self.control_tab.toggle_input(),
                        KeyCode::Char('1') => self.active_logs_tab = LogsTabKind::Control,
                        KeyCode::Char('2') => self.active_logs_tab = LogsTabKind::Video,
                        KeyCode::Esc | KeyCode::Char('q') => break,
                        KeyCode::Char(key) => {
                            if let Some(trigger) = key_trigger(key) {
                                self.dispatch(trigger, channels);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        info!("Shutting down");
        Ok(())
    }

    /// Flight actions skip the video thread, which blocks for seconds while reconnecting.
    fn dispatch(&self, trigger: Trigger, channels: &Channels) {
        match trigger {
            Trigger::Flight(action) => {
                if let Err(e) = channels.flight.perform(action) {
                    error!("{action:?} dropped: {e}");
                }
            }
            Trigger::SwitchCamera => {
                if channels.tx_trigger.send(trigger).is_err() {
                    warn!("Video thread has stopped, ignoring camera switch");
                }
            }
        }
    }

    fn draw(&self, frame: &mut Frame) {
        let [controls, logging] =
            Layout::horizontal([Constraint::Length(40), Constraint::Fill(1)]).areas(frame.area());
        let [status_area, control_area] =
            Layout::vertical([Constraint::Length(12), Constraint::Fill(1)]).areas(controls);

        let status = Paragraph::new(self.status_lines()).block(Block::bordered().title("Status"));
        frame.render_widget(status, status_area);
        self.control_tab.draw(frame, control_area);
        self.logs_tabs[self.active_logs_tab as usize].draw(frame, logging);
    }

    fn status_lines(&self) -> Vec<Line<'static>> {
        let camera = match self.video_state {
            ConnectionState::Streaming(StreamSource::Drone(camera)) => camera.number().to_string(),
            ConnectionState::Streaming(StreamSource::LocalWebcam) => "webcam".into(),
            _ => "-".into(),
        };
        let (size, fps, hand) = match &self.last_tick {
            Some(tick) => (
                format!("{}x{}", tick.width, tick.height),
                format!("{:.1}", tick.fps),
                match tick.bbox {
                    Some(bbox) => {
                        let (x, y) = bbox.center();
                        format!("{}x{} at ({x}, {y})", bbox.width(), bbox.height())
                    }
                    None => "none".into(),
                },
            ),
            None => ("-".into(), "-".into(), "-".into()),
        };
        let heartbeat = if self.heartbeat_running { "on" } else { "off" };

        vec![
            Line::from(format!("Video     {}", self.video_state)),
            Line::from(format!("Camera    {camera}")),
            Line::from(format!("Frame     {size}")),
            Line::from(format!("FPS       {fps}")),
            Line::from(format!("Hand      {hand}")),
            Line::from(format!("Heartbeat {heartbeat}")),
            Line::from(format!("Layout    {:?}", self.profile)),
            Line::default(),
            Line::from("t takeoff  l land  h hover"),
            Line::from("space stop  c camera  i input"),
        ]
    }
}

fn key_trigger(key: char) -> Option<Trigger> {
    Some(match key {
        't' => Trigger::Flight(Action::Takeoff),
        'l' => Trigger::Flight(Action::Land),
        'h' => Trigger::Flight(Action::Hover),
        ' ' => Trigger::Flight(Action::EmergencyStop),
        'c' => Trigger::SwitchCamera,
        _ => return None,
    })
}

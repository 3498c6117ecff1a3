use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{info, warn};
use protocol::HEARTBEAT;

use crate::config::HeartbeatConfig;
use crate::link::Link;

struct Running {
    running: Arc<AtomicBool>,
    finished: mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

/// Sends the keep-alive packet on a fixed schedule, independent of any flight traffic.
pub struct HeartbeatScheduler {
    link: Arc<dyn Link>,
    config: HeartbeatConfig,
    running: Option<Running>,
}

impl HeartbeatScheduler {
    pub fn new(link: Arc<dyn Link>, config: HeartbeatConfig) -> Self {
        Self {
            link,
            config,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn start(&mut self) {
        if self.running.is_some() {
            info!("Heartbeat already running");
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let (tx_finished, finished) = mpsc::channel();
        let thread = {
            let running = running.clone();
            let link = self.link.clone();
            let interval = self.config.interval;
            thread::spawn(move || {
                let mut next = Instant::now();
                while running.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now < next {
                        thread::park_timeout(next - now);
                        continue;
                    }
                    if let Err(e) = link.send(&HEARTBEAT) {
                        warn!("Heartbeat not sent: {e}");
                    }
                    next += interval;
                    // a late beat moves the schedule instead of being made up with a burst
                    let now = Instant::now();
                    if next < now {
                        next = now + interval;
                    }
                }
                _ = tx_finished.send(());
            })
        };

        self.running = Some(Running {
            running,
            finished,
            thread,
        });
        info!("Heartbeat started");
    }

    /// Returns once the sender thread is gone, or after the configured timeout.
    pub fn stop(&mut self) {
        let Some(Running {
            running,
            finished,
            thread,
        }) = self.running.take()
        else {
            return;
        };

        running.store(false, Ordering::Release);
        thread.thread().unpark();

        match finished.recv_timeout(self.config.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    warn!("Heartbeat thread panicked");
                }
                info!("Heartbeat stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Heartbeat thread still busy after {:?}, detaching it",
                    self.config.stop_timeout
                );
            }
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::link::recording::RecordingLink;

    fn scheduler(link: &RecordingLink, interval: Duration) -> HeartbeatScheduler {
        HeartbeatScheduler::new(
            Arc::new(link.clone()),
            HeartbeatConfig {
                interval,
                ..HeartbeatConfig::default()
            },
        )
    }

    #[test]
    fn one_heartbeat_per_interval() {
        let link = RecordingLink::default();
        let mut heartbeat = scheduler(&link, Duration::from_secs(1));

        heartbeat.start();
        thread::sleep(Duration::from_millis(4900));
        heartbeat.stop();

        let packets = link.packets();
        assert!((4..=6).contains(&packets.len()), "{} sends", packets.len());
        assert!(packets.iter().all(|(_, bytes)| bytes == &[1, 1]));
        for pair in packets.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!(
                gap > Duration::from_millis(900) && gap < Duration::from_millis(1200),
                "{gap:?}"
            );
        }
    }

    /// Hangs on the first send, as a stuck network stack would.
    struct StallingLink {
        inner: RecordingLink,
        stalled: AtomicBool,
        stall: Duration,
    }

    impl Link for StallingLink {
        fn send(&self, packet: &[u8]) -> Result<(), crate::error::TransportError> {
            self.inner.send(packet)?;
            if !self.stalled.swap(true, Ordering::AcqRel) {
                thread::sleep(self.stall);
            }
            Ok(())
        }
    }

    #[test]
    fn late_beat_does_not_burst() {
        let link = RecordingLink::default();
        let mut heartbeat = HeartbeatScheduler::new(
            Arc::new(StallingLink {
                inner: link.clone(),
                stalled: AtomicBool::new(false),
                stall: Duration::from_millis(350),
            }),
            HeartbeatConfig {
                interval: Duration::from_millis(100),
                ..HeartbeatConfig::default()
            },
        );

        heartbeat.start();
        thread::sleep(Duration::from_millis(700));
        heartbeat.stop();

        let packets = link.packets();
        assert!(packets.len() >= 3, "{} sends", packets.len());
        for pair in packets.windows(2) {
            let gap = pair[1].0 - pair[0].0;
            assert!(gap > Duration::from_millis(80), "{gap:?}");
        }
    }

    #[test]
    fn stop_wakes_the_sender() {
        let link = RecordingLink::default();
        let mut heartbeat = scheduler(&link, Duration::from_secs(30));

        heartbeat.start();
        thread::sleep(Duration::from_millis(50));
        let stopping = Instant::now();
        heartbeat.stop();

        assert!(stopping.elapsed() < Duration::from_secs(1));
        assert!(!heartbeat.is_running());
        let sent = link.packets().len();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(link.packets().len(), sent);
        assert_eq!(sent, 1);
    }

    #[test]
    fn double_start_is_a_no_op() {
        let link = RecordingLink::default();
        let mut heartbeat = scheduler(&link, Duration::from_secs(30));

        heartbeat.start();
        heartbeat.start();
        thread::sleep(Duration::from_millis(50));
        heartbeat.stop();

        assert_eq!(link.packets().len(), 1);
    }

    #[test]
    fn restart_after_stop() {
        let link = RecordingLink::default();
        let mut heartbeat = scheduler(&link, Duration::from_secs(30));

        heartbeat.start();
        thread::sleep(Duration::from_millis(20));
        heartbeat.stop();
        heartbeat.start();
        assert!(heartbeat.is_running());
        thread::sleep(Duration::from_millis(20));
        drop(heartbeat);

        assert_eq!(link.packets().len(), 2);
    }
}

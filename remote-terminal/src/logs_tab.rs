use std::fmt::Display;
use std::sync::mpsc::Sender;
use std::time::Instant;

use anyhow::{Result, anyhow};
use log::{Level, LevelFilter, Log, Metadata, Record};
use ratatui::{
    Frame,
    layout::Rect,
    style::{Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Paragraph},
};

const MAX_LINES: usize = 2000;

pub struct LogsTab {
    pub kind: LogsTabKind,
    pub lines: Vec<Line<'static>>,
}

impl LogsTab {
    pub fn new(kind: LogsTabKind) -> Self {
        Self {
            kind,
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, line: Line<'static>) {
        if self.lines.len() >= MAX_LINES {
            self.lines.drain(..MAX_LINES / 2);
        }
        self.lines.push(line);
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        let log_block = Block::bordered().title(self.kind.to_string());
        let num_lines = log_block.inner(area).height;
        let log_lines: Vec<_> = self
            .lines
            .iter()
            .rev()
            .take(num_lines as usize)
            .rev()
            .cloned()
            .collect();
        let logging_view = Paragraph::new(log_lines).block(log_block);

        frame.render_widget(logging_view, area);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogsTabKind {
    Control = 0,
    Video = 1,
}

impl LogsTabKind {
    /// Stream and decoder records go to the video tab, everything else is link traffic.
    pub fn for_target(target: &str) -> Self {
        if target.contains("stream") || target.contains("ffmpeg") {
            Self::Video
        } else {
            Self::Control
        }
    }
}

impl Display for LogsTabKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Control => "Control",
            Self::Video => "Video",
        })
    }
}

/// Forwards log records to the UI thread as styled lines.
pub struct TuiLogger {
    tx: Sender<(LogsTabKind, Line<'static>)>,
    start: Instant,
    level: LevelFilter,
}

impl TuiLogger {
    pub fn install(tx: Sender<(LogsTabKind, Line<'static>)>, level: LevelFilter) -> Result<()> {
        let logger = Self {
            tx,
            start: Instant::now(),
            level,
        };
        log::set_boxed_logger(Box::new(logger)).map_err(|e| anyhow!("Logger setup: {e}"))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for TuiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = format!("{:.3} ", self.start.elapsed().as_secs_f64());
        let line = format_log_line(&timestamp, record.level(), record.args().to_string());
        // the receiver is gone once the UI has shut down
        _ = self
            .tx
            .send((LogsTabKind::for_target(record.target()), line));
    }

    fn flush(&self) {}
}

pub fn format_log_line(timestamp: &str, level: Level, message: String) -> Line<'static> {
    let mut line = Line::default();
    line.push_span(Span::raw(timestamp.to_owned()).style(Style::new().gray()));

    let style = Style::new().bold();
    let style = match level {
        Level::Trace => style.blue(),
        Level::Debug => style.blue(),
        Level::Info => style.green(),
        Level::Warn => style.yellow(),
        Level::Error => style.red(),
    };
    line.push_span("[");
    line.push_span(Span::raw(level.as_str()).style(style));
    line.push_span("] ");
    line.push_span(Span::raw(message));
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_module() {
        assert_eq!(LogsTabKind::for_target("pilot::stream"), LogsTabKind::Video);
        assert_eq!(LogsTabKind::for_target("pilot::ffmpeg"), LogsTabKind::Video);
        assert_eq!(LogsTabKind::for_target("pilot::flight"), LogsTabKind::Control);
        assert_eq!(LogsTabKind::for_target("pilot::heartbeat"), LogsTabKind::Control);
    }

    #[test]
    fn line_layout() {
        let line = format_log_line("1.250 ", Level::Warn, "Heartbeat not sent".into());
        let text: Vec<_> = line.spans.iter().map(|span| span.content.as_ref()).collect();
        assert_eq!(text, ["1.250 ", "[", "WARN", "] ", "Heartbeat not sent"]);
    }

    #[test]
    fn tab_keeps_recent_lines() {
        let mut tab = LogsTab::new(LogsTabKind::Control);
        for i in 0..MAX_LINES + 1 {
            tab.push(Line::from(i.to_string()));
        }
        assert_eq!(tab.lines.len(), MAX_LINES / 2 + 1);
        assert_eq!(tab.lines.last(), Some(&Line::from(MAX_LINES.to_string())));
    }
}

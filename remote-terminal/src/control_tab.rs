use std::iter::Peekable;

use anyhow::{Result, anyhow, bail};
use logos::{Lexer, Logos};
use pilot::{Action, Trigger};
use protocol::{ControlAxes, Flag};
use ratatui::{
    crossterm::event::{Event, KeyCode},
    layout::{Constraint, Layout, Rect},
    style::{Color, Style, Styled},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use tui_input::{Input, backend::crossterm::EventHandler};

#[derive(PartialEq, Eq)]
pub enum InputMode {
    Inactive,
    Editing,
}

pub enum Outcome {
    Ignored,
    Consumed,
    Submitted(Trigger),
}

pub struct ControlTab {
    input_mode: InputMode,
    input: Input,
    parsed_input: Result<Option<Trigger>>,
}

impl ControlTab {
    pub fn new() -> Self {
        Self {
            input_mode: InputMode::Inactive,
            input: Input::default(),
            parsed_input: Ok(None),
        }
    }

    pub fn handle_event(&mut self, event: &Event) -> Outcome {
        if self.input_mode == InputMode::Inactive {
            return Outcome::Ignored;
        }

        if let Some(key) = event.as_key_event() {
            match key.code {
                KeyCode::Esc => {
                    self.input_mode = InputMode::Inactive;
                    return Outcome::Consumed;
                }
                KeyCode::Enter => {
                    let parsed = std::mem::replace(&mut self.parsed_input, Ok(None));
                    self.input.reset();
                    self.input_mode = InputMode::Inactive;
                    return match parsed {
                        Ok(Some(trigger)) => Outcome::Submitted(trigger),
                        _ => Outcome::Consumed,
                    };
                }
                _ => {}
            }
        }

        self.input.handle_event(event);
        self.parsed_input = parse_input(self.input.value());

        Outcome::Consumed
    }

    pub fn draw(&self, frame: &mut ratatui::Frame, area: Rect) {
        let vertical = Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Fill(1),
        ]);
        let [title_area, input_area, feedback_area] = vertical.areas(area);

        let title_style = Style::from(Color::White);
        let mut title = Block::bordered()
            .borders(Borders::TOP)
            .style(title_style)
            .title("Command");

        // keep 2 for borders and 1 for cursor
        let width = input_area.width.max(3) - 3;
        let scroll = self.input.visual_scroll(width as usize);
        let text_style = Color::Gray;
        let input_style = Style::from(match self.parsed_input {
            Ok(None) => Color::White,
            Ok(Some(_)) => Color::LightGreen,
            Err(_) => Color::LightRed,
        });
        let mut input = Paragraph::new(self.input.value())
            .style(text_style)
            .scroll((0, scroll as u16))
            .block(Block::bordered().border_style(input_style).title("Input"));

        if self.input_mode == InputMode::Editing {
            // Ratatui hides the cursor unless it's explicitly set. Position the cursor past the
            // end of the input text and one line down from the border to the input line
            let x = self.input.visual_cursor().max(scroll) - scroll + 1;
            frame.set_cursor_position((input_area.x + x as u16, input_area.y + 1))
        }

        let feedback = Paragraph::new(match &self.parsed_input {
            Ok(None) => String::new(),
            Ok(Some(trigger)) => format!("{trigger:?}"),
            Err(e) => e.to_string(),
        })
        .wrap(Wrap { trim: true });

        if !self.is_active() {
            title = title.set_style(title_style.dim());
            input = input.set_style(input_style.dim());
        }
        frame.render_widget(title, title_area);
        frame.render_widget(input, input_area);
        frame.render_widget(feedback, feedback_area);
    }

    pub fn toggle_input(&mut self) {
        self.input_mode = if self.input_mode == InputMode::Editing {
            InputMode::Inactive
        } else {
            InputMode::Editing
        };
    }

    pub fn is_active(&self) -> bool {
        self.input_mode == InputMode::Editing
    }
}

/// Format
/// ```text
/// Takeoff
/// Land
/// Hover
/// Stop
/// Camera
/// Axes(roll, pitch, throttle, yaw)
/// Flag(no_head_mode, true)
/// ```
fn parse_input(text: &str) -> Result<Option<Trigger>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let mut tokens = Token::lexer(text).peekable();

    fn consume(tokens: &mut Peekable<Lexer<'_, Token>>, token: Token) -> Result<()> {
        let Some(result) = tokens.next() else {
            bail!("Expected {token:?} got nothing");
        };
        match result {
            Ok(tok) if tok == token => Ok(()),
            Ok(tok) => bail!("Expected {token:?} got {tok:?}"),
            Err(_) => bail!("Expected {token:?} got invalid token"),
        }
    }

    fn consume_or_not(tokens: &mut Peekable<Lexer<'_, Token>>, token: Token) {
        if tokens.peek() == Some(&Ok(token)) {
            _ = tokens.next();
        }
    }

    fn consume_int(tokens: &mut Peekable<Lexer<'_, Token>>) -> Result<i32> {
        let Some(Ok(Token::Int(int))) = tokens.next() else {
            bail!("Expected integer");
        };
        Ok(int)
    }

    let Some(Ok(Token::Ident(variant))) = tokens.next() else {
        bail!("Expected command");
    };

    let trigger = match variant.as_str() {
        "Takeoff" => Trigger::Flight(Action::Takeoff),
        "Land" => Trigger::Flight(Action::Land),
        "Hover" => Trigger::Flight(Action::Hover),
        "Stop" => Trigger::Flight(Action::EmergencyStop),
        "Camera" => Trigger::SwitchCamera,
        "Axes" => {
            let mut values = [0; 4];

            consume(&mut tokens, Token::ParenOpen)?;
            for value in &mut values {
                *value = consume_int(&mut tokens)?;
                consume_or_not(&mut tokens, Token::Comma);
            }
            consume(&mut tokens, Token::ParenClose)?;

            let [roll, pitch, throttle, yaw] = values;
            Trigger::Flight(Action::SetAxes(ControlAxes {
                roll,
                pitch,
                throttle,
                yaw,
            }))
        }
        "Flag" => {
            consume(&mut tokens, Token::ParenOpen)?;
            let Some(Ok(Token::Ident(name))) = tokens.next() else {
                bail!("Expected flag name");
            };
            let flag = Flag::from_name(&name).ok_or_else(|| anyhow!("Unknown flag {name}"))?;
            consume_or_not(&mut tokens, Token::Comma);
            let Some(Ok(Token::Bool(value))) = tokens.next() else {
                bail!("Expected bool");
            };
            consume(&mut tokens, Token::ParenClose)?;
            Trigger::Flight(Action::SetFlag(flag, value))
        }
        _ => bail!("Invalid command: {variant}"),
    };

    if tokens.next().is_some() {
        bail!("Unexpected input after {variant}");
    }
    Ok(Some(trigger))
}

fn parse_int(text: &str) -> Option<i32> {
    let text: String = text.chars().filter(|c| *c != '_').collect();
    text.parse().ok()
}

#[derive(Logos, PartialEq, Debug)]
#[logos(skip r"[ \t\n]+")]
enum Token {
    #[regex("[a-zA-Z_]+[a-zA-Z_0-9]*", |lex| lex.slice().to_owned())]
    Ident(String),

    #[regex(r"-?[0-9][0-9_]*", |lex| parse_int(lex.slice()))]
    Int(i32),
    #[regex("true", |_| true)]
    #[regex("false", |_| false)]
    Bool(bool),

    #[token(",")]
    Comma,

    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Trigger {
        parse_input(text).unwrap().unwrap()
    }

    #[test]
    fn maneuvers() {
        assert_eq!(parse("Takeoff"), Trigger::Flight(Action::Takeoff));
        assert_eq!(parse(" Land "), Trigger::Flight(Action::Land));
        assert_eq!(parse("Hover"), Trigger::Flight(Action::Hover));
        assert_eq!(parse("Stop"), Trigger::Flight(Action::EmergencyStop));
        assert_eq!(parse("Camera"), Trigger::SwitchCamera);
        assert!(parse_input("   ").unwrap().is_none());
    }

    #[test]
    fn axes_accept_out_of_range_values() {
        assert_eq!(
            parse("Axes(0, 1_00, 1, -5)"),
            Trigger::Flight(Action::SetAxes(ControlAxes {
                roll: 0,
                pitch: 100,
                throttle: 1,
                yaw: -5,
            }))
        );
        assert_eq!(
            parse("Axes(128 128 128 300)"),
            Trigger::Flight(Action::SetAxes(ControlAxes {
                roll: 128,
                pitch: 128,
                throttle: 128,
                yaw: 300,
            }))
        );
    }

    #[test]
    fn flags_by_name() {
        assert_eq!(
            parse("Flag(no_head_mode, true)"),
            Trigger::Flight(Action::SetFlag(Flag::NoHeadMode, true))
        );
        assert_eq!(
            parse("Flag(gyro_correction false)"),
            Trigger::Flight(Action::SetFlag(Flag::GyroCorrection, false))
        );
    }

    #[test]
    fn rejects_malformed_commands() {
        for text in [
            "Fly",
            "Axes(1, 2, 3)",
            "Axes(1, 2, 3, 4",
            "Flag(warp_drive, true)",
            "Flag(unlock, 1)",
            "Hover now",
            "42",
        ] {
            assert!(parse_input(text).is_err(), "{text}");
        }
    }
}

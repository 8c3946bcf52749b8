//! Prompt shown while `--calibrate` records the function keys

use crate::calibration::CalibrationProgress;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Widget asking the operator to press one labelled key
pub struct CalibrationPrompt<'a> {
    progress: &'a CalibrationProgress<'a>,
    message: Option<&'a str>,
}

impl<'a> CalibrationPrompt<'a> {
    pub fn new(progress: &'a CalibrationProgress<'a>) -> Self {
        Self {
            progress,
            message: None,
        }
    }

    /// Extra line below the prompt, e.g. a warning about a repeated key
    pub fn message(mut self, message: Option<&'a str>) -> Self {
        self.message = message;
        self
    }

    fn progress_bar(&self, width: u16) -> String {
        let total = self.progress.total.max(1);
        let width = width as usize;
        let filled = width * self.progress.index / total;
        format!("{}{}", "#".repeat(filled), "-".repeat(width - filled))
    }
}

impl<'a> Widget for CalibrationPrompt<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(" Keyboard calibration ")
            .borders(Borders::ALL)
            .border_set(border::ROUNDED)
            .border_style(Style::default().fg(Color::Cyan));

        let inner = block.inner(area);
        block.render(area, buf);

        let dim = Style::default().fg(Color::DarkGray);
        let last = match self.progress.last_scancode {
            Some(scancode) => format!("last key: scancode {scancode:#x}"),
            None => "no key recorded yet".to_string(),
        };

        let mut lines = vec![
            Line::from(""),
            Line::from(Span::styled(
                " Press the key labelled",
                Style::default().fg(Color::White),
            )),
            Line::from(Span::styled(
                format!("   {}", self.progress.label),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(vec![
                Span::styled(
                    format!(" Key {} of {}  ", self.progress.index + 1, self.progress.total),
                    Style::default().fg(Color::White),
                ),
                Span::styled(
                    self.progress_bar(inner.width.saturating_sub(20).min(24)),
                    Style::default().fg(Color::Green),
                ),
            ]),
            Line::from(Span::styled(format!(" {last}"), dim)),
        ];
        if let Some(msg) = self.message {
            lines.push(Line::from(Span::styled(
                format!(" {msg}"),
                Style::default().fg(Color::Yellow),
            )));
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(" Esc aborts without saving", dim)));

        for (i, line) in lines.iter().enumerate() {
            if i as u16 >= inner.height {
                break;
            }
            buf.set_line(inner.x, inner.y + i as u16, line, inner.width);
        }
    }
}

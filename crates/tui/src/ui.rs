use std::time::Duration;

use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use lockstep_core::workflow::{RunState, RunStatus};

use crate::App;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[0]);

    let (label, bg) = banner(&app.status, app.cancel.is_panic_set());
    let width = left[0].width as usize;
    let pad = width.saturating_sub(label.len());
    let centered = format!("{}{}{}", " ".repeat(pad / 2), label, " ".repeat(pad - pad / 2));
    f.render_widget(
        Paragraph::new(Line::from(Span::styled(
            centered,
            Style::default().fg(Color::Black).bg(bg).add_modifier(Modifier::BOLD),
        ))),
        left[0],
    );

    let status = Paragraph::new(status_lines(&app.status)).block(
        Block::default()
            .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(status, left[1]);

    if app.log_visible && chunks.len() > 1 {
        let visible = chunks[1].height.saturating_sub(2) as usize;
        let total = app.log_messages.len();
        let scroll = app.log_scroll.min(total.saturating_sub(visible));
        let start = total.saturating_sub(visible + scroll);
        let end = total.saturating_sub(scroll);
        let lines: Vec<Line> = app.log_messages[start..end].iter().map(|m| parse_log_line(m)).collect();

        let logs = Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Logs ")
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(logs, chunks[1]);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn banner(status: &RunStatus, stopping: bool) -> (&'static str, Color) {
    match status.state {
        RunState::Finished => ("FINISHED (q to quit)", Color::Gray),
        _ if stopping => ("STOPPING...", Color::Yellow),
        RunState::Idle => ("STARTING...", Color::Gray),
        RunState::Armed => ("ARMED (s / F1 to start)", Color::Cyan),
        RunState::Running => ("RUNNING (q / Ctrl+C to stop)", Color::Green),
        RunState::Holding => ("HOLDING GUARD (q to release)", Color::Red),
    }
}

fn key(k: &str) -> Span<'_> {
    Span::styled(k, Style::default().fg(Color::Yellow))
}

fn row<'a>(name: &'a str, value: String, color: Color) -> Line<'a> {
    Line::from(vec![
        Span::styled(format!(" {:<12}", name), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().fg(color)),
    ])
}

fn status_lines(s: &RunStatus) -> Vec<Line<'_>> {
    let mut lines = vec![
        Line::from(vec![
            Span::raw(" "),
            key("s"),
            Span::raw(" start, "),
            key("q"),
            Span::raw(" stop, "),
            key("l"),
            Span::raw(" logs"),
        ]),
        Line::from(""),
    ];

    let phase = if s.phase.is_empty() { "-".to_string() } else { s.phase.clone() };
    lines.push(row("phase", phase, Color::White));
    lines.push(row("loop", format!("{} / {}", s.iteration, s.loops), Color::White));
    let slot = match s.slot {
        Some(slot) => format!("{} / {}", slot + 1, s.slots),
        None => "-".into(),
    };
    lines.push(row("slot", slot, Color::White));
    let (guard, guard_color) = if s.guard_engaged { ("ENGAGED", Color::Red) } else { ("released", Color::Green) };
    lines.push(row("guard", guard.into(), guard_color));
    lines.push(row("ETA", s.eta.map(format_eta).unwrap_or_else(|| "-".into()), Color::White));
    lines.push(Line::from(""));

    lines.push(row("items", s.items_this_run.to_string(), Color::Cyan));
    lines.push(row("recoveries", s.recoveries_this_run.to_string(), Color::Cyan));
    lines.push(row("all loops", s.lifetime_loops.to_string(), Color::DarkGray));
    lines.push(row("all items", s.lifetime_items.to_string(), Color::DarkGray));

    if let Some(outcome) = &s.last_outcome {
        lines.push(Line::from(""));
        lines.push(row("outcome", outcome.clone(), Color::Yellow));
    }
    lines
}

fn format_eta(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
}

/// Render a `level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage` record.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        return Line::from(raw);
    }
    let (level, prefix, timestamp, message) = (parts[0], parts[1], parts[3], parts[4]);

    let color = match parts[2].parse::<u8>().unwrap_or(0) {
        1 => Color::DarkGray,
        2 => Color::LightBlue,
        3 => Color::Magenta,
        4 => Color::Green,
        _ => Color::White,
    };

    let mut spans = vec![
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ];
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }
    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(color)));
    Line::from(spans)
}

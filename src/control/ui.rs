use std::error::Error;
use std::io::stdout;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use crossbeam_channel::unbounded;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap};

use crate::client::ClientStatus;
use crate::control::api::{self, EngineStatus};
use crate::mixloop::LoopState;
use crate::profile::ProfileKind;

const TICK_RATE: Duration = Duration::from_millis(100);
const LOG_LINES: usize = 8;
const METER_WIDTH: usize = 12;
/// Level shown as an empty meter.
const METER_FLOOR_DB: f32 = -60.0;

#[derive(Default)]
struct AppState {
    status: Option<EngineStatus>,
    log: Vec<String>,
    selected: usize,
    prompt: Option<Prompt>,
    message: Option<String>,
    last_update: Option<Instant>,
}

/// Line being edited at the bottom of the screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Prompt {
    pub(crate) kind: PromptKind,
    pub(crate) buffer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromptKind {
    /// Transmit shift of the selected client's profile.
    Shift,
    /// Free-form directive line.
    Directive,
}

impl Prompt {
    pub(crate) fn new(kind: PromptKind) -> Self {
        let buffer = match kind {
            PromptKind::Shift => String::from("0"),
            PromptKind::Directive => String::new(),
        };
        Self { kind, buffer }
    }

    fn title(&self) -> &'static str {
        match self.kind {
            PromptKind::Shift => "Transmit shift (Enter applies, Esc cancels)",
            PromptKind::Directive => "Directives (Enter applies, Esc cancels)",
        }
    }

    /// Append a typed character if the prompt takes it.
    pub(crate) fn push(&mut self, c: char) -> bool {
        let accepted = match self.kind {
            PromptKind::Shift => c.is_ascii_digit() || matches!(c, '-' | '+'),
            PromptKind::Directive => !c.is_control(),
        };
        if accepted {
            self.buffer.push(c);
        }
        accepted
    }
}

/// Run the ratatui-based developer console against the published engine.
pub fn run() -> Result<(), Box<dyn Error>> {
    setup_terminal()?;

    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let (status_tx, status_rx) = unbounded();
    std::thread::spawn(move || {
        loop {
            if status_tx.send(api::take_status()).is_err() {
                break;
            }
            std::thread::sleep(TICK_RATE);
        }
    });

    let mut app = AppState::default();

    loop {
        terminal.draw(|frame| draw(frame, &app))?;

        if let Some(status) = try_recv_latest(&status_rx) {
            app.refresh(status);
        }

        if event::poll(Duration::from_millis(10))? {
            if let CEvent::Key(key) = event::read()? {
                if app.handle_key(key) {
                    break;
                }
            }
        }
    }

    restore_terminal()?;
    Ok(())
}

fn setup_terminal() -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    Ok(())
}

fn restore_terminal() -> Result<(), Box<dyn Error>> {
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

fn try_recv_latest<T>(rx: &Receiver<T>) -> Option<T> {
    let mut last = None;
    while let Ok(value) = rx.try_recv() {
        last = Some(value);
    }
    last
}

impl AppState {
    fn refresh(&mut self, status: Option<EngineStatus>) {
        let clients = status.as_ref().map_or(0, |s| s.clients.len());
        self.selected = self.selected.min(clients.saturating_sub(1));
        self.status = status;
        self.last_update = Some(Instant::now());
        self.log.extend(crate::drain_log());
        let excess = self.log.len().saturating_sub(LOG_LINES);
        self.log.drain(..excess);
    }

    fn selected_client(&self) -> Option<&ClientStatus> {
        self.status.as_ref()?.clients.get(self.selected)
    }

    /// Returns true when the console should exit.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if let Some(mut prompt) = self.prompt.take() {
            match key.code {
                KeyCode::Enter => self.message = self.submit(&prompt),
                KeyCode::Esc => {}
                KeyCode::Backspace => {
                    prompt.buffer.pop();
                    self.prompt = Some(prompt);
                }
                KeyCode::Char(c) => {
                    prompt.push(c);
                    self.prompt = Some(prompt);
                }
                _ => self.prompt = Some(prompt),
            }
            return false;
        }

        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => {
                let clients = self.status.as_ref().map_or(0, |s| s.clients.len());
                if self.selected + 1 < clients {
                    self.selected += 1;
                }
            }
            KeyCode::Char('m') => {
                if let Some(profile) = self.selected_client().map(|c| c.profile.clone()) {
                    self.message = Some(match api::toggle_profile_mute(&profile) {
                        Ok(true) => format!("{profile} muted"),
                        Ok(false) => format!("{profile} unmuted"),
                        Err(err) => err.to_string(),
                    });
                }
            }
            KeyCode::Char('r') => {
                if let (Some(control), Some(status)) = (api::active(), &self.status) {
                    control.set_recording(!status.recording);
                    let state = if status.recording { "off" } else { "on" };
                    self.message = Some(format!("Recording {state}"));
                }
            }
            KeyCode::Char('s') if self.selected_client().is_some() => {
                self.prompt = Some(Prompt::new(PromptKind::Shift));
            }
            KeyCode::Char(':') => self.prompt = Some(Prompt::new(PromptKind::Directive)),
            _ => {}
        }
        false
    }

    fn submit(&self, prompt: &Prompt) -> Option<String> {
        match prompt.kind {
            PromptKind::Shift => {
                let profile = self.selected_client()?.profile.clone();
                let Ok(shift) = prompt.buffer.trim().parse::<i32>() else {
                    return Some(format!("'{}' is not a shift", prompt.buffer));
                };
                Some(match api::set_profile_shift(&profile, shift) {
                    Ok(()) => format!("{profile} transmit shift {shift}"),
                    Err(err) => err.to_string(),
                })
            }
            PromptKind::Directive => {
                let line = prompt.buffer.trim();
                if line.is_empty() {
                    return None;
                }
                let Some(control) = api::active() else {
                    return Some("No active engine".to_string());
                };
                Some(match control.apply_directives(line) {
                    Ok(()) => format!("Applied '{line}'"),
                    Err(err) => err.to_string(),
                })
            }
        }
    }
}

pub(crate) fn level_db(peak: i64, full_scale: i64) -> f32 {
    if peak <= 0 || full_scale <= 0 {
        return f32::NEG_INFINITY;
    }
    20.0 * (peak as f32 / full_scale as f32).log10()
}

/// Text meter of the loudest channel, `width` cells from the floor to full scale.
pub(crate) fn meter(peaks: &[i64], full_scale: i64, width: usize) -> String {
    let db = level_db(peaks.iter().copied().max().unwrap_or(0), full_scale);
    let filled = if db.is_finite() {
        let fraction = ((db - METER_FLOOR_DB) / -METER_FLOOR_DB).clamp(0.0, 1.0);
        (fraction * width as f32).round() as usize
    } else {
        0
    };
    let label = if db.is_finite() {
        format!("{db:>6.1}")
    } else {
        format!("{:>6}", "-inf")
    };
    format!("{}{} {label}", "|".repeat(filled), " ".repeat(width - filled))
}

fn state_style(state: LoopState) -> Style {
    let color = match state {
        LoopState::Running => Color::Green,
        LoopState::Opening | LoopState::Refreshing => Color::Yellow,
        LoopState::Exiting => Color::Red,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn draw(frame: &mut ratatui::Frame<'_>, app: &AppState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(8),
            Constraint::Length(LOG_LINES as u16 + 2),
            Constraint::Length(3),
        ])
        .split(frame.size());
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(30), Constraint::Min(40)])
        .split(rows[1]);

    draw_header(frame, rows[0], app);
    draw_profiles(frame, body[0], app);
    draw_clients(frame, body[1], app);
    draw_log(frame, rows[2], app);
    draw_footer(frame, rows[3], app);

    if let Some(prompt) = &app.prompt {
        let area = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(3)])
            .split(frame.size())[1];
        let paragraph = Paragraph::new(prompt.buffer.clone()).block(
            Block::default()
                .title(prompt.title())
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow)),
        );
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }
}

fn draw_header(frame: &mut ratatui::Frame<'_>, area: Rect, app: &AppState) {
    let block = Block::default().title("Virtual Mixer").borders(Borders::ALL);

    let Some(status) = &app.status else {
        let idle = Paragraph::new(Span::styled(
            "No active engine",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
        frame.render_widget(idle.block(block), area);
        return;
    };

    let hardware = match status.hardware {
        Some(hw) => format!(
            "rx {:?}x{}  tx {:?}x{}",
            hw.rx_format, hw.rx_channels, hw.tx_format, hw.tx_channels
        ),
        None => "hardware closed".to_string(),
    };
    let delay = match status.latency {
        Some(report) => format!("{:.2} ms", report.offset_seconds * 1_000.0),
        None => "-".to_string(),
    };
    let engine = Line::from(vec![
        Span::styled(format!("{:?}", status.loop_state), state_style(status.loop_state)),
        Span::raw(format!(
            "  {} Hz  {} frames  {} mix channels  {}  iteration {}",
            status.sample_rate, status.samples, status.mix_channels, hardware, status.iterations
        )),
    ]);
    let levels = Line::from(format!(
        "in {}  out {}  delay {delay}  recording {}",
        meter(&status.master_in_peaks, status.full_scale, METER_WIDTH),
        meter(&status.master_out_peaks, status.full_scale, METER_WIDTH),
        if status.recording { "on" } else { "off" }
    ));

    frame.render_widget(Paragraph::new(vec![engine, levels]).block(block), area);
}

fn draw_profiles(frame: &mut ratatui::Frame<'_>, area: Rect, app: &AppState) {
    let block = Block::default().title("Profiles").borders(Borders::ALL);
    let Some(status) = &app.status else {
        frame.render_widget(block, area);
        return;
    };

    let selected = app.selected_client().map(|c| c.profile.as_str());
    let mut lines: Vec<Line> = status
        .profiles
        .iter()
        .map(|(name, kind)| {
            let clients = status.clients.iter().filter(|c| &c.profile == name).count();
            let kind = match kind {
                ProfileKind::Dsp => "dsp",
                ProfileKind::Loopback => "loop",
            };
            let text = format!("{name:<14} {kind:<4} {clients}");
            if selected == Some(name.as_str()) {
                Line::styled(text, Style::default().fg(Color::Yellow))
            } else {
                Line::from(text)
            }
        })
        .collect();
    if !status.taps.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(format!("{} monitor taps", status.taps.len())));
    }

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_clients(frame: &mut ratatui::Frame<'_>, area: Rect, app: &AppState) {
    let block = Block::default().title("Clients").borders(Borders::ALL);
    let Some(status) = &app.status else {
        frame.render_widget(block, area);
        return;
    };

    let header = Row::new(["", "Id", "Profile", "Wire", "Rx", "Tx", "Moved", "Xruns"])
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));

    let rows = status.clients.iter().enumerate().map(|(idx, client)| {
        let full_scale = crate::format::max_value(client.format);
        let direction = |enabled: bool, peaks: &[i64]| {
            if enabled {
                meter(peaks, full_scale, METER_WIDTH / 2)
            } else {
                "off".to_string()
            }
        };
        let xruns = client.overruns + client.underruns;
        let mut row = Row::new(vec![
            Cell::from(if idx == app.selected { ">" } else { "" }),
            Cell::from(format!("{}{}", client.id, if client.synchronized { "*" } else { "" })),
            Cell::from(client.profile.clone()),
            Cell::from(format!("{:?}x{}@{}", client.format, client.channels, client.rate)),
            Cell::from(direction(client.rx_enabled, &client.rx_peaks)),
            Cell::from(direction(client.tx_enabled, &client.tx_peaks)),
            Cell::from(format!("{}/{}", client.rx_bytes, client.tx_bytes)),
            Cell::from(format!("{}/{}", client.overruns, client.underruns)),
        ]);
        if idx == app.selected {
            row = row.style(Style::default().fg(Color::Yellow));
        } else if xruns > 0 {
            row = row.style(Style::default().fg(Color::Red));
        }
        row
    });

    let widths = [
        Constraint::Length(1),
        Constraint::Length(5),
        Constraint::Length(14),
        Constraint::Length(18),
        Constraint::Length(14),
        Constraint::Length(14),
        Constraint::Length(16),
        Constraint::Length(10),
    ];
    let table = Table::new(rows, widths).header(header).block(block).column_spacing(1);
    frame.render_widget(table, area);
}

fn draw_log(frame: &mut ratatui::Frame<'_>, area: Rect, app: &AppState) {
    let lines: Vec<Line> = app.log.iter().map(|line| Line::from(line.as_str())).collect();
    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Events"))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}

fn draw_footer(frame: &mut ratatui::Frame<'_>, area: Rect, app: &AppState) {
    let mut spans = vec![Span::raw(
        "Up/Down select  s shift  m mute  r recording  : directives  q quit",
    )];
    if let Some(message) = &app.message {
        spans.push(Span::styled(format!("   {message}"), Style::default().fg(Color::Green)));
    }
    if let Some(updated) = app.last_update {
        spans.push(Span::styled(
            format!("   {:.1}s", updated.elapsed().as_secs_f32()),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let block = Block::default().borders(Borders::ALL).title("Keys");
    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

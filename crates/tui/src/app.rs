use std::{cmp, io, thread, time::Duration};

use anyhow::{Context, Result};
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Cell, Clear, Gauge, List, ListItem, ListState, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use timetable_core::{
    bus::{Command, CommandFailure, CommandSender},
    models::{Level, SlotKey},
    session::{ConnectionState, SessionManager, SessionStatus},
    store::StoreState,
    TimetableGrid,
};

const TICK_RATE: Duration = Duration::from_millis(250);
const MAX_INPUT_LEN: usize = 96;

#[derive(Debug, Clone)]
struct Theme {
    primary_fg: Color,
    accent: Color,
    muted: Color,
    selection_bg: Color,
    success: Color,
    warning: Color,
    danger: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary_fg: Color::White,
            accent: Color::Cyan,
            muted: Color::DarkGray,
            selection_bg: Color::DarkGray,
            success: Color::Green,
            warning: Color::Yellow,
            danger: Color::Red,
        }
    }
}

impl Theme {
    fn state_color(&self, state: ConnectionState) -> Color {
        match state {
            ConnectionState::Connected => self.success,
            ConnectionState::Connecting | ConnectionState::Reconnecting => self.warning,
            ConnectionState::Disconnected => self.danger,
        }
    }
}

enum AppEvent {
    Input(Event),
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Grid,
    Timetables,
}

/// Single line text prompt shown over the dashboard.
#[derive(Debug, Clone)]
struct InputPrompt {
    input: String,
    cursor: usize,
    target: SlotKey,
}

impl InputPrompt {
    fn new(target: SlotKey) -> Self {
        Self {
            input: String::new(),
            cursor: 0,
            target,
        }
    }

    fn move_cursor(&mut self, delta: isize) {
        let len = self.input.len() as isize;
        self.cursor = (self.cursor as isize + delta).clamp(0, len) as usize;
    }

    fn move_home(&mut self) {
        self.cursor = 0;
    }

    fn move_end(&mut self) {
        self.cursor = self.input.len();
    }

    fn insert(&mut self, ch: char) {
        if self.input.len() >= MAX_INPUT_LEN {
            return;
        }
        if ch.is_ascii() && !ch.is_ascii_control() {
            self.input.insert(self.cursor, ch);
            self.cursor += 1;
        }
    }

    fn backspace(&mut self) {
        if self.cursor > 0 && self.cursor <= self.input.len() {
            self.cursor -= 1;
            self.input.remove(self.cursor);
        }
    }

    fn delete(&mut self) {
        if self.cursor < self.input.len() {
            self.input.remove(self.cursor);
        }
    }
}

/// Placement typed as `CODE, instructor, room`; only the code is required.
fn parse_placement(input: &str) -> Option<(String, String, String)> {
    let mut parts = input.split(',').map(str::trim);
    let code = parts.next().filter(|code| !code.is_empty())?;
    let instructor = parts.next().unwrap_or_default();
    let room = parts.next().unwrap_or_default();
    Some((code.to_uppercase(), instructor.to_string(), room.to_string()))
}

/// Level bound to a digit key: `1` is the first configured level.
fn level_for_key(levels: &[Level], ch: char) -> Option<Level> {
    let index = ch.to_digit(10)?.checked_sub(1)? as usize;
    levels.get(index).copied()
}

/// Dashboard over one hub session.
pub struct ConsoleApp {
    manager: SessionManager,
    commands: CommandSender,
    failures: Option<mpsc::Receiver<CommandFailure>>,
    levels: Vec<Level>,
    status: SessionStatus,
    view: StoreState,
    grid: TimetableGrid,
    cursor: (usize, usize),
    list_cursor: usize,
    focus: Focus,
    move_from: Option<SlotKey>,
    prompt: Option<InputPrompt>,
    message: String,
    should_quit: bool,
    theme: Theme,
}

impl ConsoleApp {
    pub fn new(
        manager: SessionManager,
        commands: CommandSender,
        failures: mpsc::Receiver<CommandFailure>,
        levels: Vec<Level>,
    ) -> Self {
        let status = manager.current_status();
        let view = manager.store().state();
        let grid = grid_for(&view);
        Self {
            manager,
            commands,
            failures: Some(failures),
            levels,
            status,
            view,
            grid,
            cursor: (0, 0),
            list_cursor: 0,
            focus: Focus::Grid,
            move_from: None,
            prompt: None,
            message: "Press ? for keys".to_string(),
            should_quit: false,
            theme: Theme::default(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode().context("failed to enter raw mode")?;
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to create terminal")?;
        terminal.hide_cursor()?;
        terminal.clear()?;

        let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(128);
        spawn_input_thread(event_tx);

        let mut status_rx = self.manager.status();
        let mut store_rx = self.manager.store().subscribe();
        let mut failures = self.failures.take();

        loop {
            terminal.draw(|frame| self.draw(frame))?;
            if self.should_quit {
                break;
            }

            tokio::select! {
                maybe_event = event_rx.recv() => {
                    if !self.process_app_event(maybe_event) {
                        break;
                    }
                }
                changed = status_rx.changed() => {
                    if changed.is_ok() {
                        self.status = status_rx.borrow_and_update().clone();
                    }
                }
                changed = store_rx.changed() => {
                    if changed.is_ok() {
                        self.sync_view();
                    }
                }
                Some(failure) = recv_failure(&mut failures) => {
                    self.message = format!("{} failed: {}", failure.command.label(), failure.error);
                }
            }
        }

        restore_terminal(&mut terminal)?;
        Ok(())
    }

    fn sync_view(&mut self) {
        self.view = self.manager.store().state();
        self.grid = grid_for(&self.view);
        let rows = self.grid.slots.len().saturating_sub(1);
        let columns = self.grid.days.len().saturating_sub(1);
        self.cursor = (self.cursor.0.min(rows), self.cursor.1.min(columns));
        self.list_cursor = self
            .list_cursor
            .min(self.view.timetables.len().saturating_sub(1));
    }

    fn process_app_event(&mut self, maybe_event: Option<AppEvent>) -> bool {
        match maybe_event {
            Some(AppEvent::Input(Event::Key(key))) if key.kind != KeyEventKind::Release => {
                let result = if self.prompt.is_some() {
                    self.handle_prompt_key(key)
                } else {
                    self.handle_key(key)
                };
                if let Err(err) = result {
                    self.message = format!("Error: {err}");
                }
                true
            }
            Some(AppEvent::Input(_)) | Some(AppEvent::Tick) => true,
            None => false,
        }
    }

    fn dispatch(&mut self, command: Command) {
        let label = command.label();
        match self.commands.send(command) {
            Ok(()) => {
                debug!(command = label, "command queued");
                self.message = format!("{} requested", capitalize(label));
            }
            Err(err) => {
                warn!(command = label, %err, "command dropped");
                self.message = format!("Could not {label}: {err}");
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        if key.modifiers == KeyModifiers::CONTROL {
            match key.code {
                KeyCode::Char('c') => self.should_quit = true,
                KeyCode::Char('r') => self.dispatch(Command::Redo),
                _ => {}
            }
            return Ok(());
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Esc => {
                if self.move_from.take().is_some() {
                    self.message = "Move cancelled".to_string();
                }
            }
            KeyCode::Char('?') => {
                self.message = "arrows move · Tab switch pane · a add · x clear · m move · g generate · u undo · ^R redo · l list · Enter load · p publish · d delete · r reconnect · D disconnect · q quit".to_string();
            }
            KeyCode::Char(ch @ '1'..='9') => match level_for_key(&self.levels, ch) {
                Some(level) => {
                    self.move_from = None;
                    self.dispatch(Command::SelectLevel(level));
                }
                None => self.message = format!("No level bound to {ch}"),
            },
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Focus::Grid => Focus::Timetables,
                    Focus::Timetables => Focus::Grid,
                };
            }
            KeyCode::Char('r') => self.dispatch(Command::Reconnect),
            KeyCode::Char('D') => self.dispatch(Command::Disconnect),
            KeyCode::F(5) => self.dispatch(Command::Refresh),
            KeyCode::Char('g') => self.dispatch(Command::Generate),
            KeyCode::Char('u') => self.dispatch(Command::Undo),
            KeyCode::Char('l') => self.dispatch(Command::ListTimetables),
            _ => match self.focus {
                Focus::Grid => self.handle_grid_key(key),
                Focus::Timetables => self.handle_list_key(key),
            },
        }
        Ok(())
    }

    fn handle_grid_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1, 0),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1, 0),
            KeyCode::Left | KeyCode::Char('h') => self.move_cursor(0, -1),
            KeyCode::Right => self.move_cursor(0, 1),
            KeyCode::Char('a') => {
                if let Some(target) = self.current_key() {
                    self.prompt = Some(InputPrompt::new(target));
                }
            }
            KeyCode::Char('x') | KeyCode::Delete => {
                if let Some(key) = self.current_key() {
                    if self.grid.cell(key.day, key.slot).is_some() {
                        self.dispatch(Command::RemoveInterval {
                            day: key.day,
                            slot: key.slot,
                        });
                    } else {
                        self.message = "Slot is already empty".to_string();
                    }
                }
            }
            KeyCode::Char('m') | KeyCode::Enter => self.toggle_move(),
            _ => {}
        }
    }

    fn toggle_move(&mut self) {
        let Some(here) = self.current_key() else {
            return;
        };
        match self.move_from.take() {
            Some(from) if from != here => {
                self.dispatch(Command::MoveInterval { from, to: here });
            }
            Some(_) => self.message = "Move cancelled".to_string(),
            None if self.grid.cell(here.day, here.slot).is_some() => {
                self.move_from = Some(here);
                self.message = format!(
                    "Moving {} slot {}: pick a target and press m",
                    here.day, here.slot
                );
            }
            None => self.message = "Nothing to move here".to_string(),
        }
    }

    fn handle_list_key(&mut self, key: KeyEvent) {
        let total = self.view.timetables.len();
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.list_cursor = self.list_cursor.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                self.list_cursor = cmp::min(self.list_cursor + 1, total.saturating_sub(1));
            }
            KeyCode::Enter => {
                if let Some(id) = self.selected_timetable() {
                    self.dispatch(Command::LoadTimetable(id));
                }
            }
            KeyCode::Char('p') => {
                if let Some(id) = self.selected_timetable() {
                    self.dispatch(Command::SetActiveTimetable(id));
                }
            }
            KeyCode::Char('d') => {
                if let Some(id) = self.selected_timetable() {
                    self.dispatch(Command::DeleteTimetable(id));
                }
            }
            _ => {}
        }
    }

    fn handle_prompt_key(&mut self, key: KeyEvent) -> Result<()> {
        let mut submit: Option<(SlotKey, String)> = None;
        let mut cancel = false;
        if let Some(prompt) = self.prompt.as_mut() {
            match key.code {
                KeyCode::Esc => cancel = true,
                KeyCode::Enter => submit = Some((prompt.target, prompt.input.clone())),
                KeyCode::Left => prompt.move_cursor(-1),
                KeyCode::Right => prompt.move_cursor(1),
                KeyCode::Home => prompt.move_home(),
                KeyCode::End => prompt.move_end(),
                KeyCode::Backspace => prompt.backspace(),
                KeyCode::Delete => prompt.delete(),
                KeyCode::Char(ch) => {
                    if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT {
                        prompt.insert(ch);
                    }
                }
                _ => {}
            }
        }

        if cancel {
            self.prompt = None;
            self.message = "Placement cancelled".to_string();
            return Ok(());
        }

        if let Some((target, input)) = submit {
            let Some((course_code, instructor, room)) = parse_placement(&input) else {
                self.message = "A course code is required".to_string();
                return Ok(());
            };
            self.prompt = None;
            info!(day = %target.day, slot = target.slot, %course_code, "placing course");
            self.dispatch(Command::AddInterval {
                day: target.day,
                slot: target.slot,
                course_code,
                instructor,
                room,
            });
        }
        Ok(())
    }

    fn move_cursor(&mut self, rows: isize, columns: isize) {
        let max_row = self.grid.slots.len().saturating_sub(1) as isize;
        let max_column = self.grid.days.len().saturating_sub(1) as isize;
        let row = (self.cursor.0 as isize + rows).clamp(0, max_row);
        let column = (self.cursor.1 as isize + columns).clamp(0, max_column);
        self.cursor = (row as usize, column as usize);
    }

    fn current_key(&self) -> Option<SlotKey> {
        self.grid.key_at(self.cursor.0, self.cursor.1)
    }

    fn selected_timetable(&self) -> Option<String> {
        self.view
            .timetables
            .get(self.list_cursor)
            .map(|entry| entry.id.clone())
    }

    fn draw(&mut self, frame: &mut Frame) {
        let size = frame.size();
        let progress_height = if self.view.progress.is_some() { 3 } else { 0 };
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(progress_height),
                Constraint::Length(5),
            ])
            .split(size);

        self.render_header(frame, chunks[0]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(72), Constraint::Percentage(28)])
            .split(chunks[1]);
        self.render_grid(frame, body[0]);
        self.render_timetables(frame, body[1]);

        if progress_height > 0 {
            self.render_progress(frame, chunks[2]);
        }
        self.render_status(frame, chunks[3]);

        if let Some(prompt) = &self.prompt {
            self.render_prompt(frame, prompt);
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let mut spans = vec![Span::styled(
            "Levels ",
            Style::default().fg(self.theme.muted),
        )];
        for (index, level) in self.levels.iter().enumerate() {
            let label = format!(" {}:L{} ", index + 1, level);
            let style = if *level == self.view.active_level {
                Style::default()
                    .fg(Color::Black)
                    .bg(self.theme.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(self.theme.primary_fg)
            };
            spans.push(Span::styled(label, style));
        }

        let color = self.theme.state_color(self.status.state);
        let mut state = self.status.state.label().to_string();
        if let Some(transport) = self.status.transport {
            state.push_str(&format!(" via {transport}"));
        }
        spans.push(Span::raw("   "));
        spans.push(Span::styled(
            format!("● {state}"),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));

        let paragraph = Paragraph::new(Line::from(spans))
            .block(Block::default().borders(Borders::ALL).title("Timetable Console"));
        frame.render_widget(paragraph, area);
    }

    fn render_grid(&self, frame: &mut Frame, area: Rect) {
        let header = Row::new(
            std::iter::once(Cell::from("Slot")).chain(
                self.grid
                    .days
                    .iter()
                    .map(|day| Cell::from(day.short_name())),
            ),
        )
        .style(
            Style::default()
                .fg(self.theme.accent)
                .add_modifier(Modifier::BOLD),
        );

        let rows = self.grid.rows().enumerate().map(|(row_index, (slot, cells))| {
            let mut row = vec![Cell::from(format!("#{slot}"))];
            for (column, cell) in cells.iter().enumerate() {
                let key = self.grid.key_at(row_index, column);
                let text = match cell {
                    Some(assignment) => Text::from(vec![
                        Line::from(Span::styled(
                            assignment.course_code.clone(),
                            Style::default().add_modifier(Modifier::BOLD),
                        )),
                        Line::from(Span::styled(
                            [assignment.instructor.as_str(), assignment.room.as_str()]
                                .iter()
                                .filter(|part| !part.is_empty())
                                .copied()
                                .collect::<Vec<_>>()
                                .join(" · "),
                            Style::default().fg(self.theme.muted),
                        )),
                    ]),
                    None => Text::from(Span::styled("·", Style::default().fg(self.theme.muted))),
                };
                let mut style = Style::default();
                if key.is_some() && key == self.move_from {
                    style = style.bg(self.theme.warning).fg(Color::Black);
                }
                if self.focus == Focus::Grid && (row_index, column) == self.cursor {
                    style = style.bg(self.theme.selection_bg).add_modifier(Modifier::REVERSED);
                }
                row.push(Cell::from(text).style(style));
            }
            Row::new(row).height(2)
        });

        let day_count = self.grid.days.len().max(1) as u32;
        let widths = std::iter::once(Constraint::Length(5)).chain(
            self.grid
                .days
                .iter()
                .map(|_| Constraint::Ratio(1, day_count)),
        );

        let (filled, total) = self.grid.occupancy();
        let received = self
            .view
            .snapshot
            .as_ref()
            .map(|snapshot| {
                snapshot
                    .received_at
                    .with_timezone(&Local)
                    .format("%H:%M:%S")
                    .to_string()
            })
            .unwrap_or_else(|| "never".to_string());
        let title = format!(
            "Level {} · {filled}/{total} slots · updated {received}",
            self.view.active_level
        );

        let table = Table::new(rows, widths)
            .header(header)
            .column_spacing(1)
            .block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(table, area);
    }

    fn render_timetables(&self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = if self.view.timetables.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "Press l to list saved timetables",
                Style::default().fg(self.theme.muted),
            )))]
        } else {
            self.view
                .timetables
                .iter()
                .map(|entry| {
                    let style = if entry.is_active {
                        Style::default().fg(self.theme.success)
                    } else {
                        Style::default().fg(self.theme.primary_fg)
                    };
                    let mut line = vec![Span::styled(entry.display_name(), style)];
                    if let Some(created) = entry.created_at {
                        line.push(Span::styled(
                            format!(" · {}", created.with_timezone(&Local).format("%d %b %H:%M")),
                            Style::default().fg(self.theme.muted),
                        ));
                    }
                    ListItem::new(Line::from(line))
                })
                .collect()
        };

        let mut list_state = ListState::default();
        if self.focus == Focus::Timetables && !self.view.timetables.is_empty() {
            list_state.select(Some(self.list_cursor));
        }
        let border = if self.focus == Focus::Timetables {
            Style::default().fg(self.theme.accent)
        } else {
            Style::default()
        };
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(border)
                    .title("Saved Timetables"),
            )
            .highlight_style(Style::default().bg(self.theme.selection_bg));
        frame.render_stateful_widget(list, area, &mut list_state);
    }

    fn render_progress(&self, frame: &mut Frame, area: Rect) {
        let Some(progress) = &self.view.progress else {
            return;
        };
        let label = match &progress.message {
            Some(message) => format!("{:.0}% · {message}", progress.percent),
            None => format!("{:.0}%", progress.percent),
        };
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Generating"))
            .gauge_style(Style::default().fg(self.theme.accent))
            .ratio((progress.percent / 100.0).clamp(0.0, 1.0))
            .label(label);
        frame.render_widget(gauge, area);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        let color = self.theme.state_color(self.status.state);
        let mut connection = vec![Span::styled(
            self.status.message.clone(),
            Style::default().fg(color),
        )];
        if self.status.manual_retry_required {
            connection.push(Span::styled(
                "  Press r to reconnect",
                Style::default()
                    .fg(self.theme.danger)
                    .add_modifier(Modifier::BOLD),
            ));
        }

        let outcome = match &self.view.last_outcome {
            Some(outcome) => {
                let style = if outcome.success {
                    Style::default().fg(self.theme.success)
                } else {
                    Style::default().fg(self.theme.danger)
                };
                Line::from(vec![
                    Span::styled(
                        outcome.at.with_timezone(&Local).format("%H:%M:%S ").to_string(),
                        Style::default().fg(self.theme.muted),
                    ),
                    Span::styled(outcome.message.clone(), style),
                ])
            }
            None => Line::from(""),
        };

        let paragraph = Paragraph::new(vec![
            Line::from(connection),
            outcome,
            Line::from(Span::styled(
                self.message.clone(),
                Style::default().fg(self.theme.muted),
            )),
        ])
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn render_prompt(&self, frame: &mut Frame, prompt: &InputPrompt) {
        let frame_area = frame.size();
        let width = cmp::max(cmp::min(64_u16, frame_area.width.saturating_sub(4)), 24_u16);
        let height = 7_u16.min(frame_area.height.saturating_sub(2)).max(5_u16);
        let x = frame_area.x + (frame_area.width.saturating_sub(width)) / 2;
        let y = frame_area.y + (frame_area.height.saturating_sub(height)) / 2;
        let area = Rect::new(x, y, width, height);

        frame.render_widget(Clear, area);

        let title = format!(
            "Place course - {} slot {}",
            prompt.target.day, prompt.target.slot
        );
        let input_line = Line::from(vec![
            Span::styled("> ", Style::default().fg(self.theme.accent)),
            Span::raw(prompt.input.clone()),
        ]);
        let helper = Line::from(vec![
            Span::styled("Enter", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" place  "),
            Span::styled("Esc", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" cancel"),
        ]);

        let paragraph = Paragraph::new(vec![
            Line::from("Course code, instructor, room"),
            input_line,
            Line::from(""),
            helper,
        ])
        .block(Block::default().borders(Borders::ALL).title(title))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: true });

        frame.render_widget(paragraph, area);

        let cursor_x =
            (area.x + 3 + prompt.cursor as u16).min(area.x + area.width.saturating_sub(2));
        frame.set_cursor(cursor_x, area.y + 2);
    }
}

fn grid_for(view: &StoreState) -> TimetableGrid {
    view.snapshot
        .as_ref()
        .map(TimetableGrid::from_snapshot)
        .unwrap_or_else(|| TimetableGrid::empty(view.active_level))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

async fn recv_failure(
    failures: &mut Option<mpsc::Receiver<CommandFailure>>,
) -> Option<CommandFailure> {
    match failures {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor()?;
    Ok(())
}

fn spawn_input_thread(sender: mpsc::Sender<AppEvent>) {
    thread::spawn(move || loop {
        match event::poll(TICK_RATE) {
            Ok(true) => match event::read() {
                Ok(evt) => {
                    if sender.blocking_send(AppEvent::Input(evt)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            Ok(false) => {
                if sender.blocking_send(AppEvent::Tick).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_needs_a_course_code() {
        assert_eq!(
            parse_placement("cs101, Dr. Amal , A1"),
            Some(("CS101".into(), "Dr. Amal".into(), "A1".into()))
        );
        assert_eq!(
            parse_placement("MA200"),
            Some(("MA200".into(), String::new(), String::new()))
        );
        assert_eq!(parse_placement(" , Dr. Amal"), None);
    }

    #[test]
    fn digits_pick_configured_levels() {
        let levels = [1, 2, 3, 4];
        assert_eq!(level_for_key(&levels, '1'), Some(1));
        assert_eq!(level_for_key(&levels, '4'), Some(4));
        assert_eq!(level_for_key(&levels, '5'), None);
        assert_eq!(level_for_key(&levels, '0'), None);
    }

    #[test]
    fn prompt_editing_respects_cursor() {
        let mut prompt = InputPrompt::new(SlotKey::new(timetable_core::Day::Monday, 1));
        for ch in "CS11".chars() {
            prompt.insert(ch);
        }
        prompt.move_cursor(-1);
        prompt.insert('0');
        assert_eq!(prompt.input, "CS101");
        prompt.move_home();
        prompt.delete();
        prompt.move_end();
        prompt.backspace();
        assert_eq!(prompt.input, "S10");
    }
}

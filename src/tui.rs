use std::collections::BTreeSet;
use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table};

use crate::channel::{ClipRange, PlateTable};
use crate::domain::{FAM, ROX, VIC};
use crate::error::PlateError;
use crate::render::{CancelToken, HeatmapFrame, Renderer, ScatterSeries};

const REDRAW_INTERVAL: Duration = Duration::from_millis(250);
const KEY_POLL: Duration = Duration::from_millis(120);
const SCATTER_ORDER: [&str; 3] = [ROX, VIC, FAM];
const SERIES_COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Magenta,
    Color::Green,
    Color::LightRed,
    Color::LightBlue,
];

/// Raw mode plus alternate screen for as long as the value lives.
pub struct TerminalSession {
    _private: (),
}

impl TerminalSession {
    pub fn enter() -> Result<Self, PlateError> {
        enable_raw_mode().map_err(terminal_error)?;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen).map_err(terminal_error)?;
        stdout.execute(Hide).map_err(terminal_error)?;
        Ok(Self { _private: () })
    }

    /// Waits up to `timeout` for a key press and reports whether it asked
    /// to quit (`q`, `Esc` or `Ctrl-C`).
    pub fn quit_requested(&self, timeout: Duration) -> Result<bool, PlateError> {
        if !event::poll(timeout).map_err(terminal_error)? {
            return Ok(false);
        }
        match event::read().map_err(terminal_error)? {
            Event::Key(key) => Ok(key_action(key) == Some(KeyAction::Quit)),
            _ => Ok(false),
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = stdout.execute(Show);
        let _ = stdout.execute(LeaveAlternateScreen);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Next,
    Quit,
}

fn key_action(key: KeyEvent) -> Option<KeyAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyAction::Quit)
        }
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
        KeyCode::Enter | KeyCode::Right | KeyCode::Char(' ') | KeyCode::Char('n') => {
            Some(KeyAction::Next)
        }
        _ => None,
    }
}

fn terminal_error(err: io::Error) -> PlateError {
    PlateError::Terminal(err.to_string())
}

/// Draws views into the terminal owned by a [`TerminalSession`].
///
/// The scatter view is redrawn until cancelled and never reads input, so
/// the thread that owns the session keeps sole control of the keyboard. The
/// heatmap view reads keys itself: next on `Enter`/`Space`/`→`, and quitting
/// cancels the token.
#[derive(Debug, Default)]
pub struct TerminalRenderer;

impl TerminalRenderer {
    pub fn new() -> Self {
        Self
    }

    fn terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, PlateError> {
        let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout())).map_err(terminal_error)?;
        terminal.clear().map_err(terminal_error)?;
        Ok(terminal)
    }
}

impl Renderer for TerminalRenderer {
    fn scatter(&self, series: &[ScatterSeries], cancel: &CancelToken) -> Result<(), PlateError> {
        let mut terminal = Self::terminal()?;
        let view = ScatterView::new(series);
        while !cancel.is_cancelled() {
            terminal
                .draw(|frame| view.draw(frame))
                .map_err(terminal_error)?;
            cancel.wait(REDRAW_INTERVAL);
        }
        Ok(())
    }

    fn heatmap(&self, frame: &HeatmapFrame, cancel: &CancelToken) -> Result<(), PlateError> {
        let mut terminal = Self::terminal()?;
        while !cancel.is_cancelled() {
            terminal
                .draw(|f| draw_heatmap(f, frame))
                .map_err(terminal_error)?;
            if !event::poll(KEY_POLL).map_err(terminal_error)? {
                continue;
            }
            if let Event::Key(key) = event::read().map_err(terminal_error)? {
                match key_action(key) {
                    Some(KeyAction::Next) => return Ok(()),
                    Some(KeyAction::Quit) => cancel.cancel(),
                    None => {}
                }
            }
        }
        Ok(())
    }
}

struct DyePlot {
    dye: String,
    /// One point set per reading so each reading gets its own colour.
    points: Vec<(String, Vec<(f64, f64)>)>,
    y_bounds: [f64; 2],
}

struct ScatterView {
    categories: Vec<String>,
    readings: usize,
    plots: Vec<DyePlot>,
}

impl ScatterView {
    fn new(series: &[ScatterSeries]) -> Self {
        let mut categories: Vec<String> = Vec::new();
        for item in series {
            if !categories.contains(&item.label) {
                categories.push(item.label.clone());
            }
        }
        let readings = series
            .iter()
            .map(|item| &item.source)
            .collect::<BTreeSet<_>>()
            .len();

        let present = series.iter().map(|item| item.dye.as_str()).collect::<BTreeSet<_>>();
        let mut dyes = SCATTER_ORDER
            .iter()
            .copied()
            .filter(|dye| present.contains(dye))
            .collect::<Vec<_>>();
        dyes.extend(present.iter().copied().filter(|dye| !SCATTER_ORDER.contains(dye)));

        let plots = dyes
            .into_iter()
            .map(|dye| {
                let mut points = Vec::new();
                let mut low = f64::INFINITY;
                let mut high = f64::NEG_INFINITY;
                for item in series.iter().filter(|item| item.dye == dye) {
                    let x = categories
                        .iter()
                        .position(|label| *label == item.label)
                        .unwrap_or_default() as f64;
                    for value in &item.values {
                        low = low.min(*value);
                        high = high.max(*value);
                    }
                    let set = item.values.iter().map(|value| (x, *value)).collect();
                    points.push((item.label.clone(), set));
                }
                DyePlot {
                    dye: dye.to_string(),
                    points,
                    y_bounds: padded(low, high),
                }
            })
            .collect();

        Self {
            categories,
            readings,
            plots,
        }
    }

    fn draw(&self, frame: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Min(3)])
            .split(frame.area());

        let status = Line::from(vec![
            Span::styled(
                "plate-view ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("{} readings", self.readings)),
            Span::styled("  q quit", Style::default().fg(Color::DarkGray)),
        ]);
        frame.render_widget(Paragraph::new(status), chunks[0]);

        if self.plots.is_empty() {
            let empty = Paragraph::new("waiting for data files")
                .block(Block::default().borders(Borders::ALL));
            frame.render_widget(empty, chunks[1]);
            return;
        }

        let constraints = vec![Constraint::Ratio(1, self.plots.len() as u32); self.plots.len()];
        let areas = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(chunks[1]);
        for (plot, area) in self.plots.iter().zip(areas.iter()) {
            self.draw_plot(frame, plot, *area);
        }
    }

    fn draw_plot(&self, frame: &mut ratatui::Frame, plot: &DyePlot, area: Rect) {
        let datasets = plot
            .points
            .iter()
            .enumerate()
            .map(|(index, (_, points))| {
                Dataset::default()
                    .marker(Marker::Dot)
                    .graph_type(GraphType::Scatter)
                    .style(Style::default().fg(SERIES_COLORS[index % SERIES_COLORS.len()]))
                    .data(points)
            })
            .collect::<Vec<_>>();

        let last = self.categories.len().saturating_sub(1) as f64;
        let x_labels = match self.categories.as_slice() {
            [] => Vec::new(),
            [only] => vec![only.clone()],
            [first, .., end] => vec![first.clone(), end.clone()],
        };
        let y_labels = vec![
            format_value(plot.y_bounds[0]),
            format_value(plot.y_bounds[1]),
        ];

        let chart = Chart::new(datasets)
            .block(
                Block::default()
                    .title(format!(" {} values ", plot.dye))
                    .borders(Borders::ALL),
            )
            .x_axis(
                Axis::default()
                    .title("Barcode date")
                    .bounds([-0.5, last + 0.5])
                    .labels(x_labels),
            )
            .y_axis(Axis::default().bounds(plot.y_bounds).labels(y_labels));
        frame.render_widget(chart, area);
    }
}

fn padded(low: f64, high: f64) -> [f64; 2] {
    if !low.is_finite() || !high.is_finite() {
        return [0.0, 1.0];
    }
    let pad = ((high - low) * 0.05).max(1.0);
    [low - pad, high + pad]
}

fn draw_heatmap(frame: &mut ratatui::Frame, heatmap: &HeatmapFrame) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    let table = &heatmap.table;
    let scale = color_scale(table);

    let header = Row::new(
        std::iter::once(Cell::from(""))
            .chain(table.columns.iter().map(|column| Cell::from(column.to_string()))),
    )
    .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = table.row_labels.iter().zip(&table.cells).map(|(label, cells)| {
        let wells = cells.iter().map(|cell| match cell {
            Some(value) => Cell::from(format_value(*value))
                .style(well_style(*value, heatmap.highlight, scale)),
            None => Cell::from("."),
        });
        Row::new(
            std::iter::once(Cell::from(label.to_string()).style(Style::default().add_modifier(Modifier::BOLD)))
                .chain(wells),
        )
    });

    let widths = std::iter::once(Constraint::Length(2))
        .chain(table.columns.iter().map(|_| Constraint::Min(5)))
        .collect::<Vec<_>>();

    let widget = Table::new(rows, widths).header(header).block(
        Block::default()
            .title(format!(" {} ", heatmap.title))
            .borders(Borders::ALL),
    );
    frame.render_widget(widget, chunks[0]);

    let legend = match heatmap.highlight {
        Some(range) => format!(
            "highlight [{}, {}]  x: well position, y: well row  enter next  q quit",
            format_value(range.min),
            format_value(range.max)
        ),
        None => "x: well position, y: well row  enter next  q quit".to_string(),
    };
    frame.render_widget(
        Paragraph::new(legend).style(Style::default().fg(Color::DarkGray)),
        chunks[1],
    );
}

fn color_scale(table: &PlateTable) -> ClipRange {
    let (low, high) = table
        .values()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), value| {
            (low.min(value), high.max(value))
        });
    if low.is_finite() && high.is_finite() {
        ClipRange::new(low, high)
    } else {
        ClipRange::new(0.0, 1.0)
    }
}

fn well_style(value: f64, highlight: Option<ClipRange>, scale: ClipRange) -> Style {
    if let Some(range) = highlight {
        return if range.contains(value) {
            Style::default().fg(Color::Black).bg(Color::Green)
        } else {
            Style::default().fg(Color::Gray)
        };
    }
    let span = scale.max - scale.min;
    let t = if span > 0.0 {
        (value - scale.min) / span
    } else {
        0.5
    };
    let level = (40.0 + t * 215.0) as u8;
    Style::default()
        .fg(Color::Black)
        .bg(Color::Rgb(level, level / 2, 255 - level))
}

/// Formats like a general-purpose `%g`: integers without decimals, other
/// values with up to four significant decimals.
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{value:.0}");
    }
    let text = format!("{value:.4}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

//! Overview (pending, retrying and breaker state per resource type)
//! Queues (depth of every priority level)
//! Circuits (breaker counters and cooldowns)

use std::{
  error::Error,
  io,
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ptqs::{config::Config, models::QueueStats, store::connect_redis, Scheduler};
use tokio::runtime::Runtime;
use tui::{
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
  Terminal,
};

const REFRESH: Duration = Duration::from_secs(2);

#[derive(Clone, Copy)]
enum DashboardTab {
  Overview,
  Queues,
  Circuits,
}

struct App {
  current_tab: DashboardTab,
  stats: Option<QueueStats>,
  last_error: Option<String>,
}

impl App {
  fn new() -> Self {
    Self {
      current_tab: DashboardTab::Overview,
      stats: None,
      last_error: None,
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Overview => DashboardTab::Queues,
      DashboardTab::Queues => DashboardTab::Circuits,
      DashboardTab::Circuits => DashboardTab::Overview,
    }
  }

  fn previous_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Overview => DashboardTab::Circuits,
      DashboardTab::Queues => DashboardTab::Overview,
      DashboardTab::Circuits => DashboardTab::Queues,
    }
  }
}

fn main() -> Result<(), Box<dyn Error>> {
  let config = Config::from_env()?;
  let rt = Runtime::new()?;
  let store = rt.block_on(connect_redis(&config.redis_url))?;
  let scheduler = Scheduler::new(Arc::new(store), config.scheduler.clone());

  let (tx, rx) = std::sync::mpsc::channel::<Result<QueueStats, String>>();
  thread::spawn(move || loop {
    let snapshot = rt.block_on(scheduler.queue_stats(None)).map_err(|e| e.to_string());
    if tx.send(snapshot).is_err() {
      break;
    }
    thread::sleep(REFRESH);
  });

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let mut app = App::new();
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    while let Ok(snapshot) = rx.try_recv() {
      match snapshot {
        Ok(stats) => {
          app.stats = Some(stats);
          app.last_error = None;
        }
        Err(e) => app.last_error = Some(e),
      }
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate
      .checked_sub(last_tick.elapsed())
      .unwrap_or_else(|| Duration::from_secs(0));
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Right => app.next_tab(),
          KeyCode::Left => app.previous_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([
      Constraint::Length(3),
      Constraint::Min(0),
      Constraint::Length(3),
    ].as_ref())
    .split(f.size());

  let tab_titles = ["Overview", "Queues", "Circuits"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
    .block(Block::default().borders(Borders::ALL).title("Scheduler"))
    .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .select(match app.current_tab {
      DashboardTab::Overview => 0,
      DashboardTab::Queues => 1,
      DashboardTab::Circuits => 2,
    });
  f.render_widget(tabs, chunks[0]);

  match (&app.stats, app.current_tab) {
    (None, _) => {
      let waiting = Paragraph::new("Waiting for first snapshot...")
        .block(Block::default().borders(Borders::ALL));
      f.render_widget(waiting, chunks[1]);
    }
    (Some(stats), DashboardTab::Overview) => render_overview(f, stats, chunks[1]),
    (Some(stats), DashboardTab::Queues) => render_queues(f, stats, chunks[1]),
    (Some(stats), DashboardTab::Circuits) => render_circuits(f, stats, chunks[1]),
  }

  let footer_text = match &app.last_error {
    Some(e) => format!("Store error: {} | q: Quit", e),
    None => "←/→: Switch Tabs | q: Quit".to_string(),
  };
  let footer = Paragraph::new(footer_text)
    .style(Style::default().fg(if app.last_error.is_some() { Color::Red } else { Color::White }))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn render_overview<B: Backend>(f: &mut tui::Frame<B>, stats: &QueueStats, area: Rect) {
  let items: Vec<ListItem> = stats.circuits.iter().map(|c| {
    let state = if c.open {
      Span::styled("OPEN", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
    } else {
      Span::styled("closed", Style::default().fg(Color::Green))
    };
    ListItem::new(Spans::from(vec![
      Span::styled(format!("{:<18}", c.resource_type.as_str()), Style::default().add_modifier(Modifier::BOLD)),
      Span::raw(format!("pending {:>5} | breaker ", stats.pending_for(c.resource_type))),
      state,
    ]))
  }).collect();
  let title = format!("Resources (retries scheduled: {})", stats.retrying);
  let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
  f.render_widget(list, area);
}

fn render_queues<B: Backend>(f: &mut tui::Frame<B>, stats: &QueueStats, area: Rect) {
  let items: Vec<ListItem> = stats.queues.iter().map(|q| {
    ListItem::new(Spans::from(vec![
      Span::styled(format!("{:<18}", q.resource_type.as_str()), Style::default().fg(Color::Yellow)),
      Span::raw(format!("priority {} | depth {}", q.priority.rank(), q.depth)),
    ]))
  }).collect();
  let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Priority Queues"));
  f.render_widget(list, area);
}

fn render_circuits<B: Backend>(f: &mut tui::Frame<B>, stats: &QueueStats, area: Rect) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
    .split(area);

  let counters: Vec<ListItem> = stats.circuits.iter().map(|c| {
    ListItem::new(vec![
      Spans::from(Span::styled(c.resource_type.as_str(), Style::default().add_modifier(Modifier::BOLD))),
      Spans::from(Span::raw(format!("failures {}/{}", c.consecutive_failures, c.threshold))),
    ])
  }).collect();
  f.render_widget(
    List::new(counters).block(Block::default().borders(Borders::ALL).title("Failure Counters")),
    chunks[0],
  );

  let open: Vec<ListItem> = stats.circuits.iter().filter_map(|c| {
    c.open_until.map(|until| {
      ListItem::new(Spans::from(Span::styled(
        format!("{} open until {}", c.resource_type, until.format("%H:%M:%S")),
        Style::default().fg(Color::Red),
      )))
    })
  }).collect();
  let open = if open.is_empty() { vec![ListItem::new(Spans::from(Span::raw("All circuits closed")))] } else { open };
  f.render_widget(
    List::new(open).block(Block::default().borders(Borders::ALL).title("Open Circuits")),
    chunks[1],
  );
}

use std::io;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::Terminal;

use crate::switch::ContextNamespace;
use crate::tree::{ContextTree, Row, Tone};

const HINTS: &str = " ↑/↓:move  Enter:select  ←:collapse  q:quit";

/// What the event loop should do after a key press.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
    Switch(ContextNamespace),
}

/// Show the tree until the user picks a namespace or quits. The terminal is
/// restored before returning, so the caller can switch right away.
pub fn run(tree: &mut ContextTree) -> Result<Option<ContextNamespace>> {
    install_panic_hook();

    terminal::enable_raw_mode().context("enable terminal raw mode")?;
    execute!(io::stdout(), EnterAlternateScreen).context("enter alternate screen")?;

    let result = Terminal::new(CrosstermBackend::new(io::stdout()))
        .context("create terminal")
        .and_then(|mut terminal| event_loop(&mut terminal, tree));

    let restored = restore();
    let target = result?;
    restored?;
    Ok(target)
}

fn event_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    tree: &mut ContextTree,
) -> Result<Option<ContextNamespace>> {
    loop {
        terminal
            .draw(|frame| draw(frame, tree))
            .context("draw context tree")?;

        let key = match event::read().context("read terminal event")? {
            Event::Key(key) if key.kind == KeyEventKind::Press => key,
            _ => continue,
        };

        match handle_key(tree, key) {
            Flow::Continue => {}
            Flow::Quit => return Ok(None),
            Flow::Switch(target) => return Ok(Some(target)),
        }
    }
}

fn handle_key(tree: &mut ContextTree, key: KeyEvent) -> Flow {
    match (key.code, key.modifiers) {
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => return Flow::Quit,
        (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => return Flow::Quit,
        (KeyCode::Up, _) | (KeyCode::Char('k'), _) => tree.move_up(),
        (KeyCode::Down, _) | (KeyCode::Char('j'), _) => tree.move_down(),
        (KeyCode::Home, _) | (KeyCode::Char('g'), _) => tree.move_first(),
        (KeyCode::End, _) | (KeyCode::Char('G'), _) => tree.move_last(),
        (KeyCode::Left, _) | (KeyCode::Char('h'), _) => tree.collapse(),
        (KeyCode::Enter, _) | (KeyCode::Char(' '), _) => {
            if let Some(target) = tree.select() {
                return Flow::Switch(target);
            }
        }
        _ => {}
    }
    Flow::Continue
}

fn draw(frame: &mut Frame, tree: &ContextTree) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(frame.area());

    let items: Vec<ListItem> = tree.rows().into_iter().map(row_item).collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" Contexts "))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut list_state = ListState::default().with_selected(tree.cursor_row());
    frame.render_stateful_widget(list, chunks[0], &mut list_state);

    let hints = Paragraph::new(HINTS).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(hints, chunks[1]);
}

fn row_item(row: Row) -> ListItem<'static> {
    let color = match row.tone {
        Tone::Failed => Color::Red,
        Tone::Active => Color::Green,
        Tone::Normal if row.depth == 0 => Color::Cyan,
        Tone::Normal => Color::Reset,
    };
    let marker = match row.expandable {
        Some(true) => "▾ ",
        Some(false) => "▸ ",
        None if row.depth == 0 => "  ",
        None => "",
    };
    let indent = "    ".repeat(row.depth);

    ListItem::new(Line::from(vec![
        Span::raw(indent),
        Span::styled(format!("{marker}{}", row.label), Style::default().fg(color)),
    ]))
}

fn restore() -> Result<()> {
    terminal::disable_raw_mode().context("disable terminal raw mode")?;
    execute!(io::stdout(), LeaveAlternateScreen).context("leave alternate screen")?;
    Ok(())
}

fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = terminal::disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));
}

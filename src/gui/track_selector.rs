use crate::gui::{error::UiError, with_screen};

use crossterm::event::{self, KeyCode, KeyEventKind};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
};
use std::time::Duration;

/// Let the operator pick one of `tracks`. `None` when they quit, or when
/// there is nothing to pick.
pub fn track_selector(mut tracks: Vec<String>) -> Result<Option<String>, UiError> {
    let n_tracks = tracks.len();
    if n_tracks == 0 {
        return Ok(None);
    }
    let selected = with_screen(|screen| {
        let mut cursor = 0;
        let mut list_state = ListState::default().with_selected(Some(cursor));
        loop {
            let title = Title::from(" Tracks ".magenta().bold());
            let instructions = Title::from(Line::from(vec![
                " Navigate ".into(),
                "<Up>/<Down>".magenta().bold(),
                " Play ".into(),
                "<Enter>".magenta().bold(),
                " Quit ".into(),
                "<Q> ".magenta().bold(),
            ]));
            let block = Block::default()
                .title(title.alignment(Alignment::Center))
                .title(
                    instructions
                        .alignment(Alignment::Center)
                        .position(Position::Bottom),
                )
                .borders(Borders::ALL);
            let list = List::new(tracks.iter().map(String::as_str))
                .style(Style::default().fg(Color::White))
                .highlight_symbol(">>")
                .highlight_style(Style::default().fg(Color::Magenta))
                .block(block);
            list_state.select(Some(cursor));
            screen.draw(|frame| {
                let area = frame.size();
                frame.render_stateful_widget(list, area, &mut list_state);
            })?;
            if event::poll(Duration::from_millis(16))? {
                if let event::Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match key.code {
                            KeyCode::Down => cursor = (cursor + 1) % n_tracks,
                            KeyCode::Up => cursor = (cursor + n_tracks - 1) % n_tracks,
                            KeyCode::Enter => return Ok(Some(cursor)),
                            KeyCode::Char('q') | KeyCode::Esc => return Ok(None),
                            _ => {}
                        }
                    }
                }
            }
        }
    })?;
    Ok(selected.map(|i| tracks.swap_remove(i)))
}

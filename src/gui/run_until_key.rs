use crate::gui::{error::UiError, with_screen};

use crossterm::event::{self, KeyEventKind};
use ratatui::{
    prelude::*,
    widgets::{block::Title, *},
};
use std::{sync::mpsc, thread, time::Duration};

enum ThreadMessage {
    Stop,
}

/// Show `title` and keep folding `step` over `init` on a background thread
/// until the operator presses a key. Each step also returns a status line,
/// drawn under the title.
pub fn run_until_key<F, T>(title: &str, init: T, step: F) -> Result<T, UiError>
where
    F: Fn(T) -> (T, String) + Send + 'static,
    T: Send + 'static,
{
    let (stop_tx, stop_rx) = mpsc::channel();
    let (status_tx, status_rx) = mpsc::channel::<String>();
    let (res_tx, res_rx) = mpsc::channel();

    let th = thread::spawn(move || {
        let mut val = init;
        loop {
            let (next, status) = step(val);
            val = next;
            // The screen may already be gone; the result still matters.
            let _ = status_tx.send(status);
            if let Ok(ThreadMessage::Stop) = stop_rx.try_recv() {
                let _ = res_tx.send(val);
                break;
            }
        }
    });

    let shown = with_screen(|screen| {
        let mut status = String::new();
        loop {
            while let Ok(latest) = status_rx.try_recv() {
                status = latest;
            }
            let block = Block::default()
                .title(Title::from(Span::from(format!(" {} ", title)).magenta().bold()).alignment(Alignment::Center))
                .borders(Borders::ALL);
            let text = Paragraph::new(vec![
                Line::from(status.as_str()),
                Line::from(vec![" Press any key to stop ".magenta().bold()]),
            ])
            .block(block);
            screen.draw(|frame| {
                let area = frame.size();
                frame.render_widget(text, area);
            })?;
            if event::poll(Duration::from_millis(16))? {
                if let event::Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        return Ok(());
                    }
                }
            }
        }
    });

    // Stop the fold even if drawing failed.
    stop_tx.send(ThreadMessage::Stop)?;
    let res = res_rx.recv()?;
    th.join().map_err(|_| UiError::JoinError)?;
    shown?;
    Ok(res)
}

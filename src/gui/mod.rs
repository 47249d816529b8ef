//! Full-screen helpers for the `piper` binary.

mod error;
mod run_until_key;
mod track_selector;

pub use error::UiError;
pub use run_until_key::run_until_key;
pub use track_selector::track_selector;

use crossterm::{
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{stdout, Stdout};

type Screen = Terminal<CrosstermBackend<Stdout>>;

/// Run `f` on the alternate screen, restoring the terminal however `f` ends.
fn with_screen<T>(f: impl FnOnce(&mut Screen) -> Result<T, UiError>) -> Result<T, UiError> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let result = Terminal::new(CrosstermBackend::new(stdout()))
        .map_err(UiError::from)
        .and_then(|mut screen| {
            screen.clear()?;
            f(&mut screen)
        });
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    result
}

use std::{borrow::Cow, fmt, io, sync::mpsc};

/// A nice little error for the full-screen helpers.
#[derive(Debug)]
pub enum UiError {
    /// Drawing or reading keys failed.
    IoError(io::Error),
    /// The worker thread hung up early.
    ChannelClosed,
    /// The worker thread panicked.
    JoinError,
}

impl fmt::Display for UiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use UiError as UE;
        let msg = match self {
            UE::IoError(error) => Cow::from(format!("terminal io: {}", error)),
            UE::ChannelClosed => Cow::from("background thread hung up"),
            UE::JoinError => Cow::from("background thread panicked"),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for UiError {}

impl From<io::Error> for UiError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

impl<T> From<mpsc::SendError<T>> for UiError {
    fn from(_: mpsc::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}

impl From<mpsc::RecvError> for UiError {
    fn from(_: mpsc::RecvError) -> Self {
        Self::ChannelClosed
    }
}

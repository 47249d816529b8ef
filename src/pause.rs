//! The pause sentinel: a text file that, when it holds exactly `1`, asks
//! every running motion loop to hold still. Anything else, including no
//! file at all or a file that cannot be read, means "carry on".

use std::{
    fs,
    path::{Path, PathBuf},
};

/// Handle on the sentinel file.
#[derive(Debug, Clone)]
pub struct PauseSentinel {
    path: PathBuf,
}

impl PauseSentinel {
    /// Watch `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PauseSentinel { path: path.into() }
    }

    /// The watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a pause is requested right now.
    pub fn is_active(&self) -> bool {
        fs::read_to_string(&self.path)
            .map(|s| s.trim() == "1")
            .unwrap_or(false)
    }

    /// Request or release a pause.
    pub fn set(&self, active: bool) -> std::io::Result<()> {
        fs::write(&self.path, if active { "1" } else { "0" })
    }
}

//! Where finished exports land.

use std::path::PathBuf;

use time::{Date, OffsetDateTime};

/// Receives the CSV payload of a finished export.
pub trait FileSink: Send + Sync {
    /// Store `contents` under `file_name` and report where it went.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be written.
    fn save(&self, file_name: &str, contents: &[u8]) -> std::io::Result<PathBuf>;
}

/// Writes exports into a directory, replacing a same-day file.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FileSink for DirectorySink {
    fn save(&self, file_name: &str, contents: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

/// `completed_services_<YYYY-MM-DD>.csv`
#[must_use]
pub fn export_file_name(date: Date) -> String {
    format!(
        "completed_services_{:04}-{:02}-{:02}.csv",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Today's date in UTC.
#[must_use]
pub fn utc_today() -> Date {
    OffsetDateTime::now_utc().date()
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod tests;

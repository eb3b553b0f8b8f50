//! Export job state as seen by callers.

use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle of one export job.
///
/// `Idle → Starting → Pending → {Succeeded | Failed | Unauthorized}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportStatus {
    #[default]
    Idle,
    Starting,
    Pending,
    Succeeded,
    Failed,
    Unauthorized,
}

impl ExportStatus {
    /// True while a start request or the poll loop is outstanding.
    #[must_use]
    pub fn in_progress(self) -> bool {
        matches!(self, Self::Starting | Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Success,
    Danger,
}

/// Human-readable progress line shown next to the export control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: MessageKind,
    pub text: String,
}

impl StatusMessage {
    pub(crate) fn info(text: &str) -> Self {
        Self { kind: MessageKind::Info, text: text.to_owned() }
    }

    pub(crate) fn success(text: &str) -> Self {
        Self { kind: MessageKind::Success, text: text.to_owned() }
    }

    pub(crate) fn danger(text: String) -> Self {
        Self { kind: MessageKind::Danger, text }
    }
}

pub(crate) const MSG_STARTING: &str = "Starting export...";
pub(crate) const MSG_IN_PROGRESS: &str = "Export in progress...";
pub(crate) const MSG_COMPLETE: &str = "Export complete!";

/// Why a job ended without a file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    /// Credential missing, or rejected with 401 at start or poll time.
    #[error("Authentication required")]
    AuthRequired,

    /// The start request was refused or never reached the server.
    #[error("Export failed: {0}")]
    StartFailed(String),

    /// A poll tick got an unexpected status, a transport error, or the
    /// payload could not be saved.
    #[error("Export failed: {0}")]
    PollFailed(String),

    /// The optional polling cutoff elapsed while the server was still working.
    #[error("Export failed: no result after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl ExportError {
    pub(crate) fn status(&self) -> ExportStatus {
        match self {
            Self::AuthRequired => ExportStatus::Unauthorized,
            Self::StartFailed(_) | Self::PollFailed(_) | Self::TimedOut(_) => ExportStatus::Failed,
        }
    }
}

/// Point-in-time view of the poller's current job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportSnapshot {
    /// Monotonic job number; 0 before the first start.
    pub job: u64,
    pub status: ExportStatus,
    pub task_id: Option<String>,
    pub message: Option<StatusMessage>,
    /// Status checks issued for this job.
    pub polls: u32,
    pub saved_to: Option<PathBuf>,
    pub error: Option<ExportError>,
}

impl ExportSnapshot {
    pub(crate) fn starting(job: u64) -> Self {
        Self {
            job,
            status: ExportStatus::Starting,
            message: Some(StatusMessage::info(MSG_STARTING)),
            ..Self::default()
        }
    }

    pub(crate) fn fail(&mut self, error: ExportError) {
        self.status = error.status();
        self.message = Some(StatusMessage::danger(error.to_string()));
        self.error = Some(error);
    }
}

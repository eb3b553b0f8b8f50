//! Export poller: drives the server-side CSV job to a terminal state.
//!
//! DESIGN
//! ======
//! `start_export` issues the start request inline. Once the server hands
//! back a task id, a background task checks `/get-csv/{task}` on a fixed
//! interval until it sees a terminal answer, then writes the payload
//! through a [`FileSink`] on the blocking pool. Each tick finishes before the next one is
//! awaited, so checks never overlap.
//!
//! The current job lives in a `watch` channel. Every write is tagged with
//! the job number and dropped if a newer job has started, so a cancelled
//! loop can never overwrite its successor's state. Starting again or
//! dropping the poller cancels the running loop through its
//! `CancellationToken`.
//!
//! ERROR HANDLING
//! ==============
//! Nothing is retried. The first unexpected answer ends the job as
//! `Failed` (or `Unauthorized` for 401) and the reason is kept in the
//! snapshot's message. The background task never returns an error.

pub mod job;
pub mod sink;

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use time::Date;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use job::{ExportError, ExportSnapshot, ExportStatus, MessageKind, StatusMessage};
pub use sink::{DirectorySink, FileSink, export_file_name, utc_today};

use crate::config::PollSettings;
use crate::net::api::ApiError;
use job::{MSG_COMPLETE, MSG_IN_PROGRESS};

// =============================================================================
// TRANSPORT
// =============================================================================

/// Server answer to the start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartReply {
    Accepted { task_id: String },
    Unauthorized,
    Rejected { status: u16, detail: String },
}

/// Server answer to one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply {
    /// 200 with the finished CSV.
    Ready(Vec<u8>),
    /// 202, still generating.
    Processing,
    Unauthorized,
    Rejected { status: u16, detail: String },
}

/// The two export endpoints. Implemented by [`crate::net::api::ApiClient`].
#[async_trait]
pub trait ExportTransport: Send + Sync {
    /// Ask the server to begin generating the report.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the request cannot be sent or decoded.
    async fn start_export(&self) -> Result<StartReply, ApiError>;

    /// Check on a running job.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the request cannot be sent or read.
    async fn poll_export(&self, task_id: &str) -> Result<PollReply, ApiError>;
}

// =============================================================================
// PUBLISHER
// =============================================================================

struct Publisher {
    state: watch::Sender<ExportSnapshot>,
    events: Mutex<Option<mpsc::UnboundedSender<ExportSnapshot>>>,
}

impl Publisher {
    fn new() -> Self {
        let (state, _) = watch::channel(ExportSnapshot::default());
        Self { state, events: Mutex::new(None) }
    }

    /// Route later snapshots to `events`, replacing any earlier listener.
    fn listen(&self, events: mpsc::UnboundedSender<ExportSnapshot>) {
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
    }

    fn begin(&self, job: u64) {
        let snapshot = ExportSnapshot::starting(job);
        self.state.send_replace(snapshot.clone());
        self.emit(snapshot);
    }

    /// Apply `change` if `job` is still the current job.
    fn update<F>(&self, job: u64, change: F) -> bool
    where
        F: FnOnce(&mut ExportSnapshot),
    {
        let mut published = None;
        self.state.send_if_modified(|snapshot| {
            if snapshot.job != job {
                return false;
            }
            change(snapshot);
            published = Some(snapshot.clone());
            true
        });
        match published {
            Some(snapshot) => {
                self.emit(snapshot);
                true
            }
            None => false,
        }
    }

    fn emit(&self, snapshot: ExportSnapshot) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(events) = events.as_ref() {
            if events.send(snapshot).is_err() {
                debug!("export event listener dropped");
            }
        }
    }
}

// =============================================================================
// POLLER
// =============================================================================

struct ActiveLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs one export job at a time.
///
/// Methods that start work take `&mut self`, so a second start cannot
/// begin while the first start request is still in flight.
pub struct ExportPoller {
    transport: Arc<dyn ExportTransport>,
    sink: Arc<dyn FileSink>,
    settings: PollSettings,
    today: fn() -> Date,
    publisher: Arc<Publisher>,
    active: Option<ActiveLoop>,
    next_job: u64,
}

impl ExportPoller {
    #[must_use]
    pub fn new(transport: Arc<dyn ExportTransport>, sink: Arc<dyn FileSink>, settings: PollSettings) -> Self {
        Self {
            transport,
            sink,
            settings,
            today: utc_today,
            publisher: Arc::new(Publisher::new()),
            active: None,
            next_job: 0,
        }
    }

    /// Receive every snapshot published from now on, in order.
    ///
    /// A running poll loop shares the same publisher, so attaching after a
    /// start picks up the rest of that job.
    #[must_use]
    pub fn with_events(self, events: mpsc::UnboundedSender<ExportSnapshot>) -> Self {
        self.publisher.listen(events);
        self
    }

    /// Override the date used to name the saved file.
    #[must_use]
    pub fn with_today(mut self, today: fn() -> Date) -> Self {
        self.today = today;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> ExportSnapshot {
        self.publisher.state.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> ExportStatus {
        self.publisher.state.borrow().status
    }

    /// The "export in progress" flag: true from start until a terminal state.
    #[must_use]
    pub fn is_exporting(&self) -> bool {
        self.status().in_progress()
    }

    /// True while a poll loop task is alive.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.active.as_ref().is_some_and(|active| !active.handle.is_finished())
    }

    /// Begin a fresh export job, cancelling any loop left from an earlier one.
    ///
    /// Returns once the server has accepted the job and polling has begun.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::AuthRequired`] or [`ExportError::StartFailed`]
    /// when the job never starts. The same error is recorded in the snapshot.
    pub async fn start_export(&mut self) -> Result<(), ExportError> {
        self.stop_polling();
        self.next_job += 1;
        let job = self.next_job;
        self.publisher.begin(job);
        info!(job, "export starting");

        let task_id = match classify_start(self.transport.start_export().await) {
            Ok(task_id) => task_id,
            Err(error) => {
                warn!(job, %error, "export did not start");
                self.publisher.update(job, |snapshot| snapshot.fail(error.clone()));
                return Err(error);
            }
        };

        self.publisher.update(job, |snapshot| {
            snapshot.status = ExportStatus::Pending;
            snapshot.task_id = Some(task_id.clone());
        });
        info!(job, task_id = %task_id, "export accepted; polling");

        let cancel = CancellationToken::new();
        let run = PollJob {
            job,
            task_id,
            transport: Arc::clone(&self.transport),
            sink: Arc::clone(&self.sink),
            publisher: Arc::clone(&self.publisher),
            settings: self.settings,
            today: self.today,
        };
        let handle = tokio::spawn(poll_loop(run, cancel.clone()));
        self.active = Some(ActiveLoop { cancel, handle });
        Ok(())
    }

    /// Wait until the current job leaves `Starting`/`Pending`.
    ///
    /// Returns immediately when idle or already terminal.
    pub async fn wait_until_settled(&self) -> ExportSnapshot {
        let mut rx = self.publisher.state.subscribe();
        match rx.wait_for(|snapshot| !snapshot.status.in_progress()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    fn stop_polling(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            debug!("previous export poll loop cancelled");
        }
    }
}

impl Drop for ExportPoller {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

fn classify_start(reply: Result<StartReply, ApiError>) -> Result<String, ExportError> {
    match reply {
        Ok(StartReply::Accepted { task_id }) if task_id.trim().is_empty() => {
            Err(ExportError::StartFailed("server returned an empty task id".to_owned()))
        }
        Ok(StartReply::Accepted { task_id }) => Ok(task_id),
        Ok(StartReply::Unauthorized) | Err(ApiError::Unauthorized | ApiError::MissingCredential) => {
            Err(ExportError::AuthRequired)
        }
        Ok(StartReply::Rejected { detail, .. }) => Err(ExportError::StartFailed(detail)),
        Err(error) => Err(ExportError::StartFailed(error.to_string())),
    }
}

// =============================================================================
// POLL LOOP
// =============================================================================

struct PollJob {
    job: u64,
    task_id: String,
    transport: Arc<dyn ExportTransport>,
    sink: Arc<dyn FileSink>,
    publisher: Arc<Publisher>,
    settings: PollSettings,
    today: fn() -> Date,
}

async fn poll_loop(run: PollJob, cancel: CancellationToken) {
    let period = run.settings.interval.max(Duration::from_millis(1));
    let started = Instant::now();
    let mut ticker = tokio::time::interval_at(started + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(job = run.job, task_id = %run.task_id, "export poll loop cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        if let Some(limit) = run.settings.max_duration {
            if started.elapsed() >= limit {
                run.fail(ExportError::TimedOut(limit), false);
                return;
            }
        }

        let reply = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(job = run.job, task_id = %run.task_id, "export poll cancelled mid-request");
                return;
            }
            reply = run.transport.poll_export(&run.task_id) => reply,
        };

        if !run.settle(reply).await {
            return;
        }
    }
}

impl PollJob {
    /// Record one tick's outcome. Returns `true` to keep polling.
    async fn settle(&self, reply: Result<PollReply, ApiError>) -> bool {
        match reply {
            Ok(PollReply::Processing) => {
                debug!(job = self.job, task_id = %self.task_id, "export still processing");
                self.publisher.update(self.job, |snapshot| {
                    snapshot.polls += 1;
                    snapshot.message = Some(StatusMessage::info(MSG_IN_PROGRESS));
                })
            }
            Ok(PollReply::Ready(contents)) => {
                self.complete(contents).await;
                false
            }
            Ok(PollReply::Unauthorized) | Err(ApiError::Unauthorized | ApiError::MissingCredential) => {
                self.fail(ExportError::AuthRequired, true);
                false
            }
            Ok(PollReply::Rejected { status, detail }) => {
                debug!(job = self.job, status, "export status check rejected");
                self.fail(ExportError::PollFailed(detail), true);
                false
            }
            Err(error) => {
                self.fail(ExportError::PollFailed(error.to_string()), true);
                false
            }
        }
    }

    /// Save the payload on the blocking pool, then mark the job done.
    async fn complete(&self, contents: Vec<u8>) {
        let file_name = export_file_name((self.today)());
        let bytes = contents.len();
        let sink = Arc::clone(&self.sink);
        let name = file_name.clone();
        let saved = tokio::task::spawn_blocking(move || sink.save(&name, &contents))
            .await
            .unwrap_or_else(|error| Err(io::Error::other(error)));
        match saved {
            Ok(path) => {
                info!(
                    job = self.job,
                    task_id = %self.task_id,
                    path = %path.display(),
                    bytes,
                    "export saved"
                );
                self.publisher.update(self.job, |snapshot| {
                    snapshot.polls += 1;
                    snapshot.status = ExportStatus::Succeeded;
                    snapshot.message = Some(StatusMessage::success(MSG_COMPLETE));
                    snapshot.saved_to = Some(path);
                });
            }
            Err(error) => {
                self.fail(ExportError::PollFailed(format!("could not save {file_name}: {error}")), true);
            }
        }
    }

    fn fail(&self, error: ExportError, polled: bool) {
        warn!(job = self.job, task_id = %self.task_id, %error, "export failed");
        self.publisher.update(self.job, |snapshot| {
            if polled {
                snapshot.polls += 1;
            }
            snapshot.fail(error);
        });
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

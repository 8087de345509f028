use super::{DownloadJob, DownloadRequest, JobId, Ticker};
use crate::api::DownloadBackend;
use crate::error::{ApiError, SubmitError};
use crate::song::Song;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the rest of the app gets to look at. Cloned out of the tracker after
/// every change, so it is always consistent between ticks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerSnapshot {
    pub jobs: BTreeMap<JobId, DownloadJob>,
    /// Jobs still being polled, in submission order
    pub active: Vec<JobId>,
}

impl TrackerSnapshot {
    pub fn job(&self, job_id: &JobId) -> Option<&DownloadJob> {
        self.jobs.get(job_id)
    }

    pub fn is_active(&self, job_id: &JobId) -> bool {
        self.active.contains(job_id)
    }
}

/// Notifications for result toasts and the like
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Registered(JobId),
    Updated { job_id: JobId, job: DownloadJob },
    Finished { job_id: JobId, job: DownloadJob },
}

enum TrackerCommand {
    Register { job_id: JobId, ack: oneshot::Sender<()> },
    Discard(JobId),
}

type StatusFuture = BoxFuture<'static, (JobId, Result<DownloadJob, ApiError>)>;

/// Owns the job collection and the poll loop. Runs as a single task; every
/// mutation happens inside that task.
pub struct JobTracker<B> {
    backend: Arc<B>,
    jobs: BTreeMap<JobId, DownloadJob>,
    active: Vec<JobId>,
    in_flight: HashSet<JobId>,
    failures: HashMap<JobId, u32>, // consecutive failed polls per job
    snapshot_tx: watch::Sender<TrackerSnapshot>,
    event_sender: Option<mpsc::UnboundedSender<TrackerEvent>>,
}

impl<B: DownloadBackend + 'static> JobTracker<B> {
    pub fn new(backend: Arc<B>) -> Self {
        let (snapshot_tx, _) = watch::channel(TrackerSnapshot::default());
        Self {
            backend,
            jobs: BTreeMap::new(),
            active: Vec::new(),
            in_flight: HashSet::new(),
            failures: HashMap::new(),
            snapshot_tx,
            event_sender: None,
        }
    }

    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<TrackerEvent>) {
        self.event_sender = Some(sender);
    }

    /// Start the poll loop. Cancelling `cancel` stops it at the next
    /// scheduling point and drops whatever requests are still in flight.
    pub fn spawn<T: Ticker + 'static>(
        self,
        ticker: T,
        cancel: CancellationToken,
    ) -> (TrackerHandle<B>, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = TrackerHandle {
            backend: Arc::clone(&self.backend),
            commands: commands_tx,
            snapshot: self.snapshot_tx.subscribe(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(self.run(ticker, commands_rx, cancel));
        (handle, task)
    }

    async fn run<T: Ticker>(
        mut self,
        mut ticker: T,
        mut commands: mpsc::UnboundedReceiver<TrackerCommand>,
        cancel: CancellationToken,
    ) {
        let mut pending: FuturesUnordered<StatusFuture> = FuturesUnordered::new();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut ticker),
                    None => break,
                },

                Some((job_id, result)) = pending.next(), if !pending.is_empty() => {
                    self.apply(job_id, result);
                }

                _ = ticker.tick(), if !self.active.is_empty() => {
                    self.dispatch(&mut pending);
                }
            }
        }

        if !pending.is_empty() {
            debug!("Tracker stopped, discarding {} in-flight status requests", pending.len());
        }
        info!("Download tracker stopped with {} jobs still active", self.active.len());
    }

    fn handle_command<T: Ticker>(&mut self, command: TrackerCommand, ticker: &mut T) {
        match command {
            TrackerCommand::Register { job_id, ack } => {
                if self.active.is_empty() {
                    // polling resumes, give the new job a full interval
                    ticker.reset();
                }
                self.jobs.insert(job_id.clone(), DownloadJob::queued());
                if !self.active.contains(&job_id) {
                    self.active.push(job_id.clone());
                }
                debug!("Tracking download {}", job_id);
                self.emit(TrackerEvent::Registered(job_id));
                self.publish();
                let _ = ack.send(());
            }
            TrackerCommand::Discard(job_id) => {
                let was_active = self.active.contains(&job_id);
                self.active.retain(|id| id != &job_id);
                self.failures.remove(&job_id);
                if self.jobs.remove(&job_id).is_some() {
                    if was_active {
                        info!("Stopped tracking download {} before it finished", job_id);
                    }
                    self.publish();
                }
            }
        }
    }

    /// One request per active job that isn't already waiting on one
    fn dispatch(&mut self, pending: &mut FuturesUnordered<StatusFuture>) {
        for job_id in &self.active {
            if !self.in_flight.insert(job_id.clone()) {
                continue;
            }
            let backend = Arc::clone(&self.backend);
            let job_id = job_id.clone();
            pending.push(Box::pin(async move {
                let result = backend.job_status(&job_id).await;
                (job_id, result)
            }));
        }
    }

    fn apply(&mut self, job_id: JobId, result: Result<DownloadJob, ApiError>) {
        self.in_flight.remove(&job_id);

        if !self.active.contains(&job_id) {
            debug!("Ignoring status for {} which is no longer polled", job_id);
            return;
        }

        let job = match result {
            Ok(job) => job,
            Err(e) => {
                let failures = self.failures.entry(job_id.clone()).or_insert(0);
                *failures += 1;
                warn!(
                    "Status poll for {} failed ({} in a row, transient: {}): {}",
                    job_id,
                    failures,
                    e.is_transient(),
                    e
                );
                return;
            }
        };

        self.failures.remove(&job_id);
        self.jobs.insert(job_id.clone(), job.clone());

        if job.is_terminal() {
            self.active.retain(|id| id != &job_id);
            match job.failure(&job_id) {
                Some(failure) => warn!("{}", failure),
                None => info!("Download {} completed: {:?}", job_id, job.file),
            }
            self.emit(TrackerEvent::Finished { job_id, job });
        } else {
            debug!("Download {} {} at {}%", job_id, job.status, job.progress);
            self.emit(TrackerEvent::Updated { job_id, job });
        }

        self.publish();
    }

    fn emit(&self, event: TrackerEvent) {
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(event);
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(TrackerSnapshot {
            jobs: self.jobs.clone(),
            active: self.active.clone(),
        });
    }
}

/// Cheap to clone; everything outside the tracker task talks through this
pub struct TrackerHandle<B> {
    backend: Arc<B>,
    commands: mpsc::UnboundedSender<TrackerCommand>,
    snapshot: watch::Receiver<TrackerSnapshot>,
    cancel: CancellationToken,
}

impl<B> Clone for TrackerHandle<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            commands: self.commands.clone(),
            snapshot: self.snapshot.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<B: DownloadBackend> TrackerHandle<B> {
    /// Validates locally, posts the download, then registers the returned job
    /// as `queued` with progress 0. Unplayable songs never reach the network.
    pub async fn submit(&self, song: &Song) -> Result<JobId, SubmitError> {
        let request = DownloadRequest::for_song(song)?;
        if self.cancel.is_cancelled() {
            return Err(SubmitError::TrackerClosed);
        }

        let job_id = self.backend.submit_download(&request).await?;

        let (ack, registered) = oneshot::channel();
        self.commands
            .send(TrackerCommand::Register { job_id: job_id.clone(), ack })
            .map_err(|_| SubmitError::TrackerClosed)?;
        registered.await.map_err(|_| SubmitError::TrackerClosed)?;

        info!("Queued download {} for '{}'", job_id, song.display_title());
        Ok(job_id)
    }

    /// Forget a job. Finished records stay around until this is called.
    pub fn discard(&self, job_id: &JobId) {
        let _ = self.commands.send(TrackerCommand::Discard(job_id.clone()));
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshot.clone()
    }

    /// Resolves with the final record once the job is terminal, or `None` if
    /// the tracker stops (or forgets the job) first.
    pub async fn wait_until_finished(&self, job_id: &JobId) -> Option<DownloadJob> {
        let mut rx = self.snapshot.clone();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                match snapshot.job(job_id) {
                    Some(job) if job.is_terminal() => return Some(job.clone()),
                    Some(_) => {}
                    None => return None,
                }
            }
            tokio::select! {
                changed = rx.changed() => changed.ok()?,
                _ = self.cancel.cancelled() => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloads::{IntervalTicker, JobStatus};
    use crate::error::ValidationError;
    use crate::testing::{job, song, unplayable_song, FakeBackend, ManualTicker};
    use std::time::Duration;
    use tokio::time::sleep;

    const POLL: Duration = Duration::from_millis(1500);

    fn start(
        backend: &Arc<FakeBackend>,
    ) -> (TrackerHandle<FakeBackend>, mpsc::UnboundedReceiver<TrackerEvent>, CancellationToken) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut tracker = JobTracker::new(Arc::clone(backend));
        tracker.set_event_sender(events_tx);
        let cancel = CancellationToken::new();
        let (handle, _task) = tracker.spawn(IntervalTicker::new(POLL), cancel.clone());
        (handle, events_rx, cancel)
    }

    fn statuses_for(events: &mut mpsc::UnboundedReceiver<TrackerEvent>, id: &JobId) -> Vec<JobStatus> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                TrackerEvent::Registered(job_id) if &job_id == id => seen.push(JobStatus::Queued),
                TrackerEvent::Updated { job_id, job } | TrackerEvent::Finished { job_id, job }
                    if &job_id == id =>
                {
                    seen.push(job.status)
                }
                _ => {}
            }
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_unplayable_song_rejected_locally() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, _events, _cancel) = start(&backend);

        let err = handle.submit(&unplayable_song("u1", "Offline")).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Invalid(ValidationError::MissingStreamUrl { ref song_id }) if song_id == "u1"
        ));
        assert!(backend.submissions().is_empty());
        assert!(handle.snapshot().jobs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_registers_queued_job() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, _events, _cancel) = start(&backend);

        let job_id = handle.submit(&song("s1", "Kesariya")).await.unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.job(&job_id), Some(&DownloadJob::queued()));
        assert_eq!(snapshot.active, vec![job_id]);
        assert_eq!(backend.submissions()[0].title, "Kesariya");
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_to_completion_then_stops_polling() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, mut events, _cancel) = start(&backend);

        let job_id = handle.submit(&song("s1", "Kesariya")).await.unwrap();
        backend.script(
            &job_id,
            vec![
                Some(job(JobStatus::Downloading, 10.0)),
                Some(job(JobStatus::Downloading, 60.0)),
                Some(DownloadJob {
                    status: JobStatus::Completed,
                    progress: 100.0,
                    file: Some("job-1_Kesariya.mp3".into()),
                    error_message: None,
                }),
            ],
        );

        let finished = handle.wait_until_finished(&job_id).await.unwrap();
        assert_eq!(finished.completed_file(), Some("job-1_Kesariya.mp3"));
        assert_eq!(backend.status_calls(&job_id), 3);

        // plenty of ticks later, still nothing new for this job
        sleep(POLL * 10).await;
        assert_eq!(backend.status_calls(&job_id), 3);

        let snapshot = handle.snapshot();
        assert!(snapshot.active.is_empty());
        assert_eq!(snapshot.job(&job_id), Some(&finished));

        let seen = statuses_for(&mut events, &job_id);
        assert_eq!(
            seen,
            vec![
                JobStatus::Queued,
                JobStatus::Downloading,
                JobStatus::Downloading,
                JobStatus::Completed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_kept_as_final_record() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, _events, _cancel) = start(&backend);

        let job_id = handle.submit(&song("s1", "Kesariya")).await.unwrap();
        backend.script(
            &job_id,
            vec![Some(DownloadJob {
                status: JobStatus::Failed,
                progress: 0.0,
                file: None,
                error_message: Some("No stream URL provided".into()),
            })],
        );

        let finished = handle.wait_until_finished(&job_id).await.unwrap();
        let failure = finished.failure(&job_id).unwrap();
        assert_eq!(failure.status, JobStatus::Failed);
        assert_eq!(failure.message, "No stream URL provided");

        sleep(POLL * 4).await;
        assert_eq!(backend.status_calls(&job_id), 1);

        handle.discard(&job_id);
        sleep(Duration::from_millis(1)).await;
        assert!(handle.snapshot().job(&job_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_mirrored_verbatim() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, _events, _cancel) = start(&backend);

        let job_id = handle.submit(&song("s1", "Kesariya")).await.unwrap();
        backend.script(
            &job_id,
            vec![
                Some(job(JobStatus::Downloading, 70.0)),
                Some(job(JobStatus::Downloading, 40.0)),
            ],
        );

        sleep(POLL + Duration::from_millis(10)).await;
        assert_eq!(handle.snapshot().job(&job_id).unwrap().progress, 70.0);

        sleep(POLL).await;
        assert_eq!(handle.snapshot().job(&job_id).unwrap().progress, 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_next_tick() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, _events, _cancel) = start(&backend);

        let job_id = handle.submit(&song("s1", "Kesariya")).await.unwrap();
        backend.script(&job_id, vec![None, None, Some(job(JobStatus::Downloading, 25.0))]);

        sleep(POLL * 2 + Duration::from_millis(10)).await;
        assert_eq!(backend.status_calls(&job_id), 2);
        assert_eq!(handle.snapshot().job(&job_id), Some(&DownloadJob::queued()));
        assert!(handle.snapshot().is_active(&job_id));

        sleep(POLL).await;
        assert_eq!(handle.snapshot().job(&job_id).unwrap().progress, 25.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_job_does_not_hold_back_others() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, _events, _cancel) = start(&backend);

        let slow = handle.submit(&song("s1", "Slow")).await.unwrap();
        let fast = handle.submit(&song("s2", "Fast")).await.unwrap();
        backend.script(&slow, vec![Some(job(JobStatus::Downloading, 5.0))]);
        backend.script(&fast, vec![Some(job(JobStatus::Downloading, 50.0))]);
        backend.delay_status(&slow, Duration::from_secs(10));

        sleep(POLL + Duration::from_millis(10)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.job(&fast).unwrap().progress, 50.0);
        assert_eq!(snapshot.job(&slow), Some(&DownloadJob::queued()));

        // the slow job keeps a single request outstanding instead of piling up
        sleep(POLL * 3).await;
        assert_eq!(backend.status_calls(&slow), 1);
        assert_eq!(backend.status_calls(&fast), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_all_polling() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, _events, cancel) = start(&backend);

        let a = handle.submit(&song("s1", "One")).await.unwrap();
        let b = handle.submit(&song("s2", "Two")).await.unwrap();
        backend.script(&a, vec![Some(job(JobStatus::Downloading, 10.0))]);
        backend.script(&b, vec![Some(job(JobStatus::Downloading, 20.0))]);

        sleep(POLL * 2 + Duration::from_millis(10)).await;
        assert_eq!(backend.total_status_calls(), 4);

        cancel.cancel();
        sleep(POLL * 20).await;
        assert_eq!(backend.total_status_calls(), 4);
        assert_eq!(handle.snapshot().active, vec![a, b]);

        let late = handle.submit(&song("s3", "Three")).await.unwrap_err();
        assert!(matches!(late, SubmitError::TrackerClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_arriving_after_cancel_is_dropped() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, mut events, cancel) = start(&backend);

        let job_id = handle.submit(&song("s1", "One")).await.unwrap();
        backend.script(&job_id, vec![Some(job(JobStatus::Completed, 100.0))]);
        backend.delay_status(&job_id, Duration::from_secs(2));

        // request goes out at 1.5s and would land at 3.5s
        sleep(POLL + Duration::from_millis(500)).await;
        assert_eq!(backend.status_calls(&job_id), 1);
        cancel.cancel();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.snapshot().job(&job_id), Some(&DownloadJob::queued()));
        assert_eq!(statuses_for(&mut events, &job_id), vec![JobStatus::Queued]);
    }

    #[tokio::test]
    async fn test_manual_ticks_poll_only_active_jobs() {
        let backend = Arc::new(FakeBackend::default());
        let (ticker, ticks) = ManualTicker::new();
        let cancel = CancellationToken::new();
        let (handle, _task) = JobTracker::new(Arc::clone(&backend)).spawn(ticker, cancel.clone());
        let mut updates = handle.subscribe();

        let a = handle.submit(&song("s1", "One")).await.unwrap();
        let b = handle.submit(&song("s2", "Two")).await.unwrap();
        backend.script(&a, vec![Some(job(JobStatus::Completed, 100.0))]);
        backend.script(&b, vec![Some(job(JobStatus::Downloading, 30.0))]);
        updates.borrow_and_update();

        ticks.send(()).unwrap();
        loop {
            {
                let snapshot = updates.borrow_and_update();
                let b_progress = snapshot.job(&b).map(|j| j.progress);
                if b_progress == Some(30.0) && !snapshot.is_active(&a) {
                    break;
                }
            }
            updates.changed().await.unwrap();
        }

        ticks.send(()).unwrap();
        while backend.status_calls(&b) < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.status_calls(&a), 1);
        cancel.cancel();
    }
}
